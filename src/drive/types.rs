use super::error::UploadError;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Parent type the drive API expects for files placed in a folder.
pub const EXPLORER_PARENT_TYPE: &str = "explorer";

/// Which drive resource family an upload targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DriveEndpoint {
    /// Files in a drive folder (`/drive/v1/files`).
    #[default]
    Files,
    /// Media attached to documents (`/drive/v1/medias`).
    Medias,
}

impl DriveEndpoint {
    pub fn path_prefix(self) -> &'static str {
        match self {
            Self::Files => "/drive/v1/files",
            Self::Medias => "/drive/v1/medias",
        }
    }

    pub fn default_parent_type(self) -> &'static str {
        match self {
            Self::Files => EXPLORER_PARENT_TYPE,
            Self::Medias => "docx_file",
        }
    }
}

/// How blocks of one upload are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ConcurrencyPolicy {
    /// One block in flight; the first failure aborts the pass.
    Sequential,
    /// Up to `max_in_flight` blocks at once; every block runs to completion
    /// before failures are reported.
    Parallel { max_in_flight: usize },
}

impl Default for ConcurrencyPolicy {
    fn default() -> Self {
        Self::Parallel { max_in_flight: 4 }
    }
}

/// Body of `upload_prepare`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrepareRequest {
    pub file_name: String,
    pub parent_type: String,
    pub parent_node: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<String>,
}

/// `data` of a successful `upload_prepare` reply.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PrepareReply {
    pub upload_id: String,
    pub block_size: u64,
    pub block_num: u32,
}

/// One `upload_part` call. The payload is kept for throttle retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartRequest {
    pub upload_id: String,
    pub seq: u32,
    pub size: u64,
    pub payload: Vec<u8>,
}

/// Body of `upload_finish`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinishRequest {
    pub upload_id: String,
    pub block_num: u32,
}

/// One-request `upload_all` call for files small enough to skip chunking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingleUploadRequest {
    pub file_name: String,
    pub parent_type: String,
    pub parent_node: String,
    pub size: u64,
    pub extra: Option<String>,
    pub payload: Vec<u8>,
}

/// Server-side handle correlating every block of one upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    upload_id: String,
    block_size: u64,
    block_count: u32,
    total_size: u64,
}

impl UploadSession {
    /// Build a session, checking that `block_size` and `block_count` cover
    /// `total_size` with a non-empty last block.
    pub fn new(
        upload_id: impl Into<String>,
        block_size: u64,
        block_count: u32,
        total_size: u64,
    ) -> Result<Self, UploadError> {
        let upload_id = upload_id.into();
        if upload_id.is_empty() {
            return Err(invalid("empty upload_id"));
        }
        if block_size == 0 {
            return Err(invalid("block_size must be positive"));
        }
        if block_count == 0 {
            return Err(invalid("block_num must be positive"));
        }
        let total = u128::from(total_size);
        let before_last = u128::from(block_count - 1) * u128::from(block_size);
        let covered = u128::from(block_count) * u128::from(block_size);
        if !(before_last < total && total <= covered) {
            return Err(invalid(format!(
                "{block_count} blocks of {block_size} bytes do not cover {total_size} bytes"
            )));
        }
        Ok(Self {
            upload_id,
            block_size,
            block_count,
            total_size,
        })
    }

    /// Validate a prepare reply against the size that was announced.
    pub fn from_reply(reply: PrepareReply, total_size: u64) -> Result<Self, UploadError> {
        Self::new(reply.upload_id, reply.block_size, reply.block_num, total_size)
    }

    /// Id every part and the finish call must carry.
    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    /// Size of every block but the last.
    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Number of blocks, sent as `block_num` on finish.
    pub fn block_count(&self) -> u32 {
        self.block_count
    }

    /// Bytes announced to prepare.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Byte range `[start, end)` of block `seq`; the last block ends at
    /// `total_size`.
    pub fn block_range(&self, seq: u32) -> Range<u64> {
        let start = u64::from(seq) * self.block_size;
        let end = if seq + 1 >= self.block_count {
            self.total_size
        } else {
            start + self.block_size
        };
        start..end
    }

    /// Every `(seq, range)` pair in sequence order.
    pub fn blocks(&self) -> impl Iterator<Item = (u32, Range<u64>)> + '_ {
        (0..self.block_count).map(move |seq| (seq, self.block_range(seq)))
    }

    /// Body of the `upload_finish` call closing this session.
    pub fn finish_request(&self) -> FinishRequest {
        FinishRequest {
            upload_id: self.upload_id.clone(),
            block_num: self.block_count,
        }
    }
}

fn invalid(reason: impl Into<String>) -> UploadError {
    UploadError::InvalidSession {
        reason: reason.into(),
    }
}

/// Number of blocks needed for `total_size` bytes: `ceil(total / block)`.
/// An exact multiple never yields an empty trailing block.
pub fn block_count_for(total_size: u64, block_size: u64) -> u64 {
    if block_size == 0 {
        return 0;
    }
    total_size.div_ceil(block_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lengths(session: &UploadSession) -> Vec<u64> {
        session.blocks().map(|(_, r)| r.end - r.start).collect()
    }

    #[test]
    fn thousand_bytes_in_four_hundred_byte_blocks() {
        assert_eq!(block_count_for(1000, 400), 3);
        let session = UploadSession::new("U", 400, 3, 1000).unwrap();
        assert_eq!(lengths(&session), vec![400, 400, 200]);
        assert_eq!(session.block_range(2), 800..1000);
    }

    #[test]
    fn exact_multiple_has_no_empty_tail() {
        assert_eq!(block_count_for(1200, 400), 3);
        let session = UploadSession::new("U", 400, 3, 1200).unwrap();
        assert_eq!(lengths(&session), vec![400, 400, 400]);
        assert!(UploadSession::new("U", 400, 4, 1200).is_err());
    }

    #[test]
    fn last_block_length_is_within_bounds() {
        for total in 1..=64u64 {
            for block in 1..=9u64 {
                let count = block_count_for(total, block);
                let session = UploadSession::new("U", block, count as u32, total).unwrap();
                let last = lengths(&session).pop().unwrap();
                assert!(last > 0 && last <= block, "total={total} block={block}");
                assert_eq!(last, total - (count - 1) * block);
                assert_eq!(lengths(&session).iter().sum::<u64>(), total);
            }
        }
    }

    #[test]
    fn rejects_sessions_breaking_the_cover_invariant() {
        assert!(UploadSession::new("U", 5, 1, 9).is_err());
        assert!(UploadSession::new("U", 5, 3, 9).is_err());
        assert!(UploadSession::new("U", 0, 1, 9).is_err());
        assert!(UploadSession::new("U", 5, 0, 9).is_err());
        assert!(UploadSession::new("", 5, 2, 9).is_err());
        assert!(UploadSession::new("U", 5, 1, 0).is_err());
    }

    #[test]
    fn finish_request_carries_id_and_count() {
        let session = UploadSession::new("U1", 5, 2, 9).unwrap();
        assert_eq!(
            session.finish_request(),
            FinishRequest {
                upload_id: "U1".into(),
                block_num: 2,
            }
        );
    }

    #[test]
    fn policy_serde_is_tagged_by_mode() {
        let p: ConcurrencyPolicy = serde_json::from_str(r#"{"mode":"sequential"}"#).unwrap();
        assert_eq!(p, ConcurrencyPolicy::Sequential);
        let p: ConcurrencyPolicy =
            serde_json::from_str(r#"{"mode":"parallel","max_in_flight":8}"#).unwrap();
        assert_eq!(p, ConcurrencyPolicy::Parallel { max_in_flight: 8 });
        assert_eq!(
            ConcurrencyPolicy::default(),
            ConcurrencyPolicy::Parallel { max_in_flight: 4 }
        );
    }

    #[test]
    fn prepare_request_omits_missing_extra() {
        let req = PrepareRequest {
            file_name: "a.bin".into(),
            parent_type: EXPLORER_PARENT_TYPE.into(),
            parent_node: "fldcn".into(),
            size: 9,
            extra: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("extra").is_none());
        assert_eq!(json["parent_type"], "explorer");
    }
}
