use std::num::ParseIntError;

/// Failure reported by a [`DriveApi`](super::DriveApi) call.
#[derive(Debug, thiserror::Error)]
pub enum DriveApiError {
    /// The open platform answered with a non-zero business code.
    #[error("code={code}, msg={msg}")]
    Remote {
        code: i64,
        msg: String,
        /// Raw `x-ogw-ratelimit-reset` header value, when the response carried one.
        rate_limit_reset: Option<String>,
    },

    #[error("drive request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected drive response: {0}")]
    Malformed(String),
}

impl DriveApiError {
    pub fn remote(code: i64, msg: impl Into<String>) -> Self {
        Self::Remote {
            code,
            msg: msg.into(),
            rate_limit_reset: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// Prepare, finish or single-shot upload rejected by the remote side.
    #[error("lark {op} failed, code: {code}, msg: {msg}")]
    Session {
        op: &'static str,
        code: i64,
        msg: String,
    },

    #[error("lark upload_part failed for block {seq}, code: {code}, msg: {msg}")]
    Transfer { seq: u32, code: i64, msg: String },

    #[error("invalid rate limit reset header '{value}' for block {seq}: {source}")]
    Parse {
        seq: u32,
        value: String,
        #[source]
        source: ParseIntError,
    },

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error("upload session rejected: {reason}")]
    InvalidSession { reason: String },

    #[error("{size} bytes exceed the single-request upload limit of {limit} bytes")]
    TooLargeForSingleUpload { size: u64, limit: u64 },

    #[error("parallel block transfer needs a random-access source")]
    UnsupportedSource,

    #[error("failed to read upload source: {0}")]
    Source(#[from] std::io::Error),

    #[error(transparent)]
    Api(#[from] DriveApiError),

    #[error("block transfer task aborted: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Every block failure collected from one parallel transfer pass.
#[derive(Debug, thiserror::Error)]
#[error("{} block transfers failed: {}", .errors.len(), summarize(.errors))]
pub struct AggregateError {
    pub errors: Vec<UploadError>,
}

fn summarize(errors: &[UploadError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl UploadError {
    /// Collapse the failures of a parallel pass: one error stays as-is,
    /// several become an [`AggregateError`].
    pub(crate) fn collect(mut errors: Vec<UploadError>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Aggregate(AggregateError { errors })),
        }
    }

    /// Remote status code carried by this error, if it originated remotely.
    pub fn remote_code(&self) -> Option<i64> {
        match self {
            Self::Session { code, .. } | Self::Transfer { code, .. } => Some(*code),
            Self::Api(DriveApiError::Remote { code, .. }) => Some(*code),
            _ => None,
        }
    }
}
