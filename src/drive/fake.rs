//! In-memory drive used by the uploader tests.

use super::api::DriveApi;
use super::error::DriveApiError;
use super::transfer::THROTTLE_CODE;
use super::types::{
    block_count_for, FinishRequest, PartRequest, PrepareReply, PrepareRequest, SingleUploadRequest,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone)]
struct ScriptedFailure {
    code: i64,
    msg: String,
    reset: Option<String>,
}

impl ScriptedFailure {
    fn to_error(&self) -> DriveApiError {
        DriveApiError::Remote {
            code: self.code,
            msg: self.msg.clone(),
            rate_limit_reset: self.reset.clone(),
        }
    }
}

pub(crate) struct FakeDrive {
    block_size: u64,
    upload_id: String,
    file_token: String,
    part_script: Mutex<HashMap<u32, VecDeque<ScriptedFailure>>>,
    prepare_failure: Option<ScriptedFailure>,
    finish_failure: Option<ScriptedFailure>,
    part_latency: Duration,
    prepares: Mutex<Vec<PrepareRequest>>,
    parts: Mutex<Vec<PartRequest>>,
    finishes: Mutex<Vec<FinishRequest>>,
    singles: Mutex<Vec<SingleUploadRequest>>,
    stored: Mutex<BTreeMap<u32, Vec<u8>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeDrive {
    pub(crate) fn new(block_size: u64) -> Self {
        Self {
            block_size,
            upload_id: "U1".into(),
            file_token: "T1".into(),
            part_script: Mutex::new(HashMap::new()),
            prepare_failure: None,
            finish_failure: None,
            part_latency: Duration::ZERO,
            prepares: Mutex::new(Vec::new()),
            parts: Mutex::new(Vec::new()),
            finishes: Mutex::new(Vec::new()),
            singles: Mutex::new(Vec::new()),
            stored: Mutex::new(BTreeMap::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Queue a frequency-limit reply for the next attempt at block `seq`.
    pub(crate) fn throttle(self, seq: u32, reset: &str) -> Self {
        self.fail(seq, THROTTLE_CODE, "request trigger frequency limit", Some(reset))
    }

    /// Queue a failure for the next attempt at block `seq`.
    pub(crate) fn fail(self, seq: u32, code: i64, msg: &str, reset: Option<&str>) -> Self {
        self.part_script
            .lock()
            .entry(seq)
            .or_default()
            .push_back(ScriptedFailure {
                code,
                msg: msg.into(),
                reset: reset.map(String::from),
            });
        self
    }

    pub(crate) fn fail_prepare(mut self, code: i64, msg: &str) -> Self {
        self.prepare_failure = Some(ScriptedFailure {
            code,
            msg: msg.into(),
            reset: None,
        });
        self
    }

    pub(crate) fn fail_finish(mut self, code: i64, msg: &str) -> Self {
        self.finish_failure = Some(ScriptedFailure {
            code,
            msg: msg.into(),
            reset: None,
        });
        self
    }

    pub(crate) fn part_latency(mut self, latency: Duration) -> Self {
        self.part_latency = latency;
        self
    }

    pub(crate) fn prepare_calls(&self) -> Vec<PrepareRequest> {
        self.prepares.lock().clone()
    }

    pub(crate) fn part_calls(&self) -> Vec<PartRequest> {
        self.parts.lock().clone()
    }

    pub(crate) fn finish_calls(&self) -> Vec<FinishRequest> {
        self.finishes.lock().clone()
    }

    pub(crate) fn single_calls(&self) -> Vec<SingleUploadRequest> {
        self.singles.lock().clone()
    }

    pub(crate) fn stored_blocks(&self) -> Vec<(u32, Vec<u8>)> {
        self.stored
            .lock()
            .iter()
            .map(|(seq, bytes)| (*seq, bytes.clone()))
            .collect()
    }

    /// Blocks reassembled in sequence order.
    pub(crate) fn assembled(&self) -> Vec<u8> {
        self.stored.lock().values().flatten().copied().collect()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DriveApi for FakeDrive {
    async fn upload_prepare(&self, request: &PrepareRequest) -> Result<PrepareReply, DriveApiError> {
        self.prepares.lock().push(request.clone());
        if let Some(failure) = &self.prepare_failure {
            return Err(failure.to_error());
        }
        Ok(PrepareReply {
            upload_id: self.upload_id.clone(),
            block_size: self.block_size,
            block_num: block_count_for(request.size, self.block_size) as u32,
        })
    }

    async fn upload_part(&self, request: &PartRequest) -> Result<(), DriveApiError> {
        self.parts.lock().push(request.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.part_latency.is_zero() {
            tokio::time::sleep(self.part_latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let scripted = self
            .part_script
            .lock()
            .get_mut(&request.seq)
            .and_then(VecDeque::pop_front);
        if let Some(failure) = scripted {
            return Err(failure.to_error());
        }
        if request.upload_id != self.upload_id {
            return Err(DriveApiError::remote(1061002, "unknown upload_id"));
        }
        self.stored.lock().insert(request.seq, request.payload.clone());
        Ok(())
    }

    async fn upload_finish(&self, request: &FinishRequest) -> Result<String, DriveApiError> {
        self.finishes.lock().push(request.clone());
        if let Some(failure) = &self.finish_failure {
            return Err(failure.to_error());
        }
        let stored = self.stored.lock();
        let complete = (0..request.block_num).all(|seq| stored.contains_key(&seq));
        if !complete || stored.len() != request.block_num as usize {
            return Err(DriveApiError::remote(1061045, "block missing"));
        }
        Ok(self.file_token.clone())
    }

    async fn upload_all(&self, request: &SingleUploadRequest) -> Result<String, DriveApiError> {
        self.singles.lock().push(request.clone());
        Ok(self.file_token.clone())
    }
}
