use super::api::DriveApi;
use super::client::FeishuDriveClient;
use super::error::{DriveApiError, UploadError};
use super::limiter::RateLimiter;
use super::source::{BlockReader, UploadSource};
use super::transfer::transfer_block;
use super::types::{
    ConcurrencyPolicy, DriveEndpoint, PrepareRequest, SingleUploadRequest, UploadSession,
};
use crate::config::UploadConfig;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinSet;

/// Files above this size cannot go through a single `upload_all` request.
pub const SINGLE_UPLOAD_LIMIT: u64 = 20 * 1024 * 1024;
const DEFAULT_CALLS_PER_SECOND: u32 = 5;

/// Drives prepare → transfer → finish for one upload at a time.
///
/// Cloning is cheap and clones share the same limiters.
#[derive(Clone)]
pub struct Uploader {
    api: Arc<dyn DriveApi>,
    prepare_limiter: Arc<RateLimiter>,
    part_limiter: Arc<RateLimiter>,
    finish_limiter: Arc<RateLimiter>,
    policy: ConcurrencyPolicy,
    parent_type: String,
    single_upload_limit: u64,
}

impl std::fmt::Debug for Uploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Uploader")
            .field("policy", &self.policy)
            .field("parent_type", &self.parent_type)
            .field("single_upload_limit", &self.single_upload_limit)
            .finish_non_exhaustive()
    }
}

impl Uploader {
    /// Uploader with default pacing (5 calls/s per kind) and policy.
    pub fn new(api: Arc<dyn DriveApi>) -> Self {
        Self {
            api,
            prepare_limiter: Arc::new(RateLimiter::per_second(DEFAULT_CALLS_PER_SECOND)),
            part_limiter: Arc::new(RateLimiter::per_second(DEFAULT_CALLS_PER_SECOND)),
            finish_limiter: Arc::new(RateLimiter::per_second(DEFAULT_CALLS_PER_SECOND)),
            policy: ConcurrencyPolicy::default(),
            parent_type: DriveEndpoint::Files.default_parent_type().to_string(),
            single_upload_limit: SINGLE_UPLOAD_LIMIT,
        }
    }

    /// Build an uploader backed by [`FeishuDriveClient`].
    pub fn from_config(config: &UploadConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let client = FeishuDriveClient::from_config(config)?;
        Ok(Self::new(Arc::new(client))
            .with_policy(config.policy)
            .with_rates(
                config.prepare_per_second,
                config.part_per_second,
                config.finish_per_second,
            )
            .with_parent_type(config.effective_parent_type())
            .with_single_upload_limit(config.single_upload_limit))
    }

    /// Replace the block scheduling policy.
    pub fn with_policy(mut self, policy: ConcurrencyPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Calls per second allowed for prepare, upload_part and finish.
    pub fn with_rates(mut self, prepare: u32, part: u32, finish: u32) -> Self {
        self.prepare_limiter = Arc::new(RateLimiter::per_second(prepare));
        self.part_limiter = Arc::new(RateLimiter::per_second(part));
        self.finish_limiter = Arc::new(RateLimiter::per_second(finish));
        self
    }

    /// Parent type sent with prepare and single-shot uploads.
    pub fn with_parent_type(mut self, parent_type: impl Into<String>) -> Self {
        self.parent_type = parent_type.into();
        self
    }

    /// Largest size [`Self::upload`] sends in one request.
    pub fn with_single_upload_limit(mut self, limit: u64) -> Self {
        self.single_upload_limit = limit;
        self
    }

    /// Policy used by [`Self::transfer_all`].
    pub fn policy(&self) -> ConcurrencyPolicy {
        self.policy
    }

    /// Open an upload session for `total_size` bytes.
    pub async fn prepare(
        &self,
        name: &str,
        parent_node: &str,
        total_size: u64,
        extra: Option<&str>,
    ) -> Result<UploadSession, UploadError> {
        let request = PrepareRequest {
            file_name: name.to_string(),
            parent_type: self.parent_type.clone(),
            parent_node: parent_node.to_string(),
            size: total_size,
            extra: extra.map(String::from),
        };

        self.prepare_limiter.acquire().await;
        let reply = self
            .api
            .upload_prepare(&request)
            .await
            .map_err(|e| session_error("upload_prepare", e))?;
        let session = UploadSession::from_reply(reply, total_size)?;
        tracing::info!(
            upload_id = session.upload_id(),
            block_size = session.block_size(),
            block_count = session.block_count(),
            "upload prepared for {name}"
        );
        Ok(session)
    }

    /// Send every block of `session` according to the configured policy.
    pub async fn transfer_all(
        &self,
        session: &UploadSession,
        source: UploadSource,
    ) -> Result<(), UploadError> {
        match self.policy {
            ConcurrencyPolicy::Sequential => self.transfer_sequential(session, source).await,
            ConcurrencyPolicy::Parallel { max_in_flight } => {
                let UploadSource::RandomAccess(reader) = source else {
                    return Err(UploadError::UnsupportedSource);
                };
                let bound = max_in_flight.clamp(1, tokio::sync::Semaphore::MAX_PERMITS);
                self.transfer_parallel(session, reader, bound).await
            }
        }
    }

    async fn transfer_sequential(
        &self,
        session: &UploadSession,
        mut source: UploadSource,
    ) -> Result<(), UploadError> {
        for (seq, range) in session.blocks() {
            let payload = source.next_block(range).await?;
            transfer_block(
                self.api.as_ref(),
                &self.part_limiter,
                session,
                seq,
                payload,
            )
            .await?;
        }
        source.ensure_exhausted().await?;
        Ok(())
    }

    async fn transfer_parallel(
        &self,
        session: &UploadSession,
        reader: Arc<dyn BlockReader>,
        max_in_flight: usize,
    ) -> Result<(), UploadError> {
        let permits = Arc::new(tokio::sync::Semaphore::new(max_in_flight));
        let shared = Arc::new(session.clone());
        let mut tasks = JoinSet::new();

        for (seq, range) in session.blocks() {
            let api = Arc::clone(&self.api);
            let limiter = Arc::clone(&self.part_limiter);
            let reader = Arc::clone(&reader);
            let session = Arc::clone(&shared);
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                let payload = reader.read_block(range).await?;
                transfer_block(api.as_ref(), &limiter, &session, seq, payload).await
            });
        }

        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => failures.push(e),
                Err(e) => failures.push(UploadError::Task(e)),
            }
        }

        if !failures.is_empty() {
            tracing::warn!(
                upload_id = session.upload_id(),
                failed = failures.len(),
                "parallel block transfer failed"
            );
        }
        match UploadError::collect(failures) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Commit `session` and return the file token.
    pub async fn finish(&self, session: &UploadSession) -> Result<String, UploadError> {
        self.finish_limiter.acquire().await;
        let token = self
            .api
            .upload_finish(&session.finish_request())
            .await
            .map_err(|e| session_error("upload_finish", e))?;
        tracing::info!(upload_id = session.upload_id(), "upload finished");
        Ok(token)
    }

    /// Chunked upload: prepare, transfer every block, finish.
    ///
    /// A failed upload leaves its session to expire on the server.
    pub async fn upload_file(
        &self,
        name: &str,
        parent_node: &str,
        total_size: u64,
        source: UploadSource,
    ) -> Result<String, UploadError> {
        self.upload_chunked(name, parent_node, total_size, None, source)
            .await
    }

    /// Chunked upload with an `extra` string forwarded to prepare.
    pub async fn upload_chunked(
        &self,
        name: &str,
        parent_node: &str,
        total_size: u64,
        extra: Option<&str>,
        source: UploadSource,
    ) -> Result<String, UploadError> {
        if total_size == 0 {
            return Err(UploadError::InvalidSession {
                reason: "an empty file cannot be uploaded in blocks".into(),
            });
        }
        let session = self.prepare(name, parent_node, total_size, extra).await?;
        self.transfer_all(&session, source).await?;
        self.finish(&session).await
    }

    /// Single-request upload for files up to the single-upload limit.
    pub async fn upload_all(
        &self,
        name: &str,
        parent_node: &str,
        total_size: u64,
        extra: Option<&str>,
        mut source: UploadSource,
    ) -> Result<String, UploadError> {
        if total_size > self.single_upload_limit {
            return Err(UploadError::TooLargeForSingleUpload {
                size: total_size,
                limit: self.single_upload_limit,
            });
        }
        let payload = source.next_block(0..total_size).await?;
        let request = SingleUploadRequest {
            file_name: name.to_string(),
            parent_type: self.parent_type.clone(),
            parent_node: parent_node.to_string(),
            size: total_size,
            extra: extra.map(String::from),
            payload,
        };

        self.prepare_limiter.acquire().await;
        let token = self
            .api
            .upload_all(&request)
            .await
            .map_err(|e| session_error("upload_all", e))?;
        tracing::info!(size = total_size, "uploaded {name} in one request");
        Ok(token)
    }

    /// Upload in one request when the file is small enough, in blocks
    /// otherwise.
    pub async fn upload(
        &self,
        name: &str,
        parent_node: &str,
        total_size: u64,
        source: UploadSource,
    ) -> Result<String, UploadError> {
        if total_size <= self.single_upload_limit {
            self.upload_all(name, parent_node, total_size, None, source)
                .await
        } else {
            self.upload_file(name, parent_node, total_size, source)
                .await
        }
    }

    /// Upload a local file under its own file name.
    ///
    /// With `chunked` the block protocol is used regardless of size.
    pub async fn upload_path(
        &self,
        path: &Path,
        parent_node: &str,
        chunked: bool,
    ) -> Result<String, UploadError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload.bin")
            .to_string();
        let (source, total_size) = UploadSource::open(path).await?;
        tracing::debug!(path = %path.display(), size = total_size, "uploading local file");
        if chunked {
            self.upload_file(&name, parent_node, total_size, source)
                .await
        } else {
            self.upload(&name, parent_node, total_size, source).await
        }
    }
}

fn session_error(op: &'static str, err: DriveApiError) -> UploadError {
    match err {
        DriveApiError::Remote { code, msg, .. } => UploadError::Session { op, code, msg },
        other => UploadError::Api(other),
    }
}
