use super::error::DriveApiError;
use super::types::{FinishRequest, PartRequest, PrepareReply, PrepareRequest, SingleUploadRequest};
use async_trait::async_trait;

/// Remote drive operations the uploader depends on.
///
/// A non-zero business code is reported as [`DriveApiError::Remote`];
/// implementations must not retry on their own.
#[async_trait]
pub trait DriveApi: Send + Sync {
    async fn upload_prepare(&self, request: &PrepareRequest) -> Result<PrepareReply, DriveApiError>;

    async fn upload_part(&self, request: &PartRequest) -> Result<(), DriveApiError>;

    /// Commit the session and return the resulting file token.
    async fn upload_finish(&self, request: &FinishRequest) -> Result<String, DriveApiError>;

    /// Upload a whole file in one request and return its file token.
    async fn upload_all(&self, request: &SingleUploadRequest) -> Result<String, DriveApiError>;
}
