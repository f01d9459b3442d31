//! Chunked uploads to the Feishu/Lark drive.
//!
//! An [`Uploader`] runs the three-phase block protocol (prepare, upload
//! every part, finish) against any [`DriveApi`], pacing each call kind with
//! its own [`RateLimiter`] and waiting out server frequency limits.

pub mod api;
pub mod client;
pub mod error;
pub mod limiter;
pub mod source;
pub mod transfer;
pub mod types;
pub mod uploader;

#[cfg(test)]
pub(crate) mod fake;

pub use api::DriveApi;
pub use client::{FeishuDriveClient, FEISHU_BASE_URL, LARK_BASE_URL, RATE_LIMIT_RESET_HEADER};
pub use error::{AggregateError, DriveApiError, UploadError};
pub use limiter::RateLimiter;
pub use source::{BlockReader, FileSource, MemorySource, UploadSource};
pub use transfer::{transfer_block, THROTTLE_CODE};
pub use types::{
    block_count_for, ConcurrencyPolicy, DriveEndpoint, FinishRequest, PartRequest, PrepareReply,
    PrepareRequest, SingleUploadRequest, UploadSession, EXPLORER_PARENT_TYPE,
};
pub use uploader::{Uploader, SINGLE_UPLOAD_LIMIT};
