//! larkdrive: chunked, rate-limited file uploads to the Feishu/Lark drive.

pub mod config;
pub mod drive;

pub use config::UploadConfig;
pub use drive::{ConcurrencyPolicy, DriveApi, FeishuDriveClient, UploadError, UploadSource, Uploader};
