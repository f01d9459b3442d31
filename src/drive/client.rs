//! reqwest-backed [`DriveApi`] talking to the Feishu/Lark open platform.
//!
//! The tenant access token is supplied by the caller; obtaining and
//! refreshing it is left to whoever owns the app credentials.

use super::api::DriveApi;
use super::error::DriveApiError;
use super::types::{
    DriveEndpoint, FinishRequest, PartRequest, PrepareReply, PrepareRequest, SingleUploadRequest,
};
use crate::config::UploadConfig;
use anyhow::Context;
use async_trait::async_trait;
use std::time::Duration;

pub const FEISHU_BASE_URL: &str = "https://open.feishu.cn/open-apis";
pub const LARK_BASE_URL: &str = "https://open.larksuite.com/open-apis";
/// Response header carrying the seconds until a frequency limit resets.
pub const RATE_LIMIT_RESET_HEADER: &str = "x-ogw-ratelimit-reset";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Drive API client for one app identity.
#[derive(Clone)]
pub struct FeishuDriveClient {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
    endpoint: DriveEndpoint,
}

impl std::fmt::Debug for FeishuDriveClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeishuDriveClient")
            .field("base_url", &self.base_url)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

fn extract_response_code(body: &serde_json::Value) -> Option<i64> {
    body.get("code").and_then(|c| c.as_i64())
}

fn extract_response_msg(body: &serde_json::Value) -> String {
    body.get("msg")
        .and_then(|m| m.as_str())
        .unwrap_or("unknown")
        .to_string()
}

fn required_str(body: &serde_json::Value, pointer: &str) -> Result<String, DriveApiError> {
    body.pointer(pointer)
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| DriveApiError::Malformed(format!("missing {pointer} in response")))
}

impl FeishuDriveClient {
    /// Client with a 60 s request timeout.
    pub fn new(
        base_url: impl Into<String>,
        access_token: impl Into<String>,
        endpoint: DriveEndpoint,
    ) -> Result<Self, DriveApiError> {
        let http = reqwest::Client::builder().timeout(DEFAULT_TIMEOUT).build()?;
        Ok(Self::with_http(http, base_url, access_token, endpoint))
    }

    /// Client reusing an already configured `reqwest::Client`.
    pub fn with_http(
        http: reqwest::Client,
        base_url: impl Into<String>,
        access_token: impl Into<String>,
        endpoint: DriveEndpoint,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
            endpoint,
        }
    }

    /// Build a client from config, resolving the access token from the
    /// environment or the file.
    pub fn from_config(config: &UploadConfig) -> anyhow::Result<Self> {
        let access_token = config
            .resolve_access_token()
            .context("no drive access token configured (access_token / access_token_env)")?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .context("failed to build drive HTTP client")?;
        Ok(Self::with_http(
            http,
            config.base_url.clone(),
            access_token,
            config.endpoint,
        ))
    }

    pub fn endpoint(&self) -> DriveEndpoint {
        self.endpoint
    }

    fn url(&self, operation: &str) -> String {
        format!("{}{}/{operation}", self.base_url, self.endpoint.path_prefix())
    }

    /// Turn an HTTP response into the JSON body of a `code == 0` reply.
    ///
    /// The open platform reports frequency limits as HTTP 400 with a
    /// business code, so the body code wins over the HTTP status.
    async fn read_reply(resp: reqwest::Response) -> Result<serde_json::Value, DriveApiError> {
        let status = resp.status();
        let rate_limit_reset = resp
            .headers()
            .get(RATE_LIMIT_RESET_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let bytes = resp.bytes().await?;

        let Ok(body) = serde_json::from_slice::<serde_json::Value>(&bytes) else {
            if status.is_success() {
                return Err(DriveApiError::Malformed(format!(
                    "non-JSON body with status {status}"
                )));
            }
            return Err(DriveApiError::Remote {
                code: i64::from(status.as_u16()),
                msg: String::from_utf8_lossy(&bytes).into_owned(),
                rate_limit_reset,
            });
        };

        match extract_response_code(&body) {
            Some(0) if status.is_success() => Ok(body),
            Some(code) if code != 0 => Err(DriveApiError::Remote {
                code,
                msg: extract_response_msg(&body),
                rate_limit_reset,
            }),
            Some(_) => Err(DriveApiError::Remote {
                code: i64::from(status.as_u16()),
                msg: extract_response_msg(&body),
                rate_limit_reset,
            }),
            None if status.is_success() => Err(DriveApiError::Malformed(format!(
                "missing code in response: {body}"
            ))),
            None => Err(DriveApiError::Remote {
                code: i64::from(status.as_u16()),
                msg: body.to_string(),
                rate_limit_reset,
            }),
        }
    }

    async fn post_json(
        &self,
        operation: &str,
        body: &impl serde::Serialize,
    ) -> Result<serde_json::Value, DriveApiError> {
        let resp = self
            .http
            .post(self.url(operation))
            .bearer_auth(&self.access_token)
            .json(body)
            .send()
            .await?;
        Self::read_reply(resp).await
    }

    async fn post_multipart(
        &self,
        operation: &str,
        form: reqwest::multipart::Form,
    ) -> Result<serde_json::Value, DriveApiError> {
        let resp = self
            .http
            .post(self.url(operation))
            .bearer_auth(&self.access_token)
            .multipart(form)
            .send()
            .await?;
        Self::read_reply(resp).await
    }
}

fn file_part(payload: Vec<u8>, file_name: &str) -> Result<reqwest::multipart::Part, DriveApiError> {
    Ok(reqwest::multipart::Part::bytes(payload)
        .file_name(file_name.to_string())
        .mime_str("application/octet-stream")?)
}

#[async_trait]
impl DriveApi for FeishuDriveClient {
    async fn upload_prepare(&self, request: &PrepareRequest) -> Result<PrepareReply, DriveApiError> {
        let body = self.post_json("upload_prepare", request).await?;
        let data = body
            .get("data")
            .cloned()
            .ok_or_else(|| DriveApiError::Malformed("missing data in upload_prepare".into()))?;
        serde_json::from_value(data)
            .map_err(|e| DriveApiError::Malformed(format!("upload_prepare data: {e}")))
    }

    async fn upload_part(&self, request: &PartRequest) -> Result<(), DriveApiError> {
        let form = reqwest::multipart::Form::new()
            .text("upload_id", request.upload_id.clone())
            .text("seq", request.seq.to_string())
            .text("size", request.size.to_string())
            .part(
                "file",
                file_part(request.payload.clone(), &format!("block-{}", request.seq))?,
            );
        self.post_multipart("upload_part", form).await?;
        Ok(())
    }

    async fn upload_finish(&self, request: &FinishRequest) -> Result<String, DriveApiError> {
        let body = self.post_json("upload_finish", request).await?;
        required_str(&body, "/data/file_token")
    }

    async fn upload_all(&self, request: &SingleUploadRequest) -> Result<String, DriveApiError> {
        let mut form = reqwest::multipart::Form::new()
            .text("file_name", request.file_name.clone())
            .text("parent_type", request.parent_type.clone())
            .text("parent_node", request.parent_node.clone())
            .text("size", request.size.to_string());
        if let Some(extra) = &request.extra {
            form = form.text("extra", extra.clone());
        }
        let form = form.part("file", file_part(request.payload.clone(), &request.file_name)?);
        let body = self.post_multipart("upload_all", form).await?;
        required_str(&body, "/data/file_token")
    }
}
