//! Upload configuration
//!
//! Read from `config.toml` in the platform config directory
//! (`~/.config/larkdrive/config.toml` on Linux) unless a path is given.

use crate::drive::{ConcurrencyPolicy, DriveEndpoint, FEISHU_BASE_URL, SINGLE_UPLOAD_LIMIT};
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Open platform base URL (`https://open.larksuite.com/open-apis` for Lark).
    pub base_url: String,
    /// Tenant access token used as the bearer credential.
    pub access_token: Option<String>,
    /// Environment variable to read the token from (takes precedence over `access_token`).
    pub access_token_env: Option<String>,
    pub endpoint: DriveEndpoint,
    /// Overrides the endpoint's default parent type (`explorer` for files).
    pub parent_type: Option<String>,
    pub prepare_per_second: u32,
    pub part_per_second: u32,
    pub finish_per_second: u32,
    pub policy: ConcurrencyPolicy,
    /// Files up to this size are sent with a single `upload_all` request.
    pub single_upload_limit: u64,
    pub timeout_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            base_url: FEISHU_BASE_URL.to_string(),
            access_token: None,
            access_token_env: None,
            endpoint: DriveEndpoint::Files,
            parent_type: None,
            prepare_per_second: 5,
            part_per_second: 5,
            finish_per_second: 5,
            policy: ConcurrencyPolicy::default(),
            single_upload_limit: SINGLE_UPLOAD_LIMIT,
            timeout_secs: 60,
        }
    }
}

impl UploadConfig {
    /// Default config file location, if the platform has a config directory.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "larkdrive")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Parse the config at `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("config {} not found, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
        };

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {} as TOML", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config in {}", path.display()))?;
        Ok(config)
    }

    /// Load from `path`, or from [`Self::default_path`] when none is given.
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => match Self::default_path() {
                Some(path) => Self::load(&path),
                None => Ok(Self::default()),
            },
        }
    }

    /// Reject values the uploader cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        let url = self.base_url.to_lowercase();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            bail!(
                "'base_url' must start with http:// or https://: '{}'",
                self.base_url
            );
        }
        for (name, rate) in [
            ("prepare_per_second", self.prepare_per_second),
            ("part_per_second", self.part_per_second),
            ("finish_per_second", self.finish_per_second),
        ] {
            if rate == 0 {
                bail!("'{name}' must be at least 1");
            }
        }
        if let ConcurrencyPolicy::Parallel { max_in_flight } = self.policy {
            if max_in_flight == 0 {
                bail!("'policy.max_in_flight' must be at least 1");
            }
            if max_in_flight > tokio::sync::Semaphore::MAX_PERMITS {
                bail!(
                    "'policy.max_in_flight' must be at most {}",
                    tokio::sync::Semaphore::MAX_PERMITS
                );
            }
        }
        if matches!(self.parent_type.as_deref(), Some("")) {
            bail!("'parent_type' must not be empty");
        }
        Ok(())
    }

    /// Resolve the access token: env var > inline.
    pub fn resolve_access_token(&self) -> Option<String> {
        if let Some(env_var) = &self.access_token_env {
            if let Ok(val) = std::env::var(env_var) {
                if !val.is_empty() {
                    return Some(val);
                }
            }
        }
        self.access_token.clone().filter(|t| !t.is_empty())
    }

    /// Configured parent type, or the endpoint's default.
    pub fn effective_parent_type(&self) -> String {
        self.parent_type
            .clone()
            .unwrap_or_else(|| self.endpoint.default_parent_type().to_string())
    }

    /// TOML rendering with the inline token masked.
    pub fn to_redacted_toml(&self) -> anyhow::Result<String> {
        let mut shown = self.clone();
        if shown.access_token.is_some() {
            shown.access_token = Some("***".into());
        }
        toml::to_string_pretty(&shown).context("Failed to serialize config")
    }
}
