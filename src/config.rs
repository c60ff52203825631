//! Configuration file parser for ~/.config/imagefeed/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde but logged as likely typos. OAuth client
//! credentials may also come from `IMAGEFEED_ACCESS_KEY` /
//! `IMAGEFEED_SECRET_KEY`, which take precedence over the file.
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;
use url::Url;

use crate::util::{validate_base_url, UrlValidationError};

pub const ACCESS_KEY_ENV: &str = "IMAGEFEED_ACCESS_KEY";
pub const SECRET_KEY_ENV: &str = "IMAGEFEED_SECRET_KEY";

/// Largest page the upstream API will serve.
pub const MAX_PAGE_SIZE: u32 = 30;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid {field}: {source}")]
    BaseUrl {
        field: &'static str,
        #[source]
        source: UrlValidationError,
    },

    #[error("Invalid page_size {0}: must be between 1 and {max}", max = MAX_PAGE_SIZE)]
    PageSize(u32),

    #[error("Missing {0}: set it in config.toml or via {1}")]
    MissingCredential(&'static str, &'static str),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Custom Debug impl masks `secret_key`.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// REST API root (photos, likes, profile).
    pub api_base_url: String,

    /// OAuth root (authorize page and token endpoint).
    pub auth_base_url: String,

    /// OAuth client id.
    pub access_key: Option<String>,

    /// OAuth client secret.
    pub secret_key: Option<String>,

    pub redirect_uri: String,

    /// Scopes requested on the authorize page, `+`-separated.
    pub access_scope: String,

    /// Photos requested per page.
    pub page_size: u32,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.unsplash.com".to_string(),
            auth_base_url: "https://unsplash.com".to_string(),
            access_key: None,
            secret_key: None,
            redirect_uri: "urn:ietf:wg:oauth:2.0:oob".to_string(),
            access_scope: "public+read_user+write_likes".to_string(),
            page_size: 10,
            request_timeout_secs: 30,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_base_url", &self.api_base_url)
            .field("auth_base_url", &self.auth_base_url)
            .field("access_key", &self.access_key)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "[REDACTED]"))
            .field("redirect_uri", &self.redirect_uri)
            .field("access_scope", &self.access_scope)
            .field("page_size", &self.page_size)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// OAuth client settings resolved from [`Config`], with the secret wrapped.
#[derive(Debug)]
pub struct OAuthSettings {
    pub auth_base: Url,
    pub access_key: String,
    pub secret_key: SecretString,
    pub redirect_uri: String,
    pub access_scope: String,
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 8] = [
        "api_base_url",
        "auth_base_url",
        "access_key",
        "secret_key",
        "redirect_uri",
        "access_scope",
        "page_size",
        "request_timeout_secs",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing or empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line info
    /// - Unknown keys → accepted, logged as warning
    /// - Out-of-range values → `Err` from [`Config::validate`]
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        tracing::info!(
            path = %path.display(),
            api = %config.api_base_url,
            page_size = config.page_size,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Overlay credentials from the environment (env wins over the file).
    pub fn apply_env(&mut self) {
        self.apply_overrides(
            std::env::var(ACCESS_KEY_ENV).ok(),
            std::env::var(SECRET_KEY_ENV).ok(),
        );
    }

    fn apply_overrides(&mut self, access_key: Option<String>, secret_key: Option<String>) {
        if let Some(key) = access_key.filter(|k| !k.trim().is_empty()) {
            self.access_key = Some(key);
        }
        if let Some(key) = secret_key.filter(|k| !k.trim().is_empty()) {
            self.secret_key = Some(key);
        }
    }

    /// Check value ranges and base URLs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(ConfigError::PageSize(self.page_size));
        }
        self.api_base()?;
        self.auth_base()?;
        Ok(())
    }

    pub fn api_base(&self) -> Result<Url, ConfigError> {
        validate_base_url(&self.api_base_url).map_err(|source| ConfigError::BaseUrl {
            field: "api_base_url",
            source,
        })
    }

    pub fn auth_base(&self) -> Result<Url, ConfigError> {
        validate_base_url(&self.auth_base_url).map_err(|source| ConfigError::BaseUrl {
            field: "auth_base_url",
            source,
        })
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Resolve the OAuth client settings; both credentials are required.
    pub fn oauth_settings(&self) -> Result<OAuthSettings, ConfigError> {
        let access_key = self
            .access_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or(ConfigError::MissingCredential("access_key", ACCESS_KEY_ENV))?;
        let secret_key = self
            .secret_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or(ConfigError::MissingCredential("secret_key", SECRET_KEY_ENV))?;

        Ok(OAuthSettings {
            auth_base: self.auth_base()?,
            access_key,
            secret_key: SecretString::from(secret_key),
            redirect_uri: self.redirect_uri.clone(),
            access_scope: self.access_scope.clone(),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
