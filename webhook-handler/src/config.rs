//! Configuration module.
//!
//! [`HookOptions`] is the immutable `(path, secret)` pair the verifier is
//! built from. [`Config`] adds the web server settings and is read from
//! environment variables.

use std::env;
use std::fmt;

use thiserror::Error;
use tracing::warn;

/// Default request body limit (GitHub caps payloads at 25 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

/// Errors raised while building configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("must provide a 'path' option")]
    MissingPath,

    #[error("must provide a 'secret' option")]
    MissingSecret,
}

/// Route path and shared secret for a webhook endpoint.
///
/// Both values are required and non-empty. Construction fails immediately,
/// never at request time.
#[derive(Clone, PartialEq, Eq)]
pub struct HookOptions {
    path: String,
    secret: String,
}

impl HookOptions {
    /// Validate and build the options.
    pub fn new(path: impl Into<String>, secret: impl Into<String>) -> Result<Self, ConfigError> {
        let path = path.into();
        let secret = secret.into();

        if path.is_empty() {
            return Err(ConfigError::MissingPath);
        }
        if secret.is_empty() {
            return Err(ConfigError::MissingSecret);
        }

        Ok(Self { path, secret })
    }

    /// The exact request path this endpoint answers on.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The HMAC key shared with the sender.
    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for HookOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookOptions")
            .field("path", &self.path)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Route path and secret for the GitHub endpoint
    pub hook: HookOptions,

    /// Port for the web server to listen on
    pub port: u16,

    /// Largest request body accepted before the read is aborted
    pub max_body_bytes: usize,

    /// Bound of the channel verified events are forwarded on
    pub event_channel_capacity: usize,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// `WEBHOOK_PATH` and `WEBHOOK_SECRET` are required.
    pub fn from_env() -> Result<Self, ConfigError> {
        let hook = HookOptions::new(
            env::var("WEBHOOK_PATH").unwrap_or_default(),
            env::var("WEBHOOK_SECRET").unwrap_or_default(),
        )?;

        Ok(Config {
            hook,
            port: parse_or("PORT", 8080),
            max_body_bytes: parse_or("MAX_BODY_BYTES", DEFAULT_MAX_BODY_BYTES),
            event_channel_capacity: parse_or("EVENT_CHANNEL_CAPACITY", 1024_usize).max(1),
        })
    }
}

/// Parse an environment variable, falling back to `default` when unset or invalid.
fn parse_or<T>(name: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return default,
    };

    match raw.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            warn!(env_var = name, value = %raw, "Invalid value, using default");
            default
        }
    }
}
