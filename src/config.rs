//! Runtime configuration from environment variables (a `.env` file is
//! loaded first when present). Empty values count as unset.

use std::fmt;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use axum::http::HeaderName;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub db_path: PathBuf,
    /// `None` when no API key is configured; translation is then disabled.
    pub provider: Option<ProviderConfig>,
    /// Upper bound on a single provider call, enforced around any provider.
    pub provider_timeout: Duration,
    pub cache_capacity: NonZeroUsize,
    pub user_header: HeaderName,
}

/// OpenAI-compatible chat/completions endpoint settings.
#[derive(Clone)]
pub struct ProviderConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    /// Minimum spacing between provider requests. Zero disables pacing.
    pub min_request_interval: Duration,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("min_request_interval", &self.min_request_interval)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the process environment in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let provider = match get("OPENAI_API_KEY") {
            Some(api_key) => Some(ProviderConfig {
                api_key: api_key.trim().to_string(),
                base_url: get("OPENAI_BASE_URL")
                    .unwrap_or_else(|| "https://api.openai.com/v1".into())
                    .trim_end_matches('/')
                    .to_string(),
                model: get("PARLEY_MODEL").unwrap_or_else(|| "gpt-4o-mini".into()),
                temperature: parse_var(&get, "PARLEY_TEMPERATURE", 0.1)?,
                min_request_interval: Duration::from_millis(parse_var(
                    &get,
                    "PARLEY_MIN_REQUEST_INTERVAL_MS",
                    100u64,
                )?),
            }),
            None => None,
        };

        let timeout_secs: u64 = parse_var(&get, "PARLEY_PROVIDER_TIMEOUT_SECS", 30)?;
        if timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "PARLEY_PROVIDER_TIMEOUT_SECS",
                reason: "must be greater than zero".into(),
            });
        }

        let cache_capacity = NonZeroUsize::new(parse_var(&get, "PARLEY_CACHE_CAPACITY", 512)?)
            .ok_or_else(|| ConfigError::Invalid {
                var: "PARLEY_CACHE_CAPACITY",
                reason: "must be greater than zero".into(),
            })?;

        let header = get("PARLEY_USER_HEADER").unwrap_or_else(|| "x-user-id".into());
        let user_header = HeaderName::from_bytes(header.trim().to_ascii_lowercase().as_bytes())
            .map_err(|e| ConfigError::Invalid {
                var: "PARLEY_USER_HEADER",
                reason: e.to_string(),
            })?;

        Ok(Self {
            bind_addr: parse_var(&get, "PARLEY_BIND", SocketAddr::from(([127, 0, 0, 1], 3000)))?,
            db_path: get("PARLEY_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("parley.db")),
            provider,
            provider_timeout: Duration::from_secs(timeout_secs),
            cache_capacity,
            user_header,
        })
    }
}

fn parse_var<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}
