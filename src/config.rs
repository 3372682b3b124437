//! Runner configuration, built from environment variables at startup.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default base address of the in-cluster event sidecar.
pub const DEFAULT_LOCAL_ENDPOINT: &str = "http://127.0.0.1:8081";

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_PATH: &str = "/";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

/// Runner configuration. Built once at startup; immutable afterward.
#[derive(Debug)]
pub struct RunnerConfig {
    /// Remote control plane base URL (`KEPTN_ENDPOINT`).
    pub api_endpoint: Option<String>,
    /// Remote API token (`KEPTN_API_TOKEN`).
    pub api_token: Option<SecretString>,
    /// Local sidecar base URL (`KEPTN_EVENT_ENDPOINT`).
    pub local_endpoint: String,
    /// Port the event intake listens on (`RCV_PORT`).
    pub port: u16,
    /// Route the event intake accepts POSTs on (`RCV_PATH`).
    pub path: String,
    /// Delay between poll cycles (`POLL_INTERVAL_SECS`).
    pub poll_interval: Duration,
    /// Configuration service base URL for resource fetches
    /// (`CONFIGURATION_SERVICE`).
    pub configuration_service: Option<String>,
}

impl RunnerConfig {
    /// Build config from environment variables.
    ///
    /// Unset variables fall back to defaults; values that do not parse are
    /// a startup error. Empty strings count as unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_endpoint = non_empty_var("KEPTN_ENDPOINT");
        let api_token = non_empty_var("KEPTN_API_TOKEN").map(SecretString::from);
        let local_endpoint =
            non_empty_var("KEPTN_EVENT_ENDPOINT").unwrap_or_else(|| DEFAULT_LOCAL_ENDPOINT.to_string());

        let port: u16 = parse_var("RCV_PORT", DEFAULT_PORT)?;
        let path = non_empty_var("RCV_PATH").unwrap_or_else(|| DEFAULT_PATH.to_string());
        if !path.starts_with('/') {
            return Err(ConfigError::InvalidValue {
                key: "RCV_PATH".to_string(),
                message: "must start with '/'".to_string(),
            });
        }

        let poll_interval_secs: u64 = parse_var("POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL_SECS)?;
        if poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "POLL_INTERVAL_SECS".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        let configuration_service = non_empty_var("CONFIGURATION_SERVICE");

        Ok(Self {
            api_endpoint,
            api_token,
            local_endpoint,
            port,
            path,
            poll_interval: Duration::from_secs(poll_interval_secs),
            configuration_service,
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match non_empty_var(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}
