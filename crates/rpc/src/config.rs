//! Server and client configuration

use std::time::Duration;

use leasekeep_engine::{ConfigError, EngineConfig};

pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:5000";
pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:5000/rpc";
pub const DEFAULT_ADD_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum ServerConfigError {
    #[error("invalid value for {name}: {value:?}")]
    InvalidEnv { name: &'static str, value: String },

    #[error(transparent)]
    Engine(#[from] ConfigError),
}

/// RPC server configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub bind_address: String,
    /// Simulated duration of the `async_add` work
    pub add_delay: Duration,
    pub engine: EngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            add_delay: DEFAULT_ADD_DELAY,
            engine: EngineConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `BIND_ADDRESS`: Listen address (default: "127.0.0.1:5000")
    /// - `ADD_DELAY_SECONDS`: Duration of the `async_add` work (default: 60)
    /// - Engine options, see [`EngineConfig::from_env`]
    pub fn from_env() -> Result<Self, ServerConfigError> {
        let add_delay = match std::env::var("ADD_DELAY_SECONDS") {
            Ok(value) => parse_seconds("ADD_DELAY_SECONDS", &value)?,
            Err(_) => DEFAULT_ADD_DELAY,
        };

        Ok(Self {
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| DEFAULT_BIND_ADDRESS.to_string()),
            add_delay,
            engine: EngineConfig::from_env()?,
        })
    }

    pub fn with_add_delay(mut self, delay: Duration) -> Self {
        self.add_delay = delay;
        self
    }
}

fn parse_seconds(name: &'static str, value: &str) -> Result<Duration, ServerConfigError> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .ok_or_else(|| ServerConfigError::InvalidEnv {
            name,
            value: value.to_string(),
        })
}
