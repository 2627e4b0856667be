// Configuration module entry point
// Manages application configuration and shared runtime state

mod state;
mod types;

use std::net::SocketAddr;

use ::config::builder::DefaultState;
use ::config::ConfigBuilder;

use crate::http::body::DEFAULT_BODY_CAPACITY;

// Re-export public types
pub use state::AppState;
pub use types::{Config, HttpConfig, LoggingConfig, RelayConfig, RoutesConfig};

/// Default config file, looked up without extension
pub const DEFAULT_CONFIG_PATH: &str = "config";

impl Config {
    /// Load configuration from specified file path (extension optional)
    /// A missing file is not an error; defaults and environment still apply
    pub fn load_from(config_path: &str) -> Result<Self, config::ConfigError> {
        Self::builder()?
            .add_source(config::File::with_name(config_path).required(false))
            .add_source(
                config::Environment::with_prefix("FPS_RELAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    fn builder() -> Result<ConfigBuilder<DefaultState>, config::ConfigError> {
        config::Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("logging.level", "info")?
            .set_default("logging.access_log", true)?
            .set_default("performance.keep_alive_timeout", 75)?
            .set_default("performance.read_timeout", 30)?
            .set_default("performance.write_timeout", 30)?
            .set_default("performance.shutdown_timeout", 10)?
            .set_default("http.server_name", "fps-relay")?
            .set_default("http.max_body_size", 1_048_576)? // 1MB
            .set_default("http.default_body_capacity", DEFAULT_BODY_CAPACITY as u64)?
            .set_default("relay.handler_name", "fps_handler")?
            .set_default("relay.process_symbol", "fpsProcessOperations")?
            .set_default("relay.dispose_symbol", "fpsDisposeResponse")?
            .set_default("relay.legacy_status", false)?
            .set_default("relay.failure_status", 502)?
            .set_default("relay.serialize_calls", false)
    }

    pub fn get_socket_addr(&self) -> Result<SocketAddr, String> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| format!("Invalid address: {e}"))
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
