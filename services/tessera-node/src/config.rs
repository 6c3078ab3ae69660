//! Node configuration
//!
//! Layered from optional TOML files (`config/default`, `config/local`, then
//! `--config`) and `TESSERA__`-prefixed environment variables, e.g.
//! `TESSERA__SERVER__PORT=8080` or `TESSERA__PROPOSER__PRIVATE_KEY=0x..`.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use tessera_db::{mask_url, DatabaseConfig};
use tessera_intents::IntentsConfig;
use tessera_sequencer::SequencerConfig;
use tessera_types::ErrorClass;
use tessera_webhook::WebhookConfig;

/// A setting the node cannot start without
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid setting {key}: {message}")]
    Invalid { key: &'static str, message: String },

    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

impl ConfigError {
    pub fn class(&self) -> ErrorClass {
        ErrorClass::FatalConfig
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub server: ServerSettings,
    pub database: DatabaseConfig,
    pub proposer: ProposerSettings,
    pub chain: ChainSettings,
    pub sequencer: SequencerConfig,
    pub intents: IntentsConfig,
    pub webhook: Option<WebhookConfig>,
    pub health: HealthSettings,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Bound on waiting for in-flight HTTP requests at shutdown
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            shutdown_timeout_secs: 30,
        }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                key: "server.host",
                message: e.to_string(),
            })
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProposerSettings {
    /// Hex secp256k1 key that signs bundles
    pub private_key: Option<String>,
}

impl std::fmt::Debug for ProposerSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProposerSettings")
            .field("private_key", &self.private_key.as_ref().map(|_| "***"))
            .finish()
    }
}

/// External endpoints. Unused in dev mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainSettings {
    pub relayer_url: Option<String>,
    pub content_url: Option<String>,
    /// Archival is skipped when unset
    pub archival_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            relayer_url: None,
            content_url: None,
            archival_url: None,
            api_key: None,
            timeout_ms: 30_000,
        }
    }
}

impl ChainSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    /// Period of the background database health check
    pub interval_secs: u64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self { interval_secs: 30 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
    /// `pretty` or `json`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl NodeConfig {
    /// Load from `.env`, config files and the environment
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false));

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("TESSERA")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        Ok(builder.build()?.try_deserialize()?)
    }

    /// Check everything the node needs before anything is started.
    ///
    /// Dev mode runs against in-memory stores and a simulated chain, so only
    /// the proposer key is required there.
    pub fn validate(&self, dev: bool) -> Result<(), ConfigError> {
        if self.proposer.private_key.is_none() && !dev {
            return Err(ConfigError::Missing("proposer.private_key"));
        }
        if self.sequencer.interval_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "sequencer.interval_ms",
                message: "must be greater than zero".to_string(),
            });
        }
        if dev {
            return Ok(());
        }

        if self.database.postgres_url.trim().is_empty() {
            return Err(ConfigError::Missing("database.postgres_url"));
        }
        if self.chain.relayer_url.is_none() {
            return Err(ConfigError::Missing("chain.relayer_url"));
        }
        if self.chain.content_url.is_none() {
            return Err(ConfigError::Missing("chain.content_url"));
        }
        if let Some(webhook) = &self.webhook {
            if webhook.url.trim().is_empty() {
                return Err(ConfigError::Missing("webhook.url"));
            }
        }
        Ok(())
    }

    /// One-line summary with secrets masked
    pub fn describe(&self) -> String {
        format!(
            "server={}:{} database={} relayer={} content={} archival={} webhook={}",
            self.server.host,
            self.server.port,
            mask_url(&self.database.postgres_url),
            self.chain.relayer_url.as_deref().unwrap_or("-"),
            self.chain.content_url.as_deref().unwrap_or("-"),
            self.chain.archival_url.as_deref().unwrap_or("-"),
            self.webhook.as_ref().map(|w| w.url.as_str()).unwrap_or("-"),
        )
    }
}
