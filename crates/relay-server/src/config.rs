//! Server configuration.
//!
//! Configuration can be loaded from:
//! - TOML configuration file (`relay.toml`, `/etc/relay/relay.toml`, `~/.config/relay/relay.toml`)
//! - Environment variables (`RELAY__PORT`, `RELAY__AUTH__ISSUER`, ...), which override the file
//! - An explicit file passed with `--config`, still subject to environment overrides

use anyhow::{bail, Context, Result};
use jsonwebtoken::Algorithm;
use relay_core::{DelivererConfig, TableMap, VerifierConfig};
use relay_protocol::Partition;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Default config file locations, first match wins.
const CONFIG_PATHS: [&str; 3] = [
    "relay.toml",
    "/etc/relay/relay.toml",
    "~/.config/relay/relay.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Token verification.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Connection registry.
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Fan-out delivery.
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Change feed.
    #[serde(default)]
    pub feed: FeedConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Path for change-feed batch ingestion.
    #[serde(default = "default_changes_path")]
    pub changes_path: String,

    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Outbound queue capacity per session.
    #[serde(default = "default_queue_capacity")]
    pub session_queue_capacity: usize,
}

/// Token verification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// The single accepted signing algorithm.
    #[serde(default = "default_algorithm")]
    pub algorithm: Algorithm,

    /// PEM public key, inline.
    #[serde(default)]
    pub public_key_pem: Option<String>,

    /// PEM public key, read from a file when no inline key is given.
    #[serde(default)]
    pub public_key_path: Option<String>,

    /// Expected token issuer.
    #[serde(default)]
    pub issuer: Option<String>,
}

/// Registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Ids fetched per page when listing a partition.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

/// Delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Maximum pushes in flight during one broadcast.
    #[serde(default = "default_max_concurrent_sends")]
    pub max_concurrent_sends: usize,
}

/// Change-feed configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Watched tables and the partition each one feeds.
    #[serde(default = "default_tables")]
    pub tables: Vec<TableMapping>,
}

/// One watched table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMapping {
    /// Table name as it appears in change records.
    pub name: String,
    /// Partition notified for changes to this table.
    pub partition: Partition,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_changes_path() -> String {
    "/changes".to_string()
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_queue_capacity() -> usize {
    relay_transport::DEFAULT_QUEUE_CAPACITY
}

fn default_algorithm() -> Algorithm {
    Algorithm::RS256
}

fn default_page_size() -> usize {
    relay_core::DEFAULT_PAGE_SIZE
}

fn default_max_concurrent_sends() -> usize {
    32
}

fn default_tables() -> Vec<TableMapping> {
    Partition::ALL
        .iter()
        .map(|p| TableMapping {
            name: p.as_str().to_string(),
            partition: *p,
        })
        .collect()
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            auth: AuthConfig::default(),
            registry: RegistryConfig::default(),
            delivery: DeliveryConfig::default(),
            feed: FeedConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
            changes_path: default_changes_path(),
            max_message_size: default_max_message_size(),
            session_queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            algorithm: default_algorithm(),
            public_key_pem: None,
            public_key_path: None,
            issuer: None,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sends: default_max_concurrent_sends(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            tables: default_tables(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl AuthConfig {
    /// Resolve the verifier configuration, reading the key file if needed.
    ///
    /// A missing key or issuer is left for the verifier to reject.
    ///
    /// # Errors
    ///
    /// Returns an error if the key file cannot be read.
    pub fn verifier_config(&self) -> Result<VerifierConfig> {
        let public_key_pem = match (&self.public_key_pem, &self.public_key_path) {
            (Some(pem), _) => Some(pem.clone()),
            (None, Some(path)) => {
                let expanded = shellexpand::tilde(path);
                let pem = std::fs::read_to_string(expanded.as_ref())
                    .with_context(|| format!("Failed to read public key: {}", expanded))?;
                Some(pem)
            }
            (None, None) => None,
        };

        Ok(VerifierConfig {
            algorithm: self.algorithm,
            public_key_pem,
            issuer: self.issuer.clone(),
        })
    }
}

impl FeedConfig {
    /// Build the table mapping.
    #[must_use]
    pub fn table_map(&self) -> TableMap {
        self.tables
            .iter()
            .map(|t| (t.name.clone(), t.partition))
            .collect()
    }
}

impl DeliveryConfig {
    /// Build the deliverer configuration.
    #[must_use]
    pub fn deliverer_config(&self) -> DelivererConfig {
        DelivererConfig {
            max_concurrent_sends: self.max_concurrent_sends,
        }
    }
}

impl Config {
    /// Load configuration from the first default file found, with
    /// `RELAY__*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let file = CONFIG_PATHS
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists());

        Self::layered(file.as_deref())
    }

    /// Load configuration from a specific file, with `RELAY__*` environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or cannot be parsed.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            bail!("Config file not found: {}", path.display());
        }
        Self::layered(Some(path))
    }

    fn layered(file: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(::config::File::from(path));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix("RELAY")
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder.build().context("Failed to load configuration")?;
        settings
            .try_deserialize()
            .context("Failed to parse configuration")
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }
}
