//! Agent configuration
//!
//! The agent reads one JSON (or YAML) document describing the relay, the
//! network timings, logging, the status dashboard and the ordered list of
//! local services to expose. Keys from the older `playit`-style layout are
//! accepted as aliases.

use portlink_transport::{SessionOptions, TransportKind};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Largest accepted `network.backoffMultiplier`
pub const MAX_BACKOFF_MULTIPLIER: f64 = 10.0;

/// Configuration loading and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration file format
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    /// Name shown in logs and in the status snapshot
    pub agent_name: String,

    /// Relay endpoint
    #[serde(alias = "playit")]
    pub relay: RelayConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub dashboard: DashboardConfig,

    /// Local services, in configuration order
    #[serde(default)]
    pub servers: Vec<ServerEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayConfig {
    /// Relay hostname, resolved once per controller run
    #[serde(alias = "ip")]
    pub hostname: String,

    /// Relay port of the first configured server; server `i` uses `base_port + i`
    #[serde(alias = "basePortBase")]
    pub base_port: u16,

    /// Request path for framed (WebSocket) tunnels, e.g. "/tunnel"
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub websocket_path: String,
}

/// Network timings, all in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,

    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay: u64,

    /// Cap for the reconnect delay when a backoff multiplier is set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_reconnect_delay: Option<u64>,

    /// Growth factor applied to the delay after each failed attempt (1.0 = fixed)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_multiplier: Option<f64>,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: default_heartbeat_interval(),
            reconnect_delay: default_reconnect_delay(),
            max_reconnect_delay: None,
            backoff_multiplier: None,
            connect_timeout: default_connect_timeout(),
        }
    }
}

impl NetworkConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay)
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_delay.unwrap_or(self.reconnect_delay))
    }

    pub fn backoff_multiplier(&self) -> f64 {
        self.backoff_multiplier.unwrap_or(1.0)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    #[serde(default = "default_true")]
    pub console: bool,

    /// Append to `<directory>/agent.log`
    #[serde(default)]
    pub file: bool,

    #[serde(default = "default_log_directory")]
    pub directory: PathBuf,

    /// Filter directive (e.g. "info", "portlink_agent=debug")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            console: true,
            file: false,
            directory: default_log_directory(),
            level: None,
        }
    }
}

impl LoggingConfig {
    pub fn file_path(&self) -> PathBuf {
        self.directory.join("agent.log")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_dashboard_bind")]
    pub bind: String,

    #[serde(default = "default_dashboard_port")]
    pub port: u16,

    /// Directory of static assets served at `/`
    #[serde(default = "default_assets_dir")]
    pub assets_dir: PathBuf,

    /// Snapshot re-publish cadence in milliseconds
    #[serde(default = "default_publish_interval")]
    pub publish_interval: u64,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: default_dashboard_bind(),
            port: default_dashboard_port(),
            assets_dir: default_assets_dir(),
            publish_interval: default_publish_interval(),
        }
    }
}

impl DashboardConfig {
    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval)
    }
}

/// One configured local service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEntry {
    /// Service label, e.g. "tcp" or "minecraft"
    #[serde(rename = "type")]
    pub service_type: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_local_host")]
    pub local_host: String,

    pub local_port: u16,

    #[serde(default, alias = "useWSS")]
    pub use_framed_transport: bool,

    #[serde(default, alias = "tls")]
    pub use_encryption: bool,

    /// Skip relay certificate verification (encrypted framed transport only)
    #[serde(default)]
    pub insecure: bool,
}

/// Transport flags of one tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportOptions {
    pub use_framed_transport: bool,
    pub use_encryption: bool,
    pub verify_server_cert: bool,
}

/// Immutable description of one tunnel, derived from a `ServerEntry`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSpec {
    pub service_type: String,
    pub transport: TransportKind,
    pub relay_port: u16,
    pub local_host: String,
    pub local_port: u16,
    pub options: TransportOptions,
}

impl TunnelSpec {
    /// Human-readable tag used in every log line of this tunnel
    pub fn name(&self) -> String {
        format!(
            "{} [Port: {}]",
            self.service_type.to_uppercase(),
            self.relay_port
        )
    }

    pub fn local_address(&self) -> String {
        format!("{}:{}", self.local_host, self.local_port)
    }

    /// Session options for connecting this tunnel to the relay
    pub fn session_options(&self, network: &NetworkConfig) -> SessionOptions {
        SessionOptions {
            kind: self.transport,
            use_encryption: self.options.use_encryption,
            verify_server_cert: self.options.verify_server_cert,
            connect_timeout: network.connect_timeout(),
            ..Default::default()
        }
    }
}

impl AgentConfig {
    /// Load configuration from a JSON or YAML file (by extension)
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let is_yaml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("yaml") | Some("yml")
        );

        let config = if is_yaml {
            Self::from_yaml(&contents)
        } else {
            Self::from_json(&contents)
        }
        .map_err(|reason| ConfigError::Parse {
            path: path.to_path_buf(),
            reason,
        })?;

        config.validate()?;
        Ok(config)
    }

    pub fn from_json(contents: &str) -> Result<Self, String> {
        serde_json::from_str(contents).map_err(|e| e.to_string())
    }

    pub fn from_yaml(contents: &str) -> Result<Self, String> {
        serde_yaml::from_str(contents).map_err(|e| e.to_string())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent_name.trim().is_empty() {
            return Err(ConfigError::Invalid("agentName cannot be empty".to_string()));
        }

        if self.relay.hostname.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "relay.hostname cannot be empty".to_string(),
            ));
        }

        if self.network.heartbeat_interval == 0 {
            return Err(ConfigError::Invalid(
                "network.heartbeatInterval must be greater than zero".to_string(),
            ));
        }

        if self.network.reconnect_delay == 0 {
            return Err(ConfigError::Invalid(
                "network.reconnectDelay must be greater than zero".to_string(),
            ));
        }

        if let Some(multiplier) = self.network.backoff_multiplier {
            if !(1.0..=MAX_BACKOFF_MULTIPLIER).contains(&multiplier) {
                return Err(ConfigError::Invalid(format!(
                    "network.backoffMultiplier must be between 1.0 and {} (got {})",
                    MAX_BACKOFF_MULTIPLIER, multiplier
                )));
            }
        }

        if let Some(max) = self.network.max_reconnect_delay {
            if max < self.network.reconnect_delay {
                return Err(ConfigError::Invalid(format!(
                    "network.maxReconnectDelay ({}) is below network.reconnectDelay ({})",
                    max, self.network.reconnect_delay
                )));
            }
        }

        let path = &self.relay.websocket_path;
        if !path.is_empty() && !path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "relay.websocketPath must start with '/' (got {:?})",
                path
            )));
        }

        for (index, server) in self.servers.iter().enumerate() {
            if server.service_type.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "servers[{}].type cannot be empty",
                    index
                )));
            }
            if server.local_port == 0 {
                return Err(ConfigError::Invalid(format!(
                    "servers[{}].localPort cannot be 0",
                    index
                )));
            }
            self.relay_port(index)?;
        }

        Ok(())
    }

    /// Relay port of the server at `index` in the full list
    pub fn relay_port(&self, index: usize) -> Result<u16, ConfigError> {
        u16::try_from(index)
            .ok()
            .and_then(|offset| self.relay.base_port.checked_add(offset))
            .ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "relay port for servers[{}] exceeds 65535 (basePort {})",
                    index, self.relay.base_port
                ))
            })
    }

    /// Derive the ordered tunnel specs of all enabled servers
    ///
    /// The port offset counts every configured server, enabled or not, so
    /// disabling one entry never renumbers the ones after it.
    pub fn tunnel_specs(&self) -> Result<Vec<TunnelSpec>, ConfigError> {
        let mut specs = Vec::new();

        for (index, server) in self.servers.iter().enumerate() {
            let relay_port = self.relay_port(index)?;
            if !server.enabled {
                continue;
            }

            let transport = if server.use_framed_transport {
                TransportKind::FramedMessage
            } else {
                TransportKind::RawStream
            };

            specs.push(TunnelSpec {
                service_type: server.service_type.clone(),
                transport,
                relay_port,
                local_host: server.local_host.clone(),
                local_port: server.local_port,
                options: TransportOptions {
                    use_framed_transport: server.use_framed_transport,
                    use_encryption: server.use_encryption,
                    verify_server_cert: !server.insecure,
                },
            });
        }

        Ok(specs)
    }
}

fn default_true() -> bool {
    true
}

fn default_heartbeat_interval() -> u64 {
    5000
}

fn default_reconnect_delay() -> u64 {
    5000
}

fn default_connect_timeout() -> u64 {
    10_000
}

fn default_log_directory() -> PathBuf {
    PathBuf::from("logs")
}

fn default_dashboard_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_dashboard_port() -> u16 {
    3000
}

fn default_assets_dir() -> PathBuf {
    PathBuf::from("public")
}

fn default_publish_interval() -> u64 {
    1000
}

fn default_local_host() -> String {
    "127.0.0.1".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "agentName": "home-agent",
        "relay": { "hostname": "relay.example.com", "basePort": 10000 },
        "network": { "heartbeatInterval": 2000, "reconnectDelay": 3000 },
        "servers": [
            { "type": "tcp", "enabled": true, "localHost": "127.0.0.1", "localPort": 25565 },
            { "type": "web", "enabled": false, "localPort": 8080 },
            { "type": "ws", "localPort": 9000, "useFramedTransport": true, "useEncryption": true }
        ]
    }"#;

    #[test]
    fn test_parse_sample() {
        let config = AgentConfig::from_json(SAMPLE).unwrap();
        assert_eq!(config.agent_name, "home-agent");
        assert_eq!(config.relay.base_port, 10000);
        assert_eq!(config.network.heartbeat_interval(), Duration::from_secs(2));
        assert_eq!(config.network.reconnect_delay(), Duration::from_secs(3));
        assert_eq!(config.servers.len(), 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults() {
        let config = AgentConfig::from_json(
            r#"{"agentName":"a","relay":{"hostname":"h","basePort":1},"servers":[{"type":"tcp","localPort":80}]}"#,
        )
        .unwrap();

        assert_eq!(config.network.heartbeat_interval, 5000);
        assert_eq!(config.network.reconnect_delay, 5000);
        assert!(config.logging.console);
        assert!(!config.logging.file);
        assert!(config.dashboard.enabled);
        assert_eq!(config.dashboard.port, 3000);

        let server = &config.servers[0];
        assert!(server.enabled);
        assert_eq!(server.local_host, "127.0.0.1");
        assert!(!server.use_framed_transport);
        assert!(!server.use_encryption);
    }

    #[test]
    fn test_legacy_aliases() {
        let config = AgentConfig::from_json(
            r#"{
                "agentName": "legacy",
                "playit": { "ip": "relay.example.com", "basePort": 20000 },
                "servers": [ { "type": "tcp", "localPort": 80, "useWSS": true, "tls": true } ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.relay.hostname, "relay.example.com");
        assert!(config.servers[0].use_framed_transport);
        assert!(config.servers[0].use_encryption);
    }

    #[test]
    fn test_port_index_counts_disabled_entries() {
        let config = AgentConfig::from_json(SAMPLE).unwrap();
        let specs = config.tunnel_specs().unwrap();

        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].relay_port, 10000);
        assert_eq!(specs[0].transport, TransportKind::RawStream);
        // Entry #2 is disabled; entry #3 keeps offset 2
        assert_eq!(specs[1].relay_port, 10002);
        assert_eq!(specs[1].transport, TransportKind::FramedMessage);
        assert!(specs[1].options.use_encryption);
    }

    #[test]
    fn test_tunnel_name() {
        let config = AgentConfig::from_json(SAMPLE).unwrap();
        let specs = config.tunnel_specs().unwrap();
        assert_eq!(specs[0].name(), "TCP [Port: 10000]");
        assert_eq!(specs[0].local_address(), "127.0.0.1:25565");
    }

    #[test]
    fn test_session_options_from_tunnel() {
        let config = AgentConfig::from_json(SAMPLE).unwrap();
        let specs = config.tunnel_specs().unwrap();
        let options = specs[1].session_options(&config.network);

        assert_eq!(options.kind, TransportKind::FramedMessage);
        assert!(options.use_encryption);
        assert!(options.verify_server_cert);
        assert_eq!(options.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_port_overflow_rejected() {
        let mut config = AgentConfig::from_json(SAMPLE).unwrap();
        config.relay.base_port = 65534;

        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        assert!(config.tunnel_specs().is_err());
    }

    #[test]
    fn test_validation_errors() {
        let mut config = AgentConfig::from_json(SAMPLE).unwrap();
        config.agent_name = " ".to_string();
        assert!(config.validate().is_err());

        let mut config = AgentConfig::from_json(SAMPLE).unwrap();
        config.network.reconnect_delay = 0;
        assert!(config.validate().is_err());

        let mut config = AgentConfig::from_json(SAMPLE).unwrap();
        config.network.backoff_multiplier = Some(0.5);
        assert!(config.validate().is_err());

        let mut config = AgentConfig::from_json(SAMPLE).unwrap();
        config.network.max_reconnect_delay = Some(10);
        assert!(config.validate().is_err());

        let mut config = AgentConfig::from_json(SAMPLE).unwrap();
        config.relay.websocket_path = "tunnel".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_oversized_backoff_multiplier_rejected() {
        let mut config = AgentConfig::from_json(SAMPLE).unwrap();
        config.network.backoff_multiplier = Some(1e300);
        config.network.max_reconnect_delay = Some(60_000);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.network.backoff_multiplier = Some(MAX_BACKOFF_MULTIPLIER);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_base_port_base_alias() {
        let config = AgentConfig::from_json(
            r#"{
                "agentName": "a",
                "relay": { "hostname": "h", "basePortBase": 30000, "websocketPath": "/tunnel" },
                "servers": [ { "type": "tcp", "localPort": 80 } ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.relay.base_port, 30000);
        assert_eq!(config.relay.websocket_path, "/tunnel");
        assert!(config.validate().is_ok());
        assert_eq!(config.tunnel_specs().unwrap()[0].relay_port, 30000);
    }

    #[test]
    fn test_load_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            r#"
agentName: yaml-agent
relay:
  hostname: relay.example.com
  basePort: 4000
servers:
  - type: tcp
    localPort: 22
"#
        )
        .unwrap();

        let config = AgentConfig::load(file.path()).unwrap();
        assert_eq!(config.agent_name, "yaml-agent");
        assert_eq!(config.tunnel_specs().unwrap()[0].relay_port, 4000);
    }

    #[test]
    fn test_load_missing_file() {
        let result = AgentConfig::load(Path::new("/nonexistent/portlink/config.json"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_load_invalid_json() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, "{{ not json").unwrap();

        let result = AgentConfig::load(file.path());
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }
}
