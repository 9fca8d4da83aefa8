use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub core: CoreConfig,

    pub broker: BrokerConfig,

    #[serde(default)]
    pub bearer: BearerConfig,

    #[serde(default)]
    pub bridge: BridgeConfig,
}
impl AppConfig {
    pub fn load(config_filepath: Option<PathBuf>) -> Result<Self> {
        let config_path = config_filepath.unwrap_or_else(|| PathBuf::from("config.toml"));

        let config_content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {config_path:?}"))?;

        let config: AppConfig = toml::from_str(&config_content)
            .with_context(|| format!("Failed to parse TOML config file: {config_path:?}"))?;

        if config.bearer.port_ssl.is_some() {
            anyhow::bail!(
                "bearer.port-ssl is set, but bearer-side TLS termination is not supported by this build"
            );
        }

        Ok(config)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CoreConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}
impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BrokerConfig {
    #[serde(default = "default_broker_host")]
    pub host: String,

    #[serde(default = "default_broker_port")]
    pub port: u16,

    #[serde(default = "default_broker_vhost")]
    pub vhost: String,

    #[serde(default = "default_broker_user")]
    pub user: String,

    #[serde(default = "default_broker_pass")]
    pub pass: String,

    #[serde(default = "default_broker_heartbeat")]
    pub heartbeat: u16,

    #[serde(default = "default_broker_prefetch")]
    pub prefetch: u16,

    #[serde(default = "default_queue_send")]
    pub queue_send: String,

    #[serde(default = "default_queue_mo")]
    pub queue_mo: String,

    #[serde(default = "default_queue_dlr")]
    pub queue_dlr: String,

    #[serde(default = "default_queue_failed")]
    pub queue_failed: String,

    #[serde(default)]
    pub tls: Option<BrokerTlsConfig>,
}

/// Carried over from the original's optional SSL connection parameters, not
/// used by the default `rustls`-backed build feature (see DESIGN.md).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BrokerTlsConfig {
    pub ssl_cacert: Option<PathBuf>,
    pub ssl_cert: Option<PathBuf>,
    pub ssl_key: Option<PathBuf>,

    #[serde(default = "default_true")]
    pub ssl_verify: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BearerConfig {
    #[serde(default = "default_bearer_host")]
    pub host: String,

    #[serde(default = "default_bearer_port")]
    pub port: u16,

    /// Parsed so a config carried over from the original is still
    /// rejected with a clear error rather than silently ignored; bearer
    /// TLS termination is a non-goal of this build.
    #[serde(default)]
    pub port_ssl: Option<u16>,
}
impl Default for BearerConfig {
    fn default() -> Self {
        Self {
            host: default_bearer_host(),
            port: default_bearer_port(),
            port_ssl: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BridgeConfig {
    #[serde(default = "default_box_id")]
    pub box_id: String,

    #[serde(default)]
    pub route_to_smsc: Option<String>,

    #[serde(default)]
    pub allowed_senders: Option<PathBuf>,

    #[serde(default)]
    pub store_file: Option<PathBuf>,

    #[serde(default)]
    pub disable_multipart_catenation: bool,

    #[serde(default = "default_multipart_timeout", rename = "multipart-timeout")]
    pub multipart_timeout_secs: u64,
}
impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            box_id: default_box_id(),
            route_to_smsc: None,
            allowed_senders: None,
            store_file: None,
            disable_multipart_catenation: false,
            multipart_timeout_secs: default_multipart_timeout(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_broker_host() -> String {
    "localhost".to_string()
}
fn default_broker_port() -> u16 {
    5672
}
fn default_broker_vhost() -> String {
    "/".to_string()
}
fn default_broker_user() -> String {
    "guest".to_string()
}
fn default_broker_pass() -> String {
    "guest".to_string()
}
fn default_broker_heartbeat() -> u16 {
    60
}
fn default_broker_prefetch() -> u16 {
    100
}
fn default_queue_send() -> String {
    "sms.send".to_string()
}
fn default_queue_mo() -> String {
    "sms.mo".to_string()
}
fn default_queue_dlr() -> String {
    "sms.dlr".to_string()
}
fn default_queue_failed() -> String {
    "sms.failed".to_string()
}
fn default_bearer_host() -> String {
    "127.0.0.1".to_string()
}
fn default_bearer_port() -> u16 {
    13000
}
fn default_box_id() -> String {
    "sms-bridge".to_string()
}
fn default_multipart_timeout() -> u64 {
    300
}
fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_fills_in_defaults() {
        let toml = r#"
            [broker]
        "#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.broker.host, "localhost");
        assert_eq!(config.broker.port, 5672);
        assert_eq!(config.broker.vhost, "/");
        assert_eq!(config.broker.heartbeat, 60);
        assert_eq!(config.broker.prefetch, 100);
        assert_eq!(config.broker.queue_send, "sms.send");
        assert_eq!(config.bridge.box_id, "sms-bridge");
        assert_eq!(config.bridge.multipart_timeout_secs, 300);
        assert!(config.bridge.allowed_senders.is_none());
    }

    #[test]
    fn overridden_fields_take_precedence() {
        let toml = r#"
            [broker]
            host = "amqp.internal"
            port = 5671
            queue-send = "custom.send"

            [bridge]
            box-id = "box-7"
            disable-multipart-catenation = true
        "#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.broker.host, "amqp.internal");
        assert_eq!(config.broker.port, 5671);
        assert_eq!(config.broker.queue_send, "custom.send");
        assert_eq!(config.bridge.box_id, "box-7");
        assert!(config.bridge.disable_multipart_catenation);
    }
}
