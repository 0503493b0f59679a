use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub kafka: KafkaConfig,
    #[serde(default)]
    pub carrier: CarrierConfig,
    #[serde(default)]
    pub rates: RatesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

/// No URL means the in-memory store
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

fn default_max_connections() -> u32 { 5 }

/// No brokers means notifications only go to the log
#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: Option<String>,
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: None,
            topic_prefix: default_topic_prefix(),
        }
    }
}

fn default_topic_prefix() -> String { "shipdesk".to_string() }

#[derive(Debug, Deserialize, Clone)]
pub struct CarrierConfig {
    #[serde(default = "default_quote_timeout_ms")]
    pub quote_timeout_ms: u64,
    #[serde(default = "default_label_timeout_ms")]
    pub label_timeout_ms: u64,
    #[serde(default = "default_failure_threshold")]
    pub circuit_failure_threshold: usize,
    #[serde(default = "default_reset_seconds")]
    pub circuit_reset_seconds: u64,
    #[serde(default = "default_quote_retries")]
    pub quote_retries: u32,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for CarrierConfig {
    fn default() -> Self {
        Self {
            quote_timeout_ms: default_quote_timeout_ms(),
            label_timeout_ms: default_label_timeout_ms(),
            circuit_failure_threshold: default_failure_threshold(),
            circuit_reset_seconds: default_reset_seconds(),
            quote_retries: default_quote_retries(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_quote_timeout_ms() -> u64 { 15_000 }
fn default_label_timeout_ms() -> u64 { 30_000 }
fn default_failure_threshold() -> usize { 5 }
fn default_reset_seconds() -> u64 { 30 }
fn default_quote_retries() -> u32 { 1 }
fn default_user_agent() -> String { "shipdesk/0.1".to_string() }

#[derive(Debug, Deserialize, Clone)]
pub struct RatesConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for RatesConfig {
    fn default() -> Self {
        Self { debounce_ms: default_debounce_ms() }
    }
}

fn default_debounce_ms() -> u64 { 300 }

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Local overrides, never checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `SHIPDESK__SERVER__PORT=9000`
            .add_source(config::Environment::with_prefix("SHIPDESK").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
