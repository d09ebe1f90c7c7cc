use std::time::Duration;

use config::{Config, Environment, File};
pub use config::ConfigError;
use serde::Deserialize;

use crate::grid::{GridConfig, HaltPolicy, RunnerConfig};

/// Main configuration struct
#[derive(Debug, Deserialize)]
pub struct Settings {
    /// Grid shape and risk limits
    #[serde(default)]
    pub grid: GridConfig,
    /// Tick loop
    #[serde(default)]
    pub runner: RunnerSettings,
    /// Where prices come from
    #[serde(default)]
    pub feed: FeedSettings,
    /// Where orders go
    #[serde(default)]
    pub execution: ExecutionSettings,
    /// Liveness / status server
    #[serde(default)]
    pub server: ServerConfig,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Deserialize)]
pub struct RunnerSettings {
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    #[serde(default)]
    pub halt_policy: HaltPolicy,
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,
    #[serde(default)]
    pub daily_reset: bool,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            halt_policy: HaltPolicy::default(),
            max_consecutive_errors: default_max_consecutive_errors(),
            daily_reset: false,
        }
    }
}

impl RunnerSettings {
    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            tick_interval: Duration::from_secs(self.tick_interval_secs.max(1)),
            halt_policy: self.halt_policy,
            max_consecutive_errors: self.max_consecutive_errors,
            daily_reset: self.daily_reset,
        }
    }
}

fn default_tick_interval_secs() -> u64 {
    10
}

fn default_max_consecutive_errors() -> u32 {
    5
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    /// Simulated prices, no network
    #[default]
    RandomWalk,
    /// Poll the venue's order book each tick
    OrderBook,
    /// Stream mid prices over a websocket
    Ticker,
}

#[derive(Debug, Deserialize)]
pub struct FeedSettings {
    #[serde(default)]
    pub kind: FeedKind,
    /// HTTP base URL (order_book) or websocket URL (ticker)
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_start_price")]
    pub start_price: f64,
    #[serde(default = "default_volatility")]
    pub volatility: f64,
    /// Fixed seed for reproducible random walks
    #[serde(default)]
    pub seed: Option<u64>,
    /// Ticker prices older than this are treated as unavailable
    #[serde(default)]
    pub max_staleness_secs: Option<u64>,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            kind: FeedKind::default(),
            url: None,
            start_price: default_start_price(),
            volatility: default_volatility(),
            seed: None,
            max_staleness_secs: None,
        }
    }
}

fn default_start_price() -> f64 {
    100.0
}

fn default_volatility() -> f64 {
    0.5
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionBackend {
    /// Fill every intent locally at its limit price
    #[default]
    Simulated,
    /// Sign and submit orders to the venue
    Signed,
}

#[derive(Debug, Deserialize)]
pub struct ExecutionSettings {
    #[serde(default)]
    pub backend: ExecutionBackend,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Wallet private key (hex string)
    /// Prefer GRID_EXECUTION__PRIVATE_KEY over writing it to a file
    #[serde(default)]
    pub private_key: Option<String>,
    /// Simulated fee as a fraction of the quote amount
    #[serde(default)]
    pub fee_rate: f64,
    #[serde(default = "default_size_decimals")]
    pub size_decimals: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            backend: ExecutionBackend::default(),
            base_url: default_base_url(),
            private_key: None,
            fee_rate: 0.0,
            size_decimals: default_size_decimals(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.hyperliquid-testnet.xyz".to_string()
}

fn default_size_decimals() -> u32 {
    6
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    100
}

#[derive(Debug, Deserialize)]
pub struct LogConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Serve the liveness endpoint
    #[serde(default = "default_server_enabled")]
    pub enabled: bool,
    /// Server port (default 3000)
    #[serde(default = "default_server_port")]
    pub port: u16,
    /// Server host (default 0.0.0.0)
    #[serde(default = "default_server_host")]
    pub host: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: default_server_enabled(),
            port: default_server_port(),
            host: default_server_host(),
        }
    }
}

fn default_server_enabled() -> bool {
    true
}

fn default_server_port() -> u16 {
    3000
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}

impl Settings {
    /// Load settings from an optional configuration file, then environment
    pub fn new(config_path: Option<&str>) -> Result<Self, ConfigError> {
        Self::build(config_path, env_source())
    }

    fn build(config_path: Option<&str>, env: Environment) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path));
        }

        // Environment overrides the file
        // e.g. GRID_GRID__STEP_PERCENT=0.02, GRID_EXECUTION__PRIVATE_KEY=...
        let s = builder.add_source(env).build()?;

        s.try_deserialize()
    }
}

fn env_source() -> Environment {
    Environment::with_prefix("GRID")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let map = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<config::Map<String, String>>();
        env_source().source(Some(map))
    }

    #[test]
    fn test_defaults_without_sources() {
        let settings = Settings::build(None, env(&[])).unwrap();

        assert_eq!(settings.grid.pair, "BTC");
        assert_eq!(settings.grid.grid_count, 6);
        assert_eq!(settings.runner.tick_interval_secs, 10);
        assert_eq!(settings.runner.halt_policy, HaltPolicy::HaltEntries);
        assert_eq!(settings.feed.kind, FeedKind::RandomWalk);
        assert_eq!(settings.execution.backend, ExecutionBackend::Simulated);
        assert!(settings.server.enabled);
        assert_eq!(settings.log.level, "info");
    }

    #[test]
    fn test_single_grid_env_var_keeps_other_defaults() {
        let settings = Settings::build(None, env(&[("GRID_GRID__STEP_PERCENT", "0.03")])).unwrap();

        assert_eq!(settings.grid.pair, "BTC");
        assert!((settings.grid.step_percent - 0.03).abs() < 1e-12);
        assert_eq!(settings.grid.grid_count, 6);
        assert!(settings.grid.validate().is_ok());
        assert_eq!(settings.log.level, "info");
    }

    #[test]
    fn test_file_then_env_override() {
        let path = std::env::temp_dir().join(format!("grid_settings_{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            r#"
[grid]
pair = "ETH"
grid_count = 4
step_percent = 0.03

[runner]
tick_interval_secs = 15
halt_policy = "terminate"

[feed]
kind = "ticker"
url = "wss://api.hyperliquid.xyz/ws"
"#,
        )
        .unwrap();

        let settings = Settings::build(
            path.to_str(),
            env(&[
                ("GRID_GRID__GRID_COUNT", "8"),
                ("GRID_GRID__MAX_DAILY_LOSS", "2.5"),
                ("GRID_GRID__TRADING_ENABLED", "false"),
                ("GRID_SERVER__PORT", "8080"),
            ]),
        )
        .unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(settings.grid.pair, "ETH");
        assert_eq!(settings.grid.grid_count, 8);
        assert!((settings.grid.step_percent - 0.03).abs() < 1e-12);
        assert_eq!(settings.grid.max_daily_loss, Some(2.5));
        assert!(!settings.grid.trading_enabled);
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.feed.kind, FeedKind::Ticker);

        let runner = settings.runner.runner_config();
        assert_eq!(runner.tick_interval, Duration::from_secs(15));
        assert_eq!(runner.halt_policy, HaltPolicy::Terminate);
    }
}
