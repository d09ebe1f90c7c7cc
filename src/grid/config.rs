//! Grid trading configuration

use serde::{Deserialize, Serialize};

use super::errors::{GridError, GridResult};

/// Round a value to a fixed number of decimals (half away from zero)
pub fn round_decimals(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Parameters needed to build a ladder
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LadderParams {
    /// Number of levels
    pub count: u32,
    /// Distance between levels as a fraction of the reference price
    pub step_percent: f64,
    /// Profit target as a fraction of the buy price
    pub sell_target_percent: f64,
    /// Rounding applied to derived prices
    pub price_decimals: Option<u32>,
}

impl LadderParams {
    pub fn new(count: u32, step_percent: f64, sell_target_percent: f64) -> Self {
        Self {
            count,
            step_percent,
            sell_target_percent,
            price_decimals: None,
        }
    }

    pub fn with_price_decimals(mut self, decimals: u32) -> Self {
        self.price_decimals = Some(decimals);
        self
    }

    /// Apply the configured rounding, if any
    pub fn round(&self, price: f64) -> f64 {
        match self.price_decimals {
            Some(decimals) => round_decimals(price, decimals),
            None => price,
        }
    }
}

/// Grid bot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    /// Trading pair symbol (e.g., "BTC", "ETH/USDC")
    #[serde(default = "default_pair")]
    pub pair: String,

    /// Number of grid levels below the reference price
    #[serde(default = "default_grid_count")]
    pub grid_count: u32,

    /// Level spacing as a fraction of the reference price (0.02 = 2%)
    #[serde(default = "default_step_percent")]
    pub step_percent: f64,

    /// Sell target above the buy price (0.02 = 2%)
    #[serde(default = "default_sell_target_percent")]
    pub sell_target_percent: f64,

    /// Re-anchor the ladder when price rises this far above the reference
    #[serde(default = "default_trail_up_percent")]
    pub trail_up_percent: f64,

    /// Quote currency committed per order
    #[serde(default = "default_quote_amount")]
    pub quote_amount: f64,

    /// Ceiling on concurrently open positions
    #[serde(default = "default_max_open_positions")]
    pub max_open_positions: u32,

    /// Realized loss at which new entries stop. `None` disables loss tracking.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_daily_loss: Option<f64>,

    /// When false, prices are observed and logged but no intents are emitted
    #[serde(default = "default_trading_enabled")]
    pub trading_enabled: bool,

    /// Decimals used when deriving buy/sell prices
    #[serde(default = "default_price_decimals")]
    pub price_decimals: Option<u32>,
}

fn default_pair() -> String {
    "BTC".to_string()
}

fn default_grid_count() -> u32 {
    6
}

fn default_step_percent() -> f64 {
    0.02
}

fn default_sell_target_percent() -> f64 {
    0.02
}

fn default_trail_up_percent() -> f64 {
    0.01
}

fn default_quote_amount() -> f64 {
    15.0
}

fn default_max_open_positions() -> u32 {
    6
}

fn default_trading_enabled() -> bool {
    true
}

fn default_price_decimals() -> Option<u32> {
    Some(2)
}

impl GridConfig {
    /// Create a configuration with the default grid shape
    ///
    /// # Arguments
    /// * `pair` - Trading pair symbol
    /// * `grid_count` - Number of levels below the reference price
    /// * `step_percent` - Level spacing (fraction of reference price)
    /// * `quote_amount` - Quote currency committed per order
    pub fn new(pair: impl Into<String>, grid_count: u32, step_percent: f64, quote_amount: f64) -> Self {
        Self {
            pair: pair.into(),
            grid_count,
            step_percent,
            sell_target_percent: default_sell_target_percent(),
            trail_up_percent: default_trail_up_percent(),
            quote_amount,
            max_open_positions: grid_count.max(1),
            max_daily_loss: None,
            trading_enabled: default_trading_enabled(),
            price_decimals: default_price_decimals(),
        }
    }

    /// Builder: set the sell target
    pub fn with_sell_target(mut self, percent: f64) -> Self {
        self.sell_target_percent = percent;
        self
    }

    /// Builder: set the trailing threshold
    pub fn with_trail_up(mut self, percent: f64) -> Self {
        self.trail_up_percent = percent;
        self
    }

    /// Builder: set the open position ceiling
    pub fn with_max_open_positions(mut self, max: u32) -> Self {
        self.max_open_positions = max;
        self
    }

    /// Builder: enable loss tracking with a ceiling
    pub fn with_max_daily_loss(mut self, max: f64) -> Self {
        self.max_daily_loss = Some(max);
        self
    }

    /// Builder: enable or disable intent emission
    pub fn with_trading_enabled(mut self, enabled: bool) -> Self {
        self.trading_enabled = enabled;
        self
    }

    /// Builder: set price rounding (`None` keeps raw prices)
    pub fn with_price_decimals(mut self, decimals: Option<u32>) -> Self {
        self.price_decimals = decimals;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> GridResult<()> {
        if self.pair.is_empty() {
            return Err(GridError::InvalidConfig("pair cannot be empty".into()));
        }

        if self.grid_count == 0 {
            return Err(GridError::InvalidConfig("grid_count must be positive".into()));
        }

        if !(self.step_percent > 0.0) {
            return Err(GridError::InvalidConfig("step_percent must be positive".into()));
        }

        if self.step_percent * self.grid_count as f64 >= 1.0 {
            return Err(GridError::InvalidConfig(
                "step_percent * grid_count must be below 1 (buy prices must stay positive)".into(),
            ));
        }

        if !(self.sell_target_percent > 0.0) {
            return Err(GridError::InvalidConfig(
                "sell_target_percent must be positive".into(),
            ));
        }

        if !(self.trail_up_percent > 0.0) {
            return Err(GridError::InvalidConfig(
                "trail_up_percent must be positive".into(),
            ));
        }

        if !(self.quote_amount > 0.0) {
            return Err(GridError::InvalidConfig("quote_amount must be positive".into()));
        }

        if self.max_open_positions == 0 {
            return Err(GridError::InvalidConfig(
                "max_open_positions must be at least 1".into(),
            ));
        }

        if let Some(limit) = self.max_daily_loss {
            if !(limit > 0.0) {
                return Err(GridError::InvalidConfig(
                    "max_daily_loss must be positive".into(),
                ));
            }
        }

        Ok(())
    }

    /// Ladder parameters derived from this config
    pub fn ladder_params(&self) -> LadderParams {
        LadderParams {
            count: self.grid_count,
            step_percent: self.step_percent,
            sell_target_percent: self.sell_target_percent,
            price_decimals: self.price_decimals,
        }
    }

    /// Price above which the ladder is re-anchored
    pub fn trail_threshold(&self, reference_price: f64) -> f64 {
        reference_price * (1.0 + self.trail_up_percent)
    }

    /// Load config from JSON file
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> GridResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to JSON file
    pub fn save_to_file(&self, path: impl AsRef<std::path::Path>) -> GridResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

impl Default for GridConfig {
    fn default() -> Self {
        Self::new(default_pair(), default_grid_count(), default_step_percent(), default_quote_amount())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        let config = GridConfig::new("BTC", 5, 0.02, 15.0);
        assert!(config.validate().is_ok());

        // Invalid: zero levels
        let config = GridConfig::new("BTC", 0, 0.02, 15.0);
        assert!(matches!(config.validate(), Err(GridError::InvalidConfig(_))));

        // Invalid: non-positive step
        let config = GridConfig::new("BTC", 5, 0.0, 15.0);
        assert!(config.validate().is_err());
        let config = GridConfig::new("BTC", 5, -0.01, 15.0);
        assert!(config.validate().is_err());

        // Invalid: deepest level would be at or below zero
        let config = GridConfig::new("BTC", 10, 0.1, 15.0);
        assert!(config.validate().is_err());

        // Invalid: empty pair
        let config = GridConfig::new("", 5, 0.02, 15.0);
        assert!(config.validate().is_err());

        // Invalid: loss ceiling must be positive
        let config = GridConfig::new("BTC", 5, 0.02, 15.0).with_max_daily_loss(0.0);
        assert!(config.validate().is_err());

        // Invalid: no room for any position
        let config = GridConfig::new("BTC", 5, 0.02, 15.0).with_max_open_positions(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_round_decimals() {
        assert!((round_decimals(940.0000000001, 2) - 940.0).abs() < 1e-9);
        assert!((round_decimals(999.6049, 2) - 999.6).abs() < 1e-9);
        assert!((round_decimals(1.005, 0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_trail_threshold() {
        let config = GridConfig::new("BTC", 5, 0.02, 15.0).with_trail_up(0.01);
        assert!((config.trail_threshold(1000.0) - 1010.0).abs() < 1e-9);
    }

    #[test]
    fn test_deserialize_defaults() {
        let config: GridConfig = serde_json::from_str(r#"{"pair":"ETH"}"#).unwrap();
        assert_eq!(config.pair, "ETH");
        assert_eq!(config.grid_count, 6);
        assert!((config.step_percent - 0.02).abs() < 1e-12);
        assert!((config.trail_up_percent - 0.01).abs() < 1e-12);
        assert!((config.quote_amount - 15.0).abs() < 1e-12);
        assert_eq!(config.max_daily_loss, None);
        assert!(config.trading_enabled);
        assert_eq!(config.price_decimals, Some(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_without_pair() {
        let config: GridConfig = serde_json::from_str(r#"{"step_percent":0.03}"#).unwrap();
        assert_eq!(config.pair, "BTC");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_file_round_trip() {
        let path = std::env::temp_dir().join(format!("grid_config_{}.json", uuid::Uuid::new_v4()));
        let config = GridConfig::new("SOL", 4, 0.015, 20.0).with_max_daily_loss(3.0);
        config.save_to_file(&path).unwrap();

        let loaded = GridConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.pair, "SOL");
        assert_eq!(loaded.grid_count, 4);
        assert_eq!(loaded.max_daily_loss, Some(3.0));

        std::fs::remove_file(&path).ok();
    }
}
