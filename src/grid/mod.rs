//! Trailing grid trading
//!
//! A ladder of buy levels hangs below a reference price. Each level buys
//! when price falls to it, then sells at a fixed target above its buy
//! price. When price rises far enough above the reference, the ladder is
//! rebuilt at the new high; open holdings are carried and keep selling.
//!
//! # Architecture
//!
//! - [`config`] - Grid configuration and validation
//! - [`types`] - Core data types (GridLevel, OrderIntent, etc.)
//! - [`errors`] - Grid-specific error types
//! - [`ladder`] - Level prices and per-level state transitions
//! - [`risk`] - Open position ceiling and realized loss limit
//! - [`engine`] - The per-tick state machine
//! - [`feed`] - Price sources (random walk, order book, ticker stream)
//! - [`executor`] - Execution clients (simulated, signed, mockable for testing)
//! - [`runner`] - Main execution loop
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use trailing_grid_bot::grid::{
//!     GridConfig, GridEngine, GridRunner, RandomWalkSource, RunnerConfig,
//!     SimulatedExecution,
//! };
//!
//! let config = GridConfig::new("BTC", 5, 0.02, 15.0).with_max_daily_loss(5.0);
//! let engine = GridEngine::new(config)?;
//!
//! let runner = GridRunner::new(
//!     engine,
//!     RandomWalkSource::new(100.0, 0.5),
//!     SimulatedExecution::new("BTC"),
//!     RunnerConfig::default(),
//! );
//!
//! // Run until Ctrl-C
//! runner.run().await?;
//! ```

pub mod config;
pub mod engine;
pub mod errors;
pub mod executor;
pub mod feed;
pub mod ladder;
pub mod risk;
pub mod runner;
pub mod types;

pub use self::config::{round_decimals, GridConfig, LadderParams};
pub use engine::{CarriedPosition, EngineState, GridEngine, GridStateSummary};
pub use errors::{GridError, GridResult};
pub use executor::{ExecutionClient, NonceManager, SignedExecution, SimulatedExecution};
pub use feed::{OrderBookSource, PriceSource, RandomWalkSource, TickerStreamSource};
pub use ladder::GridLadder;
pub use risk::RiskGovernor;
pub use runner::{GridRunner, RunnerConfig};
pub use types::{
    FillConfirmation, GridLevel, GridProfit, HaltPolicy, LevelState, OrderIntent, OrderSide,
    TickOutcome, TickReport,
};
