#![deny(unreachable_pub)]
pub mod config;
pub mod grid;
pub mod server;

pub use crate::config::Settings;
pub use grid::{GridConfig, GridEngine, GridError, GridResult, GridRunner};
