//! Core data types for grid trading

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order side for grid intents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Human readable label used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }

    pub fn is_buy(&self) -> bool {
        *self == OrderSide::Buy
    }
}

/// State of an individual grid level.
///
/// The sell target only exists while holding, so a level can never be
/// holding without a target or waiting with one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LevelState {
    /// Buy staged at the level's buy price
    WaitingBuy,
    /// Bought; waiting for price to reach the sell target
    Holding {
        sell_price: f64,
        /// Fee paid on the buy fill, charged when the position closes
        #[serde(default)]
        entry_fee: f64,
    },
}

/// One rung of the ladder
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridLevel {
    /// 1-based id, 1 = closest to the reference price
    pub id: u32,
    /// Fixed when the ladder is built
    pub buy_price: f64,
    /// Current state
    pub state: LevelState,
}

impl GridLevel {
    /// Create a new waiting level
    pub fn new(id: u32, buy_price: f64) -> Self {
        Self {
            id,
            buy_price,
            state: LevelState::WaitingBuy,
        }
    }

    /// Sell target, defined iff the level is holding
    pub fn sell_price(&self) -> Option<f64> {
        match self.state {
            LevelState::WaitingBuy => None,
            LevelState::Holding { sell_price, .. } => Some(sell_price),
        }
    }

    pub fn is_holding(&self) -> bool {
        matches!(self.state, LevelState::Holding { .. })
    }
}

/// Order intent emitted by the engine and consumed by an execution client.
///
/// Each intent is the claim of exactly one level's transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    /// Fresh idempotency key, forwarded to the venue as the client order id
    pub client_id: Uuid,
    /// Level this intent belongs to
    pub level_id: u32,
    /// Ladder generation the level belongs to
    pub generation: u64,
    pub side: OrderSide,
    /// Limit price
    pub price: f64,
    /// Notional committed, in quote currency
    pub quote_amount: f64,
}

impl OrderIntent {
    pub fn new(level_id: u32, generation: u64, side: OrderSide, price: f64, quote_amount: f64) -> Self {
        Self {
            client_id: Uuid::new_v4(),
            level_id,
            generation,
            side,
            price,
            quote_amount,
        }
    }

    /// Base quantity implied by the quote amount at the intent price
    pub fn base_size(&self) -> f64 {
        if self.price > 0.0 {
            self.quote_amount / self.price
        } else {
            0.0
        }
    }
}

/// Confirmation from the execution backend that an intent filled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillConfirmation {
    /// Client id of the intent that filled
    pub client_id: Uuid,
    /// Venue order id, if the venue assigns one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue_oid: Option<u64>,
    /// Average fill price
    pub price: f64,
    /// Filled base quantity
    pub size: f64,
    /// Fee paid in quote currency
    pub fee: f64,
    /// Fill time, unix millis
    pub timestamp: u64,
}

/// Profit tracking for the grid
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GridProfit {
    /// Total realized PnL, before fees
    pub realized_pnl: f64,
    /// Total fees paid
    pub total_fees: f64,
    /// Completed buy -> sell cycles
    pub num_round_trips: u32,
    /// Total quote volume traded
    pub total_volume: f64,
}

impl GridProfit {
    /// Add a fill to profit tracking
    pub fn add_trade(&mut self, pnl: f64, fee: f64, volume: f64) {
        self.realized_pnl += pnl;
        self.total_fees += fee;
        self.total_volume += volume;
    }

    /// Increment round trip counter
    pub fn complete_round_trip(&mut self) {
        self.num_round_trips += 1;
    }

    /// Realized PnL after fees
    pub fn net_profit(&self) -> f64 {
        self.realized_pnl - self.total_fees
    }
}

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TickOutcome {
    /// First observation; ladder created, no trading
    Initialized,
    /// Price trailed above the threshold; ladder re-anchored, no trading
    Trailed,
    /// Levels evaluated
    Evaluated,
    /// Trading disabled; price observed only
    Observed,
}

/// Result of one call to `GridEngine::tick`
#[derive(Debug, Clone)]
pub struct TickReport {
    pub price: f64,
    pub outcome: TickOutcome,
    /// Intents emitted this tick, in evaluation order
    pub intents: Vec<OrderIntent>,
    /// Confirmed fills this tick
    pub fills: Vec<FillConfirmation>,
    /// Intents whose execution failed
    pub failures: u32,
    /// Governor halted at the end of the tick
    pub halted: bool,
}

impl TickReport {
    pub(crate) fn new(price: f64, outcome: TickOutcome) -> Self {
        Self {
            price,
            outcome,
            intents: Vec::new(),
            fills: Vec::new(),
            failures: 0,
            halted: false,
        }
    }
}

/// What to do once the daily loss limit is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HaltPolicy {
    /// Stop opening new positions; existing holdings keep selling
    #[default]
    HaltEntries,
    /// Stop the scheduler with `DailyLossLimitExceeded`
    Terminate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_sell_price_follows_state() {
        let mut level = GridLevel::new(1, 980.0);
        assert_eq!(level.sell_price(), None);
        assert!(!level.is_holding());

        level.state = LevelState::Holding {
            sell_price: 999.6,
            entry_fee: 0.0,
        };
        assert_eq!(level.sell_price(), Some(999.6));
        assert!(level.is_holding());
    }

    #[test]
    fn test_intent_ids_are_unique() {
        let a = OrderIntent::new(1, 0, OrderSide::Buy, 980.0, 15.0);
        let b = OrderIntent::new(1, 0, OrderSide::Buy, 980.0, 15.0);
        assert_ne!(a.client_id, b.client_id);
        assert!((a.base_size() - 15.0 / 980.0).abs() < 1e-12);
    }

    #[test]
    fn test_level_state_serialization() {
        let level = GridLevel {
            id: 2,
            buy_price: 960.0,
            state: LevelState::Holding {
                sell_price: 979.2,
                entry_fee: 0.015,
            },
        };
        let json = serde_json::to_value(level).unwrap();
        assert_eq!(json["state"]["state"], "HOLDING");
        assert_eq!(json["state"]["sell_price"], 979.2);
        assert_eq!(json["state"]["entry_fee"], 0.015);
    }

    #[test]
    fn test_side_helpers() {
        assert_eq!(OrderSide::Sell.as_str(), "SELL");
        assert!(OrderSide::Buy.is_buy());
    }
}
