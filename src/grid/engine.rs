//! Grid engine - consumes one price per tick and reconciles the ladder
//!
//! A tick runs to completion, including every awaited execution call,
//! before it returns. Levels are evaluated in ascending id order, so when
//! the open-position ceiling is hit mid-tick the levels closest to the
//! reference price win.

use log::{debug, info, warn};
use serde::Serialize;

use super::config::GridConfig;
use super::errors::{GridError, GridResult};
use super::executor::ExecutionClient;
use super::ladder::GridLadder;
use super::risk::RiskGovernor;
use super::types::{
    FillConfirmation, GridLevel, GridProfit, LevelState, OrderIntent, OrderSide, TickOutcome,
    TickReport,
};

/// A holding that outlived its ladder.
///
/// When the ladder is re-anchored, holding levels are moved here with their
/// targets intact and keep selling on later ticks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CarriedPosition {
    pub level_id: u32,
    pub generation: u64,
    pub buy_price: f64,
    pub sell_price: f64,
    pub entry_fee: f64,
}

/// Everything the engine mutates between ticks
#[derive(Debug, Clone, Default)]
pub struct EngineState {
    ladder: Option<GridLadder>,
    /// Incremented on every re-anchor
    generation: u64,
    carried: Vec<CarriedPosition>,
    profit: GridProfit,
    last_price: Option<f64>,
    ticks: u64,
}

/// Summary of engine state
#[derive(Debug, Clone, Default, Serialize)]
pub struct GridStateSummary {
    pub pair: String,
    pub initialized: bool,
    pub reference_price: Option<f64>,
    pub generation: u64,
    pub waiting_levels: usize,
    pub holding_levels: usize,
    pub carried_positions: usize,
    pub open_positions: u32,
    pub cumulative_loss: f64,
    pub realized_pnl: f64,
    pub total_fees: f64,
    pub net_profit: f64,
    /// Mark-to-market of all holdings at the last price; reporting only
    pub unrealized_pnl: f64,
    pub round_trips: u32,
    pub halted: bool,
    pub trading_enabled: bool,
    pub last_price: Option<f64>,
    pub ticks: u64,
}

/// The grid state machine
pub struct GridEngine {
    config: GridConfig,
    state: EngineState,
    governor: RiskGovernor,
}

impl GridEngine {
    /// Create an engine. No ladder exists until the first tick.
    pub fn new(config: GridConfig) -> GridResult<Self> {
        config.validate()?;
        let governor = RiskGovernor::new(config.max_open_positions, config.max_daily_loss);

        Ok(Self {
            config,
            state: EngineState::default(),
            governor,
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.state.ladder.is_some()
    }

    pub fn ladder(&self) -> Option<&GridLadder> {
        self.state.ladder.as_ref()
    }

    pub fn reference_price(&self) -> Option<f64> {
        self.state.ladder.as_ref().map(GridLadder::reference_price)
    }

    pub fn generation(&self) -> u64 {
        self.state.generation
    }

    pub fn carried(&self) -> &[CarriedPosition] {
        &self.state.carried
    }

    pub fn governor(&self) -> &RiskGovernor {
        &self.governor
    }

    pub fn profit(&self) -> &GridProfit {
        &self.state.profit
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    /// Replace the governor for a new trading day, keeping open positions
    pub fn start_new_day(&mut self) {
        let previous_loss = self.governor.cumulative_loss();
        self.governor = RiskGovernor::carry_over(&self.governor);
        info!(
            "New trading day: loss accumulator reset (was {:.4}), {} open positions carried",
            previous_loss,
            self.governor.open_positions()
        );
    }

    /// Process one price observation
    pub async fn tick<E>(&mut self, price: f64, exec: &E) -> GridResult<TickReport>
    where
        E: ExecutionClient + ?Sized,
    {
        if !price.is_finite() || price <= 0.0 {
            return Err(GridError::PriceUnavailable(format!("invalid price {}", price)));
        }

        self.state.last_price = Some(price);
        self.state.ticks += 1;

        let reference = match &self.state.ladder {
            None => {
                self.anchor(price)?;
                return Ok(self.finish(TickReport::new(price, TickOutcome::Initialized)));
            }
            Some(ladder) => ladder.reference_price(),
        };

        if price > self.config.trail_threshold(reference) {
            info!("New high {} above reference {}; re-anchoring grid", price, reference);
            self.anchor(price)?;
            return Ok(self.finish(TickReport::new(price, TickOutcome::Trailed)));
        }

        if !self.config.trading_enabled {
            debug!("Trading disabled; observed {}", price);
            return Ok(self.finish(TickReport::new(price, TickOutcome::Observed)));
        }

        let mut report = TickReport::new(price, TickOutcome::Evaluated);
        let level_count = self.state.ladder.as_ref().map_or(0, GridLadder::len);

        for idx in 0..level_count {
            let level = match self.state.ladder.as_ref().and_then(|l| l.levels().get(idx)) {
                Some(level) => *level,
                None => break,
            };

            // one branch per level: a level emits at most one intent per tick
            match level.state {
                LevelState::WaitingBuy => {
                    if price <= level.buy_price && self.governor.can_open() {
                        self.buy_level(&level, exec, &mut report).await?;
                    }
                }
                LevelState::Holding { sell_price, .. } => {
                    if price >= sell_price {
                        self.sell_level(&level, sell_price, exec, &mut report).await?;
                    }
                }
            }
        }

        self.sell_carried(price, exec, &mut report).await;

        Ok(self.finish(report))
    }

    fn finish(&self, mut report: TickReport) -> TickReport {
        report.halted = self.governor.is_halted();
        report
    }

    /// Build a ladder at `price`. Holdings of the previous ladder are carried.
    fn anchor(&mut self, price: f64) -> GridResult<()> {
        // build first so a failure leaves the old ladder in place
        let ladder = GridLadder::rebuild(price, self.config.ladder_params())?;

        if let Some(old) = self.state.ladder.take() {
            for level in old.holding_levels() {
                if let LevelState::Holding {
                    sell_price,
                    entry_fee,
                } = level.state
                {
                    warn!(
                        "Carrying level {} (gen {}) across re-anchor: bought @ {}, target {}",
                        level.id, self.state.generation, level.buy_price, sell_price
                    );
                    self.state.carried.push(CarriedPosition {
                        level_id: level.id,
                        generation: self.state.generation,
                        buy_price: level.buy_price,
                        sell_price,
                        entry_fee,
                    });
                }
            }
            self.state.generation += 1;
        }

        info!(
            "New grid from reference {} ({} levels, gen {})",
            price,
            ladder.len(),
            self.state.generation
        );
        self.state.ladder = Some(ladder);
        Ok(())
    }

    fn intent(&self, level_id: u32, generation: u64, side: OrderSide, price: f64) -> OrderIntent {
        OrderIntent::new(level_id, generation, side, price, self.config.quote_amount)
    }

    async fn buy_level<E>(&mut self, level: &GridLevel, exec: &E, report: &mut TickReport) -> GridResult<()>
    where
        E: ExecutionClient + ?Sized,
    {
        let intent = self.intent(level.id, self.state.generation, OrderSide::Buy, level.buy_price);
        report.intents.push(intent.clone());
        info!(
            "BUY signal | level {} @ {} | ${}",
            level.id, level.buy_price, intent.quote_amount
        );

        let fill = match exec.place(&intent).await {
            Ok(fill) => fill,
            Err(e) => {
                warn!("BUY level {} failed, level stays waiting: {}", level.id, e);
                report.failures += 1;
                return Ok(());
            }
        };

        self.governor.record_open()?;
        let ladder = self
            .state
            .ladder
            .as_mut()
            .ok_or_else(|| GridError::LevelNotFound(level.id))?;
        let sell_price = ladder.mark_holding(level.id, self.config.sell_target_percent, fill.fee)?;

        self.state
            .profit
            .add_trade(0.0, fill.fee, fill.price * fill.size);
        info!(
            "BUY filled | level {} @ {} | target sell {}",
            level.id, fill.price, sell_price
        );
        report.fills.push(fill);
        Ok(())
    }

    async fn sell_level<E>(
        &mut self,
        level: &GridLevel,
        sell_price: f64,
        exec: &E,
        report: &mut TickReport,
    ) -> GridResult<()>
    where
        E: ExecutionClient + ?Sized,
    {
        let intent = self.intent(level.id, self.state.generation, OrderSide::Sell, sell_price);
        report.intents.push(intent.clone());
        info!("SELL signal | level {} @ {}", level.id, sell_price);

        let fill = match exec.place(&intent).await {
            Ok(fill) => fill,
            Err(e) => {
                warn!("SELL level {} failed, level stays holding: {}", level.id, e);
                report.failures += 1;
                return Ok(());
            }
        };

        let ladder = self
            .state
            .ladder
            .as_mut()
            .ok_or_else(|| GridError::LevelNotFound(level.id))?;
        let entry_fee = ladder.mark_waiting(level.id)?;

        let pnl = self.close_position(level.buy_price, entry_fee, &fill);
        info!(
            "SELL filled | level {} @ {} | pnl {:.4}",
            level.id, fill.price, pnl
        );
        report.fills.push(fill);
        Ok(())
    }

    async fn sell_carried<E>(&mut self, price: f64, exec: &E, report: &mut TickReport)
    where
        E: ExecutionClient + ?Sized,
    {
        let mut idx = 0;
        while idx < self.state.carried.len() {
            let position = self.state.carried[idx];
            if price < position.sell_price {
                idx += 1;
                continue;
            }

            let intent = self.intent(
                position.level_id,
                position.generation,
                OrderSide::Sell,
                position.sell_price,
            );
            report.intents.push(intent.clone());
            info!(
                "SELL signal | carried level {} (gen {}) @ {}",
                position.level_id, position.generation, position.sell_price
            );

            match exec.place(&intent).await {
                Ok(fill) => {
                    self.state.carried.remove(idx);
                    let pnl = self.close_position(position.buy_price, position.entry_fee, &fill);
                    info!(
                        "SELL filled | carried level {} (gen {}) @ {} | pnl {:.4}",
                        position.level_id, position.generation, fill.price, pnl
                    );
                    report.fills.push(fill);
                }
                Err(e) => {
                    warn!(
                        "SELL carried level {} (gen {}) failed, still held: {}",
                        position.level_id, position.generation, e
                    );
                    report.failures += 1;
                    idx += 1;
                }
            }
        }
    }

    /// Fold a confirmed sell into profit tracking and the governor.
    /// Returns the realized PnL, net of both the entry and exit fees.
    fn close_position(&mut self, buy_price: f64, entry_fee: f64, fill: &FillConfirmation) -> f64 {
        let quote = self.config.quote_amount;
        let gross = (fill.price - buy_price) * quote / buy_price;
        let net = gross - entry_fee - fill.fee;

        self.governor.record_close(net);
        self.state
            .profit
            .add_trade(gross, fill.fee, fill.price * fill.size);
        self.state.profit.complete_round_trip();
        net
    }

    /// Mark-to-market of every holding at `price`
    fn unrealized_pnl(&self, price: f64) -> f64 {
        let quote = self.config.quote_amount;
        let mark = |buy: f64| (price - buy) * quote / buy;

        let ladder: f64 = self
            .state
            .ladder
            .iter()
            .flat_map(|l| l.holding_levels())
            .map(|l| mark(l.buy_price))
            .sum();
        let carried: f64 = self.state.carried.iter().map(|p| mark(p.buy_price)).sum();
        ladder + carried
    }

    /// Get current grid state summary
    pub fn summary(&self) -> GridStateSummary {
        let ladder = self.state.ladder.as_ref();

        GridStateSummary {
            pair: self.config.pair.clone(),
            initialized: ladder.is_some(),
            reference_price: ladder.map(GridLadder::reference_price),
            generation: self.state.generation,
            waiting_levels: ladder.map_or(0, GridLadder::count_waiting),
            holding_levels: ladder.map_or(0, GridLadder::count_holding),
            carried_positions: self.state.carried.len(),
            open_positions: self.governor.open_positions(),
            cumulative_loss: self.governor.cumulative_loss(),
            realized_pnl: self.state.profit.realized_pnl,
            total_fees: self.state.profit.total_fees,
            net_profit: self.state.profit.net_profit(),
            unrealized_pnl: self
                .state
                .last_price
                .map_or(0.0, |p| self.unrealized_pnl(p)),
            round_trips: self.state.profit.num_round_trips,
            halted: self.governor.is_halted(),
            trading_enabled: self.config.trading_enabled,
            last_price: self.state.last_price,
            ticks: self.state.ticks,
        }
    }
}
