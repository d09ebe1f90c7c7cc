//! Grid ladder - the set of price levels derived from a reference price

use log::debug;
use serde::Serialize;

use super::config::LadderParams;
use super::errors::{GridError, GridResult};
use super::types::{GridLevel, LevelState};

/// Ordered set of levels below a reference price.
///
/// Built atomically by [`GridLadder::rebuild`]; buy prices never change
/// afterwards, only level states do.
#[derive(Debug, Clone, Serialize)]
pub struct GridLadder {
    reference_price: f64,
    levels: Vec<GridLevel>,
    #[serde(skip)]
    params: LadderParams,
}

impl GridLadder {
    /// Build a fresh ladder. `buy_price_i = reference * (1 - step * i)` for `i` in `1..=count`.
    pub fn rebuild(reference_price: f64, params: LadderParams) -> GridResult<Self> {
        if params.count == 0 {
            return Err(GridError::InvalidConfig("grid count must be positive".into()));
        }
        if !(params.step_percent > 0.0) {
            return Err(GridError::InvalidConfig("grid step must be positive".into()));
        }
        if !(reference_price > 0.0) || !reference_price.is_finite() {
            return Err(GridError::InvalidConfig(format!(
                "reference price must be positive, got {}",
                reference_price
            )));
        }

        let levels: Vec<GridLevel> = (1..=params.count)
            .map(|i| {
                let raw = reference_price * (1.0 - params.step_percent * i as f64);
                GridLevel::new(i, params.round(raw))
            })
            .collect();

        if let Some(bad) = levels.iter().find(|l| !(l.buy_price > 0.0)) {
            return Err(GridError::InvalidConfig(format!(
                "level {} buy price {} is not positive",
                bad.id, bad.buy_price
            )));
        }

        for level in &levels {
            debug!("  level {:>2}: buy @ {}", level.id, level.buy_price);
        }

        Ok(Self {
            reference_price,
            levels,
            params,
        })
    }

    pub fn reference_price(&self) -> f64 {
        self.reference_price
    }

    pub fn levels(&self) -> &[GridLevel] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Get a level by id
    pub fn get(&self, level_id: u32) -> Option<&GridLevel> {
        // ids are 1..=count in order
        level_id
            .checked_sub(1)
            .and_then(|idx| self.levels.get(idx as usize))
    }

    fn get_mut(&mut self, level_id: u32) -> GridResult<&mut GridLevel> {
        level_id
            .checked_sub(1)
            .and_then(|idx| self.levels.get_mut(idx as usize))
            .ok_or(GridError::LevelNotFound(level_id))
    }

    /// WAITING_BUY -> HOLDING. Returns the computed sell price.
    pub fn mark_holding(
        &mut self,
        level_id: u32,
        sell_target_percent: f64,
        entry_fee: f64,
    ) -> GridResult<f64> {
        let params = self.params;
        let level = self.get_mut(level_id)?;

        match level.state {
            LevelState::Holding { .. } => Err(GridError::IllegalTransition {
                level_id,
                reason: "level is already holding".into(),
            }),
            LevelState::WaitingBuy => {
                let sell_price = params.round(level.buy_price * (1.0 + sell_target_percent));
                level.state = LevelState::Holding {
                    sell_price,
                    entry_fee,
                };
                Ok(sell_price)
            }
        }
    }

    /// HOLDING -> WAITING_BUY, clearing the sell price. Returns the entry fee.
    pub fn mark_waiting(&mut self, level_id: u32) -> GridResult<f64> {
        let level = self.get_mut(level_id)?;

        match level.state {
            LevelState::WaitingBuy => Err(GridError::IllegalTransition {
                level_id,
                reason: "level is not holding".into(),
            }),
            LevelState::Holding { entry_fee, .. } => {
                level.state = LevelState::WaitingBuy;
                Ok(entry_fee)
            }
        }
    }

    pub fn holding_levels(&self) -> impl Iterator<Item = &GridLevel> {
        self.levels.iter().filter(|l| l.is_holding())
    }

    pub fn count_holding(&self) -> usize {
        self.holding_levels().count()
    }

    pub fn count_waiting(&self) -> usize {
        self.levels.len() - self.count_holding()
    }
}
