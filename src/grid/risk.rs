//! Risk governor - open position ceiling and realized loss limit

use log::{error, warn};
use serde::Serialize;

use super::errors::{GridError, GridResult};

/// Tracks open positions and cumulative realized loss.
///
/// The governor is the single authority on whether a new buy may be placed.
/// Once the loss limit is reached it stays halted for the lifetime of the
/// instance; a daily reset means constructing a new governor.
#[derive(Debug, Clone, Serialize)]
pub struct RiskGovernor {
    open_positions: u32,
    cumulative_loss: f64,
    max_open_positions: u32,
    /// `None` disables loss tracking
    max_daily_loss: Option<f64>,
    halted: bool,
}

impl RiskGovernor {
    pub fn new(max_open_positions: u32, max_daily_loss: Option<f64>) -> Self {
        Self {
            open_positions: 0,
            cumulative_loss: 0.0,
            max_open_positions,
            max_daily_loss,
            halted: false,
        }
    }

    /// Fresh governor for a new trading day. Open positions carry over; the
    /// loss accumulator and halt flag start from zero.
    pub fn carry_over(previous: &RiskGovernor) -> Self {
        Self {
            open_positions: previous.open_positions,
            ..Self::new(previous.max_open_positions, previous.max_daily_loss)
        }
    }

    /// True iff another position may be opened
    pub fn can_open(&self) -> bool {
        !self.is_halted() && self.open_positions < self.max_open_positions
    }

    /// Record a confirmed buy fill
    pub fn record_open(&mut self) -> GridResult<()> {
        if self.open_positions >= self.max_open_positions {
            return Err(GridError::RiskLimitExceeded(format!(
                "open positions already at ceiling {}",
                self.max_open_positions
            )));
        }
        self.open_positions += 1;
        Ok(())
    }

    /// Record a confirmed sell fill. Negative PnL is added to the loss accumulator.
    pub fn record_close(&mut self, realized_pnl: f64) {
        if self.open_positions == 0 {
            warn!("record_close with no open positions; counter stays at zero");
        }
        self.open_positions = self.open_positions.saturating_sub(1);

        let loss = (-realized_pnl).max(0.0);
        if loss.is_finite() {
            self.cumulative_loss += loss;
        }

        if let Some(limit) = self.max_daily_loss {
            if !self.halted && self.cumulative_loss >= limit {
                self.halted = true;
                error!(
                    "Daily loss limit reached: loss={:.4}, limit={:.4}; new entries halted",
                    self.cumulative_loss, limit
                );
            }
        }
    }

    /// True once cumulative loss has reached the limit
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// `DailyLossLimitExceeded` if halted
    pub fn check(&self) -> GridResult<()> {
        match self.max_daily_loss {
            Some(limit) if self.halted => Err(GridError::DailyLossLimitExceeded {
                loss: self.cumulative_loss,
                limit,
            }),
            _ => Ok(()),
        }
    }

    pub fn open_positions(&self) -> u32 {
        self.open_positions
    }

    pub fn cumulative_loss(&self) -> f64 {
        self.cumulative_loss
    }

    pub fn max_open_positions(&self) -> u32 {
        self.max_open_positions
    }

    pub fn max_daily_loss(&self) -> Option<f64> {
        self.max_daily_loss
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_position_ceiling() {
        let mut governor = RiskGovernor::new(2, None);
        assert!(governor.can_open());

        governor.record_open().unwrap();
        governor.record_open().unwrap();
        assert!(!governor.can_open());
        assert!(matches!(
            governor.record_open(),
            Err(GridError::RiskLimitExceeded(_))
        ));
        assert_eq!(governor.open_positions(), 2);

        governor.record_close(0.3);
        assert!(governor.can_open());
        assert_eq!(governor.open_positions(), 1);
    }

    #[test]
    fn test_profit_does_not_reduce_loss() {
        let mut governor = RiskGovernor::new(3, Some(10.0));
        governor.record_open().unwrap();
        governor.record_close(-2.0);
        assert!((governor.cumulative_loss() - 2.0).abs() < 1e-12);

        governor.record_open().unwrap();
        governor.record_close(5.0);
        assert!((governor.cumulative_loss() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_halt_is_permanent() {
        let mut governor = RiskGovernor::new(5, Some(1.0));
        governor.record_open().unwrap();
        governor.record_close(-1.0);

        assert!(governor.is_halted());
        assert!(!governor.can_open());
        assert!(matches!(
            governor.check(),
            Err(GridError::DailyLossLimitExceeded { .. })
        ));

        // profitable closes never un-halt
        for _ in 0..3 {
            governor.record_close(100.0);
            assert!(!governor.can_open());
        }
    }

    #[test]
    fn test_loss_tracking_disabled() {
        let mut governor = RiskGovernor::new(1, None);
        governor.record_open().unwrap();
        governor.record_close(-1_000.0);
        assert!(!governor.is_halted());
        assert!(governor.can_open());
        assert!(governor.check().is_ok());
        assert!((governor.cumulative_loss() - 1_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_close_never_goes_negative() {
        let mut governor = RiskGovernor::new(1, None);
        governor.record_close(1.0);
        assert_eq!(governor.open_positions(), 0);
    }

    #[test]
    fn test_carry_over_resets_loss() {
        let mut governor = RiskGovernor::new(3, Some(1.0));
        governor.record_open().unwrap();
        governor.record_open().unwrap();
        governor.record_close(-2.0);
        assert!(governor.is_halted());

        let next = RiskGovernor::carry_over(&governor);
        assert_eq!(next.open_positions(), 1);
        assert_eq!(next.cumulative_loss(), 0.0);
        assert!(!next.is_halted());
        assert!(next.can_open());
    }
}
