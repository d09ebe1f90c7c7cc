//! Grid bot runner - main execution loop

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use log::{debug, error, info, warn};
use tokio::sync::{Mutex, RwLock};
use tokio::time::{interval, timeout, MissedTickBehavior};

use super::engine::{GridEngine, GridStateSummary};
use super::errors::{GridError, GridResult};
use super::executor::ExecutionClient;
use super::feed::PriceSource;
use super::types::{HaltPolicy, TickReport};

/// Grid bot runner configuration
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Time between ticks; also bounds each price observation
    pub tick_interval: Duration,
    pub halt_policy: HaltPolicy,
    /// Consecutive failed ticks before an error is logged
    pub max_consecutive_errors: u32,
    /// Reset the loss accumulator at each UTC day boundary
    pub daily_reset: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(10),
            halt_policy: HaltPolicy::default(),
            max_consecutive_errors: 5,
            daily_reset: false,
        }
    }
}

/// State touched by a tick; held under one lock so ticks never overlap
struct TickCore<P> {
    engine: GridEngine,
    source: P,
    consecutive_errors: u32,
    day: Option<NaiveDate>,
}

impl<P> TickCore<P> {
    /// Start a new trading day when the date changes. Returns true on rollover.
    fn roll_day(&mut self, today: NaiveDate) -> bool {
        match self.day {
            Some(day) if day != today => {
                info!("Day boundary {} -> {}", day, today);
                self.engine.start_new_day();
                self.day = Some(today);
                true
            }
            Some(_) => false,
            None => {
                self.day = Some(today);
                false
            }
        }
    }
}

/// Drives a [`GridEngine`] from a price source at a fixed interval
pub struct GridRunner<P: PriceSource, E: ExecutionClient> {
    core: Mutex<TickCore<P>>,
    exec: Arc<E>,
    summary: Arc<RwLock<GridStateSummary>>,
    config: RunnerConfig,
}

impl<P: PriceSource, E: ExecutionClient> GridRunner<P, E> {
    pub fn new(engine: GridEngine, source: P, exec: E, config: RunnerConfig) -> Self {
        let summary = Arc::new(RwLock::new(engine.summary()));

        Self {
            core: Mutex::new(TickCore {
                engine,
                source,
                consecutive_errors: 0,
                day: None,
            }),
            exec: Arc::new(exec),
            summary,
            config,
        }
    }

    /// Shared handle to the latest summary, refreshed after every tick
    pub fn summary_handle(&self) -> Arc<RwLock<GridStateSummary>> {
        Arc::clone(&self.summary)
    }

    pub async fn summary(&self) -> GridStateSummary {
        self.summary.read().await.clone()
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run one tick.
    ///
    /// Returns `Ok(None)` when the tick was skipped, either because another
    /// tick holds the engine or because it failed with a recoverable error.
    /// `Err` is reserved for conditions that must stop the runner.
    pub async fn step(&self) -> GridResult<Option<TickReport>> {
        let mut guard = match self.core.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("Previous tick still in progress; skipping");
                return Ok(None);
            }
        };
        let core = &mut *guard;

        if self.config.daily_reset {
            core.roll_day(Utc::now().date_naive());
        }

        let observed = timeout(self.config.tick_interval, core.source.observe()).await;
        let result = match observed {
            Ok(Ok(price)) => core.engine.tick(price, self.exec.as_ref()).await,
            Ok(Err(e)) => Err(e),
            Err(_) => Err(GridError::PriceUnavailable(format!(
                "{} did not answer within {:?}",
                core.source.name(),
                self.config.tick_interval
            ))),
        };

        *self.summary.write().await = core.engine.summary();

        let report = match result {
            Ok(report) => {
                core.consecutive_errors = 0;
                report
            }
            Err(e) if e.is_fatal() => {
                error!("Fatal tick error: {}", e);
                return Err(e);
            }
            Err(e) => {
                core.consecutive_errors += 1;
                warn!("Tick skipped: {}", e);
                if core.consecutive_errors >= self.config.max_consecutive_errors {
                    error!(
                        "{} consecutive failed ticks (last: {})",
                        core.consecutive_errors, e
                    );
                }
                return Ok(None);
            }
        };

        if !report.intents.is_empty() {
            let s = self.summary.read().await;
            info!(
                "Tick @ {}: {} intents, {} fills | open={} pnl={:.4} trips={}",
                report.price,
                report.intents.len(),
                report.fills.len(),
                s.open_positions,
                s.realized_pnl,
                s.round_trips
            );
        }

        if report.halted && self.config.halt_policy == HaltPolicy::Terminate {
            core.engine.governor().check()?;
        }

        Ok(Some(report))
    }

    /// Tick until `shutdown` resolves or a fatal error occurs
    pub async fn run_until<S>(&self, shutdown: S) -> GridResult<()>
    where
        S: Future<Output = ()>,
    {
        info!(
            "Starting grid runner (tick every {:?}, halt policy {:?})",
            self.config.tick_interval, self.config.halt_policy
        );

        let mut ticker = interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.step().await {
                        error!("Runner stopping: {}", e);
                        return Err(e);
                    }
                }
            }
        }

        let s = self.summary().await;
        info!(
            "Runner stopped: ticks={} open={} carried={} pnl={:.4} fees={:.4} trips={}",
            s.ticks, s.open_positions, s.carried_positions, s.realized_pnl, s.total_fees, s.round_trips
        );
        Ok(())
    }

    /// Tick until Ctrl-C
    pub async fn run(&self) -> GridResult<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }
}
