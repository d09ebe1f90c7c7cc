//! Trailing Grid Bot Binary
//!
//! ## Setup
//!
//! 1. Optionally create a `.env` file in the project root:
//!    ```
//!    GRID_GRID__PAIR=BTC
//!    GRID_EXECUTION__BACKEND=signed
//!    GRID_EXECUTION__PRIVATE_KEY=0xYourPrivateKeyHere
//!    ```
//!
//! 2. Run the bot (the config file is optional):
//!    ```bash
//!    cargo run --bin grid_bot -- config.toml
//!    ```

use std::time::Duration;

use log::{error, info, warn};

use trailing_grid_bot::{
    config::{ExecutionBackend, FeedKind, FeedSettings, Settings},
    grid::{
        ExecutionClient, GridEngine, GridError, GridResult, GridRunner, OrderBookSource,
        PriceSource, RandomWalkSource, SignedExecution, SimulatedExecution, TickerStreamSource,
    },
    server,
};

const DEFAULT_WS_URL: &str = "wss://api.hyperliquid-testnet.xyz/ws";

fn build_source(feed: &FeedSettings, pair: &str, base_url: &str) -> Box<dyn PriceSource> {
    match feed.kind {
        FeedKind::RandomWalk => {
            info!(
                "Price feed: random walk from {} (volatility {})",
                feed.start_price, feed.volatility
            );
            match feed.seed {
                Some(seed) => Box::new(RandomWalkSource::seeded(feed.start_price, feed.volatility, seed)),
                None => Box::new(RandomWalkSource::new(feed.start_price, feed.volatility)),
            }
        }
        FeedKind::OrderBook => {
            let url = feed.url.clone().unwrap_or_else(|| base_url.to_string());
            info!("Price feed: order book polling {}", url);
            Box::new(OrderBookSource::new(url, pair))
        }
        FeedKind::Ticker => {
            let url = feed.url.clone().unwrap_or_else(|| DEFAULT_WS_URL.to_string());
            info!("Price feed: ticker stream {}", url);
            let source = TickerStreamSource::connect(url, pair);
            match feed.max_staleness_secs {
                Some(secs) => Box::new(source.with_max_staleness(Duration::from_secs(secs))),
                None => Box::new(source),
            }
        }
    }
}

fn build_client(settings: &Settings) -> GridResult<Box<dyn ExecutionClient>> {
    let exec = &settings.execution;
    let pair = settings.grid.pair.as_str();

    match exec.backend {
        ExecutionBackend::Simulated => {
            info!("Execution: simulated (fee rate {})", exec.fee_rate);
            Ok(Box::new(SimulatedExecution::new(pair).with_fee_rate(exec.fee_rate)))
        }
        ExecutionBackend::Signed => {
            let key = exec.private_key.as_deref().ok_or_else(|| {
                GridError::InvalidConfig(
                    "signed execution needs GRID_EXECUTION__PRIVATE_KEY".into(),
                )
            })?;
            let wallet = SignedExecution::wallet_from_key(key)?;
            warn!(
                "Execution: signed orders to {} from {} - real funds at risk",
                exec.base_url,
                wallet.address()
            );
            Ok(Box::new(
                SignedExecution::new(exec.base_url.clone(), pair, wallet)
                    .with_size_decimals(exec.size_decimals)
                    .with_retry_config(exec.max_retries, exec.retry_base_delay_ms),
            ))
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env before reading settings so GRID_* variables apply
    let dotenv = dotenvy::dotenv();

    let config_path = std::env::args().nth(1);
    if let Some(path) = &config_path {
        if !std::path::Path::new(path).exists() {
            eprintln!("Config file '{}' not found.", path);
            std::process::exit(1);
        }
    }

    let settings = match Settings::new(config_path.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load settings: {}", e);
            std::process::exit(1);
        }
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(settings.log.level.as_str())).init();

    match dotenv {
        Ok(path) => info!("Loaded environment from: {}", path.display()),
        Err(_) => info!("No .env file found, using system environment variables"),
    }

    let grid = &settings.grid;
    info!("Starting trailing grid bot for {}", grid.pair);
    info!(
        "Levels: {} every {:.2}% | sell target {:.2}% | trail {:.2}%",
        grid.grid_count,
        grid.step_percent * 100.0,
        grid.sell_target_percent * 100.0,
        grid.trail_up_percent * 100.0
    );
    info!(
        "Per order: ${} | max open: {} | max daily loss: {:?}",
        grid.quote_amount, grid.max_open_positions, grid.max_daily_loss
    );
    if !grid.trading_enabled {
        warn!("Trading disabled: prices are observed only");
    }

    let engine = match GridEngine::new(settings.grid.clone()) {
        Ok(engine) => engine,
        Err(e) => {
            error!("Invalid grid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let client = match build_client(&settings) {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to create execution client: {}", e);
            std::process::exit(1);
        }
    };
    let source = build_source(&settings.feed, &settings.grid.pair, &settings.execution.base_url);

    let runner = GridRunner::new(engine, source, client, settings.runner.runner_config());

    if settings.server.enabled {
        let summary = runner.summary_handle();
        let host = settings.server.host.clone();
        let port = settings.server.port;
        tokio::spawn(async move {
            if let Err(e) = server::start_server(summary, &host, port).await {
                error!("Liveness server failed: {}", e);
            }
        });
    }

    if let Err(e) = runner.run().await {
        error!("Grid bot stopped: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
