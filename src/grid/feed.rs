//! Price sources for the grid engine

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use super::config::round_decimals;
use super::errors::{GridError, GridResult};

/// Successive price observations for one trading pair
#[async_trait]
pub trait PriceSource: Send {
    /// Latest price, or `PriceUnavailable`
    async fn observe(&mut self) -> GridResult<f64>;

    /// Short name used in logs
    fn name(&self) -> &str;
}

#[async_trait]
impl<T: PriceSource + ?Sized> PriceSource for Box<T> {
    async fn observe(&mut self) -> GridResult<f64> {
        (**self).observe().await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

// ============================================================================
// Synthetic random walk
// ============================================================================

/// Synthetic feed: each observation moves by a uniform step in
/// `[-volatility / 2, volatility / 2)`, rounded to cents
pub struct RandomWalkSource {
    last_price: f64,
    volatility: f64,
    rng: StdRng,
}

impl RandomWalkSource {
    pub fn new(start_price: f64, volatility: f64) -> Self {
        Self {
            last_price: start_price,
            volatility,
            rng: StdRng::from_entropy(),
        }
    }

    /// Reproducible walk
    pub fn seeded(start_price: f64, volatility: f64, seed: u64) -> Self {
        Self {
            last_price: start_price,
            volatility,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

#[async_trait]
impl PriceSource for RandomWalkSource {
    async fn observe(&mut self) -> GridResult<f64> {
        let step = (self.rng.gen::<f64>() - 0.5) * self.volatility;
        // never walk to zero or below
        self.last_price = round_decimals(self.last_price + step, 2).max(0.01);
        Ok(self.last_price)
    }

    fn name(&self) -> &str {
        "random-walk"
    }
}

// ============================================================================
// HTTP order book poll
// ============================================================================

#[derive(Debug, Deserialize)]
struct BookLevel {
    px: String,
}

#[derive(Debug, Deserialize)]
struct L2Book {
    /// `[bids, asks]`, best first
    levels: Vec<Vec<BookLevel>>,
}

fn best_bid(book: &L2Book) -> GridResult<f64> {
    let top = book
        .levels
        .first()
        .and_then(|bids| bids.first())
        .ok_or_else(|| GridError::PriceUnavailable("order book has no bids".into()))?;

    top.px
        .parse::<f64>()
        .map_err(|e| GridError::PriceUnavailable(format!("bad bid price '{}': {}", top.px, e)))
}

/// Polls a venue's order book over HTTP and reports the best bid
pub struct OrderBookSource {
    http: reqwest::Client,
    url: String,
    pair: String,
}

impl OrderBookSource {
    pub fn new(base_url: impl Into<String>, pair: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            http: reqwest::Client::new(),
            url: format!("{}/info", base_url.trim_end_matches('/')),
            pair: pair.into(),
        }
    }
}

#[async_trait]
impl PriceSource for OrderBookSource {
    async fn observe(&mut self) -> GridResult<f64> {
        let response = self
            .http
            .post(&self.url)
            .json(&json!({ "type": "l2Book", "coin": self.pair }))
            .send()
            .await
            .map_err(|e| GridError::PriceUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GridError::PriceUnavailable(format!(
                "order book request returned HTTP {}",
                response.status()
            )));
        }

        let book: L2Book = response
            .json()
            .await
            .map_err(|e| GridError::PriceUnavailable(e.to_string()))?;

        best_bid(&book)
    }

    fn name(&self) -> &str {
        "order-book"
    }
}

// ============================================================================
// Streaming ticker
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct CachedPrice {
    price: f64,
    received_at: Instant,
}

/// Extract `pair`'s price from an `allMids` ticker message
fn parse_ticker_message(text: &str, pair: &str) -> Option<f64> {
    let value: Value = serde_json::from_str(text).ok()?;
    if value.get("channel")?.as_str()? != "allMids" {
        return None;
    }
    value
        .get("data")?
        .get("mids")?
        .get(pair)?
        .as_str()?
        .parse::<f64>()
        .ok()
}

/// Reconnect delay that doubles per failed attempt and resets once a
/// connection is established
#[derive(Debug)]
struct ReconnectBackoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl ReconnectBackoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }

    /// Delay to wait now; the following one is doubled
    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }
}

/// Subscribes to a websocket ticker; `observe` returns the last reported
/// price, cached until the next message arrives
pub struct TickerStreamSource {
    latest: Arc<RwLock<Option<CachedPrice>>>,
    max_staleness: Option<Duration>,
    task: JoinHandle<()>,
}

impl TickerStreamSource {
    /// Spawn the subscription task. Reconnects with backoff on disconnect.
    pub fn connect(ws_url: impl Into<String>, pair: impl Into<String>) -> Self {
        let latest = Arc::new(RwLock::new(None));
        let task = tokio::spawn(Self::stream_loop(ws_url.into(), pair.into(), latest.clone()));

        Self {
            latest,
            max_staleness: None,
            task,
        }
    }

    /// Treat prices older than `max` as unavailable
    pub fn with_max_staleness(mut self, max: Duration) -> Self {
        self.max_staleness = Some(max);
        self
    }

    async fn stream_loop(url: String, pair: String, latest: Arc<RwLock<Option<CachedPrice>>>) {
        let mut backoff = ReconnectBackoff::new(Duration::from_millis(500), Duration::from_secs(30));

        loop {
            match connect_async(url.as_str()).await {
                Ok((ws, _)) => {
                    info!("Connected to ticker stream {}", url);
                    backoff.reset();
                    match Self::stream_session(ws, &pair, &latest).await {
                        Ok(()) => warn!("Ticker stream closed by server"),
                        Err(e) => warn!("Ticker stream error: {}", e),
                    }
                }
                Err(e) => warn!("Ticker connect to {} failed: {}", url, e),
            }

            let delay = backoff.next_delay();
            debug!("Reconnecting ticker stream in {:?}", delay);
            tokio::time::sleep(delay).await;
        }
    }

    async fn stream_session(
        ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
        pair: &str,
        latest: &Arc<RwLock<Option<CachedPrice>>>,
    ) -> GridResult<()> {
        let (mut sink, mut reader) = ws.split();
        let subscribe = json!({ "method": "subscribe", "subscription": { "type": "allMids" } });
        sink.send(Message::Text(subscribe.to_string()))
            .await
            .map_err(|e| GridError::WebSocket(e.to_string()))?;

        while let Some(message) = reader.next().await {
            match message.map_err(|e| GridError::WebSocket(e.to_string()))? {
                Message::Text(text) => {
                    if let Some(price) = parse_ticker_message(&text, pair) {
                        debug!("Ticker {} = {}", pair, price);
                        *latest.write().await = Some(CachedPrice {
                            price,
                            received_at: Instant::now(),
                        });
                    }
                }
                Message::Ping(payload) => {
                    sink.send(Message::Pong(payload))
                        .await
                        .map_err(|e| GridError::WebSocket(e.to_string()))?;
                }
                Message::Close(_) => break,
                _ => {}
            }
        }

        Ok(())
    }
}

impl Drop for TickerStreamSource {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[async_trait]
impl PriceSource for TickerStreamSource {
    async fn observe(&mut self) -> GridResult<f64> {
        let cached = (*self.latest.read().await)
            .ok_or_else(|| GridError::PriceUnavailable("no ticker message received yet".into()))?;

        if let Some(max) = self.max_staleness {
            let age = cached.received_at.elapsed();
            if age > max {
                return Err(GridError::PriceUnavailable(format!(
                    "last ticker price is {:?} old",
                    age
                )));
            }
        }

        Ok(cached.price)
    }

    fn name(&self) -> &str {
        "ticker-stream"
    }
}

// ============================================================================
// Mock Implementation for Testing
// ============================================================================

/// Scripted feed for tests
pub mod mock {
    use std::collections::VecDeque;

    use super::*;

    /// Replays a fixed script; `None` entries and an exhausted script are unavailable
    pub struct ScriptedPriceSource {
        script: VecDeque<Option<f64>>,
        pub observed: usize,
    }

    impl ScriptedPriceSource {
        pub fn new(prices: impl IntoIterator<Item = f64>) -> Self {
            Self::with_gaps(prices.into_iter().map(Some))
        }

        pub fn with_gaps(script: impl IntoIterator<Item = Option<f64>>) -> Self {
            Self {
                script: script.into_iter().collect(),
                observed: 0,
            }
        }

        pub fn remaining(&self) -> usize {
            self.script.len()
        }
    }

    #[async_trait]
    impl PriceSource for ScriptedPriceSource {
        async fn observe(&mut self) -> GridResult<f64> {
            self.observed += 1;
            match self.script.pop_front() {
                Some(Some(price)) => Ok(price),
                Some(None) => Err(GridError::PriceUnavailable("scripted gap".into())),
                None => Err(GridError::PriceUnavailable("script exhausted".into())),
            }
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::ScriptedPriceSource;
    use super::*;

    #[tokio::test]
    async fn test_random_walk_is_reproducible() {
        let mut a = RandomWalkSource::seeded(1000.0, 25.0, 7);
        let mut b = RandomWalkSource::seeded(1000.0, 25.0, 7);

        let mut previous = 1000.0;
        for _ in 0..200 {
            let pa = a.observe().await.unwrap();
            let pb = b.observe().await.unwrap();
            assert_eq!(pa, pb);
            assert!(pa > 0.0);
            // each step is at most half the volatility (plus rounding)
            assert!((pa - previous).abs() <= 12.5 + 0.01);
            // cents
            assert!(((pa * 100.0).round() - pa * 100.0).abs() < 1e-6);
            previous = pa;
        }
    }

    #[tokio::test]
    async fn test_random_walk_never_reaches_zero() {
        let mut walk = RandomWalkSource::seeded(0.02, 50.0, 1);
        for _ in 0..100 {
            assert!(walk.observe().await.unwrap() >= 0.01);
        }
    }

    #[test]
    fn test_best_bid() {
        let book: L2Book = serde_json::from_str(
            r#"{"coin":"BTC","time":1,"levels":[[{"px":"999.5","sz":"1.2","n":3},{"px":"999.0","sz":"4","n":1}],[{"px":"1000.5","sz":"2","n":1}]]}"#,
        )
        .unwrap();
        assert!((best_bid(&book).unwrap() - 999.5).abs() < 1e-12);

        let empty: L2Book = serde_json::from_str(r#"{"levels":[[],[]]}"#).unwrap();
        assert!(matches!(best_bid(&empty), Err(GridError::PriceUnavailable(_))));
    }

    #[test]
    fn test_parse_ticker_message() {
        let msg = r#"{"channel":"allMids","data":{"mids":{"BTC":"1015.25","ETH":"30.1"}}}"#;
        assert_eq!(parse_ticker_message(msg, "BTC"), Some(1015.25));
        assert_eq!(parse_ticker_message(msg, "SOL"), None);
        assert_eq!(
            parse_ticker_message(r#"{"channel":"subscriptionResponse","data":{}}"#, "BTC"),
            None
        );
        assert_eq!(parse_ticker_message("not json", "BTC"), None);
    }

    #[test]
    fn test_reconnect_backoff_doubles_and_resets() {
        let mut backoff = ReconnectBackoff::new(Duration::from_millis(500), Duration::from_secs(3));

        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(), Duration::from_millis(1000));
        assert_eq!(backoff.next_delay(), Duration::from_millis(2000));
        assert_eq!(backoff.next_delay(), Duration::from_secs(3));
        assert_eq!(backoff.next_delay(), Duration::from_secs(3));

        // a successful connect starts the sequence over
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_ticker_without_messages_is_unavailable() {
        // nothing listens on port 1; the task just keeps retrying
        let mut source = TickerStreamSource::connect("ws://127.0.0.1:1", "BTC");
        assert!(matches!(
            source.observe().await,
            Err(GridError::PriceUnavailable(_))
        ));

        *source.latest.write().await = Some(CachedPrice {
            price: 1001.0,
            received_at: Instant::now(),
        });
        assert_eq!(source.observe().await.unwrap(), 1001.0);
    }

    #[tokio::test]
    async fn test_stale_ticker_price_is_unavailable() {
        let mut source = TickerStreamSource::connect("ws://127.0.0.1:1", "BTC")
            .with_max_staleness(Duration::from_millis(1));
        *source.latest.write().await = Some(CachedPrice {
            price: 1001.0,
            received_at: Instant::now() - Duration::from_secs(1),
        });
        assert!(source.observe().await.is_err());
    }

    #[tokio::test]
    async fn test_scripted_source() {
        let mut source = ScriptedPriceSource::with_gaps([Some(1000.0), None, Some(990.0)]);
        assert_eq!(source.observe().await.unwrap(), 1000.0);
        assert!(source.observe().await.is_err());
        assert_eq!(source.observe().await.unwrap(), 990.0);
        assert_eq!(source.remaining(), 0);
        assert!(source.observe().await.is_err());
        assert_eq!(source.observed, 4);
    }
}
