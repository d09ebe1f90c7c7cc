//! Execution abstraction for grid trading - enables mocking for tests

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy::primitives::{keccak256, B256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use async_trait::async_trait;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::config::round_decimals;
use super::errors::{GridError, GridResult};
use super::types::{FillConfirmation, OrderIntent};

/// Turns an order intent into a confirmed fill
#[async_trait]
pub trait ExecutionClient: Send + Sync {
    /// Place the intent; `Ok` only once the venue confirms a fill
    async fn place(&self, intent: &OrderIntent) -> GridResult<FillConfirmation>;
}

#[async_trait]
impl<T: ExecutionClient + ?Sized> ExecutionClient for Box<T> {
    async fn place(&self, intent: &OrderIntent) -> GridResult<FillConfirmation> {
        (**self).place(intent).await
    }
}

pub(crate) fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

// ============================================================================
// Console simulation
// ============================================================================

/// Paper execution: every intent fills immediately at its limit price
pub struct SimulatedExecution {
    pair: String,
    /// Fee charged on notional (0.0001 = 0.01%)
    fee_rate: f64,
    next_oid: AtomicU64,
}

impl SimulatedExecution {
    pub fn new(pair: impl Into<String>) -> Self {
        Self {
            pair: pair.into(),
            fee_rate: 0.0,
            next_oid: AtomicU64::new(1),
        }
    }

    pub fn with_fee_rate(mut self, fee_rate: f64) -> Self {
        self.fee_rate = fee_rate;
        self
    }
}

#[async_trait]
impl ExecutionClient for SimulatedExecution {
    async fn place(&self, intent: &OrderIntent) -> GridResult<FillConfirmation> {
        let oid = self.next_oid.fetch_add(1, Ordering::SeqCst);
        let fee = intent.quote_amount * self.fee_rate;

        info!(
            "[SIM] {} {} level {} @ {} for ${} (oid={})",
            intent.side.as_str(),
            self.pair,
            intent.level_id,
            intent.price,
            intent.quote_amount,
            oid
        );

        Ok(FillConfirmation {
            client_id: intent.client_id,
            venue_oid: Some(oid),
            price: intent.price,
            size: intent.base_size(),
            fee,
            timestamp: now_millis(),
        })
    }
}

// ============================================================================
// Signed remote execution
// ============================================================================

/// Strictly increasing millisecond nonces, one sequence per account
#[derive(Debug, Default)]
pub struct NonceManager {
    last: AtomicU64,
}

impl NonceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next nonce: the current time in millis, bumped past the previous nonce if needed
    pub fn next(&self) -> u64 {
        let now = now_millis();
        loop {
            let last = self.last.load(Ordering::SeqCst);
            let next = now.max(last + 1);
            if self
                .last
                .compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return next;
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct LimitWire {
    tif: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct OrderWire {
    coin: String,
    is_buy: bool,
    limit_px: String,
    sz: String,
    reduce_only: bool,
    limit: LimitWire,
    cloid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct OrderAction {
    #[serde(rename = "type")]
    action_type: String,
    orders: Vec<OrderWire>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct SignatureWire {
    r: String,
    s: String,
    v: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct SignedRequest {
    action: OrderAction,
    nonce: u64,
    signature: SignatureWire,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "status", content = "response")]
enum ExchangeResponse {
    #[serde(rename = "ok")]
    Ok(ExchangeResponseBody),
    #[serde(rename = "err")]
    Err(String),
}

#[derive(Debug, Clone, Deserialize)]
struct ExchangeResponseBody {
    #[serde(default)]
    data: Option<StatusesData>,
}

#[derive(Debug, Clone, Deserialize)]
struct StatusesData {
    statuses: Vec<OrderStatusWire>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
enum OrderStatusWire {
    Filled(FilledWire),
    Resting(RestingWire),
    Error(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FilledWire {
    total_sz: String,
    avg_px: String,
    oid: u64,
    #[serde(default)]
    fee: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RestingWire {
    oid: u64,
}

fn parse_decimal(field: &str, value: &str) -> GridResult<f64> {
    value
        .parse::<f64>()
        .map_err(|e| GridError::Execution(format!("bad {} '{}': {}", field, value, e)))
}

/// Remote venue client: signs each order payload and submits it over HTTP.
///
/// Orders are sent immediate-or-cancel so the venue either fills them or
/// rejects them; a resting order is reported as an execution error.
pub struct SignedExecution {
    http: reqwest::Client,
    base_url: String,
    pair: String,
    wallet: PrivateKeySigner,
    nonces: NonceManager,
    size_decimals: u32,
    max_retries: u32,
    retry_base_delay_ms: u64,
}

impl SignedExecution {
    pub fn new(base_url: impl Into<String>, pair: impl Into<String>, wallet: PrivateKeySigner) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            pair: pair.into(),
            wallet,
            nonces: NonceManager::new(),
            size_decimals: 6,
            max_retries: 3,
            retry_base_delay_ms: 100,
        }
    }

    /// Parse a hex private key into a signer
    pub fn wallet_from_key(private_key: &str) -> GridResult<PrivateKeySigner> {
        private_key
            .trim()
            .parse::<PrivateKeySigner>()
            .map_err(|e| GridError::Signing(format!("invalid private key: {}", e)))
    }

    pub fn with_size_decimals(mut self, decimals: u32) -> Self {
        self.size_decimals = decimals;
        self
    }

    pub fn with_retry_config(mut self, max_retries: u32, base_delay_ms: u64) -> Self {
        self.max_retries = max_retries.max(1);
        self.retry_base_delay_ms = base_delay_ms;
        self
    }

    fn build_action(&self, intent: &OrderIntent) -> OrderAction {
        let size = round_decimals(intent.base_size(), self.size_decimals);
        OrderAction {
            action_type: "order".into(),
            orders: vec![OrderWire {
                coin: self.pair.clone(),
                is_buy: intent.side.is_buy(),
                limit_px: intent.price.to_string(),
                sz: size.to_string(),
                reduce_only: !intent.side.is_buy(),
                limit: LimitWire { tif: "Ioc".into() },
                cloid: format!("0x{}", intent.client_id.simple()),
            }],
        }
    }

    /// keccak256(msgpack(action) || nonce_be)
    fn action_hash(action: &OrderAction, nonce: u64) -> GridResult<B256> {
        let mut bytes = rmp_serde::to_vec_named(action)
            .map_err(|e| GridError::Signing(format!("failed to encode action: {}", e)))?;
        bytes.extend_from_slice(&nonce.to_be_bytes());
        Ok(keccak256(&bytes))
    }

    fn sign(&self, action: OrderAction, nonce: u64) -> GridResult<SignedRequest> {
        let hash = Self::action_hash(&action, nonce)?;
        let signature = self
            .wallet
            .sign_hash_sync(&hash)
            .map_err(|e| GridError::Signing(e.to_string()))?;

        Ok(SignedRequest {
            action,
            nonce,
            signature: SignatureWire {
                r: B256::from(signature.r()).to_string(),
                s: B256::from(signature.s()).to_string(),
                v: 27 + signature.v() as u8,
            },
        })
    }

    async fn submit(&self, request: &SignedRequest) -> GridResult<ExchangeResponse> {
        let url = format!("{}/exchange", self.base_url.trim_end_matches('/'));
        let response = self.http.post(url).json(request).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(GridError::Execution(format!("HTTP {}: {}", status, body)));
        }

        Ok(serde_json::from_str(&body)?)
    }

    /// Execute with exponential backoff retry; the same signed payload is
    /// re-sent so the venue can deduplicate on nonce and client id
    async fn with_retry<T, F, Fut>(&self, operation: F) -> GridResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = GridResult<T>>,
    {
        let mut attempts = 0;
        let mut last_error = GridError::Execution("Unknown error".into());

        while attempts < self.max_retries {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    attempts += 1;
                    last_error = e;

                    if attempts < self.max_retries {
                        let delay = self.retry_base_delay_ms * 2u64.pow(attempts - 1);
                        warn!(
                            "Submission failed (attempt {}/{}), retrying in {}ms: {}",
                            attempts, self.max_retries, delay, last_error
                        );
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                    }
                }
            }
        }

        Err(GridError::OrderPlacementFailed {
            attempts: self.max_retries,
            reason: last_error.to_string(),
        })
    }
}

fn interpret_response(intent: &OrderIntent, response: ExchangeResponse) -> GridResult<FillConfirmation> {
    let body = match response {
        ExchangeResponse::Ok(body) => body,
        ExchangeResponse::Err(e) => return Err(GridError::OrderRejected(e)),
    };

    let status = body
        .data
        .and_then(|d| d.statuses.into_iter().next())
        .ok_or_else(|| GridError::Execution("No status in response".into()))?;

    match status {
        OrderStatusWire::Filled(f) => Ok(FillConfirmation {
            client_id: intent.client_id,
            venue_oid: Some(f.oid),
            price: parse_decimal("avgPx", &f.avg_px)?,
            size: parse_decimal("totalSz", &f.total_sz)?,
            fee: match f.fee.as_deref() {
                Some(fee) => parse_decimal("fee", fee)?,
                None => 0.0,
            },
            timestamp: now_millis(),
        }),
        OrderStatusWire::Resting(r) => Err(GridError::Execution(format!(
            "order {} rested instead of filling",
            r.oid
        ))),
        OrderStatusWire::Error(e) => Err(GridError::OrderRejected(e)),
    }
}

#[async_trait]
impl ExecutionClient for SignedExecution {
    async fn place(&self, intent: &OrderIntent) -> GridResult<FillConfirmation> {
        let nonce = self.nonces.next();
        let request = self.sign(self.build_action(intent), nonce)?;

        info!(
            "Submitting {} level {} @ {} (nonce={}, cloid={})",
            intent.side.as_str(),
            intent.level_id,
            intent.price,
            nonce,
            intent.client_id
        );

        let response = self.with_retry(|| self.submit(&request)).await?;
        interpret_response(intent, response)
    }
}

// ============================================================================
// Mock Implementation for Testing
// ============================================================================

/// Mock execution client for testing the engine without a venue.
pub mod mock {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    use crate::grid::types::OrderSide;

    /// Mock execution client for testing
    pub struct MockExecution {
        /// Every intent received, including failed ones
        pub placed: Arc<Mutex<Vec<OrderIntent>>>,
        pub should_fail: Arc<Mutex<bool>>,
        /// Level ids whose intents fail
        pub failing_levels: Arc<Mutex<HashSet<u32>>>,
        /// Overrides the fill price of sells (adverse fills)
        pub sell_fill_price: Arc<Mutex<Option<f64>>>,
        next_oid: AtomicU64,
    }

    impl MockExecution {
        pub fn new() -> Self {
            Self {
                placed: Arc::new(Mutex::new(Vec::new())),
                should_fail: Arc::new(Mutex::new(false)),
                failing_levels: Arc::new(Mutex::new(HashSet::new())),
                sell_fill_price: Arc::new(Mutex::new(None)),
                next_oid: AtomicU64::new(1),
            }
        }

        pub async fn set_should_fail(&self, fail: bool) {
            *self.should_fail.lock().await = fail;
        }

        pub async fn fail_level(&self, level_id: u32) {
            self.failing_levels.lock().await.insert(level_id);
        }

        pub async fn set_sell_fill_price(&self, price: Option<f64>) {
            *self.sell_fill_price.lock().await = price;
        }

        pub async fn placed(&self) -> Vec<OrderIntent> {
            self.placed.lock().await.clone()
        }
    }

    impl Default for MockExecution {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl ExecutionClient for MockExecution {
        async fn place(&self, intent: &OrderIntent) -> GridResult<FillConfirmation> {
            self.placed.lock().await.push(intent.clone());

            if *self.should_fail.lock().await
                || self.failing_levels.lock().await.contains(&intent.level_id)
            {
                return Err(GridError::Execution("Mock failure".into()));
            }

            let price = match intent.side {
                OrderSide::Sell => self.sell_fill_price.lock().await.unwrap_or(intent.price),
                OrderSide::Buy => intent.price,
            };

            Ok(FillConfirmation {
                client_id: intent.client_id,
                venue_oid: Some(self.next_oid.fetch_add(1, Ordering::SeqCst)),
                price,
                size: intent.base_size(),
                fee: 0.0,
                timestamp: now_millis(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::types::OrderSide;

    // well-known throwaway key, never funded
    const TEST_KEY: &str = "e908f86dbb4d55ac876378565aafeabc187f6690f046459397b17d9b9a19688e";

    fn signed_client() -> SignedExecution {
        let wallet = SignedExecution::wallet_from_key(TEST_KEY).unwrap();
        SignedExecution::new("http://127.0.0.1:1", "BTC", wallet)
    }

    #[tokio::test]
    async fn test_simulated_fills_at_limit() {
        let exec = SimulatedExecution::new("BTC").with_fee_rate(0.001);
        let intent = OrderIntent::new(1, 0, OrderSide::Buy, 980.0, 15.0);

        let fill = exec.place(&intent).await.unwrap();
        assert_eq!(fill.client_id, intent.client_id);
        assert!((fill.price - 980.0).abs() < 1e-12);
        assert!((fill.size - 15.0 / 980.0).abs() < 1e-12);
        assert!((fill.fee - 0.015).abs() < 1e-12);

        let second = exec.place(&intent).await.unwrap();
        assert_ne!(fill.venue_oid, second.venue_oid);
    }

    #[test]
    fn test_nonces_strictly_increase() {
        let nonces = NonceManager::new();
        let mut last = 0;
        for _ in 0..1000 {
            let n = nonces.next();
            assert!(n > last);
            last = n;
        }
    }

    #[test]
    fn test_build_action() {
        let client = signed_client().with_size_decimals(4);
        let intent = OrderIntent::new(2, 3, OrderSide::Sell, 979.2, 15.0);
        let action = client.build_action(&intent);

        assert_eq!(action.action_type, "order");
        let order = &action.orders[0];
        assert_eq!(order.coin, "BTC");
        assert!(!order.is_buy);
        assert!(order.reduce_only);
        assert_eq!(order.limit_px, "979.2");
        assert_eq!(order.sz, "0.0153");
        assert_eq!(order.limit.tif, "Ioc");
        assert_eq!(order.cloid, format!("0x{}", intent.client_id.simple()));
    }

    #[test]
    fn test_signing_is_deterministic_per_nonce() {
        let client = signed_client();
        let intent = OrderIntent::new(1, 0, OrderSide::Buy, 980.0, 15.0);

        let a = client.sign(client.build_action(&intent), 42).unwrap();
        let b = client.sign(client.build_action(&intent), 42).unwrap();
        let c = client.sign(client.build_action(&intent), 43).unwrap();

        assert_eq!(a.signature, b.signature);
        assert_ne!(a.signature, c.signature);
        assert!(a.signature.v == 27 || a.signature.v == 28);
        assert_eq!(a.signature.r.len(), 66);
    }

    #[test]
    fn test_interpret_filled_response() {
        let intent = OrderIntent::new(1, 0, OrderSide::Buy, 980.0, 15.0);
        let body = r#"{"status":"ok","response":{"type":"order","data":{"statuses":[{"filled":{"totalSz":"0.0153","avgPx":"979.8","oid":77738308}}]}}}"#;
        let response: ExchangeResponse = serde_json::from_str(body).unwrap();

        let fill = interpret_response(&intent, response).unwrap();
        assert_eq!(fill.venue_oid, Some(77738308));
        assert!((fill.price - 979.8).abs() < 1e-12);
        assert!((fill.size - 0.0153).abs() < 1e-12);
        assert_eq!(fill.fee, 0.0);
    }

    #[test]
    fn test_interpret_rejections() {
        let intent = OrderIntent::new(1, 0, OrderSide::Buy, 980.0, 15.0);

        let err: ExchangeResponse =
            serde_json::from_str(r#"{"status":"err","response":"User or API Wallet does not exist."}"#).unwrap();
        assert!(matches!(
            interpret_response(&intent, err),
            Err(GridError::OrderRejected(_))
        ));

        let rejected: ExchangeResponse = serde_json::from_str(
            r#"{"status":"ok","response":{"type":"order","data":{"statuses":[{"error":"Order could not immediately match"}]}}}"#,
        )
        .unwrap();
        assert!(matches!(
            interpret_response(&intent, rejected),
            Err(GridError::OrderRejected(_))
        ));

        let resting: ExchangeResponse = serde_json::from_str(
            r#"{"status":"ok","response":{"type":"order","data":{"statuses":[{"resting":{"oid":5}}]}}}"#,
        )
        .unwrap();
        assert!(matches!(
            interpret_response(&intent, resting),
            Err(GridError::Execution(_))
        ));

        let empty: ExchangeResponse =
            serde_json::from_str(r#"{"status":"ok","response":{"type":"order"}}"#).unwrap();
        assert!(interpret_response(&intent, empty).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_venue_exhausts_retries() {
        let client = signed_client().with_retry_config(2, 1);
        let intent = OrderIntent::new(1, 0, OrderSide::Buy, 980.0, 15.0);

        let result = client.place(&intent).await;
        assert!(matches!(
            result,
            Err(GridError::OrderPlacementFailed { attempts: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_mock_failure_modes() {
        let exec = mock::MockExecution::new();
        exec.fail_level(2).await;

        let ok = OrderIntent::new(1, 0, OrderSide::Buy, 980.0, 15.0);
        let bad = OrderIntent::new(2, 0, OrderSide::Buy, 960.0, 15.0);
        assert!(exec.place(&ok).await.is_ok());
        assert!(exec.place(&bad).await.is_err());
        assert_eq!(exec.placed().await.len(), 2);

        exec.set_sell_fill_price(Some(900.0)).await;
        let sell = OrderIntent::new(1, 0, OrderSide::Sell, 999.6, 15.0);
        let fill = exec.place(&sell).await.unwrap();
        assert!((fill.price - 900.0).abs() < 1e-12);
    }
}
