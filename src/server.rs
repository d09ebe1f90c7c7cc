use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::State, response::Json, routing::get, Router};
use log::info;
use tokio::sync::RwLock;

use crate::grid::{GridError, GridResult, GridStateSummary};

/// Fixed payload for every path except `/status`
pub const LIVENESS_BODY: &str = "Grid bot is running";

type SummaryState = Arc<RwLock<GridStateSummary>>;

/// Build the liveness / status router
pub fn router(summary: SummaryState) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .fallback(liveness_handler)
        .with_state(summary)
}

/// Serve until the listener fails
pub async fn start_server(summary: SummaryState, host: &str, port: u16) -> GridResult<()> {
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .map_err(|e| GridError::InvalidConfig(format!("invalid server address {}:{}: {}", host, port, e)))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Liveness server running on http://{}", addr);

    axum::serve(listener, router(summary)).await?;
    Ok(())
}

async fn liveness_handler() -> &'static str {
    LIVENESS_BODY
}

async fn status_handler(State(summary): State<SummaryState>) -> Json<GridStateSummary> {
    Json(summary.read().await.clone())
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;

    fn state() -> SummaryState {
        Arc::new(RwLock::new(GridStateSummary {
            pair: "BTC".into(),
            initialized: true,
            reference_price: Some(1000.0),
            open_positions: 2,
            ..GridStateSummary::default()
        }))
    }

    async fn get(uri: &str) -> (StatusCode, Vec<u8>) {
        let response = router(state())
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_any_path_answers_running() {
        for uri in ["/", "/health", "/some/deep/path"] {
            let (status, body) = get(uri).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, LIVENESS_BODY.as_bytes());
        }
    }

    #[tokio::test]
    async fn test_status_returns_summary() {
        let (status, body) = get("/status").await;
        assert_eq!(status, StatusCode::OK);

        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["pair"], "BTC");
        assert_eq!(json["open_positions"], 2);
        assert_eq!(json["reference_price"], 1000.0);
    }
}
