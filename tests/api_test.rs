//! Integration tests for API endpoints
//!
//! Requests go through the full router (CORS, tracing, state) via
//! `tower::ServiceExt::oneshot`; every response is checked for the
//! `{ ok, data?, errorReason? }` envelope.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use specter::config::{AutoTradeConfig, ClassifierConfig, Config, EngineConfig};
use specter::services::{
    AutoTrader, InMemoryLedger, MarketConditionClassifier, PaperTradingEngine, SimulatedMarket,
    StrategyManager,
};
use specter::AppState;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn state() -> (AppState, Arc<SimulatedMarket>) {
    let market = Arc::new(SimulatedMarket::new(3));
    market.set_price("BTC/USD", 50_000.0);
    market.set_price("ETH/USD", 3_000.0);

    let mut config = Config::default();
    config.user_id = "api".to_string();
    config.engine = EngineConfig::default();
    config.auto_trade = AutoTradeConfig {
        interval: Duration::from_secs(60),
        symbols: vec!["BTC/USD".to_string()],
        min_confidence: 0.6,
        enabled_on_start: false,
    };

    let engine = Arc::new(PaperTradingEngine::new(
        Arc::new(InMemoryLedger::new()),
        market.clone(),
        config.engine.clone(),
    ));
    let strategies = Arc::new(StrategyManager::new(
        market.clone(),
        MarketConditionClassifier::new(ClassifierConfig::default()),
    ));
    let auto_trader = Arc::new(AutoTrader::new(
        engine.clone(),
        strategies.clone(),
        config.auto_trade.clone(),
    ));

    let state = AppState {
        config: Arc::new(config),
        engine,
        strategies,
        auto_trader,
    };
    (state, market)
}

async fn send(state: &AppState, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = specter::app(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn initialized(balance: f64) -> (AppState, Arc<SimulatedMarket>) {
    let (state, market) = state();
    let (status, _) = send(
        &state,
        "POST",
        "/api/engine/initialize",
        Some(json!({ "initialBalance": balance })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    (state, market)
}

fn assert_failure(body: &Value, kind: &str) {
    assert_eq!(body["ok"], false);
    assert_eq!(body["errorKind"], kind);
    assert!(body["errorReason"].is_string());
    assert!(body.get("data").is_none());
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health() {
    let (state, _market) = state();
    let (status, body) = send(&state, "GET", "/api/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["autoTrading"], false);
}

// =============================================================================
// Account and Orders
// =============================================================================

mod trading_api_tests {
    use super::*;

    #[tokio::test]
    async fn test_account_before_initialize() {
        let (state, _market) = state();
        let (status, body) = send(&state, "GET", "/api/account", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_failure(&body, "NOT_INITIALIZED");
    }

    #[tokio::test]
    async fn test_initialize_returns_account() {
        let (state, _market) = state();
        let (status, body) = send(
            &state,
            "POST",
            "/api/engine/initialize",
            Some(json!({ "initialBalance": 25000.0 })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
        assert_eq!(body["data"]["id"], "paper_api");
        assert_eq!(body["data"]["cashBalance"], 25000.0);
        assert!(body.get("errorReason").is_none());
    }

    #[tokio::test]
    async fn test_order_round_trip() {
        let (state, market) = initialized(50_000.0).await;

        let (status, body) = send(
            &state,
            "POST",
            "/api/orders",
            Some(json!({ "symbol": "BTC/USD", "side": "buy", "quantity": 0.1 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["order"]["status"], "filled");
        assert_eq!(body["data"]["order"]["strategy"], "manual");
        assert_eq!(body["data"]["account"]["cashBalance"], 45000.0);

        market.set_price("BTC/USD", 51_000.0);
        let (status, body) = send(
            &state,
            "POST",
            "/api/positions/close",
            Some(json!({ "symbol": "BTC/USD" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["realizedPnl"], 100.0);
        assert_eq!(body["data"]["order"]["reasoning"], "manual close");

        let (_, body) = send(&state, "GET", "/api/orders?limit=1", None).await;
        let orders = body["data"].as_array().unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0]["side"], "sell");

        let (_, body) = send(&state, "GET", "/api/positions", None).await;
        assert!(body["data"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_insufficient_funds() {
        let (state, _market) = initialized(50_000.0).await;
        let (status, body) = send(
            &state,
            "POST",
            "/api/orders",
            Some(json!({
                "symbol": "BTC/USD",
                "side": "buy",
                "quantity": 1000.0,
                "kind": "limit",
                "price": 50000.0
            })),
        )
        .await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_failure(&body, "INSUFFICIENT_FUNDS");

        let (_, body) = send(&state, "GET", "/api/account", None).await;
        assert_eq!(body["data"]["cashBalance"], 50000.0);
    }

    #[tokio::test]
    async fn test_malformed_body_uses_envelope() {
        let (state, _market) = initialized(1_000.0).await;
        let (status, body) = send(
            &state,
            "POST",
            "/api/orders",
            Some(json!({ "symbol": "BTC/USD", "side": "sideways" })),
        )
        .await;

        assert!(status.is_client_error());
        assert_failure(&body, "BAD_REQUEST");
    }

    #[tokio::test]
    async fn test_close_missing_position() {
        let (state, _market) = initialized(1_000.0).await;
        let (status, body) = send(
            &state,
            "POST",
            "/api/positions/close",
            Some(json!({ "symbol": "ETH/USD", "reason": "cleanup" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_failure(&body, "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_gateway_outage_maps_to_bad_gateway() {
        let (state, market) = initialized(100_000.0).await;
        market.set_unavailable(true);

        let (status, body) = send(
            &state,
            "POST",
            "/api/orders",
            Some(json!({ "symbol": "ETH/USD", "side": "buy", "quantity": 1.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_failure(&body, "UPSTREAM_UNAVAILABLE");
    }

    #[tokio::test]
    async fn test_portfolio_metrics() {
        let (state, _market) = initialized(100_000.0).await;
        send(
            &state,
            "POST",
            "/api/orders",
            Some(json!({ "symbol": "ETH/USD", "side": "buy", "quantity": 2.0 })),
        )
        .await;

        let (status, body) = send(&state, "GET", "/api/portfolio/metrics", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["totalEquity"], 100000.0);
        assert_eq!(body["data"]["openPositions"], 1);
    }
}

// =============================================================================
// Settings
// =============================================================================

mod settings_api_tests {
    use super::*;

    #[tokio::test]
    async fn test_auto_trading_toggle() {
        let (state, _market) = initialized(1_000.0).await;

        let (_, body) = send(&state, "POST", "/api/auto-trading/enable", None).await;
        assert_eq!(body["data"]["enabled"], true);

        let (_, body) = send(&state, "GET", "/api/auto-trading", None).await;
        assert_eq!(body["data"]["enabled"], true);
        assert_eq!(body["data"]["running"], false);

        let (_, body) = send(&state, "POST", "/api/auto-trading/disable", None).await;
        assert_eq!(body["data"]["enabled"], false);
    }

    #[tokio::test]
    async fn test_patch_config() {
        let (state, _market) = initialized(1_000.0).await;
        let (status, body) = send(
            &state,
            "PATCH",
            "/api/config",
            Some(json!({ "feeRate": 0.001, "maxLeverage": 0.5, "unknownKey": 1 })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["feeRate"], 0.001);
        // Invalid leverage is skipped
        assert_eq!(body["data"]["maxLeverage"], 1.0);

        let (_, body) = send(&state, "GET", "/api/config", None).await;
        assert_eq!(body["data"]["feeRate"], 0.001);
    }
}

// =============================================================================
// Strategies
// =============================================================================

mod strategy_api_tests {
    use super::*;

    #[tokio::test]
    async fn test_list_and_get() {
        let (state, _market) = state();
        let (_, body) = send(&state, "GET", "/api/strategies", None).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 4);

        let (status, body) = send(&state, "GET", "/api/strategies/mean_reversion", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["family"], "mean_reversion");

        let (status, body) = send(&state, "GET", "/api/strategies/unknown", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_failure(&body, "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let (state, _market) = state();

        let (_, body) = send(&state, "POST", "/api/strategies/momentum_rider/stop", None).await;
        assert_eq!(body["data"]["state"], "stopped");

        let (status, body) =
            send(&state, "POST", "/api/strategies/momentum_rider/deactivate", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_failure(&body, "INVALID_TRANSITION");

        let (_, body) =
            send(&state, "POST", "/api/strategies/momentum_rider/activate", None).await;
        assert_eq!(body["data"]["state"], "active");
    }

    #[tokio::test]
    async fn test_register_strategy() {
        let (state, _market) = state();
        let definition = json!({
            "id": "range_scalper",
            "name": "Range Scalper",
            "description": "",
            "family": "mean_reversion",
            "parameters": {
                "maxPositionSize": 1000.0,
                "stopLossPct": 0.01,
                "takeProfitPct": 0.015,
                "timeframe": "1m"
            }
        });

        let (status, body) =
            send(&state, "POST", "/api/strategies", Some(definition.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["state"], "paused");

        let (status, body) = send(&state, "POST", "/api/strategies", Some(definition)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_failure(&body, "ALREADY_EXISTS");
    }

    #[tokio::test]
    async fn test_optimal_and_condition() {
        let (state, _market) = state();

        let (status, body) =
            send(&state, "GET", "/api/market/condition?symbol=BTC/USD", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["symbol"], "BTC/USD");
        assert!(body["data"]["trend"].is_string());

        let (status, body) =
            send(&state, "GET", "/api/strategies/optimal?symbol=BTC/USD", None).await;
        assert_eq!(status, StatusCode::OK);
        let ranked = body["data"]["ranked"].as_array().unwrap();
        assert_eq!(ranked.len(), 4);
        assert!(ranked[0]["explanation"].as_str().unwrap().contains("BTC/USD"));
    }

    #[tokio::test]
    async fn test_unknown_symbol_condition() {
        let (state, _market) = state();
        let (status, body) =
            send(&state, "GET", "/api/market/condition?symbol=NOPE/USD", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_failure(&body, "VALIDATION");
    }

    #[tokio::test]
    async fn test_signals_need_account() {
        let (state, _market) = state();
        let (status, body) = send(&state, "GET", "/api/signals?symbol=BTC/USD", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_failure(&body, "NOT_INITIALIZED");

        let (state, _market) = initialized(10_000.0).await;
        let (status, body) = send(&state, "GET", "/api/signals?symbol=BTC/USD", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["data"].is_array());
    }
}
