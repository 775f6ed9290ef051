//! Strategy API
//!
//! - GET /api/strategies - Catalog
//! - POST /api/strategies - Register a custom strategy
//! - GET /api/strategies/:id
//! - POST /api/strategies/:id/activate
//! - POST /api/strategies/:id/deactivate
//! - POST /api/strategies/:id/stop
//! - GET /api/strategies/optimal?symbol=BTC/USD - Ranked strategies with explanations
//! - GET /api/market/condition?symbol=BTC/USD - Current market condition
//! - GET /api/signals?symbol=BTC/USD - Signals for the paper account

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::trading::body;
use crate::error::{AppError, Result};
use crate::services::TradingError;
use crate::types::{ApiResponse, MarketCondition, Signal, StrategyDefinition};
use crate::AppState;

/// Create strategy router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/strategies", get(list_strategies).post(register_strategy))
        .route("/strategies/optimal", get(optimal_strategies))
        .route("/strategies/:id", get(get_strategy))
        .route("/strategies/:id/activate", post(activate_strategy))
        .route("/strategies/:id/deactivate", post(deactivate_strategy))
        .route("/strategies/:id/stop", post(stop_strategy))
        .route("/market/condition", get(market_condition))
        .route("/signals", get(signals))
}

#[derive(Debug, Deserialize)]
pub struct SymbolQuery {
    pub symbol: String,
}

/// A ranked strategy with its reasoning.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedStrategy {
    pub strategy: StrategyDefinition,
    pub score: f64,
    pub explanation: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimalStrategiesResponse {
    pub condition: MarketCondition,
    pub ranked: Vec<RankedStrategy>,
}

async fn list_strategies(State(state): State<AppState>) -> Json<ApiResponse<Vec<StrategyDefinition>>> {
    Json(ApiResponse::success(state.strategies.get_all_strategies()))
}

async fn register_strategy(
    State(state): State<AppState>,
    payload: std::result::Result<Json<StrategyDefinition>, JsonRejection>,
) -> Result<Json<ApiResponse<StrategyDefinition>>> {
    let definition = body(payload)?;
    if definition.id.trim().is_empty() {
        return Err(AppError::BadRequest("strategy id is required".into()));
    }
    Ok(Json(ApiResponse::success(
        state.strategies.register_strategy(definition)?,
    )))
}

async fn get_strategy(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<StrategyDefinition>>> {
    Ok(Json(ApiResponse::success(state.strategies.get_strategy(&id)?)))
}

async fn activate_strategy(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<StrategyDefinition>>> {
    Ok(Json(ApiResponse::success(state.strategies.activate_strategy(&id)?)))
}

async fn deactivate_strategy(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<StrategyDefinition>>> {
    Ok(Json(ApiResponse::success(state.strategies.deactivate_strategy(&id)?)))
}

async fn stop_strategy(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<StrategyDefinition>>> {
    Ok(Json(ApiResponse::success(state.strategies.stop_strategy(&id)?)))
}

async fn condition_for(state: &AppState, symbol: &str) -> Result<MarketCondition> {
    state
        .strategies
        .current_condition(symbol)
        .await
        .map_err(|e| AppError::Trading(TradingError::from(e)))
}

/// GET /api/strategies/optimal?symbol=
async fn optimal_strategies(
    State(state): State<AppState>,
    Query(query): Query<SymbolQuery>,
) -> Result<Json<ApiResponse<OptimalStrategiesResponse>>> {
    let condition = condition_for(&state, &query.symbol).await?;
    let ranked = state
        .strategies
        .select_optimal_strategies(&condition)
        .into_iter()
        .map(|scored| RankedStrategy {
            explanation: state
                .strategies
                .get_strategy_explanation(&scored.strategy, &condition),
            strategy: scored.strategy,
            score: scored.score,
        })
        .collect();

    Ok(Json(ApiResponse::success(OptimalStrategiesResponse {
        condition,
        ranked,
    })))
}

/// GET /api/market/condition?symbol=
async fn market_condition(
    State(state): State<AppState>,
    Query(query): Query<SymbolQuery>,
) -> Result<Json<ApiResponse<MarketCondition>>> {
    Ok(Json(ApiResponse::success(
        condition_for(&state, &query.symbol).await?,
    )))
}

/// GET /api/signals?symbol=
///
/// Proposals only; nothing is executed.
async fn signals(
    State(state): State<AppState>,
    Query(query): Query<SymbolQuery>,
) -> Result<Json<ApiResponse<Vec<Signal>>>> {
    let snapshot = state.engine.snapshot(&query.symbol).await?;
    let signals = state
        .strategies
        .generate_signals(&query.symbol, &snapshot)
        .await;
    Ok(Json(ApiResponse::success(signals)))
}
