//! Trading API
//!
//! Endpoints for the paper trading engine:
//!
//! Account:
//! - POST /api/engine/initialize - Create or reset the paper account
//! - GET /api/account - Current account
//!
//! Orders:
//! - POST /api/orders - Execute an order
//! - GET /api/orders - Order history, most recent first
//!
//! Positions:
//! - GET /api/positions - Open positions
//! - POST /api/positions/close - Close a position at market
//!
//! Portfolio:
//! - GET /api/portfolio/metrics - Equity, P&L and win rate
//! - POST /api/portfolio/mark - Refresh mark prices
//!
//! Settings:
//! - GET /api/auto-trading - Loop status
//! - POST /api/auto-trading/enable
//! - POST /api/auto-trading/disable
//! - GET /api/config
//! - PATCH /api/config - Merge a partial engine config

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::config::{ConfigUpdate, EngineConfig};
use crate::error::{AppError, Result};
use crate::services::AutoTraderStatus;
use crate::types::{
    Account, ApiResponse, ExecutionResult, Order, OrderRequest, PortfolioMetrics, Position,
};
use crate::AppState;

/// Create trading router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/engine/initialize", post(initialize))
        .route("/account", get(get_account))
        .route("/orders", get(list_orders).post(execute_order))
        .route("/positions", get(list_positions))
        .route("/positions/close", post(close_position))
        .route("/portfolio/metrics", get(portfolio_metrics))
        .route("/portfolio/mark", post(mark_to_market))
        .route("/auto-trading", get(auto_trading_status))
        .route("/auto-trading/enable", post(enable_auto_trading))
        .route("/auto-trading/disable", post(disable_auto_trading))
        .route("/config", get(get_config).patch(update_config))
}

/// Unwrap a JSON body, reporting malformed input in the response envelope.
pub(crate) fn body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|e| AppError::BadRequest(e.body_text()))
}

// =============================================================================
// Request Types
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeRequest {
    /// Defaults to the server's configured user
    pub user_id: Option<String>,
    /// Defaults to the engine's configured initial balance
    pub initial_balance: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ClosePositionRequest {
    pub symbol: String,
    #[serde(default)]
    pub reason: Option<String>,
}

// =============================================================================
// Handlers
// =============================================================================

/// POST /api/engine/initialize
async fn initialize(
    State(state): State<AppState>,
    payload: std::result::Result<Json<InitializeRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<Account>>> {
    let request = body(payload)?;
    let user_id = request
        .user_id
        .unwrap_or_else(|| state.config.user_id.clone());
    let account = state
        .engine
        .initialize(&user_id, request.initial_balance)
        .await?;
    Ok(Json(ApiResponse::success(account)))
}

/// GET /api/account
async fn get_account(State(state): State<AppState>) -> Result<Json<ApiResponse<Account>>> {
    Ok(Json(ApiResponse::success(state.engine.account().await?)))
}

/// POST /api/orders
async fn execute_order(
    State(state): State<AppState>,
    payload: std::result::Result<Json<OrderRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<ExecutionResult>>> {
    let request = body(payload)?;
    let result = state.engine.execute_order(request).await?;
    Ok(Json(ApiResponse::success(result)))
}

/// GET /api/orders?limit=50
async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<ApiResponse<Vec<Order>>>> {
    let limit = query.limit.unwrap_or(50).min(500);
    Ok(Json(ApiResponse::success(state.engine.orders(limit).await?)))
}

/// GET /api/positions
async fn list_positions(State(state): State<AppState>) -> Result<Json<ApiResponse<Vec<Position>>>> {
    Ok(Json(ApiResponse::success(state.engine.positions().await?)))
}

/// POST /api/positions/close
///
/// Symbol travels in the body since pairs contain a slash.
async fn close_position(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ClosePositionRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<ExecutionResult>>> {
    let request = body(payload)?;
    let reason = request.reason.unwrap_or_else(|| "manual close".to_string());
    let result = state.engine.close_position(&request.symbol, &reason).await?;
    Ok(Json(ApiResponse::success(result)))
}

/// GET /api/portfolio/metrics
async fn portfolio_metrics(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<PortfolioMetrics>>> {
    Ok(Json(ApiResponse::success(
        state.engine.get_portfolio_metrics().await?,
    )))
}

/// POST /api/portfolio/mark
async fn mark_to_market(State(state): State<AppState>) -> Result<Json<ApiResponse<usize>>> {
    Ok(Json(ApiResponse::success(state.engine.mark_to_market().await?)))
}

/// GET /api/auto-trading
async fn auto_trading_status(State(state): State<AppState>) -> Json<ApiResponse<AutoTraderStatus>> {
    Json(ApiResponse::success(state.auto_trader.status()))
}

/// POST /api/auto-trading/enable
async fn enable_auto_trading(State(state): State<AppState>) -> Json<ApiResponse<AutoTraderStatus>> {
    state.engine.enable_auto_trading();
    Json(ApiResponse::success(state.auto_trader.status()))
}

/// POST /api/auto-trading/disable
async fn disable_auto_trading(State(state): State<AppState>) -> Json<ApiResponse<AutoTraderStatus>> {
    state.engine.disable_auto_trading();
    Json(ApiResponse::success(state.auto_trader.status()))
}

/// GET /api/config
async fn get_config(State(state): State<AppState>) -> Json<ApiResponse<EngineConfig>> {
    Json(ApiResponse::success(state.engine.config()))
}

/// PATCH /api/config
async fn update_config(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ConfigUpdate>, JsonRejection>,
) -> Result<Json<ApiResponse<EngineConfig>>> {
    let update = body(payload)?;
    Ok(Json(ApiResponse::success(
        state.engine.update_config(update).await?,
    )))
}
