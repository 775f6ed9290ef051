use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::services::{StrategyError, TradingError};
use crate::types::ApiResponse;

/// Application error types.
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Trading(#[from] TradingError),

    #[error(transparent)]
    Strategy(#[from] StrategyError),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl AppError {
    fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Trading(e) => {
                let status = match e {
                    TradingError::Validation(_) => StatusCode::BAD_REQUEST,
                    TradingError::InsufficientFunds { .. } | TradingError::RiskLimit { .. } => {
                        StatusCode::UNPROCESSABLE_ENTITY
                    }
                    TradingError::NotFound(_) => StatusCode::NOT_FOUND,
                    TradingError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
                    TradingError::NotInitialized => StatusCode::CONFLICT,
                    TradingError::InvariantViolation(_) | TradingError::Storage(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, e.kind())
            }
            AppError::Strategy(e) => {
                let status = match e {
                    StrategyError::NotFound(_) => StatusCode::NOT_FOUND,
                    StrategyError::InvalidTransition { .. } | StrategyError::AlreadyExists(_) => {
                        StatusCode::CONFLICT
                    }
                };
                (status, e.kind())
            }
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        let body = Json(ApiResponse::<()>::failure(kind, self.to_string()));
        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
