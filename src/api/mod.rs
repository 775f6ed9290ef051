pub mod health;
pub mod strategies;
pub mod trading;

use crate::AppState;
use axum::Router;

/// Create the API router.
pub fn router() -> Router<AppState> {
    let api = Router::new()
        .merge(health::router())
        .merge(trading::router())
        .merge(strategies::router());

    Router::new().nest("/api", api)
}
