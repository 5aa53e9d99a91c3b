//! API route modules.
//!
//! Organizes routes by resource type.

pub mod campaigns;
pub mod health;
pub mod logging;
pub mod notifications;
pub mod preferences;
pub mod push;
pub mod subscriptions;
pub mod users;

use axum::Router;

use crate::api::server::AppState;

/// Create the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .merge(notifications::router())
        .merge(users::router())
        .merge(subscriptions::router())
        .merge(preferences::router())
        .merge(push::router())
        .merge(campaigns::router())
        .merge(health::router())
        .merge(logging::router());

    Router::new().nest("/api", api).with_state(state)
}
