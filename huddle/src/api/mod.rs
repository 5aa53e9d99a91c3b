//! REST API server module.
//!
//! HTTP endpoints for sending notifications, user inboxes, device
//! subscriptions, preferences and campaigns.

pub mod error;
pub mod openapi;
pub mod routes;
pub mod server;

pub use server::{ApiServer, ApiServerConfig, AppState};
