//! huddle library crate.
//!
//! Notification delivery and scheduling for multi-tenant youth-sports
//! organizations. The modules are public so integration tests can drive the
//! engine directly.

pub mod api;
pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod notification;
pub mod scheduler;
pub mod utils;

pub use error::{Error, Result};
