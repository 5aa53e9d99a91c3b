//! Delivery metrics.
//!
//! Process-local counters surfaced through the health endpoint.

mod collector;

pub use collector::{DeliveryMetrics, DeliveryMetricsSnapshot, TransportCounters};
