//! Notification engine.
//!
//! - [`registry`] stores push subscriptions and retires dead endpoints
//! - [`preferences`] decides per recipient and channel whether delivery proceeds
//! - [`resolver`] expands a recipient target into user ids
//! - [`channels`] holds the Web Push, APNs, FCM, email and SMS transports
//! - [`tracker`] records per-channel outcomes and folds them into stats
//! - [`service`] ties them together behind `create_notification`

pub mod channels;
pub mod preferences;
pub mod registry;
pub mod resolver;
pub mod service;
pub mod tracker;

pub use preferences::{PreferenceGate, PreferencesPatch};
pub use registry::SubscriptionRegistry;
pub use resolver::{RecipientResolver, Resolution};
pub use service::{CreateNotificationRequest, Dispatchers, NotificationService, SendResult};
pub use tracker::{DeliveryTracker, NotificationStats};
