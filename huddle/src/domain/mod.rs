//! Core domain types shared by the engine, the scheduler and the API.

pub mod campaign;
pub mod channel;
pub mod subscription;
pub mod target;

pub use campaign::{CampaignStatus, RecurrenceFrequency, RunStatus, ScheduleType};
pub use channel::{Category, Channel, DeliveryStatus, NotificationStatus, Transport};
pub use subscription::{ApnsEnvironment, DeactivationReason, DeviceDescriptor, Platform, SubscriptionKind};
pub use target::{RecipientTarget, SkippedRecipient, TargetKind};
