//! Database models.
//!
//! `*DbModel` structs mirror table rows one to one. JSON columns stay as
//! strings here and are decoded by the typed accessors.

pub mod campaign;
pub mod directory;
pub mod notification;
pub mod preferences;
pub mod subscription;

pub use campaign::{Campaign, CampaignDbModel, CampaignRunDbModel};
pub use directory::{EventDbModel, UserDbModel};
pub use notification::{
    DeliveryMap, Notification, NotificationDbModel, NotificationRecipientDbModel,
    UserNotification, UserNotificationRow,
};
pub use preferences::NotificationPreferencesDbModel;
pub use subscription::PushSubscriptionDbModel;
