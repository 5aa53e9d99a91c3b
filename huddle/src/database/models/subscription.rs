//! Push subscription model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use utoipa::ToSchema;

use crate::domain::{ApnsEnvironment, DeviceDescriptor, Platform, SubscriptionKind};
use crate::{Error, Result};

/// Row of the `push_subscription` table.
///
/// Web Push rows carry `endpoint`/`p256dh`/`auth`; native rows carry
/// `fcm_token`/`platform` and, for iOS, `apns_environment`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct PushSubscriptionDbModel {
    pub id: String,
    pub user_id: String,
    pub kind: String,
    pub endpoint_key: String,
    pub endpoint: Option<String>,
    pub p256dh: Option<String>,
    pub auth: Option<String>,
    pub fcm_token: Option<String>,
    pub platform: Option<String>,
    pub apns_environment: Option<String>,
    pub device_name: Option<String>,
    pub user_agent: Option<String>,
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_used: Option<i64>,
    pub deactivated_at: Option<i64>,
    pub deactivation_reason: Option<String>,
}

impl PushSubscriptionDbModel {
    pub fn new(user_id: impl Into<String>, descriptor: &DeviceDescriptor, now_ms: i64) -> Self {
        let mut model = Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            kind: descriptor.kind.discriminator().to_string(),
            endpoint_key: descriptor.kind.endpoint_key().to_string(),
            endpoint: None,
            p256dh: None,
            auth: None,
            fcm_token: None,
            platform: None,
            apns_environment: None,
            device_name: descriptor.device_name.clone(),
            user_agent: descriptor.user_agent.clone(),
            is_active: true,
            created_at: now_ms,
            updated_at: now_ms,
            last_used: Some(now_ms),
            deactivated_at: None,
            deactivation_reason: None,
        };

        match &descriptor.kind {
            SubscriptionKind::WebPush {
                endpoint,
                p256dh,
                auth,
            } => {
                model.endpoint = Some(endpoint.clone());
                model.p256dh = Some(p256dh.clone());
                model.auth = Some(auth.clone());
            }
            SubscriptionKind::Native {
                token,
                platform,
                environment,
            } => {
                model.fcm_token = Some(token.clone());
                model.platform = Some(platform.to_string());
                model.apns_environment = environment.map(|env| env.to_string());
            }
        }

        model
    }

    /// Decode the tagged subscription shape from the row.
    pub fn subscription_kind(&self) -> Result<SubscriptionKind> {
        match self.kind.as_str() {
            "web_push" => Ok(SubscriptionKind::WebPush {
                endpoint: required(&self.endpoint, "endpoint", &self.id)?,
                p256dh: required(&self.p256dh, "p256dh", &self.id)?,
                auth: required(&self.auth, "auth", &self.id)?,
            }),
            "native" => {
                let platform = required(&self.platform, "platform", &self.id)?;
                let platform = Platform::from_str(&platform).map_err(|_| {
                    Error::Database(format!("subscription {} has platform '{platform}'", self.id))
                })?;
                Ok(SubscriptionKind::Native {
                    token: required(&self.fcm_token, "fcm_token", &self.id)?,
                    platform,
                    environment: self
                        .apns_environment
                        .as_deref()
                        .and_then(|env| ApnsEnvironment::from_str(env).ok()),
                })
            }
            other => Err(Error::Database(format!(
                "subscription {} has unknown kind '{other}'",
                self.id
            ))),
        }
    }
}

fn required(value: &Option<String>, column: &str, id: &str) -> Result<String> {
    value
        .clone()
        .ok_or_else(|| Error::Database(format!("subscription {id} is missing {column}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_row_roundtrip() {
        let descriptor = DeviceDescriptor::new(SubscriptionKind::Native {
            token: "tok".into(),
            platform: Platform::Ios,
            environment: Some(ApnsEnvironment::Sandbox),
        });
        let model = PushSubscriptionDbModel::new("u1", &descriptor, 10);
        assert_eq!(model.endpoint_key, "tok");
        assert_eq!(model.apns_environment.as_deref(), Some("sandbox"));
        assert_eq!(model.subscription_kind().unwrap(), descriptor.kind);
    }

    #[test]
    fn test_web_push_row_missing_keys_is_error() {
        let descriptor = DeviceDescriptor::new(SubscriptionKind::WebPush {
            endpoint: "https://push.example/1".into(),
            p256dh: "k".into(),
            auth: "a".into(),
        });
        let mut model = PushSubscriptionDbModel::new("u1", &descriptor, 10);
        model.auth = None;
        assert!(model.subscription_kind().is_err());
    }
}
