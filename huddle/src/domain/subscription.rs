//! Push subscription shapes.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::Transport;

/// Native device platform.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Platform {
    Ios,
    Android,
}

/// APNs environment a device token was issued for.
///
/// This is a property of the token: development builds register sandbox
/// tokens, store builds register production tokens.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ApnsEnvironment {
    Sandbox,
    #[default]
    Production,
}

/// The endpoint a subscription delivers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubscriptionKind {
    /// Browser push endpoint with its RFC 8291 key material.
    WebPush {
        endpoint: String,
        p256dh: String,
        auth: String,
    },
    /// App install token. iOS tokens go to APNs, Android tokens to FCM.
    Native {
        token: String,
        platform: Platform,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        environment: Option<ApnsEnvironment>,
    },
}

impl SubscriptionKind {
    /// Per-user unique key: the endpoint URL or the native token.
    pub fn endpoint_key(&self) -> &str {
        match self {
            Self::WebPush { endpoint, .. } => endpoint,
            Self::Native { token, .. } => token,
        }
    }

    /// Value of the `kind` column.
    pub fn discriminator(&self) -> &'static str {
        match self {
            Self::WebPush { .. } => "web_push",
            Self::Native { .. } => "native",
        }
    }

    /// Push transport that delivers to this endpoint.
    pub fn transport(&self) -> Transport {
        match self {
            Self::WebPush { .. } => Transport::WebPush,
            Self::Native {
                platform: Platform::Ios,
                ..
            } => Transport::Apns,
            Self::Native {
                platform: Platform::Android,
                ..
            } => Transport::Fcm,
        }
    }

    pub fn is_ios(&self) -> bool {
        matches!(
            self,
            Self::Native {
                platform: Platform::Ios,
                ..
            }
        )
    }
}

/// What a client sends when it subscribes a device.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeviceDescriptor {
    #[serde(flatten)]
    pub kind: SubscriptionKind,
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl DeviceDescriptor {
    pub fn new(kind: SubscriptionKind) -> Self {
        Self {
            kind,
            device_name: None,
            user_agent: None,
        }
    }
}

/// Why a subscription stopped being active.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeactivationReason {
    Unsubscribed,
    Superseded,
    EndpointGone,
    BadDeviceToken,
    NotRegistered,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_parses_native_ios() {
        let descriptor: DeviceDescriptor = serde_json::from_str(
            r#"{"type":"native","token":"abc","platform":"ios","environment":"sandbox","device_name":"iPad"}"#,
        )
        .unwrap();
        assert!(descriptor.kind.is_ios());
        assert_eq!(descriptor.kind.transport(), Transport::Apns);
        assert_eq!(descriptor.kind.endpoint_key(), "abc");
        assert_eq!(descriptor.device_name.as_deref(), Some("iPad"));
    }

    #[test]
    fn test_descriptor_parses_web_push() {
        let descriptor: DeviceDescriptor = serde_json::from_str(
            r#"{"type":"web_push","endpoint":"https://push.example/x","p256dh":"k","auth":"a"}"#,
        )
        .unwrap();
        assert_eq!(descriptor.kind.discriminator(), "web_push");
        assert_eq!(descriptor.kind.transport(), Transport::WebPush);
        assert_eq!(descriptor.kind.endpoint_key(), "https://push.example/x");
    }
}
