//! Outbound delivery channels.
//!
//! Push transports (Web Push, APNs, FCM) implement [`PushDispatcher`]: they
//! take a batch of device targets and report one outcome per target, never
//! letting one target's failure abort its siblings. Email and SMS implement
//! [`ContactSender`] and deliver to a single address.

pub mod apns;
pub mod email;
pub mod fcm;
pub mod sms;
pub mod web_push;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use serde::Serialize;

use crate::Result;
use crate::domain::{Category, Channel, DeactivationReason, SubscriptionKind, Transport};

pub use apns::{ApnsConfig, ApnsDispatcher, ApnsTokenCache};
pub use email::{EmailConfig, EmailSender};
pub use fcm::{FcmConfig, FcmDispatcher};
pub use sms::{SmsConfig, SmsSender};
pub use web_push::{WebPushConfig, WebPushDispatcher};

/// Content delivered to a device or address.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_id: Option<String>,
    pub categories: Vec<Category>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_event_id: Option<String>,
}

impl NotificationPayload {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            notification_id: None,
            categories: Vec::new(),
            related_event_id: None,
        }
    }
}

/// One active device subscription to deliver to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushTarget {
    pub subscription_id: String,
    pub user_id: String,
    pub kind: SubscriptionKind,
}

/// Result for a single target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetOutcome {
    pub subscription_id: String,
    pub user_id: String,
    pub success: bool,
    pub error: Option<String>,
    /// Set when the endpoint is permanently invalid and must be deactivated.
    pub deactivate: Option<DeactivationReason>,
}

impl TargetOutcome {
    pub fn from_result(target: &PushTarget, result: std::result::Result<(), SendFailure>) -> Self {
        let (success, error, deactivate) = match result {
            Ok(()) => (true, None, None),
            Err(failure) => (false, Some(failure.message), failure.deactivate),
        };
        Self {
            subscription_id: target.subscription_id.clone(),
            user_id: target.user_id.clone(),
            success,
            error,
            deactivate,
        }
    }
}

/// Aggregate of one dispatcher call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub success_count: usize,
    pub failure_count: usize,
    pub per_target: Vec<TargetOutcome>,
}

impl DispatchReport {
    pub fn from_outcomes(per_target: Vec<TargetOutcome>) -> Self {
        let success_count = per_target.iter().filter(|o| o.success).count();
        Self {
            success_count,
            failure_count: per_target.len() - success_count,
            per_target,
        }
    }

    /// The same failure for every target, without contacting the provider.
    pub fn fail_all(targets: &[PushTarget], failure: &SendFailure) -> Self {
        Self::from_outcomes(
            targets
                .iter()
                .map(|t| TargetOutcome::from_result(t, Err(failure.clone())))
                .collect(),
        )
    }

    pub fn merge(&mut self, other: DispatchReport) {
        self.success_count += other.success_count;
        self.failure_count += other.failure_count;
        self.per_target.extend(other.per_target);
    }
}

/// Why a single send failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendFailure {
    pub message: String,
    pub deactivate: Option<DeactivationReason>,
}

impl SendFailure {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            deactivate: None,
        }
    }

    pub fn permanent(reason: DeactivationReason, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            deactivate: Some(reason),
        }
    }
}

#[async_trait]
pub trait PushDispatcher: Send + Sync {
    fn transport(&self) -> Transport;

    /// Send `payload` to every target. Always returns one outcome per target.
    async fn send(&self, targets: &[PushTarget], payload: &NotificationPayload) -> DispatchReport;
}

#[async_trait]
pub trait ContactSender: Send + Sync {
    fn channel(&self) -> Channel;

    /// Deliver to one email address or phone number.
    async fn send(&self, address: &str, payload: &NotificationPayload) -> Result<()>;
}

/// Run `send_one` for every target with at most `concurrency` in flight and
/// collect every outcome.
pub(crate) async fn fan_out<'a, F>(
    targets: &'a [PushTarget],
    concurrency: usize,
    send_one: F,
) -> DispatchReport
where
    F: Fn(&'a PushTarget) -> BoxFuture<'a, std::result::Result<(), SendFailure>>,
{
    // Futures are built eagerly so the stream holds no borrowing closure.
    let pending: Vec<_> = targets
        .iter()
        .map(|target| {
            let fut = send_one(target);
            async move {
                let result = fut.await;
                TargetOutcome::from_result(target, result)
            }
        })
        .collect();

    let outcomes: Vec<TargetOutcome> = stream::iter(pending)
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    DispatchReport::from_outcomes(outcomes)
}

/// Truncate to `max_chars` characters, appending an ellipsis when cut.
pub(crate) fn truncate_string(input: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return String::new();
    }
    let mut iter = input.chars();
    let mut out: String = iter.by_ref().take(max_chars).collect();
    if iter.next().is_some() {
        out.push('…');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Platform;
    use futures::FutureExt;

    fn target(id: &str) -> PushTarget {
        PushTarget {
            subscription_id: id.to_string(),
            user_id: format!("user-{id}"),
            kind: SubscriptionKind::Native {
                token: format!("token-{id}"),
                platform: Platform::Android,
                environment: None,
            },
        }
    }

    #[tokio::test]
    async fn test_fan_out_isolates_failures() {
        let targets = vec![target("a"), target("b"), target("c")];
        let report = fan_out(&targets, 2, |t| {
            async move {
                match t.subscription_id.as_str() {
                    "b" => Err(SendFailure::permanent(
                        DeactivationReason::NotRegistered,
                        "gone",
                    )),
                    _ => Ok(()),
                }
            }
            .boxed()
        })
        .await;

        assert_eq!(report.success_count, 2);
        assert_eq!(report.failure_count, 1);
        let failed = report.per_target.iter().find(|o| !o.success).unwrap();
        assert_eq!(failed.subscription_id, "b");
        assert_eq!(failed.deactivate, Some(DeactivationReason::NotRegistered));
    }

    #[test]
    fn test_truncate_string() {
        assert_eq!(truncate_string("hello", 10), "hello");
        assert_eq!(truncate_string("hello", 3), "hel…");
        assert_eq!(truncate_string("hello", 0), "");
    }
}
