//! Subscription registry: device registration, deactivation and lookup.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::database::models::PushSubscriptionDbModel;
use crate::database::repositories::SubscriptionRepository;
use crate::database::time::now_ms;
use crate::domain::{DeactivationReason, DeviceDescriptor, SubscriptionKind};
use crate::notification::channels::PushTarget;
use crate::{Error, Result};

pub struct SubscriptionRegistry {
    repo: Arc<dyn SubscriptionRepository>,
}

fn validate(descriptor: &DeviceDescriptor) -> Result<()> {
    match &descriptor.kind {
        SubscriptionKind::WebPush {
            endpoint,
            p256dh,
            auth,
        } => {
            let parsed = url::Url::parse(endpoint)
                .map_err(|e| Error::validation(format!("Invalid push endpoint: {}", e)))?;
            if parsed.scheme() != "https" && parsed.scheme() != "http" {
                return Err(Error::validation("Push endpoint must be an http(s) URL"));
            }
            if p256dh.trim().is_empty() || auth.trim().is_empty() {
                return Err(Error::validation("Web Push subscriptions need p256dh and auth keys"));
            }
        }
        SubscriptionKind::Native { token, .. } => {
            if token.trim().is_empty() {
                return Err(Error::validation("Device token must not be empty"));
            }
        }
    }
    Ok(())
}

impl SubscriptionRegistry {
    pub fn new(repo: Arc<dyn SubscriptionRepository>) -> Self {
        Self { repo }
    }

    /// Register or refresh a device for `user_id`.
    ///
    /// A new iOS token supersedes every other active iOS row for the user in
    /// the same transaction.
    pub async fn register(
        &self,
        user_id: &str,
        descriptor: &DeviceDescriptor,
    ) -> Result<PushSubscriptionDbModel> {
        if user_id.trim().is_empty() {
            return Err(Error::validation("user id must not be empty"));
        }
        validate(descriptor)?;

        let model = PushSubscriptionDbModel::new(user_id, descriptor, now_ms());
        let stored = self.repo.upsert(&model, descriptor.kind.is_ios()).await?;
        info!(
            user_id = %user_id,
            subscription_id = %stored.id,
            kind = %stored.kind,
            platform = stored.platform.as_deref().unwrap_or("web"),
            "Registered push subscription"
        );
        Ok(stored)
    }

    /// User-initiated unsubscribe. `false` when nothing active matched.
    pub async fn deactivate(&self, user_id: &str, endpoint_key: &str) -> Result<bool> {
        let changed = self
            .repo
            .deactivate(user_id, endpoint_key, DeactivationReason::Unsubscribed, now_ms())
            .await?;
        if changed {
            info!(user_id = %user_id, "Push subscription unsubscribed");
        }
        Ok(changed)
    }

    /// Deactivate after a permanent transport failure.
    pub async fn deactivate_for_failure(
        &self,
        subscription_id: &str,
        reason: DeactivationReason,
    ) -> Result<bool> {
        let changed = self
            .repo
            .deactivate_by_id(subscription_id, reason, now_ms())
            .await?;
        if changed {
            warn!(subscription_id = %subscription_id, reason = %reason, "Deactivated push subscription");
        }
        Ok(changed)
    }

    pub async fn active_for(&self, user_id: &str) -> Result<Vec<PushSubscriptionDbModel>> {
        self.repo.active_for_user(user_id).await
    }

    /// Every subscription, active or not, newest first.
    pub async fn list_for(&self, user_id: &str) -> Result<Vec<PushSubscriptionDbModel>> {
        self.repo.list_for_user(user_id).await
    }

    /// Active delivery targets grouped by user. Rows that no longer decode are
    /// skipped with a warning.
    pub async fn active_targets(
        &self,
        user_ids: &[String],
    ) -> Result<HashMap<String, Vec<PushTarget>>> {
        let rows = self.repo.active_for_users(user_ids).await?;
        let mut grouped: HashMap<String, Vec<PushTarget>> = HashMap::new();
        for row in rows {
            match row.subscription_kind() {
                Ok(kind) => grouped.entry(row.user_id.clone()).or_default().push(PushTarget {
                    subscription_id: row.id,
                    user_id: row.user_id,
                    kind,
                }),
                Err(e) => warn!(subscription_id = %row.id, error = %e, "Skipping malformed subscription"),
            }
        }
        debug!(users = grouped.len(), "Loaded active push targets");
        Ok(grouped)
    }

    /// Refresh `last_used` on subscriptions that just delivered.
    pub async fn mark_used(&self, subscription_ids: &[String]) -> Result<()> {
        if subscription_ids.is_empty() {
            return Ok(());
        }
        self.repo.touch(subscription_ids, now_ms()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Platform;

    #[test]
    fn test_validate_rejects_bad_descriptors() {
        let bad_url = DeviceDescriptor::new(SubscriptionKind::WebPush {
            endpoint: "not a url".into(),
            p256dh: "k".into(),
            auth: "a".into(),
        });
        assert!(matches!(validate(&bad_url), Err(Error::Validation(_))));

        let missing_keys = DeviceDescriptor::new(SubscriptionKind::WebPush {
            endpoint: "https://push.example.com/abc".into(),
            p256dh: "".into(),
            auth: "a".into(),
        });
        assert!(validate(&missing_keys).is_err());

        let empty_token = DeviceDescriptor::new(SubscriptionKind::Native {
            token: "  ".into(),
            platform: Platform::Android,
            environment: None,
        });
        assert!(validate(&empty_token).is_err());

        let ok = DeviceDescriptor::new(SubscriptionKind::Native {
            token: "abc".into(),
            platform: Platform::Ios,
            environment: None,
        });
        assert!(validate(&ok).is_ok());
    }
}
