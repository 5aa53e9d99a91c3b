//! Metrics collector implementation.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::{DeliveryStatus, Transport};

#[derive(Debug, Default)]
struct TransportAtomics {
    sent: AtomicU64,
    failed: AtomicU64,
    deactivated: AtomicU64,
}

/// Counters for notification delivery and the scheduler.
#[derive(Debug, Default)]
pub struct DeliveryMetrics {
    web_push: TransportAtomics,
    apns: TransportAtomics,
    fcm: TransportAtomics,
    skips: DashMap<DeliveryStatus, AtomicU64>,
    notifications_created: AtomicU64,
    reminder_ticks: AtomicU64,
    reminders_sent: AtomicU64,
    campaign_ticks: AtomicU64,
    campaign_runs: AtomicU64,
    campaign_failures: AtomicU64,
}

impl DeliveryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn transport(&self, transport: Transport) -> &TransportAtomics {
        match transport {
            Transport::WebPush => &self.web_push,
            Transport::Apns => &self.apns,
            Transport::Fcm => &self.fcm,
        }
    }

    pub fn record_transport_result(&self, transport: Transport, success: bool) {
        let counters = self.transport(transport);
        if success {
            counters.sent.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_deactivation(&self, transport: Transport) {
        self.transport(transport)
            .deactivated
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Count a skip outcome. Non-skip statuses are ignored.
    pub fn record_skip(&self, status: DeliveryStatus) {
        if !status.is_skip() {
            return;
        }
        self.skips
            .entry(status)
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification_created(&self) {
        self.notifications_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reminder_tick(&self, reminders_sent: u64) {
        self.reminder_ticks.fetch_add(1, Ordering::Relaxed);
        self.reminders_sent
            .fetch_add(reminders_sent, Ordering::Relaxed);
    }

    pub fn record_campaign_tick(&self) {
        self.campaign_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_campaign_run(&self, success: bool) {
        if success {
            self.campaign_runs.fetch_add(1, Ordering::Relaxed);
        } else {
            self.campaign_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> DeliveryMetricsSnapshot {
        let load = |c: &TransportAtomics| TransportCounters {
            sent: c.sent.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            deactivated: c.deactivated.load(Ordering::Relaxed),
        };

        DeliveryMetricsSnapshot {
            web_push: load(&self.web_push),
            apns: load(&self.apns),
            fcm: load(&self.fcm),
            skips: self
                .skips
                .iter()
                .map(|entry| (entry.key().to_string(), entry.value().load(Ordering::Relaxed)))
                .collect(),
            notifications_created: self.notifications_created.load(Ordering::Relaxed),
            reminder_ticks: self.reminder_ticks.load(Ordering::Relaxed),
            reminders_sent: self.reminders_sent.load(Ordering::Relaxed),
            campaign_ticks: self.campaign_ticks.load(Ordering::Relaxed),
            campaign_runs: self.campaign_runs.load(Ordering::Relaxed),
            campaign_failures: self.campaign_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TransportCounters {
    pub sent: u64,
    pub failed: u64,
    pub deactivated: u64,
}

/// Point-in-time copy of [`DeliveryMetrics`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct DeliveryMetricsSnapshot {
    pub web_push: TransportCounters,
    pub apns: TransportCounters,
    pub fcm: TransportCounters,
    pub skips: BTreeMap<String, u64>,
    pub notifications_created: u64,
    pub reminder_ticks: u64,
    pub reminders_sent: u64,
    pub campaign_ticks: u64,
    pub campaign_runs: u64,
    pub campaign_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let metrics = DeliveryMetrics::new();
        metrics.record_transport_result(Transport::Apns, true);
        metrics.record_transport_result(Transport::Apns, false);
        metrics.record_deactivation(Transport::WebPush);
        metrics.record_skip(DeliveryStatus::SkippedQuietHours);
        metrics.record_skip(DeliveryStatus::SkippedQuietHours);
        metrics.record_skip(DeliveryStatus::Sent);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.apns.sent, 1);
        assert_eq!(snapshot.apns.failed, 1);
        assert_eq!(snapshot.web_push.deactivated, 1);
        assert_eq!(snapshot.skips.get("skipped_quiet_hours"), Some(&2));
        assert_eq!(snapshot.skips.len(), 1);
    }
}
