//! Notification Dispatch
//!
//! Fans a [`Notification`] out to one client's devices or to every registered
//! device. Device lists are snapshotted from the registry first; the sends
//! themselves run concurrently with no registry lock held, and one device
//! failing never affects another.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;

use crate::connection::Connection;
use crate::error::{HubError, HubResult};
use crate::messages::Notification;
use crate::registry::ConnectionRegistry;

/// Per-call delivery counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Devices considered
    pub total: usize,
    /// Devices that accepted the notification
    pub delivered: usize,
    /// Active devices whose send failed
    pub failed: usize,
    /// Devices skipped because no stream was attached
    pub inactive: usize,
}

impl DispatchReport {
    /// Whether no device received the notification
    #[must_use]
    pub fn none_delivered(&self) -> bool {
        self.delivered == 0
    }

    fn record(&mut self, outcome: DeviceOutcome) {
        self.total += 1;
        match outcome {
            DeviceOutcome::Delivered => self.delivered += 1,
            DeviceOutcome::Inactive => self.inactive += 1,
            DeviceOutcome::Failed => self.failed += 1,
        }
    }
}

/// Cumulative dispatcher counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchCounters {
    /// Dispatch calls (targeted and broadcast)
    pub dispatches: u64,
    /// Successful per-device deliveries
    pub delivered: u64,
    /// Failed per-device sends
    pub failed: u64,
}

#[derive(Debug, Default)]
struct DispatchStats {
    dispatches: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl DispatchStats {
    fn record(&self, report: &DispatchReport) {
        self.dispatches.fetch_add(1, Ordering::Relaxed);
        self.delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.failed.fetch_add(report.failed as u64, Ordering::Relaxed);
    }

    fn snapshot(&self) -> DispatchCounters {
        DispatchCounters {
            dispatches: self.dispatches.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeviceOutcome {
    Delivered,
    Failed,
    Inactive,
}

/// Sends notifications through the registry's attached streams
#[derive(Clone, Debug)]
pub struct NotificationDispatcher {
    registry: ConnectionRegistry,
    stats: Arc<DispatchStats>,
}

impl NotificationDispatcher {
    /// Create a dispatcher over `registry`
    #[must_use]
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self {
            registry,
            stats: Arc::new(DispatchStats::default()),
        }
    }

    /// The registry this dispatcher reads from
    #[must_use]
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Cumulative counters since creation
    #[must_use]
    pub fn stats(&self) -> DispatchCounters {
        self.stats.snapshot()
    }

    /// Deliver a notification to every active device of its target client
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Delivery`] if no device received it: the client is
    /// unknown, has no active devices, or every send failed.
    pub async fn send_to_client(&self, notification: &Notification) -> HubResult<DispatchReport> {
        let client_id = notification.client_id.as_str();
        let devices = self.registry.devices_of(client_id).unwrap_or_default();

        let report = deliver_all(devices.iter().map(|c| (c, notification))).await;
        self.stats.record(&report);

        if report.none_delivered() {
            tracing::warn!(
                client_id,
                notification_id = %notification.id,
                total = report.total,
                failed = report.failed,
                inactive = report.inactive,
                "Notification reached no device"
            );
            return Err(HubError::Delivery {
                client_id: client_id.to_string(),
                attempted: report.total,
            });
        }

        tracing::info!(
            client_id,
            notification_id = %notification.id,
            delivered = report.delivered,
            total = report.total,
            "Notification sent"
        );
        Ok(report)
    }

    /// Deliver a notification to every active device of every client
    ///
    /// Each device receives a copy addressed to its own client. Never fails;
    /// an empty registry yields an all-zero report.
    pub async fn broadcast(&self, notification: &Notification) -> DispatchReport {
        let addressed: Vec<(Arc<Connection>, Notification)> = self
            .registry
            .client_ids()
            .into_iter()
            .filter_map(|client_id| {
                let devices = self.registry.devices_of(&client_id).ok()?;
                let copy = notification.for_client(&client_id);
                Some(devices.into_iter().map(move |c| (c, copy.clone())))
            })
            .flatten()
            .collect();

        let report = deliver_all(addressed.iter().map(|(c, n)| (c, n))).await;
        self.stats.record(&report);

        tracing::info!(
            notification_id = %notification.id,
            delivered = report.delivered,
            failed = report.failed,
            inactive = report.inactive,
            total = report.total,
            "Broadcast complete"
        );
        report
    }
}

async fn deliver_all<'a, I>(targets: I) -> DispatchReport
where
    I: IntoIterator<Item = (&'a Arc<Connection>, &'a Notification)>,
{
    let outcomes = join_all(targets.into_iter().map(|(c, n)| deliver(c, n))).await;

    let mut report = DispatchReport::default();
    for outcome in outcomes {
        report.record(outcome);
    }
    report
}

async fn deliver(connection: &Connection, notification: &Notification) -> DeviceOutcome {
    let Some(sink) = connection.sink() else {
        return DeviceOutcome::Inactive;
    };

    match sink.send(notification.to_outbound(connection.unique_id())).await {
        Ok(()) => {
            connection.record_delivery();
            DeviceOutcome::Delivered
        }
        Err(e) => {
            tracing::warn!(
                connection_id = %connection.unique_id(),
                error = %e,
                "Failed to deliver notification"
            );
            DeviceOutcome::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::RecordingSink;
    use pretty_assertions::assert_eq;

    fn setup() -> (ConnectionRegistry, NotificationDispatcher) {
        let registry = ConnectionRegistry::new();
        let dispatcher = NotificationDispatcher::new(registry.clone());
        (registry, dispatcher)
    }

    #[tokio::test]
    async fn test_send_to_unknown_client() {
        let (_registry, dispatcher) = setup();
        let err = dispatcher
            .send_to_client(&Notification::new("ghost", "t", "m", "svc"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            HubError::Delivery {
                client_id: "ghost".into(),
                attempted: 0
            }
        );
    }

    #[tokio::test]
    async fn test_send_skips_inactive_devices() {
        let (registry, dispatcher) = setup();
        registry.register("alice", "phone", "push").unwrap();
        registry.register("alice", "laptop", "push").unwrap();
        let sink = RecordingSink::new();
        registry.attach_stream("alice", "phone", sink.clone()).unwrap();

        let report = dispatcher
            .send_to_client(&Notification::new("alice", "Hello", "Test", "svc"))
            .await
            .unwrap();

        assert_eq!(report.total, 2);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.inactive, 1);
        assert_eq!(sink.notification_count(), 1);
        assert_eq!(sink.sent()[0].connection_id, "alice_phone");

        let phone = registry.lookup("alice", "phone").unwrap();
        let laptop = registry.lookup("alice", "laptop").unwrap();
        assert_eq!(phone.notification_count(), 1);
        assert!(phone.last_notification_at().is_some());
        assert_eq!(laptop.notification_count(), 0);
    }

    #[tokio::test]
    async fn test_send_all_inactive_is_delivery_error() {
        let (registry, dispatcher) = setup();
        registry.register("bob", "tablet", "push").unwrap();

        let err = dispatcher
            .send_to_client(&Notification::new("bob", "t", "m", "svc"))
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::Delivery { attempted: 1, .. }));
    }

    #[tokio::test]
    async fn test_failing_device_is_isolated() {
        let (registry, dispatcher) = setup();
        registry.register("alice", "phone", "push").unwrap();
        registry.register("alice", "laptop", "push").unwrap();
        let good = RecordingSink::new();
        registry.attach_stream("alice", "phone", good.clone()).unwrap();
        registry
            .attach_stream("alice", "laptop", RecordingSink::failing())
            .unwrap();

        let report = dispatcher
            .send_to_client(&Notification::new("alice", "t", "m", "svc"))
            .await
            .unwrap();

        assert_eq!(
            report,
            DispatchReport {
                total: 2,
                delivered: 1,
                failed: 1,
                inactive: 0,
            }
        );
        assert_eq!(good.notification_count(), 1);
        assert_eq!(
            registry.lookup("alice", "laptop").unwrap().notification_count(),
            0
        );
    }

    #[tokio::test]
    async fn test_broadcast_rewrites_client() {
        let (registry, dispatcher) = setup();
        registry.register("c1", "d1", "svc").unwrap();
        registry.register("c2", "d1", "svc").unwrap();
        registry.register("c2", "d2", "svc").unwrap();
        let s1 = RecordingSink::new();
        let s2 = RecordingSink::new();
        registry.attach_stream("c1", "d1", s1.clone()).unwrap();
        registry.attach_stream("c2", "d1", s2.clone()).unwrap();

        let report = dispatcher
            .broadcast(&Notification::broadcast("Maintenance", "Tonight", "ops"))
            .await;

        assert_eq!(report.total, 3);
        assert_eq!(report.delivered, 2);
        assert_eq!(report.inactive, 1);
        assert_eq!(s1.sent()[0].connection_id, "c1_d1");
        assert_eq!(s2.sent()[0].connection_id, "c2_d1");
    }

    #[tokio::test]
    async fn test_broadcast_empty_registry() {
        let (_registry, dispatcher) = setup();
        let report = dispatcher
            .broadcast(&Notification::broadcast("t", "m", "svc"))
            .await;
        assert_eq!(report, DispatchReport::default());
    }

    #[tokio::test]
    async fn test_counters_accumulate() {
        let (registry, dispatcher) = setup();
        registry.register("alice", "phone", "push").unwrap();
        registry
            .attach_stream("alice", "phone", RecordingSink::new())
            .unwrap();

        let n = Notification::new("alice", "t", "m", "svc");
        dispatcher.send_to_client(&n).await.unwrap();
        dispatcher.send_to_client(&n).await.unwrap();
        let _ = dispatcher.send_to_client(&n.for_client("ghost")).await;

        assert_eq!(
            dispatcher.stats(),
            DispatchCounters {
                dispatches: 3,
                delivered: 2,
                failed: 0
            }
        );
    }
}
