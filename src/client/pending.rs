//! Operations issued while no live connection exists
//!
//! Three FIFO sequences, flushed through the backend right after a
//! successful handshake in the order unsubscriptions, subscriptions,
//! publications.

use crate::protocol::QoS;
use crate::transport::BrokerBackend;
use bytes::Bytes;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct PendingSubscription {
    pub filter: String,
    pub qos: QoS,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingPublication {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

/// Outcome of flushing one sequence
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub attempted: usize,
    pub failed: usize,
}

impl FlushReport {
    fn merge(self, other: FlushReport) -> FlushReport {
        FlushReport {
            attempted: self.attempted + other.attempted,
            failed: self.failed + other.failed,
        }
    }
}

#[derive(Debug, Default)]
pub struct PendingOperations {
    subscriptions: Vec<PendingSubscription>,
    unsubscriptions: Vec<String>,
    publications: Vec<PendingPublication>,
}

impl PendingOperations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_subscription(&mut self, filter: impl Into<String>, qos: QoS) {
        self.subscriptions.push(PendingSubscription {
            filter: filter.into(),
            qos,
        });
    }

    pub fn push_unsubscription(&mut self, filter: impl Into<String>) {
        self.unsubscriptions.push(filter.into());
    }

    pub fn push_publication(&mut self, topic: impl Into<String>, payload: Bytes, qos: QoS, retain: bool) {
        self.publications.push(PendingPublication {
            topic: topic.into(),
            payload,
            qos,
            retain,
        });
    }

    pub fn subscriptions(&self) -> &[PendingSubscription] {
        &self.subscriptions
    }

    /// True when a subscription to `filter` is already waiting
    pub fn has_subscription(&self, filter: &str) -> bool {
        self.subscriptions.iter().any(|pending| pending.filter == filter)
    }

    pub fn unsubscriptions(&self) -> &[String] {
        &self.unsubscriptions
    }

    pub fn publications(&self) -> &[PendingPublication] {
        &self.publications
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len() + self.unsubscriptions.len() + self.publications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.subscriptions.clear();
        self.unsubscriptions.clear();
        self.publications.clear();
    }

    pub fn flush_unsubscriptions(&mut self, backend: &mut dyn BrokerBackend) -> FlushReport {
        let mut report = FlushReport::default();
        for filter in self.unsubscriptions.drain(..) {
            report.attempted += 1;
            if let Err(e) = backend.unsubscribe(std::slice::from_ref(&filter)) {
                report.failed += 1;
                warn!(filter = %filter, error = %e, "Failed to flush pending unsubscription");
            }
        }
        report
    }

    pub fn flush_subscriptions(&mut self, backend: &mut dyn BrokerBackend) -> FlushReport {
        let mut report = FlushReport::default();
        for PendingSubscription { filter, qos } in self.subscriptions.drain(..) {
            report.attempted += 1;
            if let Err(e) = backend.subscribe(std::slice::from_ref(&filter), &[qos]) {
                report.failed += 1;
                warn!(filter = %filter, error = %e, "Failed to flush pending subscription");
            }
        }
        report
    }

    pub fn flush_publications(&mut self, backend: &mut dyn BrokerBackend) -> FlushReport {
        let mut report = FlushReport::default();
        for publication in self.publications.drain(..) {
            report.attempted += 1;
            if let Err(e) = backend.publish(
                &publication.topic,
                publication.payload,
                publication.qos,
                publication.retain,
            ) {
                report.failed += 1;
                warn!(topic = %publication.topic, error = %e, "Failed to flush pending publication");
            }
        }
        report
    }

    /// Flush every sequence in order: unsubscriptions, subscriptions, publications
    pub fn flush_all(&mut self, backend: &mut dyn BrokerBackend) -> FlushReport {
        let unsubscriptions = self.flush_unsubscriptions(backend);
        let subscriptions = self.flush_subscriptions(backend);
        let publications = self.flush_publications(backend);

        let total = unsubscriptions.merge(subscriptions).merge(publications);
        if total.attempted > 0 {
            debug!(
                unsubscriptions = unsubscriptions.attempted,
                subscriptions = subscriptions.attempted,
                publications = publications.attempted,
                failed = total.failed,
                "Flushed pending operations"
            );
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::{BackendCall, MockBackend};

    #[test]
    fn test_flush_order_and_fifo() {
        // Arrange
        let mut pending = PendingOperations::new();
        pending.push_publication("out/1", Bytes::from_static(b"p1"), QoS::AtLeastOnce, false);
        pending.push_subscription("a/#", QoS::ExactlyOnce);
        pending.push_unsubscription("old/1");
        pending.push_subscription("b/+", QoS::AtMostOnce);
        pending.push_publication("out/2", Bytes::from_static(b"p2"), QoS::ExactlyOnce, true);
        pending.push_unsubscription("old/2");
        assert_eq!(pending.len(), 6);

        let mut backend = MockBackend::connected();

        // Act
        let report = pending.flush_all(&mut backend);

        // Assert
        assert_eq!(report, FlushReport { attempted: 6, failed: 0 });
        assert!(pending.is_empty());
        assert_eq!(
            backend.calls(),
            vec![
                BackendCall::Unsubscribe(vec!["old/1".to_string()]),
                BackendCall::Unsubscribe(vec!["old/2".to_string()]),
                BackendCall::Subscribe(vec![("a/#".to_string(), QoS::ExactlyOnce)]),
                BackendCall::Subscribe(vec![("b/+".to_string(), QoS::AtMostOnce)]),
                BackendCall::Publish {
                    topic: "out/1".to_string(),
                    payload: Bytes::from_static(b"p1"),
                    qos: QoS::AtLeastOnce,
                    retain: false,
                },
                BackendCall::Publish {
                    topic: "out/2".to_string(),
                    payload: Bytes::from_static(b"p2"),
                    qos: QoS::ExactlyOnce,
                    retain: true,
                },
            ]
        );
    }

    #[test]
    fn test_flush_continues_after_failures() {
        let mut pending = PendingOperations::new();
        pending.push_publication("t/1", Bytes::new(), QoS::AtMostOnce, false);
        pending.push_publication("t/2", Bytes::new(), QoS::AtMostOnce, false);
        pending.push_publication("t/3", Bytes::new(), QoS::AtMostOnce, false);

        let mut backend = MockBackend::connected();
        backend.handle().fail_operations(true);

        let report = pending.flush_publications(&mut backend);

        assert_eq!(report, FlushReport { attempted: 3, failed: 3 });
        assert!(pending.publications().is_empty());
        assert_eq!(backend.calls().len(), 3);
    }

    #[test]
    fn test_each_entry_is_flushed_once() {
        let mut pending = PendingOperations::new();
        pending.push_subscription("x", QoS::ExactlyOnce);

        let mut backend = MockBackend::connected();
        pending.flush_all(&mut backend);
        let second = pending.flush_all(&mut backend);

        assert_eq!(second, FlushReport::default());
        assert_eq!(backend.calls().len(), 1);
    }

    #[test]
    fn test_clear() {
        let mut pending = PendingOperations::new();
        pending.push_subscription("x", QoS::ExactlyOnce);
        pending.push_unsubscription("y");
        pending.push_publication("z", Bytes::new(), QoS::ExactlyOnce, false);

        pending.clear();

        assert!(pending.is_empty());
        assert!(pending.subscriptions().is_empty());
        assert!(pending.unsubscriptions().is_empty());
    }
}
