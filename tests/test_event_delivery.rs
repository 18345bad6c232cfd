//! Inbound delivery through the event queue and subscription registry
//!
//! Messages appended by any producer must reach the control loop exactly
//! once, in arrival order, however appends and drains interleave.

use brokerlink::client::{Callback, EventQueue, SubscriptionRegistry};
use brokerlink::observability::ClientMetrics;
use brokerlink::protocol::{InboundMessage, QoS};
use proptest::prelude::*;
use std::sync::{Arc, Mutex};
use std::thread;

#[derive(Debug, Clone)]
enum Step {
    Append(u8),
    Drain,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => (1u8..8).prop_map(Step::Append),
        1 => Just(Step::Drain),
    ]
}

proptest! {
    #[test]
    fn prop_interleaved_appends_and_drains_deliver_in_order(
        steps in proptest::collection::vec(step(), 1..40)
    ) {
        let mut queue = EventQueue::unbounded();
        let sink = queue.sink();
        let mut next = 0u32;
        let mut delivered = Vec::new();

        for step in steps {
            match step {
                Step::Append(count) => {
                    for _ in 0..count {
                        let accepted = sink.on_message(InboundMessage::new(
                            format!("seq/{next}"),
                            next.to_be_bytes().to_vec(),
                        ));
                        prop_assert!(accepted);
                        next += 1;
                    }
                }
                Step::Drain => {
                    queue.drain_tick(|message| delivered.push(message.topic.clone()));
                }
            }
        }
        queue.drain_tick(|message| delivered.push(message.topic.clone()));

        let expected: Vec<_> = (0..next).map(|n| format!("seq/{n}")).collect();
        prop_assert_eq!(delivered, expected);
        prop_assert_eq!(queue.pending_len(), 0);
    }

    #[test]
    fn prop_bounded_queue_never_exceeds_capacity(
        capacity in 1usize..16,
        appended in 0usize..64,
    ) {
        let metrics = Arc::new(ClientMetrics::new());
        let mut queue = EventQueue::new(capacity, metrics.clone());
        let sink = queue.sink();

        let accepted = (0..appended)
            .filter(|n| sink.on_message(InboundMessage::new("t", n.to_string())))
            .count();
        let drained = queue.drain_tick(|_| {});

        prop_assert_eq!(accepted, appended.min(capacity));
        prop_assert_eq!(drained, accepted);
        let snapshot = metrics.snapshot();
        prop_assert_eq!(snapshot.messages_received as usize, accepted);
        prop_assert_eq!(snapshot.messages_dropped as usize, appended - accepted);
    }
}

#[test]
fn test_concurrent_producers_are_delivered_exactly_once() {
    // Arrange
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: usize = 500;

    let mut queue = EventQueue::unbounded();
    let mut registry = SubscriptionRegistry::new();
    let seen: Arc<Mutex<Vec<(usize, usize)>>> = Arc::default();
    let record = seen.clone();
    registry.subscribe(
        "producer/+",
        QoS::AtMostOnce,
        Callback::new(move |topic, payload| {
            let producer = topic.trim_start_matches("producer/").parse().unwrap();
            let n = String::from_utf8_lossy(payload).parse().unwrap();
            record.lock().unwrap().push((producer, n));
        }),
    );

    // Act
    let handles: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let sink = queue.sink();
            thread::spawn(move || {
                for n in 0..PER_PRODUCER {
                    assert!(sink.on_message(InboundMessage::new(
                        format!("producer/{producer}"),
                        n.to_string(),
                    )));
                }
            })
        })
        .collect();

    let mut total = 0;
    while handles.iter().any(|h| !h.is_finished()) {
        total += queue.drain_tick(|message| {
            registry.dispatch(message);
        });
    }
    for handle in handles {
        handle.join().unwrap();
    }
    total += queue.drain_tick(|message| {
        registry.dispatch(message);
    });

    // Assert
    assert_eq!(total, PRODUCERS * PER_PRODUCER);
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), PRODUCERS * PER_PRODUCER);
    for producer in 0..PRODUCERS {
        let order: Vec<_> = seen
            .iter()
            .filter(|(p, _)| *p == producer)
            .map(|(_, n)| *n)
            .collect();
        assert_eq!(order, (0..PER_PRODUCER).collect::<Vec<_>>());
    }
}

#[test]
fn test_clear_retires_sinks_from_previous_session() {
    let mut queue = EventQueue::unbounded();
    let old = queue.sink();
    assert!(old.on_message(InboundMessage::new("a", "before")));
    old.on_connection_closed();

    queue.clear();

    assert!(!old.is_active());
    assert!(!old.on_message(InboundMessage::new("a", "after")));
    old.on_connection_closed();
    assert!(!queue.take_unexpected_close());
    assert_eq!(queue.drain_tick(|_| panic!("stale message delivered")), 0);

    let fresh = queue.sink();
    assert!(fresh.on_message(InboundMessage::new("a", "fresh")));
    assert_eq!(queue.drain_tick(|_| {}), 1);
}

#[test]
fn test_message_matching_several_filters_reaches_each_once() {
    let mut registry = SubscriptionRegistry::new();
    let hits: Arc<Mutex<Vec<&'static str>>> = Arc::default();

    for (filter, name) in [("home/#", "hash"), ("home/+/temp", "plus"), ("home/kitchen/temp", "exact"), ("garden/#", "other")] {
        let hits = hits.clone();
        registry.subscribe(
            filter,
            QoS::AtLeastOnce,
            Callback::new(move |_, _| hits.lock().unwrap().push(name)),
        );
    }

    let report = registry.dispatch(&InboundMessage::new("home/kitchen/temp", "21"));

    assert_eq!(report.matched_filters, 3);
    assert_eq!(report.invoked, 3);
    assert_eq!(report.failed, 0);
    let mut hits = hits.lock().unwrap().clone();
    hits.sort_unstable();
    assert_eq!(hits, vec!["exact", "hash", "plus"]);
}
