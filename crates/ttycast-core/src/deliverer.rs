//! Drains the broadcast queue into the observer registry.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::message::BroadcastMessage;
use crate::observer::Observer;
use crate::queue::QueueReceiver;
use crate::registry::{DeliveryReport, ObserverRegistry};

/// Deliver every queued message, in order, until all producers are gone.
///
/// This is the queue's only consumer and the only place that writes to
/// observers. There is no per-observer timeout: an observer whose writes hang
/// holds up the current pass, and once the queue fills, the output tap.
pub async fn run<C: Observer>(mut queue: QueueReceiver, registry: Arc<ObserverRegistry<C>>) {
    while let Some(message) = queue.next().await {
        deliver(&registry, &message).await;
    }
    debug!("broadcast queue closed, deliverer exiting");
}

/// One delivery pass, with failures logged.
pub async fn deliver<C: Observer>(
    registry: &ObserverRegistry<C>,
    message: &BroadcastMessage,
) -> DeliveryReport {
    let report = registry.broadcast(message).await;

    for (id, error) in &report.dropped {
        if error.is_normal_closure() {
            debug!(%id, "observer disconnected");
        } else {
            warn!(%id, error = %error, "error writing to observer, dropping it");
        }
    }
    trace!(
        delivered = report.delivered,
        dropped = report.dropped.len(),
        "delivery pass complete"
    );

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escape::CLEAR_SCREEN;
    use crate::geometry::TermSize;
    use crate::message::Frame;
    use crate::queue;
    use crate::testing::MockObserver;
    use std::time::Duration;
    use tokio::sync::Semaphore;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_late_joiner_gets_only_live_tail() {
        let (tx, mut rx) = queue::channel(16);
        let registry = ObserverRegistry::new();

        let (a, seen_a) = MockObserver::healthy();
        registry.add(a).await.unwrap();
        tx.enqueue(BroadcastMessage::output(b"hello\n")).await.unwrap();
        deliver(&registry, &rx.next().await.unwrap()).await;

        let (b, seen_b) = MockObserver::healthy();
        registry.add(b).await.unwrap();
        tx.enqueue(BroadcastMessage::output(b"world\n")).await.unwrap();
        deliver(&registry, &rx.next().await.unwrap()).await;

        assert_eq!(seen_a.bytes(), b"hello\nworld\n");
        assert_eq!(seen_a.frames().len(), 2);
        assert_eq!(seen_b.bytes(), b"world\n");
    }

    #[tokio::test]
    async fn test_run_preserves_order_for_every_observer() {
        let (tx, rx) = queue::channel(4);
        let registry = Arc::new(ObserverRegistry::new());
        let (a, seen_a) = MockObserver::healthy();
        let (b, seen_b) = MockObserver::healthy();
        registry.add(a).await.unwrap();
        registry.add(b).await.unwrap();

        let deliverer = tokio::spawn(run(rx, registry.clone()));
        let mut expected = Vec::new();
        for i in 0..100 {
            let chunk = format!("chunk {i}\r\n");
            expected.extend_from_slice(chunk.as_bytes());
            tx.enqueue(BroadcastMessage::output(chunk.as_bytes()))
                .await
                .unwrap();
        }
        drop(tx);
        timeout(Duration::from_secs(5), deliverer)
            .await
            .expect("deliverer should finish once the queue closes")
            .unwrap();

        assert_eq!(seen_a.bytes(), expected);
        assert_eq!(seen_b.bytes(), expected);
    }

    #[tokio::test]
    async fn test_dropping_one_observer_leaves_others_intact() {
        let (tx, rx) = queue::channel(16);
        let registry = Arc::new(ObserverRegistry::new());
        let (a, seen_a) = MockObserver::healthy();
        let (flaky, seen_flaky) = MockObserver::failing_after(2);
        let (c, seen_c) = MockObserver::healthy();
        registry.add(a).await.unwrap();
        registry.add(flaky).await.unwrap();
        registry.add(c).await.unwrap();

        let deliverer = tokio::spawn(run(rx, registry.clone()));
        for chunk in [&b"1"[..], b"2", b"3", b"4"] {
            tx.enqueue(BroadcastMessage::output(chunk)).await.unwrap();
        }
        drop(tx);
        deliverer.await.unwrap();

        assert_eq!(seen_a.bytes(), b"1234");
        assert_eq!(seen_c.bytes(), b"1234");
        assert_eq!(seen_flaky.bytes(), b"12");
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_resync_lands_between_surrounding_output() {
        let (tx, rx) = queue::channel(16);
        let registry = Arc::new(ObserverRegistry::new());
        let (a, seen) = MockObserver::healthy();
        registry.add(a).await.unwrap();

        let size = TermSize { cols: 90, rows: 20 };
        tx.enqueue(BroadcastMessage::output(b"before")).await.unwrap();
        tx.enqueue(BroadcastMessage::Resync(size)).await.unwrap();
        tx.enqueue(BroadcastMessage::output(b"after")).await.unwrap();
        drop(tx);
        run(rx, registry).await;

        assert_eq!(
            seen.frames(),
            vec![
                Frame::Text("before".into()),
                Frame::Text(CLEAR_SCREEN.into()),
                Frame::Text("\x1b[8;20;90t".into()),
                Frame::Text("after".into()),
            ]
        );
    }

    /// A hung observer stalls the whole pipeline: the deliverer is stuck in
    /// its pass, the queue fills, and producers block. Releasing the observer
    /// drains everything in order.
    #[tokio::test]
    async fn test_hung_observer_backpressures_producer() {
        let (tx, rx) = queue::channel(2);
        let registry = Arc::new(ObserverRegistry::new());
        let gate = Arc::new(Semaphore::new(0));
        let (slow, seen_slow) = MockObserver::gated(gate.clone());
        let (fast, seen_fast) = MockObserver::healthy();
        registry.add(slow).await.unwrap();
        registry.add(fast).await.unwrap();

        let deliverer = tokio::spawn(run(rx, registry.clone()));

        // First message is taken by the deliverer and hangs on `slow`; the
        // next two fill the queue.
        for chunk in [&b"a"[..], b"b", b"c"] {
            tx.enqueue(BroadcastMessage::output(chunk)).await.unwrap();
        }
        let blocked = timeout(
            Duration::from_millis(100),
            tx.enqueue(BroadcastMessage::output(b"d")),
        )
        .await;
        assert!(blocked.is_err(), "producer should block behind a hung observer");
        // The observer after the hung one has not seen the first message yet.
        assert!(seen_fast.frames().is_empty());

        gate.add_permits(16);
        tx.enqueue(BroadcastMessage::output(b"d")).await.unwrap();
        drop(tx);
        timeout(Duration::from_secs(5), deliverer)
            .await
            .expect("pipeline should drain once the observer recovers")
            .unwrap();

        assert_eq!(seen_slow.bytes(), b"abcd");
        assert_eq!(seen_fast.bytes(), b"abcd");
    }
}
