use dashmap::DashMap;
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

pub type RawListener = Box<dyn Fn(Arc<Value>) + Send + Sync + 'static>;

struct Subscriber {
    id: u64,
    tx: mpsc::UnboundedSender<Arc<Value>>,
}

// One unbounded FIFO and one draining task per subscriber
#[derive(Default)]
pub struct ChangeBroadcaster {
    next_id: AtomicU64,
    topics: DashMap<String, Vec<Subscriber>>,
}

impl ChangeBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` for values published under `key` and returns its id.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe(&self, key: &str, listener: RawListener) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = mpsc::unbounded_channel::<Arc<Value>>();
        let topic = key.to_string();

        tokio::spawn(async move {
            while let Some(value) = rx.recv().await {
                if catch_unwind(AssertUnwindSafe(|| listener(value))).is_err() {
                    log::error!("Listener {} on slot '{}' panicked; continuing delivery", id, topic);
                }
            }
            log::debug!("Listener {} on slot '{}' detached", id, topic);
        });

        self.topics
            .entry(key.to_string())
            .or_default()
            .push(Subscriber { id, tx });
        log::debug!("Listener {} subscribed to slot '{}'", id, key);
        id
    }

    pub fn unsubscribe(&self, key: &str, id: u64) {
        if let Some(mut subscribers) = self.topics.get_mut(key) {
            // Dropping the sender ends the delivery task once queued values are drained
            subscribers.retain(|s| s.id != id);
        }
    }

    /// Queues `value` for every subscriber of `key`.
    pub fn publish(&self, key: &str, value: Arc<Value>) {
        if let Some(mut subscribers) = self.topics.get_mut(key) {
            subscribers.retain(|s| s.tx.send(Arc::clone(&value)).is_ok());
        }
    }

    pub fn subscriber_count(&self, key: &str) -> usize {
        self.topics.get(key).map(|s| s.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn forward(tx: mpsc::UnboundedSender<Value>) -> RawListener {
        Box::new(move |value| {
            let _ = tx.send((*value).clone());
        })
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<Value>) -> Value {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for notification")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn delivers_in_publish_order() {
        let broadcaster = ChangeBroadcaster::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        broadcaster.subscribe("k", forward(tx));

        for i in 0..20 {
            broadcaster.publish("k", Arc::new(json!(i)));
        }
        for i in 0..20 {
            assert_eq!(recv(&mut rx).await, json!(i));
        }
    }

    #[tokio::test]
    async fn panicking_listener_does_not_block_others() {
        let broadcaster = ChangeBroadcaster::new();
        broadcaster.subscribe("k", Box::new(|_| panic!("listener bug")));
        let (tx, mut rx) = mpsc::unbounded_channel();
        broadcaster.subscribe("k", forward(tx));

        broadcaster.publish("k", Arc::new(json!("a")));
        broadcaster.publish("k", Arc::new(json!("b")));
        assert_eq!(recv(&mut rx).await, json!("a"));
        assert_eq!(recv(&mut rx).await, json!("b"));
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let broadcaster = ChangeBroadcaster::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = broadcaster.subscribe("k", forward(tx));
        broadcaster.unsubscribe("k", id);
        assert_eq!(broadcaster.subscriber_count("k"), 0);

        broadcaster.publish("k", Arc::new(json!(1)));
        // The listener (and its sender) are dropped, so the channel closes without a value
        let next = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn topics_are_independent() {
        let broadcaster = ChangeBroadcaster::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        broadcaster.subscribe("a", forward(tx));

        broadcaster.publish("b", Arc::new(json!("other")));
        broadcaster.publish("a", Arc::new(json!("mine")));
        assert_eq!(recv(&mut rx).await, json!("mine"));
    }
}
