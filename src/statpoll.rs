//! Periodic statistics broadcast to monitoring clients.
//!
//! Every tick the poller serializes one snapshot and writes it to all
//! subscribers concurrently. Each write is bounded by a timeout; a
//! subscriber whose write fails or times out is dropped and closed while
//! the others keep receiving.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{BridgeError, OutputError};

/// A monitoring connection.
#[async_trait]
pub trait StatSink: Send + Sync {
    /// Name for logs.
    fn name(&self) -> &str;

    /// Runs once before the sink is added. An error keeps it out.
    async fn handshake(&self) -> Result<(), OutputError> {
        Ok(())
    }

    /// Writes one serialized snapshot.
    async fn send(&self, message: &str) -> Result<(), OutputError>;

    /// Closes the connection. Called once, when the sink is removed.
    async fn close(&self) {}
}

/// Produces the snapshot pushed on every tick.
pub trait StatsSource: Send + Sync {
    /// Current statistics.
    fn snapshot(&self) -> serde_json::Value;
}

impl<F> StatsSource for F
where
    F: Fn() -> serde_json::Value + Send + Sync,
{
    fn snapshot(&self) -> serde_json::Value {
        self()
    }
}

/// Stat sink forwarding messages into an mpsc channel.
pub struct ChannelStatSink {
    name: String,
    sender: Mutex<Option<mpsc::Sender<String>>>,
}

impl ChannelStatSink {
    /// Creates a sink named `name`.
    pub fn new(name: impl Into<String>, sender: mpsc::Sender<String>) -> Self {
        Self {
            name: name.into(),
            sender: Mutex::new(Some(sender)),
        }
    }
}

#[async_trait]
impl StatSink for ChannelStatSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handshake(&self) -> Result<(), OutputError> {
        match self.sender.lock().as_ref() {
            Some(sender) if !sender.is_closed() => Ok(()),
            _ => Err(OutputError::ChannelClosed),
        }
    }

    async fn send(&self, message: &str) -> Result<(), OutputError> {
        let sender = self.sender.lock().clone().ok_or(OutputError::Stopped)?;
        sender
            .send(message.to_string())
            .await
            .map_err(|_| OutputError::ChannelClosed)
    }

    async fn close(&self) {
        self.sender.lock().take();
    }
}

/// Identifies a subscriber for [`StatPoller::remove_subscriber`].
pub type SubscriberId = u64;

struct Subscriber {
    id: SubscriberId,
    sink: Arc<dyn StatSink>,
}

struct PollerShared {
    source: Arc<dyn StatsSource>,
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
    write_timeout: Duration,
}

impl PollerShared {
    async fn tick(&self) -> usize {
        let targets: Vec<(SubscriberId, Arc<dyn StatSink>)> = self
            .subscribers
            .lock()
            .iter()
            .map(|s| (s.id, s.sink.clone()))
            .collect();
        if targets.is_empty() {
            return 0;
        }

        let message = self.source.snapshot().to_string();
        let writes = targets.iter().map(|(id, sink)| {
            let message = message.as_str();
            async move {
                let result = match tokio::time::timeout(self.write_timeout, sink.send(message)).await {
                    Ok(result) => result,
                    Err(_) => Err(OutputError::write_failed("write timed out")),
                };
                (*id, result)
            }
        });

        let mut delivered = 0;
        let mut failed = Vec::new();
        for (id, result) in join_all(writes).await {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => failed.push((id, e)),
            }
        }

        for (id, error) in failed {
            if let Some(sink) = self.take(id) {
                tracing::warn!(subscriber = sink.name(), "dropping stat subscriber: {error}");
                sink.close().await;
            }
        }
        delivered
    }

    fn take(&self, id: SubscriberId) -> Option<Arc<dyn StatSink>> {
        let mut subscribers = self.subscribers.lock();
        let index = subscribers.iter().position(|s| s.id == id)?;
        Some(subscribers.remove(index).sink)
    }
}

/// Broadcasts statistics to monitoring subscribers on a fixed interval.
pub struct StatPoller {
    shared: Arc<PollerShared>,
    interval: Duration,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StatPoller {
    /// Creates a stopped poller.
    pub fn new(source: Arc<dyn StatsSource>, interval: Duration, write_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(PollerShared {
                source,
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                write_timeout,
            }),
            interval,
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Starts ticking. Does nothing if already running or stopped.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() || self.cancel.is_cancelled() {
            return;
        }
        let shared = self.shared.clone();
        let cancel = self.cancel.clone();
        let period = self.interval;
        *task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        shared.tick().await;
                    }
                }
            }
        }));
    }

    /// Adds a subscriber after its handshake succeeds.
    ///
    /// # Errors
    ///
    /// A backend error if the handshake fails or times out; the sink is
    /// not added.
    pub async fn add_subscriber(&self, sink: Arc<dyn StatSink>) -> Result<SubscriberId, BridgeError> {
        match tokio::time::timeout(self.shared.write_timeout, sink.handshake()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(BridgeError::backend("stat poller", format!("{}: {e}", sink.name()))),
            Err(_) => {
                return Err(BridgeError::backend(
                    "stat poller",
                    format!("{}: handshake timed out", sink.name()),
                ))
            }
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::info!(subscriber = sink.name(), id, "stat subscriber added");
        self.shared.subscribers.lock().push(Subscriber { id, sink });
        Ok(id)
    }

    /// Removes and closes a subscriber. Returns `false` for an unknown id.
    pub async fn remove_subscriber(&self, id: SubscriberId) -> bool {
        match self.shared.take(id) {
            Some(sink) => {
                sink.close().await;
                true
            }
            None => false,
        }
    }

    /// Subscribers currently registered.
    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.lock().len()
    }

    /// Runs one tick now. Returns how many subscribers were written.
    pub async fn tick(&self) -> usize {
        self.shared.tick().await
    }

    /// Stops ticking and closes every subscriber.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        let subscribers: Vec<Subscriber> = std::mem::take(&mut *self.shared.subscribers.lock());
        for subscriber in subscribers {
            subscriber.sink.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn poller(write_timeout: Duration) -> StatPoller {
        let source: Arc<dyn StatsSource> = Arc::new(|| json!({"buffers": 3}));
        StatPoller::new(source, Duration::from_secs(1), write_timeout)
    }

    struct StalledSink;

    #[async_trait]
    impl StatSink for StalledSink {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn send(&self, _message: &str) -> Result<(), OutputError> {
            std::future::pending().await
        }
    }

    struct RefusingSink;

    #[async_trait]
    impl StatSink for RefusingSink {
        fn name(&self) -> &str {
            "refusing"
        }

        async fn handshake(&self) -> Result<(), OutputError> {
            Err(OutputError::custom("bad hello"))
        }

        async fn send(&self, _message: &str) -> Result<(), OutputError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_tick_writes_one_snapshot_to_everyone() {
        let poller = poller(Duration::from_millis(100));
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        poller.add_subscriber(Arc::new(ChannelStatSink::new("a", tx_a))).await.unwrap();
        poller.add_subscriber(Arc::new(ChannelStatSink::new("b", tx_b))).await.unwrap();

        assert_eq!(poller.tick().await, 2);
        assert_eq!(rx_a.recv().await.unwrap(), r#"{"buffers":3}"#);
        assert_eq!(rx_b.recv().await.unwrap(), r#"{"buffers":3}"#);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_and_closed_subscribers_are_dropped() {
        let poller = poller(Duration::from_millis(250));
        let (tx_ok, mut rx_ok) = mpsc::channel(4);
        let (tx_gone, rx_gone) = mpsc::channel(4);
        poller.add_subscriber(Arc::new(ChannelStatSink::new("ok", tx_ok))).await.unwrap();
        poller.add_subscriber(Arc::new(ChannelStatSink::new("gone", tx_gone))).await.unwrap();
        poller.add_subscriber(Arc::new(StalledSink)).await.unwrap();
        drop(rx_gone);

        assert_eq!(poller.tick().await, 1);
        assert_eq!(poller.subscriber_count(), 1);
        assert!(rx_ok.recv().await.is_some());

        assert_eq!(poller.tick().await, 1);
        assert_eq!(poller.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_handshake_is_not_added() {
        let poller = poller(Duration::from_millis(100));
        let err = poller.add_subscriber(Arc::new(RefusingSink)).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Backend);
        assert_eq!(poller.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_periodically_until_stopped() {
        let poller = poller(Duration::from_millis(100));
        let (tx, mut rx) = mpsc::channel(16);
        let id = poller.add_subscriber(Arc::new(ChannelStatSink::new("a", tx))).await.unwrap();
        poller.start();

        for _ in 0..3 {
            assert!(rx.recv().await.is_some());
        }
        poller.stop().await;
        assert_eq!(poller.subscriber_count(), 0);
        assert!(rx.recv().await.is_none());
        assert!(!poller.remove_subscriber(id).await);
    }
}
