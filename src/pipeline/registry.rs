//! The set of attached outputs and their delivery tasks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::output::{Output, OutputId, OutputKind};
use crate::pipeline::delivery::Delivery;
use crate::{AudioBuffer, BridgeConfig, EventCallback};

/// A buffer tagged with the sequence number the fan-out loop gave it.
#[derive(Debug, Clone)]
pub(crate) struct Sequenced {
    pub seq: u64,
    pub buffer: AudioBuffer,
}

/// Tuning shared by every delivery task.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DeliverySettings {
    pub queue_capacity: usize,
    pub max_consecutive_failures: u32,
    pub write_timeout: Duration,
    pub drain_timeout: Duration,
}

impl From<&BridgeConfig> for DeliverySettings {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            queue_capacity: config.output_queue_capacity,
            max_consecutive_failures: config.max_consecutive_failures,
            write_timeout: config.output_write_timeout,
            drain_timeout: config.output_drain_timeout,
        }
    }
}

/// Delivery counters for one output.
#[derive(Debug, Default)]
pub(crate) struct OutputCounters {
    pub delivered: AtomicU64,
    pub failed: AtomicU64,
    pub dropped: AtomicU64,
    pub consecutive_failures: AtomicU32,
    pub degraded: AtomicBool,
}

/// One attached output as the fan-out loop sees it.
pub(crate) struct OutputSlot {
    pub id: OutputId,
    pub name: String,
    pub kind: OutputKind,
    pub output: Arc<dyn Output>,
    pub counters: OutputCounters,
    queue: mpsc::Sender<Sequenced>,
    /// First sequence number this output will see.
    pub first_seq: u64,
    /// One past the last sequence number this output will see. Set on removal.
    final_seq: AtomicU64,
}

impl OutputSlot {
    /// Queues a buffer for delivery without waiting.
    ///
    /// A full queue drops the buffer for this output only and marks it
    /// degraded. Returns `true` when this drop is what degraded it.
    fn offer(&self, item: Sequenced) -> bool {
        match self.queue.try_send(item) {
            Ok(()) | Err(TrySendError::Closed(_)) => false,
            Err(TrySendError::Full(item)) => {
                let dropped = self.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                let newly = !self.counters.degraded.swap(true, Ordering::Relaxed);
                if newly {
                    tracing::warn!(output = %self.name, seq = item.seq, "output queue full, dropping buffers");
                } else {
                    tracing::trace!(output = %self.name, seq = item.seq, dropped, "buffer dropped");
                }
                newly
            }
        }
    }

    /// One past the last sequence number queued to this output, or
    /// `u64::MAX` while it is still attached.
    pub fn final_seq(&self) -> u64 {
        self.final_seq.load(Ordering::SeqCst)
    }
}

pub(crate) struct DeliveryHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct RegistryState {
    next_seq: u64,
    next_id: u64,
    slots: Arc<Vec<Arc<OutputSlot>>>,
    handles: HashMap<OutputId, DeliveryHandle>,
}

/// Attached outputs, shared by the bridge, the fan-out task and every
/// delivery task.
///
/// All membership changes and sequence assignment happen under one lock,
/// so "which outputs see buffer N" is decided at a single instant. The
/// slot list itself is copy-on-write; readers clone the `Arc` and release
/// the lock before delivering.
pub(crate) struct OutputRegistry {
    state: Mutex<RegistryState>,
    settings: DeliverySettings,
    events: Option<EventCallback>,
}

impl OutputRegistry {
    pub fn new(settings: DeliverySettings, events: Option<EventCallback>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RegistryState {
                next_seq: 0,
                next_id: 1,
                slots: Arc::new(Vec::new()),
                handles: HashMap::new(),
            }),
            settings,
            events,
        })
    }

    pub fn settings(&self) -> DeliverySettings {
        self.settings
    }

    pub fn events(&self) -> Option<&EventCallback> {
        self.events.as_ref()
    }

    /// Attaches an output and spawns its delivery task.
    ///
    /// The output sees every buffer sequenced after this call returns and
    /// none sequenced before.
    pub fn attach(self: &Arc<Self>, output: Arc<dyn Output>) -> OutputId {
        let (queue, receiver) = mpsc::channel(self.settings.queue_capacity.max(1));
        let cancel = CancellationToken::new();

        let mut state = self.state.lock();
        let id = OutputId::new(state.next_id);
        state.next_id += 1;

        let slot = Arc::new(OutputSlot {
            id,
            name: output.name().to_string(),
            kind: output.kind(),
            output,
            counters: OutputCounters::default(),
            queue,
            first_seq: state.next_seq,
            final_seq: AtomicU64::new(u64::MAX),
        });

        let delivery = Delivery::new(slot.clone(), receiver, Arc::clone(self));
        let task = tokio::spawn(delivery.run(cancel.clone()));

        let mut slots = Vec::clone(&state.slots);
        slots.push(slot);
        state.slots = Arc::new(slots);
        state.handles.insert(id, DeliveryHandle { cancel, task });
        id
    }

    /// Detaches an output and waits for its delivery task to finish.
    ///
    /// When this returns the output has consumed its last buffer and has
    /// been stopped. Returns `None` for unknown ids.
    pub async fn detach(&self, id: OutputId) -> Option<Arc<OutputSlot>> {
        let (slot, handle) = self.take(id)?;
        if let Some(handle) = handle {
            handle.cancel.cancel();
            if let Err(e) = handle.task.await {
                tracing::error!(output = %slot.name, "delivery task failed: {e}");
            }
        }
        Some(slot)
    }

    /// Removes an output from the set without waiting on its task.
    ///
    /// Used by a delivery task detaching itself.
    pub(crate) fn take(
        &self,
        id: OutputId,
    ) -> Option<(Arc<OutputSlot>, Option<DeliveryHandle>)> {
        let mut state = self.state.lock();
        let position = state.slots.iter().position(|slot| slot.id == id)?;

        let mut slots = Vec::clone(&state.slots);
        let slot = slots.remove(position);
        slot.final_seq.store(state.next_seq, Ordering::SeqCst);
        state.slots = Arc::new(slots);

        let handle = state.handles.remove(&id);
        Some((slot, handle))
    }

    /// Assigns the next sequence number and queues the buffer to every
    /// attached output.
    ///
    /// Both happen under the registry lock, so once an output is detached
    /// every buffer numbered before its `final_seq` is already in its queue
    /// or was dropped. Returns the sequence number and the outputs that
    /// this buffer pushed into the degraded state.
    pub fn publish(&self, buffer: &AudioBuffer) -> (u64, Vec<Arc<OutputSlot>>) {
        let mut state = self.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;

        let mut degraded = Vec::new();
        for slot in state.slots.iter() {
            let item = Sequenced {
                seq,
                buffer: buffer.clone(),
            };
            if slot.offer(item) {
                degraded.push(Arc::clone(slot));
            }
        }
        (seq, degraded)
    }

    /// Currently attached outputs.
    pub fn snapshot(&self) -> Arc<Vec<Arc<OutputSlot>>> {
        Arc::clone(&self.state.lock().slots)
    }

    pub fn ids(&self) -> Vec<OutputId> {
        self.snapshot().iter().map(|slot| slot.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChannelOutput;

    fn settings() -> DeliverySettings {
        DeliverySettings::from(&BridgeConfig::default())
    }

    #[tokio::test]
    async fn test_attach_assigns_increasing_ids() {
        let registry = OutputRegistry::new(settings(), None);
        let (tx, _rx) = mpsc::channel(4);
        let a = registry.attach(Arc::new(ChannelOutput::new(tx.clone())));
        let b = registry.attach(Arc::new(ChannelOutput::new(tx)));

        assert!(b > a);
        assert_eq!(registry.ids(), vec![a, b]);

        registry.detach(a).await.unwrap();
        assert_eq!(registry.ids(), vec![b]);
        assert!(registry.detach(a).await.is_none());
    }

    fn buffer() -> AudioBuffer {
        AudioBuffer::new(vec![0; 4], Duration::ZERO, 44100, 2)
    }

    #[tokio::test]
    async fn test_publish_bounds_output_lifetime() {
        let registry = OutputRegistry::new(settings(), None);
        let (seq0, _) = registry.publish(&buffer());

        let (tx, mut rx) = mpsc::channel(4);
        let id = registry.attach(Arc::new(ChannelOutput::new(tx)));
        let before = registry.snapshot();
        assert_eq!(before[0].first_seq, seq0 + 1);

        let (seq1, _) = registry.publish(&buffer());
        assert_eq!(seq1, seq0 + 1);

        let slot = registry.detach(id).await.unwrap();
        assert_eq!(slot.final_seq(), seq1 + 1);
        assert!(rx.recv().await.is_some());
        // An old snapshot is unaffected by removal.
        assert_eq!(before.len(), 1);
    }

    #[tokio::test]
    async fn test_full_queue_drops_for_that_output_only() {
        let tight = DeliverySettings {
            queue_capacity: 1,
            ..settings()
        };
        let registry = OutputRegistry::new(tight, None);
        let (tx, _rx) = mpsc::channel(1);
        // The delivery task never runs on this thread before the publishes.
        let id = registry.attach(Arc::new(ChannelOutput::new(tx)));

        let (_, first) = registry.publish(&buffer());
        let (_, second) = registry.publish(&buffer());
        let (_, third) = registry.publish(&buffer());

        assert!(first.is_empty());
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, id);
        // Already degraded, so not reported again.
        assert!(third.is_empty());

        let snapshot = registry.snapshot();
        let slot = &snapshot[0];
        assert_eq!(slot.counters.dropped.load(Ordering::Relaxed), 2);
        assert!(slot.counters.degraded.load(Ordering::Relaxed));
    }
}
