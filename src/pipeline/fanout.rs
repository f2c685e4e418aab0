//! Fan-out task moving buffers from the active input to every output.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::input::Input;
use crate::pipeline::registry::OutputRegistry;
use crate::{BridgeEvent, EventCallback, VisualizationCallback};

/// Production counters for the active input.
#[derive(Debug, Default)]
pub(crate) struct InputCounters {
    pub name: RwLock<Option<String>>,
    pub buffers: AtomicU64,
    pub samples: AtomicU64,
}

/// Owns the active input for as long as it runs.
pub(crate) struct FanOut {
    input: Box<dyn Input>,
    registry: Arc<OutputRegistry>,
    counters: Arc<InputCounters>,
    events: Option<EventCallback>,
    visualization: Option<VisualizationCallback>,
}

impl FanOut {
    pub fn new(
        input: Box<dyn Input>,
        registry: Arc<OutputRegistry>,
        counters: Arc<InputCounters>,
        events: Option<EventCallback>,
        visualization: Option<VisualizationCallback>,
    ) -> Self {
        Self {
            input,
            registry,
            counters,
            events,
            visualization,
        }
    }

    fn emit(&self, event: BridgeEvent) {
        if let Some(ref callback) = self.events {
            callback(event);
        }
    }

    /// Runs until cancelled or the input is exhausted, then stops the input.
    ///
    /// Cancellation is only observed between buffers. Once a buffer has a
    /// sequence number it is queued to every output attached at that
    /// instant, except outputs whose queue is full.
    pub async fn run(mut self, cancel: CancellationToken) {
        let name = self.input.name().to_string();
        *self.counters.name.write() = Some(name.clone());
        tracing::info!(input = %name, "input started");
        self.emit(BridgeEvent::InputStarted { name: name.clone() });

        let reason = loop {
            let buffer = tokio::select! {
                biased;
                () = cancel.cancelled() => break "replaced",
                buffer = self.input.produce() => match buffer {
                    Some(buffer) => buffer,
                    None => break "finished",
                },
            };

            if let Some(ref visualize) = self.visualization {
                visualize(&buffer);
            }

            let (seq, degraded) = self.registry.publish(&buffer);
            self.counters.buffers.fetch_add(1, Ordering::Relaxed);
            self.counters
                .samples
                .fetch_add(buffer.samples.len() as u64, Ordering::Relaxed);

            for slot in degraded {
                self.emit(BridgeEvent::OutputDegraded {
                    id: slot.id,
                    name: slot.name.clone(),
                    consecutive_failures: slot.counters.consecutive_failures.load(Ordering::Relaxed),
                    error: format!("queue full, buffer {seq} dropped"),
                });
            }
        };

        if let Err(e) = self.input.stop().await {
            tracing::warn!(input = %name, "error stopping input: {e}");
        }
        *self.counters.name.write() = None;
        tracing::info!(input = %name, reason, "input stopped");
        self.emit(BridgeEvent::InputStopped {
            name,
            reason: reason.to_string(),
        });
    }
}
