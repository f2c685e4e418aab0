//! Per-output delivery task.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::pipeline::registry::{OutputRegistry, OutputSlot, Sequenced};
use crate::{BridgeEvent, OutputError};

/// Feeds one output from its queue.
///
/// Runs until the bridge cancels it or the output fails too many times in
/// a row, in which case it detaches itself and reports the removal.
pub(crate) struct Delivery {
    slot: Arc<OutputSlot>,
    receiver: mpsc::Receiver<Sequenced>,
    registry: Arc<OutputRegistry>,
    next_expected: u64,
}

impl Delivery {
    pub fn new(
        slot: Arc<OutputSlot>,
        receiver: mpsc::Receiver<Sequenced>,
        registry: Arc<OutputRegistry>,
    ) -> Self {
        let next_expected = slot.first_seq;
        Self {
            slot,
            receiver,
            registry,
            next_expected,
        }
    }

    fn emit(&self, event: BridgeEvent) {
        if let Some(callback) = self.registry.events() {
            callback(event);
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                item = self.receiver.recv() => {
                    let Some(item) = item else { break };
                    if !self.deliver(item).await {
                        self.detach_self().await;
                        return;
                    }
                }
            }
        }

        self.drain().await;
        self.stop_output().await;
    }

    /// Consumes one buffer. Returns `false` once the failure bound is hit.
    async fn deliver(&mut self, item: Sequenced) -> bool {
        self.next_expected = item.seq + 1;
        let settings = self.registry.settings();
        let counters = &self.slot.counters;

        let result = match tokio::time::timeout(
            settings.write_timeout,
            self.slot.output.consume(&item.buffer),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(OutputError::write_failed(format!(
                "consume timed out after {:?}",
                settings.write_timeout
            ))),
        };

        match result {
            Ok(()) => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
                counters.consecutive_failures.store(0, Ordering::Relaxed);
                // Degraded by a failure or by a dropped buffer.
                if counters.degraded.swap(false, Ordering::Relaxed) {
                    tracing::info!(output = %self.slot.name, "output recovered");
                    self.emit(BridgeEvent::OutputRecovered {
                        id: self.slot.id,
                        name: self.slot.name.clone(),
                    });
                }
                true
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                counters.degraded.store(true, Ordering::Relaxed);
                let failures = counters.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(
                    output = %self.slot.name,
                    seq = item.seq,
                    failures,
                    "output failed to consume buffer: {e}"
                );
                self.emit(BridgeEvent::OutputDegraded {
                    id: self.slot.id,
                    name: self.slot.name.clone(),
                    consecutive_failures: failures,
                    error: e.to_string(),
                });
                failures < settings.max_consecutive_failures
            }
        }
    }

    /// Delivers what the fan-out loop queued before the output was removed.
    ///
    /// Everything numbered below `final_seq` is already queued by the time
    /// the slot is taken, so an empty queue means the drain is complete.
    async fn drain(&mut self) {
        let final_seq = self.slot.final_seq();
        if final_seq == u64::MAX {
            return;
        }
        let drain_timeout = self.registry.settings().drain_timeout;
        let deadline = tokio::time::Instant::now() + drain_timeout;

        while self.next_expected < final_seq {
            let Ok(item) = self.receiver.try_recv() else { break };
            if tokio::time::timeout_at(deadline, self.deliver(item)).await.is_err() {
                tracing::warn!(
                    output = %self.slot.name,
                    pending = final_seq - self.next_expected,
                    "drain did not finish within {drain_timeout:?}"
                );
                break;
            }
        }
    }

    async fn detach_self(mut self) {
        let reason = format!(
            "removed after {} consecutive failures",
            self.registry.settings().max_consecutive_failures
        );
        tracing::error!(output = %self.slot.name, "{reason}");

        // The handle we get back is our own; dropping it detaches the task.
        // `None` means a concurrent detach took the slot and reports it.
        let taken = self.registry.take(self.slot.id).is_some();
        self.receiver.close();
        self.stop_output().await;
        if taken {
            self.emit(BridgeEvent::OutputRemoved {
                id: self.slot.id,
                name: self.slot.name.clone(),
                reason,
            });
        }
    }

    async fn stop_output(&self) {
        let limit = self.registry.settings().write_timeout;
        match tokio::time::timeout(limit, self.slot.output.stop()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(output = %self.slot.name, "error stopping output: {e}"),
            Err(_) => tracing::warn!(output = %self.slot.name, "output did not stop within {limit:?}"),
        }
    }
}
