//! Runtime events and embedder callbacks.
//!
//! Events are non-fatal notifications about the bridge. Streaming continues
//! after any event is emitted; they exist for logging and UI updates.

use std::sync::Arc;

use crate::{AudioBuffer, OutputId};

/// Runtime events emitted by the bridge.
///
/// # Example
///
/// ```
/// use stream_bridge::BridgeEvent;
///
/// fn handle_event(event: BridgeEvent) {
///     match event {
///         BridgeEvent::OutputRemoved { name, reason, .. } => {
///             eprintln!("output {name} removed: {reason}");
///         }
///         other => eprintln!("{other:?}"),
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    /// A new input began producing.
    InputStarted {
        /// Input name.
        name: String,
    },

    /// The active input was stopped or ran out of audio.
    InputStopped {
        /// Input name.
        name: String,
        /// Why it stopped.
        reason: String,
    },

    /// An output was attached.
    OutputAdded {
        /// Output id.
        id: OutputId,
        /// Output name.
        name: String,
    },

    /// An output failed to consume a buffer, or its queue was full and a
    /// buffer was dropped for it.
    ///
    /// The output stays attached but is marked degraded until it succeeds
    /// again.
    OutputDegraded {
        /// Output id.
        id: OutputId,
        /// Output name.
        name: String,
        /// Failures in a row so far.
        consecutive_failures: u32,
        /// The last error.
        error: String,
    },

    /// An output recovered after one or more failures.
    OutputRecovered {
        /// Output id.
        id: OutputId,
        /// Output name.
        name: String,
    },

    /// An output was detached, either on request or after repeated failures.
    OutputRemoved {
        /// Output id.
        id: OutputId,
        /// Output name.
        name: String,
        /// Why it was removed.
        reason: String,
    },
}

/// Callback type for receiving runtime events.
pub type EventCallback = Arc<dyn Fn(BridgeEvent) + Send + Sync>;

/// Creates an [`EventCallback`] from a closure.
///
/// # Example
///
/// ```
/// use stream_bridge::{event_callback, BridgeEvent};
///
/// let callback = event_callback(|event: BridgeEvent| {
///     println!("Got event: {:?}", event);
/// });
/// ```
pub fn event_callback<F>(f: F) -> EventCallback
where
    F: Fn(BridgeEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Called synchronously from the fan-out loop with every produced buffer.
///
/// Keep it short: the next buffer is not pulled until it returns.
pub type VisualizationCallback = Arc<dyn Fn(&AudioBuffer) + Send + Sync>;

/// Creates a [`VisualizationCallback`] from a closure.
pub fn visualization_callback<F>(f: F) -> VisualizationCallback
where
    F: Fn(&AudioBuffer) + Send + Sync + 'static,
{
    Arc::new(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_event_debug() {
        let event = BridgeEvent::OutputDegraded {
            id: OutputId::new(3),
            name: "kitchen".to_string(),
            consecutive_failures: 2,
            error: "timeout".to_string(),
        };
        let debug = format!("{event:?}");
        assert!(debug.contains("OutputDegraded"));
        assert!(debug.contains("kitchen"));
    }

    #[test]
    fn test_event_callback_helper() {
        let called = Arc::new(AtomicBool::new(false));
        let called_clone = called.clone();

        let callback = event_callback(move |_| {
            called_clone.store(true, Ordering::SeqCst);
        });

        callback(BridgeEvent::InputStarted {
            name: "mock".to_string(),
        });
        assert!(called.load(Ordering::SeqCst));
    }

    #[test]
    fn test_visualization_callback_sees_samples() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        let callback = visualization_callback(move |buffer| {
            seen_clone.fetch_add(buffer.samples.len(), Ordering::SeqCst);
        });

        callback(&AudioBuffer::new(vec![1, 2, 3], Duration::ZERO, 44100, 1));
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }
}
