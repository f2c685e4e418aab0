//! Output trait and implementations for audio destinations.
//!
//! An [`Output`] is any destination that consumes decoded audio buffers.
//! The crate provides:
//!
//! - [`SenderOutput`]: forwards audio to a discovered wireless speaker
//! - [`LocalOutput`]: plays audio on the default output device
//! - [`ChannelOutput`]: sends buffers to a tokio mpsc channel
//!
//! Implement the [`Output`] trait for custom destinations and attach them
//! with [`Bridge::add_custom_output`](crate::Bridge::add_custom_output).

mod channel;
mod local;
mod sender;

pub use channel::ChannelOutput;
pub use local::LocalOutput;
pub use sender::SenderOutput;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{AudioBuffer, OutputError};

/// Identifies an attached output for the lifetime of a [`Bridge`](crate::Bridge).
///
/// Ids are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutputId(u64);

impl OutputId {
    /// Wraps a raw id.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw id.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The backend behind an output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    /// Wireless speaker client.
    Sender,
    /// Local playback device.
    Local,
    /// Anything supplied by the embedder.
    Custom,
}

/// A destination for audio buffers.
///
/// Each attached output gets its own delivery task and queue, so a slow
/// `consume` only delays that output.
///
/// # Implementation Notes
///
/// - Methods take `&self`; use interior mutability where state changes
/// - `consume` is called sequentially, in production order
/// - Errors from `consume` are recoverable; repeated failures detach the output
/// - `stop` is called exactly once, after the last `consume`
///
/// # Example
///
/// ```
/// use stream_bridge::{AudioBuffer, Output, OutputError};
/// use async_trait::async_trait;
///
/// struct PrintOutput;
///
/// #[async_trait]
/// impl Output for PrintOutput {
///     fn name(&self) -> &str {
///         "print"
///     }
///
///     async fn consume(&self, buffer: &AudioBuffer) -> Result<(), OutputError> {
///         println!("{} frames", buffer.frame_count());
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Output: Send + Sync {
    /// Human-readable name for logging and events.
    fn name(&self) -> &str;

    /// Which backend this is. Defaults to [`OutputKind::Custom`].
    fn kind(&self) -> OutputKind {
        OutputKind::Custom
    }

    /// Consumes one buffer.
    async fn consume(&self, buffer: &AudioBuffer) -> Result<(), OutputError>;

    /// Toggles diagnostic logging. Default does nothing.
    fn set_verbose(&self, _verbose: bool) {}

    /// Releases the output's resources.
    ///
    /// Default implementation does nothing.
    async fn stop(&self) -> Result<(), OutputError> {
        Ok(())
    }
}
