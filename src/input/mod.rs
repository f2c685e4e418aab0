//! Input trait and the audio producers behind it.
//!
//! Exactly one [`Input`] is active on a bridge at a time. The fan-out loop
//! owns it and pulls buffers with [`Input::produce`] until the input runs
//! dry or is replaced.
//!
//! - [`ReceiverInput`]: virtual wireless speaker fed by a remote sender
//! - [`CaptureInput`]: local capture device
//! - [`StreamedMediaInput`]: buffers from the playback controller
//! - [`MockInput`]: scripted buffers for tests

mod capture;
mod media;
mod mock;
mod receiver;

pub use capture::{list_input_devices, CaptureInput};
pub use media::StreamedMediaInput;
pub use mock::{InputGauge, MockInput, MockInputHandle};
pub use receiver::{PayloadDecoder, ReceiverInput, ReceiverOptions};

use async_trait::async_trait;

use crate::{AudioBuffer, BridgeError};

/// A producer of decoded audio buffers.
///
/// # Implementation Notes
///
/// - `produce` must be cancel-safe: the fan-out loop races it against its
///   stop signal, and a dropped future must not lose a buffer that was
///   already taken from the underlying source
/// - Returning `None` ends the input; the loop then stops it
/// - `stop` is called exactly once and must release every resource
///   (sockets, device streams, advertisements) before returning
#[async_trait]
pub trait Input: Send {
    /// Human-readable name for logging and events.
    fn name(&self) -> &str;

    /// Waits for the next buffer. `None` means the input is finished.
    async fn produce(&mut self) -> Option<AudioBuffer>;

    /// Stops the input and releases its resources.
    async fn stop(&mut self) -> Result<(), BridgeError>;
}
