//! Streamed-media input: buffers produced by the playback controller.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::input::Input;
use crate::playback::PlaybackController;
use crate::{AudioBuffer, BridgeError};

/// Input fed by a [`PlaybackController`].
///
/// Created with [`PlaybackController::attach`]. Stopping the input stops
/// the controller's session.
pub struct StreamedMediaInput {
    controller: PlaybackController,
    sender: mpsc::Sender<AudioBuffer>,
    receiver: mpsc::Receiver<AudioBuffer>,
}

impl StreamedMediaInput {
    pub(crate) fn new(
        controller: PlaybackController,
        sender: mpsc::Sender<AudioBuffer>,
        receiver: mpsc::Receiver<AudioBuffer>,
    ) -> Self {
        Self {
            controller,
            sender,
            receiver,
        }
    }

    /// The controller driving this input.
    pub fn controller(&self) -> &PlaybackController {
        &self.controller
    }
}

#[async_trait]
impl Input for StreamedMediaInput {
    fn name(&self) -> &str {
        "streamed-media"
    }

    async fn produce(&mut self) -> Option<AudioBuffer> {
        // Never ends on its own: the next session reuses the input.
        self.receiver.recv().await
    }

    async fn stop(&mut self) -> Result<(), BridgeError> {
        self.controller.detach(&self.sender);
        self.controller.stop().await;
        self.receiver.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::{MediaItem, PlayerState, WavFileDecoder};
    use crate::ArtworkStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_stop_detaches_and_stops_controller() {
        let controller = PlaybackController::new(Arc::new(WavFileDecoder::new()), ArtworkStore::new());
        let mut input = controller.attach(false);
        assert_eq!(input.name(), "streamed-media");

        input.stop().await.unwrap();
        assert!(input.produce().await.is_none());

        let err = controller.start_single(MediaItem::new("x.wav")).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Config);
        assert_ne!(controller.state(), PlayerState::SingleItem);
    }

    #[tokio::test]
    async fn test_newer_input_replaces_older() {
        let controller = PlaybackController::new(Arc::new(WavFileDecoder::new()), ArtworkStore::new());
        let mut old = controller.attach(false);
        let _new = controller.attach(true);

        // Stopping the old input must not detach the new one.
        old.stop().await.unwrap();
        assert!(controller.info().verbose);
        assert!(controller.is_attached());
    }
}
