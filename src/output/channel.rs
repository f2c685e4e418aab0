//! Tokio mpsc channel output.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::output::Output;
use crate::{AudioBuffer, OutputError};

/// An output that forwards buffers to a tokio mpsc channel.
///
/// Useful for analysis, tests, or any consumer living in the same process.
///
/// # Example
///
/// ```
/// use stream_bridge::{AudioBuffer, ChannelOutput};
/// use tokio::sync::mpsc;
///
/// let (tx, mut rx) = mpsc::channel::<AudioBuffer>(100);
/// let output = ChannelOutput::new(tx);
///
/// // Attach with Bridge::add_custom_output, then:
/// // while let Some(buffer) = rx.recv().await { ... }
/// ```
pub struct ChannelOutput {
    name: String,
    sender: mpsc::Sender<AudioBuffer>,
}

impl ChannelOutput {
    /// Creates a channel output named `"channel"`.
    pub fn new(sender: mpsc::Sender<AudioBuffer>) -> Self {
        Self::with_name("channel", sender)
    }

    /// Creates a channel output with a custom name.
    pub fn with_name(name: impl Into<String>, sender: mpsc::Sender<AudioBuffer>) -> Self {
        Self {
            name: name.into(),
            sender,
        }
    }
}

#[async_trait]
impl Output for ChannelOutput {
    fn name(&self) -> &str {
        &self.name
    }

    async fn consume(&self, buffer: &AudioBuffer) -> Result<(), OutputError> {
        self.sender
            .send(buffer.clone())
            .await
            .map_err(|_| OutputError::ChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_channel_output_forwards() {
        let (tx, mut rx) = mpsc::channel::<AudioBuffer>(10);
        let output = ChannelOutput::new(tx);

        let buffer = AudioBuffer::new(vec![1, 2, 3], Duration::ZERO, 44100, 1);
        output.consume(&buffer).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(&*received.samples, &[1, 2, 3]);
    }

    #[tokio::test]
    async fn test_channel_output_closed() {
        let (tx, rx) = mpsc::channel::<AudioBuffer>(10);
        let output = ChannelOutput::with_name("analysis", tx);
        drop(rx);

        let buffer = AudioBuffer::new(vec![1], Duration::ZERO, 44100, 1);
        let result = output.consume(&buffer).await;
        assert!(matches!(result, Err(OutputError::ChannelClosed)));
        assert_eq!(output.name(), "analysis");
    }
}
