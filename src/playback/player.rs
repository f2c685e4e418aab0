//! Plays one media item into the streamed-media input.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::playback::{MediaDecoder, MediaItem};
use crate::{ArtworkStore, AudioBuffer, BridgeError};

/// How playback of one item ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ItemEnd {
    Finished,
    Skipped,
    Cancelled,
    /// The streamed-media input went away.
    SinkClosed,
}

/// Everything a session needs to play items.
pub(crate) struct Player {
    pub sink: mpsc::Sender<AudioBuffer>,
    pub cancel: CancellationToken,
    pub skip: Arc<Notify>,
    pub paused: watch::Receiver<bool>,
    pub verbose: Arc<AtomicBool>,
    pub artwork: ArtworkStore,
    /// Playlist position, so timestamps keep increasing across items.
    pub elapsed: Duration,
}

enum Wait {
    Done,
    Skipped,
    Cancelled,
}

impl Player {
    /// Blocks while paused. Returns how long it waited.
    async fn wait_unpaused(&mut self) -> Result<Duration, Wait> {
        if !*self.paused.borrow() {
            return Ok(Duration::ZERO);
        }
        let since = Instant::now();
        tracing::debug!("playback paused");
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(Wait::Cancelled),
                () = self.skip.notified() => return Err(Wait::Skipped),
                changed = self.paused.changed() => {
                    if changed.is_err() {
                        return Err(Wait::Cancelled);
                    }
                    if !*self.paused.borrow() {
                        tracing::debug!("playback resumed");
                        return Ok(since.elapsed());
                    }
                }
            }
        }
    }

    /// Sleeps until `deadline` unless cancelled or skipped first.
    async fn pace(&self, deadline: Instant) -> Wait {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Wait::Cancelled,
            () = self.skip.notified() => Wait::Skipped,
            () = tokio::time::sleep_until(deadline) => Wait::Done,
        }
    }

    /// Decodes `item` and sends its buffers at real-time pace.
    pub(crate) async fn play(
        &mut self,
        item: &MediaItem,
        decoder: &dyn MediaDecoder,
    ) -> Result<ItemEnd, BridgeError> {
        // A skip sent while no item was playing has nothing left to skip.
        if self.skip.notified().now_or_never().is_some() {
            tracing::debug!(item = item.label(), "stale skip discarded");
        }
        let mut track = decoder.open(item).await?;
        if let Some(artwork) = track.artwork() {
            self.artwork.set(artwork);
        }

        let mut started = Instant::now();
        let mut played = Duration::ZERO;
        let mut buffers = 0u64;

        loop {
            match self.wait_unpaused().await {
                Ok(waited) => started += waited,
                Err(Wait::Skipped) => return Ok(ItemEnd::Skipped),
                Err(_) => return Ok(ItemEnd::Cancelled),
            }

            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Ok(ItemEnd::Cancelled),
                () = self.skip.notified() => return Ok(ItemEnd::Skipped),
                next = track.next_buffer() => next,
            };
            let buffer = match next {
                Some(buffer) => buffer?,
                None => break,
            };

            let duration = buffer.duration();
            let buffer = AudioBuffer::from_shared(
                buffer.samples,
                self.elapsed + played,
                buffer.sample_rate,
                buffer.channels,
            );
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Ok(ItemEnd::Cancelled),
                () = self.skip.notified() => return Ok(ItemEnd::Skipped),
                sent = self.sink.send(buffer) => {
                    if sent.is_err() {
                        return Ok(ItemEnd::SinkClosed);
                    }
                }
            }
            played += duration;
            buffers += 1;

            if self.verbose.load(Ordering::Relaxed) && buffers % 50 == 0 {
                tracing::info!(item = item.label(), position = ?played, "playing");
            }

            match self.pace(started + played).await {
                Wait::Done => {}
                Wait::Skipped => {
                    self.elapsed += played;
                    return Ok(ItemEnd::Skipped);
                }
                Wait::Cancelled => return Ok(ItemEnd::Cancelled),
            }
        }

        self.elapsed += played;
        Ok(ItemEnd::Finished)
    }
}
