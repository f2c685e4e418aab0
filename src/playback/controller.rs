//! Playback state machine for the streamed-media input.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::input::StreamedMediaInput;
use crate::playback::player::{ItemEnd, Player};
use crate::playback::{MediaDecoder, MediaItem};
use crate::{ArtworkStore, AudioBuffer, BridgeError};

/// Buffers queued between the player and the streamed-media input.
const SINK_QUEUE: usize = 8;

/// Which player variant is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerState {
    /// Nothing has been started yet.
    Uninitialized,
    /// Playing one item.
    SingleItem,
    /// Playing a list of items.
    Playlist,
    /// The last session ended or was stopped.
    Stopped,
}

impl PlayerState {
    fn is_active(self) -> bool {
        matches!(self, Self::SingleItem | Self::Playlist)
    }
}

/// Snapshot returned by [`PlaybackController::info`].
#[derive(Debug, Clone, Serialize)]
pub struct PlaybackInfo {
    /// Current state.
    pub state: PlayerState,
    /// Item being played.
    pub item: Option<MediaItem>,
    /// Its position in the playlist.
    pub index: Option<usize>,
    /// Items in the current playlist (1 for a single item).
    pub playlist_len: usize,
    /// Whether the playlist advances on its own.
    pub keep_playing: bool,
    /// Verbose diagnostics.
    pub verbose: bool,
    /// Whether playback is paused.
    pub paused: bool,
}

struct Session {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// The keep-playing flag and the token a session checks at item
/// boundaries. The token is cancelled exactly when the flag is off.
struct Continuation {
    keep_playing: bool,
    token: CancellationToken,
}

impl Continuation {
    fn set(&mut self, keep_playing: bool) {
        self.keep_playing = keep_playing;
        if keep_playing {
            self.token = CancellationToken::new();
        } else {
            self.token.cancel();
        }
    }
}

struct ControllerInner {
    decoder: Arc<dyn MediaDecoder>,
    artwork: ArtworkStore,
    sink: Mutex<Option<mpsc::Sender<AudioBuffer>>>,
    session: tokio::sync::Mutex<Option<Session>>,
    status: RwLock<PlaybackInfo>,
    continuation: Mutex<Continuation>,
    verbose: Arc<AtomicBool>,
    paused: watch::Sender<bool>,
    /// Replaced per session so a stale skip never hits the next one.
    skip: Mutex<Arc<Notify>>,
}

/// Drives streamed-media playback.
///
/// Cheap to clone; clones share the same state. At most one session (a
/// single item or a playlist) runs at a time.
///
/// # Example
///
/// ```no_run
/// use stream_bridge::playback::{MediaItem, PlaybackController, WavFileDecoder};
/// use stream_bridge::ArtworkStore;
/// use std::sync::Arc;
///
/// # async fn run() -> Result<(), stream_bridge::BridgeError> {
/// let controller = PlaybackController::new(Arc::new(WavFileDecoder::new()), ArtworkStore::new());
/// let mut input = controller.attach(false);
/// controller
///     .start_playlist(vec![MediaItem::new("a.wav"), MediaItem::new("b.wav")], true)
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PlaybackController {
    inner: Arc<ControllerInner>,
}

impl PlaybackController {
    /// Creates an idle controller.
    pub fn new(decoder: Arc<dyn MediaDecoder>, artwork: ArtworkStore) -> Self {
        let cancelled = CancellationToken::new();
        cancelled.cancel();
        Self {
            inner: Arc::new(ControllerInner {
                decoder,
                artwork,
                sink: Mutex::new(None),
                session: tokio::sync::Mutex::new(None),
                status: RwLock::new(PlaybackInfo {
                    state: PlayerState::Uninitialized,
                    item: None,
                    index: None,
                    playlist_len: 0,
                    keep_playing: false,
                    verbose: false,
                    paused: false,
                }),
                continuation: Mutex::new(Continuation {
                    keep_playing: false,
                    token: cancelled,
                }),
                verbose: Arc::new(AtomicBool::new(false)),
                paused: watch::channel(false).0,
                skip: Mutex::new(Arc::new(Notify::new())),
            }),
        }
    }

    /// Creates the streamed-media input fed by this controller.
    ///
    /// A newer input replaces an older one; a session still feeding the
    /// old input ends at its next buffer.
    pub fn attach(&self, verbose: bool) -> StreamedMediaInput {
        let (sender, receiver) = mpsc::channel(SINK_QUEUE);
        *self.inner.sink.lock() = Some(sender.clone());
        self.set_verbose(verbose);
        StreamedMediaInput::new(self.clone(), sender, receiver)
    }

    /// Whether a live streamed-media input is attached.
    pub fn is_attached(&self) -> bool {
        self.inner.sink.lock().as_ref().is_some_and(|s| !s.is_closed())
    }

    /// Forgets `sender` if it is still the attached input.
    pub(crate) fn detach(&self, sender: &mpsc::Sender<AudioBuffer>) {
        let mut sink = self.inner.sink.lock();
        if sink.as_ref().is_some_and(|s| s.same_channel(sender)) {
            *sink = None;
        }
    }

    /// Plays one item.
    ///
    /// # Errors
    ///
    /// A configuration error if a session is already running or no
    /// streamed-media input is attached.
    pub async fn start_single(&self, item: MediaItem) -> Result<(), BridgeError> {
        self.start(vec![item], PlayerState::SingleItem, false).await
    }

    /// Plays `items` in order, starting with the first.
    ///
    /// With `keep_playing` off only the first item plays, unless
    /// [`skip`](Self::skip) moves things along.
    ///
    /// # Errors
    ///
    /// A configuration error for an empty list, a running session or no
    /// attached input.
    pub async fn start_playlist(&self, items: Vec<MediaItem>, keep_playing: bool) -> Result<(), BridgeError> {
        if items.is_empty() {
            return Err(BridgeError::config("playlist is empty"));
        }
        self.start(items, PlayerState::Playlist, keep_playing).await
    }

    async fn start(&self, items: Vec<MediaItem>, state: PlayerState, keep_playing: bool) -> Result<(), BridgeError> {
        let inner = &self.inner;
        let mut session = inner.session.lock().await;

        if let Some(previous) = session.take() {
            if !previous.task.is_finished() && inner.status.read().state.is_active() {
                *session = Some(previous);
                return Err(BridgeError::config("a media session is already active; stop it first"));
            }
            // Ended on its own; only the task exit is left.
            let _ = previous.task.await;
        }

        let sink = inner
            .sink
            .lock()
            .clone()
            .filter(|s| !s.is_closed())
            .ok_or_else(|| BridgeError::config("no streamed-media input is attached"))?;

        // Each session gets its own token, so a later `set_keep_playing(true)`
        // never revives one that was told to stop at the next boundary.
        let continuation = {
            let mut guard = inner.continuation.lock();
            guard.token.cancel();
            guard.set(keep_playing);
            inner.status.write().keep_playing = keep_playing;
            guard.token.clone()
        };
        inner.paused.send_replace(false);
        {
            let mut status = inner.status.write();
            status.state = state;
            status.item = items.first().cloned();
            status.index = Some(0);
            status.playlist_len = items.len();
            status.paused = false;
        }

        let cancel = CancellationToken::new();
        let skip = Arc::new(Notify::new());
        *inner.skip.lock() = skip.clone();
        let player = Player {
            sink,
            cancel: cancel.clone(),
            skip,
            paused: inner.paused.subscribe(),
            verbose: inner.verbose.clone(),
            artwork: inner.artwork.clone(),
            elapsed: Duration::ZERO,
        };
        let task = tokio::spawn(run_session(inner.clone(), player, items, state, continuation));
        *session = Some(Session { cancel, task });

        tracing::info!(?state, "media session started");
        Ok(())
    }

    /// Halts the session, turns keep-playing off and waits for the player
    /// to exit.
    pub async fn stop(&self) {
        let mut session = self.inner.session.lock().await;
        self.set_keep_playing(false);
        if let Some(session) = session.take() {
            session.cancel.cancel();
            if let Err(e) = session.task.await {
                tracing::warn!("media session ended abnormally: {e}");
            }
        }
        self.inner.paused.send_replace(false);

        let mut status = self.inner.status.write();
        if status.state != PlayerState::Uninitialized {
            status.state = PlayerState::Stopped;
        }
        status.item = None;
        status.index = None;
        status.paused = false;
        tracing::info!("media playback stopped");
    }

    /// Turns autoplay-next on or off. Returns `false` if it already had
    /// that value.
    ///
    /// Turning it off lets the current item finish; the session then ends
    /// at the item boundary. Turning it back on applies from the next
    /// session once the running one has been told to stop.
    pub fn set_keep_playing(&self, keep_playing: bool) -> bool {
        let inner = &self.inner;
        let mut continuation = inner.continuation.lock();
        if continuation.keep_playing == keep_playing {
            return false;
        }
        continuation.set(keep_playing);
        inner.status.write().keep_playing = keep_playing;
        tracing::debug!(keep_playing, "keep-playing changed");
        true
    }

    /// Whether autoplay-next is on.
    pub fn keep_playing(&self) -> bool {
        self.inner.continuation.lock().keep_playing
    }

    /// Toggles diagnostic logging. Playback is unaffected.
    pub fn set_verbose(&self, verbose: bool) {
        self.inner.verbose.store(verbose, Ordering::Relaxed);
        self.inner.status.write().verbose = verbose;
    }

    /// Pauses the current item.
    pub fn pause(&self) -> Result<(), BridgeError> {
        self.set_paused(true)
    }

    /// Resumes after [`pause`](Self::pause).
    pub fn resume(&self) -> Result<(), BridgeError> {
        self.set_paused(false)
    }

    fn set_paused(&self, paused: bool) -> Result<(), BridgeError> {
        let mut status = self.inner.status.write();
        if !status.state.is_active() {
            return Err(BridgeError::config("no media session is active"));
        }
        status.paused = paused;
        self.inner.paused.send_replace(paused);
        Ok(())
    }

    /// Ends the current item now. A playlist moves on to the next item
    /// whatever the keep-playing flag says.
    pub fn skip(&self) -> Result<(), BridgeError> {
        if !self.inner.status.read().state.is_active() {
            return Err(BridgeError::config("no media session is active"));
        }
        self.inner.skip.lock().notify_one();
        Ok(())
    }

    /// Snapshot of the playback state. Safe to call at any time.
    pub fn info(&self) -> PlaybackInfo {
        self.inner.status.read().clone()
    }

    /// Current state.
    pub fn state(&self) -> PlayerState {
        self.inner.status.read().state
    }
}

async fn run_session(
    inner: Arc<ControllerInner>,
    mut player: Player,
    items: Vec<MediaItem>,
    mode: PlayerState,
    continuation: CancellationToken,
) {
    let mut index = 0;
    loop {
        let item = &items[index];
        {
            let mut status = inner.status.write();
            status.item = Some(item.clone());
            status.index = Some(index);
        }
        if inner.verbose.load(Ordering::Relaxed) {
            tracing::info!(index, item = item.label(), "playing item");
        }

        let end = match player.play(item, inner.decoder.as_ref()).await {
            Ok(end) => end,
            Err(e) => {
                tracing::warn!(item = item.label(), "item failed: {e}");
                ItemEnd::Finished
            }
        };
        tracing::debug!(index, ?end, "item ended");

        match end {
            ItemEnd::Cancelled | ItemEnd::SinkClosed => break,
            _ if mode == PlayerState::SingleItem => break,
            ItemEnd::Finished if continuation.is_cancelled() => {
                tracing::info!(index, "keep-playing off, playlist stops here");
                break;
            }
            ItemEnd::Finished | ItemEnd::Skipped => {}
        }

        index += 1;
        if index >= items.len() {
            tracing::info!("playlist finished");
            break;
        }
    }

    let mut status = inner.status.write();
    status.state = PlayerState::Stopped;
    status.item = None;
    status.index = None;
    status.paused = false;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::Input;
    use crate::playback::{BufferedTrack, DecodedTrack};
    use async_trait::async_trait;

    /// Each item is `frames` of stereo 44.1kHz, samples set to the item's
    /// number parsed from its location.
    struct CountingDecoder {
        frames: usize,
        chunk: Duration,
    }

    #[async_trait]
    impl MediaDecoder for CountingDecoder {
        async fn open(&self, item: &MediaItem) -> Result<Box<dyn DecodedTrack>, BridgeError> {
            let value: i16 = item
                .location
                .parse()
                .map_err(|_| BridgeError::backend("media", "bad item"))?;
            let samples = vec![value; self.frames * 2];
            Ok(Box::new(BufferedTrack::from_samples(&samples, 44100, 2, self.chunk)))
        }
    }

    fn controller(frames: usize) -> PlaybackController {
        PlaybackController::new(
            Arc::new(CountingDecoder {
                frames,
                chunk: Duration::from_millis(10),
            }),
            ArtworkStore::new(),
        )
    }

    fn items(n: usize) -> Vec<MediaItem> {
        (1..=n).map(|i| MediaItem::new(i.to_string())).collect()
    }

    async fn wait_stopped(controller: &PlaybackController) {
        while controller.state() != PlayerState::Stopped {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn collect(input: &mut StreamedMediaInput, controller: &PlaybackController) -> Vec<i16> {
        let mut values = Vec::new();
        loop {
            tokio::select! {
                buffer = input.produce() => match buffer {
                    Some(buffer) => values.push(buffer.samples[0]),
                    None => break,
                },
                () = wait_stopped(controller) => {
                    while let Ok(Some(buffer)) = tokio::time::timeout(Duration::from_millis(1), input.produce()).await {
                        values.push(buffer.samples[0]);
                    }
                    break;
                }
            }
        }
        values
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_item_plays_then_stops() {
        let controller = controller(4410);
        let mut input = controller.attach(false);
        controller.start_single(MediaItem::new("7")).await.unwrap();
        assert_eq!(controller.info().state, PlayerState::SingleItem);

        let values = collect(&mut input, &controller).await;
        assert_eq!(values, vec![7; 10]);
        assert_eq!(controller.state(), PlayerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_is_rejected_while_active() {
        let controller = controller(44100);
        let _input = controller.attach(false);
        controller.start_playlist(items(2), true).await.unwrap();

        let err = controller.start_single(MediaItem::new("1")).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Config);
        assert_eq!(controller.state(), PlayerState::Playlist);

        controller.stop().await;
        assert_eq!(controller.state(), PlayerState::Stopped);
        assert!(!controller.keep_playing());
        controller.start_single(MediaItem::new("1")).await.unwrap();
        controller.stop().await;
    }

    #[tokio::test]
    async fn test_start_requires_attached_input() {
        let controller = controller(10);
        let err = controller.start_single(MediaItem::new("1")).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Config);
        let err = controller.start_playlist(Vec::new(), true).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Config);
    }

    #[tokio::test(start_paused = true)]
    async fn test_playlist_advances_with_keep_playing() {
        let controller = controller(441);
        let mut input = controller.attach(true);
        controller.start_playlist(items(3), true).await.unwrap();

        let values = collect(&mut input, &controller).await;
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_playing_off_stops_at_item_boundary() {
        let controller = controller(4410);
        let mut input = controller.attach(false);
        controller.start_playlist(items(3), true).await.unwrap();

        // First buffer of item 1 is out; turn autoplay off mid-item.
        let first = input.produce().await.unwrap();
        assert_eq!(first.samples[0], 1);
        assert!(controller.set_keep_playing(false));
        assert!(!controller.set_keep_playing(false));

        let mut values = vec![1];
        values.extend(collect(&mut input, &controller).await);
        assert_eq!(values, vec![1; 10]);
        assert_eq!(controller.info().index, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_moves_to_next_item() {
        let controller = controller(44100);
        let mut input = controller.attach(false);
        controller.start_playlist(items(2), false).await.unwrap();

        assert_eq!(input.produce().await.unwrap().samples[0], 1);
        controller.skip().unwrap();

        let mut next = input.produce().await.unwrap();
        while next.samples[0] == 1 {
            next = input.produce().await.unwrap();
        }
        assert_eq!(next.samples[0], 2);
        assert_eq!(controller.info().index, Some(1));
        controller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_holds_playback() {
        let controller = controller(44100);
        let mut input = controller.attach(false);
        controller.start_single(MediaItem::new("3")).await.unwrap();
        let _ = input.produce().await.unwrap();

        controller.pause().unwrap();
        assert!(controller.info().paused);
        // Drain what was queued before the pause took effect.
        while tokio::time::timeout(Duration::from_millis(50), input.produce()).await.is_ok() {}
        assert!(tokio::time::timeout(Duration::from_secs(5), input.produce()).await.is_err());

        controller.resume().unwrap();
        assert!(input.produce().await.is_some());
        controller.stop().await;
        assert!(controller.pause().is_err());
    }

    #[tokio::test]
    async fn test_info_and_verbose_before_start() {
        let controller = controller(10);
        let info = controller.info();
        assert_eq!(info.state, PlayerState::Uninitialized);
        assert_eq!(info.playlist_len, 0);

        controller.set_verbose(true);
        assert!(controller.info().verbose);
        assert!(controller.skip().is_err());
        let json = serde_json::to_value(controller.info()).unwrap();
        assert_eq!(json["state"], "uninitialized");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reenabling_keep_playing_does_not_revive_session() {
        let controller = controller(4410);
        let mut input = controller.attach(false);
        controller.start_playlist(items(3), true).await.unwrap();
        assert_eq!(input.produce().await.unwrap().samples[0], 1);

        assert!(controller.set_keep_playing(false));
        assert!(controller.set_keep_playing(true));
        assert!(controller.keep_playing());

        let mut values = vec![1];
        values.extend(collect(&mut input, &controller).await);
        assert_eq!(values, vec![1; 10]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_toggles_keep_flag_and_token_in_step() {
        let controller = controller(10);
        let tasks: Vec<_> = (0..64)
            .map(|i| {
                let controller = controller.clone();
                tokio::spawn(async move {
                    for _ in 0..50 {
                        controller.set_keep_playing(i % 2 == 0);
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let continuation = controller.inner.continuation.lock();
        assert_eq!(continuation.keep_playing, !continuation.token.is_cancelled());
        assert_eq!(controller.info().keep_playing, continuation.keep_playing);
    }
}
