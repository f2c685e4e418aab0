//! The bridge orchestrator.
//!
//! A [`Bridge`] owns at most one active input and any number of outputs.
//! Control calls (start an input, add or remove an output) are serialized
//! against each other; the fan-out task and the per-output delivery tasks
//! keep streaming while they run.

use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::discovery::{mdns_browser_factory, BrowserFactory};
use crate::input::{CaptureInput, Input, ReceiverInput, ReceiverOptions};
use crate::output::{LocalOutput, Output, OutputId, OutputKind, SenderOutput};
use crate::pipeline::{DeliverySettings, FanOut, InputCounters, OutputRegistry};
use crate::playback::{MediaDecoder, PlaybackController, WavFileDecoder};
use crate::rtsp::ConnectedClients;
use crate::statpoll::{StatPoller, StatSink, StatsSource, SubscriberId};
use crate::{
    event_callback, visualization_callback, ArtworkStore, AudioBuffer, BridgeConfig, BridgeError,
    BridgeEvent, EventCallback, InputSpec, OutputSpec, PlaybackAction, PlaybackControl,
    VisualizationCallback,
};

/// Delivery counters for one output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputStats {
    /// Output id.
    pub id: OutputId,
    /// Output name.
    pub name: String,
    /// Backend kind.
    pub kind: OutputKind,
    /// Buffers consumed successfully.
    pub delivered: u64,
    /// Failed `consume` calls.
    pub failed: u64,
    /// Buffers dropped because the output's queue stayed full.
    pub dropped: u64,
    /// Whether the last `consume` failed.
    pub degraded: bool,
}

/// Snapshot of the bridge, as pushed by the stat poller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeStats {
    /// Name of the active input.
    pub input: Option<String>,
    /// Buffers produced since the bridge was built.
    pub buffers_produced: u64,
    /// Samples produced since the bridge was built.
    pub samples_produced: u64,
    /// Per-output counters, in attach order.
    pub outputs: Vec<OutputStats>,
    /// Connected monitoring clients.
    pub stat_subscribers: usize,
}

struct ActiveInput {
    kind: &'static str,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct ControlState {
    input: Option<ActiveInput>,
    shut_down: bool,
}

struct BridgeInner {
    config: BridgeConfig,
    registry: Arc<OutputRegistry>,
    counters: Arc<InputCounters>,
    events: Option<EventCallback>,
    visualization: Option<VisualizationCallback>,
    artwork: ArtworkStore,
    playback: PlaybackController,
    browsers: BrowserFactory,
    receiver_options: ReceiverOptions,
    receiver_clients: RwLock<Option<ConnectedClients>>,
    control: tokio::sync::Mutex<ControlState>,
    poller: StatPoller,
}

impl BridgeInner {
    fn emit(&self, event: BridgeEvent) {
        if let Some(ref callback) = self.events {
            callback(event);
        }
    }

    fn stats(&self) -> BridgeStats {
        use std::sync::atomic::Ordering;

        let outputs = self
            .registry
            .snapshot()
            .iter()
            .map(|slot| OutputStats {
                id: slot.id,
                name: slot.name.clone(),
                kind: slot.kind,
                delivered: slot.counters.delivered.load(Ordering::Relaxed),
                failed: slot.counters.failed.load(Ordering::Relaxed),
                dropped: slot.counters.dropped.load(Ordering::Relaxed),
                degraded: slot.counters.degraded.load(Ordering::Relaxed),
            })
            .collect();

        BridgeStats {
            input: self.counters.name.read().clone(),
            buffers_produced: self.counters.buffers.load(Ordering::Relaxed),
            samples_produced: self.counters.samples.load(Ordering::Relaxed),
            outputs,
            stat_subscribers: self.poller.subscriber_count(),
        }
    }
}

/// Stats source that doesn't keep the bridge alive.
struct WeakStats(Weak<BridgeInner>);

impl StatsSource for WeakStats {
    fn snapshot(&self) -> serde_json::Value {
        self.0
            .upgrade()
            .and_then(|inner| serde_json::to_value(inner.stats()).ok())
            .unwrap_or_default()
    }
}

/// Builder for a [`Bridge`].
///
/// ```
/// use stream_bridge::{Bridge, BridgeConfig, BridgeEvent};
///
/// let bridge = Bridge::builder()
///     .config(BridgeConfig::default())
///     .on_event(|event: BridgeEvent| eprintln!("{event:?}"))
///     .on_visualization(|buffer| {
///         let _peak = buffer.samples.iter().map(|s| s.unsigned_abs()).max();
///     })
///     .build()
///     .unwrap();
/// # drop(bridge);
/// ```
#[must_use]
pub struct BridgeBuilder {
    config: BridgeConfig,
    events: Option<EventCallback>,
    visualization: Option<VisualizationCallback>,
    media_decoder: Option<Arc<dyn MediaDecoder>>,
    browsers: Option<BrowserFactory>,
    receiver_options: ReceiverOptions,
}

impl Default for BridgeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeBuilder {
    /// A builder with default tuning and no callbacks.
    pub fn new() -> Self {
        Self {
            config: BridgeConfig::default(),
            events: None,
            visualization: None,
            media_decoder: None,
            browsers: None,
            receiver_options: ReceiverOptions::default(),
        }
    }

    /// Sets the runtime tuning.
    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    /// Receives [`BridgeEvent`]s.
    pub fn on_event<F>(mut self, callback: F) -> Self
    where
        F: Fn(BridgeEvent) + Send + Sync + 'static,
    {
        self.events = Some(event_callback(callback));
        self
    }

    /// Called with every produced buffer, from the fan-out task.
    pub fn on_visualization<F>(mut self, callback: F) -> Self
    where
        F: Fn(&AudioBuffer) + Send + Sync + 'static,
    {
        self.visualization = Some(visualization_callback(callback));
        self
    }

    /// Decoder for the streamed-media input. Defaults to [`WavFileDecoder`].
    pub fn media_decoder(mut self, decoder: Arc<dyn MediaDecoder>) -> Self {
        self.media_decoder = Some(decoder);
        self
    }

    /// Where sender outputs look for speakers. Defaults to mDNS.
    pub fn browser_factory(mut self, browsers: BrowserFactory) -> Self {
        self.browsers = Some(browsers);
        self
    }

    /// Options for receiver inputs started by this bridge.
    pub fn receiver_options(mut self, options: ReceiverOptions) -> Self {
        self.receiver_options = options;
        self
    }

    /// Builds the bridge.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the tuning is invalid.
    pub fn build(self) -> Result<Bridge, BridgeError> {
        self.config.validate()?;
        let artwork = ArtworkStore::new();
        let decoder = self
            .media_decoder
            .unwrap_or_else(|| Arc::new(WavFileDecoder::new().with_chunk_duration(self.config.chunk_duration)));
        let playback = PlaybackController::new(decoder, artwork.clone());
        let registry = OutputRegistry::new(DeliverySettings::from(&self.config), self.events.clone());

        let inner = Arc::new_cyclic(|weak: &Weak<BridgeInner>| {
            let source: Arc<dyn StatsSource> = Arc::new(WeakStats(weak.clone()));
            BridgeInner {
                poller: StatPoller::new(source, self.config.stat_interval, self.config.stat_write_timeout),
                config: self.config,
                registry,
                counters: Arc::new(InputCounters::default()),
                events: self.events,
                visualization: self.visualization,
                artwork,
                playback,
                browsers: self.browsers.unwrap_or_else(mdns_browser_factory),
                receiver_options: self.receiver_options,
                receiver_clients: RwLock::new(None),
                control: tokio::sync::Mutex::new(ControlState::default()),
            }
        });
        Ok(Bridge { inner })
    }
}

/// Routes audio from one input to many outputs.
///
/// Cheap to clone; all clones drive the same bridge. Must be used from
/// within a tokio runtime.
///
/// # Example
///
/// ```
/// use stream_bridge::{AudioBuffer, Bridge, ChannelOutput, MockInput};
/// use tokio::sync::mpsc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), stream_bridge::BridgeError> {
/// let bridge = Bridge::builder().build()?;
///
/// let (tx, mut rx) = mpsc::channel::<AudioBuffer>(16);
/// bridge.add_custom_output(ChannelOutput::new(tx)).await?;
///
/// let (input, handle) = MockInput::new("tone", 44100, 2);
/// bridge.start_custom_input(input).await?;
/// handle.push_sine(440.0, 20);
///
/// let buffer = rx.recv().await.unwrap();
/// assert_eq!(buffer.frame_count(), 882);
/// bridge.shutdown().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

impl Bridge {
    /// Returns a builder.
    pub fn builder() -> BridgeBuilder {
        BridgeBuilder::new()
    }

    /// The tuning this bridge was built with.
    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// Replaces the active input with a new backend.
    ///
    /// The previous input is stopped and has released its resources before
    /// the new one is opened. If the new backend fails to open, the bridge
    /// is left without an input.
    ///
    /// # Errors
    ///
    /// A configuration error for an invalid [`InputSpec`] (the current input keeps
    /// running), a backend error if the new backend cannot be opened.
    pub async fn start_input(&self, spec: InputSpec) -> Result<(), BridgeError> {
        spec.validate()?;
        let inner = &self.inner;
        let mut control = inner.control.lock().await;
        if control.shut_down {
            return Err(BridgeError::backend("bridge", "bridge is shut down"));
        }
        self.release_input(&mut control).await;

        let kind = spec.kind();
        let input: Box<dyn Input> = match spec {
            InputSpec::Receiver(config) => {
                let receiver =
                    ReceiverInput::start(&config, inner.artwork.clone(), inner.receiver_options.clone())
                        .await?;
                *inner.receiver_clients.write() = Some(receiver.connected_clients());
                Box::new(receiver)
            }
            InputSpec::Capture(config) => Box::new(CaptureInput::start(&config, &inner.config).await?),
            InputSpec::StreamedMedia(config) => Box::new(inner.playback.attach(config.verbose)),
        };
        self.spawn_fanout(&mut control, kind, input);
        Ok(())
    }

    /// Replaces the active input with one supplied by the caller.
    ///
    /// # Errors
    ///
    /// Fails only once the bridge has been shut down.
    pub async fn start_custom_input<I>(&self, input: I) -> Result<(), BridgeError>
    where
        I: Input + 'static,
    {
        let mut control = self.inner.control.lock().await;
        if control.shut_down {
            return Err(BridgeError::backend("bridge", "bridge is shut down"));
        }
        self.release_input(&mut control).await;
        self.spawn_fanout(&mut control, "custom", Box::new(input));
        Ok(())
    }

    /// Stops the active input, if any.
    pub async fn stop_input(&self) {
        let mut control = self.inner.control.lock().await;
        self.release_input(&mut control).await;
    }

    async fn release_input(&self, control: &mut ControlState) {
        if let Some(active) = control.input.take() {
            active.cancel.cancel();
            if let Err(e) = active.task.await {
                tracing::error!(input = active.kind, "fan-out task failed: {e}");
            }
        }
        self.inner.artwork.clear();
        *self.inner.receiver_clients.write() = None;
    }

    fn spawn_fanout(&self, control: &mut ControlState, kind: &'static str, input: Box<dyn Input>) {
        let inner = &self.inner;
        let cancel = CancellationToken::new();
        let fanout = FanOut::new(
            input,
            inner.registry.clone(),
            inner.counters.clone(),
            inner.events.clone(),
            inner.visualization.clone(),
        );
        let task = tokio::spawn(fanout.run(cancel.clone()));
        control.input = Some(ActiveInput { kind, cancel, task });
        tracing::info!(kind, "input attached");
    }

    /// Creates an output backend and attaches it.
    ///
    /// Discovery for a sender output is bounded by
    /// [`BridgeConfig::discovery_timeout`]. Existing outputs keep streaming
    /// throughout.
    ///
    /// # Errors
    ///
    /// Configuration errors for an invalid [`OutputSpec`], a discovery timeout when
    /// no speaker matched, backend errors when the backend cannot start.
    pub async fn add_output(&self, spec: OutputSpec) -> Result<OutputId, BridgeError> {
        spec.validate()?;
        let inner = &self.inner;
        let output: Arc<dyn Output> = match spec {
            OutputSpec::Sender(config) => Arc::new(
                SenderOutput::connect(
                    &config,
                    &inner.browsers,
                    inner.config.discovery_timeout,
                    inner.config.output_write_timeout,
                )
                .await?,
            ),
            OutputSpec::Local(config) => Arc::new(LocalOutput::start(&config, &inner.config).await?),
        };
        self.attach(output).await
    }

    /// Attaches an output supplied by the caller.
    ///
    /// # Errors
    ///
    /// Fails only once the bridge has been shut down.
    pub async fn add_custom_output<O>(&self, output: O) -> Result<OutputId, BridgeError>
    where
        O: Output + 'static,
    {
        self.attach(Arc::new(output)).await
    }

    async fn attach(&self, output: Arc<dyn Output>) -> Result<OutputId, BridgeError> {
        let control = self.inner.control.lock().await;
        if control.shut_down {
            drop(control);
            if let Err(e) = output.stop().await {
                tracing::debug!(output = output.name(), "stop after refused attach: {e}");
            }
            return Err(BridgeError::backend("bridge", "bridge is shut down"));
        }

        let name = output.name().to_string();
        let id = self.inner.registry.attach(output);
        tracing::info!(output = %name, %id, "output added");
        self.inner.emit(BridgeEvent::OutputAdded { id, name });
        Ok(id)
    }

    /// Detaches an output.
    ///
    /// Buffers already queued to it are delivered first, bounded by
    /// [`BridgeConfig::output_drain_timeout`]. The output is then stopped,
    /// waiting at most [`BridgeConfig::output_write_timeout`]. Once this
    /// returns the output receives nothing further.
    ///
    /// # Errors
    ///
    /// A configuration error for an id that isn't attached.
    pub async fn remove_output(&self, id: OutputId) -> Result<(), BridgeError> {
        let _control = self.inner.control.lock().await;
        self.detach(id, "removed").await
    }

    async fn detach(&self, id: OutputId, reason: &str) -> Result<(), BridgeError> {
        let slot = self
            .inner
            .registry
            .detach(id)
            .await
            .ok_or_else(|| BridgeError::config(format!("no output with id {id}")))?;
        tracing::info!(output = %slot.name, %id, reason, "output removed");
        self.inner.emit(BridgeEvent::OutputRemoved {
            id,
            name: slot.name.clone(),
            reason: reason.to_string(),
        });
        Ok(())
    }

    /// Ids of the attached outputs, in attach order.
    pub fn output_ids(&self) -> Vec<OutputId> {
        self.inner.registry.ids()
    }

    /// Applies a local playback control action. Returns how many local
    /// outputs it touched.
    ///
    /// `Stop` removes every local output; the verbose actions toggle their
    /// diagnostics.
    pub async fn local_playback(&self, control: PlaybackControl) -> Result<usize, BridgeError> {
        let _control = self.inner.control.lock().await;
        let locals: Vec<_> = self
            .inner
            .registry
            .snapshot()
            .iter()
            .filter(|slot| slot.kind == OutputKind::Local)
            .cloned()
            .collect();

        for slot in &locals {
            match control.action {
                PlaybackAction::Stop => self.detach(slot.id, "local playback stopped").await?,
                PlaybackAction::EnableVerbose => slot.output.set_verbose(true),
                PlaybackAction::DisableVerbose => slot.output.set_verbose(false),
            }
        }
        Ok(locals.len())
    }

    /// Current statistics.
    pub fn stats(&self) -> BridgeStats {
        self.inner.stats()
    }

    /// Latest artwork from the active input, if any.
    pub fn artwork(&self) -> Option<Bytes> {
        self.inner.artwork.get()
    }

    /// Remote addresses connected to the active receiver input.
    pub fn receiver_clients(&self) -> Vec<SocketAddr> {
        self.inner
            .receiver_clients
            .read()
            .as_ref()
            .map(ConnectedClients::list)
            .unwrap_or_default()
    }

    /// The streamed-media playback controller.
    pub fn playback(&self) -> &PlaybackController {
        &self.inner.playback
    }

    /// Registers a monitoring client with the stat poller, starting the
    /// poller on first use.
    ///
    /// # Errors
    ///
    /// A backend error if the subscriber's handshake fails or the bridge
    /// has been shut down.
    pub async fn add_stat_subscriber(&self, sink: Arc<dyn StatSink>) -> Result<SubscriberId, BridgeError> {
        let control = self.inner.control.lock().await;
        if control.shut_down {
            return Err(BridgeError::backend("bridge", "bridge is shut down"));
        }
        let id = self.inner.poller.add_subscriber(sink).await?;
        self.inner.poller.start();
        Ok(id)
    }

    /// Removes a monitoring client. Returns `false` for an unknown id.
    pub async fn remove_stat_subscriber(&self, id: SubscriberId) -> bool {
        self.inner.poller.remove_subscriber(id).await
    }

    /// Stops the input, the player, every output and the stat poller.
    ///
    /// Later control calls fail with a backend error.
    pub async fn shutdown(&self) {
        let mut control = self.inner.control.lock().await;
        if control.shut_down {
            return;
        }
        control.shut_down = true;
        self.release_input(&mut control).await;
        self.inner.playback.stop().await;

        for id in self.inner.registry.ids() {
            if let Err(e) = self.detach(id, "shutdown").await {
                tracing::debug!(%id, "already gone at shutdown: {e}");
            }
        }
        self.inner.poller.stop().await;
        tracing::info!("bridge shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::StaticBrowser;
    use crate::statpoll::ChannelStatSink;
    use crate::{
        ChannelOutput, ErrorKind, InputGauge, MockInput, OutputError, ReceiverInputConfig,
        SearchType, SenderOutputConfig, StreamedMediaInputConfig,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn bridge() -> Bridge {
        Bridge::builder()
            .browser_factory(StaticBrowser::default().factory())
            .build()
            .unwrap()
    }

    struct NamedLocal {
        verbose: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl Output for NamedLocal {
        fn name(&self) -> &str {
            "fake-local"
        }

        fn kind(&self) -> OutputKind {
            OutputKind::Local
        }

        async fn consume(&self, _buffer: &AudioBuffer) -> Result<(), OutputError> {
            Ok(())
        }

        fn set_verbose(&self, verbose: bool) {
            self.verbose.store(verbose, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let result = Bridge::builder()
            .config(BridgeConfig {
                output_queue_capacity: 0,
                ..Default::default()
            })
            .build();
        assert_eq!(result.err().unwrap().kind(), ErrorKind::Config);
    }

    #[tokio::test]
    async fn test_invalid_input_spec_keeps_current_input() {
        let bridge = bridge();
        let gauge = InputGauge::new();
        let (input, handle) = MockInput::new("first", 44100, 2);
        bridge.start_custom_input(input.with_gauge(gauge.clone())).await.unwrap();
        handle.push_silence(10);

        let err = bridge
            .start_input(InputSpec::Receiver(ReceiverInputConfig {
                name: String::new(),
                port: 5000,
                verbose: false,
            }))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(!handle.is_stopped());
        bridge.shutdown().await;
        assert!(handle.is_stopped());
    }

    #[tokio::test]
    async fn test_remove_unknown_output_is_config_error() {
        let bridge = bridge();
        let err = bridge.remove_output(OutputId::new(42)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[tokio::test]
    async fn test_events_for_add_and_remove() {
        let added = Arc::new(AtomicUsize::new(0));
        let removed = Arc::new(AtomicUsize::new(0));
        let (a, r) = (added.clone(), removed.clone());
        let bridge = Bridge::builder()
            .browser_factory(StaticBrowser::default().factory())
            .on_event(move |event| match event {
                BridgeEvent::OutputAdded { .. } => {
                    a.fetch_add(1, Ordering::SeqCst);
                }
                BridgeEvent::OutputRemoved { .. } => {
                    r.fetch_add(1, Ordering::SeqCst);
                }
                _ => {}
            })
            .build()
            .unwrap();

        let (tx, _rx) = mpsc::channel(4);
        let id = bridge.add_custom_output(ChannelOutput::new(tx)).await.unwrap();
        assert_eq!(bridge.output_ids(), vec![id]);
        bridge.remove_output(id).await.unwrap();
        assert!(bridge.output_ids().is_empty());
        assert_eq!(added.load(Ordering::SeqCst), 1);
        assert_eq!(removed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_local_playback_control_only_touches_local_outputs() {
        let bridge = bridge();
        let (tx, _rx) = mpsc::channel(4);
        let channel = bridge.add_custom_output(ChannelOutput::new(tx)).await.unwrap();
        bridge
            .add_custom_output(NamedLocal {
                verbose: std::sync::atomic::AtomicBool::new(false),
            })
            .await
            .unwrap();

        let touched = bridge
            .local_playback(PlaybackControl {
                action: PlaybackAction::EnableVerbose,
            })
            .await
            .unwrap();
        assert_eq!(touched, 1);

        let touched = bridge
            .local_playback(PlaybackControl {
                action: PlaybackAction::Stop,
            })
            .await
            .unwrap();
        assert_eq!(touched, 1);
        assert_eq!(bridge.output_ids(), vec![channel]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sender_discovery_timeout_surfaces() {
        let bridge = Bridge::builder()
            .config(BridgeConfig {
                discovery_timeout: Duration::from_secs(3),
                ..Default::default()
            })
            .browser_factory(StaticBrowser::default().factory())
            .build()
            .unwrap();
        let err = bridge
            .add_output(OutputSpec::Sender(SenderOutputConfig {
                search_key: "^Kitchen".to_string(),
                search_type: SearchType::Name,
                verbose: false,
            }))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DiscoveryTimeout);
        assert!(bridge.output_ids().is_empty());
    }

    #[tokio::test]
    async fn test_streamed_media_input_and_stats() {
        let bridge = bridge();
        bridge
            .start_input(InputSpec::StreamedMedia(StreamedMediaInputConfig { verbose: true }))
            .await
            .unwrap();
        assert!(bridge.playback().is_attached());
        assert!(bridge.playback().info().verbose);

        let (tx, mut rx) = mpsc::channel(4);
        bridge
            .add_stat_subscriber(Arc::new(ChannelStatSink::new("monitor", tx)))
            .await
            .unwrap();
        let message = rx.recv().await.unwrap();
        let stats: serde_json::Value = serde_json::from_str(&message).unwrap();
        assert_eq!(stats["input"], "streamed-media");
        assert_eq!(stats["stat_subscribers"], 1);

        bridge.shutdown().await;
        assert!(!bridge.playback().is_attached());
        assert_eq!(bridge.stats().input, None);
        assert!(bridge.start_custom_input(MockInput::scripted("late", vec![])).await.is_err());
    }

    #[tokio::test]
    async fn test_stat_subscriber_rejected_after_shutdown() {
        let bridge = bridge();
        bridge.shutdown().await;

        let (tx, _rx) = mpsc::channel(4);
        let err = bridge
            .add_stat_subscriber(Arc::new(ChannelStatSink::new("late", tx)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Backend);
        assert_eq!(bridge.stats().stat_subscribers, 0);
    }

    #[tokio::test]
    async fn test_artwork_cleared_when_input_replaced() {
        let bridge = bridge();
        bridge.inner.artwork.set(Bytes::from_static(b"png"));
        assert!(bridge.artwork().is_some());

        bridge
            .start_custom_input(MockInput::scripted("next", vec![]))
            .await
            .unwrap();
        assert!(bridge.artwork().is_none());
        assert!(bridge.receiver_clients().is_empty());
    }
}
