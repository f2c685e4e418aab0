//! Configuration types for the bridge and its backends.
//!
//! [`BridgeConfig`] carries runtime tuning. The per-backend structs carry the
//! fields a control-plane caller supplies when starting an input or adding
//! an output; [`InputSpec`] and [`OutputSpec`] pair each backend kind with
//! its typed configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::BridgeError;

/// Runtime tuning for a [`Bridge`](crate::Bridge).
///
/// Use [`BridgeConfig::default()`] for sensible defaults. Durations are
/// serialized as whole milliseconds.
///
/// # Example
///
/// ```
/// use stream_bridge::BridgeConfig;
/// use std::time::Duration;
///
/// let config = BridgeConfig {
///     max_consecutive_failures: 10,
///     discovery_timeout: Duration::from_secs(30),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Buffers queued per output before the fan-out loop waits on it.
    ///
    /// Default: 64
    pub output_queue_capacity: usize,

    /// Consecutive delivery failures after which an output is removed.
    ///
    /// Default: 5
    pub max_consecutive_failures: u32,

    /// Bound on a single `consume` call; a timeout counts as a failure.
    ///
    /// Default: 2s
    #[serde(with = "millis")]
    pub output_write_timeout: Duration,

    /// How long `remove_output` waits for queued buffers to drain.
    ///
    /// Default: 500ms
    #[serde(with = "millis")]
    pub output_drain_timeout: Duration,

    /// Bound on sender-output discovery.
    ///
    /// Default: 10s
    #[serde(with = "millis")]
    pub discovery_timeout: Duration,

    /// Interval between stat poller ticks.
    ///
    /// Default: 1s
    #[serde(with = "millis")]
    pub stat_interval: Duration,

    /// Bound on a single stat subscriber write.
    ///
    /// Default: 250ms
    #[serde(with = "millis")]
    pub stat_write_timeout: Duration,

    /// Duration of each buffer produced by the capture input.
    ///
    /// Default: 20ms
    #[serde(with = "millis")]
    pub chunk_duration: Duration,

    /// Size of the ring buffers between the audio device threads and tokio.
    ///
    /// Default: 2s
    #[serde(with = "millis")]
    pub ring_buffer_duration: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            output_queue_capacity: 64,
            max_consecutive_failures: 5,
            output_write_timeout: Duration::from_secs(2),
            output_drain_timeout: Duration::from_millis(500),
            discovery_timeout: Duration::from_secs(10),
            stat_interval: Duration::from_secs(1),
            stat_write_timeout: Duration::from_millis(250),
            chunk_duration: Duration::from_millis(20),
            ring_buffer_duration: Duration::from_secs(2),
        }
    }
}

impl BridgeConfig {
    /// Checks that the values are usable.
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.output_queue_capacity == 0 {
            return Err(BridgeError::config("output_queue_capacity must be > 0"));
        }
        if self.max_consecutive_failures == 0 {
            return Err(BridgeError::config("max_consecutive_failures must be > 0"));
        }
        if self.output_write_timeout.is_zero() {
            return Err(BridgeError::config("output_write_timeout must be > 0"));
        }
        if self.chunk_duration.is_zero() {
            return Err(BridgeError::config("chunk_duration must be > 0"));
        }
        if self.stat_interval.is_zero() {
            return Err(BridgeError::config("stat_interval must be > 0"));
        }
        Ok(())
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Starts the receiver input (a virtual wireless speaker).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiverInputConfig {
    /// Name advertised to senders.
    pub name: String,
    /// TCP port for the session protocol.
    pub port: u16,
    /// Dump every request and response.
    #[serde(default)]
    pub verbose: bool,
}

impl ReceiverInputConfig {
    /// Checks the name and port.
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.name.trim().is_empty() {
            return Err(BridgeError::config("receiver name must not be empty"));
        }
        if self.port == 0 {
            return Err(BridgeError::config("receiver port must not be 0"));
        }
        Ok(())
    }
}

/// How [`SenderOutputConfig::search_key`] is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchType {
    /// Exact IP address match.
    Ip,
    /// Regular expression over the device name.
    Name,
}

/// Adds a sender output, forwarding audio to a discovered speaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderOutputConfig {
    /// IP address or name pattern, depending on `search_type`.
    pub search_key: String,
    /// Selects IP or name matching.
    pub search_type: SearchType,
    /// Log every observed device and protocol exchange.
    #[serde(default)]
    pub verbose: bool,
}

/// Identifies a local capture device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioDeviceSelector {
    /// Index into the host's input device list.
    #[serde(default)]
    pub id: Option<usize>,
    /// Exact device name.
    #[serde(default)]
    pub name: Option<String>,
}

/// Starts the capture input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureInputConfig {
    /// Which device to capture from. Required.
    #[serde(default)]
    pub audio_device: Option<AudioDeviceSelector>,
    /// Log stream setup and periodic levels.
    #[serde(default)]
    pub verbose: bool,
}

impl CaptureInputConfig {
    /// Returns the selector, or a configuration error if none was given.
    pub fn selector(&self) -> Result<&AudioDeviceSelector, BridgeError> {
        match &self.audio_device {
            Some(selector) if selector.id.is_some() || selector.name.is_some() => Ok(selector),
            Some(_) => Err(BridgeError::config(
                "audio_device needs an id or a name",
            )),
            None => Err(BridgeError::config("missing audio_device selector")),
        }
    }
}

/// Adds a local playback output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalOutputConfig {
    /// Log underruns and stream setup.
    #[serde(default)]
    pub verbose: bool,
}

/// Starts the streamed-media input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamedMediaInputConfig {
    /// Verbose diagnostics in the player.
    #[serde(default)]
    pub verbose: bool,
}

/// Action for the local playback control call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum PlaybackAction {
    /// Stop local playback.
    Stop,
    /// Turn on verbose logging for local playback.
    EnableVerbose,
    /// Turn off verbose logging for local playback.
    DisableVerbose,
}

impl TryFrom<u8> for PlaybackAction {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Stop),
            1 => Ok(Self::EnableVerbose),
            2 => Ok(Self::DisableVerbose),
            other => Err(format!("unknown action '{other}'")),
        }
    }
}

impl From<PlaybackAction> for u8 {
    fn from(action: PlaybackAction) -> Self {
        match action {
            PlaybackAction::Stop => 0,
            PlaybackAction::EnableVerbose => 1,
            PlaybackAction::DisableVerbose => 2,
        }
    }
}

/// Local playback control payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackControl {
    /// What to do.
    pub action: PlaybackAction,
}

/// An input backend together with its configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSpec {
    /// Virtual wireless speaker fed by a remote sender.
    Receiver(ReceiverInputConfig),
    /// Local capture device.
    Capture(CaptureInputConfig),
    /// Streamed media driven by the playback controller.
    StreamedMedia(StreamedMediaInputConfig),
}

impl InputSpec {
    /// Short backend name used in logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Receiver(_) => "receiver",
            Self::Capture(_) => "capture",
            Self::StreamedMedia(_) => "streamed-media",
        }
    }

    /// Structural validation, run before the current input is touched.
    pub fn validate(&self) -> Result<(), BridgeError> {
        match self {
            Self::Receiver(config) => config.validate(),
            Self::Capture(config) => config.selector().map(|_| ()),
            Self::StreamedMedia(_) => Ok(()),
        }
    }
}

/// An output backend together with its configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputSpec {
    /// Forward to a discovered wireless speaker.
    Sender(SenderOutputConfig),
    /// Play on the local default output device.
    Local(LocalOutputConfig),
}

impl OutputSpec {
    /// Short backend name used in logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Sender(_) => "sender",
            Self::Local(_) => "local",
        }
    }

    /// Structural validation, run before any backend is created.
    pub fn validate(&self) -> Result<(), BridgeError> {
        match self {
            Self::Sender(config) if config.search_key.trim().is_empty() => {
                Err(BridgeError::config("search_key must not be empty"))
            }
            _ => Ok(()),
        }
    }
}
