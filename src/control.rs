//! JSON control plane.
//!
//! [`ControlPlane`] is the boundary where untyped payloads become typed
//! configuration. Each call decodes one payload, invokes one
//! [`Bridge`] or [`PlaybackController`](crate::playback::PlaybackController)
//! operation and returns a [`ControlReply`]. A payload that fails to decode
//! is a configuration error; nothing is touched in that case.
//!
//! [`ControlPlane::handle`] routes by name:
//!
//! | Route                  | Payload                                   |
//! |------------------------|-------------------------------------------|
//! | `set/input/receiver`   | `{name, port, verbose}`                   |
//! | `set/input/capture`    | `{audio_device: {id?, name?}, verbose}`   |
//! | `set/input/media`      | `{verbose}`                               |
//! | `stop/input`           | none                                      |
//! | `add/output/sender`    | `{search_key, search_type, verbose}`      |
//! | `add/output/local`     | `{verbose}`                               |
//! | `remove/output`        | `{id}`                                    |
//! | `ctl/local/playback`   | `{action}` (0 stop, 1/2 verbose on/off)   |
//! | `ctl/media/set`        | a [`MediaCommand`]                        |
//! | `ctl/media/info`       | none                                      |
//! | `ctl/receiver/clients` | none                                      |
//! | `get/stats`            | none                                      |
//! | `get/artwork`          | none                                      |

use std::net::SocketAddr;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize, Serializer};

use crate::output::OutputId;
use crate::playback::{MediaItem, PlaybackInfo};
use crate::{
    Bridge, BridgeError, BridgeStats, CaptureInputConfig, InputSpec, LocalOutputConfig, OutputSpec,
    PlaybackControl, ReceiverInputConfig, SenderOutputConfig, StreamedMediaInputConfig,
};

/// Transport command for the streamed-media player.
///
/// Tagged by `action`:
///
/// ```json
/// {"action": "play_playlist", "items": [{"location": "a.wav"}], "keep_playing": true}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MediaCommand {
    /// Play one item.
    PlaySingle {
        /// The item.
        item: MediaItem,
    },
    /// Play a list of items.
    PlayPlaylist {
        /// The items, in order.
        items: Vec<MediaItem>,
        /// Advance through the list on its own.
        #[serde(default)]
        keep_playing: bool,
    },
    /// Pause the current item.
    Pause,
    /// Resume after a pause.
    Resume,
    /// Skip to the next playlist item.
    Skip,
    /// End the session.
    Stop,
    /// Turn autoplay-next on or off.
    KeepPlaying {
        /// New value.
        enabled: bool,
    },
    /// Turn player diagnostics on or off.
    Verbose {
        /// New value.
        enabled: bool,
    },
}

#[derive(Deserialize)]
struct RemoveOutput {
    id: OutputId,
}

/// Result of a successful control-plane call.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ControlReply {
    /// Done, nothing to report.
    Ok,
    /// An output was attached.
    OutputAdded {
        /// Its id.
        id: OutputId,
    },
    /// How many outputs a local playback action touched.
    Count(usize),
    /// Player status.
    Playback(PlaybackInfo),
    /// Remote addresses connected to the receiver.
    Clients(Vec<SocketAddr>),
    /// Bridge statistics.
    Stats(BridgeStats),
    /// Latest artwork, if any.
    Artwork(#[serde(serialize_with = "serialize_artwork")] Option<Bytes>),
}

fn serialize_artwork<S: Serializer>(artwork: &Option<Bytes>, s: S) -> Result<S::Ok, S::Error> {
    artwork.as_deref().serialize(s)
}

/// Decodes a payload, mapping any serde failure to a configuration error.
fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, BridgeError> {
    serde_json::from_slice(payload).map_err(|e| BridgeError::config(format!("bad payload: {e}")))
}

/// JSON front end for a [`Bridge`].
///
/// Built once next to the bridge and shared by reference; it holds no
/// state of its own.
///
/// ```
/// use stream_bridge::{Bridge, ControlPlane, ControlReply};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), stream_bridge::BridgeError> {
/// let control = ControlPlane::new(Bridge::builder().build()?);
/// control.handle("set/input/media", br#"{"verbose": false}"#).await?;
/// let reply = control.handle("ctl/media/info", b"").await?;
/// assert!(matches!(reply, ControlReply::Playback(_)));
/// # control.bridge().shutdown().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ControlPlane {
    bridge: Bridge,
}

impl ControlPlane {
    /// Wraps `bridge`.
    pub fn new(bridge: Bridge) -> Self {
        Self { bridge }
    }

    /// The wrapped bridge.
    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    /// Dispatches `payload` to the operation named by `route`.
    ///
    /// # Errors
    ///
    /// A configuration error for an unknown route or a malformed payload,
    /// otherwise whatever the operation returns.
    pub async fn handle(&self, route: &str, payload: &[u8]) -> Result<ControlReply, BridgeError> {
        tracing::debug!(route, bytes = payload.len(), "control call");
        match route {
            "set/input/receiver" => self.start_receiver(payload).await,
            "set/input/capture" => self.start_capture(payload).await,
            "set/input/media" => self.start_streamed_media(payload).await,
            "stop/input" => {
                self.bridge.stop_input().await;
                Ok(ControlReply::Ok)
            }
            "add/output/sender" => self.add_sender(payload).await,
            "add/output/local" => self.add_local(payload).await,
            "remove/output" => self.remove_output(payload).await,
            "ctl/local/playback" => self.local_playback(payload).await,
            "ctl/media/set" => self.media(payload).await,
            "ctl/media/info" => Ok(self.media_info()),
            "ctl/receiver/clients" => Ok(self.receiver_clients()),
            "get/stats" => Ok(self.stats()),
            "get/artwork" => Ok(self.artwork()),
            other => Err(BridgeError::config(format!("unknown route '{other}'"))),
        }
    }

    /// Starts the receiver input from `{name, port, verbose}`.
    pub async fn start_receiver(&self, payload: &[u8]) -> Result<ControlReply, BridgeError> {
        let config: ReceiverInputConfig = decode(payload)?;
        self.bridge.start_input(InputSpec::Receiver(config)).await?;
        Ok(ControlReply::Ok)
    }

    /// Starts the capture input from `{audio_device, verbose}`.
    pub async fn start_capture(&self, payload: &[u8]) -> Result<ControlReply, BridgeError> {
        let config: CaptureInputConfig = decode(payload)?;
        self.bridge.start_input(InputSpec::Capture(config)).await?;
        Ok(ControlReply::Ok)
    }

    /// Starts the streamed-media input from `{verbose}`.
    pub async fn start_streamed_media(&self, payload: &[u8]) -> Result<ControlReply, BridgeError> {
        let config: StreamedMediaInputConfig = decode(payload)?;
        self.bridge.start_input(InputSpec::StreamedMedia(config)).await?;
        Ok(ControlReply::Ok)
    }

    /// Adds a sender output from `{search_key, search_type, verbose}`.
    pub async fn add_sender(&self, payload: &[u8]) -> Result<ControlReply, BridgeError> {
        let config: SenderOutputConfig = decode(payload)?;
        let id = self.bridge.add_output(OutputSpec::Sender(config)).await?;
        Ok(ControlReply::OutputAdded { id })
    }

    /// Adds a local output from `{verbose}`.
    pub async fn add_local(&self, payload: &[u8]) -> Result<ControlReply, BridgeError> {
        let config: LocalOutputConfig = decode(payload)?;
        let id = self.bridge.add_output(OutputSpec::Local(config)).await?;
        Ok(ControlReply::OutputAdded { id })
    }

    /// Removes the output named by `{id}`.
    pub async fn remove_output(&self, payload: &[u8]) -> Result<ControlReply, BridgeError> {
        let RemoveOutput { id } = decode(payload)?;
        self.bridge.remove_output(id).await?;
        Ok(ControlReply::Ok)
    }

    /// Applies `{action}` to the local outputs.
    pub async fn local_playback(&self, payload: &[u8]) -> Result<ControlReply, BridgeError> {
        let control: PlaybackControl = decode(payload)?;
        let touched = self.bridge.local_playback(control).await?;
        Ok(ControlReply::Count(touched))
    }

    /// Runs a [`MediaCommand`].
    pub async fn media(&self, payload: &[u8]) -> Result<ControlReply, BridgeError> {
        let command: MediaCommand = decode(payload)?;
        self.run_media(command).await
    }

    /// Runs an already decoded [`MediaCommand`].
    pub async fn run_media(&self, command: MediaCommand) -> Result<ControlReply, BridgeError> {
        let player = self.bridge.playback();
        match command {
            MediaCommand::PlaySingle { item } => player.start_single(item).await?,
            MediaCommand::PlayPlaylist { items, keep_playing } => {
                player.start_playlist(items, keep_playing).await?;
            }
            MediaCommand::Pause => player.pause()?,
            MediaCommand::Resume => player.resume()?,
            MediaCommand::Skip => player.skip()?,
            MediaCommand::Stop => player.stop().await,
            MediaCommand::KeepPlaying { enabled } => {
                player.set_keep_playing(enabled);
            }
            MediaCommand::Verbose { enabled } => player.set_verbose(enabled),
        }
        Ok(ControlReply::Ok)
    }

    /// Player status.
    pub fn media_info(&self) -> ControlReply {
        ControlReply::Playback(self.bridge.playback().info())
    }

    /// Addresses connected to the receiver input.
    pub fn receiver_clients(&self) -> ControlReply {
        ControlReply::Clients(self.bridge.receiver_clients())
    }

    /// Bridge statistics.
    pub fn stats(&self) -> ControlReply {
        ControlReply::Stats(self.bridge.stats())
    }

    /// Latest artwork.
    pub fn artwork(&self) -> ControlReply {
        ControlReply::Artwork(self.bridge.artwork())
    }
}
