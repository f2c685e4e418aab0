//! # stream-bridge
//!
//! **Note:** This crate is under active development. The API may change before 1.0.
//!
//! Routes audio from one input to many outputs, with hot-swap on both sides.
//!
//! A [`Bridge`] owns at most one active [`Input`] and any number of
//! [`Output`]s. Inputs are a virtual wireless speaker fed by a remote
//! sender ([`ReceiverInput`]), a local capture device ([`CaptureInput`])
//! or streamed media driven by a [`PlaybackController`](playback::PlaybackController)
//! ([`StreamedMediaInput`]). Outputs forward to a discovered wireless
//! speaker ([`SenderOutput`]) or play locally ([`LocalOutput`]).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stream_bridge::{
//!     Bridge, InputSpec, LocalOutputConfig, OutputSpec, ReceiverInputConfig,
//! };
//!
//! # async fn run() -> Result<(), stream_bridge::BridgeError> {
//! let bridge = Bridge::builder()
//!     .on_event(|e| tracing::warn!(?e, "bridge event"))
//!     .build()?;
//!
//! bridge
//!     .start_input(InputSpec::Receiver(ReceiverInputConfig {
//!         name: "Living Room Bridge".to_string(),
//!         port: 7000,
//!         verbose: false,
//!     }))
//!     .await?;
//! bridge.add_output(OutputSpec::Local(LocalOutputConfig::default())).await?;
//!
//! // ... later
//! bridge.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **Fan-out task**: pulls buffers from the active input and hands each
//!   one, in order, to every attached output's queue
//! - **Delivery tasks**: one per output; a slow or failing output only
//!   backs up its own queue and is removed after repeated failures
//! - **Device threads**: cpal streams live on dedicated threads and talk
//!   to tokio through lock-free ring buffers
//!
//! Untyped JSON enters only through [`ControlPlane`].

// unsafe_code lint is configured in Cargo.toml as "deny"
#![warn(missing_docs)]
// Audio code requires intentional numeric casts between sample formats
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]
// unwrap/expect allowed in tests only
#![allow(clippy::unwrap_used)]
// These doc lints are too strict for internal implementation details
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

mod artwork;
mod bridge;
mod buffer;
mod config;
mod control;
pub mod discovery;
mod error;
mod event;
pub mod format;
pub mod input;
mod netif;
pub mod output;
mod pipeline;
pub mod playback;
mod rtp;
pub mod rtsp;
pub mod statpoll;

pub use artwork::ArtworkStore;
pub use bridge::{Bridge, BridgeBuilder, BridgeStats, OutputStats};
pub use buffer::AudioBuffer;
pub use config::{
    AudioDeviceSelector, BridgeConfig, CaptureInputConfig, InputSpec, LocalOutputConfig,
    OutputSpec, PlaybackAction, PlaybackControl, ReceiverInputConfig, SearchType,
    SenderOutputConfig, StreamedMediaInputConfig,
};
pub use control::{ControlPlane, ControlReply, MediaCommand};
pub use error::{BridgeError, ErrorKind, OutputError, ProtocolError};
pub use event::{
    event_callback, visualization_callback, BridgeEvent, EventCallback, VisualizationCallback,
};
pub use input::{
    list_input_devices, CaptureInput, Input, InputGauge, MockInput, MockInputHandle,
    ReceiverInput, StreamedMediaInput,
};
pub use netif::outbound_ip;
pub use output::{ChannelOutput, LocalOutput, Output, OutputId, OutputKind, SenderOutput};
