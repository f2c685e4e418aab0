//! Streamed-media playback.
//!
//! A [`PlaybackController`] plays single items or playlists into the
//! [`StreamedMediaInput`](crate::input::StreamedMediaInput) it hands out.
//! Decoding happens behind [`MediaDecoder`]; [`WavFileDecoder`] covers local
//! WAV files.

mod controller;
mod decoder;
mod player;

pub use controller::{PlaybackController, PlaybackInfo, PlayerState};
pub use decoder::{BufferedTrack, DecodedTrack, MediaDecoder, MediaItem, WavFileDecoder};
