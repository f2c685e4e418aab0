//! Media items and the decoders that turn them into PCM.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::format::{f32_to_i16, int_to_i16};
use crate::{AudioBuffer, BridgeError};

/// One playable item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    /// Where the decoder finds the media (a path for [`WavFileDecoder`]).
    pub location: String,
    /// Display title.
    #[serde(default)]
    pub title: Option<String>,
}

impl MediaItem {
    /// Creates an untitled item.
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            title: None,
        }
    }

    /// Sets the display title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Title, falling back to the location.
    pub fn label(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.location)
    }
}

/// An opened item yielding decoded buffers.
#[async_trait]
pub trait DecodedTrack: Send {
    /// Next buffer; `None` at the end of the item.
    async fn next_buffer(&mut self) -> Option<Result<AudioBuffer, BridgeError>>;

    /// Embedded cover art, if any.
    fn artwork(&self) -> Option<Bytes> {
        None
    }
}

/// Opens media items. Codec internals live behind this trait.
#[async_trait]
pub trait MediaDecoder: Send + Sync {
    /// Opens `item` for decoding.
    async fn open(&self, item: &MediaItem) -> Result<Box<dyn DecodedTrack>, BridgeError>;
}

/// Buffers decoded up front, handed out in order.
pub struct BufferedTrack {
    buffers: VecDeque<AudioBuffer>,
    artwork: Option<Bytes>,
}

impl BufferedTrack {
    /// Wraps already decoded buffers.
    pub fn new(buffers: Vec<AudioBuffer>) -> Self {
        Self {
            buffers: buffers.into(),
            artwork: None,
        }
    }

    /// Splits interleaved samples into buffers of `chunk` duration.
    pub fn from_samples(samples: &[i16], sample_rate: u32, channels: u16, chunk: Duration) -> Self {
        let channels = channels.max(1);
        let frames = ((f64::from(sample_rate) * chunk.as_secs_f64()) as usize).max(1);
        let mut position = 0usize;
        let buffers = samples
            .chunks(frames * channels as usize)
            .map(|chunk| {
                let timestamp =
                    Duration::from_secs_f64(position as f64 / f64::from(sample_rate.max(1)));
                position += chunk.len() / channels as usize;
                AudioBuffer::new(chunk.to_vec(), timestamp, sample_rate, channels)
            })
            .collect();
        Self::new(buffers)
    }

    /// Attaches cover art.
    pub fn with_artwork(mut self, artwork: Bytes) -> Self {
        self.artwork = Some(artwork);
        self
    }
}

#[async_trait]
impl DecodedTrack for BufferedTrack {
    async fn next_buffer(&mut self) -> Option<Result<AudioBuffer, BridgeError>> {
        self.buffers.pop_front().map(Ok)
    }

    fn artwork(&self) -> Option<Bytes> {
        self.artwork.clone()
    }
}

/// Decodes local WAV files with `hound`.
#[derive(Debug, Clone)]
pub struct WavFileDecoder {
    chunk_duration: Duration,
}

impl Default for WavFileDecoder {
    fn default() -> Self {
        Self {
            chunk_duration: Duration::from_millis(20),
        }
    }
}

impl WavFileDecoder {
    /// Decoder emitting 20ms buffers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Changes the emitted buffer duration.
    pub fn with_chunk_duration(mut self, chunk_duration: Duration) -> Self {
        self.chunk_duration = chunk_duration;
        self
    }
}

fn read_wav(path: &PathBuf) -> Result<(Vec<i16>, u32, u16), BridgeError> {
    let wav_error = |e: hound::Error| BridgeError::backend("media", format!("{}: {e}", path.display()));

    let mut reader = hound::WavReader::open(path).map_err(wav_error)?;
    let spec = reader.spec();
    let samples = match spec.sample_format {
        hound::SampleFormat::Int => reader
            .samples::<i32>()
            .map(|s| s.map(|s| int_to_i16(s, spec.bits_per_sample)))
            .collect::<Result<Vec<_>, _>>(),
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map(f32_to_i16))
            .collect::<Result<Vec<_>, _>>(),
    }
    .map_err(wav_error)?;

    Ok((samples, spec.sample_rate, spec.channels))
}

#[async_trait]
impl MediaDecoder for WavFileDecoder {
    async fn open(&self, item: &MediaItem) -> Result<Box<dyn DecodedTrack>, BridgeError> {
        let path = PathBuf::from(&item.location);
        let (samples, rate, channels) = tokio::task::spawn_blocking(move || read_wav(&path))
            .await
            .map_err(|e| BridgeError::backend("media", e))??;

        tracing::debug!(item = item.label(), rate, channels, samples = samples.len(), "decoded");
        Ok(Box::new(BufferedTrack::from_samples(
            &samples,
            rate,
            channels,
            self.chunk_duration,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &std::path::Path, spec: hound::WavSpec, frames: usize) {
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..frames * spec.channels as usize {
            match spec.sample_format {
                hound::SampleFormat::Int => writer.write_sample((i % 100) as i16).unwrap(),
                hound::SampleFormat::Float => writer.write_sample(0.5f32).unwrap(),
            }
        }
        writer.finalize().unwrap();
    }

    async fn drain(mut track: Box<dyn DecodedTrack>) -> Vec<AudioBuffer> {
        let mut buffers = Vec::new();
        while let Some(buffer) = track.next_buffer().await {
            buffers.push(buffer.unwrap());
        }
        buffers
    }

    #[tokio::test]
    async fn test_decodes_int_wav_in_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        write_wav(&path, spec, 400);

        let decoder = WavFileDecoder::new().with_chunk_duration(Duration::from_millis(20));
        let track = decoder
            .open(&MediaItem::new(path.to_string_lossy()))
            .await
            .unwrap();
        let buffers = drain(track).await;

        // 160 frames per chunk: 160 + 160 + 80.
        assert_eq!(buffers.len(), 3);
        assert_eq!(buffers[0].frame_count(), 160);
        assert_eq!(buffers[2].frame_count(), 80);
        assert_eq!(buffers[1].timestamp, Duration::from_millis(20));
        assert_eq!(buffers[0].samples[..3], [0, 1, 2]);
    }

    #[tokio::test]
    async fn test_decodes_float_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("float.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        write_wav(&path, spec, 100);

        let track = WavFileDecoder::new()
            .open(&MediaItem::new(path.to_string_lossy()))
            .await
            .unwrap();
        let buffers = drain(track).await;
        assert_eq!(buffers[0].samples[0], f32_to_i16(0.5));
        assert_eq!(buffers[0].channels, 1);
    }

    #[tokio::test]
    async fn test_missing_file_is_backend_error() {
        let err = WavFileDecoder::new()
            .open(&MediaItem::new("/nonexistent/file.wav"))
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), crate::ErrorKind::Backend);
    }

    #[test]
    fn test_item_label() {
        assert_eq!(MediaItem::new("/a.wav").label(), "/a.wav");
        assert_eq!(MediaItem::new("/a.wav").with_title("A").label(), "A");
    }
}
