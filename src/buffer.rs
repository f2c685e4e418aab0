//! Decoded audio buffer passed from the input to every output.

use std::sync::Arc;
use std::time::Duration;

/// A discrete block of decoded, interleaved PCM samples.
///
/// `AudioBuffer` is the unit the fan-out loop moves around. Samples are held
/// in an `Arc<[i16]>`, so handing the same buffer to many outputs and to the
/// visualization callback never copies sample data.
///
/// # Example
///
/// ```
/// use stream_bridge::AudioBuffer;
/// use std::time::Duration;
///
/// let buffer = AudioBuffer::new(vec![0i16; 882], Duration::ZERO, 44100, 2);
/// assert_eq!(buffer.duration(), Duration::from_millis(10));
///
/// let shared = buffer.clone(); // shares sample data
/// assert_eq!(shared.frame_count(), 441);
/// ```
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    /// Interleaved 16-bit signed samples.
    pub samples: Arc<[i16]>,

    /// Position of the first frame relative to the start of the input.
    pub timestamp: Duration,

    /// Sample rate in Hz.
    pub sample_rate: u32,

    /// Number of interleaved channels.
    pub channels: u16,
}

impl AudioBuffer {
    /// Creates a buffer from owned samples.
    pub fn new(samples: Vec<i16>, timestamp: Duration, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples: samples.into(),
            timestamp,
            sample_rate,
            channels,
        }
    }

    /// Creates a buffer from already shared samples.
    pub fn from_shared(
        samples: Arc<[i16]>,
        timestamp: Duration,
        sample_rate: u32,
        channels: u16,
    ) -> Self {
        Self {
            samples,
            timestamp,
            sample_rate,
            channels,
        }
    }

    /// Returns the playback duration of this buffer.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 || self.channels == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frame_count() as f64 / f64::from(self.sample_rate))
    }

    /// Returns the number of frames (one sample per channel).
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    /// Returns `true` if the buffer holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Returns the timestamp just past the last frame.
    pub fn end_timestamp(&self) -> Duration {
        self.timestamp + self.duration()
    }
}
