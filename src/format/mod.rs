//! Audio format conversion utilities.
//!
//! Outputs rarely run at the input's native format: a speaker wants
//! 44.1kHz stereo L16, the local sound card wants whatever it was opened
//! with. [`FormatConverter`] bridges the two for a fixed target.

mod convert;
mod resample;

pub use convert::{f32_to_i16, i16_to_f32, i16_to_l16, int_to_i16, l16_to_i16, remap_channels};
pub use resample::resample;

use crate::AudioBuffer;

/// Converts buffers of any format to one fixed target format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatConverter {
    target_rate: u32,
    target_channels: u16,
}

impl FormatConverter {
    /// Creates a converter producing `target_rate` Hz, `target_channels` channels.
    pub fn new(target_rate: u32, target_channels: u16) -> Self {
        Self {
            target_rate,
            target_channels,
        }
    }

    /// Target sample rate.
    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }

    /// Target channel count.
    pub fn target_channels(&self) -> u16 {
        self.target_channels
    }

    /// Returns `true` if `buffer` is already in the target format.
    pub fn is_passthrough(&self, buffer: &AudioBuffer) -> bool {
        buffer.sample_rate == self.target_rate && buffer.channels == self.target_channels
    }

    /// Converts the buffer's samples to the target format.
    ///
    /// Channels are remapped before resampling so the interpolation runs
    /// over the smaller of the two layouts when downmixing.
    pub fn convert(&self, buffer: &AudioBuffer) -> Vec<i16> {
        if self.is_passthrough(buffer) {
            return buffer.samples.to_vec();
        }
        let remapped = remap_channels(&buffer.samples, buffer.channels, self.target_channels);
        resample(
            &remapped,
            self.target_channels,
            buffer.sample_rate,
            self.target_rate,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_passthrough() {
        let converter = FormatConverter::new(44100, 2);
        let buffer = AudioBuffer::new(vec![1, 2, 3, 4], Duration::ZERO, 44100, 2);
        assert!(converter.is_passthrough(&buffer));
        assert_eq!(converter.convert(&buffer), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_mono_48k_to_stereo_44k() {
        let converter = FormatConverter::new(44100, 2);
        let buffer = AudioBuffer::new(vec![0i16; 480], Duration::ZERO, 48000, 1);
        let out = converter.convert(&buffer);
        assert_eq!(out.len() % 2, 0);
        assert!((441..=442).contains(&(out.len() / 2)));
    }
}
