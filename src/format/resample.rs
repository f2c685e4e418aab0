//! Sample rate conversion.
//!
//! Linear interpolation over interleaved frames. Cheap and good enough for
//! bridging common rates (44.1k/48k); not a mastering-grade resampler.

/// Resamples interleaved audio from `from_rate` to `to_rate`.
///
/// Every channel is interpolated independently and the output stays
/// interleaved with the same channel count.
pub fn resample(samples: &[i16], channels: u16, from_rate: u32, to_rate: u32) -> Vec<i16> {
    let channels = channels.max(1) as usize;
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 || samples.len() < channels {
        return samples.to_vec();
    }

    let frames = samples.len() / channels;
    let ratio = f64::from(to_rate) / f64::from(from_rate);
    let out_frames = (frames as f64 * ratio).ceil() as usize;
    let mut out = Vec::with_capacity(out_frames * channels);

    for i in 0..out_frames {
        let pos = i as f64 / ratio;
        let idx = (pos.floor() as usize).min(frames - 1);
        let next = (idx + 1).min(frames - 1);
        let frac = pos - idx as f64;

        for ch in 0..channels {
            let a = f64::from(samples[idx * channels + ch]);
            let b = f64::from(samples[next * channels + ch]);
            out.push((a + (b - a) * frac.min(1.0)) as i16);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_rate_passthrough() {
        let input = vec![1i16, 2, 3, 4];
        assert_eq!(resample(&input, 2, 44100, 44100), input);
    }

    #[test]
    fn test_empty() {
        assert!(resample(&[], 2, 48000, 44100).is_empty());
    }

    #[test]
    fn test_downsample_mono() {
        let input: Vec<i16> = (0..480).map(|i| i as i16).collect();
        let output = resample(&input, 1, 48000, 16000);
        assert_eq!(output.len(), 160);
        assert_eq!(output[1], 3);
    }

    #[test]
    fn test_upsample_interpolates() {
        let output = resample(&[0, 100], 1, 1, 2);
        assert_eq!(output, vec![0, 50, 100, 100]);
    }

    #[test]
    fn test_stereo_channels_stay_separate() {
        let input = vec![0i16, 1000, 100, 1100];
        let output = resample(&input, 2, 1, 2);
        assert_eq!(output.len(), 8);
        assert_eq!(&output[0..4], &[0, 1000, 50, 1050]);
    }

    #[test]
    fn test_zero_rate_passthrough() {
        let input = vec![5i16, 6];
        assert_eq!(resample(&input, 1, 0, 44100), input);
    }
}
