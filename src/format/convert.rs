//! Sample format and channel layout conversion.

/// Converts an f32 sample in [-1.0, 1.0] to i16, clamping out-of-range input.
///
/// Scales by 32767 so that -1.0 and 1.0 map symmetrically.
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

/// Converts an i16 sample to f32 in [-1.0, 1.0].
#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    f32::from(sample) / 32768.0
}

/// Narrows a signed integer sample of `bits` width to 16 bits.
#[inline]
pub fn int_to_i16(sample: i32, bits: u16) -> i16 {
    match bits {
        0 => 0,
        1..=16 => (sample << (16 - bits)) as i16,
        _ => (sample >> (bits.min(32) - 16)) as i16,
    }
}

/// Decodes big-endian 16-bit PCM (L16) into native samples.
///
/// A trailing odd byte is ignored.
pub fn l16_to_i16(payload: &[u8]) -> Vec<i16> {
    payload
        .chunks_exact(2)
        .map(|pair| i16::from_be_bytes([pair[0], pair[1]]))
        .collect()
}

/// Encodes native samples as big-endian 16-bit PCM (L16).
pub fn i16_to_l16(samples: &[i16], out: &mut Vec<u8>) {
    out.reserve(samples.len() * 2);
    for &sample in samples {
        out.extend_from_slice(&sample.to_be_bytes());
    }
}

/// Changes the number of interleaved channels.
///
/// Going to mono averages all input channels. Going up from mono duplicates
/// the sample. Otherwise the first `min(from, to)` channels are copied and
/// any extra output channels repeat the last input channel.
pub fn remap_channels(samples: &[i16], from: u16, to: u16) -> Vec<i16> {
    if from == to || from == 0 || to == 0 {
        return samples.to_vec();
    }
    let from = from as usize;
    let to = to as usize;
    let mut out = Vec::with_capacity(samples.len() / from * to);

    for frame in samples.chunks_exact(from) {
        if to == 1 {
            let sum: i32 = frame.iter().map(|&s| i32::from(s)).sum();
            out.push((sum / from as i32) as i16);
            continue;
        }
        for ch in 0..to {
            out.push(frame[ch.min(from - 1)]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f32_to_i16_full_range() {
        assert_eq!(f32_to_i16(1.0), 32767);
        assert_eq!(f32_to_i16(-1.0), -32767);
        assert_eq!(f32_to_i16(0.0), 0);
    }

    #[test]
    fn test_f32_to_i16_clamping() {
        assert_eq!(f32_to_i16(2.0), 32767);
        assert_eq!(f32_to_i16(-2.0), -32768);
    }

    #[test]
    fn test_i16_to_f32_range() {
        assert!((i16_to_f32(32767) - 0.99997).abs() < 0.001);
        assert!((i16_to_f32(-32768) + 1.0).abs() < 0.001);
        assert_eq!(i16_to_f32(0), 0.0);
    }

    #[test]
    fn test_int_to_i16_widths() {
        assert_eq!(int_to_i16(0x7f, 8), 0x7f00);
        assert_eq!(int_to_i16(0x12_3456, 24), 0x1234);
        assert_eq!(int_to_i16(-1, 16), -1);
        assert_eq!(int_to_i16(0x7fff_ffff, 32), 0x7fff);
    }

    #[test]
    fn test_l16_decoding() {
        assert_eq!(l16_to_i16(&[0x01, 0x00, 0xff, 0xff, 0x80]), vec![256, -1]);
    }

    #[test]
    fn test_l16_encoding() {
        let mut out = Vec::new();
        i16_to_l16(&[256, -2], &mut out);
        assert_eq!(out, vec![0x01, 0x00, 0xff, 0xfe]);
    }

    #[test]
    fn test_stereo_to_mono() {
        assert_eq!(remap_channels(&[100, 200, 300, 400], 2, 1), vec![150, 350]);
        assert_eq!(remap_channels(&[1000, -1000], 2, 1), vec![0]);
    }

    #[test]
    fn test_mono_to_stereo() {
        assert_eq!(remap_channels(&[100, 200], 1, 2), vec![100, 100, 200, 200]);
    }

    #[test]
    fn test_surround_to_stereo_keeps_front_pair() {
        let six = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12];
        assert_eq!(remap_channels(&six, 6, 2), vec![1, 2, 7, 8]);
    }
}
