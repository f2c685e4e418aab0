//! Minimal RTP packet framing for audio datagrams.

/// Fixed RTP header size.
pub(crate) const HEADER_LEN: usize = 12;

/// A parsed RTP packet borrowing its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RtpPacket<'a> {
    pub marker: bool,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub payload: &'a [u8],
}

impl<'a> RtpPacket<'a> {
    /// Parses a datagram. Returns `None` for anything that isn't RTP v2.
    pub fn parse(datagram: &'a [u8]) -> Option<Self> {
        if datagram.len() < HEADER_LEN || datagram[0] >> 6 != 2 {
            return None;
        }
        let padding = datagram[0] & 0x20 != 0;
        let extension = datagram[0] & 0x10 != 0;
        let csrc_count = usize::from(datagram[0] & 0x0f);

        let mut start = HEADER_LEN + 4 * csrc_count;
        if extension {
            let words = datagram.get(start + 2..start + 4)?;
            start += 4 + 4 * usize::from(u16::from_be_bytes([words[0], words[1]]));
        }
        let mut end = datagram.len();
        if padding {
            end = end.checked_sub(usize::from(*datagram.last()?))?;
        }
        if start > end {
            return None;
        }

        Some(Self {
            marker: datagram[1] & 0x80 != 0,
            payload_type: datagram[1] & 0x7f,
            sequence: u16::from_be_bytes([datagram[2], datagram[3]]),
            timestamp: u32::from_be_bytes([datagram[4], datagram[5], datagram[6], datagram[7]]),
            ssrc: u32::from_be_bytes([datagram[8], datagram[9], datagram[10], datagram[11]]),
            payload: &datagram[start..end],
        })
    }

    /// Writes the header and payload into `out`, replacing its contents.
    pub fn write(&self, out: &mut Vec<u8>) {
        out.clear();
        out.reserve(HEADER_LEN + self.payload.len());
        out.push(0x80);
        out.push(u8::from(self.marker) << 7 | (self.payload_type & 0x7f));
        out.extend_from_slice(&self.sequence.to_be_bytes());
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(&self.ssrc.to_be_bytes());
        out.extend_from_slice(self.payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_parse() {
        let payload = [1u8, 2, 3, 4];
        let packet = RtpPacket {
            marker: true,
            payload_type: 96,
            sequence: 65535,
            timestamp: 352,
            ssrc: 0xdead_beef,
            payload: &payload,
        };
        let mut wire = Vec::new();
        packet.write(&mut wire);

        assert_eq!(wire[0], 0x80);
        assert_eq!(wire[1], 0xe0);
        assert_eq!(RtpPacket::parse(&wire).unwrap(), packet);
    }

    #[test]
    fn test_parse_skips_csrc_and_padding() {
        let mut wire = vec![0xa1, 0x60, 0, 1, 0, 0, 0, 2, 0, 0, 0, 3];
        wire.extend_from_slice(&[9, 9, 9, 9]); // one CSRC
        wire.extend_from_slice(&[7, 7]);
        wire.extend_from_slice(&[0, 2]); // two bytes of padding

        let packet = RtpPacket::parse(&wire).unwrap();
        assert_eq!(packet.payload_type, 96);
        assert_eq!(packet.payload, &[7, 7]);
    }

    #[test]
    fn test_rejects_short_or_wrong_version() {
        assert!(RtpPacket::parse(&[0x80; 4]).is_none());
        assert!(RtpPacket::parse(&[0x40; 16]).is_none());
    }
}
