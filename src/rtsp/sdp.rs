//! The slice of SDP carried by `ANNOUNCE`.

use std::fmt;

/// Audio encoding announced for the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encoding {
    /// Big-endian 16-bit PCM.
    L16,
    /// Apple Lossless.
    AppleLossless,
    /// Anything else, by its rtpmap name.
    Other(String),
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::L16 => f.write_str("L16"),
            Self::AppleLossless => f.write_str("AppleLossless"),
            Self::Other(name) => f.write_str(name),
        }
    }
}

/// Stream parameters negotiated by `ANNOUNCE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFormat {
    /// RTP payload type of audio packets.
    pub payload_type: u8,
    /// Audio encoding.
    pub encoding: Encoding,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel count.
    pub channels: u16,
    /// Raw `a=fmtp` parameters, needed by codec decoders.
    pub fmtp: Option<String>,
}

impl StreamFormat {
    /// 44.1kHz stereo L16 on payload type 96.
    pub fn l16_stereo() -> Self {
        Self {
            payload_type: 96,
            encoding: Encoding::L16,
            sample_rate: 44100,
            channels: 2,
            fmtp: None,
        }
    }

    /// Parses the first audio `rtpmap` of an SDP body.
    ///
    /// `AppleLossless` takes rate and channels from its `fmtp` line, which
    /// lists them at positions 10 and 6 after the payload type.
    pub fn parse(sdp: &str) -> Option<Self> {
        let mut format: Option<Self> = None;
        let mut fmtp = None;

        for line in sdp.lines().map(str::trim) {
            if let Some(rest) = line.strip_prefix("a=rtpmap:") {
                if format.is_some() {
                    continue;
                }
                let (pt, spec) = rest.split_once(char::is_whitespace)?;
                let mut parts = spec.trim().split('/');
                let name = parts.next()?.to_string();
                let rate = parts.next().and_then(|r| r.parse().ok());
                let channels = parts.next().and_then(|c| c.parse().ok());
                let encoding = match name.as_str() {
                    "L16" => Encoding::L16,
                    "AppleLossless" => Encoding::AppleLossless,
                    _ => Encoding::Other(name),
                };
                format = Some(Self {
                    payload_type: pt.parse().ok()?,
                    encoding,
                    sample_rate: rate.unwrap_or(44100),
                    channels: channels.unwrap_or(2),
                    fmtp: None,
                });
            } else if let Some(rest) = line.strip_prefix("a=fmtp:") {
                fmtp = rest.split_once(char::is_whitespace).map(|(_, p)| p.trim().to_string());
            }
        }

        let mut format = format?;
        if let Some(ref params) = fmtp {
            if format.encoding == Encoding::AppleLossless {
                let fields: Vec<&str> = params.split_whitespace().collect();
                if let Some(channels) = fields.get(6).and_then(|c| c.parse().ok()) {
                    format.channels = channels;
                }
                if let Some(rate) = fields.get(10).and_then(|r| r.parse().ok()) {
                    format.sample_rate = rate;
                }
            }
        }
        format.fmtp = fmtp;
        Some(format)
    }

    /// Renders an `ANNOUNCE` body for this format.
    pub fn to_sdp(&self, session_id: u64, local: &str, remote: &str) -> String {
        let mut sdp = format!(
            "v=0\r\n\
             o=iTunes {session_id} 0 IN IP4 {local}\r\n\
             s=iTunes\r\n\
             c=IN IP4 {remote}\r\n\
             t=0 0\r\n\
             m=audio 0 RTP/AVP {pt}\r\n\
             a=rtpmap:{pt} {enc}/{rate}/{ch}\r\n",
            pt = self.payload_type,
            enc = self.encoding,
            rate = self.sample_rate,
            ch = self.channels,
        );
        if let Some(ref fmtp) = self.fmtp {
            sdp.push_str(&format!("a=fmtp:{} {fmtp}\r\n", self.payload_type));
        }
        sdp
    }
}
