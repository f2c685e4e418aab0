//! Discovered speaker descriptors.

use std::fmt;
use std::net::IpAddr;

use serde::Serialize;

/// Codec identifier for uncompressed 16-bit PCM.
pub const CODEC_PCM: u32 = 0;

/// Codec identifier for Apple Lossless.
pub const CODEC_ALAC: u32 = 1;

/// What kind of service a device advertised.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// An audio sink that accepts a sender session.
    Sink,
    /// Anything else sharing the namespace (video receivers, bridges, ...).
    Other(String),
}

/// A discovered device. Immutable; re-discovery yields a fresh record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    /// Advertised name.
    pub name: String,
    /// Address the session protocol listens on.
    pub ip: IpAddr,
    /// Session protocol port.
    pub port: u16,
    /// mDNS host name.
    pub hostname: String,
    /// Service kind.
    pub kind: DeviceKind,
    /// Advertised codec identifiers.
    pub codecs: Vec<u32>,
    /// Advertised sample rate in Hz.
    pub sample_rate: u32,
    /// Advertised bits per sample.
    pub sample_size: u16,
    /// Advertised channel count.
    pub channels: u16,
}

impl Device {
    /// Creates a sink with the usual 44.1kHz/16-bit/stereo audio format and
    /// no codecs. Adjust fields as needed.
    pub fn sink(name: impl Into<String>, ip: IpAddr, port: u16) -> Self {
        Self {
            name: name.into(),
            ip,
            port,
            hostname: String::new(),
            kind: DeviceKind::Sink,
            codecs: Vec::new(),
            sample_rate: 44100,
            sample_size: 16,
            channels: 2,
        }
    }

    /// Returns `true` if codec 0 (PCM) is advertised.
    pub fn supports_pcm(&self) -> bool {
        self.codecs.contains(&CODEC_PCM)
    }

    /// Returns `true` if codec 1 (ALAC) is advertised.
    pub fn supports_alac(&self) -> bool {
        self.codecs.contains(&CODEC_ALAC)
    }

    /// Returns `true` for audio sinks.
    pub fn is_sink(&self) -> bool {
        self.kind == DeviceKind::Sink
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "name={:?} server={}:{} hostname={:?} audio={}ch/{}hz/{}-bit pcm={} alac={}",
            self.name,
            self.ip,
            self.port,
            self.hostname,
            self.channels,
            self.sample_rate,
            self.sample_size,
            self.supports_pcm(),
            self.supports_alac(),
        )
    }
}

/// Parses a comma-separated codec list such as `"0,1,2,3"`.
///
/// Unparseable entries are skipped.
pub fn parse_codecs(raw: &str) -> Vec<u32> {
    raw.split(',')
        .filter_map(|c| c.trim().parse().ok())
        .collect()
}
