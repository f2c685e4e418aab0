//! Sender output: streams to a discovered wireless speaker.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

use crate::discovery::{discover, BrowserFactory, Device, DeviceFilter};
use crate::format::{i16_to_l16, FormatConverter};
use crate::output::{Output, OutputKind};
use crate::rtp::RtpPacket;
use crate::rtsp::{Method, RtspClient, StreamFormat};
use crate::{AudioBuffer, BridgeError, OutputError, SenderOutputConfig};

/// Frames per RTP packet.
const FRAMES_PER_PACKET: usize = 352;

/// Streaming state, touched by `consume` and `stop`.
struct Stream {
    client: Option<RtspClient>,
    socket: UdpSocket,
    target: SocketAddr,
    url: String,
    pending: Vec<i16>,
    payload: Vec<u8>,
    datagram: Vec<u8>,
    sequence: u16,
    rtp_time: u32,
    ssrc: u32,
    first: bool,
}

impl Stream {
    async fn send_packet(&mut self, frames: usize, verbose: bool) -> Result<(), OutputError> {
        let samples = frames * 2;
        self.payload.clear();
        i16_to_l16(&self.pending[..samples], &mut self.payload);
        self.pending.drain(..samples);

        let packet = RtpPacket {
            marker: self.first,
            payload_type: StreamFormat::l16_stereo().payload_type,
            sequence: self.sequence,
            timestamp: self.rtp_time,
            ssrc: self.ssrc,
            payload: &self.payload,
        };
        packet.write(&mut self.datagram);
        self.socket
            .send_to(&self.datagram, self.target)
            .await
            .map_err(OutputError::ConnectionLost)?;

        if verbose {
            tracing::debug!(seq = self.sequence, frames, "audio packet sent");
        }
        self.first = false;
        self.sequence = self.sequence.wrapping_add(1);
        self.rtp_time = self.rtp_time.wrapping_add(frames as u32);
        Ok(())
    }
}

/// Forwards audio to a speaker found over discovery.
///
/// Audio is converted to 44.1kHz stereo and sent as L16 RTP packets of
/// 352 frames. Frames left over from one buffer are carried into the next
/// packet.
pub struct SenderOutput {
    name: String,
    device: Device,
    verbose: AtomicBool,
    converter: FormatConverter,
    stream: Mutex<Option<Stream>>,
}

impl SenderOutput {
    /// Discovers the speaker described by `config` and opens a session.
    ///
    /// Discovery is bounded by `discovery_timeout`; each handshake request,
    /// and the `TEARDOWN` sent on stop, by `request_timeout`.
    ///
    /// # Errors
    ///
    /// A configuration error for a bad search key, a discovery timeout if no
    /// speaker matched in time, or a backend error if the speaker cannot
    /// take PCM or refuses the session.
    pub async fn connect(
        config: &SenderOutputConfig,
        browsers: &BrowserFactory,
        discovery_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, BridgeError> {
        let filter = DeviceFilter::from_search(&config.search_key, config.search_type)?;
        let mut browser = browsers()?;
        let device = discover(browser.as_mut(), &filter, discovery_timeout, config.verbose).await?;
        tracing::info!(%device, "speaker found");
        Self::connect_to(device, request_timeout, config.verbose).await
    }

    /// Opens a session with an already known speaker.
    pub async fn connect_to(
        device: Device,
        request_timeout: Duration,
        verbose: bool,
    ) -> Result<Self, BridgeError> {
        if !device.supports_pcm() {
            return Err(BridgeError::backend(
                "sender",
                format!("{} does not accept uncompressed audio", device.name),
            ));
        }

        let remote = SocketAddr::new(device.ip, device.port);
        let mut client = RtspClient::connect(remote, request_timeout, verbose).await?;
        let local = client.local_addr();
        let session_id = random_u64();
        let url = format!("rtsp://{}/{session_id}", local.ip());

        let socket = UdpSocket::bind((local.ip(), 0))
            .await
            .map_err(|e| BridgeError::backend("sender", format!("bind audio socket: {e}")))?;
        let control_port = socket
            .local_addr()
            .map_err(|e| BridgeError::backend("sender", e))?
            .port();

        client.send(client.request(Method::Options, "*")).await?;

        let mut announce = client.request(Method::Announce, url.clone());
        announce.headers.set("Content-Type", "application/sdp");
        announce.body = Bytes::from(StreamFormat::l16_stereo().to_sdp(
            session_id,
            &local.ip().to_string(),
            &device.ip.to_string(),
        ));
        client.send(announce).await?;

        let mut setup = client.request(Method::Setup, url.clone());
        setup.headers.set(
            "Transport",
            format!(
                "RTP/AVP/UDP;unicast;interleaved=0-1;mode=record;control_port={control_port};timing_port={control_port}"
            ),
        );
        let response = client.send(setup).await?;
        let server_port = response
            .headers
            .get("Transport")
            .and_then(server_port)
            .ok_or_else(|| BridgeError::backend("sender", "SETUP response has no server_port"))?;

        let mut record = client.request(Method::Record, url.clone());
        record.headers.set("Range", "npt=0-");
        record.headers.set("RTP-Info", "seq=0;rtptime=0");
        client.send(record).await?;

        tracing::info!(name = %device.name, remote = %remote, server_port, "sender session recording");

        let stream = Stream {
            client: Some(client),
            socket,
            target: SocketAddr::new(device.ip, server_port),
            url,
            pending: Vec::with_capacity(FRAMES_PER_PACKET * 4),
            payload: Vec::with_capacity(FRAMES_PER_PACKET * 4),
            datagram: Vec::new(),
            sequence: 0,
            rtp_time: 0,
            ssrc: random_u64() as u32,
            first: true,
        };

        Ok(Self {
            name: format!("sender:{}", device.name),
            device,
            verbose: AtomicBool::new(verbose),
            converter: FormatConverter::new(44100, 2),
            stream: Mutex::new(Some(stream)),
        })
    }

    /// The speaker this output streams to.
    pub fn device(&self) -> &Device {
        &self.device
    }
}

fn server_port(transport: &str) -> Option<u16> {
    transport
        .split(';')
        .find_map(|part| part.trim().strip_prefix("server_port="))
        .and_then(|port| port.parse().ok())
}

fn random_u64() -> u64 {
    RandomState::new().build_hasher().finish()
}

#[async_trait]
impl Output for SenderOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> OutputKind {
        OutputKind::Sender
    }

    async fn consume(&self, buffer: &AudioBuffer) -> Result<(), OutputError> {
        let verbose = self.verbose.load(Ordering::Relaxed);
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(OutputError::Stopped)?;

        stream.pending.extend(self.converter.convert(buffer));
        while stream.pending.len() >= FRAMES_PER_PACKET * 2 {
            stream.send_packet(FRAMES_PER_PACKET, verbose).await?;
        }
        Ok(())
    }

    fn set_verbose(&self, verbose: bool) {
        self.verbose.store(verbose, Ordering::Relaxed);
    }

    async fn stop(&self) -> Result<(), OutputError> {
        let Some(mut stream) = self.stream.lock().await.take() else {
            return Ok(());
        };
        let verbose = self.verbose.load(Ordering::Relaxed);

        let leftover = stream.pending.len() / 2;
        if leftover > 0 {
            if let Err(e) = stream.send_packet(leftover, verbose).await {
                tracing::debug!(name = %self.name, "final packet not sent: {e}");
            }
        }

        if let Some(mut client) = stream.client.take() {
            let teardown = client.request(Method::Teardown, stream.url.clone());
            // Bounded by the client's request timeout.
            if let Err(e) = client.send(teardown).await {
                tracing::warn!(name = %self.name, "TEARDOWN failed: {e}");
            }
        }
        tracing::info!(name = %self.name, "sender stopped");
        Ok(())
    }
}
