//! Receiver input: a virtual wireless speaker.
//!
//! Remote senders find the receiver over mDNS, negotiate a session over the
//! protocol server and then stream RTP audio to a UDP port handed out in
//! `SETUP`. Decoded packets become the input's buffers.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::discovery::Advertisement;
use crate::format::l16_to_i16;
use crate::input::Input;
use crate::rtp::RtpPacket;
use crate::rtsp::{
    ConnectedClients, Encoding, Method, ProtocolServer, ProtocolSession, Request, RequestHandler,
    Response, RunningServer, StreamFormat,
};
use crate::{netif, ArtworkStore, AudioBuffer, BridgeError, ReceiverInputConfig};

/// Decoded buffers waiting for the fan-out loop.
const BUFFER_QUEUE: usize = 256;

/// Methods answered by the receiver, as listed in `Public`.
const PUBLIC_METHODS: &str =
    "ANNOUNCE, SETUP, RECORD, PAUSE, FLUSH, TEARDOWN, OPTIONS, GET_PARAMETER, SET_PARAMETER";

/// Decodes payloads of codecs other than L16.
///
/// Without one, packets in other codecs are dropped with a warning.
pub trait PayloadDecoder: Send + Sync {
    /// Decodes one RTP payload to interleaved i16 samples.
    fn decode(&self, format: &StreamFormat, payload: &[u8]) -> Result<Vec<i16>, String>;
}

/// Knobs that don't come from the control plane.
#[derive(Clone)]
pub struct ReceiverOptions {
    /// Bind here instead of the outbound interface address.
    pub bind_address: Option<IpAddr>,
    /// Publish the receiver over mDNS.
    pub advertise: bool,
    /// Decoder for non-L16 payloads.
    pub payload_decoder: Option<Arc<dyn PayloadDecoder>>,
}

impl Default for ReceiverOptions {
    fn default() -> Self {
        Self {
            bind_address: None,
            advertise: true,
            payload_decoder: None,
        }
    }
}

struct RtpStream {
    owner: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// State shared by the handlers and the RTP task.
struct ReceiverState {
    verbose: bool,
    format: RwLock<Option<StreamFormat>>,
    volume: RwLock<f32>,
    artwork: ArtworkStore,
    stream: Mutex<Option<RtpStream>>,
    buffers: mpsc::Sender<AudioBuffer>,
    decoder: Option<Arc<dyn PayloadDecoder>>,
}

impl ReceiverState {
    /// Stops the RTP task, if `owner` matches (or unconditionally for `None`).
    fn end_stream(&self, owner: Option<u64>) {
        let mut stream = self.stream.lock();
        if owner.is_some_and(|id| stream.as_ref().is_some_and(|s| s.owner != id)) {
            return;
        }
        if let Some(stream) = stream.take() {
            stream.cancel.cancel();
            stream.task.abort();
        }
    }

    fn set_parameters(&self, request: &Request, response: &mut Response) {
        let content_type = request.headers.get("Content-Type").unwrap_or_default();

        if content_type.starts_with("image/") {
            tracing::info!(bytes = request.body.len(), %content_type, "artwork received");
            self.artwork.set(request.body.clone());
        } else if content_type == "text/parameters" {
            let body = String::from_utf8_lossy(&request.body);
            for line in body.lines() {
                let Some((key, value)) = line.split_once(':') else {
                    continue;
                };
                if key.trim() == "volume" {
                    match value.trim().parse::<f32>() {
                        Ok(volume) => {
                            *self.volume.write() = volume;
                            tracing::info!(volume, "volume changed");
                        }
                        Err(_) => response.set_status(400, "Bad Request"),
                    }
                }
            }
        } else {
            tracing::debug!(%content_type, "ignoring parameters");
        }
    }
}

struct SetupHandler {
    state: Arc<ReceiverState>,
}

#[async_trait]
impl RequestHandler for SetupHandler {
    async fn handle(&self, request: &Request, response: &mut Response, session: &ProtocolSession) {
        let socket = match UdpSocket::bind((session.local.ip(), 0)).await {
            Ok(socket) => socket,
            Err(e) => {
                tracing::error!("could not bind audio socket: {e}");
                response.set_status(500, "Internal Server Error");
                return;
            }
        };
        let port = match socket.local_addr() {
            Ok(addr) => addr.port(),
            Err(e) => {
                tracing::error!("audio socket has no address: {e}");
                response.set_status(500, "Internal Server Error");
                return;
            }
        };

        self.state.end_stream(None);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(receive_rtp(socket, self.state.clone(), cancel.clone()));
        *self.state.stream.lock() = Some(RtpStream {
            owner: session.id,
            cancel,
            task,
        });

        let transport = request
            .headers
            .get("Transport")
            .and_then(|t| t.split(';').next())
            .unwrap_or("RTP/AVP/UDP");
        response.headers.set(
            "Transport",
            format!(
                "{transport};unicast;mode=record;server_port={port};control_port={port};timing_port={port}"
            ),
        );
        response.headers.set("Session", "1");
        tracing::info!(remote = %session.remote, port, "audio session set up");
    }
}

/// Consecutive socket errors after which the audio task gives up.
const MAX_SOCKET_ERRORS: u32 = 8;

/// Wait before retrying after the `errors`-th consecutive socket error, or
/// `None` once the socket should be abandoned.
fn socket_backoff(errors: u32) -> Option<Duration> {
    if errors >= MAX_SOCKET_ERRORS {
        return None;
    }
    Some(Duration::from_millis(10 << errors.saturating_sub(1).min(6)))
}

async fn receive_rtp(socket: UdpSocket, state: Arc<ReceiverState>, cancel: CancellationToken) {
    let mut datagram = vec![0u8; 8192];
    let mut first_timestamp: Option<u32> = None;
    let mut warned_codec = false;
    let mut errors = 0u32;

    loop {
        let received = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            received = socket.recv(&mut datagram) => received,
        };
        let len = match received {
            Ok(len) => {
                errors = 0;
                len
            }
            Err(e) => {
                errors += 1;
                let Some(backoff) = socket_backoff(errors) else {
                    tracing::error!(errors, "audio socket keeps failing, receive stopped: {e}");
                    break;
                };
                tracing::warn!(errors, ?backoff, "audio socket error: {e}");
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(backoff) => {}
                }
                continue;
            }
        };

        let Some(packet) = RtpPacket::parse(&datagram[..len]) else {
            continue;
        };
        let Some(format) = state.format.read().clone() else {
            tracing::debug!("audio before ANNOUNCE, dropping");
            continue;
        };
        if packet.payload_type != format.payload_type {
            continue;
        }

        let samples = match (&format.encoding, &state.decoder) {
            (Encoding::L16, _) => l16_to_i16(packet.payload),
            (_, Some(decoder)) => match decoder.decode(&format, packet.payload) {
                Ok(samples) => samples,
                Err(e) => {
                    tracing::warn!(encoding = %format.encoding, "payload decode failed: {e}");
                    continue;
                }
            },
            (encoding, None) => {
                if !warned_codec {
                    tracing::warn!(%encoding, "no decoder for codec, dropping audio");
                    warned_codec = true;
                }
                continue;
            }
        };

        let base = *first_timestamp.get_or_insert(packet.timestamp);
        let frames = packet.timestamp.wrapping_sub(base);
        let timestamp = Duration::from_secs_f64(f64::from(frames) / f64::from(format.sample_rate.max(1)));
        let buffer = AudioBuffer::new(samples, timestamp, format.sample_rate, format.channels);

        if state.verbose {
            tracing::debug!(seq = packet.sequence, frames = buffer.frame_count(), "audio packet");
        }
        match state.buffers.try_send(buffer) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(seq = packet.sequence, "receiver queue full, packet dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => break,
        }
    }
}

fn register_handlers(server: &mut ProtocolServer, state: &Arc<ReceiverState>) {
    server.add_handler(Method::Options, |_: &Request, res: &mut Response, _: &ProtocolSession| {
        res.headers.set("Public", PUBLIC_METHODS);
    });

    let announce = state.clone();
    server.add_handler(Method::Announce, move |req: &Request, res: &mut Response, _: &ProtocolSession| {
        match StreamFormat::parse(&String::from_utf8_lossy(&req.body)) {
            Some(format) => {
                tracing::info!(
                    encoding = %format.encoding,
                    rate = format.sample_rate,
                    channels = format.channels,
                    "stream announced"
                );
                *announce.format.write() = Some(format);
            }
            None => res.set_status(400, "Bad Request"),
        }
    });

    server.add_handler(
        Method::Setup,
        SetupHandler {
            state: state.clone(),
        },
    );

    server.add_handler(Method::Record, |_: &Request, res: &mut Response, session: &ProtocolSession| {
        tracing::info!(remote = %session.remote, "recording started");
        res.headers.set("Audio-Latency", "11025");
    });

    let parameters = state.clone();
    server.add_handler(Method::SetParameter, move |req: &Request, res: &mut Response, _: &ProtocolSession| {
        parameters.set_parameters(req, res);
    });

    let query = state.clone();
    server.add_handler(Method::GetParameter, move |req: &Request, res: &mut Response, _: &ProtocolSession| {
        if String::from_utf8_lossy(&req.body).contains("volume") {
            res.headers.set("Content-Type", "text/parameters");
            res.body = Bytes::from(format!("volume: {:.6}\r\n", *query.volume.read()));
        }
    });

    server.add_handler(Method::Flush, |_: &Request, _: &mut Response, session: &ProtocolSession| {
        tracing::debug!(remote = %session.remote, "flush");
    });

    let teardown = state.clone();
    server.add_handler(Method::Teardown, move |_: &Request, _: &mut Response, session: &ProtocolSession| {
        tracing::info!(remote = %session.remote, "session torn down");
        teardown.end_stream(Some(session.id));
    });

    let closed = state.clone();
    server.on_close(move |session| closed.end_stream(Some(session.id)));
}

/// Input fed by a remote sender through the session protocol.
pub struct ReceiverInput {
    name: String,
    server: Option<RunningServer>,
    advertisement: Option<Advertisement>,
    buffers: mpsc::Receiver<AudioBuffer>,
    state: Arc<ReceiverState>,
    clients: ConnectedClients,
}

impl ReceiverInput {
    /// Starts the protocol server (and the mDNS record, if enabled).
    ///
    /// # Errors
    ///
    /// Configuration errors for a bad config, backend errors when the
    /// server or the advertisement cannot be started.
    pub async fn start(
        config: &ReceiverInputConfig,
        artwork: ArtworkStore,
        options: ReceiverOptions,
    ) -> Result<Self, BridgeError> {
        config.validate()?;
        let bind_ip = match options.bind_address {
            Some(ip) => ip,
            None => netif::outbound_ip()?,
        };

        let (sender, buffers) = mpsc::channel(BUFFER_QUEUE);
        let state = Arc::new(ReceiverState {
            verbose: config.verbose,
            format: RwLock::new(None),
            volume: RwLock::new(0.0),
            artwork,
            stream: Mutex::new(None),
            buffers: sender,
            decoder: options.payload_decoder.clone(),
        });

        let mut server = ProtocolServer::new(config.port).with_bind_address(bind_ip);
        register_handlers(&mut server, &state);
        let server = server.start(config.verbose).await?;
        let clients = server.connected_clients();

        let advertisement = if options.advertise {
            let codecs = if options.payload_decoder.is_some() { "0,1" } else { "0" };
            match Advertisement::register(&config.name, bind_ip, server.local_addr().port(), codecs) {
                Ok(advertisement) => Some(advertisement),
                Err(e) => {
                    server.stop().await;
                    return Err(e);
                }
            }
        } else {
            None
        };

        tracing::info!(name = %config.name, addr = %server.local_addr(), "receiver started");
        Ok(Self {
            name: config.name.clone(),
            server: Some(server),
            advertisement,
            buffers,
            state,
            clients,
        })
    }

    /// Address of the protocol server.
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.server.as_ref().map(RunningServer::local_addr)
    }

    /// Live list of connected senders.
    pub fn connected_clients(&self) -> ConnectedClients {
        self.clients.clone()
    }

    /// Last volume set by the sender, in dB (0 is full, -144 is mute).
    pub fn volume(&self) -> f32 {
        *self.state.volume.read()
    }
}

#[async_trait]
impl Input for ReceiverInput {
    fn name(&self) -> &str {
        &self.name
    }

    async fn produce(&mut self) -> Option<AudioBuffer> {
        self.buffers.recv().await
    }

    async fn stop(&mut self) -> Result<(), BridgeError> {
        self.state.end_stream(None);
        if let Some(server) = self.server.take() {
            server.stop().await;
        }
        if let Some(advertisement) = self.advertisement.take() {
            advertisement.withdraw();
        }
        self.buffers.close();
        tracing::info!(name = %self.name, "receiver stopped");
        Ok(())
    }
}
