//! Integration tests for stream-bridge.
//!
//! Note: Tests that require actual audio hardware are marked with
//! `#[ignore]` and should be run manually.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use stream_bridge::discovery::{
    discover, parse_codecs, Device, DeviceFilter, DeviceKind, StaticBrowser,
};
use stream_bridge::input::ReceiverOptions;
use stream_bridge::playback::{
    BufferedTrack, DecodedTrack, MediaDecoder, MediaItem, PlaybackController, PlayerState,
};
use stream_bridge::rtsp::message::{read_response, write_request};
use stream_bridge::rtsp::{Method, ProtocolServer, ProtocolSession, Request, Response, CSEQ};
use stream_bridge::statpoll::ChannelStatSink;
use stream_bridge::{
    ArtworkStore, AudioBuffer, Bridge, BridgeConfig, BridgeError, ChannelOutput, ErrorKind,
    Input, InputGauge, InputSpec, MockInput, Output, OutputError, ReceiverInputConfig,
    SearchType, SenderOutput,
};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc;

/// Records the first sample of every buffer it consumes.
#[derive(Clone, Default)]
struct RecordingOutput {
    seen: Arc<Mutex<Vec<i16>>>,
}

#[async_trait]
impl Output for RecordingOutput {
    fn name(&self) -> &str {
        "recording"
    }

    async fn consume(&self, buffer: &AudioBuffer) -> Result<(), OutputError> {
        self.seen.lock().push(buffer.samples[0]);
        Ok(())
    }
}

fn bridge() -> Bridge {
    Bridge::builder()
        .browser_factory(StaticBrowser::default().factory())
        .build()
        .unwrap()
}

async fn recv_first_samples(rx: &mut mpsc::Receiver<AudioBuffer>, count: usize) -> Vec<i16> {
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        let buffer = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for a buffer")
            .expect("output channel closed");
        values.push(buffer.samples[0]);
    }
    values
}

#[tokio::test]
async fn test_fanout_exactly_once_in_order_under_churn() {
    let bridge = bridge();
    let (tx, mut rx) = mpsc::channel(256);
    bridge.add_custom_output(ChannelOutput::new(tx)).await.unwrap();

    let (input, handle) = MockInput::new("counter", 1000, 1);
    bridge.start_custom_input(input).await.unwrap();

    let late = RecordingOutput::default();
    let mut late_id = None;
    for value in 1..=60i16 {
        handle.push_samples(vec![value; 10]);
        if value == 15 {
            late_id = Some(bridge.add_custom_output(late.clone()).await.unwrap());
        }
        if value == 40 {
            bridge.remove_output(late_id.take().unwrap()).await.unwrap();
        }
        tokio::task::yield_now().await;
    }

    let always = recv_first_samples(&mut rx, 60).await;
    assert_eq!(always, (1..=60).collect::<Vec<_>>());

    let seen = late.seen.lock().clone();
    assert!(!seen.is_empty());
    assert!(
        seen.windows(2).all(|w| w[1] == w[0] + 1),
        "late output saw a gap or duplicate: {seen:?}"
    );
    assert!(*seen.last().unwrap() <= 40);

    bridge.shutdown().await;
}

/// Never finishes consuming a buffer.
struct StalledOutput;

#[async_trait]
impl Output for StalledOutput {
    fn name(&self) -> &str {
        "stalled"
    }

    async fn consume(&self, _buffer: &AudioBuffer) -> Result<(), OutputError> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn test_stalled_output_does_not_slow_its_siblings() {
    let bridge = bridge();
    let (tx, mut rx) = mpsc::channel(256);
    let healthy = bridge.add_custom_output(ChannelOutput::new(tx)).await.unwrap();
    let stalled = bridge.add_custom_output(StalledOutput).await.unwrap();

    let (input, handle) = MockInput::new("counter", 1000, 1);
    bridge.start_custom_input(input).await.unwrap();
    for value in 0..200i16 {
        handle.push_samples(vec![value; 10]);
        tokio::task::yield_now().await;
    }

    let values = tokio::time::timeout(Duration::from_secs(3), recv_first_samples(&mut rx, 200))
        .await
        .expect("healthy output was held back by the stalled one");
    assert_eq!(values, (0..200).collect::<Vec<_>>());

    let stats = bridge.stats();
    let of = |id| stats.outputs.iter().find(|o| o.id == id).unwrap();
    assert_eq!(of(healthy).dropped, 0);
    assert!(!of(healthy).degraded);
    assert!(of(stalled).dropped > 0);
    assert!(of(stalled).degraded);

    bridge.shutdown().await;
}

/// A speaker that completes the handshake but never answers TEARDOWN.
async fn silent_on_teardown_speaker(audio_port: u16) -> stream_bridge::rtsp::RunningServer {
    let mut server = ProtocolServer::new(0).with_bind_address(IpAddr::V4(Ipv4Addr::LOCALHOST));
    for method in [Method::Options, Method::Announce, Method::Record] {
        server.add_handler(method, |_: &Request, _: &mut Response, _: &ProtocolSession| {});
    }
    server.add_handler(Method::Setup, move |_: &Request, res: &mut Response, _: &ProtocolSession| {
        res.headers.set("Transport", format!("RTP/AVP/UDP;unicast;server_port={audio_port}"));
    });
    server.start(false).await.unwrap()
}

#[tokio::test]
async fn test_remove_output_returns_when_speaker_ignores_teardown() {
    let audio = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let server = silent_on_teardown_speaker(audio.local_addr().unwrap().port()).await;
    let mut speaker = Device::sink("Silent", IpAddr::V4(Ipv4Addr::LOCALHOST), server.local_addr().port());
    speaker.codecs = vec![0];

    let bridge = bridge();
    let sender = SenderOutput::connect_to(speaker, Duration::from_millis(300), false)
        .await
        .unwrap();
    let id = bridge.add_custom_output(sender).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), bridge.remove_output(id))
        .await
        .expect("remove_output hung on TEARDOWN")
        .unwrap();

    // The control lock was released.
    let (tx, _rx) = mpsc::channel(4);
    tokio::time::timeout(Duration::from_secs(1), bridge.add_custom_output(ChannelOutput::new(tx)))
        .await
        .unwrap()
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), bridge.shutdown())
        .await
        .unwrap();
    server.stop().await;
}

#[tokio::test]
async fn test_hot_swap_never_overlaps_inputs() {
    let bridge = bridge();
    let (tx, mut rx) = mpsc::channel(64);
    bridge.add_custom_output(ChannelOutput::new(tx)).await.unwrap();

    let gauge = InputGauge::new();
    let mut handles = Vec::new();
    for round in 0..5i16 {
        let (input, handle) = MockInput::new(format!("input-{round}"), 1000, 1);
        bridge.start_custom_input(input.with_gauge(gauge.clone())).await.unwrap();
        handle.push_samples(vec![round; 4]);
        assert_eq!(recv_first_samples(&mut rx, 1).await, vec![round]);

        assert!(handles.iter().all(|old: &stream_bridge::MockInputHandle| old.is_stopped()));
        handles.push(handle);
    }

    assert_eq!(gauge.peak(), 1);
    bridge.shutdown().await;
    assert_eq!(gauge.live(), 0);
    assert!(handles.iter().all(|h| h.is_stopped()));
}

async fn start_protocol_server() -> stream_bridge::rtsp::RunningServer {
    let mut server = ProtocolServer::new(0).with_bind_address(IpAddr::V4(Ipv4Addr::LOCALHOST));
    server.add_handler(Method::Options, |_: &Request, res: &mut Response, _: &ProtocolSession| {
        res.headers.set("Public", "OPTIONS");
    });
    server.start(false).await.unwrap()
}

#[tokio::test]
async fn test_protocol_server_answers_every_request_in_order() {
    let server = start_protocol_server().await;
    let stream = TcpStream::connect(server.local_addr()).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    for cseq in 1..=5 {
        let mut request = Request::new(Method::Options, "*", "RTSP/1.0");
        request.headers.set(CSEQ, cseq.to_string());
        write_request(&mut write_half, &request).await.unwrap();
    }
    for cseq in 1..=5 {
        let response = read_response(&mut reader).await.unwrap();
        assert_eq!(response.protocol, "RTSP/1.0");
        assert_eq!(response.headers.get(CSEQ), Some(cseq.to_string().as_str()));
    }

    server.stop().await;
}

#[tokio::test]
async fn test_unhandled_method_gets_no_response_but_connection_stays_open() {
    let server = start_protocol_server().await;
    let stream = TcpStream::connect(server.local_addr()).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let mut ignored = Request::new(Method::Record, "*", "RTSP/1.0");
    ignored.headers.set(CSEQ, "1");
    write_request(&mut write_half, &ignored).await.unwrap();

    let mut options = Request::new(Method::Options, "*", "RTSP/1.0");
    options.headers.set(CSEQ, "2");
    write_request(&mut write_half, &options).await.unwrap();

    let response = read_response(&mut reader).await.unwrap();
    assert_eq!(response.headers.get(CSEQ), Some("2"));
    server.stop().await;
}

#[tokio::test]
async fn test_malformed_request_closes_only_that_connection() {
    let server = start_protocol_server().await;

    let healthy = TcpStream::connect(server.local_addr()).await.unwrap();
    let (healthy_read, mut healthy_write) = healthy.into_split();
    let mut healthy_reader = BufReader::new(healthy_read);

    let broken = TcpStream::connect(server.local_addr()).await.unwrap();
    let (broken_read, mut broken_write) = broken.into_split();
    let mut broken_reader = BufReader::new(broken_read);
    broken_write.write_all(b"GARBAGE\r\n\r\n").await.unwrap();

    let closed = tokio::time::timeout(Duration::from_secs(2), read_response(&mut broken_reader))
        .await
        .unwrap();
    assert!(closed.is_err());

    let mut request = Request::new(Method::Options, "*", "RTSP/1.0");
    request.headers.set(CSEQ, "7");
    write_request(&mut healthy_write, &request).await.unwrap();
    let response = read_response(&mut healthy_reader).await.unwrap();
    assert_eq!(response.code, 200);
    assert_eq!(response.headers.get(CSEQ), Some("7"));

    server.stop().await;
}

#[test]
fn test_request_wire_format_round_trips_through_text() {
    let mut request = Request::new(Method::SetParameter, "rtsp://10.0.0.2/1", "RTSP/1.0");
    request.headers.set(CSEQ, "3");
    request.headers.set("Content-Type", "text/parameters");
    request.body = bytes::Bytes::from_static(b"volume: -20.0\r\n");

    let wire = String::from_utf8(request.to_bytes()).unwrap();
    assert!(wire.starts_with("SET_PARAMETER rtsp://10.0.0.2/1 RTSP/1.0\r\n"));
    assert!(wire.contains("Content-Length: 15\r\n"));
    assert!(wire.ends_with("\r\n\r\nvolume: -20.0\r\n"));
}

#[tokio::test(start_paused = true)]
async fn test_discovery_matches_sinks_by_ip_or_name() {
    let tv = Device {
        kind: DeviceKind::Other("video".to_string()),
        ..Device::sink("Kitchen TV", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9)), 7000)
    };
    let speaker = Device::sink("Kitchen Speaker", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)), 7000);
    let browser = StaticBrowser::new(vec![vec![tv.clone()], vec![tv, speaker.clone()]]);

    let by_name = DeviceFilter::from_search("^Kitchen", SearchType::Name).unwrap();
    let found = discover(&mut browser.clone(), &by_name, Duration::from_secs(5), true)
        .await
        .unwrap();
    assert_eq!(found, speaker);

    let by_ip = DeviceFilter::from_search("10.0.0.9", SearchType::Ip).unwrap();
    let err = discover(&mut browser.clone(), &by_ip, Duration::from_secs(5), false)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DiscoveryTimeout);
}

#[test]
fn test_codec_capabilities() {
    let mut device = Device::sink("a", IpAddr::V4(Ipv4Addr::LOCALHOST), 7000);
    device.codecs = parse_codecs("0,2");
    assert!(device.supports_pcm());
    assert!(!device.supports_alac());

    device.codecs = parse_codecs("1");
    assert!(!device.supports_pcm());
    assert!(device.supports_alac());
}

struct ToneDecoder;

#[async_trait]
impl MediaDecoder for ToneDecoder {
    async fn open(&self, item: &MediaItem) -> Result<Box<dyn DecodedTrack>, BridgeError> {
        let value: i16 = item
            .location
            .parse()
            .map_err(|_| BridgeError::backend("media", "bad item"))?;
        let samples = vec![value; 4410 * 2];
        Ok(Box::new(BufferedTrack::from_samples(
            &samples,
            44100,
            2,
            Duration::from_millis(10),
        )))
    }
}

#[tokio::test(start_paused = true)]
async fn test_turning_keep_playing_off_ends_playlist_at_item_boundary() {
    let controller = PlaybackController::new(Arc::new(ToneDecoder), ArtworkStore::new());
    let mut input = controller.attach(false);
    let items = ["1", "2", "3"].map(MediaItem::new).to_vec();
    controller.start_playlist(items, true).await.unwrap();

    let first = input.produce().await.unwrap();
    assert_eq!(first.samples[0], 1);
    assert!(controller.set_keep_playing(false));

    let mut values = vec![first.samples[0]];
    while controller.state() == PlayerState::Playlist {
        tokio::select! {
            buffer = input.produce() => values.push(buffer.unwrap().samples[0]),
            () = tokio::time::sleep(Duration::from_millis(50)) => {}
        }
    }
    while let Ok(Some(buffer)) = tokio::time::timeout(Duration::from_millis(50), input.produce()).await {
        values.push(buffer.samples[0]);
    }

    assert!(values.iter().all(|&v| v == 1), "played past item 1: {values:?}");
    assert_eq!(values.len(), 10);
    assert!(controller.info().item.is_none());
    input.stop().await.unwrap();
}

#[tokio::test]
async fn test_stat_poller_drops_dead_subscriber_and_keeps_the_rest() {
    let bridge = Bridge::builder()
        .config(BridgeConfig {
            stat_interval: Duration::from_millis(20),
            ..Default::default()
        })
        .browser_factory(StaticBrowser::default().factory())
        .build()
        .unwrap();

    let (live_tx, mut live_rx) = mpsc::channel(16);
    let (dead_tx, dead_rx) = mpsc::channel(16);
    bridge
        .add_stat_subscriber(Arc::new(ChannelStatSink::new("live", live_tx)))
        .await
        .unwrap();
    bridge
        .add_stat_subscriber(Arc::new(ChannelStatSink::new("dead", dead_tx)))
        .await
        .unwrap();
    drop(dead_rx);

    let mut last = serde_json::Value::Null;
    for _ in 0..3 {
        let message = tokio::time::timeout(Duration::from_secs(2), live_rx.recv())
            .await
            .unwrap()
            .unwrap();
        last = serde_json::from_str(&message).unwrap();
    }
    assert_eq!(last["stat_subscribers"], 1);
    assert_eq!(bridge.stats().stat_subscribers, 1);
    bridge.shutdown().await;
}

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn test_sender_output_feeds_receiver_input_over_loopback() {
    let receiver_bridge = Bridge::builder()
        .receiver_options(ReceiverOptions {
            bind_address: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            advertise: false,
            payload_decoder: None,
        })
        .build()
        .unwrap();
    let (tx, mut rx) = mpsc::channel(64);
    receiver_bridge.add_custom_output(ChannelOutput::new(tx)).await.unwrap();

    let port = free_port();
    receiver_bridge
        .start_input(InputSpec::Receiver(ReceiverInputConfig {
            name: "Loopback".to_string(),
            port,
            verbose: false,
        }))
        .await
        .unwrap();

    let mut speaker = Device::sink("Loopback", IpAddr::V4(Ipv4Addr::LOCALHOST), port);
    speaker.codecs = vec![0];
    let sender = SenderOutput::connect_to(speaker, Duration::from_secs(2), false)
        .await
        .unwrap();
    let clients = receiver_bridge.receiver_clients();
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0].ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));

    let buffer = AudioBuffer::new(vec![1234; 352 * 2 * 3], Duration::ZERO, 44100, 2);
    sender.consume(&buffer).await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.sample_rate, 44100);
    assert_eq!(received.channels, 2);
    assert_eq!(received.frame_count(), 352);
    assert!(received.samples.iter().all(|&s| s == 1234));

    sender.stop().await.unwrap();
    receiver_bridge.shutdown().await;
}

#[tokio::test]
async fn test_receiver_rejects_bad_config_before_touching_current_input() {
    let bridge = bridge();
    let (input, handle) = MockInput::new("current", 1000, 1);
    bridge.start_custom_input(input).await.unwrap();

    let err = bridge
        .start_input(InputSpec::Receiver(ReceiverInputConfig {
            name: "x".to_string(),
            port: 0,
            verbose: false,
        }))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    assert!(!handle.is_stopped());
    bridge.shutdown().await;
}

#[tokio::test]
#[ignore = "requires audio hardware"]
async fn test_real_capture_to_channel() {
    let _ = tracing_subscriber::fmt::try_init();
    let devices = stream_bridge::list_input_devices().unwrap();
    let Some((id, _)) = devices.first().cloned() else {
        return;
    };

    let bridge = bridge();
    let (tx, mut rx) = mpsc::channel(64);
    bridge.add_custom_output(ChannelOutput::new(tx)).await.unwrap();
    bridge
        .start_input(InputSpec::Capture(stream_bridge::CaptureInputConfig {
            audio_device: Some(stream_bridge::AudioDeviceSelector {
                id: Some(id),
                name: None,
            }),
            verbose: true,
        }))
        .await
        .unwrap();

    let buffer = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(!buffer.is_empty());
    bridge.shutdown().await;
}
