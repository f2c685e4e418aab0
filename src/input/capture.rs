//! Capture input backed by a local audio device.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use ringbuf::traits::Producer;
use tokio::sync::oneshot;

use crate::format::f32_to_i16;
use crate::input::Input;
use crate::pipeline::{create_sample_ring, SampleReader};
use crate::{AudioBuffer, AudioDeviceSelector, BridgeConfig, BridgeError, CaptureInputConfig};

/// Lists capture devices as `(id, name)`. Ids index the host's input list.
pub fn list_input_devices() -> Result<Vec<(usize, String)>, BridgeError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| BridgeError::backend("capture", e))?;
    Ok(devices
        .enumerate()
        .map(|(id, device)| (id, device.name().unwrap_or_else(|_| "unknown".to_string())))
        .collect())
}

/// Picks the index of the device the selector names. An id wins over a name.
fn select_index(names: &[String], selector: &AudioDeviceSelector) -> Option<usize> {
    if let Some(id) = selector.id {
        return (id < names.len()).then_some(id);
    }
    let wanted = selector.name.as_deref()?;
    names.iter().position(|name| name == wanted)
}

fn open_device(selector: &AudioDeviceSelector) -> Result<Device, BridgeError> {
    let host = cpal::default_host();
    let devices: Vec<Device> = host
        .input_devices()
        .map_err(|e| BridgeError::backend("capture", e))?
        .collect();
    let names: Vec<String> = devices
        .iter()
        .map(|d| d.name().unwrap_or_else(|_| "unknown".to_string()))
        .collect();

    let index = select_index(&names, selector).ok_or_else(|| {
        BridgeError::backend(
            "capture",
            format!("no input device matching {selector:?} (have {names:?})"),
        )
    })?;
    devices
        .into_iter()
        .nth(index)
        .ok_or_else(|| BridgeError::backend("capture", "device list changed"))
}

fn build_stream(
    device: &Device,
    config: &StreamConfig,
    format: SampleFormat,
    mut producer: ringbuf::HeapProd<i16>,
    failed: Arc<AtomicBool>,
) -> Result<Stream, BridgeError> {
    let on_error = move |err: cpal::StreamError| {
        tracing::error!("capture stream error: {err}");
        failed.store(true, Ordering::SeqCst);
    };
    let stream = match format {
        SampleFormat::I16 => device.build_input_stream(
            config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                // Drops samples when the reader falls behind.
                let _ = producer.push_slice(data);
            },
            on_error,
            None,
        ),
        SampleFormat::F32 => device.build_input_stream(
            config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for &sample in data {
                    let _ = producer.try_push(f32_to_i16(sample));
                }
            },
            on_error,
            None,
        ),
        other => {
            return Err(BridgeError::backend(
                "capture",
                format!("unsupported sample format {other:?}"),
            ))
        }
    };
    stream.map_err(|e| BridgeError::backend("capture", e))
}

struct Opened {
    name: String,
    reader: SampleReader,
}

fn open_stream(
    selector: &AudioDeviceSelector,
    ring_duration: Duration,
    chunk_duration: Duration,
    failed: Arc<AtomicBool>,
) -> Result<(Stream, Opened), BridgeError> {
    let device = open_device(selector)?;
    let name = device.name().unwrap_or_else(|_| "unknown".to_string());
    let supported = device
        .default_input_config()
        .map_err(|e| BridgeError::backend("capture", e))?;
    let format = supported.sample_format();
    let config: StreamConfig = supported.into();

    let (producer, reader) =
        create_sample_ring(ring_duration, config.sample_rate.0, config.channels, chunk_duration);
    let stream = build_stream(&device, &config, format, producer, failed)?;
    stream.play().map_err(|e| BridgeError::backend("capture", e))?;
    tracing::info!(
        device = %name,
        rate = config.sample_rate.0,
        channels = config.channels,
        "capture started"
    );
    Ok((stream, Opened { name, reader }))
}

/// Owns the cpal stream for its whole life; streams are not `Send`.
fn run_device_thread(
    selector: AudioDeviceSelector,
    ring_duration: Duration,
    chunk_duration: Duration,
    failed: Arc<AtomicBool>,
    ready: oneshot::Sender<Result<Opened, BridgeError>>,
    stop: std_mpsc::Receiver<()>,
) {
    let opened = open_stream(&selector, ring_duration, chunk_duration, failed);

    match opened {
        Ok((stream, opened)) => {
            if ready.send(Ok(opened)).is_ok() {
                // Blocks until stop() or the input is dropped.
                let _ = stop.recv();
            }
            drop(stream);
        }
        Err(e) => {
            let _ = ready.send(Err(e));
        }
    }
}

/// Captures from a local input device.
///
/// The device callback fills a ring buffer; `produce` pulls fixed-size
/// chunks from it, polling every half chunk.
pub struct CaptureInput {
    name: String,
    reader: SampleReader,
    poll_interval: Duration,
    failed: Arc<AtomicBool>,
    stop: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
    verbose: bool,
}

impl CaptureInput {
    /// Opens the selected device and starts capturing.
    ///
    /// # Errors
    ///
    /// A configuration error without a selector, a backend error if the
    /// device is missing or cannot be opened.
    pub async fn start(config: &CaptureInputConfig, tuning: &BridgeConfig) -> Result<Self, BridgeError> {
        let selector = config.selector()?.clone();
        let failed = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel();

        let ring_duration = tuning.ring_buffer_duration;
        let chunk_duration = tuning.chunk_duration;
        let thread_failed = failed.clone();
        let thread = std::thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || {
                run_device_thread(selector, ring_duration, chunk_duration, thread_failed, ready_tx, stop_rx);
            })
            .map_err(|e| BridgeError::backend("capture", e))?;

        let opened = ready_rx
            .await
            .map_err(|_| BridgeError::backend("capture", "device thread exited"))??;

        Ok(Self {
            name: format!("capture:{}", opened.name),
            reader: opened.reader,
            poll_interval: chunk_duration / 2,
            failed,
            stop: Some(stop_tx),
            thread: Some(thread),
            verbose: config.verbose,
        })
    }
}

#[async_trait]
impl Input for CaptureInput {
    fn name(&self) -> &str {
        &self.name
    }

    async fn produce(&mut self) -> Option<AudioBuffer> {
        loop {
            if let Some(buffer) = self.reader.try_read_chunk() {
                if self.verbose {
                    let peak = buffer.samples.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0);
                    tracing::info!(frames = buffer.frame_count(), peak, "captured chunk");
                }
                return Some(buffer);
            }
            if self.stop.is_none() {
                return None;
            }
            if self.failed.load(Ordering::SeqCst) {
                // Hand out the short tail once, then end.
                return self.reader.drain().pop();
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn stop(&mut self) -> Result<(), BridgeError> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            tokio::task::spawn_blocking(move || thread.join())
                .await
                .map_err(|e| BridgeError::backend("capture", e))?
                .map_err(|_| BridgeError::backend("capture", "device thread panicked"))?;
        }
        tracing::info!(name = %self.name, "capture stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> Vec<String> {
        vec!["Built-in Mic".to_string(), "USB Interface".to_string()]
    }

    #[test]
    fn test_select_by_name() {
        let selector = AudioDeviceSelector {
            id: None,
            name: Some("USB Interface".to_string()),
        };
        assert_eq!(select_index(&names(), &selector), Some(1));
    }

    #[test]
    fn test_select_by_id_wins() {
        let selector = AudioDeviceSelector {
            id: Some(0),
            name: Some("USB Interface".to_string()),
        };
        assert_eq!(select_index(&names(), &selector), Some(0));
    }

    #[test]
    fn test_select_missing() {
        let by_id = AudioDeviceSelector {
            id: Some(5),
            name: None,
        };
        let by_name = AudioDeviceSelector {
            id: None,
            name: Some("Line In".to_string()),
        };
        assert_eq!(select_index(&names(), &by_id), None);
        assert_eq!(select_index(&names(), &by_name), None);
    }

    #[tokio::test]
    async fn test_start_without_selector_is_config_error() {
        let config = CaptureInputConfig {
            audio_device: None,
            verbose: false,
        };
        let err = CaptureInput::start(&config, &BridgeConfig::default()).await.err().unwrap();
        assert_eq!(err.kind(), crate::ErrorKind::Config);
    }

    #[tokio::test]
    #[ignore = "requires audio hardware"]
    async fn test_capture_first_device() {
        let config = CaptureInputConfig {
            audio_device: Some(AudioDeviceSelector {
                id: Some(0),
                name: None,
            }),
            verbose: true,
        };
        let mut input = CaptureInput::start(&config, &BridgeConfig::default()).await.unwrap();
        let buffer = input.produce().await.unwrap();
        assert!(!buffer.is_empty());
        input.stop().await.unwrap();
    }
}
