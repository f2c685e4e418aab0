//! Local playback on the default output device.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tokio::sync::oneshot;

use crate::format::{i16_to_f32, FormatConverter};
use crate::output::{Output, OutputKind};
use crate::{AudioBuffer, BridgeConfig, BridgeError, LocalOutputConfig, OutputError};

/// Copies queued samples into a device buffer, padding with silence.
///
/// Returns the number of samples that had to be padded.
fn fill_output<T: Copy>(
    out: &mut [T],
    queue: &mut HeapCons<i16>,
    silence: T,
    convert: impl Fn(i16) -> T,
) -> usize {
    let mut written = 0;
    for slot in out.iter_mut() {
        match queue.try_pop() {
            Some(sample) => {
                *slot = convert(sample);
                written += 1;
            }
            None => *slot = silence,
        }
    }
    out.len() - written
}

struct DeviceFormat {
    name: String,
    sample_rate: u32,
    channels: u16,
}

/// Shared with the device callback.
#[derive(Default)]
struct PlaybackCounters {
    underruns: AtomicU64,
    verbose: AtomicBool,
}

fn open_stream(
    consumer: HeapCons<i16>,
    counters: Arc<PlaybackCounters>,
) -> Result<(Stream, DeviceFormat), BridgeError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| BridgeError::backend("local", "no default output device"))?;
    let name = device.name().unwrap_or_else(|_| "unknown".to_string());
    let supported = device
        .default_output_config()
        .map_err(|e| BridgeError::backend("local", e))?;
    let format = supported.sample_format();
    let config: StreamConfig = supported.into();

    let on_error = |err: cpal::StreamError| tracing::error!("playback stream error: {err}");
    let mut queue = consumer;
    let stream = match format {
        SampleFormat::I16 => device.build_output_stream(
            &config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                let padded = fill_output(data, &mut queue, 0, |s| s);
                note_underrun(&counters, padded, data.len());
            },
            on_error,
            None,
        ),
        SampleFormat::F32 => device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let padded = fill_output(data, &mut queue, 0.0, i16_to_f32);
                note_underrun(&counters, padded, data.len());
            },
            on_error,
            None,
        ),
        other => {
            return Err(BridgeError::backend(
                "local",
                format!("unsupported sample format {other:?}"),
            ))
        }
    }
    .map_err(|e| BridgeError::backend("local", e))?;

    stream.play().map_err(|e| BridgeError::backend("local", e))?;
    tracing::info!(
        device = %name,
        rate = config.sample_rate.0,
        channels = config.channels,
        "local playback started"
    );
    Ok((
        stream,
        DeviceFormat {
            name,
            sample_rate: config.sample_rate.0,
            channels: config.channels,
        },
    ))
}

fn note_underrun(counters: &PlaybackCounters, padded: usize, requested: usize) {
    // A fully silent callback just means nothing is playing.
    if padded > 0 && padded < requested {
        counters.underruns.fetch_add(1, Ordering::Relaxed);
        if counters.verbose.load(Ordering::Relaxed) {
            tracing::debug!(padded, "playback underrun");
        }
    }
}

/// Plays audio on the host's default output device.
///
/// Buffers are converted to the device format and queued in a ring read by
/// the device callback. `consume` waits for room up to one buffer's
/// duration and drops what still doesn't fit.
pub struct LocalOutput {
    name: String,
    producer: Mutex<HeapProd<i16>>,
    converter: FormatConverter,
    counters: Arc<PlaybackCounters>,
    stop: Mutex<Option<std_mpsc::Sender<()>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl LocalOutput {
    /// Opens the default output device.
    ///
    /// # Errors
    ///
    /// Returns a backend error if there is no usable output device.
    pub async fn start(config: &LocalOutputConfig, tuning: &BridgeConfig) -> Result<Self, BridgeError> {
        let counters = Arc::new(PlaybackCounters::default());
        counters.verbose.store(config.verbose, Ordering::Relaxed);

        // Sized for the worst common case; the device format isn't known yet.
        let capacity = (48000.0 * 2.0 * tuning.ring_buffer_duration.as_secs_f64()) as usize;
        let (producer, consumer) = HeapRb::<i16>::new(capacity.max(4096)).split();

        let (ready_tx, ready_rx) = oneshot::channel::<Result<DeviceFormat, BridgeError>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let thread_counters = counters.clone();
        let thread = std::thread::Builder::new()
            .name("local-playback".to_string())
            .spawn(move || match open_stream(consumer, thread_counters) {
                Ok((stream, format)) => {
                    if ready_tx.send(Ok(format)).is_ok() {
                        let _ = stop_rx.recv();
                    }
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| BridgeError::backend("local", e))?;

        let format = ready_rx
            .await
            .map_err(|_| BridgeError::backend("local", "device thread exited"))??;

        Ok(Self {
            name: format!("local:{}", format.name),
            producer: Mutex::new(producer),
            converter: FormatConverter::new(format.sample_rate, format.channels),
            counters,
            stop: Mutex::new(Some(stop_tx)),
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Callbacks that had to pad with silence mid-stream.
    pub fn underruns(&self) -> u64 {
        self.counters.underruns.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Output for LocalOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> OutputKind {
        OutputKind::Local
    }

    async fn consume(&self, buffer: &AudioBuffer) -> Result<(), OutputError> {
        if self.stop.lock().is_none() {
            return Err(OutputError::Stopped);
        }
        let samples = self.converter.convert(buffer);
        let deadline = tokio::time::Instant::now() + buffer.duration();
        let mut offset = 0;

        loop {
            offset += self.producer.lock().push_slice(&samples[offset..]);
            if offset == samples.len() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                let dropped = samples.len() - offset;
                if self.counters.verbose.load(Ordering::Relaxed) {
                    tracing::debug!(dropped, "playback queue full");
                }
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn set_verbose(&self, verbose: bool) {
        self.counters.verbose.store(verbose, Ordering::Relaxed);
    }

    async fn stop(&self) -> Result<(), OutputError> {
        if let Some(stop) = self.stop.lock().take() {
            let _ = stop.send(());
        }
        let thread = self.thread.lock().take();
        if let Some(thread) = thread {
            tokio::task::spawn_blocking(move || thread.join())
                .await
                .map_err(|e| OutputError::custom(e.to_string()))?
                .map_err(|_| OutputError::custom("playback thread panicked"))?;
        }
        tracing::info!(
            name = %self.name,
            underruns = self.underruns(),
            queued = self.producer.lock().occupied_len(),
            "local playback stopped"
        );
        Ok(())
    }
}
