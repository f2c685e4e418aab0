//! Mock input for testing without hardware or network peers.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::input::Input;
use crate::{AudioBuffer, BridgeError};

/// Counts how many inputs sharing it are producing at once.
///
/// Each [`MockInput`] registers on its first `produce` and unregisters on
/// `stop`. `peak()` is the highest concurrent count ever seen.
#[derive(Debug, Clone, Default)]
pub struct InputGauge {
    live: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl InputGauge {
    /// Creates a gauge at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inputs currently producing.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Highest number of inputs ever producing together.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// An input driven by a [`MockInputHandle`].
///
/// Buffers pushed through the handle are produced in order. Dropping or
/// closing the handle ends the input once the queued buffers are drained.
///
/// # Example
///
/// ```
/// use stream_bridge::MockInput;
///
/// let (input, handle) = MockInput::new("mock", 44100, 2);
/// handle.push_silence(20);
/// handle.push_sine(440.0, 20);
/// handle.close();
/// # drop(input);
/// ```
pub struct MockInput {
    name: String,
    receiver: mpsc::UnboundedReceiver<AudioBuffer>,
    stopped: Arc<AtomicBool>,
    gauge: Option<InputGauge>,
    registered: bool,
}

/// Feeds a [`MockInput`] and observes its lifecycle.
#[derive(Clone)]
pub struct MockInputHandle {
    sender: Arc<parking_lot::Mutex<Option<mpsc::UnboundedSender<AudioBuffer>>>>,
    stopped: Arc<AtomicBool>,
    sample_rate: u32,
    channels: u16,
    position: Arc<parking_lot::Mutex<Duration>>,
}

impl MockInput {
    /// Creates an input producing `sample_rate` Hz, `channels` channels.
    pub fn new(name: impl Into<String>, sample_rate: u32, channels: u16) -> (Self, MockInputHandle) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let stopped = Arc::new(AtomicBool::new(false));
        let input = Self {
            name: name.into(),
            receiver,
            stopped: stopped.clone(),
            gauge: None,
            registered: false,
        };
        let handle = MockInputHandle {
            sender: Arc::new(parking_lot::Mutex::new(Some(sender))),
            stopped,
            sample_rate,
            channels: channels.max(1),
            position: Arc::new(parking_lot::Mutex::new(Duration::ZERO)),
        };
        (input, handle)
    }

    /// Creates an input that produces `buffers` and then ends.
    pub fn scripted(name: impl Into<String>, buffers: Vec<AudioBuffer>) -> Self {
        let (input, handle) = Self::new(name, 44100, 2);
        for buffer in buffers {
            handle.push(buffer);
        }
        handle.close();
        input
    }

    /// Reports this input's activity to `gauge`.
    pub fn with_gauge(mut self, gauge: InputGauge) -> Self {
        self.gauge = Some(gauge);
        self
    }
}

#[async_trait]
impl Input for MockInput {
    fn name(&self) -> &str {
        &self.name
    }

    async fn produce(&mut self) -> Option<AudioBuffer> {
        if !self.registered {
            self.registered = true;
            if let Some(gauge) = &self.gauge {
                gauge.enter();
            }
        }
        self.receiver.recv().await
    }

    async fn stop(&mut self) -> Result<(), BridgeError> {
        self.receiver.close();
        if self.registered {
            self.registered = false;
            if let Some(gauge) = &self.gauge {
                gauge.leave();
            }
        }
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl MockInputHandle {
    /// Queues a ready-made buffer. Returns `false` once the input is closed.
    pub fn push(&self, buffer: AudioBuffer) -> bool {
        match self.sender.lock().as_ref() {
            Some(sender) => sender.send(buffer).is_ok(),
            None => false,
        }
    }

    /// Queues raw interleaved samples in the handle's format.
    pub fn push_samples(&self, samples: Vec<i16>) -> bool {
        let buffer = {
            let mut position = self.position.lock();
            let buffer = AudioBuffer::new(samples, *position, self.sample_rate, self.channels);
            *position = buffer.end_timestamp();
            buffer
        };
        self.push(buffer)
    }

    /// Queues `duration_ms` of silence.
    pub fn push_silence(&self, duration_ms: u64) -> bool {
        let samples = vec![0i16; self.samples_for_duration(duration_ms)];
        self.push_samples(samples)
    }

    /// Queues `duration_ms` of a sine wave, identical on every channel.
    pub fn push_sine(&self, frequency: f64, duration_ms: u64) -> bool {
        let channels = self.channels as usize;
        let frames = self.samples_for_duration(duration_ms) / channels;
        let sample_rate = f64::from(self.sample_rate);

        let mut samples = Vec::with_capacity(frames * channels);
        for i in 0..frames {
            let t = i as f64 / sample_rate;
            let value = (2.0 * std::f64::consts::PI * frequency * t).sin();
            let sample = (value * 32767.0) as i16;
            samples.extend(std::iter::repeat(sample).take(channels));
        }
        self.push_samples(samples)
    }

    /// Ends the input after the queued buffers.
    pub fn close(&self) {
        self.sender.lock().take();
    }

    /// Returns `true` once the bridge has stopped the input.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn samples_for_duration(&self, duration_ms: u64) -> usize {
        let frames = (u64::from(self.sample_rate) * duration_ms / 1000) as usize;
        frames * self.channels as usize
    }
}
