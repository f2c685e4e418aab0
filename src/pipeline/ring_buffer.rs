//! Ring buffer wrapper between device threads and tokio.

use ringbuf::traits::{Consumer, Observer, Split};
use ringbuf::HeapRb;
use std::time::Duration;

use crate::AudioBuffer;

/// Reads fixed-duration [`AudioBuffer`]s out of a sample ring.
///
/// The cpal callback pushes raw samples into the producer half; the capture
/// input pulls whole chunks from this side.
pub(crate) struct SampleReader {
    consumer: ringbuf::HeapCons<i16>,
    sample_rate: u32,
    channels: u16,
    chunk_size: usize,
    samples_read: u64,
}

impl SampleReader {
    pub(crate) fn new(
        consumer: ringbuf::HeapCons<i16>,
        sample_rate: u32,
        channels: u16,
        chunk_duration: Duration,
    ) -> Self {
        let frames_per_chunk = (sample_rate as f64 * chunk_duration.as_secs_f64()) as usize;
        let chunk_size = frames_per_chunk.max(1) * channels.max(1) as usize;

        Self {
            consumer,
            sample_rate,
            channels,
            chunk_size,
            samples_read: 0,
        }
    }

    /// Reads one complete chunk, or `None` if not enough samples are queued.
    pub(crate) fn try_read_chunk(&mut self) -> Option<AudioBuffer> {
        if self.consumer.occupied_len() < self.chunk_size {
            return None;
        }

        let mut samples = vec![0i16; self.chunk_size];
        let read = self.consumer.pop_slice(&mut samples);
        samples.truncate(read);
        self.emit(samples)
    }

    /// Number of samples currently queued.
    pub(crate) fn available(&self) -> usize {
        self.consumer.occupied_len()
    }

    /// Reads everything left, the last chunk possibly short.
    pub(crate) fn drain(&mut self) -> Vec<AudioBuffer> {
        let mut chunks = Vec::new();
        while let Some(chunk) = self.try_read_chunk() {
            chunks.push(chunk);
        }

        let remaining = self.available();
        if remaining > 0 {
            let mut samples = vec![0i16; remaining];
            let read = self.consumer.pop_slice(&mut samples);
            samples.truncate(read);
            chunks.extend(self.emit(samples));
        }
        chunks
    }

    fn emit(&mut self, samples: Vec<i16>) -> Option<AudioBuffer> {
        if samples.is_empty() {
            return None;
        }
        let timestamp = Duration::from_secs_f64(
            self.samples_read as f64 / f64::from(self.sample_rate) / f64::from(self.channels.max(1)),
        );
        self.samples_read += samples.len() as u64;
        Some(AudioBuffer::new(
            samples,
            timestamp,
            self.sample_rate,
            self.channels,
        ))
    }
}

/// Allocates a ring holding `capacity_duration` of audio.
///
/// Returns the producer (for the device callback) and the chunk reader.
pub(crate) fn create_sample_ring(
    capacity_duration: Duration,
    sample_rate: u32,
    channels: u16,
    chunk_duration: Duration,
) -> (ringbuf::HeapProd<i16>, SampleReader) {
    let capacity = ((sample_rate as f64 * capacity_duration.as_secs_f64()) as usize
        * channels.max(1) as usize)
        .max(1024);

    let ring = HeapRb::<i16>::new(capacity);
    let (producer, consumer) = ring.split();
    let reader = SampleReader::new(consumer, sample_rate, channels, chunk_duration);
    (producer, reader)
}
