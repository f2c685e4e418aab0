//! Audio pipeline components.
//!
//! The pipeline moves buffers from the single active input to every
//! attached output:
//!
//! ```text
//! Input → Fan-out Task → per-output Queue → Delivery Task → Output
//!                      ↘ Visualization callback
//! ```
//!
//! - **Registry**: the set of attached outputs, swapped copy-on-write so the
//!   fan-out task never holds its lock while delivering
//! - **Fan-out**: pulls buffers from the input, stamps each with a sequence
//!   number and queues it to every output attached at that instant, never
//!   waiting on a full queue
//! - **Delivery**: one task per output; counts failures, detaches outputs
//!   that keep failing, drains its queue on removal
//! - **Ring buffer**: lock-free SPSC queue between cpal device threads and
//!   tokio, so the audio callback never blocks

mod delivery;
mod fanout;
mod registry;
mod ring_buffer;

pub(crate) use fanout::{FanOut, InputCounters};
pub(crate) use registry::{DeliverySettings, OutputRegistry};
pub(crate) use ring_buffer::{create_sample_ring, SampleReader};
