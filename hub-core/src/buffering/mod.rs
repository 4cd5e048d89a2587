//! Lock-free SPSC ring buffer between the microphone callback and the capture pump.
//!
//! Uses `ringbuf::HeapRb<f32>` whose `push_slice` is wait-free and safe to call
//! from the real-time audio callback.

pub mod frame;

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Observer, Producer};

/// Producer half, held by the audio callback thread.
pub type AudioProducer = ringbuf::HeapProd<f32>;

/// Consumer half, held by the capture pump thread.
pub type AudioConsumer = ringbuf::HeapCons<f32>;

/// Buffer capacity: 2^20 = 1 048 576 f32 samples ≈ 21.8 s at 48 kHz.
/// The pump drains every few milliseconds, so this only matters when the
/// pump thread is starved.
pub const RING_CAPACITY: usize = 1 << 20;

/// Create a matched producer/consumer pair backed by a heap-allocated ring buffer.
pub fn create_audio_ring() -> (AudioProducer, AudioConsumer) {
    HeapRb::<f32>::new(RING_CAPACITY).split()
}
