//! Lock-free SPSC ring buffers between device callbacks and worker threads.
//!
//! Uses `ringbuf::HeapRb<f32>` whose `push_slice` / `pop_slice` are wait-free
//! and safe to call from real-time audio callbacks.
//!
//! Two rings exist per session:
//! - capture: cpal input callback → capture worker (device rate, mono)
//! - playback: playback worker → cpal output callback (device rate, mono)

pub mod frame;

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Observer, Producer};

/// Producer half, held by whichever side writes samples.
pub type AudioProducer = ringbuf::HeapProd<f32>;

/// Consumer half, held by whichever side reads samples.
pub type AudioConsumer = ringbuf::HeapCons<f32>;

/// Capture ring capacity: 2^18 = 262 144 samples ≈ 5.4 s at 48 kHz.
/// The capture worker drains every few milliseconds; this only has to absorb
/// scheduler hiccups.
pub const CAPTURE_RING_CAPACITY: usize = 1 << 18;

/// Playback ring length in milliseconds of device-rate audio.
///
/// Audio handed to the device cannot be rescheduled, so this bounds how much
/// already-rendered speech can leak past an interruption.
pub const PLAYBACK_RING_MS: usize = 120;

/// Create the capture ring.
pub fn create_capture_ring() -> (AudioProducer, AudioConsumer) {
    HeapRb::<f32>::new(CAPTURE_RING_CAPACITY).split()
}

/// Create a playback ring sized for `PLAYBACK_RING_MS` at `device_rate`.
pub fn create_playback_ring(device_rate: u32) -> (AudioProducer, AudioConsumer) {
    let capacity = (device_rate as usize * PLAYBACK_RING_MS / 1000).max(256);
    HeapRb::<f32>::new(capacity).split()
}
