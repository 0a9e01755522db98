//! Audio device I/O.
//!
//! # Design constraints
//!
//! cpal callbacks run on OS audio threads at elevated priority. They **must
//! not** block on a mutex, perform I/O or call into the session. Both
//! directions therefore talk to the rest of the crate through SPSC rings:
//!
//! ```text
//! mic callback ──push──► capture ring ──pop──► capture worker (resample → 16 kHz)
//! playback worker (mixer @ 24 kHz → resample) ──push──► playback ring ──pop──► speaker callback
//! ```
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms. Streams are opened by the
//! [`AudioHost`] *on the worker thread that later drops them*; only `Send`
//! handles (flags, rings, the mixer) cross threads.

pub mod device;
pub mod host;
pub mod output;
pub mod resample;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    FromSample, Sample, SizedSample, Stream, StreamConfig,
};

#[cfg(feature = "audio-cpal")]
use crate::buffering::Producer;
use crate::{
    buffering::AudioProducer,
    error::{Result, TutorError},
    playback::mixer::Mixer,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

pub use host::CpalHost;

/// What the capture worker asks the host for.
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    /// Rate the pipeline wants samples delivered at (16 kHz for the live API).
    pub sample_rate: u32,
    pub preferred_device: Option<String>,
}

/// What the playback worker asks the host for.
#[derive(Debug, Clone)]
pub struct PlaybackRequest {
    /// Rate the mixer renders at (24 kHz for the live API).
    pub sample_rate: u32,
    pub preferred_device: Option<String>,
}

/// An open microphone, owned by the capture worker thread.
pub trait MicSource {
    /// Append every sample captured since the last call, mono, at the
    /// requested capture rate. Returns how many were appended.
    fn read(&mut self, out: &mut Vec<f32>) -> Result<usize>;

    /// Stop the underlying device tracks.
    fn stop(&mut self) -> Result<()>;
}

/// An open speaker, owned by the playback worker thread.
pub trait SpeakerSink {
    /// Start (or resume) device output.
    fn play(&mut self) -> Result<()>;

    /// Render as much mixer output as the device buffer has room for.
    /// Returns the number of mixer frames rendered.
    fn pump(&mut self, mixer: &Mixer) -> Result<usize>;
}

/// Factory for device streams. Methods are called on worker threads.
pub trait AudioHost: Send + Sync + 'static {
    /// Acquire the microphone. Fails with a device/permission error.
    fn open_microphone(&self, request: &CaptureRequest) -> Result<Box<dyn MicSource>>;

    /// Acquire the speaker output.
    fn open_speaker(&self, request: &PlaybackRequest, mixer: &Arc<Mixer>) -> Result<Box<dyn SpeakerSink>>;
}

/// Handle to a live cpal input stream feeding the capture ring.
///
/// **Not `Send`**: create and drop on the same thread.
pub struct MicCapture {
    #[cfg(feature = "audio-cpal")]
    stream: Stream,
    running: Arc<AtomicBool>,
    /// Rate the device actually delivers (Hz).
    pub device_rate: u32,
}

impl MicCapture {
    /// Open the preferred input device (falling back to the default, then to
    /// the first available input) and start pushing mono f32 samples into
    /// `producer`.
    ///
    /// # Errors
    /// `TutorError::NoDefaultInputDevice` when no microphone exists,
    /// `TutorError::AudioDevice` / `AudioStream` when cpal refuses.
    #[cfg(feature = "audio-cpal")]
    pub fn open(producer: AudioProducer, preferred_device: Option<&str>) -> Result<Self> {
        let device = device::resolve_input_device(preferred_device)?;

        let supported = device
            .default_input_config()
            .map_err(|e| TutorError::AudioDevice(e.to_string()))?;
        let config: StreamConfig = supported.config();
        let device_rate = config.sample_rate.0;

        info!(
            device = device.name().unwrap_or_default().as_str(),
            device_rate,
            channels = config.channels,
            "opening microphone"
        );

        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let stream = match supported.sample_format() {
            cpal::SampleFormat::F32 => build_input::<f32>(&device, &config, producer, flag),
            cpal::SampleFormat::I16 => build_input::<i16>(&device, &config, producer, flag),
            cpal::SampleFormat::U16 => build_input::<u16>(&device, &config, producer, flag),
            cpal::SampleFormat::U8 => build_input::<u8>(&device, &config, producer, flag),
            fmt => {
                return Err(TutorError::AudioStream(format!(
                    "unsupported input sample format: {fmt:?}"
                )))
            }
        }?;

        stream
            .play()
            .map_err(|e| TutorError::AudioStream(e.to_string()))?;

        Ok(Self {
            stream,
            running,
            device_rate,
        })
    }

    #[cfg(not(feature = "audio-cpal"))]
    pub fn open(_producer: AudioProducer, _preferred_device: Option<&str>) -> Result<Self> {
        Err(TutorError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }

    /// Stop the device tracks. Idempotent at the device level; a second call
    /// reports that the stream was already released.
    pub fn stop(&mut self) -> Result<()> {
        if !self.running.swap(false, Ordering::AcqRel) {
            return Err(TutorError::Released("microphone"));
        }
        #[cfg(feature = "audio-cpal")]
        self.stream
            .pause()
            .map_err(|e| TutorError::AudioStream(e.to_string()))?;
        Ok(())
    }
}

/// Input callback: downmix interleaved frames to mono and push into the ring.
#[cfg(feature = "audio-cpal")]
fn build_input<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut producer: AudioProducer,
    running: Arc<AtomicBool>,
) -> Result<Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let ch = config.channels.max(1) as usize;
    let mut mono: Vec<f32> = Vec::with_capacity(4096);
    device
        .build_input_stream(
            config,
            move |data: &[T], _info| {
                if !running.load(Ordering::Relaxed) {
                    return;
                }
                let frames = data.len() / ch;
                mono.resize(frames, 0.0);
                for (f, out) in mono.iter_mut().enumerate() {
                    let frame = &data[f * ch..(f + 1) * ch];
                    let sum: f32 = frame.iter().map(|s| f32::from_sample(*s)).sum();
                    *out = sum / ch as f32;
                }
                let written = producer.push_slice(&mono);
                if written < mono.len() {
                    warn!(dropped = mono.len() - written, "capture ring full");
                }
            },
            |err| error!("microphone stream error: {err}"),
            None,
        )
        .map_err(|e| TutorError::AudioStream(e.to_string()))
}
