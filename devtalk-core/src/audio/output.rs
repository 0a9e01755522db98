//! Speaker output via cpal.
//!
//! The output callback only pops from the playback ring and fans each mono
//! sample out to every device channel. Underruns are filled with silence.
//! When the mixer raises its flush flag (an interruption) the callback drops
//! everything still queued in the ring before writing the next buffer.

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    FromSample, Sample, SizedSample, Stream, StreamConfig,
};

use std::sync::{atomic::AtomicBool, Arc};

use crate::{
    buffering::AudioConsumer,
    error::{Result, TutorError},
};

#[cfg(feature = "audio-cpal")]
use crate::buffering::Consumer;
#[cfg(feature = "audio-cpal")]
use std::sync::atomic::Ordering;

/// Handle to a live cpal output stream draining the playback ring.
///
/// **Not `Send`**: create, play and drop on the playback worker thread.
pub struct SpeakerOutput {
    #[cfg(feature = "audio-cpal")]
    stream: Stream,
    /// Rate the device renders at (Hz).
    pub device_rate: u32,
    pub channels: u16,
    playing: bool,
}

impl SpeakerOutput {
    /// Open the preferred output device (or the default one). The stream is
    /// built paused; call [`play`](Self::play) to start it.
    #[cfg(feature = "audio-cpal")]
    pub fn open(
        consumer: AudioConsumer,
        flush: Arc<AtomicBool>,
        preferred_device: Option<&str>,
    ) -> Result<Self> {
        let device = super::device::resolve_output_device(preferred_device)?;
        let supported = device
            .default_output_config()
            .map_err(|e| TutorError::AudioDevice(e.to_string()))?;
        let config: StreamConfig = supported.config();

        tracing::info!(
            device = device.name().unwrap_or_default().as_str(),
            device_rate = config.sample_rate.0,
            channels = config.channels,
            "opening speaker"
        );

        let stream = match supported.sample_format() {
            cpal::SampleFormat::F32 => build_output::<f32>(&device, &config, consumer, flush),
            cpal::SampleFormat::I16 => build_output::<i16>(&device, &config, consumer, flush),
            cpal::SampleFormat::U16 => build_output::<u16>(&device, &config, consumer, flush),
            cpal::SampleFormat::U8 => build_output::<u8>(&device, &config, consumer, flush),
            fmt => {
                return Err(TutorError::AudioStream(format!(
                    "unsupported output sample format: {fmt:?}"
                )))
            }
        }?;
        // Some backends auto-start streams on build.
        let _ = stream.pause();

        Ok(Self {
            stream,
            device_rate: config.sample_rate.0,
            channels: config.channels,
            playing: false,
        })
    }

    #[cfg(not(feature = "audio-cpal"))]
    pub fn open(
        _consumer: AudioConsumer,
        _flush: Arc<AtomicBool>,
        _preferred_device: Option<&str>,
    ) -> Result<Self> {
        Err(TutorError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }

    /// Rate the preferred (or default) output device will render at.
    #[cfg(feature = "audio-cpal")]
    pub fn probe_rate(preferred_device: Option<&str>) -> Result<u32> {
        let device = super::device::resolve_output_device(preferred_device)?;
        let supported = device
            .default_output_config()
            .map_err(|e| TutorError::AudioDevice(e.to_string()))?;
        Ok(supported.sample_rate().0)
    }

    #[cfg(not(feature = "audio-cpal"))]
    pub fn probe_rate(_preferred_device: Option<&str>) -> Result<u32> {
        Err(TutorError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }

    pub fn play(&mut self) -> Result<()> {
        if self.playing {
            return Ok(());
        }
        #[cfg(feature = "audio-cpal")]
        self.stream
            .play()
            .map_err(|e| TutorError::AudioStream(e.to_string()))?;
        self.playing = true;
        Ok(())
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }
}

#[cfg(feature = "audio-cpal")]
fn build_output<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut consumer: AudioConsumer,
    flush: Arc<AtomicBool>,
) -> Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let ch = config.channels.max(1) as usize;
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _info| {
                if flush.swap(false, Ordering::AcqRel) {
                    consumer.clear();
                }
                for frame in data.chunks_mut(ch) {
                    let value = T::from_sample(consumer.try_pop().unwrap_or(0.0));
                    frame.iter_mut().for_each(|s| *s = value);
                }
            },
            |err| tracing::error!("speaker stream error: {err}"),
            None,
        )
        .map_err(|e| TutorError::AudioStream(e.to_string()))
}
