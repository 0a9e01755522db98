//! The cpal-backed [`AudioHost`].
//!
//! Both handles are built on the worker thread that calls the factory and
//! never leave it.

use std::sync::Arc;

use tracing::{debug, info};

use super::{
    output::SpeakerOutput, resample::RateConverter, AudioHost, CaptureRequest, MicCapture,
    MicSource, PlaybackRequest, SpeakerSink,
};
use crate::{
    buffering::{
        create_capture_ring, create_playback_ring, AudioConsumer, AudioProducer, Consumer,
        Observer, Producer,
    },
    error::Result,
    playback::mixer::Mixer,
};

/// Samples drained from the capture ring per read.
const CAPTURE_DRAIN: usize = 4096;
/// Mixer frames rendered per pump step (20 ms at 24 kHz).
const RENDER_BLOCK: usize = 480;

/// Default system audio via cpal.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalHost;

impl AudioHost for CpalHost {
    fn open_microphone(&self, request: &CaptureRequest) -> Result<Box<dyn MicSource>> {
        let (producer, consumer) = create_capture_ring();
        let capture = MicCapture::open(producer, request.preferred_device.as_deref())?;
        let converter = RateConverter::new(capture.device_rate, request.sample_rate, 1024)?;
        info!(
            device_rate = capture.device_rate,
            target_rate = request.sample_rate,
            "microphone ready"
        );
        Ok(Box::new(CpalMicrophone {
            capture,
            consumer,
            converter,
            raw: vec![0.0; CAPTURE_DRAIN],
        }))
    }

    fn open_speaker(
        &self,
        request: &PlaybackRequest,
        mixer: &Arc<Mixer>,
    ) -> Result<Box<dyn SpeakerSink>> {
        // The ring is sized in device-rate samples.
        let device_rate = SpeakerOutput::probe_rate(request.preferred_device.as_deref())?;
        let (producer, consumer) = create_playback_ring(device_rate);
        let output = SpeakerOutput::open(
            consumer,
            mixer.flush_flag(),
            request.preferred_device.as_deref(),
        )?;
        let converter = RateConverter::new(request.sample_rate, output.device_rate, RENDER_BLOCK)?;
        Ok(Box::new(CpalSpeaker {
            output,
            producer,
            converter,
            block: vec![0.0; RENDER_BLOCK],
            resampled: Vec::with_capacity(RENDER_BLOCK * 4),
        }))
    }
}

struct CpalMicrophone {
    capture: MicCapture,
    consumer: AudioConsumer,
    converter: RateConverter,
    raw: Vec<f32>,
}

impl MicSource for CpalMicrophone {
    fn read(&mut self, out: &mut Vec<f32>) -> Result<usize> {
        let mut appended = 0;
        loop {
            let n = self.consumer.pop_slice(&mut self.raw);
            if n == 0 {
                break;
            }
            appended += self.converter.process_into(&self.raw[..n], out);
        }
        Ok(appended)
    }

    fn stop(&mut self) -> Result<()> {
        self.capture.stop()?;
        debug!(dropped = self.consumer.occupied_len(), "microphone stopped");
        self.consumer.clear();
        Ok(())
    }
}

struct CpalSpeaker {
    output: SpeakerOutput,
    producer: AudioProducer,
    converter: RateConverter,
    block: Vec<f32>,
    resampled: Vec<f32>,
}

impl SpeakerSink for CpalSpeaker {
    fn play(&mut self) -> Result<()> {
        self.output.play()
    }

    fn pump(&mut self, mixer: &Mixer) -> Result<usize> {
        // Headroom for rubato emitting one sample more than the nominal ratio.
        let needed = self.converter.output_per_block() + 8;
        let mut rendered = 0;
        while self.producer.vacant_len() >= needed + self.resampled.len() {
            mixer.render(&mut self.block);
            rendered += self.block.len();
            self.converter.process_into(&self.block, &mut self.resampled);
            let pushed = self.producer.push_slice(&self.resampled);
            self.resampled.drain(..pushed);
        }
        Ok(rendered)
    }
}
