//! Real-time audio output using cpal
//!
//! Opens the default output device, drives a [`Cyclist`] from the stream
//! callback and interleaves its stereo blocks into whatever sample format
//! the device wants.

use crate::cyclist::{Cyclist, PatternSlot};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{error, info};

pub struct AudioEngine {
    sample_rate: u32,
    cyclist: Arc<Mutex<Cyclist>>,
    _stream: cpal::Stream,
}

impl AudioEngine {
    /// Open the default output device and start a cyclist on it.
    pub fn start(
        cps: f64,
        samples_path: Option<PathBuf>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let host = cpal::default_host();
        info!("audio host: {:?}", host.id());

        let device = host
            .default_output_device()
            .ok_or("no audio output device found")?;
        info!("audio device: {}", device.name()?);

        let config = device.default_output_config()?;
        info!("audio config: {:?}", config);

        let sample_rate = config.sample_rate().0;
        let channels = config.channels() as usize;

        let cyclist = Arc::new(Mutex::new(Cyclist::new(
            sample_rate as f32,
            cps,
            samples_path,
        )));

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => {
                Self::build_stream::<f32>(&device, &config.into(), cyclist.clone(), channels)
            }
            cpal::SampleFormat::I16 => {
                Self::build_stream::<i16>(&device, &config.into(), cyclist.clone(), channels)
            }
            cpal::SampleFormat::U16 => {
                Self::build_stream::<u16>(&device, &config.into(), cyclist.clone(), channels)
            }
            other => return Err(format!("unsupported sample format {:?}", other).into()),
        }?;

        stream.play()?;
        info!("audio stream started at {} Hz", sample_rate);

        Ok(Self {
            sample_rate,
            cyclist,
            _stream: stream,
        })
    }

    fn build_stream<T>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        cyclist: Arc<Mutex<Cyclist>>,
        channels: usize,
    ) -> Result<cpal::Stream, Box<dyn std::error::Error>>
    where
        T: cpal::SizedSample + cpal::FromSample<f32>,
    {
        let stream = device.build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let channels = channels.max(1);
                let frames = data.len() / channels;
                let (left, right) = cyclist.lock().unwrap().generate(frames);
                for (i, frame) in data.chunks_exact_mut(channels).enumerate() {
                    frame[0] = T::from_sample(left[i]);
                    if frame.len() > 1 {
                        frame[1] = T::from_sample(right[i]);
                    }
                    // Duplicate left into any further channels.
                    for extra in frame.iter_mut().skip(2) {
                        *extra = T::from_sample(left[i]);
                    }
                }
            },
            |err| error!("audio stream error: {}", err),
            None,
        )?;
        Ok(stream)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Handle for swapping the active pattern from a control thread.
    pub fn pattern_slot(&self) -> PatternSlot {
        self.cyclist.lock().unwrap().pattern_slot()
    }

    pub fn cyclist(&self) -> Arc<Mutex<Cyclist>> {
        self.cyclist.clone()
    }
}
