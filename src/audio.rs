//! Audio device abstraction with a cpal-backed implementation.
//!
//! The pipeline talks to blocking [`AudioSource::read`] / [`AudioSink::write`]
//! handles, matching the one-frame-at-a-time cadence of the codec. The cpal
//! implementation bridges the callback-driven streams to that blocking shape
//! with lock-free ring buffers. Tests inject their own factories and never
//! touch real devices.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use log::{error, info, warn};
use ringbuf::traits::*;
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::protocol::AudioParams;

/// Ring capacity in codec frames (~1.5 s of audio at 60 ms frames)
const RING_FRAMES: usize = 25;

/// Bail out if the device moves no samples for this long
const STALL_LIMIT: Duration = Duration::from_secs(2);

pub trait AudioSource {
    /// Block until `samples` interleaved i16 samples are captured.
    fn read(&mut self, samples: usize) -> Result<Vec<i16>>;
}

pub trait AudioSink {
    /// Queue one interleaved i16 PCM buffer for playback, blocking while
    /// the device buffer is full.
    fn write(&mut self, pcm: &[i16]) -> Result<()>;
}

/// Opens capture/playback handles. The returned handles are used only on
/// the thread that opened them, so cpal's thread-bound streams are fine
/// behind this seam.
pub trait AudioDeviceFactory: Send + Sync {
    fn open_source(&self, params: &AudioParams) -> Result<Box<dyn AudioSource>>;
    fn open_sink(&self, params: &AudioParams) -> Result<Box<dyn AudioSink>>;
}

/// cpal-backed factory using the host default devices.
pub struct CpalDeviceFactory;

impl AudioDeviceFactory for CpalDeviceFactory {
    fn open_source(&self, params: &AudioParams) -> Result<Box<dyn AudioSource>> {
        Ok(Box::new(CpalSource::open(params)?))
    }

    fn open_sink(&self, params: &AudioParams) -> Result<Box<dyn AudioSink>> {
        Ok(Box::new(CpalSink::open(params)?))
    }
}

fn stream_config(params: &AudioParams) -> StreamConfig {
    StreamConfig {
        channels: params.channels,
        sample_rate: SampleRate(params.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    }
}

pub struct CpalSource {
    _stream: Stream,
    consumer: HeapCons<i16>,
}

impl CpalSource {
    pub fn open(params: &AudioParams) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| anyhow!("no default input device available"))?;
        info!("input device: {}", device.name().unwrap_or_else(|_| "unknown".to_string()));

        let ring = HeapRb::<i16>::new(params.frame_samples() * RING_FRAMES);
        let (mut producer, consumer) = ring.split();

        // Devices commonly only expose f32; convert in the callback.
        let stream = device
            .build_input_stream(
                &stream_config(params),
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    for &sample in data {
                        let value = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
                        if producer.try_push(value).is_err() {
                            // Capture loop fell behind; drop the rest.
                            break;
                        }
                    }
                },
                |err| error!("audio input stream error: {}", err),
                None,
            )
            .map_err(|e| anyhow!("failed to open capture stream: {}", e))?;
        stream.play().map_err(|e| anyhow!("failed to start capture stream: {}", e))?;

        Ok(Self { _stream: stream, consumer })
    }
}

impl AudioSource for CpalSource {
    fn read(&mut self, samples: usize) -> Result<Vec<i16>> {
        let mut pcm = vec![0i16; samples];
        let mut filled = 0;
        let deadline = Instant::now() + STALL_LIMIT;
        while filled < samples {
            filled += self.consumer.pop_slice(&mut pcm[filled..]);
            if filled < samples {
                if Instant::now() > deadline {
                    return Err(anyhow!("capture device stalled ({}/{} samples)", filled, samples));
                }
                thread::sleep(Duration::from_millis(2));
            }
        }
        Ok(pcm)
    }
}

pub struct CpalSink {
    _stream: Stream,
    producer: HeapProd<i16>,
}

impl CpalSink {
    pub fn open(params: &AudioParams) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow!("no default output device available"))?;
        info!("output device: {}", device.name().unwrap_or_else(|_| "unknown".to_string()));

        let ring = HeapRb::<i16>::new(params.frame_samples() * RING_FRAMES);
        let (producer, mut consumer) = ring.split();

        let stream = device
            .build_output_stream(
                &stream_config(params),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for slot in data.iter_mut() {
                        *slot = match consumer.try_pop() {
                            Some(value) => value as f32 / 32767.0,
                            None => 0.0,
                        };
                    }
                },
                |err| error!("audio output stream error: {}", err),
                None,
            )
            .map_err(|e| anyhow!("failed to open playback stream: {}", e))?;
        stream.play().map_err(|e| anyhow!("failed to start playback stream: {}", e))?;

        Ok(Self { _stream: stream, producer })
    }
}

impl AudioSink for CpalSink {
    fn write(&mut self, pcm: &[i16]) -> Result<()> {
        let mut written = 0;
        let deadline = Instant::now() + STALL_LIMIT;
        while written < pcm.len() {
            written += self.producer.push_slice(&pcm[written..]);
            if written < pcm.len() {
                if Instant::now() > deadline {
                    return Err(anyhow!("playback device stalled ({}/{} samples)", written, pcm.len()));
                }
                thread::sleep(Duration::from_millis(2));
            }
        }
        Ok(())
    }
}

/// Raise the calling thread to realtime scheduling where the platform
/// supports it. Failure is expected without elevated privileges.
pub fn set_realtime_priority() {
    #[cfg(target_os = "linux")]
    {
        let param = libc::sched_param { sched_priority: 80 };
        let result = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
        if result == 0 {
            info!("capture thread running with SCHED_FIFO priority 80");
        } else {
            warn!(
                "failed to set realtime scheduling: {}; continuing with normal priority",
                std::io::Error::last_os_error()
            );
        }
    }

    #[cfg(not(target_os = "linux"))]
    {
        warn!("realtime scheduling not implemented for this platform");
    }
}
