//! Codec abstraction and the Opus implementation behind it.
//!
//! The pipeline only sees [`AudioEncoder`]/[`AudioDecoder`], so tests can
//! substitute pass-through codecs and run without libopus.

use anyhow::{Result, anyhow};
use audiopus::coder::{Decoder, Encoder};
use audiopus::{Application, Channels, MutSignals, SampleRate, packet::Packet};
use log::info;

use crate::protocol::AudioParams;

/// Opus worst-case packet size
const MAX_ENCODED_SIZE: usize = 4000;

pub trait AudioEncoder {
    /// Compress one PCM frame (interleaved i16) to codec bytes.
    fn encode(&mut self, pcm: &[i16]) -> Result<Vec<u8>>;
}

pub trait AudioDecoder {
    /// Decompress one codec packet to an interleaved i16 PCM frame.
    fn decode(&mut self, packet: &[u8]) -> Result<Vec<i16>>;
}

/// Creates encoder/decoder instances for a parameter set. The pipeline
/// rebuilds both on every (re)start so codec state never crosses a
/// transport restart.
pub trait CodecFactory: Send + Sync {
    fn encoder(&self, params: &AudioParams) -> Result<Box<dyn AudioEncoder>>;
    fn decoder(&self, params: &AudioParams) -> Result<Box<dyn AudioDecoder>>;
}

fn opus_sample_rate(sample_rate: u32) -> Result<SampleRate> {
    Ok(match sample_rate {
        8000 => SampleRate::Hz8000,
        12000 => SampleRate::Hz12000,
        16000 => SampleRate::Hz16000,
        24000 => SampleRate::Hz24000,
        48000 => SampleRate::Hz48000,
        other => return Err(anyhow!("unsupported Opus sample rate: {}", other)),
    })
}

fn opus_channels(channels: u16) -> Result<Channels> {
    Ok(match channels {
        1 => Channels::Mono,
        2 => Channels::Stereo,
        other => return Err(anyhow!("unsupported Opus channel count: {}", other)),
    })
}

pub struct OpusEncoder {
    encoder: Encoder,
    encoded_buffer: Vec<u8>,
}

impl OpusEncoder {
    pub fn new(params: &AudioParams) -> Result<Self> {
        let encoder = Encoder::new(
            opus_sample_rate(params.sample_rate)?,
            opus_channels(params.channels)?,
            Application::Audio,
        )
        .map_err(|e| anyhow!("failed to create Opus encoder: {}", e))?;
        Ok(Self {
            encoder,
            encoded_buffer: vec![0u8; MAX_ENCODED_SIZE],
        })
    }
}

impl AudioEncoder for OpusEncoder {
    fn encode(&mut self, pcm: &[i16]) -> Result<Vec<u8>> {
        let encoded_len = self
            .encoder
            .encode(pcm, &mut self.encoded_buffer)
            .map_err(|e| anyhow!("Opus encoding failed: {}", e))?;
        Ok(self.encoded_buffer[..encoded_len].to_vec())
    }
}

pub struct OpusDecoder {
    decoder: Decoder,
    channels: usize,
    decoded_buffer: Vec<i16>,
}

impl OpusDecoder {
    pub fn new(params: &AudioParams) -> Result<Self> {
        let decoder = Decoder::new(opus_sample_rate(params.sample_rate)?, opus_channels(params.channels)?)
            .map_err(|e| anyhow!("failed to create Opus decoder: {}", e))?;
        Ok(Self {
            decoder,
            channels: params.channels as usize,
            decoded_buffer: vec![0i16; params.frame_samples()],
        })
    }
}

impl AudioDecoder for OpusDecoder {
    fn decode(&mut self, packet: &[u8]) -> Result<Vec<i16>> {
        let packet = Packet::try_from(packet).map_err(|e| anyhow!("invalid Opus packet: {}", e))?;
        let signals = MutSignals::try_from(&mut self.decoded_buffer[..])
            .map_err(|e| anyhow!("failed to wrap decode buffer: {}", e))?;
        let decoded_per_channel = self
            .decoder
            .decode(Some(packet), signals, false)
            .map_err(|e| anyhow!("Opus decoding failed: {}", e))?;
        let total = decoded_per_channel * self.channels;
        Ok(self.decoded_buffer[..total].to_vec())
    }
}

/// Factory for real Opus coders.
pub struct OpusCodecFactory;

impl CodecFactory for OpusCodecFactory {
    fn encoder(&self, params: &AudioParams) -> Result<Box<dyn AudioEncoder>> {
        info!(
            "creating Opus encoder: {} Hz, {} ch, {} ms frames",
            params.sample_rate, params.channels, params.frame_duration
        );
        Ok(Box::new(OpusEncoder::new(params)?))
    }

    fn decoder(&self, params: &AudioParams) -> Result<Box<dyn AudioDecoder>> {
        info!(
            "creating Opus decoder: {} Hz, {} ch, {} ms frames",
            params.sample_rate, params.channels, params.frame_duration
        );
        Ok(Box::new(OpusDecoder::new(params)?))
    }
}
