use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Protocol version carried in outbound hello messages
pub const PROTOCOL_VERSION: u32 = 3;

/// Codec parameters negotiated over the control channel.
///
/// Outbound hello carries the local capture parameters; the hello
/// acknowledgement carries the server's playback parameters, which may
/// differ (the server typically answers at a higher sample rate).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioParams {
    pub format: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_duration: u32,
}

impl AudioParams {
    /// Samples per codec frame per channel (frame_duration is in ms)
    pub fn frame_samples_per_channel(&self) -> usize {
        (self.sample_rate as usize / 1000) * self.frame_duration as usize
    }

    /// Total samples per codec frame across all channels
    pub fn frame_samples(&self) -> usize {
        self.frame_samples_per_channel() * self.channels as usize
    }

    pub fn validate(&self) -> Result<()> {
        if !matches!(self.sample_rate, 8000 | 12000 | 16000 | 24000 | 48000) {
            anyhow::bail!("unsupported sample rate: {}", self.sample_rate);
        }
        if self.channels == 0 || self.channels > 2 {
            anyhow::bail!("unsupported channel count: {}", self.channels);
        }
        if ![10, 20, 40, 60].contains(&self.frame_duration) {
            anyhow::bail!("unsupported frame duration: {} ms", self.frame_duration);
        }
        Ok(())
    }
}

impl Default for AudioParams {
    fn default() -> Self {
        Self {
            format: "opus".to_string(),
            sample_rate: 16000,
            channels: 1,
            frame_duration: 60,
        }
    }
}

/// Datagram endpoint and key material announced in a hello acknowledgement.
/// Key and nonce are hex-encoded 16-byte values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UdpEndpoint {
    pub server: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<String>,
    pub key: String,
    pub nonce: String,
}

/// Hello message body, used in both directions.
///
/// Outbound (device to server) omits `session_id` and `udp`; the inbound
/// acknowledgement populates both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloMessage {
    pub version: u32,
    pub transport: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_params: Option<AudioParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub udp: Option<UdpEndpoint>,
}

impl HelloMessage {
    /// Outbound hello advertising the local capture parameters
    pub fn outbound(audio_params: AudioParams) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            transport: "udp".to_string(),
            audio_params: Some(audio_params),
            session_id: None,
            udp: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenState {
    Start,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtsState {
    Start,
    SentenceStart,
    Stop,
}

/// Control-channel message, one JSON object per publish.
///
/// Unknown or malformed payloads are rejected at parse time and dropped
/// by the signaling layer without touching session state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    Hello(HelloMessage),
    Listen {
        session_id: String,
        state: ListenState,
        mode: String,
    },
    Tts {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        state: TtsState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    Stt {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default)]
        text: String,
    },
    Llm {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default)]
        text: String,
    },
    Goodbye {
        session_id: String,
    },
    Heartbeat,
}

impl ControlMessage {
    /// listen(start/stop) in manual push-to-talk mode
    pub fn listen(session_id: &str, state: ListenState) -> Self {
        ControlMessage::Listen {
            session_id: session_id.to_string(),
            state,
            mode: "manual".to_string(),
        }
    }

    pub fn goodbye(session_id: &str) -> Self {
        ControlMessage::Goodbye {
            session_id: session_id.to_string(),
        }
    }

    pub fn parse(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).context("malformed control message")
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("failed to serialize control message")
    }
}
