//! # Vocalink Voice Session Engine
//!
//! A real-time voice-session client: audio sessions are negotiated over
//! an MQTT control channel, then Opus-compressed, AES-128-CTR-encrypted
//! audio frames stream over UDP, kept alive by heartbeats and torn down
//! on goodbye or inactivity timeout.
//!
//! ## Architecture
//!
//! - [`protocol`]: control-channel message schema (hello/listen/tts/stt/llm/goodbye/heartbeat)
//! - [`crypto`]: per-packet stream-cipher encryption with a derived IV
//! - [`transport`]: encrypted datagram socket wrapper
//! - [`audio`]: blocking capture/playback device abstraction over cpal
//! - [`codec`]: Opus encoder/decoder abstraction
//! - [`pipeline`]: the capture and playback loops of an active session
//! - [`session`]: shared session state (identity, key material, sequence)
//! - [`signaling`]: MQTT control channel with fixed-interval reconnect
//! - [`liveness`]: heartbeat publisher and inactivity watchdog
//! - [`controller`]: the session state machine driving all of the above
//! - [`provisioning`]: HTTP credential bootstrap
//! - [`config`]: persistent settings and protocol timing constants
//! - [`input`] / [`display`] / [`app`]: keyboard events, transcript
//!   output and top-level wiring
//!
//! ## Data path
//!
//! Capture: device read → Opus encode → AES-CTR encrypt (sequence-derived
//! nonce) → UDP send. Playback: UDP receive (bounded poll) → decrypt →
//! Opus decode → device write. The two loops share one socket and one
//! session context; only the controller mutates session identity, and
//! only the capture loop advances the sequence counter.

/// Control-channel message schema
pub mod protocol;

/// Per-packet AES-128-CTR encryption with derived nonces
pub mod crypto;

/// Encrypted datagram transport
pub mod transport;

/// Shared session state
pub mod session;

/// Audio device abstraction (cpal + ring buffers)
pub mod audio;

/// Opus codec abstraction
pub mod codec;

/// Capture/playback pipeline of an active session
pub mod pipeline;

/// MQTT signaling channel
pub mod signaling;

/// Heartbeat publisher and inactivity watchdog
pub mod liveness;

/// Session state machine
pub mod controller;

/// HTTP provisioning bootstrap
pub mod provisioning;

/// Persistent configuration and timing constants
pub mod config;

/// Keyboard input dispatcher
pub mod input;

/// Transcript and status output
pub mod display;

/// Top-level application wiring
pub mod app;

#[cfg(test)]
pub mod tests;

// Re-export main types for convenience
pub use app::VoiceAssistantApp;
pub use config::{AppConfig, ConfigManager};
pub use controller::{ControllerEvent, InputEvent, SessionController, SessionPhase};
pub use pipeline::{AudioPipeline, Pipeline};
pub use protocol::{AudioParams, ControlMessage};
pub use session::{Session, SharedSession};
pub use signaling::{ControlPublisher, SignalingChannel};
