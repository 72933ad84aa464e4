//! Negotiated audio-session state, shared across the capture loop, the
//! playback loop, the signaling handler and the liveness monitor.
//!
//! All mutation goes through [`SharedSession`], a mutex-guarded handle.
//! Only the controller mutates identity and transport parameters; only
//! the capture loop advances the sequence counter.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};

use crate::crypto::{self, KEY_LEN, NONCE_LEN};
use crate::protocol::{AudioParams, HelloMessage};

/// The negotiated audio context for one active session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Server-assigned identifier, non-empty while the session is active
    pub id: String,
    /// Session-scoped AES-128 key
    pub key: [u8; KEY_LEN],
    /// 16-byte nonce base, fixed at session start
    pub nonce_base: [u8; NONCE_LEN],
    /// Datagram server endpoint
    pub server: String,
    pub port: u16,
    /// Server-announced playback codec parameters
    pub audio_params: AudioParams,
    /// Frame counter; pre-incremented, so the first frame goes out as 1.
    /// Wraps on overflow, matching the 32-bit field in the wire nonce.
    pub sequence: u32,
}

impl Session {
    /// Build a session from an inbound hello acknowledgement.
    pub fn from_hello(hello: &HelloMessage, fallback_params: &AudioParams) -> Result<Self> {
        let id = hello
            .session_id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| anyhow!("hello acknowledgement carries no session id"))?;
        let udp = hello
            .udp
            .as_ref()
            .ok_or_else(|| anyhow!("hello acknowledgement carries no udp endpoint"))?;
        let params = hello.audio_params.clone().unwrap_or_else(|| fallback_params.clone());
        params.validate()?;
        Ok(Self {
            id,
            key: crypto::decode_hex16(&udp.key)?,
            nonce_base: crypto::decode_hex16(&udp.nonce)?,
            server: udp.server.clone(),
            port: udp.port,
            audio_params: params,
            sequence: 0,
        })
    }

    /// Advance and return the next frame sequence number.
    pub fn next_sequence(&mut self) -> u32 {
        self.sequence = self.sequence.wrapping_add(1);
        self.sequence
    }
}

/// Mutable session context behind the shared lock.
#[derive(Debug, Default)]
pub struct SessionState {
    pub session: Option<Session>,
    /// Listening explicitly stopped by the user; the capture loop idles
    /// without consuming device input until resumed.
    pub paused: bool,
    /// Set when the user stops listening; the liveness monitor closes
    /// the session after the grace period elapses with no activity.
    pub listen_stopped_at: Option<Instant>,
}

/// Cloneable handle to the one shared session context.
#[derive(Clone, Default)]
pub struct SharedSession {
    inner: Arc<Mutex<SessionState>>,
}

impl SharedSession {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        // A poisoned lock means a loop panicked mid-update; the session
        // fields are plain data, so continue with whatever is there.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Install a freshly negotiated session, replacing any previous one.
    pub fn establish(&self, session: Session) {
        let mut state = self.lock();
        state.session = Some(session);
        state.paused = false;
        state.listen_stopped_at = None;
    }

    /// Clear all session fields; the context is inactive afterwards.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.session = None;
        state.paused = false;
        state.listen_stopped_at = None;
    }

    pub fn is_active(&self) -> bool {
        self.lock().session.is_some()
    }

    pub fn current_id(&self) -> Option<String> {
        self.lock().session.as_ref().map(|s| s.id.clone())
    }

    /// Snapshot of the session for pipeline startup.
    pub fn snapshot(&self) -> Option<Session> {
        self.lock().session.clone()
    }

    /// Update endpoint and key material from a renegotiation hello,
    /// keeping identity and sequence intact.
    pub fn update_transport(&self, hello: &HelloMessage) -> Result<()> {
        let mut state = self.lock();
        let session = state
            .session
            .as_mut()
            .ok_or_else(|| anyhow!("no active session to update"))?;
        if let Some(udp) = hello.udp.as_ref() {
            session.key = crypto::decode_hex16(&udp.key)?;
            session.nonce_base = crypto::decode_hex16(&udp.nonce)?;
            session.server = udp.server.clone();
            session.port = udp.port;
        }
        if let Some(params) = hello.audio_params.as_ref() {
            params.validate()?;
            session.audio_params = params.clone();
        }
        Ok(())
    }

    /// Advance the sequence counter; `None` when no session is active.
    pub fn next_sequence(&self) -> Option<u32> {
        self.lock().session.as_mut().map(|s| s.next_sequence())
    }

    pub fn sequence(&self) -> Option<u32> {
        self.lock().session.as_ref().map(|s| s.sequence)
    }

    pub fn set_paused(&self, paused: bool) {
        self.lock().paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    pub fn mark_listen_stopped(&self, now: Instant) {
        self.lock().listen_stopped_at = Some(now);
    }

    pub fn clear_listen_stopped(&self) {
        self.lock().listen_stopped_at = None;
    }

    /// If the inactivity grace period has elapsed since the user stopped
    /// listening, clear the timestamp and return the session id to close.
    pub fn take_expired_stop(&self, now: Instant, grace: Duration) -> Option<String> {
        let mut state = self.lock();
        let stopped_at = state.listen_stopped_at?;
        if now.saturating_duration_since(stopped_at) <= grace {
            return None;
        }
        state.listen_stopped_at = None;
        state.session.as_ref().map(|s| s.id.clone())
    }
}
