//! The two concurrent audio loops of an active session.
//!
//! Capture: device read → Opus encode → encrypt → datagram send, one
//! codec frame per iteration, single writer of the sequence counter.
//! Playback: bounded datagram poll → decrypt → Opus decode → device
//! write, in arrival order with no reordering buffer.
//!
//! `start`/`stop` are idempotent phases; `restart` is stop followed by
//! start and is driven by the controller after a send failure or a
//! mid-session transport renegotiation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use log::{debug, error, info, warn};

use crate::audio::{self, AudioDeviceFactory, AudioSink, AudioSource};
use crate::codec::{AudioDecoder, AudioEncoder, CodecFactory};
use crate::controller::ControllerEvent;
use crate::protocol::AudioParams;
use crate::session::{SharedSession, Session};
use crate::transport::{MAX_DATAGRAM, Received, SecureTransport, SendError};

/// Bounded wait when joining a loop thread on stop
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Receiver-first stagger between playback and capture startup, so the
/// first server reply is not lost
const RESTART_STAGGER: Duration = Duration::from_millis(100);

/// How long to wait for a loop thread to open its devices
const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Idle nap while listening is paused
const PAUSE_POLL: Duration = Duration::from_millis(100);

/// Start/stop/restart surface the controller drives. Injected as a
/// trait so the state machine is testable without devices or sockets.
pub trait Pipeline: Send {
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self);
    fn restart(&mut self) -> Result<()> {
        self.stop();
        self.start()
    }
    fn is_running(&self) -> bool;
}

pub struct AudioPipeline {
    session: SharedSession,
    /// Local capture parameters; playback follows the server-announced
    /// parameters in the session instead.
    capture_params: AudioParams,
    devices: Arc<dyn AudioDeviceFactory>,
    codecs: Arc<dyn CodecFactory>,
    events: Sender<ControllerEvent>,
    stop_flag: Arc<AtomicBool>,
    capture: Option<JoinHandle<()>>,
    playback: Option<JoinHandle<()>>,
}

impl AudioPipeline {
    pub fn new(
        session: SharedSession,
        capture_params: AudioParams,
        devices: Arc<dyn AudioDeviceFactory>,
        codecs: Arc<dyn CodecFactory>,
        events: Sender<ControllerEvent>,
    ) -> Self {
        Self {
            session,
            capture_params,
            devices,
            codecs,
            events,
            stop_flag: Arc::new(AtomicBool::new(true)),
            capture: None,
            playback: None,
        }
    }

    fn spawn_playback(&self, snapshot: &Session, transport: Arc<SecureTransport>) -> Result<JoinHandle<()>> {
        let flag = self.stop_flag.clone();
        let session = self.session.clone();
        let devices = self.devices.clone();
        let codecs = self.codecs.clone();
        let params = snapshot.audio_params.clone();

        // The sink and decoder are opened on the loop thread because the
        // device handles are not required to be Send; readiness (or the
        // open failure) is reported back over a one-shot channel.
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let handle = thread::Builder::new()
            .name("playback".to_string())
            .spawn(move || {
                let sink = devices.open_sink(&params);
                let decoder = codecs.decoder(&params);
                match (sink, decoder) {
                    (Ok(sink), Ok(decoder)) => {
                        let _ = ready_tx.send(Ok(()));
                        playback_loop(flag, session, sink, decoder, transport, params.frame_samples());
                    }
                    (Err(e), _) | (_, Err(e)) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| anyhow!("failed to spawn playback thread: {}", e))?;

        ready_rx
            .recv_timeout(STARTUP_TIMEOUT)
            .map_err(|_| anyhow!("playback startup timed out"))??;
        Ok(handle)
    }

    fn spawn_capture(&self, transport: Arc<SecureTransport>) -> Result<JoinHandle<()>> {
        let flag = self.stop_flag.clone();
        let session = self.session.clone();
        let devices = self.devices.clone();
        let codecs = self.codecs.clone();
        let events = self.events.clone();
        let params = self.capture_params.clone();

        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let handle = thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || {
                let source = devices.open_source(&params);
                let encoder = codecs.encoder(&params);
                match (source, encoder) {
                    (Ok(source), Ok(encoder)) => {
                        let _ = ready_tx.send(Ok(()));
                        capture_loop(flag, session, source, encoder, transport, events, params.frame_samples());
                    }
                    (Err(e), _) | (_, Err(e)) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| anyhow!("failed to spawn capture thread: {}", e))?;

        ready_rx
            .recv_timeout(STARTUP_TIMEOUT)
            .map_err(|_| anyhow!("capture startup timed out"))??;
        Ok(handle)
    }
}

impl Pipeline for AudioPipeline {
    fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(anyhow!("audio pipeline already running"));
        }
        let snapshot = self
            .session
            .snapshot()
            .ok_or_else(|| anyhow!("cannot start audio pipeline without an active session"))?;

        info!(
            "starting audio pipeline for session {} ({}:{})",
            snapshot.id, snapshot.server, snapshot.port
        );
        let transport = Arc::new(SecureTransport::connect(
            &snapshot.server,
            snapshot.port,
            snapshot.key,
            snapshot.nonce_base,
        )?);

        self.stop_flag = Arc::new(AtomicBool::new(false));

        // Receiver first, then the sender after a short stagger.
        let playback = self.spawn_playback(&snapshot, transport.clone())?;
        thread::sleep(RESTART_STAGGER);
        let capture = match self.spawn_capture(transport) {
            Ok(handle) => handle,
            Err(e) => {
                self.playback = Some(playback);
                self.stop();
                return Err(e);
            }
        };

        self.playback = Some(playback);
        self.capture = Some(capture);
        Ok(())
    }

    fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.capture.take() {
            join_bounded(handle, "capture");
        }
        if let Some(handle) = self.playback.take() {
            join_bounded(handle, "playback");
        }
        // The datagram socket is owned by the loop threads and closes
        // with the last Arc reference.
        info!("audio pipeline stopped");
    }

    fn is_running(&self) -> bool {
        (self.capture.is_some() || self.playback.is_some()) && !self.stop_flag.load(Ordering::Relaxed)
    }
}

impl Drop for AudioPipeline {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}

/// Join with a bounded wait; a loop that fails to observe the stop flag
/// in time is abandoned rather than blocking shutdown.
fn join_bounded(handle: JoinHandle<()>, name: &str) {
    let deadline = Instant::now() + JOIN_TIMEOUT;
    while !handle.is_finished() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    if handle.is_finished() {
        if handle.join().is_err() {
            error!("{} loop panicked", name);
        }
    } else {
        warn!("{} loop did not stop within {:?}; detaching", name, JOIN_TIMEOUT);
    }
}

fn capture_loop(
    flag: Arc<AtomicBool>,
    session: SharedSession,
    mut source: Box<dyn AudioSource>,
    mut encoder: Box<dyn AudioEncoder>,
    transport: Arc<SecureTransport>,
    events: Sender<ControllerEvent>,
    frame_samples: usize,
) {
    audio::set_realtime_priority();
    info!("capture loop started");

    while !flag.load(Ordering::Relaxed) {
        if !session.is_active() {
            break;
        }
        if session.is_paused() {
            thread::sleep(PAUSE_POLL);
            continue;
        }

        let pcm = match source.read(frame_samples) {
            Ok(pcm) => pcm,
            Err(e) => {
                error!("capture read failed: {}", e);
                break;
            }
        };
        let payload = match encoder.encode(&pcm) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("dropping frame, encode failed: {}", e);
                continue;
            }
        };
        let Some(sequence) = session.next_sequence() else {
            break;
        };
        match transport.send_frame(sequence, &payload) {
            Ok(()) => {}
            Err(SendError::Unreachable) => {
                warn!("server unreachable, requesting transport restart");
                let _ = events.send(ControllerEvent::SendFailed);
                break;
            }
            Err(SendError::Other) => {
                error!("datagram send failed, stopping capture");
                break;
            }
        }
    }

    info!("capture loop stopped");
}

fn playback_loop(
    flag: Arc<AtomicBool>,
    session: SharedSession,
    mut sink: Box<dyn AudioSink>,
    mut decoder: Box<dyn AudioDecoder>,
    transport: Arc<SecureTransport>,
    frame_samples: usize,
) {
    info!("playback loop started");

    // One silence frame up front masks device start-up latency.
    let silence = vec![0i16; frame_samples];
    if let Err(e) = sink.write(&silence) {
        error!("playback prefill failed: {}", e);
        return;
    }

    let mut buf = vec![0u8; MAX_DATAGRAM];
    while !flag.load(Ordering::Relaxed) {
        if !session.is_active() {
            break;
        }
        match transport.recv_frame(&mut buf) {
            Ok(Received::Timeout) => continue,
            Ok(Received::Frame(payload)) => match decoder.decode(&payload) {
                Ok(pcm) => {
                    if let Err(e) = sink.write(&pcm) {
                        error!("playback write failed: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    // Late or corrupt frame; drop it and keep the loop alive.
                    warn!("dropping undecodable frame: {}", e);
                }
            },
            Err(e) => {
                debug!("datagram receive error: {}", e);
                thread::sleep(Duration::from_millis(50));
            }
        }
    }

    info!("playback loop stopped");
}
