//! Session state machine.
//!
//! All inputs converge on one event queue consumed here, in arrival
//! order: keyboard events from the input dispatcher, control messages
//! from the signaling worker, synthesized goodbyes from the liveness
//! monitor and send-failure notices from the capture loop. The
//! controller is the only writer of session identity and transport
//! parameters.
//!
//! States are `Idle` (no session) and `Active` (session negotiated,
//! pipeline owned). A record-start in `Idle` publishes a hello and arms
//! an acknowledgement deadline; the hello-ack populates the session and
//! starts the pipeline. Goodbye (server-sent or synthesized) tears the
//! session down. A hello while active renegotiates transport parameters
//! and restarts the pipeline in place.

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use anyhow::Result;
use log::{debug, error, info, warn};

use crate::config::HELLO_ACK_TIMEOUT;
use crate::display::TranscriptDisplay;
use crate::pipeline::Pipeline;
use crate::protocol::{AudioParams, ControlMessage, HelloMessage, ListenState, TtsState};
use crate::session::{SharedSession, Session};
use crate::signaling::ControlPublisher;
use std::sync::Arc;

/// External input events from the device input dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    RecordStart,
    RecordStop,
    Quit,
}

/// Everything the controller reacts to, in arrival order.
#[derive(Debug)]
pub enum ControllerEvent {
    Input(InputEvent),
    Control(ControlMessage),
    /// Capture loop hit an unreachable destination; restart the pipeline.
    SendFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Active,
}

/// How long to block on the queue before re-checking deadlines
const POLL: Duration = Duration::from_millis(250);

pub struct SessionController {
    session: SharedSession,
    publisher: Arc<dyn ControlPublisher>,
    pipeline: Box<dyn Pipeline>,
    display: Box<dyn TranscriptDisplay>,
    capture_params: AudioParams,
    /// Deadline for the pending hello acknowledgement, armed by a
    /// record-start in `Idle`.
    pending_hello: Option<Instant>,
}

impl SessionController {
    pub fn new(
        session: SharedSession,
        publisher: Arc<dyn ControlPublisher>,
        pipeline: Box<dyn Pipeline>,
        display: Box<dyn TranscriptDisplay>,
        capture_params: AudioParams,
    ) -> Self {
        Self {
            session,
            publisher,
            pipeline,
            display,
            capture_params,
            pending_hello: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        if self.session.is_active() {
            SessionPhase::Active
        } else {
            SessionPhase::Idle
        }
    }

    /// Consume events until a quit arrives or the queue closes.
    pub fn run(&mut self, events: Receiver<ControllerEvent>) {
        loop {
            match events.recv_timeout(POLL) {
                Ok(event) => {
                    self.expire_pending_hello();
                    if !self.handle_event(event) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => self.expire_pending_hello(),
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.shutdown();
    }

    /// Process one event; returns false when the controller should exit.
    pub fn handle_event(&mut self, event: ControllerEvent) -> bool {
        match event {
            ControllerEvent::Input(InputEvent::RecordStart) => self.on_record_start(),
            ControllerEvent::Input(InputEvent::RecordStop) => self.on_record_stop(),
            ControllerEvent::Input(InputEvent::Quit) => return false,
            ControllerEvent::Control(message) => self.on_control(message),
            ControllerEvent::SendFailed => self.on_send_failed(),
        }
        true
    }

    fn on_record_start(&mut self) {
        if self.session.is_active() {
            // Session already negotiated; just resume listening.
            self.publish_listen(ListenState::Start);
            self.session.set_paused(false);
            self.session.clear_listen_stopped();
            self.display.status("listening");
            return;
        }
        info!("no active session, publishing hello");
        self.display.status("connecting");
        let hello = ControlMessage::Hello(HelloMessage::outbound(self.capture_params.clone()));
        if let Err(e) = self.publisher.publish(&hello) {
            error!("hello publish failed: {}", e);
            self.display.status("connection failed, try again");
            return;
        }
        self.pending_hello = Some(Instant::now() + HELLO_ACK_TIMEOUT);
    }

    fn on_record_stop(&mut self) {
        if !self.session.is_active() {
            self.pending_hello = None;
            return;
        }
        // The pipeline keeps running so the reply can arrive; the
        // liveness monitor closes the session if nothing else happens.
        self.publish_listen(ListenState::Stop);
        self.session.set_paused(true);
        self.session.mark_listen_stopped(Instant::now());
        self.display.status("waiting for reply");
    }

    fn on_control(&mut self, message: ControlMessage) {
        match message {
            ControlMessage::Hello(hello) => self.on_hello(hello),
            ControlMessage::Goodbye { session_id } => self.on_goodbye(&session_id),
            ControlMessage::Tts { state, text, .. } => self.on_tts(state, text),
            ControlMessage::Stt { text, .. } => self.display.user_text(&text),
            ControlMessage::Llm { text, .. } => self.display.assistant_text(&text),
            other => debug!("ignoring control message: {:?}", other),
        }
    }

    fn on_hello(&mut self, hello: HelloMessage) {
        if self.session.is_active() {
            // Renegotiation: adopt the new transport parameters and
            // rebuild the pipeline on them.
            info!("hello while active, updating transport parameters");
            if let Err(e) = self.session.update_transport(&hello) {
                warn!("ignoring transport update: {}", e);
                return;
            }
            if self.pipeline.is_running() {
                if let Err(e) = self.pipeline.restart() {
                    error!("pipeline restart after renegotiation failed: {}", e);
                    self.teardown_session();
                }
            }
            return;
        }

        let awaited = self.pending_hello.take().is_some();
        let session = match Session::from_hello(&hello, &self.capture_params) {
            Ok(session) => session,
            Err(e) => {
                warn!("ignoring hello: {}", e);
                return;
            }
        };
        info!("session {} established", session.id);
        self.session.establish(session);

        if let Err(e) = self.pipeline.start() {
            // Device unavailable is fatal to the session attempt.
            error!("audio pipeline start failed: {}", e);
            self.display.status("audio device unavailable");
            self.teardown_session();
            return;
        }
        if awaited {
            self.publish_listen(ListenState::Start);
            self.display.status("listening");
        }
    }

    fn on_goodbye(&mut self, session_id: &str) {
        match self.session.current_id() {
            Some(current) if current == session_id => {
                info!("session {} closed", session_id);
                self.teardown_session();
                self.display.status("session ended");
            }
            Some(current) => {
                debug!("ignoring goodbye for stale session {} (current {})", session_id, current);
            }
            None => debug!("ignoring goodbye for unknown session {}", session_id),
        }
    }

    fn on_tts(&mut self, state: TtsState, text: Option<String>) {
        match state {
            TtsState::Start => self.display.status("playing"),
            TtsState::SentenceStart => {
                if let Some(text) = text {
                    self.display.assistant_text(&text);
                }
            }
            TtsState::Stop => self.display.status("playback finished"),
        }
    }

    fn on_send_failed(&mut self) {
        if !self.session.is_active() {
            return;
        }
        warn!("send failure reported, restarting audio pipeline");
        if let Err(e) = self.pipeline.restart() {
            error!("pipeline restart failed: {}", e);
            self.teardown_session();
        }
    }

    fn publish_listen(&mut self, state: ListenState) {
        let Some(id) = self.session.current_id() else {
            return;
        };
        if let Err(e) = self.publisher.publish(&ControlMessage::listen(&id, state)) {
            warn!("listen publish failed: {}", e);
        }
    }

    fn expire_pending_hello(&mut self) {
        if let Some(deadline) = self.pending_hello {
            if Instant::now() > deadline {
                self.pending_hello = None;
                warn!("no hello acknowledgement within {:?}", HELLO_ACK_TIMEOUT);
                self.display.status("connection failed, try again");
            }
        }
    }

    fn teardown_session(&mut self) {
        self.session.clear();
        self.pipeline.stop();
    }

    fn shutdown(&mut self) {
        info!("controller shutting down");
        if self.session.is_active() {
            self.teardown_session();
        } else {
            self.pipeline.stop();
        }
    }

    /// Publisher handle, shared with the liveness monitor.
    pub fn publisher(&self) -> Arc<dyn ControlPublisher> {
        self.publisher.clone()
    }
}
