//! Heartbeat publisher and inactivity watchdog.
//!
//! One ticker thread, two independent timers: a heartbeat is published
//! whenever the control channel is connected and the heartbeat interval
//! has elapsed, and a session left idle after the user stopped listening
//! is closed by synthesizing a goodbye through the controller's event
//! queue, exactly as if the server had sent one.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::config::{HEARTBEAT_INTERVAL, INACTIVITY_GRACE};
use crate::controller::ControllerEvent;
use crate::protocol::ControlMessage;
use crate::session::SharedSession;
use crate::signaling::ControlPublisher;

const TICK: Duration = Duration::from_secs(1);

/// Heartbeat schedule, kept separate from the ticker thread so the
/// cadence is testable with synthetic clocks.
pub struct HeartbeatTimer {
    last_sent: Instant,
    interval: Duration,
}

impl HeartbeatTimer {
    pub fn new(now: Instant) -> Self {
        Self {
            last_sent: now,
            interval: HEARTBEAT_INTERVAL,
        }
    }

    #[cfg(test)]
    pub fn with_interval(now: Instant, interval: Duration) -> Self {
        Self { last_sent: now, interval }
    }

    /// True when a heartbeat should go out now; resets the timer.
    pub fn due(&mut self, now: Instant, connected: bool) -> bool {
        if !connected {
            return false;
        }
        if now.saturating_duration_since(self.last_sent) > self.interval {
            self.last_sent = now;
            true
        } else {
            false
        }
    }
}

pub struct LivenessMonitor {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl LivenessMonitor {
    /// Start the ticker. Runs until [`LivenessMonitor::stop`].
    pub fn spawn(
        session: SharedSession,
        publisher: Arc<dyn ControlPublisher>,
        events: Sender<ControllerEvent>,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let handle = thread::spawn(move || {
                let mut heartbeat = HeartbeatTimer::new(Instant::now());
                info!("liveness monitor started");
                while !stop_flag.load(Ordering::Relaxed) {
                    let now = Instant::now();

                    if heartbeat.due(now, publisher.is_connected()) {
                        match publisher.publish(&ControlMessage::Heartbeat) {
                            Ok(()) => debug!("heartbeat published"),
                            Err(e) => warn!("heartbeat publish failed: {}", e),
                        }
                    }

                    if let Some(session_id) = session.take_expired_stop(now, INACTIVITY_GRACE) {
                        info!("session {} idle past grace period, closing", session_id);
                        let goodbye = ControlMessage::goodbye(&session_id);
                        if events.send(ControllerEvent::Control(goodbye)).is_err() {
                            break;
                        }
                    }

                    thread::sleep(TICK);
                }
            info!("liveness monitor stopped");
        });
        Self { stop, handle: Some(handle) }
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for LivenessMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
