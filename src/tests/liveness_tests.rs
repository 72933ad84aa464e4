#[cfg(test)]
mod liveness_tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    use anyhow::Result;

    use crate::controller::ControllerEvent;
    use crate::liveness::{HeartbeatTimer, LivenessMonitor};
    use crate::protocol::{AudioParams, ControlMessage, HelloMessage, UdpEndpoint};
    use crate::session::{Session, SharedSession};
    use crate::signaling::ControlPublisher;

    #[derive(Default)]
    struct CountingPublisher {
        heartbeats: AtomicUsize,
        connected: AtomicBool,
    }

    impl ControlPublisher for CountingPublisher {
        fn publish(&self, message: &ControlMessage) -> Result<()> {
            if matches!(message, ControlMessage::Heartbeat) {
                self.heartbeats.fetch_add(1, Ordering::Relaxed);
            }
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::Relaxed)
        }
    }

    fn active_session(id: &str) -> Session {
        let hello = HelloMessage {
            version: 3,
            transport: "udp".to_string(),
            audio_params: None,
            session_id: Some(id.to_string()),
            udp: Some(UdpEndpoint {
                server: "127.0.0.1".to_string(),
                port: 8884,
                encryption: None,
                key: "00000000000000000000000000000000".to_string(),
                nonce: "00000000000000000000000000000000".to_string(),
            }),
        };
        Session::from_hello(&hello, &AudioParams::default()).unwrap()
    }

    #[test]
    fn test_heartbeat_cadence_over_a_simulated_minute() {
        let t0 = Instant::now();
        let mut timer = HeartbeatTimer::new(t0);

        // One tick per simulated second for 65 seconds; the 30 s interval
        // fires exactly twice, at t+31 and t+62.
        let mut fired = Vec::new();
        for second in 1..=65u64 {
            if timer.due(t0 + Duration::from_secs(second), true) {
                fired.push(second);
            }
        }
        assert_eq!(fired, vec![31, 62]);
    }

    #[test]
    fn test_no_heartbeat_while_disconnected() {
        let t0 = Instant::now();
        let mut timer = HeartbeatTimer::new(t0);

        for second in 1..=65u64 {
            assert!(!timer.due(t0 + Duration::from_secs(second), false));
        }
        // Reconnecting past the interval fires immediately on the next tick
        assert!(timer.due(t0 + Duration::from_secs(66), true));
    }

    #[test]
    fn test_custom_interval() {
        let t0 = Instant::now();
        let mut timer = HeartbeatTimer::with_interval(t0, Duration::from_secs(2));
        assert!(!timer.due(t0 + Duration::from_secs(1), true));
        assert!(timer.due(t0 + Duration::from_secs(3), true));
        // The timer resets to the firing instant, not to its schedule
        assert!(!timer.due(t0 + Duration::from_secs(4), true));
        assert!(timer.due(t0 + Duration::from_secs(6), true));
    }

    #[test]
    fn test_monitor_synthesizes_goodbye_after_grace() {
        let session = SharedSession::new();
        session.establish(active_session("idle-1"));
        // Listening stopped well past the grace period
        let stopped_at = Instant::now()
            .checked_sub(Duration::from_secs(10))
            .unwrap_or_else(Instant::now);
        session.mark_listen_stopped(stopped_at);

        let publisher = Arc::new(CountingPublisher::default());
        let (events_tx, events_rx) = mpsc::channel();
        let mut monitor = LivenessMonitor::spawn(session, publisher, events_tx);

        let event = events_rx
            .recv_timeout(Duration::from_secs(3))
            .expect("monitor should close the idle session");
        monitor.stop();

        let ControllerEvent::Control(ControlMessage::Goodbye { session_id }) = event else {
            panic!("expected a synthesized goodbye, got {:?}", event);
        };
        assert_eq!(session_id, "idle-1");
    }

    #[test]
    fn test_monitor_leaves_fresh_stop_alone() {
        let session = SharedSession::new();
        session.establish(active_session("fresh-1"));
        session.mark_listen_stopped(Instant::now());

        let publisher = Arc::new(CountingPublisher::default());
        let (events_tx, events_rx) = mpsc::channel();
        let mut monitor = LivenessMonitor::spawn(session.clone(), publisher, events_tx);

        // Within the grace period nothing should arrive
        assert!(events_rx.recv_timeout(Duration::from_millis(1500)).is_err());
        monitor.stop();
        assert!(session.is_active());
    }

    #[test]
    fn test_monitor_stop_joins_cleanly() {
        let session = SharedSession::new();
        let publisher = Arc::new(CountingPublisher::default());
        let (events_tx, _events_rx) = mpsc::channel();
        let mut monitor = LivenessMonitor::spawn(session, publisher, events_tx);
        monitor.stop();
        // Second stop is a no-op
        monitor.stop();
    }
}
