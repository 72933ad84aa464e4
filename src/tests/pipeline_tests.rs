#[cfg(test)]
mod pipeline_tests {
    use std::net::UdpSocket;
    use std::sync::{Arc, Mutex};
    use std::sync::mpsc;
    use std::thread;
    use std::time::{Duration, Instant};

    use anyhow::{Result, anyhow};

    use crate::audio::{AudioDeviceFactory, AudioSink, AudioSource};
    use crate::codec::{AudioDecoder, AudioEncoder, CodecFactory};
    use crate::crypto::{decrypt_packet, encrypt_frame};
    use crate::pipeline::{AudioPipeline, Pipeline};
    use crate::protocol::{AudioParams, HelloMessage, UdpEndpoint};
    use crate::session::{Session, SharedSession};

    /// Source producing a fixed ramp pattern at a gentle pace.
    struct FakeSource;

    impl AudioSource for FakeSource {
        fn read(&mut self, samples: usize) -> Result<Vec<i16>> {
            thread::sleep(Duration::from_millis(10));
            Ok((0..samples).map(|i| (i % 100) as i16).collect())
        }
    }

    /// Sink recording every written frame.
    struct FakeSink {
        frames: Arc<Mutex<Vec<Vec<i16>>>>,
    }

    impl AudioSink for FakeSink {
        fn write(&mut self, pcm: &[i16]) -> Result<()> {
            self.frames.lock().unwrap().push(pcm.to_vec());
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeDeviceFactory {
        sink_frames: Arc<Mutex<Vec<Vec<i16>>>>,
        fail_source: bool,
    }

    impl AudioDeviceFactory for FakeDeviceFactory {
        fn open_source(&self, _params: &AudioParams) -> Result<Box<dyn AudioSource>> {
            if self.fail_source {
                return Err(anyhow!("capture device missing"));
            }
            Ok(Box::new(FakeSource))
        }

        fn open_sink(&self, _params: &AudioParams) -> Result<Box<dyn AudioSink>> {
            Ok(Box::new(FakeSink {
                frames: self.sink_frames.clone(),
            }))
        }
    }

    /// Pass-through codec: i16 samples as little-endian byte pairs.
    struct PcmPassthrough;

    struct PcmEncoder;
    struct PcmDecoder;

    impl AudioEncoder for PcmEncoder {
        fn encode(&mut self, pcm: &[i16]) -> Result<Vec<u8>> {
            Ok(pcm.iter().flat_map(|s| s.to_le_bytes()).collect())
        }
    }

    impl AudioDecoder for PcmDecoder {
        fn decode(&mut self, packet: &[u8]) -> Result<Vec<i16>> {
            if packet.len() % 2 != 0 {
                return Err(anyhow!("odd payload length"));
            }
            Ok(packet
                .chunks_exact(2)
                .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
                .collect())
        }
    }

    impl CodecFactory for PcmPassthrough {
        fn encoder(&self, _params: &AudioParams) -> Result<Box<dyn AudioEncoder>> {
            Ok(Box::new(PcmEncoder))
        }

        fn decoder(&self, _params: &AudioParams) -> Result<Box<dyn AudioDecoder>> {
            Ok(Box::new(PcmDecoder))
        }
    }

    const ZERO_HEX: &str = "00000000000000000000000000000000";

    fn establish_session(shared: &SharedSession, port: u16) {
        let hello = HelloMessage {
            version: 3,
            transport: "udp".to_string(),
            audio_params: Some(AudioParams {
                sample_rate: 24000,
                ..AudioParams::default()
            }),
            session_id: Some("pipe-1".to_string()),
            udp: Some(UdpEndpoint {
                server: "127.0.0.1".to_string(),
                port,
                encryption: Some("aes-128-ctr".to_string()),
                key: ZERO_HEX.to_string(),
                nonce: ZERO_HEX.to_string(),
            }),
        };
        shared.establish(Session::from_hello(&hello, &AudioParams::default()).unwrap());
    }

    fn test_server() -> UdpSocket {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        server.set_read_timeout(Some(Duration::from_secs(3))).unwrap();
        server
    }

    fn build_pipeline(
        session: SharedSession,
        factory: FakeDeviceFactory,
    ) -> (AudioPipeline, mpsc::Receiver<crate::controller::ControllerEvent>) {
        let (events_tx, events_rx) = mpsc::channel();
        let pipeline = AudioPipeline::new(
            session,
            AudioParams::default(),
            Arc::new(factory),
            Arc::new(PcmPassthrough),
            events_tx,
        );
        (pipeline, events_rx)
    }

    #[test]
    fn test_capture_emits_sequenced_encrypted_frames() {
        let server = test_server();
        let port = server.local_addr().unwrap().port();
        let session = SharedSession::new();
        establish_session(&session, port);

        let (mut pipeline, _events) = build_pipeline(session.clone(), FakeDeviceFactory::default());
        pipeline.start().unwrap();
        assert!(pipeline.is_running());

        let mut buf = [0u8; 4096];
        let key = [0u8; 16];

        let len = server.recv(&mut buf).unwrap();
        let packet = &buf[..len];
        // Sequence 1 in the nonce tail, payload length in bytes 2..4
        assert_eq!(&packet[12..16], &[0, 0, 0, 1]);
        let payload_len = u16::from_be_bytes([packet[2], packet[3]]) as usize;
        assert_eq!(payload_len, len - 16);

        // 960 samples of the ramp pattern, 2 bytes each
        let plaintext = decrypt_packet(&key, packet).unwrap();
        assert_eq!(plaintext.len(), 1920);
        assert_eq!(&plaintext[..4], &[0, 0, 1, 0]);

        let len = server.recv(&mut buf).unwrap();
        assert_eq!(&buf[..len][12..16], &[0, 0, 0, 2]);

        pipeline.stop();
        assert!(!pipeline.is_running());
    }

    #[test]
    fn test_paused_session_emits_no_frames() {
        let server = test_server();
        server.set_read_timeout(Some(Duration::from_millis(700))).unwrap();
        let port = server.local_addr().unwrap().port();
        let session = SharedSession::new();
        establish_session(&session, port);
        session.set_paused(true);

        let (mut pipeline, _events) = build_pipeline(session.clone(), FakeDeviceFactory::default());
        pipeline.start().unwrap();

        let mut buf = [0u8; 4096];
        assert!(server.recv(&mut buf).is_err(), "paused capture must stay silent");

        session.set_paused(false);
        server.set_read_timeout(Some(Duration::from_secs(3))).unwrap();
        assert!(server.recv(&mut buf).is_ok(), "unpausing resumes capture");

        pipeline.stop();
    }

    #[test]
    fn test_playback_decrypts_and_writes_to_sink() {
        let server = test_server();
        let port = server.local_addr().unwrap().port();
        let session = SharedSession::new();
        establish_session(&session, port);

        let factory = FakeDeviceFactory::default();
        let sink_frames = factory.sink_frames.clone();
        let (mut pipeline, _events) = build_pipeline(session.clone(), factory);
        pipeline.start().unwrap();

        // Learn the client address from its first capture datagram, then
        // answer with an encrypted frame of our own.
        let mut buf = [0u8; 4096];
        let (_, client) = server.recv_from(&mut buf).unwrap();

        let key = [0u8; 16];
        let base = [0u8; 16];
        let pcm: Vec<i16> = vec![11, -22, 33, -44];
        let payload: Vec<u8> = pcm.iter().flat_map(|s| s.to_le_bytes()).collect();
        let (nonce, ciphertext) = encrypt_frame(&key, &base, 7, &payload);
        let mut packet = nonce.to_vec();
        packet.extend_from_slice(&ciphertext);
        server.send_to(&packet, client).unwrap();

        // First sink write is the silence prefill; ours follows.
        let deadline = Instant::now() + Duration::from_secs(3);
        loop {
            if sink_frames.lock().unwrap().iter().any(|frame| frame == &pcm) {
                break;
            }
            assert!(Instant::now() < deadline, "decoded frame never reached the sink");
            thread::sleep(Duration::from_millis(20));
        }
        let frames = sink_frames.lock().unwrap();
        assert!(frames[0].iter().all(|&s| s == 0), "prefill frame should be silence");
        drop(frames);

        pipeline.stop();
    }

    #[test]
    fn test_start_requires_active_session() {
        let session = SharedSession::new();
        let (mut pipeline, _events) = build_pipeline(session, FakeDeviceFactory::default());
        assert!(pipeline.start().is_err());
        assert!(!pipeline.is_running());
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let server = test_server();
        let port = server.local_addr().unwrap().port();
        let session = SharedSession::new();
        establish_session(&session, port);

        let (mut pipeline, _events) = build_pipeline(session, FakeDeviceFactory::default());
        pipeline.start().unwrap();
        assert!(pipeline.start().is_err());
        pipeline.stop();
    }

    #[test]
    fn test_capture_device_failure_fails_start() {
        let server = test_server();
        let port = server.local_addr().unwrap().port();
        let session = SharedSession::new();
        establish_session(&session, port);

        let factory = FakeDeviceFactory {
            fail_source: true,
            ..FakeDeviceFactory::default()
        };
        let (mut pipeline, _events) = build_pipeline(session, factory);
        assert!(pipeline.start().is_err());
        assert!(!pipeline.is_running());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let session = SharedSession::new();
        let (mut pipeline, _events) = build_pipeline(session, FakeDeviceFactory::default());
        pipeline.stop();
        pipeline.stop();
        assert!(!pipeline.is_running());
    }
}
