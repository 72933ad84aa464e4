//! Application wiring: provisioning, signaling, session controller,
//! liveness monitor and keyboard dispatcher, plus orderly shutdown.

use std::sync::Arc;
use std::sync::mpsc;

use anyhow::Result;
use log::info;

use crate::audio::CpalDeviceFactory;
use crate::codec::OpusCodecFactory;
use crate::config::AppConfig;
use crate::controller::SessionController;
use crate::display::ConsoleDisplay;
use crate::input::InputDispatcher;
use crate::liveness::LivenessMonitor;
use crate::pipeline::AudioPipeline;
use crate::provisioning::{ProvisioningClient, device_id};
use crate::session::SharedSession;
use crate::signaling::{ControlPublisher, SignalingChannel};

pub struct VoiceAssistantApp {
    config: AppConfig,
}

impl VoiceAssistantApp {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    /// Run until the user quits. Blocks the calling thread.
    pub fn run(&self) -> Result<()> {
        let device_id = self
            .config
            .provisioning
            .device_id
            .clone()
            .unwrap_or_else(device_id);
        info!("device id: {}", device_id);
        println!("device id: {}", device_id);

        println!("fetching provisioning configuration...");
        let provisioner = ProvisioningClient::new(&self.config.provisioning.ota_url, &device_id)?;
        let credentials = provisioner.fetch_with_retry();

        let (events_tx, events_rx) = mpsc::channel();

        println!("connecting to signaling broker...");
        let signaling = Arc::new(SignalingChannel::connect(&credentials, events_tx.clone())?);
        let publisher: Arc<dyn ControlPublisher> = signaling.clone();

        let session = SharedSession::new();
        let capture_params = self.config.capture_params();
        capture_params.validate()?;

        let pipeline = AudioPipeline::new(
            session.clone(),
            capture_params.clone(),
            Arc::new(CpalDeviceFactory),
            Arc::new(OpusCodecFactory),
            events_tx.clone(),
        );

        let mut controller = SessionController::new(
            session.clone(),
            publisher.clone(),
            Box::new(pipeline),
            Box::new(ConsoleDisplay::new()),
            capture_params,
        );

        let mut liveness = LivenessMonitor::spawn(session, publisher, events_tx.clone());
        let mut input = InputDispatcher::spawn(events_tx)?;

        println!("ready. space: talk, q: quit");
        controller.run(events_rx);

        // Best-effort cleanup mirrored on every exit path: the
        // controller already stopped the pipeline and cleared the
        // session before returning.
        info!("shutting down");
        liveness.stop();
        signaling.disconnect();
        input.join();
        println!("goodbye");
        Ok(())
    }
}
