//! MQTT control channel.
//!
//! Wraps the synchronous rumqttc client: connects over TLS, subscribes
//! to the device inbound topic once the broker acknowledges the
//! connection, and feeds parsed control messages into the controller's
//! event queue in arrival order. On a lost connection the worker waits a
//! fixed interval and lets the client retry; repeated failures are
//! logged and swallowed, never escalated.
//!
//! The broker certificate is NOT validated, mirroring the deployed
//! protocol. Interoperability requirement, not an endorsement.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{error, info, warn};
use rumqttc::{Client, Event, Incoming, MqttOptions, QoS, TlsConfiguration, Transport};
use serde::Deserialize;

use crate::config::RECONNECT_INTERVAL;
use crate::controller::ControllerEvent;
use crate::protocol::ControlMessage;

/// TLS port used by the provisioned broker endpoint
const MQTT_TLS_PORT: u16 = 8883;

const KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Broker credentials handed out by the provisioning endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct MqttCredentials {
    pub endpoint: String,
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub publish_topic: String,
    pub subscribe_topic: String,
}

/// Outbound control-message publishing, injectable for tests.
pub trait ControlPublisher: Send + Sync {
    fn publish(&self, message: &ControlMessage) -> Result<()>;
    fn is_connected(&self) -> bool;
}

pub struct SignalingChannel {
    client: Client,
    publish_topic: String,
    connected: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SignalingChannel {
    /// Connect to the broker and start delivering inbound control
    /// messages to `events`.
    pub fn connect(credentials: &MqttCredentials, events: Sender<ControllerEvent>) -> Result<Self> {
        let mut options = MqttOptions::new(&credentials.client_id, &credentials.endpoint, MQTT_TLS_PORT);
        options.set_credentials(&credentials.username, &credentials.password);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_transport(Transport::Tls(TlsConfiguration::Rustls(Arc::new(
            insecure_tls_config(),
        ))));

        let (client, mut connection) = Client::new(options, 64);
        let connected = Arc::new(AtomicBool::new(false));
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker = {
            let client = client.clone();
            let connected = connected.clone();
            let shutdown = shutdown.clone();
            let subscribe_topic = credentials.subscribe_topic.clone();
            thread::Builder::new()
                .name("signaling".to_string())
                .spawn(move || {
                    for notification in connection.iter() {
                        if shutdown.load(Ordering::Relaxed) {
                            break;
                        }
                        match notification {
                            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                                info!("signaling connected, subscribing to {}", subscribe_topic);
                                if let Err(e) = client.subscribe(&subscribe_topic, QoS::AtMostOnce) {
                                    error!("failed to subscribe to inbound topic: {}", e);
                                }
                                connected.store(true, Ordering::Relaxed);
                            }
                            Ok(Event::Incoming(Incoming::Publish(publish))) => {
                                match ControlMessage::parse(&publish.payload) {
                                    Ok(message) => {
                                        if events.send(ControllerEvent::Control(message)).is_err() {
                                            break;
                                        }
                                    }
                                    Err(e) => warn!("ignoring control message: {}", e),
                                }
                            }
                            Ok(Event::Incoming(Incoming::Disconnect)) => {
                                warn!("signaling disconnected by broker");
                                connected.store(false, Ordering::Relaxed);
                            }
                            Ok(_) => {}
                            Err(e) => {
                                connected.store(false, Ordering::Relaxed);
                                if shutdown.load(Ordering::Relaxed) {
                                    break;
                                }
                                warn!(
                                    "signaling connection error: {}; retrying in {:?}",
                                    e, RECONNECT_INTERVAL
                                );
                                thread::sleep(RECONNECT_INTERVAL);
                            }
                        }
                    }
                    connected.store(false, Ordering::Relaxed);
                    info!("signaling worker stopped");
                })
                .context("failed to spawn signaling worker")?
        };

        Ok(Self {
            client,
            publish_topic: credentials.publish_topic.clone(),
            connected,
            shutdown,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn disconnect(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Err(e) = self.client.disconnect() {
            warn!("signaling disconnect failed: {}", e);
        }
        let worker = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(worker) = worker {
            let _ = worker.join();
        }
    }
}

impl ControlPublisher for SignalingChannel {
    fn publish(&self, message: &ControlMessage) -> Result<()> {
        let payload = message.to_json()?;
        self.client
            .publish(&self.publish_topic, QoS::AtMostOnce, false, payload)
            .context("failed to publish control message")
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

impl Drop for SignalingChannel {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// rustls client config that accepts any broker certificate.
fn insecure_tls_config() -> rustls::ClientConfig {
    rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
        .with_no_client_auth()
}

#[derive(Debug)]
struct AcceptAnyServerCert;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
