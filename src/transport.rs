//! Encrypted datagram transport for audio frames.
//!
//! Wraps a connected UDP socket and performs the per-packet encryption
//! from [`crate::crypto`]. Receives use a bounded wait so the playback
//! loop can observe shutdown between polls.

use std::io::ErrorKind;
use std::net::UdpSocket;
use std::time::Duration;

use anyhow::{Context, Result};
use log::debug;

use crate::crypto::{self, KEY_LEN, NONCE_LEN};

/// Bounded wait on the receive path, so loops can notice shutdown
pub const RECV_POLL: Duration = Duration::from_secs(1);

/// Largest datagram we expect from the server (nonce + Opus payload)
pub const MAX_DATAGRAM: usize = 4096;

/// Outcome of one bounded receive poll
pub enum Received {
    /// Decrypted frame payload
    Frame(Vec<u8>),
    /// Poll window elapsed with no datagram
    Timeout,
}

/// Error classification for the send path. Destination-unreachable is
/// not retried in place; the owning pipeline tears down and rebuilds
/// both loops and the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    Unreachable,
    Other,
}

pub struct SecureTransport {
    socket: UdpSocket,
    key: [u8; KEY_LEN],
    nonce_base: [u8; NONCE_LEN],
}

impl SecureTransport {
    /// Open a fresh datagram socket connected to the session endpoint.
    pub fn connect(server: &str, port: u16, key: [u8; KEY_LEN], nonce_base: [u8; NONCE_LEN]) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").context("failed to bind datagram socket")?;
        socket
            .set_read_timeout(Some(RECV_POLL))
            .context("failed to set datagram read timeout")?;
        socket
            .connect((server, port))
            .with_context(|| format!("failed to connect datagram socket to {}:{}", server, port))?;
        Ok(Self { socket, key, nonce_base })
    }

    /// Encrypt one frame under the given sequence and transmit it.
    pub fn send_frame(&self, sequence: u32, payload: &[u8]) -> std::result::Result<(), SendError> {
        let (nonce, ciphertext) = crypto::encrypt_frame(&self.key, &self.nonce_base, sequence, payload);
        let mut packet = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        packet.extend_from_slice(&nonce);
        packet.extend_from_slice(&ciphertext);
        match self.socket.send(&packet) {
            Ok(_) => Ok(()),
            Err(e) if matches!(e.kind(), ErrorKind::NetworkUnreachable | ErrorKind::HostUnreachable) => {
                debug!("datagram destination unreachable: {}", e);
                Err(SendError::Unreachable)
            }
            Err(e) => {
                debug!("datagram send failed: {}", e);
                Err(SendError::Other)
            }
        }
    }

    /// Poll for one datagram and decrypt it. Returns `Received::Timeout`
    /// when the bounded wait elapses without data.
    pub fn recv_frame(&self, buf: &mut [u8]) -> Result<Received> {
        match self.socket.recv(buf) {
            Ok(len) => {
                let plaintext = crypto::decrypt_packet(&self.key, &buf[..len])?;
                Ok(Received::Frame(plaintext))
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(Received::Timeout),
            Err(e) => Err(e).context("datagram receive failed"),
        }
    }

    #[cfg(test)]
    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}
