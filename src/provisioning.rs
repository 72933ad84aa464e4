//! Device provisioning over HTTP.
//!
//! Posts a device report to the OTA endpoint and extracts the MQTT
//! credential set from the response. This runs once at startup; failure
//! is retried on a fixed interval until it succeeds, since nothing else
//! can proceed without signaling credentials.

use std::fs;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::RECONNECT_INTERVAL;
use crate::signaling::MqttCredentials;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Used when no network interface exposes a usable address
const FALLBACK_DEVICE_ID: &str = "50:cf:14:5a:9f:17";

/// Device identifier: the MAC address of the first non-loopback
/// interface, or a fixed fallback.
pub fn device_id() -> String {
    if let Ok(entries) = fs::read_dir("/sys/class/net") {
        for entry in entries.flatten() {
            if entry.file_name() == "lo" {
                continue;
            }
            let address_path = entry.path().join("address");
            if let Ok(mac) = fs::read_to_string(&address_path) {
                let mac = mac.trim();
                if !mac.is_empty() && mac != "00:00:00:00:00:00" {
                    return mac.to_string();
                }
            }
        }
    }
    FALLBACK_DEVICE_ID.to_string()
}

#[derive(Debug, Serialize)]
struct HardwareReport {
    flash_size: u64,
    minimum_free_heap_size: u64,
}

impl HardwareReport {
    fn collect() -> Self {
        Self {
            flash_size: root_fs_size().unwrap_or(16 * 1024 * 1024),
            minimum_free_heap_size: available_memory().unwrap_or(8 * 1024 * 1024),
        }
    }
}

fn root_fs_size() -> Option<u64> {
    let path = std::ffi::CString::new("/").ok()?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(path.as_ptr(), &mut stat) };
    if rc != 0 {
        return None;
    }
    Some(stat.f_blocks as u64 * stat.f_frsize as u64)
}

/// 80% of MemAvailable, mirroring the device firmware's heap report
fn available_memory() -> Option<u64> {
    let meminfo = fs::read_to_string("/proc/meminfo").ok()?;
    for line in meminfo.lines() {
        if let Some(rest) = line.strip_prefix("MemAvailable:") {
            let kb: u64 = rest.trim().trim_end_matches(" kB").trim().parse().ok()?;
            return Some(kb * 1024 * 8 / 10);
        }
    }
    None
}

#[derive(Debug, Deserialize)]
struct ProvisioningResponse {
    mqtt: MqttCredentials,
}

pub struct ProvisioningClient {
    url: String,
    device_id: String,
    client: reqwest::blocking::Client,
}

impl ProvisioningClient {
    pub fn new(url: &str, device_id: &str) -> Result<Self> {
        // The provisioning endpoint ships a self-signed certificate;
        // validation is out of scope for this client.
        let client = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .danger_accept_invalid_certs(true)
            .build()
            .context("failed to build provisioning HTTP client")?;
        Ok(Self {
            url: url.to_string(),
            device_id: device_id.to_string(),
            client,
        })
    }

    /// One provisioning attempt.
    pub fn fetch(&self) -> Result<MqttCredentials> {
        let hardware = HardwareReport::collect();
        let body = json!({
            "flash_size": hardware.flash_size,
            "minimum_free_heap_size": hardware.minimum_free_heap_size,
            "mac_address": self.device_id,
            "chip_model_name": "generic-linux",
            "chip_info": { "model": "linux", "cores": 1, "revision": 1, "features": 0 },
            "application": {
                "name": "vocalink",
                "version": env!("CARGO_PKG_VERSION"),
            },
            "partition_table": [],
            "ota": { "label": "factory" },
            "board": { "type": "linux-host" },
        });

        let response = self
            .client
            .post(&self.url)
            .header("Device-Id", &self.device_id)
            .json(&body)
            .send()
            .context("provisioning request failed")?
            .error_for_status()
            .context("provisioning request rejected")?;

        let parsed: ProvisioningResponse = response.json().context("malformed provisioning response")?;
        info!("provisioned against broker {}", parsed.mqtt.endpoint);
        Ok(parsed.mqtt)
    }

    /// Retry on a fixed interval until provisioning succeeds. Startup
    /// cannot proceed without credentials, so the retry is unbounded.
    pub fn fetch_with_retry(&self) -> MqttCredentials {
        loop {
            match self.fetch() {
                Ok(credentials) => return credentials,
                Err(e) => {
                    warn!("provisioning failed: {:#}; retrying in {:?}", e, RECONNECT_INTERVAL);
                    thread::sleep(RECONNECT_INTERVAL);
                }
            }
        }
    }
}
