use anyhow::Result;
use clap::{Arg, Command};
use std::path::PathBuf;
use vocalink::config::ConfigManager;
use vocalink::VoiceAssistantApp;

fn main() -> Result<()> {
    env_logger::init();

    let matches = Command::new("vocalink")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Real-time voice assistant client (MQTT signaling + encrypted UDP audio)")
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .help("Path to the TOML configuration file"),
        )
        .arg(
            Arg::new("ota-url")
                .long("ota-url")
                .value_name("URL")
                .help("Override the provisioning endpoint"),
        )
        .arg(
            Arg::new("device-id")
                .long("device-id")
                .value_name("ID")
                .help("Override the MAC-derived device identifier"),
        )
        .get_matches();

    let manager = match matches.get_one::<String>("config") {
        Some(path) => ConfigManager::with_path(PathBuf::from(path))?,
        None => ConfigManager::new()?,
    };
    let mut config = manager.get_config().clone();

    if let Some(url) = matches.get_one::<String>("ota-url") {
        config.provisioning.ota_url = url.clone();
    }
    if let Some(id) = matches.get_one::<String>("device-id") {
        config.provisioning.device_id = Some(id.clone());
    }

    println!("vocalink {} - push-to-talk voice assistant", env!("CARGO_PKG_VERSION"));
    VoiceAssistantApp::new(config).run()
}
