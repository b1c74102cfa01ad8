use std::path::PathBuf;

use anyhow::Context as _;
use clap::Parser;
use log::info;

use nfc_monitor::adapter::NfcScanAdapter;
use nfc_monitor::config::{AppConfig, Backend};
use nfc_monitor::manager::Manager;
use nfc_monitor::mqtt::MqttClient;
use nfc_monitor::radio;
use nfc_monitor::ui_thread::UiThread;

#[derive(Parser, Debug)]
#[command(version, about = "Relays NFC tag detections as JSON lines and MQTT messages")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Use the simulated radio regardless of the configured backend
    #[arg(long)]
    simulate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    let args = Args::parse();

    let config_contents = std::fs::read_to_string(&args.config)
        .with_context(|| format!("reading {}", args.config.display()))?;
    let config: AppConfig = toml::de::from_str(&config_contents)
        .with_context(|| format!("parsing {}", args.config.display()))?;

    let mut reader = config.reader.unwrap_or_default();
    if args.simulate {
        reader.backend = Some(Backend::Simulated);
    }
    info!("Reader: {:?}", reader);

    let ui = UiThread::spawn().context("spawning UI thread")?;
    let adapter = NfcScanAdapter::load(radio::default_radio(&reader), ui);

    let mqtt = config.mqtt.as_ref().map(MqttClient::new);

    let core = Manager::new(adapter, mqtt, reader.scan_on_start.unwrap_or(true));
    core.run_loop().await?;

    Ok(())
}
