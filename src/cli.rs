use std::env;
use std::sync::Arc;
use clap::{Args, Parser, Subcommand};
use futures::channel::mpsc::UnboundedReceiver;
use futures::StreamExt;
use log::{error, info, warn, LevelFilter};
use tokio::time::{sleep, Duration};

use crate::config::io::ConfigIO;
use crate::config::types::Config;
use crate::device::btle::BtleTransport;
use crate::device::events::EventSink;
use crate::device::session::Session;
use crate::device::types::{DeviceEvent, DiscoveredDevice};
use crate::error::{AppRunError, ConfigError};
use crate::permission::{DesktopPermissions, PermissionGate, SCAN_CAPABILITIES};
use crate::spectrometer::Spectrometer;
use crate::telemetry::battery::BatteryReading;
use crate::telemetry::FixedLayout;

#[derive(Parser, Debug)]
#[command(name = "sig-link", version, about = "Find and connect to SiG BLE spectrometers")]
pub struct Cli {
    /// Overrides the configured log level (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Scan and list nearby spectrometers
    Scan {
        /// How long to scan, in seconds
        #[arg(long)]
        seconds: Option<u64>,
    },
    /// Scan, then connect to the first spectrometer whose name or address matches
    Connect {
        query: String,
        #[arg(long)]
        seconds: Option<u64>,
    },
    /// Decode a batteryStatus payload given in hex, e.g. 6401
    DecodeBattery {
        hex: String,
    },
    /// Show the configuration, storing any of the given settings first
    Config {
        #[command(flatten)]
        changes: ConfigChanges,
    },
}

#[derive(Args, Debug, Default)]
pub struct ConfigChanges {
    /// Default log level (error, warn, info, debug, trace)
    #[arg(long)]
    pub set_log_level: Option<String>,

    /// Default scan duration, in seconds
    #[arg(long)]
    pub set_scan_seconds: Option<u64>,

    /// Upper bound for each handshake step in milliseconds; 0 removes it
    #[arg(long)]
    pub set_step_timeout_ms: Option<u64>,
}

impl ConfigChanges {
    /**
     * Applies the changes to `config`. Returns whether anything was changed.
     */
    pub fn apply(&self, config: &mut Config) -> Result<bool, AppRunError> {
        let mut changed = false;

        if let Some(level) = &self.set_log_level {
            if level.parse::<LevelFilter>().is_err() {
                return Err(AppRunError::InvalidSetting { name: "log level", value: level.clone() });
            }
            config.log_level = level.to_lowercase();
            changed = true;
        }

        if let Some(seconds) = self.set_scan_seconds {
            config.scan.duration_secs = seconds;
            changed = true;
        }

        if let Some(millis) = self.set_step_timeout_ms {
            config.handshake.step_timeout_ms = if millis == 0 { None } else { Some(millis) };
            changed = true;
        }

        Ok(changed)
    }
}

pub fn run(args: env::Args) -> Result<(), AppRunError> {
    let cli = Cli::parse_from(args);

    if let Some(level) = cli.log_level.as_deref() {
        match level.parse::<LevelFilter>() {
            Ok(level) => log::set_max_level(level),
            Err(_) => warn!("Unknown log level {:?}", level),
        }
    }

    if let Command::DecodeBattery { hex } = &cli.command {
        return decode_battery(hex);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(run_with_config(cli))
}

pub fn parse_hex(input: &str) -> Result<Vec<u8>, AppRunError> {
    let invalid = || AppRunError::InvalidHex { input: input.to_string() };

    let digits = input.trim().trim_start_matches("0x").replace([' ', ':'], "");
    if digits.len() % 2 != 0 || !digits.is_ascii() {
        return Err(invalid());
    }

    (0..digits.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&digits[i..i + 2], 16).map_err(|_| invalid()))
        .collect()
}

fn decode_battery(hex: &str) -> Result<(), AppRunError> {
    let payload = parse_hex(hex)?;
    let battery = BatteryReading::decode(Some(payload.as_slice()))?;

    println!("{}", battery);
    if battery.is_low() {
        println!("Battery low: laser unavailable");
    }
    Ok(())
}

pub fn matches_query(device: &DiscoveredDevice, query: &str) -> bool {
    device.address.eq_ignore_ascii_case(query)
        || device.name.to_lowercase().contains(&query.to_lowercase())
}

async fn report_events(mut events: UnboundedReceiver<DeviceEvent>) {
    while let Some(event) = events.next().await {
        match event {
            DeviceEvent::Progress(value) if value > 0.0 => info!("Connecting… {:.0}%", value * 100.0),
            DeviceEvent::Handshake(state) => info!("Handshake: {:?}", state),
            DeviceEvent::Failed { message } => error!("Connection failed: {}", message),
            DeviceEvent::Ready { name } => info!("{} is ready", name),
            DeviceEvent::Battery(battery) => info!("{}", battery),
            _ => {},
        }
    }
}

async fn scan_for(session: &Session, seconds: u64) -> Result<Vec<DiscoveredDevice>, AppRunError> {
    let gate = PermissionGate::new(DesktopPermissions);
    session.scan(&gate, &SCAN_CAPABILITIES).await?;

    info!("Scanning for {} seconds", seconds);
    sleep(Duration::from_secs(seconds)).await;
    session.stop_scan().await?;

    Ok(session.devices())
}

fn print_device(device: &DiscoveredDevice) {
    let rssi = device.rssi.map(|r| r.to_string()).unwrap_or("?".to_string());
    println!("{:<24} {:<20} RSSI {}", device.name, device.address, rssi);
}

async fn run_with_config(cli: Cli) -> Result<(), AppRunError> {
    let config_io = ConfigIO::new_sync()?;
    let mut locker = config_io.locker()?;
    let _lock = locker.lock()?;

    let mut config = config_io.read().await?;
    if cli.log_level.is_none() {
        log::set_max_level(config.log_level_filter());
    }

    if let Command::Config { changes } = &cli.command {
        if changes.apply(&mut config)? {
            config_io.save(&config).await?;
        }
        let json = serde_json::to_string_pretty(&config)
            .map_err(|source| ConfigError::JsonError { source })?;
        println!("{}", json);
        return Ok(());
    }

    let transport = Arc::new(BtleTransport::new().await?);
    let session = Session::new(transport, &config, EventSink::new());
    let reporter = tokio::spawn(report_events(session.subscribe()));

    let result = match cli.command {
        Command::Scan { seconds } => {
            let devices = scan_for(&session, seconds.unwrap_or(config.scan.duration_secs)).await?;
            for device in &devices {
                print_device(device);
            }
            if devices.is_empty() {
                println!("No spectrometers found");
            }
            Ok(())
        },
        Command::Connect { query, seconds } => {
            let devices = scan_for(&session, seconds.unwrap_or(config.scan.duration_secs)).await?;
            let device = devices.iter()
                .find(|device| matches_query(device, &query))
                .ok_or(AppRunError::DeviceNotFound { query: query.clone() })?;

            session.select_device(Some(&device.id));
            let mut spectrometer = Spectrometer::new();
            let connection = session.connect(&mut spectrometer).await?;

            print_device(&connection.device);
            for (name, value) in &connection.device.info {
                println!("  {}: {}", name, value);
            }
            println!("  pixels: {}", spectrometer.pixels().unwrap_or(0));
            println!("  integration time: {} ms", spectrometer.integration_time_ms().unwrap_or(0));
            println!("  gain: {} dB", spectrometer.gain_db().unwrap_or(0.0));
            if let Some(battery) = spectrometer.battery() {
                println!("  {}", battery);
            }
            println!("  laser available: {}", spectrometer.laser_available());

            session.reset().await;
            Ok(())
        },
        Command::DecodeBattery { hex } => decode_battery(&hex),
        Command::Config { .. } => Ok(()),
    };

    reporter.abort();
    result
}
