use std::path::PathBuf;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use beatlane::audio::devices::{get_input_device, list_input_devices, start_capture};
use beatlane::{DetectorConfig, OnsetDetector};
use clap::Parser;

/// Detect note events from a live input device and print them.
#[derive(Debug, Parser)]
#[command(name = "beatlane", version)]
struct Args {
    /// Input device name (defaults to the host's default input)
    #[arg(short, long)]
    device: Option<String>,

    /// List input devices and exit
    #[arg(long)]
    list: bool,

    /// TOML file with detector settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of lanes (overrides the config file)
    #[arg(short, long)]
    lanes: Option<usize>,

    /// Stop after this many seconds
    #[arg(short, long)]
    seconds: Option<f64>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let host = cpal::default_host();

    if args.list {
        for name in list_input_devices(&host) {
            println!("{}", name);
        }
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => DetectorConfig::load(path)?,
        None => DetectorConfig::default(),
    };
    if let Some(lanes) = args.lanes {
        config.num_lanes = lanes;
    }
    let num_lanes = config.num_lanes;

    let device = get_input_device(&host, args.device.as_deref()).ok_or_else(|| {
        format!(
            "No input device {:?}",
            args.device.as_deref().unwrap_or("<default>")
        )
    })?;

    let (tx, rx) = mpsc::channel();
    let _stream = start_capture(&device, tx)?;

    let (mut detector, mut notes) = OnsetDetector::with_queue(config)?;
    let started = Instant::now();
    let limit = args.seconds.map(Duration::from_secs_f64);

    loop {
        if limit.is_some_and(|limit| started.elapsed() >= limit) {
            break;
        }

        let captured = match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(captured) => captured,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        };

        detector.generate(&captured.as_chunk(), num_lanes)?;
        for event in notes.drain() {
            println!("{:>9.3}s  lane {}", event.time, event.lane);
        }
    }

    if detector.dropped_events() > 0 {
        log::warn!("{} events were dropped", detector.dropped_events());
    }

    Ok(())
}
