mod report;

use std::fs::File;
use std::io::{stderr, BufRead};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::Parser;
use crossbeam::channel::{bounded, Sender};
use samlink::link::LinkDriver;
use samlink::session::{
    run_session, Accumulator, ControlSignal, SessionConfig, SessionEvent,
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Capture scored strips from a SAM4000 and render per-shooter series
/// reports.
///
/// While a session runs, type `next <name>` to switch shooters and `end`
/// to finish and write the report.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Serial device path. When omitted, available ports are listed.
    #[arg(short, long)]
    port: Option<String>,

    /// Serial baud rate.
    #[arg(short, long, default_value_t = 9600)]
    baud: u32,

    /// Shooter registered at session start.
    #[arg(short, long)]
    name: String,

    /// Shots on one physical strip.
    #[arg(long, default_value_t = 10)]
    strip_size: usize,

    /// Shots in one reporting series. Must be 1, 2, 5, or a multiple
    /// of 10.
    #[arg(long, default_value_t = 10)]
    series_size: usize,

    /// How ring scores enter the report.
    #[arg(short, long, default_value = "decimal")]
    mode: report::ScoreMode,

    /// Report format.
    #[arg(short, long, default_value = "csv")]
    format: report::Format,

    /// Report file path.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Delete the report file if it already exists.
    #[arg(long, action)]
    clobber: bool,

    /// Directory receiving raw pre-decode frame captures.
    #[arg(long)]
    capture: Option<PathBuf>,

    /// Activate the device in barcode mode.
    #[arg(long, action)]
    barcode: bool,

    /// Retransmissions requested before a bad frame is abandoned.
    #[arg(long, default_value_t = 3)]
    retries: u32,

    /// Keep requesting retransmission indefinitely instead of
    /// abandoning.
    #[arg(long, action)]
    always_retry: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(stderr)
        .with_ansi(false)
        .without_time()
        .with_env_filter(
            EnvFilter::try_from_env("SAMLINK_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let Some(port_path) = cli.port.as_deref() else {
        return list_ports();
    };

    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(cli.format.default_filename()));
    if !cli.clobber && output.exists() {
        bail!("{output:?} exists; use --clobber");
    }

    let config = SessionConfig::builder()
        .shots_per_strip(cli.strip_size)
        .shots_per_series(cli.series_size)
        .build();
    let mut acc = Accumulator::new(config)?;
    acc.register_shooter(&cli.name);

    let port = serialport::new(port_path, cli.baud)
        .timeout(Duration::from_secs(1))
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .open()
        .with_context(|| format!("opening serial port {port_path}"))?;
    info!(port = port_path, baud = cli.baud, "port open");

    let mut driver = LinkDriver::new(port)
        .with_retry_limit(cli.retries)
        .with_always_retry(cli.always_retry);
    if let Some(dir) = &cli.capture {
        driver = driver.with_capture(Box::new(capture_file(dir)?));
    }

    let (tx, rx) = bounded(16);
    spawn_control_thread(tx);

    driver.activate(cli.barcode)?;
    println!(
        "session started for {}; insert a strip ('next <name>' switches shooter, 'end' finishes)",
        cli.name
    );

    let zult = run_session(&mut driver, &mut acc, &rx, |event| match event {
        SessionEvent::StripAccepted {
            shooter,
            strips,
            completed_series,
        } => {
            println!(
                "strip [{strips}] scored for {shooter} ({completed_series} series complete); \
                 insert the next strip or type 'end'"
            );
        }
        SessionEvent::StripAbandoned { attempts } => {
            eprintln!(
                "transfer failed {attempts} times; check the cable connection and \
                 re-present the strip"
            );
        }
        SessionEvent::ShooterChanged { name } => {
            println!("now scoring for {name}");
        }
    });

    // Write whatever completed before surfacing any session fault, so a
    // cable pulled mid-session does not cost the morning's results.
    let reports = acc.finalize();
    if reports.is_empty() {
        info!("no completed series; nothing to report");
    } else {
        let file = File::create(&output)
            .with_context(|| format!("failed to create report {output:?}"))?;
        report::render(&reports, cli.mode, &cli.format, file)?;
        println!("report written to {}", output.display());
    }

    zult.context("session aborted")
}

fn list_ports() -> Result<()> {
    let ports = serialport::available_ports().context("listing serial ports")?;
    if ports.is_empty() {
        bail!("no port specified and none detected; check the cable connection");
    }
    eprintln!("no port specified; available ports:");
    for p in ports {
        eprintln!("  {}", p.port_name);
    }
    bail!("re-run with --port");
}

fn capture_file(dir: &PathBuf) -> Result<File> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating capture directory {dir:?}"))?;
    let path = dir.join(format!(
        "capture-{}.bin",
        Local::now().format("%Y%m%dT%H%M%S")
    ));
    debug!(path = %path.display(), "raw frame capture enabled");
    File::create(&path).with_context(|| format!("creating capture file {path:?}"))
}

/// Forward operator commands from stdin to the session loop. EOF ends
/// the session.
fn spawn_control_thread(tx: Sender<ControlSignal>) {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(name) = line.strip_prefix("next ") {
                let name = name.trim();
                if name.is_empty() {
                    eprintln!("usage: next <name>");
                    continue;
                }
                if tx.send(ControlSignal::NextShooter(name.to_string())).is_err() {
                    return;
                }
            } else if line == "end" || line == "q" {
                let _ = tx.send(ControlSignal::EndSession);
                return;
            } else {
                eprintln!("commands: 'next <name>' to switch shooter, 'end' to finish");
            }
        }
        warn!("stdin closed, ending session");
        let _ = tx.send(ControlSignal::EndSession);
    });
}
