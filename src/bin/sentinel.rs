//! sentinel - local driver for the detection service
//!
//! Subcommands:
//! - `classify <image>`: classify one image and record the event
//! - `report <image>`: classify, route to a department and record
//! - `watch`: run the camera stream until Ctrl-C (or a duration) elapses
//! - `previews`: list stored previews, or copy one out with `--get`
//! - `latest`: print the most recent event
//!
//! Results are printed as JSON on stdout. The exit code follows the status of
//! the operation (see `Status::exit_code`).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use issue_sentinel::{
    DetectionService, OperationError, SentinelConfig, SessionState, StartOutcome, Status,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Event log path (overrides config).
    #[arg(long, env = "SENTINEL_STORE_PATH")]
    store_path: Option<PathBuf>,
    /// Camera device: stub://<name>, an image directory, or /dev/videoN.
    #[arg(long, env = "SENTINEL_CAMERA")]
    camera: Option<String>,
    /// Skip the network location lookup.
    #[arg(long)]
    no_location: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Classify a single image and record it.
    Classify { image: PathBuf },
    /// Classify an issue photo and route it to a department.
    Report { image: PathBuf },
    /// Run the continuous stream until Ctrl-C.
    Watch {
        /// Stop automatically after this many seconds.
        #[arg(long)]
        duration_secs: Option<u64>,
    },
    /// List previews newest-first, or fetch one.
    Previews {
        /// Preview name to fetch.
        #[arg(long)]
        get: Option<String>,
        /// Where to write the fetched preview.
        #[arg(long, requires = "get")]
        out: Option<PathBuf>,
    },
    /// Show the most recent event.
    Latest,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = SentinelConfig::load()?;
    if let Some(path) = args.store_path {
        cfg.store_path = path;
    }
    if let Some(camera) = args.camera {
        cfg.camera.device = camera;
    }
    if args.no_location {
        cfg.location.enabled = false;
    }

    let service = DetectionService::from_config(&cfg)?;
    let outcome = match args.command {
        Command::Classify { image } => read_image(&image).and_then(|bytes| {
            let result = service.classify_once(&bytes)?;
            Ok(json!({ "status": Status::Success.code(), "result": result }))
        }),
        Command::Report { image } => read_image(&image).and_then(|bytes| {
            let report = service.route_issue(&bytes)?;
            Ok(json!({ "status": Status::Success.code(), "report": report }))
        }),
        Command::Watch { duration_secs } => watch(&service, duration_secs.map(Duration::from_secs)),
        Command::Previews { get: None, .. } => service
            .list_previews()
            .map(|previews| json!({ "status": Status::Success.code(), "previews": previews })),
        Command::Previews {
            get: Some(name),
            out,
        } => fetch_preview(&service, &name, out),
        Command::Latest => service
            .latest_event()
            .map(|event| json!({ "status": Status::Success.code(), "event": event })),
    };

    match outcome {
        Ok(body) => {
            println!("{}", serde_json::to_string_pretty(&body)?);
            Ok(())
        }
        Err(err) => {
            let status = err.status();
            log::error!("{}", err);
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "status": status.code(),
                    "error": err.message(),
                }))?
            );
            std::process::exit(status.exit_code());
        }
    }
}

fn read_image(path: &Path) -> Result<Vec<u8>, OperationError> {
    std::fs::read(path)
        .with_context(|| format!("read image {}", path.display()))
        .map_err(|err| OperationError::Decode(format!("{:#}", err)))
}

fn fetch_preview(
    service: &DetectionService,
    name: &str,
    out: Option<PathBuf>,
) -> Result<serde_json::Value, OperationError> {
    let bytes = service.get_preview(name)?;
    let out = out.unwrap_or_else(|| PathBuf::from(name));
    std::fs::write(&out, &bytes)
        .with_context(|| format!("write preview to {}", out.display()))?;
    Ok(json!({
        "status": Status::Success.code(),
        "preview": name,
        "written_to": out.display().to_string(),
        "bytes": bytes.len(),
    }))
}

fn watch(
    service: &DetectionService,
    duration: Option<Duration>,
) -> Result<serde_json::Value, OperationError> {
    if service.start_stream()? == StartOutcome::AlreadyRunning {
        return Err(OperationError::Internal(
            "stream unexpectedly already running".to_string(),
        ));
    }

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|err| OperationError::Internal(format!("set Ctrl-C handler: {}", err)))?;

    log::info!("watching stream (Ctrl-C to stop)...");
    let started = Instant::now();
    let deadline = duration.map(|d| started + d);
    loop {
        if rx.recv_timeout(Duration::from_millis(250)).is_ok() {
            log::info!("shutdown signal received, stopping stream...");
            break;
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            log::info!("watch duration elapsed, stopping stream...");
            break;
        }
        if service.stream_state()? == SessionState::Idle {
            log::info!("stream ended on its own");
            break;
        }
    }

    let stopped = service.stop_stream()?;
    let last_exit = service.stream().last_exit()?;
    let events = service.events()?;
    Ok(json!({
        "status": Status::Success.code(),
        "stop": format!("{:?}", stopped),
        "worker_exit": last_exit.map(|exit| format!("{:?}", exit)),
        "elapsed_ms": started.elapsed().as_millis() as u64,
        "events_total": events.len(),
    }))
}
