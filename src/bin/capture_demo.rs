//! capture_demo - headless consumer for the plate capture pipeline
//!
//! Opens the configured source, runs the stub plate detector on every
//! delivered frame and logs candidates until Ctrl-C, end of stream, or
//! `--seconds` elapses.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::{Duration, Instant};

use plate_capture::roi;
use plate_capture::ui::Ui;
use plate_capture::{
    CaptureConfig, CapturePipeline, DetectorRegistry, PipelineEvent, SourceDescriptor,
    StubDetector, SystemOpener,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Source to open: device index, file path, or stream URI (overrides ANPR_SOURCE).
    #[arg(long)]
    source: Option<String>,
    /// Stop after this many seconds (0 runs until Ctrl-C or end of stream).
    #[arg(long, default_value_t = 10)]
    seconds: u64,
    /// Region of interest as "x,y;x,y;x,y".
    #[arg(long)]
    roi: Option<String>,
    /// Probe local capture devices and exit.
    #[arg(long)]
    list_devices: bool,
    /// UI mode for stderr status (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
    /// Seed for the stub detector.
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = CaptureConfig::load()?;
    if let Some(source) = args.source.as_deref() {
        cfg.source = source.parse::<SourceDescriptor>()?;
    }

    let opener = Arc::new(SystemOpener::new(cfg.sources.clone()));
    let (pipeline, events) = CapturePipeline::spawn(opener, cfg.pipeline.clone())?;

    if args.list_devices {
        let devices = pipeline.list_available_devices();
        if devices.is_empty() {
            println!("no capture devices found");
        }
        for device in devices {
            println!("{}", device);
        }
        return pipeline.shutdown();
    }

    if let Some(raw) = args.roi.as_deref() {
        let points = roi::parse_points(raw).context("invalid --roi")?;
        if points.len() < 3 {
            bail!("--roi needs at least 3 points");
        }
        pipeline.update_roi(points, true);
    }

    let mut detectors = DetectorRegistry::new();
    detectors.register(match args.seed {
        Some(seed) => StubDetector::seeded(cfg.detector.clone(), seed),
        None => StubDetector::new(cfg.detector.clone()),
    });
    detectors.warm_up_all()?;

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        flag.store(false, Ordering::SeqCst);
    })
    .context("error setting Ctrl-C handler")?;

    let is_tty = std::io::stderr().is_terminal();
    let ui = Ui::from_args(Some(&args.ui), is_tty);
    let mut status = ui.session(&cfg.source.to_string());

    log::info!("capture_demo starting {}", cfg.source);
    pipeline.start(cfg.source.clone())?;

    let deadline = (args.seconds > 0).then(|| Instant::now() + Duration::from_secs(args.seconds));
    let mut failure = None;
    while running.load(Ordering::SeqCst) {
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            log::info!("time limit reached");
            break;
        }
        match events.recv_timeout(Duration::from_millis(100)) {
            Ok(PipelineEvent::FrameReady(frame)) => {
                status.record_frame();
                let roi = frame.roi().cloned().unwrap_or_else(|| pipeline.roi());
                for candidate in detectors.detect(&frame, &roi)? {
                    log::info!(
                        "frame {}: plate {} confidence {:.2}",
                        frame.sequence(),
                        candidate.text,
                        candidate.confidence
                    );
                    status.record_candidate(&candidate);
                }
            }
            Ok(PipelineEvent::StateChanged(state)) => status.set_state(&state),
            Ok(PipelineEvent::StreamEnded) => {
                log::info!("source reached end of stream");
                break;
            }
            Ok(PipelineEvent::Error(reason)) => {
                log::error!("pipeline failed: {}", reason);
                failure = Some(reason);
                break;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    pipeline.stop()?;
    let stats = pipeline.stats();
    pipeline.shutdown()?;
    drop(status);
    log::info!(
        "captured {} frames, published {}, dropped {}, transient errors {}",
        stats.frames_captured,
        stats.frames_published,
        stats.frames_dropped,
        stats.transient_errors
    );

    if let Some(reason) = failure {
        bail!("capture failed: {}", reason);
    }
    Ok(())
}
