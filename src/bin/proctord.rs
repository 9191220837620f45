//! proctord - exam integrity monitoring daemon
//!
//! This daemon:
//! 1. Loads configuration (`PROCTOR_CONFIG` file + `PROCTOR_*` env)
//! 2. Probes the grading backend (non-fatal)
//! 3. Reads frames from the configured source and runs the detectors
//! 4. Classifies each frame and throttles incidents
//! 5. Saves evidence and dispatches reports in the background
//! 6. Drains the dispatch queue and prints a summary on Ctrl-C

use anyhow::{anyhow, Result};
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use proctor_kernel::config::ProctorConfig;
use proctor_kernel::ui::Ui;
use proctor_kernel::{
    open_source, BackendClient, DetectorRegistry, EvidenceStore, MonitoringSession,
    ReportDispatcher, SubjectId,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Identifier of the monitored student (positive integer).
    #[arg(long, env = "PROCTOR_SUBJECT_ID")]
    subject_id: u64,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
    /// List detector backends and exit.
    #[arg(long)]
    list_detectors: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let ui = Ui::from_flag(&args.ui);
    let registry = DetectorRegistry::with_builtin();

    if args.list_detectors {
        for name in registry.list() {
            println!("{name}");
        }
        return Ok(());
    }

    let subject_id = SubjectId::new(args.subject_id)?;

    let cfg = {
        let _stage = ui.stage("Load configuration");
        ProctorConfig::load()?
    };

    let client = {
        let mut stage = ui.stage("Probe grading backend");
        let client = BackendClient::new(cfg.backend_config()?)?;
        match client.health() {
            Ok(body) => log::info!("backend healthy: {}", body.trim()),
            Err(e) => {
                stage.warn();
                log::warn!(
                    "backend health check failed ({}); monitoring anyway, reports may be lost",
                    e
                );
            }
        }
        client
    };

    let detectors = {
        let _stage = ui.stage("Load detectors");
        registry.build(&cfg.detector)?
    };
    log::info!(
        "detectors: landmarks={} objects={}",
        detectors.landmarks.name(),
        detectors.objects.name()
    );

    let dispatcher = ReportDispatcher::start(cfg.dispatch.clone(), Arc::new(client))?;
    let evidence = EvidenceStore::new(cfg.evidence_config()?);
    if evidence.is_enabled() {
        log::info!("evidence written to {}", evidence.root().display());
    } else {
        log::info!("evidence capture disabled");
    }

    let session = MonitoringSession::new(subject_id, detectors, dispatcher)?
        .with_thresholds(cfg.thresholds)
        .with_throttle(cfg.throttle_state()?)
        .with_sustain_frames(cfg.throttle.min_sustained_frames)
        .with_evidence(evidence);

    let mut source = {
        let _stage = ui.stage("Open frame source");
        open_source(cfg.source.clone())?
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!(
        "proctord running for subject {} (cooldown {}s, scope {:?}, yaw {}°, pitch {}°)",
        subject_id,
        cfg.throttle.cooldown.as_secs(),
        cfg.throttle.scope,
        cfg.thresholds.yaw_threshold_degrees,
        cfg.thresholds.pitch_threshold_degrees
    );
    log::info!("press Ctrl-C to stop");

    let summary = session.run(source.as_mut(), &shutdown)?;
    ui.summary(&summary);
    Ok(())
}
