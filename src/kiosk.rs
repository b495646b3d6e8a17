use anyhow::{Context, Result};
use log::{error, info, warning};
use regex::Regex;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{runtime::Handle, signal, sync::mpsc, sync::watch, task};

use crate::{
    access::{AccessEngine, Actuator, Confirmer},
    auth,
    conf::Conf,
    confirm::{ConsoleConfirmer, EnrollPolicy, PolicyConfirmer},
    credential::CredentialTracker,
    cv::{FrameSource, frame_metrics::FrameMetrics},
    detection::SharedDetector,
    journal::DecisionJournal,
    ocr::HttpRecognizer,
    pairing::{PairingStore, SqlitePairingStore},
    proc::proc_detections,
    rfid,
    schedule::DetectionScheduler,
};

/// Wires the frame loop, the RFID poller and the decision loop together and
/// runs them until Ctrl+C or until the frame source gives out.
pub struct Kiosk {
    config: Conf,
}

impl Kiosk {
    pub fn new(config: Conf) -> Self {
        Self { config }
    }

    pub async fn start(self, source: Box<dyn FrameSource>, detector: SharedDetector) -> Result<()> {
        let cfg = self.config;
        info!("Starting access kiosk");
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let tracker = Arc::new(CredentialTracker::new(cfg.credential_ttl()));
        info!("Credentials stay valid for {:?} after a read", tracker.ttl());

        let store = SqlitePairingStore::open(&cfg.store.path)?;
        store.seed_if_empty(&cfg.store.seed)?;
        info!("Pairing store holds {} pairing(s)", store.count()?);
        let store: Arc<dyn PairingStore> = Arc::new(store);

        let journal = match &cfg.journal.path {
            Some(path) => Some(DecisionJournal::open(path)?),
            None => None,
        };

        let token_re = Regex::new(&cfg.serial.token_pattern).context("Invalid token pattern")?;
        let actuator: Arc<dyn Actuator> = match rfid::open_serial(&cfg.serial.device) {
            Ok((reader, writer)) => {
                let (line_tx, line_rx) = mpsc::channel(64);
                rfid::spawn_line_reader(reader, line_tx, cfg.poll_period())?;

                info!("Spawning RFID polling task");
                task::spawn(rfid::poll_credentials(
                    line_rx,
                    tracker.clone(),
                    token_re,
                    cfg.poll_period(),
                    shutdown_rx.clone(),
                ));
                Arc::new(rfid::SerialActuator::new(writer, cfg.grant_byte()?))
            }
            Err(e) => {
                error!("Serial port error: {:#}", e);
                warning!("Running without credential reader; every decision will be denied");
                Arc::new(rfid::NullActuator)
            }
        };

        let confirmer: Arc<dyn Confirmer> = match cfg.access.enroll {
            EnrollPolicy::Prompt => Arc::new(ConsoleConfirmer::stdio(cfg.confirm_timeout())?),
            EnrollPolicy::Always => Arc::new(PolicyConfirmer(true)),
            EnrollPolicy::Never => Arc::new(PolicyConfirmer(false)),
        };

        let engine = Arc::new(AccessEngine::new(
            tracker,
            store,
            actuator,
            confirmer,
            cfg.access.min_plate_len,
        ));

        let secret = (*auth::ENV_SECRET)
            .clone()
            .or_else(|| cfg.recognizer.api_secret.clone());
        let recognizer = Arc::new(HttpRecognizer::new(
            &cfg.recognizer.url,
            &cfg.recognizer.field,
            cfg.recognizer_timeout(),
            secret,
        )?);

        let (results_tx, results_rx) = mpsc::channel(cfg.access.queue.max(1));
        let scheduler = DetectionScheduler::new(
            cfg.detector.every,
            detector,
            recognizer,
            cfg.detector.selector,
            results_tx,
            Handle::current(),
        );

        info!("Spawning decision task");
        let decision_handle = task::spawn(proc_detections(
            results_rx,
            engine,
            journal,
            None,
            shutdown_rx.clone(),
        ));

        info!("Spawning frame task");
        let frame_handle = task::spawn_blocking({
            let period = cfg.frame_period();
            let shutdown = shutdown_rx.clone();
            move || frame_loop(source, &scheduler, period, shutdown)
        });

        let ctrl_c = async {
            signal::ctrl_c().await?;
            info!("Received CTRL+C signal");
            anyhow::Ok(())
        };

        let outcome = tokio::select! {
            result = ctrl_c => result,
            result = frame_handle => match result {
                Ok(result) => result.context("Frame task failed"),
                Err(e) => Err(anyhow::Error::new(e).context("Frame task panicked")),
            },
        };

        info!("Initiating shutdown procedure");
        shutdown_tx.send(true).ok();
        // In-flight detections are abandoned; only the decision loop is awaited.
        if tokio::time::timeout(Duration::from_secs(2), decision_handle)
            .await
            .is_err()
        {
            warning!("Decision loop did not stop in time");
        }

        info!("All tasks completed");
        outcome
    }
}

/// Paces the frame source at `period` and feeds every frame to the scheduler.
///
/// Returns when shutdown is signalled or the source fails.
pub fn frame_loop(
    mut source: Box<dyn FrameSource>,
    scheduler: &DetectionScheduler,
    period: Duration,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    info!("Starting frame loop (period: {:?})", period);
    let mut metrics = FrameMetrics::new(100);
    let mut frame_index = 0u64;
    let mut next_tick = Instant::now();

    while !*shutdown.borrow() {
        frame_index += 1;

        match source.next_frame() {
            Ok(Some(frame)) => {
                metrics.frame(Instant::now());
                scheduler.on_frame(&frame, frame_index);
            }
            Ok(None) => metrics.missed(),
            Err(e) => {
                info!(
                    "Frame loop stopped after {:?}: {} frames ({} dispatched, {} dropped while busy)",
                    metrics.total_runtime(),
                    metrics.frames(),
                    scheduler.dispatched(),
                    scheduler.skipped_busy()
                );
                return Err(e.context("Frame source failed"));
            }
        }

        next_tick += period;
        let now = Instant::now();
        if next_tick > now {
            std::thread::sleep(next_tick - now);
        } else {
            next_tick = now;
        }
    }

    info!(
        "Frame loop completed after {:?}. Total frames: {}, last {:.1} FPS, shutting down",
        metrics.total_runtime(),
        metrics.frames(),
        metrics.fps()
    );
    Ok(())
}
