use log::{debug, error, info};
use std::{io::Write, sync::Arc, time::Instant};
use tokio::sync::{mpsc, watch};

use crate::{
    access::{AccessEngine, Verdict},
    detection::DetectionOutcome,
    journal::DecisionJournal,
};

/// Turns finished detections into access decisions, one at a time.
///
/// A pending operator prompt only holds up this loop; frame intake and
/// credential polling keep running.
pub async fn proc_detections<W: Write + Send>(
    mut cv_rx: mpsc::Receiver<DetectionOutcome>,
    engine: Arc<AccessEngine>,
    journal: Option<DecisionJournal<W>>,
    decisions: Option<mpsc::UnboundedSender<Verdict>>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Decision loop started");

    loop {
        let outcome = tokio::select! {
            outcome = cv_rx.recv() => match outcome {
                Some(outcome) => outcome,
                None => break,
            },
            _ = shutdown.changed() => break,
        };

        let verdict = tokio::select! {
            verdict = engine.decide(&outcome.plate, Instant::now()) => verdict,
            _ = shutdown.changed() => break,
        };

        let verdict = match verdict {
            Ok(verdict) => verdict,
            Err(e) => {
                error!(
                    "Decision for frame {} failed: {:#}",
                    outcome.frame_index, e
                );
                continue;
            }
        };

        debug!("Frame {}: {}", outcome.frame_index, verdict.decision);

        if let Some(journal) = &journal {
            if let Err(e) = journal.record(outcome.frame_index, &verdict) {
                error!("Failed to journal decision: {:#}", e);
            }
        }
        if let Some(tx) = &decisions {
            let _ = tx.send(verdict);
        }
    }

    info!("Decision loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        access::{
            Decision,
            fakes::{CountingActuator, ScriptedConfirmer},
        },
        credential::CredentialTracker,
        detection::PlateText,
        pairing::{PairingStore, SqlitePairingStore},
    };

    fn outcome(frame_index: u64, plate: PlateText) -> DetectionOutcome {
        DetectionOutcome {
            frame_index,
            region: None,
            plate,
            finished_at: Instant::now(),
        }
    }

    #[tokio::test]
    async fn decisions_are_journaled_in_order() {
        let tracker = Arc::new(CredentialTracker::default());
        tracker.update("213213", Instant::now());
        let store = Arc::new(SqlitePairingStore::open_in_memory().unwrap());
        store.insert("ABC123", "213213").unwrap();

        let engine = Arc::new(AccessEngine::new(
            tracker,
            store,
            Arc::new(CountingActuator::default()),
            Arc::new(ScriptedConfirmer::new(false)),
            2,
        ));

        let (tx, rx) = mpsc::channel(4);
        let (verdict_tx, mut verdict_rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let journal = DecisionJournal::new(Vec::new(), false).unwrap();

        tx.send(outcome(10, PlateText::Text("ABC123".into())))
            .await
            .unwrap();
        tx.send(outcome(20, PlateText::Empty)).await.unwrap();
        drop(tx);

        proc_detections(rx, engine, Some(journal), Some(verdict_tx), shutdown_rx).await;

        assert_eq!(verdict_rx.recv().await.unwrap().decision, Decision::Grant);
        assert_eq!(
            verdict_rx.recv().await.unwrap().decision,
            Decision::DenyInvalidInput
        );
        assert!(verdict_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop() {
        let engine = Arc::new(AccessEngine::new(
            Arc::new(CredentialTracker::default()),
            Arc::new(SqlitePairingStore::open_in_memory().unwrap()),
            Arc::new(CountingActuator::default()),
            Arc::new(ScriptedConfirmer::new(false)),
            2,
        ));
        let (_tx, rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(proc_detections::<Vec<u8>>(
            rx,
            engine,
            None,
            None,
            shutdown_rx,
        ));
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
