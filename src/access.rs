//! Fuses a finished detection with the tracked credential and decides access.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{error, info, warning};
use std::{fmt, sync::Arc, time::Instant};

use crate::{credential::CredentialTracker, detection::PlateText, pairing::PairingStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Grant,
    DenyInvalidInput,
    /// Unknown pairing that was not enrolled.
    NoMatchPromptEnroll,
    Enrolled,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Decision::Grant => "GRANT",
            Decision::DenyInvalidInput => "DENY_INVALID_INPUT",
            Decision::NoMatchPromptEnroll => "NO_MATCH_PROMPT_ENROLL",
            Decision::Enrolled => "ENROLLED",
        })
    }
}

/// Gate hardware opened on a grant.
#[async_trait]
pub trait Actuator: Send + Sync {
    async fn grant(&self) -> Result<()>;
}

/// Operator yes/no for enrolling an unknown pairing.
#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn confirm(&self, plate: &str, credential: &str) -> bool;
}

/// Everything a decision was made from, for the journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub plate: PlateText,
    pub credential: Option<String>,
    pub decision: Decision,
}

pub struct AccessEngine {
    credentials: Arc<CredentialTracker>,
    store: Arc<dyn PairingStore>,
    actuator: Arc<dyn Actuator>,
    confirmer: Arc<dyn Confirmer>,
    min_plate_len: usize,
}

impl AccessEngine {
    pub fn new(
        credentials: Arc<CredentialTracker>,
        store: Arc<dyn PairingStore>,
        actuator: Arc<dyn Actuator>,
        confirmer: Arc<dyn Confirmer>,
        min_plate_len: usize,
    ) -> Self {
        Self {
            credentials,
            store,
            actuator,
            confirmer,
            min_plate_len,
        }
    }

    /// Decides on one recognized plate, reading the credential as of `now`.
    ///
    /// Errors only come from the pairing store and end this decision alone.
    pub async fn decide(&self, plate: &PlateText, now: Instant) -> Result<Verdict> {
        let credential = self.credentials.current(now);
        let verdict = |decision| Verdict {
            plate: plate.clone(),
            credential: credential.clone(),
            decision,
        };

        let (Some(text), Some(token)) = (plate.usable(self.min_plate_len), credential.as_deref())
        else {
            info!(
                "Plate '{}' with credential {:?}: invalid input",
                plate, credential
            );
            return Ok(verdict(Decision::DenyInvalidInput));
        };

        if self
            .store
            .exists(text, token)
            .context("Pairing lookup failed")?
        {
            info!("Access granted for plate '{}' credential '{}'", text, token);
            if let Err(e) = self.actuator.grant().await {
                error!("Grant signal dropped: {:#}", e);
            }
            return Ok(verdict(Decision::Grant));
        }

        info!(
            "No pairing for plate '{}' credential '{}', asking operator",
            text, token
        );
        if !self.confirmer.confirm(text, token).await {
            info!("Enrollment declined for ('{}', '{}')", text, token);
            return Ok(verdict(Decision::NoMatchPromptEnroll));
        }

        let others = self
            .store
            .credentials_for(text)
            .context("Pairing lookup failed")?;
        if !others.is_empty() {
            warning!(
                "Plate '{}' is already paired with {} other credential(s)",
                text,
                others.len()
            );
        }

        self.store
            .insert(text, token)
            .context("Pairing insert failed")?;
        info!("Enrolled pairing ('{}', '{}')", text, token);

        Ok(verdict(Decision::Enrolled))
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    pub struct CountingActuator {
        pub grants: AtomicUsize,
        pub broken: AtomicBool,
    }

    #[async_trait]
    impl Actuator for CountingActuator {
        async fn grant(&self) -> Result<()> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(anyhow!("serial port closed"));
            }
            self.grants.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    pub struct ScriptedConfirmer {
        pub answer: bool,
        pub asked: AtomicUsize,
    }

    impl ScriptedConfirmer {
        pub fn new(answer: bool) -> Self {
            Self {
                answer,
                asked: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Confirmer for ScriptedConfirmer {
        async fn confirm(&self, _plate: &str, _credential: &str) -> bool {
            self.asked.fetch_add(1, Ordering::SeqCst);
            self.answer
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fakes::*;
    use super::*;
    use crate::pairing::SqlitePairingStore;
    use anyhow::anyhow;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    struct Rig {
        tracker: Arc<CredentialTracker>,
        store: Arc<SqlitePairingStore>,
        actuator: Arc<CountingActuator>,
        confirmer: Arc<ScriptedConfirmer>,
        engine: AccessEngine,
    }

    fn rig(confirm: bool) -> Rig {
        let tracker = Arc::new(CredentialTracker::new(Duration::from_secs(8)));
        let store = Arc::new(SqlitePairingStore::open_in_memory().unwrap());
        let actuator = Arc::new(CountingActuator::default());
        let confirmer = Arc::new(ScriptedConfirmer::new(confirm));
        let engine = AccessEngine::new(
            tracker.clone(),
            store.clone(),
            actuator.clone(),
            confirmer.clone(),
            2,
        );
        Rig {
            tracker,
            store,
            actuator,
            confirmer,
            engine,
        }
    }

    fn text(s: &str) -> PlateText {
        PlateText::Text(s.to_string())
    }

    #[tokio::test]
    async fn known_pair_is_granted() {
        let rig = rig(false);
        rig.store.insert("ABC123", "213213").unwrap();
        let now = Instant::now();
        rig.tracker.update("213213", now);

        let verdict = rig.engine.decide(&text("ABC123"), now).await.unwrap();

        assert_eq!(verdict.decision, Decision::Grant);
        assert_eq!(verdict.credential.as_deref(), Some("213213"));
        assert_eq!(rig.actuator.grants.load(Ordering::SeqCst), 1);
        assert_eq!(rig.confirmer.asked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn sentinels_and_short_text_are_invalid() {
        let rig = rig(true);
        let now = Instant::now();
        rig.tracker.update("213213", now);

        for plate in [PlateText::Empty, PlateText::RecognitionError, text("A"), text("")] {
            let verdict = rig.engine.decide(&plate, now).await.unwrap();
            assert_eq!(verdict.decision, Decision::DenyInvalidInput, "{plate}");
        }
        assert_eq!(rig.store.count().unwrap(), 0);
        assert_eq!(rig.confirmer.asked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_credential_is_invalid() {
        let rig = rig(true);
        let verdict = rig.engine.decide(&text("ABC123"), Instant::now()).await.unwrap();

        assert_eq!(verdict.decision, Decision::DenyInvalidInput);
        assert_eq!(verdict.credential, None);
        assert_eq!(rig.actuator.grants.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn confirmed_enrollment_then_grant() {
        let rig = rig(true);
        let now = Instant::now();
        rig.tracker.update("000111", now);

        let first = rig.engine.decide(&text("XYZ999"), now).await.unwrap();
        assert_eq!(first.decision, Decision::Enrolled);
        assert!(rig.store.exists("XYZ999", "000111").unwrap());
        assert!(!rig.store.exists("000111", "XYZ999").unwrap());

        let second = rig.engine.decide(&text("XYZ999"), now).await.unwrap();
        assert_eq!(second.decision, Decision::Grant);
        assert_eq!(rig.confirmer.asked.load(Ordering::SeqCst), 1);
        assert_eq!(rig.store.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn declined_enrollment_leaves_store_alone() {
        let rig = rig(false);
        let now = Instant::now();
        rig.tracker.update("000111", now);

        let verdict = rig.engine.decide(&text("XYZ999"), now).await.unwrap();

        assert_eq!(verdict.decision, Decision::NoMatchPromptEnroll);
        assert_eq!(rig.store.count().unwrap(), 0);
        assert_eq!(rig.actuator.grants.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn broken_actuator_still_grants() {
        let rig = rig(false);
        rig.store.insert("ABC123", "213213").unwrap();
        rig.actuator
            .broken
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let now = Instant::now();
        rig.tracker.update("213213", now);

        let verdict = rig.engine.decide(&text("ABC123"), now).await.unwrap();
        assert_eq!(verdict.decision, Decision::Grant);
    }

    struct BrokenStore;

    impl PairingStore for BrokenStore {
        fn exists(&self, _: &str, _: &str) -> Result<bool> {
            Err(anyhow!("database is locked"))
        }
        fn insert(&self, _: &str, _: &str) -> Result<bool> {
            Err(anyhow!("database is locked"))
        }
        fn credentials_for(&self, _: &str) -> Result<Vec<String>> {
            Err(anyhow!("database is locked"))
        }
        fn count(&self) -> Result<u64> {
            Err(anyhow!("database is locked"))
        }
    }

    #[tokio::test]
    async fn storage_failure_fails_only_the_decision() {
        let tracker = Arc::new(CredentialTracker::default());
        let now = Instant::now();
        tracker.update("213213", now);
        let engine = AccessEngine::new(
            tracker,
            Arc::new(BrokenStore),
            Arc::new(CountingActuator::default()),
            Arc::new(ScriptedConfirmer::new(true)),
            2,
        );

        assert!(engine.decide(&text("ABC123"), now).await.is_err());
        // Invalid input never touches the store.
        let verdict = engine.decide(&PlateText::Empty, now).await.unwrap();
        assert_eq!(verdict.decision, Decision::DenyInvalidInput);
    }
}
