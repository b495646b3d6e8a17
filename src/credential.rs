use log::debug;
use std::{
    sync::Mutex,
    time::{Duration, Instant},
};

/// Default validity of a credential read.
pub const DEFAULT_TTL: Duration = Duration::from_secs(8);

#[derive(Debug, Clone)]
struct Reading {
    token: String,
    read_at: Instant,
    deadline: Instant,
}

/// Most recent credential read from the hardware reader.
///
/// Only one token is tracked; every update replaces the previous token and its
/// deadline. Expiry is evaluated against the stored deadline whenever the value
/// is read, so there is nothing to clear and no timer that could outlive a newer
/// reading.
#[derive(Debug)]
pub struct CredentialTracker {
    ttl: Duration,
    current: Mutex<Option<Reading>>,
}

impl CredentialTracker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            current: Mutex::new(None),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn update(&self, token: impl Into<String>, now: Instant) {
        let token = token.into();
        debug!("Credential updated: {} (valid for {:?})", token, self.ttl);

        *self.lock() = Some(Reading {
            token,
            read_at: now,
            deadline: now + self.ttl,
        });
    }

    /// Token valid at `now`, if any.
    pub fn current(&self, now: Instant) -> Option<String> {
        self.lock()
            .as_ref()
            .filter(|r| r.read_at <= now && now < r.deadline)
            .map(|r| r.token.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Reading>> {
        match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for CredentialTracker {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}
