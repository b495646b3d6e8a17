use anyhow::{Context, Result};
use log::{debug, info};
use rusqlite::{Connection, OptionalExtension, params};
use std::{path::Path, sync::Mutex};

/// Persisted set of authorized (plate, credential) pairs.
pub trait PairingStore: Send + Sync {
    fn exists(&self, plate: &str, credential: &str) -> Result<bool>;

    /// Adds a pair. Returns `false` when it was already present.
    fn insert(&self, plate: &str, credential: &str) -> Result<bool>;

    /// Credentials already paired with `plate`.
    fn credentials_for(&self, plate: &str) -> Result<Vec<String>>;

    fn count(&self) -> Result<u64>;
}

pub struct SqlitePairingStore {
    conn: Mutex<Connection>,
}

impl SqlitePairingStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        info!("Opening pairing store at {}", db_path.display());

        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open pairing store {}", db_path.display()))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<()> {
        self.conn()
            .execute_batch(
                r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS pairings (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              plate TEXT NOT NULL,
              credential TEXT NOT NULL,
              created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_pairings_pair ON pairings(plate, credential);
            "#,
            )
            .context("Failed to create pairing schema")?;
        Ok(())
    }

    /// Inserts `seed` when the store holds no pairing at all.
    pub fn seed_if_empty<S: AsRef<str>>(&self, seed: &[(S, S)]) -> Result<()> {
        if self.count()? > 0 {
            return Ok(());
        }

        for (plate, credential) in seed {
            self.insert(plate.as_ref(), credential.as_ref())?;
        }
        info!("Seeded pairing store with {} pairing(s)", seed.len());
        Ok(())
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl PairingStore for SqlitePairingStore {
    fn exists(&self, plate: &str, credential: &str) -> Result<bool> {
        let found = self
            .conn()
            .query_row(
                "SELECT 1 FROM pairings WHERE plate = ?1 AND credential = ?2",
                params![plate, credential],
                |_| Ok(()),
            )
            .optional()
            .context("Failed to query pairing")?;
        Ok(found.is_some())
    }

    fn insert(&self, plate: &str, credential: &str) -> Result<bool> {
        let changed = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO pairings (plate, credential) VALUES (?1, ?2)",
                params![plate, credential],
            )
            .context("Failed to insert pairing")?;

        debug!("Insert pairing ({}, {}): {} row(s)", plate, credential, changed);
        Ok(changed == 1)
    }

    fn credentials_for(&self, plate: &str) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT credential FROM pairings WHERE plate = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![plate], |row| row.get::<_, String>(0))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn count(&self) -> Result<u64> {
        let n: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM pairings", [], |row| row.get(0))
            .context("Failed to count pairings")?;
        Ok(n as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_pair_membership() {
        let store = SqlitePairingStore::open_in_memory().unwrap();
        assert!(store.insert("ABC123", "213213").unwrap());

        assert!(store.exists("ABC123", "213213").unwrap());
        assert!(!store.exists("213213", "ABC123").unwrap());
        assert!(!store.exists("ABC123", "999999").unwrap());
    }

    #[test]
    fn duplicate_insert_is_ignored() {
        let store = SqlitePairingStore::open_in_memory().unwrap();
        assert!(store.insert("ABC123", "213213").unwrap());
        assert!(!store.insert("ABC123", "213213").unwrap());
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn plate_may_pair_with_several_credentials() {
        let store = SqlitePairingStore::open_in_memory().unwrap();
        store.insert("ABC123", "1").unwrap();
        store.insert("ABC123", "2").unwrap();
        store.insert("XYZ999", "1").unwrap();

        assert_eq!(store.credentials_for("ABC123").unwrap(), vec!["1", "2"]);
        assert_eq!(store.count().unwrap(), 3);
    }

    #[test]
    fn seed_only_applies_to_empty_store() {
        let store = SqlitePairingStore::open_in_memory().unwrap();
        store.seed_if_empty(&[("123ABC", "213213")]).unwrap();
        store.seed_if_empty(&[("OTHER", "1")]).unwrap();

        assert!(store.exists("123ABC", "213213").unwrap());
        assert!(!store.exists("OTHER", "1").unwrap());
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pairings.db");

        {
            let store = SqlitePairingStore::open(&path).unwrap();
            store.insert("XYZ999", "000111").unwrap();
        }

        let store = SqlitePairingStore::open(&path).unwrap();
        assert!(store.exists("XYZ999", "000111").unwrap());
    }
}
