//! Single-slot template store on SQLite.
//!
//! Exactly one template row exists at any time (`slot = 0`); enrollment
//! replaces it wholesale inside a transaction and reset deletes it. The
//! embedding is biometric data, so it is sealed with AES-256-GCM under a
//! key file created on first use; the metadata columns stay queryable in
//! the clear.

use std::fs;
use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use thiserror::Error;

use facequest_core::types::{Embedding, EnrolledTemplate};
use facequest_core::{DetectorKind, Error as CoreError, Metric, TemplateStore};

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("key file {path}: {source}")]
    KeyFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to seal template embedding")]
    Seal,
    #[error("failed to unseal template embedding — wrong key or corrupt record")]
    Unseal,
    #[error("corrupt template record: {0}")]
    Corrupt(String),
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        CoreError::store(err)
    }
}

/// SQLite-backed [`TemplateStore`] holding at most one record.
pub struct SqliteTemplateStore {
    conn: Connection,
    key: [u8; KEY_LEN],
}

impl SqliteTemplateStore {
    /// Open (creating if needed) the database at `db_path` and the
    /// encryption key at `key_path`.
    pub fn open(db_path: &Path, key_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS template (
                slot         INTEGER PRIMARY KEY CHECK (slot = 0),
                version      INTEGER NOT NULL,
                created_at   TEXT NOT NULL,
                detector     TEXT NOT NULL,
                metric       TEXT NOT NULL,
                sample_count INTEGER NOT NULL,
                nonce        BLOB NOT NULL,
                embedding    BLOB NOT NULL
            );",
        )?;

        let key = load_or_create_key(key_path)?;
        tracing::info!(db = %db_path.display(), "template store opened");
        Ok(Self { conn, key })
    }

    /// Short hex digest of the sealed embedding, for status display.
    /// Changes on every re-enrollment, reveals nothing about the face.
    pub fn fingerprint(&self) -> Result<Option<String>, StoreError> {
        let blob: Option<Vec<u8>> = self
            .conn
            .query_row("SELECT embedding FROM template WHERE slot = 0", [], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(blob.map(|b| {
            let digest = Sha256::digest(&b);
            digest[..8].iter().map(|b| format!("{b:02x}")).collect()
        }))
    }

    fn put_inner(&mut self, template: &EnrolledTemplate) -> Result<(), StoreError> {
        let plaintext = serde_json::to_vec(&template.embedding.values)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        let cipher = Aes256Gcm::new_from_slice(&self.key).map_err(|_| StoreError::Seal)?;
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_ref())
            .map_err(|_| StoreError::Seal)?;

        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM template", [])?;
        tx.execute(
            "INSERT INTO template
                (slot, version, created_at, detector, metric, sample_count, nonce, embedding)
             VALUES (0, ?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                template.version,
                template.created_at.to_rfc3339(),
                template.detector.to_string(),
                template.metric.to_string(),
                template.sample_count,
                nonce.as_slice(),
                ciphertext,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn get_inner(&self) -> Result<Option<EnrolledTemplate>, StoreError> {
        let row: Option<(u32, String, String, String, usize, Vec<u8>, Vec<u8>)> = self
            .conn
            .query_row(
                "SELECT version, created_at, detector, metric, sample_count, nonce, embedding
                 FROM template WHERE slot = 0",
                [],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                    ))
                },
            )
            .optional()?;

        let Some((version, created_at, detector, metric, sample_count, nonce, ciphertext)) = row
        else {
            return Ok(None);
        };

        if nonce.len() != NONCE_LEN {
            return Err(StoreError::Corrupt(format!(
                "expected {NONCE_LEN}-byte nonce, found {}",
                nonce.len()
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(&self.key).map_err(|_| StoreError::Unseal)?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
            .map_err(|_| StoreError::Unseal)?;
        let values: Vec<f32> = serde_json::from_slice(&plaintext)
            .map_err(|e| StoreError::Corrupt(format!("embedding payload: {e}")))?;

        let created_at: DateTime<Utc> = created_at
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("created_at: {e}")))?;
        let detector: DetectorKind = detector
            .parse()
            .map_err(|_| StoreError::Corrupt(format!("unknown detector '{detector}'")))?;
        let metric: Metric = metric
            .parse()
            .map_err(|_| StoreError::Corrupt(format!("unknown metric '{metric}'")))?;

        Ok(Some(EnrolledTemplate {
            version,
            created_at,
            detector,
            metric,
            embedding: Embedding::new(values),
            sample_count,
        }))
    }

    fn delete_inner(&mut self) -> Result<(), StoreError> {
        self.conn.execute("DELETE FROM template", [])?;
        Ok(())
    }
}

impl TemplateStore for SqliteTemplateStore {
    fn put(&mut self, template: &EnrolledTemplate) -> Result<(), CoreError> {
        self.put_inner(template).map_err(Into::into)
    }

    fn get(&self) -> Result<Option<EnrolledTemplate>, CoreError> {
        self.get_inner().map_err(Into::into)
    }

    fn delete(&mut self) -> Result<(), CoreError> {
        self.delete_inner().map_err(Into::into)
    }
}

/// Read the key file, or generate a fresh key with 0600 permissions.
fn load_or_create_key(path: &Path) -> Result<[u8; KEY_LEN], StoreError> {
    let wrap = |source: std::io::Error| StoreError::KeyFile {
        path: path.to_path_buf(),
        source,
    };

    if path.exists() {
        let bytes = fs::read(path).map_err(wrap)?;
        let key: [u8; KEY_LEN] = bytes.as_slice().try_into().map_err(|_| {
            StoreError::Corrupt(format!(
                "key file {} must be exactly {KEY_LEN} bytes",
                path.display()
            ))
        })?;
        return Ok(key);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(wrap)?;
    }
    let mut key = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut key);
    fs::write(path, key).map_err(wrap)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path).map_err(wrap)?.permissions();
        perms.set_mode(0o600);
        fs::set_permissions(path, perms).map_err(wrap)?;
    }

    tracing::info!(path = %path.display(), "generated template encryption key");
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use facequest_core::types::TEMPLATE_VERSION;
    use tempfile::TempDir;

    fn template(values: Vec<f32>) -> EnrolledTemplate {
        EnrolledTemplate {
            version: TEMPLATE_VERSION,
            created_at: Utc::now(),
            detector: DetectorKind::Accurate,
            metric: Metric::Euclidean,
            embedding: Embedding::new(values),
            sample_count: 18,
        }
    }

    fn open_store(dir: &TempDir) -> SqliteTemplateStore {
        SqliteTemplateStore::open(&dir.path().join("template.db"), &dir.path().join("template.key"))
            .unwrap()
    }

    #[test]
    fn put_get_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);

        assert!(store.get().unwrap().is_none());
        let t = template(vec![0.1, -0.5, 2.0]);
        store.put(&t).unwrap();

        let loaded = store.get().unwrap().unwrap();
        assert_eq!(loaded.embedding, t.embedding);
        assert_eq!(loaded.sample_count, 18);
        assert_eq!(loaded.metric, Metric::Euclidean);
        assert_eq!(loaded.version, TEMPLATE_VERSION);
    }

    #[test]
    fn put_replaces_wholesale() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);

        store.put(&template(vec![1.0, 1.0])).unwrap();
        store.put(&template(vec![2.0, 2.0])).unwrap();

        let loaded = store.get().unwrap().unwrap();
        assert_eq!(loaded.embedding.values, vec![2.0, 2.0]);

        let count: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM template", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1, "at most one record at all times");
    }

    #[test]
    fn delete_clears_the_slot() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);

        store.put(&template(vec![1.0])).unwrap();
        store.delete().unwrap();
        assert!(store.get().unwrap().is_none());

        // Deleting an empty store is fine.
        store.delete().unwrap();
    }

    #[test]
    fn completed_put_is_visible_after_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = open_store(&dir);
            store.put(&template(vec![0.25; 4])).unwrap();
        }
        let store = open_store(&dir);
        let loaded = store.get().unwrap().unwrap();
        assert_eq!(loaded.embedding.values, vec![0.25; 4]);
    }

    #[test]
    fn wrong_key_fails_to_unseal() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = open_store(&dir);
            store.put(&template(vec![1.0, 2.0])).unwrap();
        }

        // Replace the key file; the sealed record must become unreadable.
        fs::write(dir.path().join("template.key"), [0x42u8; KEY_LEN]).unwrap();
        let store = open_store(&dir);
        let err = store.get_inner().unwrap_err();
        assert!(matches!(err, StoreError::Unseal));
    }

    #[test]
    fn fingerprint_tracks_enrollment() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);

        assert!(store.fingerprint().unwrap().is_none());
        store.put(&template(vec![1.0, 2.0])).unwrap();
        let first = store.fingerprint().unwrap().unwrap();
        assert_eq!(first.len(), 16);

        store.put(&template(vec![1.0, 2.0])).unwrap();
        let second = store.fingerprint().unwrap().unwrap();
        // Fresh nonce per put → fresh ciphertext → fresh fingerprint.
        assert_ne!(first, second);
    }

    #[test]
    fn key_file_is_created_with_owner_only_permissions() {
        let dir = TempDir::new().unwrap();
        let _store = open_store(&dir);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(dir.path().join("template.key"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
