//! presence-store — SQLite-backed identity and attendance persistence.
//!
//! One row per enrolled identity (uniqueness by name, enforced by upsert),
//! append-only attendance events, and AES-256-GCM encryption of embedding
//! blobs at rest.

pub mod codec;
pub mod crypto;

use chrono::Utc;
use presence_core::{Embedding, IdentityRecord};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

pub use crypto::EmbeddingCipher;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Crypto(#[from] crypto::CryptoError),
    #[error(transparent)]
    Codec(#[from] codec::CodecError),
    #[error("unknown identity: {0}")]
    UnknownIdentity(String),
}

/// A single logged check-in.
#[derive(Debug, Clone)]
pub struct AttendanceEvent {
    pub id: i64,
    pub identity_id: String,
    pub recorded_at: String,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS identities (
    id            TEXT PRIMARY KEY,
    name          TEXT NOT NULL UNIQUE,
    photo_path    TEXT NOT NULL,
    embedding     BLOB NOT NULL,
    model_version TEXT NOT NULL,
    created_at    TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS attendance (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    identity_id TEXT NOT NULL REFERENCES identities(id) ON DELETE CASCADE,
    recorded_at TEXT NOT NULL
);
";

/// SQLite store for enrolled identities and attendance events.
///
/// Opened per request: schema application is idempotent and cheap.
pub struct IdentityStore {
    conn: Connection,
    cipher: EmbeddingCipher,
}

impl IdentityStore {
    /// Open (creating if needed) the database at `db_path`, with the
    /// embedding encryption key at `key_path`.
    pub fn open(db_path: &Path, key_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(db_path)?;
        let cipher = EmbeddingCipher::from_key_file(key_path)?;
        Self::bootstrap(conn, cipher)
    }

    /// Open an in-memory store (tests).
    pub fn open_in_memory(key_path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let cipher = EmbeddingCipher::from_key_file(key_path)?;
        Self::bootstrap(conn, cipher)
    }

    fn bootstrap(conn: Connection, cipher: EmbeddingCipher) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn, cipher })
    }

    /// Insert or replace the identity enrolled under `name`.
    ///
    /// Re-enrolling an existing name replaces the stored embedding, photo
    /// path, and model version in place; the identity id, creation time,
    /// and any attendance history are preserved. Exactly one row per name.
    pub fn upsert_identity(
        &self,
        name: &str,
        photo_path: &str,
        embedding: &Embedding,
    ) -> Result<IdentityRecord, StoreError> {
        let blob = self.cipher.seal(&codec::vector_to_bytes(&embedding.values))?;
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        self.conn.execute(
            "INSERT INTO identities (id, name, photo_path, embedding, model_version, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(name) DO UPDATE SET
                photo_path = excluded.photo_path,
                embedding = excluded.embedding,
                model_version = excluded.model_version",
            params![id, name, photo_path, blob, embedding.model_version, now],
        )?;

        let record = self
            .conn
            .query_row(
                "SELECT id, name, photo_path, created_at FROM identities WHERE name = ?1",
                params![name],
                |row| {
                    Ok(IdentityRecord {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        photo_path: row.get(2)?,
                        embedding: embedding.clone(),
                        created_at: row.get(3)?,
                    })
                },
            )?;

        tracing::info!(name, id = %record.id, "identity enrolled");
        Ok(record)
    }

    /// Load every enrolled identity with its decrypted embedding.
    ///
    /// Deliberately re-reads and re-deserializes the full gallery on each
    /// call; the matcher scans all of it anyway.
    pub fn list_identities(&self) -> Result<Vec<IdentityRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, photo_path, embedding, model_version, created_at
             FROM identities ORDER BY created_at, name",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Vec<u8>>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, name, photo_path, blob, model_version, created_at) = row?;
            let values = codec::bytes_to_vector(&self.cipher.open(&blob)?)?;
            records.push(IdentityRecord {
                id,
                name,
                photo_path,
                embedding: Embedding {
                    values,
                    model_version,
                },
                created_at,
            });
        }
        Ok(records)
    }

    /// Load one identity by id.
    pub fn get_identity(&self, id: &str) -> Result<Option<IdentityRecord>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name, photo_path, embedding, model_version, created_at
                 FROM identities WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Vec<u8>>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, name, photo_path, blob, model_version, created_at)) = row else {
            return Ok(None);
        };

        let values = codec::bytes_to_vector(&self.cipher.open(&blob)?)?;
        Ok(Some(IdentityRecord {
            id,
            name,
            photo_path,
            embedding: Embedding {
                values,
                model_version,
            },
            created_at,
        }))
    }

    /// Remove an identity. Attendance rows cascade.
    ///
    /// Returns false if the id is unknown.
    pub fn remove_identity(&self, id: &str) -> Result<bool, StoreError> {
        let changed = self
            .conn
            .execute("DELETE FROM identities WHERE id = ?1", params![id])?;
        if changed > 0 {
            tracing::info!(id, "identity removed");
        }
        Ok(changed > 0)
    }

    /// Append one attendance event for the given identity.
    pub fn record_attendance(&self, identity_id: &str) -> Result<AttendanceEvent, StoreError> {
        let recorded_at = Utc::now().to_rfc3339();
        let inserted = self.conn.execute(
            "INSERT INTO attendance (identity_id, recorded_at)
             SELECT id, ?2 FROM identities WHERE id = ?1",
            params![identity_id, recorded_at],
        )?;
        if inserted == 0 {
            return Err(StoreError::UnknownIdentity(identity_id.to_string()));
        }

        let id = self.conn.last_insert_rowid();
        tracing::info!(identity_id, event = id, "attendance recorded");
        Ok(AttendanceEvent {
            id,
            identity_id: identity_id.to_string(),
            recorded_at,
        })
    }

    /// All attendance events, newest first.
    pub fn list_attendance(&self) -> Result<Vec<AttendanceEvent>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, identity_id, recorded_at FROM attendance ORDER BY id DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(AttendanceEvent {
                id: row.get(0)?,
                identity_id: row.get(1)?,
                recorded_at: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Number of enrolled identities.
    pub fn count_identities(&self) -> Result<u64, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM identities", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> IdentityStore {
        IdentityStore::open_in_memory(&dir.path().join("embedding.key")).unwrap()
    }

    fn emb(values: Vec<f32>) -> Embedding {
        Embedding {
            values,
            model_version: "w600k_r50".to_string(),
        }
    }

    #[test]
    fn test_upsert_and_list_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let record = store
            .upsert_identity("Jane Roe", "Jane_Roe.jpg", &emb(vec![0.6, 0.8]))
            .unwrap();
        assert_eq!(record.name, "Jane Roe");

        let all = store.list_identities().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, record.id);
        assert_eq!(all[0].photo_path, "Jane_Roe.jpg");
        assert_eq!(all[0].embedding.values, vec![0.6, 0.8]);
        assert_eq!(all[0].embedding.model_version, "w600k_r50");
    }

    #[test]
    fn test_reenroll_same_name_single_row() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let first = store
            .upsert_identity("Jane Roe", "Jane_Roe.jpg", &emb(vec![1.0, 0.0]))
            .unwrap();
        let second = store
            .upsert_identity("Jane Roe", "Jane_Roe.jpg", &emb(vec![0.0, 1.0]))
            .unwrap();

        // One row per name: the embedding is replaced, the id survives.
        assert_eq!(store.count_identities().unwrap(), 1);
        assert_eq!(first.id, second.id);
        let all = store.list_identities().unwrap();
        assert_eq!(all[0].embedding.values, vec![0.0, 1.0]);
    }

    #[test]
    fn test_embeddings_encrypted_at_rest() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("faces.db");
        let store =
            IdentityStore::open(&db_path, &dir.path().join("embedding.key")).unwrap();

        store
            .upsert_identity("Jane Roe", "Jane_Roe.jpg", &emb(vec![0.25f32; 16]))
            .unwrap();

        let blob: Vec<u8> = store
            .conn
            .query_row("SELECT embedding FROM identities", [], |row| row.get(0))
            .unwrap();
        // Raw little-endian f32s must not appear in the stored blob.
        let plain = codec::vector_to_bytes(&[0.25f32; 16]);
        assert_ne!(blob, plain);
        assert!(blob.len() > plain.len());
    }

    #[test]
    fn test_get_and_remove() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let record = store
            .upsert_identity("Sam Lee", "Sam_Lee.jpg", &emb(vec![1.0]))
            .unwrap();

        assert!(store.get_identity(&record.id).unwrap().is_some());
        assert!(store.remove_identity(&record.id).unwrap());
        assert!(store.get_identity(&record.id).unwrap().is_none());
        assert!(!store.remove_identity(&record.id).unwrap());
    }

    #[test]
    fn test_attendance_append_only_log() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let record = store
            .upsert_identity("Sam Lee", "Sam_Lee.jpg", &emb(vec![1.0]))
            .unwrap();

        store.record_attendance(&record.id).unwrap();
        store.record_attendance(&record.id).unwrap();

        let events = store.list_attendance().unwrap();
        assert_eq!(events.len(), 2);
        assert!(events[0].id > events[1].id, "newest first");
        assert!(events.iter().all(|e| e.identity_id == record.id));
    }

    #[test]
    fn test_attendance_unknown_identity() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert!(matches!(
            store.record_attendance("no-such-id"),
            Err(StoreError::UnknownIdentity(_))
        ));
    }

    #[test]
    fn test_remove_cascades_attendance() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let record = store
            .upsert_identity("Sam Lee", "Sam_Lee.jpg", &emb(vec![1.0]))
            .unwrap();
        store.record_attendance(&record.id).unwrap();

        store.remove_identity(&record.id).unwrap();
        assert!(store.list_attendance().unwrap().is_empty());
    }

    #[test]
    fn test_enroll_then_match_self_is_unity() {
        // Querying with the exact stored embedding returns that identity
        // with similarity 1.0.
        use presence_core::{CosineMatcher, Matcher};

        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let probe = emb(vec![0.1, -0.4, 0.7, 0.2]);
        store
            .upsert_identity("Jane Roe", "Jane_Roe.jpg", &probe)
            .unwrap();

        let gallery = store.list_identities().unwrap();
        let result = CosineMatcher.compare(&probe, &gallery, 0.40);
        assert!(result.matched);
        assert_eq!(result.identity_name.as_deref(), Some("Jane Roe"));
        assert!((result.similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_reopen_preserves_rows() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("faces.db");
        let key_path = dir.path().join("embedding.key");

        {
            let store = IdentityStore::open(&db_path, &key_path).unwrap();
            store
                .upsert_identity("Jane Roe", "Jane_Roe.jpg", &emb(vec![0.5, 0.5]))
                .unwrap();
        }

        let store = IdentityStore::open(&db_path, &key_path).unwrap();
        let all = store.list_identities().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].embedding.values, vec![0.5, 0.5]);
    }
}
