//! Binary artifact storage (PDF reports, screen recordings, screenshots).
//!
//! Blobs live in the shared SQLite database and are addressed by an opaque
//! id; a SHA-256 digest is computed on write for integrity checks.

use crate::db::Database;
use crate::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

/// Metadata describing a stored artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub id: String,
    pub filename: String,
    pub content_type: String,
    pub sha256: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

/// Store for binary blobs addressed by opaque id or filename
#[derive(Clone)]
pub struct ArtifactStore {
    db: Database,
}

impl ArtifactStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Compute SHA-256 hash of data
    pub fn hash(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    /// Persist a blob and return its opaque id.
    pub fn put(&self, filename: &str, content_type: &str, data: &[u8]) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let digest = Self::hash(data);
        let conn = self.db.connection();
        let conn = conn.lock();
        conn.execute(
            "INSERT INTO artifacts (id, filename, content_type, sha256, size, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                filename,
                content_type,
                digest,
                data.len() as i64,
                data,
                Utc::now().timestamp(),
            ],
        )?;
        debug!("Stored artifact {} ({}, {} bytes)", id, filename, data.len());
        Ok(id)
    }

    /// Fetch a blob and its metadata by id
    pub fn get(&self, id: &str) -> Result<Option<(ArtifactMeta, Vec<u8>)>> {
        let conn = self.db.connection();
        let conn = conn.lock();
        let row = conn
            .query_row(
                "SELECT id, filename, content_type, sha256, size, payload, created_at
                 FROM artifacts WHERE id = ?1",
                params![id],
                row_with_payload,
            )
            .optional()?;
        Ok(row)
    }

    /// Fetch the most recent blob with the given filename
    pub fn get_by_name(&self, filename: &str) -> Result<Option<(ArtifactMeta, Vec<u8>)>> {
        let conn = self.db.connection();
        let conn = conn.lock();
        let row = conn
            .query_row(
                "SELECT id, filename, content_type, sha256, size, payload, created_at
                 FROM artifacts WHERE filename = ?1
                 ORDER BY created_at DESC, rowid DESC LIMIT 1",
                params![filename],
                row_with_payload,
            )
            .optional()?;
        Ok(row)
    }

    /// All artifact metadata, newest first
    pub fn list(&self) -> Result<Vec<ArtifactMeta>> {
        let conn = self.db.connection();
        let conn = conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, filename, content_type, sha256, size, created_at
             FROM artifacts ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt.query_map([], row_meta)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Delete an artifact, returns whether a row was removed
    pub fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.db.connection();
        let conn = conn.lock();
        let rows = conn.execute("DELETE FROM artifacts WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }
}

fn row_with_payload(row: &rusqlite::Row<'_>) -> rusqlite::Result<(ArtifactMeta, Vec<u8>)> {
    let payload: Vec<u8> = row.get(5)?;
    Ok((
        ArtifactMeta {
            id: row.get(0)?,
            filename: row.get(1)?,
            content_type: row.get(2)?,
            sha256: row.get(3)?,
            size: row.get::<_, i64>(4)? as u64,
            created_at: DateTime::from_timestamp(row.get(6)?, 0).unwrap_or_else(Utc::now),
        },
        payload,
    ))
}

fn row_meta(row: &rusqlite::Row<'_>) -> rusqlite::Result<ArtifactMeta> {
    Ok(ArtifactMeta {
        id: row.get(0)?,
        filename: row.get(1)?,
        content_type: row.get(2)?,
        sha256: row.get(3)?,
        size: row.get::<_, i64>(4)? as u64,
        created_at: DateTime::from_timestamp(row.get(5)?, 0).unwrap_or_else(Utc::now),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ArtifactStore {
        ArtifactStore::new(Database::open_memory().unwrap())
    }

    #[test]
    fn put_get_round_trip() {
        let store = store();
        let id = store.put("report.pdf", "application/pdf", b"%PDF-1.4 fake").unwrap();

        let (meta, payload) = store.get(&id).unwrap().unwrap();
        assert_eq!(meta.filename, "report.pdf");
        assert_eq!(meta.content_type, "application/pdf");
        assert_eq!(meta.size, 13);
        assert_eq!(meta.sha256, ArtifactStore::hash(b"%PDF-1.4 fake"));
        assert_eq!(payload, b"%PDF-1.4 fake");
    }

    #[test]
    fn lookup_by_name_returns_latest() {
        let store = store();
        store.put("video.mp4", "video/mp4", b"old").unwrap();
        let second = store.put("video.mp4", "video/mp4", b"new").unwrap();

        let (meta, payload) = store.get_by_name("video.mp4").unwrap().unwrap();
        assert_eq!(meta.id, second);
        assert_eq!(payload, b"new");
        assert!(store.get_by_name("missing.mp4").unwrap().is_none());
    }

    #[test]
    fn delete_removes_blob() {
        let store = store();
        let id = store.put("shot.png", "image/png", b"png").unwrap();
        assert!(store.delete(&id).unwrap());
        assert!(!store.delete(&id).unwrap());
        assert!(store.get(&id).unwrap().is_none());
        assert!(store.list().unwrap().is_empty());
    }
}
