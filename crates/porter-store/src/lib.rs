//! porter-store — SQLite persistence for enrolled identities, the
//! attendance ledger, and the visitor decision log.
//!
//! All access funnels through one `tokio_rusqlite` connection whose worker
//! thread serializes statements; the uniqueness invariants (one identity
//! per name, one attendance record per name per day) live in the schema
//! itself, so check-then-insert races cannot produce duplicates.

use porter_core::{Encoding, GalleryEntry};
use rusqlite::params;
use std::path::Path;
use thiserror::Error;
use tokio_rusqlite::Connection;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("identity {0:?} already enrolled")]
    DuplicateName(String),
    #[error("identity {0:?} not found")]
    IdentityNotFound(String),
    #[error("stored encoding for {0:?} is corrupt: {1} bytes is not a whole number of f32s")]
    CorruptEncoding(String, usize),
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),
}

/// Outcome of an attendance mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attendance {
    /// First sighting of this identity today; a record was written.
    Recorded,
    /// Already marked for this date; no-op.
    AlreadyPresent,
}

/// One attendance row.
#[derive(Debug, Clone)]
pub struct AttendanceRecord {
    pub name: String,
    pub date: String,
    pub time: String,
}

/// One resolved visitor approval.
#[derive(Debug, Clone)]
pub struct VisitorRecord {
    pub name: String,
    pub whom: String,
    pub status: String,
    pub date: String,
    pub time: String,
}

enum RenameOutcome {
    Renamed,
    Missing,
    Taken,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS identities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    encoding BLOB NOT NULL
);
CREATE TABLE IF NOT EXISTS attendance (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    date TEXT NOT NULL,
    time TEXT NOT NULL,
    UNIQUE(name, date)
);
CREATE TABLE IF NOT EXISTS visitors (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    whom TEXT NOT NULL,
    status TEXT NOT NULL,
    date TEXT NOT NULL,
    time TEXT NOT NULL
);
";

/// Handle to the porter database. Cheap to clone; all clones share one
/// connection worker.
#[derive(Clone)]
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) the database at `path` and apply the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(path).await?;
        let store = Self { conn };
        store.init_schema().await?;
        Ok(store)
    }

    /// In-memory database, used by tests.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        let store = Self { conn };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| {
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // --- Enrolled identities ---

    /// Enroll a new identity. A name collision is an error; re-enrollment
    /// is remove followed by enroll.
    pub async fn enroll(&self, name: &str, encoding: &Encoding) -> Result<(), StoreError> {
        let blob = encoding_to_blob(encoding);
        let owned = name.to_string();
        let inserted = self
            .conn
            .call(move |conn| {
                match conn.execute(
                    "INSERT INTO identities (name, encoding) VALUES (?1, ?2)",
                    params![owned, blob],
                ) {
                    Ok(_) => Ok(true),
                    Err(rusqlite::Error::SqliteFailure(e, _))
                        if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                    {
                        Ok(false)
                    }
                    Err(e) => Err(e.into()),
                }
            })
            .await?;

        if inserted {
            tracing::info!(name, "identity enrolled");
            Ok(())
        } else {
            Err(StoreError::DuplicateName(name.to_string()))
        }
    }

    /// The full matching gallery, in insertion order.
    ///
    /// Insertion order is stable across calls so distance ties break
    /// reproducibly.
    pub async fn gallery(&self) -> Result<Vec<GalleryEntry>, StoreError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT name, encoding FROM identities ORDER BY id")?;
                let mapped = stmt.query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
                })?;
                let mut out = Vec::new();
                for row in mapped {
                    out.push(row?);
                }
                Ok(out)
            })
            .await?;

        rows.into_iter()
            .map(|(name, blob)| {
                let encoding = encoding_from_blob(&name, &blob)?;
                Ok(GalleryEntry { name, encoding })
            })
            .collect()
    }

    /// Enrolled identity names, alphabetical.
    pub async fn identity_names(&self) -> Result<Vec<String>, StoreError> {
        let names = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT name FROM identities ORDER BY name")?;
                let mapped = stmt.query_map([], |row| row.get::<_, String>(0))?;
                let mut out = Vec::new();
                for row in mapped {
                    out.push(row?);
                }
                Ok(out)
            })
            .await?;
        Ok(names)
    }

    pub async fn remove(&self, name: &str) -> Result<(), StoreError> {
        let owned = name.to_string();
        let removed = self
            .conn
            .call(move |conn| {
                Ok(conn.execute("DELETE FROM identities WHERE name = ?1", params![owned])?)
            })
            .await?;

        if removed == 0 {
            Err(StoreError::IdentityNotFound(name.to_string()))
        } else {
            tracing::info!(name, "identity removed");
            Ok(())
        }
    }

    pub async fn rename(&self, name: &str, new_name: &str) -> Result<(), StoreError> {
        let from = name.to_string();
        let to = new_name.to_string();
        let outcome = self
            .conn
            .call(move |conn| {
                match conn.execute(
                    "UPDATE identities SET name = ?1 WHERE name = ?2",
                    params![to, from],
                ) {
                    Ok(0) => Ok(RenameOutcome::Missing),
                    Ok(_) => Ok(RenameOutcome::Renamed),
                    Err(rusqlite::Error::SqliteFailure(e, _))
                        if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                    {
                        Ok(RenameOutcome::Taken)
                    }
                    Err(e) => Err(e.into()),
                }
            })
            .await?;

        match outcome {
            RenameOutcome::Renamed => {
                tracing::info!(from = name, to = new_name, "identity renamed");
                Ok(())
            }
            RenameOutcome::Missing => Err(StoreError::IdentityNotFound(name.to_string())),
            RenameOutcome::Taken => Err(StoreError::DuplicateName(new_name.to_string())),
        }
    }

    // --- Attendance ledger ---

    /// Write an attendance record unless one exists for `(name, date)`.
    ///
    /// `INSERT OR IGNORE` against the UNIQUE(name, date) index makes the
    /// check-and-insert one atomic statement, so concurrent marks for the
    /// same identity on the same day yield exactly one row.
    pub async fn mark_if_absent(
        &self,
        name: &str,
        date: &str,
        time: &str,
    ) -> Result<Attendance, StoreError> {
        let (n, d, t) = (name.to_string(), date.to_string(), time.to_string());
        let changed = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "INSERT OR IGNORE INTO attendance (name, date, time) VALUES (?1, ?2, ?3)",
                    params![n, d, t],
                )?)
            })
            .await?;

        if changed > 0 {
            tracing::info!(name, date, "attendance recorded");
            Ok(Attendance::Recorded)
        } else {
            Ok(Attendance::AlreadyPresent)
        }
    }

    /// Entries for the given date, as (name, time) pairs in arrival order.
    pub async fn todays_entries(&self, date: &str) -> Result<Vec<(String, String)>, StoreError> {
        let date = date.to_string();
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare("SELECT name, time FROM attendance WHERE date = ?1 ORDER BY id")?;
                let mapped = stmt.query_map(params![date], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?;
                let mut out = Vec::new();
                for row in mapped {
                    out.push(row?);
                }
                Ok(out)
            })
            .await?;
        Ok(rows)
    }

    /// Most recent attendance records, newest first.
    pub async fn recent_attendance(&self, limit: u32) -> Result<Vec<AttendanceRecord>, StoreError> {
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT name, date, time FROM attendance ORDER BY id DESC LIMIT ?1",
                )?;
                let mapped = stmt.query_map(params![limit], |row| {
                    Ok(AttendanceRecord {
                        name: row.get(0)?,
                        date: row.get(1)?,
                        time: row.get(2)?,
                    })
                })?;
                let mut out = Vec::new();
                for row in mapped {
                    out.push(row?);
                }
                Ok(out)
            })
            .await?;
        Ok(rows)
    }

    // --- Visitor decision log ---

    /// Append one resolved visitor decision.
    pub async fn record_visitor(
        &self,
        name: &str,
        whom: &str,
        status: &str,
        date: &str,
        time: &str,
    ) -> Result<(), StoreError> {
        let (n, w, s, d, t) = (
            name.to_string(),
            whom.to_string(),
            status.to_string(),
            date.to_string(),
            time.to_string(),
        );
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO visitors (name, whom, status, date, time) VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![n, w, s, d, t],
                )?;
                Ok(())
            })
            .await?;
        tracing::info!(name, whom, status, "visitor decision recorded");
        Ok(())
    }

    /// Most recent visitor decisions, newest first.
    pub async fn recent_visitors(&self, limit: u32) -> Result<Vec<VisitorRecord>, StoreError> {
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT name, whom, status, date, time FROM visitors ORDER BY id DESC LIMIT ?1",
                )?;
                let mapped = stmt.query_map(params![limit], |row| {
                    Ok(VisitorRecord {
                        name: row.get(0)?,
                        whom: row.get(1)?,
                        status: row.get(2)?,
                        date: row.get(3)?,
                        time: row.get(4)?,
                    })
                })?;
                let mut out = Vec::new();
                for row in mapped {
                    out.push(row?);
                }
                Ok(out)
            })
            .await?;
        Ok(rows)
    }
}

/// Serialize an encoding as little-endian f32 bytes.
pub fn encoding_to_blob(encoding: &Encoding) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoding.values.len() * 4);
    for v in &encoding.values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

fn encoding_from_blob(name: &str, blob: &[u8]) -> Result<Encoding, StoreError> {
    if blob.len() % 4 != 0 {
        return Err(StoreError::CorruptEncoding(name.to_string(), blob.len()));
    }
    let values = blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok(Encoding { values })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoding(values: &[f32]) -> Encoding {
        Encoding {
            values: values.to_vec(),
        }
    }

    #[test]
    fn test_blob_round_trip() {
        let original = encoding(&[0.0, -1.5, 3.25, f32::MIN_POSITIVE]);
        let blob = encoding_to_blob(&original);
        assert_eq!(blob.len(), 16);
        let back = encoding_from_blob("x", &blob).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn test_blob_rejects_ragged_length() {
        let result = encoding_from_blob("x", &[1, 2, 3]);
        assert!(matches!(result, Err(StoreError::CorruptEncoding(_, 3))));
    }

    #[tokio::test]
    async fn test_enroll_and_gallery_round_trip() {
        let store = Store::open_in_memory().await.unwrap();
        store.enroll("alice", &encoding(&[1.0, 2.0])).await.unwrap();
        store.enroll("bob", &encoding(&[3.0, 4.0])).await.unwrap();

        let gallery = store.gallery().await.unwrap();
        assert_eq!(gallery.len(), 2);
        // Insertion order, not alphabetical.
        assert_eq!(gallery[0].name, "alice");
        assert_eq!(gallery[0].encoding, encoding(&[1.0, 2.0]));
        assert_eq!(gallery[1].name, "bob");
    }

    #[tokio::test]
    async fn test_enroll_duplicate_name() {
        let store = Store::open_in_memory().await.unwrap();
        store.enroll("alice", &encoding(&[1.0])).await.unwrap();
        let result = store.enroll("alice", &encoding(&[2.0])).await;
        assert!(matches!(result, Err(StoreError::DuplicateName(n)) if n == "alice"));
    }

    #[tokio::test]
    async fn test_remove_then_reenroll() {
        let store = Store::open_in_memory().await.unwrap();
        store.enroll("alice", &encoding(&[1.0])).await.unwrap();
        store.remove("alice").await.unwrap();
        store.enroll("alice", &encoding(&[2.0])).await.unwrap();

        let gallery = store.gallery().await.unwrap();
        assert_eq!(gallery.len(), 1);
        assert_eq!(gallery[0].encoding, encoding(&[2.0]));
    }

    #[tokio::test]
    async fn test_remove_missing() {
        let store = Store::open_in_memory().await.unwrap();
        let result = store.remove("ghost").await;
        assert!(matches!(result, Err(StoreError::IdentityNotFound(_))));
    }

    #[tokio::test]
    async fn test_rename() {
        let store = Store::open_in_memory().await.unwrap();
        store.enroll("alice", &encoding(&[1.0])).await.unwrap();
        store.rename("alice", "alicia").await.unwrap();

        let names = store.identity_names().await.unwrap();
        assert_eq!(names, vec!["alicia"]);
    }

    #[tokio::test]
    async fn test_rename_missing_and_taken() {
        let store = Store::open_in_memory().await.unwrap();
        store.enroll("alice", &encoding(&[1.0])).await.unwrap();
        store.enroll("bob", &encoding(&[2.0])).await.unwrap();

        assert!(matches!(
            store.rename("ghost", "casper").await,
            Err(StoreError::IdentityNotFound(_))
        ));
        assert!(matches!(
            store.rename("alice", "bob").await,
            Err(StoreError::DuplicateName(_))
        ));
    }

    #[tokio::test]
    async fn test_mark_if_absent_first_writer_wins() {
        let store = Store::open_in_memory().await.unwrap();
        let first = store
            .mark_if_absent("alice", "2026-08-04", "09:00:00")
            .await
            .unwrap();
        let second = store
            .mark_if_absent("alice", "2026-08-04", "17:30:00")
            .await
            .unwrap();
        assert_eq!(first, Attendance::Recorded);
        assert_eq!(second, Attendance::AlreadyPresent);

        let entries = store.todays_entries("2026-08-04").await.unwrap();
        assert_eq!(entries, vec![("alice".to_string(), "09:00:00".to_string())]);
    }

    #[tokio::test]
    async fn test_mark_if_absent_new_day_records_again() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .mark_if_absent("alice", "2026-08-04", "09:00:00")
            .await
            .unwrap();
        let next_day = store
            .mark_if_absent("alice", "2026-08-05", "09:05:00")
            .await
            .unwrap();
        assert_eq!(next_day, Attendance::Recorded);
    }

    #[tokio::test]
    async fn test_concurrent_marks_yield_one_record() {
        let store = Store::open_in_memory().await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.mark_if_absent("alice", "2026-08-04", "09:00:00").await
            }));
        }

        let mut recorded = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() == Attendance::Recorded {
                recorded += 1;
            }
        }
        assert_eq!(recorded, 1);

        let entries = store.todays_entries("2026-08-04").await.unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_visitor_log() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .record_visitor("carol", "dave", "Approved", "2026-08-04", "10:00:00")
            .await
            .unwrap();
        store
            .record_visitor("erin", "frank", "Denied", "2026-08-04", "10:05:00")
            .await
            .unwrap();

        let recent = store.recent_visitors(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        // Newest first.
        assert_eq!(recent[0].name, "erin");
        assert_eq!(recent[0].status, "Denied");
        assert_eq!(recent[1].name, "carol");
        assert_eq!(recent[1].whom, "dave");
    }

    #[tokio::test]
    async fn test_recent_attendance_limit() {
        let store = Store::open_in_memory().await.unwrap();
        for day in 1..=5 {
            store
                .mark_if_absent("alice", &format!("2026-08-0{day}"), "09:00:00")
                .await
                .unwrap();
        }
        let recent = store.recent_attendance(3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].date, "2026-08-05");
    }
}
