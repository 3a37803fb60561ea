use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::release::models::{NewRelease, NewStream, Release, ReleaseSignoff, Stream};
use crate::release::store::ReleaseStore;

/// Async-safe handle to the release database.
///
/// Wraps `SideloaderDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, preventing synchronous SQLite
/// I/O from tying up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<SideloaderDb>>,
}

impl DbHandle {
    pub fn new(db: SideloaderDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&SideloaderDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. Only for callers that are
    /// not on the async runtime, which today means tests.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, SideloaderDb>> {
        self.inner
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))
    }
}

/// One connection to the release database.
///
/// Every connection gets its own dispatcher instance id; release claims are
/// taken and renewed under that id.
pub struct SideloaderDb {
    conn: Connection,
    instance_id: String,
}

impl SideloaderDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        Self::from_connection(conn)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn,
            instance_id: Uuid::new_v4().simple().to_string(),
        };
        db.init()?;
        Ok(db)
    }

    /// Dispatcher id recorded on the claims this connection takes.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        // Another process (CLI next to a running server) may hold the write lock briefly.
        self.conn
            .busy_timeout(std::time::Duration::from_secs(5))
            .context("Failed to set busy timeout")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS streams (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    require_signoff INTEGER NOT NULL DEFAULT 0,
                    signoff_list TEXT NOT NULL DEFAULT '',
                    quorum INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS releases (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    stream_id INTEGER NOT NULL REFERENCES streams(id) ON DELETE CASCADE,
                    build_id INTEGER NOT NULL,
                    release_date TEXT NOT NULL,
                    scheduled_at TEXT,
                    waiting INTEGER NOT NULL DEFAULT 1,
                    locked INTEGER NOT NULL DEFAULT 0,
                    claimed_by TEXT
                );

                CREATE TABLE IF NOT EXISTS release_signoffs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    release_id INTEGER NOT NULL REFERENCES releases(id) ON DELETE CASCADE,
                    signature TEXT NOT NULL,
                    token TEXT NOT NULL UNIQUE,
                    signed INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS dispatchers (
                    instance_id TEXT PRIMARY KEY,
                    heartbeat_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_releases_stream ON releases(stream_id);
                CREATE INDEX IF NOT EXISTS idx_releases_pending ON releases(waiting, locked);
                CREATE INDEX IF NOT EXISTS idx_signoffs_release ON release_signoffs(release_id);
                ",
            )
            .context("Failed to create tables")?;

        // Databases created before claims had owners.
        match self
            .conn
            .execute("ALTER TABLE releases ADD COLUMN claimed_by TEXT", [])
        {
            Ok(_) => {}
            Err(e) if e.to_string().contains("duplicate column") => {}
            Err(e) => return Err(anyhow::anyhow!("Failed to add claimed_by column: {}", e)),
        }
        Ok(())
    }

    pub fn list_streams(&self) -> Result<Vec<Stream>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, name, require_signoff, signoff_list, quorum FROM streams ORDER BY name",
            )
            .context("Failed to prepare list_streams")?;
        let streams = stmt
            .query_map([], row_to_stream)
            .context("Failed to query streams")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read stream rows")?;
        Ok(streams)
    }

    fn query_releases(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Release>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .context("Failed to prepare release query")?;
        let rows = stmt
            .query_map(params, ReleaseRow::from_row)
            .context("Failed to query releases")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read release rows")?;
        rows.into_iter().map(ReleaseRow::into_release).collect()
    }
}

const RELEASE_COLUMNS: &str =
    "id, stream_id, build_id, release_date, scheduled_at, waiting, locked";

fn row_to_stream(row: &rusqlite::Row<'_>) -> rusqlite::Result<Stream> {
    Ok(Stream {
        id: row.get(0)?,
        name: row.get(1)?,
        require_signoff: row.get(2)?,
        signoff_list: row.get(3)?,
        quorum: row.get(4)?,
    })
}

fn row_to_signoff(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReleaseSignoff> {
    Ok(ReleaseSignoff {
        id: row.get(0)?,
        release_id: row.get(1)?,
        signature: row.get(2)?,
        token: row.get(3)?,
        signed: row.get(4)?,
    })
}

/// Raw release row; timestamps are stored as RFC 3339 text.
struct ReleaseRow {
    id: i64,
    stream_id: i64,
    build_id: i64,
    release_date: String,
    scheduled_at: Option<String>,
    waiting: bool,
    locked: bool,
}

impl ReleaseRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            stream_id: row.get(1)?,
            build_id: row.get(2)?,
            release_date: row.get(3)?,
            scheduled_at: row.get(4)?,
            waiting: row.get(5)?,
            locked: row.get(6)?,
        })
    }

    fn into_release(self) -> Result<Release> {
        Ok(Release {
            id: self.id,
            stream_id: self.stream_id,
            build_id: self.build_id,
            release_date: parse_timestamp(&self.release_date)?,
            scheduled_at: self
                .scheduled_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
            waiting: self.waiting,
            locked: self.locked,
        })
    }
}

/// Fixed-width RFC 3339 so stored timestamps sort lexically.
fn format_timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("Invalid timestamp in database: {}", s))?
        .with_timezone(&Utc))
}

impl ReleaseStore for SideloaderDb {
    fn create_stream(&self, stream: &NewStream) -> Result<Stream> {
        self.conn
            .execute(
                "INSERT INTO streams (name, require_signoff, signoff_list, quorum) VALUES (?1, ?2, ?3, ?4)",
                params![
                    stream.name,
                    stream.require_signoff,
                    stream.signoff_list,
                    stream.quorum
                ],
            )
            .context("Failed to insert stream")?;
        let id = self.conn.last_insert_rowid();
        self.get_stream(id)?.context("Stream not found after insert")
    }

    fn get_stream(&self, id: i64) -> Result<Option<Stream>> {
        self.conn
            .query_row(
                "SELECT id, name, require_signoff, signoff_list, quorum FROM streams WHERE id = ?1",
                params![id],
                row_to_stream,
            )
            .optional()
            .context("Failed to query stream")
    }

    fn update_stream(&self, id: i64, stream: &NewStream) -> Result<Option<Stream>> {
        let count = self
            .conn
            .execute(
                "UPDATE streams SET name = ?1, require_signoff = ?2, signoff_list = ?3, quorum = ?4 WHERE id = ?5",
                params![
                    stream.name,
                    stream.require_signoff,
                    stream.signoff_list,
                    stream.quorum,
                    id
                ],
            )
            .context("Failed to update stream")?;
        if count == 0 {
            return Ok(None);
        }
        self.get_stream(id)
    }

    fn delete_stream(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM streams WHERE id = ?1", params![id])
            .context("Failed to delete stream")?;
        Ok(count > 0)
    }

    fn create_release(&self, release: &NewRelease) -> Result<Release> {
        self.conn
            .execute(
                "INSERT INTO releases (stream_id, build_id, release_date, scheduled_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    release.stream_id,
                    release.build_id,
                    format_timestamp(Utc::now()),
                    release.scheduled_at.map(format_timestamp)
                ],
            )
            .context("Failed to insert release")?;
        let id = self.conn.last_insert_rowid();
        self.get_release(id)?.context("Release not found after insert")
    }

    fn get_release(&self, id: i64) -> Result<Option<Release>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM releases WHERE id = ?1", RELEASE_COLUMNS),
                params![id],
                ReleaseRow::from_row,
            )
            .optional()
            .context("Failed to query release")?;
        row.map(ReleaseRow::into_release).transpose()
    }

    fn list_stream_releases(&self, stream_id: i64, limit: i64) -> Result<Vec<Release>> {
        self.query_releases(
            &format!(
                "SELECT {} FROM releases WHERE stream_id = ?1 ORDER BY release_date DESC, id DESC LIMIT ?2",
                RELEASE_COLUMNS
            ),
            params![stream_id, limit],
        )
    }

    fn list_unclaimed_waiting(&self) -> Result<Vec<Release>> {
        self.query_releases(
            &format!(
                "SELECT {} FROM releases WHERE waiting = 1 AND locked = 0 ORDER BY id",
                RELEASE_COLUMNS
            ),
            [],
        )
    }

    fn delete_release(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM releases WHERE id = ?1", params![id])
            .context("Failed to delete release")?;
        Ok(count > 0)
    }

    fn create_signoff(
        &self,
        release_id: i64,
        signature: &str,
        token: &str,
    ) -> Result<ReleaseSignoff> {
        self.conn
            .execute(
                "INSERT INTO release_signoffs (release_id, signature, token) VALUES (?1, ?2, ?3)",
                params![release_id, signature, token],
            )
            .context("Failed to insert sign-off")?;
        Ok(ReleaseSignoff {
            id: self.conn.last_insert_rowid(),
            release_id,
            signature: signature.to_string(),
            token: token.to_string(),
            signed: false,
        })
    }

    fn get_signoff_by_token(&self, token: &str) -> Result<Option<ReleaseSignoff>> {
        self.conn
            .query_row(
                "SELECT id, release_id, signature, token, signed FROM release_signoffs WHERE token = ?1",
                params![token],
                row_to_signoff,
            )
            .optional()
            .context("Failed to query sign-off")
    }

    fn list_signoffs(&self, release_id: i64) -> Result<Vec<ReleaseSignoff>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, release_id, signature, token, signed FROM release_signoffs WHERE release_id = ?1 ORDER BY id",
            )
            .context("Failed to prepare list_signoffs")?;
        let signoffs = stmt
            .query_map(params![release_id], row_to_signoff)
            .context("Failed to query sign-offs")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read sign-off rows")?;
        Ok(signoffs)
    }

    fn mark_signed(&self, signoff_id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute(
                "UPDATE release_signoffs SET signed = 1 WHERE id = ?1 AND signed = 0",
                params![signoff_id],
            )
            .context("Failed to mark sign-off signed")?;
        Ok(count > 0)
    }

    fn count_signed(&self, release_id: i64) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM release_signoffs WHERE release_id = ?1 AND signed = 1",
                params![release_id],
                |row| row.get(0),
            )
            .context("Failed to count sign-offs")
    }

    fn try_claim(&self, release_id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute(
                "UPDATE releases SET locked = 1, claimed_by = ?2 WHERE id = ?1 AND waiting = 1 AND locked = 0",
                params![release_id, self.instance_id],
            )
            .context("Failed to claim release")?;
        Ok(count == 1)
    }

    fn holds_claim(&self, release_id: i64) -> Result<bool> {
        let held = self
            .conn
            .query_row(
                "SELECT 1 FROM releases WHERE id = ?1 AND waiting = 1 AND locked = 1 AND claimed_by = ?2",
                params![release_id, self.instance_id],
                |_| Ok(()),
            )
            .optional()
            .context("Failed to check release claim")?;
        Ok(held.is_some())
    }

    fn release_claim(&self, release_id: i64) -> Result<()> {
        self.conn
            .execute(
                "UPDATE releases SET locked = 0, claimed_by = NULL WHERE id = ?1 AND waiting = 1 AND claimed_by = ?2",
                params![release_id, self.instance_id],
            )
            .context("Failed to release claim")?;
        Ok(())
    }

    fn heartbeat(&self, at: DateTime<Utc>) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO dispatchers (instance_id, heartbeat_at) VALUES (?1, ?2)
                 ON CONFLICT(instance_id) DO UPDATE SET heartbeat_at = excluded.heartbeat_at",
                params![self.instance_id, format_timestamp(at)],
            )
            .context("Failed to record dispatcher heartbeat")?;
        Ok(())
    }

    fn reclaim_stale_claims(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let cutoff = format_timestamp(cutoff);
        let cleared = self
            .conn
            .execute(
                "UPDATE releases SET locked = 0, claimed_by = NULL
                 WHERE waiting = 1 AND locked = 1
                   AND claimed_by IS NOT ?1
                   AND (claimed_by IS NULL OR claimed_by NOT IN
                        (SELECT instance_id FROM dispatchers WHERE heartbeat_at >= ?2))",
                params![self.instance_id, cutoff],
            )
            .context("Failed to reclaim stale release claims")?;
        self.conn
            .execute(
                "DELETE FROM dispatchers WHERE heartbeat_at < ?2 AND instance_id != ?1",
                params![self.instance_id, cutoff],
            )
            .context("Failed to prune dispatchers")?;
        Ok(cleared)
    }

    fn mark_deployed(&self, release_id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute(
                "UPDATE releases SET waiting = 0, locked = 0, claimed_by = NULL WHERE id = ?1 AND waiting = 1",
                params![release_id],
            )
            .context("Failed to mark release deployed")?;
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn stream(db: &SideloaderDb) -> Stream {
        db.create_stream(&NewStream {
            name: "production".into(),
            require_signoff: true,
            signoff_list: "a@x.io, b@x.io".into(),
            quorum: 0,
        })
        .unwrap()
    }

    fn release(db: &SideloaderDb, stream_id: i64) -> Release {
        db.create_release(&NewRelease {
            stream_id,
            build_id: 17,
            scheduled_at: None,
        })
        .unwrap()
    }

    #[test]
    fn test_create_database_and_run_migrations() -> Result<()> {
        let db = SideloaderDb::new_in_memory()?;

        let table_count: i32 = db.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('streams', 'releases', 'release_signoffs')",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(table_count, 3, "Expected 3 tables to exist");

        // Migrations are idempotent
        db.run_migrations()?;
        Ok(())
    }

    #[test]
    fn test_database_file_reopens() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("sideloader.db");
        let id = {
            let db = SideloaderDb::new(&path)?;
            stream(&db).id
        };
        let db = SideloaderDb::new(&path)?;
        assert!(db.get_stream(id)?.is_some());
        Ok(())
    }

    #[test]
    fn test_stream_round_trip() -> Result<()> {
        let db = SideloaderDb::new_in_memory()?;
        let s = stream(&db);
        assert!(s.id > 0);
        assert!(s.require_signoff);
        assert_eq!(db.get_stream(s.id)?, Some(s));
        assert_eq!(db.get_stream(999)?, None);
        assert_eq!(db.list_streams()?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_release_defaults_and_schedule() -> Result<()> {
        let db = SideloaderDb::new_in_memory()?;
        let s = stream(&db);
        let r = release(&db, s.id);
        assert!(r.waiting);
        assert!(!r.locked);
        assert_eq!(r.scheduled_at, None);

        let at = Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap();
        let scheduled = db.create_release(&NewRelease {
            stream_id: s.id,
            build_id: 18,
            scheduled_at: Some(at),
        })?;
        assert_eq!(db.get_release(scheduled.id)?.unwrap().scheduled_at, Some(at));
        Ok(())
    }

    #[test]
    fn test_release_requires_existing_stream() {
        let db = SideloaderDb::new_in_memory().unwrap();
        assert!(
            db.create_release(&NewRelease {
                stream_id: 42,
                build_id: 1,
                scheduled_at: None,
            })
            .is_err()
        );
    }

    #[test]
    fn test_list_stream_releases_newest_first() -> Result<()> {
        let db = SideloaderDb::new_in_memory()?;
        let s = stream(&db);
        let ids: Vec<i64> = (0..4).map(|_| release(&db, s.id).id).collect();
        let listed: Vec<i64> = db
            .list_stream_releases(s.id, 3)?
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(listed, vec![ids[3], ids[2], ids[1]]);
        Ok(())
    }

    #[test]
    fn test_signoffs_count_only_signed() -> Result<()> {
        let db = SideloaderDb::new_in_memory()?;
        let s = stream(&db);
        let r = release(&db, s.id);
        let a = db.create_signoff(r.id, "a@x.io", "tok-a")?;
        db.create_signoff(r.id, "b@x.io", "tok-b")?;
        assert_eq!(db.count_signed(r.id)?, 0);

        assert!(db.mark_signed(a.id)?);
        assert!(!db.mark_signed(a.id)?);
        assert_eq!(db.count_signed(r.id)?, 1);

        let fetched = db.get_signoff_by_token("tok-a")?.unwrap();
        assert!(fetched.signed);
        assert_eq!(db.get_signoff_by_token("nope")?, None);
        assert_eq!(db.list_signoffs(r.id)?.len(), 2);
        Ok(())
    }

    #[test]
    fn test_duplicate_token_rejected() -> Result<()> {
        let db = SideloaderDb::new_in_memory()?;
        let s = stream(&db);
        let r = release(&db, s.id);
        db.create_signoff(r.id, "a@x.io", "same")?;
        assert!(db.create_signoff(r.id, "b@x.io", "same").is_err());
        Ok(())
    }

    #[test]
    fn test_claim_is_exclusive() -> Result<()> {
        let db = SideloaderDb::new_in_memory()?;
        let s = stream(&db);
        let r = release(&db, s.id);

        assert!(db.try_claim(r.id)?);
        assert!(!db.try_claim(r.id)?);
        assert!(db.list_unclaimed_waiting()?.is_empty());

        assert!(db.holds_claim(r.id)?);

        db.release_claim(r.id)?;
        assert!(!db.holds_claim(r.id)?);
        assert_eq!(db.list_unclaimed_waiting()?.len(), 1);
        assert!(db.try_claim(r.id)?);
        Ok(())
    }

    #[test]
    fn test_own_claims_survive_reclaim() -> Result<()> {
        let db = SideloaderDb::new_in_memory()?;
        let s = stream(&db);
        let r = release(&db, s.id);
        assert!(db.try_claim(r.id)?);

        // No heartbeat at all, yet the claim is ours.
        assert_eq!(db.reclaim_stale_claims(Utc::now())?, 0);
        assert!(db.holds_claim(r.id)?);
        Ok(())
    }

    #[test]
    fn test_reclaim_respects_heartbeats() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("sideloader.db");
        let owner = SideloaderDb::new(&path)?;
        let other = SideloaderDb::new(&path)?;
        assert_ne!(owner.instance_id(), other.instance_id());

        let s = stream(&owner);
        let r = release(&owner, s.id);
        let t0 = Utc.with_ymd_and_hms(2030, 1, 1, 12, 0, 0).unwrap();
        owner.heartbeat(t0)?;
        assert!(owner.try_claim(r.id)?);

        // Another instance can neither take nor drop the claim.
        assert!(!other.try_claim(r.id)?);
        other.release_claim(r.id)?;
        assert!(owner.holds_claim(r.id)?);

        assert_eq!(other.reclaim_stale_claims(t0 - chrono::Duration::seconds(1))?, 0);
        assert!(owner.holds_claim(r.id)?);

        assert_eq!(other.reclaim_stale_claims(t0 + chrono::Duration::seconds(1))?, 1);
        assert!(!owner.holds_claim(r.id)?);
        assert!(other.try_claim(r.id)?);
        Ok(())
    }

    #[test]
    fn test_heartbeat_upserts() -> Result<()> {
        let db = SideloaderDb::new_in_memory()?;
        let t0 = Utc.with_ymd_and_hms(2030, 1, 1, 12, 0, 0).unwrap();
        db.heartbeat(t0)?;
        db.heartbeat(t0 + chrono::Duration::seconds(30))?;
        let (rows, latest): (i64, String) = db.conn.query_row(
            "SELECT COUNT(*), MAX(heartbeat_at) FROM dispatchers",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        assert_eq!(rows, 1);
        assert_eq!(parse_timestamp(&latest)?, t0 + chrono::Duration::seconds(30));
        Ok(())
    }

    #[test]
    fn test_claimed_by_added_to_old_schema() -> Result<()> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "CREATE TABLE releases (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                stream_id INTEGER NOT NULL,
                build_id INTEGER NOT NULL,
                release_date TEXT NOT NULL,
                scheduled_at TEXT,
                waiting INTEGER NOT NULL DEFAULT 1,
                locked INTEGER NOT NULL DEFAULT 0
            );",
        )?;
        let db = SideloaderDb::from_connection(conn)?;
        let has_column: i64 = db.conn.query_row(
            "SELECT COUNT(*) FROM pragma_table_info('releases') WHERE name = 'claimed_by'",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(has_column, 1);
        Ok(())
    }

    #[test]
    fn test_deployed_release_cannot_be_claimed() -> Result<()> {
        let db = SideloaderDb::new_in_memory()?;
        let s = stream(&db);
        let r = release(&db, s.id);
        assert!(db.try_claim(r.id)?);
        assert!(db.mark_deployed(r.id)?);
        assert!(!db.mark_deployed(r.id)?);

        let deployed = db.get_release(r.id)?.unwrap();
        assert!(!deployed.waiting);
        assert!(!deployed.locked);
        assert!(!db.try_claim(r.id)?);
        assert!(!db.holds_claim(r.id)?);
        Ok(())
    }

    #[test]
    fn test_update_stream_replaces_policy() -> Result<()> {
        let db = SideloaderDb::new_in_memory()?;
        let s = stream(&db);
        let updated = db
            .update_stream(
                s.id,
                &NewStream {
                    name: "prod-eu".into(),
                    require_signoff: true,
                    signoff_list: "a@x.io b@x.io c@x.io".into(),
                    quorum: 2,
                },
            )?
            .unwrap();
        assert_eq!(updated.id, s.id);
        assert_eq!(updated.name, "prod-eu");
        assert_eq!(updated.quorum, 2);
        assert_eq!(db.update_stream(999, &NewStream::default())?, None);
        Ok(())
    }

    #[test]
    fn test_delete_stream_cascades_releases_and_signoffs() -> Result<()> {
        let db = SideloaderDb::new_in_memory()?;
        let s = stream(&db);
        let r = release(&db, s.id);
        db.create_signoff(r.id, "a@x.io", "tok")?;

        assert!(db.delete_stream(s.id)?);
        assert!(!db.delete_stream(s.id)?);
        assert_eq!(db.get_release(r.id)?, None);
        assert_eq!(db.get_signoff_by_token("tok")?, None);
        Ok(())
    }

    #[test]
    fn test_delete_release_cascades_signoffs() -> Result<()> {
        let db = SideloaderDb::new_in_memory()?;
        let s = stream(&db);
        let r = release(&db, s.id);
        db.create_signoff(r.id, "a@x.io", "tok")?;
        assert!(db.delete_release(r.id)?);
        assert!(!db.delete_release(r.id)?);
        assert_eq!(db.get_signoff_by_token("tok")?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_handle_call_runs_on_blocking_pool() -> Result<()> {
        let handle = DbHandle::new(SideloaderDb::new_in_memory()?);
        let created = handle
            .call(|db| {
                db.create_stream(&NewStream {
                    name: "staging".into(),
                    ..Default::default()
                })
            })
            .await?;
        let fetched = handle.call(move |db| db.get_stream(created.id)).await?;
        assert_eq!(fetched.map(|s| s.name), Some("staging".to_string()));
        Ok(())
    }
}
