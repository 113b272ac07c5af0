use crate::canonical::normalize_lexically;
use crate::context::OpContext;
use crate::error::{Result, ShelfError};
use crate::metadata_db::MetadataDb;
use crate::record::{MetadataRecord, ReadingState};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use std::sync::{Mutex, MutexGuard};

/// Used when a caller asks for a non-positive number of recent records.
pub const DEFAULT_RECENT_LIMIT: usize = 20;

/// The metadata store.
///
/// Owns the database connection behind a mutex so at most one caller touches
/// it at a time; a `Store` can be shared by reference across threads. Keys are
/// taken as given: callers canonicalize with [`crate::canonical_path`] first.
pub struct Store {
    db: Mutex<MetadataDb>,
    path: Option<PathBuf>,
}

impl Store {
    /// Open (or create) the store at `db_path`, creating the parent directory
    /// and migrating the schema.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = MetadataDb::open(db_path)?;
        log::debug!("Opened metadata store at {}", db_path.display());
        Ok(Store {
            db: Mutex::new(db),
            path: Some(db_path.to_path_buf()),
        })
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        Ok(Store {
            db: Mutex::new(MetadataDb::open_in_memory()?),
            path: None,
        })
    }

    /// Database file path, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Release the connection.
    pub fn close(self) -> Result<()> {
        let db = self
            .db
            .into_inner()
            .map_err(|_| ShelfError::Other("metadata store lock poisoned".into()))?;
        db.close()
    }

    fn db(&self) -> Result<MutexGuard<'_, MetadataDb>> {
        self.db
            .lock()
            .map_err(|_| ShelfError::Other("metadata store lock poisoned".into()))
    }

    // ── Record Store ─────────────────────────────────────────────────

    /// Exact-match lookup. A miss is `Ok(None)`.
    pub fn get(&self, ctx: &OpContext, path: &str) -> Result<Option<MetadataRecord>> {
        ctx.check()?;
        self.db()?.get(path)
    }

    /// Insert or fully replace a record. See [`MetadataDb::upsert`] for the
    /// `added_at` and `last_opened_at` rules.
    pub fn upsert(&self, ctx: &OpContext, record: &MetadataRecord) -> Result<()> {
        ctx.check()?;
        require_path("record path", &record.path)?;
        self.db()?.upsert(record, Utc::now())?;
        log::debug!("Upserted metadata for {}", record.path);
        Ok(())
    }

    /// Mark `path` as opened at `opened_at` without touching its metadata.
    pub fn record_opened(
        &self,
        ctx: &OpContext,
        path: &str,
        opened_at: DateTime<Utc>,
    ) -> Result<()> {
        ctx.check()?;
        require_path("path", path)?;
        self.db()?.record_opened(path, opened_at)
    }

    pub fn list_by_reading_state(
        &self,
        ctx: &OpContext,
        state: ReadingState,
    ) -> Result<Vec<MetadataRecord>> {
        ctx.check()?;
        self.db()?.list_by_reading_state(state)
    }

    pub fn list_favorites(&self, ctx: &OpContext) -> Result<Vec<MetadataRecord>> {
        ctx.check()?;
        self.db()?.list_favorites()
    }

    pub fn list_to_read(&self, ctx: &OpContext) -> Result<Vec<MetadataRecord>> {
        ctx.check()?;
        self.db()?.list_to_read()
    }

    /// Up to `limit` opened records, most recent first. A non-positive limit
    /// means [`DEFAULT_RECENT_LIMIT`].
    pub fn list_recently_opened(&self, ctx: &OpContext, limit: i64) -> Result<Vec<MetadataRecord>> {
        ctx.check()?;
        let limit = if limit <= 0 {
            DEFAULT_RECENT_LIMIT
        } else {
            usize::try_from(limit).unwrap_or(usize::MAX)
        };
        self.db()?.list_recently_opened(limit)
    }

    pub fn count(&self, ctx: &OpContext) -> Result<usize> {
        ctx.check()?;
        self.db()?.count()
    }

    pub fn applied_migrations(&self, ctx: &OpContext) -> Result<Vec<String>> {
        ctx.check()?;
        self.db()?.applied_migrations()
    }

    // ── Path Remapping ───────────────────────────────────────────────

    /// Move the record at `old_path` to `new_path`, leaving every other field
    /// as it was. Equal paths and a missing record are no-ops. Returns the
    /// number of records moved.
    pub fn move_path(&self, ctx: &OpContext, old_path: &str, new_path: &str) -> Result<usize> {
        ctx.check()?;
        require_path("old path", old_path)?;
        require_path("new path", new_path)?;
        if old_path == new_path {
            return Ok(0);
        }
        let moved = self.db()?.move_path(old_path, new_path)?;
        if moved > 0 {
            log::info!("Moved metadata {old_path} -> {new_path}");
        }
        Ok(moved)
    }

    /// Re-key every record under `old_dir` to live under `new_dir`, keeping
    /// the path relative to the directory. Returns the number of records
    /// moved.
    pub fn move_tree(&self, ctx: &OpContext, old_dir: &str, new_dir: &str) -> Result<usize> {
        ctx.check()?;
        let old_prefix = normalize_dir_prefix(old_dir)?;
        let new_prefix = normalize_dir_prefix(new_dir)?;
        if old_prefix == new_prefix {
            return Ok(0);
        }
        let moved = self.db()?.move_tree(&old_prefix, &new_prefix)?;
        log::info!("Moved {moved} metadata record(s) {old_prefix} -> {new_prefix}");
        Ok(moved)
    }

    /// Apply a rename of a library entry to the store in one transaction:
    /// descendants then the entry itself for directories, the single record
    /// for files. Returns the number of records moved.
    pub fn relocate(
        &self,
        ctx: &OpContext,
        old_path: &str,
        new_path: &str,
        is_dir: bool,
    ) -> Result<usize> {
        ctx.check()?;
        require_path("old path", old_path)?;
        require_path("new path", new_path)?;
        let prefixes = if is_dir {
            Some((normalize_dir_prefix(old_path)?, normalize_dir_prefix(new_path)?))
        } else {
            None
        };
        if old_path == new_path {
            return Ok(0);
        }

        let db = self.db()?;
        db.begin_transaction()?;
        let result = (|| -> Result<usize> {
            let mut moved = 0;
            if let Some((old_prefix, new_prefix)) = &prefixes {
                moved += db.move_tree(old_prefix, new_prefix)?;
            }
            moved += db.move_path(old_path, new_path)?;
            Ok(moved)
        })();

        match result {
            Ok(moved) => {
                db.commit_transaction()?;
                log::info!("Relocated {moved} metadata record(s) {old_path} -> {new_path}");
                Ok(moved)
            }
            Err(e) => {
                if let Err(rollback) = db.rollback_transaction() {
                    log::warn!("Rollback after failed relocation failed: {rollback}");
                }
                Err(e)
            }
        }
    }
}

fn require_path(what: &str, path: &str) -> Result<()> {
    if path.trim().is_empty() {
        return Err(ShelfError::InvalidInput(format!("{what} must not be empty")));
    }
    Ok(())
}

/// Clean a directory path and give it exactly one trailing separator, so
/// prefix matching respects directory boundaries (`/a/b/` never matches
/// `/a/bc/`). Empty and `.` inputs are rejected: as a prefix they would match
/// every record.
pub fn normalize_dir_prefix(path: &str) -> Result<String> {
    if path.trim().is_empty() {
        return Err(ShelfError::InvalidInput(format!("directory {path:?} must not be empty")));
    }
    let cleaned = normalize_lexically(Path::new(path));
    if cleaned.as_os_str() == "." {
        return Err(ShelfError::InvalidInput(format!("directory {path:?} must not be empty")));
    }
    let mut prefix = cleaned.to_string_lossy().into_owned();
    if !prefix.ends_with(MAIN_SEPARATOR) {
        prefix.push(MAIN_SEPARATOR);
    }
    Ok(prefix)
}
