use crate::error::{Result, ShelfError};
use crate::migration;
use crate::record::{from_unix, to_unix, MetadataRecord, ReadingState};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Params, Row};
use std::path::Path;

const SELECT_COLUMNS: &str = "
    path,
    IFNULL(title, ''),
    IFNULL(author, ''),
    IFNULL(year, ''),
    IFNULL(published, ''),
    IFNULL(url, ''),
    IFNULL(doi, ''),
    IFNULL(abstract, ''),
    IFNULL(tag, ''),
    reading_state,
    COALESCE(favorite, 0),
    COALESCE(to_read, 0),
    COALESCE(added_at, 0),
    COALESCE(last_opened_at, 0)
";

const TITLE_ORDER: &str = "LOWER(IFNULL(title, '')), path";

/// The metadata database: one `metadata` row per tracked file, keyed by
/// canonical path, plus the migration log.
pub struct MetadataDb {
    conn: Connection,
}

impl MetadataDb {
    /// Open or create the database at the given path and bring the schema up
    /// to date.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = MetadataDb { conn };
        db.initialize_tables()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = MetadataDb { conn };
        db.initialize_tables()?;
        Ok(db)
    }

    fn initialize_tables(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS metadata (
                path   TEXT PRIMARY KEY,
                title  TEXT,
                author TEXT,
                year   TEXT
            );

            CREATE TABLE IF NOT EXISTS migrations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                description TEXT NOT NULL,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            ",
        )?;
        migration::apply(&self.conn)?;
        self.conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_metadata_last_opened ON metadata(last_opened_at);",
        )?;
        Ok(())
    }

    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| ShelfError::Sqlite(e))
    }

    // ── Records ──────────────────────────────────────────────────────

    /// Exact-match lookup.
    pub fn get(&self, path: &str) -> Result<Option<MetadataRecord>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM metadata WHERE path = ?1");
        let result = self
            .conn
            .query_row(&sql, params![path], record_from_row)
            .optional()?;
        Ok(result)
    }

    /// Insert or fully replace the bibliographic and flag fields of a record.
    /// A stored non-zero `added_at` wins over the incoming one; an incoming
    /// unset `added_at` becomes `now`. `last_opened_at` only moves forward.
    pub fn upsert(&self, record: &MetadataRecord, now: DateTime<Utc>) -> Result<()> {
        let added_at = to_unix(record.added_at.or(Some(now)));
        self.conn.execute(
            "
            INSERT INTO metadata (
                path, title, author, year, published, url, doi, abstract, tag,
                reading_state, favorite, to_read, added_at, last_opened_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ON CONFLICT(path) DO UPDATE SET
                title         = excluded.title,
                author        = excluded.author,
                year          = excluded.year,
                published     = excluded.published,
                url           = excluded.url,
                doi           = excluded.doi,
                abstract      = excluded.abstract,
                tag           = excluded.tag,
                reading_state = excluded.reading_state,
                favorite      = excluded.favorite,
                to_read       = excluded.to_read,
                added_at = CASE
                    WHEN COALESCE(metadata.added_at, 0) = 0 THEN excluded.added_at
                    ELSE metadata.added_at
                END,
                last_opened_at = MAX(COALESCE(metadata.last_opened_at, 0), excluded.last_opened_at)
            ",
            params![
                record.path,
                record.title,
                record.author,
                record.year,
                record.published,
                record.url,
                record.doi,
                record.abstract_text,
                record.tag,
                record.reading_state.as_str(),
                record.favorite,
                record.to_read,
                added_at,
                to_unix(record.last_opened_at),
            ],
        )?;
        Ok(())
    }

    /// Touch `last_opened_at`, creating a default record if needed. Never
    /// writes bibliographic fields. A time at or before the epoch would read
    /// back as "never opened", so it is replaced with the current time.
    pub fn record_opened(&self, path: &str, opened_at: DateTime<Utc>) -> Result<()> {
        let ts = match opened_at.timestamp() {
            ts if ts > 0 => ts,
            _ => Utc::now().timestamp(),
        };
        self.conn.execute(
            "
            INSERT INTO metadata (path, reading_state, added_at, last_opened_at)
            VALUES (?1, ?2, ?3, ?3)
            ON CONFLICT(path) DO UPDATE SET
                last_opened_at = excluded.last_opened_at,
                added_at = CASE
                    WHEN COALESCE(metadata.added_at, 0) = 0 THEN excluded.added_at
                    ELSE metadata.added_at
                END
            ",
            params![path, ReadingState::default().as_str(), ts],
        )?;
        Ok(())
    }

    pub fn list_favorites(&self) -> Result<Vec<MetadataRecord>> {
        self.list_where("COALESCE(favorite, 0) = 1", TITLE_ORDER, [])
    }

    pub fn list_to_read(&self) -> Result<Vec<MetadataRecord>> {
        self.list_where("COALESCE(to_read, 0) = 1", TITLE_ORDER, [])
    }

    /// Rows are matched after normalization, so legacy or garbage values in
    /// `reading_state` are listed as `unread`.
    pub fn list_by_reading_state(&self, state: ReadingState) -> Result<Vec<MetadataRecord>> {
        match state {
            ReadingState::Unread => self.list_where(
                "LOWER(TRIM(IFNULL(reading_state, ''))) NOT IN ('reading', 'read')",
                TITLE_ORDER,
                [],
            ),
            _ => self.list_where(
                "LOWER(TRIM(IFNULL(reading_state, ''))) = ?1",
                TITLE_ORDER,
                params![state.as_str()],
            ),
        }
    }

    /// Most recently opened first; `limit` must already be positive. Limits
    /// beyond `i64::MAX` are clamped.
    pub fn list_recently_opened(&self, limit: usize) -> Result<Vec<MetadataRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM metadata
             WHERE COALESCE(last_opened_at, 0) > 0
             ORDER BY last_opened_at DESC, {TITLE_ORDER}
             LIMIT ?1"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![limit], record_from_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    fn list_where<P: Params>(
        &self,
        condition: &str,
        order: &str,
        params: P,
    ) -> Result<Vec<MetadataRecord>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM metadata WHERE {condition} ORDER BY {order}");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params, record_from_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    pub fn count(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM metadata", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    // ── Path Remapping ───────────────────────────────────────────────

    /// Rewrite the key of a single record. Returns the number of rows moved.
    pub fn move_path(&self, old_path: &str, new_path: &str) -> Result<usize> {
        let moved = self.conn.execute(
            "UPDATE metadata SET path = ?1 WHERE path = ?2",
            params![new_path, old_path],
        )?;
        Ok(moved)
    }

    /// Replace `old_prefix` with `new_prefix` on every key that starts with
    /// it. Both prefixes must already end with a separator. The `LIKE` narrows
    /// the scan with metacharacters escaped; the `substr` comparison keeps the
    /// match case-sensitive, which `LIKE` is not for ASCII.
    pub fn move_tree(&self, old_prefix: &str, new_prefix: &str) -> Result<usize> {
        let prefix_len = old_prefix.chars().count() as i64;
        let pattern = format!("{}%", escape_like(old_prefix));
        let moved = self.conn.execute(
            r"
            UPDATE metadata
               SET path = ?1 || substr(path, ?2)
             WHERE path LIKE ?3 ESCAPE '\'
               AND substr(path, 1, ?4) = ?5
            ",
            params![new_prefix, prefix_len + 1, pattern, prefix_len, old_prefix],
        )?;
        Ok(moved)
    }

    // ── Migrations ───────────────────────────────────────────────────

    /// Descriptions of every applied migration, oldest first.
    pub fn applied_migrations(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT description FROM migrations ORDER BY id")?;
        let rows = stmt.query_map([], |row| row.get(0))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // ── Transaction Support ──────────────────────────────────────────

    pub fn begin_transaction(&self) -> Result<()> {
        self.conn.execute_batch("BEGIN TRANSACTION")?;
        Ok(())
    }

    pub fn commit_transaction(&self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    pub fn rollback_transaction(&self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<MetadataRecord> {
    let reading_state: Option<String> = row.get(9)?;
    Ok(MetadataRecord {
        path: row.get(0)?,
        title: row.get(1)?,
        author: row.get(2)?,
        year: row.get(3)?,
        published: row.get(4)?,
        url: row.get(5)?,
        doi: row.get(6)?,
        abstract_text: row.get(7)?,
        tag: row.get(8)?,
        reading_state: ReadingState::from_stored(reading_state.as_deref()),
        favorite: row.get::<_, i64>(10)? != 0,
        to_read: row.get::<_, i64>(11)? != 0,
        added_at: from_unix(row.get(12)?),
        last_opened_at: from_unix(row.get(13)?),
    })
}

/// Escape `\`, `%` and `_` for a `LIKE ... ESCAPE '\'` pattern.
pub fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn sample(path: &str, title: &str) -> MetadataRecord {
        MetadataRecord {
            path: path.into(),
            title: title.into(),
            author: "Ada Lovelace".into(),
            year: "1843".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_get_missing_is_none() {
        let db = MetadataDb::open_in_memory().unwrap();
        assert!(db.get("/nope.pdf").unwrap().is_none());
    }

    #[test]
    fn test_upsert_then_get() {
        let db = MetadataDb::open_in_memory().unwrap();
        let mut record = sample("/lib/a.pdf", "Notes");
        record.added_at = Some(at(500));
        db.upsert(&record, at(9999)).unwrap();

        assert_eq!(db.get("/lib/a.pdf").unwrap().unwrap(), record);
    }

    #[test]
    fn test_upsert_defaults_added_at_to_now() {
        let db = MetadataDb::open_in_memory().unwrap();
        db.upsert(&sample("/lib/a.pdf", "Notes"), at(1234)).unwrap();
        assert_eq!(db.get("/lib/a.pdf").unwrap().unwrap().added_at, Some(at(1234)));
    }

    #[test]
    fn test_upsert_preserves_existing_added_at() {
        let db = MetadataDb::open_in_memory().unwrap();
        let mut record = sample("/lib/a.pdf", "Notes");
        record.added_at = Some(at(100));
        db.upsert(&record, at(100)).unwrap();

        record.title = "Notes, revised".into();
        record.added_at = Some(at(777));
        db.upsert(&record, at(800)).unwrap();
        record.added_at = None;
        db.upsert(&record, at(900)).unwrap();

        let stored = db.get("/lib/a.pdf").unwrap().unwrap();
        assert_eq!(stored.added_at, Some(at(100)));
        assert_eq!(stored.title, "Notes, revised");
    }

    #[test]
    fn test_upsert_never_rewinds_last_opened() {
        let db = MetadataDb::open_in_memory().unwrap();
        let stale = db_record_after_open(&db, "/lib/a.pdf", 1000);
        db.record_opened("/lib/a.pdf", at(2000)).unwrap();

        db.upsert(&stale, at(3000)).unwrap();
        assert_eq!(db.get("/lib/a.pdf").unwrap().unwrap().last_opened_at, Some(at(2000)));
    }

    fn db_record_after_open(db: &MetadataDb, path: &str, secs: i64) -> MetadataRecord {
        db.record_opened(path, at(secs)).unwrap();
        db.get(path).unwrap().unwrap()
    }

    #[test]
    fn test_record_opened_creates_default_record() {
        let db = MetadataDb::open_in_memory().unwrap();
        let record = db_record_after_open(&db, "/lib/a.pdf", 1000);
        assert_eq!(record.reading_state, ReadingState::Unread);
        assert_eq!(record.added_at, Some(at(1000)));
        assert_eq!(record.last_opened_at, Some(at(1000)));
        assert!(record.title.is_empty());
    }

    #[test]
    fn test_record_opened_keeps_metadata() {
        let db = MetadataDb::open_in_memory().unwrap();
        let mut record = sample("/lib/a.pdf", "X");
        record.favorite = true;
        record.reading_state = ReadingState::Reading;
        record.added_at = Some(at(10));
        db.upsert(&record, at(10)).unwrap();

        db.record_opened("/lib/a.pdf", at(5000)).unwrap();

        let stored = db.get("/lib/a.pdf").unwrap().unwrap();
        assert_eq!(stored.title, "X");
        assert!(stored.favorite);
        assert_eq!(stored.reading_state, ReadingState::Reading);
        assert_eq!(stored.added_at, Some(at(10)));
        assert_eq!(stored.last_opened_at, Some(at(5000)));
    }

    #[test]
    fn test_record_opened_backfills_zero_added_at() {
        let db = MetadataDb::open_in_memory().unwrap();
        db.conn
            .execute("INSERT INTO metadata (path, title, added_at) VALUES ('/lib/a.pdf', 'T', 0)", [])
            .unwrap();
        db.record_opened("/lib/a.pdf", at(42)).unwrap();
        assert_eq!(db.get("/lib/a.pdf").unwrap().unwrap().added_at, Some(at(42)));
    }

    #[test]
    fn test_garbage_reading_state_self_heals() {
        let db = MetadataDb::open_in_memory().unwrap();
        db.conn
            .execute_batch(
                "INSERT INTO metadata (path, reading_state) VALUES ('/lib/a.pdf', 'bogus');
                 INSERT INTO metadata (path, reading_state) VALUES ('/lib/b.pdf', NULL);
                 INSERT INTO metadata (path, reading_state) VALUES ('/lib/c.pdf', ' READ ');",
            )
            .unwrap();

        assert_eq!(db.get("/lib/a.pdf").unwrap().unwrap().reading_state, ReadingState::Unread);
        assert_eq!(db.get("/lib/b.pdf").unwrap().unwrap().reading_state, ReadingState::Unread);
        assert_eq!(db.get("/lib/c.pdf").unwrap().unwrap().reading_state, ReadingState::Read);

        let unread: Vec<String> = db
            .list_by_reading_state(ReadingState::Unread)
            .unwrap()
            .into_iter()
            .map(|r| r.path)
            .collect();
        assert_eq!(unread, vec!["/lib/a.pdf", "/lib/b.pdf"]);
        assert_eq!(db.list_by_reading_state(ReadingState::Read).unwrap().len(), 1);
    }

    #[test]
    fn test_list_order_is_case_insensitive_with_path_tiebreak() {
        let db = MetadataDb::open_in_memory().unwrap();
        for (path, title) in [
            ("/lib/z.pdf", "beta"),
            ("/lib/y.pdf", "Alpha"),
            ("/lib/b.pdf", ""),
            ("/lib/a.pdf", ""),
            ("/lib/x.pdf", "alpha"),
        ] {
            let mut r = sample(path, title);
            r.favorite = true;
            db.upsert(&r, at(1)).unwrap();
        }

        let paths: Vec<String> = db.list_favorites().unwrap().into_iter().map(|r| r.path).collect();
        assert_eq!(
            paths,
            vec!["/lib/a.pdf", "/lib/b.pdf", "/lib/x.pdf", "/lib/y.pdf", "/lib/z.pdf"]
        );
    }

    #[test]
    fn test_list_to_read_filters() {
        let db = MetadataDb::open_in_memory().unwrap();
        let mut r = sample("/lib/a.pdf", "A");
        r.to_read = true;
        db.upsert(&r, at(1)).unwrap();
        db.upsert(&sample("/lib/b.pdf", "B"), at(1)).unwrap();

        let list = db.list_to_read().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].path, "/lib/a.pdf");
        assert!(db.list_favorites().unwrap().is_empty());
    }

    #[test]
    fn test_list_recently_opened_orders_and_limits() {
        let db = MetadataDb::open_in_memory().unwrap();
        db.record_opened("/lib/a.pdf", at(1000)).unwrap();
        db.record_opened("/lib/b.pdf", at(2000)).unwrap();
        db.record_opened("/lib/c.pdf", at(2000)).unwrap();
        db.upsert(&sample("/lib/never.pdf", "Never"), at(1)).unwrap();

        let paths: Vec<String> = db
            .list_recently_opened(10)
            .unwrap()
            .into_iter()
            .map(|r| r.path)
            .collect();
        assert_eq!(paths, vec!["/lib/b.pdf", "/lib/c.pdf", "/lib/a.pdf"]);
        assert_eq!(db.list_recently_opened(1).unwrap()[0].path, "/lib/b.pdf");
    }

    #[test]
    fn test_move_tree_escapes_like_metacharacters() {
        let db = MetadataDb::open_in_memory().unwrap();
        for path in ["/lib/50%_off/a.pdf", "/lib/50xyoff/b.pdf", "/lib/50%_OFF/c.pdf"] {
            db.upsert(&sample(path, "t"), at(1)).unwrap();
        }

        let moved = db.move_tree("/lib/50%_off/", "/lib/sale/").unwrap();
        assert_eq!(moved, 1);
        assert!(db.get("/lib/sale/a.pdf").unwrap().is_some());
        assert!(db.get("/lib/50xyoff/b.pdf").unwrap().is_some());
        assert!(db.get("/lib/50%_OFF/c.pdf").unwrap().is_some());
    }

    #[test]
    fn test_move_tree_handles_backslashes_and_unicode() {
        let db = MetadataDb::open_in_memory().unwrap();
        db.upsert(&sample(r"/lib/caf\é/über.pdf", "t"), at(1)).unwrap();

        assert_eq!(db.move_tree(r"/lib/caf\é/", "/lib/cafe/").unwrap(), 1);
        assert!(db.get("/lib/cafe/über.pdf").unwrap().is_some());
    }

    #[test]
    fn test_move_path_collision_is_constraint_error() {
        let db = MetadataDb::open_in_memory().unwrap();
        db.upsert(&sample("/lib/a.pdf", "A"), at(1)).unwrap();
        db.upsert(&sample("/lib/b.pdf", "B"), at(1)).unwrap();

        assert!(matches!(db.move_path("/lib/a.pdf", "/lib/b.pdf"), Err(ShelfError::Sqlite(_))));
        assert_eq!(db.get("/lib/a.pdf").unwrap().unwrap().title, "A");
    }

    #[test]
    fn test_transaction_rollback() {
        let db = MetadataDb::open_in_memory().unwrap();
        db.begin_transaction().unwrap();
        db.upsert(&sample("/lib/a.pdf", "A"), at(1)).unwrap();
        db.rollback_transaction().unwrap();
        assert!(db.get("/lib/a.pdf").unwrap().is_none());
        assert_eq!(db.count().unwrap(), 0);
    }

    #[test]
    fn test_fresh_database_logs_migrations() {
        let db = MetadataDb::open_in_memory().unwrap();
        assert_eq!(db.applied_migrations().unwrap().len(), migration::METADATA_COLUMNS.len());
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like(r"a%b_c\d"), r"a\%b\_c\\d");
    }
}
