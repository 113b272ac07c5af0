use crate::error::{Result, ShelfError};
use rusqlite::{params, Connection, OpenFlags};
use std::collections::HashSet;
use std::path::Path;

/// An additive column change for the `metadata` table.
///
/// Migrations are applied in order on every open. A column that is already
/// present is the normal steady state and is skipped; presence is read from
/// `pragma_table_info`, never inferred from an error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnMigration {
    pub column: &'static str,
    pub definition: &'static str,
}

/// Columns added after the original `path, title, author, year` table, in the
/// order they were introduced.
pub const METADATA_COLUMNS: &[ColumnMigration] = &[
    ColumnMigration { column: "favorite", definition: "INTEGER DEFAULT 0" },
    ColumnMigration { column: "to_read", definition: "INTEGER DEFAULT 0" },
    ColumnMigration { column: "reading_state", definition: "TEXT DEFAULT ''" },
    ColumnMigration { column: "published", definition: "TEXT DEFAULT ''" },
    ColumnMigration { column: "url", definition: "TEXT DEFAULT ''" },
    ColumnMigration { column: "doi", definition: "TEXT DEFAULT ''" },
    ColumnMigration { column: "abstract", definition: "TEXT DEFAULT ''" },
    ColumnMigration { column: "tag", definition: "TEXT DEFAULT ''" },
    ColumnMigration { column: "added_at", definition: "INTEGER DEFAULT 0" },
    ColumnMigration { column: "last_opened_at", definition: "INTEGER DEFAULT 0" },
];

impl ColumnMigration {
    fn statement(&self) -> String {
        format!(
            "ALTER TABLE metadata ADD COLUMN {} {}",
            self.column, self.definition
        )
    }

    /// Human-readable description, also stored in the `migrations` table.
    pub fn describe(&self) -> String {
        format!("Column 'metadata.{}' added ({})", self.column, self.definition)
    }
}

/// Column names currently present on `table`.
pub fn existing_columns(conn: &Connection, table: &str) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1)")?;
    let rows = stmt.query_map(params![table], |row| row.get::<_, String>(0))?;

    let mut columns = HashSet::new();
    for row in rows {
        columns.insert(row?);
    }
    Ok(columns)
}

/// Migrations whose column is not in `existing`, in application order.
pub fn pending(existing: &HashSet<String>) -> Vec<&'static ColumnMigration> {
    METADATA_COLUMNS
        .iter()
        .filter(|m| !existing.contains(m.column))
        .collect()
}

/// Add every missing column. Each column is its own statement, so a failure
/// part-way leaves the already-added columns in place and the next call picks
/// up the rest.
pub fn apply(conn: &Connection) -> Result<Vec<&'static ColumnMigration>> {
    let existing = existing_columns(conn, "metadata")?;
    let todo = pending(&existing);

    for migration in &todo {
        conn.execute_batch(&migration.statement()).map_err(|e| {
            ShelfError::Migration(format!("adding column '{}': {e}", migration.column))
        })?;
        conn.execute(
            "INSERT INTO migrations (description) VALUES (?1)",
            params![migration.describe()],
        )?;
        log::info!("{}", migration.describe());
    }

    Ok(todo)
}

/// Report pending migrations of an on-disk database without changing it.
/// A database file that does not exist yet reports nothing pending; `open`
/// creates it at the current schema.
pub fn inspect(db_path: &Path) -> Result<Vec<&'static ColumnMigration>> {
    if !db_path.exists() {
        return Ok(Vec::new());
    }
    let conn = Connection::open_with_flags(db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let existing = existing_columns(&conn, "metadata")?;
    if existing.is_empty() {
        return Ok(METADATA_COLUMNS.iter().collect());
    }
    Ok(pending(&existing))
}
