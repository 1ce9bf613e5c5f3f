//! Papers schema, derived from the stage descriptors.

use crate::criteria::ALL_DESCRIPTORS;
use crate::models::DatabaseError;
use rusqlite::Connection;
use std::collections::HashSet;
use tracing::info;

/// Criteria and score columns, in declaration order.
pub fn stage_columns() -> Vec<String> {
    let mut columns = Vec::new();
    for descriptor in ALL_DESCRIPTORS {
        columns.extend(descriptor.columns());
        columns.push(descriptor.score_column.to_string());
    }
    columns
}

/// Columns an update is allowed to write.
pub fn writable_columns() -> HashSet<String> {
    stage_columns().into_iter().collect()
}

fn create_tables_sql() -> String {
    let stage_columns = stage_columns()
        .iter()
        .map(|column| format!("    {column} INTEGER"))
        .collect::<Vec<_>>()
        .join(",\n");

    format!(
        "CREATE TABLE IF NOT EXISTS papers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    paper_id TEXT NOT NULL UNIQUE,
    paper_url TEXT NOT NULL,
    processing_status TEXT NOT NULL DEFAULT 'downloaded',
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT,
{stage_columns}
);

CREATE TABLE IF NOT EXISTS paper_categories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    paper_id INTEGER NOT NULL REFERENCES papers(id),
    category TEXT NOT NULL,
    UNIQUE(paper_id, category)
);

CREATE INDEX IF NOT EXISTS idx_papers_processing_status ON papers(processing_status);
CREATE INDEX IF NOT EXISTS idx_paper_categories_category ON paper_categories(category);"
    )
}

pub(crate) fn configure_pragmas(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA foreign_keys=ON;",
    )?;
    Ok(())
}

/// Create tables, then add any stage column an older database lacks.
pub(crate) fn initialize(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(&create_tables_sql())?;

    let existing = existing_columns(conn)?;
    for column in stage_columns() {
        if !existing.contains(&column) {
            info!(column = %column, "Adding missing papers column");
            conn.execute_batch(&format!("ALTER TABLE papers ADD COLUMN {column} INTEGER"))?;
        }
    }
    Ok(())
}

fn existing_columns(conn: &Connection) -> Result<HashSet<String>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info('papers')")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(names)
}
