//! SQLite-backed pipeline state store.
//!
//! One process, one writer: reads and per-paper updates are separate
//! statements with no row locking, so stage runners must not overlap on the
//! same status.

use super::schema;
use crate::criteria::{CriteriaSet, StageDescriptor};
use crate::models::{DatabaseError, DiscoveredPaper, Paper, PaperStatus};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

const PAPER_COLUMNS: &str = "p.id, p.paper_id, p.paper_url, p.processing_status, \
     p.profiler_suitability_score, p.cot_quality_assessment_suitability_score, \
     p.cot_voicing_assessment_suitability_score";

/// Order in which a batch of papers is selected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Ascending surrogate key
    #[default]
    Sequential,
    /// Shuffled by SQLite
    Random,
    /// Round-robin across categories before exhausting any one of them
    CategoryBalanced,
}

impl FromStr for SelectionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sequential" => Ok(Self::Sequential),
            "random" => Ok(Self::Random),
            "category_balanced" | "category-balanced" => Ok(Self::CategoryBalanced),
            other => Err(format!(
                "unknown selection strategy '{other}' (expected sequential, random or category_balanced)"
            )),
        }
    }
}

/// Minimum suitability score a paper needs to be selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreFloor {
    /// Score column on the papers table
    pub column: &'static str,
    pub min: u32,
}

/// Column values written together with a status transition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaperUpdate {
    values: Vec<(String, Value)>,
}

impl PaperUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.push((column.into(), value.into()));
        self
    }

    /// Add every criterion of a stage under its prefixed column.
    pub fn with_criteria(mut self, descriptor: &StageDescriptor, criteria: &CriteriaSet) -> Self {
        for (column, value) in criteria.columns(descriptor) {
            self.values.push((column, Value::Integer(value)));
        }
        self
    }

    pub fn with_score(self, descriptor: &StageDescriptor, score: u32) -> Self {
        self.set(descriptor.score_column, score)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

struct PaperRow {
    id: i64,
    paper_id: String,
    paper_url: String,
    status: String,
    profiler_score: Option<u32>,
    quality_score: Option<u32>,
    voicing_score: Option<u32>,
}

impl PaperRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            paper_id: row.get(1)?,
            paper_url: row.get(2)?,
            status: row.get(3)?,
            profiler_score: row.get(4)?,
            quality_score: row.get(5)?,
            voicing_score: row.get(6)?,
        })
    }

    fn into_paper(self) -> Result<Paper, DatabaseError> {
        let processing_status = self
            .status
            .parse::<PaperStatus>()
            .map_err(|_| DatabaseError::InvalidStatus {
                value: self.status.clone(),
            })?;
        Ok(Paper {
            id: self.id,
            paper_id: self.paper_id,
            paper_url: self.paper_url,
            processing_status,
            profiler_suitability_score: self.profiler_score,
            cot_quality_assessment_suitability_score: self.quality_score,
            cot_voicing_assessment_suitability_score: self.voicing_score,
        })
    }
}

/// Durable record of every paper and its progress.
pub struct PaperStore {
    conn: Connection,
    writable: HashSet<String>,
}

impl PaperStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| DatabaseError::CreateDir {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, DatabaseError> {
        schema::configure_pragmas(&conn)?;
        schema::initialize(&conn)?;
        Ok(Self {
            conn,
            writable: schema::writable_columns(),
        })
    }

    /// Whether any paper is already linked to `category`.
    pub fn category_exists(&self, category: &str) -> Result<bool, DatabaseError> {
        let exists = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM paper_categories WHERE category = ?1)",
            [category],
            |row| row.get::<_, bool>(0),
        )?;
        Ok(exists)
    }

    /// Insert papers and link them to `category` in one transaction.
    ///
    /// Existing papers keep their row (and status); only the category link is
    /// added. Returns the number of newly created papers.
    pub fn insert_papers(
        &self,
        category: &str,
        papers: &[DiscoveredPaper],
    ) -> Result<usize, DatabaseError> {
        let tx = self.conn.unchecked_transaction()?;
        let mut created = 0;
        {
            let mut insert = tx.prepare_cached(
                "INSERT OR IGNORE INTO papers (paper_id, paper_url, processing_status)
                 VALUES (?1, ?2, ?3)",
            )?;
            let mut lookup = tx.prepare_cached("SELECT id FROM papers WHERE paper_id = ?1")?;
            let mut link = tx.prepare_cached(
                "INSERT OR IGNORE INTO paper_categories (paper_id, category) VALUES (?1, ?2)",
            )?;

            for paper in papers {
                created += insert.execute(params![
                    paper.paper_id,
                    paper.paper_url,
                    PaperStatus::Downloaded
                ])?;
                let id: i64 = lookup.query_row([&paper.paper_id], |row| row.get(0))?;
                link.execute(params![id, category])?;
            }
        }
        tx.commit()?;

        debug!(category, total = papers.len(), created, "Persisted catalog page");
        Ok(created)
    }

    /// Look up one paper by its arXiv identifier.
    pub fn get_paper(&self, paper_id: &str) -> Result<Option<Paper>, DatabaseError> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {PAPER_COLUMNS} FROM papers p WHERE p.paper_id = ?1"),
                [paper_id],
                PaperRow::from_row,
            )
            .optional()?;
        row.map(PaperRow::into_paper).transpose()
    }

    /// Papers currently in `status`, at most `limit` of them.
    pub fn fetch_by_status(
        &self,
        status: PaperStatus,
        limit: Option<usize>,
        strategy: SelectionStrategy,
    ) -> Result<Vec<Paper>, DatabaseError> {
        self.fetch_eligible(status, None, limit, strategy)
    }

    /// Like [`fetch_by_status`](Self::fetch_by_status), but papers scoring
    /// under `floor` are left out before the limit is applied.
    pub fn fetch_eligible(
        &self,
        status: PaperStatus,
        floor: Option<ScoreFloor>,
        limit: Option<usize>,
        strategy: SelectionStrategy,
    ) -> Result<Vec<Paper>, DatabaseError> {
        let min_score = floor.map_or(0, |f| i64::from(f.min));
        let floor_clause = floor.map_or_else(String::new, |f| {
            format!(" AND COALESCE(p.{}, 0) >= ?2", f.column)
        });

        if strategy == SelectionStrategy::CategoryBalanced {
            return self.fetch_balanced(status, &floor_clause, min_score, limit);
        }

        let order = match strategy {
            SelectionStrategy::Random => "RANDOM()",
            _ => "p.id",
        };
        let sql = format!(
            "SELECT {PAPER_COLUMNS} FROM papers p
             WHERE p.processing_status = ?1{floor_clause}
             ORDER BY {order}
             LIMIT ?3"
        );
        let limit = limit.map_or(-1, |l| l as i64);

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![status, min_score, limit], PaperRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(PaperRow::into_paper).collect()
    }

    /// Interleave categories: the first paper of every category, then the
    /// second of every category, and so on. Papers listed under several
    /// categories are returned once, at their earliest position.
    fn fetch_balanced(
        &self,
        status: PaperStatus,
        floor_clause: &str,
        min_score: i64,
        limit: Option<usize>,
    ) -> Result<Vec<Paper>, DatabaseError> {
        let sql = format!(
            "WITH ranked AS (
                 SELECT pc.paper_id AS pid, pc.category AS category,
                        ROW_NUMBER() OVER (PARTITION BY pc.category ORDER BY pc.paper_id) AS rn
                 FROM paper_categories pc
                 JOIN papers p ON p.id = pc.paper_id
                 WHERE p.processing_status = ?1{floor_clause}
             )
             SELECT {PAPER_COLUMNS}
             FROM ranked r
             JOIN papers p ON p.id = r.pid
             ORDER BY r.rn, r.category"
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = if floor_clause.is_empty() {
            stmt.query_map(params![status], PaperRow::from_row)?
        } else {
            stmt.query_map(params![status, min_score], PaperRow::from_row)?
        };

        let mut seen = HashSet::new();
        let mut papers = Vec::new();
        for row in rows {
            let row = row?;
            if !seen.insert(row.id) {
                continue;
            }
            papers.push(row.into_paper()?);
            if limit.is_some_and(|l| papers.len() >= l) {
                break;
            }
        }
        Ok(papers)
    }

    /// Read a stage's stored criteria for one paper.
    ///
    /// A NULL criteria column means the stage never wrote it, which is a
    /// schema/data contract violation for any caller that expects it.
    pub fn load_criteria(
        &self,
        paper: &Paper,
        descriptor: &StageDescriptor,
    ) -> Result<CriteriaSet, DatabaseError> {
        let columns = descriptor.columns();
        let sql = format!("SELECT {} FROM papers WHERE id = ?1", columns.join(", "));

        let values: Vec<Option<i64>> = self
            .conn
            .query_row(&sql, [paper.id], |row| {
                (0..columns.len()).map(|i| row.get(i)).collect()
            })
            .optional()?
            .ok_or_else(|| DatabaseError::NotFound(paper.paper_id.clone()))?;

        let mut set = CriteriaSet::new();
        for ((name, column), value) in descriptor.criteria.iter().zip(&columns).zip(values) {
            let value = value.ok_or_else(|| DatabaseError::MissingField {
                paper_id: paper.paper_id.clone(),
                column: column.clone(),
            })?;
            set.insert(*name, u8::from(value != 0));
        }
        Ok(set)
    }

    /// Write `status` plus any extra columns for one paper in a single statement.
    pub fn update_paper(
        &self,
        id: i64,
        status: PaperStatus,
        update: &PaperUpdate,
    ) -> Result<(), DatabaseError> {
        let mut assignments = vec![
            "processing_status = ?1".to_string(),
            "updated_at = CURRENT_TIMESTAMP".to_string(),
        ];
        let mut values: Vec<Value> = vec![Value::Text(status.as_str().to_string())];

        for (column, value) in &update.values {
            if !self.writable.contains(column) {
                return Err(DatabaseError::UnknownColumn(column.clone()));
            }
            values.push(value.clone());
            assignments.push(format!("{column} = ?{}", values.len()));
        }
        values.push(Value::Integer(id));

        let sql = format!(
            "UPDATE papers SET {} WHERE id = ?{}",
            assignments.join(", "),
            values.len()
        );
        let changed = self.conn.execute(&sql, params_from_iter(values))?;
        if changed == 0 {
            return Err(DatabaseError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Paper count per status, in status order.
    pub fn status_counts(&self) -> Result<Vec<(PaperStatus, u64)>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare("SELECT processing_status, COUNT(*) FROM papers GROUP BY processing_status")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut counts = rows
            .into_iter()
            .map(|(status, count)| {
                status
                    .parse::<PaperStatus>()
                    .map(|s| (s, count as u64))
                    .map_err(|_| DatabaseError::InvalidStatus { value: status })
            })
            .collect::<Result<Vec<_>, _>>()?;
        counts.sort();
        Ok(counts)
    }

    /// Categories a paper is linked to.
    pub fn categories_for(&self, paper: &Paper) -> Result<Vec<String>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT category FROM paper_categories WHERE paper_id = ?1 ORDER BY category",
        )?;
        let categories = stmt
            .query_map([paper.id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(categories)
    }

    /// Total papers in the store.
    pub fn count(&self) -> Result<u64, DatabaseError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM papers", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::criteria::{PROFILE, suitability_score};

    fn discovered(ids: &[&str]) -> Vec<DiscoveredPaper> {
        ids.iter()
            .map(|id| DiscoveredPaper {
                paper_id: id.to_string(),
                paper_url: format!("https://export.arxiv.org/pdf/{id}.pdf"),
            })
            .collect()
    }

    fn paper(store: &PaperStore, paper_id: &str) -> Paper {
        store.get_paper(paper_id).unwrap().unwrap()
    }

    #[test]
    fn test_insert_is_idempotent() {
        let store = PaperStore::open_in_memory().unwrap();
        let batch = discovered(&["2001.00001v1", "2001.00002v1"]);

        assert_eq!(store.insert_papers("cs.AI", &batch).unwrap(), 2);
        assert_eq!(store.insert_papers("cs.AI", &batch).unwrap(), 0);
        assert_eq!(store.count().unwrap(), 2);
        assert!(store.category_exists("cs.AI").unwrap());
        assert!(!store.category_exists("cs.CL").unwrap());

        let first = paper(&store, "2001.00001v1");
        assert_eq!(first.processing_status, PaperStatus::Downloaded);
        assert_eq!(first.profiler_suitability_score, None);
    }

    #[test]
    fn test_paper_in_two_categories() {
        let store = PaperStore::open_in_memory().unwrap();
        store.insert_papers("cs.AI", &discovered(&["a"])).unwrap();
        store.insert_papers("cs.LG", &discovered(&["a"])).unwrap();

        assert_eq!(store.count().unwrap(), 1);
        let a = paper(&store, "a");
        assert_eq!(store.categories_for(&a).unwrap(), vec!["cs.AI", "cs.LG"]);
    }

    #[test]
    fn test_fetch_by_status_respects_limit_and_status() {
        let store = PaperStore::open_in_memory().unwrap();
        store
            .insert_papers("cs.AI", &discovered(&["a", "b", "c"]))
            .unwrap();
        let b = paper(&store, "b");
        store
            .update_paper(b.id, PaperStatus::Profiled, &PaperUpdate::new())
            .unwrap();

        let downloaded = store
            .fetch_by_status(PaperStatus::Downloaded, None, SelectionStrategy::Sequential)
            .unwrap();
        let ids: Vec<_> = downloaded.iter().map(|p| p.paper_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);

        let limited = store
            .fetch_by_status(PaperStatus::Downloaded, Some(1), SelectionStrategy::Random)
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn test_score_floor_applies_before_limit() {
        let store = PaperStore::open_in_memory().unwrap();
        store
            .insert_papers("cs.AI", &discovered(&["low", "none", "high"]))
            .unwrap();
        store.insert_papers("math.CO", &discovered(&["edge"])).unwrap();
        for (id, score) in [("low", Some(3)), ("none", None), ("high", Some(9)), ("edge", Some(8))] {
            let mut update = PaperUpdate::new();
            if let Some(score) = score {
                update = update.with_score(&PROFILE, score);
            }
            let p = paper(&store, id);
            store
                .update_paper(p.id, PaperStatus::ProfileScored, &update)
                .unwrap();
        }
        let floor = Some(ScoreFloor {
            column: PROFILE.score_column,
            min: 8,
        });

        let first = store
            .fetch_eligible(PaperStatus::ProfileScored, floor, Some(1), SelectionStrategy::Sequential)
            .unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].paper_id, "high");

        let mut balanced: Vec<_> = store
            .fetch_eligible(PaperStatus::ProfileScored, floor, None, SelectionStrategy::CategoryBalanced)
            .unwrap()
            .into_iter()
            .map(|p| p.paper_id)
            .collect();
        balanced.sort();
        assert_eq!(balanced, vec!["edge", "high"]);

        let unfiltered = store
            .fetch_by_status(PaperStatus::ProfileScored, None, SelectionStrategy::Sequential)
            .unwrap();
        assert_eq!(unfiltered.len(), 4);
    }

    #[test]
    fn test_balanced_selection_round_robins_categories() {
        let store = PaperStore::open_in_memory().unwrap();
        store
            .insert_papers("cs.AI", &discovered(&["ai1", "ai2", "ai3"]))
            .unwrap();
        store.insert_papers("math.CO", &discovered(&["co1"])).unwrap();
        store
            .insert_papers("quant-ph", &discovered(&["q1", "q2"]))
            .unwrap();

        let papers = store
            .fetch_by_status(
                PaperStatus::Downloaded,
                None,
                SelectionStrategy::CategoryBalanced,
            )
            .unwrap();
        let ids: Vec<_> = papers.iter().map(|p| p.paper_id.as_str()).collect();
        assert_eq!(ids, vec!["ai1", "co1", "q1", "ai2", "q2", "ai3"]);

        let limited = store
            .fetch_by_status(
                PaperStatus::Downloaded,
                Some(2),
                SelectionStrategy::CategoryBalanced,
            )
            .unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[test]
    fn test_balanced_selection_deduplicates_shared_papers() {
        let store = PaperStore::open_in_memory().unwrap();
        store.insert_papers("cs.AI", &discovered(&["x", "y"])).unwrap();
        store.insert_papers("cs.LG", &discovered(&["x"])).unwrap();

        let papers = store
            .fetch_by_status(
                PaperStatus::Downloaded,
                None,
                SelectionStrategy::CategoryBalanced,
            )
            .unwrap();
        let ids: Vec<_> = papers.iter().map(|p| p.paper_id.as_str()).collect();
        assert_eq!(ids, vec!["x", "y"]);
    }

    #[test]
    fn test_update_writes_criteria_and_status() {
        let store = PaperStore::open_in_memory().unwrap();
        store.insert_papers("cs.AI", &discovered(&["a"])).unwrap();
        let a = paper(&store, "a");

        let criteria: CriteriaSet = PROFILE.criteria.iter().map(|c| (*c, 1u8)).collect();
        let update = PaperUpdate::new().with_criteria(&PROFILE, &criteria);
        store.update_paper(a.id, PaperStatus::Profiled, &update).unwrap();

        let a = paper(&store, "a");
        assert_eq!(a.processing_status, PaperStatus::Profiled);
        let loaded = store.load_criteria(&a, &PROFILE).unwrap();
        assert_eq!(suitability_score(&PROFILE, &loaded).unwrap(), 10);

        let update = PaperUpdate::new().with_score(&PROFILE, 10);
        store
            .update_paper(a.id, PaperStatus::ProfileScored, &update)
            .unwrap();
        assert_eq!(paper(&store, "a").profiler_suitability_score, Some(10));
    }

    #[test]
    fn test_load_criteria_reports_null_column() {
        let store = PaperStore::open_in_memory().unwrap();
        store.insert_papers("cs.AI", &discovered(&["a"])).unwrap();
        let a = paper(&store, "a");

        let err = store.load_criteria(&a, &PROFILE).unwrap_err();
        assert!(matches!(
            err,
            DatabaseError::MissingField { column, .. } if column == "profiler_criteria_clear_question"
        ));
    }

    #[test]
    fn test_update_rejects_unknown_column() {
        let store = PaperStore::open_in_memory().unwrap();
        store.insert_papers("cs.AI", &discovered(&["a"])).unwrap();
        let a = paper(&store, "a");

        let update = PaperUpdate::new().set("paper_url = 'x'; --", 1);
        let err = store
            .update_paper(a.id, PaperStatus::Profiled, &update)
            .unwrap_err();
        assert!(matches!(err, DatabaseError::UnknownColumn(_)));
        assert_eq!(paper(&store, "a").processing_status, PaperStatus::Downloaded);
    }

    #[test]
    fn test_update_missing_paper() {
        let store = PaperStore::open_in_memory().unwrap();
        let err = store
            .update_paper(99, PaperStatus::Profiled, &PaperUpdate::new())
            .unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound(_)));
    }

    #[test]
    fn test_unknown_status_is_rejected_on_read() {
        let store = PaperStore::open_in_memory().unwrap();
        store.insert_papers("cs.AI", &discovered(&["a"])).unwrap();
        store
            .conn
            .execute("UPDATE papers SET processing_status = 'ready_to_clean'", [])
            .unwrap();

        assert!(matches!(
            store.get_paper("a"),
            Err(DatabaseError::InvalidStatus { value }) if value == "ready_to_clean"
        ));
    }

    #[test]
    fn test_status_counts() {
        let store = PaperStore::open_in_memory().unwrap();
        store
            .insert_papers("cs.AI", &discovered(&["a", "b", "c"]))
            .unwrap();
        let c = paper(&store, "c");
        store
            .update_paper(c.id, PaperStatus::FailedProfiling, &PaperUpdate::new())
            .unwrap();

        let counts = store.status_counts().unwrap();
        assert_eq!(
            counts,
            vec![
                (PaperStatus::Downloaded, 2),
                (PaperStatus::FailedProfiling, 1)
            ]
        );
    }

    #[test]
    fn test_open_on_disk_persists() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("papers.db");
        {
            let store = PaperStore::open(&path).unwrap();
            store.insert_papers("cs.AI", &discovered(&["a"])).unwrap();
        }
        let store = PaperStore::open(&path).unwrap();
        assert_eq!(store.count().unwrap(), 1);
    }
}
