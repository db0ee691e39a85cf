//! Scheduled job repository: persisted future task invocations.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use super::{Database, DatabaseError};

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledJobRow {
    pub id: i64,
    pub task: String,
    /// JSON object of the task arguments.
    pub arguments: String,
    pub when: DateTime<Utc>,
    pub last_execution: Option<DateTime<Utc>>,
}

impl ScheduledJobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            task: row.get("task")?,
            arguments: row.get("arguments")?,
            when: row.get("scheduled_at")?,
            last_execution: row.get("last_execution")?,
        })
    }
}

/// Inserts a scheduled job and returns its id. Scheduling the exact same
/// (task, arguments, when) twice keeps the first row.
pub fn insert(
    db: &Database,
    task: &str,
    arguments: &str,
    when: DateTime<Utc>,
) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT OR IGNORE INTO scheduled_jobs (task, arguments, scheduled_at)
             VALUES (?1, ?2, ?3)",
            params![task, arguments, when],
        )?;
        let id = conn.query_row(
            "SELECT id FROM scheduled_jobs
             WHERE task = ?1 AND arguments = ?2 AND scheduled_at = ?3",
            params![task, arguments, when],
            |r| r.get(0),
        )?;
        Ok(id)
    })
}

/// All scheduled jobs ordered by trigger time.
pub fn list_all(db: &Database) -> Result<Vec<ScheduledJobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM scheduled_jobs ORDER BY scheduled_at, id")?;
        let rows = stmt
            .query_map([], ScheduledJobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Scheduled jobs of one task, ordered by trigger time.
pub fn list_by_task(db: &Database, task: &str) -> Result<Vec<ScheduledJobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn
            .prepare("SELECT * FROM scheduled_jobs WHERE task = ?1 ORDER BY scheduled_at, id")?;
        let rows = stmt
            .query_map(params![task], ScheduledJobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

pub fn find_by_id(db: &Database, id: i64) -> Result<Option<ScheduledJobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM scheduled_jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], ScheduledJobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Deletes a scheduled job. Returns false if it was already gone.
pub fn delete(db: &Database, id: i64) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute("DELETE FROM scheduled_jobs WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    })
}
