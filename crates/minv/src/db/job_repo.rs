//! Job repository: CRUD operations for the `jobs` table.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A raw job row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRow {
    pub id: String,
    pub task: String,
    /// JSON object of the task arguments.
    pub arguments: String,
    pub status: String,
    pub error: Option<String>,
    pub traceback: Option<String>,
    pub created_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            task: row.get("task")?,
            arguments: row.get("arguments")?,
            status: row.get("status")?,
            error: row.get("error")?,
            traceback: row.get("traceback")?,
            created_at: row.get("created_at")?,
            start_time: row.get("start_time")?,
            end_time: row.get("end_time")?,
        })
    }
}

/// Query filter parameters for job listing.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub status: Option<String>,
    pub task: Option<String>,
    pub limit: Option<u64>,
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (id, task, arguments, status, error, traceback, created_at,
             start_time, end_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                job.id,
                job.task,
                job.arguments,
                job.status,
                job.error,
                job.traceback,
                job.created_at,
                job.start_time,
                job.end_time,
            ],
        )?;
        Ok(())
    })
}

/// Overwrites the mutable lifecycle columns of an existing job.
pub fn update(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE jobs SET status=?2, error=?3, traceback=?4, start_time=?5, end_time=?6
             WHERE id=?1",
            params![
                job.id,
                job.status,
                job.error,
                job.traceback,
                job.start_time,
                job.end_time,
            ],
        )?;
        Ok(())
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Lists jobs, newest first.
pub fn list(db: &Database, filter: &JobFilter) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut where_clauses: Vec<&str> = Vec::new();
        let mut bind_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ref status) = filter.status {
            where_clauses.push("status = ?");
            bind_values.push(Box::new(status.clone()));
        }
        if let Some(ref task) = filter.task {
            where_clauses.push("task = ?");
            bind_values.push(Box::new(task.clone()));
        }

        let where_sql = if where_clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", where_clauses.join(" AND "))
        };
        let limit_sql = filter
            .limit
            .map(|l| format!("LIMIT {}", l))
            .unwrap_or_default();

        let sql = format!(
            "SELECT * FROM jobs {} ORDER BY created_at DESC {}",
            where_sql, limit_sql
        );
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            bind_values.iter().map(|b| b.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_ref.as_slice(), JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Resets a job to `pending`, clearing its previous outcome. Returns false
/// when no such job exists.
pub fn reset_to_pending(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status='pending', error=NULL, traceback=NULL,
             start_time=NULL, end_time=NULL WHERE id=?1",
            params![id],
        )?;
        Ok(changed > 0)
    })
}

/// Deletes a job. Jobs are only ever removed by operator action.
pub fn delete(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute("DELETE FROM jobs WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample(id: &str, task: &str, status: &str) -> JobRow {
        JobRow {
            id: id.to_string(),
            task: task.to_string(),
            arguments: r#"{"mission":"S1"}"#.to_string(),
            status: status.to_string(),
            error: None,
            traceback: None,
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap(),
            start_time: None,
            end_time: None,
        }
    }

    #[test]
    fn test_insert_and_find() {
        let db = Database::open_in_memory().unwrap();
        let job = sample("j1", "harvest", "pending");
        insert(&db, &job).unwrap();

        let found = find_by_id(&db, "j1").unwrap().unwrap();
        assert_eq!(found, job);
        assert!(find_by_id(&db, "missing").unwrap().is_none());
    }

    #[test]
    fn test_update_lifecycle() {
        let db = Database::open_in_memory().unwrap();
        let mut job = sample("j1", "harvest", "pending");
        insert(&db, &job).unwrap();

        job.status = "failed".to_string();
        job.error = Some("boom".to_string());
        job.start_time = Some(Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 1).unwrap());
        job.end_time = Some(Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 2).unwrap());
        update(&db, &job).unwrap();

        let found = find_by_id(&db, "j1").unwrap().unwrap();
        assert_eq!(found.status, "failed");
        assert_eq!(found.error.as_deref(), Some("boom"));
        assert_eq!(found.end_time, job.end_time);
    }

    #[test]
    fn test_reset_to_pending() {
        let db = Database::open_in_memory().unwrap();
        let mut job = sample("j1", "harvest", "failed");
        job.error = Some("boom".to_string());
        insert(&db, &job).unwrap();

        assert!(reset_to_pending(&db, "j1").unwrap());
        let found = find_by_id(&db, "j1").unwrap().unwrap();
        assert_eq!(found.status, "pending");
        assert!(found.error.is_none());
        assert!(!reset_to_pending(&db, "missing").unwrap());
    }

    #[test]
    fn test_list_with_filter() {
        let db = Database::open_in_memory().unwrap();
        insert(&db, &sample("j1", "harvest", "finished")).unwrap();
        insert(&db, &sample("j2", "export", "finished")).unwrap();
        insert(&db, &sample("j3", "harvest", "failed")).unwrap();

        let all = list(&db, &JobFilter::default()).unwrap();
        assert_eq!(all.len(), 3);

        let harvests = list(
            &db,
            &JobFilter {
                task: Some("harvest".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(harvests.len(), 2);

        let failed = list(
            &db,
            &JobFilter {
                status: Some("failed".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, "j3");
    }

    #[test]
    fn test_delete() {
        let db = Database::open_in_memory().unwrap();
        insert(&db, &sample("j1", "harvest", "finished")).unwrap();
        assert!(delete(&db, "j1").unwrap());
        assert!(!delete(&db, "j1").unwrap());
    }
}
