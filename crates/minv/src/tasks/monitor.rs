//! Job lifecycle bookkeeping around a task invocation.

use std::backtrace::Backtrace;
use std::error::Error;
use std::fmt::Write;
use std::str::FromStr;
use std::time::Instant;

use chrono::Utc;
use log::{error, info};
use serde::{Deserialize, Serialize};

use crate::db::job_repo::{self, JobRow};
use crate::db::{Database, DatabaseError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Finished,
    Failed,
    Aborted,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Finished => "finished",
            JobStatus::Failed => "failed",
            JobStatus::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Finished | JobStatus::Failed | JobStatus::Aborted
        )
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "finished" => Ok(JobStatus::Finished),
            "failed" => Ok(JobStatus::Failed),
            "aborted" => Ok(JobStatus::Aborted),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Creates a `pending` job for a task invocation.
pub fn create_job(
    db: &Database,
    task: &str,
    arguments: &serde_json::Value,
) -> Result<JobRow, DatabaseError> {
    let arguments = serde_json::to_string_pretty(arguments).map_err(|e| DatabaseError::Json {
        column: "arguments",
        source: e,
    })?;
    let job = JobRow {
        id: uuid::Uuid::new_v4().to_string(),
        task: task.to_string(),
        arguments,
        status: JobStatus::Pending.as_str().to_string(),
        error: None,
        traceback: None,
        created_at: Utc::now(),
        start_time: None,
        end_time: None,
    };
    job_repo::insert(db, &job)?;
    Ok(job)
}

/// A job in the `running` state. [`finish`](Self::finish) or
/// [`fail`](Self::fail) stores the terminal state and end time. A job whose
/// completion could not be stored can still be failed.
pub struct JobMonitor<'a> {
    db: &'a Database,
    job: JobRow,
    started: Instant,
}

impl<'a> JobMonitor<'a> {
    pub fn begin(db: &'a Database, mut job: JobRow) -> Result<Self, DatabaseError> {
        job.status = JobStatus::Running.as_str().to_string();
        job.start_time = Some(Utc::now());
        job.end_time = None;
        job.error = None;
        job.traceback = None;
        job_repo::update(db, &job)?;
        info!("Starting job {} of task {}", job.id, job.task);
        Ok(Self {
            db,
            job,
            started: Instant::now(),
        })
    }

    pub fn job(&self) -> &JobRow {
        &self.job
    }

    pub fn finish(&mut self) -> Result<(), DatabaseError> {
        self.job.status = JobStatus::Finished.as_str().to_string();
        self.job.end_time = Some(Utc::now());
        job_repo::update(self.db, &self.job)?;
        info!(
            "Job {} of task {} finished after {:.3}s",
            self.job.id,
            self.job.task,
            self.started.elapsed().as_secs_f64()
        );
        Ok(())
    }

    pub fn fail(mut self, message: String, traceback: String) -> Result<JobRow, DatabaseError> {
        self.job.status = JobStatus::Failed.as_str().to_string();
        self.job.end_time = Some(Utc::now());
        self.job.error = Some(message);
        self.job.traceback = Some(traceback);
        job_repo::update(self.db, &self.job)?;
        error!(
            "Job {} of task {} failed after {:.3}s",
            self.job.id,
            self.job.task,
            self.started.elapsed().as_secs_f64()
        );
        Ok(self.job)
    }
}

/// Error chain plus the stack captured at the point of failure.
pub fn format_traceback(err: &(dyn Error + 'static)) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", err);
    let mut source = err.source();
    while let Some(cause) = source {
        let _ = writeln!(out, "Caused by: {}", cause);
        source = cause.source();
    }
    let _ = write!(out, "\n{}", Backtrace::force_capture());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Finished,
            JobStatus::Failed,
            JobStatus::Aborted,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!("stuck".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_begin_and_finish() {
        let db = Database::open_in_memory().unwrap();
        let job = create_job(&db, "harvest", &serde_json::json!({"url": "http://a/"})).unwrap();
        assert_eq!(job.status, "pending");

        let mut monitor = JobMonitor::begin(&db, job).unwrap();
        let running = job_repo::find_by_id(&db, &monitor.job().id).unwrap().unwrap();
        assert_eq!(running.status, "running");
        assert!(running.start_time.is_some());
        assert!(running.end_time.is_none());

        monitor.finish().unwrap();
        let stored = job_repo::find_by_id(&db, &monitor.job().id).unwrap().unwrap();
        assert_eq!(stored.status, "finished");
        assert!(stored.end_time.unwrap() >= stored.start_time.unwrap());
    }

    #[test]
    fn test_fail_records_error() {
        let db = Database::open_in_memory().unwrap();
        let job = create_job(&db, "backup", &serde_json::json!({})).unwrap();
        let err = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let traceback = format_traceback(&err);
        let failed = JobMonitor::begin(&db, job)
            .unwrap()
            .fail(err.to_string(), traceback)
            .unwrap();

        let stored = job_repo::find_by_id(&db, &failed.id).unwrap().unwrap();
        assert_eq!(stored.status, "failed");
        assert_eq!(stored.error.as_deref(), Some("disk full"));
        assert!(stored.traceback.unwrap().starts_with("disk full"));
    }
}
