//! Typed task registry. Every invocation runs under a [`JobMonitor`] so
//! the job always reaches a terminal state, panics included.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::Arc;

use log::{error, info};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::job_repo::{self, JobRow};
use crate::error::{ConfigError, TaskError};
use crate::tasks::context::TaskContext;
use crate::tasks::monitor::{create_job, format_traceback, JobMonitor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskName {
    Harvest,
    Export,
    Backup,
}

impl TaskName {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskName::Harvest => "harvest",
            TaskName::Export => "export",
            TaskName::Backup => "backup",
        }
    }
}

impl FromStr for TaskName {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "harvest" => Ok(TaskName::Harvest),
            "export" => Ok(TaskName::Export),
            "backup" => Ok(TaskName::Backup),
            other => Err(TaskError::UnknownTask(other.to_string())),
        }
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type TaskHandler = Arc<dyn Fn(&TaskContext, Value) -> Result<Value, TaskError> + Send + Sync>;

/// Wraps a handler taking typed arguments. Arguments that do not
/// deserialize fail the job with [`TaskError::InvalidArguments`].
pub fn typed_handler<A, R, F>(name: TaskName, f: F) -> TaskHandler
where
    A: DeserializeOwned,
    R: Serialize,
    F: Fn(&TaskContext, A) -> Result<R, TaskError> + Send + Sync + 'static,
{
    Arc::new(move |ctx: &TaskContext, arguments: Value| {
        let args: A =
            serde_json::from_value(arguments).map_err(|e| TaskError::InvalidArguments {
                task: name.to_string(),
                source: e,
            })?;
        let result = f(ctx, args)?;
        serde_json::to_value(result).map_err(|e| TaskError::InvalidResult {
            task: name.to_string(),
            source: e,
        })
    })
}

pub struct Registry {
    handlers: HashMap<TaskName, TaskHandler>,
    ctx: TaskContext,
}

impl Registry {
    pub fn new(ctx: TaskContext) -> Self {
        Self {
            handlers: HashMap::new(),
            ctx,
        }
    }

    pub fn context(&self) -> &TaskContext {
        &self.ctx
    }

    /// Registers `handler` under `name`. A name can only be registered once.
    pub fn register(&mut self, name: TaskName, handler: TaskHandler) -> Result<(), TaskError> {
        if self.handlers.contains_key(&name) {
            return Err(TaskError::DuplicateTask(name.to_string()));
        }
        self.handlers.insert(name, handler);
        Ok(())
    }

    /// Registers the tasks of every listed module.
    pub fn initialize(&mut self, modules: &[String]) -> Result<(), TaskError> {
        for module in modules {
            match module.as_str() {
                "inventory" => crate::inventory::tasks::register(self)?,
                "backup" => crate::inventory::backup::register(self)?,
                other => return Err(ConfigError::UnknownTaskModule(other.to_string()).into()),
            }
        }
        info!("Registered tasks: {}", self.task_names().join(", "));
        Ok(())
    }

    pub fn task_names(&self) -> Vec<&'static str> {
        let mut names: Vec<TaskName> = self.handlers.keys().copied().collect();
        names.sort();
        names.iter().map(|n| n.as_str()).collect()
    }

    fn handler(&self, task: &str) -> Result<&TaskHandler, TaskError> {
        let name: TaskName = task.parse()?;
        self.handlers
            .get(&name)
            .ok_or_else(|| TaskError::UnknownTask(task.to_string()))
    }

    /// Runs `task` under a new job. The handler's error is returned after
    /// it has been recorded on the job.
    pub fn run(&self, task: &str, arguments: Value) -> Result<Value, TaskError> {
        let handler = self.handler(task)?;
        let job = create_job(&self.ctx.db, task, &arguments)?;
        self.execute(handler, job, arguments)
    }

    /// Runs an existing job again with its stored arguments.
    pub fn run_job(&self, job_id: &str) -> Result<Value, TaskError> {
        let job = job_repo::find_by_id(&self.ctx.db, job_id)?
            .ok_or_else(|| TaskError::UnknownJob(job_id.to_string()))?;
        let handler = self.handler(&job.task)?;
        let arguments: Value =
            serde_json::from_str(&job.arguments).map_err(|e| TaskError::InvalidArguments {
                task: job.task.clone(),
                source: e,
            })?;
        self.execute(handler, job, arguments)
    }

    fn execute(
        &self,
        handler: &TaskHandler,
        job: JobRow,
        arguments: Value,
    ) -> Result<Value, TaskError> {
        let mut monitor = JobMonitor::begin(&self.ctx.db, job)?;
        let outcome = catch_unwind(AssertUnwindSafe(|| handler(&self.ctx, arguments)))
            .unwrap_or_else(|payload| Err(TaskError::Panicked(panic_message(payload.as_ref()))));
        let job_id = monitor.job().id.clone();

        let err = match outcome {
            Ok(value) => match monitor.finish() {
                Ok(()) => return Ok(value),
                Err(db_err) => {
                    error!("Failed to record completion of job {}: {}", job_id, db_err);
                    TaskError::Database(db_err)
                }
            },
            Err(e) => e,
        };
        if let Err(db_err) = monitor.fail(err.to_string(), format_traceback(&err)) {
            error!("Failed to record failure of job {}: {}", job_id, db_err);
        }
        Err(err)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("tasks", &self.task_names())
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::db::Database;
    use crate::error::BackupError;
    use serde_json::json;
    use tempfile::TempDir;

    fn registry(temp: &TempDir) -> Registry {
        let db = Database::open_in_memory().unwrap();
        let settings = Arc::new(Settings::rooted_at(temp.path()));
        Registry::new(TaskContext::new(db, settings))
    }

    fn echo() -> TaskHandler {
        Arc::new(|_: &TaskContext, args: Value| Ok(args))
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let temp = TempDir::new().unwrap();
        let mut registry = registry(&temp);
        registry.register(TaskName::Backup, echo()).unwrap();
        let err = registry.register(TaskName::Backup, echo()).unwrap_err();
        assert!(matches!(err, TaskError::DuplicateTask(name) if name == "backup"));
    }

    #[test]
    fn test_unknown_task() {
        let temp = TempDir::new().unwrap();
        let registry = registry(&temp);
        assert!(matches!(
            registry.run("reindex", json!({})),
            Err(TaskError::UnknownTask(_))
        ));
        assert!(matches!(
            registry.run("backup", json!({})),
            Err(TaskError::UnknownTask(_))
        ));
    }

    #[test]
    fn test_finished_job() {
        let temp = TempDir::new().unwrap();
        let mut registry = registry(&temp);
        registry.register(TaskName::Backup, echo()).unwrap();

        let result = registry.run("backup", json!({"logs": true})).unwrap();
        assert_eq!(result, json!({"logs": true}));

        let jobs = job_repo::list(&registry.context().db, &Default::default()).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, "finished");
        assert!(jobs[0].end_time.unwrap() >= jobs[0].start_time.unwrap());
        assert!(jobs[0].error.is_none());
    }

    #[test]
    fn test_failed_job_keeps_original_error() {
        let temp = TempDir::new().unwrap();
        let mut registry = registry(&temp);
        registry
            .register(
                TaskName::Backup,
                Arc::new(|_: &TaskContext, _: Value| {
                    Err(BackupError::NothingToBackup.into())
                }),
            )
            .unwrap();

        let err = registry.run("backup", json!({})).unwrap_err();
        assert!(matches!(err, TaskError::Backup(BackupError::NothingToBackup)));

        let jobs = job_repo::list(&registry.context().db, &Default::default()).unwrap();
        assert_eq!(jobs[0].status, "failed");
        assert!(!jobs[0].error.as_deref().unwrap_or_default().is_empty());
        assert!(jobs[0].traceback.is_some());
        assert!(jobs[0].end_time.unwrap() >= jobs[0].start_time.unwrap());
    }

    #[test]
    fn test_unrecorded_completion_fails_job() {
        let temp = TempDir::new().unwrap();
        let mut registry = registry(&temp);
        registry.register(TaskName::Backup, echo()).unwrap();
        let db = registry.context().db.clone();
        db.with_conn(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER refuse_finished BEFORE UPDATE ON jobs
                 WHEN NEW.status = 'finished'
                 BEGIN SELECT RAISE(ABORT, 'finish refused'); END;",
            )?;
            Ok(())
        })
        .unwrap();

        let err = registry.run("backup", json!({})).unwrap_err();
        assert!(matches!(err, TaskError::Database(_)));

        let jobs = job_repo::list(&db, &Default::default()).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, "failed");
        assert!(jobs[0].error.as_deref().unwrap_or_default().contains("finish refused"));
        assert!(jobs[0].end_time.is_some());
    }

    #[test]
    fn test_panicking_handler_fails_job() {
        let temp = TempDir::new().unwrap();
        let mut registry = registry(&temp);
        registry
            .register(
                TaskName::Export,
                Arc::new(|_: &TaskContext, _: Value| -> Result<Value, TaskError> {
                    panic!("exploded")
                }),
            )
            .unwrap();

        let err = registry.run("export", json!({})).unwrap_err();
        assert!(matches!(err, TaskError::Panicked(ref msg) if msg == "exploded"));

        let jobs = job_repo::list(&registry.context().db, &Default::default()).unwrap();
        assert_eq!(jobs[0].status, "failed");
    }

    #[test]
    fn test_run_job_reuses_the_job() {
        let temp = TempDir::new().unwrap();
        let mut registry = registry(&temp);
        registry.register(TaskName::Backup, echo()).unwrap();
        registry.run("backup", json!({"config": true})).unwrap();

        let db = registry.context().db.clone();
        let id = job_repo::list(&db, &Default::default()).unwrap()[0].id.clone();
        assert!(job_repo::reset_to_pending(&db, &id).unwrap());

        let result = registry.run_job(&id).unwrap();
        assert_eq!(result, json!({"config": true}));
        let jobs = job_repo::list(&db, &Default::default()).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, "finished");

        assert!(matches!(
            registry.run_job("missing"),
            Err(TaskError::UnknownJob(_))
        ));
    }

    #[test]
    fn test_typed_handler_rejects_bad_arguments() {
        #[derive(Deserialize)]
        struct Args {
            count: u32,
        }

        let temp = TempDir::new().unwrap();
        let mut registry = registry(&temp);
        registry
            .register(
                TaskName::Backup,
                typed_handler(TaskName::Backup, |_, args: Args| Ok(args.count * 2)),
            )
            .unwrap();

        assert_eq!(registry.run("backup", json!({"count": 21})).unwrap(), json!(42));
        assert!(matches!(
            registry.run("backup", json!({"count": "many"})),
            Err(TaskError::InvalidArguments { .. })
        ));
    }

    #[test]
    fn test_initialize_modules() {
        let temp = TempDir::new().unwrap();
        let mut registry = registry(&temp);
        registry
            .initialize(&["inventory".to_string(), "backup".to_string()])
            .unwrap();
        assert_eq!(registry.task_names(), vec!["harvest", "export", "backup"]);

        let mut other = self::registry(&temp);
        assert!(matches!(
            other.initialize(&["reports".to_string()]),
            Err(TaskError::Config(ConfigError::UnknownTaskModule(_)))
        ));
    }
}
