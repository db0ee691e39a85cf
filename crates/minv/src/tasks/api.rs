//! Entry points for callers that enqueue work for the daemon.

use chrono::Utc;
use log::{info, warn};
use serde_json::Value;

use crate::db::{job_repo, scheduled_job_repo, Database};
use crate::error::TaskError;
use crate::tasks::context::ReloadNotifier;
use crate::tasks::ipc::DaemonClient;
use crate::tasks::registry::TaskName;
use crate::tasks::scheduler::When;

fn encode_arguments(task: TaskName, arguments: &Value) -> Result<String, TaskError> {
    serde_json::to_string(arguments).map_err(|e| TaskError::InvalidArguments {
        task: task.to_string(),
        source: e,
    })
}

fn notify(notifier: &dyn ReloadNotifier) {
    // The daemon picks the row up on its next start when it is not running.
    if let Err(e) = notifier.notify_reload() {
        warn!("Could not notify daemon about schedule change: {}", e);
    }
}

fn insert_scheduled(
    db: &Database,
    task: TaskName,
    when: When,
    arguments: &Value,
) -> Result<i64, TaskError> {
    let at = when.resolve(Utc::now());
    let id = scheduled_job_repo::insert(db, task.as_str(), &encode_arguments(task, arguments)?, at)?;
    info!("Scheduled task {} at {}", task, at);
    Ok(id)
}

/// Persists one scheduled invocation and tells the daemon to reload.
pub fn schedule(
    db: &Database,
    notifier: &dyn ReloadNotifier,
    task: TaskName,
    when: impl Into<When>,
    arguments: &Value,
) -> Result<i64, TaskError> {
    let id = insert_scheduled(db, task, when.into(), arguments)?;
    notify(notifier);
    Ok(id)
}

/// Like [`schedule`] for several invocations, with a single reload.
pub fn schedule_many(
    db: &Database,
    notifier: &dyn ReloadNotifier,
    items: &[(TaskName, When, Value)],
) -> Result<Vec<i64>, TaskError> {
    let ids = items
        .iter()
        .map(|(task, when, arguments)| insert_scheduled(db, *task, *when, arguments))
        .collect::<Result<Vec<_>, _>>()?;
    if !ids.is_empty() {
        notify(notifier);
    }
    Ok(ids)
}

/// Resets a job to pending and asks the daemon to run it again.
pub fn restart_job(db: &Database, client: &DaemonClient, job_id: &str) -> Result<(), TaskError> {
    if !job_repo::reset_to_pending(db, job_id)? {
        return Err(TaskError::UnknownJob(job_id.to_string()));
    }
    client.send_restart_job(job_id)?;
    Ok(())
}

/// Deletes the not yet triggered invocations of `task` whose arguments
/// match `predicate`. Returns how many were removed.
pub fn remove_scheduled<P>(db: &Database, task: TaskName, predicate: P) -> Result<usize, TaskError>
where
    P: Fn(&Value) -> bool,
{
    let mut removed = 0;
    for row in scheduled_job_repo::list_by_task(db, task.as_str())? {
        let arguments: Value = match serde_json::from_str(&row.arguments) {
            Ok(value) => value,
            Err(e) => {
                warn!("Scheduled job {} has unreadable arguments: {}", row.id, e);
                continue;
            }
        };
        if predicate(&arguments) && scheduled_job_repo::delete(db, row.id)? {
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IpcError;
    use chrono::TimeDelta;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingNotifier(AtomicUsize);

    impl ReloadNotifier for CountingNotifier {
        fn notify_reload(&self) -> Result<(), IpcError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(IpcError::Rejected("daemon not running".to_string()))
        }
    }

    #[test]
    fn test_schedule_persists_and_notifies() {
        let db = Database::open_in_memory().unwrap();
        let notifier = CountingNotifier::default();
        let at = Utc::now() + TimeDelta::hours(2);

        let id = schedule(&db, &notifier, TaskName::Harvest, at, &json!({"url": "http://a/"}))
            .unwrap();

        let row = scheduled_job_repo::find_by_id(&db, id).unwrap().unwrap();
        assert_eq!(row.task, "harvest");
        assert_eq!(row.when, at);
        let args: Value = serde_json::from_str(&row.arguments).unwrap();
        assert_eq!(args, json!({"url": "http://a/"}));
        assert_eq!(notifier.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_schedule_many_notifies_once() {
        let db = Database::open_in_memory().unwrap();
        let notifier = CountingNotifier::default();
        let ids = schedule_many(
            &db,
            &notifier,
            &[
                (TaskName::Backup, When::In(TimeDelta::hours(1)), json!({"logs": true})),
                (TaskName::Export, When::In(TimeDelta::hours(2)), json!({"data": true})),
            ],
        )
        .unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(scheduled_job_repo::list_all(&db).unwrap().len(), 2);
        assert_eq!(notifier.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_scheduled_by_arguments() {
        let db = Database::open_in_memory().unwrap();
        let notifier = CountingNotifier::default();
        let at = Utc::now() + TimeDelta::hours(1);
        schedule(&db, &notifier, TaskName::Harvest, at, &json!({"url": "http://a/"})).unwrap();
        schedule(&db, &notifier, TaskName::Harvest, at, &json!({"url": "http://b/"})).unwrap();
        schedule(&db, &notifier, TaskName::Export, at, &json!({"url": "http://a/"})).unwrap();

        let removed =
            remove_scheduled(&db, TaskName::Harvest, |args| args["url"] == "http://a/").unwrap();
        assert_eq!(removed, 1);

        let left: Vec<String> = scheduled_job_repo::list_all(&db)
            .unwrap()
            .into_iter()
            .map(|row| format!("{} {}", row.task, row.arguments))
            .collect();
        assert_eq!(left.len(), 2);
        assert!(left.iter().any(|r| r.starts_with("harvest") && r.contains("http://b/")));
        assert!(left.iter().any(|r| r.starts_with("export")));
    }

    #[test]
    fn test_restart_unknown_job() {
        let db = Database::open_in_memory().unwrap();
        let temp = tempfile::TempDir::new().unwrap();
        let client = DaemonClient::new(crate::tasks::ipc::Endpoint::Unix(temp.path().join("d.sock")));
        assert!(matches!(
            restart_job(&db, &client, "nope"),
            Err(TaskError::UnknownJob(_))
        ));
    }
}
