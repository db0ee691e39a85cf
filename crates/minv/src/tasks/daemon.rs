//! The long-running task daemon.
//!
//! One scheduling thread fires persisted scheduled jobs into the worker
//! pool; the thread calling [`Daemon::run`] accepts control connections,
//! one message per connection, until [`Daemon::shutdown`] is called.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};
use serde_json::Value;

use crate::db::{job_repo, scheduled_job_repo, Database};
use crate::error::{DaemonError, IpcError};
use crate::tasks::ipc::{Endpoint, Listener, Stream};
use crate::tasks::protocol::{read_frame, write_frame, Reply, Request};
use crate::tasks::registry::Registry;
use crate::tasks::scheduler::{Scheduler, SchedulerCallback};
use crate::worker::{WorkItem, WorkerPool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    Starting,
    Running,
    ShuttingDown,
    Stopped,
}

/// Scheduler payload for one persisted scheduled job.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledItem {
    pub id: i64,
    pub task: String,
    pub arguments: Value,
}

pub struct Daemon {
    db: Database,
    scheduler: Arc<Scheduler<ScheduledItem>>,
    pool: Arc<WorkerPool>,
    endpoint: Endpoint,
    bound: Mutex<Option<Endpoint>>,
    state: Mutex<DaemonState>,
    closing: AtomicBool,
    terminated: AtomicBool,
}

impl Daemon {
    /// Builds the daemon around `registry`. The worker pool starts
    /// immediately; nothing is scheduled until [`run`](Self::run).
    pub fn new(registry: Arc<Registry>) -> Result<Arc<Self>, DaemonError> {
        let settings = Arc::clone(&registry.context().settings);
        let db = registry.context().db.clone();
        let pool = Arc::new(WorkerPool::new(registry, settings.worker_count)?);

        let scheduler = Arc::new(Scheduler::new(
            on_scheduled(db.clone(), Arc::clone(&pool)),
            Duration::from_secs(settings.scheduler.default_wait),
        ));

        Ok(Arc::new(Self {
            db,
            scheduler,
            pool,
            endpoint: Endpoint::from_settings(&settings),
            bound: Mutex::new(None),
            state: Mutex::new(DaemonState::Starting),
            closing: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
        }))
    }

    pub fn state(&self) -> DaemonState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: DaemonState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub fn scheduler(&self) -> &Scheduler<ScheduledItem> {
        &self.scheduler
    }

    /// The endpoint clients reach the daemon at, once bound.
    pub fn endpoint(&self) -> Endpoint {
        self.bound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_else(|| self.endpoint.clone())
    }

    /// Replaces the scheduler contents with all persisted scheduled jobs.
    pub fn reload(&self) -> Result<usize, DaemonError> {
        let rows = scheduled_job_repo::list_all(&self.db).map_err(DaemonError::Reload)?;
        self.scheduler.reset();

        let mut count = 0;
        for row in rows {
            let arguments: Value = match serde_json::from_str(&row.arguments) {
                Ok(value) => value,
                Err(e) => {
                    error!("Skipping scheduled job {}: invalid arguments: {}", row.id, e);
                    continue;
                }
            };
            self.scheduler.schedule(
                row.when,
                ScheduledItem {
                    id: row.id,
                    task: row.task,
                    arguments,
                },
            );
            count += 1;
        }
        info!("Reloaded {} scheduled jobs", count);
        Ok(count)
    }

    /// Handles one control request. Never fails; errors become replies.
    pub fn handle_request(&self, request: Request) -> Reply {
        match request {
            Request::Reload => match self.reload() {
                Ok(_) => Reply::Ok,
                Err(e) => {
                    error!("Reload failed: {}", e);
                    Reply::error(e.to_string())
                }
            },
            Request::Restart { job_id } => match job_repo::find_by_id(&self.db, &job_id) {
                Ok(Some(job)) => {
                    info!("Restarting job {} of task {}", job.id, job.task);
                    match self.pool.submit(WorkItem::rerun(job.id)) {
                        Ok(()) => Reply::Ok,
                        Err(e) => Reply::error(e.to_string()),
                    }
                }
                Ok(None) => Reply::error(format!("No such job '{}'", job_id)),
                Err(e) => Reply::error(e.to_string()),
            },
            Request::Abort { job_id } => {
                warn!("Ignoring abort request for job {}", job_id);
                Reply::NotSupported {
                    message: "aborting jobs is not supported".to_string(),
                }
            }
        }
    }

    fn serve(&self, mut stream: Stream) -> Result<(), IpcError> {
        let request: Request = match read_frame(&mut stream) {
            Ok(request) => request,
            Err(e) => {
                let _ = write_frame(&mut stream, &Reply::error(e.to_string()));
                return Err(e);
            }
        };
        debug!("Received {:?}", request);
        let reply = self.handle_request(request);
        write_frame(&mut stream, &reply)
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Runs the daemon with SIGINT (graceful) and SIGTERM (terminate)
    /// handlers installed.
    pub fn run(self: &Arc<Self>) -> Result<(), DaemonError> {
        spawn_signal_thread(Arc::downgrade(self))?;
        self.run_loop()
    }

    /// Runs the scheduler and the accept loop until shut down.
    pub fn run_loop(&self) -> Result<(), DaemonError> {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state != DaemonState::Starting {
                return Err(DaemonError::InvalidState(format!("{:?}", *state)));
            }
            *state = DaemonState::Running;
        }

        let listener = match Listener::bind(&self.endpoint) {
            Ok(listener) => listener,
            Err(e) => {
                self.shutdown(true);
                self.set_state(DaemonState::Stopped);
                return Err(e.into());
            }
        };
        *self.bound.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(listener.endpoint().clone());

        let scheduler = Arc::clone(&self.scheduler);
        let scheduler_thread = thread::Builder::new()
            .name("minv-scheduler".to_string())
            .spawn(move || scheduler.run())
            .map_err(|e| DaemonError::Spawn {
                name: "minv-scheduler".to_string(),
                source: e,
            })?;

        // Without a schedule the daemon cannot do its work.
        if let Err(e) = self.reload() {
            error!("Initial schedule reload failed: {}", e);
            self.shutdown(true);
            drop(listener);
            let _ = scheduler_thread.join();
            self.set_state(DaemonState::Stopped);
            return Err(e);
        }

        info!("Daemon running on {}", listener.endpoint());
        while !self.is_closing() {
            match listener.accept() {
                Ok(stream) => {
                    if self.is_closing() {
                        break;
                    }
                    if let Err(e) = self.serve(stream) {
                        error!("Control message failed: {}", e);
                    }
                }
                Err(e) => {
                    if self.is_closing() {
                        break;
                    }
                    error!("Accept failed: {}", e);
                }
            }
        }
        info!("Leaving control loop");

        drop(listener);
        if scheduler_thread.join().is_err() {
            error!("Scheduler thread panicked");
        }
        if !self.terminated.load(Ordering::SeqCst) {
            self.pool.wait();
        }
        self.set_state(DaemonState::Stopped);
        info!("Daemon stopped");
        Ok(())
    }

    /// Stops the scheduler and the accept loop and closes the worker pool.
    /// With `terminate`, queued work is abandoned instead of drained.
    /// Calling it again only escalates a graceful shutdown to terminate.
    pub fn shutdown(&self, terminate: bool) {
        if terminate {
            self.terminated.store(true, Ordering::SeqCst);
        }
        let first = !self.closing.swap(true, Ordering::SeqCst);
        if first {
            info!(
                "Shutting down daemon ({})",
                if terminate { "terminate" } else { "graceful" }
            );
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == DaemonState::Running {
                *state = DaemonState::ShuttingDown;
            }
        }

        // Stop firing before the pool refuses work.
        self.scheduler.shutdown();
        if terminate {
            self.pool.terminate();
        } else {
            self.pool.close();
        }
        if !first {
            return;
        }

        // Unblock the accept loop.
        let bound = self.bound.lock().unwrap_or_else(PoisonError::into_inner).clone();
        if let Some(endpoint) = bound {
            if let Err(e) = Stream::connect(&endpoint) {
                warn!(
                    "Wake-up connection to {} failed, control loop may not exit: {}",
                    endpoint, e
                );
            }
        }
    }
}

fn on_scheduled(
    db: Database,
    pool: Arc<WorkerPool>,
) -> SchedulerCallback<ScheduledItem> {
    Box::new(move |item: ScheduledItem| {
        // A missing row was removed or already handed out.
        if scheduled_job_repo::find_by_id(&db, item.id)?.is_none() {
            debug!("Scheduled job {} no longer exists", item.id);
            return Ok(());
        }
        info!("Submitting scheduled task {} ({})", item.task, item.id);
        // The row is consumed only once the pool has accepted the work.
        pool.submit(WorkItem::run(item.task, item.arguments))?;
        if !scheduled_job_repo::delete(&db, item.id)? {
            warn!("Scheduled job {} vanished while being submitted", item.id);
        }
        Ok(())
    })
}

fn spawn_signal_thread(daemon: Weak<Daemon>) -> Result<(), DaemonError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| DaemonError::Spawn {
            name: "minv-signals".to_string(),
            source: e,
        })?;

    thread::Builder::new()
        .name("minv-signals".to_string())
        .spawn(move || runtime.block_on(watch_signals(daemon)))
        .map_err(|e| DaemonError::Spawn {
            name: "minv-signals".to_string(),
            source: e,
        })?;
    Ok(())
}

async fn watch_signals(daemon: Weak<Daemon>) {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigint, mut sigterm) = match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
        (Err(e), _) | (_, Err(e)) => {
            warn!("Failed to register signal handlers: {}", e);
            return;
        }
    };

    loop {
        let terminate = tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down");
                false
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, terminating");
                true
            }
        };
        match daemon.upgrade() {
            Some(daemon) => daemon.shutdown(terminate),
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::tasks::context::TaskContext;
    use crate::tasks::registry::TaskName;
    use chrono::{TimeDelta, Utc};
    use serde_json::json;
    use tempfile::TempDir;

    fn daemon(temp: &TempDir) -> Arc<Daemon> {
        let db = Database::open_in_memory().unwrap();
        let settings = Arc::new(Settings::rooted_at(temp.path()));
        let mut registry = Registry::new(TaskContext::new(db, settings));
        registry
            .register(
                TaskName::Backup,
                Arc::new(|_: &TaskContext, v: Value| Ok(v)),
            )
            .unwrap();
        Daemon::new(Arc::new(registry)).unwrap()
    }

    #[test]
    fn test_reload_replaces_schedule() {
        let temp = TempDir::new().unwrap();
        let daemon = daemon(&temp);
        let at = Utc::now() + TimeDelta::hours(1);
        scheduled_job_repo::insert(&daemon.db, "backup", r#"{"logs":true}"#, at).unwrap();
        scheduled_job_repo::insert(&daemon.db, "backup", "not json", at).unwrap();

        daemon.scheduler().schedule(
            at,
            ScheduledItem {
                id: 99,
                task: "stale".to_string(),
                arguments: Value::Null,
            },
        );
        assert_eq!(daemon.reload().unwrap(), 1);

        let items = daemon.scheduler().items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].0, at);
        assert_eq!(items[0].1.arguments, json!({"logs": true}));
        daemon.shutdown(true);
    }

    #[test]
    fn test_abort_is_not_supported() {
        let temp = TempDir::new().unwrap();
        let daemon = daemon(&temp);
        let reply = daemon.handle_request(Request::Abort {
            job_id: "x".to_string(),
        });
        assert!(matches!(reply, Reply::NotSupported { .. }));
        daemon.shutdown(true);
    }

    #[test]
    fn test_restart_unknown_job_is_an_error_reply() {
        let temp = TempDir::new().unwrap();
        let daemon = daemon(&temp);
        let reply = daemon.handle_request(Request::Restart {
            job_id: "missing".to_string(),
        });
        assert!(matches!(reply, Reply::Error { .. }));
        daemon.shutdown(true);
    }

    #[test]
    fn test_due_scheduled_job_is_consumed_and_run() {
        let temp = TempDir::new().unwrap();
        let daemon = daemon(&temp);
        let id = scheduled_job_repo::insert(
            &daemon.db,
            "backup",
            r#"{"config":true}"#,
            Utc::now() - TimeDelta::seconds(1),
        )
        .unwrap();

        let runner = Arc::clone(&daemon);
        let handle = thread::spawn(move || runner.run_loop());

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            let jobs = job_repo::list(&daemon.db, &Default::default()).unwrap();
            if jobs.first().is_some_and(|j| j.status == "finished") {
                break;
            }
            assert!(std::time::Instant::now() < deadline, "job did not run");
            thread::sleep(Duration::from_millis(20));
        }
        assert!(scheduled_job_repo::find_by_id(&daemon.db, id).unwrap().is_none());

        daemon.shutdown(false);
        daemon.shutdown(false);
        handle.join().unwrap().unwrap();
        assert_eq!(daemon.state(), DaemonState::Stopped);
        assert!(!temp.path().join("daemon.sock").exists());
    }

    #[test]
    fn test_refused_submit_keeps_scheduled_job() {
        let temp = TempDir::new().unwrap();
        let daemon = daemon(&temp);
        let id = scheduled_job_repo::insert(
            &daemon.db,
            "backup",
            r#"{"config":true}"#,
            Utc::now() - TimeDelta::seconds(1),
        )
        .unwrap();

        daemon.pool.close();
        let callback = on_scheduled(daemon.db.clone(), Arc::clone(&daemon.pool));
        let result = callback(ScheduledItem {
            id,
            task: "backup".to_string(),
            arguments: json!({"config": true}),
        });

        assert!(result.is_err());
        assert!(scheduled_job_repo::find_by_id(&daemon.db, id).unwrap().is_some());
        assert!(job_repo::list(&daemon.db, &Default::default()).unwrap().is_empty());
        daemon.shutdown(true);
    }

    #[test]
    fn test_shutdown_stops_scheduler_and_pool() {
        let temp = TempDir::new().unwrap();
        let daemon = daemon(&temp);
        daemon.shutdown(false);
        assert!(daemon.scheduler().is_shutdown());
        assert!(daemon.pool.submit(WorkItem::rerun("x".to_string())).is_err());
    }

    #[test]
    fn test_run_twice_is_invalid() {
        let temp = TempDir::new().unwrap();
        let daemon = daemon(&temp);
        let runner = Arc::clone(&daemon);
        let handle = thread::spawn(move || runner.run_loop());
        while daemon.state() == DaemonState::Starting {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(matches!(
            daemon.run_loop(),
            Err(DaemonError::InvalidState(_))
        ));
        daemon.shutdown(true);
        handle.join().unwrap().unwrap();
    }
}
