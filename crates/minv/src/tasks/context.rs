use std::sync::Arc;

use crate::config::Settings;
use crate::db::Database;
use crate::error::IpcError;
use crate::inventory::geometry::{FootprintNormalizer, PlanarFootprint};
use crate::inventory::harvester::{HarvesterFactory, HttpHarvesterFactory};
use crate::tasks::ipc::DaemonClient;

/// Tells the daemon that the persisted schedule changed.
pub trait ReloadNotifier: Send + Sync {
    fn notify_reload(&self) -> Result<(), IpcError>;
}

/// Everything a task handler needs. Cloning shares all parts.
#[derive(Clone)]
pub struct TaskContext {
    pub db: Database,
    pub settings: Arc<Settings>,
    pub notifier: Arc<dyn ReloadNotifier>,
    pub harvesters: Arc<dyn HarvesterFactory>,
    pub geometry: Arc<dyn FootprintNormalizer>,
}

impl TaskContext {
    /// Context talking HTTP to locations and IPC to the configured daemon.
    pub fn new(db: Database, settings: Arc<Settings>) -> Self {
        Self {
            notifier: Arc::new(DaemonClient::from_settings(&settings)),
            harvesters: Arc::new(HttpHarvesterFactory::new(&settings)),
            geometry: Arc::new(PlanarFootprint),
            db,
            settings,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn ReloadNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_harvesters(mut self, harvesters: Arc<dyn HarvesterFactory>) -> Self {
        self.harvesters = harvesters;
        self
    }

    pub fn with_geometry(mut self, geometry: Arc<dyn FootprintNormalizer>) -> Self {
        self.geometry = geometry;
        self
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("db", &self.db)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
