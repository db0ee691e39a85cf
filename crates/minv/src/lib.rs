pub mod config;
pub mod db;
pub mod error;
pub mod inventory;
pub mod logging;
pub mod tasks;
pub mod worker;

pub use config::{load_settings, CollectionConfig, Settings};
pub use db::{Database, DatabaseError};
pub use error::{
    BackupError, ConfigError, DaemonError, ExportError, HarvestError, IngestError, IpcError,
    LockError, MinvError, Result, TaskError, WorkerError,
};
pub use logging::init_logging;
pub use tasks::{Daemon, DaemonClient, Registry, TaskContext, TaskName, When};
pub use worker::WorkerPool;
