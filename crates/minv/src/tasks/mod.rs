//! Task scheduling and execution.

pub mod api;
pub mod context;
pub mod daemon;
pub mod ipc;
pub mod monitor;
pub mod protocol;
pub mod registry;
pub mod scheduler;

pub use context::{ReloadNotifier, TaskContext};
pub use daemon::{Daemon, DaemonState, ScheduledItem};
pub use ipc::{DaemonClient, Endpoint};
pub use monitor::{JobMonitor, JobStatus};
pub use protocol::{Reply, Request};
pub use registry::{Registry, TaskHandler, TaskName};
pub use scheduler::{Scheduler, When};
