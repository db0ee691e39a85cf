pub mod job;
pub mod pool;

pub use job::WorkItem;
pub use pool::WorkerPool;
