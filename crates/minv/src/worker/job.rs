use serde_json::Value;

/// Unit of work handed to the worker pool.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkItem {
    /// Run `task` under a new job.
    Run { task: String, arguments: Value },
    /// Run an existing job again with its stored arguments.
    Rerun { job_id: String },
}

impl WorkItem {
    pub fn run(task: impl Into<String>, arguments: Value) -> Self {
        WorkItem::Run {
            task: task.into(),
            arguments,
        }
    }

    pub fn rerun(job_id: impl Into<String>) -> Self {
        WorkItem::Rerun {
            job_id: job_id.into(),
        }
    }

    /// Short description for log lines.
    pub fn describe(&self) -> String {
        match self {
            WorkItem::Run { task, .. } => format!("task {}", task),
            WorkItem::Rerun { job_id } => format!("job {}", job_id),
        }
    }
}
