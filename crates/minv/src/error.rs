use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MinvError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Harvest error: {0}")]
    Harvest(#[from] HarvestError),

    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),

    #[error("Daemon error: {0}")]
    Daemon(#[from] DaemonError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write config file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Invalid ISO 8601 duration '{0}'")]
    InvalidDuration(String),

    #[error("Invalid collection specifier '{0}', expected MISSION/FILE-TYPE")]
    InvalidCollection(String),

    #[error("Invalid location type '{0}'")]
    InvalidLocationType(String),

    #[error("Unknown task module '{0}'")]
    UnknownTaskModule(String),

    #[error("Failed to initialise logging: {0}")]
    Logging(String),
}

#[derive(Error, Debug)]
pub enum LockError {
    #[error("File is locked: {0}")]
    Contended(PathBuf),

    #[error("Failed to open lock file '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to release lock file '{path}': {source}")]
    Release {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("Failed to scan location '{url}': {reason}")]
    Scan { url: String, reason: String },

    #[error("HTTP request to '{url}' failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to parse listing of '{url}': {reason}")]
    Listing { url: String, reason: String },

    #[error("No such collection {0}")]
    UnknownCollection(String),

    #[error("Collection {collection} has no location '{url}'")]
    UnknownLocation { collection: String, url: String },

    #[error("Failed to prepare directory '{path}': {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove index file '{path}': {source}")]
    RemoveFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum RetrieveError {
    #[error("Failed to retrieve '{url}': {reason}")]
    Request { url: String, reason: String },

    #[error("Failed to store '{path}': {source}")]
    Store {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Invalid index file name '{0}'")]
    InvalidFilename(String),

    #[error("Index file '{filename}' has no such field '{field}'")]
    MissingField { filename: String, field: String },

    #[error("Unknown record field '{0}' in metadata mapping")]
    UnknownTargetField(String),

    #[error("Metadata mapping has no 'filename' entry")]
    MissingFilenameMapping,

    #[error("Invalid value '{value}' for field '{field}' in line {line}: {reason}")]
    InvalidValue {
        field: String,
        value: String,
        line: usize,
        reason: String,
    },

    #[error("Failed to read index file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read compressed index file '{path}': {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("Failed to move '{from}' to '{to}': {source}")]
    MoveFile {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to ingest '{filename}' into {collection} ({url}): {reason}")]
    Failed {
        filename: String,
        collection: String,
        url: String,
        reason: String,
    },

    #[error(transparent)]
    Harvest(#[from] HarvestError),

    #[error(transparent)]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum GeometryError {
    #[error("The geometry is empty")]
    Empty,

    #[error("Invalid coordinate list '{0}'")]
    InvalidCoordinates(String),
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Neither configuration nor data export specified")]
    NothingToExport,

    #[error("Failed to write export archive '{path}': {reason}")]
    Archive { path: PathBuf, reason: String },

    #[error(transparent)]
    Harvest(#[from] HarvestError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("One of logs or config must be specified")]
    NothingToBackup,

    #[error("Failed to write backup archive '{path}': {reason}")]
    Archive { path: PathBuf, reason: String },

    #[error(transparent)]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker pool is closed")]
    ChannelClosed,
}

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Task '{0}' is not registered")]
    UnknownTask(String),

    #[error("Task '{0}' is already registered")]
    DuplicateTask(String),

    #[error("Invalid arguments for task '{task}': {source}")]
    InvalidArguments {
        task: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize result of task '{task}': {source}")]
    InvalidResult {
        task: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("No such job '{0}'")]
    UnknownJob(String),

    #[error("Task panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Harvest(#[from] HarvestError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Ipc(#[from] IpcError),

    #[error(transparent)]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("Failed to connect to daemon at {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to bind daemon endpoint {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error on daemon connection: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Message of {0} bytes exceeds the frame limit")]
    FrameTooLarge(usize),

    #[error("Daemon rejected the request: {0}")]
    Rejected(String),
}

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Daemon is not in a runnable state ({0})")]
    InvalidState(String),

    #[error("Failed to spawn thread '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to reload schedule: {0}")]
    Reload(#[source] crate::db::DatabaseError),

    #[error(transparent)]
    Ipc(#[from] IpcError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error(transparent)]
    Database(#[from] crate::db::DatabaseError),
}

pub type Result<T> = std::result::Result<T, MinvError>;
