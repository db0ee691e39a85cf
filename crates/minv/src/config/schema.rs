use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::config::duration::parse_duration;
use crate::error::ConfigError;

/// Task modules the registry knows how to load.
pub const TASK_MODULES: &[&str] = &["inventory", "backup"];

/// Global settings of an installation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,
    #[serde(default = "default_lock_dir")]
    pub lock_dir: PathBuf,
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default = "default_task_modules")]
    pub task_modules: Vec<String>,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub retrieve: RetrieveConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub log: LogConfig,
    /// File the settings were loaded from, if any.
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

fn base_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".minv"))
        .unwrap_or_else(|| PathBuf::from(".minv"))
}

fn default_data_dir() -> PathBuf {
    base_dir().join("data")
}

fn default_config_dir() -> PathBuf {
    base_dir().join("config")
}

fn default_lock_dir() -> PathBuf {
    base_dir().join("lock")
}

fn default_database_path() -> PathBuf {
    base_dir().join("data").join("minv.db")
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_task_modules() -> Vec<String> {
    TASK_MODULES.iter().map(|m| m.to_string()).collect()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            config_dir: default_config_dir(),
            lock_dir: default_lock_dir(),
            database_path: default_database_path(),
            worker_count: default_worker_count(),
            daemon: DaemonConfig::default(),
            task_modules: default_task_modules(),
            scheduler: SchedulerConfig::default(),
            ingest: IngestConfig::default(),
            retrieve: RetrieveConfig::default(),
            backup: BackupConfig::default(),
            log: LogConfig::default(),
            source_path: None,
        }
    }
}

impl Settings {
    /// Settings with every directory placed below `root`, listening on
    /// `root/daemon.sock`.
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            data_dir: root.join("data"),
            config_dir: root.join("config"),
            lock_dir: root.join("lock"),
            database_path: root.join("data").join("minv.db"),
            worker_count: 2,
            daemon: DaemonConfig {
                socket_path: Some(root.join("daemon.sock")),
                host: default_host(),
                port: None,
            },
            backup: BackupConfig {
                directory: root.join("backups"),
            },
            ..Self::default()
        }
    }

    /// Path of the per-collection configuration file.
    pub fn collection_config_path(&self, mission: &str, file_type: &str) -> PathBuf {
        self.config_dir
            .join("collections")
            .join(mission)
            .join(file_type)
            .join("collection.json")
    }

    /// Data directory of one collection.
    pub fn collection_data_dir(&self, mission: &str, file_type: &str) -> PathBuf {
        self.data_dir.join("collections").join(mission).join(file_type)
    }

    /// Lock file guarding one collection.
    pub fn collection_lock_path(&self, mission: &str, file_type: &str) -> PathBuf {
        self.lock_dir.join(mission).join(format!("{}.lock", file_type))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Local socket endpoint. Mutually exclusive with `port`.
    #[serde(default)]
    pub socket_path: Option<PathBuf>,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
}

fn default_host() -> String {
    "localhost".to_string()
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: Some(base_dir().join("run").join("daemon.sock")),
            host: default_host(),
            port: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds the scheduler sleeps when nothing is scheduled.
    #[serde(default = "default_wait")]
    pub default_wait: u64,
}

fn default_wait() -> u64 {
    3600
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_wait: default_wait(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_chunk_size() -> usize {
    5000
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrieveConfig {
    /// Network timeout in seconds for scans and retrievals.
    #[serde(default)]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    #[serde(default = "default_backup_dir")]
    pub directory: PathBuf,
}

fn default_backup_dir() -> PathBuf {
    base_dir().join("backups")
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            directory: default_backup_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: None,
        }
    }
}

/// Per-collection configuration stored as `collection.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// ISO 8601 duration between two harvests of a location.
    #[serde(default)]
    pub harvest_interval: Option<String>,
    /// ISO 8601 duration between two exports.
    #[serde(default)]
    pub export_interval: Option<String>,
    /// Record field -> index file column.
    #[serde(default = "default_metadata_mapping")]
    pub metadata_mapping: BTreeMap<String, String>,
    /// Location URL -> mapping overriding `metadata_mapping`.
    #[serde(default)]
    pub location_mappings: BTreeMap<String, BTreeMap<String, String>>,
}

fn default_metadata_mapping() -> BTreeMap<String, String> {
    BTreeMap::from([("filename".to_string(), "filename".to_string())])
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            harvest_interval: None,
            export_interval: None,
            metadata_mapping: default_metadata_mapping(),
            location_mappings: BTreeMap::new(),
        }
    }
}

impl CollectionConfig {
    pub fn harvest_interval(&self) -> Result<Option<TimeDelta>, ConfigError> {
        self.harvest_interval.as_deref().map(parse_duration).transpose()
    }

    pub fn export_interval(&self) -> Result<Option<TimeDelta>, ConfigError> {
        self.export_interval.as_deref().map(parse_duration).transpose()
    }

    /// The mapping that applies to the location at `url`.
    pub fn metadata_mapping_for(&self, url: &str) -> &BTreeMap<String, String> {
        self.location_mappings
            .get(url)
            .unwrap_or(&self.metadata_mapping)
    }
}
