//! Collections, locations and their index files.

pub mod archive;
pub mod backup;
pub mod collection;
pub mod export;
pub mod geometry;
pub mod harvest;
pub mod harvester;
pub mod index_file;
pub mod ingest;
pub mod lock;
pub mod record;
pub mod tasks;

pub use backup::{backup, BackupArgs};
pub use collection::{parse_collection, slugify, LocationDirs, Stage};
pub use export::{export_collection, list_exports, ExportArgs};
pub use harvest::{harvest, select_index_files, HarvestReport, IndexFileSelection};
pub use harvester::{Harvester, HarvesterFactory, LocationKind, RemoteIndexFile};
pub use ingest::ingest;
pub use lock::{CollectionLock, CollectionLockGuard};
pub use tasks::{HarvestArgs, HarvestSummary};
