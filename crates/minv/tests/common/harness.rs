//! Test harness for isolated test execution.
//!
//! Every harness owns a temporary root holding the data, config and lock
//! directories, an in-memory database with one collection and a task
//! context wired to the fakes.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use minv::config::{save_collection_config, CollectionConfig, Settings};
use minv::db::{inventory_repo, Database};
use minv::inventory::{LocationDirs, Stage};
use minv::tasks::TaskContext;

use super::fakes::{FakeHarvesterFactory, RecordingNotifier};

pub const MISSION: &str = "Envisat";
pub const FILE_TYPE: &str = "ASA_IMS_1P";

/// Index file name for day `day` of January 2020 with update day `update`.
pub fn index_name(day: u32, update: u32) -> String {
    format!(
        "202001{:02}-000000_202001{:02}-235959_202002{:02}-000000.index",
        day, day, update
    )
}

pub struct TestHarness {
    temp_dir: TempDir,
    pub settings: Arc<Settings>,
    pub db: Database,
    pub harvesters: FakeHarvesterFactory,
    pub notifier: Arc<RecordingNotifier>,
    pub ctx: TaskContext,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(CollectionConfig::default())
    }

    pub fn with_config(config: CollectionConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let settings = Arc::new(Settings::rooted_at(temp_dir.path()));
        save_collection_config(settings.collection_config_path(MISSION, FILE_TYPE), &config)
            .expect("Failed to write collection config");

        let db = Database::open_in_memory().expect("Failed to open database");
        inventory_repo::ensure_collection(&db, MISSION, FILE_TYPE)
            .expect("Failed to create collection");

        let harvesters = FakeHarvesterFactory::new();
        let notifier = Arc::new(RecordingNotifier::default());
        let ctx = TaskContext::new(db.clone(), Arc::clone(&settings))
            .with_harvesters(Arc::new(harvesters.clone()))
            .with_notifier(notifier.clone());

        Self {
            temp_dir,
            settings,
            db,
            harvesters,
            notifier,
            ctx,
        }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Registers a location of the test collection and returns its id.
    pub fn add_location(&self, url: &str, location_type: &str) -> i64 {
        let collection = inventory_repo::find_collection(&self.db, MISSION, FILE_TYPE)
            .unwrap()
            .unwrap();
        inventory_repo::add_location(&self.db, collection.id, url, location_type).unwrap()
    }

    pub fn dirs(&self, url: &str) -> LocationDirs {
        LocationDirs::new(
            &self.settings.collection_data_dir(MISSION, FILE_TYPE),
            url,
        )
    }

    pub fn staged(&self, url: &str, stage: Stage, filename: &str) -> PathBuf {
        self.dirs(url).path(stage, filename)
    }

    pub fn known_files(&self, location_id: i64) -> Vec<String> {
        inventory_repo::index_filenames(&self.db, location_id).unwrap()
    }
}
