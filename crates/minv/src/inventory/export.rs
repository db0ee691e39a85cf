//! Export of a collection's configuration and ingested index files to a
//! ZIP archive.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::info;
use serde::{Deserialize, Serialize};

use crate::config::{load_collection_config, Settings};
use crate::db::inventory_repo::{self, CollectionRow};
use crate::error::ExportError;
use crate::inventory::archive::ArchiveWriter;
use crate::inventory::collection::{find_collection, slugify, LocationDirs, Stage};
use crate::inventory::lock::CollectionLock;
use crate::tasks::TaskContext;

fn yes() -> bool {
    true
}

/// Arguments of the `export` task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportArgs {
    pub mission: String,
    pub file_type: String,
    /// Output path. Defaults to a timestamped file in the collection's
    /// `exports` directory.
    #[serde(default)]
    pub filename: Option<PathBuf>,
    #[serde(default = "yes")]
    pub configuration: bool,
    #[serde(default = "yes")]
    pub data: bool,
    #[serde(default)]
    pub reschedule: bool,
}

#[derive(Debug, Serialize)]
struct Manifest<'a> {
    version: &'a str,
    mission: &'a str,
    file_type: &'a str,
}

#[derive(Debug, Serialize)]
struct LocationEntry {
    #[serde(rename = "type")]
    location_type: String,
    directory: String,
}

pub fn exports_dir(settings: &Settings, mission: &str, file_type: &str) -> PathBuf {
    settings.collection_data_dir(mission, file_type).join("exports")
}

/// Writes the export archive under the collection lock and returns its path.
pub fn export_collection(ctx: &TaskContext, args: &ExportArgs) -> Result<PathBuf, ExportError> {
    if !args.configuration && !args.data {
        return Err(ExportError::NothingToExport);
    }

    let collection = find_collection(&ctx.db, &args.mission, &args.file_type)?;
    let path = match &args.filename {
        Some(path) => path.clone(),
        None => exports_dir(&ctx.settings, &args.mission, &args.file_type).join(format!(
            "export_{}.zip",
            Utc::now().format("%Y%m%d-%H%M%S")
        )),
    };

    let path = CollectionLock::for_collection(&ctx.settings, &args.mission, &args.file_type)
        .with_lock(|| export_locked(ctx, &collection, &path, args.configuration, args.data))?;

    info!(
        "Exported collection {}/{} to {}",
        collection.mission,
        collection.file_type,
        path.display()
    );
    Ok(path)
}

fn export_locked(
    ctx: &TaskContext,
    collection: &CollectionRow,
    path: &Path,
    configuration: bool,
    data: bool,
) -> Result<PathBuf, ExportError> {
    let archive_err = |e: zip::result::ZipError| ExportError::Archive {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    let mut archive = ArchiveWriter::create(path).map_err(archive_err)?;
    archive
        .add_json(
            "manifest.json",
            &Manifest {
                version: env!("CARGO_PKG_VERSION"),
                mission: &collection.mission,
                file_type: &collection.file_type,
            },
        )
        .map_err(archive_err)?;

    if configuration {
        let config = load_collection_config(
            ctx.settings
                .collection_config_path(&collection.mission, &collection.file_type),
        )?;
        archive
            .add_json("collection.json", &config)
            .map_err(archive_err)?;
    }

    let locations = inventory_repo::list_locations(&ctx.db, collection.id)?;
    let entries: BTreeMap<&str, LocationEntry> = locations
        .iter()
        .map(|l| {
            (
                l.url.as_str(),
                LocationEntry {
                    location_type: l.location_type.clone(),
                    directory: slugify(&l.url),
                },
            )
        })
        .collect();
    archive
        .add_json("locations.json", &entries)
        .map_err(archive_err)?;

    if data {
        let collection_dir = ctx
            .settings
            .collection_data_dir(&collection.mission, &collection.file_type);
        for location in &locations {
            let dirs = LocationDirs::new(&collection_dir, &location.url);
            let slug = slugify(&location.url);
            for filename in inventory_repo::index_filenames(&ctx.db, location.id)? {
                archive
                    .add_file(
                        &format!("locations/{}/{}", slug, filename),
                        &dirs.path(Stage::Ingested, &filename),
                    )
                    .map_err(archive_err)?;
            }
        }
    }

    archive.finish().map_err(archive_err)
}

/// Export archives of a collection, oldest first.
pub fn list_exports(
    settings: &Settings,
    mission: &str,
    file_type: &str,
) -> Result<Vec<PathBuf>, ExportError> {
    let dir = exports_dir(settings, mission, file_type);
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut exports = Vec::new();
    for entry in walkdir::WalkDir::new(&dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| ExportError::Archive {
            path: dir.clone(),
            reason: e.to_string(),
        })?;
        let is_zip = entry.path().extension().is_some_and(|ext| ext == "zip");
        if entry.file_type().is_file() && is_zip {
            exports.push(entry.into_path());
        }
    }
    exports.sort();
    Ok(exports)
}
