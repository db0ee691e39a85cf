//! Full backups of logs and configuration.

use std::path::PathBuf;

use chrono::Utc;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::db::inventory_repo;
use crate::error::{BackupError, TaskError};
use crate::inventory::archive::ArchiveWriter;
use crate::tasks::registry::{typed_handler, Registry, TaskName};
use crate::tasks::TaskContext;

/// Arguments of the `backup` task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupArgs {
    #[serde(default)]
    pub logs: bool,
    #[serde(default)]
    pub config: bool,
    /// Output path. Defaults to a timestamped file in `backup.directory`.
    #[serde(default)]
    pub out_path: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct Manifest<'a> {
    version: &'a str,
    timestamp: &'a str,
    logs: bool,
    config: bool,
    #[serde(rename = "type")]
    kind: &'a str,
}

#[derive(Debug, Serialize)]
struct LocationEntry<'a> {
    url: &'a str,
    location_type: &'a str,
}

/// Writes the backup archive and returns its path. A failed backup leaves
/// no file behind.
pub fn backup(ctx: &TaskContext, args: &BackupArgs) -> Result<PathBuf, BackupError> {
    if !args.logs && !args.config {
        return Err(BackupError::NothingToBackup);
    }

    let timestamp = Utc::now().format("%Y%m%d-%H%M%S").to_string();
    let path = args.out_path.clone().unwrap_or_else(|| {
        ctx.settings
            .backup
            .directory
            .join(format!("backup.{}.zip", timestamp))
    });
    let archive_err = |e: zip::result::ZipError| BackupError::Archive {
        path: path.clone(),
        reason: e.to_string(),
    };

    let mut archive = ArchiveWriter::create(&path).map_err(archive_err)?;
    archive
        .add_json(
            "manifest.json",
            &Manifest {
                version: env!("CARGO_PKG_VERSION"),
                timestamp: &timestamp,
                logs: args.logs,
                config: args.config,
                kind: "full",
            },
        )
        .map_err(archive_err)?;

    if args.logs {
        match &ctx.settings.log.directory {
            Some(dir) if dir.exists() => {
                for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
                    let entry = entry.map_err(|e| BackupError::Archive {
                        path: path.clone(),
                        reason: e.to_string(),
                    })?;
                    if entry.file_type().is_file() {
                        let name = format!("logs/{}", entry.file_name().to_string_lossy());
                        archive.add_file(&name, entry.path()).map_err(archive_err)?;
                    }
                }
            }
            _ => warn!("No log directory to back up"),
        }
    }

    if args.config {
        if let Some(source) = &ctx.settings.source_path {
            archive
                .add_file("config/settings.json", source)
                .map_err(archive_err)?;
        }

        for collection in inventory_repo::list_collections(&ctx.db)? {
            let prefix = format!(
                "config/collections/{}/{}",
                collection.mission, collection.file_type
            );
            let config_path = ctx
                .settings
                .collection_config_path(&collection.mission, &collection.file_type);
            if config_path.exists() {
                archive
                    .add_file(&format!("{}/collection.json", prefix), &config_path)
                    .map_err(archive_err)?;
            }

            let locations = inventory_repo::list_locations(&ctx.db, collection.id)?;
            let entries: Vec<LocationEntry> = locations
                .iter()
                .map(|l| LocationEntry {
                    url: &l.url,
                    location_type: &l.location_type,
                })
                .collect();
            archive
                .add_json(&format!("{}/locations.json", prefix), &entries)
                .map_err(archive_err)?;
        }
    }

    let path = archive.finish().map_err(archive_err)?;
    info!("Backup written to {}", path.display());
    Ok(path)
}

pub fn register(registry: &mut Registry) -> Result<(), TaskError> {
    registry.register(
        TaskName::Backup,
        typed_handler(TaskName::Backup, |ctx: &TaskContext, args: BackupArgs| {
            Ok(backup(ctx, &args)?)
        }),
    )
}
