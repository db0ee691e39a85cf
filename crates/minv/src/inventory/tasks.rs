//! `harvest` and `export` task handlers.

use std::path::PathBuf;

use chrono::TimeDelta;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{load_collection_config, CollectionConfig};
use crate::error::{ConfigError, TaskError};
use crate::inventory::export::{export_collection, ExportArgs};
use crate::inventory::harvest::{harvest, HarvestReport};
use crate::tasks::api;
use crate::tasks::registry::{typed_handler, Registry, TaskName};
use crate::tasks::{TaskContext, When};

/// Arguments of the `harvest` task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestArgs {
    pub mission: String,
    pub file_type: String,
    pub url: String,
    #[serde(default)]
    pub reschedule: bool,
}

/// Job result of a harvest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HarvestSummary {
    pub inserted: Vec<String>,
    pub updated: Vec<(String, String)>,
    pub deleted: Vec<String>,
    pub failed_retrieve: Vec<String>,
    pub failed_ingest: Vec<String>,
    pub records: usize,
}

impl From<HarvestReport> for HarvestSummary {
    fn from(report: HarvestReport) -> Self {
        Self {
            inserted: report.selection.inserted,
            updated: report.selection.updated,
            deleted: report.selection.deleted,
            failed_retrieve: report.failed_retrieve,
            failed_ingest: report.failed_ingest,
            records: report.records,
        }
    }
}

pub fn run_harvest(ctx: &TaskContext, args: &HarvestArgs) -> Result<HarvestSummary, TaskError> {
    let result = harvest(ctx, &args.mission, &args.file_type, &args.url);

    if args.reschedule {
        if let Err(e) = reschedule_harvest(ctx, args) {
            error!(
                "Failed to reschedule harvest of {} for {}/{}: {}",
                args.url, args.mission, args.file_type, e
            );
        }
    }

    let summary = HarvestSummary::from(result?);
    if !summary.failed_retrieve.is_empty() || !summary.failed_ingest.is_empty() {
        warn!(
            "Harvest of {} finished with {} failed retrievals and {} failed ingests",
            args.url,
            summary.failed_retrieve.len(),
            summary.failed_ingest.len()
        );
    }
    Ok(summary)
}

pub fn run_export(ctx: &TaskContext, args: &ExportArgs) -> Result<PathBuf, TaskError> {
    let result = export_collection(ctx, args);

    if args.reschedule {
        if let Err(e) = reschedule_export(ctx, args) {
            error!(
                "Failed to reschedule export of {}/{}: {}",
                args.mission, args.file_type, e
            );
        }
    }

    Ok(result?)
}

fn collection_interval(
    ctx: &TaskContext,
    mission: &str,
    file_type: &str,
    pick: fn(&CollectionConfig) -> Result<Option<TimeDelta>, ConfigError>,
) -> Result<Option<TimeDelta>, TaskError> {
    let config = load_collection_config(ctx.settings.collection_config_path(mission, file_type))?;
    Ok(pick(&config)?)
}

fn same_target(arguments: &Value, mission: &str, file_type: &str) -> bool {
    arguments.get("mission").and_then(Value::as_str) == Some(mission)
        && arguments.get("file_type").and_then(Value::as_str) == Some(file_type)
}

fn reschedule(
    ctx: &TaskContext,
    task: TaskName,
    interval: Option<TimeDelta>,
    arguments: Value,
    is_same: impl Fn(&Value) -> bool,
) -> Result<Option<i64>, TaskError> {
    let Some(interval) = interval else {
        warn!("No interval configured for {}, not rescheduling", task);
        return Ok(None);
    };

    let removed = api::remove_scheduled(&ctx.db, task, is_same)?;
    if removed > 0 {
        info!("Removed {} superseded {} schedule(s)", removed, task);
    }
    let id = api::schedule(
        &ctx.db,
        ctx.notifier.as_ref(),
        task,
        When::In(interval),
        &arguments,
    )?;
    Ok(Some(id))
}

/// Schedules the next harvest of the same location after the collection's
/// harvest interval, replacing any pending one.
pub fn reschedule_harvest(ctx: &TaskContext, args: &HarvestArgs) -> Result<Option<i64>, TaskError> {
    let interval = collection_interval(
        ctx,
        &args.mission,
        &args.file_type,
        CollectionConfig::harvest_interval,
    )?;
    let arguments = serde_json::to_value(args).map_err(|e| TaskError::InvalidArguments {
        task: TaskName::Harvest.to_string(),
        source: e,
    })?;
    reschedule(ctx, TaskName::Harvest, interval, arguments, |other| {
        same_target(other, &args.mission, &args.file_type)
            && other.get("url").and_then(Value::as_str) == Some(args.url.as_str())
    })
}

/// Schedules the next export of the collection after its export interval,
/// replacing any pending one.
pub fn reschedule_export(ctx: &TaskContext, args: &ExportArgs) -> Result<Option<i64>, TaskError> {
    let interval = collection_interval(
        ctx,
        &args.mission,
        &args.file_type,
        CollectionConfig::export_interval,
    )?;
    let arguments = serde_json::to_value(args).map_err(|e| TaskError::InvalidArguments {
        task: TaskName::Export.to_string(),
        source: e,
    })?;
    reschedule(ctx, TaskName::Export, interval, arguments, |other| {
        same_target(other, &args.mission, &args.file_type)
    })
}

pub fn register(registry: &mut Registry) -> Result<(), TaskError> {
    registry.register(
        TaskName::Harvest,
        typed_handler(TaskName::Harvest, |ctx: &TaskContext, args: HarvestArgs| {
            run_harvest(ctx, &args)
        }),
    )?;
    registry.register(
        TaskName::Export,
        typed_handler(TaskName::Export, |ctx: &TaskContext, args: ExportArgs| {
            run_export(ctx, &args)
        }),
    )
}
