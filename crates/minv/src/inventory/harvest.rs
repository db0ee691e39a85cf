//! Harvest of one location: scan, diff against the known index files,
//! retrieve, drop superseded files and ingest.

use std::collections::{BTreeMap, HashMap};

use log::{debug, error, info};

use crate::config::{load_collection_config, CollectionConfig};
use crate::db::inventory_repo::{self, CollectionRow, LocationRow};
use crate::error::HarvestError;
use crate::inventory::collection::{find_collection, find_location, LocationDirs, Stage};
use crate::inventory::harvester::Harvester;
use crate::inventory::index_file::{key, update_part};
use crate::inventory::ingest::{ingest_into, IngestTarget};
use crate::inventory::lock::CollectionLock;
use crate::tasks::TaskContext;

/// Classification of remote index files against the known ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexFileSelection {
    /// Available files with no known version.
    pub inserted: Vec<String>,
    /// `(known, available)` pairs where the available one is newer.
    pub updated: Vec<(String, String)>,
    /// Known files no longer available.
    pub deleted: Vec<String>,
}

impl IndexFileSelection {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

fn by_key<I>(names: I) -> BTreeMap<String, String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let mut map: BTreeMap<String, String> = BTreeMap::new();
    for name in names {
        let name = name.as_ref();
        let newer_known = map
            .get(key(name))
            .is_some_and(|existing| existing.as_str() >= name);
        if !newer_known {
            map.insert(key(name).to_string(), name.to_string());
        }
    }
    map
}

/// Splits `available` against `known` by their begin+end key. Files whose
/// update timestamp did not increase are in none of the three lists.
pub fn select_index_files<A, K>(available: A, known: K) -> IndexFileSelection
where
    A: IntoIterator,
    A::Item: AsRef<str>,
    K: IntoIterator,
    K::Item: AsRef<str>,
{
    let available = by_key(available);
    let known = by_key(known);

    let mut selection = IndexFileSelection::default();
    for (base, name) in &available {
        match known.get(base) {
            None => selection.inserted.push(name.clone()),
            Some(old) if update_part(old) < update_part(name) => {
                selection.updated.push((old.clone(), name.clone()))
            }
            Some(_) => {}
        }
    }
    selection.deleted = known
        .iter()
        .filter(|(base, _)| !available.contains_key(*base))
        .map(|(_, name)| name.clone())
        .collect();

    selection
}

/// Outcome of one harvest. Per-file failures do not fail the harvest.
#[derive(Debug, Clone, Default)]
pub struct HarvestReport {
    pub selection: IndexFileSelection,
    pub failed_retrieve: Vec<String>,
    pub failed_ingest: Vec<String>,
    pub records: usize,
}

/// Harvests one location of a collection under the collection lock.
pub fn harvest(
    ctx: &TaskContext,
    mission: &str,
    file_type: &str,
    url: &str,
) -> Result<HarvestReport, HarvestError> {
    let span = tracing::info_span!("harvest", mission, file_type, url);
    let _enter = span.enter();

    let collection = find_collection(&ctx.db, mission, file_type)?;
    let location = find_location(&ctx.db, &collection, url)?;
    let harvester = ctx.harvesters.harvester(&location)?;
    let config = load_collection_config(ctx.settings.collection_config_path(mission, file_type))?;

    CollectionLock::for_collection(&ctx.settings, mission, file_type).with_lock(|| {
        harvest_locked(ctx, &collection, &location, &config, harvester.as_ref())
    })
}

fn harvest_locked(
    ctx: &TaskContext,
    collection: &CollectionRow,
    location: &LocationRow,
    config: &CollectionConfig,
    harvester: &dyn Harvester,
) -> Result<HarvestReport, HarvestError> {
    let dirs = LocationDirs::new(
        &ctx.settings
            .collection_data_dir(&collection.mission, &collection.file_type),
        &location.url,
    );
    dirs.create_all()?;

    let available = harvester.scan()?;

    // Files parked in `failed` count as known so they are not retried
    // until an operator moves them.
    let mut known = inventory_repo::index_filenames(&ctx.db, location.id)?;
    known.extend(dirs.filenames(Stage::Failed)?);

    let selection = select_index_files(available.iter().map(|f| f.name.as_str()), &known);
    info!(
        "{}: {} inserted, {} updated, {} deleted",
        location.url,
        selection.inserted.len(),
        selection.updated.len(),
        selection.deleted.len()
    );

    let urls: HashMap<&str, &str> = available
        .iter()
        .map(|f| (f.name.as_str(), f.url.as_str()))
        .collect();

    let mut report = HarvestReport::default();
    let mut retrieved = Vec::new();

    let to_retrieve = selection
        .inserted
        .iter()
        .chain(selection.updated.iter().map(|(_, new)| new));
    for name in to_retrieve {
        let url = urls.get(name.as_str()).copied().unwrap_or_default();
        match harvester.retrieve(url, name, dirs.dir(Stage::Pending)) {
            Ok(_) => retrieved.push(name.clone()),
            Err(e) => {
                error!("Failed to retrieve '{}': {}", name, e);
                report.failed_retrieve.push(name.clone());
            }
        }
    }

    let superseded = selection
        .updated
        .iter()
        .map(|(old, _)| old)
        .chain(selection.deleted.iter());
    for name in superseded {
        inventory_repo::delete_index_file(&ctx.db, location.id, name)?;
        let path = dirs.path(Stage::Ingested, name);
        match std::fs::remove_file(&path) {
            Ok(()) => debug!("Removed {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(HarvestError::RemoveFile { path, source: e }),
        }
    }

    let target = IngestTarget {
        collection,
        location,
        config,
        dirs: &dirs,
    };
    for name in &retrieved {
        match ingest_into(ctx, &target, name) {
            Ok(count) => report.records += count,
            Err(e) => {
                error!("{}", e);
                report.failed_ingest.push(name.clone());
            }
        }
    }

    report.selection = selection;
    Ok(report)
}
