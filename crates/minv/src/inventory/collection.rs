//! Collection identity and the on-disk recovery directories of its
//! locations.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::db::inventory_repo::{self, CollectionRow, LocationRow};
use crate::db::Database;
use crate::error::{ConfigError, HarvestError};

/// Parses a `MISSION/FILE-TYPE` collection specifier.
pub fn parse_collection(value: &str) -> Result<(String, String), ConfigError> {
    match value.split_once('/') {
        Some((mission, file_type))
            if !mission.is_empty() && !file_type.is_empty() && !file_type.contains('/') =>
        {
            Ok((mission.to_string(), file_type.to_string()))
        }
        _ => Err(ConfigError::InvalidCollection(value.to_string())),
    }
}

/// Directory-safe slug of a location URL.
pub fn slugify(url: &str) -> String {
    let mut slug = String::with_capacity(url.len());
    let mut pending_dash = false;
    for c in url.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else {
            pending_dash = true;
        }
    }
    slug
}

pub fn find_collection(
    db: &Database,
    mission: &str,
    file_type: &str,
) -> Result<CollectionRow, HarvestError> {
    inventory_repo::find_collection(db, mission, file_type)?
        .ok_or_else(|| HarvestError::UnknownCollection(format!("{}/{}", mission, file_type)))
}

pub fn find_location(
    db: &Database,
    collection: &CollectionRow,
    url: &str,
) -> Result<LocationRow, HarvestError> {
    inventory_repo::find_location(db, collection.id, url)?.ok_or_else(|| {
        HarvestError::UnknownLocation {
            collection: format!("{}/{}", collection.mission, collection.file_type),
            url: url.to_string(),
        }
    })
}

/// Where an index file currently sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Pending,
    Ingested,
    Failed,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Pending => "pending",
            Stage::Ingested => "ingested",
            Stage::Failed => "failed",
        }
    }
}

/// The `pending`, `ingested` and `failed` directories of one location.
#[derive(Debug, Clone)]
pub struct LocationDirs {
    pending: PathBuf,
    ingested: PathBuf,
    failed: PathBuf,
}

impl LocationDirs {
    pub fn new(collection_dir: &Path, url: &str) -> Self {
        let slug = slugify(url);
        Self {
            pending: collection_dir.join(Stage::Pending.as_str()).join(&slug),
            ingested: collection_dir.join(Stage::Ingested.as_str()).join(&slug),
            failed: collection_dir.join(Stage::Failed.as_str()).join(&slug),
        }
    }

    pub fn dir(&self, stage: Stage) -> &Path {
        match stage {
            Stage::Pending => &self.pending,
            Stage::Ingested => &self.ingested,
            Stage::Failed => &self.failed,
        }
    }

    pub fn path(&self, stage: Stage, filename: &str) -> PathBuf {
        self.dir(stage).join(filename)
    }

    pub fn create_all(&self) -> Result<(), HarvestError> {
        for dir in [&self.pending, &self.ingested, &self.failed] {
            std::fs::create_dir_all(dir).map_err(|e| HarvestError::Directory {
                path: dir.clone(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// Names of the regular files in one stage directory, sorted. A missing
    /// directory is empty.
    pub fn filenames(&self, stage: Stage) -> Result<Vec<String>, HarvestError> {
        let dir = self.dir(stage);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| HarvestError::Directory {
                path: dir.to_path_buf(),
                source: e.into(),
            })?;
            if entry.file_type().is_file() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_slugify() {
        assert_eq!(
            slugify("https://Data.example.com/oads/S1/"),
            "https-data-example-com-oads-s1"
        );
        assert_eq!(slugify("http://a/"), "http-a");
        assert_eq!(slugify("--x__y--"), "x-y");
    }

    #[test]
    fn test_parse_collection() {
        assert_eq!(
            parse_collection("S1/SAR").unwrap(),
            ("S1".to_string(), "SAR".to_string())
        );
        assert!(parse_collection("S1").is_err());
        assert!(parse_collection("/SAR").is_err());
        assert!(parse_collection("S1/SAR/x").is_err());
    }

    #[test]
    fn test_location_dirs() {
        let dir = TempDir::new().unwrap();
        let dirs = LocationDirs::new(dir.path(), "http://a/");
        assert_eq!(dirs.dir(Stage::Pending), dir.path().join("pending").join("http-a"));

        assert!(dirs.filenames(Stage::Ingested).unwrap().is_empty());
        dirs.create_all().unwrap();
        std::fs::write(dirs.path(Stage::Failed, "b.index"), "").unwrap();
        std::fs::write(dirs.path(Stage::Failed, "a.index"), "").unwrap();
        assert_eq!(
            dirs.filenames(Stage::Failed).unwrap(),
            vec!["a.index", "b.index"]
        );
    }

    #[test]
    fn test_unknown_collection() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            find_collection(&db, "S1", "SAR"),
            Err(HarvestError::UnknownCollection(c)) if c == "S1/SAR"
        ));
    }
}
