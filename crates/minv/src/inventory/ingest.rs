//! Ingest of a retrieved index file.
//!
//! The file must sit in the location's `pending` directory. Its records are
//! written in one transaction; afterwards the file is moved to `ingested`
//! on success or to `failed` on error. The directory a file ends up in is
//! the durable marker of the outcome.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use log::{debug, error, info};
use serde_json::{Map, Value};

use crate::config::{load_collection_config, CollectionConfig};
use crate::db::inventory_repo::{self, CollectionRow, LocationRow, NewIndexFile};
use crate::error::{HarvestError, IngestError};
use crate::inventory::collection::{find_collection, find_location, LocationDirs, Stage};
use crate::inventory::geometry::FootprintNormalizer;
use crate::inventory::index_file::parse_times;
use crate::inventory::record::RecordField;
use crate::tasks::TaskContext;

/// Resolved collection, location and configuration an index file is
/// ingested into.
pub struct IngestTarget<'a> {
    pub collection: &'a CollectionRow,
    pub location: &'a LocationRow,
    pub config: &'a CollectionConfig,
    pub dirs: &'a LocationDirs,
}

/// Ingests `pending/<slug>/<filename>` of the given location and returns
/// the number of records written.
pub fn ingest(
    ctx: &TaskContext,
    mission: &str,
    file_type: &str,
    url: &str,
    filename: &str,
) -> Result<usize, IngestError> {
    let collection = find_collection(&ctx.db, mission, file_type)?;
    let location = find_location(&ctx.db, &collection, url)?;
    let config = load_collection_config(ctx.settings.collection_config_path(mission, file_type))
        .map_err(HarvestError::from)?;
    let dirs = LocationDirs::new(&ctx.settings.collection_data_dir(mission, file_type), url);
    dirs.create_all()?;

    ingest_into(
        ctx,
        &IngestTarget {
            collection: &collection,
            location: &location,
            config: &config,
            dirs: &dirs,
        },
        filename,
    )
}

pub(crate) fn ingest_into(
    ctx: &TaskContext,
    target: &IngestTarget<'_>,
    filename: &str,
) -> Result<usize, IngestError> {
    let span = tracing::info_span!("ingest", filename, url = %target.location.url);
    let _enter = span.enter();

    let pending = target.dirs.path(Stage::Pending, filename);
    if !pending.is_file() {
        return Err(IngestError::Read {
            path: pending,
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not a pending index file"),
        });
    }

    let started = Instant::now();
    let mapping = target.config.metadata_mapping_for(&target.location.url);
    let chunk_size = ctx.settings.ingest.chunk_size.max(1);

    let result = ctx.db.transaction(|tx| {
        let times = parse_times(filename)?;
        let index_file_id = inventory_repo::insert_index_file(
            tx,
            &NewIndexFile {
                location_id: target.location.id,
                filename: filename.to_string(),
                begin_time: times.begin,
                end_time: times.end,
                update_time: times.update,
                insertion_time: Utc::now(),
            },
        )?;

        let reader = RecordReader {
            filename,
            mapping,
            chunk_size,
            geometry: ctx.geometry.as_ref(),
        };
        reader.read(&pending, |chunk| {
            inventory_repo::insert_records(tx, target.location.id, index_file_id, chunk)?;
            Ok(())
        })
    });

    let collection = format!("{}/{}", target.collection.mission, target.collection.file_type);
    match result {
        Ok(count) => {
            move_file(&pending, &target.dirs.path(Stage::Ingested, filename))?;
            info!(
                "Ingested {} records from '{}' into {} ({}) in {:.3}s",
                count,
                filename,
                collection,
                target.location.url,
                started.elapsed().as_secs_f64()
            );
            Ok(count)
        }
        Err(e) => {
            if let Err(move_err) = move_file(&pending, &target.dirs.path(Stage::Failed, filename)) {
                error!("{}", move_err);
            }
            error!(
                "Failed to ingest '{}' into {} ({}): {}",
                filename, collection, target.location.url, e
            );
            Err(IngestError::Failed {
                filename: filename.to_string(),
                collection,
                url: target.location.url.clone(),
                reason: e.to_string(),
            })
        }
    }
}

fn move_file(from: &Path, to: &Path) -> Result<(), IngestError> {
    std::fs::rename(from, to).map_err(|e| IngestError::MoveFile {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source: e,
    })
}

struct ColumnTransform {
    field: RecordField,
    column: usize,
}

/// Builds the per-field conversion table against the header line.
fn build_transforms(
    mapping: &BTreeMap<String, String>,
    header: &[&str],
    filename: &str,
) -> Result<Vec<ColumnTransform>, IngestError> {
    if !mapping.contains_key("filename") {
        return Err(IngestError::MissingFilenameMapping);
    }

    mapping
        .iter()
        .map(|(target, source)| {
            let field = RecordField::from_name(target)
                .ok_or_else(|| IngestError::UnknownTargetField(target.clone()))?;
            let column = header
                .iter()
                .position(|h| h.trim() == source)
                .ok_or_else(|| IngestError::MissingField {
                    filename: filename.to_string(),
                    field: source.clone(),
                })?;
            Ok(ColumnTransform { field, column })
        })
        .collect()
}

struct RecordReader<'a> {
    filename: &'a str,
    mapping: &'a BTreeMap<String, String>,
    chunk_size: usize,
    geometry: &'a dyn FootprintNormalizer,
}

impl RecordReader<'_> {
    /// Reads a plain or zipped index file and hands records to `store` in
    /// chunks of at most `chunk_size`.
    fn read<F>(&self, path: &Path, store: F) -> Result<usize, IngestError>
    where
        F: FnMut(&[(String, Value)]) -> Result<(), IngestError>,
    {
        let read_error = |e: std::io::Error| IngestError::Read {
            path: path.to_path_buf(),
            source: e,
        };
        let file = File::open(path).map_err(read_error)?;

        if self.filename.ends_with(".zip") {
            let archive_error = |e: zip::result::ZipError| IngestError::Archive {
                path: path.to_path_buf(),
                source: e,
            };
            let mut archive = zip::ZipArchive::new(file).map_err(archive_error)?;
            let entry = archive.by_index(0).map_err(archive_error)?;
            self.read_lines(BufReader::new(entry), path.to_path_buf(), store)
        } else {
            self.read_lines(BufReader::new(file), path.to_path_buf(), store)
        }
    }

    fn read_lines<R: BufRead, F>(
        &self,
        reader: R,
        path: PathBuf,
        mut store: F,
    ) -> Result<usize, IngestError>
    where
        F: FnMut(&[(String, Value)]) -> Result<(), IngestError>,
    {
        let mut lines = reader.lines();
        let header = match lines.next() {
            Some(line) => line.map_err(|e| IngestError::Read {
                path: path.clone(),
                source: e,
            })?,
            None => String::new(),
        };
        let header: Vec<&str> = header.trim_end_matches('\r').split('\t').collect();
        let transforms = build_transforms(self.mapping, &header, self.filename)?;

        let mut chunk = Vec::with_capacity(self.chunk_size);
        let mut count = 0;

        for (index, line) in lines.enumerate() {
            let line = line.map_err(|e| IngestError::Read {
                path: path.clone(),
                source: e,
            })?;
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }

            // Header is line 1.
            chunk.push(self.convert_row(line, index + 2, &transforms)?);

            if chunk.len() >= self.chunk_size {
                store(&chunk)?;
                count += chunk.len();
                debug!("Stored chunk of {} records ({} total)", chunk.len(), count);
                chunk.clear();
            }
        }

        if !chunk.is_empty() {
            store(&chunk)?;
            count += chunk.len();
            debug!("Stored chunk of {} records ({} total)", chunk.len(), count);
        }

        Ok(count)
    }

    fn convert_row(
        &self,
        line: &str,
        line_number: usize,
        transforms: &[ColumnTransform],
    ) -> Result<(String, Value), IngestError> {
        let cells: Vec<&str> = line.split('\t').collect();
        let mut metadata = Map::new();
        let mut filename = None;

        for transform in transforms {
            let raw = cells.get(transform.column).copied().unwrap_or("");
            let value = transform
                .field
                .kind()
                .convert(raw, self.geometry)
                .map_err(|reason| IngestError::InvalidValue {
                    field: transform.field.name().to_string(),
                    value: raw.to_string(),
                    line: line_number,
                    reason,
                })?;

            if transform.field == RecordField::Filename {
                filename = value.as_str().map(str::to_string);
            }
            metadata.insert(transform.field.name().to_string(), value);
        }

        let filename = filename.ok_or_else(|| IngestError::InvalidValue {
            field: RecordField::Filename.name().to_string(),
            value: String::new(),
            line: line_number,
            reason: "a record needs a filename".to_string(),
        })?;

        Ok((filename, Value::Object(metadata)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::geometry::PlanarFootprint;

    fn mapping(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(t, s)| (t.to_string(), s.to_string()))
            .collect()
    }

    fn read_all(content: &str, mapping: &BTreeMap<String, String>, chunk_size: usize) -> Result<(usize, Vec<usize>), IngestError> {
        let reader = RecordReader {
            filename: "x.index",
            mapping,
            chunk_size,
            geometry: &PlanarFootprint,
        };
        let mut chunks = Vec::new();
        let count = reader.read_lines(content.as_bytes(), PathBuf::from("x.index"), |chunk| {
            chunks.push(chunk.len());
            Ok(())
        })?;
        Ok((count, chunks))
    }

    #[test]
    fn test_chunked_reading() {
        let mut content = String::from("name\torbit\n");
        for i in 0..7 {
            content.push_str(&format!("f{}.SAFE\t{}\n", i, i));
        }
        let m = mapping(&[("filename", "name"), ("orbit_number", "orbit")]);
        let (count, chunks) = read_all(&content, &m, 3).unwrap();
        assert_eq!(count, 7);
        assert_eq!(chunks, vec![3, 3, 1]);
    }

    #[test]
    fn test_missing_column() {
        let m = mapping(&[("filename", "name"), ("track", "trk")]);
        let result = read_all("name\torbit\nf.SAFE\t1\n", &m, 10);
        assert!(matches!(result, Err(IngestError::MissingField { field, .. }) if field == "trk"));
    }

    #[test]
    fn test_missing_filename_mapping() {
        let m = mapping(&[("track", "trk")]);
        assert!(matches!(
            read_all("trk\n1\n", &m, 10),
            Err(IngestError::MissingFilenameMapping)
        ));
    }

    #[test]
    fn test_unknown_target_field() {
        let m = mapping(&[("filename", "name"), ("colour", "c")]);
        assert!(matches!(
            read_all("name\tc\nx\ty\n", &m, 10),
            Err(IngestError::UnknownTargetField(f)) if f == "colour"
        ));
    }

    #[test]
    fn test_invalid_value_reports_line() {
        let m = mapping(&[("filename", "name"), ("orbit_number", "orbit")]);
        let result = read_all("name\torbit\na\t1\nb\tx\n", &m, 10);
        assert!(matches!(
            result,
            Err(IngestError::InvalidValue { line: 3, ref field, .. }) if field == "orbit_number"
        ));
    }

    #[test]
    fn test_empty_cells_and_enumerations() {
        let m = mapping(&[
            ("filename", "name"),
            ("orbit_direction", "dir"),
            ("track", "track"),
        ]);
        let reader = RecordReader {
            filename: "x.index",
            mapping: &m,
            chunk_size: 10,
            geometry: &PlanarFootprint,
        };
        let mut records = Vec::new();
        reader
            .read_lines(
                "name\tdir\ttrack\r\na.SAFE\tdescending\t\r\n".as_bytes(),
                PathBuf::from("x.index"),
                |chunk| {
                    records.extend_from_slice(chunk);
                    Ok(())
                },
            )
            .unwrap();
        assert_eq!(records.len(), 1);
        let (filename, metadata) = &records[0];
        assert_eq!(filename, "a.SAFE");
        assert_eq!(metadata["orbit_direction"], "D");
        assert!(metadata["track"].is_null());
    }
}
