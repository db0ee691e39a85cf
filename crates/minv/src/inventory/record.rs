//! Record fields an index file column can be mapped onto, and the value
//! conversion applied to each of them during ingest.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

use crate::inventory::geometry::{parse_point, FootprintNormalizer};

/// How the raw text of a column is turned into a typed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Float,
    Timestamp,
    /// Single upper case letter taken from the first character.
    Enumerated,
    Footprint,
    Point,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordField {
    Filename,
    Filesize,
    Checksum,
    OrbitNumber,
    Track,
    Frame,
    PlatformSerialIdentifier,
    MissionPhase,
    OperationalMode,
    Swath,
    Instrument,
    ProductId,
    BeginTime,
    EndTime,
    InsertionTime,
    CreationDate,
    Baseline,
    SceneCentre,
    Footprint,
    ProcessingCentre,
    ProcessingDate,
    ProcessingMode,
    ProcessorVersion,
    AcquisitionStation,
    OrbitDirection,
    FileType,
    ProductQualityDegradation,
    ProductQualityStatus,
    ProductQualityDegradationTag,
}

const FIELDS: &[(RecordField, &str, FieldKind)] = &[
    (RecordField::Filename, "filename", FieldKind::Text),
    (RecordField::Filesize, "filesize", FieldKind::Integer),
    (RecordField::Checksum, "checksum", FieldKind::Text),
    (RecordField::OrbitNumber, "orbit_number", FieldKind::Integer),
    (RecordField::Track, "track", FieldKind::Integer),
    (RecordField::Frame, "frame", FieldKind::Integer),
    (
        RecordField::PlatformSerialIdentifier,
        "platform_serial_identifier",
        FieldKind::Text,
    ),
    (RecordField::MissionPhase, "mission_phase", FieldKind::Text),
    (RecordField::OperationalMode, "operational_mode", FieldKind::Text),
    (RecordField::Swath, "swath", FieldKind::Text),
    (RecordField::Instrument, "instrument", FieldKind::Text),
    (RecordField::ProductId, "product_id", FieldKind::Text),
    (RecordField::BeginTime, "begin_time", FieldKind::Timestamp),
    (RecordField::EndTime, "end_time", FieldKind::Timestamp),
    (RecordField::InsertionTime, "insertion_time", FieldKind::Timestamp),
    (RecordField::CreationDate, "creation_date", FieldKind::Timestamp),
    (RecordField::Baseline, "baseline", FieldKind::Text),
    (RecordField::SceneCentre, "scene_centre", FieldKind::Point),
    (RecordField::Footprint, "footprint", FieldKind::Footprint),
    (RecordField::ProcessingCentre, "processing_centre", FieldKind::Text),
    (RecordField::ProcessingDate, "processing_date", FieldKind::Timestamp),
    (RecordField::ProcessingMode, "processing_mode", FieldKind::Text),
    (RecordField::ProcessorVersion, "processor_version", FieldKind::Text),
    (
        RecordField::AcquisitionStation,
        "acquisition_station",
        FieldKind::Text,
    ),
    (RecordField::OrbitDirection, "orbit_direction", FieldKind::Enumerated),
    (RecordField::FileType, "file_type", FieldKind::Text),
    // The misspelling is part of the stored field names.
    (
        RecordField::ProductQualityDegradation,
        "product_quality_degradatation",
        FieldKind::Float,
    ),
    (
        RecordField::ProductQualityStatus,
        "product_quality_status",
        FieldKind::Enumerated,
    ),
    (
        RecordField::ProductQualityDegradationTag,
        "product_quality_degradatation_tag",
        FieldKind::Text,
    ),
];

impl RecordField {
    pub fn from_name(name: &str) -> Option<Self> {
        FIELDS
            .iter()
            .find(|(_, n, _)| *n == name)
            .map(|(field, _, _)| *field)
    }

    pub fn name(self) -> &'static str {
        FIELDS
            .iter()
            .find(|(f, _, _)| *f == self)
            .map(|(_, name, _)| *name)
            .unwrap_or("unknown")
    }

    pub fn kind(self) -> FieldKind {
        FIELDS
            .iter()
            .find(|(f, _, _)| *f == self)
            .map(|(_, _, kind)| *kind)
            .unwrap_or(FieldKind::Text)
    }

    pub fn all() -> impl Iterator<Item = RecordField> {
        FIELDS.iter().map(|(field, _, _)| *field)
    }
}

impl std::fmt::Display for RecordField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FieldKind {
    /// Converts a raw cell. Empty cells become `null`.
    pub fn convert(
        self,
        raw: &str,
        geometry: &dyn FootprintNormalizer,
    ) -> Result<Value, String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(Value::Null);
        }

        match self {
            FieldKind::Text => Ok(Value::String(raw.to_string())),
            FieldKind::Integer => raw
                .parse::<i64>()
                .map(Value::from)
                .map_err(|e| e.to_string()),
            FieldKind::Float => {
                let value = raw.parse::<f64>().map_err(|e| e.to_string())?;
                serde_json::Number::from_f64(value)
                    .map(Value::Number)
                    .ok_or_else(|| "not a finite number".to_string())
            }
            FieldKind::Timestamp => {
                parse_timestamp(raw).map(|t| Value::String(t.to_rfc3339()))
            }
            FieldKind::Enumerated => Ok(Value::String(
                raw.chars()
                    .next()
                    .map(|c| c.to_uppercase().collect())
                    .unwrap_or_default(),
            )),
            FieldKind::Footprint => {
                let footprint = geometry
                    .normalize_footprint(raw)
                    .map_err(|e| e.to_string())?;
                serde_json::to_value(footprint).map_err(|e| e.to_string())
            }
            FieldKind::Point => {
                let (x, y) = parse_point(raw).map_err(|e| e.to_string())?;
                Ok(serde_json::json!([x, y]))
            }
        }
    }
}

/// Parses RFC 3339 timestamps and naive ISO timestamps (taken as UTC).
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(t) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(t.and_utc());
        }
    }
    Err(format!("'{}' is not a timestamp", raw))
}
