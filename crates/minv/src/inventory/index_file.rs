//! Index file naming: `<begin>_<end>_<update>.index[.zip]` where every
//! timestamp is `YYYYmmdd-HHMMSS`.

use std::sync::OnceLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;

use crate::error::IngestError;

/// Length of the begin+end prefix used to match versions of one file.
pub const KEY_LENGTH: usize = 31;

const UPDATE_RANGE: std::ops::Range<usize> = 32..47;
const TIME_FORMAT: &str = "%Y%m%d-%H%M%S";

pub fn index_file_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\d{8}-\d{6}_\d{8}-\d{6}_\d{8}-\d{6}\.index(\.zip)?$")
            .expect("index file pattern is valid")
    })
}

pub fn is_index_filename(name: &str) -> bool {
    index_file_regex().is_match(name)
}

/// Begin+end prefix of an index filename.
pub fn key(name: &str) -> &str {
    name.get(..KEY_LENGTH).unwrap_or(name)
}

/// Update-timestamp portion of an index filename.
pub fn update_part(name: &str) -> &str {
    name.get(UPDATE_RANGE).unwrap_or("")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexTimes {
    pub begin: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub update: DateTime<Utc>,
}

/// Parses the three timestamps encoded in an index filename.
pub fn parse_times(name: &str) -> Result<IndexTimes, IngestError> {
    if !is_index_filename(name) {
        return Err(IngestError::InvalidFilename(name.to_string()));
    }
    let stem = name.split('.').next().unwrap_or(name);
    let mut parts = stem.split('_').map(|part| {
        NaiveDateTime::parse_from_str(part, TIME_FORMAT)
            .map(|t| t.and_utc())
            .map_err(|_| IngestError::InvalidFilename(name.to_string()))
    });

    let mut next = || {
        parts
            .next()
            .unwrap_or_else(|| Err(IngestError::InvalidFilename(name.to_string())))
    };
    Ok(IndexTimes {
        begin: next()?,
        end: next()?,
        update: next()?,
    })
}
