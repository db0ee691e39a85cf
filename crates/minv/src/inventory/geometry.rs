//! Footprint normalization seam used by the ingest value conversion.
//!
//! The default implementation treats coordinates as planar; dateline
//! handling belongs to a dedicated normalizer plugged in via
//! [`FootprintNormalizer`].

use serde::Serialize;

use crate::error::GeometryError;

/// Polygon rings plus a representative centre point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Footprint {
    pub rings: Vec<Vec<[f64; 2]>>,
    pub centroid: [f64; 2],
}

pub trait FootprintNormalizer: Send + Sync {
    fn normalize_footprint(&self, raw: &str) -> Result<Footprint, GeometryError>;
}

/// Reads rings separated by `|`, each a flat list of `x y` pairs separated
/// by whitespace or commas. Rings are closed if needed and the centroid is
/// the mean of all distinct vertices.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanarFootprint;

impl FootprintNormalizer for PlanarFootprint {
    fn normalize_footprint(&self, raw: &str) -> Result<Footprint, GeometryError> {
        let mut rings = Vec::new();
        for part in raw.split('|').map(str::trim).filter(|p| !p.is_empty()) {
            let numbers = parse_numbers(part)?;
            if numbers.len() % 2 != 0 || numbers.len() < 6 {
                return Err(GeometryError::InvalidCoordinates(part.to_string()));
            }
            let mut ring: Vec<[f64; 2]> = numbers.chunks(2).map(|c| [c[0], c[1]]).collect();
            if ring.first() != ring.last() {
                ring.push(ring[0]);
            }
            rings.push(ring);
        }

        if rings.is_empty() {
            return Err(GeometryError::Empty);
        }

        let vertices: Vec<[f64; 2]> = rings
            .iter()
            .flat_map(|ring| ring[..ring.len() - 1].iter().copied())
            .collect();
        let n = vertices.len() as f64;
        let centroid = [
            vertices.iter().map(|v| v[0]).sum::<f64>() / n,
            vertices.iter().map(|v| v[1]).sum::<f64>() / n,
        ];

        Ok(Footprint { rings, centroid })
    }
}

/// Parses an `x y` (or `x,y`) point.
pub fn parse_point(raw: &str) -> Result<(f64, f64), GeometryError> {
    let numbers = parse_numbers(raw)?;
    match numbers.as_slice() {
        [x, y] => Ok((*x, *y)),
        [] => Err(GeometryError::Empty),
        _ => Err(GeometryError::InvalidCoordinates(raw.to_string())),
    }
}

fn parse_numbers(raw: &str) -> Result<Vec<f64>, GeometryError> {
    raw.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| GeometryError::InvalidCoordinates(raw.to_string()))
        })
        .collect()
}
