use std::collections::HashMap;

use geo::{Centroid, Point};
use log::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::layer::{FieldValue, SpatialLayer};

/// Parse an identifier label: an integer, or a float with no fractional part
/// (`"53621"`, `" 53621.0 "`).
pub fn parse_id(text: &str) -> Option<i64> {
    let text = text.trim();
    text.parse::<i64>().ok().or_else(|| text.parse::<f64>().ok().and_then(integral))
}

fn integral(v: f64) -> Option<i64> {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 9.0e15 {
        Some(v as i64)
    } else {
        None
    }
}

/// Coerce an attribute value to a zone id; `None` means the row is skipped.
pub fn coerce_id(value: &FieldValue) -> Option<i64> {
    match value {
        FieldValue::Integer(v) => Some(*v),
        FieldValue::Float(v) => integral(*v),
        FieldValue::Text(s) => parse_id(s),
        FieldValue::Null | FieldValue::Bool(_) | FieldValue::Date(_) => None,
    }
}

/// Zone id -> centroid.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ZoneIndex {
    centroids: HashMap<i64, Point<f64>>,
    /// Rows whose id could not be coerced to an integer.
    pub skipped_ids: usize,
    /// Rows with an id but no geometry to take a centroid of.
    pub missing_geometry: usize,
    /// Rows that replaced an earlier row with the same id.
    pub duplicates: usize,
}

impl ZoneIndex {
    pub fn from_centroids(centroids: impl IntoIterator<Item = (i64, Point<f64>)>) -> Self {
        let mut index = Self::default();
        for (id, point) in centroids {
            index.insert(id, point);
        }
        index
    }

    /// Insert, replacing any earlier centroid for `id`. Returns whether one was replaced.
    pub fn insert(&mut self, id: i64, centroid: Point<f64>) -> bool {
        let replaced = self.centroids.insert(id, centroid).is_some();
        if replaced {
            self.duplicates += 1;
        }
        replaced
    }

    pub fn get(&self, id: i64) -> Option<Point<f64>> {
        self.centroids.get(&id).copied()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.centroids.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.centroids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.centroids.is_empty()
    }

    /// Indexed ids in ascending order.
    pub fn ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.centroids.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

/// Index every feature's centroid by the integer value of `id_field`.
///
/// Rows with unusable ids or no geometry are counted and left out. When an id
/// repeats, the later row wins.
// TODO: decide whether repeated ids (split polygons, slivers) should be
// dissolved into one zone instead of letting the last row win.
pub fn build_index(layer: &SpatialLayer, id_field: &str) -> Result<ZoneIndex> {
    let column = layer
        .column(id_field)
        .ok_or_else(|| PipelineError::UnknownField(id_field.to_owned()))?;

    let mut index = ZoneIndex::default();

    for (feature, value) in column {
        let Some(id) = coerce_id(value) else {
            index.skipped_ids += 1;
            continue;
        };

        match feature.geometry.as_ref().and_then(|g| g.centroid()) {
            Some(centroid) => {
                if index.insert(id, centroid) {
                    debug!("Zone {} appears again; keeping the later row", id);
                }
            }
            None => index.missing_geometry += 1,
        }
    }

    if index.skipped_ids > 0 {
        warn!("{} rows have no usable integer id in '{}'", index.skipped_ids, id_field);
    }
    if index.missing_geometry > 0 {
        warn!("{} rows have no geometry to take a centroid of", index.missing_geometry);
    }
    if index.duplicates > 0 {
        warn!(
            "{} rows repeat an earlier zone id; the last one of each wins",
            index.duplicates
        );
    }

    let ids = index.ids();
    info!(
        "Indexed {} zones by '{}' (e.g. {:?})",
        index.len(),
        id_field,
        &ids[..ids.len().min(10)]
    );

    Ok(index)
}
