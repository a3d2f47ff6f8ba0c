//! Straight origin-destination lines between zone centroids.

use geo::{EuclideanLength, Geometry, Line};
use log::{info, warn};

use crate::layer::{Crs, FieldDef, FieldValue, SpatialLayer};
use crate::od_matrix::OdMatrix;
use crate::zone_index::ZoneIndex;

pub const ORIGIN_FIELD: &str = "Origin_TAZ";
pub const DESTINATION_FIELD: &str = "Dest_TAZ";
pub const FLOW_FIELD: &str = "Flow";
pub const LENGTH_FIELD: &str = "Length";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OdPair {
    pub origin: i64,
    pub destination: i64,
    pub flow: f64,
}

/// Targets present in the matrix and the positive-flow pairs between them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OdSelection {
    pub valid_origins: Vec<i64>,
    pub valid_destinations: Vec<i64>,
    pub pairs: Vec<OdPair>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DesireLine {
    pub origin: i64,
    pub destination: i64,
    pub flow: f64,
    pub geometry: Line<f64>,
    pub length: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DesireLines {
    pub lines: Vec<DesireLine>,
    /// Pairs left out because a centroid was missing.
    pub invalid: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub total: f64,
}

impl FlowStats {
    pub fn from_pairs(pairs: &[OdPair]) -> Option<Self> {
        let first = pairs.first()?.flow;
        let (min, max, total) = pairs.iter().fold((first, first, 0.0), |(min, max, total), p| {
            (min.min(p.flow), max.max(p.flow), total + p.flow)
        });

        Some(Self { min, max, mean: total / pairs.len() as f64, total })
    }
}

fn dedup_in_order(ids: &[i64]) -> Vec<i64> {
    let mut seen = Vec::with_capacity(ids.len());
    for &id in ids {
        if !seen.contains(&id) {
            seen.push(id);
        }
    }
    seen
}

/// Positive flows among `targets`, origin-major in the order `targets` are given.
pub fn select_pairs(od: &OdMatrix, targets: &[i64]) -> OdSelection {
    let targets = dedup_in_order(targets);
    let valid_origins: Vec<i64> = targets.iter().copied().filter(|&id| od.has_origin(id)).collect();
    let valid_destinations: Vec<i64> =
        targets.iter().copied().filter(|&id| od.has_destination(id)).collect();

    let missing: Vec<i64> = targets
        .iter()
        .copied()
        .filter(|&id| !od.has_origin(id) && !od.has_destination(id))
        .collect();
    if !missing.is_empty() {
        warn!("Target zones not in the OD matrix: {:?}", missing);
    }

    let pairs = valid_origins
        .iter()
        .flat_map(|&origin| {
            valid_destinations.iter().filter_map(move |&destination| {
                let flow = od.flow(origin, destination)?;
                // NaN fails this too.
                (flow > 0.0).then_some(OdPair { origin, destination, flow })
            })
        })
        .collect();

    OdSelection { valid_origins, valid_destinations, pairs }
}

/// Join pairs to centroids. Pairs with a zone missing from `index` are counted.
pub fn lines_for_pairs(pairs: &[OdPair], index: &ZoneIndex) -> DesireLines {
    let mut out = DesireLines::default();

    for pair in pairs {
        let (Some(start), Some(end)) = (index.get(pair.origin), index.get(pair.destination)) else {
            out.invalid += 1;
            continue;
        };

        let geometry = Line::new(start, end);
        out.lines.push(DesireLine {
            origin: pair.origin,
            destination: pair.destination,
            flow: pair.flow,
            length: geometry.euclidean_length(),
            geometry,
        });
    }

    if out.invalid > 0 {
        warn!("{} OD pairs skipped: zone has no centroid", out.invalid);
    }
    info!("Built {} desire lines", out.lines.len());

    out
}

pub fn build_lines(od: &OdMatrix, index: &ZoneIndex, targets: &[i64]) -> DesireLines {
    lines_for_pairs(&select_pairs(od, targets).pairs, index)
}

impl DesireLines {
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn into_layer(self, crs: Option<Crs>) -> SpatialLayer {
        let mut layer = SpatialLayer::new(
            vec![
                FieldDef::integer(ORIGIN_FIELD),
                FieldDef::integer(DESTINATION_FIELD),
                FieldDef::float(FLOW_FIELD),
                FieldDef::float(LENGTH_FIELD),
            ],
            crs,
        );

        for line in self.lines {
            layer.push(
                Some(Geometry::Line(line.geometry)),
                vec![
                    FieldValue::Integer(line.origin),
                    FieldValue::Integer(line.destination),
                    FieldValue::Float(line.flow),
                    FieldValue::Float(line.length),
                ],
            );
        }

        layer
    }
}
