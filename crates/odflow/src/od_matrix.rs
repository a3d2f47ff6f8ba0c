//! Origin-destination flow matrix read from a CSV grid.
//!
//! The first row holds destination ids (its first cell labels the index column
//! and is ignored); each following row starts with an origin id.

use std::borrow::Cow;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::Path;

use encoding_rs::Encoding;
use log::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::zone_index::parse_id;

/// Encodings tried for the CSV, in order; the first that reads wins.
pub const DEFAULT_CSV_ENCODINGS: &[&str] = &["utf-8", "gbk", "gb2312"];

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Clone, PartialEq)]
pub struct OdMatrix {
    row_ids: Vec<i64>,
    col_ids: Vec<i64>,
    rows: HashMap<i64, usize>,
    cols: HashMap<i64, usize>,
    /// Row-major, `row_ids.len() * col_ids.len()`.
    flows: Vec<f64>,
    encoding: Option<String>,
}

/// First position of each id; later repeats are reported and dropped.
fn first_positions(ids: &[i64], what: &str) -> (Vec<usize>, HashMap<i64, usize>) {
    let mut kept = Vec::with_capacity(ids.len());
    let mut positions = HashMap::with_capacity(ids.len());

    for (pos, &id) in ids.iter().enumerate() {
        match positions.entry(id) {
            Entry::Vacant(slot) => {
                slot.insert(kept.len());
                kept.push(pos);
            }
            Entry::Occupied(_) => warn!("Duplicate {} id {} ignored; the first one is used", what, id),
        }
    }

    (kept, positions)
}

fn parse_cell(text: &str) -> f64 {
    let text = text.trim();
    if text.is_empty() {
        return f64::NAN;
    }
    text.parse().unwrap_or(f64::NAN)
}

impl OdMatrix {
    /// Build from labelled rows. Short rows are padded with NaN and repeated
    /// ids keep their first occurrence.
    pub fn from_rows(row_ids: Vec<i64>, col_ids: Vec<i64>, values: Vec<Vec<f64>>) -> Self {
        let (kept_rows, rows) = first_positions(&row_ids, "origin");
        let (kept_cols, cols) = first_positions(&col_ids, "destination");

        let mut flows = Vec::with_capacity(kept_rows.len() * kept_cols.len());
        for &r in &kept_rows {
            let row = values.get(r).map(Vec::as_slice).unwrap_or(&[]);
            flows.extend(kept_cols.iter().map(|&c| row.get(c).copied().unwrap_or(f64::NAN)));
        }

        Self {
            row_ids: kept_rows.iter().map(|&r| row_ids[r]).collect(),
            col_ids: kept_cols.iter().map(|&c| col_ids[c]).collect(),
            rows,
            cols,
            flows,
            encoding: None,
        }
    }

    /// Read `path`, trying each encoding until one decodes and parses.
    pub fn load<E: AsRef<str>>(path: &Path, encodings: &[E]) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| PipelineError::OdMatrix {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;

        let mut failures = Vec::new();

        for label in encodings.iter().map(AsRef::as_ref) {
            match Self::decode(&bytes, label).and_then(|text| Self::parse_str(&text)) {
                Ok(mut matrix) => {
                    let (rows, cols) = matrix.shape();
                    info!(
                        "Read OD matrix {} as {} ({} origins x {} destinations)",
                        path.display(),
                        label,
                        rows,
                        cols
                    );
                    matrix.encoding = Some(label.to_owned());
                    return Ok(matrix);
                }
                Err(reason) => {
                    debug!("OD matrix as {} failed: {}", label, reason);
                    failures.push(format!("{label}: {reason}"));
                }
            }
        }

        Err(PipelineError::OdMatrix {
            path: path.to_path_buf(),
            detail: if failures.is_empty() {
                "no encodings to try".to_owned()
            } else {
                failures.join("; ")
            },
        })
    }

    fn decode<'a>(bytes: &'a [u8], label: &str) -> std::result::Result<Cow<'a, str>, String> {
        let encoding: &'static Encoding =
            shpio::encoding_for_label(label).ok_or_else(|| format!("unknown encoding '{label}'"))?;
        let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);

        encoding
            .decode_without_bom_handling_and_without_replacement(body)
            .ok_or_else(|| format!("not valid {}", encoding.name()))
    }

    /// Parse CSV text already decoded.
    pub fn parse_str(text: &str) -> std::result::Result<Self, String> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(text.as_bytes());
        let mut records = reader.records();

        let header = records
            .next()
            .ok_or_else(|| "empty file".to_owned())?
            .map_err(|e| e.to_string())?;

        let mut col_ids = Vec::new();
        let mut col_pos = Vec::new();
        for (pos, cell) in header.iter().enumerate().skip(1) {
            match parse_id(cell) {
                Some(id) => {
                    col_ids.push(id);
                    col_pos.push(pos);
                }
                None => warn!("Column header '{}' is not a zone id; column dropped", cell),
            }
        }

        let mut row_ids = Vec::new();
        let mut values = Vec::new();
        for record in records {
            let record = record.map_err(|e| e.to_string())?;
            let label = record.get(0).unwrap_or("");
            if record.iter().all(|cell| cell.trim().is_empty()) {
                continue;
            }
            let Some(id) = parse_id(label) else {
                warn!("Row label '{}' is not a zone id; row dropped", label);
                continue;
            };
            row_ids.push(id);
            values.push(
                col_pos
                    .iter()
                    .map(|&pos| record.get(pos).map_or(f64::NAN, parse_cell))
                    .collect(),
            );
        }

        Ok(Self::from_rows(row_ids, col_ids, values))
    }

    /// Flow from `origin` to `destination`, if both are in the matrix.
    pub fn flow(&self, origin: i64, destination: i64) -> Option<f64> {
        let r = *self.rows.get(&origin)?;
        let c = *self.cols.get(&destination)?;
        Some(self.flows[r * self.col_ids.len() + c])
    }

    pub fn has_origin(&self, id: i64) -> bool {
        self.rows.contains_key(&id)
    }

    pub fn has_destination(&self, id: i64) -> bool {
        self.cols.contains_key(&id)
    }

    /// `(origins, destinations)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.row_ids.len(), self.col_ids.len())
    }

    pub fn origins(&self) -> &[i64] {
        &self.row_ids
    }

    pub fn destinations(&self) -> &[i64] {
        &self.col_ids
    }

    /// Encoding the matrix was read with; `None` when built in memory.
    pub fn encoding(&self) -> Option<&str> {
        self.encoding.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_labelled_grid() {
        let od = OdMatrix::parse_str(",1,2,3.0\n1,0,5,0\n2,3,,x\n3.0,0,0,0\n").unwrap();

        assert_eq!(od.shape(), (3, 3));
        assert_eq!(od.destinations(), &[1, 2, 3]);
        assert_eq!(od.flow(1, 2), Some(5.0));
        assert_eq!(od.flow(2, 1), Some(3.0));
        assert!(od.flow(2, 2).unwrap().is_nan());
        assert!(od.flow(2, 3).unwrap().is_nan());
        assert_eq!(od.flow(3, 3), Some(0.0));
        assert_eq!(od.flow(4, 1), None);
    }

    #[test]
    fn bad_labels_dropped_and_first_duplicate_wins() {
        let od = OdMatrix::parse_str("zone,1,total,1\n1,4,99,8\nsum,1,1,1\n1,6,0,0\n2,7\n").unwrap();

        assert_eq!(od.origins(), &[1, 2]);
        assert_eq!(od.destinations(), &[1]);
        assert_eq!(od.flow(1, 1), Some(4.0));
        assert_eq!(od.flow(2, 1), Some(7.0));
    }

    #[test]
    fn short_rows_are_padded() {
        let od = OdMatrix::from_rows(vec![1, 2], vec![1, 2], vec![vec![1.0]]);
        assert_eq!(od.flow(1, 1), Some(1.0));
        assert!(od.flow(1, 2).unwrap().is_nan());
        assert!(od.flow(2, 1).unwrap().is_nan());
    }

    #[test]
    fn load_falls_through_to_gbk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("od.csv");
        let (bytes, _, _) = encoding_rs::GBK.encode("编号,10,20\n10,0,1.5\n20,2,0\n");
        std::fs::write(&path, &bytes).unwrap();

        let od = OdMatrix::load(&path, DEFAULT_CSV_ENCODINGS).unwrap();
        assert_eq!(od.encoding(), Some("gbk"));
        assert_eq!(od.flow(10, 20), Some(1.5));
    }

    #[test]
    fn bom_is_stripped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("od.csv");
        std::fs::write(&path, b"\xEF\xBB\xBF,7\n7,1\n").unwrap();

        let od = OdMatrix::load(&path, &["utf-8"]).unwrap();
        assert_eq!(od.flow(7, 7), Some(1.0));
    }

    #[test]
    fn every_encoding_failing_names_them_all() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("od.csv");
        std::fs::write(&path, b",1\n1,\xFF\xFF\xFF\n").unwrap();

        match OdMatrix::load(&path, &["utf-8", "nope"]) {
            Err(PipelineError::OdMatrix { detail, .. }) => {
                assert!(detail.contains("utf-8:"), "{detail}");
                assert!(detail.contains("unknown encoding 'nope'"), "{detail}");
            }
            other => panic!("expected an OD matrix error, got {other:?}"),
        }
    }
}
