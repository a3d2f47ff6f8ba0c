//! One run from OD matrix and zone layer to a desire-line shapefile.

use std::path::PathBuf;

use log::{info, warn};
use shpio::Companions;

use crate::config::PipelineConfig;
use crate::desire::{lines_for_pairs, select_pairs, FlowStats};
use crate::error::{PipelineError, Result};
use crate::id_field::{confirm_id_field, select_id_field, FieldConfirmer, FieldMatch};
use crate::io::{LayerSink, LayerSource};
use crate::od_matrix::OdMatrix;
use crate::persist;
use crate::resolver;
use crate::zone_index::build_index;

/// What one run did.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub csv_encoding: Option<String>,
    /// `None` when only the reader's default could open the layer.
    pub layer_encoding: Option<String>,
    pub id_field: String,
    pub id_match: FieldMatch,
    pub zones_indexed: usize,
    pub skipped_ids: usize,
    pub missing_geometry: usize,
    pub duplicate_ids: usize,
    pub valid_origins: Vec<i64>,
    pub valid_destinations: Vec<i64>,
    pub pairs_selected: usize,
    pub flow_stats: Option<FlowStats>,
    pub lines_built: usize,
    /// Pairs dropped for a missing centroid.
    pub lines_invalid: usize,
    /// Written file and the encoding it was written with; `None` when there
    /// was nothing to write.
    pub output: Option<(PathBuf, String)>,
}

pub fn run<IO>(config: &PipelineConfig, io: &IO, confirmer: &dyn FieldConfirmer) -> Result<RunSummary>
where
    IO: LayerSource + LayerSink + ?Sized,
{
    let od = OdMatrix::load(&config.od_path, &config.csv_encodings)?;

    let companions = Companions::probe(&config.zones_path);
    if !companions.has("shp") {
        return Err(PipelineError::ZoneLayerMissing(config.zones_path.clone()));
    }
    for companion in companions.missing() {
        warn!(
            "{} missing{}",
            companion.path.display(),
            if companion.required { " (required)" } else { "" }
        );
    }

    let resolved = resolver::resolve(io, &config.zones_path, &config.layer_encodings)
        .ok_or_else(|| PipelineError::AllEncodingsFailed { path: config.zones_path.clone() })?;
    let zones = resolved.layer;

    match &zones.crs {
        Some(crs) if crs.is_geographic() => warn!(
            "Zone layer CRS {} is geographic; line lengths are in degrees",
            crs.name().unwrap_or("(unnamed)")
        ),
        Some(crs) => info!("Zone layer CRS: {}", crs.name().unwrap_or("(unnamed)")),
        None => warn!("Zone layer has no .prj; output will carry no CRS"),
    }

    let selected = select_id_field(&zones, &config.id_fields, &config.id_keywords)?;
    let id_field = confirm_id_field(&zones, selected, confirmer);

    let index = build_index(&zones, &id_field.name)?;

    let selection = select_pairs(&od, &config.targets);
    let flow_stats = FlowStats::from_pairs(&selection.pairs);
    info!(
        "{} valid origins, {} valid destinations, {} pairs with flow",
        selection.valid_origins.len(),
        selection.valid_destinations.len(),
        selection.pairs.len()
    );
    if let Some(stats) = &flow_stats {
        info!(
            "Flow min {:.3}, max {:.3}, mean {:.3}, total {:.3}",
            stats.min, stats.max, stats.mean, stats.total
        );
    }

    let lines = lines_for_pairs(&selection.pairs, &index);
    let (lines_built, lines_invalid) = (lines.len(), lines.invalid);

    let output = if lines.is_empty() {
        warn!("No desire lines to write; {} left untouched", config.output_path.display());
        None
    } else {
        let preferred = config
            .output_encoding
            .as_deref()
            .or(resolved.encoding.as_deref());
        let layer = lines.into_layer(zones.crs.clone());
        let encoding = persist::save(io, &layer, &config.output_path, preferred, &config.output_fallbacks)?;
        Some((config.output_path.clone(), encoding))
    };

    Ok(RunSummary {
        csv_encoding: od.encoding().map(str::to_owned),
        layer_encoding: resolved.encoding,
        id_field: id_field.name,
        id_match: id_field.matched,
        zones_indexed: index.len(),
        skipped_ids: index.skipped_ids,
        missing_geometry: index.missing_geometry,
        duplicate_ids: index.duplicates,
        valid_origins: selection.valid_origins,
        valid_destinations: selection.valid_destinations,
        pairs_selected: selection.pairs.len(),
        flow_stats,
        lines_built,
        lines_invalid,
        output,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desire::{DESTINATION_FIELD, FLOW_FIELD, LENGTH_FIELD, ORIGIN_FIELD};
    use crate::id_field::{AutoAccept, FixedField};
    use crate::io::ShapefileIo;
    use crate::layer::{Crs, FieldDef, FieldValue, SpatialLayer};
    use geo::{polygon, Geometry};
    use std::path::Path;

    fn square(x: f64, y: f64) -> Option<Geometry<f64>> {
        Some(Geometry::Polygon(polygon![
            (x: x - 1.0, y: y - 1.0),
            (x: x + 1.0, y: y - 1.0),
            (x: x + 1.0, y: y + 1.0),
            (x: x - 1.0, y: y + 1.0),
        ]))
    }

    /// GBK zone layer: 名称 (text) then 小区编号 (text ids).
    fn write_zones(path: &Path) {
        let mut layer = SpatialLayer::new(
            vec![FieldDef::text("名称"), FieldDef::text("小区编号")],
            Some(Crs::from_wkt("PROJCS[\"CGCS2000_3_Degree_GK_CM_114E\"]")),
        );
        for (name, id, x, y) in [("东区", "1", 0.0, 0.0), ("西区", "2", 10.0, 0.0), ("北区", "3", 0.0, 10.0)] {
            layer.push(
                square(x, y),
                vec![FieldValue::Text(name.into()), FieldValue::Text(id.into())],
            );
        }
        ShapefileIo.write(&layer, path, "gbk").unwrap();
    }

    fn fixture(dir: &Path, csv: &str) -> PipelineConfig {
        let zones = dir.join("zones/taz.shp");
        std::fs::create_dir_all(zones.parent().unwrap()).unwrap();
        write_zones(&zones);
        std::fs::write(dir.join("od.csv"), csv).unwrap();

        PipelineConfig::new(dir.join("od.csv"), zones, dir.join("out/lines.shp"), vec![1, 2, 3])
    }

    #[test]
    fn end_to_end_writes_lines_in_the_zone_encoding() {
        let dir = tempfile::tempdir().unwrap();
        let config = fixture(dir.path(), ",1,2,3\n1,0,5,0\n2,3,0,0\n3,0,0,0\n");

        let summary = run(&config, &ShapefileIo, &AutoAccept).unwrap();

        assert_eq!(summary.layer_encoding.as_deref(), Some("gbk"));
        assert_eq!(summary.csv_encoding.as_deref(), Some("utf-8"));
        assert_eq!(summary.id_field, "小区编号");
        assert_eq!(summary.id_match, FieldMatch::Fuzzy);
        assert_eq!(summary.zones_indexed, 3);
        assert_eq!(summary.pairs_selected, 2);
        assert_eq!((summary.lines_built, summary.lines_invalid), (2, 0));
        assert_eq!(summary.flow_stats.map(|s| s.total), Some(8.0));

        let (path, encoding) = summary.output.unwrap();
        assert_eq!(encoding, "gbk");

        let written = ShapefileIo.load(&path, Some("gbk")).unwrap();
        assert_eq!(
            written.field_names().collect::<Vec<_>>(),
            vec![ORIGIN_FIELD, DESTINATION_FIELD, FLOW_FIELD, LENGTH_FIELD]
        );
        assert_eq!(
            written.features[0].values,
            vec![
                FieldValue::Integer(1),
                FieldValue::Integer(2),
                FieldValue::Float(5.0),
                FieldValue::Float(10.0)
            ]
        );
        assert_eq!(written.crs, Some(Crs::from_wkt("PROJCS[\"CGCS2000_3_Degree_GK_CM_114E\"]")));
    }

    #[test]
    fn no_positive_flow_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = fixture(dir.path(), ",1,2\n1,0,0\n2,0,0\n");

        let summary = run(&config, &ShapefileIo, &AutoAccept).unwrap();
        assert_eq!(summary.output, None);
        assert!(summary.flow_stats.is_none());
        assert!(!config.output_path.exists());
    }

    #[test]
    fn confirmer_override_changes_the_index_field() {
        let dir = tempfile::tempdir().unwrap();
        let config = fixture(dir.path(), ",1,2\n1,0,4\n2,0,0\n");

        // 名称 holds no integers, so nothing is indexed and the pair is invalid.
        let summary = run(&config, &ShapefileIo, &FixedField("名称".into())).unwrap();
        assert_eq!(summary.id_match, FieldMatch::Override);
        assert_eq!(summary.zones_indexed, 0);
        assert_eq!(summary.skipped_ids, 3);
        assert_eq!((summary.lines_built, summary.lines_invalid), (0, 1));
    }

    #[test]
    fn missing_zone_layer_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("od.csv"), ",1\n1,1\n").unwrap();
        let config = PipelineConfig::new(
            dir.path().join("od.csv"),
            dir.path().join("absent.shp"),
            dir.path().join("out.shp"),
            vec![1],
        );

        assert!(matches!(
            run(&config, &ShapefileIo, &AutoAccept),
            Err(PipelineError::ZoneLayerMissing(_))
        ));
    }
}
