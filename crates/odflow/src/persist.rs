//! Writing the output layer, falling back through encodings until one writes
//! and reads back intact.

use std::path::Path;

use log::{info, warn};

use crate::error::{Attempts, PipelineError, Result};
use crate::io::{LayerSink, LayerSource};
use crate::layer::SpatialLayer;

/// Tried after the preferred output encoding.
pub const FALLBACK_OUTPUT_ENCODINGS: &[&str] = &["gbk", "utf-8"];

/// `preferred` followed by `fallbacks`, without case-insensitive repeats.
pub fn encoding_chain<E: AsRef<str>>(preferred: Option<&str>, fallbacks: &[E]) -> Vec<String> {
    let mut chain: Vec<String> = Vec::with_capacity(fallbacks.len() + 1);

    for label in preferred.into_iter().chain(fallbacks.iter().map(AsRef::as_ref)) {
        if !chain.iter().any(|seen| seen.eq_ignore_ascii_case(label)) {
            chain.push(label.to_owned());
        }
    }

    chain
}

fn write_and_verify<IO>(io: &IO, layer: &SpatialLayer, path: &Path, encoding: &str) -> std::result::Result<(), String>
where
    IO: LayerSource + LayerSink + ?Sized,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| format!("{}: {e}", parent.display()))?;
    }

    io.write(layer, path, encoding).map_err(|e| e.to_string())?;

    let back = io.load(path, Some(encoding)).map_err(|e| format!("read-back: {e}"))?;
    if back.len() != layer.len() {
        return Err(format!(
            "read-back has {} features, expected {}",
            back.len(),
            layer.len()
        ));
    }

    Ok(())
}

/// Save `layer` to `path` under the first encoding of the chain that works.
/// Returns that encoding.
pub fn save<IO, E>(
    io: &IO,
    layer: &SpatialLayer,
    path: &Path,
    preferred: Option<&str>,
    fallbacks: &[E],
) -> Result<String>
where
    IO: LayerSource + LayerSink + ?Sized,
    E: AsRef<str>,
{
    let mut attempts = Attempts::default();

    for encoding in encoding_chain(preferred, fallbacks) {
        match write_and_verify(io, layer, path, &encoding) {
            Ok(()) => {
                info!(
                    "Saved {} features to {} ({})",
                    layer.len(),
                    path.display(),
                    encoding
                );
                return Ok(encoding);
            }
            Err(reason) => {
                warn!("Saving as {} failed: {}", encoding, reason);
                io.discard(path);
                attempts.0.push((encoding, reason));
            }
        }
    }

    Err(PipelineError::PersistenceFailure { path: path.to_path_buf(), attempts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LayerError;
    use crate::io::ShapefileIo;
    use crate::layer::{FieldDef, FieldValue};
    use geo::{point, Geometry, Line};
    use std::cell::RefCell;

    fn lines() -> SpatialLayer {
        let mut layer = SpatialLayer::new(vec![FieldDef::integer("Origin_TAZ"), FieldDef::text("备注")], None);
        for i in 0..3 {
            layer.push(
                Some(Geometry::Line(Line::new(point!(x: 0.0, y: 0.0), point!(x: i as f64, y: 1.0)))),
                vec![FieldValue::Integer(i), FieldValue::Text("东".into())],
            );
        }
        layer
    }

    #[test]
    fn chain_deduplicates_case_insensitively() {
        assert_eq!(encoding_chain(Some("GBK"), FALLBACK_OUTPUT_ENCODINGS), vec!["GBK", "utf-8"]);
        assert_eq!(encoding_chain(None, FALLBACK_OUTPUT_ENCODINGS), vec!["gbk", "utf-8"]);
        assert_eq!(
            encoding_chain(Some("utf-16"), FALLBACK_OUTPUT_ENCODINGS),
            vec!["utf-16", "gbk", "utf-8"]
        );
    }

    #[test]
    fn saved_layer_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/nested/lines.shp");

        let used = save(&ShapefileIo, &lines(), &path, Some("utf-8"), FALLBACK_OUTPUT_ENCODINGS).unwrap();
        assert_eq!(used, "utf-8");

        let back = ShapefileIo.load(&path, Some("utf-8")).unwrap();
        assert_eq!(back.len(), 3);
        assert_eq!(back.features[2].values[1], FieldValue::Text("东".into()));
        assert_eq!(std::fs::read_to_string(dir.path().join("out/nested/lines.cpg")).unwrap(), "UTF-8");
    }

    #[test]
    fn unwritable_preferred_falls_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lines.shp");

        let used = save(&ShapefileIo, &lines(), &path, Some("utf-16"), FALLBACK_OUTPUT_ENCODINGS).unwrap();
        assert_eq!(used, "gbk");
        assert_eq!(ShapefileIo.load(&path, Some("gbk")).unwrap().len(), 3);
    }

    /// Writes nothing and fails every time.
    #[derive(Default)]
    struct Broken {
        discarded: RefCell<usize>,
    }

    impl LayerSource for Broken {
        fn load(&self, path: &Path, _: Option<&str>) -> std::result::Result<SpatialLayer, LayerError> {
            Err(LayerError::Geometry { path: path.to_path_buf(), detail: "never".into() })
        }
    }

    impl LayerSink for Broken {
        fn write(&self, _: &SpatialLayer, path: &Path, encoding: &str) -> std::result::Result<(), LayerError> {
            Err(LayerError::Geometry { path: path.to_path_buf(), detail: format!("disk full ({encoding})") })
        }

        fn discard(&self, _: &Path) {
            *self.discarded.borrow_mut() += 1;
        }
    }

    #[test]
    fn exhausted_chain_lists_every_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let broken = Broken::default();

        let err = save(&broken, &lines(), &dir.path().join("x.shp"), Some("latin1"), FALLBACK_OUTPUT_ENCODINGS)
            .unwrap_err();

        match err {
            PipelineError::PersistenceFailure { attempts, .. } => {
                let tried: Vec<&str> = attempts.0.iter().map(|(e, _)| e.as_str()).collect();
                assert_eq!(tried, vec!["latin1", "gbk", "utf-8"]);
                assert!(attempts.0[1].1.contains("disk full (gbk)"));
            }
            other => panic!("expected a persistence failure, got {other:?}"),
        }
        assert_eq!(*broken.discarded.borrow(), 3);
    }
}
