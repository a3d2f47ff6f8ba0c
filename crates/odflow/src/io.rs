//! Loading and writing layers behind traits, so the resolver and the save
//! chain can run against any reader.

use std::io::ErrorKind;
use std::path::Path;

use log::warn;
use shpio::Encoding;

use crate::error::LayerError;
use crate::layer::SpatialLayer;

/// Label used in errors and logs for a load without an explicit encoding.
pub const DEFAULT_ENCODING_LABEL: &str = "default";

pub trait LayerSource {
    /// Load the whole layer, decoding text as `encoding` or, for `None`,
    /// however the reader decides by itself.
    fn load(&self, path: &Path, encoding: Option<&str>) -> Result<SpatialLayer, LayerError>;
}

pub trait LayerSink {
    fn write(&self, layer: &SpatialLayer, path: &Path, encoding: &str) -> Result<(), LayerError>;

    /// Remove whatever a failed `write` left behind.
    fn discard(&self, _path: &Path) {}
}

/// Shapefile reader/writer backed by `shpio`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShapefileIo;

fn lookup(label: &str) -> Result<&'static Encoding, LayerError> {
    shpio::encoding_for_label(label).ok_or_else(|| LayerError::UnknownEncoding(label.to_owned()))
}

fn classify(path: &Path, encoding: &str, source: std::io::Error) -> LayerError {
    match source.kind() {
        ErrorKind::InvalidData | ErrorKind::InvalidInput | ErrorKind::UnexpectedEof => {
            LayerError::Parse {
                path: path.to_path_buf(),
                encoding: encoding.to_owned(),
                source,
            }
        }
        _ => LayerError::Io { path: path.to_path_buf(), source },
    }
}

impl LayerSource for ShapefileIo {
    fn load(&self, path: &Path, encoding: Option<&str>) -> Result<SpatialLayer, LayerError> {
        let resolved = encoding.map(lookup).transpose()?;
        let label = encoding.unwrap_or(DEFAULT_ENCODING_LABEL);

        let dataset = shpio::read_dataset(path, resolved).map_err(|e| classify(path, label, e))?;

        Ok(SpatialLayer::from_dataset(dataset))
    }
}

impl LayerSink for ShapefileIo {
    fn write(&self, layer: &SpatialLayer, path: &Path, encoding: &str) -> Result<(), LayerError> {
        let resolved = lookup(encoding)?;

        let dataset = layer.to_dataset().map_err(|detail| LayerError::Geometry {
            path: path.to_path_buf(),
            detail,
        })?;

        shpio::write_dataset(path, &dataset, resolved).map_err(|e| classify(path, encoding, e))
    }

    fn discard(&self, path: &Path) {
        if let Err(err) = shpio::remove_dataset(path) {
            warn!("Could not clean up {}: {}", path.display(), err);
        }
    }
}
