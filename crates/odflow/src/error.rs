use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failure to load or write one layer under one encoding.
#[derive(Debug, Error)]
pub enum LayerError {
    #[error("unknown text encoding '{0}'")]
    UnknownEncoding(String),

    /// The bytes are malformed or not valid text in the requested encoding.
    #[error("{}: cannot read as {encoding}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        encoding: String,
        #[source]
        source: io::Error,
    },

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{}: {detail}", .path.display())]
    Geometry { path: PathBuf, detail: String },
}

/// `(encoding, reason)` for each failed save attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attempts(pub Vec<(String, String)>);

impl fmt::Display for Attempts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (encoding, reason)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{encoding}: {reason}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("zone layer {} not found", .0.display())]
    ZoneLayerMissing(PathBuf),

    #[error("{}: no candidate encoding could read the layer", .path.display())]
    AllEncodingsFailed { path: PathBuf },

    #[error("zone layer has no attribute fields to use as a zone identifier")]
    NoIdentifierField,

    #[error("field '{0}' does not exist in the zone layer")]
    UnknownField(String),

    #[error("OD matrix {}: {detail}", .path.display())]
    OdMatrix { path: PathBuf, detail: String },

    #[error("{}: every output encoding failed: {}", .path.display(), .attempts)]
    PersistenceFailure { path: PathBuf, attempts: Attempts },

    #[error("config {}: {detail}", .path.display())]
    Config { path: PathBuf, detail: String },
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
