use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::id_field::{DEFAULT_ID_FIELDS, DEFAULT_ID_KEYWORDS};
use crate::od_matrix::DEFAULT_CSV_ENCODINGS;
use crate::persist::FALLBACK_OUTPUT_ENCODINGS;
use crate::resolver::DEFAULT_LAYER_ENCODINGS;

fn owned(labels: &[&str]) -> Vec<String> {
    labels.iter().map(|s| (*s).to_owned()).collect()
}

fn default_layer_encodings() -> Vec<String> {
    owned(DEFAULT_LAYER_ENCODINGS)
}

fn default_csv_encodings() -> Vec<String> {
    owned(DEFAULT_CSV_ENCODINGS)
}

fn default_output_fallbacks() -> Vec<String> {
    owned(FALLBACK_OUTPUT_ENCODINGS)
}

fn default_id_fields() -> Vec<String> {
    owned(DEFAULT_ID_FIELDS)
}

fn default_id_keywords() -> Vec<String> {
    owned(DEFAULT_ID_KEYWORDS)
}

/// Everything one run needs. Built once, then only read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// OD matrix CSV.
    pub od_path: PathBuf,
    /// Zone layer `.shp`.
    pub zones_path: PathBuf,
    /// Output `.shp`; companions are written next to it.
    pub output_path: PathBuf,
    /// Zones whose flows among each other become lines, in output order.
    pub targets: Vec<i64>,

    #[serde(default = "default_layer_encodings")]
    pub layer_encodings: Vec<String>,
    #[serde(default = "default_csv_encodings")]
    pub csv_encodings: Vec<String>,

    /// First output encoding to try. Unset means the zone layer's encoding.
    #[serde(default)]
    pub output_encoding: Option<String>,
    #[serde(default = "default_output_fallbacks")]
    pub output_fallbacks: Vec<String>,

    #[serde(default = "default_id_fields")]
    pub id_fields: Vec<String>,
    #[serde(default = "default_id_keywords")]
    pub id_keywords: Vec<String>,
}

impl PipelineConfig {
    pub fn new(
        od_path: impl Into<PathBuf>,
        zones_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
        targets: Vec<i64>,
    ) -> Self {
        Self {
            od_path: od_path.into(),
            zones_path: zones_path.into(),
            output_path: output_path.into(),
            targets,
            layer_encodings: default_layer_encodings(),
            csv_encodings: default_csv_encodings(),
            output_encoding: None,
            output_fallbacks: default_output_fallbacks(),
            id_fields: default_id_fields(),
            id_keywords: default_id_keywords(),
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let config_err = |detail: String| PipelineError::Config { path: path.to_path_buf(), detail };

        let text = std::fs::read_to_string(path).map_err(|e| config_err(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| config_err(e.to_string()))
    }
}
