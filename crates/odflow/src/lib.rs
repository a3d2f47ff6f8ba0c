//! Desire lines between traffic analysis zones.
//!
//! A run reads an origin-destination matrix and a zone shapefile whose text
//! encoding is unknown, indexes zone centroids by their identifier field and
//! writes one straight line per positive flow among a set of target zones.
//!
//! The stages are usable on their own:
//! - [`resolver::resolve`] tries every candidate encoding and keeps the read
//!   with the most columns.
//! - [`id_field::select_id_field`] picks the identifier column.
//! - [`zone_index::build_index`] maps zone ids to centroids.
//! - [`desire::build_lines`] joins the matrix to the centroids.
//! - [`persist::save`] writes with an encoding fallback chain and verifies the
//!   result by reading it back.

pub mod config;
pub mod desire;
pub mod error;
pub mod id_field;
pub mod io;
pub mod layer;
pub mod od_matrix;
pub mod persist;
pub mod pipeline;
pub mod resolver;
pub mod zone_index;

pub use config::PipelineConfig;
pub use desire::{build_lines, DesireLine, DesireLines, FlowStats, OdPair, OdSelection};
pub use error::{LayerError, PipelineError, Result};
pub use id_field::{AutoAccept, FieldConfirmer, FieldMatch, FixedField, IdField};
pub use io::{LayerSink, LayerSource, ShapefileIo};
pub use layer::{Crs, Feature, SpatialLayer};
pub use od_matrix::OdMatrix;
pub use pipeline::{run, RunSummary};
pub use resolver::{resolve, Resolved};
pub use zone_index::ZoneIndex;

pub use shpio::{Companion, Companions};
