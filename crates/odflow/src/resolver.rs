//! Encoding resolution for layers whose attribute text encoding is unknown.
//!
//! Every candidate is tried, even after a success: a later encoding that
//! recovers more columns beats an earlier one. Ties keep the earlier
//! candidate, so the candidate order is also the priority order.

use std::path::Path;

use log::{debug, info, warn};

use crate::error::LayerError;
use crate::io::LayerSource;
use crate::layer::SpatialLayer;

/// Candidates tried for zone layers, most likely first.
pub const DEFAULT_LAYER_ENCODINGS: &[&str] =
    &["gbk", "utf-8", "gb2312", "latin1", "cp1252", "gb18030", "utf-16"];

/// Outcome of loading the layer under one encoding.
#[derive(Debug)]
pub struct EncodingAttempt {
    pub encoding: String,
    pub outcome: Result<SpatialLayer, LayerError>,
}

impl EncodingAttempt {
    /// Column count of a successful load, geometry included.
    pub fn field_count(&self) -> Option<usize> {
        self.outcome.as_ref().ok().map(SpatialLayer::column_count)
    }
}

/// The layer chosen by [`resolve`]; `encoding` is `None` when only the
/// reader's own default worked.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub encoding: Option<String>,
    pub layer: SpatialLayer,
}

fn attempt<S: LayerSource + ?Sized>(source: &S, path: &Path, encoding: &str) -> EncodingAttempt {
    let outcome = source.load(path, Some(encoding));

    match &outcome {
        Ok(layer) => info!(
            "Encoding {:<8} ok ({} columns, {} features)",
            encoding,
            layer.column_count(),
            layer.len()
        ),
        Err(err) => debug!("Encoding {:<8} failed: {}", encoding, err),
    }

    EncodingAttempt { encoding: encoding.to_owned(), outcome }
}

/// Keep `attempt` only if it succeeded with strictly more columns than `best`.
fn keep_better(best: Option<EncodingAttempt>, attempt: EncodingAttempt) -> Option<EncodingAttempt> {
    match (attempt.field_count(), best.as_ref().and_then(EncodingAttempt::field_count)) {
        (Some(k), Some(best_k)) if k > best_k => Some(attempt),
        (Some(_), None) => Some(attempt),
        _ => best,
    }
}

/// Load `path` under each candidate encoding and keep the richest result.
///
/// When no candidate works, one load without an encoding is tried. `None`
/// means that failed too.
pub fn resolve<S, E>(source: &S, path: &Path, candidates: &[E]) -> Option<Resolved>
where
    S: LayerSource + ?Sized,
    E: AsRef<str>,
{
    info!(
        "Resolving text encoding of {} over {} candidates",
        path.display(),
        candidates.len()
    );

    let best = candidates
        .iter()
        .map(|encoding| attempt(source, path, encoding.as_ref()))
        .fold(None, keep_better);

    if let Some(EncodingAttempt { encoding, outcome: Ok(layer) }) = best {
        info!("Best encoding: {} ({} columns)", encoding, layer.column_count());
        return Some(Resolved { encoding: Some(encoding), layer });
    }

    warn!("No candidate encoding could read {}; trying the reader default", path.display());

    match source.load(path, None) {
        Ok(layer) => {
            info!("Read {} with the default encoding", path.display());
            Some(Resolved { encoding: None, layer })
        }
        Err(err) => {
            warn!("Default read failed too: {}", err);
            None
        }
    }
}
