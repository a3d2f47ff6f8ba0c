//! Choosing which attribute column identifies a zone.

use log::{info, warn};

use crate::error::{PipelineError, Result};
use crate::layer::SpatialLayer;

/// Exact names tried first, in order.
pub const DEFAULT_ID_FIELDS: &[&str] =
    &["TAZ", "taz", "Taz", "TAZ_ID", "ID", "id", "FID", "INDEX", "编号"];

/// Substrings that mark an identifier-like column name (matched upper-cased).
pub const DEFAULT_ID_KEYWORDS: &[&str] = &["TAZ", "ID", "INDEX", "编号"];

/// Which rule picked the field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldMatch {
    Exact,
    Fuzzy,
    /// First attribute column; nothing looked like an identifier.
    Fallback,
    /// Replaced by a [`FieldConfirmer`].
    Override,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdField {
    pub name: String,
    pub matched: FieldMatch,
}

/// Pick the identifier column: an exact preferred name, then the first column
/// whose upper-cased name contains a keyword, then the first column.
///
/// The rules apply in that order; a fuzzy hit never beats an exact one.
pub fn select_id_field<P, K>(layer: &SpatialLayer, preferred: &[P], keywords: &[K]) -> Result<IdField>
where
    P: AsRef<str>,
    K: AsRef<str>,
{
    if let Some(name) = preferred
        .iter()
        .map(AsRef::as_ref)
        .find(|name| layer.field_index(name).is_some())
    {
        info!("Identifier field '{}' (exact match)", name);
        return Ok(IdField { name: name.to_owned(), matched: FieldMatch::Exact });
    }

    let keywords: Vec<String> = keywords.iter().map(|k| k.as_ref().to_uppercase()).collect();
    if let Some(name) = layer.field_names().find(|name| {
        let upper = name.to_uppercase();
        keywords.iter().any(|k| upper.contains(k.as_str()))
    }) {
        info!("Identifier field '{}' (name contains an identifier keyword)", name);
        return Ok(IdField { name: name.to_owned(), matched: FieldMatch::Fuzzy });
    }

    match layer.field_names().next() {
        Some(name) => {
            warn!("No identifier-like field; falling back to first field '{}'", name);
            Ok(IdField { name: name.to_owned(), matched: FieldMatch::Fallback })
        }
        None => Err(PipelineError::NoIdentifierField),
    }
}

/// Hook to review the selected identifier field before it is used.
///
/// Returning `Some(name)` replaces the selection; `None` accepts it.
pub trait FieldConfirmer {
    fn confirm(&self, selected: &IdField, fields: &[&str]) -> Option<String>;
}

/// Accepts every selection.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoAccept;

impl FieldConfirmer for AutoAccept {
    fn confirm(&self, _selected: &IdField, _fields: &[&str]) -> Option<String> {
        None
    }
}

/// Always answers with one configured field name.
#[derive(Debug, Clone)]
pub struct FixedField(pub String);

impl FieldConfirmer for FixedField {
    fn confirm(&self, _selected: &IdField, _fields: &[&str]) -> Option<String> {
        Some(self.0.clone())
    }
}

impl<F> FieldConfirmer for F
where
    F: Fn(&IdField, &[&str]) -> Option<String>,
{
    fn confirm(&self, selected: &IdField, fields: &[&str]) -> Option<String> {
        self(selected, fields)
    }
}

/// Run `confirmer` over `selected`. An override naming a field the layer does
/// not have is ignored.
pub fn confirm_id_field(layer: &SpatialLayer, selected: IdField, confirmer: &dyn FieldConfirmer) -> IdField {
    let fields: Vec<&str> = layer.field_names().collect();

    match confirmer.confirm(&selected, &fields) {
        Some(name) if name == selected.name => selected,
        Some(name) if fields.contains(&name.as_str()) => {
            info!("Identifier field overridden: '{}' -> '{}'", selected.name, name);
            IdField { name, matched: FieldMatch::Override }
        }
        Some(name) => {
            warn!("Override '{}' is not a field of the layer; keeping '{}'", name, selected.name);
            selected
        }
        None => selected,
    }
}
