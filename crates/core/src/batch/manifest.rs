//! Conversion of raw manifest rows into work items.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::{sanitize_external_id, WorkItem, VARIANT_SLOTS};

const EXTERNAL_ID_COLUMNS: &[&str] = &["external_id", "Product_ID", "product_id", "id"];
const SOURCE_ASSET_COLUMNS: &[&str] = &["source_asset_ref", "Image_Link", "image_link", "image"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ManifestError {
    #[error("manifest is empty")]
    Empty,

    #[error("no directives provided")]
    NoDirectives,

    #[error("duplicate external id '{external_id}' at row {row}")]
    DuplicateId { external_id: String, row: u32 },
}

/// One manifest record, already split into fields.
///
/// Deserializes from a flat object of column -> value, so spreadsheet
/// headers such as `Product_ID` and `Image_Link` are accepted as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "HashMap<String, String>")]
pub struct ManifestRow {
    pub external_id: String,
    pub source_asset_ref: String,
}

impl ManifestRow {
    pub fn new(external_id: impl Into<String>, source_asset_ref: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            source_asset_ref: source_asset_ref.into(),
        }
    }

    /// Build a row from header -> value pairs, accepting the usual column spellings.
    pub fn from_fields(fields: &HashMap<String, String>) -> Self {
        let pick = |columns: &[&str]| {
            columns
                .iter()
                .find_map(|c| fields.get(*c))
                .map(|v| v.trim().to_string())
        };

        Self {
            external_id: pick(EXTERNAL_ID_COLUMNS).unwrap_or_else(|| "unknown".to_string()),
            source_asset_ref: pick(SOURCE_ASSET_COLUMNS).unwrap_or_default(),
        }
    }
}

impl From<HashMap<String, String>> for ManifestRow {
    fn from(fields: HashMap<String, String>) -> Self {
        Self::from_fields(&fields)
    }
}

/// Directive text for each of the three variant slots, shared by every row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Directives(pub [Option<String>; VARIANT_SLOTS]);

impl Directives {
    pub fn new(
        first: Option<impl Into<String>>,
        second: Option<impl Into<String>>,
        third: Option<impl Into<String>>,
    ) -> Self {
        Self([first.map(Into::into), second.map(Into::into), third.map(Into::into)])
    }

    /// Number of slots carrying non-blank text.
    pub fn active(&self) -> usize {
        self.0
            .iter()
            .filter(|d| d.as_deref().is_some_and(|s| !s.trim().is_empty()))
            .count()
    }
}

/// Turn manifest rows into work items, numbering them from 1 in manifest order.
pub fn build_work_items(
    rows: &[ManifestRow],
    directives: &Directives,
) -> Result<Vec<WorkItem>, ManifestError> {
    if rows.is_empty() {
        return Err(ManifestError::Empty);
    }
    if directives.active() == 0 {
        return Err(ManifestError::NoDirectives);
    }

    let mut seen = HashSet::new();
    let mut items = Vec::with_capacity(rows.len());

    for (idx, row) in rows.iter().enumerate() {
        let sequence_number = idx as u32 + 1;
        let external_id = sanitize_external_id(&row.external_id);
        // Identical sanitized ids would share artifact keys.
        if !seen.insert(external_id.clone()) {
            return Err(ManifestError::DuplicateId {
                external_id,
                row: sequence_number,
            });
        }
        items.push(WorkItem::new(
            &external_id,
            row.source_asset_ref.clone(),
            sequence_number,
            directives.0.clone(),
        ));
    }

    Ok(items)
}
