//! Mapping of requested logical fields to stored attributes.

use std::collections::BTreeSet;

use crate::storage::schema::{CREATED_AT, ID, LOG_SEQUENCE, NAME, PAYLOAD, SEQUENCE, TYPE};
use crate::storage::Index;

/// Logical field name to stored attribute name.
pub type FieldMap = &'static [(&'static str, &'static str)];

/// Fields of a log listing entry.
pub const LOG_LIST_FIELDS: FieldMap = &[("name", NAME), ("sequence", LOG_SEQUENCE)];

/// Fields of a stream or log event.
pub const STREAM_FIELDS: FieldMap = &[
    ("createdAt", CREATED_AT),
    ("sequence", SEQUENCE),
    ("type", TYPE),
    ("payload", PAYLOAD),
    ("id", ID),
];

/// Plans the attribute set fetched for a selection.
pub struct ProjectionPlanner;

impl ProjectionPlanner {
    /// Attributes to fetch for `selection` when scanning `index`.
    ///
    /// `None` fetches every attribute. Otherwise the mapped selection is
    /// extended with the key attributes a continuation cursor needs, so
    /// pagination works whatever was selected.
    pub fn plan(
        selection: Option<&BTreeSet<String>>,
        field_map: FieldMap,
        index: &Index,
    ) -> Option<BTreeSet<String>> {
        let selection = selection?;

        let mut attributes: BTreeSet<String> = selection
            .iter()
            .map(|field| Self::attribute(field, field_map).to_string())
            .collect();
        attributes.extend(index.key_attributes().into_iter().map(str::to_string));
        Some(attributes)
    }

    /// Whether a logical field is wanted by `selection`.
    pub fn wants(selection: Option<&BTreeSet<String>>, field: &str) -> bool {
        selection.map_or(true, |fields| fields.contains(field))
    }

    fn attribute<'a>(field: &'a str, field_map: FieldMap) -> &'a str {
        field_map
            .iter()
            .find(|(logical, _)| *logical == field)
            .map_or(field, |(_, physical)| *physical)
    }
}
