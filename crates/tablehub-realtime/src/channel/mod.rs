//! Channel naming.
//!
//! A channel is either a bare collection (`table1`) or a collection
//! qualified by a document (`table1.rec1`). Table-scoped collections use
//! fixed prefixes so record, view, and field traffic for the same table
//! land on distinct channels.

use std::fmt;

use serde::{Deserialize, Serialize};

use tablehub_core::error::AppError;

use crate::message::validator::validate_channel_part;

const RECORD_PREFIX: &str = "record_";
const VIEW_PREFIX: &str = "view_";
const FIELD_PREFIX: &str = "field_";
const TABLE_PREFIX: &str = "table_";

/// Document id used for table metadata updates.
pub const TABLE_META_DOCUMENT: &str = "meta";

/// A collection optionally narrowed to one document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelTarget {
    /// Collection name.
    pub collection: String,
    /// Document id within the collection.
    pub document: Option<String>,
}

impl ChannelTarget {
    /// Builds a target, rejecting an empty collection. An empty document
    /// is treated as absent.
    pub fn new(collection: &str, document: Option<&str>) -> Result<Self, AppError> {
        if collection.is_empty() {
            return Err(AppError::validation("collection is required"));
        }
        validate_channel_part(collection)?;

        let document = match document {
            Some(doc) if !doc.is_empty() => {
                validate_channel_part(doc)?;
                Some(doc.to_string())
            }
            _ => None,
        };

        Ok(Self {
            collection: collection.to_string(),
            document,
        })
    }

    /// `collection` or `collection.document`.
    pub fn channel_name(&self) -> String {
        match &self.document {
            Some(doc) => format!("{}.{}", self.collection, doc),
            None => self.collection.clone(),
        }
    }
}

impl fmt::Display for ChannelTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.channel_name())
    }
}

/// Collection carrying record operations of a table.
pub fn record_collection(table_id: &str) -> String {
    format!("{RECORD_PREFIX}{table_id}")
}

/// Collection carrying view operations of a table.
pub fn view_collection(table_id: &str) -> String {
    format!("{VIEW_PREFIX}{table_id}")
}

/// Collection carrying field operations of a table.
pub fn field_collection(table_id: &str) -> String {
    format!("{FIELD_PREFIX}{table_id}")
}

/// Collection carrying table-level metadata.
pub fn table_collection(table_id: &str) -> String {
    format!("{TABLE_PREFIX}{table_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_name_with_document() {
        let target = ChannelTarget::new("table1", Some("rec1")).unwrap();
        assert_eq!(target.channel_name(), "table1.rec1");
    }

    #[test]
    fn test_channel_name_without_document() {
        let target = ChannelTarget::new("table1", None).unwrap();
        assert_eq!(target.channel_name(), "table1");
        let target = ChannelTarget::new("table1", Some("")).unwrap();
        assert_eq!(target.channel_name(), "table1");
    }

    #[test]
    fn test_empty_collection_rejected() {
        let err = ChannelTarget::new("", Some("rec1")).unwrap_err();
        assert_eq!(err.kind.code(), 400);
    }

    #[test]
    fn test_table_scoped_collections() {
        assert_eq!(record_collection("tbl"), "record_tbl");
        assert_eq!(view_collection("tbl"), "view_tbl");
        assert_eq!(field_collection("tbl"), "field_tbl");
        assert_eq!(table_collection("tbl"), "table_tbl");
    }
}
