//! Discovered resource metadata

use super::value::{unflatten, AttrMap, FlatAttrMap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One resource instance discovered during an export
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceMeta {
    /// Display name exactly as the API returned it
    #[serde(default)]
    pub original_label: String,

    /// Identifier used to name the resource block. Starts out equal to the
    /// original label and is rewritten once by the sanitizer.
    #[serde(default)]
    pub block_label: String,

    /// Prefix added to the ID when the importer re-reads state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_prefix: Option<String>,

    /// Hash of the identifying fields, used to match resources across orgs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<String>,

    /// Flattened attribute values (dotted-path keys) used to resolve references
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_attributes: Option<FlatAttrMap>,
}

impl ResourceMeta {
    pub fn new(label: &str) -> Self {
        Self {
            original_label: label.to_string(),
            block_label: label.to_string(),
            ..Default::default()
        }
    }

    pub fn with_block_hash(mut self, hash: &str) -> Self {
        self.block_hash = Some(hash.to_string());
        self
    }

    pub fn with_id_prefix(mut self, prefix: &str) -> Self {
        self.id_prefix = Some(prefix.to_string());
        self
    }

    pub fn with_export_attributes(mut self, attributes: FlatAttrMap) -> Self {
        self.export_attributes = Some(attributes);
        self
    }

    /// The label to sanitize from. Falls back to the block label for entries
    /// built without an original label.
    pub fn source_label(&self) -> &str {
        if self.original_label.is_empty() {
            &self.block_label
        } else {
            &self.original_label
        }
    }

    /// ID the importer should read state with
    pub fn import_id(&self, id: &str) -> String {
        match &self.id_prefix {
            Some(prefix) => format!("{}{}", prefix, id),
            None => id.to_string(),
        }
    }

    /// Nested view of the export attributes
    pub fn nested_attributes(&self) -> Option<AttrMap> {
        self.export_attributes.as_ref().map(unflatten)
    }
}

/// Resource ID to metadata, for one resource type
pub type ResourceIdMetaMap = BTreeMap<String, ResourceMeta>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::value::AttrValue;

    #[test]
    fn test_new_keeps_original_label() {
        let meta = ResourceMeta::new("My Queue");
        assert_eq!(meta.original_label, "My Queue");
        assert_eq!(meta.block_label, "My Queue");
        assert_eq!(meta.source_label(), "My Queue");
    }

    #[test]
    fn test_import_id_applies_prefix() {
        let meta = ResourceMeta::new("site").with_id_prefix("site-");
        assert_eq!(meta.import_id("123"), "site-123");
        assert_eq!(ResourceMeta::new("x").import_id("123"), "123");
    }

    #[test]
    fn test_nested_attributes() {
        let mut flat = FlatAttrMap::new();
        flat.insert("phone_columns.0.type".to_string(), AttrValue::from("cell"));
        let meta = ResourceMeta::new("list").with_export_attributes(flat);

        let nested = meta.nested_attributes().unwrap();
        let AttrValue::List(columns) = &nested["phone_columns"] else {
            panic!("phone_columns should be a list");
        };
        assert_eq!(columns.len(), 1);
    }
}
