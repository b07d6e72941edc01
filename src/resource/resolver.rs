//! Reference Resolver
//!
//! Walks one resource's attribute tree and rewrites ID-valued attributes into
//! references to other exported resources. Each attribute is handled in this
//! order:
//!
//! 1. excluded and self-referential attributes are removed
//! 2. nested maps and lists are walked, and empty ones are removed
//! 3. strings are resolved as references or escaped
//! 4. zero values are removed unless allowed
//! 5. the attribute's custom resolver runs, if one is registered
//! 6. nested maps holding only nulls are removed
//!
//! Nulls are kept while walking and pruned from the final map. Failures are
//! collected as diagnostics and never abort the walk.

use super::registry::{EncodedRefAttr, ExporterConfig, RefAttrSettings, RegistrySnapshot};
use super::value::{join_path, prune_nulls, AttrMap, AttrValue, Reference};
use crate::error::{Diagnostic, Diagnostics, ExportError};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Resolver behavior switches
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions {
    /// Decode JSON-encodable string attributes into structured values
    pub decode_json_attributes: bool,
}

/// Output of resolving one resource
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolvedResource {
    pub resource_type: String,
    pub id: String,
    /// ID the importer reads state with, including any type prefix
    pub import_id: String,
    pub block_label: String,
    pub config: AttrMap,
    #[serde(skip_serializing_if = "Diagnostics::is_empty")]
    pub diagnostics: Diagnostics,
    /// Referenced IDs that are not part of the export, by resource type
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub unresolved: BTreeMap<String, BTreeSet<String>>,
}

pub struct Resolver<'a> {
    exporters: &'a RegistrySnapshot,
    options: ResolveOptions,
}

impl<'a> Resolver<'a> {
    pub fn new(exporters: &'a RegistrySnapshot) -> Self {
        Self {
            exporters,
            options: ResolveOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ResolveOptions) -> Self {
        self.options = options;
        self
    }

    /// Resolve the attributes of resource `id` of type `resource_type`
    pub fn resolve(
        &self,
        resource_type: &str,
        id: &str,
        attributes: &AttrMap,
    ) -> Result<ResolvedResource, ExportError> {
        let exporter =
            self.exporters
                .get(resource_type)
                .ok_or_else(|| ExportError::RegistryLookupFailure {
                    attribute: id.to_string(),
                    resource_type: resource_type.to_string(),
                })?;

        let mut walk = Walk {
            exporters: self.exporters,
            exporter,
            options: self.options,
            resource_type,
            resource_id: id,
            diagnostics: Diagnostics::new(),
            unresolved: BTreeMap::new(),
        };

        let mut config = attributes.clone();
        config.remove("id");
        walk.sanitize_map(&mut config, "");
        prune_nulls(&mut config);

        let (block_label, import_id) = match exporter.lookup(id) {
            Some(meta) => (meta.block_label.clone(), meta.import_id(id)),
            None => (String::new(), id.to_string()),
        };

        tracing::debug!(
            "Resolved {}.{} with {} diagnostics",
            resource_type,
            id,
            walk.diagnostics.len()
        );

        Ok(ResolvedResource {
            resource_type: resource_type.to_string(),
            id: id.to_string(),
            import_id,
            block_label,
            config,
            diagnostics: walk.diagnostics,
            unresolved: walk.unresolved,
        })
    }
}

struct Walk<'a> {
    exporters: &'a RegistrySnapshot,
    exporter: &'a ExporterConfig,
    options: ResolveOptions,
    resource_type: &'a str,
    resource_id: &'a str,
    diagnostics: Diagnostics,
    unresolved: BTreeMap<String, BTreeSet<String>>,
}

impl<'a> Walk<'a> {
    /// Returns false when the map should be dropped from its parent
    fn sanitize_map(&mut self, map: &mut AttrMap, prev: &str) -> bool {
        let keys: Vec<String> = map.keys().cloned().collect();
        let wildcard = join_path(prev, "*");

        for key in keys {
            let path = join_path(prev, &key);

            if self.exporter.is_excluded(&path) {
                map.insert(key, AttrValue::Null);
                continue;
            }

            if self
                .exporter
                .should_drop_if_self_referential(self.resource_id, &path, &key, map)
            {
                tracing::debug!("Dropping self reference {}", path);
                map.insert(key, AttrValue::Null);
                continue;
            }

            if let Some(value) = map.get_mut(&key) {
                self.sanitize_value(value, &path, &wildcard);
            }

            if let Some(value) = map.get_mut(&key) {
                let zero_allowed = self.exporter.is_zero_value_allowed(&path)
                    || self.exporter.is_zero_value_in_map_allowed(prev);
                if !zero_allowed && value.is_zero() {
                    *value = AttrValue::Null;
                }
                if self.exporter.is_empty_array_allowed(&path) && value.is_null() {
                    *value = AttrValue::List(Vec::new());
                }
            }

            if let Some(resolver) = self.exporter.custom_resolver(&path) {
                tracing::debug!("Custom resolver invoked for attribute: {}", path);
                if let Err(err) = resolver(map, self.exporters, self.resource_type) {
                    self.report(err, &path);
                }
            }

            // Nested maps left with only nulls are dropped once the custom
            // resolver had its chance to fill them
            if let Some(value) = map.get_mut(&key) {
                if matches!(value, AttrValue::Map(inner) if all_null(inner)) {
                    *value = AttrValue::Null;
                }
            }

            if self.options.decode_json_attributes && self.exporter.is_json_encodable(&path) {
                if let Some(value) = map.get_mut(&key) {
                    self.decode_json(value, &path);
                }
            }
        }

        !self.exporter.should_drop_if_all_missing(prev, map)
    }

    fn sanitize_value(&mut self, value: &mut AttrValue, path: &str, wildcard: &str) {
        let exporter = self.exporter;
        match value {
            AttrValue::Map(inner) => {
                let keep = self.sanitize_map(inner, path);
                if !keep || inner.is_empty() {
                    *value = AttrValue::Null;
                }
            }
            AttrValue::List(items) => {
                self.sanitize_list(items, path, wildcard);
                if items.is_empty() {
                    *value = AttrValue::Null;
                }
            }
            AttrValue::String(s) => {
                let encoded = exporter.encoded_ref_attrs_for(path);
                if !encoded.is_empty() {
                    match self.resolve_encoded(path, s, &encoded) {
                        Ok(resolved) => {
                            *value = AttrValue::String(resolved);
                            return;
                        }
                        Err(err) => self.report(err, path),
                    }
                }

                *value = match self.ref_settings(path, wildcard) {
                    Some(settings) => self.resolve_reference(path, settings, s),
                    None => AttrValue::String(escape_interpolation(s)),
                };
            }
            _ => {}
        }
    }

    /// Reference settings for `path`, falling back to the parent's `.*` entry
    fn ref_settings(&self, path: &str, wildcard: &str) -> Option<&'a RefAttrSettings> {
        let exporter: &'a ExporterConfig = self.exporter;
        exporter.ref_attr(path).or_else(|| exporter.ref_attr(wildcard))
    }

    /// Walk list elements in place, dropping empty maps and lists
    fn sanitize_list(&mut self, items: &mut Vec<AttrValue>, path: &str, wildcard: &str) {
        let mut kept = Vec::with_capacity(items.len());
        for mut item in items.drain(..) {
            match &mut item {
                AttrValue::Map(inner) => {
                    if self.sanitize_map(inner, path) && !all_null(inner) {
                        kept.push(item);
                    }
                }
                AttrValue::List(nested) => {
                    self.sanitize_list(nested, path, wildcard);
                    if !nested.is_empty() {
                        kept.push(item);
                    }
                }
                AttrValue::String(s) => match self.ref_settings(path, wildcard) {
                    Some(settings) => {
                        let resolved = self.resolve_reference(path, settings, s);
                        if !matches!(&resolved, AttrValue::String(s) if s.is_empty()) {
                            kept.push(resolved);
                        }
                    }
                    None => kept.push(AttrValue::String(escape_interpolation(s))),
                },
                _ => kept.push(item),
            }
        }
        *items = kept;
    }

    fn resolve_reference(&mut self, path: &str, settings: &RefAttrSettings, id: &str) -> AttrValue {
        if id.is_empty() || settings.alt_values.iter().any(|alt| alt == id) {
            return AttrValue::String(id.to_string());
        }

        match self.find_reference(settings, id) {
            Some(reference) => reference.into(),
            None => {
                self.record_unresolved(path, settings, id);
                AttrValue::String(id.to_string())
            }
        }
    }

    fn find_reference(&self, settings: &RefAttrSettings, id: &str) -> Option<Reference> {
        let exporter = self.exporters.get(&settings.ref_type)?;
        let meta = exporter.lookup(id)?;
        if meta.block_label.is_empty() {
            return None;
        }
        Some(Reference::new(&settings.ref_type, &meta.block_label))
    }

    fn record_unresolved(&mut self, path: &str, settings: &RefAttrSettings, id: &str) {
        tracing::warn!(
            "{}.{}: {} '{}' is not being exported",
            self.resource_type,
            path,
            settings.ref_type,
            id
        );
        self.unresolved
            .entry(settings.ref_type.clone())
            .or_default()
            .insert(id.to_string());
        self.diagnostics.push(ExportError::UnresolvedReference {
            attribute: path.to_string(),
            ref_type: settings.ref_type.clone(),
            id: id.to_string(),
        });
    }

    /// Resolve IDs nested in a JSON document held by a string attribute
    fn resolve_encoded(
        &mut self,
        path: &str,
        raw: &str,
        encoded: &[&EncodedRefAttr],
    ) -> Result<String, ExportError> {
        if raw.is_empty() {
            return Ok(String::new());
        }

        let mut document: Value =
            serde_json::from_str(raw).map_err(|e| ExportError::MalformedEmbeddedReference {
                attribute: path.to_string(),
                message: e.to_string(),
            })?;

        for attr in encoded {
            let nested_path = join_path(path, &attr.nested_attr);
            let settings = attr.settings();
            let Some(target) = pointer_mut(&mut document, &attr.nested_attr) else {
                continue;
            };
            match target {
                Value::String(id) => {
                    let resolved = self.resolve_reference(&nested_path, &settings, id);
                    *target = resolved.to_json();
                }
                Value::Array(ids) => {
                    for item in ids.iter_mut() {
                        if let Value::String(id) = item {
                            let resolved = self.resolve_reference(&nested_path, &settings, id);
                            *item = resolved.to_json();
                        }
                    }
                }
                _ => {}
            }
        }

        serde_json::to_string(&document).map_err(|e| ExportError::MalformedEmbeddedReference {
            attribute: path.to_string(),
            message: e.to_string(),
        })
    }

    fn decode_json(&mut self, value: &mut AttrValue, path: &str) {
        let AttrValue::String(raw) = value else {
            return;
        };
        match serde_json::from_str::<Value>(raw) {
            Ok(decoded) => *value = AttrValue::from(decoded),
            Err(e) => self.report(
                ExportError::MalformedEmbeddedReference {
                    attribute: path.to_string(),
                    message: format!("not valid JSON: {}", e),
                },
                path,
            ),
        }
    }

    fn report(&mut self, err: ExportError, path: &str) {
        let diagnostic = Diagnostic::from(err).with_attribute(path);
        match diagnostic.severity {
            crate::error::Severity::Warning => {
                tracing::warn!("{}.{}: {}", self.resource_type, path, diagnostic.summary)
            }
            crate::error::Severity::Error => {
                tracing::error!("{}.{}: {}", self.resource_type, path, diagnostic.summary)
            }
        }
        self.diagnostics.push(diagnostic);
    }
}

/// A map with no entries left after nulls are pruned
fn all_null(map: &AttrMap) -> bool {
    map.values().all(AttrValue::is_null)
}

/// Follow a dotted path of object keys inside a JSON document
fn pointer_mut<'v>(document: &'v mut Value, path: &str) -> Option<&'v mut Value> {
    path.split('.')
        .try_fold(document, |current, key| current.as_object_mut()?.get_mut(key))
}

/// Escape interpolation sequences in a literal string
pub fn escape_interpolation(s: &str) -> String {
    s.replace("${", "$${").replace("%{", "%%{")
}
