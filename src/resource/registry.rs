//! Exporter Registry - per resource type export policy
//!
//! Built-in exporter definitions are loaded from embedded JSON files. Each
//! definition says which attributes reference other resource types and how
//! the resolver should treat zero values, empty arrays and nested objects.
//!
//! A registry is an explicit object with a `new -> register* -> freeze`
//! lifecycle. Resolution works against a [`RegistrySnapshot`], which is a copy
//! of the registered entries taken by [`ExporterRegistry::get_all`].

use super::custom::{self, CustomResolverFn};
use super::enumerate::ResourceSource;
use super::meta::{ResourceIdMetaMap, ResourceMeta};
use super::value::{AttrMap, AttrValue};
use crate::error::ExportError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Embedded exporter definition files (compiled into the binary)
const EXPORTER_FILES: &[&str] = &[
    include_str!("../exporters/outbound.json"),
    include_str!("../exporters/routing.json"),
    include_str!("../exporters/directory.json"),
];

/// Reference attribute settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefAttrSettings {
    /// Resource type the attribute points at
    pub ref_type: String,
    /// Literal values that are valid but are not IDs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alt_values: Vec<String>,
}

impl RefAttrSettings {
    pub fn new(ref_type: &str) -> Self {
        Self {
            ref_type: ref_type.to_string(),
            alt_values: Vec::new(),
        }
    }

    pub fn with_alt_values(mut self, values: &[&str]) -> Self {
        self.alt_values = values.iter().map(|v| v.to_string()).collect();
        self
    }
}

/// A reference held inside a JSON document stored in a string attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedRefAttr {
    /// String attribute holding the JSON document
    pub attr: String,
    /// Dotted path of the ID (or list of IDs) inside the document
    pub nested_attr: String,
    pub ref_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alt_values: Vec<String>,
}

impl EncodedRefAttr {
    pub fn settings(&self) -> RefAttrSettings {
        RefAttrSettings {
            ref_type: self.ref_type.clone(),
            alt_values: self.alt_values.clone(),
        }
    }
}

/// Exporter definition from JSON
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterDef {
    #[serde(default)]
    pub display_name: String,
    /// List endpoint used for enumeration (e.g. `/api/v2/outbound/attemptlimits`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_path: Option<String>,
    #[serde(default = "default_id_field")]
    pub id_field: String,
    #[serde(default = "default_name_field")]
    pub name_field: String,
    /// Prepended to resource IDs to form the import ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_prefix: Option<String>,
    #[serde(default)]
    pub ref_attrs: BTreeMap<String, RefAttrSettings>,
    #[serde(default)]
    pub allow_zero_values: Vec<String>,
    #[serde(default)]
    pub allow_zero_values_in_map: Vec<String>,
    #[serde(default)]
    pub allow_empty_arrays: Vec<String>,
    #[serde(default)]
    pub json_encode_attributes: Vec<String>,
    #[serde(default)]
    pub encoded_ref_attrs: Vec<EncodedRefAttr>,
    /// Attribute path -> built-in custom resolver name
    #[serde(default)]
    pub custom_resolvers: BTreeMap<String, String>,
    /// Object attribute path -> inner attributes; the object is dropped when
    /// all of them are missing
    #[serde(default)]
    pub remove_if_missing: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub remove_if_self_referential: Vec<String>,
    #[serde(default)]
    pub excluded_attributes: Vec<String>,
}

fn default_id_field() -> String {
    "id".to_string()
}

fn default_name_field() -> String {
    "name".to_string()
}

/// Root structure of exporters/*.json
#[derive(Debug, Clone, Deserialize)]
struct ExporterFile {
    #[serde(default)]
    exporters: HashMap<String, ExporterDef>,
}

static BUILTIN_DEFS: OnceLock<Result<HashMap<String, ExporterDef>, String>> = OnceLock::new();

/// Merge the exporters of every definition file. Later files win on
/// duplicate types.
fn parse_definitions(files: &[&str]) -> Result<HashMap<String, ExporterDef>, serde_json::Error> {
    let mut defs = HashMap::new();
    for content in files {
        let file: ExporterFile = serde_json::from_str(content)?;
        defs.extend(file.exporters);
    }
    Ok(defs)
}

/// Built-in exporter definitions (parsed from embedded JSON on first access)
pub fn builtin_definitions() -> Result<&'static HashMap<String, ExporterDef>, ExportError> {
    BUILTIN_DEFS
        .get_or_init(|| parse_definitions(EXPORTER_FILES).map_err(|e| e.to_string()))
        .as_ref()
        .map_err(|message| ExportError::InvalidDefinition {
            resource_type: "embedded exporter definitions".to_string(),
            message: message.clone(),
        })
}

/// Runtime export policy for one resource type
pub struct ExporterConfig {
    def: ExporterDef,
    resolvers: HashMap<String, CustomResolverFn>,
    excluded: RwLock<Vec<String>>,
    sanitized: RwLock<Arc<ResourceIdMetaMap>>,
    source: Option<Arc<dyn ResourceSource>>,
}

impl fmt::Debug for ExporterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExporterConfig")
            .field("def", &self.def)
            .field("resolvers", &self.resolvers.keys().collect::<Vec<_>>())
            .field("excluded", &*self.excluded.read())
            .field("resources", &self.sanitized.read().len())
            .field("has_source", &self.source.is_some())
            .finish()
    }
}

impl Clone for ExporterConfig {
    fn clone(&self) -> Self {
        Self {
            def: self.def.clone(),
            resolvers: self.resolvers.clone(),
            excluded: RwLock::new(self.excluded.read().clone()),
            sanitized: RwLock::new(Arc::clone(&self.sanitized.read())),
            source: self.source.clone(),
        }
    }
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self::new(ExporterDef::default())
    }
}

impl ExporterConfig {
    pub fn new(def: ExporterDef) -> Self {
        let excluded = def.excluded_attributes.clone();
        Self {
            def,
            resolvers: HashMap::new(),
            excluded: RwLock::new(excluded),
            sanitized: RwLock::new(Arc::new(ResourceIdMetaMap::new())),
            source: None,
        }
    }

    /// Build from a definition, binding custom resolver names to functions
    pub fn from_def(resource_type: &str, def: ExporterDef) -> Result<Self, ExportError> {
        let mut config = Self::new(def);
        for (path, name) in config.def.custom_resolvers.clone() {
            let resolver = custom::builtin(&name).ok_or_else(|| ExportError::InvalidDefinition {
                resource_type: resource_type.to_string(),
                message: format!("unknown custom resolver '{}' for {}", name, path),
            })?;
            config.resolvers.insert(path, resolver);
        }
        Ok(config)
    }

    pub fn definition(&self) -> &ExporterDef {
        &self.def
    }

    pub fn with_ref_attr(mut self, path: &str, settings: RefAttrSettings) -> Self {
        self.def.ref_attrs.insert(path.to_string(), settings);
        self
    }

    pub fn with_allow_zero_values(mut self, paths: &[&str]) -> Self {
        self.def
            .allow_zero_values
            .extend(paths.iter().map(|p| p.to_string()));
        self
    }

    pub fn with_allow_empty_arrays(mut self, paths: &[&str]) -> Self {
        self.def
            .allow_empty_arrays
            .extend(paths.iter().map(|p| p.to_string()));
        self
    }

    pub fn with_json_encode_attributes(mut self, paths: &[&str]) -> Self {
        self.def
            .json_encode_attributes
            .extend(paths.iter().map(|p| p.to_string()));
        self
    }

    pub fn with_encoded_ref_attr(mut self, attr: EncodedRefAttr) -> Self {
        self.def.encoded_ref_attrs.push(attr);
        self
    }

    pub fn with_remove_if_missing(mut self, path: &str, inner: &[&str]) -> Self {
        self.def.remove_if_missing.insert(
            path.to_string(),
            inner.iter().map(|p| p.to_string()).collect(),
        );
        self
    }

    pub fn with_remove_if_self_referential(mut self, paths: &[&str]) -> Self {
        self.def
            .remove_if_self_referential
            .extend(paths.iter().map(|p| p.to_string()));
        self
    }

    pub fn with_custom_resolver(mut self, path: &str, resolver: CustomResolverFn) -> Self {
        self.resolvers.insert(path.to_string(), resolver);
        self
    }

    pub fn with_excluded_attribute(self, path: &str) -> Self {
        self.add_excluded_attribute(path);
        self
    }

    pub fn with_source(mut self, source: Arc<dyn ResourceSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn source(&self) -> Option<&Arc<dyn ResourceSource>> {
        self.source.as_ref()
    }

    pub fn ref_attr(&self, path: &str) -> Option<&RefAttrSettings> {
        self.def.ref_attrs.get(path)
    }

    pub fn is_zero_value_allowed(&self, path: &str) -> bool {
        self.def.allow_zero_values.iter().any(|p| p == path)
    }

    pub fn is_zero_value_in_map_allowed(&self, path: &str) -> bool {
        self.def.allow_zero_values_in_map.iter().any(|p| p == path)
    }

    pub fn is_empty_array_allowed(&self, path: &str) -> bool {
        self.def.allow_empty_arrays.iter().any(|p| p == path)
    }

    pub fn is_json_encodable(&self, path: &str) -> bool {
        self.def.json_encode_attributes.iter().any(|p| p == path)
    }

    /// True if `path` is excluded or nested under an excluded attribute
    pub fn is_excluded(&self, path: &str) -> bool {
        self.excluded.read().iter().any(|excluded| {
            path == excluded
                || path
                    .strip_prefix(excluded.as_str())
                    .is_some_and(|rest| rest.starts_with('.'))
        })
    }

    pub fn add_excluded_attribute(&self, path: &str) {
        let mut excluded = self.excluded.write();
        if !excluded.iter().any(|p| p == path) {
            excluded.push(path.to_string());
        }
    }

    pub fn excluded_attributes(&self) -> Vec<String> {
        self.excluded.read().clone()
    }

    /// True iff every inner attribute configured for `path` is absent or null
    /// in `inner`. Paths without configuration are never dropped.
    pub fn should_drop_if_all_missing(&self, path: &str, inner: &AttrMap) -> bool {
        match self.def.remove_if_missing.get(path) {
            Some(required) if !required.is_empty() => required
                .iter()
                .all(|attr| inner.get(attr).map_or(true, AttrValue::is_null)),
            _ => false,
        }
    }

    /// True iff `attr_path` is configured for self-reference dropping and the
    /// value under `attr_key` is non-empty and equals `resource_id`
    pub fn should_drop_if_self_referential(
        &self,
        resource_id: &str,
        attr_path: &str,
        attr_key: &str,
        inner: &AttrMap,
    ) -> bool {
        if !self.def.remove_if_self_referential.iter().any(|p| p == attr_path) {
            return false;
        }
        match inner.get(attr_key).and_then(|v| v.as_str()) {
            Some(value) => !value.is_empty() && value == resource_id,
            None => false,
        }
    }

    /// Encoded reference settings for a string attribute holding JSON
    pub fn encoded_ref_attrs_for(&self, path: &str) -> Vec<&EncodedRefAttr> {
        self.def
            .encoded_ref_attrs
            .iter()
            .filter(|e| e.attr == path)
            .collect()
    }

    pub fn custom_resolver(&self, path: &str) -> Option<CustomResolverFn> {
        self.resolvers.get(path).copied()
    }

    /// Replace the sanitized resource map. Readers that already hold the
    /// previous map keep using it.
    pub fn publish(&self, resources: ResourceIdMetaMap) {
        *self.sanitized.write() = Arc::new(resources);
    }

    /// Sanitized metadata for one resource
    pub fn lookup(&self, id: &str) -> Option<ResourceMeta> {
        self.sanitized.read().get(id).cloned()
    }

    pub fn resources(&self) -> Arc<ResourceIdMetaMap> {
        Arc::clone(&self.sanitized.read())
    }

    pub fn resource_count(&self) -> usize {
        self.sanitized.read().len()
    }
}

/// Copy of the registry taken for one export
pub type RegistrySnapshot = HashMap<String, Arc<ExporterConfig>>;

/// Registry of exporter configurations keyed by resource type
#[derive(Debug, Default)]
pub struct ExporterRegistry {
    exporters: RwLock<HashMap<String, Arc<ExporterConfig>>>,
    frozen: AtomicBool,
}

impl ExporterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in exporter definition
    pub fn with_builtin() -> Result<Self, ExportError> {
        let registry = Self::new();
        for (resource_type, def) in builtin_definitions()? {
            registry.register(
                resource_type,
                ExporterConfig::from_def(resource_type, def.clone())?,
            )?;
        }
        Ok(registry)
    }

    /// Insert or overwrite the entry for `resource_type`
    pub fn register(&self, resource_type: &str, config: ExporterConfig) -> Result<(), ExportError> {
        if self.frozen.load(Ordering::Acquire) {
            return Err(ExportError::InvalidDefinition {
                resource_type: resource_type.to_string(),
                message: "registry is frozen".to_string(),
            });
        }
        tracing::debug!("Registering exporter {}", resource_type);
        self.exporters
            .write()
            .insert(resource_type.to_string(), Arc::new(config));
        Ok(())
    }

    /// Stop accepting registrations
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    pub fn get(&self, resource_type: &str) -> Option<Arc<ExporterConfig>> {
        self.exporters.read().get(resource_type).cloned()
    }

    /// Copy of every entry. Changes made through the copy do not reach the
    /// registry.
    pub fn get_all(&self) -> RegistrySnapshot {
        self.exporters
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), Arc::new(ExporterConfig::clone(v))))
            .collect()
    }

    /// Registered type names, sorted
    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.get_all().into_keys().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.exporters.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.exporters.read().is_empty()
    }
}
