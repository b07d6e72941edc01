//! API-backed resource sources
//!
//! One [`ApiResourceSource`] per exporter with an `api_path`. It enumerates
//! the list endpoint for the export and answers name lookups for the data
//! source cache. Fetched objects are kept in a [`ResourceCache`] so single
//! reads after a listing stay local.

use super::client::ApiClient;
use super::http::format_api_error;
use crate::cache::{DataSourceCache, DataSourceCacheSet, DataSourceLookup, ResourceCache};
use crate::error::ExportError;
use crate::resource::enumerate::ResourceSource;
use crate::resource::meta::{ResourceIdMetaMap, ResourceMeta};
use crate::resource::registry::{builtin_definitions, ExporterConfig, ExporterDef, ExporterRegistry};
use crate::resource::value::{flatten, AttrMap, AttrValue};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Keys of a bare entity reference (`{"id": "...", "selfUri": "..."}`)
const ENTITY_REF_KEYS: &[&str] = &["id", "name", "selfUri"];

pub struct ApiResourceSource {
    client: Arc<ApiClient>,
    resource_type: String,
    api_path: String,
    id_field: String,
    name_field: String,
    id_prefix: Option<String>,
    cache: ResourceCache<Value>,
}

impl std::fmt::Debug for ApiResourceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiResourceSource")
            .field("resource_type", &self.resource_type)
            .field("api_path", &self.api_path)
            .field("cached", &self.cache.size())
            .finish()
    }
}

impl ApiResourceSource {
    /// A source for `def`, or `None` if it has no list endpoint
    pub fn from_def(client: Arc<ApiClient>, resource_type: &str, def: &ExporterDef) -> Option<Self> {
        let api_path = def.api_path.clone()?;
        Some(Self {
            client,
            resource_type: resource_type.to_string(),
            api_path,
            id_field: def.id_field.clone(),
            name_field: def.name_field.clone(),
            id_prefix: def.id_prefix.clone(),
            cache: ResourceCache::new(),
        })
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn cache(&self) -> &ResourceCache<Value> {
        &self.cache
    }

    fn entity_id<'a>(&self, entity: &'a Value) -> Option<&'a str> {
        entity.get(&self.id_field).and_then(Value::as_str)
    }

    fn entity_name<'a>(&self, entity: &'a Value) -> Option<&'a str> {
        entity.get(&self.name_field).and_then(Value::as_str)
    }

    /// List every entity and cache it by ID
    pub async fn fetch_all(&self, cancel: &CancellationToken) -> Result<Vec<Value>> {
        let entities = match self.client.list_all(&self.api_path, cancel).await {
            Ok(entities) => entities,
            Err(e) => {
                tracing::error!("Failed to list {}: {:#}", self.resource_type, e);
                return Err(anyhow::anyhow!(format_api_error(&e)));
            }
        };

        for entity in &entities {
            if let Some(id) = self.entity_id(entity) {
                self.cache.set(id, entity.clone());
            }
        }
        Ok(entities)
    }

    /// One entity by ID, from the cache when it was already listed
    pub async fn get(&self, id: &str) -> Result<Value> {
        if let Some(entity) = self.cache.get(id) {
            return Ok(entity);
        }
        let entity = self.client.get_by_id(&self.api_path, id).await?;
        self.cache.set(id, entity.clone());
        Ok(entity)
    }
}

#[async_trait]
impl ResourceSource for ApiResourceSource {
    async fn enumerate(&self, cancel: &CancellationToken) -> Result<ResourceIdMetaMap> {
        let entities = self.fetch_all(cancel).await?;
        let mut resources = ResourceIdMetaMap::new();

        for entity in &entities {
            let Some(id) = self.entity_id(entity) else {
                tracing::warn!("Skipping {} entity without '{}'", self.resource_type, self.id_field);
                continue;
            };
            let label = self.entity_name(entity).unwrap_or(id);
            let attributes = flatten(&api_attributes(entity));
            let mut meta = ResourceMeta::new(label).with_export_attributes(attributes);
            if let Some(prefix) = &self.id_prefix {
                meta = meta.with_id_prefix(prefix);
            }
            resources.insert(id.to_string(), meta);
        }
        Ok(resources)
    }
}

#[async_trait]
impl DataSourceLookup for ApiResourceSource {
    async fn hydrate(&self, cancel: &CancellationToken) -> Result<HashMap<String, String>> {
        let entities = self.fetch_all(cancel).await?;
        Ok(entities
            .iter()
            .filter_map(|e| Some((self.entity_name(e)?.to_string(), self.entity_id(e)?.to_string())))
            .collect())
    }

    async fn lookup(&self, key: &str, cancel: &CancellationToken) -> Result<String> {
        let entity = self
            .client
            .find_by_name(&self.api_path, &self.name_field, key, cancel)
            .await?
            .ok_or_else(|| anyhow::anyhow!("no {} named '{}'", self.resource_type, key))?;
        let id = self
            .entity_id(&entity)
            .ok_or_else(|| anyhow::anyhow!("{} '{}' has no '{}'", self.resource_type, key, self.id_field))?
            .to_string();
        self.cache.set(&id, entity);
        Ok(id)
    }
}

/// Registry of every built-in exporter, with API sources attached where the
/// definition names a list endpoint
pub fn live_registry(client: Arc<ApiClient>) -> Result<ExporterRegistry, ExportError> {
    let registry = ExporterRegistry::new();
    for (resource_type, def) in builtin_definitions()? {
        let mut config = ExporterConfig::from_def(resource_type, def.clone())?;
        if let Some(source) = ApiResourceSource::from_def(Arc::clone(&client), resource_type, def) {
            config = config.with_source(Arc::new(source));
        }
        registry.register(resource_type, config)?;
    }
    Ok(registry)
}

/// The session's data source cache for `resource_type`
pub fn data_source_cache(
    caches: &DataSourceCacheSet,
    client: Arc<ApiClient>,
    resource_type: &str,
) -> Result<Arc<DataSourceCache>, ExportError> {
    if let Some(cache) = caches.get(resource_type) {
        return Ok(cache);
    }
    let def = builtin_definitions()?
        .get(resource_type)
        .ok_or_else(|| ExportError::RegistryLookupFailure {
            attribute: String::new(),
            resource_type: resource_type.to_string(),
        })?;
    let source = ApiResourceSource::from_def(client, resource_type, def).ok_or_else(|| {
        ExportError::InvalidDefinition {
            resource_type: resource_type.to_string(),
            message: "no list endpoint for data source lookups".to_string(),
        }
    })?;
    Ok(caches.get_or_create(resource_type, || Arc::new(source)))
}

/// Convert an API object to provider-style attributes: snake_case keys,
/// `selfUri` dropped, bare entity references collapsed to `<key>_id` and
/// lists of them to `<key>_ids`
pub fn api_attributes(entity: &Value) -> AttrMap {
    let mut attributes = AttrMap::new();
    let Value::Object(object) = entity else {
        return attributes;
    };

    for (key, value) in object {
        if key == "selfUri" {
            continue;
        }
        let key = to_snake_case(key);
        match value {
            v if is_entity_ref(v) => {
                attributes.insert(format!("{}_id", key), entity_ref_id(v));
            }
            Value::Array(items) if !items.is_empty() && items.iter().all(is_entity_ref) => {
                let ids = items.iter().map(entity_ref_id).collect();
                attributes.insert(format!("{}_ids", key.trim_end_matches('s')), AttrValue::List(ids));
            }
            other => {
                attributes.insert(key, api_value(other));
            }
        }
    }
    attributes
}

fn api_value(value: &Value) -> AttrValue {
    match value {
        Value::Object(_) => AttrValue::Map(api_attributes(value)),
        Value::Array(items) => AttrValue::List(items.iter().map(api_value).collect()),
        other => AttrValue::from(other.clone()),
    }
}

fn is_entity_ref(value: &Value) -> bool {
    match value {
        Value::Object(object) => {
            object.get("id").is_some_and(Value::is_string)
                && object.keys().all(|k| ENTITY_REF_KEYS.contains(&k.as_str()))
        }
        _ => false,
    }
}

fn entity_ref_id(value: &Value) -> AttrValue {
    value
        .get("id")
        .and_then(Value::as_str)
        .map_or(AttrValue::Null, AttrValue::from)
}

/// `contactListFilters` -> `contact_list_filters`
pub fn to_snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    let mut prev_lower = false;
    for c in key.chars() {
        if c.is_ascii_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
            prev_lower = false;
        } else {
            out.push(c);
            prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_to_snake_case() {
        assert_eq!(to_snake_case("contactListFilters"), "contact_list_filters");
        assert_eq!(to_snake_case("name"), "name");
        assert_eq!(to_snake_case("queueID"), "queue_id");
        assert_eq!(to_snake_case("phone2Type"), "phone2_type");
    }

    #[test]
    fn test_api_attributes_collapse_entity_refs() {
        let entity = json!({
            "id": "c1",
            "name": "Spring",
            "selfUri": "/api/v2/outbound/campaigns/c1",
            "contactList": {"id": "cl1", "name": "Leads", "selfUri": "/x"},
            "dncLists": [{"id": "d1"}, {"id": "d2"}],
            "phoneColumns": [{"columnName": "Cell", "type": "cell"}],
            "callerName": "",
            "division": {"id": "div1", "name": "Home", "selfUri": "/d", "homeDivision": true}
        });

        let attrs = api_attributes(&entity);
        assert!(!attrs.contains_key("self_uri"));
        assert_eq!(attrs.get("contact_list_id"), Some(&AttrValue::from("cl1")));
        assert_eq!(
            attrs.get("dnc_list_ids"),
            Some(&AttrValue::List(vec!["d1".into(), "d2".into()]))
        );
        assert_eq!(attrs.get("caller_name"), Some(&AttrValue::from("")));

        let AttrValue::List(columns) = &attrs["phone_columns"] else {
            panic!("phone_columns should be a list");
        };
        assert_eq!(
            columns[0].as_map().and_then(|m| m.get("column_name")),
            Some(&AttrValue::from("Cell"))
        );

        // extra keys mean it is a real nested object, not a bare reference
        let division = attrs["division"].as_map().unwrap();
        assert_eq!(division.get("id"), Some(&AttrValue::from("div1")));
        assert!(!division.contains_key("self_uri"));
    }
}
