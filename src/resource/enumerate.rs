//! Enumeration and export driver
//!
//! An export runs in two phases. First every exporter enumerates its
//! resources, sanitizes their labels and publishes the result. Types are
//! loaded concurrently. Only after every type is published does the reference
//! resolver run, since it reads the maps of other types.

use super::filter;
use super::meta::{ResourceIdMetaMap, ResourceMeta};
use super::registry::{ExporterConfig, RegistrySnapshot};
use super::resolver::{ResolveOptions, ResolvedResource, Resolver};
use super::sanitizer::Strategy;
use crate::error::{Diagnostic, Diagnostics, ExportError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Enumeration function for one resource type
#[async_trait]
pub trait ResourceSource: Send + Sync {
    /// List every resource of the type, keyed by ID, with at least the
    /// original label set
    async fn enumerate(&self, cancel: &CancellationToken) -> anyhow::Result<ResourceIdMetaMap>;
}

/// A source over resources that are already known
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    resources: ResourceIdMetaMap,
}

impl StaticSource {
    pub fn new(resources: ResourceIdMetaMap) -> Self {
        Self { resources }
    }
}

#[async_trait]
impl ResourceSource for StaticSource {
    async fn enumerate(&self, _cancel: &CancellationToken) -> anyhow::Result<ResourceIdMetaMap> {
        Ok(self.resources.clone())
    }
}

/// Options for one export run
#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    pub strategy: Strategy,
    /// `type` or `type::name` entries
    pub resource_filter: Vec<String>,
    /// `type::id` entries; only the listed IDs are exported for that type
    pub id_filter: Vec<String>,
    /// `type::pattern` entries; matching resources are kept
    pub include_filter: Vec<String>,
    /// `type::pattern` entries; matching resources are dropped
    pub exclude_filter: Vec<String>,
    pub resolve: ResolveOptions,
}

/// Enumerate one type, apply filters, sanitize and publish. Returns the number
/// of resources published.
pub async fn load_sanitized_resource_map(
    resource_type: &str,
    exporter: &ExporterConfig,
    options: &ExportOptions,
    cancel: &CancellationToken,
) -> Result<usize, ExportError> {
    let source = exporter
        .source()
        .ok_or_else(|| ExportError::InvalidDefinition {
            resource_type: resource_type.to_string(),
            message: "no enumeration source configured".to_string(),
        })?;

    let resources = tokio::select! {
        _ = cancel.cancelled() => {
            return Err(ExportError::Cancelled(format!("enumeration of {}", resource_type)));
        }
        result = source.enumerate(cancel) => result.map_err(|e| ExportError::EnumerationFailure {
            resource_type: resource_type.to_string(),
            message: format!("{:#}", e),
        })?,
    };

    let resources = filter::filter_by_name(resources, resource_type, &options.resource_filter);
    let mut resources = filter::filter_by_id(resources, resource_type, &options.id_filter);
    options.strategy.sanitize(&mut resources);
    let resources = filter::include_by_regex(resources, resource_type, &options.include_filter)?;
    let resources = filter::exclude_by_regex(resources, resource_type, &options.exclude_filter)?;

    let count = resources.len();
    exporter.publish(resources);
    tracing::info!("Loaded {} {} resources", count, resource_type);
    Ok(count)
}

/// Result of loading every exporter
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    pub counts: BTreeMap<String, usize>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub diagnostics: BTreeMap<String, Diagnostics>,
}

impl LoadReport {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.values().any(Diagnostics::has_errors)
    }
}

/// Load every exporter that has a source, concurrently. A failing type is
/// reported and does not stop the others.
pub async fn load_all(
    exporters: &RegistrySnapshot,
    options: &ExportOptions,
    cancel: &CancellationToken,
) -> LoadReport {
    let mut types: Vec<&String> = exporters
        .iter()
        .filter(|(_, exporter)| exporter.source().is_some())
        .map(|(resource_type, _)| resource_type)
        .collect();
    types.sort();

    let loads = types.into_iter().map(|resource_type| async move {
        let exporter = &exporters[resource_type];
        let result = load_sanitized_resource_map(resource_type, exporter, options, cancel).await;
        (resource_type.clone(), result)
    });

    let mut report = LoadReport::default();
    for (resource_type, result) in join_all(loads).await {
        match result {
            Ok(count) => {
                report.counts.insert(resource_type, count);
            }
            Err(err) => {
                tracing::error!("{}", err);
                report.diagnostics.entry(resource_type).or_default().push(err);
            }
        }
    }
    report
}

/// Resolved configuration for every exported resource
#[derive(Debug, Clone, Serialize)]
pub struct ExportResult {
    pub session_id: Uuid,
    pub exported_at: DateTime<Utc>,
    pub resources: BTreeMap<String, Vec<ResolvedResource>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub diagnostics: BTreeMap<String, Diagnostics>,
    /// Referenced IDs outside the export, by referenced resource type
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub unresolved: BTreeMap<String, BTreeSet<String>>,
}

impl ExportResult {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.values().any(Diagnostics::has_errors)
    }

    pub fn resource_count(&self) -> usize {
        self.resources.values().map(Vec::len).sum()
    }

    /// Find a resolved resource by type and ID
    pub fn get(&self, resource_type: &str, id: &str) -> Option<&ResolvedResource> {
        self.resources.get(resource_type)?.iter().find(|r| r.id == id)
    }
}

/// Stub configuration for resources exported without attributes
fn stub_resource(resource_type: &str, id: &str, meta: &ResourceMeta) -> ResolvedResource {
    let mut config = super::value::AttrMap::new();
    config.insert("name".to_string(), meta.source_label().into());
    ResolvedResource {
        resource_type: resource_type.to_string(),
        id: id.to_string(),
        import_id: meta.import_id(id),
        block_label: meta.block_label.clone(),
        config,
        ..Default::default()
    }
}

/// Resolve every published resource. Must run after every type is loaded.
pub fn resolve_all(exporters: &RegistrySnapshot, options: &ExportOptions) -> ExportResult {
    let session_id = Uuid::new_v4();
    tracing::info!("Resolving references for export {}", session_id);

    let resolver = Resolver::new(exporters).with_options(options.resolve);
    let mut result = ExportResult {
        session_id,
        exported_at: Utc::now(),
        resources: BTreeMap::new(),
        diagnostics: BTreeMap::new(),
        unresolved: BTreeMap::new(),
    };

    let mut types: Vec<&String> = exporters.keys().collect();
    types.sort();

    for resource_type in types {
        let resources = exporters[resource_type].resources();
        if resources.is_empty() {
            continue;
        }

        let mut resolved = Vec::with_capacity(resources.len());
        let mut diagnostics = Diagnostics::new();
        for (id, meta) in resources.iter() {
            let Some(attributes) = meta.nested_attributes() else {
                resolved.push(stub_resource(resource_type, id, meta));
                continue;
            };
            match resolver.resolve(resource_type, id, &attributes) {
                Ok(resource) => {
                    for (ref_type, ids) in &resource.unresolved {
                        result
                            .unresolved
                            .entry(ref_type.clone())
                            .or_default()
                            .extend(ids.iter().cloned());
                    }
                    diagnostics.extend(resource.diagnostics.clone());
                    resolved.push(resource);
                }
                Err(err) => diagnostics.push(
                    Diagnostic::from(err).with_attribute(format!("{}.{}", resource_type, id)),
                ),
            }
        }

        if !diagnostics.is_empty() {
            result.diagnostics.insert(resource_type.clone(), diagnostics);
        }
        result.resources.insert(resource_type.clone(), resolved);
    }

    tracing::info!(
        "Resolved {} resources with {} unresolved referenced types",
        result.resource_count(),
        result.unresolved.len()
    );
    result
}

/// Load then resolve
pub async fn export(
    exporters: &RegistrySnapshot,
    options: &ExportOptions,
    cancel: &CancellationToken,
) -> ExportResult {
    let report = load_all(exporters, options, cancel).await;
    let mut result = resolve_all(exporters, options);
    for (resource_type, diagnostics) in report.diagnostics {
        result
            .diagnostics
            .entry(resource_type)
            .or_default()
            .extend(diagnostics);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::registry::RefAttrSettings;
    use crate::resource::value::{AttrValue, FlatAttrMap};
    use std::sync::Arc;

    struct FailingSource;

    #[async_trait]
    impl ResourceSource for FailingSource {
        async fn enumerate(&self, _cancel: &CancellationToken) -> anyhow::Result<ResourceIdMetaMap> {
            anyhow::bail!("503 Service Unavailable")
        }
    }

    struct PendingSource;

    #[async_trait]
    impl ResourceSource for PendingSource {
        async fn enumerate(&self, _cancel: &CancellationToken) -> anyhow::Result<ResourceIdMetaMap> {
            futures::future::pending().await
        }
    }

    fn source_of(entries: &[(&str, ResourceMeta)]) -> Arc<dyn ResourceSource> {
        Arc::new(StaticSource::new(
            entries
                .iter()
                .map(|(id, meta)| (id.to_string(), meta.clone()))
                .collect(),
        ))
    }

    fn flat(entries: &[(&str, &str)]) -> FlatAttrMap {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), AttrValue::from(*v)))
            .collect()
    }

    #[tokio::test]
    async fn test_load_sanitizes_and_filters() {
        let exporter = ExporterConfig::default().with_source(source_of(&[
            ("q1", ResourceMeta::new("Sales Queue")),
            ("q2", ResourceMeta::new("Support")),
        ]));
        let options = ExportOptions {
            resource_filter: vec!["genesyscloud_routing_queue::Sales Queue".to_string()],
            ..Default::default()
        };

        let count = load_sanitized_resource_map(
            "genesyscloud_routing_queue",
            &exporter,
            &options,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(count, 1);
        let meta = exporter.lookup("q1").unwrap();
        assert_eq!(meta.block_label, "Sales_Queue");
        assert_eq!(meta.original_label, "Sales Queue");
    }

    #[tokio::test]
    async fn test_load_keeps_only_listed_ids() {
        let exporter = ExporterConfig::default().with_source(source_of(&[
            ("q1", ResourceMeta::new("Sales")),
            ("q2", ResourceMeta::new("Support")),
            ("q3", ResourceMeta::new("Billing")),
        ]));
        let options = ExportOptions {
            id_filter: vec![
                "genesyscloud_routing_queue::q2".to_string(),
                "genesyscloud_routing_queue::q3".to_string(),
                "genesyscloud_user::q1".to_string(),
            ],
            ..Default::default()
        };

        let count = load_sanitized_resource_map(
            "genesyscloud_routing_queue",
            &exporter,
            &options,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(count, 2);
        assert!(exporter.lookup("q1").is_none());
        assert!(exporter.lookup("q2").is_some());
    }

    #[tokio::test]
    async fn test_import_id_carries_type_prefix() {
        let mut exporters = RegistrySnapshot::new();
        exporters.insert(
            "prefixed".to_string(),
            Arc::new(ExporterConfig::default().with_source(source_of(&[
                ("1", ResourceMeta::new("stub").with_id_prefix("site/")),
                (
                    "2",
                    ResourceMeta::new("full")
                        .with_id_prefix("site/")
                        .with_export_attributes(flat(&[("name", "full")])),
                ),
            ]))),
        );

        let result = export(&exporters, &ExportOptions::default(), &CancellationToken::new()).await;
        assert_eq!(result.get("prefixed", "1").unwrap().import_id, "site/1");
        assert_eq!(result.get("prefixed", "2").unwrap().import_id, "site/2");
    }

    #[tokio::test]
    async fn test_load_all_reports_failures_per_type() {
        let mut exporters = RegistrySnapshot::new();
        exporters.insert(
            "ok".to_string(),
            Arc::new(ExporterConfig::default().with_source(source_of(&[("a", ResourceMeta::new("A"))]))),
        );
        exporters.insert(
            "broken".to_string(),
            Arc::new(ExporterConfig::default().with_source(Arc::new(FailingSource))),
        );
        exporters.insert("sourceless".to_string(), Arc::new(ExporterConfig::default()));

        let report = load_all(&exporters, &ExportOptions::default(), &CancellationToken::new()).await;
        assert_eq!(report.counts.get("ok"), Some(&1));
        assert!(report.diagnostics["broken"].has_errors());
        assert!(!report.counts.contains_key("sourceless"));
    }

    #[tokio::test]
    async fn test_cancelled_load_publishes_nothing() {
        let exporter = ExporterConfig::default().with_source(Arc::new(PendingSource));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = load_sanitized_resource_map("t", &exporter, &ExportOptions::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::Cancelled(_)));
        assert_eq!(exporter.resource_count(), 0);
    }

    #[tokio::test]
    async fn test_export_resolves_across_types() {
        let mut exporters = RegistrySnapshot::new();
        exporters.insert(
            "type_a".to_string(),
            Arc::new(ExporterConfig::default().with_source(source_of(&[("a1", ResourceMeta::new("alpha"))]))),
        );
        exporters.insert(
            "type_b".to_string(),
            Arc::new(
                ExporterConfig::default()
                    .with_ref_attr("parent_id", RefAttrSettings::new("type_a"))
                    .with_source(source_of(&[(
                        "b1",
                        ResourceMeta::new("beta")
                            .with_export_attributes(flat(&[("parent_id", "a1"), ("name", "beta")])),
                    )])),
            ),
        );

        let result = export(&exporters, &ExportOptions::default(), &CancellationToken::new()).await;

        let b1 = result.get("type_b", "b1").unwrap();
        assert_eq!(b1.config["parent_id"].to_json(), serde_json::json!("${type_a.alpha.id}"));
        let a1 = result.get("type_a", "a1").unwrap();
        assert_eq!(a1.config["name"], AttrValue::from("alpha"));
        assert!(!result.has_errors());
        assert_eq!(result.resource_count(), 2);
    }
}
