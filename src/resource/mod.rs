//! Resource export layer
//!
//! Export policies are data-driven: exporter definitions are loaded from JSON
//! files at compile time, so new resource types can be described without code
//! changes. Only behavior that cannot be expressed as data (custom resolvers)
//! lives in code.
//!
//! # Architecture
//!
//! - [`meta`] - Per-resource metadata (original and sanitized labels)
//! - [`value`] - Attribute value tree, path flattening
//! - [`sanitizer`] - Block label sanitizing strategies
//! - [`registry`] - Exporter definitions and the process-wide registry
//! - [`filter`] - Resource type, name, regex and attribute filters
//! - [`resolver`] - Reference resolution and value cleanup
//! - [`custom`] - Built-in custom resolvers
//! - [`enumerate`] - Enumerate, sanitize, publish and resolve
//!
//! # Exporter Definitions
//!
//! Definitions live in JSON files under `src/exporters/`:
//! - `outbound.json` - Outbound campaigns, contact lists, rulesets
//! - `routing.json` - Queues, skills, wrap-up codes, flows, integrations
//! - `directory.json` - Users, groups, teams, divisions
//!
//! # Example
//!
//! ```ignore
//! use gcexport::resource::{enumerate::{export, ExportOptions}, registry::ExporterRegistry};
//!
//! async fn run(registry: &ExporterRegistry) {
//!     let exporters = registry.get_all();
//!     let result = export(&exporters, &ExportOptions::default(), &CancellationToken::new()).await;
//!     println!("{} resources", result.resource_count());
//! }
//! ```

pub mod custom;
pub mod enumerate;
pub mod filter;
pub mod meta;
pub mod registry;
pub mod resolver;
pub mod sanitizer;
pub mod value;

pub use enumerate::{export, ExportOptions, ExportResult, ResourceSource, StaticSource};
pub use meta::{ResourceIdMetaMap, ResourceMeta};
pub use registry::{ExporterConfig, ExporterDef, ExporterRegistry, RefAttrSettings, RegistrySnapshot};
pub use resolver::{ResolveOptions, ResolvedResource, Resolver};
pub use sanitizer::Strategy;
pub use value::{AttrMap, AttrValue, Reference};
