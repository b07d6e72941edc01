//! Export error types and diagnostics
//!
//! Resolver failures are scoped to a single attribute or resource. They are
//! collected as [`Diagnostics`] so an export can keep going, while cache
//! failures on the single-resource read path are returned as errors.

use serde::Serialize;
use thiserror::Error;

/// Errors raised by the exporter core.
#[derive(Debug, Error)]
pub enum ExportError {
    /// The bulk listing used to hydrate a data source cache failed.
    #[error("failed to hydrate {resource_type} cache: {message}")]
    HydrationFailure {
        resource_type: String,
        message: String,
    },

    /// A resource type's enumeration function failed.
    #[error("failed to enumerate {resource_type}: {message}")]
    EnumerationFailure {
        resource_type: String,
        message: String,
    },

    /// A by-name API lookup failed after a cache miss.
    #[error("failed to look up {resource_type} '{key}': {message}")]
    PointLookupFailure {
        resource_type: String,
        key: String,
        message: String,
    },

    /// A reference attribute did not match any exported resource.
    #[error("{attribute}: no {ref_type} resource with id '{id}' is being exported")]
    UnresolvedReference {
        attribute: String,
        ref_type: String,
        id: String,
    },

    /// A polymorphic reference had a missing, non-string or unknown discriminator.
    #[error("{attribute}: cannot resolve reference, {discriminator} is {}", describe_discriminator(.value))]
    UnresolvedDiscriminator {
        attribute: String,
        discriminator: String,
        value: Option<String>,
    },

    /// A JSON document embedded in a string attribute could not be parsed.
    #[error("{attribute}: malformed embedded reference: {message}")]
    MalformedEmbeddedReference { attribute: String, message: String },

    /// A resource type needed for resolution is not registered.
    #[error("{attribute}: resource type {resource_type} is not registered")]
    RegistryLookupFailure {
        attribute: String,
        resource_type: String,
    },

    /// The data source cache was torn down or never hydrated.
    #[error("data source cache for {0} is not initialized")]
    CacheNotInitialized(String),

    /// An exporter definition references something that does not exist.
    #[error("invalid exporter definition for {resource_type}: {message}")]
    InvalidDefinition {
        resource_type: String,
        message: String,
    },

    /// A resource or attribute filter could not be applied.
    #[error("invalid filter '{filter}': {message}")]
    InvalidFilter { filter: String, message: String },

    /// The operation was cancelled before it completed.
    #[error("{0} was cancelled")]
    Cancelled(String),
}

fn describe_discriminator(value: &Option<String>) -> String {
    match value {
        Some(v) => format!("'{}' which is not a supported type", v),
        None => "missing or not a string".to_string(),
    }
}

/// Diagnostic severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A single reported problem
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub summary: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
}

impl Diagnostic {
    pub fn error(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            summary: summary.into(),
            detail: detail.into(),
            attribute: None,
        }
    }

    pub fn warning(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            summary: summary.into(),
            detail: detail.into(),
            attribute: None,
        }
    }

    pub fn with_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }
}

impl From<ExportError> for Diagnostic {
    fn from(err: ExportError) -> Self {
        let attribute = match &err {
            ExportError::UnresolvedReference { attribute, .. }
            | ExportError::UnresolvedDiscriminator { attribute, .. }
            | ExportError::MalformedEmbeddedReference { attribute, .. }
            | ExportError::RegistryLookupFailure { attribute, .. } => Some(attribute.clone()),
            _ => None,
        };
        let severity = match err {
            ExportError::UnresolvedReference { .. } => Severity::Warning,
            _ => Severity::Error,
        };
        Self {
            severity,
            summary: err.to_string(),
            detail: String::new(),
            attribute,
        }
    }
}

/// An ordered collection of diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: impl Into<Diagnostic>) {
        self.0.push(diagnostic.into());
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.0.extend(other.0);
    }

    pub fn has_errors(&self) -> bool {
        self.0.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter()
    }
}

impl From<ExportError> for Diagnostics {
    fn from(err: ExportError) -> Self {
        Self(vec![err.into()])
    }
}

impl From<Diagnostic> for Diagnostics {
    fn from(diagnostic: Diagnostic) -> Self {
        Self(vec![diagnostic])
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
