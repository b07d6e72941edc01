//! Genesys Cloud export core
//!
//! Sanitizes resource labels, resolves references between exported
//! resources, and caches API lookups for configuration export.

pub mod cache;
pub mod config;
pub mod error;
pub mod genesys;
pub mod resource;

pub use error::{Diagnostic, Diagnostics, ExportError, Severity};
