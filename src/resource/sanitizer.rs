//! Resource label sanitizer
//!
//! Turns display names into block labels that are legal configuration
//! identifiers: a letter or underscore followed by letters, digits,
//! underscores or dashes.
//!
//! Three strategies are supported:
//!
//! - [`Strategy::Legacy`] replaces every unsafe character with `_` and appends
//!   a hash to altered labels that collide with another label in the batch.
//! - [`Strategy::Optimized`] uses the same replacement but only hashes altered
//!   labels that collide with other altered labels.
//! - [`Strategy::Transliterating`] folds unicode to ASCII first and always
//!   appends a hash, so labels stay stable across runs and organizations.
//!   Labels that are still identical get a `_DUPLICATE_INSTANCE_<n>` marker.
//!
//! In every strategy, labels that were not altered and collide with each
//! other are left colliding.

use super::meta::ResourceIdMetaMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Environment toggle selecting the legacy strategy
pub const SANITIZER_LEGACY_ENV: &str = "GENESYS_SANITIZER_LEGACY";
/// Environment toggle selecting the optimized strategy
pub const SANITIZER_OPTIMIZED_ENV: &str = "GENESYS_SANITIZER_OPTIMIZED";
/// Environment toggle selecting the transliterating strategy
pub const SANITIZER_BCP_OPTIMIZED_ENV: &str = "GENESYS_SANITIZER_BCP_OPTIMIZED";

/// Marker appended to labels that remain identical after hashing
pub const DUPLICATE_INSTANCE_MARKER: &str = "_DUPLICATE_INSTANCE_";

/// Label sanitizing strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    Legacy,
    Optimized,
    /// Also known as the BCP optimized sanitizer
    Transliterating,
}

impl Strategy {
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "legacy" | "original" => Some(Self::Legacy),
            "optimized" => Some(Self::Optimized),
            "transliterating" | "bcp" | "bcp_optimized" => Some(Self::Transliterating),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Legacy => "legacy",
            Self::Optimized => "optimized",
            Self::Transliterating => "transliterating",
        }
    }

    /// Pick a strategy from the environment toggles, if any is set
    pub fn from_env() -> Option<Self> {
        Self::from_env_with(|name| std::env::var(name).ok())
    }

    /// Same as [`Strategy::from_env`] over an arbitrary variable lookup
    pub fn from_env_with<F>(env: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let enabled = |name: &str| {
            env(name)
                .map(|v| !v.is_empty() && v != "0" && !v.eq_ignore_ascii_case("false"))
                .unwrap_or(false)
        };

        if enabled(SANITIZER_BCP_OPTIMIZED_ENV) {
            Some(Self::Transliterating)
        } else if enabled(SANITIZER_OPTIMIZED_ENV) {
            Some(Self::Optimized)
        } else if enabled(SANITIZER_LEGACY_ENV) {
            Some(Self::Legacy)
        } else {
            None
        }
    }

    /// Replace unsafe characters without any batch context
    pub fn candidate(&self, name: &str) -> String {
        match self {
            Self::Legacy | Self::Optimized => escape_unsafe(name),
            Self::Transliterating => escape_unsafe(deunicode::deunicode(name).trim()),
        }
    }

    /// Sanitize a single label without any batch context. Safe labels are
    /// returned unchanged.
    pub fn sanitize_label(&self, name: &str) -> String {
        fix_leading_char(self.candidate(name))
    }

    /// Sanitize every label in the map. The original name is kept in
    /// `original_label` and the result is written to `block_label`.
    pub fn sanitize(&self, resources: &mut ResourceIdMetaMap) {
        for meta in resources.values_mut() {
            if meta.original_label.is_empty() {
                meta.original_label = meta.block_label.clone();
            }
        }

        let labels = match self {
            Self::Legacy => collision_hashed_labels(resources, false),
            Self::Optimized => collision_hashed_labels(resources, true),
            Self::Transliterating => always_hashed_labels(resources),
        };

        for (id, label) in labels {
            if let Some(meta) = resources.get_mut(&id) {
                meta.block_label = fix_leading_char(label);
            }
        }

        tracing::debug!(
            "Sanitized {} labels with {} strategy",
            resources.len(),
            self.as_str()
        );
    }

    /// Sanitize a batch of ID -> display name pairs
    pub fn sanitize_batch(&self, entries: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut resources: ResourceIdMetaMap = entries
            .iter()
            .map(|(id, name)| (id.clone(), super::meta::ResourceMeta::new(name)))
            .collect();
        self.sanitize(&mut resources);
        resources
            .into_iter()
            .map(|(id, meta)| (id, meta.block_label))
            .collect()
    }
}

fn is_safe_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn escape_unsafe(name: &str) -> String {
    name.chars()
        .map(|c| if is_safe_char(c) { c } else { '_' })
        .collect()
}

/// Labels must start with a letter or underscore
fn fix_leading_char(label: String) -> String {
    match label.chars().next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => label,
        _ => format!("_{}", label),
    }
}

/// 32-bit FNV-1 hash of the original name, as decimal
pub fn label_hash(original: &str) -> String {
    fnv1_32(original.as_bytes()).to_string()
}

fn fnv1_32(bytes: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;
    bytes.iter().fold(OFFSET_BASIS, |hash, b| {
        hash.wrapping_mul(PRIME) ^ u32::from(*b)
    })
}

/// Hash altered labels whose candidate is shared with other entries. With
/// `altered_only`, only other altered candidates count as collisions.
fn collision_hashed_labels(
    resources: &ResourceIdMetaMap,
    altered_only: bool,
) -> Vec<(String, String)> {
    let candidates: Vec<(&String, &str, String)> = resources
        .iter()
        .map(|(id, meta)| {
            let original = meta.source_label();
            (id, original, Strategy::Legacy.candidate(original))
        })
        .collect();

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for (_, original, candidate) in &candidates {
        if !altered_only || candidate != original {
            *counts.entry(candidate.as_str()).or_default() += 1;
        }
    }

    candidates
        .iter()
        .map(|(id, original, candidate)| {
            let altered = candidate != original;
            let collides = counts.get(candidate.as_str()).copied().unwrap_or(0) > 1;
            let label = if altered && collides {
                format!("{}_{}", candidate, label_hash(original))
            } else {
                candidate.clone()
            };
            ((*id).clone(), label)
        })
        .collect()
}

fn always_hashed_labels(resources: &ResourceIdMetaMap) -> Vec<(String, String)> {
    let labels: Vec<(String, String)> = resources
        .iter()
        .map(|(id, meta)| {
            let original = meta.source_label();
            let mut label = format!(
                "{}__BLH{}",
                Strategy::Transliterating.candidate(original),
                label_hash(original)
            );
            if let Some(block_hash) = meta.block_hash.as_deref().filter(|h| !h.is_empty()) {
                label.push_str("_UFH");
                label.push_str(&escape_unsafe(block_hash));
            }
            (id.clone(), fix_leading_char(label))
        })
        .collect();

    // Labels are in resource ID order, so instance numbers are stable
    let mut groups: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, (_, label)) in labels.iter().enumerate() {
        groups.entry(label.as_str()).or_default().push(i);
    }

    let mut suffixes: HashMap<usize, usize> = HashMap::new();
    for indexes in groups.values().filter(|idx| idx.len() > 1) {
        for (n, i) in indexes.iter().enumerate() {
            suffixes.insert(*i, n + 1);
        }
    }

    labels
        .iter()
        .enumerate()
        .map(|(i, (id, label))| match suffixes.get(&i) {
            Some(n) => (id.clone(), format!("{}{}{}", label, DUPLICATE_INSTANCE_MARKER, n)),
            None => (id.clone(), label.clone()),
        })
        .collect()
}
