//! Custom attribute resolvers
//!
//! Some reference attributes cannot be resolved from the exporter definition
//! alone. A custom resolver is registered per attribute path and is called
//! with the map that holds the attribute, so it can read sibling values.

use super::registry::RegistrySnapshot;
use super::value::{AttrMap, AttrValue, Reference};
use crate::error::ExportError;

/// Resolver signature: (map holding the attribute, registry snapshot, own resource type)
pub type CustomResolverFn = fn(&mut AttrMap, &RegistrySnapshot, &str) -> Result<(), ExportError>;

pub const SKILL_TYPE: &str = "genesyscloud_routing_skill";
pub const SKILL_GROUP_TYPE: &str = "genesyscloud_routing_skill_group";
pub const GROUP_TYPE: &str = "genesyscloud_group";

/// Look up a built-in resolver by the name used in exporter definitions
pub fn builtin(name: &str) -> Option<CustomResolverFn> {
    match name {
        "member_groups" => Some(member_groups as CustomResolverFn),
        "ruleset_skills" => Some(ruleset_skills as CustomResolverFn),
        "ruleset_properties" => Some(ruleset_properties as CustomResolverFn),
        _ => None,
    }
}

/// Resolve `member_group_id` using the sibling `member_group_type`
/// discriminator. Only skill groups and groups are supported.
pub fn member_groups(
    config: &mut AttrMap,
    exporters: &RegistrySnapshot,
    _resource_type: &str,
) -> Result<(), ExportError> {
    let id = match config.get("member_group_id") {
        Some(AttrValue::String(id)) if !id.is_empty() => id.clone(),
        _ => return Ok(()),
    };

    let ref_type = match config.get("member_group_type") {
        Some(AttrValue::String(kind)) => match kind.as_str() {
            "SKILLGROUP" => SKILL_GROUP_TYPE,
            "GROUP" => GROUP_TYPE,
            other => {
                return Err(ExportError::UnresolvedDiscriminator {
                    attribute: "member_group_id".to_string(),
                    discriminator: "member_group_type".to_string(),
                    value: Some(other.to_string()),
                })
            }
        },
        _ => {
            return Err(ExportError::UnresolvedDiscriminator {
                attribute: "member_group_id".to_string(),
                discriminator: "member_group_type".to_string(),
                value: None,
            })
        }
    };

    let exporter = exporters
        .get(ref_type)
        .ok_or_else(|| ExportError::RegistryLookupFailure {
            attribute: "member_group_id".to_string(),
            resource_type: ref_type.to_string(),
        })?;

    match exporter.lookup(&id) {
        Some(meta) if !meta.block_label.is_empty() => {
            config.insert(
                "member_group_id".to_string(),
                Reference::new(ref_type, &meta.block_label).into(),
            );
            Ok(())
        }
        _ => Err(ExportError::UnresolvedReference {
            attribute: "member_group_id".to_string(),
            ref_type: ref_type.to_string(),
            id,
        }),
    }
}

/// Resolve the skill IDs held in the JSON array string `skills`
pub fn ruleset_skills(
    config: &mut AttrMap,
    exporters: &RegistrySnapshot,
    _resource_type: &str,
) -> Result<(), ExportError> {
    let raw = match config.get("skills") {
        Some(AttrValue::String(s)) if !s.is_empty() => s.clone(),
        _ => return Ok(()),
    };

    let ids: Vec<String> =
        serde_json::from_str(&raw).map_err(|e| ExportError::MalformedEmbeddedReference {
            attribute: "skills".to_string(),
            message: e.to_string(),
        })?;

    let exporter = exporters
        .get(SKILL_TYPE)
        .ok_or_else(|| ExportError::RegistryLookupFailure {
            attribute: "skills".to_string(),
            resource_type: SKILL_TYPE.to_string(),
        })?;

    let mut missing = Vec::new();
    let resolved: Vec<String> = ids
        .into_iter()
        .map(|id| match exporter.lookup(&id) {
            Some(meta) if !meta.block_label.is_empty() => {
                Reference::new(SKILL_TYPE, &meta.block_label).to_string()
            }
            _ => {
                missing.push(id.clone());
                id
            }
        })
        .collect();

    let encoded =
        serde_json::to_string(&resolved).map_err(|e| ExportError::MalformedEmbeddedReference {
            attribute: "skills".to_string(),
            message: e.to_string(),
        })?;
    config.insert("skills".to_string(), AttrValue::String(encoded));

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ExportError::UnresolvedReference {
            attribute: "skills".to_string(),
            ref_type: SKILL_TYPE.to_string(),
            id: missing.join(","),
        })
    }
}

/// Replace null values in the `properties` map with empty strings
pub fn ruleset_properties(
    config: &mut AttrMap,
    _exporters: &RegistrySnapshot,
    _resource_type: &str,
) -> Result<(), ExportError> {
    if let Some(AttrValue::Map(properties)) = config.get_mut("properties") {
        for value in properties.values_mut().filter(|v| v.is_null()) {
            *value = AttrValue::String(String::new());
        }
    }
    Ok(())
}
