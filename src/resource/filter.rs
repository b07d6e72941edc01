//! Resource filters
//!
//! Filter entries are either a resource type (`genesyscloud_routing_queue`)
//! or a resource type and a name, ID or pattern (`genesyscloud_routing_queue::Sales`).

use super::meta::{ResourceIdMetaMap, ResourceMeta};
use super::registry::{ExporterConfig, RegistrySnapshot};
use crate::error::ExportError;
use regex::Regex;

const SEPARATOR: &str = "::";

/// Strip the `::name` part of every filter entry
pub fn format_filter(filter: &[String]) -> Vec<String> {
    filter
        .iter()
        .map(|f| match f.split_once(SEPARATOR) {
            Some((resource_type, _)) => resource_type.to_string(),
            None => f.clone(),
        })
        .collect()
}

/// Keep only the exporters named by the filter. An empty filter keeps all.
pub fn include_types(exporters: &mut RegistrySnapshot, filter: &[String]) {
    if filter.is_empty() {
        return;
    }
    let types = format_filter(filter);
    exporters.retain(|resource_type, _| types.contains(resource_type));
}

/// Drop the exporters named by the filter
pub fn exclude_types(exporters: &mut RegistrySnapshot, filter: &[String]) {
    exporters.retain(|resource_type, _| !filter.contains(resource_type));
}

/// Values given for `resource_type` as `resource_type::value`
fn values_for<'f>(resource_type: &str, filter: &'f [String]) -> Vec<&'f str> {
    filter
        .iter()
        .filter_map(|f| {
            let (t, value) = f.split_once(SEPARATOR)?;
            (t == resource_type).then_some(value)
        })
        .collect()
}

/// Keep resources whose original name is listed for this type. Returns the
/// map unchanged when no name is listed.
pub fn filter_by_name(
    resources: ResourceIdMetaMap,
    resource_type: &str,
    filter: &[String],
) -> ResourceIdMetaMap {
    let names = values_for(resource_type, filter);
    if names.is_empty() {
        return resources;
    }
    resources
        .into_iter()
        .filter(|(_, meta)| names.contains(&meta.source_label()))
        .collect()
}

/// Keep resources whose ID is listed for this type
pub fn filter_by_id(
    resources: ResourceIdMetaMap,
    resource_type: &str,
    filter: &[String],
) -> ResourceIdMetaMap {
    let ids = values_for(resource_type, filter);
    if ids.is_empty() {
        return resources;
    }
    resources
        .into_iter()
        .filter(|(id, _)| ids.contains(&id.as_str()))
        .collect()
}

fn compile_patterns(resource_type: &str, filter: &[String]) -> Result<Vec<Regex>, ExportError> {
    values_for(resource_type, filter)
        .into_iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|e| ExportError::InvalidFilter {
                filter: format!("{}{}{}", resource_type, SEPARATOR, pattern),
                message: e.to_string(),
            })
        })
        .collect()
}

fn matches_any(patterns: &[Regex], meta: &ResourceMeta) -> bool {
    patterns
        .iter()
        .any(|re| re.is_match(&meta.original_label) || re.is_match(&meta.block_label))
}

/// Keep resources whose original or sanitized label matches a pattern
pub fn include_by_regex(
    resources: ResourceIdMetaMap,
    resource_type: &str,
    filter: &[String],
) -> Result<ResourceIdMetaMap, ExportError> {
    let patterns = compile_patterns(resource_type, filter)?;
    if patterns.is_empty() {
        return Ok(resources);
    }
    Ok(resources
        .into_iter()
        .filter(|(_, meta)| matches_any(&patterns, meta))
        .collect())
}

/// Drop resources whose original or sanitized label matches a pattern
pub fn exclude_by_regex(
    resources: ResourceIdMetaMap,
    resource_type: &str,
    filter: &[String],
) -> Result<ResourceIdMetaMap, ExportError> {
    let patterns = compile_patterns(resource_type, filter)?;
    Ok(resources
        .into_iter()
        .filter(|(_, meta)| !matches_any(&patterns, meta))
        .collect())
}

/// Apply `type.attribute` exclusions to the matching exporters
pub fn populate_excluded_attributes(
    exporters: &RegistrySnapshot,
    excluded: &[String],
) -> Result<(), ExportError> {
    for entry in excluded {
        let (type_pattern, attribute, targets) = excluded_targets(exporters, entry)?;
        for exporter in targets {
            exporter.add_excluded_attribute(attribute);
        }
        tracing::info!("Excluding attribute {} on {} resources", attribute, type_pattern);
    }
    Ok(())
}

/// Split an exclusion entry and find the exporters it names. Type patterns
/// may contain dots, so each dot is tried from the left: an exact type name
/// first, then a pattern matching whole type names, then the first dot with
/// the pattern matched anywhere in the type.
fn excluded_targets<'e, 's>(
    exporters: &'e RegistrySnapshot,
    entry: &'s str,
) -> Result<(&'s str, &'s str, Vec<&'e ExporterConfig>), ExportError> {
    let Some((first_type, first_attribute)) = entry.split_once('.') else {
        return Err(ExportError::InvalidFilter {
            filter: entry.to_string(),
            message: "expected <resource_type>.<attribute>".to_string(),
        });
    };
    if first_attribute.is_empty() {
        return Err(ExportError::InvalidFilter {
            filter: entry.to_string(),
            message: "does not contain an attribute".to_string(),
        });
    }

    let splits: Vec<(&str, &str)> = entry
        .match_indices('.')
        .map(|(i, _)| (&entry[..i], &entry[i + 1..]))
        .filter(|(_, attribute)| !attribute.is_empty())
        .collect();

    let exact = splits
        .iter()
        .copied()
        .find(|(type_name, _)| exporters.contains_key(*type_name));
    if let Some((type_name, attribute)) = exact {
        return Ok((type_name, attribute, vec![exporters[type_name].as_ref()]));
    }

    for &(type_pattern, attribute) in &splits {
        let Ok(re) = Regex::new(&format!("^(?:{})$", type_pattern)) else {
            continue;
        };
        let targets = matching(exporters, &re);
        if !targets.is_empty() {
            return Ok((type_pattern, attribute, targets));
        }
    }

    let re = Regex::new(first_type).map_err(|e| ExportError::InvalidFilter {
        filter: entry.to_string(),
        message: e.to_string(),
    })?;
    let targets = matching(exporters, &re);
    if targets.is_empty() {
        return Err(ExportError::InvalidFilter {
            filter: entry.to_string(),
            message: format!("resource {} is not being exported", first_type),
        });
    }
    Ok((first_type, first_attribute, targets))
}

fn matching<'e>(exporters: &'e RegistrySnapshot, re: &Regex) -> Vec<&'e ExporterConfig> {
    exporters
        .iter()
        .filter(|(resource_type, _)| re.is_match(resource_type))
        .map(|(_, exporter)| exporter.as_ref())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn snapshot(types: &[&str]) -> RegistrySnapshot {
        types
            .iter()
            .map(|t| (t.to_string(), Arc::new(ExporterConfig::default())))
            .collect()
    }

    fn queues() -> ResourceIdMetaMap {
        let mut map = ResourceIdMetaMap::new();
        map.insert("q1".to_string(), ResourceMeta::new("Sales"));
        map.insert("q2".to_string(), ResourceMeta::new("Support Tier 1"));
        map.insert("q3".to_string(), ResourceMeta::new("Billing"));
        map
    }

    #[test]
    fn test_format_filter() {
        let filter = strings(&["genesyscloud_routing_queue::Sales", "genesyscloud_user"]);
        assert_eq!(
            format_filter(&filter),
            strings(&["genesyscloud_routing_queue", "genesyscloud_user"])
        );
    }

    #[test]
    fn test_include_and_exclude_types() {
        let mut exporters = snapshot(&["a", "b", "c"]);
        include_types(&mut exporters, &strings(&["a::x", "b"]));
        let mut names: Vec<_> = exporters.keys().cloned().collect();
        names.sort();
        assert_eq!(names, strings(&["a", "b"]));

        exclude_types(&mut exporters, &strings(&["b"]));
        assert!(exporters.contains_key("a") && !exporters.contains_key("b"));

        let mut all = snapshot(&["a", "b"]);
        include_types(&mut all, &[]);
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_filter_by_name_and_id() {
        let t = "genesyscloud_routing_queue";
        let by_name = filter_by_name(queues(), t, &strings(&["genesyscloud_routing_queue::Sales"]));
        assert_eq!(by_name.keys().collect::<Vec<_>>(), vec!["q1"]);

        let untouched = filter_by_name(queues(), t, &strings(&["genesyscloud_user::Sales"]));
        assert_eq!(untouched.len(), 3);

        let by_id = filter_by_id(queues(), t, &strings(&["genesyscloud_routing_queue::q3"]));
        assert_eq!(by_id.keys().collect::<Vec<_>>(), vec!["q3"]);
    }

    #[test]
    fn test_regex_filters() {
        let t = "genesyscloud_routing_queue";
        let filter = strings(&["genesyscloud_routing_queue::^S"]);

        let included = include_by_regex(queues(), t, &filter).unwrap();
        assert_eq!(included.keys().collect::<Vec<_>>(), vec!["q1", "q2"]);

        let excluded = exclude_by_regex(queues(), t, &filter).unwrap();
        assert_eq!(excluded.keys().collect::<Vec<_>>(), vec!["q3"]);

        let mut sanitized = queues();
        sanitized.get_mut("q2").unwrap().block_label = "Support_Tier_1".to_string();
        let on_label = include_by_regex(sanitized, t, &strings(&["genesyscloud_routing_queue::_Tier_"])).unwrap();
        assert_eq!(on_label.keys().collect::<Vec<_>>(), vec!["q2"]);

        assert!(include_by_regex(queues(), t, &strings(&["genesyscloud_routing_queue::("])).is_err());
    }

    #[test]
    fn test_populate_excluded_attributes() {
        let exporters = snapshot(&[
            "genesyscloud_routing_queue",
            "genesyscloud_outbound_campaign",
            "genesyscloud_outbound_ruleset",
        ]);

        populate_excluded_attributes(
            &exporters,
            &strings(&[
                "genesyscloud_routing_queue.members",
                "genesyscloud_outbound_\\w+.division_id",
            ]),
        )
        .unwrap();

        assert!(exporters["genesyscloud_routing_queue"].is_excluded("members.user_id"));
        assert!(exporters["genesyscloud_outbound_campaign"].is_excluded("division_id"));
        assert!(exporters["genesyscloud_outbound_ruleset"].is_excluded("division_id"));
        assert!(!exporters["genesyscloud_routing_queue"].is_excluded("division_id"));
    }

    #[test]
    fn test_excluded_type_pattern_may_contain_dots() {
        let exporters = snapshot(&[
            "genesyscloud_routing_queue",
            "genesyscloud_routing_wrapupcode",
            "genesyscloud_outbound_campaign",
        ]);

        populate_excluded_attributes(
            &exporters,
            &strings(&[
                "genesyscloud_.*_queue.members.user_id",
                "genesyscloud_outbound_.+.division_id",
            ]),
        )
        .unwrap();

        assert!(exporters["genesyscloud_routing_queue"].is_excluded("members.user_id"));
        assert!(!exporters["genesyscloud_routing_queue"].is_excluded("division_id"));
        assert!(!exporters["genesyscloud_routing_wrapupcode"].is_excluded("members.user_id"));
        assert!(exporters["genesyscloud_outbound_campaign"].is_excluded("division_id"));
    }

    #[test]
    fn test_populate_excluded_attributes_errors() {
        let exporters = snapshot(&["genesyscloud_routing_queue"]);
        assert!(populate_excluded_attributes(&exporters, &strings(&["no_dot"])).is_err());
        assert!(populate_excluded_attributes(&exporters, &strings(&["genesyscloud_routing_queue."])).is_err());
        assert!(populate_excluded_attributes(&exporters, &strings(&["genesyscloud_user.name"])).is_err());
    }
}
