//! Attribute values
//!
//! Exported resource configuration is a tree of [`AttrValue`]s. Values decode
//! from plain JSON, and a resolved reference to another exported resource is
//! kept as its own variant until it is rendered as `${type.label.id}`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Number, Value};
use std::collections::BTreeMap;
use std::fmt;

/// A nested attribute map keyed by attribute name
pub type AttrMap = BTreeMap<String, AttrValue>;

/// A flattened attribute map keyed by dotted path (e.g. `phone_columns.0.type`)
pub type FlatAttrMap = BTreeMap<String, AttrValue>;

/// A symbolic reference to another exported resource's `id` attribute
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    pub resource_type: String,
    pub block_label: String,
}

impl Reference {
    pub fn new(resource_type: &str, block_label: &str) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            block_label: block_label.to_string(),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${{{}.{}.id}}", self.resource_type, self.block_label)
    }
}

/// A configuration value
#[derive(Debug, Clone, PartialEq, Default)]
pub enum AttrValue {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    List(Vec<AttrValue>),
    Map(AttrMap),
    Reference(Reference),
}

impl AttrValue {
    pub fn is_null(&self) -> bool {
        matches!(self, AttrValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&AttrMap> {
        match self {
            AttrValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Zero values are what the state layer stores for unset attributes.
    /// Booleans are never considered zero.
    pub fn is_zero(&self) -> bool {
        match self {
            AttrValue::Null | AttrValue::Bool(_) | AttrValue::Reference(_) => false,
            AttrValue::Number(n) => n.as_f64() == Some(0.0),
            AttrValue::String(s) => s.is_empty(),
            AttrValue::List(l) => l.is_empty(),
            AttrValue::Map(m) => m.is_empty(),
        }
    }

    /// Render as plain JSON. References become interpolation strings.
    pub fn to_json(&self) -> Value {
        match self {
            AttrValue::Null => Value::Null,
            AttrValue::Bool(b) => Value::Bool(*b),
            AttrValue::Number(n) => Value::Number(n.clone()),
            AttrValue::String(s) => Value::String(s.clone()),
            AttrValue::List(l) => Value::Array(l.iter().map(AttrValue::to_json).collect()),
            AttrValue::Map(m) => Value::Object(
                m.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            AttrValue::Reference(r) => Value::String(r.to_string()),
        }
    }
}

impl From<Value> for AttrValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => AttrValue::Null,
            Value::Bool(b) => AttrValue::Bool(b),
            Value::Number(n) => AttrValue::Number(n),
            Value::String(s) => AttrValue::String(s),
            Value::Array(arr) => AttrValue::List(arr.into_iter().map(AttrValue::from).collect()),
            Value::Object(obj) => {
                AttrValue::Map(obj.into_iter().map(|(k, v)| (k, AttrValue::from(v))).collect())
            }
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::String(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::String(s)
    }
}

impl From<Reference> for AttrValue {
    fn from(r: Reference) -> Self {
        AttrValue::Reference(r)
    }
}

impl Serialize for AttrValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            AttrValue::Null => serializer.serialize_none(),
            AttrValue::Bool(b) => serializer.serialize_bool(*b),
            AttrValue::Number(n) => n.serialize(serializer),
            AttrValue::String(s) => serializer.serialize_str(s),
            AttrValue::List(l) => l.serialize(serializer),
            AttrValue::Map(m) => m.serialize(serializer),
            AttrValue::Reference(r) => serializer.collect_str(r),
        }
    }
}

impl<'de> Deserialize<'de> for AttrValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(AttrValue::from)
    }
}

/// Join a parent attribute path and a key
pub fn join_path(prev: &str, key: &str) -> String {
    if prev.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prev, key)
    }
}

/// Flatten a nested map into dotted-path leaves. List elements use their index
/// as a path segment. Empty lists and maps are kept as leaves.
pub fn flatten(map: &AttrMap) -> FlatAttrMap {
    let mut flat = FlatAttrMap::new();
    for (key, value) in map {
        flatten_into(&mut flat, key, value);
    }
    flat
}

fn flatten_into(flat: &mut FlatAttrMap, path: &str, value: &AttrValue) {
    match value {
        AttrValue::Map(m) if !m.is_empty() => {
            for (k, v) in m {
                flatten_into(flat, &join_path(path, k), v);
            }
        }
        AttrValue::List(l) if !l.is_empty() => {
            for (i, v) in l.iter().enumerate() {
                flatten_into(flat, &join_path(path, &i.to_string()), v);
            }
        }
        other => {
            flat.insert(path.to_string(), other.clone());
        }
    }
}

enum Node {
    Leaf(AttrValue),
    Branch(BTreeMap<String, Node>),
}

/// Rebuild a nested map from dotted-path leaves. A node whose child segments
/// are all numeric becomes a list ordered by index.
pub fn unflatten(flat: &FlatAttrMap) -> AttrMap {
    let mut root: BTreeMap<String, Node> = BTreeMap::new();

    for (path, value) in flat {
        let segments: Vec<&str> = path.split('.').collect();
        let mut current = &mut root;
        for (i, segment) in segments.iter().enumerate() {
            if i == segments.len() - 1 {
                current.insert(segment.to_string(), Node::Leaf(value.clone()));
                break;
            }
            let entry = current
                .entry(segment.to_string())
                .or_insert_with(|| Node::Branch(BTreeMap::new()));
            if let Node::Leaf(_) = entry {
                *entry = Node::Branch(BTreeMap::new());
            }
            current = match entry {
                Node::Branch(children) => children,
                Node::Leaf(_) => unreachable!("leaf replaced by branch above"),
            };
        }
    }

    root.into_iter().map(|(k, node)| (k, build_node(node))).collect()
}

fn build_node(node: Node) -> AttrValue {
    match node {
        Node::Leaf(value) => value,
        Node::Branch(children) => {
            let all_indexed = !children.is_empty()
                && children.keys().all(|k| k.parse::<usize>().is_ok());
            if all_indexed {
                let mut items: Vec<(usize, Node)> = children
                    .into_iter()
                    .filter_map(|(k, v)| k.parse::<usize>().ok().map(|i| (i, v)))
                    .collect();
                items.sort_by_key(|(i, _)| *i);
                AttrValue::List(items.into_iter().map(|(_, v)| build_node(v)).collect())
            } else {
                AttrValue::Map(children.into_iter().map(|(k, v)| (k, build_node(v))).collect())
            }
        }
    }
}

/// Remove null entries from maps, recursively.
pub fn prune_nulls(map: &mut AttrMap) {
    map.retain(|_, v| !v.is_null());
    for value in map.values_mut() {
        prune_value(value);
    }
}

fn prune_value(value: &mut AttrValue) {
    match value {
        AttrValue::Map(m) => prune_nulls(m),
        AttrValue::List(l) => l.iter_mut().for_each(prune_value),
        _ => {}
    }
}
