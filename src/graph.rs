use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use crate::error::DatabusError;

#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    id: String,
    properties: BTreeMap<String, Vec<Value>>,
}

impl GraphNode {
    pub fn id(&self) -> &str {
        &self.id
    }

    // `file`, `databus:file` and `https://dataid.dbpedia.org/databus#file` match alike.
    pub fn values<'a, 'n>(
        &'a self,
        local_name: &'n str,
    ) -> impl Iterator<Item = &'a Value> + use<'a, 'n> {
        self.properties
            .iter()
            .filter(move |(key, _)| local_name_of(key) == local_name)
            .flat_map(|(_, values)| values.iter())
    }

    pub fn types(&self) -> Vec<&str> {
        self.properties
            .get("@type")
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .collect()
    }

    pub fn has_type(&self, local_name: &str) -> bool {
        self.types()
            .into_iter()
            .any(|value| local_name_of(value) == local_name)
    }

    pub fn reference<'a>(&'a self, local_name: &str) -> Option<&'a str> {
        self.values(local_name).find_map(scalar_str)
    }

    pub fn byte_size(&self) -> Option<u64> {
        self.values("byteSize").find_map(|value| match value {
            Value::Number(number) => number.as_u64(),
            Value::String(text) => text.trim().parse().ok(),
            Value::Object(map) => map.get("@value").and_then(|inner| match inner {
                Value::Number(number) => number.as_u64(),
                Value::String(text) => text.trim().parse().ok(),
                _ => None,
            }),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetadataGraph {
    nodes: Vec<GraphNode>,
    index: HashMap<String, usize>,
}

impl MetadataGraph {
    pub fn parse(url: &str, body: &str) -> Result<Self, DatabusError> {
        let document: Value = serde_json::from_str(body)
            .map_err(|err| DatabusError::metadata(url, format!("invalid JSON-LD: {err}")))?;
        Self::from_document(url, &document)
    }

    pub fn from_document(url: &str, document: &Value) -> Result<Self, DatabusError> {
        if !matches!(document, Value::Object(_) | Value::Array(_)) {
            return Err(DatabusError::metadata(
                url,
                "JSON-LD document must be an object or an array",
            ));
        }
        let mut graph = Self::default();
        graph.collect(document);
        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.iter()
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.index
            .get(normalize_id(id))
            .map(|position| &self.nodes[*position])
    }

    pub fn children_of(&self, parent: &str) -> Vec<&GraphNode> {
        let parent = normalize_id(parent);
        self.nodes
            .iter()
            .filter(|node| is_direct_child(parent, &node.id))
            .collect()
    }

    // `parent#x` or `parent/x`
    pub fn typed_under(&self, parent: &str, type_name: &str) -> Vec<&GraphNode> {
        let parent = normalize_id(parent);
        self.nodes
            .iter()
            .filter(|node| node.has_type(type_name))
            .filter(|node| {
                node.id
                    .strip_prefix(parent)
                    .and_then(|rest| rest.chars().next())
                    .is_some_and(|next| next == '#' || next == '/')
            })
            .collect()
    }

    fn collect(&mut self, value: &Value) {
        match value {
            Value::Array(items) => {
                for item in items {
                    self.collect(item);
                }
            }
            Value::Object(map) => {
                if let Some(graph) = map.get("@graph") {
                    self.collect(graph);
                }
                match map.get("@id").and_then(Value::as_str) {
                    Some(id) => self.insert(id, map),
                    None => {
                        for (key, nested) in map {
                            if key != "@graph" && key != "@context" {
                                self.collect(nested);
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }

    fn insert(&mut self, id: &str, map: &serde_json::Map<String, Value>) {
        let id = normalize_id(id).to_string();
        let position = match self.index.get(&id) {
            Some(position) => *position,
            None => {
                self.nodes.push(GraphNode {
                    id: id.clone(),
                    properties: BTreeMap::new(),
                });
                self.index.insert(id, self.nodes.len() - 1);
                self.nodes.len() - 1
            }
        };

        for (key, value) in map {
            if matches!(key.as_str(), "@id" | "@context" | "@graph") {
                continue;
            }
            let values = match value {
                Value::Array(items) => items.clone(),
                other => vec![other.clone()],
            };
            for item in &values {
                self.collect(item);
            }
            self.nodes[position]
                .properties
                .entry(key.clone())
                .or_default()
                .extend(values);
        }
    }
}

fn normalize_id(id: &str) -> &str {
    let trimmed = id.trim_end_matches('/');
    if trimmed.is_empty() { id } else { trimmed }
}

fn is_direct_child(parent: &str, candidate: &str) -> bool {
    candidate
        .strip_prefix(parent)
        .and_then(|rest| rest.strip_prefix('/'))
        .is_some_and(|segment| !segment.is_empty() && !segment.contains(['/', '#']))
}

fn local_name_of(key: &str) -> &str {
    key.rsplit(['#', ':', '/']).next().unwrap_or(key)
}

fn scalar_str(value: &Value) -> Option<&str> {
    match value {
        Value::String(text) => Some(text.as_str()),
        Value::Object(map) => map
            .get("@id")
            .or_else(|| map.get("@value"))
            .and_then(Value::as_str),
        _ => None,
    }
}
