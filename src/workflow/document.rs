use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::error::{Error, Result};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DocumentShape {
    /// Editor export: top-level `nodes` array with `widgets_values`.
    Graph,
    /// API prompt: top-level map of `{ class_type, inputs }` nodes.
    Legacy,
}

/// One parameter of a node. Graph widgets are positional; legacy inputs keep
/// their key.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeParameter {
    pub key: Option<String>,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowNode {
    pub id: String,
    pub node_type: String,
    pub parameters: Vec<NodeParameter>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowDocument {
    pub shape: DocumentShape,
    pub nodes: Vec<WorkflowNode>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDocument {
    Graph { nodes: Vec<RawGraphNode> },
    Legacy(BTreeMap<String, RawLegacyNode>),
}

#[derive(Deserialize)]
struct RawGraphNode {
    #[serde(default)]
    id: Value,
    #[serde(rename = "type", default)]
    node_type: String,
    #[serde(default)]
    widgets_values: Value,
}

#[derive(Deserialize)]
struct RawLegacyNode {
    class_type: String,
    #[serde(default)]
    inputs: Map<String, Value>,
}

impl WorkflowDocument {
    /// Parses either document shape, deciding the shape once up front.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        if !value.is_object() {
            return Err(Error::MalformedDocument(
                "expected a JSON object at the top level".into(),
            ));
        }
        let raw: RawDocument = serde_json::from_value(value).map_err(|_| {
            Error::MalformedDocument(
                "neither a `nodes` graph nor a map of `class_type` nodes".into(),
            )
        })?;
        Ok(match raw {
            RawDocument::Graph { nodes } => Self {
                shape: DocumentShape::Graph,
                nodes: nodes.into_iter().map(graph_node).collect(),
            },
            RawDocument::Legacy(nodes) => Self {
                shape: DocumentShape::Legacy,
                nodes: nodes
                    .into_iter()
                    .map(|(id, node)| WorkflowNode {
                        id,
                        node_type: node.class_type,
                        parameters: node
                            .inputs
                            .into_iter()
                            .map(|(key, value)| NodeParameter {
                                key: Some(key),
                                value,
                            })
                            .collect(),
                    })
                    .collect(),
            },
        })
    }
}

fn graph_node(raw: RawGraphNode) -> WorkflowNode {
    let id = match raw.id {
        Value::String(id) => id,
        Value::Null => "unknown".into(),
        other => other.to_string(),
    };
    let parameters = match raw.widgets_values {
        Value::Array(values) => values
            .into_iter()
            .map(|value| NodeParameter { key: None, value })
            .collect(),
        // Some custom nodes store their widgets as an object.
        Value::Object(map) => map
            .into_iter()
            .map(|(key, value)| NodeParameter {
                key: Some(key),
                value,
            })
            .collect(),
        Value::Null => Vec::new(),
        other => vec![NodeParameter {
            key: None,
            value: other,
        }],
    };
    WorkflowNode {
        id,
        node_type: raw.node_type,
        parameters,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_nodes_keep_positional_widgets() {
        let document = WorkflowDocument::parse(
            r#"{"nodes":[{"id":4,"type":"CheckpointLoaderSimple","widgets_values":["a.safetensors"]}]}"#,
        )
        .unwrap();
        assert_eq!(document.shape, DocumentShape::Graph);
        assert_eq!(document.nodes[0].id, "4");
        assert_eq!(document.nodes[0].parameters[0].key, None);
        assert_eq!(document.nodes[0].parameters[0].value, "a.safetensors");
    }

    #[test]
    fn legacy_prompt_keeps_input_keys() {
        let document = WorkflowDocument::parse(
            r#"{"3":{"class_type":"VAELoader","inputs":{"vae_name":"c.safetensors"}}}"#,
        )
        .unwrap();
        assert_eq!(document.shape, DocumentShape::Legacy);
        assert_eq!(document.nodes[0].node_type, "VAELoader");
        assert_eq!(
            document.nodes[0].parameters[0].key.as_deref(),
            Some("vae_name")
        );
    }

    #[test]
    fn rejects_unstructured_input() {
        assert!(matches!(
            WorkflowDocument::parse("not json"),
            Err(Error::MalformedDocument(_))
        ));
        assert!(matches!(
            WorkflowDocument::parse("[1, 2]"),
            Err(Error::MalformedDocument(_))
        ));
        assert!(matches!(
            WorkflowDocument::parse(r#"{"nodes": 5}"#),
            Err(Error::MalformedDocument(_))
        ));
    }

    #[test]
    fn empty_object_is_an_empty_document() {
        let document = WorkflowDocument::parse("{}").unwrap();
        assert!(document.nodes.is_empty());
    }
}
