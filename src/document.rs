//! JSON persistence for texture graphs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::backend::GpuBackend;
use crate::config::TextureGraphConfig;
use crate::graph::{Connection, NodeGraph};
use crate::node::NodeId;
use crate::texture::{TextureGraph, TextureNode};
use crate::types::{RawValue, ValueKind};

pub const DOCUMENT_VERSION: u32 = 1;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub kind: TextureNode,
    #[serde(default)]
    pub position: [f32; 2],
    #[serde(default)]
    pub params: BTreeMap<String, RawValue>,
    /// Image param name -> file it was loaded from.
    #[serde(default)]
    pub images: BTreeMap<String, PathBuf>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphDocument {
    pub version: u32,
    pub nodes: Vec<NodeRecord>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

impl GraphDocument {
    pub fn from_graph(graph: &NodeGraph<TextureNode>) -> Self {
        let nodes = graph
            .nodes()
            .iter()
            .map(|node| {
                let mut params = BTreeMap::new();
                let mut images = BTreeMap::new();
                for param in node.params() {
                    if param.kind == ValueKind::Image {
                        if let Some(path) = &param.image_path {
                            images.insert(param.name.clone(), path.clone());
                        }
                    } else {
                        params.insert(param.name.clone(), param.value);
                    }
                }
                NodeRecord {
                    id: node.id(),
                    kind: node.behavior,
                    position: node.position,
                    params,
                    images,
                }
            })
            .collect();
        Self {
            version: DOCUMENT_VERSION,
            nodes,
            connections: graph.connections().to_vec(),
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let doc: Self = serde_json::from_str(text).context("invalid graph document")?;
        if doc.version != DOCUMENT_VERSION {
            bail!(
                "unsupported graph document version {} (expected {DOCUMENT_VERSION})",
                doc.version
            );
        }
        Ok(doc)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize graph document")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read graph document {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("while loading {}", path.display()))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_json()?)
            .with_context(|| format!("failed to write graph document {}", path.display()))
    }

    /// Recreate nodes in recorded order, then replay connections through the
    /// id map. Image files are recorded on their params but not decoded.
    pub fn build_graph(&self) -> Result<(NodeGraph<TextureNode>, BTreeMap<NodeId, NodeId>)> {
        let mut graph = NodeGraph::new();
        let mut ids = BTreeMap::new();

        for record in &self.nodes {
            let id = graph.create(record.kind);
            if ids.insert(record.id, id).is_some() {
                bail!("node id {} appears twice in the document", record.id);
            }
            let node = graph
                .node_mut(id)
                .context("created node is missing from the graph")?;
            node.position = record.position;
            for (name, value) in &record.params {
                node.set_param(name, *value)?;
            }
            for (name, path) in &record.images {
                node.set_image(name, None, Some(path.clone()))?;
            }
        }

        for c in &self.connections {
            let (Some(&source), Some(&destination)) = (ids.get(&c.source), ids.get(&c.destination))
            else {
                bail!(
                    "connection {}:{} -> {}:{} references an unknown node",
                    c.source,
                    c.source_output,
                    c.destination,
                    c.destination_input
                );
            };
            graph.connect(source, c.source_output, destination, c.destination_input)?;
        }

        graph.clear_changes();
        Ok((graph, ids))
    }

    /// Build a [`TextureGraph`] and decode recorded images, resolving relative
    /// paths against `base_dir`.
    pub fn instantiate<B: GpuBackend>(
        &self,
        backend: B,
        config: TextureGraphConfig,
        base_dir: &Path,
    ) -> Result<TextureGraph<B>> {
        let (graph, ids) = self.build_graph()?;
        let mut texture_graph = TextureGraph::with_graph(graph, backend, config);
        for record in &self.nodes {
            let Some(&id) = ids.get(&record.id) else {
                continue;
            };
            for (name, path) in &record.images {
                texture_graph.load_image(id, name, base_dir.join(path))?;
            }
        }
        texture_graph.clear_changes();
        Ok(texture_graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GraphError;

    #[test]
    fn records_params_and_connections() {
        let mut g = NodeGraph::new();
        let color = g.create(TextureNode::Color);
        let out = g.create(TextureNode::Output);
        g.connect(color, 0, out, 0).unwrap();
        g.set_param(color, "Color", [0.5, 0.25, 0.0, 1.0]).unwrap();
        g.node_mut(out).unwrap().position = [120.0, 40.0];

        let doc = GraphDocument::from_graph(&g);
        assert_eq!(doc.version, DOCUMENT_VERSION);
        assert_eq!(doc.nodes[0].params["Color"], [0.5, 0.25, 0.0, 1.0]);
        assert_eq!(doc.nodes[1].position, [120.0, 40.0]);

        let json = doc.to_json().unwrap();
        assert!(json.contains("\"type\": \"color\""));
        let back = GraphDocument::from_json_str(&json).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn build_replays_connections_through_id_map() {
        let json = r#"{
            "version": 1,
            "nodes": [
                {"id": 7, "type": "output"},
                {"id": 3, "type": "linear_gradient", "params": {"Angle": [90.0, 0.0, 0.0, 0.0]}}
            ],
            "connections": [
                {"source": 3, "source_output": 0, "destination": 7, "destination_input": 0}
            ]
        }"#;
        let doc = GraphDocument::from_json_str(json).unwrap();
        let (graph, ids) = doc.build_graph().unwrap();
        let (out, grad) = (ids[&NodeId(7)], ids[&NodeId(3)]);
        assert_eq!(graph.connections(), &[Connection::new(grad, 0, out, 0)]);
        assert_eq!(graph.node(grad).unwrap().param("Angle").unwrap().value[0], 90.0);
        assert!(!graph.has_changes());
    }

    #[test]
    fn rejects_dangling_connections_and_bad_versions() {
        let dangling = r#"{"version":1,"nodes":[{"id":0,"type":"color"}],
            "connections":[{"source":0,"source_output":0,"destination":9,"destination_input":0}]}"#;
        assert!(GraphDocument::from_json_str(dangling).unwrap().build_graph().is_err());
        assert!(GraphDocument::from_json_str(r#"{"version":2,"nodes":[]}"#).is_err());
    }

    #[test]
    fn unknown_param_names_fail_loading() {
        let json = r#"{"version":1,"nodes":[{"id":0,"type":"color","params":{"Nope":[0,0,0,0]}}]}"#;
        let err = GraphDocument::from_json_str(json).unwrap().build_graph().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GraphError>(),
            Some(GraphError::UnknownParam { .. })
        ));
    }
}
