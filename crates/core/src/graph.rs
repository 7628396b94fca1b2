use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use petgraph::algo::toposort;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use petgraph::Direction;
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, info};

use crate::node::Clip;
use crate::registry::FilterRegistry;
use crate::types::{PortData, PortType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterInstance {
    pub id: String,
    pub node_type: String,
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,
}

/// Edge weight: which clip argument of the target the source feeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipConnection {
    pub target_port: String,
}

#[derive(Debug, Clone)]
pub struct PipelineGraph {
    graph: StableDiGraph<FilterInstance, ClipConnection>,
    node_ids: HashMap<String, NodeIndex>,
    output: Option<String>,
}

impl PipelineGraph {
    pub fn new() -> Self {
        Self {
            graph: StableDiGraph::new(),
            node_ids: HashMap::new(),
            output: None,
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("invalid workflow JSON")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read workflow {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("failed to load workflow {}", path.display()))
    }

    pub fn add_node(&mut self, instance: FilterInstance) -> Result<NodeIndex> {
        if self.node_ids.contains_key(&instance.id) {
            bail!("duplicate node id: {}", instance.id);
        }

        let node_id = instance.id.clone();
        let index = self.graph.add_node(instance);
        self.node_ids.insert(node_id, index);
        Ok(index)
    }

    pub fn add_connection(&mut self, from_id: &str, to_id: &str, to_port: &str) -> Result<()> {
        let from_idx = self.index_of(from_id, "source")?;
        let to_idx = self.index_of(to_id, "target")?;

        self.graph.add_edge(
            from_idx,
            to_idx,
            ClipConnection {
                target_port: to_port.to_string(),
            },
        );
        Ok(())
    }

    pub fn set_output(&mut self, node_id: &str) -> Result<()> {
        self.index_of(node_id, "output")?;
        self.output = Some(node_id.to_string());
        Ok(())
    }

    /// The declared output, or the single node nothing consumes.
    pub fn output_node(&self) -> Result<NodeIndex> {
        if let Some(id) = &self.output {
            return self.index_of(id, "output");
        }

        let sinks: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .edges_directed(idx, Direction::Outgoing)
                    .next()
                    .is_none()
            })
            .collect();
        match sinks.as_slice() {
            [only] => Ok(*only),
            [] => bail!("pipeline graph is empty"),
            _ => bail!("pipeline graph has several unconsumed nodes; set \"output\""),
        }
    }

    pub fn execution_order(&self) -> Result<Vec<NodeIndex>> {
        toposort(&self.graph, None).map_err(|_| anyhow!("cycle detected in pipeline graph"))
    }

    pub fn node(&self, idx: NodeIndex) -> Option<&FilterInstance> {
        self.graph.node_weight(idx)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn connections_to(&self, idx: NodeIndex) -> Vec<(NodeIndex, &ClipConnection)> {
        self.graph
            .edges_directed(idx, Direction::Incoming)
            .map(|edge| (edge.source(), edge.weight()))
            .collect()
    }

    /// Every file a filter of this graph reads, taken from its path-typed
    /// parameters.
    pub fn input_paths(&self, registry: &FilterRegistry) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        for idx in self.graph.node_indices() {
            let instance = &self.graph[idx];
            let Some(ports) = registry.ports(&instance.node_type) else {
                continue;
            };
            for port in ports.iter().filter(|port| port.port_type == PortType::Path) {
                if let Some(path) = instance.params.get(&port.name).and_then(|v| v.as_str()) {
                    paths.push(PathBuf::from(path));
                }
            }
        }
        paths
    }

    /// Instantiate every filter in topological order and return the output
    /// clip. Argument and configuration errors surface here, before any
    /// frame is requested.
    pub fn build(&self, registry: &FilterRegistry) -> Result<Clip> {
        let order = self.execution_order()?;
        let output = self.output_node()?;
        let mut built: HashMap<NodeIndex, Clip> = HashMap::with_capacity(order.len());

        for idx in order {
            let instance = self
                .node(idx)
                .ok_or_else(|| anyhow!("node index {} vanished from graph", idx.index()))?;
            let args = self.collect_args(idx, instance, registry, &built)?;

            let clip = registry.create(&instance.node_type, args).with_context(|| {
                format!(
                    "failed to build node '{}' of type '{}'",
                    instance.id, instance.node_type
                )
            })?;
            debug!(
                node = %instance.id,
                filter = %instance.node_type,
                info = %clip.video_info().describe(),
                frames = clip.video_info().num_frames,
                "Built pipeline node"
            );
            built.insert(idx, clip);
        }

        let clip = built
            .remove(&output)
            .ok_or_else(|| anyhow!("output node was not built"))?;
        info!(
            nodes = self.node_count(),
            output = %clip.video_info().describe(),
            frames = clip.video_info().num_frames,
            "Pipeline built"
        );
        Ok(clip)
    }

    fn collect_args(
        &self,
        idx: NodeIndex,
        instance: &FilterInstance,
        registry: &FilterRegistry,
        built: &HashMap<NodeIndex, Clip>,
    ) -> Result<HashMap<String, PortData>> {
        let ports = registry.ports(&instance.node_type).ok_or_else(|| {
            anyhow!(
                "node '{}' has unknown filter type '{}'",
                instance.id,
                instance.node_type
            )
        })?;
        let mut args = HashMap::new();

        for (source_idx, connection) in self.connections_to(idx) {
            let port_name = &connection.target_port;
            match ports.iter().find(|port| &port.name == port_name) {
                Some(port) if port.port_type == PortType::Clip => {}
                Some(_) => bail!(
                    "node '{}': argument '{port_name}' is not a clip and cannot be connected",
                    instance.id
                ),
                None => bail!("node '{}' has no clip argument '{port_name}'", instance.id),
            }
            let clip = built
                .get(&source_idx)
                .cloned()
                .ok_or_else(|| anyhow!("node '{}': upstream clip was not built", instance.id))?;
            if args.insert(port_name.clone(), PortData::Clip(clip)).is_some() {
                bail!(
                    "node '{}': argument '{port_name}' is connected more than once",
                    instance.id
                );
            }
        }

        for (name, value) in &instance.params {
            let port = ports
                .iter()
                .find(|port| &port.name == name)
                .ok_or_else(|| anyhow!("node '{}' has no parameter '{name}'", instance.id))?;
            if port.port_type == PortType::Clip {
                bail!(
                    "node '{}': clip argument '{name}' must be connected, not given as a parameter",
                    instance.id
                );
            }
            if args.contains_key(name) {
                bail!("node '{}': argument '{name}' is both connected and set", instance.id);
            }
            let data = PortData::from_json(&port.port_type, value)
                .with_context(|| format!("node '{}': invalid parameter '{name}'", instance.id))?;
            args.insert(name.clone(), data);
        }

        Ok(args)
    }

    fn index_of(&self, node_id: &str, role: &str) -> Result<NodeIndex> {
        self.node_ids
            .get(node_id)
            .copied()
            .ok_or_else(|| anyhow!("unknown {role} node id: {node_id}"))
    }
}

impl Default for PipelineGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PipelineGraphSerde {
    nodes: Vec<FilterInstance>,
    #[serde(default)]
    connections: Vec<PipelineConnectionSerde>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    output: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PipelineConnectionSerde {
    from_node: String,
    to_node: String,
    to_port: String,
}

impl Serialize for PipelineGraph {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut nodes: Vec<FilterInstance> = self.graph.node_weights().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));

        let mut connections: Vec<PipelineConnectionSerde> = self
            .graph
            .edge_references()
            .filter_map(|edge| {
                let from_node = self.node(edge.source())?.id.clone();
                let to_node = self.node(edge.target())?.id.clone();
                Some(PipelineConnectionSerde {
                    from_node,
                    to_node,
                    to_port: edge.weight().target_port.clone(),
                })
            })
            .collect();

        connections.sort_by(|a, b| {
            a.from_node
                .cmp(&b.from_node)
                .then_with(|| a.to_node.cmp(&b.to_node))
                .then_with(|| a.to_port.cmp(&b.to_port))
        });

        PipelineGraphSerde {
            nodes,
            connections,
            output: self.output.clone(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PipelineGraph {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let serialized = PipelineGraphSerde::deserialize(deserializer)?;
        let mut graph = PipelineGraph::new();

        for node in serialized.nodes {
            graph.add_node(node).map_err(D::Error::custom)?;
        }

        for connection in serialized.connections {
            graph
                .add_connection(&connection.from_node, &connection.to_node, &connection.to_port)
                .map_err(D::Error::custom)?;
        }

        if let Some(output) = serialized.output {
            graph.set_output(&output).map_err(D::Error::custom)?;
        }

        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use crate::registry::build_default_registry;

    const EXTRACT_WORKFLOW: &str = r#"{
        "nodes": [
            {"id": "src", "node_type": "BlankClip",
             "params": {"width": 8, "height": 8, "format": "gray8", "value": 100, "length": 3}},
            {"id": "detail", "node_type": "ExtractFrequency", "params": {"radius": 2}}
        ],
        "connections": [
            {"from_node": "src", "to_node": "detail", "to_port": "clip"}
        ],
        "output": "detail"
    }"#;

    fn instance(id: &str, node_type: &str) -> FilterInstance {
        FilterInstance {
            id: id.to_string(),
            node_type: node_type.to_string(),
            params: HashMap::new(),
        }
    }

    #[test]
    fn test_duplicate_node_id_rejected() {
        let mut graph = PipelineGraph::new();
        graph
            .add_node(instance("node", "BlankClip"))
            .expect("first node should be added");

        let err = graph
            .add_node(instance("node", "ExtractFrequency"))
            .expect_err("duplicate node id should error");

        assert!(err.to_string().contains("duplicate node id"));
    }

    #[test]
    fn test_unknown_connection_endpoint_rejected() {
        let mut graph = PipelineGraph::new();
        graph.add_node(instance("a", "BlankClip")).unwrap();
        let err = graph.add_connection("a", "b", "clip").unwrap_err();
        assert_eq!(err.to_string(), "unknown target node id: b");
    }

    #[test]
    fn test_cycle_rejection() {
        let mut graph = PipelineGraph::new();
        for node_id in ["a", "b"] {
            graph.add_node(instance(node_id, "ExtractFrequency")).unwrap();
        }
        graph.add_connection("a", "b", "clip").unwrap();
        graph.add_connection("b", "a", "clip").unwrap();
        graph.set_output("b").unwrap();

        let err = match graph.build(&build_default_registry()) {
            Ok(_) => panic!("cycle should be rejected"),
            Err(err) => err,
        };
        assert_eq!(err.to_string(), "cycle detected in pipeline graph");
    }

    #[test]
    fn test_build_extract_workflow() {
        let graph = PipelineGraph::from_json(EXTRACT_WORKFLOW).expect("workflow should parse");
        let clip = graph
            .build(&build_default_registry())
            .expect("workflow should build");
        assert_eq!(clip.filter_name(), "ExtractFrequency");
        assert_eq!(clip.video_info().num_frames, 3);
    }

    #[test]
    fn test_output_defaults_to_single_sink() {
        let mut graph = PipelineGraph::from_json(EXTRACT_WORKFLOW).unwrap();
        graph.output = None;
        let sink = graph.output_node().unwrap();
        assert_eq!(graph.node(sink).map(|n| n.id.as_str()), Some("detail"));

        graph.add_node(instance("loose", "BlankClip")).unwrap();
        assert!(graph.output_node().is_err());
    }

    #[test]
    fn test_config_error_surfaces_at_build_time() {
        let json = EXTRACT_WORKFLOW.replace(r#""radius": 2"#, r#""radius": 0"#);
        let graph = PipelineGraph::from_json(&json).unwrap();
        let err = match graph.build(&build_default_registry()) {
            Ok(_) => panic!("radius 0 should fail"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("failed to build node 'detail'"));
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::InvalidRadius { .. })
        ));
    }

    #[test]
    fn test_clip_arguments_must_be_connected() {
        let json = r#"{
            "nodes": [{"id": "x", "node_type": "ExtractFrequency", "params": {"clip": "src"}}]
        }"#;
        let graph = PipelineGraph::from_json(json).unwrap();
        let err = match graph.build(&build_default_registry()) {
            Ok(_) => panic!("clip parameter should fail"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("must be connected"), "{err}");
    }

    #[test]
    fn test_connecting_a_non_clip_port_fails() {
        let mut graph = PipelineGraph::from_json(EXTRACT_WORKFLOW).unwrap();
        graph
            .add_node(FilterInstance {
                id: "src2".to_string(),
                node_type: "BlankClip".to_string(),
                params: HashMap::from([
                    ("width".to_string(), serde_json::json!(8)),
                    ("height".to_string(), serde_json::json!(8)),
                ]),
            })
            .unwrap();
        graph.add_connection("src2", "detail", "radius").unwrap();
        let err = match graph.build(&build_default_registry()) {
            Ok(_) => panic!("radius cannot take a clip"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("is not a clip"), "{err}");
    }

    #[test]
    fn test_input_paths_lists_source_files() {
        let mut graph = PipelineGraph::from_json(EXTRACT_WORKFLOW).unwrap();
        assert!(graph.input_paths(&build_default_registry()).is_empty());

        graph
            .add_node(FilterInstance {
                id: "file".to_string(),
                node_type: "Y4mSource".to_string(),
                params: HashMap::from([("path".to_string(), serde_json::json!("clips/in.y4m"))]),
            })
            .unwrap();
        graph.add_node(instance("mystery", "NoSuchFilter")).unwrap();
        assert_eq!(
            graph.input_paths(&build_default_registry()),
            vec![PathBuf::from("clips/in.y4m")]
        );
    }

    #[test]
    fn test_serialization_round_trip_is_sorted() {
        let graph = PipelineGraph::from_json(EXTRACT_WORKFLOW).unwrap();
        let value = serde_json::to_value(&graph).unwrap();
        assert_eq!(value["nodes"][0]["id"], "detail");
        assert_eq!(value["connections"][0]["to_port"], "clip");
        assert_eq!(value["output"], "detail");

        let reparsed: PipelineGraph = serde_json::from_value(value).unwrap();
        assert_eq!(reparsed.node_count(), 2);
    }
}
