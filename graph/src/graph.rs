use anyhow::{anyhow, bail};
use common::id_type;
use hashbrown::HashSet;
use raster::{CloudMask, Comparison, ReduceParams, SpectralIndex};
use serde::{Deserialize, Serialize};

use crate::catalog::CatalogQuery;

id_type!(NodeId);

/// Which regions a series node aggregates over.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum RegionSelector {
    Names { names: Vec<String> },
    Attribute { attribute: String, value: String },
    All,
}

/// Operation of a node; the `NodeId`s are its upstream inputs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum NodeKind {
    Scenes {
        query: CatalogQuery,
    },
    CloudMask {
        input: NodeId,
        mask: CloudMask,
    },
    AddIndex {
        input: NodeId,
        indices: Vec<SpectralIndex>,
    },
    Composite {
        input: NodeId,
    },
    Threshold {
        input: NodeId,
        band: String,
        cmp: Comparison,
        value: f64,
    },
    And {
        a: NodeId,
        b: NodeId,
    },
    Or {
        a: NodeId,
        b: NodeId,
    },
    Not {
        input: NodeId,
    },
    Clip {
        input: NodeId,
        region: String,
    },
    Area {
        input: NodeId,
        region: String,
        #[serde(default)]
        params: ReduceParams,
    },
    /// Area of `region` on the grid of the first input holding data.
    TotalArea {
        inputs: Vec<NodeId>,
        region: String,
        #[serde(default)]
        params: ReduceParams,
    },
    Mean {
        input: NodeId,
        band: String,
        region: String,
        #[serde(default)]
        params: ReduceParams,
    },
    RegionSeries {
        input: NodeId,
        indices: Vec<SpectralIndex>,
        regions: RegionSelector,
        #[serde(default)]
        params: ReduceParams,
    },
    Export {
        input: NodeId,
        region: String,
        name: String,
        #[serde(default)]
        params: ReduceParams,
    },
}

impl NodeKind {
    pub fn inputs(&self) -> Vec<NodeId> {
        match self {
            NodeKind::Scenes { .. } => vec![],
            NodeKind::And { a, b } | NodeKind::Or { a, b } => vec![*a, *b],
            NodeKind::TotalArea { inputs, .. } => inputs.clone(),
            NodeKind::CloudMask { input, .. }
            | NodeKind::AddIndex { input, .. }
            | NodeKind::Composite { input }
            | NodeKind::Threshold { input, .. }
            | NodeKind::Not { input }
            | NodeKind::Clip { input, .. }
            | NodeKind::Area { input, .. }
            | NodeKind::Mean { input, .. }
            | NodeKind::RegionSeries { input, .. }
            | NodeKind::Export { input, .. } => vec![*input],
        }
    }

    /// Region names the node reads from the region store.
    pub fn region(&self) -> Option<&str> {
        match self {
            NodeKind::Clip { region, .. }
            | NodeKind::Area { region, .. }
            | NodeKind::TotalArea { region, .. }
            | NodeKind::Mean { region, .. }
            | NodeKind::Export { region, .. } => Some(region),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub kind: NodeKind,
    /// Evaluated when a request names no outputs.
    #[serde(default)]
    pub output: bool,
}

#[derive(Clone, Default, Debug, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub nodes: Vec<Node>,
}

impl Graph {
    pub fn nodes(&self) -> &[Node] {
        self.nodes.as_slice()
    }

    /// Inserts `node`, replacing a node with the same id.
    pub fn add_node(&mut self, node: Node) {
        match self.nodes.iter().position(|n| n.id == node.id) {
            Some(index) => self.nodes[index] = node,
            None => self.nodes.push(node),
        }
    }

    pub fn add(&mut self, name: &str, kind: NodeKind) -> NodeId {
        let id = NodeId::unique();
        self.add_node(Node {
            id,
            name: name.to_string(),
            kind,
            output: false,
        });
        id
    }

    pub fn add_output(&mut self, name: &str, kind: NodeKind) -> NodeId {
        let id = self.add(name, kind);
        if let Some(node) = self.by_id_mut(&id) {
            node.output = true;
        }
        id
    }

    pub fn remove_node_by_id(&mut self, id: NodeId) {
        self.nodes.retain(|node| node.id != id);
    }

    pub fn by_id(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id == *id)
    }

    pub fn by_id_mut(&mut self, id: &NodeId) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|node| node.id == *id)
    }

    pub fn by_name(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.name == name)
    }

    pub fn id_of(&self, name: &str) -> anyhow::Result<NodeId> {
        self.by_name(name)
            .map(|node| node.id)
            .ok_or_else(|| anyhow!("No node named {name:?}"))
    }

    pub fn outputs(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|node| node.output)
    }

    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yml::to_string(&self)?)
    }

    pub fn from_yaml(yaml: &str) -> anyhow::Result<Graph> {
        let graph: Graph = serde_yml::from_str(yaml)?;
        graph.validate()?;

        Ok(graph)
    }

    pub fn from_yaml_file(path: &str) -> anyhow::Result<Graph> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml(&yaml)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let mut seen: HashSet<NodeId> = HashSet::with_capacity(self.nodes.len());
        for node in self.nodes.iter() {
            if node.id.is_nil() {
                bail!("Node {:?} has invalid id", node.name);
            }
            if !seen.insert(node.id) {
                bail!("Duplicate node id {} ({:?})", node.id, node.name);
            }
        }

        for node in self.nodes.iter() {
            for input in node.kind.inputs() {
                if !seen.contains(&input) {
                    bail!("Node {:?} reads from non-existent node {input}", node.name);
                }
            }
        }

        Ok(())
    }
}
