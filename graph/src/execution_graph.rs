use std::mem::take;
use std::time::Instant;

use hashbrown::HashMap;
use raster::{RasterError, Statistic};
use thiserror::Error;

use crate::compute::{invoke, Collaborators};
use crate::graph::{Graph, NodeId, NodeKind};
use crate::value::{Value, ValueType};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("Cycle detected while building execution graph at node {node}")]
    CycleDetected { node: String },
    #[error("Unknown node {node}")]
    UnknownNode { node: String },
    #[error("Duplicate node {node}")]
    DuplicateNode { node: String },
    #[error("Node {node} expected {expected}, got {found}")]
    TypeMismatch {
        node: String,
        expected: String,
        found: ValueType,
    },
    #[error("Node {node} failed: {source}")]
    Raster {
        node: String,
        #[source]
        source: RasterError,
    },
    #[error("Node {node}: {message}")]
    Collaborator { node: String, message: String },
}

pub type ExecutionResult<T> = std::result::Result<T, ExecutionError>;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExecutionStats {
    pub elapsed_secs: f64,
    pub executed_nodes: usize,
    pub cached_nodes: usize,
}

/// Values of the requested nodes after one evaluation.
#[derive(Debug, Clone, Default)]
pub struct EvalReport {
    pub values: Vec<(NodeId, String, Value)>,
    pub stats: ExecutionStats,
}

impl EvalReport {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(_, node_name, _)| node_name == name)
            .map(|(_, _, value)| value)
    }

    pub fn by_id(&self, id: &NodeId) -> Option<&Value> {
        self.values
            .iter()
            .find(|(node_id, _, _)| node_id == id)
            .map(|(_, _, value)| value)
    }

    pub fn statistic(&self, name: &str) -> Option<&Statistic> {
        self.get(name).and_then(Value::as_statistic)
    }

    pub fn statistics(&self) -> impl Iterator<Item = (&str, &Statistic)> {
        self.values
            .iter()
            .filter_map(|(_, name, value)| value.as_statistic().map(|stat| (name.as_str(), stat)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ProcessState {
    #[default]
    None,
    Processing,
    Backward,
}

#[derive(Debug)]
enum VisitCause {
    Request,
    Done,
}

#[derive(Debug)]
struct Visit {
    e_node_idx: usize,
    cause: VisitCause,
}

#[derive(Debug)]
pub struct ExecutionNode {
    pub id: NodeId,
    pub name: String,
    pub kind: NodeKind,
    pub output: bool,

    process_state: ProcessState,
    inputs: Vec<usize>,

    pub run_time: f64,
    pub(crate) value: Option<Value>,
}

impl ExecutionNode {
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn is_cached(&self) -> bool {
        self.value.is_some()
    }

    fn invalidate(&mut self) {
        self.value = None;
        self.run_time = 0.0;
    }
}

/// Pull-based evaluator over a [`Graph`].
///
/// Only nodes upstream of the requested outputs run; values stay cached
/// until the node or anything it reads from changes.
#[derive(Debug, Default)]
pub struct ExecutionGraph {
    pub e_nodes: Vec<ExecutionNode>,
    index: HashMap<NodeId, usize>,
    pub e_node_invoke_order: Vec<usize>,

    //caches
    stack: Vec<Visit>,
}

impl ExecutionGraph {
    pub fn by_id(&self, node_id: &NodeId) -> Option<&ExecutionNode> {
        self.index.get(node_id).map(|&idx| &self.e_nodes[idx])
    }

    pub fn by_name(&self, node_name: &str) -> Option<&ExecutionNode> {
        self.e_nodes.iter().find(|node| node.name == node_name)
    }

    pub fn clear(&mut self) {
        self.e_nodes.clear();
        self.index.clear();
        self.e_node_invoke_order.clear();
    }

    /// Rebuilds the node table from `graph`, keeping cached values of nodes
    /// whose kind is unchanged and dropping those of changed nodes and
    /// everything downstream of them.
    pub fn update(&mut self, graph: &Graph) -> ExecutionResult<()> {
        let mut previous: HashMap<NodeId, ExecutionNode> = take(&mut self.e_nodes)
            .into_iter()
            .map(|e_node| (e_node.id, e_node))
            .collect();
        self.index.clear();
        self.e_node_invoke_order.clear();

        let mut changed: Vec<NodeId> = Vec::new();
        for node in graph.nodes.iter() {
            let (value, run_time) = match previous.remove(&node.id) {
                Some(e_node) if e_node.kind == node.kind => (e_node.value, e_node.run_time),
                Some(_) => {
                    changed.push(node.id);
                    (None, 0.0)
                }
                None => (None, 0.0),
            };
            if self.index.insert(node.id, self.e_nodes.len()).is_some() {
                return Err(ExecutionError::DuplicateNode {
                    node: format!("{} ({})", node.name, node.id),
                });
            }
            self.e_nodes.push(ExecutionNode {
                id: node.id,
                name: node.name.clone(),
                kind: node.kind.clone(),
                output: node.output,
                process_state: ProcessState::None,
                inputs: Vec::new(),
                run_time,
                value,
            });
        }

        for e_node_idx in 0..self.e_nodes.len() {
            let mut inputs = Vec::new();
            for input_id in self.e_nodes[e_node_idx].kind.inputs() {
                let Some(&input_idx) = self.index.get(&input_id) else {
                    return Err(ExecutionError::UnknownNode {
                        node: format!("{} (input of {})", input_id, self.e_nodes[e_node_idx].name),
                    });
                };
                inputs.push(input_idx);
            }
            self.e_nodes[e_node_idx].inputs = inputs;
        }

        self.invalidate_recursively(changed);

        // reject cycles anywhere in the graph, not only upstream of outputs
        let all: Vec<usize> = (0..self.e_nodes.len()).collect();
        self.backward(all, false)?;
        self.e_node_invoke_order.clear();

        Ok(())
    }

    pub fn invalidate_recursively<I>(&mut self, node_ids: I)
    where
        I: IntoIterator<Item = NodeId>,
    {
        let mut stack: Vec<usize> = node_ids
            .into_iter()
            .filter_map(|id| self.index.get(&id).copied())
            .collect();
        let mut seen: Vec<bool> = vec![false; self.e_nodes.len()];

        while let Some(e_node_idx) = stack.pop() {
            if seen[e_node_idx] {
                continue;
            }
            seen[e_node_idx] = true;

            self.e_nodes[e_node_idx].invalidate();

            for (output_e_node_idx, e_node) in self.e_nodes.iter().enumerate() {
                if !seen[output_e_node_idx] && e_node.inputs.contains(&e_node_idx) {
                    stack.push(output_e_node_idx);
                }
            }
        }
    }

    // Walk upstream from `roots`, collecting the invocation order in
    // post-order. With `skip_cached`, nodes holding a value are leaves.
    fn backward(&mut self, roots: Vec<usize>, skip_cached: bool) -> ExecutionResult<()> {
        self.e_node_invoke_order.clear();
        self.e_nodes
            .iter_mut()
            .for_each(|e_node| e_node.process_state = ProcessState::None);

        let mut stack: Vec<Visit> = take(&mut self.stack);
        stack.clear();
        stack.extend(roots.into_iter().rev().map(|e_node_idx| Visit {
            e_node_idx,
            cause: VisitCause::Request,
        }));

        while let Some(visit) = stack.pop() {
            let e_node = &mut self.e_nodes[visit.e_node_idx];

            if let VisitCause::Done = visit.cause {
                assert_eq!(e_node.process_state, ProcessState::Processing);
                e_node.process_state = ProcessState::Backward;
                self.e_node_invoke_order.push(visit.e_node_idx);
                continue;
            }

            match e_node.process_state {
                ProcessState::None => {}
                ProcessState::Processing => {
                    let node = e_node.name.clone();
                    self.stack = stack;
                    return Err(ExecutionError::CycleDetected { node });
                }
                ProcessState::Backward => continue,
            }

            if skip_cached && e_node.is_cached() {
                e_node.process_state = ProcessState::Backward;
                continue;
            }

            e_node.process_state = ProcessState::Processing;
            stack.push(Visit {
                e_node_idx: visit.e_node_idx,
                cause: VisitCause::Done,
            });
            for &input_idx in e_node.inputs.iter().rev() {
                stack.push(Visit {
                    e_node_idx: input_idx,
                    cause: VisitCause::Request,
                });
            }
        }

        self.stack = stack;
        Ok(())
    }

    fn resolve_outputs(&self, outputs: &[NodeId]) -> ExecutionResult<Vec<usize>> {
        if outputs.is_empty() {
            return Ok(self
                .e_nodes
                .iter()
                .enumerate()
                .filter(|(_, e_node)| e_node.output)
                .map(|(idx, _)| idx)
                .collect());
        }

        outputs
            .iter()
            .map(|id| {
                self.index
                    .get(id)
                    .copied()
                    .ok_or_else(|| ExecutionError::UnknownNode { node: id.to_string() })
            })
            .collect()
    }

    /// Runs every uncached node upstream of `outputs` (or of the nodes
    /// flagged as outputs when `outputs` is empty) and returns their values.
    pub async fn evaluate(
        &mut self,
        outputs: &[NodeId],
        collaborators: &Collaborators,
    ) -> ExecutionResult<EvalReport> {
        let roots = self.resolve_outputs(outputs)?;
        self.backward(roots.clone(), true)?;
        let stats = self.execute(collaborators).await?;

        let values = roots
            .into_iter()
            .filter_map(|idx| {
                let e_node = &self.e_nodes[idx];
                e_node
                    .value
                    .clone()
                    .map(|value| (e_node.id, e_node.name.clone(), value))
            })
            .collect();

        Ok(EvalReport { values, stats })
    }

    async fn execute(&mut self, collaborators: &Collaborators) -> ExecutionResult<ExecutionStats> {
        let start = Instant::now();
        let mut inputs: Vec<Value> = Vec::new();

        for e_node_idx in self.e_node_invoke_order.iter().copied() {
            inputs.clear();
            let e_node = &self.e_nodes[e_node_idx];
            for &input_idx in e_node.inputs.iter() {
                let input = &self.e_nodes[input_idx];
                let value = input.value.clone().ok_or_else(|| ExecutionError::UnknownNode {
                    node: format!("{} (not evaluated before {})", input.name, e_node.name),
                })?;
                inputs.push(value);
            }

            let node_start = Instant::now();
            let value = invoke(&e_node.name, &e_node.kind, &inputs, collaborators).await?;
            let run_time = node_start.elapsed().as_secs_f64();
            log::debug!(
                "Node {} -> {} in {:.3}s",
                e_node.name,
                value.value_type(),
                run_time
            );

            let e_node = &mut self.e_nodes[e_node_idx];
            e_node.value = Some(value);
            e_node.run_time = run_time;
        }

        let executed_nodes = self.e_node_invoke_order.len();
        Ok(ExecutionStats {
            elapsed_secs: start.elapsed().as_secs_f64(),
            executed_nodes,
            cached_nodes: self
                .e_nodes
                .iter()
                .filter(|e_node| e_node.is_cached())
                .count()
                .saturating_sub(executed_nodes),
        })
    }
}
