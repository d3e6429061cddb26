use std::collections::VecDeque;

use log::{error, warn};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::compute::Collaborators;
use crate::execution_graph::{EvalReport, ExecutionError, ExecutionGraph, ExecutionResult};
use crate::graph::{Graph, NodeId};
use crate::pending::{pending, Pending, Resolver};

pub type EvalResolver = Resolver<ExecutionResult<EvalReport>>;

#[derive(Debug)]
pub enum WorkerMessage {
    Exit,
    Update { graph: Graph },
    Request { outputs: Vec<NodeId>, resolver: EvalResolver },
    Invalidate { nodes: Vec<NodeId> },
    Clear,
    Multi { msgs: Vec<WorkerMessage> },
}

/// Owns an [`ExecutionGraph`] on a background task and answers requests
/// in the order they were sent.
#[derive(Debug)]
pub struct Worker {
    thread_handle: Option<JoinHandle<()>>,
    tx: UnboundedSender<WorkerMessage>,
}

impl Worker {
    pub fn new(collaborators: Collaborators) -> Self {
        let (tx, rx) = unbounded_channel::<WorkerMessage>();
        let thread_handle: JoinHandle<()> = tokio::spawn(async move {
            worker_loop(rx, collaborators).await;
        });

        Self {
            thread_handle: Some(thread_handle),
            tx,
        }
    }

    pub fn send(&self, msg: WorkerMessage) {
        if self.tx.send(msg).is_err() {
            error!("Worker has already exited, message dropped");
        }
    }

    pub fn update(&self, graph: Graph) {
        self.send(WorkerMessage::Update { graph });
    }

    /// Queues an evaluation of `outputs`, or of the graph's output nodes
    /// when empty. Returns immediately.
    pub fn request(&self, outputs: Vec<NodeId>) -> Pending<ExecutionResult<EvalReport>> {
        let (resolver, pending) = pending();
        self.send(WorkerMessage::Request { outputs, resolver });
        pending
    }

    pub fn invalidate(&self, nodes: Vec<NodeId>) {
        self.send(WorkerMessage::Invalidate { nodes });
    }

    pub fn clear(&self) {
        self.send(WorkerMessage::Clear);
    }

    pub async fn exit(&mut self) {
        self.send(WorkerMessage::Exit);

        if let Some(thread_handle) = self.thread_handle.take() {
            if let Err(err) = thread_handle.await {
                error!("Worker task failed: {err}");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            warn!("Worker dropped while the task is still running; call Worker::exit() first");
        }
    }
}

async fn worker_loop(mut rx: UnboundedReceiver<WorkerMessage>, collaborators: Collaborators) {
    let mut execution_graph = ExecutionGraph::default();
    let mut msgs: VecDeque<WorkerMessage> = VecDeque::default();
    // set while the last update was rejected; requests fail with it
    let mut broken: Option<ExecutionError> = None;

    'worker: loop {
        let msg = rx.recv().await;
        let Some(msg) = msg else { break };
        msgs.push_back(msg);

        loop {
            match rx.try_recv() {
                Ok(msg) => msgs.push_back(msg),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break,
            }
        }

        while let Some(msg) = msgs.pop_front() {
            match msg {
                WorkerMessage::Exit => break 'worker,
                WorkerMessage::Update { graph } => {
                    broken = execution_graph.update(&graph).err();
                    if let Some(err) = &broken {
                        error!("Graph update rejected: {err}");
                    }
                }
                WorkerMessage::Request { outputs, resolver } => {
                    if resolver.is_abandoned() {
                        continue;
                    }
                    let result = match &broken {
                        Some(err) => Err(err.clone()),
                        None => execution_graph.evaluate(&outputs, &collaborators).await,
                    };
                    if let Err(err) = &result {
                        error!("Evaluation failed: {err}");
                    }
                    resolver.resolve(result);
                }
                WorkerMessage::Invalidate { nodes } => execution_graph.invalidate_recursively(nodes),
                WorkerMessage::Clear => {
                    execution_graph.clear();
                    broken = None;
                }
                WorkerMessage::Multi { msgs: new_msgs } => {
                    for (offset, msg) in new_msgs.into_iter().enumerate() {
                        msgs.insert(offset, msg);
                    }
                }
            }
        }
    }
}
