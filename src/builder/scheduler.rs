//! Parallel stage execution.
//!
//! Stages form a DAG: an edge runs from every stage a stage builds on or
//! copies from. Ready stages run on a dedicated rayon pool while the calling
//! thread coordinates; a failed stage takes all of its transitive dependents
//! down with it, but independent branches keep going.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;

use anyhow::{Context, Result};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;
use petgraph::Direction;
use serde::Serialize;

use crate::builder::plan::{BuildPlan, BuildStage};

/// Executes a single stage.
pub trait StageRunner: Send + Sync {
    fn run(&self, stage: &BuildStage) -> Result<()>;
}

/// Shared cancellation flag.
///
/// Once cancelled no further stage is dispatched; stages already running are
/// allowed to finish.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A stage that did not run because a dependency failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedStage {
    pub stage: String,
    /// The failed stage that blocked it
    pub blocked_by: String,
}

/// A stage whose runner returned an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedStage {
    pub stage: String,
    pub message: String,
}

/// Outcome of running a plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScheduleReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<FailedStage>,
    pub skipped: Vec<SkippedStage>,
    pub cancelled: Vec<String>,
}

impl ScheduleReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty() && self.cancelled.is_empty()
    }
}

/// Stage dependency graph of a plan.
struct StageGraph<'p> {
    graph: DiGraph<&'p BuildStage, ()>,
}

impl<'p> StageGraph<'p> {
    fn new(plan: &'p BuildPlan) -> Self {
        let mut graph = DiGraph::new();
        let mut nodes: HashMap<&str, NodeIndex> = HashMap::new();

        for stage in plan.all_stages() {
            let node = graph.add_node(stage);
            nodes.insert(stage.name.as_str(), node);
        }

        for stage in plan.all_stages() {
            let to = nodes[stage.name.as_str()];
            for referenced in stage.referenced_stages() {
                // Validated plans only reference earlier stages.
                if let Some(&from) = nodes.get(referenced) {
                    graph.update_edge(from, to, ());
                }
            }
        }

        StageGraph { graph }
    }

    fn name(&self, node: NodeIndex) -> &'p str {
        &self.graph[node].name
    }

    fn in_degrees(&self) -> HashMap<NodeIndex, usize> {
        self.graph
            .node_indices()
            .map(|n| {
                let degree = self
                    .graph
                    .neighbors_directed(n, Direction::Incoming)
                    .count();
                (n, degree)
            })
            .collect()
    }
}

/// Runs plan stages concurrently in dependency order.
#[derive(Debug, Clone)]
pub struct StageScheduler {
    jobs: usize,
    cancel: CancelToken,
}

impl StageScheduler {
    /// Create a scheduler running at most `jobs` stages at once.
    ///
    /// Defaults to the available parallelism.
    pub fn new(jobs: Option<usize>) -> Self {
        let jobs = jobs
            .filter(|j| *j > 0)
            .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
            .unwrap_or(1);

        StageScheduler {
            jobs,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn jobs(&self) -> usize {
        self.jobs
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Stage names grouped into waves that could run together.
    pub fn waves(plan: &BuildPlan) -> Vec<Vec<String>> {
        let graph = StageGraph::new(plan);
        let Ok(order) = toposort(&graph.graph, None) else {
            return Vec::new();
        };

        let mut level: HashMap<NodeIndex, usize> = HashMap::new();
        let mut waves: Vec<Vec<String>> = Vec::new();

        for node in order {
            let depth = graph
                .graph
                .neighbors_directed(node, Direction::Incoming)
                .filter_map(|p| level.get(&p))
                .map(|l| l + 1)
                .max()
                .unwrap_or(0);
            level.insert(node, depth);

            if waves.len() <= depth {
                waves.resize_with(depth + 1, Vec::new);
            }
            waves[depth].push(graph.name(node).to_string());
        }

        waves
    }

    /// Run every stage of `plan` through `runner`.
    ///
    /// Returns an error only if the worker pool cannot be built or a worker
    /// disappears; stage failures are reported in the [`ScheduleReport`].
    pub fn run<R>(&self, plan: &BuildPlan, runner: Arc<R>) -> Result<ScheduleReport>
    where
        R: StageRunner + 'static,
    {
        let graph = StageGraph::new(plan);
        let mut in_degree = graph.in_degrees();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.jobs)
            .thread_name(|i| format!("stackforge-stage-{}", i))
            .build()
            .context("failed to start stage worker pool")?;

        let (tx, rx) = mpsc::channel::<(NodeIndex, Result<()>)>();

        // Plan order keeps dispatch deterministic among equally ready stages.
        let mut ready: VecDeque<NodeIndex> = graph
            .graph
            .node_indices()
            .filter(|n| in_degree[n] == 0)
            .collect();

        let mut report = ScheduleReport::default();
        let mut finished: HashSet<NodeIndex> = HashSet::new();
        let mut skipped: HashSet<NodeIndex> = HashSet::new();
        let mut in_flight = 0usize;

        loop {
            while in_flight < self.jobs && !self.cancel.is_cancelled() {
                let Some(node) = ready.pop_front() else {
                    break;
                };
                let stage = BuildStage::clone(graph.graph[node]);
                let runner = Arc::clone(&runner);
                let tx = tx.clone();

                tracing::debug!("dispatching stage `{}`", stage.name);
                pool.spawn(move || {
                    let result = runner.run(&stage);
                    let _ = tx.send((node, result));
                });
                in_flight += 1;
            }

            if in_flight == 0 {
                break;
            }

            let (node, result) = rx
                .recv()
                .context("stage worker exited without reporting")?;
            in_flight -= 1;
            finished.insert(node);
            let name = graph.name(node);

            match result {
                Ok(()) => {
                    tracing::info!("stage `{}` finished", name);
                    report.succeeded.push(name.to_string());

                    for next in graph.graph.neighbors_directed(node, Direction::Outgoing) {
                        let Some(degree) = in_degree.get_mut(&next) else {
                            continue;
                        };
                        *degree = degree.saturating_sub(1);
                        if *degree == 0 && !skipped.contains(&next) {
                            ready.push_back(next);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("stage `{}` failed: {:#}", name, e);
                    report.failed.push(FailedStage {
                        stage: name.to_string(),
                        message: format!("{:#}", e),
                    });

                    let mut bfs = Bfs::new(&graph.graph, node);
                    while let Some(dependent) = bfs.next(&graph.graph) {
                        if dependent == node || !skipped.insert(dependent) {
                            continue;
                        }
                        report.skipped.push(SkippedStage {
                            stage: graph.name(dependent).to_string(),
                            blocked_by: name.to_string(),
                        });
                    }
                }
            }
        }

        report.cancelled = graph
            .graph
            .node_indices()
            .filter(|n| !finished.contains(n) && !skipped.contains(n))
            .map(|n| graph.name(n).to_string())
            .collect();

        if !report.cancelled.is_empty() {
            tracing::warn!("cancelled {} stage(s)", report.cancelled.len());
        }

        Ok(report)
    }
}
