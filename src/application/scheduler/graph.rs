//! Job dependency graph
//!
//! Builds a directed graph over job dependencies, detects cycles (a cycle
//! would deadlock the scheduler's dependency gating forever) and computes
//! a topological execution order for operator tooling.

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::entities::Job;
use crate::domain::error::{CoreError, CoreResult};

/// Directed graph of job dependencies
///
/// An edge runs from a dependency to the job that waits on it, so a
/// topological sort yields a valid execution order.
pub struct JobDependencyGraph {
    graph: DiGraph<Uuid, ()>,
    indices: HashMap<Uuid, NodeIndex>,
}

impl JobDependencyGraph {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            indices: HashMap::new(),
        }
    }

    /// Builds the graph from a set of jobs
    pub fn build(jobs: &[Job]) -> Self {
        let mut graph = Self::new();
        for job in jobs {
            graph.add_job(job.id);
        }
        for job in jobs {
            for dependency in &job.dependencies {
                graph.add_dependency(*dependency, job.id);
            }
        }
        graph
    }

    pub fn add_job(&mut self, job_id: Uuid) {
        if !self.indices.contains_key(&job_id) {
            let idx = self.graph.add_node(job_id);
            self.indices.insert(job_id, idx);
        }
    }

    /// Adds an edge from `dependency` to `dependent`
    pub fn add_dependency(&mut self, dependency: Uuid, dependent: Uuid) {
        self.add_job(dependency);
        self.add_job(dependent);
        let from = self.indices[&dependency];
        let to = self.indices[&dependent];
        self.graph.add_edge(from, to, ());
    }

    /// Jobs this job waits on (direct predecessors)
    pub fn upstream(&self, job_id: Uuid) -> Vec<Uuid> {
        self.neighbours(job_id, petgraph::Direction::Incoming)
    }

    /// Jobs waiting on this job (direct successors)
    pub fn downstream(&self, job_id: Uuid) -> Vec<Uuid> {
        self.neighbours(job_id, petgraph::Direction::Outgoing)
    }

    fn neighbours(&self, job_id: Uuid, direction: petgraph::Direction) -> Vec<Uuid> {
        match self.indices.get(&job_id) {
            Some(&idx) => self
                .graph
                .edges_directed(idx, direction)
                .map(|edge| {
                    let node = match direction {
                        petgraph::Direction::Incoming => edge.source(),
                        petgraph::Direction::Outgoing => edge.target(),
                    };
                    self.graph[node]
                })
                .collect(),
            None => Vec::new(),
        }
    }

    /// Topological execution order; fails on circular dependencies
    pub fn execution_order(&self) -> CoreResult<Vec<Uuid>> {
        toposort(&self.graph, None)
            .map(|sorted| sorted.iter().map(|&idx| self.graph[idx]).collect())
            .map_err(|_| CoreError::validation("circular job dependency detected"))
    }

    pub fn has_cycles(&self) -> bool {
        self.execution_order().is_err()
    }

    /// Rejects a job whose dependency edges would close a cycle
    ///
    /// Called by save paths before a job with dependencies is stored.
    pub fn assert_acyclic_with(jobs: &[Job], candidate: &Job) -> CoreResult<()> {
        let mut graph = Self::build(jobs);
        graph.add_job(candidate.id);
        for dependency in &candidate.dependencies {
            graph.add_dependency(*dependency, candidate.id);
        }
        if graph.has_cycles() {
            return Err(CoreError::validation(format!(
                "job '{}' would create a circular dependency",
                candidate.name
            )));
        }
        Ok(())
    }
}

impl Default for JobDependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}
