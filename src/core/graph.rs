//! Job dependency graph.
//!
//! Jobs are stored in an arena and referenced by `JobId` indices; edges
//! are adjacency lists of indices in both directions. Building the graph
//! rejects dangling references and cycles, so a built graph is always a DAG.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use super::error::ConfigurationError;
use super::pipeline::Job;

/// Index of a job in the graph arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub usize);

/// Validated, acyclic job graph
#[derive(Debug, Clone)]
pub struct JobGraph {
    names: Vec<String>,
    index: HashMap<String, JobId>,
    /// id -> jobs it needs
    dependencies: Vec<Vec<JobId>>,
    /// id -> jobs that need it
    dependents: Vec<Vec<JobId>>,
    order: Vec<JobId>,
}

impl JobGraph {
    /// Build and validate the graph for a set of jobs
    pub fn build(jobs: &[Job]) -> Result<Self, ConfigurationError> {
        let mut index = HashMap::with_capacity(jobs.len());
        for (i, job) in jobs.iter().enumerate() {
            if index.insert(job.name.clone(), JobId(i)).is_some() {
                return Err(ConfigurationError::DuplicateJob(job.name.clone()));
            }
        }

        let mut dependencies = vec![Vec::new(); jobs.len()];
        let mut dependents = vec![Vec::new(); jobs.len()];

        for (i, job) in jobs.iter().enumerate() {
            for dep in &job.needs {
                if dep == &job.name {
                    return Err(ConfigurationError::SelfDependency(job.name.clone()));
                }
                let dep_id = *index.get(dep).ok_or_else(|| {
                    ConfigurationError::DanglingDependency {
                        job: job.name.clone(),
                        dependency: dep.clone(),
                    }
                })?;
                // Repeated entries in `needs` collapse to one edge
                if !dependencies[i].contains(&dep_id) {
                    dependencies[i].push(dep_id);
                    dependents[dep_id.0].push(JobId(i));
                }
            }
        }

        let names: Vec<String> = jobs.iter().map(|j| j.name.clone()).collect();
        let order = topological_sort(&dependencies, &dependents)
            .map_err(|stuck| ConfigurationError::Cycle(stuck.iter().map(|id| names[id.0].clone()).collect()))?;

        Ok(Self {
            names,
            index,
            dependencies,
            dependents,
            order,
        })
    }

    /// Number of jobs
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// All ids in definition order
    pub fn ids(&self) -> impl Iterator<Item = JobId> {
        (0..self.names.len()).map(JobId)
    }

    /// Name of a job
    pub fn name(&self, id: JobId) -> &str {
        &self.names[id.0]
    }

    /// Look up a job's id by name
    pub fn id_of(&self, name: &str) -> Option<JobId> {
        self.index.get(name).copied()
    }

    /// Jobs that `id` needs
    pub fn dependencies(&self, id: JobId) -> &[JobId] {
        &self.dependencies[id.0]
    }

    /// Jobs that need `id`
    pub fn dependents(&self, id: JobId) -> &[JobId] {
        &self.dependents[id.0]
    }

    /// Dependency-respecting order, stable with respect to definition order
    pub fn topological_order(&self) -> &[JobId] {
        &self.order
    }
}

/// Kahn's algorithm, always releasing the earliest-defined ready job next.
/// On a cycle, returns the jobs that could never be released (those on or
/// behind the cycle).
fn topological_sort(
    dependencies: &[Vec<JobId>],
    dependents: &[Vec<JobId>],
) -> Result<Vec<JobId>, Vec<JobId>> {
    let mut in_degree: Vec<usize> = dependencies.iter().map(Vec::len).collect();

    let mut ready: BinaryHeap<Reverse<JobId>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| Reverse(JobId(i)))
        .collect();

    let mut order = Vec::with_capacity(dependencies.len());

    while let Some(Reverse(node)) = ready.pop() {
        order.push(node);

        for &next in &dependents[node.0] {
            in_degree[next.0] -= 1;
            if in_degree[next.0] == 0 {
                ready.push(Reverse(next));
            }
        }
    }

    if order.len() != dependencies.len() {
        let stuck = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d > 0)
            .map(|(i, _)| JobId(i))
            .collect();
        return Err(stuck);
    }

    Ok(order)
}
