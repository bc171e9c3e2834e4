//! Execution planner - orders changed services into dependency levels

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Dependency edges restricted to the services taking part in a run
///
/// A dependency on a service outside the run is considered satisfied
/// and never becomes an edge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    /// service -> in-run dependencies
    edges: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// Build the graph for `services` from a static dependency map
    pub fn restricted<S: AsRef<str>>(
        services: &[S],
        dependencies: &BTreeMap<String, Vec<String>>,
    ) -> Self {
        let nodes: BTreeSet<&str> = services.iter().map(AsRef::as_ref).collect();
        let mut edges = BTreeMap::new();

        for &service in &nodes {
            let mut in_run = BTreeSet::new();
            for dep in dependencies.get(service).into_iter().flatten() {
                if nodes.contains(dep.as_str()) {
                    in_run.insert(dep.clone());
                } else {
                    log::debug!("{service}: dependency {dep} not in this run, treated as satisfied");
                }
            }
            edges.insert(service.to_string(), in_run);
        }

        Self { edges }
    }

    /// In-run dependencies of a service
    pub fn dependencies_of(&self, service: &str) -> Option<&BTreeSet<String>> {
        self.edges.get(service)
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

/// A group of services that may run concurrently
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    /// Members in lexicographic order
    pub services: Vec<String>,
    /// Set when the level holds services left over by a dependency cycle
    pub cycle: bool,
}

/// An ordered sequence of levels
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub levels: Vec<Level>,
    /// Dependency warnings raised while planning
    pub warnings: Vec<String>,
}

impl ExecutionPlan {
    /// Create a new empty plan
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if plan is empty
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Total number of services in the plan
    pub fn service_count(&self) -> usize {
        self.levels.iter().map(|l| l.services.len()).sum()
    }

    /// Index of the level holding a service
    pub fn level_of(&self, service: &str) -> Option<usize> {
        self.levels
            .iter()
            .position(|l| l.services.iter().any(|s| s == service))
    }

    /// Check if ordering fell back because of a cycle
    pub fn has_cycle(&self) -> bool {
        self.levels.iter().any(|l| l.cycle)
    }

    /// Level contents as plain lists
    pub fn as_lists(&self) -> Vec<Vec<String>> {
        self.levels.iter().map(|l| l.services.clone()).collect()
    }
}

/// Partition `services` into dependency levels
///
/// Kahn's algorithm restricted to the given services: every round extracts
/// all services whose in-run dependencies are already planned. Services left
/// when extraction stalls sit on or behind a cycle; they are appended as one
/// final level flagged with `cycle` instead of failing the run.
pub fn resolve<S: AsRef<str>>(
    services: &[S],
    dependencies: &BTreeMap<String, Vec<String>>,
) -> ExecutionPlan {
    let graph = DependencyGraph::restricted(services, dependencies);
    resolve_graph(&graph)
}

/// Partition an already restricted graph into levels
pub fn resolve_graph(graph: &DependencyGraph) -> ExecutionPlan {
    let mut plan = ExecutionPlan::new();

    let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (service, deps) in &graph.edges {
        in_degree.insert(service.as_str(), deps.len());
        for dep in deps {
            dependents
                .entry(dep.as_str())
                .or_default()
                .push(service.as_str());
        }
    }

    // BTreeMap iteration keeps every level sorted
    let mut current: Vec<&str> = in_degree
        .iter()
        .filter(|&(_, &degree)| degree == 0)
        .map(|(&service, _)| service)
        .collect();
    let mut planned = 0usize;

    while !current.is_empty() {
        planned += current.len();
        let mut next: BTreeSet<&str> = BTreeSet::new();

        for &service in &current {
            for &dependent in dependents.get(service).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        next.insert(dependent);
                    }
                }
            }
        }

        plan.levels.push(Level {
            services: current.iter().map(|s| (*s).to_string()).collect(),
            cycle: false,
        });
        current = next.into_iter().collect();
    }

    if planned < graph.len() {
        let remaining: Vec<String> = in_degree
            .iter()
            .filter(|&(_, &degree)| degree > 0)
            .map(|(&service, _)| service.to_string())
            .collect();

        let warning = format!(
            "Circular dependency detected for: {}; running them last in alphabetical order",
            remaining.join(", ")
        );
        log::warn!("{warning}");
        plan.warnings.push(warning);
        plan.levels.push(Level {
            services: remaining,
            cycle: true,
        });
    }

    plan
}
