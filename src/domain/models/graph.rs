//! Task dependency graph.
//!
//! Name-keyed DAG over the tasks of a single workflow, with cycle
//! detection and transitive dependent lookup for failure cascades.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::workflow::TaskSpec;

/// A node in the dependency graph.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub name: String,
    pub dependencies: Vec<String>,
    pub dependents: Vec<String>,
}

/// Dependency graph over task names, preserving declaration order.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    nodes: HashMap<String, GraphNode>,
    order: Vec<String>,
}

impl TaskGraph {
    /// Build the graph from task descriptors.
    ///
    /// Dependencies on undeclared tasks are rejected; full descriptor
    /// validation lives on `WorkflowSpec::validate`.
    pub fn from_specs(tasks: &[TaskSpec]) -> DomainResult<Self> {
        let mut nodes: HashMap<String, GraphNode> = HashMap::new();
        let mut order = Vec::with_capacity(tasks.len());

        for task in tasks {
            nodes.insert(
                task.name.clone(),
                GraphNode {
                    name: task.name.clone(),
                    dependencies: task.depends_on.clone(),
                    dependents: Vec::new(),
                },
            );
            order.push(task.name.clone());
        }

        for task in tasks {
            for dep in &task.depends_on {
                let Some(dep_node) = nodes.get_mut(dep) else {
                    return Err(DomainError::TaskNotFound(dep.clone()));
                };
                dep_node.dependents.push(task.name.clone());
            }
        }

        Ok(Self { nodes, order })
    }

    pub fn node(&self, name: &str) -> Option<&GraphNode> {
        self.nodes.get(name)
    }

    /// Task names in declaration order; sequential dispatch follows this.
    pub fn declaration_order(&self) -> &[String] {
        &self.order
    }

    pub fn dependencies_of(&self, name: &str) -> &[String] {
        self.nodes.get(name).map(|n| n.dependencies.as_slice()).unwrap_or(&[])
    }

    /// Some member of a dependency cycle, if one exists.
    pub fn find_cycle_member(&self) -> Option<&str> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();

        for name in &self.order {
            if let Some(member) = self.cycle_dfs(name, &mut visited, &mut rec_stack) {
                return Some(member);
            }
        }
        None
    }

    fn cycle_dfs<'a>(
        &'a self,
        name: &'a str,
        visited: &mut HashSet<&'a str>,
        rec_stack: &mut HashSet<&'a str>,
    ) -> Option<&'a str> {
        if rec_stack.contains(name) {
            return Some(name);
        }
        if visited.contains(name) {
            return None;
        }

        visited.insert(name);
        rec_stack.insert(name);

        if let Some(node) = self.nodes.get(name) {
            for dep in &node.dependencies {
                if let Some(member) = self.cycle_dfs(dep, visited, rec_stack) {
                    return Some(member);
                }
            }
        }

        rec_stack.remove(name);
        None
    }

    /// All tasks that depend on `name`, directly or transitively.
    pub fn transitive_dependents(&self, name: &str) -> HashSet<String> {
        let mut result = HashSet::new();
        let mut queue = VecDeque::new();

        if let Some(node) = self.nodes.get(name) {
            queue.extend(node.dependents.iter().cloned());
        }

        while let Some(current) = queue.pop_front() {
            if result.insert(current.clone()) {
                if let Some(node) = self.nodes.get(&current) {
                    queue.extend(node.dependents.iter().cloned());
                }
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn task(name: &str, deps: &[&str]) -> TaskSpec {
        TaskSpec {
            name: name.into(),
            agent: "a1".into(),
            action: "call".into(),
            parameters: HashMap::new(),
            depends_on: deps.iter().map(|s| (*s).to_string()).collect(),
            timeout_secs: None,
            retry: None,
            continue_on_failure: false,
        }
    }

    #[test]
    fn builds_dependents_index() {
        let graph = TaskGraph::from_specs(&[
            task("t1", &[]),
            task("t2", &["t1"]),
            task("t3", &["t1"]),
        ])
        .unwrap();

        let mut dependents = graph.node("t1").unwrap().dependents.clone();
        dependents.sort();
        assert_eq!(dependents, vec!["t2", "t3"]);
        assert_eq!(graph.declaration_order(), &["t1", "t2", "t3"]);
    }

    #[test]
    fn missing_dependency_is_an_error() {
        let err = TaskGraph::from_specs(&[task("t1", &["ghost"])]).unwrap_err();
        assert!(matches!(err, DomainError::TaskNotFound(name) if name == "ghost"));
    }

    #[test]
    fn detects_cycles() {
        let graph = TaskGraph::from_specs(&[
            task("t1", &["t3"]),
            task("t2", &["t1"]),
            task("t3", &["t2"]),
        ])
        .unwrap();
        assert!(graph.find_cycle_member().is_some());

        let acyclic = TaskGraph::from_specs(&[task("t1", &[]), task("t2", &["t1"])]).unwrap();
        assert!(acyclic.find_cycle_member().is_none());
    }

    #[test]
    fn transitive_dependents_cover_the_chain() {
        let graph = TaskGraph::from_specs(&[
            task("t1", &[]),
            task("t2", &["t1"]),
            task("t3", &["t2"]),
            task("t4", &[]),
        ])
        .unwrap();

        let mut dependents: Vec<_> = graph.transitive_dependents("t1").into_iter().collect();
        dependents.sort();
        assert_eq!(dependents, vec!["t2", "t3"]);
        assert!(graph.transitive_dependents("t4").is_empty());
    }

    #[test]
    fn diamond_has_no_cycle() {
        let graph = TaskGraph::from_specs(&[
            task("a", &[]),
            task("b", &["a"]),
            task("c", &["a"]),
            task("d", &["b", "c"]),
        ])
        .unwrap();
        assert!(graph.find_cycle_member().is_none());
        assert_eq!(graph.transitive_dependents("a").len(), 3);
    }
}
