use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::domain::models::{Workflow, WorkflowStep};
use crate::domain::{DomainError, DomainResult};

/// Orders routine workflow steps so dependencies run before dependents
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyResolver;

/// Step id -> ids it depends on
fn dependency_graph(workflow: &Workflow) -> HashMap<&str, Vec<&str>> {
    let mut graph: HashMap<&str, Vec<&str>> = workflow
        .steps
        .iter()
        .map(|step| (step.id.as_str(), Vec::new()))
        .collect();
    for dependency in &workflow.dependencies {
        graph
            .entry(dependency.step_id.as_str())
            .or_default()
            .extend(dependency.depends_on.iter().map(String::as_str));
    }
    graph
}

// Standalone helper for cycle detection (no self needed)
fn detect_cycle_util<'a>(
    node: &'a str,
    graph: &HashMap<&'a str, Vec<&'a str>>,
    visited: &mut HashSet<&'a str>,
    rec_stack: &mut HashSet<&'a str>,
    path: &mut Vec<&'a str>,
) -> bool {
    visited.insert(node);
    rec_stack.insert(node);
    path.push(node);

    if let Some(neighbors) = graph.get(node) {
        for &neighbor in neighbors {
            if !visited.contains(neighbor) {
                if detect_cycle_util(neighbor, graph, visited, rec_stack, path) {
                    return true;
                }
            } else if rec_stack.contains(neighbor) {
                if let Some(cycle_start) = path.iter().position(|&id| id == neighbor) {
                    path.drain(0..cycle_start);
                    path.push(neighbor);
                    return true;
                }
            }
        }
    }

    rec_stack.remove(node);
    path.pop();
    false
}

impl DependencyResolver {
    pub fn new() -> Self {
        Self
    }

    /// Every dependency edge must name declared steps, and step ids must be unique
    pub fn validate_dependencies(&self, workflow: &Workflow) -> DomainResult<()> {
        let mut declared = HashSet::new();
        for step in &workflow.steps {
            if !declared.insert(step.id.as_str()) {
                return Err(DomainError::ValidationFailed(format!(
                    "duplicate workflow step id '{}'",
                    step.id
                )));
            }
        }

        for dependency in &workflow.dependencies {
            if !declared.contains(dependency.step_id.as_str()) {
                return Err(DomainError::UnknownDependency {
                    step: dependency.step_id.clone(),
                    missing: dependency.step_id.clone(),
                });
            }
            if let Some(missing) = dependency
                .depends_on
                .iter()
                .find(|dep| !declared.contains(dep.as_str()))
            {
                return Err(DomainError::UnknownDependency {
                    step: dependency.step_id.clone(),
                    missing: missing.clone(),
                });
            }
        }
        Ok(())
    }

    /// Cycle as a closed path (`a -> b -> a`), if any
    pub fn detect_cycle(&self, workflow: &Workflow) -> Option<Vec<String>> {
        let graph = dependency_graph(workflow);

        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        // Declaration order keeps the reported cycle stable.
        for step in &workflow.steps {
            let id = step.id.as_str();
            if !visited.contains(id)
                && detect_cycle_util(id, &graph, &mut visited, &mut rec_stack, &mut path)
            {
                return Some(path.into_iter().map(str::to_string).collect());
            }
        }
        None
    }

    /// Steps in dependency order; ties keep declaration order
    pub fn execution_order<'a>(&self, workflow: &'a Workflow) -> DomainResult<Vec<&'a WorkflowStep>> {
        self.validate_dependencies(workflow)?;
        if let Some(cycle) = self.detect_cycle(workflow) {
            return Err(DomainError::DependencyCycle(cycle));
        }

        let index: HashMap<&str, usize> = workflow
            .steps
            .iter()
            .enumerate()
            .map(|(i, step)| (step.id.as_str(), i))
            .collect();
        let mut in_degree = vec![0usize; workflow.steps.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); workflow.steps.len()];
        for (step, deps) in dependency_graph(workflow) {
            let Some(&node) = index.get(step) else { continue };
            let unique: HashSet<&str> = deps.into_iter().collect();
            for dep in unique {
                if let Some(&parent) = index.get(dep) {
                    dependents[parent].push(node);
                    in_degree[node] += 1;
                }
            }
        }

        // Kahn's algorithm with a min-heap on declaration index
        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(i, _)| Reverse(i))
            .collect();
        let mut sorted = Vec::with_capacity(workflow.steps.len());

        while let Some(Reverse(node)) = ready.pop() {
            sorted.push(&workflow.steps[node]);
            for &child in &dependents[node] {
                in_degree[child] -= 1;
                if in_degree[child] == 0 {
                    ready.push(Reverse(child));
                }
            }
        }

        if sorted.len() != workflow.steps.len() {
            return Err(DomainError::DependencyCycle(Vec::new()));
        }
        Ok(sorted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::StepDependency;
    use serde_json::Map;

    fn step(id: &str) -> WorkflowStep {
        WorkflowStep {
            id: id.to_string(),
            name: format!("Step {id}"),
            tool_name: "noop".to_string(),
            parameters: Map::new(),
            strategy: "deterministic".to_string(),
        }
    }

    fn depends(step_id: &str, on: &[&str]) -> StepDependency {
        StepDependency {
            step_id: step_id.to_string(),
            depends_on: on.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    fn ids(steps: &[&WorkflowStep]) -> Vec<String> {
        steps.iter().map(|s| s.id.clone()).collect()
    }

    #[test]
    fn test_execution_order_respects_dependencies() {
        let resolver = DependencyResolver::new();
        let workflow = Workflow {
            steps: vec![step("report"), step("fetch"), step("clean"), step("notify")],
            dependencies: vec![depends("report", &["clean"]), depends("clean", &["fetch"])],
        };
        let order = resolver.execution_order(&workflow).unwrap();
        assert_eq!(ids(&order), vec!["fetch", "clean", "report", "notify"]);
    }

    #[test]
    fn test_independent_steps_keep_declaration_order() {
        let resolver = DependencyResolver::new();
        let workflow = Workflow {
            steps: vec![step("c"), step("a"), step("b")],
            dependencies: vec![],
        };
        assert_eq!(
            ids(&resolver.execution_order(&workflow).unwrap()),
            vec!["c", "a", "b"]
        );
    }

    #[test]
    fn test_cycle_is_reported() {
        let resolver = DependencyResolver::new();
        let workflow = Workflow {
            steps: vec![step("a"), step("b")],
            dependencies: vec![depends("a", &["b"]), depends("b", &["a"])],
        };
        assert_eq!(
            resolver.detect_cycle(&workflow),
            Some(vec!["a".to_string(), "b".to_string(), "a".to_string()])
        );
        assert!(matches!(
            resolver.execution_order(&workflow),
            Err(DomainError::DependencyCycle(_))
        ));
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let resolver = DependencyResolver::new();
        let workflow = Workflow {
            steps: vec![step("a")],
            dependencies: vec![depends("a", &["a"])],
        };
        assert!(resolver.detect_cycle(&workflow).is_some());
    }

    #[test]
    fn test_unknown_and_duplicate_steps() {
        let resolver = DependencyResolver::new();
        let unknown = Workflow {
            steps: vec![step("a")],
            dependencies: vec![depends("a", &["ghost"])],
        };
        assert!(matches!(
            resolver.validate_dependencies(&unknown),
            Err(DomainError::UnknownDependency { missing, .. }) if missing == "ghost"
        ));

        let duplicate = Workflow {
            steps: vec![step("a"), step("a")],
            dependencies: vec![],
        };
        assert!(resolver.execution_order(&duplicate).is_err());
    }
}
