//! Dependency resolution into parallel-eligible step groups.
//!
//! Steps are modelled as a `petgraph` directed graph (dependency -> dependent)
//! and grouped with Kahn's algorithm: each round collects every unprocessed
//! step whose in-degree is zero into one `StepGroup`, and only then decrements
//! the in-degree of their dependents. Siblings in a round therefore never
//! influence each other's inclusion in it.

use std::collections::HashMap;

use maestro_types::workflow::StepDefinition;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One topological frontier of steps.
#[derive(Debug, Clone, PartialEq)]
pub struct StepGroup {
    /// Members in original authoring order.
    pub steps: Vec<StepDefinition>,
    pub can_run_in_parallel: bool,
    /// Zero-based position in the plan.
    pub order: usize,
}

impl StepGroup {
    pub fn step_names(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|s| s.name.as_str())
    }
}

/// Resolve-time failures. Both abort a run before any step executes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("step '{step}' depends on unknown step '{missing}'")]
    UnknownDependency { step: String, missing: String },

    #[error("cyclic dependency among steps: {}", .steps.join(", "))]
    CyclicDependency { steps: Vec<String> },

    #[error("duplicate step name '{0}'")]
    DuplicateStep(String),
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Resolve steps into ordered groups.
///
/// Unknown dependencies are reported before any grouping happens. A round
/// that finds no ready step while steps remain is a cycle, and the error
/// names exactly the unprocessed remainder.
pub fn resolve(steps: &[StepDefinition]) -> Result<Vec<StepGroup>, ResolveError> {
    let mut by_name: HashMap<&str, usize> = HashMap::with_capacity(steps.len());
    for (i, step) in steps.iter().enumerate() {
        if by_name.insert(step.name.as_str(), i).is_some() {
            return Err(ResolveError::DuplicateStep(step.name.clone()));
        }
    }

    for step in steps {
        for dep in &step.depends_on {
            if !by_name.contains_key(dep.as_str()) {
                return Err(ResolveError::UnknownDependency {
                    step: step.name.clone(),
                    missing: dep.clone(),
                });
            }
        }
    }

    // Node weight is the step's position in `steps`.
    let mut graph = DiGraph::<usize, ()>::with_capacity(steps.len(), steps.len());
    let nodes: Vec<NodeIndex> = (0..steps.len()).map(|i| graph.add_node(i)).collect();
    for (i, step) in steps.iter().enumerate() {
        for dep in &step.depends_on {
            graph.add_edge(nodes[by_name[dep.as_str()]], nodes[i], ());
        }
    }

    let mut in_degree: Vec<usize> = nodes
        .iter()
        .map(|&n| graph.neighbors_directed(n, Direction::Incoming).count())
        .collect();
    let mut processed = vec![false; steps.len()];
    let mut remaining = steps.len();
    let mut groups = Vec::new();

    while remaining > 0 {
        let ready: Vec<usize> = (0..steps.len())
            .filter(|&i| !processed[i] && in_degree[i] == 0)
            .collect();

        if ready.is_empty() {
            let unresolved = (0..steps.len())
                .filter(|&i| !processed[i])
                .map(|i| steps[i].name.clone())
                .collect();
            return Err(ResolveError::CyclicDependency { steps: unresolved });
        }

        for &i in &ready {
            processed[i] = true;
            for dependent in graph.neighbors_directed(nodes[i], Direction::Outgoing) {
                in_degree[graph[dependent]] -= 1;
            }
        }
        remaining -= ready.len();

        let members: Vec<StepDefinition> = ready.iter().map(|&i| steps[i].clone()).collect();
        let can_run_in_parallel = parallel_eligible(&members);
        groups.push(StepGroup {
            steps: members,
            can_run_in_parallel,
            order: groups.len(),
        });
    }

    tracing::debug!(
        steps = steps.len(),
        groups = groups.len(),
        "resolved step dependencies"
    );

    Ok(groups)
}

/// An explicit `parallel: false` anywhere forces the group sequential.
fn parallel_eligible(members: &[StepDefinition]) -> bool {
    if members.iter().any(|s| s.parallel == Some(false)) {
        return false;
    }
    if members.iter().all(|s| s.parallel == Some(true)) {
        return true;
    }
    members.len() > 1
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn step(name: &str, deps: &[&str]) -> StepDefinition {
        StepDefinition::new(name, "dev", format!("do {name}")).depends_on(deps.iter().copied())
    }

    fn names(group: &StepGroup) -> Vec<&str> {
        group.step_names().collect()
    }

    #[test]
    fn test_fan_in_scenario() {
        let steps = vec![step("A", &[]), step("B", &[]), step("C", &["A", "B"])];
        let groups = resolve(&steps).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(names(&groups[0]), vec!["A", "B"]);
        assert!(groups[0].can_run_in_parallel);
        assert_eq!(groups[0].order, 0);
        assert_eq!(names(&groups[1]), vec!["C"]);
        assert!(!groups[1].can_run_in_parallel);
        assert_eq!(groups[1].order, 1);
    }

    #[test]
    fn test_two_step_cycle_names_both() {
        let steps = vec![step("X", &["Y"]), step("Y", &["X"])];
        let err = resolve(&steps).unwrap_err();
        assert_eq!(
            err,
            ResolveError::CyclicDependency {
                steps: vec!["X".to_string(), "Y".to_string()]
            }
        );
    }

    #[test]
    fn test_cycle_names_only_unresolved_remainder() {
        // root resolves; a <-> b cycle; c blocked downstream of the cycle
        let steps = vec![
            step("root", &[]),
            step("a", &["root", "b"]),
            step("b", &["a"]),
            step("c", &["b"]),
        ];
        match resolve(&steps).unwrap_err() {
            ResolveError::CyclicDependency { steps } => {
                assert_eq!(steps, vec!["a", "b", "c"]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let err = resolve(&[step("a", &["a"])]).unwrap_err();
        assert!(matches!(err, ResolveError::CyclicDependency { .. }));
    }

    #[test]
    fn test_unknown_dependency_checked_before_cycles() {
        let steps = vec![step("x", &["y"]), step("y", &["x", "ghost"])];
        let err = resolve(&steps).unwrap_err();
        assert_eq!(
            err,
            ResolveError::UnknownDependency {
                step: "y".to_string(),
                missing: "ghost".to_string()
            }
        );
        assert!(err.to_string().contains("unknown step 'ghost'"));
    }

    #[test]
    fn test_duplicate_step_rejected() {
        let err = resolve(&[step("a", &[]), step("a", &[])]).unwrap_err();
        assert_eq!(err, ResolveError::DuplicateStep("a".to_string()));
    }

    #[test]
    fn test_empty_input_yields_no_groups() {
        assert!(resolve(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_group_preserves_authoring_order() {
        let steps = vec![step("z", &[]), step("m", &[]), step("a", &[])];
        let groups = resolve(&steps).unwrap();
        assert_eq!(names(&groups[0]), vec!["z", "m", "a"]);
    }

    #[test]
    fn test_diamond() {
        let steps = vec![
            step("a", &[]),
            step("b", &["a"]),
            step("c", &["a"]),
            step("d", &["b", "c"]),
        ];
        let groups = resolve(&steps).unwrap();
        let layout: Vec<Vec<&str>> = groups.iter().map(names).collect();
        assert_eq!(layout, vec![vec!["a"], vec!["b", "c"], vec!["d"]]);
    }

    #[test]
    fn test_parallel_flags() {
        // explicit false wins
        let steps = vec![step("a", &[]).parallel(false), step("b", &[]).parallel(true)];
        assert!(!resolve(&steps).unwrap()[0].can_run_in_parallel);

        // singleton explicitly parallel
        let steps = vec![step("a", &[]).parallel(true)];
        assert!(resolve(&steps).unwrap()[0].can_run_in_parallel);

        // mixed unset and true with more than one member
        let steps = vec![step("a", &[]).parallel(true), step("b", &[])];
        assert!(resolve(&steps).unwrap()[0].can_run_in_parallel);
    }

    /// Tiny deterministic generator so the property check is reproducible.
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self) -> u64 {
            self.0 = self
                .0
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            self.0 >> 33
        }
    }

    #[test]
    fn test_groups_partition_steps_and_respect_dependencies() {
        let mut rng = Lcg(42);
        for _ in 0..50 {
            let n = (rng.next() % 12 + 1) as usize;
            // Dependencies only point at lower indices, so the set is acyclic.
            let mut steps: Vec<StepDefinition> = (0..n)
                .map(|i| {
                    let deps: Vec<String> = (0..i)
                        .filter(|_| rng.next() % 3 == 0)
                        .map(|j| format!("s{j}"))
                        .collect();
                    StepDefinition::new(format!("s{i}"), "dev", "").depends_on(deps)
                })
                .collect();
            // Shuffle authoring order.
            for i in (1..steps.len()).rev() {
                let j = (rng.next() as usize) % (i + 1);
                steps.swap(i, j);
            }

            let groups = resolve(&steps).unwrap();

            let mut seen = HashSet::new();
            let mut group_of = HashMap::new();
            for group in &groups {
                for s in &group.steps {
                    assert!(seen.insert(s.name.clone()), "{} appears twice", s.name);
                    group_of.insert(s.name.clone(), group.order);
                }
            }
            assert_eq!(seen.len(), n);

            for s in &steps {
                for dep in &s.depends_on {
                    assert!(group_of[dep] < group_of[&s.name]);
                }
            }
        }
    }
}
