//! Dependency graph analysis over resolved rollback targets.
//!
//! Pure functions: the graph is built once from the resolved versions'
//! declared dependencies, then queried for cycles, orphans, and the
//! order in which policies must be rolled back.

use std::collections::{BTreeMap, BTreeSet};

use covenant_core::{PolicyId, PolicyVersion};

/// Directed graph of `depends_on` edges declared in policy content.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    edges: BTreeMap<PolicyId, Vec<PolicyId>>,
}

impl DependencyGraph {
    /// Build the graph from the resolved target versions. Every policy in
    /// scope gets a node even when it declares no dependencies.
    pub fn build(versions: &[PolicyVersion]) -> Self {
        let mut edges: BTreeMap<PolicyId, Vec<PolicyId>> = BTreeMap::new();
        for version in versions {
            let deps = version
                .declared_dependencies()
                .into_iter()
                .map(|d| d.depends_on)
                .collect();
            edges.insert(version.policy_id.clone(), deps);
        }
        Self { edges }
    }

    pub fn dependencies_of(&self, policy: &PolicyId) -> &[PolicyId] {
        self.edges.get(policy).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// All distinct cycles, each reported once as its minimal path
    /// (rotated to start at the smallest policy id). DFS with a visiting
    /// set: an edge back into the current stack closes a cycle.
    pub fn find_cycles(&self) -> Vec<Vec<PolicyId>> {
        let mut visited: BTreeSet<PolicyId> = BTreeSet::new();
        let mut cycles: Vec<Vec<PolicyId>> = Vec::new();
        let mut seen_cycles: BTreeSet<Vec<PolicyId>> = BTreeSet::new();

        for start in self.edges.keys() {
            if visited.contains(start) {
                continue;
            }
            let mut stack: Vec<PolicyId> = Vec::new();
            self.dfs(start, &mut stack, &mut visited, &mut |cycle: &[PolicyId]| {
                let normalized = normalize_cycle(cycle);
                if seen_cycles.insert(normalized.clone()) {
                    cycles.push(normalized);
                }
            });
        }
        cycles
    }

    fn dfs(
        &self,
        node: &PolicyId,
        stack: &mut Vec<PolicyId>,
        visited: &mut BTreeSet<PolicyId>,
        on_cycle: &mut impl FnMut(&[PolicyId]),
    ) {
        if let Some(pos) = stack.iter().position(|p| p == node) {
            on_cycle(&stack[pos..]);
            return;
        }
        if visited.contains(node) {
            return;
        }
        stack.push(node.clone());
        for dep in self.dependencies_of(node).to_vec() {
            // edges may point outside the graph; those cannot cycle back
            if self.edges.contains_key(&dep) {
                self.dfs(&dep, stack, visited, on_cycle);
            }
        }
        stack.pop();
        visited.insert(node.clone());
    }

    /// Policies referenced by an in-scope dependency edge but not part of
    /// the rollback scope themselves.
    pub fn orphans(&self, scope: &[PolicyId]) -> Vec<PolicyId> {
        let in_scope: BTreeSet<&PolicyId> = scope.iter().collect();
        let mut orphaned: BTreeSet<PolicyId> = BTreeSet::new();
        for policy in scope {
            for dep in self.dependencies_of(policy) {
                if !in_scope.contains(dep) {
                    orphaned.insert(dep.clone());
                }
            }
        }
        orphaned.into_iter().collect()
    }

    /// Order in which in-scope policies must be rolled back: a policy is
    /// only rolled back once everything that depends on it has been. With
    /// cycles present, the remaining members are appended in scope order.
    pub fn rollback_order(&self, scope: &[PolicyId]) -> Vec<PolicyId> {
        let in_scope: BTreeSet<&PolicyId> = scope.iter().collect();
        let mut ordered: Vec<PolicyId> = Vec::new();
        let mut placed: BTreeSet<PolicyId> = BTreeSet::new();

        loop {
            let mut progressed = false;
            for policy in scope {
                if placed.contains(policy) {
                    continue;
                }
                let blocked = scope.iter().any(|other| {
                    other != policy
                        && !placed.contains(other)
                        && in_scope.contains(other)
                        && self.dependencies_of(other).contains(policy)
                });
                if !blocked {
                    ordered.push(policy.clone());
                    placed.insert(policy.clone());
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }
        // cycle members never unblock; keep them in declared scope order
        for policy in scope {
            if !placed.contains(policy) {
                ordered.push(policy.clone());
            }
        }
        ordered
    }
}

/// Rotate a cycle path so the smallest id comes first, making equal
/// cycles discovered from different entry points compare equal.
fn normalize_cycle(cycle: &[PolicyId]) -> Vec<PolicyId> {
    if cycle.is_empty() {
        return Vec::new();
    }
    let min_pos = cycle
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.cmp(b))
        .map(|(i, _)| i)
        .unwrap_or(0);
    let mut rotated = Vec::with_capacity(cycle.len());
    rotated.extend_from_slice(&cycle[min_pos..]);
    rotated.extend_from_slice(&cycle[..min_pos]);
    rotated
}
