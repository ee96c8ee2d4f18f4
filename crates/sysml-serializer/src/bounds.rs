//! Upper bounds on feature multiplicity from rule automata.
//!
//! A feature assigned by a state inside a cycle can repeat arbitrarily often. Every other
//! feature is bounded by the largest number of states tagged with it on any path from the
//! start state. Cycles are found with Tarjan's algorithm over the follower relation; each
//! non-trivial strongly connected component then acts as a single node, which makes the
//! remaining graph a DAG and the longest path computable in linear time.
//!
//! Tarjan's walk runs on an explicit stack of (state, follower cursor) frames and yields
//! components in reverse topological order, so the longest-path table is filled sink-first
//! in one sweep and no step recurses along automaton paths.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::automaton::RuleAutomaton;
use crate::error::AnalysisResult;

/// Upper bound on how many times a feature can be assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Bound {
    Finite(u32),
    Unbounded,
}

impl Bound {
    pub const ZERO: Bound = Bound::Finite(0);

    pub fn is_unbounded(self) -> bool {
        matches!(self, Bound::Unbounded)
    }

    /// The finite value, if any.
    pub fn finite(self) -> Option<u32> {
        match self {
            Bound::Finite(n) => Some(n),
            Bound::Unbounded => None,
        }
    }

    /// Whether the feature needs many-valued rendering.
    pub fn allows_many(self) -> bool {
        self > Bound::Finite(1)
    }

    /// Whether `count` values fit within the bound.
    pub fn admits(self, count: usize) -> bool {
        match self {
            Bound::Finite(n) => count <= n as usize,
            Bound::Unbounded => true,
        }
    }

    fn saturating_add(self, n: u32) -> Bound {
        match self {
            Bound::Finite(m) => m.checked_add(n).map_or(Bound::Unbounded, Bound::Finite),
            Bound::Unbounded => Bound::Unbounded,
        }
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bound::Finite(n) => write!(f, "{n}"),
            Bound::Unbounded => f.write_str("*"),
        }
    }
}

/// Bound per class-local feature id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureBounds {
    bounds: Vec<Bound>,
}

impl FeatureBounds {
    pub fn get(&self, feature_id: usize) -> Option<Bound> {
        self.bounds.get(feature_id).copied()
    }

    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, Bound)> + '_ {
        self.bounds.iter().copied().enumerate()
    }

    /// Feature ids that can repeat without limit.
    pub fn unbounded_features(&self) -> Vec<usize> {
        self.iter()
            .filter(|(_, bound)| bound.is_unbounded())
            .map(|(id, _)| id)
            .collect()
    }
}

/// Strongly connected components of an automaton, in reverse topological order.
struct Components {
    /// Components as state indices.
    members: Vec<Vec<usize>>,
    /// Index into `members` for states of non-trivial components.
    component_of: Vec<Option<usize>>,
}

impl Components {
    fn of(automaton: &RuleAutomaton) -> Self {
        let members = strongly_connected(automaton);

        let mut component_of = vec![None; automaton.state_count()];
        for (index, component) in members.iter().enumerate() {
            // Singletons are trivial even with a self-loop; the longest-path sweep handles those.
            if component.len() >= 2 {
                for state in component {
                    component_of[*state] = Some(index);
                }
            }
        }

        Self {
            members,
            component_of,
        }
    }

    fn non_trivial(&self) -> impl Iterator<Item = &Vec<usize>> {
        self.members.iter().filter(|component| component.len() >= 2)
    }
}

/// Tarjan's algorithm over the state arena with an explicit call stack.
///
/// Components are emitted in reverse topological order of the condensation.
fn strongly_connected(automaton: &RuleAutomaton) -> Vec<Vec<usize>> {
    const UNVISITED: usize = usize::MAX;

    let states = automaton.states();
    let count = states.len();
    let mut index = vec![UNVISITED; count];
    let mut lowlink = vec![0; count];
    let mut on_stack = vec![false; count];
    let mut stack = Vec::new();
    let mut frames: Vec<(usize, usize)> = Vec::new();
    let mut next_index = 0;
    let mut components = Vec::new();

    for root in 0..count {
        if index[root] != UNVISITED {
            continue;
        }
        index[root] = next_index;
        lowlink[root] = next_index;
        next_index += 1;
        stack.push(root);
        on_stack[root] = true;
        frames.push((root, 0));

        while let Some(&(state, cursor)) = frames.last() {
            if let Some(follower) = states[state].followers.get(cursor) {
                if let Some(frame) = frames.last_mut() {
                    frame.1 += 1;
                }
                let follower = follower.0;
                if follower >= count {
                    continue;
                }
                if index[follower] == UNVISITED {
                    index[follower] = next_index;
                    lowlink[follower] = next_index;
                    next_index += 1;
                    stack.push(follower);
                    on_stack[follower] = true;
                    frames.push((follower, 0));
                } else if on_stack[follower] {
                    lowlink[state] = lowlink[state].min(index[follower]);
                }
                continue;
            }

            frames.pop();
            if let Some(&(parent, _)) = frames.last() {
                lowlink[parent] = lowlink[parent].min(lowlink[state]);
            }
            if lowlink[state] == index[state] {
                let mut component = Vec::new();
                while let Some(member) = stack.pop() {
                    on_stack[member] = false;
                    component.push(member);
                    if member == state {
                        break;
                    }
                }
                components.push(component);
            }
        }
    }
    components
}

/// Compute an upper bound for each of the `feature_count` features of the class a rule
/// automaton serializes.
///
/// The result never under-counts: no path through the automaton assigns a feature more
/// often than its bound.
pub fn compute_bounds(
    automaton: &RuleAutomaton,
    feature_count: usize,
) -> AnalysisResult<FeatureBounds> {
    automaton.validate(feature_count)?;
    let components = Components::of(automaton);

    let mut bounds = vec![Bound::ZERO; feature_count];
    for component in components.non_trivial() {
        for state in component {
            if let Some(feature_id) = automaton.states()[*state].feature {
                bounds[feature_id] = Bound::Unbounded;
            }
        }
    }

    for (feature_id, bound) in bounds.iter_mut().enumerate() {
        if !bound.is_unbounded() {
            *bound = longest_path(automaton, &components, feature_id);
        }
    }

    let bounds = FeatureBounds { bounds };
    debug!(
        rule = automaton.name(),
        states = automaton.state_count(),
        components = components.non_trivial().count(),
        unbounded = ?bounds.unbounded_features(),
        "Computed feature bounds"
    );
    Ok(bounds)
}

/// Largest number of states tagged with `feature_id` on a path from the start state, with
/// each non-trivial component collapsed to one node.
fn longest_path(automaton: &RuleAutomaton, components: &Components, feature_id: usize) -> Bound {
    let states = automaton.states();
    let mut distance = vec![Bound::ZERO; states.len()];

    for (index, component) in components.members.iter().enumerate() {
        if component.len() >= 2 {
            // Only escape edges count: the loop itself is not taken for a feature outside it.
            let best = component
                .iter()
                .flat_map(|state| states[*state].followers.iter())
                .filter(|follower| components.component_of[follower.0] != Some(index))
                .map(|follower| distance[follower.0])
                .max()
                .unwrap_or(Bound::ZERO);
            for state in component {
                distance[*state] = best;
            }
        } else {
            let state = component[0];
            let tagged = states[state].feature == Some(feature_id);
            let mut best = Bound::ZERO;
            for follower in &states[state].followers {
                if follower.0 == state {
                    if tagged {
                        best = Bound::Unbounded;
                    }
                } else {
                    best = best.max(distance[follower.0]);
                }
            }
            distance[state] = best.saturating_add(u32::from(tagged));
        }
    }

    distance[automaton.start().0]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automaton::StateId;
    use crate::error::AnalysisError;

    const NAME: usize = 0;
    const OTHER: usize = 1;

    #[test]
    fn test_two_cycle_is_unbounded() {
        // S0 -> S1(name) -> S2(name) -> S1
        let mut automaton = RuleAutomaton::new("Cycle");
        let s1 = automaton.add_state(Some(NAME));
        let s2 = automaton.add_state(Some(NAME));
        let automaton = automaton.chain(&[StateId(0), s1, s2, s1]);

        let bounds = compute_bounds(&automaton, 1).unwrap();
        assert_eq!(bounds.get(NAME), Some(Bound::Unbounded));
    }

    #[test]
    fn test_linear_path_is_one() {
        // S0 -> S1(name) -> S2
        let mut automaton = RuleAutomaton::new("Linear");
        let s1 = automaton.add_state(Some(NAME));
        let s2 = automaton.add_state(None);
        let automaton = automaton.chain(&[StateId(0), s1, s2]);

        let bounds = compute_bounds(&automaton, 1).unwrap();
        assert_eq!(bounds.get(NAME), Some(Bound::Finite(1)));
    }

    #[test]
    fn test_tagged_terminal_state_is_counted() {
        let mut automaton = RuleAutomaton::new("Tail");
        let s1 = automaton.add_state(Some(NAME));
        let s2 = automaton.add_state(Some(NAME));
        let automaton = automaton.chain(&[StateId(0), s1, s2]);

        let bounds = compute_bounds(&automaton, 1).unwrap();
        assert_eq!(bounds.get(NAME), Some(Bound::Finite(2)));
    }

    #[test]
    fn test_longest_branch_wins() {
        // S0 -> A(name) -> stop
        // S0 -> B(name) -> C(name) -> stop
        let mut automaton = RuleAutomaton::new("Branch");
        let a = automaton.add_state(Some(NAME));
        let b = automaton.add_state(Some(NAME));
        let c = automaton.add_state(Some(NAME));
        let stop = automaton.add_state(None);
        let automaton = automaton
            .chain(&[StateId(0), a, stop])
            .chain(&[StateId(0), b, c, stop]);

        let bounds = compute_bounds(&automaton, 1).unwrap();
        assert_eq!(bounds.get(NAME), Some(Bound::Finite(2)));
    }

    #[test]
    fn test_tagged_self_loop_is_unbounded() {
        let mut automaton = RuleAutomaton::new("SelfLoop");
        let s1 = automaton.add_state(Some(NAME));
        let stop = automaton.add_state(None);
        let automaton = automaton.chain(&[StateId(0), s1, s1, stop]);

        let bounds = compute_bounds(&automaton, 1).unwrap();
        assert_eq!(bounds.get(NAME), Some(Bound::Unbounded));
    }

    #[test]
    fn test_untagged_self_loop_does_not_affect_other_features() {
        // S0 -> S1(other, self-loop) -> S2(name) -> stop
        let mut automaton = RuleAutomaton::new("SelfLoopOther");
        let s1 = automaton.add_state(Some(OTHER));
        let s2 = automaton.add_state(Some(NAME));
        let stop = automaton.add_state(None);
        let automaton = automaton.chain(&[StateId(0), s1, s1, s2, stop]);

        let bounds = compute_bounds(&automaton, 2).unwrap();
        assert_eq!(bounds.get(NAME), Some(Bound::Finite(1)));
        assert_eq!(bounds.get(OTHER), Some(Bound::Unbounded));
    }

    #[test]
    fn test_component_escape_edges_carry_bounds() {
        // S0 -> A(other) <-> B(other) -> C(name) -> D(name) -> stop
        //                       B -> stop
        let mut automaton = RuleAutomaton::new("Escape");
        let a = automaton.add_state(Some(OTHER));
        let b = automaton.add_state(Some(OTHER));
        let c = automaton.add_state(Some(NAME));
        let d = automaton.add_state(Some(NAME));
        let stop = automaton.add_state(None);
        let automaton = automaton
            .chain(&[StateId(0), a, b, a])
            .chain(&[b, c, d, stop])
            .chain(&[b, stop]);

        let bounds = compute_bounds(&automaton, 2).unwrap();
        assert_eq!(bounds.get(OTHER), Some(Bound::Unbounded));
        assert_eq!(bounds.get(NAME), Some(Bound::Finite(2)));
        assert_eq!(bounds.unbounded_features(), vec![OTHER]);
    }

    #[test]
    fn test_name_before_cycle_counts_once() {
        // S0 -> N(name) -> A <-> B -> stop
        let mut automaton = RuleAutomaton::new("Prefix");
        let n = automaton.add_state(Some(NAME));
        let a = automaton.add_state(None);
        let b = automaton.add_state(None);
        let stop = automaton.add_state(None);
        let automaton = automaton.chain(&[StateId(0), n, a, b, a]).chain(&[b, stop]);

        let bounds = compute_bounds(&automaton, 1).unwrap();
        assert_eq!(bounds.get(NAME), Some(Bound::Finite(1)));
    }

    #[test]
    fn test_unassigned_feature_is_zero() {
        let automaton = RuleAutomaton::new("Empty");
        let bounds = compute_bounds(&automaton, 3).unwrap();
        assert_eq!(bounds.len(), 3);
        assert!(bounds.iter().all(|(_, bound)| bound == Bound::ZERO));
    }

    #[test]
    fn test_long_shared_path_does_not_overflow() {
        let mut automaton = RuleAutomaton::new("Deep");
        let mut previous = automaton.start();
        for i in 0..200_000 {
            let feature = if i % 2 == 0 { Some(NAME) } else { None };
            let next = automaton.add_state(feature);
            automaton.add_follower(previous, next);
            previous = next;
        }

        let bounds = compute_bounds(&automaton, 1).unwrap();
        assert_eq!(bounds.get(NAME), Some(Bound::Finite(100_000)));
    }

    #[test]
    fn test_long_cycle_is_one_component() {
        let mut automaton = RuleAutomaton::new("DeepCycle");
        let first = automaton.add_state(Some(NAME));
        let mut previous = first;
        for _ in 0..200_000 {
            let next = automaton.add_state(None);
            automaton.add_follower(previous, next);
            previous = next;
        }
        let start = automaton.start();
        automaton.add_follower(start, first);
        automaton.add_follower(previous, first);
        let exit = automaton.add_state(Some(OTHER));
        automaton.add_follower(previous, exit);

        let bounds = compute_bounds(&automaton, 2).unwrap();
        assert_eq!(bounds.get(NAME), Some(Bound::Unbounded));
        assert_eq!(bounds.get(OTHER), Some(Bound::Finite(1)));
    }

    #[test]
    fn test_malformed_automaton_is_rejected() {
        let mut automaton = RuleAutomaton::new("Dangling");
        automaton.add_follower(StateId(0), StateId(3));

        assert!(matches!(
            compute_bounds(&automaton, 1),
            Err(AnalysisError::DanglingFollower { .. })
        ));
    }

    #[test]
    fn test_bound_ordering_and_display() {
        assert!(Bound::Finite(3) < Bound::Unbounded);
        assert!(Bound::Finite(2).allows_many());
        assert!(!Bound::Finite(1).allows_many());
        assert!(Bound::Finite(1).admits(1));
        assert!(!Bound::Finite(1).admits(2));
        assert_eq!(Bound::Unbounded.to_string(), "*");
        assert_eq!(Bound::Finite(u32::MAX).saturating_add(1), Bound::Unbounded);
    }
}
