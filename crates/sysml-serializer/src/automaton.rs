//! Grammar rule automata.
//!
//! A rule automaton is the nondeterministic state graph a grammar rule induces for one
//! class: each state may carry the class-local id of the feature it assigns, and its
//! followers are the states that may come next. States live in an arena and edges are
//! indices, so cyclic automata need no shared ownership.

use std::fmt;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, AnalysisResult};

/// Index of a state within its [`RuleAutomaton`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateId(pub usize);

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// A state of a rule automaton.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemState {
    /// Class-local id of the feature assigned when this state is reached.
    pub feature: Option<usize>,
    /// Possible next states.
    pub followers: Vec<StateId>,
}

/// Immutable-after-construction state graph of one grammar rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleAutomaton {
    name: String,
    start: StateId,
    states: Vec<SemState>,
}

impl RuleAutomaton {
    /// Create an automaton with a single untagged start state.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start: StateId(0),
            states: vec![SemState::default()],
        }
    }

    /// Create an automaton from raw parts. Use [`RuleAutomaton::validate`] before analysis.
    pub fn from_parts(name: impl Into<String>, start: StateId, states: Vec<SemState>) -> Self {
        Self {
            name: name.into(),
            start,
            states,
        }
    }

    /// Rule name, used in diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start(&self) -> StateId {
        self.start
    }

    pub fn states(&self) -> &[SemState] {
        &self.states
    }

    pub fn state(&self, id: StateId) -> Option<&SemState> {
        self.states.get(id.0)
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    /// Add a state that assigns `feature` (or nothing).
    pub fn add_state(&mut self, feature: Option<usize>) -> StateId {
        self.states.push(SemState {
            feature,
            followers: Vec::new(),
        });
        StateId(self.states.len() - 1)
    }

    /// Add an edge `from -> to`. Dangling edges are reported by [`RuleAutomaton::validate`].
    pub fn add_follower(&mut self, from: StateId, to: StateId) {
        if let Some(state) = self.states.get_mut(from.0) {
            state.followers.push(to);
        }
    }

    /// Builder form of [`RuleAutomaton::add_follower`] for a chain of states.
    pub fn chain(mut self, path: &[StateId]) -> Self {
        for pair in path.windows(2) {
            self.add_follower(pair[0], pair[1]);
        }
        self
    }

    /// Check the structural preconditions of bound analysis.
    ///
    /// The start state and every follower must exist, every tag must be a feature id of
    /// the analysed class, and every tagged state must be reachable from the start.
    pub fn validate(&self, feature_count: usize) -> AnalysisResult<()> {
        if self.start.0 >= self.states.len() {
            return Err(AnalysisError::StartOutOfRange {
                rule: self.name.clone(),
                start: self.start,
                state_count: self.states.len(),
            });
        }

        for (index, state) in self.states.iter().enumerate() {
            if let Some(follower) = state
                .followers
                .iter()
                .find(|follower| follower.0 >= self.states.len())
            {
                return Err(AnalysisError::DanglingFollower {
                    rule: self.name.clone(),
                    state: StateId(index),
                    follower: *follower,
                });
            }
            if let Some(feature_id) = state.feature.filter(|id| *id >= feature_count) {
                return Err(AnalysisError::FeatureOutOfRange {
                    rule: self.name.clone(),
                    state: StateId(index),
                    feature_id,
                    feature_count,
                });
            }
        }

        let graph = self.to_graph();
        let mut reachable = vec![false; self.states.len()];
        let mut dfs = Dfs::new(&graph, NodeIndex::new(self.start.0));
        while let Some(node) = dfs.next(&graph) {
            reachable[node.index()] = true;
        }
        if let Some(index) = self
            .states
            .iter()
            .enumerate()
            .position(|(index, state)| state.feature.is_some() && !reachable[index])
        {
            return Err(AnalysisError::UnreachableState {
                rule: self.name.clone(),
                state: StateId(index),
            });
        }

        Ok(())
    }

    /// Follower relation as a petgraph graph; node `i` is state `i`.
    ///
    /// Callers must have validated the automaton, dangling followers are skipped.
    pub fn to_graph(&self) -> DiGraph<Option<usize>, ()> {
        let mut graph = DiGraph::with_capacity(self.states.len(), 0);
        for state in &self.states {
            graph.add_node(state.feature);
        }
        for (index, state) in self.states.iter().enumerate() {
            for follower in state.followers.iter().filter(|f| f.0 < self.states.len()) {
                graph.add_edge(NodeIndex::new(index), NodeIndex::new(follower.0), ());
            }
        }
        graph
    }
}
