//! Grammars and the process-wide cache of their feature bounds.
//!
//! Bound analysis runs once per grammar. Results are keyed by [`GrammarId`] and shared
//! read-only as `Arc<GrammarConstraints>`; a miss is populated under the map's entry lock
//! so concurrent passes never analyse the same grammar twice.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sysml_model::{MetaClass, MetaFeature};
use tracing::{debug, info};

use crate::automaton::RuleAutomaton;
use crate::bounds::{compute_bounds, Bound, FeatureBounds};
use crate::error::{AnalysisError, AnalysisResult};

static NEXT_GRAMMAR_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a grammar instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GrammarId(pub u64);

impl GrammarId {
    fn next() -> Self {
        GrammarId(NEXT_GRAMMAR_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for GrammarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "grammar#{}", self.0)
    }
}

/// A grammar rule and the classes it serializes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrammarRule {
    pub name: String,
    pub classes: Vec<MetaClass>,
    pub automaton: RuleAutomaton,
}

impl GrammarRule {
    pub fn new(name: impl Into<String>, classes: Vec<MetaClass>, automaton: RuleAutomaton) -> Self {
        Self {
            name: name.into(),
            classes,
            automaton,
        }
    }
}

/// An immutable set of grammar rules with a process-unique identity.
#[derive(Debug, Clone)]
pub struct Grammar {
    id: GrammarId,
    name: String,
    rules: Vec<GrammarRule>,
}

impl Grammar {
    pub fn new(name: impl Into<String>, rules: Vec<GrammarRule>) -> Self {
        Self {
            id: GrammarId::next(),
            name: name.into(),
            rules,
        }
    }

    pub fn id(&self) -> GrammarId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rules(&self) -> &[GrammarRule] {
        &self.rules
    }

    pub fn rule(&self, name: &str) -> Option<&GrammarRule> {
        self.rules.iter().find(|rule| rule.name == name)
    }
}

/// Feature bounds of one (rule, class) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    pub name: String,
    pub rule: String,
    pub class: MetaClass,
    pub bounds: FeatureBounds,
}

impl Constraint {
    /// Bound of `feature`, `None` when the class has no such feature.
    pub fn bound(&self, feature: MetaFeature) -> Option<Bound> {
        self.class
            .feature_id(feature)
            .and_then(|id| self.bounds.get(id))
    }

    /// Whether `feature` is rendered as a list.
    pub fn is_many(&self, feature: MetaFeature) -> bool {
        self.bound(feature).is_some_and(Bound::allows_many)
    }

    pub fn unbounded_features(&self) -> Vec<MetaFeature> {
        self.bounds
            .unbounded_features()
            .into_iter()
            .filter_map(|id| self.class.feature_at(id))
            .collect()
    }
}

fn constraint_name(rule: &str, class: MetaClass) -> String {
    if rule == class.name() {
        rule.to_string()
    } else {
        format!("{rule}_{class}")
    }
}

/// All constraints of a grammar.
#[derive(Debug, Clone)]
pub struct GrammarConstraints {
    grammar: GrammarId,
    constraints: Vec<Constraint>,
}

impl GrammarConstraints {
    /// Analyse every (rule, class) pair of `grammar`.
    pub fn analyse(grammar: &Grammar) -> AnalysisResult<Self> {
        let mut constraints = Vec::new();
        for rule in grammar.rules() {
            if rule.classes.is_empty() {
                return Err(AnalysisError::NoClasses {
                    rule: rule.name.clone(),
                });
            }
            for class in &rule.classes {
                let bounds = compute_bounds(&rule.automaton, class.feature_count())?;
                let constraint = Constraint {
                    name: constraint_name(&rule.name, *class),
                    rule: rule.name.clone(),
                    class: *class,
                    bounds,
                };
                debug!(
                    constraint = %constraint.name,
                    unbounded = ?constraint.unbounded_features(),
                    "Built constraint"
                );
                constraints.push(constraint);
            }
        }
        Ok(Self {
            grammar: grammar.id(),
            constraints,
        })
    }

    pub fn grammar(&self) -> GrammarId {
        self.grammar
    }

    pub fn get(&self, rule: &str, class: MetaClass) -> Option<&Constraint> {
        self.constraints
            .iter()
            .find(|constraint| constraint.rule == rule && constraint.class == class)
    }

    /// Constraints serializing exactly `class`, in rule order.
    pub fn for_class(&self, class: MetaClass) -> impl Iterator<Item = &Constraint> {
        self.constraints
            .iter()
            .filter(move |constraint| constraint.class == class)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints.iter()
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }
}

/// Cache of grammar constraints keyed by grammar identity.
#[derive(Debug, Default)]
pub struct ConstraintProvider {
    cache: DashMap<GrammarId, Arc<GrammarConstraints>>,
}

impl ConstraintProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide provider.
    pub fn global() -> &'static ConstraintProvider {
        static GLOBAL: OnceLock<ConstraintProvider> = OnceLock::new();
        GLOBAL.get_or_init(ConstraintProvider::new)
    }

    /// Constraints of `grammar`, analysing it on first use.
    pub fn constraints(&self, grammar: &Grammar) -> AnalysisResult<Arc<GrammarConstraints>> {
        match self.cache.entry(grammar.id()) {
            Entry::Occupied(entry) => {
                debug!(grammar = %grammar.id(), name = grammar.name(), "Constraint cache hit");
                Ok(Arc::clone(entry.get()))
            }
            Entry::Vacant(entry) => {
                let constraints = Arc::new(GrammarConstraints::analyse(grammar)?);
                info!(
                    grammar = %grammar.id(),
                    name = grammar.name(),
                    constraints = constraints.len(),
                    "Analysed grammar constraints"
                );
                entry.insert(Arc::clone(&constraints));
                Ok(constraints)
            }
        }
    }

    /// Whether `grammar` has been analysed.
    pub fn is_cached(&self, grammar: GrammarId) -> bool {
        self.cache.contains_key(&grammar)
    }

    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }
}
