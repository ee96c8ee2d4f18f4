//! Configuration schema for grammars and serialization passes.
//!
//! Grammar descriptions name classes and features by their abstract syntax names and are
//! checked against the meta-model when built into a [`Grammar`].

use std::path::Path;

use serde::{Deserialize, Serialize};
use sysml_model::{MetaClass, MetaFeature};
use tracing::debug;

use crate::automaton::{RuleAutomaton, SemState, StateId};
use crate::constraint::{Grammar, GrammarRule};
use crate::error::{AnalysisError, AnalysisResult, SerializerResult};
use crate::naming::DEFAULT_SEPARATOR;
use crate::snapshot::DEFAULT_IGNORED_FEATURES;

/// Serializable description of a grammar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrammarDescription {
    /// Name of the grammar.
    pub name: String,
    /// Rule definitions.
    #[serde(default)]
    pub rules: Vec<RuleDescription>,
}

/// Serializable description of one rule automaton.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDescription {
    pub name: String,
    /// Names of the classes the rule serializes.
    pub classes: Vec<String>,
    /// Index of the start state.
    #[serde(default)]
    pub start: usize,
    pub states: Vec<StateDescription>,
}

/// Serializable description of one automaton state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDescription {
    /// Name of the feature assigned in this state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature: Option<String>,
    /// Indices of the possible next states.
    #[serde(default)]
    pub followers: Vec<usize>,
}

impl StateDescription {
    pub fn untagged(followers: Vec<usize>) -> Self {
        Self {
            feature: None,
            followers,
        }
    }

    pub fn tagged(feature: impl Into<String>, followers: Vec<usize>) -> Self {
        Self {
            feature: Some(feature.into()),
            followers,
        }
    }
}

impl GrammarDescription {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rules: Vec::new(),
        }
    }

    pub fn add_rule(&mut self, rule: RuleDescription) {
        self.rules.push(rule);
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Read a JSON description from `path`.
    pub fn load(path: impl AsRef<Path>) -> SerializerResult<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        let description = Self::from_json(&json)?;
        debug!(
            path = %path.as_ref().display(),
            rules = description.rules.len(),
            "Loaded grammar description"
        );
        Ok(description)
    }

    /// Resolve names against the meta-model and build the grammar.
    pub fn build(&self) -> AnalysisResult<Grammar> {
        let rules = self
            .rules
            .iter()
            .map(RuleDescription::build)
            .collect::<AnalysisResult<Vec<_>>>()?;
        Ok(Grammar::new(self.name.clone(), rules))
    }
}

impl RuleDescription {
    fn build(&self) -> AnalysisResult<GrammarRule> {
        let classes = self
            .classes
            .iter()
            .map(|name| {
                MetaClass::from_name(name).ok_or_else(|| AnalysisError::UnknownClass {
                    rule: self.name.clone(),
                    class: name.clone(),
                })
            })
            .collect::<AnalysisResult<Vec<_>>>()?;
        let Some(first) = classes.first().copied() else {
            return Err(AnalysisError::NoClasses {
                rule: self.name.clone(),
            });
        };

        let mut states = Vec::with_capacity(self.states.len());
        for state in &self.states {
            let feature = match &state.feature {
                Some(name) => Some(self.feature_id(&classes, first, name)?),
                None => None,
            };
            states.push(SemState {
                feature,
                followers: state.followers.iter().copied().map(StateId).collect(),
            });
        }

        let automaton = RuleAutomaton::from_parts(self.name.clone(), StateId(self.start), states);
        Ok(GrammarRule::new(self.name.clone(), classes, automaton))
    }

    /// Class-local id of feature `name`, which must be the same in every class of the rule.
    fn feature_id(
        &self,
        classes: &[MetaClass],
        first: MetaClass,
        name: &str,
    ) -> AnalysisResult<usize> {
        let unknown = |class: MetaClass| AnalysisError::UnknownFeature {
            rule: self.name.clone(),
            class,
            feature: name.to_string(),
        };
        let feature: MetaFeature = first.feature_named(name).ok_or_else(|| unknown(first))?;
        let id = first.feature_id(feature).ok_or_else(|| unknown(first))?;
        for class in classes {
            if class.feature_id(feature) != Some(id) {
                return Err(unknown(*class));
            }
        }
        Ok(id)
    }
}

fn default_separator() -> String {
    DEFAULT_SEPARATOR.to_string()
}

fn default_true() -> bool {
    true
}

fn default_ignored_features() -> Vec<MetaFeature> {
    DEFAULT_IGNORED_FEATURES.to_vec()
}

/// Options of a serialization pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializerConfig {
    /// Separator between qualified name segments.
    #[serde(default = "default_separator")]
    pub name_separator: String,
    /// Print the original text of unresolved references when available.
    #[serde(default = "default_true")]
    pub reuse_source_tokens: bool,
    /// Fail when a feature holds more values than its rule can print.
    #[serde(default = "default_true")]
    pub enforce_bounds: bool,
    /// Features left out of round-trip snapshots.
    #[serde(default = "default_ignored_features")]
    pub ignored_snapshot_features: Vec<MetaFeature>,
}

impl Default for SerializerConfig {
    fn default() -> Self {
        Self {
            name_separator: default_separator(),
            reuse_source_tokens: true,
            enforce_bounds: true,
            ignored_snapshot_features: default_ignored_features(),
        }
    }
}

impl SerializerConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn load(path: impl AsRef<Path>) -> SerializerResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(Self::from_json(&json)?)
    }
}
