//! Model-to-text serialization core for SysML v2 models.
//!
//! This crate decides *what* of a model is printed and *how references are spelled*; the
//! concrete syntax itself is produced by a downstream formatter consuming the event stream.
//!
//! ## Core Concepts
//!
//! - **RuleAutomaton**: The states a grammar rule walks through, each optionally assigning a
//!   feature of the class being printed
//! - **Bound**: How often a rule can assign a feature, finite or unbounded
//! - **Constraint**: The bounds of one (rule, class) pair, cached per grammar
//! - **TransientPolicy**: Which feature values are reconstructed by the parser and must not
//!   be printed
//! - **CrossReferenceResolver**: The token naming a referenced element so that parsing it
//!   back resolves to the same element
//! - **Sequencer**: Walks a containment tree and emits [`SequenceEvent`]s
//! - **ModelSnapshot**: Identity-free view of a tree for round-trip comparison
//!
//! ## The Pipeline
//!
//! ```text
//! Grammar ──analyse──▶ GrammarConstraints ─┐
//!                                          ▼
//! Model ──▶ Sequencer ─(transient? / bound? / resolve)─▶ SequenceAcceptor
//! ```
//!
//! A pass either completes or fails with a [`SerializerError`]; events already accepted by
//! a failed pass are incomplete.

pub mod automaton;
pub mod bounds;
pub mod config;
pub mod constraint;
pub mod cross_ref;
mod error;
pub mod naming;
pub mod scope;
pub mod sequencer;
pub mod snapshot;
#[cfg(any(test, feature = "test-fixtures"))]
pub mod test_fixtures;
pub mod transient;

pub use automaton::{RuleAutomaton, SemState, StateId};
pub use bounds::{compute_bounds, Bound, FeatureBounds};
pub use error::{
    AnalysisError, AnalysisResult, ResolutionError, ResolutionResult, SerializerError,
    SerializerResult, SnapshotError, SnapshotResult,
};

// Grammars and constraints
pub use constraint::{
    Constraint, ConstraintProvider, Grammar, GrammarConstraints, GrammarId, GrammarRule,
};

// Configuration
pub use config::{GrammarDescription, RuleDescription, SerializerConfig, StateDescription};

// Naming and scoping
pub use cross_ref::{designates, CrossReferenceResolver};
pub use naming::{
    EffectiveQualifiedNameProvider, QualifiedName, QualifiedNameProvider, DEFAULT_SEPARATOR,
};
pub use scope::{ContainmentScopeProvider, MapScope, Scope, ScopeProvider};

// Transience
pub use transient::{
    categorize, DefaultTransientPolicy, ExpressionShape, FeatureCategory, SysmlTransientPolicy,
    TransientPolicy,
};

// Sequencing and round-trip checks
pub use sequencer::{
    RecordingAcceptor, SequenceAcceptor, SequenceEvent, SequenceStats, Sequencer, TracingAcceptor,
};
pub use snapshot::{ModelSnapshot, NumberedObject, ObjectSnapshot, SnapshotDiff};
