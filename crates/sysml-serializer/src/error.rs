//! Error types for the serialization core.

use sysml_model::{MetaClass, MetaFeature, ModelError, ObjectId};
use thiserror::Error;

use crate::automaton::StateId;

/// Result type alias for grammar analysis.
pub type AnalysisResult<T> = Result<T, AnalysisError>;

/// Result type alias for cross-reference resolution.
pub type ResolutionResult<T> = Result<T, ResolutionError>;

/// Result type alias for snapshotting.
pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Result type alias for serialization passes.
pub type SerializerResult<T> = Result<T, SerializerError>;

/// Precondition violations found while analysing a grammar rule automaton.
///
/// These indicate a corrupted grammar or meta-model description and abort the analysis.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AnalysisError {
    /// The designated start state does not exist.
    #[error("rule {rule}: start state {start} is out of range ({state_count} states)")]
    StartOutOfRange {
        rule: String,
        start: StateId,
        state_count: usize,
    },

    /// A follower edge points at a state that does not exist.
    #[error("rule {rule}: state {state} has dangling follower {follower}")]
    DanglingFollower {
        rule: String,
        state: StateId,
        follower: StateId,
    },

    /// A state assigns a feature that cannot be reached from the start state.
    #[error("rule {rule}: tagged state {state} is unreachable from the start state")]
    UnreachableState { rule: String, state: StateId },

    /// A state tag is not a valid feature id for the analysed class.
    #[error(
        "rule {rule}: state {state} tags feature {feature_id}, class has {feature_count} features"
    )]
    FeatureOutOfRange {
        rule: String,
        state: StateId,
        feature_id: usize,
        feature_count: usize,
    },

    /// A grammar description names a class the meta-model does not have.
    #[error("rule {rule}: unknown class {class}")]
    UnknownClass { rule: String, class: String },

    /// A grammar description names a feature the class does not have.
    #[error("rule {rule}: class {class} has no feature {feature}")]
    UnknownFeature {
        rule: String,
        class: MetaClass,
        feature: String,
    },

    /// A rule declares no classes to serialize.
    #[error("rule {rule}: no classes declared")]
    NoClasses { rule: String },
}

/// Failure to produce a token for a single cross reference.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolutionError {
    /// The scope collaborator had no scope for the reference position.
    #[error("no scope found for {reference} of {source_object}")]
    NoScope {
        source_object: ObjectId,
        reference: MetaFeature,
    },

    /// The value handed to the resolver is an attribute value, not a reference.
    #[error("{reference} of {source_object} does not hold a reference value")]
    NotAReference {
        source_object: ObjectId,
        reference: MetaFeature,
    },

    /// An unresolved placeholder could not be bound against the scope.
    #[error("cannot resolve '{text}' for {reference} of {source_object}")]
    UnresolvedProxy {
        source_object: ObjectId,
        reference: MetaFeature,
        text: String,
    },

    /// The target has neither a usable qualified name nor an effective name.
    #[error("target {target} of {reference} of {source_object} has no effective name")]
    NoEffectiveName {
        source_object: ObjectId,
        reference: MetaFeature,
        target: ObjectId,
    },

    /// The only candidate name does not designate the target in the visible scope.
    #[error(
        "effective name '{name}' does not designate {target} for {reference} of {source_object}"
    )]
    NotValidInScope {
        source_object: ObjectId,
        reference: MetaFeature,
        target: ObjectId,
        name: String,
    },
}

/// Errors raised while capturing a round-trip snapshot.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SnapshotError {
    /// Many-valued attributes cannot be snapshotted.
    #[error("snapshotting many-valued attribute {feature} of {object} is not supported")]
    UnsupportedFeatureShape {
        object: ObjectId,
        feature: MetaFeature,
    },

    /// An object id in the tree does not exist in the model.
    #[error("object {0} is not part of the model")]
    UnknownObject(ObjectId),
}

/// Errors raised by a serialization pass.
#[derive(Debug, Error)]
pub enum SerializerError {
    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Model(#[from] ModelError),

    /// A feature carries more values than the grammar rule can print.
    #[error(
        "{feature} of {object} has {count} values but rule {constraint} accepts at most {bound}"
    )]
    BoundExceeded {
        object: ObjectId,
        feature: MetaFeature,
        constraint: String,
        count: usize,
        bound: u32,
    },

    /// The object to serialize does not exist.
    #[error("object {0} is not part of the model")]
    UnknownObject(ObjectId),

    /// Configuration could not be decoded.
    #[error("configuration error: {0}")]
    Config(#[from] serde_json::Error),

    /// I/O error (file operations).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
