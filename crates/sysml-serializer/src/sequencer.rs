//! Sequencing driver.
//!
//! Walks a containment tree and turns every printable feature value into a
//! [`SequenceEvent`]: transient values are dropped, attribute values pass through,
//! cross references become tokens, and containment values are entered in turn. When the
//! grammar's constraints are known, value counts are checked against the feature bounds
//! and each event records whether the feature renders as a list.
//!
//! Per object the events are `Enter`, its attributes and references in feature order, the
//! subtrees of its contained objects in feature order, and `Exit`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sysml_model::{FeatureKind, MetaClass, MetaFeature, Model, ObjectId, Value};
use tracing::{debug, info};

use crate::config::SerializerConfig;
use crate::constraint::{Constraint, GrammarConstraints};
use crate::cross_ref::CrossReferenceResolver;
use crate::error::{SerializerError, SerializerResult};
use crate::naming::{EffectiveQualifiedNameProvider, QualifiedNameProvider};
use crate::scope::{ContainmentScopeProvider, ScopeProvider};
use crate::transient::{SysmlTransientPolicy, TransientPolicy};

/// One step of a serialized object tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SequenceEvent {
    /// Start of an object, contained in its parent through `feature`.
    Enter {
        object: ObjectId,
        class: MetaClass,
        feature: Option<MetaFeature>,
        constraint: Option<String>,
    },
    /// An attribute value.
    Attribute {
        object: ObjectId,
        feature: MetaFeature,
        value: Value,
        many: bool,
    },
    /// The token of a cross reference.
    Reference {
        object: ObjectId,
        feature: MetaFeature,
        index: usize,
        token: String,
        many: bool,
    },
    /// End of an object.
    Exit { object: ObjectId },
}

/// Receives the events of a sequencing pass.
pub trait SequenceAcceptor {
    fn accept(&mut self, event: SequenceEvent);
}

/// Collects events in order.
#[derive(Debug, Clone, Default)]
pub struct RecordingAcceptor {
    events: Vec<SequenceEvent>,
}

impl RecordingAcceptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[SequenceEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<SequenceEvent> {
        self.events
    }

    /// Reference tokens in emission order.
    pub fn tokens(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|event| match event {
                SequenceEvent::Reference { token, .. } => Some(token.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl SequenceAcceptor for RecordingAcceptor {
    fn accept(&mut self, event: SequenceEvent) {
        self.events.push(event);
    }
}

/// Logs every accepted event, for diagnosing what a pass prints.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAcceptor;

impl SequenceAcceptor for TracingAcceptor {
    fn accept(&mut self, event: SequenceEvent) {
        match event {
            SequenceEvent::Enter {
                object,
                class,
                feature,
                constraint,
            } => debug!(%object, %class, ?feature, ?constraint, "enter"),
            SequenceEvent::Attribute {
                object,
                feature,
                value,
                many,
            } => debug!(%object, %feature, ?value, many, "attribute"),
            SequenceEvent::Reference {
                object,
                feature,
                index,
                token,
                many,
            } => debug!(%object, %feature, index, %token, many, "reference"),
            SequenceEvent::Exit { object } => debug!(%object, "exit"),
        }
    }
}

/// Counts of a finished pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceStats {
    pub objects: usize,
    pub attributes: usize,
    pub references: usize,
    pub transient: usize,
}

enum Step {
    Visit {
        object: ObjectId,
        feature: Option<MetaFeature>,
    },
    Exit(ObjectId),
}

/// Drives transience, bound and cross-reference decisions over a containment tree.
pub struct Sequencer<
    T = SysmlTransientPolicy,
    S = ContainmentScopeProvider,
    Q = EffectiveQualifiedNameProvider,
> {
    transient: T,
    resolver: CrossReferenceResolver<S, Q>,
    constraints: Option<Arc<GrammarConstraints>>,
    config: SerializerConfig,
}

impl Sequencer {
    /// Sequencer with the SysML policies and the containment scope.
    pub fn from_config(config: SerializerConfig) -> Self {
        let resolver: CrossReferenceResolver = CrossReferenceResolver::default();
        Self::new(SysmlTransientPolicy::default(), resolver.with_config(&config), config)
    }
}

impl<T, S, Q> Sequencer<T, S, Q>
where
    T: TransientPolicy,
    S: ScopeProvider,
    Q: QualifiedNameProvider,
{
    pub fn new(
        transient: T,
        resolver: CrossReferenceResolver<S, Q>,
        config: SerializerConfig,
    ) -> Self {
        Self {
            transient,
            resolver,
            constraints: None,
            config,
        }
    }

    /// Check values against the bounds of `constraints`.
    pub fn with_constraints(mut self, constraints: Arc<GrammarConstraints>) -> Self {
        self.constraints = Some(constraints);
        self
    }

    pub fn config(&self) -> &SerializerConfig {
        &self.config
    }

    /// Constraint used for objects of `class`: the first rule serializing it.
    pub fn constraint_for(&self, class: MetaClass) -> Option<&Constraint> {
        self.constraints
            .as_deref()
            .and_then(|constraints| constraints.for_class(class).next())
    }

    /// Sequence the tree rooted at `root` into `acceptor`.
    ///
    /// On error the events already accepted are incomplete and should be discarded.
    pub fn sequence(
        &self,
        model: &Model,
        root: ObjectId,
        acceptor: &mut dyn SequenceAcceptor,
    ) -> SerializerResult<SequenceStats> {
        if model.get(root).is_none() {
            return Err(SerializerError::UnknownObject(root));
        }

        let mut stats = SequenceStats::default();
        let mut stack = vec![Step::Visit {
            object: root,
            feature: None,
        }];
        while let Some(step) = stack.pop() {
            match step {
                Step::Visit { object, feature } => {
                    let children = self.visit(model, object, feature, acceptor, &mut stats)?;
                    stack.push(Step::Exit(object));
                    stack.extend(
                        children
                            .into_iter()
                            .rev()
                            .map(|(feature, child)| Step::Visit {
                                object: child,
                                feature: Some(feature),
                            }),
                    );
                }
                Step::Exit(object) => acceptor.accept(SequenceEvent::Exit { object }),
            }
        }

        info!(
            %root,
            objects = stats.objects,
            attributes = stats.attributes,
            references = stats.references,
            transient = stats.transient,
            "Sequenced model"
        );
        Ok(stats)
    }

    /// Emit the events of one object and return the children to enter.
    fn visit(
        &self,
        model: &Model,
        object: ObjectId,
        containing: Option<MetaFeature>,
        acceptor: &mut dyn SequenceAcceptor,
        stats: &mut SequenceStats,
    ) -> SerializerResult<Vec<(MetaFeature, ObjectId)>> {
        let class = model
            .class_of(object)
            .ok_or(SerializerError::UnknownObject(object))?;
        let constraint = self.constraint_for(class);
        stats.objects += 1;
        acceptor.accept(SequenceEvent::Enter {
            object,
            class,
            feature: containing,
            constraint: constraint.map(|c| c.name.clone()),
        });

        let mut children = Vec::new();
        for feature in class.all_features() {
            if feature.is_derived() || feature.kind() == FeatureKind::Container {
                continue;
            }
            let values = model.values(object, feature);
            let printed = self.printed_indices(model, object, feature, values.len());
            stats.transient += values.len() - printed.len();
            if printed.is_empty() {
                continue;
            }

            let many = match constraint {
                Some(constraint) => {
                    self.check_bound(constraint, object, feature, printed.len())?;
                    constraint.is_many(feature)
                }
                None => feature.is_many(),
            };

            for index in printed {
                let value = &values[index];
                match feature.kind() {
                    FeatureKind::Attribute => {
                        stats.attributes += 1;
                        acceptor.accept(SequenceEvent::Attribute {
                            object,
                            feature,
                            value: value.clone(),
                            many,
                        });
                    }
                    FeatureKind::CrossReference => {
                        let token = self.resolver.resolve(model, object, feature, index, value)?;
                        stats.references += 1;
                        acceptor.accept(SequenceEvent::Reference {
                            object,
                            feature,
                            index,
                            token,
                            many,
                        });
                    }
                    FeatureKind::Containment => {
                        if let Some(child) = value.as_object() {
                            children.push((feature, child));
                        }
                    }
                    FeatureKind::Container => {}
                }
            }
        }
        Ok(children)
    }

    /// Indices of the values of `feature` that are printed.
    fn printed_indices(
        &self,
        model: &Model,
        object: ObjectId,
        feature: MetaFeature,
        count: usize,
    ) -> Vec<usize> {
        if self
            .transient
            .is_check_elements_individually(model, object, feature)
        {
            (0..count)
                .filter(|index| {
                    !self
                        .transient
                        .is_transient(model, object, feature, Some(*index))
                })
                .collect()
        } else if self.transient.is_transient(model, object, feature, None) {
            Vec::new()
        } else {
            (0..count).collect()
        }
    }

    fn check_bound(
        &self,
        constraint: &Constraint,
        object: ObjectId,
        feature: MetaFeature,
        count: usize,
    ) -> SerializerResult<()> {
        if !self.config.enforce_bounds {
            return Ok(());
        }
        match constraint.bound(feature) {
            Some(bound) if !bound.admits(count) => Err(SerializerError::BoundExceeded {
                object,
                feature,
                constraint: constraint.name.clone(),
                count,
                bound: bound.finite().unwrap_or(u32::MAX),
            }),
            _ => Ok(()),
        }
    }
}
