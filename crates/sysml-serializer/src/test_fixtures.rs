//! Minimal fixtures for serializer testing.
//!
//! Provides in-memory models, grammars and automata, plus [`reparse`], which rebuilds a
//! model from sequencing events the way a parser and linker would.

use std::collections::HashMap;

use sysml_model::{MetaClass, MetaFeature, Model, ModelError, ModelResult, ObjectId, Value};

use crate::automaton::{RuleAutomaton, StateId};
use crate::config::{GrammarDescription, RuleDescription, StateDescription};
use crate::constraint::Grammar;
use crate::error::{AnalysisResult, ResolutionError, SerializerError, SerializerResult};
use crate::naming::QualifiedName;
use crate::scope::{ContainmentScopeProvider, ScopeProvider};
use crate::sequencer::SequenceEvent;

/// Builder for test models under an anonymous root namespace.
///
/// Schema violations do not interrupt building; the first one is returned by
/// [`ModelBuilder::build`].
pub struct ModelBuilder {
    model: Model,
    root: ObjectId,
    error: Option<ModelError>,
}

impl Default for ModelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelBuilder {
    /// Create a builder holding only the root namespace.
    pub fn new() -> Self {
        let mut model = Model::new();
        let root = model.create(MetaClass::Namespace);
        Self {
            model,
            root,
            error: None,
        }
    }

    pub fn root(&self) -> ObjectId {
        self.root
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    fn record(&mut self, result: ModelResult<()>) {
        if let Err(error) = result {
            self.error.get_or_insert(error);
        }
    }

    pub fn set(&mut self, owner: ObjectId, feature: MetaFeature, value: impl Into<Value>) {
        let result = self.model.set(owner, feature, value);
        self.record(result);
    }

    pub fn push(&mut self, owner: ObjectId, feature: MetaFeature, value: impl Into<Value>) {
        let result = self.model.push(owner, feature, value);
        self.record(result);
    }

    /// Add a `class` member to `namespace` through a new `membership`.
    pub fn member(
        &mut self,
        namespace: ObjectId,
        membership: MetaClass,
        class: MetaClass,
        name: Option<&str>,
    ) -> ObjectId {
        let member = self.model.create(class);
        if let Some(name) = name {
            self.set(member, MetaFeature::DeclaredName, name);
        }
        let relationship = self.model.create(membership);
        self.push(relationship, MetaFeature::OwnedRelatedElement, member);
        self.push(namespace, MetaFeature::OwnedRelationship, relationship);
        member
    }

    pub fn package(&mut self, owner: ObjectId, name: &str) -> ObjectId {
        self.member(owner, MetaClass::OwningMembership, MetaClass::Package, Some(name))
    }

    /// A classifier, the abstract syntax of `part def`.
    pub fn part_def(&mut self, owner: ObjectId, name: &str) -> ObjectId {
        self.member(owner, MetaClass::OwningMembership, MetaClass::Classifier, Some(name))
    }

    /// A feature owned through a feature membership.
    pub fn part(&mut self, owner: ObjectId, name: &str) -> ObjectId {
        self.member(owner, MetaClass::FeatureMembership, MetaClass::Feature, Some(name))
    }

    pub fn anonymous_part(&mut self, owner: ObjectId) -> ObjectId {
        self.member(owner, MetaClass::FeatureMembership, MetaClass::Feature, None)
    }

    /// Add an owned relationship of `class` to `owner`.
    pub fn relationship(&mut self, owner: ObjectId, class: MetaClass) -> ObjectId {
        let relationship = self.model.create(class);
        self.push(owner, MetaFeature::OwnedRelationship, relationship);
        relationship
    }

    pub fn typed_by(&mut self, feature: ObjectId, target: impl Into<Value>) -> ObjectId {
        let typing = self.relationship(feature, MetaClass::FeatureTyping);
        self.set(typing, MetaFeature::TypedFeature, feature);
        self.set(typing, MetaFeature::TypingType, target);
        typing
    }

    pub fn specializes(&mut self, specific: ObjectId, general: impl Into<Value>) -> ObjectId {
        let specialization = self.relationship(specific, MetaClass::Specialization);
        self.set(specialization, MetaFeature::General, general);
        specialization
    }

    pub fn subsets(&mut self, feature: ObjectId, target: impl Into<Value>) -> ObjectId {
        let subsetting = self.relationship(feature, MetaClass::Subsetting);
        self.set(subsetting, MetaFeature::SubsettingFeature, feature);
        self.set(subsetting, MetaFeature::SubsettedFeature, target);
        subsetting
    }

    pub fn redefines(&mut self, feature: ObjectId, target: impl Into<Value>) -> ObjectId {
        let redefinition = self.relationship(feature, MetaClass::Redefinition);
        self.set(redefinition, MetaFeature::RedefiningFeature, feature);
        self.set(redefinition, MetaFeature::RedefinedFeature, target);
        redefinition
    }

    /// Record the text a parser saw for a reference.
    pub fn source_token(
        &mut self,
        owner: ObjectId,
        feature: MetaFeature,
        index: usize,
        token: &str,
    ) {
        self.model.record_source_token(owner, feature, index, token);
    }

    /// Finish building, failing with the first schema violation.
    pub fn build(self) -> ModelResult<Model> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.model),
        }
    }
}

// ============================================================================
// Pre-built models
// ============================================================================

/// The vehicle example and the ids of its interesting elements.
pub struct VehicleModel {
    pub model: Model,
    pub root: ObjectId,
    pub package: ObjectId,
    pub engine: ObjectId,
    pub wheel: ObjectId,
    pub vehicle: ObjectId,
    pub car: ObjectId,
    pub vehicle_engine: ObjectId,
    pub vehicle_wheels: ObjectId,
    pub car_engine: ObjectId,
    pub car_spare: ObjectId,
}

/// Creates the vehicle example.
///
/// ```text
/// package Vehicles {
///     part def Engine;
///     part def Wheel;
///     abstract part def Vehicle {
///         part engine : Engine;
///         part wheels : Wheel;
///     }
///     part def Car :> Vehicle {
///         part redefines engine;
///         part spare :> wheels : Wheel;
///     }
/// }
/// ```
pub fn vehicle_model() -> ModelResult<VehicleModel> {
    let mut builder = ModelBuilder::new();
    let root = builder.root();
    let package = builder.package(root, "Vehicles");
    builder.set(package, MetaFeature::ElementId, "0b8f6c1e");

    let engine = builder.part_def(package, "Engine");
    let wheel = builder.part_def(package, "Wheel");

    let vehicle = builder.part_def(package, "Vehicle");
    builder.set(vehicle, MetaFeature::IsAbstract, true);
    let vehicle_engine = builder.part(vehicle, "engine");
    builder.typed_by(vehicle_engine, engine);
    let vehicle_wheels = builder.part(vehicle, "wheels");
    builder.typed_by(vehicle_wheels, wheel);

    let car = builder.part_def(package, "Car");
    builder.specializes(car, vehicle);
    let car_engine = builder.anonymous_part(car);
    builder.redefines(car_engine, vehicle_engine);
    let car_spare = builder.part(car, "spare");
    builder.subsets(car_spare, vehicle_wheels);
    builder.typed_by(car_spare, wheel);

    Ok(VehicleModel {
        model: builder.build()?,
        root,
        package,
        engine,
        wheel,
        vehicle,
        car,
        vehicle_engine,
        vehicle_wheels,
        car_engine,
        car_spare,
    })
}

// ============================================================================
// Grammars and automata
// ============================================================================

fn rule(name: &str, classes: &[&str], states: Vec<StateDescription>) -> RuleDescription {
    RuleDescription {
        name: name.to_string(),
        classes: classes.iter().map(|class| class.to_string()).collect(),
        start: 0,
        states,
    }
}

/// A grammar covering the constructs of [`vehicle_model`].
pub fn sample_grammar_description() -> GrammarDescription {
    use StateDescription as S;

    let mut description = GrammarDescription::new("VehicleSample");
    // Namespace: member*
    description.add_rule(rule(
        "Namespace",
        &["Namespace"],
        vec![S::untagged(vec![1]), S::tagged("ownedRelationship", vec![1])],
    ));
    // Package: 'package' name '{' member* '}'
    description.add_rule(rule(
        "Package",
        &["Package"],
        vec![
            S::untagged(vec![1]),
            S::tagged("declaredName", vec![2]),
            S::tagged("ownedRelationship", vec![2]),
        ],
    ));
    // Classifier: 'abstract'? 'part def' name specialization* '{' member* '}'
    description.add_rule(rule(
        "Classifier",
        &["Classifier"],
        vec![
            S::untagged(vec![1, 2]),
            S::tagged("isAbstract", vec![2]),
            S::tagged("declaredName", vec![3]),
            S::tagged("ownedRelationship", vec![3]),
        ],
    ));
    // Feature: 'part' name? specialization? typing?
    description.add_rule(rule(
        "Feature",
        &["Feature"],
        vec![
            S::untagged(vec![1, 2, 3]),
            S::tagged("declaredName", vec![2, 3]),
            S::tagged("ownedRelationship", vec![3]),
            S::tagged("ownedRelationship", Vec::new()),
        ],
    ));
    description.add_rule(rule(
        "OwningMembership",
        &["OwningMembership", "FeatureMembership"],
        vec![S::untagged(vec![1]), S::tagged("ownedRelatedElement", Vec::new())],
    ));
    description.add_rule(rule(
        "FeatureTyping",
        &["FeatureTyping"],
        vec![S::untagged(vec![1]), S::tagged("type", Vec::new())],
    ));
    description.add_rule(rule(
        "Specialization",
        &["Specialization"],
        vec![S::untagged(vec![1]), S::tagged("general", Vec::new())],
    ));
    description.add_rule(rule(
        "Subsetting",
        &["Subsetting"],
        vec![S::untagged(vec![1]), S::tagged("subsettedFeature", Vec::new())],
    ));
    description.add_rule(rule(
        "Redefinition",
        &["Redefinition"],
        vec![S::untagged(vec![1]), S::tagged("redefinedFeature", Vec::new())],
    ));
    description
}

pub fn sample_grammar() -> AnalysisResult<Grammar> {
    sample_grammar_description().build()
}

/// Feature 0 on a two-state cycle.
///
/// ```text
/// s0 -> s1[0] -> s2[0] -> s1
/// ```
pub fn two_cycle_automaton() -> RuleAutomaton {
    let mut automaton = RuleAutomaton::new("TwoCycle");
    let first = automaton.add_state(Some(0));
    let second = automaton.add_state(Some(0));
    automaton.chain(&[StateId(0), first, second, first])
}

/// Feature 0 assigned once before an untagged terminal.
///
/// ```text
/// s0 -> s1[0] -> s2
/// ```
pub fn linear_automaton() -> RuleAutomaton {
    let mut automaton = RuleAutomaton::new("Linear");
    let tagged = automaton.add_state(Some(0));
    let terminal = automaton.add_state(None);
    automaton.chain(&[StateId(0), tagged, terminal])
}

// ============================================================================
// Re-parsing
// ============================================================================

/// Rebuild a model from sequencing events, standing in for the parser and linker.
///
/// Reference tokens are linked against the containment scope once the whole tree exists,
/// and the values the serializer leaves out because the parser derives them
/// (typed, subsetting and redefining features) are filled in afterwards. Tokens are split
/// with [`QualifiedName::parse`], so quoted segments keep any separator they contain.
pub fn reparse(events: &[SequenceEvent], separator: &str) -> SerializerResult<(Model, ObjectId)> {
    let mut model = Model::new();
    let mut ids: HashMap<ObjectId, ObjectId> = HashMap::new();
    let mut open: Vec<ObjectId> = Vec::new();
    let mut root = None;
    let mut references = Vec::new();

    let lookup = |ids: &HashMap<ObjectId, ObjectId>, object: ObjectId| {
        ids.get(&object)
            .copied()
            .ok_or(SerializerError::UnknownObject(object))
    };

    for event in events {
        match event {
            SequenceEvent::Enter {
                object,
                class,
                feature,
                ..
            } => {
                let created = model.create(*class);
                ids.insert(*object, created);
                match (open.last(), feature) {
                    (Some(parent), Some(feature)) => {
                        assign(&mut model, *parent, *feature, Value::Object(created))?
                    }
                    _ => {
                        root.get_or_insert(created);
                    }
                }
                open.push(created);
            }
            SequenceEvent::Attribute {
                object, feature, value, ..
            } => {
                let owner = lookup(&ids, *object)?;
                assign(&mut model, owner, *feature, value.clone())?;
            }
            SequenceEvent::Reference {
                object, feature, token, ..
            } => {
                references.push((lookup(&ids, *object)?, *feature, token.clone()));
            }
            SequenceEvent::Exit { .. } => {
                open.pop();
            }
        }
    }

    let root = root.ok_or(SerializerError::UnknownObject(ObjectId(0)))?;
    let scopes: ContainmentScopeProvider = ContainmentScopeProvider::default();
    for (owner, feature, token) in references {
        let scope = scopes
            .scope_for(&model, owner, feature)
            .ok_or(ResolutionError::NoScope {
                source_object: owner,
                reference: feature,
            })?;
        let target = scope
            .single_element(&QualifiedName::parse(&token, separator))
            .ok_or(ResolutionError::UnresolvedProxy {
                source_object: owner,
                reference: feature,
                text: token,
            })?;
        assign(&mut model, owner, feature, Value::Object(target))?;
    }

    for relationship in model.containment_tree(root) {
        let Some(owner) = model.owning_related_element(relationship) else {
            continue;
        };
        let derived = match model.class_of(relationship) {
            Some(MetaClass::FeatureTyping) => MetaFeature::TypedFeature,
            Some(MetaClass::Redefinition) => MetaFeature::RedefiningFeature,
            Some(MetaClass::Subsetting) => MetaFeature::SubsettingFeature,
            _ => continue,
        };
        model.set(relationship, derived, owner)?;
    }

    Ok((model, root))
}

fn assign(
    model: &mut Model,
    owner: ObjectId,
    feature: MetaFeature,
    value: Value,
) -> ModelResult<()> {
    if feature.is_many() {
        model.push(owner, feature, value)
    } else {
        model.set(owner, feature, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_reports_first_violation() {
        let mut builder = ModelBuilder::new();
        let package = builder.package(builder.root(), "Vehicles");
        builder.set(package, MetaFeature::Operator, "+");
        builder.set(package, MetaFeature::Name, "derived");

        assert!(matches!(
            builder.build(),
            Err(ModelError::FeatureNotOnClass { feature: MetaFeature::Operator, .. })
        ));
    }

    #[test]
    fn test_vehicle_model_shape() {
        let vehicles = vehicle_model().unwrap();
        let model = &vehicles.model;

        assert_eq!(model.container(vehicles.root), None);
        assert_eq!(model.owning_namespace(vehicles.car), Some(vehicles.package));
        assert_eq!(model.effective_name(vehicles.car_engine).as_deref(), Some("engine"));
        assert_eq!(model.declared_name(vehicles.car_spare), Some("spare"));
        assert!(model.is_a(vehicles.engine, MetaClass::Classifier));
        assert_eq!(model.owning_namespace(vehicles.vehicle_wheels), Some(vehicles.vehicle));
    }

    #[test]
    fn test_sample_grammar_builds() {
        let grammar = sample_grammar().unwrap();
        assert_eq!(grammar.rules().len(), 9);
        assert!(grammar.rule("Feature").is_some());
    }

    #[test]
    fn test_reparse_rebuilds_containment() {
        let events = vec![
            SequenceEvent::Enter {
                object: ObjectId(10),
                class: MetaClass::Namespace,
                feature: None,
                constraint: None,
            },
            SequenceEvent::Enter {
                object: ObjectId(11),
                class: MetaClass::OwningMembership,
                feature: Some(MetaFeature::OwnedRelationship),
                constraint: None,
            },
            SequenceEvent::Enter {
                object: ObjectId(12),
                class: MetaClass::Package,
                feature: Some(MetaFeature::OwnedRelatedElement),
                constraint: None,
            },
            SequenceEvent::Attribute {
                object: ObjectId(12),
                feature: MetaFeature::DeclaredName,
                value: Value::from("Vehicles"),
                many: false,
            },
            SequenceEvent::Exit { object: ObjectId(12) },
            SequenceEvent::Exit { object: ObjectId(11) },
            SequenceEvent::Exit { object: ObjectId(10) },
        ];

        let (model, root) = reparse(&events, "::").unwrap();
        assert_eq!(model.len(), 3);
        let package = model.owned_member_element(model.owned_relationships(root)[0]).unwrap();
        assert_eq!(model.declared_name(package), Some("Vehicles"));
    }
}
