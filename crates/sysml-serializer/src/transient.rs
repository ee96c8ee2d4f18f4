//! Transient value classification.
//!
//! A value is transient when the textual notation must not print it because the parser or
//! linker reconstructs it from other state. The decision is a pure predicate over the
//! current graph: each (owner, feature, index) is first mapped to a [`FeatureCategory`]
//! carrying exactly the context its rule needs, and the category is then decided by an
//! exhaustive match. Categories without a special rule defer to a baseline policy.

use sysml_model::{FeatureKind, MetaClass, MetaFeature, Model, ObjectId};

/// Decides which feature values are omitted from the textual rendering.
pub trait TransientPolicy {
    /// Whether the value of `feature` at `index` (or the whole feature, for `None`) is
    /// omitted.
    fn is_transient(
        &self,
        model: &Model,
        owner: ObjectId,
        feature: MetaFeature,
        index: Option<usize>,
    ) -> bool;

    /// Whether the elements of a many-valued feature must be decided one by one.
    fn is_check_elements_individually(
        &self,
        model: &Model,
        owner: ObjectId,
        feature: MetaFeature,
    ) -> bool;
}

/// Baseline policy for ordinary features: derived features, container back-pointers and
/// unset values are transient, everything else is printed.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTransientPolicy;

impl TransientPolicy for DefaultTransientPolicy {
    fn is_transient(
        &self,
        model: &Model,
        owner: ObjectId,
        feature: MetaFeature,
        index: Option<usize>,
    ) -> bool {
        let descriptor = feature.descriptor();
        if descriptor.derived || descriptor.kind == FeatureKind::Container {
            return true;
        }
        let count = model.value_count(owner, feature);
        match index {
            Some(index) => index >= count,
            None => count == 0,
        }
    }

    fn is_check_elements_individually(
        &self,
        _model: &Model,
        _owner: ObjectId,
        _feature: MetaFeature,
    ) -> bool {
        false
    }
}

/// Operators whose expressions print their result parameter explicitly.
const RESULT_PRINTING_OPERATORS: [&str; 3] = ["all", "as", "meta"];

/// Features set implicitly by the parser or by derivation.
const ALWAYS_DERIVED: [MetaFeature; 6] = [
    MetaFeature::ElementId,
    MetaFeature::AliasIds,
    MetaFeature::IsComposite,
    MetaFeature::TypedFeature,
    MetaFeature::SubsettingFeature,
    MetaFeature::RedefiningFeature,
];

/// Relationship targets that coincide with an owned related element when one exists.
const OWNING_RELATIONSHIP_TARGETS: [MetaFeature; 3] = [
    MetaFeature::ConjugatedType,
    MetaFeature::OriginalPortDefinition,
    MetaFeature::ReferencedFeature,
];

/// Shape of an expression owning a result or parameter membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpressionShape<'m> {
    /// Operator expression with its operator, if set.
    Operator(Option<&'m str>),
    /// Feature reference expression with its number of owned memberships.
    FeatureReference { owned_memberships: usize },
    /// Invocation expression that is not an operator expression.
    Invocation,
    /// Any other expression.
    Other,
}

/// Classification of one (owner, feature, index) with the context its rule needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureCategory<'m> {
    /// Always reconstructed from other state.
    AlwaysDerived,
    /// Direction of a feature; implied by parameter memberships, or by a redefinition on an
    /// item flow end.
    Direction {
        owning_membership: Option<MetaClass>,
        redefining_item_flow_end: bool,
    },
    /// End flag of a feature; implied by an end feature membership.
    IsEnd { end_membership: bool },
    /// A result parameter membership of an expression.
    ExpressionResult { shape: ExpressionShape<'m> },
    /// An input parameter membership of an invocation.
    InvocationInput,
    /// An owning membership, transient when everything it owns is.
    OwningMembership { membership: ObjectId },
    /// A multiplicity placeholder inserted where no range was written.
    ImplicitMultiplicity,
    /// Operands of invocation expressions are always printed.
    Operand,
    /// A target that is printed as the owned related element when there is one.
    OwningRelationshipTarget { has_owned_related_element: bool },
    /// No special rule.
    Ordinary,
}

/// Map a feature value to its category.
pub fn categorize<'m>(
    model: &'m Model,
    owner: ObjectId,
    feature: MetaFeature,
    index: Option<usize>,
) -> FeatureCategory<'m> {
    if ALWAYS_DERIVED.contains(&feature) {
        return FeatureCategory::AlwaysDerived;
    }
    if OWNING_RELATIONSHIP_TARGETS.contains(&feature) {
        return FeatureCategory::OwningRelationshipTarget {
            has_owned_related_element: !model.owned_related_elements(owner).is_empty(),
        };
    }

    match feature {
        MetaFeature::Direction => {
            let owning_membership = model.owning_feature_membership(owner);
            let redefining_item_flow_end = owning_membership
                .and_then(|membership| model.owning_type(membership))
                .is_some_and(|owning_type| model.is_a(owning_type, MetaClass::ItemFlowEnd))
                && model
                    .owned_redefinitions(owner)
                    .first()
                    .is_some_and(|redefinition| model.has_redefined_feature(*redefinition));
            FeatureCategory::Direction {
                owning_membership: owning_membership.and_then(|m| model.class_of(m)),
                redefining_item_flow_end,
            }
        }
        MetaFeature::IsEnd => FeatureCategory::IsEnd {
            end_membership: model
                .owning_membership(owner)
                .is_some_and(|membership| model.is_a(membership, MetaClass::EndFeatureMembership)),
        },
        MetaFeature::OwnedRelationship => {
            let Some(relationship) =
                index.and_then(|i| model.owned_relationships(owner).get(i).copied())
            else {
                return FeatureCategory::Ordinary;
            };
            categorize_owned_relationship(model, owner, relationship)
        }
        MetaFeature::OwnedRelatedElement => {
            let element = index.and_then(|i| model.owned_related_elements(owner).get(i).copied());
            let placeholder = element.is_some_and(|element| {
                model.is_a(element, MetaClass::Multiplicity)
                    && !model.is_a(element, MetaClass::MultiplicityRange)
            });
            if placeholder {
                FeatureCategory::ImplicitMultiplicity
            } else {
                FeatureCategory::Ordinary
            }
        }
        MetaFeature::Operand => FeatureCategory::Operand,
        _ => FeatureCategory::Ordinary,
    }
}

fn categorize_owned_relationship(
    model: &Model,
    owner: ObjectId,
    relationship: ObjectId,
) -> FeatureCategory<'_> {
    if model.is_a(owner, MetaClass::Expression)
        && model.is_a(relationship, MetaClass::ReturnParameterMembership)
    {
        let shape = if model.is_a(owner, MetaClass::OperatorExpression) {
            ExpressionShape::Operator(model.operator(owner))
        } else if model.is_a(owner, MetaClass::FeatureReferenceExpression) {
            ExpressionShape::FeatureReference {
                owned_memberships: model.owned_memberships(owner).len(),
            }
        } else if model.is_a(owner, MetaClass::InvocationExpression) {
            ExpressionShape::Invocation
        } else {
            ExpressionShape::Other
        };
        return FeatureCategory::ExpressionResult { shape };
    }

    if model.is_a(owner, MetaClass::InvocationExpression)
        && model.is_a(relationship, MetaClass::ParameterMembership)
        && model
            .owned_member_feature(relationship)
            .is_some_and(|parameter| model.is_input_parameter(parameter))
    {
        return FeatureCategory::InvocationInput;
    }

    if model.is_a(relationship, MetaClass::OwningMembership) {
        return FeatureCategory::OwningMembership {
            membership: relationship,
        };
    }

    FeatureCategory::Ordinary
}

/// Transience rules of the SysML textual notation on top of a baseline policy.
#[derive(Debug, Clone, Default)]
pub struct SysmlTransientPolicy<P = DefaultTransientPolicy> {
    baseline: P,
}

impl<P: TransientPolicy> SysmlTransientPolicy<P> {
    pub fn new(baseline: P) -> Self {
        Self { baseline }
    }

    /// Decision for a category, `None` when the baseline decides.
    fn decide(&self, model: &Model, category: FeatureCategory<'_>) -> Option<bool> {
        match category {
            FeatureCategory::AlwaysDerived => Some(true),
            FeatureCategory::Direction {
                owning_membership,
                redefining_item_flow_end,
            } => {
                let parameter = owning_membership
                    .is_some_and(|class| class.is_a(MetaClass::ParameterMembership));
                (parameter || redefining_item_flow_end).then_some(true)
            }
            FeatureCategory::IsEnd { end_membership } => Some(end_membership),
            FeatureCategory::ExpressionResult { shape } => Some(match shape {
                ExpressionShape::Operator(operator) => {
                    !operator.is_some_and(|op| RESULT_PRINTING_OPERATORS.contains(&op))
                }
                ExpressionShape::FeatureReference { owned_memberships } => owned_memberships != 1,
                ExpressionShape::Invocation | ExpressionShape::Other => true,
            }),
            FeatureCategory::InvocationInput => Some(true),
            FeatureCategory::OwningMembership { membership } => {
                Some(self.is_all_transient(model, membership, MetaFeature::OwnedRelatedElement))
            }
            FeatureCategory::ImplicitMultiplicity => Some(true),
            FeatureCategory::Operand => Some(false),
            FeatureCategory::OwningRelationshipTarget {
                has_owned_related_element,
            } => Some(has_owned_related_element),
            FeatureCategory::Ordinary => None,
        }
    }

    /// Whether every value of `feature` on `owner` is transient.
    fn is_all_transient(&self, model: &Model, owner: ObjectId, feature: MetaFeature) -> bool {
        if !feature.is_many() {
            return self.is_transient(model, owner, feature, None);
        }
        (0..model.value_count(owner, feature))
            .all(|i| self.is_transient(model, owner, feature, Some(i)))
    }
}

impl<P: TransientPolicy> TransientPolicy for SysmlTransientPolicy<P> {
    fn is_transient(
        &self,
        model: &Model,
        owner: ObjectId,
        feature: MetaFeature,
        index: Option<usize>,
    ) -> bool {
        let category = categorize(model, owner, feature, index);
        self.decide(model, category)
            .unwrap_or_else(|| self.baseline.is_transient(model, owner, feature, index))
    }

    fn is_check_elements_individually(
        &self,
        model: &Model,
        owner: ObjectId,
        feature: MetaFeature,
    ) -> bool {
        matches!(feature, MetaFeature::OwnedRelationship | MetaFeature::OwnedRelatedElement)
            || self.baseline.is_check_elements_individually(model, owner, feature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sysml_model::FeatureDirection;

    fn policy() -> SysmlTransientPolicy {
        SysmlTransientPolicy::default()
    }

    /// `owner` owns `member` through a new membership of `class`.
    fn own(model: &mut Model, owner: ObjectId, class: MetaClass, member: ObjectId) -> ObjectId {
        let membership = model.create(class);
        model.push(membership, MetaFeature::OwnedRelatedElement, member).unwrap();
        model.push(owner, MetaFeature::OwnedRelationship, membership).unwrap();
        membership
    }

    fn directed_feature(model: &mut Model, direction: FeatureDirection) -> ObjectId {
        let feature = model.create(MetaClass::Feature);
        model.set(feature, MetaFeature::Direction, direction).unwrap();
        feature
    }

    #[test]
    fn test_always_derived_features() {
        let mut model = Model::new();
        let feature = model.create(MetaClass::Feature);
        model.set(feature, MetaFeature::ElementId, "4f1c").unwrap();
        model.set(feature, MetaFeature::IsComposite, true).unwrap();

        assert!(policy().is_transient(&model, feature, MetaFeature::ElementId, None));
        assert!(policy().is_transient(&model, feature, MetaFeature::IsComposite, None));
        assert_eq!(
            categorize(&model, feature, MetaFeature::AliasIds, None),
            FeatureCategory::AlwaysDerived
        );
    }

    #[test]
    fn test_direction_implied_by_parameter_membership() {
        let mut model = Model::new();
        let function = model.create(MetaClass::Classifier);
        let input = directed_feature(&mut model, FeatureDirection::In);
        own(&mut model, function, MetaClass::ParameterMembership, input);
        let result = directed_feature(&mut model, FeatureDirection::Out);
        own(&mut model, function, MetaClass::ReturnParameterMembership, result);
        let plain = directed_feature(&mut model, FeatureDirection::In);
        own(&mut model, function, MetaClass::FeatureMembership, plain);

        assert!(policy().is_transient(&model, input, MetaFeature::Direction, None));
        assert!(policy().is_transient(&model, result, MetaFeature::Direction, None));
        assert!(!policy().is_transient(&model, plain, MetaFeature::Direction, None));
    }

    #[test]
    fn test_direction_implied_by_item_flow_end_redefinition() {
        let mut model = Model::new();
        let end = model.create(MetaClass::ItemFlowEnd);
        let target = model.create(MetaClass::Feature);
        let flow_feature = directed_feature(&mut model, FeatureDirection::Out);
        own(&mut model, end, MetaClass::FeatureMembership, flow_feature);

        assert!(!policy().is_transient(&model, flow_feature, MetaFeature::Direction, None));

        let redefinition = model.create(MetaClass::Redefinition);
        model.set(redefinition, MetaFeature::RedefinedFeature, target).unwrap();
        model.push(flow_feature, MetaFeature::OwnedRelationship, redefinition).unwrap();

        assert!(policy().is_transient(&model, flow_feature, MetaFeature::Direction, None));
    }

    #[test]
    fn test_is_end_follows_owning_membership() {
        let mut model = Model::new();
        let connector = model.create(MetaClass::Classifier);
        let end = model.create(MetaClass::Feature);
        model.set(end, MetaFeature::IsEnd, true).unwrap();
        own(&mut model, connector, MetaClass::EndFeatureMembership, end);
        let other = model.create(MetaClass::Feature);
        model.set(other, MetaFeature::IsEnd, true).unwrap();
        own(&mut model, connector, MetaClass::FeatureMembership, other);

        assert!(policy().is_transient(&model, end, MetaFeature::IsEnd, None));
        assert!(!policy().is_transient(&model, other, MetaFeature::IsEnd, None));
    }

    #[test]
    fn test_operator_expression_result() {
        let mut model = Model::new();
        let plus = model.create(MetaClass::OperatorExpression);
        model.set(plus, MetaFeature::Operator, "+").unwrap();
        let result = model.create(MetaClass::Feature);
        own(&mut model, plus, MetaClass::ReturnParameterMembership, result);

        let cast = model.create(MetaClass::OperatorExpression);
        model.set(cast, MetaFeature::Operator, "as").unwrap();
        let cast_result = model.create(MetaClass::Feature);
        own(&mut model, cast, MetaClass::ReturnParameterMembership, cast_result);

        assert!(policy().is_transient(&model, plus, MetaFeature::OwnedRelationship, Some(0)));
        assert!(!policy().is_transient(&model, cast, MetaFeature::OwnedRelationship, Some(0)));
    }

    #[test]
    fn test_feature_reference_expression_result() {
        let mut model = Model::new();
        let reference = model.create(MetaClass::FeatureReferenceExpression);
        let result = model.create(MetaClass::Feature);
        own(&mut model, reference, MetaClass::ReturnParameterMembership, result);

        // The result membership is the only owned membership.
        assert!(!policy().is_transient(&model, reference, MetaFeature::OwnedRelationship, Some(0)));

        let referent = model.create(MetaClass::Feature);
        let membership = model.create(MetaClass::Membership);
        model.set(membership, MetaFeature::MemberElement, referent).unwrap();
        model.push(reference, MetaFeature::OwnedRelationship, membership).unwrap();

        assert!(policy().is_transient(&model, reference, MetaFeature::OwnedRelationship, Some(0)));
    }

    #[test]
    fn test_invocation_input_parameters() {
        let mut model = Model::new();
        let call = model.create(MetaClass::InvocationExpression);
        let argument = directed_feature(&mut model, FeatureDirection::In);
        own(&mut model, call, MetaClass::ParameterMembership, argument);
        let output = directed_feature(&mut model, FeatureDirection::Out);
        own(&mut model, call, MetaClass::ParameterMembership, output);

        assert!(policy().is_transient(&model, call, MetaFeature::OwnedRelationship, Some(0)));
        assert!(!policy().is_transient(&model, call, MetaFeature::OwnedRelationship, Some(1)));
        assert!(!policy().is_transient(&model, call, MetaFeature::Operand, None));
    }

    #[test]
    fn test_implicit_multiplicity_wrapper_is_transient() {
        let mut model = Model::new();
        let feature = model.create(MetaClass::Feature);
        let implicit = model.create(MetaClass::Multiplicity);
        own(&mut model, feature, MetaClass::OwningMembership, implicit);
        let range = model.create(MetaClass::MultiplicityRange);
        own(&mut model, feature, MetaClass::OwningMembership, range);

        let wrapper = model.owned_relationships(feature)[0];
        assert!(policy().is_transient(&model, wrapper, MetaFeature::OwnedRelatedElement, Some(0)));
        assert!(policy().is_transient(&model, feature, MetaFeature::OwnedRelationship, Some(0)));
        assert!(!policy().is_transient(&model, feature, MetaFeature::OwnedRelationship, Some(1)));
    }

    #[test]
    fn test_owning_relationship_targets() {
        let mut model = Model::new();
        let conjugation = model.create(MetaClass::PortConjugation);
        let original = model.create(MetaClass::Classifier);
        model
            .set(conjugation, MetaFeature::OriginalPortDefinition, original)
            .unwrap();

        let original = MetaFeature::OriginalPortDefinition;
        assert!(!policy().is_transient(&model, conjugation, original, None));

        let owned = model.create(MetaClass::Classifier);
        model
            .push(conjugation, MetaFeature::OwnedRelatedElement, owned)
            .unwrap();
        let original = MetaFeature::OriginalPortDefinition;
        assert!(policy().is_transient(&model, conjugation, original, None));
    }

    #[test]
    fn test_ordinary_features_use_baseline() {
        let mut model = Model::new();
        let package = model.create(MetaClass::Package);

        assert!(policy().is_transient(&model, package, MetaFeature::DeclaredName, None));
        model.set(package, MetaFeature::DeclaredName, "Vehicles").unwrap();
        assert!(!policy().is_transient(&model, package, MetaFeature::DeclaredName, None));
        assert!(policy().is_transient(&model, package, MetaFeature::QualifiedName, None));
        assert!(policy().is_transient(&model, package, MetaFeature::OwningRelationship, None));
    }

    #[test]
    fn test_check_elements_individually() {
        let mut model = Model::new();
        let package = model.create(MetaClass::Package);
        let policy = policy();

        for feature in [MetaFeature::OwnedRelationship, MetaFeature::OwnedRelatedElement] {
            assert!(policy.is_check_elements_individually(&model, package, feature));
        }
        assert!(!policy.is_check_elements_individually(&model, package, MetaFeature::AliasIds));
    }

    #[test]
    fn test_decisions_do_not_depend_on_call_order() {
        let mut model = Model::new();
        let call = model.create(MetaClass::InvocationExpression);
        let argument = directed_feature(&mut model, FeatureDirection::In);
        own(&mut model, call, MetaClass::ParameterMembership, argument);
        let policy = policy();

        let first = policy.is_transient(&model, argument, MetaFeature::Direction, None);
        let _ = policy.is_transient(&model, call, MetaFeature::OwnedRelationship, Some(0));
        let _ = policy.is_transient(&model, argument, MetaFeature::IsEnd, None);
        assert_eq!(policy.is_transient(&model, argument, MetaFeature::Direction, None), first);
    }
}
