//! Meta-model schema and in-memory object graph shared across the serializer workspace.
//!
//! The schema is a fixed, read-only slice of the KerML/SysML abstract syntax: a closed set
//! of [`MetaClass`]es with single inheritance and a closed set of [`MetaFeature`]s declared
//! on them. Object graphs ([`Model`]) are arenas of [`ModelObject`]s addressed by
//! [`ObjectId`], so containment and cross references are plain indices rather than
//! pointer cycles.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Meta-model Classes
// =============================================================================

/// Classes of the meta-model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MetaClass {
    Element,
    Namespace,
    Package,
    Type,
    Classifier,
    Feature,
    Expression,
    InvocationExpression,
    OperatorExpression,
    FeatureReferenceExpression,
    ItemFlowEnd,
    Multiplicity,
    MultiplicityRange,
    Relationship,
    Membership,
    OwningMembership,
    FeatureMembership,
    ParameterMembership,
    ReturnParameterMembership,
    EndFeatureMembership,
    Specialization,
    FeatureTyping,
    Subsetting,
    ReferenceSubsetting,
    Redefinition,
    Conjugation,
    PortConjugation,
}

impl MetaClass {
    /// Every class, in declaration order.
    pub const ALL: [MetaClass; 27] = [
        MetaClass::Element,
        MetaClass::Namespace,
        MetaClass::Package,
        MetaClass::Type,
        MetaClass::Classifier,
        MetaClass::Feature,
        MetaClass::Expression,
        MetaClass::InvocationExpression,
        MetaClass::OperatorExpression,
        MetaClass::FeatureReferenceExpression,
        MetaClass::ItemFlowEnd,
        MetaClass::Multiplicity,
        MetaClass::MultiplicityRange,
        MetaClass::Relationship,
        MetaClass::Membership,
        MetaClass::OwningMembership,
        MetaClass::FeatureMembership,
        MetaClass::ParameterMembership,
        MetaClass::ReturnParameterMembership,
        MetaClass::EndFeatureMembership,
        MetaClass::Specialization,
        MetaClass::FeatureTyping,
        MetaClass::Subsetting,
        MetaClass::ReferenceSubsetting,
        MetaClass::Redefinition,
        MetaClass::Conjugation,
        MetaClass::PortConjugation,
    ];

    /// Direct supertype, `None` for the root class.
    pub const fn supertype(self) -> Option<MetaClass> {
        use MetaClass::*;
        match self {
            Element => None,
            Namespace | Relationship => Some(Element),
            Package | Type => Some(Namespace),
            Classifier | Feature => Some(Type),
            Expression | ItemFlowEnd | Multiplicity => Some(Feature),
            InvocationExpression | FeatureReferenceExpression => Some(Expression),
            OperatorExpression => Some(InvocationExpression),
            MultiplicityRange => Some(Multiplicity),
            Membership | Specialization | Conjugation => Some(Relationship),
            OwningMembership => Some(Membership),
            FeatureMembership => Some(OwningMembership),
            ParameterMembership | EndFeatureMembership => Some(FeatureMembership),
            ReturnParameterMembership => Some(ParameterMembership),
            FeatureTyping | Subsetting => Some(Specialization),
            ReferenceSubsetting | Redefinition => Some(Subsetting),
            PortConjugation => Some(Conjugation),
        }
    }

    /// Returns true if `self` is `other` or one of its subclasses.
    pub fn is_a(self, other: MetaClass) -> bool {
        let mut current = Some(self);
        while let Some(class) = current {
            if class == other {
                return true;
            }
            current = class.supertype();
        }
        false
    }

    /// Class name as it appears in the abstract syntax.
    pub fn name(self) -> &'static str {
        use MetaClass::*;
        match self {
            Element => "Element",
            Namespace => "Namespace",
            Package => "Package",
            Type => "Type",
            Classifier => "Classifier",
            Feature => "Feature",
            Expression => "Expression",
            InvocationExpression => "InvocationExpression",
            OperatorExpression => "OperatorExpression",
            FeatureReferenceExpression => "FeatureReferenceExpression",
            ItemFlowEnd => "ItemFlowEnd",
            Multiplicity => "Multiplicity",
            MultiplicityRange => "MultiplicityRange",
            Relationship => "Relationship",
            Membership => "Membership",
            OwningMembership => "OwningMembership",
            FeatureMembership => "FeatureMembership",
            ParameterMembership => "ParameterMembership",
            ReturnParameterMembership => "ReturnParameterMembership",
            EndFeatureMembership => "EndFeatureMembership",
            Specialization => "Specialization",
            FeatureTyping => "FeatureTyping",
            Subsetting => "Subsetting",
            ReferenceSubsetting => "ReferenceSubsetting",
            Redefinition => "Redefinition",
            Conjugation => "Conjugation",
            PortConjugation => "PortConjugation",
        }
    }

    /// Look up a class by its abstract syntax name.
    pub fn from_name(name: &str) -> Option<MetaClass> {
        Self::ALL.into_iter().find(|class| class.name() == name)
    }

    /// All structural features of the class, inherited ones first.
    ///
    /// The position of a feature in this list is its class-local feature id, which is
    /// what grammar rule automata tag their states with.
    pub fn all_features(self) -> Vec<MetaFeature> {
        let mut lineage = Vec::new();
        let mut current = Some(self);
        while let Some(class) = current {
            lineage.push(class);
            current = class.supertype();
        }
        lineage
            .into_iter()
            .rev()
            .flat_map(|class| {
                MetaFeature::ALL
                    .into_iter()
                    .filter(move |feature| feature.descriptor().declared_by == class)
            })
            .collect()
    }

    /// Number of structural features, including inherited ones.
    pub fn feature_count(self) -> usize {
        self.all_features().len()
    }

    /// Class-local id of `feature`, if the class has it.
    pub fn feature_id(self, feature: MetaFeature) -> Option<usize> {
        self.all_features().iter().position(|f| *f == feature)
    }

    /// Feature with the given class-local id.
    pub fn feature_at(self, id: usize) -> Option<MetaFeature> {
        self.all_features().get(id).copied()
    }

    /// Find a feature of this class by name.
    pub fn feature_named(self, name: &str) -> Option<MetaFeature> {
        self.all_features()
            .into_iter()
            .find(|feature| feature.name() == name)
    }

    /// Whether instances of this class carry `feature`.
    pub fn has_feature(self, feature: MetaFeature) -> bool {
        self.is_a(feature.descriptor().declared_by)
    }
}

impl fmt::Display for MetaClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Meta-model Features
// =============================================================================

/// How a structural feature stores its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeatureKind {
    /// Primitive value.
    Attribute,
    /// Owned child objects.
    Containment,
    /// Link to an object owned elsewhere.
    CrossReference,
    /// Back-pointer to the owning object (opposite of a containment).
    Container,
}

impl FeatureKind {
    /// Whether values of this kind are objects rather than primitives.
    pub fn is_reference(self) -> bool {
        !matches!(self, FeatureKind::Attribute)
    }
}

/// Static description of a structural feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureDescriptor {
    /// Abstract syntax name.
    pub name: &'static str,
    /// Class that declares the feature.
    pub declared_by: MetaClass,
    /// Storage kind.
    pub kind: FeatureKind,
    /// Many-valued features hold ordered lists.
    pub many: bool,
    /// Derived features are computed from other state and never stored.
    pub derived: bool,
}

/// Structural features of the meta-model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MetaFeature {
    // Element
    ElementId,
    AliasIds,
    DeclaredShortName,
    DeclaredName,
    OwnedRelationship,
    OwningRelationship,
    Name,
    QualifiedName,
    // Namespace
    Member,
    OwnedMember,
    // Type
    IsAbstract,
    // Feature
    Direction,
    IsComposite,
    IsEnd,
    IsOrdered,
    OwningType,
    OwningFeatureMembership,
    OwnedRedefinition,
    // InvocationExpression
    Operand,
    // OperatorExpression
    Operator,
    // Relationship
    OwnedRelatedElement,
    OwningRelatedElement,
    Source,
    Target,
    // Membership
    MemberElement,
    MemberElementId,
    MemberName,
    // OwningMembership
    OwnedMemberElementId,
    OwnedMemberElement,
    // Specialization
    General,
    Specific,
    // FeatureTyping
    TypedFeature,
    TypingType,
    // Subsetting
    SubsettedFeature,
    SubsettingFeature,
    // ReferenceSubsetting
    ReferencedFeature,
    // Redefinition
    RedefinedFeature,
    RedefiningFeature,
    // Conjugation
    OriginalType,
    ConjugatedType,
    // PortConjugation
    OriginalPortDefinition,
}

impl MetaFeature {
    /// Every feature, in declaration order.
    pub const ALL: [MetaFeature; 41] = [
        MetaFeature::ElementId,
        MetaFeature::AliasIds,
        MetaFeature::DeclaredShortName,
        MetaFeature::DeclaredName,
        MetaFeature::OwnedRelationship,
        MetaFeature::OwningRelationship,
        MetaFeature::Name,
        MetaFeature::QualifiedName,
        MetaFeature::Member,
        MetaFeature::OwnedMember,
        MetaFeature::IsAbstract,
        MetaFeature::Direction,
        MetaFeature::IsComposite,
        MetaFeature::IsEnd,
        MetaFeature::IsOrdered,
        MetaFeature::OwningType,
        MetaFeature::OwningFeatureMembership,
        MetaFeature::OwnedRedefinition,
        MetaFeature::Operand,
        MetaFeature::Operator,
        MetaFeature::OwnedRelatedElement,
        MetaFeature::OwningRelatedElement,
        MetaFeature::Source,
        MetaFeature::Target,
        MetaFeature::MemberElement,
        MetaFeature::MemberElementId,
        MetaFeature::MemberName,
        MetaFeature::OwnedMemberElementId,
        MetaFeature::OwnedMemberElement,
        MetaFeature::General,
        MetaFeature::Specific,
        MetaFeature::TypedFeature,
        MetaFeature::TypingType,
        MetaFeature::SubsettedFeature,
        MetaFeature::SubsettingFeature,
        MetaFeature::ReferencedFeature,
        MetaFeature::RedefinedFeature,
        MetaFeature::RedefiningFeature,
        MetaFeature::OriginalType,
        MetaFeature::ConjugatedType,
        MetaFeature::OriginalPortDefinition,
    ];

    /// Static description of the feature.
    pub const fn descriptor(self) -> FeatureDescriptor {
        use FeatureKind::*;
        use MetaFeature as F;

        const fn d(
            name: &'static str,
            declared_by: MetaClass,
            kind: FeatureKind,
            many: bool,
            derived: bool,
        ) -> FeatureDescriptor {
            FeatureDescriptor {
                name,
                declared_by,
                kind,
                many,
                derived,
            }
        }

        match self {
            F::ElementId => d("elementId", MetaClass::Element, Attribute, false, false),
            F::AliasIds => d("aliasIds", MetaClass::Element, Attribute, true, false),
            F::DeclaredShortName => {
                d("declaredShortName", MetaClass::Element, Attribute, false, false)
            }
            F::DeclaredName => d("declaredName", MetaClass::Element, Attribute, false, false),
            F::OwnedRelationship => {
                d("ownedRelationship", MetaClass::Element, Containment, true, false)
            }
            F::OwningRelationship => {
                d("owningRelationship", MetaClass::Element, Container, false, false)
            }
            F::Name => d("name", MetaClass::Element, Attribute, false, true),
            F::QualifiedName => d("qualifiedName", MetaClass::Element, Attribute, false, true),
            F::Member => d("member", MetaClass::Namespace, CrossReference, true, true),
            F::OwnedMember => d("ownedMember", MetaClass::Namespace, CrossReference, true, true),
            F::IsAbstract => d("isAbstract", MetaClass::Type, Attribute, false, false),
            F::Direction => d("direction", MetaClass::Feature, Attribute, false, false),
            F::IsComposite => d("isComposite", MetaClass::Feature, Attribute, false, false),
            F::IsEnd => d("isEnd", MetaClass::Feature, Attribute, false, false),
            F::IsOrdered => d("isOrdered", MetaClass::Feature, Attribute, false, false),
            F::OwningType => d("owningType", MetaClass::Feature, CrossReference, false, true),
            F::OwningFeatureMembership => {
                d("owningFeatureMembership", MetaClass::Feature, CrossReference, false, true)
            }
            F::OwnedRedefinition => {
                d("ownedRedefinition", MetaClass::Feature, CrossReference, true, true)
            }
            F::Operand => d("operand", MetaClass::InvocationExpression, Containment, true, false),
            F::Operator => d("operator", MetaClass::OperatorExpression, Attribute, false, false),
            F::OwnedRelatedElement => {
                d("ownedRelatedElement", MetaClass::Relationship, Containment, true, false)
            }
            F::OwningRelatedElement => {
                d("owningRelatedElement", MetaClass::Relationship, Container, false, false)
            }
            F::Source => d("source", MetaClass::Relationship, CrossReference, true, true),
            F::Target => d("target", MetaClass::Relationship, CrossReference, true, true),
            F::MemberElement => {
                d("memberElement", MetaClass::Membership, CrossReference, false, false)
            }
            F::MemberElementId => {
                d("memberElementId", MetaClass::Membership, Attribute, false, false)
            }
            F::MemberName => d("memberName", MetaClass::Membership, Attribute, false, false),
            F::OwnedMemberElementId => {
                d("ownedMemberElementId", MetaClass::OwningMembership, Attribute, false, false)
            }
            F::OwnedMemberElement => {
                d("ownedMemberElement", MetaClass::OwningMembership, CrossReference, false, true)
            }
            F::General => d("general", MetaClass::Specialization, CrossReference, false, false),
            F::Specific => d("specific", MetaClass::Specialization, CrossReference, false, true),
            F::TypedFeature => {
                d("typedFeature", MetaClass::FeatureTyping, CrossReference, false, false)
            }
            F::TypingType => d("type", MetaClass::FeatureTyping, CrossReference, false, false),
            F::SubsettedFeature => {
                d("subsettedFeature", MetaClass::Subsetting, CrossReference, false, false)
            }
            F::SubsettingFeature => {
                d("subsettingFeature", MetaClass::Subsetting, CrossReference, false, false)
            }
            F::ReferencedFeature => {
                d("referencedFeature", MetaClass::ReferenceSubsetting, CrossReference, false, false)
            }
            F::RedefinedFeature => {
                d("redefinedFeature", MetaClass::Redefinition, CrossReference, false, false)
            }
            F::RedefiningFeature => {
                d("redefiningFeature", MetaClass::Redefinition, CrossReference, false, false)
            }
            F::OriginalType => {
                d("originalType", MetaClass::Conjugation, CrossReference, false, false)
            }
            F::ConjugatedType => {
                d("conjugatedType", MetaClass::Conjugation, CrossReference, false, false)
            }
            F::OriginalPortDefinition => {
                let class = MetaClass::PortConjugation;
                d("originalPortDefinition", class, CrossReference, false, false)
            }
        }
    }

    /// Abstract syntax name.
    pub fn name(self) -> &'static str {
        self.descriptor().name
    }

    pub fn kind(self) -> FeatureKind {
        self.descriptor().kind
    }

    pub fn is_many(self) -> bool {
        self.descriptor().many
    }

    pub fn is_derived(self) -> bool {
        self.descriptor().derived
    }
}

impl fmt::Display for MetaFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let descriptor = self.descriptor();
        write!(f, "{}.{}", descriptor.declared_by, descriptor.name)
    }
}

/// Direction of a feature relative to its owning type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureDirection {
    In,
    Out,
    InOut,
}

impl FeatureDirection {
    /// Keyword used in the textual notation.
    pub fn keyword(self) -> &'static str {
        match self {
            FeatureDirection::In => "in",
            FeatureDirection::Out => "out",
            FeatureDirection::InOut => "inout",
        }
    }
}

// =============================================================================
// Object Graph Values
// =============================================================================

/// Identifier of an object within a [`Model`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub u32);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A reference recorded syntactically but not yet bound to an object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Proxy {
    /// Reference text as written in the source.
    pub text: String,
}

impl Proxy {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// A single value stored in a structural feature.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Text(String),
    Direction(FeatureDirection),
    Object(ObjectId),
    Proxy(Proxy),
}

impl Value {
    pub fn as_object(&self) -> Option<ObjectId> {
        match self {
            Value::Object(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Whether this value points at an object, bound or not.
    pub fn is_reference(&self) -> bool {
        matches!(self, Value::Object(_) | Value::Proxy(_))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<ObjectId> for Value {
    fn from(id: ObjectId) -> Self {
        Value::Object(id)
    }
}

impl From<FeatureDirection> for Value {
    fn from(direction: FeatureDirection) -> Self {
        Value::Direction(direction)
    }
}

/// Storage for one structural feature of one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Slot {
    Single(Value),
    Many(Vec<Value>),
}

impl Slot {
    pub fn as_slice(&self) -> &[Value] {
        match self {
            Slot::Single(value) => std::slice::from_ref(value),
            Slot::Many(values) => values,
        }
    }
}

// =============================================================================
// Object Graph
// =============================================================================

/// Errors raised when mutating a [`Model`] in ways the schema forbids.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("object not found: {0}")]
    UnknownObject(ObjectId),

    #[error("class {class} has no feature {feature}")]
    FeatureNotOnClass { class: MetaClass, feature: MetaFeature },

    #[error("feature {feature} is derived and cannot be stored")]
    DerivedFeature { feature: MetaFeature },

    #[error("feature {feature} is a container back-pointer; set the containment instead")]
    ContainerFeature { feature: MetaFeature },

    #[error("feature {feature} is {}-valued", multiplicity(.many))]
    WrongMultiplicity { feature: MetaFeature, many: bool },

    #[error("containment {feature} requires an object value")]
    NotAnObject { feature: MetaFeature },

    #[error("object {object} already has a container")]
    AlreadyContained { object: ObjectId },

    #[error("containing {child} in {owner} would create a containment cycle")]
    ContainmentCycle { owner: ObjectId, child: ObjectId },
}

fn multiplicity(many: &bool) -> &'static str {
    if *many {
        "many"
    } else {
        "single"
    }
}

/// Result type alias for model mutations.
pub type ModelResult<T> = Result<T, ModelError>;

/// An instance of a meta-model class.
#[derive(Debug, Clone)]
pub struct ModelObject {
    /// Arena identifier.
    pub id: ObjectId,
    /// Concrete class.
    pub class: MetaClass,
    slots: HashMap<MetaFeature, Slot>,
    container: Option<(ObjectId, MetaFeature)>,
}

impl ModelObject {
    /// Stored slot for `feature`, if any.
    pub fn slot(&self, feature: MetaFeature) -> Option<&Slot> {
        self.slots.get(&feature)
    }

    /// Owning object and the containment feature holding this object.
    pub fn container(&self) -> Option<(ObjectId, MetaFeature)> {
        self.container
    }
}

static NEXT_MODEL_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a [`Model`] instance. Clones get a fresh identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelId(pub u64);

impl ModelId {
    fn next() -> Self {
        ModelId(NEXT_MODEL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "model#{}", self.0)
    }
}

/// Arena-backed object graph.
#[derive(Debug)]
pub struct Model {
    id: ModelId,
    /// Bumped by every structural change.
    revision: u64,
    objects: Vec<ModelObject>,
    /// Original text of references, keyed by (owner, feature, index), as recorded by a parser.
    source_tokens: HashMap<(ObjectId, MetaFeature, usize), String>,
}

impl Default for Model {
    fn default() -> Self {
        Self {
            id: ModelId::next(),
            revision: 0,
            objects: Vec::new(),
            source_tokens: HashMap::new(),
        }
    }
}

impl Clone for Model {
    fn clone(&self) -> Self {
        Self {
            id: ModelId::next(),
            revision: self.revision,
            objects: self.objects.clone(),
            source_tokens: self.source_tokens.clone(),
        }
    }
}

impl Model {
    /// Creates an empty model.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(&self) -> ModelId {
        self.id
    }

    /// Number of structural changes so far; equal (id, revision) pairs mean equal content.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Iterate over all objects in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &ModelObject> {
        self.objects.iter()
    }

    /// Objects without a container.
    pub fn roots(&self) -> Vec<ObjectId> {
        self.objects
            .iter()
            .filter(|object| object.container.is_none())
            .map(|object| object.id)
            .collect()
    }

    /// Instantiate `class`.
    pub fn create(&mut self, class: MetaClass) -> ObjectId {
        let id = ObjectId(self.objects.len() as u32);
        self.revision += 1;
        self.objects.push(ModelObject {
            id,
            class,
            slots: HashMap::new(),
            container: None,
        });
        id
    }

    pub fn get(&self, id: ObjectId) -> Option<&ModelObject> {
        self.objects.get(id.0 as usize)
    }

    pub fn class_of(&self, id: ObjectId) -> Option<MetaClass> {
        self.get(id).map(|object| object.class)
    }

    /// Whether `id` is an instance of `class` or a subclass.
    pub fn is_a(&self, id: ObjectId, class: MetaClass) -> bool {
        self.class_of(id).is_some_and(|c| c.is_a(class))
    }

    fn checked(&self, id: ObjectId, feature: MetaFeature, many: bool) -> ModelResult<()> {
        let object = self.get(id).ok_or(ModelError::UnknownObject(id))?;
        if !object.class.has_feature(feature) {
            return Err(ModelError::FeatureNotOnClass {
                class: object.class,
                feature,
            });
        }
        let descriptor = feature.descriptor();
        if descriptor.derived {
            return Err(ModelError::DerivedFeature { feature });
        }
        if descriptor.kind == FeatureKind::Container {
            return Err(ModelError::ContainerFeature { feature });
        }
        if descriptor.many != many {
            return Err(ModelError::WrongMultiplicity {
                feature,
                many: descriptor.many,
            });
        }
        Ok(())
    }

    fn adopt(&mut self, owner: ObjectId, feature: MetaFeature, value: &Value) -> ModelResult<()> {
        let child = value.as_object().ok_or(ModelError::NotAnObject { feature })?;
        let object = self.get(child).ok_or(ModelError::UnknownObject(child))?;
        if object.container.is_some() {
            return Err(ModelError::AlreadyContained { object: child });
        }
        let mut ancestor = Some(owner);
        while let Some(current) = ancestor {
            if current == child {
                return Err(ModelError::ContainmentCycle { owner, child });
            }
            ancestor = self.container(current);
        }
        self.objects[child.0 as usize].container = Some((owner, feature));
        Ok(())
    }

    /// Set a single-valued feature.
    pub fn set(
        &mut self,
        owner: ObjectId,
        feature: MetaFeature,
        value: impl Into<Value>,
    ) -> ModelResult<()> {
        self.checked(owner, feature, false)?;
        let value = value.into();
        if feature.kind() == FeatureKind::Containment {
            self.adopt(owner, feature, &value)?;
        }
        self.revision += 1;
        self.objects[owner.0 as usize]
            .slots
            .insert(feature, Slot::Single(value));
        Ok(())
    }

    /// Append to a many-valued feature.
    pub fn push(
        &mut self,
        owner: ObjectId,
        feature: MetaFeature,
        value: impl Into<Value>,
    ) -> ModelResult<()> {
        self.checked(owner, feature, true)?;
        let value = value.into();
        if feature.kind() == FeatureKind::Containment {
            self.adopt(owner, feature, &value)?;
        }
        self.revision += 1;
        if let Slot::Many(values) = self.objects[owner.0 as usize]
            .slots
            .entry(feature)
            .or_insert_with(|| Slot::Many(Vec::new()))
        {
            values.push(value);
        }
        Ok(())
    }

    /// Record the original text a parser saw for the reference at (owner, feature, index).
    pub fn record_source_token(
        &mut self,
        owner: ObjectId,
        feature: MetaFeature,
        index: usize,
        token: impl Into<String>,
    ) {
        self.source_tokens.insert((owner, feature, index), token.into());
    }

    /// Original text of a reference, when the model still carries its parse.
    pub fn source_token(
        &self,
        owner: ObjectId,
        feature: MetaFeature,
        index: usize,
    ) -> Option<&str> {
        self.source_tokens
            .get(&(owner, feature, index))
            .map(String::as_str)
    }

    /// Drop all recorded source tokens, as if the model had been built programmatically.
    pub fn detach_source(&mut self) {
        self.source_tokens.clear();
    }

    // -------------------------------------------------------------------------
    // Feature access
    // -------------------------------------------------------------------------

    /// All stored values of `feature` (empty when unset).
    pub fn values(&self, owner: ObjectId, feature: MetaFeature) -> &[Value] {
        self.get(owner)
            .and_then(|object| object.slots.get(&feature))
            .map(Slot::as_slice)
            .unwrap_or(&[])
    }

    /// First stored value of `feature`.
    pub fn value(&self, owner: ObjectId, feature: MetaFeature) -> Option<&Value> {
        self.values(owner, feature).first()
    }

    pub fn value_count(&self, owner: ObjectId, feature: MetaFeature) -> usize {
        self.values(owner, feature).len()
    }

    /// Whether `feature` holds at least one value.
    pub fn is_set(&self, owner: ObjectId, feature: MetaFeature) -> bool {
        !self.values(owner, feature).is_empty()
    }

    /// Object values of `feature`, skipping unresolved proxies.
    pub fn object_values(&self, owner: ObjectId, feature: MetaFeature) -> Vec<ObjectId> {
        self.values(owner, feature)
            .iter()
            .filter_map(Value::as_object)
            .collect()
    }

    pub fn text(&self, owner: ObjectId, feature: MetaFeature) -> Option<&str> {
        self.value(owner, feature).and_then(Value::as_text)
    }

    pub fn container(&self, id: ObjectId) -> Option<ObjectId> {
        self.get(id)
            .and_then(|object| object.container)
            .map(|(owner, _)| owner)
    }

    pub fn containing_feature(&self, id: ObjectId) -> Option<MetaFeature> {
        self.get(id)
            .and_then(|object| object.container)
            .map(|(_, feature)| feature)
    }

    /// Children of `id` across all containment features, in feature order.
    pub fn contents(&self, id: ObjectId) -> Vec<ObjectId> {
        let Some(object) = self.get(id) else {
            return Vec::new();
        };
        object
            .class
            .all_features()
            .into_iter()
            .filter(|feature| feature.kind() == FeatureKind::Containment)
            .flat_map(|feature| self.object_values(id, feature))
            .collect()
    }

    /// `root` followed by all transitively contained objects, in pre-order.
    pub fn containment_tree(&self, root: ObjectId) -> Vec<ObjectId> {
        let mut order = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            order.push(id);
            let mut children = self.contents(id);
            children.reverse();
            stack.extend(children);
        }
        order
    }

    // -------------------------------------------------------------------------
    // Derived navigation
    // -------------------------------------------------------------------------

    pub fn owned_relationships(&self, id: ObjectId) -> Vec<ObjectId> {
        self.object_values(id, MetaFeature::OwnedRelationship)
    }

    pub fn owned_related_elements(&self, id: ObjectId) -> Vec<ObjectId> {
        self.object_values(id, MetaFeature::OwnedRelatedElement)
    }

    /// The relationship owning `id`, if `id` is an owned related element.
    pub fn owning_relationship(&self, id: ObjectId) -> Option<ObjectId> {
        let (owner, feature) = self.get(id)?.container?;
        (feature == MetaFeature::OwnedRelatedElement).then_some(owner)
    }

    /// The element owning relationship `id`, if `id` is an owned relationship.
    pub fn owning_related_element(&self, id: ObjectId) -> Option<ObjectId> {
        let (owner, feature) = self.get(id)?.container?;
        (feature == MetaFeature::OwnedRelationship).then_some(owner)
    }

    pub fn owning_membership(&self, id: ObjectId) -> Option<ObjectId> {
        self.owning_relationship(id)
            .filter(|rel| self.is_a(*rel, MetaClass::OwningMembership))
    }

    pub fn owning_feature_membership(&self, id: ObjectId) -> Option<ObjectId> {
        self.owning_membership(id)
            .filter(|rel| self.is_a(*rel, MetaClass::FeatureMembership))
    }

    /// Type owning a feature membership.
    pub fn owning_type(&self, membership: ObjectId) -> Option<ObjectId> {
        self.owning_related_element(membership)
            .filter(|owner| self.is_a(*owner, MetaClass::Type))
    }

    /// Namespace in which `id` is an owned member.
    pub fn owning_namespace(&self, id: ObjectId) -> Option<ObjectId> {
        self.owning_membership(id)
            .and_then(|membership| self.owning_related_element(membership))
            .filter(|owner| self.is_a(*owner, MetaClass::Namespace))
    }

    pub fn owned_memberships(&self, id: ObjectId) -> Vec<ObjectId> {
        self.owned_relationships(id)
            .into_iter()
            .filter(|rel| self.is_a(*rel, MetaClass::Membership))
            .collect()
    }

    pub fn owned_redefinitions(&self, id: ObjectId) -> Vec<ObjectId> {
        self.owned_relationships(id)
            .into_iter()
            .filter(|rel| self.is_a(*rel, MetaClass::Redefinition))
            .collect()
    }

    /// Whether a redefinition names a redefined feature, bound or not.
    pub fn has_redefined_feature(&self, redefinition: ObjectId) -> bool {
        self.value(redefinition, MetaFeature::RedefinedFeature)
            .is_some_and(Value::is_reference)
    }

    pub fn redefined_feature(&self, redefinition: ObjectId) -> Option<ObjectId> {
        self.value(redefinition, MetaFeature::RedefinedFeature)
            .and_then(Value::as_object)
    }

    /// The element a membership makes visible: owned for owning memberships, referenced
    /// otherwise.
    pub fn member_element(&self, membership: ObjectId) -> Option<ObjectId> {
        if self.is_a(membership, MetaClass::OwningMembership) {
            self.owned_member_element(membership)
        } else {
            self.value(membership, MetaFeature::MemberElement)
                .and_then(Value::as_object)
        }
    }

    pub fn owned_member_element(&self, membership: ObjectId) -> Option<ObjectId> {
        self.owned_related_elements(membership).first().copied()
    }

    pub fn owned_member_feature(&self, membership: ObjectId) -> Option<ObjectId> {
        self.owned_related_elements(membership)
            .into_iter()
            .find(|element| self.is_a(*element, MetaClass::Feature))
    }

    pub fn operator(&self, id: ObjectId) -> Option<&str> {
        self.text(id, MetaFeature::Operator)
    }

    pub fn direction(&self, id: ObjectId) -> Option<FeatureDirection> {
        match self.value(id, MetaFeature::Direction) {
            Some(Value::Direction(direction)) => Some(*direction),
            _ => None,
        }
    }

    /// Input parameters are those with direction `in` or `inout`.
    pub fn is_input_parameter(&self, feature: ObjectId) -> bool {
        matches!(
            self.direction(feature),
            Some(FeatureDirection::In | FeatureDirection::InOut)
        )
    }

    pub fn declared_name(&self, id: ObjectId) -> Option<&str> {
        self.text(id, MetaFeature::DeclaredName)
    }

    /// Declared name, or for an unnamed feature the effective name of the feature it
    /// redefines.
    pub fn effective_name(&self, id: ObjectId) -> Option<String> {
        let mut visited = HashSet::new();
        let mut current = id;
        loop {
            if let Some(name) = self.declared_name(current) {
                return Some(name.to_string());
            }
            if !visited.insert(current) || !self.is_a(current, MetaClass::Feature) {
                return None;
            }
            current = self
                .owned_redefinitions(current)
                .first()
                .and_then(|redefinition| self.redefined_feature(*redefinition))?;
        }
    }

    /// Name under which a membership exposes its member.
    pub fn membership_name(&self, membership: ObjectId) -> Option<String> {
        self.text(membership, MetaFeature::MemberName)
            .map(str::to_string)
            .or_else(|| {
                self.member_element(membership)
                    .and_then(|member| self.effective_name(member))
            })
    }

    /// Named members of a namespace, in membership order.
    pub fn named_members(&self, namespace: ObjectId) -> Vec<(String, ObjectId)> {
        self.owned_memberships(namespace)
            .into_iter()
            .filter_map(|membership| {
                let member = self.member_element(membership)?;
                let name = self.membership_name(membership)?;
                Some((name, member))
            })
            .collect()
    }
}
