//! Round-trip snapshots.
//!
//! Two object trees are equivalent when, object by object in pre-order, their classes
//! match, their stored attribute values are equal and their references point at the same
//! positions. Objects are never compared by identity: a reference into the tree is recorded
//! by the target's pre-order number, so a re-parsed tree compares equal to its original.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::Serialize;
use sysml_model::{FeatureKind, MetaClass, MetaFeature, Model, ObjectId, Value};

use crate::error::{SnapshotError, SnapshotResult};
use crate::naming::{EffectiveQualifiedNameProvider, QualifiedNameProvider};

/// Features left out of snapshots by default: identifiers that differ between parses.
pub const DEFAULT_IGNORED_FEATURES: [MetaFeature; 4] = [
    MetaFeature::ElementId,
    MetaFeature::AliasIds,
    MetaFeature::MemberElementId,
    MetaFeature::OwnedMemberElementId,
];

/// Pre-order position of every object in the tree rooted at `root`.
pub fn numbering(model: &Model, root: ObjectId) -> HashMap<ObjectId, usize> {
    model
        .containment_tree(root)
        .into_iter()
        .enumerate()
        .map(|(number, object)| (object, number))
        .collect()
}

/// A reference target as seen from a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum NumberedObject {
    /// Target inside the tree, by pre-order number.
    Numbered(usize),
    /// Target outside the tree, such as a library element, by a name that is stable across
    /// models: its qualified name, else its class and effective name.
    External(String),
    /// Reference that was never bound, by its text.
    Unresolved(String),
}

impl NumberedObject {
    fn of(model: &Model, value: &Value, numbering: &HashMap<ObjectId, usize>) -> Option<Self> {
        match value {
            Value::Object(id) => Some(match numbering.get(id) {
                Some(number) => NumberedObject::Numbered(*number),
                None => NumberedObject::External(external_identity(model, *id)),
            }),
            Value::Proxy(proxy) => Some(NumberedObject::Unresolved(proxy.text.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for NumberedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NumberedObject::Numbered(number) => write!(f, "<{number}>"),
            NumberedObject::External(name) => write!(f, "<external {name}>"),
            NumberedObject::Unresolved(text) => write!(f, "<'{text}'>"),
        }
    }
}

/// Stored state of one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectSnapshot {
    pub number: usize,
    pub class: MetaClass,
    pub attributes: BTreeMap<MetaFeature, Option<Value>>,
    pub references: BTreeMap<MetaFeature, Vec<NumberedObject>>,
}

impl ObjectSnapshot {
    fn capture(
        model: &Model,
        object: ObjectId,
        number: usize,
        numbering: &HashMap<ObjectId, usize>,
        ignored: &[MetaFeature],
    ) -> SnapshotResult<Self> {
        let class = model
            .class_of(object)
            .ok_or(SnapshotError::UnknownObject(object))?;
        let mut attributes = BTreeMap::new();
        let mut references = BTreeMap::new();

        for feature in class.all_features() {
            if feature.is_derived() || ignored.contains(&feature) {
                continue;
            }
            match feature.kind() {
                FeatureKind::Attribute => {
                    if feature.is_many() {
                        return Err(SnapshotError::UnsupportedFeatureShape { object, feature });
                    }
                    attributes.insert(feature, model.value(object, feature).cloned());
                }
                FeatureKind::Containment | FeatureKind::CrossReference => {
                    let targets = model
                        .values(object, feature)
                        .iter()
                        .filter_map(|value| NumberedObject::of(model, value, numbering))
                        .collect();
                    references.insert(feature, targets);
                }
                FeatureKind::Container => {
                    let targets = container_value(model, object, feature)
                        .and_then(|owner| {
                            NumberedObject::of(model, &Value::Object(owner), numbering)
                        })
                        .into_iter()
                        .collect();
                    references.insert(feature, targets);
                }
            }
        }

        Ok(Self {
            number,
            class,
            attributes,
            references,
        })
    }

    /// First difference to `other`, comparing this snapshot's features.
    fn diff(&self, other: &ObjectSnapshot) -> Option<SnapshotDiff> {
        if self.class != other.class {
            return Some(SnapshotDiff::Class {
                number: self.number,
                original: self.class,
                parsed: other.class,
            });
        }
        for (feature, value) in &self.attributes {
            let parsed = other.attributes.get(feature).cloned().flatten();
            if *value != parsed {
                return Some(SnapshotDiff::Attribute {
                    number: self.number,
                    feature: *feature,
                    original: value.clone(),
                    parsed,
                });
            }
        }
        for (feature, targets) in &self.references {
            let parsed = other.references.get(feature).cloned().unwrap_or_default();
            if *targets != parsed {
                return Some(SnapshotDiff::Reference {
                    number: self.number,
                    feature: *feature,
                    original: targets.clone(),
                    parsed,
                });
            }
        }
        None
    }
}

fn external_identity(model: &Model, target: ObjectId) -> String {
    if let Some(name) = EffectiveQualifiedNameProvider.fully_qualified_name(model, target) {
        return name.to_string();
    }
    match (model.class_of(target), model.effective_name(target)) {
        (Some(class), Some(name)) => format!("{class} {name}"),
        (Some(class), None) => class.to_string(),
        (None, _) => "<missing>".to_string(),
    }
}

fn container_value(model: &Model, object: ObjectId, feature: MetaFeature) -> Option<ObjectId> {
    match feature {
        MetaFeature::OwningRelationship => model.owning_relationship(object),
        MetaFeature::OwningRelatedElement => model.owning_related_element(object),
        _ => None,
    }
}

/// First mismatch between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SnapshotDiff {
    Size {
        original: usize,
        parsed: usize,
    },
    Class {
        number: usize,
        original: MetaClass,
        parsed: MetaClass,
    },
    Attribute {
        number: usize,
        feature: MetaFeature,
        original: Option<Value>,
        parsed: Option<Value>,
    },
    Reference {
        number: usize,
        feature: MetaFeature,
        original: Vec<NumberedObject>,
        parsed: Vec<NumberedObject>,
    },
}

impl fmt::Display for SnapshotDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotDiff::Size { original, parsed } => {
                write!(f, "tree sizes differ: {original} vs {parsed} objects")
            }
            SnapshotDiff::Class {
                number,
                original,
                parsed,
            } => write!(f, "object {number}: class {original} vs {parsed}"),
            SnapshotDiff::Attribute {
                number,
                feature,
                original,
                parsed,
            } => write!(f, "object {number}: {feature} = {original:?} vs {parsed:?}"),
            SnapshotDiff::Reference {
                number,
                feature,
                original,
                parsed,
            } => write!(f, "object {number}: {feature} -> {original:?} vs {parsed:?}"),
        }
    }
}

/// Snapshot of a whole tree, in pre-order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelSnapshot {
    objects: Vec<ObjectSnapshot>,
}

impl ModelSnapshot {
    /// Capture the tree rooted at `root`, ignoring [`DEFAULT_IGNORED_FEATURES`].
    pub fn capture(model: &Model, root: ObjectId) -> SnapshotResult<Self> {
        Self::capture_with(model, root, &DEFAULT_IGNORED_FEATURES)
    }

    /// Capture the tree rooted at `root`, ignoring `ignored`.
    pub fn capture_with(
        model: &Model,
        root: ObjectId,
        ignored: &[MetaFeature],
    ) -> SnapshotResult<Self> {
        if model.get(root).is_none() {
            return Err(SnapshotError::UnknownObject(root));
        }
        let numbering = numbering(model, root);
        let objects = model
            .containment_tree(root)
            .into_iter()
            .enumerate()
            .map(|(number, object)| {
                ObjectSnapshot::capture(model, object, number, &numbering, ignored)
            })
            .collect::<SnapshotResult<Vec<_>>>()?;
        Ok(Self { objects })
    }

    pub fn objects(&self) -> &[ObjectSnapshot] {
        &self.objects
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// First difference between `self` (the original) and `parsed`.
    pub fn compare(&self, parsed: &ModelSnapshot) -> Option<SnapshotDiff> {
        if self.objects.len() != parsed.objects.len() {
            return Some(SnapshotDiff::Size {
                original: self.objects.len(),
                parsed: parsed.objects.len(),
            });
        }
        self.objects
            .iter()
            .zip(&parsed.objects)
            .find_map(|(original, parsed)| original.diff(parsed))
    }

    pub fn matches(&self, parsed: &ModelSnapshot) -> bool {
        self.compare(parsed).is_none()
    }
}
