//! Name scopes visible at a reference position.
//!
//! Scope computation belongs to the language's linker; the serializer only consumes the
//! resulting name lookup. [`ContainmentScopeProvider`] is a straightforward provider
//! over the containment tree for models that have no linker attached.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use sysml_model::{FeatureKind, MetaClass, MetaFeature, Model, ModelId, ObjectId};
use tracing::debug;

use crate::naming::{EffectiveQualifiedNameProvider, QualifiedName, QualifiedNameProvider};

/// Names visible at one position.
pub trait Scope {
    /// The unique element designated by `name`, if there is exactly one.
    fn single_element(&self, name: &QualifiedName) -> Option<ObjectId>;
}

/// Computes the scope for a reference of a source object.
pub trait ScopeProvider {
    fn scope_for(
        &self,
        model: &Model,
        source: ObjectId,
        reference: MetaFeature,
    ) -> Option<Box<dyn Scope>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Binding {
    Unique(ObjectId),
    Ambiguous,
}

/// A scope backed by a name table. Names bound to more than one target resolve to nothing.
#[derive(Debug, Clone, Default)]
pub struct MapScope {
    bindings: HashMap<QualifiedName, Binding>,
}

impl MapScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` to `target`. Binding the same name to a second target makes it ambiguous.
    pub fn insert(&mut self, name: QualifiedName, target: ObjectId) {
        match self.bindings.entry(name) {
            Entry::Vacant(entry) => {
                entry.insert(Binding::Unique(target));
            }
            Entry::Occupied(mut entry) => {
                if *entry.get() != Binding::Unique(target) {
                    entry.insert(Binding::Ambiguous);
                }
            }
        }
    }

    fn binding(&self, name: &QualifiedName) -> Option<Binding> {
        self.bindings.get(name).copied()
    }

    /// Replace bindings of every name `inner` binds.
    pub fn shadow_with(&mut self, inner: MapScope) {
        self.bindings.extend(inner.bindings);
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl FromIterator<(QualifiedName, ObjectId)> for MapScope {
    fn from_iter<I: IntoIterator<Item = (QualifiedName, ObjectId)>>(iter: I) -> Self {
        let mut scope = MapScope::new();
        for (name, target) in iter {
            scope.insert(name, target);
        }
        scope
    }
}

impl Scope for MapScope {
    fn single_element(&self, name: &QualifiedName) -> Option<ObjectId> {
        match self.bindings.get(name) {
            Some(Binding::Unique(target)) => Some(*target),
            _ => None,
        }
    }
}

/// Scope over the containment tree.
///
/// Every element with a fully qualified name is visible under it. Members of each
/// namespace enclosing the source object are additionally visible by their simple name,
/// inner namespaces shadowing outer ones. Only cross references have a scope.
///
/// The table of qualified names is built once per model revision and shared by every
/// scope handed out for that revision.
#[derive(Debug, Default)]
pub struct ContainmentScopeProvider<Q = EffectiveQualifiedNameProvider> {
    names: Q,
    global: Mutex<Option<GlobalNames>>,
}

#[derive(Debug)]
struct GlobalNames {
    model: ModelId,
    revision: u64,
    scope: Arc<MapScope>,
}

impl<Q: Clone> Clone for ContainmentScopeProvider<Q> {
    fn clone(&self) -> Self {
        Self {
            names: self.names.clone(),
            global: Mutex::new(None),
        }
    }
}

impl<Q: QualifiedNameProvider> ContainmentScopeProvider<Q> {
    pub fn new(names: Q) -> Self {
        Self {
            names,
            global: Mutex::new(None),
        }
    }

    /// Qualified names of all elements of `model`, cached while the model is unchanged.
    fn global_scope(&self, model: &Model) -> Arc<MapScope> {
        let mut cached = self.global.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(global) = cached
            .as_ref()
            .filter(|global| global.model == model.id() && global.revision == model.revision())
        {
            return Arc::clone(&global.scope);
        }

        let scope: Arc<MapScope> = Arc::new(
            model
                .iter()
                .filter_map(|object| {
                    self.names
                        .fully_qualified_name(model, object.id)
                        .map(|name| (name, object.id))
                })
                .collect(),
        );
        debug!(
            model = %model.id(),
            revision = model.revision(),
            names = scope.len(),
            "Built global scope"
        );
        *cached = Some(GlobalNames {
            model: model.id(),
            revision: model.revision(),
            scope: Arc::clone(&scope),
        });
        scope
    }
}

/// Simple-name layers of the enclosing namespaces over the shared qualified-name table.
struct ContainmentScope {
    global: Arc<MapScope>,
    /// Innermost namespace first.
    layers: Vec<MapScope>,
}

impl Scope for ContainmentScope {
    fn single_element(&self, name: &QualifiedName) -> Option<ObjectId> {
        match self.layers.iter().find_map(|layer| layer.binding(name)) {
            Some(Binding::Unique(target)) => Some(target),
            Some(Binding::Ambiguous) => None,
            None => self.global.single_element(name),
        }
    }
}

impl<Q: QualifiedNameProvider> ScopeProvider for ContainmentScopeProvider<Q> {
    fn scope_for(
        &self,
        model: &Model,
        source: ObjectId,
        reference: MetaFeature,
    ) -> Option<Box<dyn Scope>> {
        if reference.kind() != FeatureKind::CrossReference {
            return None;
        }
        let class = model.class_of(source)?;
        if !class.has_feature(reference) {
            return None;
        }

        let mut layers: Vec<MapScope> = Vec::new();
        let mut current = Some(source);
        while let Some(id) = current {
            if model.is_a(id, MetaClass::Namespace) {
                layers.push(
                    model
                        .named_members(id)
                        .into_iter()
                        .map(|(name, member)| (QualifiedName::simple(name), member))
                        .collect(),
                );
            }
            current = model.container(id);
        }

        Some(Box::new(ContainmentScope {
            global: self.global_scope(model),
            layers,
        }))
    }
}
