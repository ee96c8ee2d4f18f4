//! Cross-reference token resolution.
//!
//! Turning a reference target back into text is an ordered pipeline, each step either
//! producing the token or handing over to the next:
//!
//! 1. reuse the source token of an unresolved placeholder,
//! 2. compute the scope visible at the reference position,
//! 3. bind a placeholder target against that scope,
//! 4. take the fully qualified name (or that of the element a nameless membership wraps),
//! 5. accept it only if its rendered token parses back to a name the scope maps to the
//!    very same object,
//! 6. otherwise try the effective name against the same scope.
//!
//! The scope is computed once per call, so both validations observe the same snapshot.

use sysml_model::{MetaClass, MetaFeature, Model, ObjectId, Value};
use tracing::debug;

use crate::config::SerializerConfig;
use crate::error::{ResolutionError, ResolutionResult};
use crate::naming::{
    EffectiveQualifiedNameProvider, QualifiedName, QualifiedNameProvider, DEFAULT_SEPARATOR,
};
use crate::scope::{ContainmentScopeProvider, Scope, ScopeProvider};

/// Whether `scope` maps `name` to exactly `target`.
///
/// Identity is compared by object id, never by structure.
pub fn designates(scope: &dyn Scope, name: &QualifiedName, target: ObjectId) -> bool {
    scope.single_element(name) == Some(target)
}

/// Produces the textual token for cross-reference values.
pub struct CrossReferenceResolver<
    S = ContainmentScopeProvider,
    Q = EffectiveQualifiedNameProvider,
> {
    scopes: S,
    names: Q,
    separator: String,
    reuse_source_tokens: bool,
}

impl<S: Default, Q: Default> Default for CrossReferenceResolver<S, Q> {
    fn default() -> Self {
        Self {
            scopes: S::default(),
            names: Q::default(),
            separator: DEFAULT_SEPARATOR.to_string(),
            reuse_source_tokens: true,
        }
    }
}

impl<S: ScopeProvider, Q: QualifiedNameProvider> CrossReferenceResolver<S, Q> {
    pub fn new(scopes: S, names: Q) -> Self {
        Self {
            scopes,
            names,
            separator: DEFAULT_SEPARATOR.to_string(),
            reuse_source_tokens: true,
        }
    }

    /// Apply the naming options of `config`.
    pub fn with_config(mut self, config: &SerializerConfig) -> Self {
        self.separator = config.name_separator.clone();
        self.reuse_source_tokens = config.reuse_source_tokens;
        self
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    /// Token to print for the reference value at `index` of `reference` on `source`.
    pub fn resolve(
        &self,
        model: &Model,
        source: ObjectId,
        reference: MetaFeature,
        index: usize,
        value: &Value,
    ) -> ResolutionResult<String> {
        if let Some(token) = self.reusable_token(model, source, reference, index, value) {
            debug!(%source, %reference, token = %token, "reusing source token");
            return Ok(token);
        }

        let scope = self.scope(model, source, reference)?;
        let target = self.bind_target(scope.as_ref(), source, reference, value)?;

        if let Some(name) = self.qualified_name(model, target) {
            if let Some(token) = self.render(scope.as_ref(), &name, target) {
                return Ok(token);
            }
            debug!(
                %source,
                %reference,
                %target,
                name = %name,
                "qualified name does not designate target, trying effective name"
            );
        }

        self.effective_name_token(model, scope.as_ref(), source, reference, target)
    }

    /// The original text of an unresolved placeholder, when the model still carries it.
    pub fn reusable_token(
        &self,
        model: &Model,
        source: ObjectId,
        reference: MetaFeature,
        index: usize,
        value: &Value,
    ) -> Option<String> {
        if !self.reuse_source_tokens || !matches!(value, Value::Proxy(_)) {
            return None;
        }
        model
            .source_token(source, reference, index)
            .map(str::to_string)
    }

    /// The scope visible at the reference position.
    pub fn scope(
        &self,
        model: &Model,
        source: ObjectId,
        reference: MetaFeature,
    ) -> ResolutionResult<Box<dyn Scope>> {
        self.scopes
            .scope_for(model, source, reference)
            .ok_or(ResolutionError::NoScope {
                source_object: source,
                reference,
            })
    }

    /// The object a reference value designates, binding placeholders against `scope`.
    pub fn bind_target(
        &self,
        scope: &dyn Scope,
        source: ObjectId,
        reference: MetaFeature,
        value: &Value,
    ) -> ResolutionResult<ObjectId> {
        match value {
            Value::Object(target) => Ok(*target),
            Value::Proxy(proxy) => scope
                .single_element(&QualifiedName::parse(&proxy.text, &self.separator))
                .ok_or_else(|| ResolutionError::UnresolvedProxy {
                    source_object: source,
                    reference,
                    text: proxy.text.clone(),
                }),
            _ => Err(ResolutionError::NotAReference {
                source_object: source,
                reference,
            }),
        }
    }

    /// Fully qualified name of `target`, or of the element it wraps when `target` is a
    /// nameless owning membership.
    pub fn qualified_name(&self, model: &Model, target: ObjectId) -> Option<QualifiedName> {
        self.names.fully_qualified_name(model, target).or_else(|| {
            if !model.is_a(target, MetaClass::OwningMembership) {
                return None;
            }
            let wrapped = model.owned_member_element(target)?;
            self.names.fully_qualified_name(model, wrapped)
        })
    }

    /// Last resort: the target's effective name, valid only if `scope` maps it back.
    pub fn effective_name_token(
        &self,
        model: &Model,
        scope: &dyn Scope,
        source: ObjectId,
        reference: MetaFeature,
        target: ObjectId,
    ) -> ResolutionResult<String> {
        let name = model
            .effective_name(target)
            .ok_or(ResolutionError::NoEffectiveName {
                source_object: source,
                reference,
                target,
            })?;
        self.render(scope, &QualifiedName::simple(name.clone()), target)
            .ok_or(ResolutionError::NotValidInScope {
                source_object: source,
                reference,
                target,
                name,
            })
    }

    /// Render `name` as a token, accepted only if the token parses back to a name that
    /// `scope` maps to `target`.
    fn render(&self, scope: &dyn Scope, name: &QualifiedName, target: ObjectId) -> Option<String> {
        let token = name.to_string_with(&self.separator);
        let parsed = QualifiedName::parse(&token, &self.separator);
        designates(scope, &parsed, target).then_some(token)
    }
}
