//! Qualified names and the providers that compute them.

use std::fmt;

use serde::{Deserialize, Serialize};
use sysml_model::{Model, ObjectId};

/// Default segment separator of the textual notation.
pub const DEFAULT_SEPARATOR: &str = "::";

/// A separator-joined path of name segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QualifiedName {
    segments: Vec<String>,
}

impl QualifiedName {
    pub fn new(segments: Vec<String>) -> Self {
        Self { segments }
    }

    /// Single-segment name.
    pub fn simple(name: impl Into<String>) -> Self {
        Self {
            segments: vec![name.into()],
        }
    }

    /// Split `text` on `separator`.
    ///
    /// A segment may be an unrestricted name in single quotes, inside which the separator
    /// is literal and `\` escapes the next character.
    pub fn parse(text: &str, separator: &str) -> Self {
        let mut segments = Vec::new();
        let mut current = String::new();
        let mut quoted = false;
        let mut rest = text;
        while let Some(c) = rest.chars().next() {
            if !quoted && !separator.is_empty() && rest.starts_with(separator) {
                segments.push(std::mem::take(&mut current));
                rest = &rest[separator.len()..];
                continue;
            }
            rest = &rest[c.len_utf8()..];
            match c {
                '\'' => quoted = !quoted,
                '\\' if quoted => {
                    if let Some(escaped) = rest.chars().next() {
                        current.push(escaped);
                        rest = &rest[escaped.len_utf8()..];
                    }
                }
                _ => current.push(c),
            }
        }
        segments.push(current);
        Self { segments }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn last_segment(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// This name with `segment` appended.
    pub fn append(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    /// Render with an explicit separator, quoting segments that are not basic names.
    pub fn to_string_with(&self, separator: &str) -> String {
        self.segments
            .iter()
            .map(|segment| render_segment(segment, separator))
            .collect::<Vec<_>>()
            .join(separator)
    }
}

/// Whether `segment` is a basic name: a letter or `_` followed by letters, digits or `_`.
pub fn is_basic_name(segment: &str) -> bool {
    let mut chars = segment.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn render_segment(segment: &str, separator: &str) -> String {
    let clashes = !separator.is_empty() && segment.contains(separator);
    if is_basic_name(segment) && !clashes {
        return segment.to_string();
    }
    let mut quoted = String::with_capacity(segment.len() + 2);
    quoted.push('\'');
    for c in segment.chars() {
        if matches!(c, '\'' | '\\') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('\'');
    quoted
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_with(DEFAULT_SEPARATOR))
    }
}

/// Computes fully qualified names of model elements.
pub trait QualifiedNameProvider {
    fn fully_qualified_name(&self, model: &Model, object: ObjectId) -> Option<QualifiedName>;
}

/// Qualifies an element by the effective names of its owning namespaces.
///
/// An element without an effective name, or with an unnamed ancestor namespace, has no
/// qualified name. Root namespaces are not part of the path.
#[derive(Debug, Clone, Copy, Default)]
pub struct EffectiveQualifiedNameProvider;

impl QualifiedNameProvider for EffectiveQualifiedNameProvider {
    fn fully_qualified_name(&self, model: &Model, object: ObjectId) -> Option<QualifiedName> {
        let mut segments = vec![model.effective_name(object)?];
        let mut current = object;
        while let Some(namespace) = model.owning_namespace(current) {
            if model.owning_namespace(namespace).is_none() && model.container(namespace).is_none() {
                // Root namespace, anonymous in the notation.
                break;
            }
            segments.push(model.effective_name(namespace)?);
            current = namespace;
        }
        segments.reverse();
        Some(QualifiedName::new(segments))
    }
}
