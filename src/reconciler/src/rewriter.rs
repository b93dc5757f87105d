//! Ownership and reference rewriting for loosely-typed records.
//!
//! The rewriter walks nested objects of a record and emits a sparse
//! [`Patch`]: the ownership tag is always set to the new identifier, and
//! reference fields are included only when their value changes. A string
//! counts as a reference when its field name carries a reference suffix or
//! when the value itself points under the old identifier's storage prefix.
//! Arrays are never patched element by element; an array of references that
//! changes is replaced whole.

use common::docstore::{Document, FieldPath, Patch};
use common::storage::locator_to_path;
use serde_json::Value;

use crate::mirror::ReferenceMap;
use crate::settings::ReconcilerSettings;

/// Identifiers and mapping of one rewrite
#[derive(Debug, Clone, Copy)]
pub struct RewriteContext<'a> {
    pub old_id: &'a str,
    pub new_id: &'a str,
    pub references: &'a ReferenceMap,
}

pub struct ReferenceRewriter {
    tag_field: FieldPath,
    reference_suffixes: Vec<String>,
    categories: Vec<String>,
    public_base_url: String,
}

impl ReferenceRewriter {
    /// `tag_field` is the ownership tag (or identity field) forced to the new id
    pub fn new(tag_field: FieldPath, settings: &ReconcilerSettings) -> Self {
        Self {
            tag_field,
            reference_suffixes: settings.reference_field_suffixes.clone(),
            categories: settings.categories.clone(),
            public_base_url: settings.public_base_url.clone(),
        }
    }

    pub fn patch(&self, data: &Document, ctx: &RewriteContext<'_>) -> Patch {
        let mut patch = Patch::new();
        self.walk(data, None, ctx, &mut patch);
        patch.set(self.tag_field.clone(), Value::String(ctx.new_id.to_string()));
        patch
    }

    fn walk(
        &self,
        object: &Document,
        parent: Option<&FieldPath>,
        ctx: &RewriteContext<'_>,
        patch: &mut Patch,
    ) {
        for (key, value) in object {
            let path = match parent {
                Some(parent) => parent.child(key.as_str()),
                None => FieldPath::field(key.as_str()),
            };
            if path == self.tag_field {
                continue;
            }

            match value {
                Value::Object(nested) => self.walk(nested, Some(&path), ctx, patch),
                Value::String(current) => {
                    if let Some(rewritten) = self.rewrite_reference(key, current, ctx) {
                        patch.set(path, Value::String(rewritten));
                    }
                }
                Value::Array(items) => {
                    if let Some(items) = self.rewrite_array(key, items, ctx) {
                        patch.set(path, Value::Array(items));
                    }
                }
                _ => {}
            }
        }
    }

    fn rewrite_array(
        &self,
        key: &str,
        items: &[Value],
        ctx: &RewriteContext<'_>,
    ) -> Option<Vec<Value>> {
        let mut changed = false;
        let rewritten = items
            .iter()
            .map(|item| match item {
                Value::String(current) => match self.rewrite_reference(key, current, ctx) {
                    Some(new) => {
                        changed = true;
                        Value::String(new)
                    }
                    None => item.clone(),
                },
                other => other.clone(),
            })
            .collect();
        changed.then_some(rewritten)
    }

    /// New value of a reference, or `None` when it stays as is.
    ///
    /// An exact map entry wins for any field. Otherwise a reference-named
    /// field, or a value under the old id's storage prefix, gets the old id
    /// substituted by the new one throughout the string.
    pub fn rewrite_reference(
        &self,
        key: &str,
        current: &str,
        ctx: &RewriteContext<'_>,
    ) -> Option<String> {
        if let Some(mapped) = ctx.references.get(current) {
            return (mapped != current).then(|| mapped.to_string());
        }
        if ctx.old_id.is_empty() || !current.contains(ctx.old_id) {
            return None;
        }
        if !self.is_reference_name(key) && !self.points_under(current, ctx.old_id) {
            return None;
        }
        Some(current.replace(ctx.old_id, ctx.new_id))
    }

    fn is_reference_name(&self, key: &str) -> bool {
        self.reference_suffixes
            .iter()
            .any(|suffix| key.ends_with(suffix.as_str()))
    }

    /// Whether `value` locates an object inside a `<category>/<old_id>/` prefix
    fn points_under(&self, value: &str, old_id: &str) -> bool {
        if value.contains(&format!("/{old_id}/")) || value.contains(&format!("%2F{old_id}%2F")) {
            return true;
        }
        let Some(path) = locator_to_path(&self.public_base_url, value) else {
            return false;
        };
        let mut parts = path.parts();
        match (parts.next(), parts.next()) {
            (Some(category), Some(owner)) => {
                owner.as_ref() == old_id
                    && self.categories.iter().any(|c| c == category.as_ref())
            }
            _ => false,
        }
    }
}
