//! DOM edit operations produced by the patch strategy, and their application.

pub mod render;


use crate::utils::strip_code_fences;
use render::{Edit, render_document};
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PATCH_VERSION: &str = "1.0";

/// One edit; serialized with an `op` tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Operation {
    /// Set the target's inner HTML
    Replace { selector: String, html: String },
    Append { selector: String, html: String },
    Prepend { selector: String, html: String },
    Remove { selector: String },
    SetAttribute {
        selector: String,
        attribute: String,
        value: String,
    },
    RemoveAttribute { selector: String, attribute: String },
    /// Discard the old document entirely
    ReplaceFullDocument { html: String },
}

impl Operation {
    /// Target selector; `None` for a full-document replace
    pub fn selector(&self) -> Option<&str> {
        match self {
            Operation::Replace { selector, .. }
            | Operation::Append { selector, .. }
            | Operation::Prepend { selector, .. }
            | Operation::Remove { selector }
            | Operation::SetAttribute { selector, .. }
            | Operation::RemoveAttribute { selector, .. } => Some(selector),
            Operation::ReplaceFullDocument { .. } => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::Replace { .. } => "replace",
            Operation::Append { .. } => "append",
            Operation::Prepend { .. } => "prepend",
            Operation::Remove { .. } => "remove",
            Operation::SetAttribute { .. } => "setAttribute",
            Operation::RemoveAttribute { .. } => "removeAttribute",
            Operation::ReplaceFullDocument { .. } => "replaceFullDocument",
        }
    }

    fn edit(&self) -> Option<Edit<'_>> {
        Some(match self {
            Operation::Replace { html, .. } => Edit::ReplaceContent(html),
            Operation::Append { html, .. } => Edit::Append(html),
            Operation::Prepend { html, .. } => Edit::Prepend(html),
            Operation::Remove { .. } => Edit::Remove,
            Operation::SetAttribute {
                attribute, value, ..
            } => Edit::SetAttribute(attribute, value),
            Operation::RemoveAttribute { attribute, .. } => Edit::RemoveAttribute(attribute),
            Operation::ReplaceFullDocument { .. } => return None,
        })
    }
}

/// Ordered list of edits against a previous document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    pub version: String,
    pub operations: Vec<Operation>,
}

#[derive(Deserialize)]
struct LenientPatch {
    #[serde(default = "default_version")]
    version: String,
    operations: Vec<Value>,
}

fn default_version() -> String {
    PATCH_VERSION.to_string()
}

impl Patch {
    pub fn new(operations: Vec<Operation>) -> Self {
        Self {
            version: PATCH_VERSION.to_string(),
            operations,
        }
    }

    /// A patch that swaps in `html` as the whole document
    pub fn full_document(html: String) -> Self {
        Self::new(vec![Operation::ReplaceFullDocument { html }])
    }

    /// Parse a model answer. Operations with an unknown `op` or missing
    /// fields are skipped one by one; a malformed envelope is an error.
    pub fn from_model_answer(raw: &str) -> Result<Self, serde_json::Error> {
        let envelope: LenientPatch = serde_json::from_str(strip_code_fences(raw))?;

        let mut operations = Vec::with_capacity(envelope.operations.len());
        for value in envelope.operations {
            let op_name = value
                .get("op")
                .and_then(Value::as_str)
                .unwrap_or("<missing>")
                .to_string();
            match serde_json::from_value::<Operation>(value) {
                Ok(op) => operations.push(op),
                Err(e) => ::log::warn!("Skipping patch operation '{}': {}", op_name, e),
            }
        }

        Ok(Self {
            version: envelope.version,
            operations,
        })
    }

    /// HTML of the first full-document replace, if any
    pub fn full_document_html(&self) -> Option<&str> {
        self.operations.iter().find_map(|op| match op {
            Operation::ReplaceFullDocument { html } => Some(html.as_str()),
            _ => None,
        })
    }
}

/// Apply `patch` to `old_html`.
///
/// A full-document replace anywhere in the list wins outright. Otherwise the
/// operations run in order; one whose selector does not parse or match is
/// logged and skipped. When nothing applies, `old_html` comes back unchanged.
pub fn apply_patch(old_html: &str, patch: &Patch) -> String {
    if let Some(html) = patch.full_document_html() {
        ::log::debug!("Patch replaces the full document");
        return html.to_string();
    }

    let mut current: Option<String> = None;
    let mut applied = 0;
    for op in &patch.operations {
        let base = current.as_deref().unwrap_or(old_html);
        if let Some(next) = apply_operation(base, op) {
            current = Some(next);
            applied += 1;
        }
    }

    ::log::debug!(
        "Applied {} of {} patch operations",
        applied,
        patch.operations.len()
    );
    current.unwrap_or_else(|| old_html.to_string())
}

/// Apply a single targeted operation, `None` when it was skipped
fn apply_operation(html: &str, op: &Operation) -> Option<String> {
    let (selector_text, edit) = (op.selector()?, op.edit()?);

    let selector = match Selector::parse(selector_text) {
        Ok(selector) => selector,
        Err(e) => {
            ::log::warn!("Skipping {} with invalid selector '{}': {}", op.name(), selector_text, e);
            return None;
        }
    };

    let doc = Html::parse_document(html);
    let Some(target) = doc.select(&selector).next() else {
        ::log::warn!("Skipping {}: no element matches '{}'", op.name(), selector_text);
        return None;
    };

    Some(render_document(&doc, Some((target, edit))))
}
