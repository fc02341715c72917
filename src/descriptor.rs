use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Layout box of an element in CSS pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

/// Normalized description of one element of a captured page.
///
/// This is the unit exchanged with the model and handed to the materializer.
/// Descriptors are rebuilt on every capture; `selector` is only meaningful
/// against the document it was computed from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementDescriptor {
    /// Lowercase tag name
    pub tag: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Class list, informational only
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub classes: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub input_type: Option<String>,

    /// aria-* attributes keyed by full attribute name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub aria: BTreeMap<String, String>,

    /// Best-effort accessible label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Normalized, truncated text content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,

    #[serde(default = "default_visible")]
    pub visible: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,

    /// CSS selector resolving back to the originating element
    pub selector: String,

    #[serde(default)]
    pub is_interactive: bool,

    #[serde(default)]
    pub is_navigation_candidate: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ElementDescriptor>,
}

fn default_visible() -> bool {
    true
}

impl ElementDescriptor {
    /// Create a bare descriptor; mostly useful for tests and fixtures
    pub fn new(tag: &str, selector: &str) -> Self {
        Self {
            tag: tag.to_string(),
            selector: selector.to_string(),
            visible: true,
            ..Self::default()
        }
    }

    /// Copy of this descriptor without its children
    pub fn shallow(&self) -> Self {
        Self {
            children: Vec::new(),
            ..self.clone()
        }
    }

    /// Pre-order iterator over this descriptor and all its descendants
    pub fn iter(&self) -> DescriptorIter<'_> {
        DescriptorIter { stack: vec![self] }
    }

    /// Number of descriptors in this subtree
    pub fn node_count(&self) -> usize {
        self.iter().count()
    }

    pub fn is_heading(&self) -> bool {
        matches!(self.tag.as_str(), "h1" | "h2" | "h3" | "h4" | "h5" | "h6")
    }

    /// Trimmed text, `None` when empty
    pub fn trimmed_text(&self) -> Option<&str> {
        self.text.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }
}

/// Pre-order traversal of a descriptor tree
pub struct DescriptorIter<'a> {
    stack: Vec<&'a ElementDescriptor>,
}

impl<'a> Iterator for DescriptorIter<'a> {
    type Item = &'a ElementDescriptor;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names() {
        let mut desc = ElementDescriptor::new("input", "#q");
        desc.input_type = Some("text".to_string());
        desc.is_interactive = true;

        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(json["type"], "text");
        assert_eq!(json["isInteractive"], true);
        assert_eq!(json["isNavigationCandidate"], false);
        assert!(json.get("children").is_none());
    }

    #[test]
    fn test_minimal_model_output_deserializes() {
        let desc: ElementDescriptor =
            serde_json::from_str(r##"{"tag": "button", "selector": "#go"}"##).unwrap();
        assert_eq!(desc.selector, "#go");
        assert!(desc.visible);
        assert!(desc.children.is_empty());
    }

    #[test]
    fn test_preorder_iteration() {
        let mut root = ElementDescriptor::new("body", "html > body");
        let mut nav = ElementDescriptor::new("nav", "nav");
        nav.children.push(ElementDescriptor::new("a", "nav > a"));
        root.children.push(nav);
        root.children.push(ElementDescriptor::new("main", "main"));

        let tags: Vec<_> = root.iter().map(|d| d.tag.as_str()).collect();
        assert_eq!(tags, vec!["body", "nav", "a", "main"]);
        assert_eq!(root.node_count(), 4);
    }
}
