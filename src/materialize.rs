//! Turns selected descriptors into proxy markup for the generated surface.
//!
//! The surface never acts on its own DOM. Bound nodes carry a short
//! `data-proxy-id`; the selector they stand for lives in a [`ProxyRegistry`]
//! and events are translated into [`FrameMessage`]s for the original page.

use crate::descriptor::ElementDescriptor;
use crate::utils::{escape_attr, escape_text};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const PROXY_ID_ATTR: &str = "data-proxy-id";
const PROXY_ID_PREFIX: &str = "rp-";

/// Tags that are never recreated on the surface
const UNSAFE_TAGS: &[&str] = &[
    "script", "style", "iframe", "object", "embed", "link", "meta", "base", "frame", "frameset",
    "template", "noscript",
];
const CLICKABLE_INPUT_TYPES: &[&str] = &["button", "submit", "reset"];
const VOID_TAGS: &[&str] = &["area", "br", "col", "hr", "img", "input", "source", "track", "wbr"];

/// Script injected into every generated document: forwards clicks and
/// changes on proxy-bound nodes to the embedding frame
pub const SURFACE_BRIDGE_SCRIPT: &str = r#"(function () {
  function send(el, kind) {
    var msg = { type: 'PROXY_EVENT', proxyId: el.getAttribute('data-proxy-id'), event: kind };
    if (kind === 'change') { msg.value = el.value; }
    window.parent.postMessage(msg, '*');
  }
  document.addEventListener('click', function (e) {
    var el = e.target.closest('[data-proxy-id]');
    if (el && el.tagName === 'BUTTON') { e.preventDefault(); send(el, 'click'); }
  }, true);
  document.addEventListener('change', function (e) {
    var el = e.target.closest('[data-proxy-id]');
    if (el) { send(el, 'change'); }
  }, true);
})();"#;

/// What a proxy-bound node forwards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyAction {
    Click,
    Change,
}

/// Message from the generated surface's bridge script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "PROXY_EVENT", rename_all = "camelCase")]
pub struct SurfaceEvent {
    pub proxy_id: String,
    pub event: ProxyAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Action request for the original page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FrameMessage {
    ClickElement { selector: String },
    ChangeElement { selector: String, value: String },
}

impl FrameMessage {
    pub fn selector(&self) -> &str {
        match self {
            FrameMessage::ClickElement { selector } | FrameMessage::ChangeElement { selector, .. } => {
                selector
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyBinding {
    pub selector: String,
    pub action: ProxyAction,
}

/// Side table from synthetic proxy ids to original selectors
#[derive(Debug, Default)]
pub struct ProxyRegistry {
    bindings: HashMap<String, ProxyBinding>,
    ids: HashMap<(String, ProxyAction), String>,
    next_id: u64,
}

impl ProxyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id for `(selector, action)`, reusing the existing one if registered
    pub fn register(&mut self, selector: &str, action: ProxyAction) -> String {
        let key = (selector.to_string(), action);
        if let Some(id) = self.ids.get(&key) {
            return id.clone();
        }

        self.next_id += 1;
        let id = format!("{}{}", PROXY_ID_PREFIX, self.next_id);
        self.bindings.insert(
            id.clone(),
            ProxyBinding {
                selector: selector.to_string(),
                action,
            },
        );
        self.ids.insert(key, id.clone());
        id
    }

    pub fn resolve(&self, proxy_id: &str) -> Option<&ProxyBinding> {
        self.bindings.get(proxy_id)
    }

    /// Translate a surface event into a message for the original page
    pub fn dispatch(&self, event: &SurfaceEvent) -> Option<FrameMessage> {
        let Some(binding) = self.resolve(&event.proxy_id) else {
            ::log::warn!("Unknown proxy id {}", event.proxy_id);
            return None;
        };
        if binding.action != event.event {
            ::log::debug!(
                "Ignoring {:?} on {} bound for {:?}",
                event.event,
                event.proxy_id,
                binding.action
            );
            return None;
        }

        Some(match binding.action {
            ProxyAction::Click => FrameMessage::ClickElement {
                selector: binding.selector.clone(),
            },
            ProxyAction::Change => FrameMessage::ChangeElement {
                selector: binding.selector.clone(),
                value: event.value.clone().unwrap_or_default(),
            },
        })
    }

    /// Forget every binding; ids are not reused afterwards
    pub fn clear(&mut self) {
        self.bindings.clear();
        self.ids.clear();
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// A node recreated on the surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedNode {
    pub tag: String,
    pub attributes: Vec<(String, String)>,
    pub text: Option<String>,
    pub children: Vec<MaterializedNode>,
    /// Selector of the descriptor this node was built from
    pub source_selector: String,
}

impl MaterializedNode {
    fn new(tag: &str, source_selector: &str) -> Self {
        Self {
            tag: tag.to_string(),
            attributes: Vec::new(),
            text: None,
            children: Vec::new(),
            source_selector: source_selector.to_string(),
        }
    }

    fn attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.attributes.push((name.to_string(), value.into()));
        self
    }

    fn opt_attr(self, name: &str, value: Option<&str>) -> Self {
        match value {
            Some(value) => self.attr(name, value),
            None => self,
        }
    }

    pub fn get_attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn proxy_id(&self) -> Option<&str> {
        self.get_attr(PROXY_ID_ATTR)
    }

    pub fn to_html(&self) -> String {
        let mut out = String::new();
        self.write_html(&mut out);
        out
    }

    fn write_html(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.tag);
        for (name, value) in &self.attributes {
            out.push(' ');
            out.push_str(name);
            out.push_str("=\"");
            out.push_str(&escape_attr(value));
            out.push('"');
        }
        out.push('>');
        if VOID_TAGS.contains(&self.tag.as_str()) {
            return;
        }
        if let Some(text) = &self.text {
            out.push_str(&escape_text(text));
        }
        for child in &self.children {
            child.write_html(out);
        }
        out.push_str("</");
        out.push_str(&self.tag);
        out.push('>');
    }
}

/// Markup of `nodes`, one per line
pub fn render_nodes(nodes: &[MaterializedNode]) -> String {
    nodes
        .iter()
        .map(MaterializedNode::to_html)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Recreates selected elements as proxy-bound surface nodes
#[derive(Debug, Clone, Copy, Default)]
pub struct Materializer;

impl Materializer {
    pub fn new() -> Self {
        Self
    }

    pub fn materialize(
        &self,
        selected: &[ElementDescriptor],
        registry: &mut ProxyRegistry,
    ) -> Vec<MaterializedNode> {
        let nodes: Vec<MaterializedNode> = selected
            .iter()
            .filter_map(|d| self.materialize_one(d, registry))
            .collect();
        ::log::debug!("Materialized {} of {} elements", nodes.len(), selected.len());
        nodes
    }

    fn materialize_one(
        &self,
        d: &ElementDescriptor,
        registry: &mut ProxyRegistry,
    ) -> Option<MaterializedNode> {
        let tag = d.tag.trim().to_ascii_lowercase();
        if !is_valid_tag(&tag) {
            ::log::warn!("Skipping element without a usable tag: {}", d.selector);
            return None;
        }
        if UNSAFE_TAGS.contains(&tag.as_str()) {
            ::log::warn!("Skipping unsafe <{}> element: {}", tag, d.selector);
            return None;
        }

        if is_clickable(d, &tag) {
            let proxy_id = registry.register(&d.selector, ProxyAction::Click);
            let node = MaterializedNode::new("button", &d.selector)
                .attr("type", "button")
                .opt_attr("id", d.id.as_deref())
                .opt_attr("aria-label", d.label.as_deref())
                .attr(PROXY_ID_ATTR, proxy_id);
            return Some(MaterializedNode {
                text: Some(button_text(d, &tag)),
                ..node
            });
        }

        let node = MaterializedNode::new(&tag, &d.selector)
            .opt_attr("id", d.id.as_deref())
            .opt_attr("aria-label", d.label.as_deref());

        let node = match tag.as_str() {
            "input" => {
                let proxy_id = registry.register(&d.selector, ProxyAction::Change);
                node.opt_attr("type", d.input_type.as_deref())
                    .opt_attr("value", d.value.as_deref())
                    .opt_attr("placeholder", d.placeholder.as_deref())
                    .opt_attr("name", d.name.as_deref())
                    .attr(PROXY_ID_ATTR, proxy_id)
            }
            "textarea" => {
                let proxy_id = registry.register(&d.selector, ProxyAction::Change);
                let node = node
                    .opt_attr("placeholder", d.placeholder.as_deref())
                    .opt_attr("name", d.name.as_deref())
                    .attr(PROXY_ID_ATTR, proxy_id);
                MaterializedNode {
                    text: d.value.clone(),
                    ..node
                }
            }
            "select" => {
                let proxy_id = registry.register(&d.selector, ProxyAction::Change);
                let node = node
                    .opt_attr("name", d.name.as_deref())
                    .attr(PROXY_ID_ATTR, proxy_id);
                MaterializedNode {
                    children: select_options(d),
                    ..node
                }
            }
            _ => MaterializedNode {
                text: d.trimmed_text().map(str::to_string),
                ..node
            },
        };
        Some(node)
    }
}

fn is_valid_tag(tag: &str) -> bool {
    tag.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

fn is_clickable(d: &ElementDescriptor, tag: &str) -> bool {
    match tag {
        "a" | "button" => true,
        "input" => d
            .input_type
            .as_deref()
            .is_some_and(|t| CLICKABLE_INPUT_TYPES.contains(&t)),
        _ => d.role.as_deref() == Some("button"),
    }
}

/// text, value (inputs), title, alt, label, then a generic placeholder
fn button_text(d: &ElementDescriptor, tag: &str) -> String {
    let non_empty = |v: Option<&str>| v.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string);

    non_empty(d.text.as_deref())
        .or_else(|| {
            if tag == "input" {
                non_empty(d.value.as_deref())
            } else {
                None
            }
        })
        .or_else(|| non_empty(d.title.as_deref()))
        .or_else(|| non_empty(d.alt.as_deref()))
        .or_else(|| non_empty(d.label.as_deref()))
        .unwrap_or_else(|| {
            if tag == "a" {
                "[Link]".to_string()
            } else {
                "[Button]".to_string()
            }
        })
}

fn select_options(d: &ElementDescriptor) -> Vec<MaterializedNode> {
    d.children
        .iter()
        .filter(|c| c.tag == "option")
        .map(|option| {
            let node = MaterializedNode::new("option", &option.selector)
                .opt_attr("value", option.value.as_deref());
            MaterializedNode {
                text: option.trimmed_text().map(str::to_string),
                ..node
            }
        })
        .collect()
}
