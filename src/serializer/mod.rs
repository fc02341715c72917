//! Walks a captured page and produces the descriptor tree the rest of the
//! pipeline works on.

pub mod layout;
pub mod selector;

#[cfg(test)]
mod tests;

use crate::config::SerializerConfig;
use crate::descriptor::ElementDescriptor;
use crate::utils::{normalize_whitespace, truncate_chars};
use layout::{LAYOUT_REF_ATTR, LayoutMap, VisibilityStyle};
use scraper::{ElementRef, Html, Node};
use selector::{IdCounts, build_selector};
use std::collections::{BTreeMap, HashMap};

pub use layout::LayoutInfo;

const INTERACTIVE_TAGS: &[&str] = &["button", "a", "input", "select", "textarea", "form"];
const INTERACTIVE_ROLES: &[&str] = &[
    "button", "link", "textbox", "combobox", "checkbox", "radio", "menuitem",
];
const NAVIGATION_TAGS: &[&str] = &["nav", "header", "footer"];
const NAVIGATION_ROLES: &[&str] = &[
    "navigation",
    "banner",
    "contentinfo",
    "main",
    "complementary",
];
const NAVIGATION_CLASS_HINTS: &[&str] = &[
    "nav",
    "menu",
    "header",
    "footer",
    "sidebar",
    "breadcrumb",
    "toolbar",
    "tabs",
];
/// Elements whose text never reaches the user
const NON_RENDERED_TAGS: &[&str] = &["script", "style", "noscript", "template"];

/// A page as captured from the host: its HTML plus optional measured layout
#[derive(Debug, Clone, Default)]
pub struct CapturedPage {
    pub url: String,
    pub html: String,
    pub layout: LayoutMap,
}

impl CapturedPage {
    pub fn new(url: &str, html: &str) -> Self {
        Self {
            url: url.to_string(),
            html: html.to_string(),
            layout: LayoutMap::new(),
        }
    }
}

/// Lookups shared by every node of one serialization pass
struct WalkContext<'a> {
    ids: IdCounts,
    labels: HashMap<String, String>,
    layout: &'a LayoutMap,
}

/// Converts a parsed document into an [`ElementDescriptor`] tree
#[derive(Debug, Clone, Default)]
pub struct Serializer {
    config: SerializerConfig,
}

impl Serializer {
    pub fn new(config: SerializerConfig) -> Self {
        Self { config }
    }

    /// Serialize a captured page, joining any measured layout by layout ref
    pub fn serialize_page(&self, page: &CapturedPage) -> ElementDescriptor {
        let doc = Html::parse_document(&page.html);
        self.serialize_with_layout(&doc, &page.layout)
    }

    /// Serialize an HTML string without layout measurements
    pub fn serialize_html(&self, html: &str) -> ElementDescriptor {
        let doc = Html::parse_document(html);
        self.serialize(&doc)
    }

    /// Serialize a parsed document without layout measurements
    pub fn serialize(&self, doc: &Html) -> ElementDescriptor {
        self.serialize_with_layout(doc, &LayoutMap::new())
    }

    pub fn serialize_with_layout(&self, doc: &Html, layout: &LayoutMap) -> ElementDescriptor {
        let ctx = WalkContext {
            ids: IdCounts::from_document(doc),
            labels: collect_labels(doc),
            layout,
        };
        let (root, _) = self.visit(doc.root_element(), 0, true, &ctx);
        ::log::debug!("Serialized {} elements", root.node_count());
        root
    }

    /// Visit one element; also returns the number of links/buttons below it
    fn visit(
        &self,
        el: ElementRef,
        depth: usize,
        parent_visible: bool,
        ctx: &WalkContext,
    ) -> (ElementDescriptor, usize) {
        let element = el.value();
        let tag = element.name().to_ascii_lowercase();
        let attr = |name: &str| {
            element
                .attr(name)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let visible = parent_visible && self.compute_visible(el, &tag, ctx);

        let mut children = Vec::new();
        let mut control_count = 0;
        if depth < self.config.max_depth {
            for child in el.child_elements().take(self.config.max_children) {
                let (descriptor, below) = self.visit(child, depth + 1, visible, ctx);
                if matches!(descriptor.tag.as_str(), "a" | "button") {
                    control_count += 1;
                }
                control_count += below;
                children.push(descriptor);
            }
        } else {
            control_count = el
                .descendent_elements()
                .skip(1)
                .filter(|d| matches!(d.value().name(), "a" | "button"))
                .count();
        }

        let classes: Vec<String> = element
            .attr("class")
            .map(|c| c.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        let role = attr("role").map(|r| r.to_ascii_lowercase());
        let aria: BTreeMap<String, String> = element
            .attrs()
            .filter(|(name, _)| name.starts_with("aria-"))
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();

        let text = collect_text(el, self.config.max_text_len * 4);
        let text = (!text.is_empty()).then(|| truncate_chars(&text, self.config.max_text_len));

        let id = attr("id");
        let label = compute_label(
            attr("aria-label"),
            id.as_deref().and_then(|id| ctx.labels.get(id).cloned()),
            attr("placeholder"),
            attr("title"),
        );

        let is_interactive = INTERACTIVE_TAGS.contains(&tag.as_str())
            || role
                .as_deref()
                .is_some_and(|r| INTERACTIVE_ROLES.contains(&r))
            || element.attr("onclick").is_some()
            || element.attr("tabindex").is_some()
            || element.attr("data-action").is_some()
            || element.attr("data-toggle").is_some();

        let is_navigation_candidate = NAVIGATION_TAGS.contains(&tag.as_str())
            || role
                .as_deref()
                .is_some_and(|r| NAVIGATION_ROLES.contains(&r))
            || classes.iter().any(|c| {
                let lower = c.to_ascii_lowercase();
                NAVIGATION_CLASS_HINTS.iter().any(|hint| lower.contains(hint))
            })
            || control_count > 2;

        let bbox = element
            .attr(LAYOUT_REF_ATTR)
            .and_then(|r| ctx.layout.get(r))
            .map(|l| l.bbox);

        let descriptor = ElementDescriptor {
            selector: build_selector(el, &ctx.ids),
            tag,
            id,
            classes,
            role,
            name: attr("name"),
            input_type: attr("type").map(|t| t.to_ascii_lowercase()),
            aria,
            label,
            text,
            href: attr("href"),
            value: attr("value"),
            placeholder: attr("placeholder"),
            title: attr("title"),
            alt: attr("alt"),
            visible,
            bbox,
            is_interactive,
            is_navigation_candidate,
            children,
        };
        (descriptor, control_count)
    }

    /// Non-empty box, not display:none, not visibility:hidden, opacity > 0
    fn compute_visible(&self, el: ElementRef, tag: &str, ctx: &WalkContext) -> bool {
        let element = el.value();
        if element.attr("hidden").is_some() {
            return false;
        }
        if tag == "input" && element.attr("type").is_some_and(|t| t.eq_ignore_ascii_case("hidden")) {
            return false;
        }

        let measured = element
            .attr(LAYOUT_REF_ATTR)
            .and_then(|r| ctx.layout.get(r));
        match measured {
            Some(layout) => {
                !layout.bbox.is_empty() && !VisibilityStyle::from_layout(layout).hides()
            }
            None => !element
                .attr("style")
                .map(VisibilityStyle::from_inline)
                .unwrap_or_default()
                .hides(),
        }
    }
}

/// `<label for=…>` text keyed by the id it points at
fn collect_labels(doc: &Html) -> HashMap<String, String> {
    let mut labels = HashMap::new();
    for el in doc.root_element().descendent_elements() {
        if el.value().name() != "label" {
            continue;
        }
        if let Some(target) = el.value().attr("for") {
            let text = normalize_whitespace(&el.text().collect::<String>());
            if !text.is_empty() {
                labels.entry(target.to_string()).or_insert(text);
            }
        }
    }
    labels
}

/// aria-label, then `<label for>`, then placeholder, then title
fn compute_label(
    aria_label: Option<String>,
    for_label: Option<String>,
    placeholder: Option<String>,
    title: Option<String>,
) -> Option<String> {
    aria_label.or(for_label).or(placeholder).or(title)
}

/// Rendered text below `el`, whitespace-normalized, gathered up to `budget` chars
fn collect_text(el: ElementRef, budget: usize) -> String {
    fn walk(el: ElementRef, out: &mut String, budget: usize) {
        for child in el.children() {
            if out.len() >= budget {
                return;
            }
            match child.value() {
                Node::Text(text) => {
                    out.push_str(text);
                    out.push(' ');
                }
                Node::Element(element) => {
                    if !NON_RENDERED_TAGS.contains(&element.name()) {
                        if let Some(child_el) = ElementRef::wrap(child) {
                            walk(child_el, out, budget);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    let mut raw = String::new();
    walk(el, &mut raw, budget);
    normalize_whitespace(&raw)
}
