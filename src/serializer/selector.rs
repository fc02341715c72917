use crate::utils::is_css_identifier;
use scraper::{ElementRef, Html};
use std::collections::HashMap;

/// Class prefixes that come and go between renders (frameworks, overlay hiding)
const FRAMEWORK_CLASS_PREFIXES: &[&str] = &["ng-", "react-", "vue-", "js-", "retro-overlay-"];

/// Number of elements carrying each id in a document
#[derive(Debug, Default)]
pub struct IdCounts(HashMap<String, usize>);

impl IdCounts {
    pub fn from_document(doc: &Html) -> Self {
        let mut counts = HashMap::new();
        for el in doc.root_element().descendent_elements() {
            if let Some(id) = el.value().id() {
                *counts.entry(id.to_string()).or_insert(0) += 1;
            }
        }
        Self(counts)
    }

    fn is_unique(&self, id: &str) -> bool {
        self.0.get(id).copied() == Some(1)
    }
}

/// Build a selector that resolves back to exactly `el` within its document.
///
/// `#id` is used when the id is a plain identifier and unique; otherwise a
/// child-combinator path from `<html>` down to the element.
pub fn build_selector(el: ElementRef, ids: &IdCounts) -> String {
    if let Some(id) = el.value().id() {
        if is_css_identifier(id) && ids.is_unique(id) {
            return format!("#{}", id);
        }
    }

    let mut segments = Vec::new();
    let mut current = Some(el);
    while let Some(node) = current {
        segments.push(path_segment(node));
        current = node.parent().and_then(ElementRef::wrap);
    }
    segments.reverse();
    segments.join(" > ")
}

/// `tag[.class…][role="…"][:nth-child(n)]` for one step of the path
fn path_segment(el: ElementRef) -> String {
    let element = el.value();
    let mut segment = element.name().to_string();

    for class in element.classes() {
        if keep_class(class) {
            segment.push('.');
            segment.push_str(class);
        }
    }

    if let Some(role) = element.attr("role") {
        segment.push_str(&format!("[role=\"{}\"]", escape_css_string(role)));
    }

    if has_same_tag_sibling(el) {
        segment.push_str(&format!(":nth-child({})", element_index(el)));
    }

    segment
}

fn keep_class(class: &str) -> bool {
    is_css_identifier(class)
        && !FRAMEWORK_CLASS_PREFIXES
            .iter()
            .any(|prefix| class.starts_with(prefix))
}

fn has_same_tag_sibling(el: ElementRef) -> bool {
    let name = el.value().name();
    let Some(parent) = el.parent() else {
        return false;
    };
    parent
        .children()
        .filter_map(ElementRef::wrap)
        .any(|sibling| sibling.id() != el.id() && sibling.value().name() == name)
}

/// 1-based position among element siblings, as `:nth-child` counts
fn element_index(el: ElementRef) -> usize {
    el.prev_siblings()
        .filter(|sibling| sibling.value().is_element())
        .count()
        + 1
}

/// Body of a double-quoted CSS string. Control characters become hex escapes.
fn escape_css_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\0' => out.push('\u{FFFD}'),
            '\\' | '"' => {
                out.push('\\');
                out.push(c);
            }
            c if c.is_control() => out.push_str(&format!("\\{:x} ", u32::from(c))),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Selector;

    fn selector_for(html: &str, target: &str) -> String {
        let doc = Html::parse_document(html);
        let ids = IdCounts::from_document(&doc);
        let el = doc
            .select(&Selector::parse(target).unwrap())
            .next()
            .unwrap();
        build_selector(el, &ids)
    }

    #[test]
    fn test_unique_id_wins() {
        let html = r#"<html><body><div><input id="q"></div></body></html>"#;
        assert_eq!(selector_for(html, "input"), "#q");
    }

    #[test]
    fn test_duplicate_id_falls_back_to_path() {
        let html = r#"<html><body><p id="dup">a</p><p id="dup">b</p></body></html>"#;
        let selector = selector_for(html, "p + p");
        assert_eq!(selector, "html > body > p:nth-child(2)");
    }

    #[test]
    fn test_framework_classes_dropped() {
        let html = r#"<html><body><div class="card js-toggle ng-scope react-root">x</div></body></html>"#;
        assert_eq!(selector_for(html, "div"), "html > body > div.card");
    }

    #[test]
    fn test_role_included_and_nth_child_only_for_same_tag() {
        let html = r#"<html><body><span>a</span><div role="button">b</div></body></html>"#;
        assert_eq!(
            selector_for(html, "div"),
            "html > body > div[role=\"button\"]"
        );
    }

    #[test]
    fn test_nth_child_counts_all_element_siblings() {
        let html = r#"<html><body><ul><li>a</li><span>s</span><li>b</li></ul></body></html>"#;
        assert_eq!(
            selector_for(html, "span + li"),
            "html > body > ul > li:nth-child(3)"
        );
    }

    #[test]
    fn test_role_with_control_characters_still_resolves() {
        let html = "<html><body><div role=\"tab&#10;list\ttwo\\\">x</div></body></html>";
        let built = selector_for(html, "div");
        assert_eq!(built, "html > body > div[role=\"tab\\a list\\9 two\\\\\"]");

        let doc = Html::parse_document(html);
        let parsed = Selector::parse(&built).unwrap();
        assert_eq!(doc.select(&parsed).count(), 1);
    }
}
