use crate::config::SerializerConfig;
use crate::descriptor::{BoundingBox, ElementDescriptor};
use crate::serializer::layout::LayoutInfo;
use crate::serializer::{CapturedPage, Serializer};
use scraper::{Html, Selector};

const SHOP_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Shop</title><style>.x { color: red }</style></head>
<body>
  <header class="site-header">
    <a href="/">Home</a>
    <a href="/deals">Deals</a>
    <a href="/help">Help</a>
  </header>
  <main>
    <label for="q">Search products</label>
    <input id="q" type="text" placeholder="Type here">
    <button id="go">Search</button>
    <div class="card ng-binding"><p>First</p><p>Second</p></div>
    <div class="card"><span role="button" tabindex="0">More</span></div>
    <p style="display: none">Hidden note</p>
    <div hidden><button>Ghost</button></div>
    <input type="hidden" name="csrf" value="t">
    <script>var secret = "do not show";</script>
  </main>
  <footer><p>(c) Shop</p></footer>
</body>
</html>"#;

fn find<'a>(root: &'a ElementDescriptor, pred: impl Fn(&ElementDescriptor) -> bool) -> &'a ElementDescriptor {
    root.iter().find(|d| pred(d)).expect("descriptor not found")
}

#[test]
fn test_every_selector_resolves_to_its_element() {
    let doc = Html::parse_document(SHOP_PAGE);
    let tree = Serializer::default().serialize(&doc);

    let elements: Vec<_> = doc.root_element().descendent_elements().collect();
    let descriptors: Vec<_> = tree.iter().collect();
    assert_eq!(elements.len(), descriptors.len());

    for (element, descriptor) in elements.iter().zip(descriptors) {
        let selector = Selector::parse(&descriptor.selector)
            .unwrap_or_else(|_| panic!("unparsable selector {}", descriptor.selector));
        let matches: Vec<_> = doc.select(&selector).collect();
        assert_eq!(matches.len(), 1, "selector {} is ambiguous", descriptor.selector);
        assert_eq!(matches[0].id(), element.id(), "selector {} resolves elsewhere", descriptor.selector);
    }
}

#[test]
fn test_root_is_html() {
    let tree = Serializer::default().serialize_html(SHOP_PAGE);
    assert_eq!(tree.tag, "html");
    assert_eq!(tree.selector, "html");
}

#[test]
fn test_label_priority() {
    let tree = Serializer::default().serialize_html(SHOP_PAGE);
    let input = find(&tree, |d| d.id.as_deref() == Some("q"));
    assert_eq!(input.label.as_deref(), Some("Search products"));

    let html = r#"<html><body>
        <label for="a">From label</label>
        <input id="a" aria-label="From aria" placeholder="From placeholder">
        <input id="b" placeholder="From placeholder" title="From title">
        <input id="c" title="From title">
        <input id="d">
    </body></html>"#;
    let tree = Serializer::default().serialize_html(html);
    let label_of = |id: &str| find(&tree, |d| d.id.as_deref() == Some(id)).label.clone();
    assert_eq!(label_of("a").as_deref(), Some("From aria"));
    assert_eq!(label_of("b").as_deref(), Some("From placeholder"));
    assert_eq!(label_of("c").as_deref(), Some("From title"));
    assert_eq!(label_of("d"), None);
}

#[test]
fn test_interactive_flags() {
    let tree = Serializer::default().serialize_html(SHOP_PAGE);
    assert!(find(&tree, |d| d.id.as_deref() == Some("go")).is_interactive);
    assert!(find(&tree, |d| d.role.as_deref() == Some("button")).is_interactive);
    assert!(!find(&tree, |d| d.tag == "footer").is_interactive);
}

#[test]
fn test_navigation_flags() {
    let tree = Serializer::default().serialize_html(SHOP_PAGE);
    assert!(find(&tree, |d| d.tag == "header").is_navigation_candidate);
    assert!(find(&tree, |d| d.tag == "footer").is_navigation_candidate);
    // body holds more than two links/buttons below it
    assert!(find(&tree, |d| d.tag == "body").is_navigation_candidate);
    assert!(!find(&tree, |d| d.text.as_deref() == Some("First")).is_navigation_candidate);
}

#[test]
fn test_link_density_makes_navigation_candidate() {
    let html = r#"<html><body><div id="links"><a href="/1">1</a><a href="/2">2</a><span><a href="/3">3</a></span></div><div id="two"><a href="/1">1</a><a href="/2">2</a></div></body></html>"#;
    let tree = Serializer::default().serialize_html(html);
    assert!(find(&tree, |d| d.id.as_deref() == Some("links")).is_navigation_candidate);
    assert!(!find(&tree, |d| d.id.as_deref() == Some("two")).is_navigation_candidate);
}

#[test]
fn test_visibility_from_inline_style_and_attributes() {
    let tree = Serializer::default().serialize_html(SHOP_PAGE);
    assert!(find(&tree, |d| d.id.as_deref() == Some("go")).visible);
    assert!(!find(&tree, |d| d.text.as_deref() == Some("Hidden note")).visible);
    // hidden propagates to children
    assert!(!find(&tree, |d| d.text.as_deref() == Some("Ghost") && d.tag == "button").visible);
    assert!(!find(&tree, |d| d.name.as_deref() == Some("csrf")).visible);
}

#[test]
fn test_visibility_from_measured_layout() {
    let html = r#"<html><body><button data-retro-ref="1">Shown</button><button data-retro-ref="2">Zero</button><button data-retro-ref="3">Faded</button></body></html>"#;
    let mut page = CapturedPage::new("https://shop.test/", html);
    let sized = BoundingBox { x: 0.0, y: 0.0, width: 80.0, height: 20.0 };
    page.layout.insert("1".into(), LayoutInfo { bbox: sized, ..Default::default() });
    page.layout.insert("2".into(), LayoutInfo::default());
    page.layout.insert(
        "3".into(),
        LayoutInfo { bbox: sized, opacity: Some(0.0), ..Default::default() },
    );

    let tree = Serializer::default().serialize_page(&page);
    let button = |text: &str| find(&tree, |d| d.tag == "button" && d.text.as_deref() == Some(text)).clone();
    assert!(button("Shown").visible);
    assert_eq!(button("Shown").bbox, Some(sized));
    assert!(!button("Zero").visible);
    assert!(!button("Faded").visible);
}

#[test]
fn test_text_skips_scripts_and_is_truncated() {
    let tree = Serializer::default().serialize_html(SHOP_PAGE);
    let main = find(&tree, |d| d.tag == "main");
    assert!(!main.text.as_deref().unwrap_or("").contains("secret"));

    let long = format!("<html><body><p>{}</p></body></html>", "word ".repeat(100));
    let tree = Serializer::default().serialize_html(&long);
    let p = find(&tree, |d| d.tag == "p");
    let text = p.text.as_deref().unwrap();
    assert!(text.ends_with("..."));
    assert_eq!(text.chars().count(), 103);
}

#[test]
fn test_children_cap() {
    let items: String = (0..10).map(|i| format!("<li>{}</li>", i)).collect();
    let html = format!("<html><body><ul>{}</ul></body></html>", items);
    let serializer = Serializer::new(SerializerConfig {
        max_children: 3,
        ..SerializerConfig::default()
    });
    let tree = serializer.serialize_html(&html);
    let ul = find(&tree, |d| d.tag == "ul");
    assert_eq!(ul.children.len(), 3);
}

#[test]
fn test_depth_cap_keeps_link_count() {
    let html = r#"<html><body><div id="deep"><div><div><a href="/a">a</a><a href="/b">b</a><a href="/c">c</a></div></div></div></body></html>"#;
    let serializer = Serializer::new(SerializerConfig {
        max_depth: 2,
        ..SerializerConfig::default()
    });
    let tree = serializer.serialize_html(html);
    let deep = find(&tree, |d| d.id.as_deref() == Some("deep"));
    assert!(deep.children.is_empty());
    assert!(deep.is_navigation_candidate);
}

#[test]
fn test_aria_map_and_attributes() {
    let html = r#"<html><body><a id="cart" href="/cart" aria-label="Cart" aria-expanded="false" class="btn primary">Cart (2)</a></body></html>"#;
    let tree = Serializer::default().serialize_html(html);
    let link = find(&tree, |d| d.tag == "a");
    assert_eq!(link.aria.get("aria-expanded").map(String::as_str), Some("false"));
    assert_eq!(link.classes, vec!["btn", "primary"]);
    assert_eq!(link.href.as_deref(), Some("/cart"));
    assert_eq!(link.label.as_deref(), Some("Cart"));
    assert_eq!(link.selector, "#cart");
}
