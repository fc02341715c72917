//! HTML serialization of a parsed document with at most one edit applied.

use crate::utils::{escape_attr, escape_text};
use scraper::{ElementRef, Html, Node};

/// Elements without content or closing tag
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "keygen", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Elements whose text children are written out unescaped
const RAW_TEXT_ELEMENTS: &[&str] = &[
    "script", "style", "xmp", "iframe", "noembed", "noframes", "plaintext", "noscript",
];

/// A change applied to one element while rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edit<'a> {
    /// Replace the element's content with raw HTML
    ReplaceContent(&'a str),
    /// Insert raw HTML after the element's content
    Append(&'a str),
    /// Insert raw HTML before the element's content
    Prepend(&'a str),
    /// Drop the element and its subtree
    Remove,
    SetAttribute(&'a str, &'a str),
    RemoveAttribute(&'a str),
}

/// Render `doc`, applying `edit` at `target`
pub fn render_document(doc: &Html, target: Option<(ElementRef<'_>, Edit<'_>)>) -> String {
    let mut out = String::new();
    for child in doc.tree.root().children() {
        match child.value() {
            Node::Doctype(doctype) => {
                out.push_str("<!DOCTYPE ");
                out.push_str(doctype.name());
                out.push('>');
            }
            Node::Comment(comment) => push_comment(&mut out, comment),
            Node::Text(text) => out.push_str(&escape_text(text)),
            Node::Element(_) => {
                if let Some(el) = ElementRef::wrap(child) {
                    render_element(&mut out, el, target);
                }
            }
            _ => {}
        }
    }
    out
}

/// Render one element and its subtree
pub fn render_element(out: &mut String, el: ElementRef<'_>, target: Option<(ElementRef<'_>, Edit<'_>)>) {
    let edit = target.and_then(|(node, edit)| (node == el).then_some(edit));
    if edit == Some(Edit::Remove) {
        return;
    }

    let element = el.value();
    let name = element.name();

    out.push('<');
    out.push_str(name);
    for (attr, value) in element.attrs() {
        match edit {
            Some(Edit::SetAttribute(target_attr, _)) | Some(Edit::RemoveAttribute(target_attr))
                if attr == target_attr =>
            {
                continue;
            }
            _ => push_attr(out, attr, value),
        }
    }
    if let Some(Edit::SetAttribute(attr, value)) = edit {
        push_attr(out, attr, value);
    }
    out.push('>');

    if VOID_ELEMENTS.contains(&name) {
        return;
    }

    match edit {
        Some(Edit::ReplaceContent(html)) => out.push_str(html),
        Some(Edit::Prepend(html)) => {
            out.push_str(html);
            render_children(out, el, target);
        }
        Some(Edit::Append(html)) => {
            render_children(out, el, target);
            out.push_str(html);
        }
        _ => render_children(out, el, target),
    }

    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

fn render_children(out: &mut String, el: ElementRef<'_>, target: Option<(ElementRef<'_>, Edit<'_>)>) {
    let raw = RAW_TEXT_ELEMENTS.contains(&el.value().name());
    for child in el.children() {
        match child.value() {
            Node::Text(text) if raw => out.push_str(text),
            Node::Text(text) => out.push_str(&escape_text(text)),
            Node::Comment(comment) => push_comment(out, comment),
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    render_element(out, child_el, target);
                }
            }
            _ => {}
        }
    }
}

fn push_attr(out: &mut String, name: &str, value: &str) {
    out.push(' ');
    out.push_str(name);
    out.push_str("=\"");
    out.push_str(&escape_attr(value));
    out.push('"');
}

fn push_comment(out: &mut String, comment: &str) {
    out.push_str("<!--");
    out.push_str(comment);
    out.push_str("-->");
}
