use super::{FrameTarget, HIDDEN_CLASS, ORIGINAL_FRAME_ID, PageHost, SURFACE_ID, SurfaceLayout};
use crate::error::HostError;
use crate::materialize::SurfaceEvent;
use crate::patch::render::{Edit, render_document};
use crate::serializer::CapturedPage;
use crate::utils::escape_text;
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use std::collections::{HashMap, VecDeque};
use std::sync::LazyLock;

static BODY_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("body").expect("body selector should be valid"));

/// Action performed on a [`VirtualPage`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostAction {
    Click {
        target: FrameTarget,
        selector: String,
    },
    SetValue {
        target: FrameTarget,
        selector: String,
        value: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountedSurface {
    pub html: String,
    pub layout: SurfaceLayout,
}

/// In-memory page host.
///
/// The top document is kept as an HTML string and mutated the way a content
/// script would mutate the live DOM. Clicks can be given a reaction (the
/// document the page turns into afterwards) to stand in for page scripts.
#[derive(Debug, Clone, Default)]
pub struct VirtualPage {
    url: String,
    document: String,
    hidden: bool,
    frame: Option<String>,
    surface: Option<MountedSurface>,
    reactions: HashMap<String, String>,
    actions: Vec<HostAction>,
    pending_events: VecDeque<SurfaceEvent>,
    refused_mounts: usize,
}

impl VirtualPage {
    pub fn new(url: &str, html: &str) -> Self {
        Self {
            url: url.to_string(),
            document: html.to_string(),
            ..Self::default()
        }
    }

    /// After a click on `selector`, the clicked document becomes `html`
    pub fn with_click_reaction(mut self, selector: &str, html: &str) -> Self {
        self.reactions.insert(selector.to_string(), html.to_string());
        self
    }

    /// The next `count` surface mounts fail
    pub fn refuse_surface_mounts(mut self, count: usize) -> Self {
        self.refused_mounts = count;
        self
    }

    pub fn document(&self) -> &str {
        &self.document
    }

    pub fn frame(&self) -> Option<&str> {
        self.frame.as_deref()
    }

    pub fn surface(&self) -> Option<&MountedSurface> {
        self.surface.as_ref()
    }

    pub fn actions(&self) -> &[HostAction] {
        &self.actions
    }

    /// Queue an event as if the surface bridge had posted it
    pub fn post_surface_event(&mut self, event: SurfaceEvent) {
        self.pending_events.push_back(event);
    }

    /// `class` attribute of each top-level body child, in document order
    pub fn body_child_classes(&self) -> Vec<Option<String>> {
        let doc = Html::parse_document(&self.document);
        body_children(&doc)
            .map(|child| child.value().attr("class").map(str::to_string))
            .collect()
    }

    fn document_for(&self, target: FrameTarget) -> Option<&str> {
        match target {
            FrameTarget::OriginalFrame => self.frame.as_deref(),
            FrameTarget::TopDocument => Some(&self.document),
        }
    }

    /// Replace the document behind `target`, keeping the top document hidden
    /// if it was
    fn replace_document(&mut self, target: FrameTarget, html: String) {
        match target {
            FrameTarget::OriginalFrame => self.frame = Some(html),
            FrameTarget::TopDocument => {
                self.document = if self.hidden {
                    toggle_hidden_class(&html, true).0
                } else {
                    html
                };
            }
        }
    }
}

fn parse_selector(selector: &str) -> Result<Selector, HostError> {
    Selector::parse(selector).map_err(|e| HostError::InvalidSelector(format!("{}: {}", selector, e)))
}

fn body_children(doc: &Html) -> impl Iterator<Item = ElementRef<'_>> {
    doc.select(&BODY_SELECTOR)
        .next()
        .into_iter()
        .flat_map(|body| body.children().filter_map(ElementRef::wrap))
}

fn is_overlay_node(el: ElementRef) -> bool {
    matches!(el.value().id(), Some(ORIGINAL_FRAME_ID) | Some(SURFACE_ID))
}

/// Add or remove [`HIDDEN_CLASS`] on every top-level body child.
/// Returns the new document and the number of elements changed.
fn toggle_hidden_class(html: &str, hidden: bool) -> (String, usize) {
    let mut current = html.to_string();
    let mut changed = 0;
    let mut index = 0;

    loop {
        let doc = Html::parse_document(&current);
        let Some(child) = body_children(&doc).nth(index) else {
            return (current, changed);
        };
        index += 1;
        if is_overlay_node(child) {
            continue;
        }

        let tokens: Vec<&str> = child
            .value()
            .attr("class")
            .unwrap_or_default()
            .split_whitespace()
            .collect();
        let has_class = tokens.contains(&HIDDEN_CLASS);

        let class_value: String;
        let edit = match (hidden, has_class) {
            (true, false) => {
                class_value = tokens
                    .iter()
                    .copied()
                    .chain(std::iter::once(HIDDEN_CLASS))
                    .collect::<Vec<_>>()
                    .join(" ");
                Edit::SetAttribute("class", &class_value)
            }
            (false, true) => {
                let remaining: Vec<&str> =
                    tokens.iter().copied().filter(|t| *t != HIDDEN_CLASS).collect();
                if remaining.is_empty() {
                    Edit::RemoveAttribute("class")
                } else {
                    class_value = remaining.join(" ");
                    Edit::SetAttribute("class", &class_value)
                }
            }
            _ => continue,
        };

        current = render_document(&doc, Some((child, edit)));
        changed += 1;
    }
}

#[async_trait]
impl PageHost for VirtualPage {
    fn page_url(&self) -> &str {
        &self.url
    }

    async fn capture(&mut self) -> Result<CapturedPage, HostError> {
        let html = match &self.frame {
            Some(frame) => frame.clone(),
            None if self.hidden => toggle_hidden_class(&self.document, false).0,
            None => self.document.clone(),
        };
        Ok(CapturedPage::new(&self.url, &html))
    }

    async fn hide_original(&mut self) -> Result<usize, HostError> {
        let (document, changed) = toggle_hidden_class(&self.document, true);
        self.document = document;
        self.hidden = true;
        Ok(changed)
    }

    async fn show_original(&mut self) -> Result<(), HostError> {
        if self.hidden {
            self.document = toggle_hidden_class(&self.document, false).0;
            self.hidden = false;
        }
        Ok(())
    }

    async fn mount_original_frame(&mut self, html: &str) -> Result<(), HostError> {
        self.frame = Some(html.to_string());
        Ok(())
    }

    async fn remove_original_frame(&mut self) -> Result<(), HostError> {
        self.frame = None;
        Ok(())
    }

    async fn mount_surface(&mut self, html: &str, layout: SurfaceLayout) -> Result<(), HostError> {
        if self.refused_mounts > 0 {
            self.refused_mounts -= 1;
            return Err(HostError::Command("surface mount refused".to_string()));
        }
        self.surface = Some(MountedSurface {
            html: html.to_string(),
            layout,
        });
        Ok(())
    }

    async fn unmount_surface(&mut self) -> Result<(), HostError> {
        self.surface = None;
        Ok(())
    }

    async fn click(&mut self, target: FrameTarget, selector: &str) -> Result<bool, HostError> {
        let parsed = parse_selector(selector)?;
        let Some(html) = self.document_for(target) else {
            return Ok(false);
        };
        if Html::parse_document(html).select(&parsed).next().is_none() {
            return Ok(false);
        }

        self.actions.push(HostAction::Click {
            target,
            selector: selector.to_string(),
        });
        if let Some(reaction) = self.reactions.get(selector).cloned() {
            self.replace_document(target, reaction);
        }
        Ok(true)
    }

    async fn set_value(
        &mut self,
        target: FrameTarget,
        selector: &str,
        value: &str,
    ) -> Result<bool, HostError> {
        let parsed = parse_selector(selector)?;
        let Some(html) = self.document_for(target) else {
            return Ok(false);
        };
        let doc = Html::parse_document(html);
        let Some(element) = doc.select(&parsed).next() else {
            return Ok(false);
        };

        let escaped = escape_text(value);
        let edit = if element.value().name() == "textarea" {
            Edit::ReplaceContent(&escaped)
        } else {
            Edit::SetAttribute("value", value)
        };
        let updated = render_document(&doc, Some((element, edit)));
        self.replace_document(target, updated);

        self.actions.push(HostAction::SetValue {
            target,
            selector: selector.to_string(),
            value: value.to_string(),
        });
        Ok(true)
    }

    async fn drain_surface_events(&mut self) -> Result<Vec<SurfaceEvent>, HostError> {
        Ok(self.pending_events.drain(..).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head></head><body><nav class="top">Menu</nav><div id="main"><input id="q" value=""><button id="go">Go</button></div><textarea id="t">old</textarea></body></html>"#;

    #[tokio::test]
    async fn test_hide_and_show_restore_classes() {
        let mut page = VirtualPage::new("https://example.test/", PAGE);
        let before = page.body_child_classes();

        assert_eq!(page.hide_original().await.unwrap(), 3);
        assert_eq!(
            page.body_child_classes(),
            vec![
                Some("top retro-overlay-hidden".to_string()),
                Some("retro-overlay-hidden".to_string()),
                Some("retro-overlay-hidden".to_string()),
            ]
        );
        // Hiding twice does not stack the class
        assert_eq!(page.hide_original().await.unwrap(), 0);

        page.show_original().await.unwrap();
        assert_eq!(page.body_child_classes(), before);
    }

    #[tokio::test]
    async fn test_capture_prefers_frame_and_strips_hiding() {
        let mut page = VirtualPage::new("https://example.test/", PAGE);
        page.hide_original().await.unwrap();

        let captured = page.capture().await.unwrap();
        assert!(!captured.html.contains(HIDDEN_CLASS));
        assert_eq!(captured.url, "https://example.test/");

        page.mount_original_frame("<html><body>frame</body></html>").await.unwrap();
        assert!(page.capture().await.unwrap().html.contains("frame"));
    }

    #[tokio::test]
    async fn test_click_resolution() {
        let mut page = VirtualPage::new("https://example.test/", PAGE)
            .with_click_reaction("#go", "<html><body><p id=\"done\">Done</p></body></html>");

        assert!(!page.click(FrameTarget::OriginalFrame, "#go").await.unwrap());
        assert!(!page.click(FrameTarget::TopDocument, "#missing").await.unwrap());
        assert!(page.click(FrameTarget::TopDocument, "#go").await.unwrap());
        assert!(page.document().contains("id=\"done\""));
        assert_eq!(page.actions().len(), 1);

        let result = page.click(FrameTarget::TopDocument, "div[").await;
        assert!(matches!(result, Err(HostError::InvalidSelector(_))));
    }

    #[tokio::test]
    async fn test_set_value_on_input_and_textarea() {
        let mut page = VirtualPage::new("https://example.test/", PAGE);
        page.mount_original_frame(PAGE).await.unwrap();

        assert!(page.set_value(FrameTarget::OriginalFrame, "#q", "shoes").await.unwrap());
        assert!(page.set_value(FrameTarget::OriginalFrame, "#t", "a < b").await.unwrap());

        let frame = page.frame().unwrap();
        assert!(frame.contains("value=\"shoes\""));
        assert!(frame.contains(">a &lt; b</textarea>"));
        // The top document is untouched
        assert!(page.document().contains(">old</textarea>"));
    }

    #[tokio::test]
    async fn test_surface_events_are_drained_once() {
        let mut page = VirtualPage::new("https://example.test/", PAGE);
        page.post_surface_event(SurfaceEvent {
            proxy_id: "rp-1".into(),
            event: crate::materialize::ProxyAction::Click,
            value: None,
        });

        assert_eq!(page.drain_surface_events().await.unwrap().len(), 1);
        assert!(page.drain_surface_events().await.unwrap().is_empty());
    }
}
