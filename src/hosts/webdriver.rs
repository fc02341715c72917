use super::{FrameTarget, HIDDEN_CLASS, ORIGINAL_FRAME_ID, PageHost, SURFACE_ID, SurfaceLayout};
use crate::error::HostError;
use crate::materialize::SurfaceEvent;
use crate::serializer::CapturedPage;
use crate::serializer::layout::{LAYOUT_REF_ATTR, LayoutMap};
use async_trait::async_trait;
use fantoccini::{Client, ClientBuilder};
use serde::Deserialize;
use serde_json::{Value, json};

/// WebDriver servers tried when the configured one refuses the connection
const FALLBACK_WEBDRIVER_URLS: &[&str] = &[
    "http://localhost:9515", // ChromeDriver
    "http://localhost:4723", // Appium
    "http://localhost:9222", // Chrome debug port
    "http://127.0.0.1:4444",
];

/// Measures every element with the hiding class lifted and returns a clean
/// copy of the document. Layout refs are stamped on the copy only.
const CAPTURE_SCRIPT: &str = r#"
var refAttr = arguments[0], hiddenClass = arguments[1], skipIds = arguments[2];
var frame = document.getElementById(skipIds[0]);
var doc = (frame && frame.contentDocument) ? frame.contentDocument : document;
var win = doc.defaultView || window;
var lifted = Array.prototype.slice.call(doc.querySelectorAll('.' + hiddenClass));
lifted.forEach(function (el) { el.classList.remove(hiddenClass); });
var copy = doc.documentElement.cloneNode(true);
var layout = {};
var all = doc.getElementsByTagName('*');
var copies = copy.getElementsByTagName('*');
for (var i = 0; i < all.length && i < copies.length; i++) {
  var ref = String(i + 1);
  copies[i].setAttribute(refAttr, ref);
  var r = all[i].getBoundingClientRect();
  var cs = win.getComputedStyle(all[i]);
  layout[ref] = {
    bbox: { x: r.x, y: r.y, width: r.width, height: r.height },
    display: cs.display, visibility: cs.visibility, opacity: parseFloat(cs.opacity)
  };
}
lifted.forEach(function (el) { el.classList.add(hiddenClass); });
skipIds.forEach(function (id) {
  var node = copy.querySelector('#' + id);
  if (node) { node.remove(); }
});
return { html: '<!DOCTYPE html>' + copy.outerHTML, layout: layout };
"#;

const HIDE_SCRIPT: &str = r#"
var hiddenClass = arguments[0], skipIds = arguments[1], count = 0;
Array.prototype.forEach.call(document.body.children, function (el) {
  if (skipIds.indexOf(el.id) >= 0 || el.classList.contains(hiddenClass)) { return; }
  el.classList.add(hiddenClass);
  count++;
});
return count;
"#;

const SHOW_SCRIPT: &str = r#"
var hiddenClass = arguments[0];
Array.prototype.forEach.call(document.querySelectorAll('.' + hiddenClass), function (el) {
  el.classList.remove(hiddenClass);
  if (el.classList.length === 0) { el.removeAttribute('class'); }
});
"#;

const HIDE_STYLE_SCRIPT: &str = r#"
var hiddenClass = arguments[0];
if (!document.getElementById('retro-overlay-style')) {
  var style = document.createElement('style');
  style.id = 'retro-overlay-style';
  style.textContent = '.' + hiddenClass + ' { display: none !important; }';
  document.head.appendChild(style);
}
"#;

const MOUNT_FRAME_SCRIPT: &str = r#"
var id = arguments[0], html = arguments[1], css = arguments[2];
var frame = document.getElementById(id);
if (!frame) {
  frame = document.createElement('iframe');
  frame.id = id;
  document.body.appendChild(frame);
}
frame.setAttribute('style', css);
frame.srcdoc = html;
"#;

const REMOVE_NODE_SCRIPT: &str = r#"
var node = document.getElementById(arguments[0]);
if (node) { node.remove(); }
"#;

/// Collects PROXY_EVENT messages posted by the surface bridge
const LISTEN_SCRIPT: &str = r#"
if (!window.__retroOverlayEvents) {
  window.__retroOverlayEvents = [];
  window.addEventListener('message', function (e) {
    if (e.data && e.data.type === 'PROXY_EVENT') { window.__retroOverlayEvents.push(e.data); }
  });
}
"#;

const DRAIN_SCRIPT: &str = r#"
var events = window.__retroOverlayEvents || [];
window.__retroOverlayEvents = [];
return events;
"#;

/// Resolves `arguments[1]` in the frame or top document and acts on it.
/// Returns "ok", "missing" or "invalid".
const ACTION_SCRIPT: &str = r#"
var target = arguments[0], selector = arguments[1], action = arguments[2], value = arguments[3];
var doc = document;
if (target === 'frame') {
  var frame = document.getElementById(arguments[4]);
  doc = frame ? frame.contentDocument : null;
}
if (!doc) { return 'missing'; }
var el;
try { el = doc.querySelector(selector); } catch (e) { return 'invalid'; }
if (!el) { return 'missing'; }
if (action === 'click') {
  el.click();
} else {
  el.value = value;
  el.dispatchEvent(new Event('input', { bubbles: true }));
  el.dispatchEvent(new Event('change', { bubbles: true }));
}
return 'ok';
"#;

const FRAME_SIDE_CSS: &str =
    "position:fixed;top:0;left:0;width:50vw;height:100vh;border:0;z-index:2147483646;background:#fff";
const SURFACE_SIDE_CSS: &str =
    "position:fixed;top:0;right:0;width:50vw;height:100vh;border:0;z-index:2147483647;background:#fff";
const SURFACE_FULL_CSS: &str =
    "position:fixed;top:0;left:0;width:100vw;height:100vh;border:0;z-index:2147483647;background:#fff";

#[derive(Deserialize)]
struct CaptureResult {
    html: String,
    #[serde(default)]
    layout: LayoutMap,
}

/// Page host driving a real browser over WebDriver
pub struct WebDriverPage {
    client: Client,
    url: String,
}

impl WebDriverPage {
    /// Connect to `webdriver_url`, falling back to the usual local ports
    pub async fn connect(webdriver_url: &str) -> Result<Client, HostError> {
        match ClientBuilder::native().connect(webdriver_url).await {
            Ok(client) => {
                ::log::debug!("Connected to WebDriver at {}", webdriver_url);
                return Ok(client);
            }
            Err(e) => {
                ::log::error!("Failed to connect to WebDriver at {}: {}", webdriver_url, e);
            }
        }

        for url in FALLBACK_WEBDRIVER_URLS {
            if *url == webdriver_url {
                continue;
            }
            ::log::info!("Trying fallback WebDriver URL: {}", url);
            if let Ok(client) = ClientBuilder::native().connect(url).await {
                ::log::debug!("Connected to fallback WebDriver at {}", url);
                return Ok(client);
            }
        }

        ::log::error!(
            "Make sure a WebDriver server is running or set the WEBDRIVER_URL environment variable"
        );
        Err(HostError::Connect(format!(
            "no WebDriver server reachable at {} or the fallback URLs",
            webdriver_url
        )))
    }

    /// Open `url` in a fresh WebDriver session
    pub async fn open(webdriver_url: &str, url: &str) -> Result<Self, HostError> {
        let client = Self::connect(webdriver_url).await?;
        client.goto(url).await?;
        ::log::info!("Opened {}", url);

        let page = Self {
            client,
            url: url.to_string(),
        };
        page.run(LISTEN_SCRIPT, vec![]).await?;
        page.run(HIDE_STYLE_SCRIPT, vec![json!(HIDDEN_CLASS)]).await?;
        Ok(page)
    }

    pub async fn close(self) -> Result<(), HostError> {
        self.client.close().await?;
        Ok(())
    }

    async fn run(&self, script: &str, args: Vec<Value>) -> Result<Value, HostError> {
        Ok(self.client.execute(script, args).await?)
    }

    async fn act(
        &self,
        target: FrameTarget,
        selector: &str,
        action: &str,
        value: &str,
    ) -> Result<bool, HostError> {
        let target = match target {
            FrameTarget::OriginalFrame => "frame",
            FrameTarget::TopDocument => "top",
        };
        let outcome = self
            .run(
                ACTION_SCRIPT,
                vec![
                    json!(target),
                    json!(selector),
                    json!(action),
                    json!(value),
                    json!(ORIGINAL_FRAME_ID),
                ],
            )
            .await?;

        match outcome.as_str() {
            Some("ok") => Ok(true),
            Some("invalid") => Err(HostError::InvalidSelector(selector.to_string())),
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl PageHost for WebDriverPage {
    fn page_url(&self) -> &str {
        &self.url
    }

    async fn capture(&mut self) -> Result<CapturedPage, HostError> {
        let raw = self
            .run(
                CAPTURE_SCRIPT,
                vec![
                    json!(LAYOUT_REF_ATTR),
                    json!(HIDDEN_CLASS),
                    json!([ORIGINAL_FRAME_ID, SURFACE_ID]),
                ],
            )
            .await?;
        let result: CaptureResult = serde_json::from_value(raw)
            .map_err(|e| HostError::Command(format!("unexpected capture result: {}", e)))?;
        ::log::debug!(
            "Captured {} bytes of HTML with {} measured elements",
            result.html.len(),
            result.layout.len()
        );

        Ok(CapturedPage {
            url: self.url.clone(),
            html: result.html,
            layout: result.layout,
        })
    }

    async fn hide_original(&mut self) -> Result<usize, HostError> {
        let count = self
            .run(
                HIDE_SCRIPT,
                vec![json!(HIDDEN_CLASS), json!([ORIGINAL_FRAME_ID, SURFACE_ID])],
            )
            .await?;
        Ok(count.as_u64().unwrap_or_default() as usize)
    }

    async fn show_original(&mut self) -> Result<(), HostError> {
        self.run(SHOW_SCRIPT, vec![json!(HIDDEN_CLASS)]).await?;
        Ok(())
    }

    async fn mount_original_frame(&mut self, html: &str) -> Result<(), HostError> {
        self.run(
            MOUNT_FRAME_SCRIPT,
            vec![json!(ORIGINAL_FRAME_ID), json!(html), json!(FRAME_SIDE_CSS)],
        )
        .await?;
        Ok(())
    }

    async fn remove_original_frame(&mut self) -> Result<(), HostError> {
        self.run(REMOVE_NODE_SCRIPT, vec![json!(ORIGINAL_FRAME_ID)]).await?;
        Ok(())
    }

    async fn mount_surface(&mut self, html: &str, layout: SurfaceLayout) -> Result<(), HostError> {
        let css = match layout {
            SurfaceLayout::SideBySide => SURFACE_SIDE_CSS,
            SurfaceLayout::FullViewport => SURFACE_FULL_CSS,
        };
        self.run(LISTEN_SCRIPT, vec![]).await?;
        self.run(
            MOUNT_FRAME_SCRIPT,
            vec![json!(SURFACE_ID), json!(html), json!(css)],
        )
        .await?;
        Ok(())
    }

    async fn unmount_surface(&mut self) -> Result<(), HostError> {
        self.run(REMOVE_NODE_SCRIPT, vec![json!(SURFACE_ID)]).await?;
        Ok(())
    }

    async fn click(&mut self, target: FrameTarget, selector: &str) -> Result<bool, HostError> {
        self.act(target, selector, "click", "").await
    }

    async fn set_value(
        &mut self,
        target: FrameTarget,
        selector: &str,
        value: &str,
    ) -> Result<bool, HostError> {
        self.act(target, selector, "change", value).await
    }

    async fn drain_surface_events(&mut self) -> Result<Vec<SurfaceEvent>, HostError> {
        let raw = self.run(DRAIN_SCRIPT, vec![]).await?;
        let Value::Array(items) = raw else {
            return Ok(Vec::new());
        };

        Ok(items
            .into_iter()
            .filter_map(|item| match serde_json::from_value::<SurfaceEvent>(item) {
                Ok(event) => Some(event),
                Err(e) => {
                    ::log::warn!("Ignoring malformed surface event: {}", e);
                    None
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_stamps_refs_on_the_copy_only() {
        let clone_at = CAPTURE_SCRIPT.find("cloneNode(true)");
        let stamp_at = CAPTURE_SCRIPT.find("setAttribute(refAttr");
        assert!(clone_at.is_some() && clone_at < stamp_at);
        assert_eq!(CAPTURE_SCRIPT.matches("setAttribute(").count(), 1);
        assert!(CAPTURE_SCRIPT.contains("copies[i].setAttribute(refAttr, ref)"));
    }
}
