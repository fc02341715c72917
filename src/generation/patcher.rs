use super::assemble::Assembler;
use crate::config::GenerationConfig;
use crate::descriptor::ElementDescriptor;
use crate::error::GenerationError;
use crate::llm::{ChatRequest, LlmClient, RequestKind};
use crate::materialize::{MaterializedNode, PROXY_ID_ATTR, ProxyRegistry, SURFACE_BRIDGE_SCRIPT};
use crate::patch::{Operation, Patch};
use crate::utils::truncate_chars;
use serde::Serialize;
use std::sync::Arc;

/// The only selectors a generated patch may target
pub const MOUNT_POINTS: &[&str] = &["#app-main", "#app-header", "#app-footer", "title", "body"];

pub const PATCH_SYSTEM_PROMPT: &str = "You maintain a simplified HTML surface by emitting DOM patches. \
Answer with a JSON object {\"version\": \"1.0\", \"operations\": [...]} where each operation has an \
\"op\" (replace, append, prepend, remove, setAttribute, removeAttribute) and a \"selector\", plus \
\"html\" or \"attribute\"/\"value\" as the op requires.";

/// Element summary sent with a patch request
#[derive(Serialize)]
struct PromptElement<'a> {
    tag: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    label: Option<&'a str>,
    /// Markup to use for this element, proxy id included
    html: String,
}

/// Produces patches against the previous surface document
pub struct PatchGenerator {
    client: Option<Arc<LlmClient>>,
    assembler: Assembler,
    config: GenerationConfig,
}

impl PatchGenerator {
    pub fn new(client: Option<Arc<LlmClient>>, config: GenerationConfig) -> Self {
        Self {
            client,
            assembler: Assembler::new(&config.theme_stylesheet),
            config,
        }
    }

    /// Patch turning `old_html` into a surface for `selected`.
    ///
    /// Never fails: without a previous document, without a model or on any
    /// model problem the result is a full-document replace built by the
    /// assembler.
    pub async fn generate_patch(
        &self,
        selected: &[ElementDescriptor],
        old_html: &str,
        intent: &str,
        title: Option<&str>,
        registry: &mut ProxyRegistry,
    ) -> Patch {
        let nodes = self.assembler.materialize(selected, registry);
        let fallback = || Patch::full_document(self.assembler.assemble_nodes(&nodes, title));

        if old_html.trim().is_empty() {
            ::log::debug!("No previous document, emitting a full document");
            return fallback();
        }
        let Some(client) = &self.client else {
            return fallback();
        };

        let request = ChatRequest::json(
            PATCH_SYSTEM_PROMPT,
            self.build_prompt(selected, &nodes, old_html, intent),
        );
        let result = client
            .complete_parsed(RequestKind::Patch, &request, parse_patch_answer)
            .await;

        match result {
            Ok(patch) => {
                ::log::info!("Model produced {} patch operations", patch.operations.len());
                patch
            }
            Err(e) => {
                ::log::warn!("Patch generation failed ({}), replacing the full document", e);
                fallback()
            }
        }
    }

    fn build_prompt(
        &self,
        selected: &[ElementDescriptor],
        nodes: &[MaterializedNode],
        old_html: &str,
        intent: &str,
    ) -> String {
        let limit = self.config.max_prompt_nodes;
        let elements: Vec<PromptElement> = nodes
            .iter()
            .take(limit)
            .map(|node| {
                let source = selected.iter().find(|d| d.selector == node.source_selector);
                PromptElement {
                    tag: source.map(|d| d.tag.as_str()).unwrap_or(node.tag.as_str()),
                    text: source.and_then(ElementDescriptor::trimmed_text),
                    label: source.and_then(|d| d.label.as_deref()),
                    html: node.to_html(),
                }
            })
            .collect();
        let mut elements_json =
            serde_json::to_string_pretty(&elements).unwrap_or_else(|_| "[]".to_string());
        if nodes.len() > limit {
            elements_json.push_str(&format!(
                "\n... {} more elements omitted",
                nodes.len() - limit
            ));
        }

        let old_html = truncate_chars(old_html, self.config.max_old_html_chars);
        let mount_points = MOUNT_POINTS.join(", ");

        format!(
            "User intent: {intent}\n\n\
             Current document:\n{old_html}\n\n\
             Selected elements:\n{elements_json}\n\n\
             Rules:\n\
             - Only target these selectors: {mount_points}.\n\
             - Use only the selected elements above. Never invent elements or text.\n\
             - Reuse each element's html exactly; every element carrying {PROXY_ID_ATTR} must keep it.\n\
             - Prefer the smallest set of operations that reflects the intent."
        )
    }
}

/// Parse a patch answer and drop operations outside the mount points.
/// Replacement documents get the surface bridge script if they lack it.
/// An answer whose every operation was dropped is an error.
fn parse_patch_answer(content: &str) -> Result<Patch, GenerationError> {
    let mut patch = Patch::from_model_answer(content)?;
    let proposed = patch.operations.len();

    patch.operations.retain_mut(|op| match op {
        Operation::ReplaceFullDocument { html } => {
            if !looks_like_document(html) {
                return false;
            }
            if !html.contains(SURFACE_BRIDGE_SCRIPT) {
                *html = with_bridge_script(html);
            }
            true
        }
        _ => {
            let allowed = op.selector().is_some_and(|s| MOUNT_POINTS.contains(&s.trim()));
            if !allowed {
                ::log::warn!(
                    "Dropping {} on '{}' outside the mount points",
                    op.name(),
                    op.selector().unwrap_or_default()
                );
            }
            allowed
        }
    });

    if proposed > 0 && patch.operations.is_empty() {
        return Err(GenerationError::NoUsableOperations);
    }
    Ok(patch)
}

/// `html` with the bridge script inserted before the closing body tag
fn with_bridge_script(html: &str) -> String {
    let script = format!("<script>{}</script>\n", SURFACE_BRIDGE_SCRIPT);
    let lower = html.to_ascii_lowercase();
    let at = lower
        .rfind("</body>")
        .or_else(|| lower.rfind("</html>"))
        .unwrap_or(html.len());

    let mut out = String::with_capacity(html.len() + script.len());
    out.push_str(&html[..at]);
    out.push_str(&script);
    out.push_str(&html[at..]);
    out
}

pub(crate) fn looks_like_document(html: &str) -> bool {
    let head: String = html.trim_start().chars().take(15).collect::<String>().to_ascii_lowercase();
    head.starts_with("<!doctype html") || head.starts_with("<html")
}
