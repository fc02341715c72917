use super::patcher::looks_like_document;
use crate::error::GenerationError;
use crate::llm::{ChatRequest, LlmClient, RequestKind};
use crate::utils::{estimate_tokens, strip_code_fences};

pub const REWRITE_SYSTEM_PROMPT: &str = "You are a UI/UX expert who creates clean, simplified \
interfaces. You always respond with complete, valid HTML documents that are self-contained and functional.";

/// Cut `html` to roughly `max_tokens` tokens
pub fn trim_to_tokens(html: &str, max_tokens: usize) -> &str {
    let max_bytes = max_tokens.saturating_mul(4);
    if html.len() <= max_bytes {
        return html;
    }
    let mut end = max_bytes;
    while !html.is_char_boundary(end) {
        end -= 1;
    }
    &html[..end]
}

fn build_rewrite_prompt(html: &str, intent: &str) -> String {
    format!(
        "Original HTML:\n{html}\n\n\
         User intent: {intent}\n\n\
         Create a simplified HTML interface that:\n\
         - keeps only the elements needed for the user's intent\n\
         - drops clutter, navigation and content unrelated to the intent\n\
         - stays clean, minimal, accessible HTML5\n\
         - carries its CSS inline so the document is self-contained\n\n\
         Return only the complete HTML document, starting with <!DOCTYPE html>."
    )
}

/// Accept a rewrite answer only if it is a whole HTML document
fn parse_document(content: &str) -> Result<String, GenerationError> {
    let html = strip_code_fences(content);
    if looks_like_document(html) {
        Ok(html.to_string())
    } else {
        Err(GenerationError::NotHtml)
    }
}

/// One-shot whole-page simplification by the model
pub struct Rewriter<'a> {
    client: &'a LlmClient,
    max_tokens: usize,
}

impl<'a> Rewriter<'a> {
    pub fn new(client: &'a LlmClient, max_tokens: usize) -> Self {
        Self { client, max_tokens }
    }

    pub async fn rewrite(&self, page_html: &str, intent: &str) -> Result<String, GenerationError> {
        let trimmed = trim_to_tokens(page_html, self.max_tokens);
        if trimmed.len() < page_html.len() {
            ::log::warn!(
                "HTML content was trimmed from {} to {} characters to fit token limits",
                page_html.len(),
                trimmed.len()
            );
        }
        ::log::debug!("Rewrite request carries ~{} tokens of HTML", estimate_tokens(trimmed));

        let request = ChatRequest::text(REWRITE_SYSTEM_PROMPT, build_rewrite_prompt(trimmed, intent));
        self.client
            .complete_parsed(RequestKind::Rewrite, &request, parse_document)
            .await
    }
}
