//! Turns a selection into the surface document.

pub mod assemble;
pub mod patcher;
pub mod rewrite;

pub use assemble::Assembler;
pub use patcher::{MOUNT_POINTS, PatchGenerator};
pub use rewrite::Rewriter;

use crate::config::{GenerationConfig, GenerationStrategy};
use crate::descriptor::ElementDescriptor;
use crate::llm::LlmClient;
use crate::materialize::ProxyRegistry;
use crate::patch::apply_patch;
use std::sync::Arc;

/// Everything a generation round may look at
#[derive(Debug, Clone, Copy)]
pub struct GenerationInput<'a> {
    pub selected: &'a [ElementDescriptor],
    /// Captured HTML of the original page
    pub page_html: &'a str,
    /// Surface produced by the previous round, empty on the first one
    pub previous_html: &'a str,
    pub intent: &'a str,
    pub title: Option<&'a str>,
}

/// Strategy dispatch with the assembler as the universal fallback
pub struct GenerationStage {
    strategy: GenerationStrategy,
    client: Option<Arc<LlmClient>>,
    assembler: Assembler,
    patcher: PatchGenerator,
    max_rewrite_tokens: usize,
}

impl GenerationStage {
    pub fn new(client: Option<Arc<LlmClient>>, config: GenerationConfig) -> Self {
        Self {
            strategy: config.strategy,
            assembler: Assembler::new(&config.theme_stylesheet),
            max_rewrite_tokens: config.max_rewrite_tokens,
            patcher: PatchGenerator::new(client.clone(), config),
            client,
        }
    }

    pub fn strategy(&self) -> GenerationStrategy {
        self.strategy
    }

    pub fn with_strategy(mut self, strategy: GenerationStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Produce the next surface document. Never fails.
    pub async fn generate(&self, input: &GenerationInput<'_>, registry: &mut ProxyRegistry) -> String {
        match self.strategy {
            GenerationStrategy::Assemble => {
                self.assembler.assemble(input.selected, input.title, registry)
            }
            GenerationStrategy::Patch => {
                let patch = self
                    .patcher
                    .generate_patch(
                        input.selected,
                        input.previous_html,
                        input.intent,
                        input.title,
                        registry,
                    )
                    .await;
                apply_patch(input.previous_html, &patch)
            }
            GenerationStrategy::Rewrite => {
                let Some(client) = &self.client else {
                    ::log::info!("No model configured, assembling instead of rewriting");
                    return self.assembler.assemble(input.selected, input.title, registry);
                };
                match Rewriter::new(client, self.max_rewrite_tokens)
                    .rewrite(input.page_html, input.intent)
                    .await
                {
                    Ok(html) => html,
                    Err(e) => {
                        ::log::warn!("Rewrite failed ({}), assembling instead", e);
                        self.assembler.assemble(input.selected, input.title, registry)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::RetryPolicy;
    use crate::llm::testing::ScriptedBackend;

    fn input<'a>(selected: &'a [ElementDescriptor], previous_html: &'a str) -> GenerationInput<'a> {
        GenerationInput {
            selected,
            page_html: "<html><body><button id=\"go\">Go</button></body></html>",
            previous_html,
            intent: "go",
            title: Some("Page"),
        }
    }

    fn stage(backend: Arc<ScriptedBackend>, strategy: GenerationStrategy) -> GenerationStage {
        let client = Arc::new(LlmClient::new(backend, RetryPolicy::no_retry()));
        GenerationStage::new(Some(client), GenerationConfig::default()).with_strategy(strategy)
    }

    #[tokio::test]
    async fn test_patch_strategy_applies_to_previous() {
        let selected = vec![ElementDescriptor::new("button", "#go")];
        let mut registry = ProxyRegistry::new();
        let first = GenerationStage::new(None, GenerationConfig::default())
            .generate(&input(&selected, ""), &mut registry)
            .await;

        let answer = r##"{"version":"1.0","operations":[
            {"op":"replace","selector":"title","html":"Updated"}
        ]}"##;
        let backend = Arc::new(ScriptedBackend::queue(vec![Ok(answer.into())]));
        let second = stage(backend, GenerationStrategy::Patch)
            .generate(&input(&selected, &first), &mut registry)
            .await;

        assert!(second.contains("<title>Updated</title>"));
        assert!(second.contains("id=\"app-main\""));
    }

    #[tokio::test]
    async fn test_first_patch_round_is_full_document() {
        let selected = vec![ElementDescriptor::new("button", "#go")];
        let backend = Arc::new(ScriptedBackend::failing());
        let html = stage(backend.clone(), GenerationStrategy::Patch)
            .generate(&input(&selected, ""), &mut ProxyRegistry::new())
            .await;

        assert!(html.starts_with("<!DOCTYPE html>"));
        assert_eq!(backend.request_count(), 0);
    }

    #[tokio::test]
    async fn test_rewrite_failure_assembles() {
        let selected = vec![ElementDescriptor::new("button", "#go")];
        let backend = Arc::new(ScriptedBackend::failing());
        let html = stage(backend, GenerationStrategy::Rewrite)
            .generate(&input(&selected, ""), &mut ProxyRegistry::new())
            .await;

        assert!(html.contains("id=\"app-main\""));
        assert!(html.contains("data-proxy-id=\"rp-1\""));
    }
}
