use crate::config::{GenerationStrategy, OverlayConfig};
use crate::descriptor::ElementDescriptor;
use crate::filter::ImportanceFilter;
use crate::generation::{GenerationInput, GenerationStage};
use crate::llm::{ChatBackend, LlmClient, ResponseCache, RetryPolicy};
use crate::materialize::ProxyRegistry;
use crate::selection::SelectionStage;
use crate::serializer::{CapturedPage, Serializer};
use crate::storage::{FileStorage, MemoryStorage, Storage};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Result of one capture-to-surface run
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub html: String,
    /// Elements the surface was built from
    pub selected: Vec<ElementDescriptor>,
    /// Number of candidates handed to the selection stage
    pub candidate_count: usize,
}

/// Serializer, filter, model client and stages wired together
pub struct Pipeline {
    serializer: Serializer,
    filter: ImportanceFilter,
    selection: SelectionStage,
    generation: GenerationStage,
    client: Option<Arc<LlmClient>>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    pub fn is_online(&self) -> bool {
        self.client.is_some()
    }

    pub fn strategy(&self) -> GenerationStrategy {
        self.generation.strategy()
    }

    pub fn serializer(&self) -> &Serializer {
        &self.serializer
    }

    /// Drop every cached model answer
    pub fn clear_cache(&self) {
        if let Some(cache) = self.client.as_ref().and_then(|c| c.cache()) {
            cache.clear();
        }
    }

    /// Capture, reduce, select and generate a surface for `page`
    pub async fn run(
        &self,
        page: &CapturedPage,
        intent: &str,
        previous_html: &str,
        registry: &mut ProxyRegistry,
    ) -> PipelineOutput {
        let tree = self.serializer.serialize_page(page);
        let title = page_title(&tree);

        let mut candidates = self.filter.filter_functional(&tree);
        candidates.retain(|d| d.visible);
        ::log::info!(
            "Serialized {} elements, {} visible candidates",
            tree.node_count(),
            candidates.len()
        );

        let selected = self
            .selection
            .select_relevant_elements(&candidates, intent, &page.url)
            .await;

        let input = GenerationInput {
            selected: &selected,
            page_html: &page.html,
            previous_html,
            intent,
            title: title.as_deref(),
        };
        let html = self.generation.generate(&input, registry).await;

        PipelineOutput {
            html,
            selected,
            candidate_count: candidates.len(),
        }
    }
}

/// `<title>` text of the captured page
fn page_title(tree: &ElementDescriptor) -> Option<String> {
    tree.iter()
        .find(|d| d.tag == "title")
        .and_then(|d| d.trimmed_text().map(str::to_string))
}

/// Builder for [`Pipeline`]
pub struct PipelineBuilder {
    config: OverlayConfig,
    storage: Option<Arc<dyn Storage>>,
    backend: Option<Arc<dyn ChatBackend>>,
    filter: Option<ImportanceFilter>,
    offline: bool,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            config: OverlayConfig::default(),
            storage: None,
            backend: None,
            filter: None,
            offline: false,
        }
    }

    /// Apply a configuration
    pub fn with_config(mut self, config: OverlayConfig) -> Self {
        self.config = config;
        self
    }

    /// Load configuration from a JSON file
    pub fn with_config_file<P: AsRef<Path>>(
        mut self,
        path: P,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        self.config = OverlayConfig::from_file(path)?;
        Ok(self)
    }

    /// Let `OPENAI_*` environment variables override the loaded configuration
    pub fn with_env_overrides(mut self) -> Self {
        self.config = self.config.with_env_overrides();
        self
    }

    /// Override the generation strategy
    pub fn with_strategy(mut self, strategy: GenerationStrategy) -> Self {
        self.config.generation.strategy = strategy;
        self
    }

    /// Persist cached answers in a JSON file at `path`
    pub fn with_cache_file(mut self, path: &str) -> Self {
        self.config.cache.file = Some(path.to_string());
        self
    }

    /// Store cached answers in `storage` instead of the configured one
    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Talk to `backend` instead of the configured HTTP endpoint
    pub fn with_backend(mut self, backend: Arc<dyn ChatBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_filter(mut self, filter: ImportanceFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Never call the model; every stage takes its local path
    pub fn offline(mut self) -> Self {
        self.offline = true;
        self
    }

    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    pub fn build(self) -> Result<Pipeline, Box<dyn std::error::Error>> {
        let config = self.config;
        let client = if self.offline {
            None
        } else {
            let storage = match self.storage {
                Some(storage) => storage,
                None => match &config.cache.file {
                    Some(path) => Arc::new(FileStorage::open(path)?) as Arc<dyn Storage>,
                    None => Arc::new(MemoryStorage::new()),
                },
            };
            let client = match self.backend {
                Some(backend) => {
                    let mut cache = ResponseCache::new(
                        storage,
                        Duration::from_secs(config.cache.ttl_secs),
                        config.llm.api_key.as_deref(),
                    );
                    if !config.cache.enabled {
                        cache = cache.disabled();
                    }
                    LlmClient::new(backend, RetryPolicy::from_config(&config.llm)).with_cache(cache)
                }
                None => LlmClient::from_config(&config, storage)?,
            };
            Some(Arc::new(client))
        };

        let filter = match self.filter {
            Some(filter) => filter,
            None => ImportanceFilter::new(&config.filter)?,
        };
        ::log::info!(
            "Pipeline ready ({}, {:?} strategy)",
            if client.is_some() { "online" } else { "offline" },
            config.generation.strategy
        );

        Ok(Pipeline {
            serializer: Serializer::new(config.serializer.clone()),
            selection: SelectionStage::new(client.clone(), config.selection.clone())
                .with_filter(filter.clone()),
            generation: GenerationStage::new(client.clone(), config.generation.clone()),
            filter,
            client,
        })
    }
}
