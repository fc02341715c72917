use super::cache::{RequestKind, ResponseCache};
use super::retry::RetryPolicy;
use super::{ChatBackend, ChatRequest, OpenAiChat};
use crate::config::OverlayConfig;
use crate::error::LlmError;
use crate::storage::Storage;
use std::sync::Arc;
use std::time::Duration;

/// Backend plus retry policy plus response cache
pub struct LlmClient {
    backend: Arc<dyn ChatBackend>,
    retry: RetryPolicy,
    cache: Option<ResponseCache>,
}

impl LlmClient {
    pub fn new(backend: Arc<dyn ChatBackend>, retry: RetryPolicy) -> Self {
        Self {
            backend,
            retry,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// OpenAI backend configured from `config`, cached in `storage`
    pub fn from_config(
        config: &OverlayConfig,
        storage: Arc<dyn Storage>,
    ) -> Result<Self, LlmError> {
        let backend = OpenAiChat::new(&config.llm)?;
        let mut cache = ResponseCache::new(
            storage,
            Duration::from_secs(config.cache.ttl_secs),
            config.llm.api_key.as_deref(),
        );
        if !config.cache.enabled {
            cache = cache.disabled();
        }

        Ok(Self::new(Arc::new(backend), RetryPolicy::from_config(&config.llm)).with_cache(cache))
    }

    pub fn cache(&self) -> Option<&ResponseCache> {
        self.cache.as_ref()
    }

    /// Send `request` and interpret the answer with `parse`.
    ///
    /// Answers are served from the cache when possible; only answers that
    /// `parse` accepts are stored. A cached answer `parse` rejects is evicted
    /// and the backend is asked again.
    pub async fn complete_parsed<T, E, P>(
        &self,
        kind: RequestKind,
        request: &ChatRequest,
        parse: P,
    ) -> Result<T, E>
    where
        P: Fn(&str) -> Result<T, E>,
        E: From<LlmError>,
    {
        let prompt = request.cache_prompt();

        if let Some(cache) = &self.cache {
            let cached = cache.get(kind, &prompt);
            if let Some(content) = cached.as_ref().and_then(|v| v.as_str()) {
                match parse(content) {
                    Ok(value) => {
                        ::log::info!("Using cached {} response", kind.as_str());
                        return Ok(value);
                    }
                    Err(_) => {
                        ::log::warn!("Cached {} response no longer parses, evicting", kind.as_str());
                        cache.invalidate(kind, &prompt);
                    }
                }
            }
        }

        let response = self
            .retry
            .run(kind.as_str(), || self.backend.complete(request))
            .await?;

        if let Some(usage) = response.usage {
            ::log::info!(
                "{} request used {} prompt + {} completion tokens",
                kind.as_str(),
                usage.prompt_tokens,
                usage.completion_tokens
            );
        }

        let value = parse(&response.content)?;
        if let Some(cache) = &self.cache {
            cache.put(kind, &prompt, serde_json::Value::String(response.content));
        }
        Ok(value)
    }

    /// Send `request` and return the raw answer text
    pub async fn complete_text(
        &self,
        kind: RequestKind,
        request: &ChatRequest,
    ) -> Result<String, LlmError> {
        self.complete_parsed(kind, request, |content| Ok::<_, LlmError>(content.to_string()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedBackend;
    use crate::storage::MemoryStorage;

    fn cached_client(backend: Arc<ScriptedBackend>) -> LlmClient {
        let cache = ResponseCache::new(
            Arc::new(MemoryStorage::new()),
            Duration::from_secs(60),
            Some("key"),
        );
        LlmClient::new(backend, RetryPolicy::no_retry()).with_cache(cache)
    }

    #[tokio::test]
    async fn test_identical_request_hits_cache() {
        let backend = Arc::new(ScriptedBackend::queue(vec![Ok("first".into())]));
        let client = cached_client(backend.clone());
        let request = ChatRequest::text("sys", "user");

        let first = client.complete_text(RequestKind::Rewrite, &request).await.unwrap();
        let second = client.complete_text(RequestKind::Rewrite, &request).await.unwrap();

        assert_eq!(first, "first");
        assert_eq!(second, "first");
        assert_eq!(backend.request_count(), 1);
    }

    #[tokio::test]
    async fn test_rejected_answer_is_not_cached() {
        let backend = Arc::new(ScriptedBackend::queue(vec![
            Ok("not json".into()),
            Ok("[1]".into()),
        ]));
        let client = cached_client(backend.clone());
        let request = ChatRequest::json("sys", "user");
        let parse = |content: &str| {
            serde_json::from_str::<serde_json::Value>(content)
                .map_err(|e| LlmError::Decode(e.to_string()))
        };

        assert!(
            client
                .complete_parsed(RequestKind::Selection, &request, parse)
                .await
                .is_err()
        );
        let value = client
            .complete_parsed(RequestKind::Selection, &request, parse)
            .await
            .unwrap();

        assert_eq!(value, serde_json::json!([1]));
        assert_eq!(backend.request_count(), 2);
    }

    #[tokio::test]
    async fn test_unparsable_cached_answer_is_replaced() {
        let backend = Arc::new(ScriptedBackend::queue(vec![Ok("[2]".into())]));
        let client = cached_client(backend.clone());
        let request = ChatRequest::json("sys", "user");
        let cache = client.cache().unwrap();
        cache.put(
            RequestKind::Selection,
            &request.cache_prompt(),
            serde_json::Value::String("not json".into()),
        );
        let parse = |content: &str| {
            serde_json::from_str::<serde_json::Value>(content)
                .map_err(|e| LlmError::Decode(e.to_string()))
        };

        let value = client
            .complete_parsed(RequestKind::Selection, &request, parse)
            .await
            .unwrap();
        assert_eq!(value, serde_json::json!([2]));
        assert_eq!(backend.request_count(), 1);

        let again = client
            .complete_parsed(RequestKind::Selection, &request, parse)
            .await
            .unwrap();
        assert_eq!(again, serde_json::json!([2]));
        assert_eq!(backend.request_count(), 1);
    }

    #[tokio::test]
    async fn test_retries_through_policy() {
        let backend = Arc::new(ScriptedBackend::queue(vec![
            Err(LlmError::RateLimited {
                retry_after: Some(Duration::from_millis(1)),
            }),
            Ok("ok".into()),
        ]));
        let policy = RetryPolicy {
            max_attempts: 2,
            ..RetryPolicy::no_retry()
        };
        let client = LlmClient::new(backend.clone(), policy);

        let answer = client
            .complete_text(RequestKind::Patch, &ChatRequest::json("s", "u"))
            .await
            .unwrap();
        assert_eq!(answer, "ok");
        assert_eq!(backend.request_count(), 2);
    }
}
