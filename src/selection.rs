//! Asks the model which of the captured elements matter, with the local
//! importance filter as the fallback.

use crate::config::{OversizeStrategy, SelectionConfig};
use crate::descriptor::ElementDescriptor;
use crate::error::SelectionError;
use crate::filter::{ImportanceFilter, priority};
use crate::llm::{ChatRequest, LlmClient, RequestKind};
use crate::utils::{estimate_tokens, strip_code_fences};
use futures::future::join_all;
use serde::Deserialize;
use serde_json::Value;
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Hard bounds on the number of chunks a request is split into
const MIN_CHUNKS: usize = 2;
const MAX_CHUNKS: usize = 3;

pub const SELECTION_SYSTEM_PROMPT: &str = "You reduce web pages to their essential controls. \
You receive a JSON list of page elements and answer with a JSON object of the form \
{\"elements\": [{\"selector\": \"...\"}, ...]} listing the elements worth keeping. \
Copy every selector exactly as given. Never invent elements.";

/// The answer shapes the model is known to produce
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SelectionAnswer {
    Bare(Vec<Value>),
    Elements { elements: Vec<Value> },
    FilteredTree { filtered_dom_tree: Vec<Value> },
}

/// Parse a selection answer into a flat list of entries.
///
/// Accepts a bare array, `{"elements": [...]}` or `{"filtered_dom_tree": [...]}`
/// (nested `children` are flattened into the list), optionally wrapped in a
/// markdown code fence.
pub fn normalize_selection_response(raw: &str) -> Result<Vec<Value>, SelectionError> {
    let value: Value = serde_json::from_str(strip_code_fences(raw))?;
    let answer: SelectionAnswer =
        serde_json::from_value(value).map_err(|_| SelectionError::UnrecognizedShape)?;

    let entries = match answer {
        SelectionAnswer::Bare(entries)
        | SelectionAnswer::Elements { elements: entries }
        | SelectionAnswer::FilteredTree {
            filtered_dom_tree: entries,
        } => entries,
    };

    let mut flat = Vec::with_capacity(entries.len());
    for entry in entries {
        flatten_entry(entry, &mut flat);
    }
    Ok(flat)
}

fn flatten_entry(mut entry: Value, out: &mut Vec<Value>) {
    let children = entry
        .as_object_mut()
        .and_then(|obj| obj.remove("children"));
    out.push(entry);
    if let Some(Value::Array(children)) = children {
        for child in children {
            flatten_entry(child, out);
        }
    }
}

/// Selector named by an answer entry: an object's `selector`, or a bare string
fn entry_selector(entry: &Value) -> Option<&str> {
    match entry {
        Value::String(s) => Some(s.as_str()),
        Value::Object(obj) => obj.get("selector").and_then(Value::as_str),
        _ => None,
    }
}

/// Map answer entries back onto the input elements by selector.
///
/// Entries naming selectors that are not in `input` are dropped; an answer
/// that keeps nothing is an error.
pub fn validate_selection(
    input: &[ElementDescriptor],
    entries: &[Value],
) -> Result<Vec<ElementDescriptor>, SelectionError> {
    let by_selector: HashMap<&str, &ElementDescriptor> =
        input.iter().map(|d| (d.selector.as_str(), d)).collect();

    let mut seen = HashSet::new();
    let mut kept = Vec::new();
    let mut unknown = 0;
    for entry in entries {
        let Some(selector) = entry_selector(entry).map(str::trim) else {
            unknown += 1;
            continue;
        };
        match by_selector.get(selector) {
            Some(descriptor) => {
                if seen.insert(selector.to_string()) {
                    kept.push((*descriptor).clone());
                }
            }
            None => unknown += 1,
        }
    }

    if unknown > 0 {
        ::log::warn!("Dropped {} selected entries not present in the page", unknown);
    }
    if kept.is_empty() {
        return Err(SelectionError::NothingSelected);
    }
    Ok(kept)
}

/// Append `batch` to `merged`, skipping selectors already present
pub fn merge_unique(merged: &mut Vec<ElementDescriptor>, batch: Vec<ElementDescriptor>) {
    let mut seen: HashSet<String> = merged.iter().map(|d| d.selector.clone()).collect();
    for descriptor in batch {
        if seen.insert(descriptor.selector.clone()) {
            merged.push(descriptor);
        }
    }
}

fn build_selection_prompt(elements_json: &str, intent: &str, page_url: &str) -> String {
    let intent = if intent.trim().is_empty() {
        "(none given)"
    } else {
        intent.trim()
    };
    format!(
        "Page URL: {page_url}\n\
         User intent: {intent}\n\n\
         Rules:\n\
         - The intent is advisory. Ignore it when it has nothing to do with what this site is for.\n\
         - Return only elements from the list below and copy their selector values verbatim.\n\
         - Never invent elements, selectors or text.\n\
         - Prefer core navigation, search, login and primary actions.\n\
         - Drop ads, social widgets, cookie banners and decorative content.\n\n\
         Elements:\n{elements_json}"
    )
}

/// JSON sent to the model: each element without its subtree
fn elements_json(elements: &[ElementDescriptor]) -> Result<String, SelectionError> {
    let shallow: Vec<ElementDescriptor> = elements.iter().map(ElementDescriptor::shallow).collect();
    Ok(serde_json::to_string(&shallow)?)
}

/// Split `elements` into `count` runs of roughly equal serialized size
pub fn balanced_chunks(elements: &[ElementDescriptor], count: usize) -> Vec<Vec<ElementDescriptor>> {
    let count = count.clamp(1, elements.len().max(1));
    let sizes: Vec<usize> = elements
        .iter()
        .map(|d| serde_json::to_string(&d.shallow()).map(|s| s.len()).unwrap_or(0))
        .collect();
    let total: usize = sizes.iter().sum();
    let target = total.div_ceil(count);

    let mut chunks = Vec::with_capacity(count);
    let mut current = Vec::new();
    let mut current_size = 0;
    for (index, (descriptor, size)) in elements.iter().zip(sizes).enumerate() {
        let remaining = elements.len() - index;
        let chunks_left = count - chunks.len();
        if !current.is_empty()
            && chunks_left > 1
            && (current_size + size > target || remaining < chunks_left)
        {
            chunks.push(std::mem::take(&mut current));
            current_size = 0;
        }
        current.push(descriptor.clone());
        current_size += size;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Priority-sorted prefix holding `keep_fraction` of the elements (at least one)
pub fn truncate_by_priority(elements: &[ElementDescriptor], keep_fraction: f64) -> Vec<ElementDescriptor> {
    let fraction = if keep_fraction.is_finite() {
        keep_fraction.clamp(0.0, 1.0)
    } else {
        1.0
    };
    let keep = ((elements.len() as f64) * fraction).ceil().max(1.0) as usize;

    let mut sorted: Vec<ElementDescriptor> = elements.to_vec();
    sorted.sort_by_key(|d| Reverse(priority(d)));
    sorted.truncate(keep);
    sorted
}

/// Model-backed element selection
pub struct SelectionStage {
    client: Option<Arc<LlmClient>>,
    filter: ImportanceFilter,
    config: SelectionConfig,
}

impl SelectionStage {
    /// Without a client every call takes the local filter path
    pub fn new(client: Option<Arc<LlmClient>>, config: SelectionConfig) -> Self {
        Self {
            client,
            filter: ImportanceFilter::default(),
            config,
        }
    }

    pub fn with_filter(mut self, filter: ImportanceFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn is_online(&self) -> bool {
        self.client.is_some()
    }

    /// Elements worth keeping for `intent`. Never fails: any model problem
    /// falls back to the important filter over the same elements.
    pub async fn select_relevant_elements(
        &self,
        elements: &[ElementDescriptor],
        intent: &str,
        page_url: &str,
    ) -> Vec<ElementDescriptor> {
        if elements.is_empty() {
            return Vec::new();
        }
        let Some(client) = &self.client else {
            ::log::info!("No model configured, using local filter");
            return self.fallback(elements);
        };

        let tokens = match elements_json(elements) {
            Ok(json) => estimate_tokens(&json),
            Err(e) => {
                ::log::warn!("Cannot encode elements for selection: {}", e);
                return self.fallback(elements);
            }
        };

        if tokens <= self.config.token_threshold {
            return self.request_or_fallback(client, elements, intent, page_url).await;
        }

        match self.config.oversize {
            OversizeStrategy::Truncate { keep_fraction } => {
                let kept = truncate_by_priority(elements, keep_fraction);
                ::log::info!(
                    "Selection input of ~{} tokens truncated to {} of {} elements",
                    tokens,
                    kept.len(),
                    elements.len()
                );
                match self.request(client, &kept, intent, page_url).await {
                    Ok(selected) => selected,
                    Err(e) => {
                        ::log::warn!("Selection failed ({}), using local filter", e);
                        self.fallback(elements)
                    }
                }
            }
            OversizeStrategy::Chunk { max_chunks } => {
                let upper = max_chunks.clamp(MIN_CHUNKS, MAX_CHUNKS);
                let wanted = tokens.div_ceil(self.config.token_threshold.max(1));
                let chunks = balanced_chunks(elements, wanted.clamp(MIN_CHUNKS, upper));
                ::log::info!(
                    "Selection input of ~{} tokens split into {} chunks",
                    tokens,
                    chunks.len()
                );

                let results = join_all(
                    chunks
                        .iter()
                        .map(|chunk| self.request_or_fallback(client, chunk, intent, page_url)),
                )
                .await;

                let mut merged = Vec::new();
                for batch in results {
                    merge_unique(&mut merged, batch);
                }
                merged
            }
        }
    }

    async fn request_or_fallback(
        &self,
        client: &LlmClient,
        elements: &[ElementDescriptor],
        intent: &str,
        page_url: &str,
    ) -> Vec<ElementDescriptor> {
        match self.request(client, elements, intent, page_url).await {
            Ok(selected) => {
                ::log::info!("Model kept {} of {} elements", selected.len(), elements.len());
                selected
            }
            Err(e) => {
                ::log::warn!("Selection failed ({}), using local filter", e);
                self.fallback(elements)
            }
        }
    }

    async fn request(
        &self,
        client: &LlmClient,
        elements: &[ElementDescriptor],
        intent: &str,
        page_url: &str,
    ) -> Result<Vec<ElementDescriptor>, SelectionError> {
        let json = elements_json(elements)?;
        let request = ChatRequest::json(
            SELECTION_SYSTEM_PROMPT,
            build_selection_prompt(&json, intent, page_url),
        );
        client
            .complete_parsed(RequestKind::Selection, &request, |content| {
                let entries = normalize_selection_response(content)?;
                validate_selection(elements, &entries)
            })
            .await
    }

    fn fallback(&self, elements: &[ElementDescriptor]) -> Vec<ElementDescriptor> {
        self.filter.filter_important_slice(elements)
    }
}
