use crate::descriptor::ElementDescriptor;
use crate::error::ConfigError;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Tags that never carry user-facing functionality
const EXCLUDED_TAGS: &[&str] = &[
    "style", "script", "noscript", "template", "meta", "link", "title", "head", "html", "body",
];
const FUNCTIONAL_TAGS: &[&str] = &["input", "textarea", "select", "button", "form"];
const FUNCTIONAL_ROLES: &[&str] = &[
    "button",
    "link",
    "search",
    "navigation",
    "combobox",
    "textbox",
];
/// Containers kept by the structural pruning so a document skeleton survives
const STRUCTURAL_TAGS: &[&str] = &[
    "html", "body", "main", "section", "article", "header", "nav", "footer",
];
/// Tags ranked just below interactive and navigation elements when trimming
const IMPORTANT_TAGS: &[&str] = &[
    "h1", "h2", "h3", "h4", "h5", "h6", "label", "nav", "form", "main",
];

/// Prose shorter or longer than this is not kept on text alone
const MIN_PROSE_LEN: usize = 5;
const MAX_PROSE_LEN: usize = 100;

/// Configuration for the importance filter's text rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterRulesConfig {
    /// Regex patterns; an element whose text matches any of them is kept
    #[serde(default = "default_keyword_patterns")]
    pub keyword_patterns: Vec<String>,

    /// Regex patterns matched against the whole trimmed text of short controls
    #[serde(default = "default_action_patterns")]
    pub action_patterns: Vec<String>,
}

fn default_keyword_patterns() -> Vec<String> {
    vec![
        r"(?i)\b(search|log ?in|log ?out|sign ?in|sign ?up|sign ?out|register)\b".to_string(),
        r"(?i)\b(submit|buy|add to (cart|bag|basket)|checkout|cart|order)\b".to_string(),
        r"(?i)\b(menu|account|profile|settings|subscribe|download|contact)\b".to_string(),
    ]
}

fn default_action_patterns() -> Vec<String> {
    vec![
        r"(?i)^(go|click|ok|cancel|yes|no|next|back|previous|more|save|send|close|continue|done|apply|confirm)[.!]?$"
            .to_string(),
    ]
}

impl Default for FilterRulesConfig {
    fn default() -> Self {
        Self {
            keyword_patterns: default_keyword_patterns(),
            action_patterns: default_action_patterns(),
        }
    }
}

/// Rule-based reduction of a descriptor tree to its functional elements.
///
/// Both reductions are pure functions of their input. They serve as the
/// pre-trim before network calls and as the offline fallback when the model
/// cannot be reached.
#[derive(Debug, Clone)]
pub struct ImportanceFilter {
    keyword_regexes: Vec<Regex>,
    action_regexes: Vec<Regex>,
}

impl Default for ImportanceFilter {
    fn default() -> Self {
        Self::new(&FilterRulesConfig::default()).expect("Default regex patterns should be valid")
    }
}

impl ImportanceFilter {
    /// Create a new filter from configuration
    pub fn new(config: &FilterRulesConfig) -> Result<Self, ConfigError> {
        let mut keyword_regexes = Vec::with_capacity(config.keyword_patterns.len());
        for pattern in &config.keyword_patterns {
            keyword_regexes.push(Regex::new(pattern)?);
        }

        let mut action_regexes = Vec::with_capacity(config.action_patterns.len());
        for pattern in &config.action_patterns {
            action_regexes.push(Regex::new(pattern)?);
        }

        Ok(Self {
            keyword_regexes,
            action_regexes,
        })
    }

    /// Flat list of functional elements, in document order, without children
    pub fn filter_functional(&self, tree: &ElementDescriptor) -> Vec<ElementDescriptor> {
        self.filter_functional_slice(std::slice::from_ref(tree))
    }

    /// Same as [`filter_functional`](Self::filter_functional) over several roots
    pub fn filter_functional_slice(&self, roots: &[ElementDescriptor]) -> Vec<ElementDescriptor> {
        let kept: Vec<ElementDescriptor> = roots
            .iter()
            .flat_map(ElementDescriptor::iter)
            .filter(|d| self.is_functional(d))
            .map(ElementDescriptor::shallow)
            .collect();
        ::log::debug!("Functional filter kept {} elements", kept.len());
        kept
    }

    /// Pruned copy of the tree keeping interactive and navigation elements,
    /// their ancestors, and the structural containers. The root always survives.
    pub fn filter_important(&self, tree: &ElementDescriptor) -> ElementDescriptor {
        prune_important(tree).unwrap_or_else(|| tree.shallow())
    }

    /// Functional elements that survive the important pruning of `roots`,
    /// flat and in document order. Stands in for the model's selection.
    pub fn filter_important_slice(&self, roots: &[ElementDescriptor]) -> Vec<ElementDescriptor> {
        let kept: Vec<ElementDescriptor> = roots
            .iter()
            .filter_map(prune_important)
            .flat_map(|pruned| {
                pruned
                    .iter()
                    .map(ElementDescriptor::shallow)
                    .collect::<Vec<_>>()
            })
            .filter(|d| self.is_functional(d))
            .collect();
        ::log::debug!("Important filter kept {} elements", kept.len());
        kept
    }

    /// Whether a single element passes the functional rule
    pub fn is_functional(&self, d: &ElementDescriptor) -> bool {
        let tag = d.tag.as_str();
        if EXCLUDED_TAGS.contains(&tag) {
            return false;
        }

        if FUNCTIONAL_TAGS.contains(&tag) {
            return true;
        }
        if tag == "a" && d.href.as_deref().is_some_and(is_navigating_href) {
            return true;
        }
        if d.role
            .as_deref()
            .is_some_and(|r| FUNCTIONAL_ROLES.contains(&r))
        {
            return true;
        }
        if d.is_heading() || tag == "label" || tag == "nav" {
            return true;
        }

        let Some(text) = d.trimmed_text() else {
            return false;
        };
        if self.keyword_regexes.iter().any(|re| re.is_match(text)) {
            return true;
        }
        if self.action_regexes.iter().any(|re| re.is_match(text)) {
            return true;
        }
        let len = text.chars().count();
        d.children.is_empty() && (MIN_PROSE_LEN..=MAX_PROSE_LEN).contains(&len)
    }
}

/// Trimming priority: interactive > navigation candidate > important tag > rest
pub fn priority(d: &ElementDescriptor) -> u8 {
    if d.is_interactive {
        3
    } else if d.is_navigation_candidate {
        2
    } else if IMPORTANT_TAGS.contains(&d.tag.as_str()) || d.is_heading() {
        1
    } else {
        0
    }
}

fn prune_important(d: &ElementDescriptor) -> Option<ElementDescriptor> {
    let children: Vec<ElementDescriptor> = d.children.iter().filter_map(prune_important).collect();

    let keep = d.is_interactive
        || d.is_navigation_candidate
        || !children.is_empty()
        || STRUCTURAL_TAGS.contains(&d.tag.as_str());

    keep.then(|| ElementDescriptor {
        children,
        ..d.shallow()
    })
}

fn is_navigating_href(href: &str) -> bool {
    let href = href.trim();
    !href.is_empty() && !href.starts_with('#')
}
