use thiserror::Error;

/// Errors raised while talking to the language model backend.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out after {0} seconds")]
    Timeout(u64),

    #[error("rate limited by the API")]
    RateLimited {
        /// Delay requested by the server through the `retry-after` header
        retry_after: Option<std::time::Duration>,
    },

    #[error("API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed API response: {0}")]
    Decode(String),

    #[error("API response contained no choices")]
    EmptyResponse,

    #[error("no API key configured")]
    MissingApiKey,
}

impl LlmError {
    /// Whether another attempt could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, LlmError::MissingApiKey)
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            LlmError::Decode(err.to_string())
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

/// Errors raised while interpreting a model answer for the selection stage.
#[derive(Debug, Error)]
pub enum SelectionError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("model answer is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("model answer has none of the known shapes (array, elements, filtered_dom_tree)")]
    UnrecognizedShape,

    #[error("model answer referenced none of the input elements")]
    NothingSelected,
}

/// Errors raised while producing generated content.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("model answer is not a valid patch: {0}")]
    InvalidPatch(#[from] serde_json::Error),

    #[error("model answer is not an HTML document")]
    NotHtml,

    #[error("model answer had no operation on an allowed mount point")]
    NoUsableOperations,
}

/// Errors raised by a page host (the browser side of the overlay).
#[derive(Debug, Error)]
pub enum HostError {
    #[error("WebDriver connection failed: {0}")]
    Connect(String),

    #[error("WebDriver command failed: {0}")]
    Command(String),

    #[error("invalid selector: {0}")]
    InvalidSelector(String),
}

impl From<fantoccini::error::CmdError> for HostError {
    fn from(err: fantoccini::error::CmdError) -> Self {
        HostError::Command(err.to_string())
    }
}

/// Errors raised by key-value storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid filter pattern: {0}")]
    Pattern(#[from] regex::Error),
}
