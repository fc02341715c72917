//! Messages exchanged with the extension chrome.

use super::state::Mode;
use serde::{Deserialize, Serialize};

/// Request from the popup or background side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ExtensionRequest {
    SetMode {
        mode: Mode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        intent: Option<String>,
    },
    GetCurrentMode,
    SetIntent {
        intent: String,
    },
    RegenerateContent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtensionResponse {
    Mode {
        mode: Mode,
    },
    Ack {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl ExtensionResponse {
    pub fn ok() -> Self {
        ExtensionResponse::Ack {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        ExtensionResponse::Ack {
            success: false,
            error: Some(error.into()),
        }
    }
}
