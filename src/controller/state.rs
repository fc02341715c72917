use crate::hosts::SurfaceLayout;
use crate::storage::Storage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Storage key of the persisted controller state
pub const STATE_KEY: &str = "overlay_state";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    #[default]
    Normal,
    SideBySide,
    Overlay,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Normal => "normal",
            Mode::SideBySide => "side-by-side",
            Mode::Overlay => "overlay",
        }
    }

    /// Surface placement, `None` for the normal mode
    pub fn surface_layout(&self) -> Option<SurfaceLayout> {
        match self {
            Mode::Normal => None,
            Mode::SideBySide => Some(SurfaceLayout::SideBySide),
            Mode::Overlay => Some(SurfaceLayout::FullViewport),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" => Ok(Mode::Normal),
            "side-by-side" => Ok(Mode::SideBySide),
            "overlay" => Ok(Mode::Overlay),
            other => Err(format!("unknown mode '{}'", other)),
        }
    }
}

/// Mode state owned by the controller
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverlayState {
    pub current_mode: Mode,
    pub current_intent: String,
    /// Last mounted surface, the base of the next patch round
    pub generated_html: String,
    /// Mode entered on initialization
    pub default_mode: Mode,
}

/// What survives a restart
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    #[serde(default)]
    pub current_mode: Mode,
    #[serde(default)]
    pub current_intent: String,
    #[serde(default)]
    pub default_mode: Mode,
}

impl PersistedState {
    pub fn load(storage: &dyn Storage) -> Option<Self> {
        let raw = storage.get(STATE_KEY)?;
        match serde_json::from_str(&raw) {
            Ok(state) => Some(state),
            Err(e) => {
                ::log::warn!("Ignoring unreadable persisted state: {}", e);
                None
            }
        }
    }

    pub fn save(&self, storage: &dyn Storage) {
        let result = serde_json::to_string(self)
            .map_err(crate::error::StorageError::from)
            .and_then(|json| storage.set(STATE_KEY, json));
        if let Err(e) = result {
            ::log::warn!("Failed to persist overlay state: {}", e);
        }
    }
}
