use crate::descriptor::BoundingBox;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Attribute stamped on every element of a live page before capture, so that
/// measured layout can be joined back to the parsed copy
pub const LAYOUT_REF_ATTR: &str = "data-retro-ref";

/// Measured box and computed style of one element
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayoutInfo {
    pub bbox: BoundingBox,
    #[serde(default)]
    pub display: Option<String>,
    #[serde(default)]
    pub visibility: Option<String>,
    #[serde(default)]
    pub opacity: Option<f64>,
}

/// Layout measurements keyed by the element's layout ref
pub type LayoutMap = HashMap<String, LayoutInfo>;

/// Style properties that decide visibility
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisibilityStyle {
    pub display: Option<String>,
    pub visibility: Option<String>,
    pub opacity: Option<f64>,
}

impl VisibilityStyle {
    /// Extract display/visibility/opacity from an inline `style` attribute
    pub fn from_inline(style: &str) -> Self {
        let mut result = Self::default();
        for declaration in style.split(';') {
            let Some((property, value)) = declaration.split_once(':') else {
                continue;
            };
            let value = value
                .trim()
                .trim_end_matches("!important")
                .trim()
                .to_ascii_lowercase();
            match property.trim().to_ascii_lowercase().as_str() {
                "display" => result.display = Some(value),
                "visibility" => result.visibility = Some(value),
                "opacity" => result.opacity = value.parse().ok(),
                _ => {}
            }
        }
        result
    }

    pub fn from_layout(layout: &LayoutInfo) -> Self {
        Self {
            display: layout.display.clone(),
            visibility: layout.visibility.clone(),
            opacity: layout.opacity,
        }
    }

    /// Whether the style alone hides the element
    pub fn hides(&self) -> bool {
        self.display.as_deref() == Some("none")
            || matches!(self.visibility.as_deref(), Some("hidden") | Some("collapse"))
            || self.opacity.is_some_and(|o| o <= 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_style_parsing() {
        let style = VisibilityStyle::from_inline("color: red; DISPLAY: None !important;opacity:0.5");
        assert_eq!(style.display.as_deref(), Some("none"));
        assert_eq!(style.opacity, Some(0.5));
        assert!(style.hides());
    }

    #[test]
    fn test_visible_styles() {
        assert!(!VisibilityStyle::from_inline("").hides());
        assert!(!VisibilityStyle::from_inline("display:block; visibility: visible").hides());
        assert!(VisibilityStyle::from_inline("visibility:hidden").hides());
        assert!(VisibilityStyle::from_inline("opacity: 0").hides());
    }
}
