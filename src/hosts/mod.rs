//! The browser side of the overlay.
//!
//! A [`PageHost`] owns the live page: it captures it, hides its original
//! content, mounts the original-content frame and the generated surface, and
//! performs forwarded clicks and value changes on real elements.

pub mod virtual_page;
pub mod webdriver;

pub use virtual_page::{HostAction, MountedSurface, VirtualPage};
pub use webdriver::WebDriverPage;

use crate::error::HostError;
use crate::materialize::SurfaceEvent;
use crate::serializer::CapturedPage;
use async_trait::async_trait;

/// Class put on original top-level body children while a surface is shown
pub const HIDDEN_CLASS: &str = "retro-overlay-hidden";
/// Id of the frame holding the working copy of the original page
pub const ORIGINAL_FRAME_ID: &str = "retro-overlay-original";
/// Id of the frame holding the generated surface
pub const SURFACE_ID: &str = "retro-overlay-surface";

/// How the generated surface shares the viewport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceLayout {
    /// Surface panel next to the original-content frame
    SideBySide,
    FullViewport,
}

/// Document a forwarded action is resolved against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameTarget {
    OriginalFrame,
    TopDocument,
}

#[async_trait]
pub trait PageHost: Send {
    /// URL of the live page
    fn page_url(&self) -> &str;

    /// Snapshot of the page the user works with: the original-content frame
    /// when mounted, the top document otherwise. Overlay nodes and the
    /// hiding class are never part of the snapshot.
    async fn capture(&mut self) -> Result<CapturedPage, HostError>;

    /// Add [`HIDDEN_CLASS`] to every original top-level body child.
    /// Returns how many elements were hidden.
    async fn hide_original(&mut self) -> Result<usize, HostError>;

    /// Remove [`HIDDEN_CLASS`] wherever [`hide_original`](Self::hide_original) put it
    async fn show_original(&mut self) -> Result<(), HostError>;

    /// Create the original-content frame, or reload it with `html`
    async fn mount_original_frame(&mut self, html: &str) -> Result<(), HostError>;

    async fn remove_original_frame(&mut self) -> Result<(), HostError>;

    /// Show `html` as the generated surface, replacing any previous one
    async fn mount_surface(&mut self, html: &str, layout: SurfaceLayout) -> Result<(), HostError>;

    async fn unmount_surface(&mut self) -> Result<(), HostError>;

    /// Click the element matching `selector` in `target`.
    /// `Ok(false)` when the target or the element does not exist.
    async fn click(&mut self, target: FrameTarget, selector: &str) -> Result<bool, HostError>;

    /// Assign `value` to the element matching `selector` in `target` and
    /// fire `input` and `change` on it
    async fn set_value(
        &mut self,
        target: FrameTarget,
        selector: &str,
        value: &str,
    ) -> Result<bool, HostError>;

    /// Surface events posted since the last call
    async fn drain_surface_events(&mut self) -> Result<Vec<SurfaceEvent>, HostError>;
}
