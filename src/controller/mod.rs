//! Mode state machine and action proxy between the surface and the page.
//!
//! The controller owns the [`OverlayState`], the proxy registry and the page
//! host. Every mode switch reverts to the normal page before entering the
//! new mode. Generations are serialized through a gate and tagged with a
//! token; a result whose token was superseded by a later mode switch is
//! discarded instead of mounted.

pub mod messages;
pub mod state;

#[cfg(test)]
mod tests;

pub use messages::{ExtensionRequest, ExtensionResponse};
pub use state::{Mode, OverlayState, PersistedState, STATE_KEY};

use crate::config::ControllerConfig;
use crate::hosts::{FrameTarget, PageHost, SurfaceLayout};
use crate::materialize::{FrameMessage, ProxyRegistry, SurfaceEvent};
use crate::pipeline::Pipeline;
use crate::serializer::CapturedPage;
use crate::storage::Storage;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

pub struct OverlayController<H: PageHost> {
    pipeline: Arc<Pipeline>,
    host: Mutex<H>,
    state: Mutex<OverlayState>,
    registry: Mutex<ProxyRegistry>,
    storage: Arc<dyn Storage>,
    generation: AtomicU64,
    gate: Mutex<()>,
    settle_delay: Duration,
}

impl<H: PageHost> OverlayController<H> {
    pub fn new(
        pipeline: Arc<Pipeline>,
        host: H,
        storage: Arc<dyn Storage>,
        config: &ControllerConfig,
    ) -> Self {
        let default_mode = config.default_mode.parse().unwrap_or_else(|e| {
            ::log::warn!("{}, starting in normal mode", e);
            Mode::Normal
        });

        Self {
            pipeline,
            host: Mutex::new(host),
            state: Mutex::new(OverlayState {
                default_mode,
                ..OverlayState::default()
            }),
            registry: Mutex::new(ProxyRegistry::new()),
            storage,
            generation: AtomicU64::new(0),
            gate: Mutex::new(()),
            settle_delay: Duration::from_millis(config.settle_delay_ms),
        }
    }

    /// The page host, for callers that need to inspect or drive it directly
    pub fn host(&self) -> &Mutex<H> {
        &self.host
    }

    /// Snapshot of the current state
    pub async fn state(&self) -> OverlayState {
        self.state.lock().await.clone()
    }

    /// Restore the persisted intent and enter the default mode
    pub async fn initialize(&self) -> Mode {
        let start_mode = {
            let mut state = self.state.lock().await;
            if let Some(persisted) = PersistedState::load(self.storage.as_ref()) {
                state.current_intent = persisted.current_intent;
                state.default_mode = persisted.default_mode;
            }
            ::log::info!(
                "Overlay initialized on {} (default mode {})",
                self.host.lock().await.page_url(),
                state.default_mode
            );
            state.default_mode
        };

        if start_mode != Mode::Normal {
            self.set_mode(start_mode, None).await;
        }
        self.get_current_mode().await
    }

    pub async fn get_current_mode(&self) -> Mode {
        self.state.lock().await.current_mode
    }

    pub async fn set_intent(&self, intent: &str) -> bool {
        let mut state = self.state.lock().await;
        state.current_intent = intent.trim().to_string();
        self.persist(&state);
        true
    }

    /// Switch to `mode`, optionally with a new intent.
    ///
    /// Requesting the active mode only updates the intent. Returns whether
    /// the requested mode is now shown.
    pub async fn set_mode(&self, mode: Mode, intent: Option<String>) -> bool {
        let token = {
            let mut state = self.state.lock().await;
            if let Some(intent) = intent {
                state.current_intent = intent.trim().to_string();
            }
            if state.current_mode == mode {
                ::log::debug!("Already in {} mode", mode);
                self.persist(&state);
                return true;
            }
            ::log::info!("Switching from {} to {} mode", state.current_mode, mode);
            state.current_mode = mode;
            state.generated_html.clear();
            self.persist(&state);
            self.generation.fetch_add(1, Ordering::SeqCst) + 1
        };

        let _gate = self.gate.lock().await;
        if self.is_stale(token) {
            ::log::debug!("Mode switch to {} superseded before it started", mode);
            return false;
        }

        self.revert_to_normal().await;
        let Some(layout) = mode.surface_layout() else {
            return true;
        };
        if self.enter(layout, token).await {
            return true;
        }

        let mut state = self.state.lock().await;
        if !self.is_stale(token) {
            ::log::warn!("Could not show {} mode, returning to normal", mode);
            state.current_mode = Mode::Normal;
            state.generated_html.clear();
            self.persist(&state);
            drop(state);
            self.revert_to_normal().await;
        }
        false
    }

    /// Re-capture the page and rebuild the surface for the current mode
    pub async fn regenerate_content(&self) -> bool {
        let token = self.generation.load(Ordering::SeqCst);
        let _gate = self.gate.lock().await;
        if self.is_stale(token) {
            ::log::debug!("Regeneration superseded by a mode switch");
            return false;
        }

        let mode = self.state.lock().await.current_mode;
        let Some(layout) = mode.surface_layout() else {
            ::log::debug!("Nothing to regenerate in normal mode");
            return false;
        };

        let captured = {
            let mut host = self.host.lock().await;
            capture_or_empty(&mut *host).await
        };
        self.generate_and_mount(&captured, layout, token).await
    }

    /// Perform a forwarded action on the original page, then regenerate
    /// after the settle delay. Returns whether the action found its element.
    pub async fn handle_frame_message(&self, message: &FrameMessage) -> bool {
        let performed = {
            let mut host = self.host.lock().await;
            forward(&mut *host, message).await
        };
        if !performed {
            ::log::warn!(
                "No element matches {} in the original frame or the top document",
                message.selector()
            );
            return false;
        }

        // Page scripts may still be reacting to the action
        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }
        if self.get_current_mode().await != Mode::Normal {
            self.regenerate_content().await;
        }
        true
    }

    /// Resolve a raw surface event through the registry and forward it
    pub async fn handle_surface_event(&self, event: &SurfaceEvent) -> bool {
        let message = self.registry.lock().await.dispatch(event);
        match message {
            Some(message) => self.handle_frame_message(&message).await,
            None => false,
        }
    }

    /// Handle every surface event the host collected. Returns how many
    /// reached an element.
    pub async fn pump_surface_events(&self) -> usize {
        let events = {
            let mut host = self.host.lock().await;
            match host.drain_surface_events().await {
                Ok(events) => events,
                Err(e) => {
                    ::log::warn!("Cannot read surface events: {}", e);
                    return 0;
                }
            }
        };

        let mut handled = 0;
        for event in &events {
            if self.handle_surface_event(event).await {
                handled += 1;
            }
        }
        handled
    }

    pub async fn handle_request(&self, request: ExtensionRequest) -> ExtensionResponse {
        match request {
            ExtensionRequest::SetMode { mode, intent } => {
                if self.set_mode(mode, intent).await {
                    ExtensionResponse::ok()
                } else {
                    ExtensionResponse::failed(format!("{} mode could not be shown", mode))
                }
            }
            ExtensionRequest::GetCurrentMode => ExtensionResponse::Mode {
                mode: self.get_current_mode().await,
            },
            ExtensionRequest::SetIntent { intent } => {
                self.set_intent(&intent).await;
                ExtensionResponse::ok()
            }
            ExtensionRequest::RegenerateContent => {
                if self.regenerate_content().await {
                    ExtensionResponse::ok()
                } else {
                    ExtensionResponse::failed("no content was regenerated")
                }
            }
        }
    }

    fn is_stale(&self, token: u64) -> bool {
        self.generation.load(Ordering::SeqCst) != token
    }

    fn persist(&self, state: &OverlayState) {
        PersistedState {
            current_mode: state.current_mode,
            current_intent: state.current_intent.clone(),
            default_mode: state.default_mode,
        }
        .save(self.storage.as_ref());
    }

    /// Undo every visible effect of the previous mode
    async fn revert_to_normal(&self) {
        let mut host = self.host.lock().await;
        if let Err(e) = host.unmount_surface().await {
            ::log::warn!("Failed to unmount the surface: {}", e);
        }
        if let Err(e) = host.remove_original_frame().await {
            ::log::warn!("Failed to remove the original frame: {}", e);
        }
        if let Err(e) = host.show_original().await {
            ::log::warn!("Failed to show the original page: {}", e);
        }
        self.registry.lock().await.clear();
    }

    /// Hide the original, prepare content, then show it
    async fn enter(&self, layout: SurfaceLayout, token: u64) -> bool {
        let captured = {
            let mut host = self.host.lock().await;
            match host.hide_original().await {
                Ok(count) => ::log::debug!("Hid {} original elements", count),
                Err(e) => ::log::warn!("Failed to hide the original page: {}", e),
            }

            let captured = capture_or_empty(&mut *host).await;
            if layout == SurfaceLayout::SideBySide {
                if let Err(e) = host.mount_original_frame(&captured.html).await {
                    ::log::warn!("Failed to mount the original frame: {}", e);
                }
            }
            captured
        };

        self.generate_and_mount(&captured, layout, token).await
    }

    async fn generate_and_mount(&self, captured: &CapturedPage, layout: SurfaceLayout, token: u64) -> bool {
        let (intent, previous_html) = {
            let state = self.state.lock().await;
            (state.current_intent.clone(), state.generated_html.clone())
        };

        let output = {
            let mut registry = self.registry.lock().await;
            self.pipeline
                .run(captured, &intent, &previous_html, &mut registry)
                .await
        };

        if self.is_stale(token) {
            ::log::info!("Discarding a surface generated for a superseded mode");
            return false;
        }

        if let Err(e) = self.host.lock().await.mount_surface(&output.html, layout).await {
            ::log::error!("Failed to mount the surface: {}", e);
            return false;
        }
        ::log::info!(
            "Mounted surface with {} of {} candidate elements",
            output.selected.len(),
            output.candidate_count
        );
        self.state.lock().await.generated_html = output.html;
        true
    }
}

/// Capture the page, or stand in an empty one so a minimal surface still renders
async fn capture_or_empty<H: PageHost>(host: &mut H) -> CapturedPage {
    match host.capture().await {
        Ok(page) => page,
        Err(e) => {
            ::log::error!("Failed to capture the page: {}", e);
            CapturedPage::new(host.page_url(), "")
        }
    }
}

/// Try the original frame first, then the top document
async fn forward<H: PageHost>(host: &mut H, message: &FrameMessage) -> bool {
    for target in [FrameTarget::OriginalFrame, FrameTarget::TopDocument] {
        let result = match message {
            FrameMessage::ClickElement { selector } => host.click(target, selector).await,
            FrameMessage::ChangeElement { selector, value } => {
                host.set_value(target, selector, value).await
            }
        };
        match result {
            Ok(true) => {
                ::log::info!("Forwarded {:?} to {:?}", message, target);
                return true;
            }
            Ok(false) => ::log::debug!("{} not found in {:?}", message.selector(), target),
            Err(e) => ::log::warn!("Forwarding to {:?} failed: {}", target, e),
        }
    }
    false
}
