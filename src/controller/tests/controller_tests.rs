use crate::config::{ControllerConfig, OverlayConfig};
use crate::controller::{
    ExtensionRequest, ExtensionResponse, Mode, OverlayController, PersistedState, STATE_KEY,
};
use crate::error::LlmError;
use crate::hosts::{FrameTarget, HIDDEN_CLASS, HostAction, SurfaceLayout, VirtualPage};
use crate::llm::testing::ScriptedBackend;
use crate::llm::{ChatBackend, ChatRequest, ChatResponse};
use crate::materialize::{FrameMessage, PROXY_ID_ATTR, ProxyAction, SurfaceEvent};
use crate::pipeline::Pipeline;
use crate::storage::{MemoryStorage, Storage};
use async_trait::async_trait;
use scraper::{Html, Selector};
use std::sync::Arc;
use std::time::Duration;

const URL: &str = "https://shop.test/";

const PAGE: &str = r#"<!DOCTYPE html>
<html><head><title>Shoe Shop</title></head>
<body>
<nav class="menu"><a href="/deals">Deals</a></nav>
<main><input id="q" type="text" placeholder="Search shoes"><button id="go">Search</button></main>
<footer>Copyright</footer>
</body></html>"#;

const RESULTS_PAGE: &str = r#"<!DOCTYPE html>
<html><head><title>Results</title></head>
<body><main><button id="more">More results</button></main></body></html>"#;

fn quick_config() -> ControllerConfig {
    ControllerConfig {
        settle_delay_ms: 0,
        ..ControllerConfig::default()
    }
}

fn controller_with(pipeline: Pipeline, page: VirtualPage) -> OverlayController<VirtualPage> {
    OverlayController::new(
        Arc::new(pipeline),
        page,
        Arc::new(MemoryStorage::new()),
        &quick_config(),
    )
}

fn offline_controller(page: VirtualPage) -> OverlayController<VirtualPage> {
    controller_with(Pipeline::builder().offline().build().unwrap(), page)
}

fn single_attempt() -> OverlayConfig {
    let mut config = OverlayConfig::default();
    config.llm.max_attempts = 1;
    config
}

/// Answers every selection request after a delay
struct SlowBackend;

#[async_trait]
impl ChatBackend for SlowBackend {
    async fn complete(&self, _request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(ChatResponse {
            content: r##"["#go"]"##.to_string(),
            usage: None,
        })
    }
}

fn all_hidden(classes: &[Option<String>]) -> bool {
    classes
        .iter()
        .all(|c| c.as_deref().is_some_and(|c| c.split_whitespace().any(|t| t == HIDDEN_CLASS)))
}

#[tokio::test]
async fn test_mode_round_trip_restores_classes() {
    let controller = offline_controller(VirtualPage::new(URL, PAGE));
    assert_eq!(controller.initialize().await, Mode::Normal);
    let initial = controller.host().lock().await.body_child_classes();

    assert!(controller.set_mode(Mode::SideBySide, Some("search for shoes".into())).await);
    {
        let host = controller.host().lock().await;
        assert!(all_hidden(&host.body_child_classes()));
        assert!(host.frame().is_some_and(|f| f.contains("id=\"go\"")));
        let surface = host.surface().unwrap();
        assert_eq!(surface.layout, SurfaceLayout::SideBySide);
        assert!(surface.html.contains(PROXY_ID_ATTR));
    }

    assert!(controller.set_mode(Mode::Overlay, None).await);
    {
        let host = controller.host().lock().await;
        assert!(all_hidden(&host.body_child_classes()));
        assert!(host.frame().is_none());
        assert_eq!(host.surface().unwrap().layout, SurfaceLayout::FullViewport);
    }

    assert!(controller.set_mode(Mode::Normal, None).await);
    let host = controller.host().lock().await;
    assert!(host.surface().is_none());
    assert!(host.frame().is_none());
    assert_eq!(host.body_child_classes(), initial);
    drop(host);

    let state = controller.state().await;
    assert_eq!(state.current_mode, Mode::Normal);
    assert_eq!(state.current_intent, "search for shoes");
    assert!(state.generated_html.is_empty());
}

#[tokio::test]
async fn test_missing_selector_leaves_state_unchanged() {
    let controller = offline_controller(VirtualPage::new(URL, PAGE));
    controller.initialize().await;
    assert!(controller.set_mode(Mode::SideBySide, None).await);
    let before = controller.state().await;

    let message = FrameMessage::ClickElement {
        selector: "#missing".to_string(),
    };
    assert!(!controller.handle_frame_message(&message).await);

    assert_eq!(controller.state().await, before);
    assert!(controller.host().lock().await.actions().is_empty());
}

#[tokio::test]
async fn test_click_resolves_in_frame_and_regenerates() {
    let page = VirtualPage::new(URL, PAGE).with_click_reaction("#go", RESULTS_PAGE);
    let controller = offline_controller(page);
    assert!(controller.set_mode(Mode::SideBySide, None).await);

    let message = FrameMessage::ClickElement {
        selector: "#go".to_string(),
    };
    assert!(controller.handle_frame_message(&message).await);

    let host = controller.host().lock().await;
    assert_eq!(
        host.actions(),
        &[HostAction::Click {
            target: FrameTarget::OriginalFrame,
            selector: "#go".to_string(),
        }]
    );
    assert!(host.surface().unwrap().html.contains("More results"));
    // Only the working copy reacted
    assert!(!host.document().contains("More results"));
}

#[tokio::test]
async fn test_change_falls_back_to_top_document() {
    let controller = offline_controller(VirtualPage::new(URL, PAGE));
    assert!(controller.set_mode(Mode::Overlay, None).await);

    let message = FrameMessage::ChangeElement {
        selector: "#q".to_string(),
        value: "boots".to_string(),
    };
    assert!(controller.handle_frame_message(&message).await);

    let host = controller.host().lock().await;
    assert_eq!(
        host.actions(),
        &[HostAction::SetValue {
            target: FrameTarget::TopDocument,
            selector: "#q".to_string(),
            value: "boots".to_string(),
        }]
    );
    assert!(host.document().contains("value=\"boots\""));
    assert!(all_hidden(&host.body_child_classes()));
}

#[tokio::test]
async fn test_surface_events_are_proxied() {
    let controller = offline_controller(VirtualPage::new(URL, PAGE));
    assert!(controller.set_mode(Mode::Overlay, None).await);

    let proxy_id = {
        let host = controller.host().lock().await;
        let surface = Html::parse_document(&host.surface().unwrap().html);
        let selector = Selector::parse("#app-main #go").unwrap();
        surface
            .select(&selector)
            .next()
            .and_then(|el| el.value().attr(PROXY_ID_ATTR))
            .unwrap()
            .to_string()
    };

    {
        let mut host = controller.host().lock().await;
        host.post_surface_event(SurfaceEvent {
            proxy_id,
            event: ProxyAction::Click,
            value: None,
        });
        host.post_surface_event(SurfaceEvent {
            proxy_id: "rp-999".to_string(),
            event: ProxyAction::Click,
            value: None,
        });
    }

    assert_eq!(controller.pump_surface_events().await, 1);
    let host = controller.host().lock().await;
    assert_eq!(
        host.actions(),
        &[HostAction::Click {
            target: FrameTarget::TopDocument,
            selector: "#go".to_string(),
        }]
    );
}

#[tokio::test]
async fn test_reentering_active_mode_is_a_no_op() {
    let backend = Arc::new(ScriptedBackend::with(|_| Ok(r##"["#go"]"##.to_string())));
    let pipeline = Pipeline::builder()
        .with_config(single_attempt())
        .with_backend(backend.clone())
        .build()
        .unwrap();
    let controller = controller_with(pipeline, VirtualPage::new(URL, PAGE));

    assert!(controller.set_mode(Mode::Overlay, Some("search".into())).await);
    assert_eq!(backend.request_count(), 1);
    let surface = controller.state().await.generated_html;

    assert!(controller.set_mode(Mode::Overlay, Some("deals".into())).await);
    assert_eq!(backend.request_count(), 1);

    let state = controller.state().await;
    assert_eq!(state.current_intent, "deals");
    assert_eq!(state.generated_html, surface);
}

#[tokio::test]
async fn test_stale_generation_is_discarded() {
    let pipeline = Pipeline::builder()
        .with_config(single_attempt())
        .with_backend(Arc::new(SlowBackend))
        .build()
        .unwrap();
    let controller = controller_with(pipeline, VirtualPage::new(URL, PAGE));
    let initial = controller.host().lock().await.body_child_classes();

    let (entered, reverted) = tokio::join!(controller.set_mode(Mode::Overlay, None), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        controller.set_mode(Mode::Normal, None).await
    });

    assert!(!entered);
    assert!(reverted);
    assert_eq!(controller.get_current_mode().await, Mode::Normal);
    assert!(controller.state().await.generated_html.is_empty());

    let host = controller.host().lock().await;
    assert!(host.surface().is_none());
    assert_eq!(host.body_child_classes(), initial);
}

#[tokio::test]
async fn test_failed_mount_returns_to_normal_and_can_retry() {
    let storage = Arc::new(MemoryStorage::new());
    let controller = OverlayController::new(
        Arc::new(Pipeline::builder().offline().build().unwrap()),
        VirtualPage::new(URL, PAGE).refuse_surface_mounts(1),
        storage.clone(),
        &quick_config(),
    );
    let initial = controller.host().lock().await.body_child_classes();

    assert!(!controller.set_mode(Mode::Overlay, Some("search".into())).await);
    assert_eq!(controller.get_current_mode().await, Mode::Normal);
    assert_eq!(
        PersistedState::load(storage.as_ref()).unwrap().current_mode,
        Mode::Normal
    );
    {
        let host = controller.host().lock().await;
        assert!(host.surface().is_none());
        assert_eq!(host.body_child_classes(), initial);
    }

    assert!(controller.set_mode(Mode::Overlay, None).await);
    assert_eq!(controller.get_current_mode().await, Mode::Overlay);
    assert!(controller.host().lock().await.surface().is_some());
}

#[tokio::test]
async fn test_initialize_restores_persisted_state() {
    let storage = Arc::new(MemoryStorage::new());
    storage
        .set(
            STATE_KEY,
            r#"{"currentMode":"normal","currentIntent":"compare prices","defaultMode":"overlay"}"#
                .to_string(),
        )
        .unwrap();
    let controller = OverlayController::new(
        Arc::new(Pipeline::builder().offline().build().unwrap()),
        VirtualPage::new(URL, PAGE),
        storage.clone(),
        &quick_config(),
    );

    assert_eq!(controller.initialize().await, Mode::Overlay);
    assert_eq!(controller.state().await.current_intent, "compare prices");
    assert!(controller.host().lock().await.surface().is_some());

    controller.set_intent("  find sandals ").await;
    assert_eq!(
        PersistedState::load(storage.as_ref()).unwrap(),
        PersistedState {
            current_mode: Mode::Overlay,
            current_intent: "find sandals".to_string(),
            default_mode: Mode::Overlay,
        }
    );
}

#[tokio::test]
async fn test_extension_requests() {
    let controller = offline_controller(VirtualPage::new(URL, PAGE));

    let request = serde_json::from_str(r#"{"action":"setMode","mode":"overlay","intent":"deals"}"#)
        .unwrap();
    assert_eq!(controller.handle_request(request).await, ExtensionResponse::ok());
    assert_eq!(
        controller.handle_request(ExtensionRequest::GetCurrentMode).await,
        ExtensionResponse::Mode {
            mode: Mode::Overlay
        }
    );
    assert_eq!(
        controller.handle_request(ExtensionRequest::RegenerateContent).await,
        ExtensionResponse::ok()
    );

    let request = ExtensionRequest::SetMode {
        mode: Mode::Normal,
        intent: None,
    };
    assert_eq!(controller.handle_request(request).await, ExtensionResponse::ok());
    assert!(matches!(
        controller.handle_request(ExtensionRequest::RegenerateContent).await,
        ExtensionResponse::Ack { success: false, .. }
    ));
}
