//! The browser engine seam of the browser process.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::input::InputEvent;
use crate::rpc::{ClientNotification, PreferenceResult, RpcChannel, RpcError};
use crate::types::{BrowserId, Rect, WindowHandle};

/// Sends [`ClientNotification`]s to the host.
///
/// Sending never blocks; once the host is gone notifications are dropped.
#[derive(Clone, Debug)]
pub struct RemoteNotifier {
    channel: RpcChannel,
}

impl RemoteNotifier {
    pub fn new(channel: RpcChannel) -> Self {
        Self { channel }
    }

    pub fn is_closed(&self) -> bool {
        self.channel.is_closed()
    }

    /// Sends a notification, reporting whether it was queued.
    pub fn try_notify(&self, notification: &ClientNotification) -> Result<(), RpcError> {
        self.channel.notify(notification)
    }

    pub fn notify(&self, notification: ClientNotification) {
        if let Err(e) = self.channel.notify(&notification) {
            debug!("Dropping {:?}: {}", notification, e);
        }
    }

    pub fn context_initialized(&self, remote_ui_thread_id: i32) {
        self.notify(ClientNotification::OnContextInitialized { remote_ui_thread_id });
    }

    pub fn browser_created(&self, browser_id: BrowserId, window_handle: WindowHandle) {
        self.notify(ClientNotification::OnAfterBrowserCreated {
            browser_id,
            window_handle,
        });
    }

    pub fn address_changed(&self, browser_id: BrowserId, address: impl Into<String>) {
        self.notify(ClientNotification::NotifyAddressChanged {
            browser_id,
            address: address.into(),
        });
    }

    pub fn title_changed(&self, browser_id: BrowserId, title: impl Into<String>) {
        self.notify(ClientNotification::NotifyTitleChanged {
            browser_id,
            title: title.into(),
        });
    }

    pub fn loading_state(&self, browser_id: BrowserId, is_loading: bool, can_go_back: bool, can_go_forward: bool) {
        self.notify(ClientNotification::NotifyLoadingStateChange {
            browser_id,
            is_loading,
            can_go_back,
            can_go_forward,
        });
    }

    pub fn status_message(&self, browser_id: BrowserId, status_message: impl Into<String>) {
        self.notify(ClientNotification::NotifyStatusMessage {
            browser_id,
            status_message: status_message.into(),
        });
    }

    pub fn devtools_message(&self, browser_id: BrowserId, message: impl Into<String>) {
        self.notify(ClientNotification::OnDevToolsMessage {
            browser_id,
            message: message.into(),
        });
    }

    pub fn devtools_agent_detached(&self, browser_id: BrowserId) {
        self.notify(ClientNotification::OnDevToolsAgentDetached { browser_id });
    }

    pub fn devtools_ready(&self, browser_id: BrowserId) {
        self.notify(ClientNotification::OnDevToolsReady { browser_id });
    }

    pub fn paint(
        &self,
        browser_id: BrowserId,
        is_popup: bool,
        dirty_rect: Rect,
        width: i32,
        height: i32,
        shared_memory_name: impl Into<String>,
    ) {
        self.notify(ClientNotification::NotifyPaint {
            browser_id,
            is_popup,
            dirty_rect,
            width,
            height,
            shared_memory_name: shared_memory_name.into(),
        });
    }

    pub fn popup_show(&self, browser_id: BrowserId, show: bool) {
        self.notify(ClientNotification::NotifyPopupShow { browser_id, show });
    }

    pub fn popup_size(&self, browser_id: BrowserId, rect: Rect) {
        self.notify(ClientNotification::NotifyPopupSize { browser_id, rect });
    }
}

/// Parameters of `CreateBrowser`
#[derive(Debug, Clone, PartialEq)]
pub struct CreateBrowserRequest {
    pub browser_id: BrowserId,
    pub parent_window: WindowHandle,
    pub url: String,
    pub preferences: BTreeMap<String, Value>,
}

/// A browser engine driven by host commands.
///
/// Calls arrive on the RPC read loop in wire order; implementations report
/// back through the [`RemoteNotifier`]. Commands for unknown browsers must
/// be ignored.
#[async_trait]
pub trait BrowserBackend: Send + Sync + 'static {
    /// Identity reported in `OnContextInitialized`.
    fn ui_thread_id(&self) -> i32;

    async fn create_browser(&self, notifier: &RemoteNotifier, request: CreateBrowserRequest);

    async fn close_browser(&self, notifier: &RemoteNotifier, browser_id: BrowserId);

    async fn load_url(&self, notifier: &RemoteNotifier, browser_id: BrowserId, url: String);

    async fn set_focus(&self, notifier: &RemoteNotifier, browser_id: BrowserId, focus: bool);

    async fn move_or_resize_started(&self, notifier: &RemoteNotifier, browser_id: BrowserId, rect: Rect);

    async fn input(&self, notifier: &RemoteNotifier, browser_id: BrowserId, event: InputEvent);

    /// Handles an opaque DevTools protocol message.
    async fn send_devtools_message(&self, notifier: &RemoteNotifier, browser_id: BrowserId, message: String);

    async fn show_dev_tools(&self, notifier: &RemoteNotifier, browser_id: BrowserId);

    /// Repaints the whole main view.
    async fn request_frame(&self, notifier: &RemoteNotifier, browser_id: BrowserId);

    /// Sets a request context preference; `None` targets the global context.
    async fn set_preference(&self, browser_id: Option<BrowserId>, name: &str, value: Value) -> PreferenceResult;

    /// Sets several preferences, one result per name.
    async fn set_preferences(
        &self,
        browser_id: Option<BrowserId>,
        preferences: BTreeMap<String, Value>,
    ) -> BTreeMap<String, PreferenceResult> {
        let mut results = BTreeMap::new();
        for (name, value) in preferences {
            let result = self.set_preference(browser_id, &name, value).await;
            results.insert(name, result);
        }
        results
    }

    /// Releases every browser. Called once when the connection ends.
    async fn shutdown(&self);
}
