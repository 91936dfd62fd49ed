//! Routes notifications from the browser process to browser proxies.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, trace};

use super::browser::RemoteBrowser;
use super::readiness::ReadyGate;
use super::registry::BrowserRegistry;
use crate::rpc::{ClientNotification, ErrorObject, RpcChannel, RpcHandler, WireCall};

/// Not yet reported by `OnContextInitialized`.
pub(crate) const NO_THREAD_ID: i32 = i32::MIN;

/// Host side [`RpcHandler`]
pub(crate) struct HostDispatch {
    pub(crate) registry: Arc<BrowserRegistry<RemoteBrowser>>,
    pub(crate) gate: ReadyGate,
    pub(crate) remote_ui_thread_id: Arc<AtomicI32>,
}

#[async_trait]
impl RpcHandler for HostDispatch {
    type Call = ClientNotification;

    async fn handle(&self, call: ClientNotification, _peer: &RpcChannel) -> Result<Value, ErrorObject> {
        if let ClientNotification::OnContextInitialized { remote_ui_thread_id } = call {
            info!("Browser process initialized (remote UI thread {})", remote_ui_thread_id);
            self.remote_ui_thread_id.store(remote_ui_thread_id, Ordering::SeqCst);
            self.gate.open();
            return Ok(Value::Null);
        }

        let Some(id) = call.browser_id() else {
            return Ok(Value::Null);
        };

        let Some(browser) = self.registry.lookup(id) else {
            trace!("Ignoring {} for unknown browser {}", call.method(), id);
            return Ok(Value::Null);
        };

        match call {
            ClientNotification::OnContextInitialized { .. } => {}
            ClientNotification::OnAfterBrowserCreated { window_handle, .. } => browser.on_created(window_handle),
            ClientNotification::NotifyAddressChanged { address, .. } => browser.on_address_changed(address),
            ClientNotification::NotifyTitleChanged { title, .. } => browser.on_title_changed(title),
            ClientNotification::NotifyLoadingStateChange {
                is_loading,
                can_go_back,
                can_go_forward,
                ..
            } => browser.on_loading_state_change(is_loading, can_go_back, can_go_forward),
            ClientNotification::NotifyStatusMessage { status_message, .. } => {
                browser.on_status_message(status_message)
            }
            ClientNotification::OnDevToolsMessage { message, .. } => browser.on_devtools_message(message),
            ClientNotification::OnDevToolsAgentDetached { .. } => browser.on_devtools_agent_detached(),
            ClientNotification::OnDevToolsReady { .. } => browser.on_devtools_ready(),
            ClientNotification::NotifyPaint {
                is_popup,
                dirty_rect,
                width,
                height,
                shared_memory_name,
                ..
            } => browser.on_paint(is_popup, dirty_rect, width, height, &shared_memory_name),
            ClientNotification::NotifyPopupShow { show, .. } => browser.on_popup_show(show),
            ClientNotification::NotifyPopupSize { rect, .. } => browser.on_popup_size(rect),
        }

        Ok(Value::Null)
    }
}
