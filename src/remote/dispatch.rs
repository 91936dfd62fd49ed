//! Decodes host commands and drives the backend.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, trace};

use super::backend::{BrowserBackend, CreateBrowserRequest, RemoteNotifier};
use crate::input::{InputEvent, MouseEvent};
use crate::rpc::{ErrorObject, HostCommand, RpcChannel, RpcHandler, WireCall};

/// Browser-process side [`RpcHandler`]
pub struct RemoteDispatch<B> {
    backend: Arc<B>,
}

impl<B> RemoteDispatch<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl<B: BrowserBackend> RpcHandler for RemoteDispatch<B> {
    type Call = HostCommand;

    async fn handle(&self, call: HostCommand, peer: &RpcChannel) -> Result<Value, ErrorObject> {
        let notifier = RemoteNotifier::new(peer.clone());
        let backend = &self.backend;
        let method = call.method();

        match call {
            HostCommand::CreateBrowser {
                parent_hwnd,
                url,
                browser_id,
                request_context_preferences,
            } => {
                backend
                    .create_browser(
                        &notifier,
                        CreateBrowserRequest {
                            browser_id,
                            parent_window: parent_hwnd,
                            url,
                            preferences: request_context_preferences.unwrap_or_default(),
                        },
                    )
                    .await
            }
            HostCommand::CloseBrowser { browser_id } => backend.close_browser(&notifier, browser_id).await,
            HostCommand::CloseHost => {
                info!("Host requested shutdown");
                peer.close();
            }
            HostCommand::SendDevToolsMessage { browser_id, message } => {
                backend.send_devtools_message(&notifier, browser_id, message).await
            }
            HostCommand::SetFocus { browser_id, focus } => backend.set_focus(&notifier, browser_id, focus).await,
            HostCommand::SetRequestContextPreference {
                browser_id,
                name,
                value,
            } => {
                let result = backend.set_preference(browser_id, &name, value).await;
                return serde_json::to_value(result).map_err(|e| ErrorObject::internal(e.to_string()));
            }
            HostCommand::SetRequestContextPreferences {
                browser_id,
                preferences,
            } => {
                let results = backend.set_preferences(browser_id, preferences).await;
                return serde_json::to_value(results).map_err(|e| ErrorObject::internal(e.to_string()));
            }
            HostCommand::NotifyMoveOrResizeStarted { browser_id, rect } => {
                backend.move_or_resize_started(&notifier, browser_id, rect).await
            }
            HostCommand::SendMouseMoveEvent {
                browser_id,
                x,
                y,
                mouse_leave,
                modifiers,
            } => {
                let event = InputEvent::MouseMove {
                    event: MouseEvent::with_modifiers(x, y, modifiers),
                    mouse_leave,
                };
                backend.input(&notifier, browser_id, event).await
            }
            HostCommand::SendMouseClickEvent {
                browser_id,
                x,
                y,
                button,
                mouse_up,
                click_count,
                modifiers,
            } => {
                let event = InputEvent::MouseClick {
                    event: MouseEvent::with_modifiers(x, y, modifiers),
                    button,
                    mouse_up,
                    click_count,
                };
                backend.input(&notifier, browser_id, event).await
            }
            HostCommand::SendMouseWheelEvent {
                browser_id,
                x,
                y,
                delta_x,
                delta_y,
                modifiers,
            } => {
                let event = InputEvent::MouseWheel {
                    event: MouseEvent::with_modifiers(x, y, modifiers),
                    delta_x,
                    delta_y,
                };
                backend.input(&notifier, browser_id, event).await
            }
            HostCommand::SendCaptureLostEvent { browser_id } => {
                backend.input(&notifier, browser_id, InputEvent::CaptureLost).await
            }
            HostCommand::SendKeyEvent { browser_id, event } => {
                backend.input(&notifier, browser_id, InputEvent::Key(event)).await
            }
            HostCommand::LoadUrl { browser_id, url } => backend.load_url(&notifier, browser_id, url).await,
            HostCommand::ShowDevTools { browser_id } => backend.show_dev_tools(&notifier, browser_id).await,
            HostCommand::RequestFrame { browser_id } => backend.request_frame(&notifier, browser_id).await,
        }

        trace!("{} handled", method);
        Ok(Value::Null)
    }
}
