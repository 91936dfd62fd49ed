//! Wire methods of the bridge.
//!
//! [`HostCommand`] flows host → browser process, [`ClientNotification`] flows
//! browser process → host. Variant names are the case-sensitive method names,
//! fields are sent as camelCase params.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::message::WireCall;
use crate::input::{KeyEvent, MouseButton};
use crate::types::{BrowserId, Rect, WindowHandle};

/// Commands the host sends to the browser process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all_fields = "camelCase")]
pub enum HostCommand {
    /// Create a browser under the given parent window
    CreateBrowser {
        parent_hwnd: WindowHandle,
        url: String,
        browser_id: BrowserId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_context_preferences: Option<BTreeMap<String, Value>>,
    },

    /// Close a browser; closing an unknown id is a no-op
    CloseBrowser { browser_id: BrowserId },

    /// Ask the browser process to exit
    CloseHost,

    /// Forward an opaque DevTools protocol message
    SendDevToolsMessage { browser_id: BrowserId, message: String },

    SetFocus { browser_id: BrowserId, focus: bool },

    /// Set one request context preference; `browser_id: None` targets the global context
    SetRequestContextPreference {
        #[serde(default)]
        browser_id: Option<BrowserId>,
        name: String,
        value: Value,
    },

    /// Set several preferences at once
    SetRequestContextPreferences {
        #[serde(default)]
        browser_id: Option<BrowserId>,
        preferences: BTreeMap<String, Value>,
    },

    /// The parent window started moving or resizing
    NotifyMoveOrResizeStarted { browser_id: BrowserId, rect: Rect },

    SendMouseMoveEvent {
        browser_id: BrowserId,
        x: i32,
        y: i32,
        mouse_leave: bool,
        modifiers: u32,
    },

    SendMouseClickEvent {
        browser_id: BrowserId,
        x: i32,
        y: i32,
        button: MouseButton,
        mouse_up: bool,
        click_count: i32,
        modifiers: u32,
    },

    SendMouseWheelEvent {
        browser_id: BrowserId,
        x: i32,
        y: i32,
        delta_x: i32,
        delta_y: i32,
        modifiers: u32,
    },

    SendCaptureLostEvent { browser_id: BrowserId },

    SendKeyEvent { browser_id: BrowserId, event: KeyEvent },

    /// Navigate the main frame
    LoadUrl { browser_id: BrowserId, url: String },

    /// Open the DevTools front-end for a browser
    ShowDevTools { browser_id: BrowserId },

    /// Ask for a full repaint of the main view
    RequestFrame { browser_id: BrowserId },
}

impl HostCommand {
    /// Browser this command targets, if any.
    pub fn browser_id(&self) -> Option<BrowserId> {
        match self {
            HostCommand::CreateBrowser { browser_id, .. }
            | HostCommand::CloseBrowser { browser_id }
            | HostCommand::SendDevToolsMessage { browser_id, .. }
            | HostCommand::SetFocus { browser_id, .. }
            | HostCommand::NotifyMoveOrResizeStarted { browser_id, .. }
            | HostCommand::SendMouseMoveEvent { browser_id, .. }
            | HostCommand::SendMouseClickEvent { browser_id, .. }
            | HostCommand::SendMouseWheelEvent { browser_id, .. }
            | HostCommand::SendCaptureLostEvent { browser_id }
            | HostCommand::SendKeyEvent { browser_id, .. }
            | HostCommand::LoadUrl { browser_id, .. }
            | HostCommand::ShowDevTools { browser_id }
            | HostCommand::RequestFrame { browser_id } => Some(*browser_id),
            HostCommand::SetRequestContextPreference { browser_id, .. }
            | HostCommand::SetRequestContextPreferences { browser_id, .. } => *browser_id,
            HostCommand::CloseHost => None,
        }
    }
}

impl WireCall for HostCommand {
    const METHODS: &'static [&'static str] = &[
        "CreateBrowser",
        "CloseBrowser",
        "CloseHost",
        "SendDevToolsMessage",
        "SetFocus",
        "SetRequestContextPreference",
        "SetRequestContextPreferences",
        "NotifyMoveOrResizeStarted",
        "SendMouseMoveEvent",
        "SendMouseClickEvent",
        "SendMouseWheelEvent",
        "SendCaptureLostEvent",
        "SendKeyEvent",
        "LoadUrl",
        "ShowDevTools",
        "RequestFrame",
    ];

    fn method(&self) -> &'static str {
        match self {
            HostCommand::CreateBrowser { .. } => "CreateBrowser",
            HostCommand::CloseBrowser { .. } => "CloseBrowser",
            HostCommand::CloseHost => "CloseHost",
            HostCommand::SendDevToolsMessage { .. } => "SendDevToolsMessage",
            HostCommand::SetFocus { .. } => "SetFocus",
            HostCommand::SetRequestContextPreference { .. } => "SetRequestContextPreference",
            HostCommand::SetRequestContextPreferences { .. } => "SetRequestContextPreferences",
            HostCommand::NotifyMoveOrResizeStarted { .. } => "NotifyMoveOrResizeStarted",
            HostCommand::SendMouseMoveEvent { .. } => "SendMouseMoveEvent",
            HostCommand::SendMouseClickEvent { .. } => "SendMouseClickEvent",
            HostCommand::SendMouseWheelEvent { .. } => "SendMouseWheelEvent",
            HostCommand::SendCaptureLostEvent { .. } => "SendCaptureLostEvent",
            HostCommand::SendKeyEvent { .. } => "SendKeyEvent",
            HostCommand::LoadUrl { .. } => "LoadUrl",
            HostCommand::ShowDevTools { .. } => "ShowDevTools",
            HostCommand::RequestFrame { .. } => "RequestFrame",
        }
    }
}

/// Notifications the browser process sends to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all_fields = "camelCase")]
pub enum ClientNotification {
    /// The browser process finished initializing and accepts commands
    OnContextInitialized { remote_ui_thread_id: i32 },

    OnAfterBrowserCreated {
        browser_id: BrowserId,
        window_handle: WindowHandle,
    },

    NotifyAddressChanged { browser_id: BrowserId, address: String },

    NotifyTitleChanged { browser_id: BrowserId, title: String },

    NotifyLoadingStateChange {
        browser_id: BrowserId,
        is_loading: bool,
        can_go_back: bool,
        can_go_forward: bool,
    },

    NotifyStatusMessage {
        browser_id: BrowserId,
        status_message: String,
    },

    /// Opaque DevTools protocol payload, passed through untouched
    OnDevToolsMessage { browser_id: BrowserId, message: String },

    OnDevToolsAgentDetached { browser_id: BrowserId },

    OnDevToolsReady { browser_id: BrowserId },

    /// A frame is available in the named shared memory region
    NotifyPaint {
        browser_id: BrowserId,
        is_popup: bool,
        dirty_rect: Rect,
        width: i32,
        height: i32,
        shared_memory_name: String,
    },

    NotifyPopupShow { browser_id: BrowserId, show: bool },

    NotifyPopupSize { browser_id: BrowserId, rect: Rect },
}

impl ClientNotification {
    /// Browser this notification concerns, if any.
    pub fn browser_id(&self) -> Option<BrowserId> {
        match self {
            ClientNotification::OnContextInitialized { .. } => None,
            ClientNotification::OnAfterBrowserCreated { browser_id, .. }
            | ClientNotification::NotifyAddressChanged { browser_id, .. }
            | ClientNotification::NotifyTitleChanged { browser_id, .. }
            | ClientNotification::NotifyLoadingStateChange { browser_id, .. }
            | ClientNotification::NotifyStatusMessage { browser_id, .. }
            | ClientNotification::OnDevToolsMessage { browser_id, .. }
            | ClientNotification::OnDevToolsAgentDetached { browser_id }
            | ClientNotification::OnDevToolsReady { browser_id }
            | ClientNotification::NotifyPaint { browser_id, .. }
            | ClientNotification::NotifyPopupShow { browser_id, .. }
            | ClientNotification::NotifyPopupSize { browser_id, .. } => Some(*browser_id),
        }
    }
}

impl WireCall for ClientNotification {
    const METHODS: &'static [&'static str] = &[
        "OnContextInitialized",
        "OnAfterBrowserCreated",
        "NotifyAddressChanged",
        "NotifyTitleChanged",
        "NotifyLoadingStateChange",
        "NotifyStatusMessage",
        "OnDevToolsMessage",
        "OnDevToolsAgentDetached",
        "OnDevToolsReady",
        "NotifyPaint",
        "NotifyPopupShow",
        "NotifyPopupSize",
    ];

    fn method(&self) -> &'static str {
        match self {
            ClientNotification::OnContextInitialized { .. } => "OnContextInitialized",
            ClientNotification::OnAfterBrowserCreated { .. } => "OnAfterBrowserCreated",
            ClientNotification::NotifyAddressChanged { .. } => "NotifyAddressChanged",
            ClientNotification::NotifyTitleChanged { .. } => "NotifyTitleChanged",
            ClientNotification::NotifyLoadingStateChange { .. } => "NotifyLoadingStateChange",
            ClientNotification::NotifyStatusMessage { .. } => "NotifyStatusMessage",
            ClientNotification::OnDevToolsMessage { .. } => "OnDevToolsMessage",
            ClientNotification::OnDevToolsAgentDetached { .. } => "OnDevToolsAgentDetached",
            ClientNotification::OnDevToolsReady { .. } => "OnDevToolsReady",
            ClientNotification::NotifyPaint { .. } => "NotifyPaint",
            ClientNotification::NotifyPopupShow { .. } => "NotifyPopupShow",
            ClientNotification::NotifyPopupSize { .. } => "NotifyPopupSize",
        }
    }
}

/// Outcome of setting a request context preference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl PreferenceResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error_message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{KeyEventType, EVENTFLAG_SHIFT_DOWN};
    use crate::rpc::message::{join_call, split_call};
    use serde_json::json;

    fn all_commands() -> Vec<HostCommand> {
        let id = BrowserId(1);
        vec![
            HostCommand::CreateBrowser {
                parent_hwnd: WindowHandle(0x10),
                url: "https://example.com".to_string(),
                browser_id: id,
                request_context_preferences: None,
            },
            HostCommand::CloseBrowser { browser_id: id },
            HostCommand::CloseHost,
            HostCommand::SendDevToolsMessage {
                browser_id: id,
                message: "{}".to_string(),
            },
            HostCommand::SetFocus {
                browser_id: id,
                focus: true,
            },
            HostCommand::SetRequestContextPreference {
                browser_id: None,
                name: "intl.accept_languages".to_string(),
                value: json!("de-DE"),
            },
            HostCommand::SetRequestContextPreferences {
                browser_id: Some(id),
                preferences: BTreeMap::new(),
            },
            HostCommand::NotifyMoveOrResizeStarted {
                browser_id: id,
                rect: Rect::new(0, 0, 640, 480),
            },
            HostCommand::SendMouseMoveEvent {
                browser_id: id,
                x: 1,
                y: 2,
                mouse_leave: false,
                modifiers: 0,
            },
            HostCommand::SendMouseClickEvent {
                browser_id: id,
                x: 1,
                y: 2,
                button: MouseButton::Left,
                mouse_up: false,
                click_count: 1,
                modifiers: 0,
            },
            HostCommand::SendMouseWheelEvent {
                browser_id: id,
                x: 1,
                y: 2,
                delta_x: 0,
                delta_y: -120,
                modifiers: 0,
            },
            HostCommand::SendCaptureLostEvent { browser_id: id },
            HostCommand::SendKeyEvent {
                browser_id: id,
                event: KeyEvent::new(KeyEventType::KeyDown, 0x41).with_modifier(EVENTFLAG_SHIFT_DOWN),
            },
            HostCommand::LoadUrl {
                browser_id: id,
                url: "about:blank".to_string(),
            },
            HostCommand::ShowDevTools { browser_id: id },
            HostCommand::RequestFrame { browser_id: id },
        ]
    }

    #[test]
    fn test_every_command_maps_to_its_wire_name() {
        let commands = all_commands();
        assert_eq!(commands.len(), HostCommand::METHODS.len());

        for command in commands {
            let (method, params) = split_call(&command).unwrap();
            assert_eq!(method, command.method());
            assert!(HostCommand::METHODS.contains(&method.as_str()));

            let decoded: HostCommand = join_call(&method, params.unwrap_or(Value::Null)).unwrap();
            assert_eq!(decoded, command);
        }
    }

    #[test]
    fn test_params_are_camel_case() {
        let (_, params) = split_call(&ClientNotification::NotifyLoadingStateChange {
            browser_id: BrowserId(4),
            is_loading: true,
            can_go_back: false,
            can_go_forward: true,
        })
        .unwrap();

        assert_eq!(
            params.unwrap(),
            json!({"browserId": 4, "isLoading": true, "canGoBack": false, "canGoForward": true})
        );
    }

    #[test]
    fn test_close_host_has_no_params() {
        let (method, params) = split_call(&HostCommand::CloseHost).unwrap();
        assert_eq!(method, "CloseHost");
        assert!(params.is_none());
    }

    #[test]
    fn test_decode_paint_notification() {
        let call: ClientNotification = join_call(
            "NotifyPaint",
            json!({
                "browserId": 2,
                "isPopup": false,
                "dirtyRect": {"x": 0, "y": 0, "width": 10, "height": 10},
                "width": 400,
                "height": 300,
                "sharedMemoryName": "/kib_view_0011223344556677"
            }),
        )
        .unwrap();

        assert_eq!(call.method(), "NotifyPaint");
        assert_eq!(call.browser_id(), Some(BrowserId(2)));
    }

    #[test]
    fn test_preference_result_wire_format() {
        let json = serde_json::to_value(PreferenceResult::failed("read-only")).unwrap();
        assert_eq!(json, json!({"success": false, "errorMessage": "read-only"}));
        assert_eq!(serde_json::to_value(PreferenceResult::ok()).unwrap(), json!({"success": true}));
    }
}
