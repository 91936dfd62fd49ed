//! Host-side proxy for a browser living in the browser process.
//!
//! Commands are forwarded through the host's [`CommandSender`]; state is
//! updated by [`super::dispatch::HostDispatch`] as notifications arrive and
//! every change is re-posted to the UI through the browser's dispatcher.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::{debug, trace};

use super::commands::CommandSender;
use super::events::{BrowserEvent, BrowserEventHandler, BrowserOptions, UiDispatcher};
use super::registry::BrowserRegistry;
use crate::devtools::DevToolsTransport;
use crate::error::HostError;
use crate::frame::{FrameReader, RenderSurface, SurfaceKind};
use crate::input::{InputEvent, KeyEvent, MouseButton, MouseEvent};
use crate::rpc::{HostCommand, PreferenceResult};
use crate::types::{BrowserId, Rect, WindowHandle};

/// Lifecycle of a remote browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserStatus {
    /// `CreateBrowser` was sent, `OnAfterBrowserCreated` not seen yet.
    Pending,
    /// The native browser exists.
    Initialized,
    /// Closed locally.
    Closed,
}

impl std::fmt::Display for BrowserStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrowserStatus::Pending => write!(f, "Pending"),
            BrowserStatus::Initialized => write!(f, "Initialized"),
            BrowserStatus::Closed => write!(f, "Closed"),
        }
    }
}

/// Last known state of a remote browser.
#[derive(Debug, Clone)]
pub struct BrowserState {
    pub status: BrowserStatus,

    /// Native window, `WindowHandle::NULL` until created (and for windowless browsers).
    pub window_handle: WindowHandle,

    /// Current address of the main frame.
    pub address: String,

    /// Page title (may be empty while loading).
    pub title: String,

    pub is_loading: bool,
    pub can_go_back: bool,
    pub can_go_forward: bool,

    /// Status bar text.
    pub status_message: String,

    pub popup_visible: bool,
    pub popup_rect: Rect,

    /// Timestamp when the proxy was created.
    pub created_at: DateTime<Utc>,

    /// Timestamp of the last state change.
    pub last_updated: DateTime<Utc>,
}

impl BrowserState {
    fn new(url: String) -> Self {
        let now = Utc::now();
        Self {
            status: BrowserStatus::Pending,
            window_handle: WindowHandle::NULL,
            address: url,
            title: String::new(),
            is_loading: false,
            can_go_back: false,
            can_go_forward: false,
            status_message: String::new(),
            popup_visible: false,
            popup_rect: Rect::default(),
            created_at: now,
            last_updated: now,
        }
    }

    /// Time since the proxy was created.
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }
}

/// Proxy for one remote browser
pub struct RemoteBrowser {
    id: BrowserId,
    sender: CommandSender,
    state: RwLock<BrowserState>,
    disposed: AtomicBool,
    dispatcher: Arc<dyn UiDispatcher>,
    handler: Option<Arc<dyn BrowserEventHandler>>,
    devtools: Arc<DevToolsTransport>,
    view: Mutex<RenderSurface>,
    popup: Mutex<RenderSurface>,
    registry: Weak<BrowserRegistry<RemoteBrowser>>,
}

impl RemoteBrowser {
    pub(crate) fn new(
        id: BrowserId,
        url: String,
        sender: CommandSender,
        options: &BrowserOptions,
        registry: Weak<BrowserRegistry<RemoteBrowser>>,
    ) -> Self {
        Self {
            id,
            devtools: Arc::new(DevToolsTransport::new(id, sender.clone())),
            sender,
            state: RwLock::new(BrowserState::new(url)),
            disposed: AtomicBool::new(false),
            dispatcher: options.dispatcher.clone(),
            handler: options.handler.clone(),
            view: Mutex::new(RenderSurface::new()),
            popup: Mutex::new(RenderSurface::new()),
            registry,
        }
    }

    pub fn id(&self) -> BrowserId {
        self.id
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> BrowserState {
        self.state.read().clone()
    }

    pub fn status(&self) -> BrowserStatus {
        self.state.read().status
    }

    pub fn is_initialized(&self) -> bool {
        self.status() == BrowserStatus::Initialized
    }

    pub fn is_closed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn window_handle(&self) -> WindowHandle {
        self.state.read().window_handle
    }

    pub fn address(&self) -> String {
        self.state.read().address.clone()
    }

    pub fn title(&self) -> String {
        self.state.read().title.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.read().is_loading
    }

    pub fn can_go_back(&self) -> bool {
        self.state.read().can_go_back
    }

    pub fn can_go_forward(&self) -> bool {
        self.state.read().can_go_forward
    }

    pub fn status_message(&self) -> String {
        self.state.read().status_message.clone()
    }

    /// DevTools transport for this browser.
    pub fn devtools(&self) -> Arc<DevToolsTransport> {
        self.devtools.clone()
    }

    /// Runs `f` with the main view surface.
    pub fn with_view_surface<R>(&self, f: impl FnOnce(&RenderSurface) -> R) -> R {
        f(&self.view.lock())
    }

    /// Runs `f` with the popup surface.
    pub fn with_popup_surface<R>(&self, f: impl FnOnce(&RenderSurface) -> R) -> R {
        f(&self.popup.lock())
    }

    // Commands

    fn command(&self, command: HostCommand) -> Result<(), HostError> {
        if self.is_closed() {
            return Err(HostError::BrowserDisposed(self.id));
        }
        self.sender.send(command);
        Ok(())
    }

    /// Navigates the main frame.
    pub fn load_url(&self, url: impl Into<String>) -> Result<(), HostError> {
        self.command(HostCommand::LoadUrl {
            browser_id: self.id,
            url: url.into(),
        })
    }

    pub fn set_focus(&self, focus: bool) -> Result<(), HostError> {
        self.command(HostCommand::SetFocus {
            browser_id: self.id,
            focus,
        })
    }

    /// Tells the browser its parent window started moving or resizing.
    pub fn notify_move_or_resize_started(&self, rect: Rect) -> Result<(), HostError> {
        self.command(HostCommand::NotifyMoveOrResizeStarted {
            browser_id: self.id,
            rect,
        })
    }

    pub fn show_dev_tools(&self) -> Result<(), HostError> {
        self.command(HostCommand::ShowDevTools { browser_id: self.id })
    }

    /// Asks for a full repaint of the main view.
    pub fn request_frame(&self) -> Result<(), HostError> {
        self.command(HostCommand::RequestFrame { browser_id: self.id })
    }

    /// Forwards an input event. Events keep their submission order.
    pub fn send_input(&self, input: InputEvent) -> Result<(), HostError> {
        let browser_id = self.id;
        let command = match input {
            InputEvent::MouseMove { event, mouse_leave } => HostCommand::SendMouseMoveEvent {
                browser_id,
                x: event.x,
                y: event.y,
                mouse_leave,
                modifiers: event.modifiers,
            },
            InputEvent::MouseClick {
                event,
                button,
                mouse_up,
                click_count,
            } => HostCommand::SendMouseClickEvent {
                browser_id,
                x: event.x,
                y: event.y,
                button,
                mouse_up,
                click_count,
                modifiers: event.modifiers,
            },
            InputEvent::MouseWheel { event, delta_x, delta_y } => HostCommand::SendMouseWheelEvent {
                browser_id,
                x: event.x,
                y: event.y,
                delta_x,
                delta_y,
                modifiers: event.modifiers,
            },
            InputEvent::CaptureLost => HostCommand::SendCaptureLostEvent { browser_id },
            InputEvent::Key(event) => HostCommand::SendKeyEvent { browser_id, event },
        };
        self.command(command)
    }

    pub fn send_mouse_move(&self, event: MouseEvent, mouse_leave: bool) -> Result<(), HostError> {
        self.send_input(InputEvent::MouseMove { event, mouse_leave })
    }

    pub fn send_mouse_click(
        &self,
        event: MouseEvent,
        button: MouseButton,
        mouse_up: bool,
        click_count: i32,
    ) -> Result<(), HostError> {
        self.send_input(InputEvent::MouseClick {
            event,
            button,
            mouse_up,
            click_count,
        })
    }

    pub fn send_mouse_wheel(&self, event: MouseEvent, delta_x: i32, delta_y: i32) -> Result<(), HostError> {
        self.send_input(InputEvent::MouseWheel { event, delta_x, delta_y })
    }

    pub fn send_capture_lost(&self) -> Result<(), HostError> {
        self.send_input(InputEvent::CaptureLost)
    }

    pub fn send_key_event(&self, event: KeyEvent) -> Result<(), HostError> {
        self.send_input(InputEvent::Key(event))
    }

    /// Sets a preference on this browser's request context.
    pub async fn set_request_context_preference(
        &self,
        name: impl Into<String>,
        value: Value,
    ) -> Result<PreferenceResult, HostError> {
        if self.is_closed() {
            return Err(HostError::BrowserDisposed(self.id));
        }
        self.sender
            .request(HostCommand::SetRequestContextPreference {
                browser_id: Some(self.id),
                name: name.into(),
                value,
            })
            .await
    }

    /// Sets several preferences; the result is keyed by preference name.
    pub async fn set_request_context_preferences(
        &self,
        preferences: BTreeMap<String, Value>,
    ) -> Result<BTreeMap<String, PreferenceResult>, HostError> {
        if self.is_closed() {
            return Err(HostError::BrowserDisposed(self.id));
        }
        self.sender
            .request(HostCommand::SetRequestContextPreferences {
                browser_id: Some(self.id),
                preferences,
            })
            .await
    }

    /// Closes the browser. Later calls do nothing.
    ///
    /// Sends `CloseBrowser`, removes the proxy from the host's registry and
    /// disconnects the DevTools transport.
    pub fn close(&self) {
        if self
            .disposed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        debug!(browser = %self.id, "Closing browser");
        self.update(|state| state.status = BrowserStatus::Closed);
        self.sender.send(HostCommand::CloseBrowser { browser_id: self.id });

        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }

        self.devtools.disconnect();
        self.post(BrowserEvent::Closed);
    }

    // Notifications

    fn update(&self, f: impl FnOnce(&mut BrowserState)) {
        let mut state = self.state.write();
        f(&mut state);
        state.last_updated = Utc::now();
    }

    fn post(&self, event: BrowserEvent) {
        let Some(handler) = self.handler.clone() else {
            return;
        };
        let id = self.id;
        self.dispatcher.post(Box::new(move || handler.on_event(id, event)));
    }

    pub(crate) fn on_created(&self, window_handle: WindowHandle) {
        if self.is_closed() {
            return;
        }
        self.update(|state| {
            state.window_handle = window_handle;
            if state.status == BrowserStatus::Pending {
                state.status = BrowserStatus::Initialized;
            }
        });
        debug!(browser = %self.id, window = %window_handle, "Browser created");
        self.post(BrowserEvent::Created { window_handle });
    }

    pub(crate) fn on_address_changed(&self, address: String) {
        if self.is_closed() {
            return;
        }
        self.update(|state| state.address = address.clone());
        self.post(BrowserEvent::AddressChanged { address });
    }

    pub(crate) fn on_title_changed(&self, title: String) {
        if self.is_closed() {
            return;
        }
        self.update(|state| state.title = title.clone());
        self.post(BrowserEvent::TitleChanged { title });
    }

    pub(crate) fn on_loading_state_change(&self, is_loading: bool, can_go_back: bool, can_go_forward: bool) {
        if self.is_closed() {
            return;
        }
        self.update(|state| {
            state.is_loading = is_loading;
            state.can_go_back = can_go_back;
            state.can_go_forward = can_go_forward;
        });
        self.post(BrowserEvent::LoadingStateChanged {
            is_loading,
            can_go_back,
            can_go_forward,
        });
    }

    pub(crate) fn on_status_message(&self, message: String) {
        if self.is_closed() {
            return;
        }
        self.update(|state| state.status_message = message.clone());
        self.post(BrowserEvent::StatusMessage { message });
    }

    /// Copies a frame from shared memory into the matching surface.
    ///
    /// Dimensions come from the region header; `width`/`height` of the
    /// notification are only logged. Regions that cannot be opened (e.g.
    /// replaced by a larger one in the meantime) are skipped.
    pub(crate) fn on_paint(&self, is_popup: bool, dirty_rect: Rect, width: i32, height: i32, shared_memory_name: &str) {
        if self.is_closed() {
            return;
        }

        let reader = match FrameReader::open(shared_memory_name) {
            Ok(reader) => reader,
            Err(e) => {
                debug!(browser = %self.id, "Skipping frame from {}: {}", shared_memory_name, e);
                return;
            }
        };

        let header = reader.header();
        if header.width != width || header.height != height {
            trace!(
                browser = %self.id,
                "Paint metadata {}x{} differs from header {}x{}",
                width,
                height,
                header.width,
                header.height
            );
        }

        let kind = SurfaceKind::from_popup_flag(is_popup);
        let update = {
            let mut surface = match kind {
                SurfaceKind::View => self.view.lock(),
                SurfaceKind::Popup => self.popup.lock(),
            };
            surface.apply(header.width, header.height, reader.pixels(), dirty_rect)
        };
        drop(reader);

        self.post(BrowserEvent::Paint {
            is_popup,
            dirty_rect: update.dirty,
            width: header.width,
            height: header.height,
            resized: update.resized,
        });
    }

    pub(crate) fn on_popup_show(&self, show: bool) {
        if self.is_closed() {
            return;
        }
        self.update(|state| state.popup_visible = show);
        if !show {
            self.popup.lock().clear();
        }
        self.post(BrowserEvent::PopupShow { show });
    }

    pub(crate) fn on_popup_size(&self, rect: Rect) {
        if self.is_closed() {
            return;
        }
        self.update(|state| state.popup_rect = rect);
        self.post(BrowserEvent::PopupSize { rect });
    }

    pub(crate) fn on_devtools_ready(&self) {
        if self.is_closed() {
            return;
        }
        self.devtools.mark_ready();
        self.post(BrowserEvent::DevToolsReady);
    }

    pub(crate) fn on_devtools_message(&self, message: String) {
        self.devtools.deliver(message);
    }

    pub(crate) fn on_devtools_agent_detached(&self) {
        self.devtools.agent_detached();
    }

    pub(crate) fn on_connection_lost(&self) {
        self.devtools.disconnect();
        if self.is_closed() {
            return;
        }
        self.post(BrowserEvent::ConnectionLost);
    }
}

impl std::fmt::Debug for RemoteBrowser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteBrowser")
            .field("id", &self.id)
            .field("state", &*self.state.read())
            .field("closed", &self.is_closed())
            .finish()
    }
}
