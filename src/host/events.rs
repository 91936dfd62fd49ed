//! Events raised by remote browsers and the UI dispatch seam.
//!
//! Notifications are decoded on the channel's read-loop task. Whatever a UI
//! toolkit needs to see is re-posted through the browser's [`UiDispatcher`],
//! which decides on which thread the [`BrowserEventHandler`] runs.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::types::{BrowserId, Rect, WindowHandle};

/// Something that changed on a remote browser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum BrowserEvent {
    /// The native browser exists; the session is initialized
    Created { window_handle: WindowHandle },

    AddressChanged { address: String },

    TitleChanged { title: String },

    LoadingStateChanged {
        is_loading: bool,
        can_go_back: bool,
        can_go_forward: bool,
    },

    StatusMessage { message: String },

    /// A render surface was updated
    Paint {
        is_popup: bool,
        dirty_rect: Rect,
        width: i32,
        height: i32,
        /// The surface was reallocated for new dimensions
        resized: bool,
    },

    PopupShow { show: bool },

    PopupSize { rect: Rect },

    DevToolsReady,

    /// The browser was closed locally
    Closed,

    /// The browser process went away
    ConnectionLost,
}

/// Receives browser events, on whatever thread the dispatcher chooses.
pub trait BrowserEventHandler: Send + Sync {
    fn on_event(&self, browser: BrowserId, event: BrowserEvent);
}

impl<F> BrowserEventHandler for F
where
    F: Fn(BrowserId, BrowserEvent) + Send + Sync,
{
    fn on_event(&self, browser: BrowserId, event: BrowserEvent) {
        self(browser, event)
    }
}

/// Work to run on the UI thread.
pub type UiTask = Box<dyn FnOnce() + Send + 'static>;

/// Marshals work onto the thread a UI toolkit requires.
pub trait UiDispatcher: Send + Sync {
    fn post(&self, task: UiTask);
}

/// Runs tasks immediately on the calling thread (the RPC read loop).
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatcher;

impl UiDispatcher for InlineDispatcher {
    fn post(&self, task: UiTask) {
        task()
    }
}

/// Queues tasks for a UI thread that drains a [`UiQueue`].
#[derive(Debug, Clone)]
pub struct QueueDispatcher {
    tx: mpsc::UnboundedSender<UiTask>,
}

impl UiDispatcher for QueueDispatcher {
    fn post(&self, task: UiTask) {
        if self.tx.send(task).is_err() {
            tracing::trace!("UI queue is gone, dropping task");
        }
    }
}

/// Receiving end of a [`QueueDispatcher`].
pub struct UiQueue {
    rx: mpsc::UnboundedReceiver<UiTask>,
}

impl UiQueue {
    /// Runs every queued task without waiting. Returns how many ran.
    pub fn pump(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.rx.try_recv() {
            task();
            ran += 1;
        }
        ran
    }

    /// Runs tasks until every dispatcher is dropped.
    pub async fn run(mut self) {
        while let Some(task) = self.rx.recv().await {
            task();
        }
    }
}

/// Creates a dispatcher and the queue a UI loop drains.
pub fn queue_dispatcher() -> (QueueDispatcher, UiQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (QueueDispatcher { tx }, UiQueue { rx })
}

/// How a browser is created and where its events go
#[derive(Clone)]
pub struct BrowserOptions {
    /// Parent window; `WindowHandle::NULL` for windowless rendering.
    pub parent_window: WindowHandle,
    pub dispatcher: Arc<dyn UiDispatcher>,
    pub handler: Option<Arc<dyn BrowserEventHandler>>,
    /// Request context preferences applied at creation.
    pub preferences: BTreeMap<String, Value>,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            parent_window: WindowHandle::NULL,
            dispatcher: Arc::new(InlineDispatcher),
            handler: None,
            preferences: BTreeMap::new(),
        }
    }
}

impl std::fmt::Debug for BrowserOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserOptions")
            .field("parent_window", &self.parent_window)
            .field("has_handler", &self.handler.is_some())
            .field("preferences", &self.preferences)
            .finish()
    }
}

impl BrowserOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parent_window(mut self, parent: WindowHandle) -> Self {
        self.parent_window = parent;
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn UiDispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn with_handler(mut self, handler: impl BrowserEventHandler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn with_preference(mut self, name: impl Into<String>, value: Value) -> Self {
        self.preferences.insert(name.into(), value);
        self
    }
}
