//! DevTools protocol transport scoped to one browser.
//!
//! DevTools traffic is multiplexed over the single RPC connection:
//! outgoing messages become `SendDevToolsMessage` commands and incoming
//! `OnDevToolsMessage` notifications are surfaced as transport events.
//! Payloads are opaque strings and never parsed here.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::host::commands::CommandSender;
use crate::host::readiness::ReadyGate;
use crate::rpc::HostCommand;
use crate::types::BrowserId;

/// Something a DevTools client reads from its transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A protocol message from the browser
    Message(String),
    /// The DevTools agent detached (e.g. the page was closed)
    AgentDetached,
    /// The transport is gone for good
    Disconnected,
}

#[derive(Debug, thiserror::Error)]
pub enum DevToolsError {
    #[error("DevTools transport for browser {0} is disconnected")]
    Disconnected(BrowserId),
}

/// Message-oriented transport consumed by a DevTools protocol client.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Sends one protocol message.
    async fn send(&self, message: String) -> Result<(), DevToolsError>;

    /// Takes the event stream. Only the first call returns it.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>>;

    /// Stops delivering events to this client.
    fn stop_reading(&self);
}

/// [`MessageTransport`] for one remote browser
pub struct DevToolsTransport {
    browser_id: BrowserId,
    sender: CommandSender,
    ready: ReadyGate,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
    disconnected: AtomicBool,
}

impl DevToolsTransport {
    pub fn new(browser_id: BrowserId, sender: CommandSender) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            browser_id,
            sender,
            ready: ReadyGate::new(format!("devtools-{}", browser_id)),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            disconnected: AtomicBool::new(false),
        }
    }

    pub fn browser_id(&self) -> BrowserId {
        self.browser_id
    }

    /// True once `OnDevToolsReady` arrived.
    pub fn is_ready(&self) -> bool {
        self.ready.is_open()
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    /// Messages sent before readiness and not yet flushed.
    pub fn queued_messages(&self) -> usize {
        self.ready.pending_len()
    }

    /// Flushes queued messages and lets later ones through directly.
    pub fn mark_ready(&self) {
        debug!(browser = %self.browser_id, "DevTools ready");
        self.ready.open();
    }

    /// Surfaces a received message, in delivery order.
    pub fn deliver(&self, message: String) {
        if self.is_disconnected() {
            return;
        }
        let _ = self.events_tx.send(TransportEvent::Message(message));
    }

    pub fn agent_detached(&self) {
        if self.is_disconnected() {
            return;
        }
        let _ = self.events_tx.send(TransportEvent::AgentDetached);
    }

    /// Tears the transport down. Emits `Disconnected` exactly once.
    pub fn disconnect(&self) {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!(browser = %self.browser_id, "DevTools transport disconnected");
        self.ready.fail("disconnected");
        let _ = self.events_tx.send(TransportEvent::Disconnected);
    }
}

#[async_trait]
impl MessageTransport for DevToolsTransport {
    async fn send(&self, message: String) -> Result<(), DevToolsError> {
        if self.is_disconnected() {
            return Err(DevToolsError::Disconnected(self.browser_id));
        }

        let sender = self.sender.clone();
        let browser_id = self.browser_id;
        let accepted = self.ready.run_or_defer(move || {
            sender.send(HostCommand::SendDevToolsMessage { browser_id, message });
        });

        if accepted {
            Ok(())
        } else {
            Err(DevToolsError::Disconnected(self.browser_id))
        }
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events_rx.lock().take()
    }

    fn stop_reading(&self) {
        // The RPC connection is shared with other browsers and keeps reading.
        trace!(browser = %self.browser_id, "DevTools client stopped reading");
    }
}

impl std::fmt::Debug for DevToolsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevToolsTransport")
            .field("browser_id", &self.browser_id)
            .field("ready", &self.is_ready())
            .field("disconnected", &self.is_disconnected())
            .finish()
    }
}
