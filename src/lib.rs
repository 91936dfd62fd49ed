//! # KI-Browser Out-of-Process
//!
//! Hosts browsers in a separate process and talks to them over JSON-RPC.
//!
//! The host application keeps a lightweight proxy per browser; the browser
//! engine runs in the `ki-browser-host` process. Commands and notifications
//! travel as newline-delimited JSON-RPC 2.0 over the child's stdin/stdout,
//! rendered frames are exchanged through named shared memory.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ki_browser_oop::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let host = OutOfProcessHost::create(HostSettings::from_env()).await?;
//!
//!     let options = BrowserOptions::new().with_handler(|id: BrowserId, event: BrowserEvent| {
//!         println!("browser {}: {:?}", id, event);
//!     });
//!     let browser = host.create_browser("https://example.com", options)?;
//!     browser.send_mouse_click(MouseEvent::new(10, 10), MouseButton::Left, false, 1)?;
//!
//!     host.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`host`]: process supervision, browser registry, browser proxies, events
//! - [`remote`]: the browser-process side and its engine seam
//! - [`rpc`]: JSON-RPC channel and the wire method sets
//! - [`frame`]: shared-memory frame exchange and host render surfaces
//! - [`devtools`]: DevTools message relay
//! - [`input`]: mouse and keyboard event types
//! - [`config`]: host settings and browser-process arguments
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────── host process ────────────────┐      ┌──── ki-browser-host ────┐
//! │ RemoteBrowser ─┐                             │      │                         │
//! │ RemoteBrowser ─┼─ CommandSender ─ RpcChannel ─┼─────►│ RpcChannel              │
//! │ RemoteBrowser ─┘        ▲          (stdio)   │◄─────┼─ RemoteDispatch         │
//! │        ▲                │                    │      │        │                │
//! │   HostDispatch ─────────┘                    │      │  BrowserBackend         │
//! │        │                                     │      │        │                │
//! │   FrameReader ◄──────── shared memory ───────┼──────┼── FrameWriter           │
//! └──────────────────────────────────────────────┘      └─────────────────────────┘
//! ```
//!
//! ## Configuration
//!
//! Host configuration follows a precedence chain:
//! 1. Default values
//! 2. Configuration file (TOML/JSON)
//! 3. Environment variables (`KI_BROWSER_OOP_*`)
//!
//! See [`config::HostSettings`] for all available options.

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Full version string with name
pub const FULL_VERSION: &str = concat!(env!("CARGO_PKG_NAME"), " v", env!("CARGO_PKG_VERSION"));

// ============================================================================
// Module Exports
// ============================================================================

/// Host settings and browser-process command line.
pub mod config;

/// DevTools protocol relay per browser.
pub mod devtools;

/// Host error type.
pub mod error;

/// Shared-memory frames and render surfaces.
pub mod frame;

/// Out-of-process host, browser proxies and events.
pub mod host;

/// Mouse and keyboard input events.
pub mod input;

/// Browser-process side: command dispatch and engine backends.
pub mod remote;

/// JSON-RPC transport and wire methods.
pub mod rpc;

/// Ids and geometry.
pub mod types;

// ============================================================================
// Re-exports for Convenience
// ============================================================================

// Host types
pub use host::{
    BrowserEvent, BrowserEventHandler, BrowserOptions, BrowserState, BrowserStatus, OutOfProcessHost,
    RemoteBrowser, UiDispatcher,
};

// Error types
pub use error::{HostError, Result};

// Frame types
pub use frame::{FrameError, RenderSurface, SurfaceKind};

// DevTools types
pub use devtools::{DevToolsError, DevToolsTransport, MessageTransport, TransportEvent};

// Input types
pub use input::{InputEvent, KeyEvent, KeyEventType, MouseButton, MouseEvent};

// Remote types
pub use remote::{BrowserBackend, BrowserProcess, HeadlessBackend, RemoteNotifier};

// Wire types
pub use rpc::{ClientNotification, HostCommand, PreferenceResult, RpcError};

// Config types
pub use config::{ConfigError, HostSettings, ProcessArgs};

// Ids and geometry
pub use types::{BrowserId, Rect, WindowHandle};

// ============================================================================
// Prelude Module
// ============================================================================

/// Prelude module for convenient imports.
///
/// ```rust
/// use ki_browser_oop::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::HostSettings;
    pub use crate::devtools::MessageTransport;
    pub use crate::error::HostError;
    pub use crate::host::{BrowserEvent, BrowserOptions, OutOfProcessHost, RemoteBrowser};
    pub use crate::input::{InputEvent, KeyEvent, MouseButton, MouseEvent};
    pub use crate::types::{BrowserId, Rect, WindowHandle};
    pub use crate::{FULL_VERSION, NAME, VERSION};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_constants() {
        assert!(!VERSION.is_empty());
        assert!(!NAME.is_empty());
        assert!(FULL_VERSION.contains(VERSION));
        assert!(FULL_VERSION.contains(NAME));
    }

    #[test]
    fn test_prelude_imports() {
        use crate::prelude::*;
        let _ = BrowserId(1);
        let _ = HostSettings::default();
        let _ = VERSION;
    }
}
