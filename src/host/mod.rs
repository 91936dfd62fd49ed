//! Host side of the bridge.
//!
//! [`OutOfProcessHost`] owns one browser process and one RPC connection to
//! it. Browsers created through the host are tracked in a registry by id and
//! multiplexed over that connection.
//!
//! # Example
//!
//! ```rust,no_run
//! use ki_browser_oop::config::HostSettings;
//! use ki_browser_oop::host::{BrowserOptions, OutOfProcessHost};
//!
//! # async fn run() -> Result<(), ki_browser_oop::HostError> {
//! let host = OutOfProcessHost::create(HostSettings::from_env()).await?;
//! let browser = host.create_browser("https://example.com", BrowserOptions::default())?;
//! browser.load_url("https://example.org")?;
//! host.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod browser;
pub mod commands;
mod dispatch;
pub mod events;
pub mod readiness;
pub mod registry;
pub mod supervisor;

pub use browser::{BrowserState, BrowserStatus, RemoteBrowser};
pub use commands::CommandSender;
pub use events::{
    queue_dispatcher, BrowserEvent, BrowserEventHandler, BrowserOptions, InlineDispatcher, QueueDispatcher,
    UiDispatcher, UiQueue, UiTask,
};
pub use readiness::ReadyGate;
pub use registry::BrowserRegistry;
pub use supervisor::{ChildPipes, LaunchOptions, ProcessSupervisor};

use std::collections::BTreeMap;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use crate::config::HostSettings;
use crate::error::HostError;
use crate::rpc::{HostCommand, PreferenceResult, RpcChannel};
use crate::types::BrowserId;
use dispatch::{HostDispatch, NO_THREAD_ID};

struct HostInner {
    settings: HostSettings,
    channel: RpcChannel,
    supervisor: Option<Arc<ProcessSupervisor>>,
    registry: Arc<BrowserRegistry<RemoteBrowser>>,
    gate: ReadyGate,
    sender: CommandSender,
    remote_ui_thread_id: Arc<AtomicI32>,
    disposed: AtomicBool,
}

impl HostInner {
    /// Closes every browser, says goodbye and closes the connection.
    fn teardown(&self, reason: &str) {
        for browser in self.registry.drain() {
            browser.close();
        }

        if self.gate.is_open() {
            if let Err(e) = self.channel.notify(&HostCommand::CloseHost) {
                debug!("CloseHost not sent: {}", e);
            }
        }

        self.channel.close();
        self.gate.fail(reason);
    }
}

impl Drop for HostInner {
    fn drop(&mut self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!("Host dropped without shutdown");
        self.teardown("host dropped");

        if let Some(supervisor) = self.supervisor.take() {
            let grace = self.settings.shutdown_timeout();
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        supervisor.shutdown(grace).await;
                    });
                }
                Err(_) => supervisor.kill(),
            }
        }
    }
}

/// Handle to a browser process and the browsers it hosts.
///
/// Cheap to clone; all clones share the process. There is no process-wide
/// default host, pass the handle to whoever needs it.
#[derive(Clone)]
pub struct OutOfProcessHost {
    inner: Arc<HostInner>,
}

impl std::fmt::Debug for OutOfProcessHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutOfProcessHost")
            .field("process_id", &self.process_id())
            .field("initialized", &self.is_initialized())
            .field("connected", &self.is_connected())
            .field("browsers", &self.browser_count())
            .finish()
    }
}

impl OutOfProcessHost {
    /// Launches the browser process and waits until it reports readiness.
    ///
    /// Fails with [`HostError::StartupTimeout`] if `OnContextInitialized`
    /// does not arrive within the configured startup timeout; the process
    /// is shut down in that case.
    pub async fn create(settings: HostSettings) -> Result<Self, HostError> {
        let timeout = settings.startup_timeout();
        let host = Self::start(settings)?;

        match tokio::time::timeout(timeout, host.initialized()).await {
            Ok(Ok(())) => Ok(host),
            Ok(Err(e)) => {
                let exit = host.exit_status();
                host.shutdown().await;
                match exit.or_else(|| host.exit_status()) {
                    Some(status) => Err(HostError::ProcessExited(status.to_string())),
                    None => Err(e),
                }
            }
            Err(_) => {
                warn!("Browser process did not initialize within {:?}", timeout);
                host.shutdown().await;
                Err(HostError::StartupTimeout(timeout))
            }
        }
    }

    /// Launches the browser process without waiting for readiness.
    ///
    /// Commands issued before readiness are queued.
    pub fn start(settings: HostSettings) -> Result<Self, HostError> {
        settings.validate()?;
        let launch = settings.launch_options()?;
        let (supervisor, pipes) = ProcessSupervisor::start(&launch)?;
        Ok(Self::assemble(settings, pipes.stdout, pipes.stdin, Some(supervisor)))
    }

    /// Runs the host over an existing transport instead of a child process.
    pub fn with_transport<R, W>(reader: R, writer: W, settings: HostSettings) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::assemble(settings, reader, writer, None)
    }

    fn assemble<R, W>(settings: HostSettings, reader: R, writer: W, supervisor: Option<ProcessSupervisor>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let registry = Arc::new(BrowserRegistry::new());
        let gate = ReadyGate::new("context-initialized");
        let remote_ui_thread_id = Arc::new(AtomicI32::new(NO_THREAD_ID));

        let channel = RpcChannel::attach(
            "host",
            reader,
            writer,
            HostDispatch {
                registry: registry.clone(),
                gate: gate.clone(),
                remote_ui_thread_id: remote_ui_thread_id.clone(),
            },
        );
        let sender = CommandSender::new(channel.clone(), gate.clone(), settings.request_timeout());
        let supervisor = supervisor.map(Arc::new);

        tokio::spawn(watch_connection(
            channel.clone(),
            gate.clone(),
            registry.clone(),
            supervisor.clone(),
        ));

        Self {
            inner: Arc::new(HostInner {
                settings,
                channel,
                supervisor,
                registry,
                gate,
                sender,
                remote_ui_thread_id,
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Waits until the browser process reports `OnContextInitialized`.
    pub async fn initialized(&self) -> Result<(), HostError> {
        self.inner.gate.wait().await.map_err(HostError::InitializationFailed)
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.gate.is_open()
    }

    /// Thread id reported by the browser process, once initialized.
    pub fn remote_ui_thread_id(&self) -> Option<i32> {
        match self.inner.remote_ui_thread_id.load(Ordering::SeqCst) {
            NO_THREAD_ID => None,
            id => Some(id),
        }
    }

    pub fn is_connected(&self) -> bool {
        !self.inner.channel.is_closed()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// OS process id of the browser process.
    pub fn process_id(&self) -> Option<u32> {
        self.inner.supervisor.as_ref().and_then(|s| s.id())
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.inner.supervisor.as_ref().and_then(|s| s.exit_status())
    }

    pub fn settings(&self) -> &HostSettings {
        &self.inner.settings
    }

    /// Creates a browser and returns its proxy.
    ///
    /// The proxy is registered immediately; the native browser is created
    /// asynchronously and reported through [`BrowserEvent::Created`].
    pub fn create_browser(
        &self,
        url: impl Into<String>,
        options: BrowserOptions,
    ) -> Result<Arc<RemoteBrowser>, HostError> {
        if self.is_shut_down() {
            return Err(HostError::HostDisposed);
        }
        if !self.is_connected() {
            return Err(HostError::ConnectionLost);
        }

        let url = url.into();
        let registry = Arc::downgrade(&self.inner.registry);
        let browser = self.inner.registry.create(|id| {
            Arc::new(RemoteBrowser::new(
                id,
                url.clone(),
                self.inner.sender.clone(),
                &options,
                registry,
            ))
        });

        let request_context_preferences = if options.preferences.is_empty() {
            None
        } else {
            Some(options.preferences.clone())
        };

        info!("Creating browser {} for {}", browser.id(), url);
        self.inner.sender.send(HostCommand::CreateBrowser {
            parent_hwnd: options.parent_window,
            url,
            browser_id: browser.id(),
            request_context_preferences,
        });

        Ok(browser)
    }

    /// Proxy for `id`, if it is still open.
    pub fn browser(&self, id: BrowserId) -> Option<Arc<RemoteBrowser>> {
        self.inner.registry.lookup(id)
    }

    pub fn browser_count(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn browser_ids(&self) -> Vec<BrowserId> {
        self.inner.registry.ids()
    }

    /// Closes a browser by id. Unknown ids still get a `CloseBrowser`.
    pub fn close_browser(&self, id: BrowserId) {
        match self.inner.registry.lookup(id) {
            Some(browser) => browser.close(),
            None if !self.is_shut_down() => {
                debug!("Closing unknown browser {}", id);
                self.inner.sender.send(HostCommand::CloseBrowser { browser_id: id });
            }
            None => {}
        }
    }

    /// Sets a preference on the global request context.
    pub async fn set_request_context_preference(
        &self,
        name: impl Into<String>,
        value: Value,
    ) -> Result<PreferenceResult, HostError> {
        if self.is_shut_down() {
            return Err(HostError::HostDisposed);
        }
        self.inner
            .sender
            .request(HostCommand::SetRequestContextPreference {
                browser_id: None,
                name: name.into(),
                value,
            })
            .await
    }

    /// Sets several global preferences; the result is keyed by preference name.
    pub async fn set_request_context_preferences(
        &self,
        preferences: BTreeMap<String, Value>,
    ) -> Result<BTreeMap<String, PreferenceResult>, HostError> {
        if self.is_shut_down() {
            return Err(HostError::HostDisposed);
        }
        self.inner
            .sender
            .request(HostCommand::SetRequestContextPreferences {
                browser_id: None,
                preferences,
            })
            .await
    }

    /// Closes all browsers, asks the browser process to exit and waits for
    /// it, force-killing it after the shutdown grace period.
    ///
    /// Only the first call does anything.
    pub async fn shutdown(&self) {
        if self
            .inner
            .disposed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        info!("Shutting down browser host ({} browsers)", self.browser_count());
        self.inner.teardown("host shut down");

        if let Some(ref supervisor) = self.inner.supervisor {
            let status = supervisor.shutdown(self.inner.settings.shutdown_timeout()).await;
            debug!("Browser process finished with {:?}", status);
        }
    }
}

/// Closes the connection when the process exits and reports the loss to
/// every browser once the connection is gone.
async fn watch_connection(
    channel: RpcChannel,
    gate: ReadyGate,
    registry: Arc<BrowserRegistry<RemoteBrowser>>,
    supervisor: Option<Arc<ProcessSupervisor>>,
) {
    match supervisor {
        Some(supervisor) => {
            tokio::select! {
                _ = channel.closed() => {}
                status = supervisor.wait_for_exit() => {
                    warn!("Browser process exited ({:?}), closing connection", status);
                    channel.close();
                }
            }
        }
        None => channel.closed().await,
    }

    gate.fail("connection lost");
    for browser in registry.snapshot() {
        browser.on_connection_lost();
    }
}
