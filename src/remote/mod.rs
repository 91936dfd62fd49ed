//! The browser-process side of the bridge.
//!
//! [`BrowserProcess`] serves host commands over a byte stream (normally the
//! process's stdin/stdout) and forwards them to a [`BrowserBackend`].

pub mod backend;
pub mod dispatch;
pub mod headless;

pub use backend::{BrowserBackend, CreateBrowserRequest, RemoteNotifier};
pub use dispatch::RemoteDispatch;
pub use headless::HeadlessBackend;

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::info;

use crate::rpc::{ClientNotification, RpcChannel, RpcError};

/// Runs a backend for one host connection.
pub struct BrowserProcess<B> {
    backend: Arc<B>,
}

impl<B: BrowserBackend> BrowserProcess<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Serves until the host sends `CloseHost` or the stream ends.
    ///
    /// `OnContextInitialized` is the first message sent; the host queues its
    /// commands until it arrives.
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> Result<(), RpcError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let channel = RpcChannel::attach(
            "browser-process",
            reader,
            writer,
            RemoteDispatch::new(Arc::clone(&self.backend)),
        );
        let notifier = RemoteNotifier::new(channel.clone());

        let thread_id = self.backend.ui_thread_id();
        notifier.try_notify(&ClientNotification::OnContextInitialized {
            remote_ui_thread_id: thread_id,
        })?;
        info!("Browser process ready (UI thread {})", thread_id);

        channel.closed().await;
        info!("Host connection closed, shutting down");
        self.backend.shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{HostCommand, RpcHandler};
    use crate::types::{BrowserId, Rect, WindowHandle};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<ClientNotification>>,
    }

    #[async_trait]
    impl RpcHandler for Arc<Recorder> {
        type Call = ClientNotification;

        async fn handle(&self, call: ClientNotification, _peer: &RpcChannel) -> Result<Value, crate::rpc::ErrorObject> {
            self.seen.lock().push(call);
            Ok(Value::Null)
        }
    }

    async fn wait_for(recorder: &Recorder, pred: impl Fn(&[ClientNotification]) -> bool) {
        for _ in 0..200 {
            if pred(&recorder.seen.lock()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out; saw {:?}", recorder.seen.lock());
    }

    #[tokio::test]
    async fn test_serve_headless() {
        let (host_io, process_io) = tokio::io::duplex(1 << 16);
        let (process_read, process_write) = tokio::io::split(process_io);
        let (host_read, host_write) = tokio::io::split(host_io);

        let process = BrowserProcess::new(HeadlessBackend::new(7).with_viewport(16, 8));
        let backend = Arc::clone(process.backend());
        let served = tokio::spawn(async move { process.serve(process_read, process_write).await });

        let recorder = Arc::new(Recorder::default());
        let host = RpcChannel::attach("test-host", host_read, host_write, Arc::clone(&recorder));

        wait_for(&recorder, |seen| {
            seen.first() == Some(&ClientNotification::OnContextInitialized { remote_ui_thread_id: 7 })
        })
        .await;

        host.notify(&HostCommand::CreateBrowser {
            parent_hwnd: WindowHandle::NULL,
            url: "https://example.com/".to_string(),
            browser_id: BrowserId(1),
            request_context_preferences: None,
        })
        .unwrap();

        wait_for(&recorder, |seen| {
            seen.iter()
                .any(|n| matches!(n, ClientNotification::NotifyPaint { width: 16, height: 8, .. }))
        })
        .await;

        {
            let seen = recorder.seen.lock();
            let methods: Vec<&str> = seen.iter().map(|n| crate::rpc::WireCall::method(n)).collect();
            assert_eq!(
                methods,
                vec![
                    "OnContextInitialized",
                    "OnAfterBrowserCreated",
                    "OnDevToolsReady",
                    "NotifyLoadingStateChange",
                    "NotifyAddressChanged",
                    "NotifyTitleChanged",
                    "NotifyLoadingStateChange",
                    "NotifyPaint",
                ]
            );
            assert!(seen.contains(&ClientNotification::OnAfterBrowserCreated {
                browser_id: BrowserId(1),
                window_handle: WindowHandle(0x10000),
            }));
        }

        let result: Value = host
            .request(&HostCommand::SetRequestContextPreference {
                browser_id: None,
                name: "intl.accept_languages".to_string(),
                value: json!("en-US"),
            })
            .await
            .unwrap();
        assert_eq!(result, json!({"success": true}));
        assert_eq!(backend.global_preference("intl.accept_languages"), Some(json!("en-US")));

        host.notify(&HostCommand::CloseHost).unwrap();
        tokio::time::timeout(Duration::from_secs(5), served)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(backend.browser_count(), 0);
    }

    #[tokio::test]
    async fn test_oversized_resize_is_ignored() {
        let (host_io, process_io) = tokio::io::duplex(1 << 16);
        let (process_read, process_write) = tokio::io::split(process_io);
        let (host_read, host_write) = tokio::io::split(host_io);

        let process = BrowserProcess::new(HeadlessBackend::new(1).with_viewport(16, 8));
        let backend = Arc::clone(process.backend());
        let served = tokio::spawn(async move { process.serve(process_read, process_write).await });

        let recorder = Arc::new(Recorder::default());
        let host = RpcChannel::attach("test-host", host_read, host_write, Arc::clone(&recorder));

        host.notify(&HostCommand::CreateBrowser {
            parent_hwnd: WindowHandle::NULL,
            url: "about:blank".to_string(),
            browser_id: BrowserId(1),
            request_context_preferences: None,
        })
        .unwrap();
        wait_for(&recorder, |seen| {
            seen.iter()
                .any(|n| matches!(n, ClientNotification::NotifyPaint { width: 16, height: 8, .. }))
        })
        .await;

        for rect in [Rect::new(0, 0, 100_000, 100_000), Rect::new(0, 0, 32, 16)] {
            host.notify(&HostCommand::NotifyMoveOrResizeStarted {
                browser_id: BrowserId(1),
                rect,
            })
            .unwrap();
        }
        wait_for(&recorder, |seen| {
            seen.iter()
                .any(|n| matches!(n, ClientNotification::NotifyPaint { width: 32, height: 16, .. }))
        })
        .await;

        assert_eq!(backend.browser_size(BrowserId(1)), Some((32, 16)));
        assert!(!recorder
            .seen
            .lock()
            .iter()
            .any(|n| matches!(n, ClientNotification::NotifyPaint { width: 100_000, .. })));
        assert!(!served.is_finished());

        host.notify(&HostCommand::CloseHost).unwrap();
        tokio::time::timeout(Duration::from_secs(5), served)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_viewport_is_bounded() {
        let backend = HeadlessBackend::new(1).with_viewport(0, 100_000);
        assert_eq!(backend.viewport(), (1, headless::MAX_VIEW_DIMENSION));
    }
}
