//! Gated sending of host commands.

use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::time::Instant;
use tracing::debug;

use super::readiness::ReadyGate;
use crate::error::HostError;
use crate::rpc::{HostCommand, RpcChannel, RpcError, WireCall};

/// Sends [`HostCommand`]s once the browser process reported readiness.
///
/// Commands issued earlier are queued and flushed in FIFO order when
/// `OnContextInitialized` arrives. After the connection is lost
/// fire-and-forget commands are dropped with a debug log.
#[derive(Clone)]
pub struct CommandSender {
    channel: RpcChannel,
    gate: ReadyGate,
    request_timeout: Duration,
}

impl CommandSender {
    pub fn new(channel: RpcChannel, gate: ReadyGate, request_timeout: Duration) -> Self {
        Self {
            channel,
            gate,
            request_timeout,
        }
    }

    /// Sends a notification-style command.
    pub fn send(&self, command: HostCommand) {
        let channel = self.channel.clone();
        let method = command.method();

        let accepted = self.gate.run_or_defer(move || {
            if let Err(e) = channel.notify(&command) {
                debug!("Dropping {} command: {}", command.method(), e);
            }
        });

        if !accepted {
            debug!("Dropping {} command, browser process unavailable", method);
        }
    }

    /// Sends a request with the default timeout.
    pub async fn request<R: DeserializeOwned>(&self, command: HostCommand) -> Result<R, HostError> {
        self.request_with_timeout(command, self.request_timeout).await
    }

    /// Sends a request; the timeout covers waiting for readiness too.
    pub async fn request_with_timeout<R: DeserializeOwned>(
        &self,
        command: HostCommand,
        timeout: Duration,
    ) -> Result<R, HostError> {
        let deadline = Instant::now() + timeout;

        match tokio::time::timeout_at(deadline, self.gate.wait()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return Err(HostError::ConnectionLost),
            Err(_) => return Err(HostError::Rpc(RpcError::Timeout(timeout))),
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        self.channel
            .request_with_timeout(&command, remaining)
            .await
            .map_err(|e| match e {
                RpcError::ConnectionClosed => HostError::ConnectionLost,
                RpcError::Timeout(_) => HostError::Rpc(RpcError::Timeout(timeout)),
                other => HostError::Rpc(other),
            })
    }

    pub fn is_connected(&self) -> bool {
        !self.channel.is_closed()
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{ClientNotification, ErrorObject, RpcHandler};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct Ignore;

    #[async_trait]
    impl RpcHandler for Ignore {
        type Call = ClientNotification;

        async fn handle(&self, _call: ClientNotification, _peer: &RpcChannel) -> Result<Value, ErrorObject> {
            Ok(Value::Null)
        }
    }

    /// Sender whose peer never answers; the peer stream is returned to keep it open.
    fn silent_sender(timeout: Duration) -> (CommandSender, RpcChannel, tokio::io::DuplexStream) {
        let (local, peer) = tokio::io::duplex(1 << 20);
        let (reader, writer) = tokio::io::split(local);
        let channel = RpcChannel::attach("silent", reader, writer, Ignore);
        let gate = ReadyGate::new("test");
        gate.open();
        (CommandSender::new(channel.clone(), gate, timeout), channel, peer)
    }

    fn preference() -> HostCommand {
        HostCommand::SetRequestContextPreference {
            browser_id: None,
            name: "intl.accept_languages".to_string(),
            value: json!("en-US"),
        }
    }

    #[tokio::test]
    async fn test_timed_out_requests_leave_nothing_pending() {
        let (sender, channel, _peer) = silent_sender(Duration::from_millis(20));

        for _ in 0..50 {
            let result = sender.request::<Value>(preference()).await;
            assert!(matches!(result, Err(HostError::Rpc(RpcError::Timeout(_)))));
        }

        assert_eq!(channel.pending_requests(), 0);
        assert!(sender.is_connected());
    }

    #[tokio::test]
    async fn test_timeout_covers_readiness_wait() {
        let (local, _peer) = tokio::io::duplex(1024);
        let (reader, writer) = tokio::io::split(local);
        let channel = RpcChannel::attach("not-ready", reader, writer, Ignore);
        let sender = CommandSender::new(channel.clone(), ReadyGate::new("never"), Duration::from_millis(20));

        let result = sender.request::<Value>(preference()).await;
        assert!(matches!(result, Err(HostError::Rpc(RpcError::Timeout(_)))));
        assert_eq!(channel.pending_requests(), 0);
    }
}
