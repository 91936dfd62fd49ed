//! JSON-RPC 2.0 transport shared by the host and the browser process
//!
//! Messages are newline-delimited JSON objects over a duplex byte stream
//! (the child's stdin/stdout in production). Both peers can issue requests
//! and notifications; each side registers one [`RpcHandler`] whose closed
//! call enum determines the wire methods it accepts.

pub mod channel;
pub mod error;
pub mod message;
pub mod methods;

pub use channel::{RpcChannel, RpcHandler};
pub use error::RpcError;
pub use message::{ErrorObject, RequestId, WireCall};
pub use methods::{ClientNotification, HostCommand, PreferenceResult};
