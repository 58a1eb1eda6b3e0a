//! Seams between the connection state machine and the outside world.

use async_trait::async_trait;
use futures::{Sink, Stream};
use serde_json::Value;
use tokio_tungstenite::tungstenite::{Error as TungsteniteError, Message};
use url::Url;

/// Opens a full-duplex transport to the realtime endpoint.
///
/// The returned halves are owned by the connection task for the lifetime of one attempt and
/// dropped when it ends, which closes the underlying socket.
///
/// # Example
///
/// ```ignore
/// struct Loopback;
///
/// #[async_trait]
/// impl Connector for Loopback {
///     type Sink = SinkHalf;
///     type Stream = StreamHalf;
///
///     async fn open(&self, endpoint: &Url) -> crate::Result<(SinkHalf, StreamHalf)> {
///         /* ... */
///     }
/// }
/// ```
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Outgoing half
    type Sink: Sink<Message, Error = TungsteniteError> + Send + Unpin + 'static;
    /// Incoming half
    type Stream: Stream<Item = Result<Message, TungsteniteError>> + Send + Unpin + 'static;

    async fn open(&self, endpoint: &Url) -> crate::Result<(Self::Sink, Self::Stream)>;
}

/// Receiver of validated inbound payloads.
///
/// Called synchronously, in arrival order, from the connection task. Implementations should
/// return quickly and must not call back into the owning
/// [`ConnectionManager`](super::ConnectionManager).
pub trait Consumer: Send + 'static {
    fn on_message(&mut self, payload: Value);
}

impl<F> Consumer for F
where
    F: FnMut(Value) + Send + 'static,
{
    fn on_message(&mut self, payload: Value) {
        self(payload);
    }
}
