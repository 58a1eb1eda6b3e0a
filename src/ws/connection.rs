#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt as _, StreamExt as _};
use secrecy::SecretString;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout, timeout_at};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use url::Url;

use super::close::{CloseSignal, Disposition, Termination};
use super::config::{BackoffPolicy, Config};
use super::dispatch::{DispatchStats, Inbound, MessageDispatcher};
use super::handshake;
use super::state::{ConnectionContext, ConnectionState, Status};
use super::traits::{Connector, Consumer};
use crate::Result;
use crate::auth::CredentialSource;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upper bound on the close handshake after an auth rejection.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Production [`Connector`] backed by `tokio-tungstenite`.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    type Sink = SplitSink<WsStream, Message>;
    type Stream = SplitStream<WsStream>;

    async fn open(&self, endpoint: &Url) -> Result<(Self::Sink, Self::Stream)> {
        let (ws_stream, _) = connect_async(endpoint.as_str()).await?;
        Ok(ws_stream.split())
    }
}

/// Manages the realtime connection lifecycle: handshake, reconnection and dispatch.
///
/// One manager owns at most one transport and one retry timer at a time. Both live inside a
/// single background task per connection epoch; that task is the only place transport
/// events are processed, so they are handled strictly in order.
///
/// The manager is meant to be owned by the view that needs the stream: call
/// [`connect`](Self::connect) on activation and let [`Drop`] (or
/// [`disconnect`](Self::disconnect)) release everything on teardown.
///
/// # Type Parameters
///
/// - `K`: Transport factory, [`TungsteniteConnector`] unless a test substitutes one
///
/// # Example
///
/// ```ignore
/// let mut manager = ConnectionManager::new(url, Config::default(), store, |payload: Value| {
///     render(payload);
/// });
/// manager.connect();
///
/// let mut status = manager.state_receiver();
/// while status.changed().await.is_ok() {
///     println!("{}", status.borrow().state);
/// }
/// ```
pub struct ConnectionManager<K: Connector = TungsteniteConnector> {
    endpoint: Url,
    config: Config,
    connector: Arc<K>,
    credentials: Box<dyn CredentialSource>,
    shared: Arc<Shared>,
    /// Connection task of the current epoch
    task: Option<JoinHandle<()>>,
}

impl ConnectionManager<TungsteniteConnector> {
    /// Create an idle manager. Nothing is opened until [`connect`](Self::connect).
    pub fn new<S, C>(endpoint: Url, config: Config, credentials: S, consumer: C) -> Self
    where
        S: CredentialSource,
        C: Consumer,
    {
        Self::with_connector(endpoint, config, credentials, consumer, TungsteniteConnector)
    }
}

impl<K: Connector> ConnectionManager<K> {
    pub fn with_connector<S, C>(
        endpoint: Url,
        config: Config,
        credentials: S,
        consumer: C,
        connector: K,
    ) -> Self
    where
        S: CredentialSource,
        C: Consumer,
    {
        let (status_tx, _) = watch::channel(Status::default());

        Self {
            endpoint,
            config,
            connector: Arc::new(connector),
            credentials: Box::new(credentials),
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    context: ConnectionContext::default(),
                    dispatcher: MessageDispatcher::new(consumer),
                }),
                status_tx,
            }),
            task: None,
        }
    }

    /// Start a connection epoch.
    ///
    /// Returns immediately; progress is reported through [`status`](Self::status) and
    /// [`state_receiver`](Self::state_receiver). This is a no-op while a connection is
    /// active (connecting, connected or waiting to retry) and when no credential is
    /// available. From `Error` or `Disconnected` it starts over with the attempt counter at
    /// zero.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(&mut self) {
        if self.shared.lock().context.state.is_active() {
            #[cfg(feature = "tracing")]
            tracing::debug!(endpoint = %self.endpoint, "Connection already active, ignoring connect");
            return;
        }

        let Some(token) = self.credentials.current() else {
            #[cfg(feature = "tracing")]
            tracing::debug!(endpoint = %self.endpoint, "No credential available, not connecting");
            return;
        };

        // Cancel before reassigning so at most one task is ever in flight.
        if let Some(task) = self.task.take() {
            task.abort();
        }

        let epoch = {
            let mut inner = self.shared.lock();
            let epoch = inner.context.begin();
            self.shared.publish(&inner.context);
            epoch
        };

        #[cfg(feature = "tracing")]
        tracing::info!(endpoint = %self.endpoint, epoch, "Opening realtime connection");

        let driver = Driver {
            epoch,
            endpoint: self.endpoint.clone(),
            config: self.config.clone(),
            token,
            connector: Arc::clone(&self.connector),
            shared: Arc::clone(&self.shared),
        };
        self.task = Some(tokio::spawn(driver.run()));
    }

    /// Close the connection and stop retrying.
    ///
    /// Once this returns the state is `Disconnected`, the pending retry (if any) is
    /// cancelled, the transport task is aborted, and neither a state change nor a consumer
    /// call will happen until the next [`connect`](Self::connect).
    pub fn disconnect(&mut self) {
        {
            let mut inner = self.shared.lock();
            inner.context.shut_down();
            self.shared.publish(&inner.context);
        }

        if let Some(task) = self.task.take() {
            task.abort();
            #[cfg(feature = "tracing")]
            tracing::info!(endpoint = %self.endpoint, "Realtime connection closed by owner");
        }
    }

    /// Get the current connection status.
    #[must_use]
    pub fn status(&self) -> Status {
        self.shared.lock().context.status()
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.lock().context.state
    }

    /// Subscribe to status changes.
    ///
    /// The receiver holds the latest status only; transitions that happen faster than it is
    /// polled are coalesced. Teardown always publishes `Disconnected` last.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<Status> {
        self.shared.status_tx.subscribe()
    }

    /// Counters of frames seen by the dispatcher over the manager's lifetime.
    #[must_use]
    pub fn dispatch_stats(&self) -> DispatchStats {
        self.shared.lock().dispatcher.stats()
    }

    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl<K: Connector> Drop for ConnectionManager<K> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// State shared between the manager handle and its connection task.
///
/// Every transition happens under `inner`'s lock after checking the caller's epoch, which
/// is what keeps a task that outlived `disconnect` from touching state or the consumer.
struct Shared {
    inner: Mutex<Inner>,
    status_tx: watch::Sender<Status>,
}

struct Inner {
    context: ConnectionContext,
    dispatcher: MessageDispatcher,
}

/// What the session loop should do after a frame.
enum Delivery {
    Forwarded,
    Dropped,
    Stop,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, context: &ConnectionContext) {
        let next = context.status();
        self.status_tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            #[cfg(feature = "tracing")]
            if current.state != next.state {
                tracing::debug!(from = %current.state, to = %next.state, attempt = next.attempt, "Connection state changed");
            }
            *current = next;
            true
        });
    }

    fn deliver(&self, epoch: u64, bytes: &[u8], policy: &BackoffPolicy) -> Delivery {
        let mut inner = self.lock();
        if !inner.context.is_current(epoch) {
            return Delivery::Stop;
        }

        match MessageDispatcher::parse(bytes) {
            Err(e) => {
                inner.dispatcher.discard(&e);
                Delivery::Dropped
            }
            Ok(Inbound::AuthRejected { reason }) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(reason = ?reason, "Server rejected realtime credential");
                let termination = Termination::AuthRejected { reason };
                inner.context.terminate(&termination, policy);
                self.publish(&inner.context);
                Delivery::Stop
            }
            Ok(Inbound::Payload(payload)) => {
                if inner.context.promote() {
                    #[cfg(feature = "tracing")]
                    tracing::info!("Realtime connection established");
                    self.publish(&inner.context);
                }
                inner.dispatcher.forward(payload);
                Delivery::Forwarded
            }
        }
    }

    /// Returns the delay before the next attempt, or `None` if the task must stop.
    fn terminate(&self, epoch: u64, signal: CloseSignal, policy: &BackoffPolicy) -> Option<Duration> {
        let mut inner = self.lock();
        if !inner.context.is_current(epoch) {
            return None;
        }

        #[cfg(feature = "tracing")]
        let (code, reason) = (signal.code, signal.reason.clone());
        let (disposition, delay) = inner.context.terminate(&Termination::Closed(signal), policy);
        self.publish(&inner.context);

        match disposition {
            Disposition::Terminal(failure) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(code, ?reason, cause = failure.label(), "Realtime connection stopped: {failure}");
                #[cfg(not(feature = "tracing"))]
                let _ = failure;
            }
            Disposition::Retryable(failure) => {
                #[cfg(feature = "tracing")]
                tracing::info!(
                    code,
                    ?reason,
                    cause = failure.label(),
                    attempt = inner.context.attempt,
                    delay_ms = delay.map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
                    "Realtime connection lost, scheduling retry"
                );
                #[cfg(not(feature = "tracing"))]
                let _ = failure;
            }
        }

        delay
    }

    /// The retry timer fired. Returns `false` if the epoch is gone.
    fn retry_due(&self, epoch: u64) -> bool {
        let mut inner = self.lock();
        if !inner.context.is_current(epoch) {
            return false;
        }
        inner.context.retry_started();
        self.publish(&inner.context);
        true
    }
}

/// Connection task for one epoch.
struct Driver<K: Connector> {
    epoch: u64,
    endpoint: Url,
    config: Config,
    token: SecretString,
    connector: Arc<K>,
    shared: Arc<Shared>,
}

impl<K: Connector> Driver<K> {
    /// Open, run, classify, back off, repeat.
    async fn run(self) {
        loop {
            let opened = timeout(
                self.config.handshake_timeout,
                self.connector.open(&self.endpoint),
            )
            .await;

            let signal = match opened {
                Ok(Ok((sink, stream))) => match self.session(sink, stream).await {
                    Some(signal) => signal,
                    None => return,
                },
                Ok(Err(e)) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(endpoint = %self.endpoint, error = %e, "Unable to connect");
                    CloseSignal::from_connect_error(&e)
                }
                Err(_) => CloseSignal::abnormal("timed out opening transport"),
            };

            let Some(delay) = self.shared.terminate(self.epoch, signal, &self.config.reconnect)
            else {
                return;
            };

            sleep(delay).await;

            if !self.shared.retry_due(self.epoch) {
                return;
            }
        }
    }

    /// Drive one open transport until it ends.
    ///
    /// Returns the close signal for a retryable-or-not closure, or `None` when the epoch has
    /// already been settled (auth rejection, disconnect).
    async fn session(&self, mut sink: K::Sink, mut stream: K::Stream) -> Option<CloseSignal> {
        if let Err(e) = handshake::send(&mut sink, &self.token).await {
            return Some(CloseSignal::abnormal(e.to_string()));
        }

        let mut deadline = self
            .config
            .first_payload_timeout
            .map(|window| Instant::now() + window);

        loop {
            let frame = match deadline {
                None => stream.next().await,
                Some(deadline) => {
                    let Ok(frame) = timeout_at(deadline, stream.next()).await else {
                        return Some(CloseSignal::abnormal("no payload received after handshake"));
                    };
                    frame
                }
            };

            let delivery = match frame {
                Some(Ok(Message::Text(text))) => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(%text, "Received WebSocket text message");
                    self.shared
                        .deliver(self.epoch, text.as_bytes(), &self.config.reconnect)
                }
                Some(Ok(Message::Binary(data))) => {
                    self.shared.deliver(self.epoch, &data, &self.config.reconnect)
                }
                Some(Ok(Message::Close(frame))) => {
                    return Some(CloseSignal::from_frame(frame.as_ref()));
                }
                Some(Ok(_)) => {
                    // Ping/pong are answered by tungstenite.
                    continue;
                }
                Some(Err(e)) => return Some(CloseSignal::from_transport_error(&e)),
                None => return Some(CloseSignal::abnormal("stream ended without close frame")),
            };

            match delivery {
                Delivery::Forwarded => deadline = None,
                Delivery::Dropped => {}
                Delivery::Stop => {
                    _ = timeout(CLOSE_TIMEOUT, sink.close()).await;
                    return None;
                }
            }
        }
    }
}
