#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]
#![allow(
    unused,
    reason = "Not every test binary uses every helper"
)]

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fleetview_realtime::auth::CredentialStore;
use fleetview_realtime::ws::config::Config;
use fleetview_realtime::ws::{ConnectionManager, Connector, Status};
use futures::channel::mpsc as channel;
use futures::sink::SinkMapErr;
use futures::{SinkExt as _, StreamExt as _};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::http::Response;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use url::Url;

pub const TOKEN: &str = "eyJhbGciOiJIUzI1NiJ9.test.signature";

/// Generous upper bound for anything a test waits on. Time is paused in these tests, so this
/// only matters when something is genuinely stuck.
const WAIT: Duration = Duration::from_secs(600);

pub type ClientSink =
    SinkMapErr<channel::UnboundedSender<Message>, fn(channel::SendError) -> tungstenite::Error>;
pub type ClientStream = channel::UnboundedReceiver<Result<Message, tungstenite::Error>>;

fn closed(_: channel::SendError) -> tungstenite::Error {
    tungstenite::Error::ConnectionClosed
}

/// What the next `open` call does.
#[derive(Debug, Clone, Copy)]
pub enum Plan {
    Accept,
    /// Reject the upgrade with this HTTP status
    Refuse(u16),
    /// TCP-level failure
    Unreachable,
}

/// In-memory transport factory. Each accepted `open` hands a [`Peer`] to the [`Server`].
#[derive(Clone)]
pub struct ScriptedConnector {
    plans: Arc<Mutex<VecDeque<Plan>>>,
    opens: Arc<AtomicUsize>,
    accepted: mpsc::UnboundedSender<Peer>,
}

#[async_trait]
impl Connector for ScriptedConnector {
    type Sink = ClientSink;
    type Stream = ClientStream;

    async fn open(&self, _endpoint: &Url) -> fleetview_realtime::Result<(ClientSink, ClientStream)> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let plan = self
            .plans
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Plan::Accept);

        match plan {
            Plan::Accept => {
                let (client_tx, server_rx) = channel::unbounded();
                let (server_tx, client_rx) = channel::unbounded();
                drop(self.accepted.send(Peer {
                    from_client: server_rx,
                    to_client: server_tx,
                }));
                let sink: ClientSink = client_tx.sink_map_err(closed as fn(_) -> _);
                Ok((sink, client_rx))
            }
            Plan::Refuse(status) => {
                let response: Response<Option<Vec<u8>>> =
                    Response::builder().status(status).body(None).unwrap();
                Err(tungstenite::Error::Http(response.into()).into())
            }
            Plan::Unreachable => Err(tungstenite::Error::Io(io::Error::from(
                io::ErrorKind::ConnectionRefused,
            ))
            .into()),
        }
    }
}

/// Test-side view of the connector.
pub struct Server {
    plans: Arc<Mutex<VecDeque<Plan>>>,
    opens: Arc<AtomicUsize>,
    accepted: mpsc::UnboundedReceiver<Peer>,
}

impl Server {
    /// Queue the outcome of a future `open` call.
    pub fn plan(&self, plan: Plan) {
        self.plans.lock().unwrap().push_back(plan);
    }

    /// Number of `open` calls so far.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Wait for the client to open the next transport.
    pub async fn accept(&mut self) -> Peer {
        timeout(WAIT, self.accepted.recv())
            .await
            .expect("client never opened a transport")
            .expect("connector dropped")
    }

    /// Returns a pending peer without waiting.
    pub fn try_accept(&mut self) -> Option<Peer> {
        self.accepted.try_recv().ok()
    }
}

#[must_use]
pub fn scripted() -> (ScriptedConnector, Server) {
    let plans = Arc::new(Mutex::new(VecDeque::new()));
    let opens = Arc::new(AtomicUsize::new(0));
    let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();

    (
        ScriptedConnector {
            plans: Arc::clone(&plans),
            opens: Arc::clone(&opens),
            accepted: accepted_tx,
        },
        Server {
            plans,
            opens,
            accepted: accepted_rx,
        },
    )
}

/// Server end of one transport.
pub struct Peer {
    from_client: channel::UnboundedReceiver<Message>,
    to_client: channel::UnboundedSender<Result<Message, tungstenite::Error>>,
}

impl Peer {
    /// Read the handshake frame the client sends after open.
    pub async fn handshake(&mut self) -> Value {
        match timeout(WAIT, self.from_client.next()).await.unwrap() {
            Some(Message::Text(text)) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("expected handshake text frame, got {other:?}"),
        }
    }

    pub fn send(&self, payload: &Value) {
        self.send_raw(&payload.to_string());
    }

    pub fn send_raw(&self, text: &str) {
        drop(
            self.to_client
                .unbounded_send(Ok(Message::Text(text.to_owned().into()))),
        );
    }

    pub fn send_binary(&self, bytes: &[u8]) {
        drop(
            self.to_client
                .unbounded_send(Ok(Message::Binary(bytes.to_vec().into()))),
        );
    }

    /// Send a close frame with `code`.
    pub fn close(&self, code: u16) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: "".into(),
        };
        drop(self.to_client.unbounded_send(Ok(Message::Close(Some(frame)))));
    }

    /// Vanish without a close frame.
    pub fn drop_connection(self) {
        drop(self);
    }

    /// Resolves once the client has closed or dropped its end.
    pub async fn client_closed(&mut self) -> bool {
        loop {
            match timeout(WAIT, self.from_client.next()).await {
                Ok(None | Some(Message::Close(_))) => return true,
                Ok(Some(_)) => {}
                Err(_) => return false,
            }
        }
    }
}

pub type Payloads = mpsc::UnboundedReceiver<Value>;

#[must_use]
pub fn endpoint() -> Url {
    Url::parse("ws://fleet.test/ws/dashboard").unwrap()
}

#[must_use]
pub fn signed_in() -> CredentialStore {
    let store = CredentialStore::new();
    store.set(TOKEN);
    store
}

/// Manager wired to a scripted connector, with payloads forwarded to a channel.
#[must_use]
pub fn manager(
    connector: ScriptedConnector,
    credentials: CredentialStore,
) -> (ConnectionManager<ScriptedConnector>, Payloads) {
    manager_with_config(connector, credentials, Config::default())
}

#[must_use]
pub fn manager_with_config(
    connector: ScriptedConnector,
    credentials: CredentialStore,
    config: Config,
) -> (ConnectionManager<ScriptedConnector>, Payloads) {
    let (payload_tx, payload_rx) = mpsc::unbounded_channel();
    let manager = ConnectionManager::with_connector(
        endpoint(),
        config,
        credentials,
        move |payload: Value| drop(payload_tx.send(payload)),
        connector,
    );
    (manager, payload_rx)
}

pub async fn next_payload(payloads: &mut Payloads) -> Value {
    timeout(WAIT, payloads.recv())
        .await
        .expect("no payload delivered")
        .expect("consumer dropped")
}

pub async fn wait_for_status<F>(status: &mut watch::Receiver<Status>, predicate: F) -> Status
where
    F: FnMut(&Status) -> bool,
{
    timeout(WAIT, status.wait_for(predicate))
        .await
        .expect("status never matched")
        .expect("manager dropped")
        .clone()
}
