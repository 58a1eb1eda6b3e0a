//! Follow the realtime dashboard stream of a running fleet server.
//!
//! Reads the server origin and a bearer token from the environment, connects to the stream
//! mounted at the path given as the first argument, and logs every payload and connection
//! state change for one minute.
//!
//! ```sh
//! FLEETVIEW_URL=https://fleet.example.com FLEETVIEW_TOKEN=... \
//!     RUST_LOG=info,fleetview_realtime=debug cargo run --example dashboard_stream /ws/dashboard
//! ```

use std::env;
use std::time::Duration;

use anyhow::Context as _;
use fleetview_realtime::auth::CredentialStore;
use fleetview_realtime::ws::config::Config;
use fleetview_realtime::ws::{ConnectionManager, ConnectionState, endpoint};
use serde_json::Value;
use tokio::time::sleep;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

const RUN_FOR: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let origin = env::var("FLEETVIEW_URL").unwrap_or_else(|_| "http://localhost:8080".to_owned());
    let origin = Url::parse(&origin).context("FLEETVIEW_URL is not a valid URL")?;

    let store = CredentialStore::new();
    store.set(env::var("FLEETVIEW_TOKEN").unwrap_or_default());
    if !store.is_authenticated() {
        warn!("FLEETVIEW_TOKEN is not set; the manager will refuse to connect");
    }

    let path = env::args()
        .nth(1)
        .context("usage: dashboard_stream <stream-path>")?;
    let url = endpoint::resolve(&origin, &path)?;

    let mut manager = ConnectionManager::new(url, Config::default(), store, |payload: Value| {
        let kind = payload
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("untyped");
        info!(kind, bytes = payload.to_string().len(), "payload");
    });
    let mut status = manager.state_receiver();
    manager.connect();

    let deadline = sleep(RUN_FOR);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            () = &mut deadline => break,
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                info!(
                    state = %current.state,
                    attempt = current.attempt,
                    next_retry = ?current.next_retry,
                    error = ?current.error_message(),
                    "status"
                );
                if current.state == ConnectionState::Error {
                    break;
                }
            }
        }
    }

    manager.disconnect();
    info!(stats = ?manager.dispatch_stats(), "done");

    Ok(())
}
