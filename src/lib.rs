//! Realtime event stream client for the fleet monitoring dashboard.
//!
//! The dashboard server pushes host metrics, container, network and package snapshots over
//! an authenticated WebSocket. This crate owns the client side of that stream: it opens the
//! transport, performs the token handshake, keeps the channel alive across network
//! interruptions with exponential backoff, classifies server rejections, and hands every
//! well-formed payload to a single registered consumer.
//!
//! ```rust, no_run
//! use fleetview_realtime::auth::CredentialStore;
//! use fleetview_realtime::ws::config::Config;
//! use fleetview_realtime::ws::{ConnectionManager, endpoint};
//! use serde_json::Value;
//! use url::Url;
//!
//! # async fn run() -> fleetview_realtime::Result<()> {
//! let store = CredentialStore::new();
//! store.set("eyJhbGciOi...");
//!
//! let origin = Url::parse("https://fleet.example.com")?;
//! let url = endpoint::resolve(&origin, "/ws/dashboard")?;
//!
//! let mut manager = ConnectionManager::new(url, Config::default(), store, |payload: Value| {
//!     println!("{payload}");
//! });
//! manager.connect();
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod error;
pub mod ws;

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;
