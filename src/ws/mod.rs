//! Realtime connection infrastructure.
//!
//! # Architecture
//!
//! - [`ConnectionManager`]: owns the transport, the state machine and the retry loop
//! - [`config::BackoffPolicy`]: delay before each automatic retry
//! - [`close::classify`]: decides whether a termination is retryable or terminal
//! - [`handshake`]: the credential frame sent right after the transport opens
//! - [`dispatch::MessageDispatcher`]: validates inbound frames and feeds the [`Consumer`]
//!
//! # Example
//!
//! ```ignore
//! let url = endpoint::resolve(&origin, "/ws/dashboard")?;
//! let mut manager = ConnectionManager::new(url, Config::default(), store, |payload: Value| {
//!     /* update the view */
//! });
//! manager.connect();
//! ```

pub mod close;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod endpoint;
pub mod error;
pub mod handshake;
mod state;
pub mod traits;

pub use connection::{ConnectionManager, TungsteniteConnector};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use state::{ConnectionState, Status};
pub use traits::*;
