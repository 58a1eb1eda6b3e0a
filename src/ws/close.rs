//! Classification of connection terminations into retry-or-stop decisions.

use std::fmt;

use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Error as TungsteniteError;

use super::error::WsError;
use crate::error::Error;

pub const NORMAL_CLOSURE: u16 = 1000;
pub const PROTOCOL_ERROR: u16 = 1002;
pub const NO_STATUS_RECEIVED: u16 = 1005;
pub const ABNORMAL_CLOSURE: u16 = 1006;
pub const POLICY_VIOLATION: u16 = 1008;
/// Application code the server may use to signal an expired session.
pub const SESSION_EXPIRED: u16 = 4001;

/// Status code and reason observed when a transport terminates.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseSignal {
    pub code: u16,
    pub reason: Option<String>,
}

impl CloseSignal {
    #[must_use]
    pub fn new(code: u16, reason: Option<String>) -> Self {
        Self { code, reason }
    }

    /// Transport vanished without a close handshake.
    #[must_use]
    pub fn abnormal<S: Into<String>>(reason: S) -> Self {
        Self::new(ABNORMAL_CLOSURE, Some(reason.into()))
    }

    #[must_use]
    pub fn from_frame(frame: Option<&CloseFrame>) -> Self {
        match frame {
            Some(frame) => {
                let reason = frame.reason.as_str();
                Self::new(
                    u16::from(frame.code),
                    (!reason.is_empty()).then(|| reason.to_owned()),
                )
            }
            None => Self::new(NO_STATUS_RECEIVED, None),
        }
    }

    /// Map a transport error to the closure it amounts to.
    ///
    /// The server refuses the upgrade with plain HTTP when the origin check fails (403) or
    /// the request is unauthorized (401). Those never reach the WebSocket layer, so they are
    /// folded into the equivalent close codes here.
    #[must_use]
    pub fn from_transport_error(error: &TungsteniteError) -> Self {
        match error {
            TungsteniteError::Http(response) => match response.status() {
                StatusCode::FORBIDDEN => {
                    Self::new(POLICY_VIOLATION, Some("upgrade refused (HTTP 403)".to_owned()))
                }
                StatusCode::UNAUTHORIZED => {
                    Self::new(SESSION_EXPIRED, Some("upgrade refused (HTTP 401)".to_owned()))
                }
                status => Self::abnormal(format!("upgrade refused (HTTP {status})")),
            },
            other => Self::abnormal(other.to_string()),
        }
    }

    /// Map a failed [`super::traits::Connector::open`] to a closure.
    #[must_use]
    pub fn from_connect_error(error: &Error) -> Self {
        match error.downcast_ref::<WsError>() {
            Some(WsError::Connection(e)) => Self::from_transport_error(e),
            _ => Self::abnormal(error.to_string()),
        }
    }
}

/// Why a connection attempt ended.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The transport closed or failed
    Closed(CloseSignal),
    /// The server answered the handshake with an `auth_error` frame
    AuthRejected { reason: Option<String> },
}

/// User-facing cause attached to a disposition.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Failure {
    /// The connection never came up during this epoch
    Unreachable,
    /// A working connection dropped
    Interrupted,
    /// The server refused the origin or violated policy
    PolicyRejected,
    /// The server rejected the credential
    AuthRejected,
    /// The server ended the session with the reserved session code
    SessionExpired,
}

impl Failure {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::PolicyRejected | Self::AuthRejected | Self::SessionExpired
        )
    }

    /// Short machine-readable label for diagnostics.
    #[must_use]
    pub fn label(self) -> &'static str {
        self.into()
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Self::Unreachable => {
                "unable to reach the server; check that it is running and that its base URL is configured correctly"
            }
            Self::Interrupted => "connection interrupted; reconnecting",
            Self::PolicyRejected => {
                "connection refused by the server; check the base URL and allowed origins configuration"
            }
            Self::AuthRejected => "authentication rejected; sign in again",
            Self::SessionExpired => "session expired; reload required",
        };
        f.write_str(message)
    }
}

/// Whether a termination is eligible for automatic reconnection.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Retryable(Failure),
    Terminal(Failure),
}

impl Disposition {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Terminal(_))
    }

    #[must_use]
    pub const fn failure(self) -> Failure {
        match self {
            Self::Retryable(failure) | Self::Terminal(failure) => failure,
        }
    }
}

/// Decide what to do after `termination`.
///
/// `connected_before` is true once the current connection epoch has reached
/// [`super::ConnectionState::Connected`] at least once.
#[must_use]
pub fn classify(termination: &Termination, connected_before: bool) -> Disposition {
    match termination {
        Termination::AuthRejected { .. } => Disposition::Terminal(Failure::AuthRejected),
        Termination::Closed(signal) => match signal.code {
            PROTOCOL_ERROR | POLICY_VIOLATION => Disposition::Terminal(Failure::PolicyRejected),
            SESSION_EXPIRED => Disposition::Terminal(Failure::SessionExpired),
            _ if connected_before => Disposition::Retryable(Failure::Interrupted),
            _ => Disposition::Retryable(Failure::Unreachable),
        },
    }
}
