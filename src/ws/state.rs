//! Connection state machine.
//!
//! `ConnectionContext` holds everything the manager knows about the current connection
//! epoch. Its transition methods are pure: they never perform IO, they only decide what the
//! next state is and, for retryable terminations, how long to wait.

use std::time::Duration;

use serde::Serialize;

use super::close::{Disposition, Failure, Termination, classify};
use super::config::BackoffPolicy;

/// Observable connection state.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    /// Transport is being opened for the first time in this epoch
    Connecting,
    /// At least one application payload has been received
    Connected,
    /// Waiting for, or performing, an automatic retry
    Reconnecting,
    /// Stopped on a terminal failure; only an explicit connect resumes
    Error,
    /// Closed by the owner, or never started
    Disconnected,
}

impl ConnectionState {
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Whether a transport or retry timer may be outstanding.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected | Self::Reconnecting)
    }
}

/// Read-only projection of the connection handed to observers.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub state: ConnectionState,
    /// Consecutive failed attempts since the last successful connection
    pub attempt: u32,
    /// Cause worth showing to a user, if any
    pub last_error: Option<Failure>,
    /// Delay of the retry currently armed
    pub next_retry: Option<Duration>,
}

impl Status {
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        self.last_error.map(|failure| failure.to_string())
    }
}

impl Default for Status {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempt: 0,
            last_error: None,
            next_retry: None,
        }
    }
}

#[derive(Debug)]
pub(crate) struct ConnectionContext {
    pub(crate) state: ConnectionState,
    pub(crate) attempt: u32,
    pub(crate) last_error: Option<Failure>,
    pub(crate) next_retry: Option<Duration>,
    /// Set by `shut_down`, cleared by `begin`
    pub(crate) manual_close: bool,
    /// Whether this epoch has ever reached `Connected`
    pub(crate) connected_once: bool,
    /// Bumped on every explicit connect and disconnect; stale tasks compare against it
    pub(crate) epoch: u64,
}

impl Default for ConnectionContext {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempt: 0,
            last_error: None,
            next_retry: None,
            manual_close: false,
            connected_once: false,
            epoch: 0,
        }
    }
}

impl ConnectionContext {
    pub(crate) fn status(&self) -> Status {
        Status {
            state: self.state,
            attempt: self.attempt,
            last_error: self.last_error,
            next_retry: self.next_retry,
        }
    }

    pub(crate) fn is_current(&self, epoch: u64) -> bool {
        self.epoch == epoch && !self.manual_close
    }

    /// Explicit connect: start a fresh epoch and return its id.
    pub(crate) fn begin(&mut self) -> u64 {
        self.epoch = self.epoch.wrapping_add(1);
        self.state = ConnectionState::Connecting;
        self.attempt = 0;
        self.last_error = None;
        self.next_retry = None;
        self.manual_close = false;
        self.connected_once = false;
        self.epoch
    }

    /// First accepted payload of an attempt. Returns `true` if the state changed.
    pub(crate) fn promote(&mut self) -> bool {
        if self.state.is_connected() {
            return false;
        }
        self.state = ConnectionState::Connected;
        self.attempt = 0;
        self.last_error = None;
        self.next_retry = None;
        self.connected_once = true;
        true
    }

    /// Apply a termination. The delay is `Some` only when a retry must be armed.
    pub(crate) fn terminate(
        &mut self,
        termination: &Termination,
        policy: &BackoffPolicy,
    ) -> (Disposition, Option<Duration>) {
        let disposition = classify(termination, self.connected_once);
        match disposition {
            Disposition::Terminal(failure) => {
                self.state = ConnectionState::Error;
                self.last_error = Some(failure);
                self.next_retry = None;
                (disposition, None)
            }
            Disposition::Retryable(failure) => {
                let delay = policy.delay(self.attempt);
                self.attempt = self.attempt.saturating_add(1);
                self.state = ConnectionState::Reconnecting;
                // Only a never-reached server is surfaced while retrying.
                self.last_error = (failure == Failure::Unreachable).then_some(failure);
                self.next_retry = Some(delay);
                (disposition, Some(delay))
            }
        }
    }

    /// The armed retry fired.
    pub(crate) fn retry_started(&mut self) {
        self.next_retry = None;
    }

    /// Owner-initiated close.
    pub(crate) fn shut_down(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
        self.manual_close = true;
        self.state = ConnectionState::Disconnected;
        self.last_error = None;
        self.next_retry = None;
    }
}
