//! Validation and routing of inbound frames.

use std::panic::{self, AssertUnwindSafe};

use serde::Deserialize;
use serde_json::Value;

use super::error::WsError;
use super::handshake::AUTH_ERROR_TYPE;
use super::traits::Consumer;

/// A frame that survived parsing.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// The server rejected the handshake credential
    AuthRejected { reason: Option<String> },
    /// Any other application payload, forwarded verbatim
    Payload(Value),
}

#[derive(Deserialize)]
struct AuthErrorFrame {
    #[serde(default)]
    error: Option<String>,
}

/// Frame counters for one dispatcher.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Payloads handed to the consumer
    pub delivered: u64,
    /// Frames discarded before reaching the consumer, either invalid JSON or JSON that is
    /// not an object
    pub dropped: u64,
    /// Payloads during which the consumer panicked
    pub consumer_failures: u64,
}

/// Parses inbound frames and hands application payloads to the registered [`Consumer`].
pub struct MessageDispatcher {
    consumer: Box<dyn Consumer>,
    stats: DispatchStats,
}

impl MessageDispatcher {
    pub fn new<C: Consumer>(consumer: C) -> Self {
        Self {
            consumer: Box::new(consumer),
            stats: DispatchStats::default(),
        }
    }

    /// Parse a raw frame.
    ///
    /// Bytes that are not JSON fail with [`WsError::MalformedPayload`]. Well-formed JSON that
    /// is not an object (arrays, strings, numbers, booleans, `null`) fails with
    /// [`WsError::UnsupportedPayload`]: every message the server sends is an object tagged by
    /// its `type` field, so nothing else can be routed. Both are dropped by the caller.
    ///
    /// For objects the `type` discriminator separates handshake rejections from application
    /// payloads; everything else is left untouched.
    pub fn parse(bytes: &[u8]) -> Result<Inbound, WsError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| WsError::MalformedPayload(e.to_string()))?;

        let shape = match &value {
            Value::Object(_) => None,
            Value::Array(_) => Some("an array"),
            Value::String(_) => Some("a string"),
            Value::Number(_) => Some("a number"),
            Value::Bool(_) => Some("a boolean"),
            Value::Null => Some("null"),
        };
        if let Some(shape) = shape {
            return Err(WsError::UnsupportedPayload(shape));
        }

        if value.get("type").and_then(Value::as_str) == Some(AUTH_ERROR_TYPE) {
            let reason = AuthErrorFrame::deserialize(&value)
                .ok()
                .and_then(|frame| frame.error);
            return Ok(Inbound::AuthRejected { reason });
        }

        Ok(Inbound::Payload(value))
    }

    /// Deliver one payload to the consumer.
    ///
    /// A panicking consumer is contained here; the frame counts as a consumer failure and the
    /// connection carries on.
    pub fn forward(&mut self, payload: Value) {
        let consumer = &mut self.consumer;
        match panic::catch_unwind(AssertUnwindSafe(|| consumer.on_message(payload))) {
            Ok(()) => self.stats.delivered = self.stats.delivered.saturating_add(1),
            Err(_) => {
                self.stats.consumer_failures = self.stats.consumer_failures.saturating_add(1);
                #[cfg(feature = "tracing")]
                tracing::error!("Consumer panicked while handling realtime payload");
            }
        }
    }

    /// Record a frame that was discarded before reaching the consumer.
    pub fn discard(&mut self, error: &WsError) {
        self.stats.dropped = self.stats.dropped.saturating_add(1);
        #[cfg(feature = "tracing")]
        tracing::debug!(error = %error, "Dropping unroutable realtime frame");
        #[cfg(not(feature = "tracing"))]
        let _ = error;
    }

    #[must_use]
    pub fn stats(&self) -> DispatchStats {
        self.stats
    }
}
