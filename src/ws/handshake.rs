//! Credential exchange performed right after the transport opens.
//!
//! The client sends a single `{"type":"auth","token":...}` frame. The server either starts
//! streaming application payloads or answers with `{"type":"auth_error",...}` and closes.

use futures::{Sink, SinkExt as _};
use secrecy::{ExposeSecret as _, SecretString};
use serde::Serialize;
use tokio_tungstenite::tungstenite::{Error as TungsteniteError, Message};

use super::error::WsError;
use crate::Result;

/// Discriminator of the handshake frame.
pub const AUTH_TYPE: &str = "auth";
/// Discriminator of the server's rejection frame.
pub const AUTH_ERROR_TYPE: &str = "auth_error";

#[derive(Serialize)]
#[serde(tag = "type", rename = "auth")]
struct AuthFrame<'a> {
    token: &'a str,
}

/// Serialize the handshake frame for `token`.
pub fn auth_frame(token: &SecretString) -> Result<String> {
    let frame = AuthFrame {
        token: token.expose_secret(),
    };
    Ok(serde_json::to_string(&frame)?)
}

/// Write the handshake frame to a freshly opened transport.
pub(crate) async fn send<S>(sink: &mut S, token: &SecretString) -> Result<()>
where
    S: Sink<Message, Error = TungsteniteError> + Unpin,
{
    let frame = auth_frame(token)?;
    sink.send(Message::Text(frame.into()))
        .await
        .map_err(|e| WsError::Handshake(e.to_string()))?;
    Ok(())
}
