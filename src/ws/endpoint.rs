//! Realtime endpoint selection relative to the dashboard origin.
//!
//! Stream paths belong to the deployment; callers pass whichever path their server mounts
//! a stream on.

use url::Url;

use crate::Result;
use crate::error::Error;

/// Build the realtime URL for `path` on the host serving `origin`.
///
/// Secure origins (`https`) upgrade to `wss`, everything else to `ws`. Host and port are
/// preserved; any path, query or fragment on the origin is discarded.
pub fn resolve(origin: &Url, path: &str) -> Result<Url> {
    let scheme = match origin.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(Error::validation(format!(
                "unsupported origin scheme {other:?}"
            )));
        }
    };

    let Some(host) = origin.host_str() else {
        return Err(Error::validation(format!("origin {origin} has no host")));
    };

    let authority = match origin.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    };

    let path = path.strip_prefix('/').unwrap_or(path);
    Ok(Url::parse(&format!("{scheme}://{authority}/{path}"))?)
}
