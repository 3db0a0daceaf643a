//! Security-token exchange over session-setup messages
//!
//! A token can be far larger than the negotiated maximum message size,
//! so it is cut into consecutive session-setup requests, one fragment
//! each, sent in order on the same connection. The server acknowledges
//! intermediate fragments with a provisional status; its own token comes
//! back spread over the replies however the server likes and is
//! reassembled by concatenation in arrival order. Every reply also
//! carries the server-assigned session id, adopted last-seen-wins.

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::protocol::constants::SessionSetupAction;
use crate::transport::SetupTransport;
use bytes::BytesMut;
use tracing::debug;

/// Outcome of one full token round trip
#[derive(Debug, Clone)]
pub struct TokenReply {
    /// The server's reassembled security token
    pub token: Vec<u8>,
    /// Granted-action bits from the final reply
    pub action: SessionSetupAction,
    /// Server operating system name
    pub native_os: String,
    /// Server software name
    pub native_lanman: String,
    /// True when the final reply carried a success status rather than
    /// a request for more processing
    pub complete: bool,
}

/// Send `outbound` to the server, fragmenting as the connection's
/// message bound requires, and collect the server's replying token and
/// auxiliary fields. An empty outbound token still produces one
/// (empty-blob) message so the server gets its turn.
pub async fn exchange_token<T: SetupTransport>(
    conn: &mut Connection<T>,
    outbound: &[u8],
) -> Result<TokenReply> {
    let fragment_bound = conn.max_fragment();
    let total = outbound.len();
    let mut inbound = BytesMut::new();
    let mut sent = 0usize;
    let mut fragments = 0u32;

    loop {
        let chunk = (total - sent).min(fragment_bound);
        let slice = outbound[sent..sent + chunk].to_vec();
        sent += chunk;
        fragments += 1;
        let last = sent == total;

        let request = conn.setup_request(slice);
        let reply = conn.transact(request).await?;
        conn.adopt_session_id(reply.session_id);
        inbound.extend_from_slice(&reply.security_blob);

        if reply.status.is_error() {
            return Err(Error::AuthenticationFailed(format!(
                "Session setup rejected: {}",
                reply.status
            )));
        }
        if reply.status.is_success() && !last {
            return Err(Error::Protocol(format!(
                "Server completed session setup with {} token bytes still unsent",
                total - sent
            )));
        }
        if last {
            debug!(
                fragments,
                sent_len = total,
                reply_len = inbound.len(),
                complete = reply.status.is_success(),
                "session-setup round finished"
            );
            return Ok(TokenReply {
                token: inbound.to_vec(),
                action: reply.action,
                native_os: reply.native_os,
                native_lanman: reply.native_lanman,
                complete: reply.status.is_success(),
            });
        }
        // Provisional status between fragments: keep sending.
    }
}
