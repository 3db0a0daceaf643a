//! Transport seam for session establishment
//!
//! The socket, framing, message headers and timeouts belong to the
//! connection layer; session establishment only needs to run complete
//! session-setup transactions on an already-negotiated connection. This
//! trait is that seam.

use crate::error::Result;
use crate::protocol::session::{SessionSetupReply, SessionSetupRequest};
use async_trait::async_trait;

/// One-command wire interface used during session establishment
#[async_trait]
pub trait SetupTransport: Send {
    /// Send one session-setup request and await its reply. The
    /// implementation owns header construction (including placing
    /// `request.session_id`) and extracts status and session id from
    /// the reply header.
    async fn transact(&mut self, request: SessionSetupRequest) -> Result<SessionSetupReply>;

    /// Send a logoff for the given session and await the reply.
    async fn logoff(&mut self, session_id: u64) -> Result<()>;
}
