//! The session-establishment loop
//!
//! Rounds alternate between the authentication service (produce the
//! next token) and the server (carry tokens over session-setup
//! messages) until the mechanism reports completion with nothing left
//! to send. The session-signing key is installed on the round that
//! produces it, together with the sequence-counter reset; a completed
//! handshake that only got a guest grant is logged off and failed
//! unless the caller said guest was acceptable. A connection reported
//! as failed never keeps a session key or a pinned credential.

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::gss::{
    credential, exchange, upcall, AuthContext, AuthFlags, GrantedAction, Identity,
};
use crate::protocol::constants::{SessionSetupAction, SETUP_MAX_ROUNDS};
use crate::transport::SetupTransport;
use tracing::{debug, warn};

/// Drive the handshake to completion on a negotiated connection.
///
/// The caller guarantees no second establishment runs concurrently on
/// the same connection; teardown from another thread is only safe once
/// this call has returned.
pub async fn establish_session<T: SetupTransport>(
    conn: &mut Connection<T>,
    ctx: &mut AuthContext,
    identity: Identity,
) -> Result<GrantedAction> {
    ctx.restart_retries = 0;

    match run_handshake(conn, ctx, identity).await {
        Ok(action) => Ok(action),
        Err(err) => {
            conn.clear_session_key();
            Err(err)
        }
    }
}

async fn run_handshake<T: SetupTransport>(
    conn: &mut Connection<T>,
    ctx: &mut AuthContext,
    identity: Identity,
) -> Result<GrantedAction> {
    let mut key_installed = false;
    let mut exchanged = false;
    let mut wire_complete = false;
    let mut last_action = SessionSetupAction::empty();
    let mut round = 0u32;

    loop {
        round += 1;
        if round > SETUP_MAX_ROUNDS {
            return Err(Error::Protocol(format!(
                "Session setup did not converge within {} rounds",
                SETUP_MAX_ROUNDS
            )));
        }

        upcall::advance(ctx, identity)?;

        if ctx.status.is_error() {
            return Err(Error::AuthenticationFailed(format!(
                "Security mechanism failed: {}",
                ctx.status
            )));
        }

        if !key_installed {
            if let Some(key) = ctx.session_key.clone() {
                conn.install_session_key(&key)?;
                key_installed = true;
            }
        }

        if !ctx.pending_token.is_empty() {
            let outbound = std::mem::take(&mut ctx.pending_token);
            let reply = exchange::exchange_token(conn, &outbound).await?;
            exchanged = true;
            wire_complete = reply.complete;
            last_action = reply.action;
            conn.record_server_info(reply.native_os, reply.native_lanman);
            ctx.pending_token = reply.token;
            debug!(
                round,
                wire_complete,
                reply_token_len = ctx.pending_token.len(),
                "session-setup round exchanged"
            );
        } else if ctx.status.continue_needed() {
            return Err(Error::Protocol(
                "Mechanism wants another round but produced no token".into(),
            ));
        }

        if ctx.status.is_complete() && ctx.pending_token.is_empty() {
            break;
        }
    }

    if !exchanged {
        return Err(Error::Protocol(
            "Mechanism completed without a session-setup exchange".into(),
        ));
    }
    if !wire_complete {
        return Err(Error::Protocol(
            "Mechanism completed but the server still expects more processing".into(),
        ));
    }

    if last_action.contains(SessionSetupAction::GUEST) {
        ctx.flags |= AuthFlags::GRANTED_GUEST;
        if !ctx.flags.contains(AuthFlags::GUEST_OK) {
            warn!(
                session_id = conn.session_id(),
                "server granted guest access where full authentication was required"
            );
            // The server considers the guest session live; log it off
            // before reporting the establishment as failed.
            if let Err(err) = conn.logoff().await {
                debug!(error = %err, "logoff of downgraded session failed");
            }
            return Err(Error::PolicyViolation(
                "Guest access granted where full authentication was required".into(),
            ));
        }
    }

    if let Err(err) = credential::pin(ctx) {
        warn!(error = %err, "credential pin failed; identity will not survive reconnect");
    }

    debug!(
        session_id = conn.session_id(),
        display_name = ctx.display_name().unwrap_or(""),
        guest = ctx.flags.contains(AuthFlags::GRANTED_GUEST),
        "session established"
    );

    if ctx.flags.contains(AuthFlags::GRANTED_GUEST) {
        Ok(GrantedAction::Guest)
    } else {
        Ok(GrantedAction::Authenticated)
    }
}

/// Best-effort teardown of an established session: log off on the wire,
/// release the credential reference, drop signing state. Failures are
/// logged and swallowed; teardown always completes.
pub async fn teardown_session<T: SetupTransport>(conn: &mut Connection<T>, ctx: &mut AuthContext) {
    if conn.session_id() != 0 {
        if let Err(err) = conn.logoff().await {
            debug!(error = %err, "logoff failed at teardown");
        }
    }
    if let Err(err) = credential::unpin(ctx) {
        warn!(error = %err, "credential release failed at teardown");
    }
    conn.clear_session_key();
}
