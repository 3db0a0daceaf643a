//! Credential pinning at the authentication service
//!
//! The credential itself lives in the authentication service; the
//! connection just holds an explicit reference on it so the identity
//! survives reconnects without re-prompting. Whether we hold such a
//! reference is tracked as a plain boolean; the reference count is the
//! service's business.

use crate::error::{Error, Result};
use crate::gss::upcall::{retry_restarts, CredentialRequest, UpcallError};
use crate::gss::{AuthContext, GssStatus};
use crate::protocol::constants::MAX_RESTART_RETRIES;
use std::sync::Arc;
use tracing::{debug, warn};

fn request_for(ctx: &AuthContext) -> CredentialRequest {
    CredentialRequest {
        mechanism: ctx.mechanism,
        client: ctx.client_principal.clone(),
        credential: ctx.credential,
    }
}

fn map_upcall(err: UpcallError) -> Error {
    match err {
        UpcallError::ServiceUnavailable => Error::ServiceUnavailable,
        UpcallError::ServiceRestarted => Error::ServiceRestarted,
        UpcallError::Protocol(msg) => Error::Protocol(msg),
    }
}

/// Take a reference on the context's credential. Called once after
/// successful establishment; a context without a credential (anonymous
/// session) has nothing to pin.
pub fn pin(ctx: &mut AuthContext) -> Result<()> {
    if ctx.credential_pinned || !ctx.has_credential() {
        return Ok(());
    }

    let service = Arc::clone(&ctx.service);
    let request = request_for(ctx);
    let mut retries = 0;
    let reply = retry_restarts(&mut retries, MAX_RESTART_RETRIES, || {
        service.hold_credential(&request)
    })
    .map_err(map_upcall)?;

    let status = GssStatus::new(reply.major, reply.minor);
    if status.is_error() {
        return Err(Error::AuthenticationFailed(format!(
            "Credential hold rejected: {}",
            status
        )));
    }

    ctx.credential_pinned = true;
    debug!(credential = ctx.credential, "credential pinned");
    Ok(())
}

/// Drop the reference taken by [`pin`]. Runs at most once per pin: the
/// pinned flag is cleared up front so a failed release is not retried
/// by a second teardown pass.
pub fn unpin(ctx: &mut AuthContext) -> Result<()> {
    if !ctx.credential_pinned {
        return Ok(());
    }
    ctx.credential_pinned = false;

    let service = Arc::clone(&ctx.service);
    let request = request_for(ctx);
    let mut retries = 0;
    let result = retry_restarts(&mut retries, MAX_RESTART_RETRIES, || {
        service.release_credential(&request)
    });

    match result {
        Ok(reply) => {
            let status = GssStatus::new(reply.major, reply.minor);
            if status.is_error() {
                warn!(credential = ctx.credential, %status, "credential release rejected");
                return Err(Error::AuthenticationFailed(format!(
                    "Credential release rejected: {}",
                    status
                )));
            }
            debug!(credential = ctx.credential, "credential released");
            Ok(())
        }
        Err(err) => {
            warn!(credential = ctx.credential, error = %err, "credential release failed");
            Err(map_upcall(err))
        }
    }
}
