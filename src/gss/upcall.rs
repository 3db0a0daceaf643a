//! Upcall bridge to the privileged authentication service
//!
//! The service runs out of process and owns every cryptographic detail
//! of the handshake; each round we hand it the token the server last
//! sent and get back the token to send next, plus status, handles, and
//! eventually the derived session key. The one operational hazard on
//! this path is the service dying and being relaunched mid-handshake,
//! which shows up as a distinguishable transport failure and is retried
//! within a bound as long as no credential has been granted yet.

use crate::error::{Error, Result};
use crate::gss::{AuthContext, AuthFlags, GssName, GssStatus, Identity, Mechanism};
use crate::protocol::constants::MAX_RESTART_RETRIES;
use std::sync::Arc;
use thiserror::Error as ThisError;
use tracing::{debug, warn};

/// Transport-level failures of the upcall itself. Mechanism-level
/// outcomes travel inside the reply's major/minor status instead.
#[derive(Debug, Clone, ThisError, PartialEq, Eq)]
pub enum UpcallError {
    /// The service cannot be reached at all
    #[error("Authentication service unreachable")]
    ServiceUnavailable,

    /// The service process died and was relaunched; state it held for
    /// this call is gone
    #[error("Authentication service restarted")]
    ServiceRestarted,

    /// The service answered with something unintelligible
    #[error("Malformed upcall reply: {0}")]
    Protocol(String),
}

pub type UpcallResult<T> = std::result::Result<T, UpcallError>;

/// "Initialize security context" request
#[derive(Debug, Clone)]
pub struct InitContextRequest {
    pub mechanism: Mechanism,
    /// Context handle from the previous round, 0 to start a new one
    pub context: u64,
    /// Credential handle from the previous round, 0 if none yet
    pub credential: u64,
    /// Token most recently received from the server, empty on the
    /// first round
    pub input_token: Vec<u8>,
    /// Local identity the session is for
    pub uid: u32,
    pub client: GssName,
    pub target: GssName,
    /// Requested context-establishment bits
    pub flags: u32,
}

/// "Initialize security context" reply
#[derive(Debug, Clone, Default)]
pub struct InitContextReply {
    pub major: u32,
    pub minor: u32,
    pub context: u64,
    pub credential: u64,
    /// Context bits the mechanism actually granted
    pub flags: u32,
    /// Derived session key, empty until the mechanism produces one
    pub session_key: Vec<u8>,
    /// Token to send to the server, empty if the exchange is done
    pub output_token: Vec<u8>,
    /// Human-readable identity, present once the service resolved it
    pub display_name: Option<String>,
}

/// "Hold credential" / "release credential" request
#[derive(Debug, Clone)]
pub struct CredentialRequest {
    pub mechanism: Mechanism,
    pub client: GssName,
    pub credential: u64,
}

/// Reply to a credential hold/release
#[derive(Debug, Clone, Default)]
pub struct CredentialReply {
    pub major: u32,
    pub minor: u32,
}

/// The privileged authentication service, reached by synchronous calls.
/// The handle is obtained during connection setup and lives as long as
/// the connection.
pub trait AuthService: Send + Sync {
    fn init_sec_context(&self, request: &InitContextRequest) -> UpcallResult<InitContextReply>;

    fn hold_credential(&self, request: &CredentialRequest) -> UpcallResult<CredentialReply>;

    fn release_credential(&self, request: &CredentialRequest) -> UpcallResult<CredentialReply>;
}

/// Retry `call` while it reports the service restarting, bumping
/// `retries` up to `max`. Any other outcome passes through untouched.
pub(crate) fn retry_restarts<T>(
    retries: &mut u32,
    max: u32,
    mut call: impl FnMut() -> UpcallResult<T>,
) -> UpcallResult<T> {
    loop {
        match call() {
            Err(UpcallError::ServiceRestarted) if *retries < max => {
                *retries += 1;
                warn!(attempt = *retries, "authentication service restarted, retrying");
            }
            other => return other,
        }
    }
}

/// Advance the security context by one round. Consumes
/// `ctx.pending_token` as the input token and overwrites it with the
/// output token to send; updates status, handles, granted flags, and
/// captures the session key and display name the first time they show
/// up. No side effects beyond `ctx`.
pub fn advance(ctx: &mut AuthContext, identity: Identity) -> Result<()> {
    let request = InitContextRequest {
        mechanism: ctx.mechanism,
        context: ctx.security_context,
        credential: ctx.credential,
        input_token: std::mem::take(&mut ctx.pending_token),
        uid: identity.uid,
        client: ctx.client_principal.clone(),
        target: ctx.target_principal.clone(),
        flags: ctx.flags.context_bits(),
    };
    let service = Arc::clone(&ctx.service);

    let result = if ctx.has_credential() {
        // A retried call against a partially established credential can
        // desynchronize the mechanism state held by the relaunched
        // service, so a restart here is terminal.
        service.init_sec_context(&request)
    } else {
        retry_restarts(&mut ctx.restart_retries, MAX_RESTART_RETRIES, || {
            service.init_sec_context(&request)
        })
    };

    match result {
        Ok(reply) => {
            apply_reply(ctx, reply);
            Ok(())
        }
        Err(UpcallError::ServiceRestarted) if ctx.has_credential() => {
            warn!("authentication service restarted with credential outstanding");
            Err(Error::ServiceUnavailable)
        }
        Err(UpcallError::ServiceRestarted) => Err(Error::ServiceRestarted),
        Err(UpcallError::ServiceUnavailable) => Err(Error::ServiceUnavailable),
        Err(UpcallError::Protocol(msg)) => Err(Error::Protocol(msg)),
    }
}

fn apply_reply(ctx: &mut AuthContext, reply: InitContextReply) {
    ctx.status = GssStatus::new(reply.major, reply.minor);
    ctx.security_context = reply.context;
    ctx.credential = reply.credential;
    ctx.flags |= AuthFlags::from_bits_truncate(reply.flags & 0xFFFF);
    ctx.pending_token = reply.output_token;

    if ctx.session_key.is_none() && !reply.session_key.is_empty() {
        ctx.session_key = Some(reply.session_key);
    }
    if ctx.display_name.is_none() {
        if let Some(name) = reply.display_name {
            ctx.display_name = Some(name);
        }
    }

    debug!(
        status = %ctx.status,
        out_token_len = ctx.pending_token.len(),
        has_key = ctx.session_key.is_some(),
        "security context advanced"
    );
}
