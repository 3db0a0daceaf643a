//! GSS session establishment
//!
//! The security mechanism (SPNEGO negotiation, NTLMSSP, Kerberos) is
//! owned entirely by a privileged out-of-process authentication service;
//! this module holds the per-connection context handed back and forth to
//! it, and the machinery that drives the handshake: the upcall bridge,
//! the token exchange over the wire, credential pinning, and the
//! negotiation loop itself.

pub mod credential;
pub mod exchange;
pub mod negotiate;
pub mod upcall;

use bitflags::bitflags;
use std::fmt;
use std::sync::Arc;
use upcall::AuthService;

/// Major-status word masks and values (RFC 2744 layout)
pub mod gss_major {
    /// Everything went fine, context is established
    pub const COMPLETE: u32 = 0x0000_0000;
    /// Supplementary bit: another token exchange is needed
    pub const CONTINUE_NEEDED: u32 = 0x0000_0001;
    /// Routine-error field
    pub const ROUTINE_ERROR_MASK: u32 = 0x00FF_0000;
    /// Calling-error field
    pub const CALLING_ERROR_MASK: u32 = 0xFF00_0000;
    /// Generic mechanism failure
    pub const FAILURE: u32 = 13 << 16;
    /// No credential available for the caller
    pub const NO_CRED: u32 = 7 << 16;
    /// Peer sent a token the mechanism cannot make sense of
    pub const DEFECTIVE_TOKEN: u32 = 9 << 16;
}

/// Last result reported by the authentication service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GssStatus {
    pub major: u32,
    pub minor: u32,
}

impl GssStatus {
    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// A calling or routine error is set; no continuation is possible
    pub fn is_error(self) -> bool {
        self.major & (gss_major::CALLING_ERROR_MASK | gss_major::ROUTINE_ERROR_MASK) != 0
    }

    /// The mechanism needs another token round trip
    pub fn continue_needed(self) -> bool {
        !self.is_error() && self.major & gss_major::CONTINUE_NEEDED != 0
    }

    /// The context is fully established
    pub fn is_complete(self) -> bool {
        !self.is_error() && !self.continue_needed()
    }
}

impl fmt::Display for GssStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "major 0x{:08x} minor 0x{:08x}", self.major, self.minor)
    }
}

/// Security mechanism selected once per connection before negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mechanism {
    /// Negotiate the underlying mechanism (Kerberos vs NTLM) in-band
    Spnego,
    /// Bare NTLMSSP without the negotiation wrapper
    RawNtlm,
}

/// Kind of a GSS principal name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GssNameKind {
    /// service@host form, e.g. `cifs@fileserver.example.com`
    HostBased,
    /// Full Kerberos principal
    KerberosPrincipal,
    /// Bare user name resolved by the service
    User,
}

/// Principal name plus its interpretation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GssName {
    pub name: String,
    pub kind: GssNameKind,
}

impl GssName {
    pub fn host_based(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: GssNameKind::HostBased,
        }
    }

    pub fn user(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: GssNameKind::User,
        }
    }

    pub fn kerberos_principal(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: GssNameKind::KerberosPrincipal,
        }
    }
}

bitflags! {
    /// Requested and observed behavior bits for the handshake. The low
    /// half mirrors the GSS context-establishment flags handed to the
    /// service; the high half is local session-setup policy.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AuthFlags: u32 {
        /// Request mutual authentication of the server
        const MUTUAL_AUTH   = 0x0000_0002;
        /// Request message integrity (signing) support
        const SIGNING       = 0x0000_0020;
        /// Authenticate anonymously
        const ANONYMOUS     = 0x0000_0040;
        /// A guest grant is acceptable to the caller
        const GUEST_OK      = 0x0001_0000;
        /// The server granted guest access (observed, not requested)
        const GRANTED_GUEST = 0x0002_0000;
    }
}

impl AuthFlags {
    /// The bits forwarded to the authentication service
    pub fn context_bits(self) -> u32 {
        self.bits() & 0x0000_FFFF
    }
}

/// Local identity requesting the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub uid: u32,
}

impl Identity {
    pub fn new(uid: u32) -> Self {
        Self { uid }
    }
}

/// What the server granted once establishment succeeded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantedAction {
    /// Full authentication as the requested identity
    Authenticated,
    /// The identity was mapped to the guest account
    Guest,
}

/// Per-connection authentication context. Created when the connection is
/// established, torn down with it. The context and credential handles are
/// owned by the authentication service and only ever passed back to it.
pub struct AuthContext {
    pub(crate) service: Arc<dyn AuthService>,
    pub(crate) security_context: u64,
    pub(crate) credential: u64,
    pub(crate) pending_token: Vec<u8>,
    pub(crate) status: GssStatus,
    pub client_principal: GssName,
    pub target_principal: GssName,
    pub mechanism: Mechanism,
    pub(crate) session_key: Option<Vec<u8>>,
    pub flags: AuthFlags,
    pub(crate) display_name: Option<String>,
    pub(crate) credential_pinned: bool,
    pub(crate) restart_retries: u32,
}

impl AuthContext {
    pub fn new(
        service: Arc<dyn AuthService>,
        mechanism: Mechanism,
        client_principal: GssName,
        target_principal: GssName,
        flags: AuthFlags,
    ) -> Self {
        Self {
            service,
            security_context: 0,
            credential: 0,
            pending_token: Vec::new(),
            status: GssStatus::default(),
            client_principal,
            target_principal,
            mechanism,
            session_key: None,
            flags,
            display_name: None,
            credential_pinned: false,
            restart_retries: 0,
        }
    }

    /// Last status reported by the authentication service
    pub fn status(&self) -> GssStatus {
        self.status
    }

    /// Identity display string, once the service has provided one
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// Session key derived by the mechanism, once available
    pub fn session_key(&self) -> Option<&[u8]> {
        self.session_key.as_deref()
    }

    /// True once the service has granted a credential for this context
    pub fn has_credential(&self) -> bool {
        self.credential != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_complete() {
        let status = GssStatus::new(gss_major::COMPLETE, 0);
        assert!(status.is_complete());
        assert!(!status.continue_needed());
        assert!(!status.is_error());
    }

    #[test]
    fn test_status_continue_needed_is_not_terminal() {
        let status = GssStatus::new(gss_major::CONTINUE_NEEDED, 0);
        assert!(status.continue_needed());
        assert!(!status.is_complete());
        assert!(!status.is_error());
    }

    #[test]
    fn test_status_routine_error_wins_over_supplementary_bits() {
        let status = GssStatus::new(gss_major::FAILURE | gss_major::CONTINUE_NEEDED, 7);
        assert!(status.is_error());
        assert!(!status.continue_needed());
        assert!(!status.is_complete());
    }

    #[test]
    fn test_context_bits_strip_local_policy() {
        let flags = AuthFlags::MUTUAL_AUTH | AuthFlags::SIGNING | AuthFlags::GUEST_OK;
        assert_eq!(
            flags.context_bits(),
            (AuthFlags::MUTUAL_AUTH | AuthFlags::SIGNING).bits()
        );
    }
}
