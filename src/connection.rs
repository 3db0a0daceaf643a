//! Per-connection state consumed by session establishment
//!
//! A [`Connection`] wraps whatever transport the connection layer hands
//! us, together with the parameters negotiation already fixed: maximum
//! transmit size, capabilities, the instance number, and the signing
//! state. Session establishment mutates exactly three things here: the
//! server-assigned session id, the message-sequence counter, and the
//! session-signing key slot.

use crate::error::{Error, Result};
use crate::protocol::constants::{
    Capabilities, DEFAULT_MAX_MPX_COUNT, DEFAULT_MAX_TRANSMIT_SIZE, POST_KEY_SEQUENCE,
    SESSION_SETUP_OVERHEAD,
};
use crate::protocol::session::{SessionSetupReply, SessionSetupRequest};
use crate::transport::SetupTransport;
use tracing::debug;
use uuid::Uuid;

/// Connection configuration
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Client GUID
    pub client_guid: Uuid,
    /// Client operating system name sent in session setup
    pub native_os: String,
    /// Client software name sent in session setup
    pub native_lanman: String,
    /// Connection-instance number
    pub vc_number: u16,
    /// Maximum outstanding requests advertised to the server
    pub max_mpx_count: u16,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            client_guid: Uuid::new_v4(),
            native_os: String::from("Unix"),
            native_lanman: String::from("smb-gss"),
            vc_number: 1,
            max_mpx_count: DEFAULT_MAX_MPX_COUNT,
        }
    }
}

/// A negotiated connection awaiting (or holding) an authenticated session
pub struct Connection<T: SetupTransport> {
    transport: T,
    config: ConnectionConfig,
    capabilities: Capabilities,
    max_transmit_size: u32,
    session_id: u64,
    sequence: u64,
    signing_key: Option<Vec<u8>>,
    server_native_os: Option<String>,
    server_native_lanman: Option<String>,
}

impl<T: SetupTransport> Connection<T> {
    /// Wrap a transport with default negotiated parameters
    pub fn new(transport: T, config: ConnectionConfig) -> Self {
        Self {
            transport,
            config,
            capabilities: Capabilities::NT_SMBS
                | Capabilities::STATUS32
                | Capabilities::EXTENDED_SECURITY,
            max_transmit_size: DEFAULT_MAX_TRANSMIT_SIZE,
            session_id: 0,
            sequence: 0,
            signing_key: None,
            server_native_os: None,
            server_native_lanman: None,
        }
    }

    /// Record what protocol negotiation agreed on
    pub fn set_negotiated(&mut self, max_transmit_size: u32, capabilities: Capabilities) {
        self.max_transmit_size = max_transmit_size;
        self.capabilities = capabilities;
    }

    /// Largest security-token fragment one session-setup message carries
    pub fn max_fragment(&self) -> usize {
        (self.max_transmit_size as usize)
            .saturating_sub(SESSION_SETUP_OVERHEAD)
            .max(1)
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    #[cfg(test)]
    pub(crate) fn transport_ref(&self) -> &T {
        &self.transport
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn session_key(&self) -> Option<&[u8]> {
        self.signing_key.as_deref()
    }

    /// Server operating system name, once a session-setup reply carried it
    pub fn server_native_os(&self) -> Option<&str> {
        self.server_native_os.as_deref()
    }

    /// Server software name, once a session-setup reply carried it
    pub fn server_native_lanman(&self) -> Option<&str> {
        self.server_native_lanman.as_deref()
    }

    pub(crate) fn record_server_info(&mut self, native_os: String, native_lanman: String) {
        self.server_native_os = Some(native_os);
        self.server_native_lanman = Some(native_lanman);
    }

    /// Adopt the session id the server put in a reply. Some servers
    /// reassign it every round, others hold it fixed; the last one seen
    /// is authoritative either way.
    pub(crate) fn adopt_session_id(&mut self, session_id: u64) {
        if session_id != self.session_id {
            debug!(old = self.session_id, new = session_id, "adopting session id");
            self.session_id = session_id;
        }
    }

    /// Build a session-setup request carrying one token fragment
    pub(crate) fn setup_request(&self, fragment: Vec<u8>) -> SessionSetupRequest {
        SessionSetupRequest {
            flags: 0,
            max_buffer_size: self.max_transmit_size.min(u16::MAX as u32) as u16,
            max_mpx_count: self.config.max_mpx_count,
            vc_number: self.config.vc_number,
            session_key: 0,
            capabilities: self.capabilities,
            security_blob: fragment,
            native_os: self.config.native_os.clone(),
            native_lanman: self.config.native_lanman.clone(),
            session_id: self.session_id,
        }
    }

    /// Run one session-setup transaction; the request/reply pair
    /// consumes two sequence numbers.
    pub(crate) async fn transact(
        &mut self,
        request: SessionSetupRequest,
    ) -> Result<SessionSetupReply> {
        let reply = self.transport.transact(request).await?;
        self.sequence += 2;
        Ok(reply)
    }

    /// Log off the currently granted session
    pub(crate) async fn logoff(&mut self) -> Result<()> {
        self.transport.logoff(self.session_id).await
    }

    /// Install the session-signing key and reset the sequence counter
    /// in the same step. Installing the same key again is a no-op on
    /// the counter; a different key while one is installed means the
    /// connection generations got crossed.
    pub fn install_session_key(&mut self, key: &[u8]) -> Result<()> {
        match self.signing_key {
            Some(ref installed) if installed.as_slice() == key => Ok(()),
            Some(_) => Err(Error::InvalidParameter(
                "Session key already installed for this connection generation".into(),
            )),
            None => {
                debug!(key_len = key.len(), "installing session-signing key");
                self.signing_key = Some(key.to_vec());
                self.sequence = POST_KEY_SEQUENCE;
                Ok(())
            }
        }
    }

    /// Drop signing state, starting a new connection generation. Used
    /// when establishment fails after a key was provisionally installed
    /// and before re-authentication.
    pub fn clear_session_key(&mut self) {
        self.signing_key = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use async_trait::async_trait;

    struct NullTransport;

    #[async_trait]
    impl SetupTransport for NullTransport {
        async fn transact(&mut self, _request: SessionSetupRequest) -> Result<SessionSetupReply> {
            unreachable!("not exercised")
        }

        async fn logoff(&mut self, _session_id: u64) -> Result<()> {
            Ok(())
        }
    }

    fn connection() -> Connection<NullTransport> {
        Connection::new(NullTransport, ConnectionConfig::default())
    }

    #[test]
    fn test_key_install_resets_sequence() {
        let mut conn = connection();
        conn.sequence = 17;
        conn.install_session_key(&[1; 16]).unwrap();
        assert_eq!(conn.sequence(), POST_KEY_SEQUENCE);
        assert_eq!(conn.session_key(), Some(&[1u8; 16][..]));
    }

    #[test]
    fn test_key_install_same_key_is_noop_on_counter() {
        let mut conn = connection();
        conn.install_session_key(&[7; 16]).unwrap();
        conn.sequence = 40;
        conn.install_session_key(&[7; 16]).unwrap();
        assert_eq!(conn.sequence(), 40);
    }

    #[test]
    fn test_key_install_different_key_rejected() {
        let mut conn = connection();
        conn.install_session_key(&[7; 16]).unwrap();
        assert!(conn.install_session_key(&[8; 16]).is_err());
    }

    #[test]
    fn test_clear_key_starts_new_generation() {
        let mut conn = connection();
        conn.install_session_key(&[7; 16]).unwrap();
        conn.clear_session_key();
        assert!(conn.session_key().is_none());
        conn.install_session_key(&[8; 16]).unwrap();
        assert_eq!(conn.session_key(), Some(&[8u8; 16][..]));
    }

    #[test]
    fn test_max_fragment_tracks_negotiated_size() {
        let mut conn = connection();
        conn.set_negotiated(4096, Capabilities::EXTENDED_SECURITY);
        assert!(conn.max_fragment() < 4096);
        assert!(conn.max_fragment() > 0);

        // Degenerate negotiation still leaves room for one byte
        conn.set_negotiated(16, Capabilities::EXTENDED_SECURITY);
        assert_eq!(conn.max_fragment(), 1);
    }

    #[test]
    fn test_adopt_session_id_last_seen_wins() {
        let mut conn = connection();
        conn.adopt_session_id(0x100);
        conn.adopt_session_id(0x200);
        assert_eq!(conn.session_id(), 0x200);
        conn.adopt_session_id(0x200);
        assert_eq!(conn.session_id(), 0x200);
    }
}
