//! Protocol constants for session establishment

use bitflags::bitflags;

/// SMB header size
pub const SMB_HEADER_SIZE: usize = 32;

/// Fixed session-setup request body size: flags, max buffer, max mpx,
/// vc number, legacy session key, blob length, capabilities, byte count
pub const SESSION_SETUP_FIXED_SIZE: usize = 2 + 2 + 2 + 2 + 4 + 2 + 4 + 2;

/// Wire overhead reserved per session-setup message when sizing a token
/// fragment: header, fixed body fields, and the trailing native strings
pub const SESSION_SETUP_OVERHEAD: usize = SMB_HEADER_SIZE + SESSION_SETUP_FIXED_SIZE + 64;

/// Default maximum transmit size before negotiation says otherwise
pub const DEFAULT_MAX_TRANSMIT_SIZE: u32 = 65535;

/// Default maximum outstanding requests
pub const DEFAULT_MAX_MPX_COUNT: u16 = 50;

/// Sequence counter value after a session-signing key is installed.
/// The signed sequence space starts over counting the request/reply
/// pair of the round that produced the key.
pub const POST_KEY_SEQUENCE: u64 = 2;

/// Upper bound on handshake rounds before the exchange is declared broken
pub const SETUP_MAX_ROUNDS: u32 = 8;

/// Attempts allowed per establishment when the authentication service
/// dies and is relaunched mid-handshake
pub const MAX_RESTART_RETRIES: u32 = 3;

bitflags! {
    /// Connection capabilities negotiated before session setup
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capabilities: u32 {
        /// Server understands raw mode reads/writes
        const RAW_MODE           = 0x00000001;
        /// Unicode strings on the wire
        const UNICODE            = 0x00000004;
        /// 64-bit file offsets
        const LARGE_FILES        = 0x00000008;
        /// NT-family command set
        const NT_SMBS            = 0x00000010;
        /// NT status codes in replies
        const STATUS32           = 0x00000040;
        /// Extended security (GSS blobs in session setup)
        const EXTENDED_SECURITY  = 0x80000000;
    }
}

bitflags! {
    /// Granted-action bits in the session-setup reply
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SessionSetupAction: u16 {
        /// The presented identity was mapped to the guest account
        const GUEST = 0x0001;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guest_action_bit() {
        let action = SessionSetupAction::from_bits_truncate(0x0001);
        assert!(action.contains(SessionSetupAction::GUEST));
        assert!(!SessionSetupAction::empty().contains(SessionSetupAction::GUEST));
    }

    #[test]
    fn test_fragment_overhead_leaves_room() {
        assert!(SESSION_SETUP_OVERHEAD < DEFAULT_MAX_TRANSMIT_SIZE as usize);
    }
}
