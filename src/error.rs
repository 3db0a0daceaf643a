//! Error types for SMB session establishment

use std::convert::TryFrom;
use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for session establishment operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for session establishment
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Protocol parsing error
    #[error("Protocol parsing error: {0}")]
    ParseError(String),

    /// The authentication service cannot be reached
    #[error("Authentication service unavailable")]
    ServiceUnavailable,

    /// The authentication service died and was relaunched too many times
    #[error("Authentication service restarted")]
    ServiceRestarted,

    /// Authentication rejected by the peer or the security mechanism
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Malformed or out-of-sequence wire reply
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The mechanism succeeded but granted a lesser identity than required
    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Buffer too small
    #[error("Buffer too small: need {need} bytes, have {have}")]
    BufferTooSmall { need: usize, have: usize },

    /// Connection closed
    #[error("Connection closed")]
    ConnectionClosed,
}

/// SMB status codes session setup can observe (subset of NTSTATUS)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum NtStatus {
    /// The operation completed successfully
    Success = 0x00000000,
    /// More processing required
    MoreProcessingRequired = 0xC0000016,
    /// The user name or password is incorrect
    LogonFailure = 0xC000006D,
    /// Account is disabled
    AccountDisabled = 0xC0000072,
    /// Access denied
    AccessDenied = 0xC0000022,
    /// The parameter is incorrect
    InvalidParameter = 0xC000000D,
    /// The session was deleted by the server
    UserSessionDeleted = 0xC0000203,
    /// Insufficient resources
    InsufficientResources = 0xC000009A,
}

impl TryFrom<u32> for NtStatus {
    type Error = ();

    fn try_from(value: u32) -> std::result::Result<Self, Self::Error> {
        match value {
            0x00000000 => Ok(NtStatus::Success),
            0xC0000016 => Ok(NtStatus::MoreProcessingRequired),
            0xC000006D => Ok(NtStatus::LogonFailure),
            0xC0000072 => Ok(NtStatus::AccountDisabled),
            0xC0000022 => Ok(NtStatus::AccessDenied),
            0xC000000D => Ok(NtStatus::InvalidParameter),
            0xC0000203 => Ok(NtStatus::UserSessionDeleted),
            0xC000009A => Ok(NtStatus::InsufficientResources),
            _ => Err(()),
        }
    }
}

impl NtStatus {
    /// Check if this is a success status
    pub fn is_success(self) -> bool {
        self == NtStatus::Success
    }

    /// Check if this is an error status
    pub fn is_error(self) -> bool {
        (self as u32) & 0xC0000000 == 0xC0000000 && self != NtStatus::MoreProcessingRequired
    }

    /// Check if the server wants another session-setup round
    pub fn more_processing(self) -> bool {
        self == NtStatus::MoreProcessingRequired
    }

    /// Create from a raw u32 value, mapping unknown codes to InvalidParameter
    pub fn from_u32(value: u32) -> Self {
        value.try_into().unwrap_or(NtStatus::InvalidParameter)
    }
}

impl fmt::Display for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            NtStatus::Success => "Success",
            NtStatus::MoreProcessingRequired => "More processing required",
            NtStatus::LogonFailure => "Logon failure",
            NtStatus::AccountDisabled => "Account disabled",
            NtStatus::AccessDenied => "Access denied",
            NtStatus::InvalidParameter => "Invalid parameter",
            NtStatus::UserSessionDeleted => "User session deleted",
            NtStatus::InsufficientResources => "Insufficient resources",
        };
        write!(f, "{} (0x{:08X})", msg, *self as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ntstatus_success() {
        assert!(NtStatus::Success.is_success());
        assert!(!NtStatus::Success.is_error());
        assert!(!NtStatus::Success.more_processing());
    }

    #[test]
    fn test_ntstatus_more_processing_is_not_an_error() {
        assert!(NtStatus::MoreProcessingRequired.more_processing());
        assert!(!NtStatus::MoreProcessingRequired.is_error());
        assert!(!NtStatus::MoreProcessingRequired.is_success());
    }

    #[test]
    fn test_ntstatus_error() {
        assert!(NtStatus::LogonFailure.is_error());
        assert!(NtStatus::AccessDenied.is_error());
        assert!(!NtStatus::LogonFailure.is_success());
    }

    #[test]
    fn test_ntstatus_from_u32() {
        assert_eq!(NtStatus::from_u32(0x00000000), NtStatus::Success);
        assert_eq!(
            NtStatus::from_u32(0xC0000016),
            NtStatus::MoreProcessingRequired
        );
        // Unknown value maps to InvalidParameter
        assert_eq!(NtStatus::from_u32(0xFFFFFFFF), NtStatus::InvalidParameter);
    }

    #[test]
    fn test_ntstatus_display() {
        let display = format!("{}", NtStatus::LogonFailure);
        assert!(display.contains("Logon failure"));
        assert!(display.contains("0xC000006D"));
    }
}
