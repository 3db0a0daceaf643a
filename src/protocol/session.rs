//! Session-setup and logoff wire messages
//!
//! The session-setup request/reply pair is the only command this crate
//! encodes itself: it carries one security-token fragment per message,
//! plus the descriptive native OS / native LanMan strings. The message
//! header (status, session id, signing) is owned by the transport
//! implementation; the structs here cover the command body.

use crate::error::{Error, NtStatus, Result};
use crate::protocol::constants::{Capabilities, SessionSetupAction, SESSION_SETUP_FIXED_SIZE};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Write};

/// Session-setup request body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSetupRequest {
    /// Negotiated protocol flags
    pub flags: u16,
    /// Largest message the client will accept
    pub max_buffer_size: u16,
    /// Maximum outstanding requests
    pub max_mpx_count: u16,
    /// Connection-instance number
    pub vc_number: u16,
    /// Legacy session key, always 0 under extended security
    pub session_key: u32,
    /// Negotiated capability bitmask
    pub capabilities: Capabilities,
    /// One fragment of the outbound security token
    pub security_blob: Vec<u8>,
    /// Client operating system name
    pub native_os: String,
    /// Client software name
    pub native_lanman: String,
    /// Session id to place in the message header; 0 until the server
    /// assigns one, then whatever the last reply carried
    pub session_id: u64,
}

impl SessionSetupRequest {
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let os = self.native_os.as_bytes();
        let lanman = self.native_lanman.as_bytes();
        let byte_count = self.security_blob.len() + os.len() + 1 + lanman.len() + 1;
        if byte_count > u16::MAX as usize {
            return Err(Error::InvalidParameter(format!(
                "Session-setup byte count {} exceeds field width",
                byte_count
            )));
        }

        let mut buf = Vec::with_capacity(SESSION_SETUP_FIXED_SIZE + byte_count);
        buf.write_u16::<LittleEndian>(self.flags)?;
        buf.write_u16::<LittleEndian>(self.max_buffer_size)?;
        buf.write_u16::<LittleEndian>(self.max_mpx_count)?;
        buf.write_u16::<LittleEndian>(self.vc_number)?;
        buf.write_u32::<LittleEndian>(self.session_key)?;
        buf.write_u16::<LittleEndian>(self.security_blob.len() as u16)?;
        buf.write_u32::<LittleEndian>(self.capabilities.bits())?;
        buf.write_u16::<LittleEndian>(byte_count as u16)?;
        buf.write_all(&self.security_blob)?;
        buf.write_all(os)?;
        buf.write_u8(0)?;
        buf.write_all(lanman)?;
        buf.write_u8(0)?;
        Ok(buf)
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < SESSION_SETUP_FIXED_SIZE {
            return Err(Error::BufferTooSmall {
                need: SESSION_SETUP_FIXED_SIZE,
                have: buf.len(),
            });
        }

        let mut cursor = io::Cursor::new(buf);
        let flags = cursor.read_u16::<LittleEndian>()?;
        let max_buffer_size = cursor.read_u16::<LittleEndian>()?;
        let max_mpx_count = cursor.read_u16::<LittleEndian>()?;
        let vc_number = cursor.read_u16::<LittleEndian>()?;
        let session_key = cursor.read_u32::<LittleEndian>()?;
        let blob_len = cursor.read_u16::<LittleEndian>()? as usize;
        let capabilities = Capabilities::from_bits_truncate(cursor.read_u32::<LittleEndian>()?);
        let byte_count = cursor.read_u16::<LittleEndian>()? as usize;

        let body = &buf[SESSION_SETUP_FIXED_SIZE..];
        if body.len() < byte_count || byte_count < blob_len {
            return Err(Error::ParseError(
                "Session-setup byte count inconsistent with message".into(),
            ));
        }

        let security_blob = body[..blob_len].to_vec();
        let mut pos = blob_len;
        let native_os = read_nul_string(&body[..byte_count], &mut pos)?;
        let native_lanman = read_nul_string(&body[..byte_count], &mut pos)?;

        Ok(Self {
            flags,
            max_buffer_size,
            max_mpx_count,
            vc_number,
            session_key,
            capabilities,
            security_blob,
            native_os,
            native_lanman,
            session_id: 0,
        })
    }
}

/// Session-setup reply: header-carried status and session id plus the
/// parsed command body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSetupReply {
    /// Status from the message header
    pub status: NtStatus,
    /// Server-assigned session id from the message header
    pub session_id: u64,
    /// Granted-action bits; GUEST means the identity was downgraded
    pub action: SessionSetupAction,
    /// One fragment of the server's security token
    pub security_blob: Vec<u8>,
    /// Server operating system name
    pub native_os: String,
    /// Server software name
    pub native_lanman: String,
}

impl SessionSetupReply {
    /// Parse the reply body; status and session id come from the header
    pub fn parse(buf: &[u8], status: NtStatus, session_id: u64) -> Result<Self> {
        if buf.len() < 6 {
            return Err(Error::BufferTooSmall {
                need: 6,
                have: buf.len(),
            });
        }

        let mut cursor = io::Cursor::new(buf);
        let action = SessionSetupAction::from_bits_truncate(cursor.read_u16::<LittleEndian>()?);
        let blob_len = cursor.read_u16::<LittleEndian>()? as usize;
        let byte_count = cursor.read_u16::<LittleEndian>()? as usize;

        let body = &buf[6..];
        if body.len() < byte_count || byte_count < blob_len {
            return Err(Error::ParseError(
                "Session-setup reply byte count inconsistent with message".into(),
            ));
        }

        let security_blob = body[..blob_len].to_vec();
        let mut pos = blob_len;
        let native_os = read_nul_string(&body[..byte_count], &mut pos)?;
        let native_lanman = read_nul_string(&body[..byte_count], &mut pos)?;

        Ok(Self {
            status,
            session_id,
            action,
            security_blob,
            native_os,
            native_lanman,
        })
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let os = self.native_os.as_bytes();
        let lanman = self.native_lanman.as_bytes();
        let byte_count = self.security_blob.len() + os.len() + 1 + lanman.len() + 1;

        let mut buf = Vec::with_capacity(6 + byte_count);
        buf.write_u16::<LittleEndian>(self.action.bits())?;
        buf.write_u16::<LittleEndian>(self.security_blob.len() as u16)?;
        buf.write_u16::<LittleEndian>(byte_count as u16)?;
        buf.write_all(&self.security_blob)?;
        buf.write_all(os)?;
        buf.write_u8(0)?;
        buf.write_all(lanman)?;
        buf.write_u8(0)?;
        Ok(buf)
    }
}

/// Read a NUL-terminated string starting at `*pos`, advancing past the
/// terminator. A missing terminator consumes the rest of the buffer.
fn read_nul_string(buf: &[u8], pos: &mut usize) -> Result<String> {
    if *pos > buf.len() {
        return Err(Error::ParseError("String offset beyond message".into()));
    }
    let rest = &buf[*pos..];
    let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
    let s = String::from_utf8_lossy(&rest[..end]).into_owned();
    *pos += (end + 1).min(rest.len());
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request(blob: Vec<u8>) -> SessionSetupRequest {
        SessionSetupRequest {
            flags: 0,
            max_buffer_size: 4356,
            max_mpx_count: 50,
            vc_number: 1,
            session_key: 0,
            capabilities: Capabilities::EXTENDED_SECURITY | Capabilities::NT_SMBS,
            security_blob: blob,
            native_os: "Unix".into(),
            native_lanman: "smb-gss".into(),
            session_id: 0,
        }
    }

    #[test]
    fn test_request_blob_and_strings_survive_the_wire() {
        let req = sample_request(vec![0xA1, 0x07, 0x30, 0x05]);
        let bytes = req.serialize().unwrap();
        let parsed = SessionSetupRequest::parse(&bytes).unwrap();

        assert_eq!(parsed.security_blob, req.security_blob);
        assert_eq!(parsed.native_os, "Unix");
        assert_eq!(parsed.native_lanman, "smb-gss");
        assert_eq!(parsed.capabilities, req.capabilities);
        assert_eq!(parsed.vc_number, 1);
    }

    #[test]
    fn test_request_empty_blob_is_legal() {
        let req = sample_request(Vec::new());
        let parsed = SessionSetupRequest::parse(&req.serialize().unwrap()).unwrap();
        assert!(parsed.security_blob.is_empty());
    }

    #[test]
    fn test_reply_guest_action_and_blob() {
        let reply = SessionSetupReply {
            status: NtStatus::Success,
            session_id: 0x2200,
            action: SessionSetupAction::GUEST,
            security_blob: vec![1, 2, 3],
            native_os: "Windows Server 2019".into(),
            native_lanman: "Windows Server 2019".into(),
        };
        let bytes = reply.serialize().unwrap();
        let parsed = SessionSetupReply::parse(&bytes, NtStatus::Success, 0x2200).unwrap();
        assert!(parsed.action.contains(SessionSetupAction::GUEST));
        assert_eq!(parsed.security_blob, vec![1, 2, 3]);
        assert_eq!(parsed.native_os, "Windows Server 2019");
    }

    #[test]
    fn test_reply_truncated_byte_count_rejected() {
        let reply = SessionSetupReply {
            status: NtStatus::Success,
            session_id: 1,
            action: SessionSetupAction::empty(),
            security_blob: vec![9; 16],
            native_os: String::new(),
            native_lanman: String::new(),
        };
        let mut bytes = reply.serialize().unwrap();
        bytes.truncate(bytes.len() - 8);
        assert!(SessionSetupReply::parse(&bytes, NtStatus::Success, 1).is_err());
    }

    #[test]
    fn test_blob_longer_than_byte_count_rejected() {
        // blob length field claims more bytes than the byte count covers
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0u16.to_le_bytes()); // action
        bytes.extend_from_slice(&10u16.to_le_bytes()); // blob length
        bytes.extend_from_slice(&4u16.to_le_bytes()); // byte count
        bytes.extend_from_slice(&[0u8; 4]);
        assert!(SessionSetupReply::parse(&bytes, NtStatus::Success, 0).is_err());
    }
}
