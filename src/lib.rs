//! Client-side SMB session establishment.
//!
//! Drives the multi-round GSS (SPNEGO/NTLMSSP/Kerberos) handshake that turns a
//! negotiated SMB connection into a signed, authenticated session. The security
//! mechanism itself lives in a privileged out-of-process authentication service
//! reached through the [`gss::AuthService`] trait; the wire side of the
//! handshake goes through the [`transport::SetupTransport`] trait. This crate
//! owns only the plumbing in between: token fragmentation and reassembly,
//! session-signing key installation, credential pinning, and recovery from the
//! authentication service restarting mid-handshake.

#![allow(missing_docs)]
#![forbid(unsafe_code)]

pub mod connection;
pub mod error;
pub mod gss;
pub mod protocol;
pub mod transport;

pub use connection::{Connection, ConnectionConfig};
pub use error::{Error, Result};
pub use gss::negotiate::{establish_session, teardown_session};
pub use gss::{AuthContext, GrantedAction};
