//! SMB protocol definitions for session establishment

pub mod constants;
pub mod session;

pub use constants::{Capabilities, SessionSetupAction};
pub use session::{SessionSetupReply, SessionSetupRequest};
