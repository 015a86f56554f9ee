//! EDHOC (RFC 9528) responder plumbing and the EDHOC+OSCORE combined
//! request (RFC 9668).
//!
//! The handshake math lives behind
//! [`EdhocDriver`](crate::crypto::EdhocDriver); what is here is the part
//! a transport has to get right anyway:
//!
//! - [`session`]: the bounded C_R-keyed session table and the RFC 9528
//!   appendix A.1 derivation of OSCORE material from PRK_out;
//! - [`transport`]: the `/.well-known/edhoc` POST handler with its
//!   Content-Format rules and payload-prefix dispatch;
//! - [`combined`]: splitting and building `EDHOC_MSG_3 || OSCORE_PAYLOAD`
//!   bodies;
//! - [`outer_block`]: reassembling combined requests that arrived as an
//!   outer Block1 series before any of the above may run.

pub mod combined;
pub mod outer_block;
pub mod session;
pub mod transport;

pub use combined::*;
pub use outer_block::*;
pub use session::*;
pub use transport::*;

/// EDHOC exporter label for the OSCORE Master Secret
/// (RFC 9528 appendix A.1).
pub const EXPORTER_LABEL_MASTER_SECRET: u32 = 0;

/// EDHOC exporter label for the OSCORE Master Salt.
pub const EXPORTER_LABEL_MASTER_SALT: u32 = 1;

/// OSCORE Master Secret length for the default ciphersuite
/// (AES-CCM-16-64-128).
pub const MASTER_SECRET_LEN: usize = 16;

/// OSCORE Master Salt length.
pub const MASTER_SALT_LEN: usize = 8;
