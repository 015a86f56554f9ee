//! OSCORE (RFC 8613) message protection.
//!
//! The AEAD, key derivation, sequence numbers and replay windows belong
//! to the [`Provider`](crate::crypto::Provider) collaborator; this module
//! owns what is left:
//!
//! - [`protect`]: the E/U option split, inner-plaintext framing and
//!   outer-message construction for both directions, plus the mapping of
//!   provider failures onto the error taxonomy;
//! - [`exchange`]: the `(peer, token)` table remembering which context
//!   protected a request, so the response (and every Observe
//!   notification after it) is protected with the same one.

pub mod exchange;
pub mod protect;

pub use exchange::{Exchange, ExchangeTable};
pub use protect::*;
