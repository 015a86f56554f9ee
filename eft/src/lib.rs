//! `eft` is a hardened CoAP runtime: the RFC 7252 core with the modern
//! security stack layered in the order the RFCs demand.
//!
//! - **OSCORE** (RFC 8613) object security, with a per-exchange context
//!   table so responses and Observe notifications are protected with the
//!   context that verified their request;
//! - **EDHOC** (RFC 9528) responder sessions over `/.well-known/edhoc`,
//!   deriving OSCORE contexts on completion;
//! - the **EDHOC+OSCORE combined request** (RFC 9668), including outer
//!   Block1 reassembly of oversized combined bodies;
//! - **blockwise transfer** (RFC 7959) and its Q-Block sibling
//!   (RFC 9177), which never mix in one message;
//! - the **Echo** amplification mitigation (RFC 9175) for
//!   state-changing requests from unverified peers;
//! - **Request-Tag** (RFC 9175) blockwise operation identity;
//! - the **Hop-Limit** proxy loop-breaker (RFC 8768).
//!
//! The cryptographic primitives (AEAD, HKDF, the EDHOC message math) are
//! collaborators behind the traits in [`crypto`]; this crate owns the
//! bookkeeping, the caches and the error taxonomy. Wire parsing and
//! serialization live in the sibling `eft-msg` crate.
//!
//! All process-wide tables are fixed-capacity, mutex-guarded, LRU-evicted
//! and TTL-expired on lookup; anything that held key material is wiped
//! before its slot is reused.

// docs
#![cfg_attr(any(docsrs, feature = "docs"), feature(doc_cfg))]
// -
// deny
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![cfg_attr(not(test), deny(unsafe_code))]


pub(crate) mod logging;

/// Blockwise transfer engine
pub mod block;

/// Blocking CoAP client
pub mod client;

/// Configuring runtime behavior
pub mod config;

/// Crypto collaborator seams
pub mod crypto;

/// Echo amplification mitigation
pub mod echo;

/// EDHOC sessions, transport, combined requests
pub mod edhoc;

/// Error taxonomy & the wire mapper
pub mod error;

/// Hop-Limit proxy loop-breaker
pub mod hop_limit;

/// Reply matching & reply slots
pub mod matcher;

/// Network abstractions
pub mod net;

/// Observer registry & notification ages
pub mod observe;

/// OSCORE protection & the exchange table
pub mod oscore;

/// Confirmable retransmission
pub mod pending;

/// Request-Tag lists
pub mod reqtag;

/// Secret hygiene helpers
pub mod secure;

/// CoAP server service
pub mod server;

/// `std`-backed clock & socket
pub mod std;

/// Sequence-based token generation
pub mod token;

/// Time abstractions
pub mod time;
