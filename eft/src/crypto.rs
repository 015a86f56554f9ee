//! Collaborator seams for the cryptography this runtime does **not**
//! implement: the OSCORE AEAD/HKDF provider and the EDHOC message driver.
//!
//! The runtime's own job is bookkeeping and the error taxonomy; anything
//! touching keys lives behind these traits. Tests script them (see
//! `crate::test`), deployments wire in a real library.

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Opaque handle to an OSCORE security context owned by the
/// [`Provider`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextId(pub u32);

/// Error classes a [`Provider`] may return.
///
/// The classes matter more than the cases: the single wire mapper
/// ([`crate::error`]) turns each class into exactly one response code
/// (RFC 8613 sections 7.4 and 8.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProviderError {
  /// Decode / parse / option-length failure. Maps to 4.02 Bad Option.
  NotValidInputPacket,
  /// No recipient context for the kid. Maps to 4.01 Unauthorized.
  KidRecipientIdMismatch,
  /// Partial IV fell outside the replay window. Maps to 4.01
  /// Unauthorized.
  ReplayWindowProtection,
  /// AEAD integrity check failed. Maps to 4.00 Bad Request.
  DecryptionFailure,
  /// Key derivation failed. Maps to 4.00 Bad Request.
  HkdfFailure,
  /// Anything else. Maps to 4.00 Bad Request.
  Unknown,
}

/// Key material for instantiating an OSCORE context
/// (RFC 8613 section 3.2).
///
/// Zeroed on drop; the provider copies what it needs.
#[derive(Debug, Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct OscoreMaterial {
  /// The OSCORE master secret
  pub master_secret: Vec<u8>,
  /// The OSCORE master salt
  pub master_salt: Vec<u8>,
  /// Our Sender ID
  pub sender_id: Vec<u8>,
  /// The peer's Sender ID (our Recipient ID)
  pub recipient_id: Vec<u8>,
}

/// The OSCORE crypto provider collaborator.
///
/// Owns security contexts, sequence numbers and replay windows. The
/// runtime hands it OSCORE plaintexts/ciphertexts (RFC 8613 section 5.3
/// format: code, Class-E options, payload) and stores only [`ContextId`]
/// handles.
pub trait Provider {
  /// Find the recipient context matching a kid / kid-context pair from an
  /// inbound OSCORE option.
  fn kid_lookup(&self, kid: Option<&[u8]>, kid_context: Option<&[u8]>) -> Option<ContextId>;

  /// Verify and decrypt an inbound request ciphertext, enforcing the
  /// replay window against `piv`.
  fn decrypt_request(&mut self,
                     ctx: ContextId,
                     piv: Option<&[u8]>,
                     ciphertext: &[u8])
                     -> Result<Vec<u8>, ProviderError>;

  /// Encrypt an outbound response plaintext under a stored request
  /// context. Returns `(oscore option value, ciphertext)`; the option
  /// value carries a Partial IV when `observe` demands one.
  fn encrypt_response(&mut self,
                      ctx: ContextId,
                      plaintext: &[u8],
                      observe: bool)
                      -> Result<(Vec<u8>, Vec<u8>), ProviderError>;

  /// Encrypt an outbound request plaintext.
  /// Returns `(oscore option value, ciphertext)`.
  fn encrypt_request(&mut self, ctx: ContextId, plaintext: &[u8])
                     -> Result<(Vec<u8>, Vec<u8>), ProviderError>;

  /// Verify and decrypt an inbound response ciphertext.
  fn decrypt_response(&mut self,
                      ctx: ContextId,
                      oscore_value: &[u8],
                      ciphertext: &[u8])
                      -> Result<Vec<u8>, ProviderError>;

  /// Instantiate a context from EDHOC-derived material with
  /// AEAD AES-CCM-16-64-128 and HKDF-SHA-256 (RFC 9528 appendix A.1).
  fn install_context(&mut self, material: OscoreMaterial) -> Result<ContextId, ProviderError>;

  /// Drop a context, wiping its key material.
  fn discard_context(&mut self, ctx: ContextId);

  /// Fill `out` from the provider's CSPRNG.
  fn random_bytes(&mut self, out: &mut [u8]);
}

/// An EDHOC processing failure, carried verbatim into the CBOR Sequence
/// error body (RFC 9528 section 6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverError {
  /// ERR_CODE, constrained to 0..=23 so it encodes as one byte
  pub code: u8,
  /// ERR_INFO diagnostic text
  pub info: String,
  /// Whether the failure was ours (5.00) rather than the peer's (4.00)
  pub server_fault: bool,
}

impl DriverError {
  /// A peer-attributable failure
  pub fn bad_message(info: impl Into<String>) -> Self {
    Self { code: 1,
           info: info.into(),
           server_fault: false }
  }

  /// A failure on our side
  pub fn internal(info: impl Into<String>) -> Self {
    Self { code: 1,
           info: info.into(),
           server_fault: true }
  }
}

/// Outcome of processing an inbound EDHOC message_1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message1Summary {
  /// The message_2 to return to the initiator
  pub message_2: Vec<u8>,
  /// The initiator's connection identifier C_I
  pub c_i: Vec<u8>,
  /// Running transcript hash after message_2
  pub transcript_hash: Vec<u8>,
}

/// Outcome of processing an inbound EDHOC message_3.
#[derive(Debug, Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Message3Summary {
  /// PRK_out, the pseudorandom key feeding the exporter
  pub prk_out: Vec<u8>,
  /// message_4, when the initiator asked for one
  pub message_4: Option<Vec<u8>>,
}

/// The EDHOC message-crypto collaborator (the runtime keeps sessions,
/// the driver does the math).
pub trait EdhocDriver {
  /// Process message_1 and produce message_2 for the connection
  /// identifier `c_r` the runtime allocated.
  fn message_1(&mut self, msg1: &[u8], c_r: &[u8]) -> Result<Message1Summary, DriverError>;

  /// Verify message_3 against a session's transcript, yielding PRK_out.
  fn message_3(&mut self,
               c_r: &[u8],
               transcript_hash: &[u8],
               msg3: &[u8])
               -> Result<Message3Summary, DriverError>;

  /// EDHOC-Exporter (RFC 9528 section 4.2.1): derive `len` bytes for
  /// `label` from PRK_out.
  fn exporter(&self, prk_out: &[u8], label: u32, len: usize) -> Result<Vec<u8>, DriverError>;
}
