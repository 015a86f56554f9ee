//! The EDHOC+OSCORE combined request body (RFC 9668 section 3.2):
//! `COMB_PAYLOAD = EDHOC_MSG_3 || OSCORE_PAYLOAD`, where EDHOC_MSG_3 is
//! a CBOR byte string and OSCORE_PAYLOAD is everything after it.
//!
//! The split is defined over the bstr length prefix itself, so it is
//! parsed by hand here rather than through a CBOR library: the
//! interesting part is exactly which header encodings are allowed.

use eft_msg::{Message, Payload};

/// Ways a combined body can be unusable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombinedError {
  /// The payload does not begin with a CBOR byte string (major type 2)
  NotAByteString,
  /// 8-byte lengths (additional info 27) and reserved encodings are
  /// refused outright
  ReservedLength,
  /// The declared EDHOC_MSG_3 length runs past the payload
  Truncated,
  /// Nothing followed EDHOC_MSG_3; RFC 9668 requires both parts
  MissingOscorePayload,
  /// The OSCORE packet to combine carries no ciphertext
  MissingCiphertext,
  /// `|EDHOC_MSG_3| + |OSCORE_PAYLOAD|` crossed MAX_UNFRAGMENTED_SIZE
  PayloadTooLarge {
    /// The configured ceiling
    limit: usize,
  },
}

/// Split a combined body into `(EDHOC_MSG_3, OSCORE_PAYLOAD)`.
///
/// The returned EDHOC_MSG_3 slice **includes** its CBOR bstr header;
/// that is how it is relayed to EDHOC processing.
///
/// Accepted length encodings (RFC 8949 major type 2):
/// 1-byte header for 0..=23, 2-byte for 24..=255, 3-byte for
/// 256..=65535, 5-byte for 65536..=2^32-1. Additional info 27 (8-byte)
/// and the reserved values 28..=30 are rejected.
pub fn split_comb_payload(payload: &[u8]) -> Result<(&[u8], &[u8]), CombinedError> {
  let initial = *payload.first().ok_or(CombinedError::Truncated)?;

  if initial >> 5 != 2 {
    return Err(CombinedError::NotAByteString);
  }

  let additional = (initial & 0x1F) as usize;

  let (header_len, data_len) = match additional {
    | n if n < 24 => (1, n),
    | 24 => {
      let b = *payload.get(1).ok_or(CombinedError::Truncated)?;
      (2, b as usize)
    },
    | 25 => match payload.get(1..3) {
      | Some(&[a, b]) => (3, u16::from_be_bytes([a, b]) as usize),
      | _ => return Err(CombinedError::Truncated),
    },
    | 26 => match payload.get(1..5) {
      | Some(&[a, b, c, d]) => (5, u32::from_be_bytes([a, b, c, d]) as usize),
      | _ => return Err(CombinedError::Truncated),
    },
    | _ => return Err(CombinedError::ReservedLength),
  };

  let total = header_len + data_len;
  if total > payload.len() {
    return Err(CombinedError::Truncated);
  }

  let (edhoc_msg3, oscore_payload) = payload.split_at(total);

  if oscore_payload.is_empty() {
    return Err(CombinedError::MissingOscorePayload);
  }

  Ok((edhoc_msg3, oscore_payload))
}

/// Whether a plaintext request is the first inner block of its
/// operation: Block1 with NUM 0, or no Block1 at all.
///
/// Only that request may carry the EDHOC option in its combined outer
/// form (RFC 9668 section 3.2.2).
pub fn is_first_inner_block(plaintext: &Message) -> bool {
  plaintext.block1().map(|b| b.num() == 0).unwrap_or(true)
}

/// Build a combined request from an already-OSCORE-protected packet and
/// a CBOR-bstr-encoded EDHOC message_3 (RFC 9668 section 3.2.1).
///
/// The outer header and options are kept as they are, the empty EDHOC
/// option lands in its numeric slot, and the payload becomes
/// `EDHOC_MSG_3 || OSCORE_PAYLOAD`.
pub fn build_combined_request(oscore_pkt: &Message,
                              edhoc_msg3: &[u8],
                              max_unfragmented_size: usize)
                              -> Result<Message, CombinedError> {
  let ciphertext = &oscore_pkt.payload.0;
  if ciphertext.is_empty() {
    return Err(CombinedError::MissingCiphertext);
  }

  if edhoc_msg3.len() + ciphertext.len() > max_unfragmented_size {
    return Err(CombinedError::PayloadTooLarge { limit: max_unfragmented_size });
  }

  let mut combined = oscore_pkt.clone();
  combined.set_edhoc().ok();
  combined.payload = Payload([edhoc_msg3, ciphertext].concat());

  Ok(combined)
}
