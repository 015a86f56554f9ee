//! OSCORE protect / unprotect message surgery.
//!
//! The inner plaintext is framed exactly as RFC 8613 section 5.3 has it:
//! the real code byte, the Class-E options, then `0xFF` and the payload
//! when one exists. Class U and I options stay on the outer message;
//! Observe rides in both so proxies can still order notifications.
//!
//! Provider failures are narrowed to [`SecurityError`] here and nowhere
//! else; the wire mapper turns those four classes into 4.02 / 4.01 /
//! 4.00 responses.

use std::collections::BTreeMap;

use eft_msg::known::no_repeat::{OBSERVE, OSCORE};
use eft_msg::registry::{attributes, OscoreClass};
use eft_msg::{Code, Id, Message, OptNumber, OptValue, OscoreOption, Payload, Token, Type};

use crate::crypto::{ContextId, Provider, ProviderError};

/// The four failure classes of the security layer
/// (RFC 8613 sections 7.4 and 8.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SecurityError {
  /// Malformed OSCORE option / compressed COSE object → 4.02
  Decode,
  /// No context for the kid → 4.01
  ContextMissing,
  /// Replay window violation (or Echo freshness demanded) → 4.01
  Replay,
  /// AEAD / KDF failure → 4.00
  Decrypt,
}

/// Narrow a provider error to its taxonomy class.
pub fn map_provider_error(e: ProviderError) -> SecurityError {
  match e {
    | ProviderError::NotValidInputPacket => SecurityError::Decode,
    | ProviderError::KidRecipientIdMismatch => SecurityError::ContextMissing,
    | ProviderError::ReplayWindowProtection => SecurityError::Replay,
    | ProviderError::DecryptionFailure | ProviderError::HkdfFailure | ProviderError::Unknown => {
      SecurityError::Decrypt
    },
  }
}

pub(crate) type OptMap = BTreeMap<OptNumber, Vec<OptValue>>;

/// Split a message's options into (inner Class E, outer Class U/I) maps.
///
/// The OSCORE option itself is rebuilt by the caller and excluded;
/// unknown options default to Class E (RFC 8613 section 4.1);
/// Observe goes to both sides.
fn split_options(msg: &Message) -> (OptMap, OptMap) {
  let mut inner = OptMap::new();
  let mut outer = OptMap::new();

  for (n, vs) in &msg.opts {
    if *n == OSCORE {
      continue;
    }

    if *n == OBSERVE {
      inner.insert(*n, vs.clone());
      outer.insert(*n, vs.clone());
      continue;
    }

    let class = attributes(*n).map(|a| a.class).unwrap_or(OscoreClass::E);
    match class {
      | OscoreClass::E => inner.insert(*n, vs.clone()),
      | OscoreClass::U | OscoreClass::I => outer.insert(*n, vs.clone()),
    };
  }

  (inner, outer)
}

/// Frame `(code, Class-E options, payload)` as an OSCORE plaintext.
pub(crate) fn plaintext_of(code: Code, inner: OptMap, payload: &[u8]) -> Result<Vec<u8>, SecurityError> {
  let mut shell = Message::new(Type::Con, code, Id(0), Token(Default::default()));
  shell.opts = inner;
  shell.payload = Payload(payload.to_vec());

  let bytes: Vec<u8> = eft_msg::TryIntoBytes::try_into_bytes(shell).map_err(|_| {
                                                                     SecurityError::Decode
                                                                   })?;

  // drop the 4-byte shell header, keep the code in front
  let mut plain = vec![bytes[1]];
  plain.extend(&bytes[4..]);
  Ok(plain)
}

/// Parse an OSCORE plaintext back into `(code, options, payload)`.
fn parse_plaintext(plain: &[u8]) -> Result<(Code, OptMap, Vec<u8>), SecurityError> {
  let code = *plain.first().ok_or(SecurityError::Decode)?;

  let mut framed = vec![0x40, code, 0, 0];
  framed.extend(&plain[1..]);

  let msg =
    <Message as eft_msg::TryFromBytes<&[u8]>>::try_from_bytes(framed.as_slice()).map_err(|_| {
                                                                                  SecurityError::Decode
                                                                                })?;

  Ok((msg.code, msg.opts, msg.payload.0))
}

/// Rebuild the inner message an OSCORE plaintext describes, keeping the
/// outer identity (type, MID, token, version) and the outer Class U/I
/// options so routing sees one coherent request.
pub(crate) fn rebuild_inner(outer: &Message, plain: &[u8]) -> Result<Message, SecurityError> {
  let (code, inner_opts, payload) = parse_plaintext(plain)?;

  let (_, outer_keep) = split_options(outer);

  let mut inner = Message::new(outer.ty, code, outer.id, outer.token);
  inner.ver = outer.ver;
  inner.opts = outer_keep;
  for (n, vs) in inner_opts {
    inner.opts.insert(n, vs);
  }
  inner.payload = Payload(payload);

  Ok(inner)
}

/// Unprotect an inbound request, yielding the inner request and the
/// context that verified it.
///
/// The caller MUST have established that the message carries an OSCORE
/// option.
pub fn unprotect_request<P: Provider>(provider: &mut P,
                                      msg: &Message)
                                      -> Result<(Message, ContextId), SecurityError> {
  let value = msg.oscore().ok_or(SecurityError::Decode)?;
  let opt = OscoreOption::parse(value).map_err(|_| SecurityError::Decode)?;

  let ctx = provider.kid_lookup(opt.kid, opt.kid_context)
                    .ok_or(SecurityError::ContextMissing)?;

  if msg.payload.0.is_empty() {
    return Err(SecurityError::Decode);
  }

  let plain = provider.decrypt_request(ctx, opt.piv, &msg.payload.0)
                      .map_err(map_provider_error)?;

  let inner = rebuild_inner(msg, &plain)?;

  Ok((inner, ctx))
}

/// Protect an outbound response under the context stored for its
/// exchange.
///
/// The outer code is always 2.04 Changed (RFC 8613 section 4.2); the
/// real code travels encrypted.
pub fn protect_response<P: Provider>(provider: &mut P,
                                     ctx: ContextId,
                                     response: &Message,
                                     is_observe: bool)
                                     -> Result<Message, SecurityError> {
  let (inner_opts, outer_opts) = split_options(response);
  let plain = plaintext_of(response.code, inner_opts, &response.payload.0)?;

  let (value, ciphertext) = provider.encrypt_response(ctx, &plain, is_observe)
                                    .map_err(map_provider_error)?;

  let mut outer = Message::new(response.ty, Code::CHANGED, response.id, response.token);
  outer.ver = response.ver;
  outer.opts = outer_opts;
  outer.set_oscore(&value).ok();
  outer.payload = Payload(ciphertext);

  Ok(outer)
}

/// Protect an outbound request.
///
/// The outer code is 0.02 POST, or 0.05 FETCH when the request
/// observes (RFC 8613 section 4.1.3.5).
pub fn protect_request<P: Provider>(provider: &mut P,
                                    ctx: ContextId,
                                    request: &Message)
                                    -> Result<Message, SecurityError> {
  let (inner_opts, outer_opts) = split_options(request);
  let plain = plaintext_of(request.code, inner_opts, &request.payload.0)?;

  let (value, ciphertext) = provider.encrypt_request(ctx, &plain)
                                    .map_err(map_provider_error)?;

  let outer_code = if request.observe().is_some() {
    Code::FETCH
  } else {
    Code::POST
  };

  let mut outer = Message::new(request.ty, outer_code, request.id, request.token);
  outer.ver = request.ver;
  outer.opts = outer_opts;
  outer.set_oscore(&value).ok();
  outer.payload = Payload(ciphertext);

  Ok(outer)
}

/// Verify and unprotect an inbound response.
pub fn unprotect_response<P: Provider>(provider: &mut P,
                                       ctx: ContextId,
                                       msg: &Message)
                                       -> Result<Message, SecurityError> {
  let value = msg.oscore().ok_or(SecurityError::Decode)?;

  if msg.payload.0.is_empty() {
    return Err(SecurityError::Decode);
  }

  let plain = provider.decrypt_response(ctx, value, &msg.payload.0)
                      .map_err(map_provider_error)?;

  rebuild_inner(msg, &plain)
}
