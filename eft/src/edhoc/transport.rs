//! The `/.well-known/edhoc` resource (RFC 9528 appendix A.2).
//!
//! POST only. Client→server bodies are `application/cid-edhoc+cbor-seq`
//! (65): a connection-identifier prefix, then the EDHOC message. A
//! leading CBOR `true` (0xF5) marks message_1; a CBOR integer in 0..=23
//! or a byte string is the C_R of the session whose message_3 follows.
//! Server→client bodies use `application/edhoc+cbor-seq` (64), which is
//! also why 64 is rejected on the way in.

use eft_msg::{known, Code, ContentFormat, Message};
use embedded_time::Instant;

use crate::crypto::{ContextId, DriverError, EdhocDriver, Provider};
use crate::edhoc::session::{derive_oscore_material, SessionState, SessionTable};
use crate::time::Clock;

/// What the dispatcher sends back on success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdhocReply {
  /// message_2, or message_4 / empty for a completed handshake.
  /// Served as 2.04 Changed with Content-Format 64.
  pub payload: Vec<u8>,
  /// The OSCORE context installed on handshake completion.
  pub installed: Option<ContextId>,
}

/// Transport-level failures of the EDHOC resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdhocTransportError {
  /// Anything but POST → 4.05
  MethodNotAllowed,
  /// Missing or wrong Content-Format (including 64 inbound) → 4.15
  UnsupportedContentFormat,
  /// More than one Content-Format option → 4.00
  DuplicateContentFormat,
  /// EDHOC processing failed → 4.00 / 5.00 with a CBOR Sequence body
  Protocol(DriverError),
}

/// Encode an EDHOC error body: the CBOR Sequence
/// `(ERR_CODE: uint, ERR_INFO: tstr)` of RFC 9528 section 6.
pub fn encode_error(code: u8, info: &str) -> Vec<u8> {
  let mut buf = Vec::new();
  let mut e = minicbor::Encoder::new(&mut buf);

  // ERR_CODE stays in 0..=23 so it encodes as a single byte
  e.u8(code.min(23)).ok();
  e.str(info).ok();

  buf
}

/// Decode an EDHOC error body.
pub fn decode_error(bytes: &[u8]) -> Option<(u8, String)> {
  let mut d = minicbor::Decoder::new(bytes);
  let code = d.u8().ok()?;
  let info = d.str().ok()?;
  Some((code, info.to_string()))
}

fn c_r_prefix(payload: &[u8]) -> Result<(Vec<u8>, usize), DriverError> {
  use minicbor::data::Type;

  let mut d = minicbor::Decoder::new(payload);

  match d.datatype() {
    | Ok(Type::U8) => {
      let n = d.u8().map_err(|_| DriverError::bad_message("bad C_R integer"))?;
      if n > 23 {
        return Err(DriverError::bad_message("C_R integer out of range"));
      }
      Ok((vec![n], d.position()))
    },
    | Ok(Type::Bytes) => {
      let bytes = d.bytes().map_err(|_| DriverError::bad_message("bad C_R byte string"))?;
      if bytes.is_empty() {
        return Err(DriverError::bad_message("empty C_R"));
      }
      Ok((bytes.to_vec(), d.position()))
    },
    | _ => Err(DriverError::bad_message("invalid EDHOC payload prefix")),
  }
}

/// Verify a message_3 against its session, derive and install the
/// OSCORE context, and mark the session completed.
///
/// Shared by the `/.well-known/edhoc` POST path and the combined
/// request fast path (where C_R arrives as the OSCORE kid). Fails
/// closed: any error wipes the session first.
pub(crate) fn complete_message_3<C, D, P>(sessions: &mut SessionTable<C>,
                                          driver: &mut D,
                                          provider: &mut P,
                                          c_r: &[u8],
                                          msg3: &[u8])
                                          -> Result<(ContextId, Option<Vec<u8>>), DriverError>
  where C: Clock,
        D: EdhocDriver,
        P: Provider
{
  let transcript_hash = match sessions.find_mut(c_r) {
    | Some(s) if s.state == SessionState::WaitMsg3 => s.transcript_hash.clone(),
    | Some(_) => return Err(DriverError::bad_message("handshake already completed")),
    | None => return Err(DriverError::bad_message("unknown C_R")),
  };

  let summary = match driver.message_3(c_r, &transcript_hash, msg3) {
    | Ok(summary) => summary,
    | Err(e) => {
      sessions.remove(c_r);
      return Err(e);
    },
  };

  let material = match sessions.find_mut(c_r) {
    | Some(s) => {
      s.prk_out = summary.prk_out.clone();
      s.state = SessionState::Completed;
      derive_oscore_material(driver, s)
    },
    | None => Err(DriverError::internal("session vanished mid-handshake")),
  };

  let material = match material {
    | Ok(m) => m,
    | Err(e) => {
      sessions.remove(c_r);
      return Err(e);
    },
  };

  match provider.install_context(material) {
    | Ok(ctx) => {
      log::debug!("edhoc: handshake completed, C_R={:?}", c_r);
      Ok((ctx, summary.message_4.clone()))
    },
    | Err(_) => {
      sessions.remove(c_r);
      Err(DriverError::internal("context install failed"))
    },
  }
}

/// Handle a request POSTed to `/.well-known/edhoc`.
pub fn handle_well_known_edhoc<C, D, P>(req: &Message,
                                        sessions: &mut SessionTable<C>,
                                        driver: &mut D,
                                        provider: &mut P,
                                        now: Instant<C>)
                                        -> Result<EdhocReply, EdhocTransportError>
  where C: Clock,
        D: EdhocDriver,
        P: Provider
{
  if req.code != Code::POST {
    return Err(EdhocTransportError::MethodNotAllowed);
  }

  if req.count(known::no_repeat::CONTENT_FORMAT) > 1 {
    return Err(EdhocTransportError::DuplicateContentFormat);
  }

  match req.content_format() {
    | Some(ContentFormat::CidEdhocCborSeq) => (),
    | _ => return Err(EdhocTransportError::UnsupportedContentFormat),
  }

  let payload = &req.payload.0;
  if payload.is_empty() {
    return Err(EdhocTransportError::Protocol(DriverError::bad_message("empty EDHOC payload")));
  }

  // CBOR true: message_1 follows
  if payload[0] == 0xF5 {
    let c_r = sessions.allocate_c_r(now);
    let summary = driver.message_1(&payload[1..], &c_r)
                        .map_err(EdhocTransportError::Protocol)?;

    log::debug!("edhoc: session opened, C_R={:?}", c_r);
    sessions.insert(c_r, summary.c_i, summary.transcript_hash, false, now);

    return Ok(EdhocReply { payload: summary.message_2,
                           installed: None });
  }

  // otherwise: C_R prefix, then message_3
  let (c_r, consumed) = c_r_prefix(payload).map_err(EdhocTransportError::Protocol)?;

  let msg3 = &payload[consumed..];
  if msg3.is_empty() {
    return Err(EdhocTransportError::Protocol(DriverError::bad_message("missing message_3")));
  }

  let (installed, message_4) =
    complete_message_3(sessions, driver, provider, &c_r, msg3).map_err(EdhocTransportError::Protocol)?;

  Ok(EdhocReply { payload: message_4.unwrap_or_default(),
                  installed: Some(installed) })
}

#[cfg(test)]
mod tests {
  use eft_msg::{Id, Payload, Token, Type};

  use super::*;
  use crate::config::Security;
  use crate::test::{ClockMock, MockDriver, MockProvider};

  fn post(payload: &[u8]) -> Message {
    let mut m = Message::new(Type::Con, Code::POST, Id(1), Token::from_slice(b"t"));
    m.set_path(".well-known/edhoc").unwrap();
    m.set_content_format(ContentFormat::CidEdhocCborSeq).unwrap();
    m.payload = Payload(payload.to_vec());
    m
  }

  fn fixtures() -> (ClockMock, SessionTable<ClockMock>, MockDriver, MockProvider) {
    (ClockMock::new(),
     SessionTable::new(&Security::default()),
     MockDriver::new(),
     MockProvider::new())
  }

  #[test]
  fn true_prefix_opens_a_session_and_returns_message_2() {
    let (clock, mut sessions, mut driver, mut provider) = fixtures();

    let req = post(&[&[0xF5u8] as &[u8], b"MSG1"].concat());
    let reply =
      handle_well_known_edhoc(&req, &mut sessions, &mut driver, &mut provider, clock.now()).unwrap();

    assert_eq!(reply.payload, b"MSG2:\x00");
    assert_eq!(reply.installed, None);

    let s = sessions.find_mut(&[0]).unwrap();
    assert_eq!(s.state, SessionState::WaitMsg3);
    assert_eq!(s.c_i, vec![0x0A]);
  }

  #[test]
  fn message_3_completes_and_installs_a_context() {
    let (clock, mut sessions, mut driver, mut provider) = fixtures();

    let msg1 = post(&[&[0xF5u8] as &[u8], b"MSG1"].concat());
    handle_well_known_edhoc(&msg1, &mut sessions, &mut driver, &mut provider, clock.now()).unwrap();

    // C_R 0 as a one-byte CBOR integer, then message_3
    let msg3 = post(&[&[0x00u8] as &[u8], b"MSG3"].concat());
    let reply =
      handle_well_known_edhoc(&msg3, &mut sessions, &mut driver, &mut provider, clock.now()).unwrap();

    assert_eq!(reply.payload, Vec::<u8>::new());
    let ctx = reply.installed.unwrap();

    let (installed_ctx, material) = &provider.installed[0];
    assert_eq!(*installed_ctx, ctx);
    assert_eq!(material.master_secret, vec![0xA5; 16]);
    assert_eq!(material.master_salt, vec![0x5A; 8]);
    assert_eq!(material.sender_id, vec![0x0A]); // C_I
    assert_eq!(material.recipient_id, vec![0x00]); // C_R

    assert_eq!(sessions.find_mut(&[0]).unwrap().state, SessionState::Completed);
  }

  #[test]
  fn c_r_may_also_be_a_byte_string() {
    let (clock, mut sessions, mut driver, mut provider) = fixtures();

    // open a session, then rename it to a bstr C_R to exercise the path
    let msg1 = post(&[&[0xF5u8] as &[u8], b"MSG1"].concat());
    handle_well_known_edhoc(&msg1, &mut sessions, &mut driver, &mut provider, clock.now()).unwrap();
    sessions.find_mut(&[0]).unwrap().c_r = vec![0xDE, 0xAD];

    // 0x42 = bstr of length 2
    let msg3 = post(&[&[0x42u8, 0xDE, 0xAD] as &[u8], b"MSG3"].concat());
    let reply =
      handle_well_known_edhoc(&msg3, &mut sessions, &mut driver, &mut provider, clock.now()).unwrap();
    assert!(reply.installed.is_some());
  }

  #[test]
  fn only_post_is_allowed() {
    let (clock, mut sessions, mut driver, mut provider) = fixtures();

    let mut req = post(&[0xF5]);
    req.code = Code::GET;

    assert_eq!(handle_well_known_edhoc(&req, &mut sessions, &mut driver, &mut provider, clock.now()),
               Err(EdhocTransportError::MethodNotAllowed));
  }

  #[test]
  fn content_format_rules() {
    let (clock, mut sessions, mut driver, mut provider) = fixtures();

    // missing
    let mut req = post(&[0xF5]);
    req.remove(known::no_repeat::CONTENT_FORMAT);
    assert_eq!(handle_well_known_edhoc(&req, &mut sessions, &mut driver, &mut provider, clock.now()),
               Err(EdhocTransportError::UnsupportedContentFormat));

    // 64 is server -> client only
    let mut req = post(&[0xF5]);
    req.set_content_format(ContentFormat::EdhocCborSeq).unwrap();
    assert_eq!(handle_well_known_edhoc(&req, &mut sessions, &mut driver, &mut provider, clock.now()),
               Err(EdhocTransportError::UnsupportedContentFormat));

    // duplicates are their own failure
    let mut req = post(&[0xF5]);
    req.add(known::no_repeat::CONTENT_FORMAT, eft_msg::OptValue(vec![65])).unwrap();
    assert_eq!(handle_well_known_edhoc(&req, &mut sessions, &mut driver, &mut provider, clock.now()),
               Err(EdhocTransportError::DuplicateContentFormat));
  }

  #[test]
  fn bad_payloads_are_protocol_errors() {
    let (clock, mut sessions, mut driver, mut provider) = fixtures();

    for payload in [&[] as &[u8], &[0xF7], &[0x20], &[0x00]] {
      let req = post(payload);
      let err =
        handle_well_known_edhoc(&req, &mut sessions, &mut driver, &mut provider, clock.now()).unwrap_err();
      assert!(matches!(err, EdhocTransportError::Protocol(_)), "{payload:?}");
    }
  }

  #[test]
  fn driver_rejection_wipes_the_session() {
    let (clock, mut sessions, mut driver, mut provider) = fixtures();

    let msg1 = post(&[&[0xF5u8] as &[u8], b"MSG1"].concat());
    handle_well_known_edhoc(&msg1, &mut sessions, &mut driver, &mut provider, clock.now()).unwrap();

    driver.fail_message_3 = Some(DriverError::bad_message("MAC mismatch"));

    let msg3 = post(&[&[0x00u8] as &[u8], b"MSG3"].concat());
    let err =
      handle_well_known_edhoc(&msg3, &mut sessions, &mut driver, &mut provider, clock.now()).unwrap_err();

    assert!(matches!(err, EdhocTransportError::Protocol(e) if e.info == "MAC mismatch"));
    assert!(sessions.is_empty());
  }

  #[test]
  fn error_bodies_are_cbor_sequences() {
    let body = encode_error(1, "MAC mismatch");
    // 0x01, then tstr(12)
    assert_eq!(body[0], 0x01);
    assert_eq!(body[1], 0x60 | 12);
    assert_eq!(&body[2..], b"MAC mismatch");

    assert_eq!(decode_error(&body), Some((1, "MAC mismatch".to_string())));
  }
}
