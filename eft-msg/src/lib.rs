//! `eft-msg` is the wire layer of the `eft` CoAP stack.
//!
//! It is **just** concerned with the data structures involved on machines
//! having a CoAP conversation: the fixed header, token, option sequence and
//! payload of RFC 7252 messages, plus the option extensions used by the
//! security runtime (OSCORE option 9, Hop-Limit 16, Q-Block1 19, EDHOC 21,
//! Block2 23, Block1 27, Q-Block2 31, Echo 252, No-Response 258,
//! Request-Tag 292).
//!
//! Two ways of producing wire bytes are provided:
//! - [`Message`] + [`TryIntoBytes`]: an owned, map-backed message whose
//!   serializer emits options in ascending numeric order.
//! - [`build::PacketBuilder`]: an incremental encoder for callers that
//!   need to append options in wire order themselves (and be told when
//!   they get the order wrong).
//!
//! For the runtime that uses this library (exchange caches, OSCORE,
//! EDHOC, blockwise, Echo), see the sibling `eft` crate.

// docs
#![cfg_attr(any(docsrs, feature = "docs"), feature(doc_cfg))]
// -
// deny
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![cfg_attr(not(test), deny(unsafe_code))]

/// Incremental wire-order packet building
pub mod build;

/// Message structures
pub mod msg;

mod from_bytes;
mod to_bytes;

pub use from_bytes::TryFromBytes;
pub use msg::*;
pub use to_bytes::{MessageToBytesError, TryIntoBytes};

#[cfg(test)]
pub(crate) fn test_msg() -> (Message, Vec<u8>) {
  let header: [u8; 4] = 0b_01_00_0001_01000101_0000000000000001u32.to_be_bytes();
  let token: [u8; 1] = [254u8];
  let content_format: &[u8] = b"application/json";
  let options: [&[u8]; 2] = [&[0b_1100_1101u8, 0b00000011u8], content_format];
  let payload: [&[u8]; 2] = [&[0b_11111111u8], b"hello, world!"];

  let bytes = [&header, token.as_ref(), options.concat().as_ref(), payload.concat().as_ref()].concat();

  let mut msg = Message::new(Type::Con, Code::new(2, 5), Id(1), Token(tinyvec::array_vec!([u8; 8] => 254)));
  msg.add(known::no_repeat::CONTENT_FORMAT,
          OptValue(content_format.to_vec()))
     .ok();
  msg.payload = Payload(b"hello, world!".to_vec());

  (msg, bytes)
}
