//! Request-Tag lists (RFC 9175 section 3).
//!
//! The ordered list of Request-Tag option values is part of the identity
//! of a blockwise operation: the reassembly caches key on
//! `(peer, token, request-tag list)` and a mid-operation change of the
//! list is a protocol error. The list is held serialized as
//! `[len][bytes][len][bytes]…` so it can be compared and stored as one
//! flat buffer.

use eft_msg::Message;

/// A Request-Tag option value exceeded 8 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TagTooLong(pub usize);

/// The serialized, order-preserving list of a message's Request-Tag
/// values.
///
/// The empty list (no Request-Tag options at all) is **distinct** from a
/// list containing one zero-length value (RFC 9175 section 3.4): the
/// former has `count == 0`, the latter `count == 1` with a `0x00` length
/// prefix in its bytes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RequestTagList {
  count: u8,
  bytes: Vec<u8>,
}

impl RequestTagList {
  /// Collect and serialize the Request-Tag options of a message,
  /// in option order.
  pub fn parse(msg: &Message) -> Result<Self, TagTooLong> {
    let mut list = Self::default();

    if let Some(tags) = msg.request_tags() {
      for tag in tags {
        let len = tag.0.len();
        if len > 8 {
          return Err(TagTooLong(len));
        }

        list.count += 1;
        list.bytes.push(len as u8);
        list.bytes.extend(&tag.0);
      }
    }

    Ok(list)
  }

  /// How many Request-Tag options the message carried.
  pub fn count(&self) -> u8 {
    self.count
  }

  /// Whether no Request-Tag option was present at all.
  pub fn is_absent(&self) -> bool {
    self.count == 0
  }

  /// The length-prefixed serialization.
  pub fn serialized(&self) -> &[u8] {
    &self.bytes
  }
}

#[cfg(test)]
mod tests {
  use eft_msg::{Code, Type};

  use super::*;
  use crate::test::msg;

  fn req() -> Message {
    msg(Type::Con, Code::POST, 1, b"t")
  }

  #[test]
  fn absent_is_distinct_from_single_empty() {
    let absent = RequestTagList::parse(&req()).unwrap();

    let mut with_empty = req();
    with_empty.add_request_tag(&[]).unwrap();
    let with_empty = RequestTagList::parse(&with_empty).unwrap();

    assert!(absent.is_absent());
    assert!(!with_empty.is_absent());
    assert_ne!(absent, with_empty);
    assert_eq!(with_empty.serialized(), &[0u8]);
  }

  #[test]
  fn serialization_is_length_prefixed_and_ordered() {
    let mut m = req();
    m.add_request_tag(&[0xAA, 0xBB]).unwrap();
    m.add_request_tag(&[0xCC]).unwrap();

    let list = RequestTagList::parse(&m).unwrap();
    assert_eq!(list.count(), 2);
    assert_eq!(list.serialized(), &[2, 0xAA, 0xBB, 1, 0xCC]);
  }

  #[test]
  fn equality_is_exact() {
    let mut a = req();
    a.add_request_tag(&[1]).unwrap();

    let mut b = req();
    b.add_request_tag(&[1]).unwrap();

    let mut c = req();
    c.add_request_tag(&[2]).unwrap();

    assert_eq!(RequestTagList::parse(&a).unwrap(),
               RequestTagList::parse(&b).unwrap());
    assert_ne!(RequestTagList::parse(&a).unwrap(),
               RequestTagList::parse(&c).unwrap());
  }

  #[test]
  fn oversized_tags_are_rejected() {
    let mut m = req();
    m.add_request_tag(&[0; 9]).unwrap();
    assert_eq!(RequestTagList::parse(&m).unwrap_err(), TagTooLong(9));
  }
}
