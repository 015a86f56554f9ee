//! Incremental, wire-order packet building.
//!
//! [`Message`](crate::Message) keeps options in a map and serializes them
//! sorted, which is what most callers want. Code that reconstructs or
//! rewrites packets byte-for-byte (blockwise reassembly templates, the
//! EDHOC+OSCORE combined request) instead appends options one at a time in
//! the order they must appear on the wire; [`PacketBuilder`] models that
//! and reports misuse instead of silently emitting a corrupt delta chain.

use crate::to_bytes::opt_len_or_delta;
use crate::{Code, Id, OptNumber, Type, Version};

/// Errors encounterable while building a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BuildError {
  /// Token was longer than 8 bytes
  InvalidTokenLength(usize),

  /// [`PacketBuilder::append_option`] was called with an option number
  /// lower than one already appended
  OrderViolation {
    /// Highest number appended so far
    last: OptNumber,
    /// The out-of-order number
    attempted: OptNumber,
  },

  /// [`PacketBuilder::append_payload`] was called before
  /// [`PacketBuilder::append_payload_marker`]
  PayloadWithoutMarker,

  /// The payload marker was appended but no payload bytes followed it
  MarkerWithoutPayload,
}

/// An incremental CoAP packet encoder.
///
/// ```
/// use eft_msg::build::PacketBuilder;
/// use eft_msg::{known, Code, Id, Type, Version};
///
/// let mut b = PacketBuilder::init(Version::default(),
///                                 Type::Non,
///                                 b"token",
///                                 Code::new(5, 5),
///                                 Id(0x1234)).unwrap();
/// b.append_option(known::no_repeat::CONTENT_FORMAT, &[]).unwrap();
/// b.append_payload_marker();
/// b.append_payload(b"payload\0").unwrap();
///
/// let expected: Vec<u8> = [&[0x55, 0xA5, 0x12, 0x34][..],
///                          b"token",
///                          &[0xC0, 0xFF],
///                          b"payload\0"].concat();
/// assert_eq!(b.finish().unwrap(), expected);
/// ```
#[derive(Debug, Clone)]
pub struct PacketBuilder {
  header: Vec<u8>,
  opts: Vec<(OptNumber, Vec<u8>)>,
  marker: bool,
  payload: Vec<u8>,
}

impl PacketBuilder {
  /// Start a packet with the fixed header and token.
  pub fn init(ver: Version,
              ty: Type,
              token: &[u8],
              code: Code,
              id: Id)
              -> Result<Self, BuildError> {
    if token.len() > 8 {
      return Err(BuildError::InvalidTokenLength(token.len()));
    }

    let byte1 = (ver.0 << 6) | (u8::from(ty) << 4) | token.len() as u8;

    let mut header = vec![byte1, code.into()];
    header.extend(id.0.to_be_bytes());
    header.extend(token);

    Ok(Self { header,
              opts: Vec::new(),
              marker: false,
              payload: Vec::new() })
  }

  /// The highest option number appended so far.
  fn last_number(&self) -> OptNumber {
    self.opts.last().map(|(n, _)| *n).unwrap_or(OptNumber(0))
  }

  /// Append an option.
  ///
  /// Numbers MUST be non-decreasing across calls; anything else would
  /// require a negative delta on the wire.
  pub fn append_option(&mut self, number: OptNumber, value: &[u8]) -> Result<(), BuildError> {
    let last = self.last_number();
    if number < last {
      return Err(BuildError::OrderViolation { last,
                                              attempted: number });
    }

    self.opts.push((number, value.to_vec()));
    Ok(())
  }

  /// Remove all occurrences of an option.
  ///
  /// The deltas of every successor are re-derived when the packet is
  /// encoded, and any payload already appended is untouched.
  pub fn remove_option(&mut self, number: OptNumber) {
    self.opts.retain(|(n, _)| *n != number);
  }

  /// Append the 0xFF payload marker.
  pub fn append_payload_marker(&mut self) {
    self.marker = true;
  }

  /// Append payload bytes after the marker.
  ///
  /// May be called repeatedly; the fragments are concatenated.
  pub fn append_payload(&mut self, bytes: &[u8]) -> Result<(), BuildError> {
    if !self.marker {
      return Err(BuildError::PayloadWithoutMarker);
    }

    self.payload.extend(bytes);
    Ok(())
  }

  /// Encode the packet.
  pub fn finish(self) -> Result<Vec<u8>, BuildError> {
    if self.marker && self.payload.is_empty() {
      return Err(BuildError::MarkerWithoutPayload);
    }

    let mut bytes = self.header;

    let mut last = OptNumber(0);
    for (number, value) in self.opts {
      let OptNumber(delta) = number - last;
      last = number;

      let (del, del_ext) = opt_len_or_delta(delta as u16);
      let (len, len_ext) = opt_len_or_delta(value.len() as u16);

      bytes.push(del << 4 | len);

      if let Some(ext) = del_ext {
        bytes.extend(ext);
      }

      if let Some(ext) = len_ext {
        bytes.extend(ext);
      }

      bytes.extend(value);
    }

    if self.marker {
      bytes.push(0xFF);
      bytes.extend(self.payload);
    }

    Ok(bytes)
  }
}
