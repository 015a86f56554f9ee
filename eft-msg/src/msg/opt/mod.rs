use std::collections::BTreeMap;
use std::ops::{Add, Sub};

use tinyvec::ArrayVec;
use toad_cursor::Cursor;
use toad_len::Len;
use toad_macros::rfc_7252_doc;

use crate::from_bytes::TryConsumeBytes;

/// Option parsing error
pub mod parse_error;
pub use parse_error::*;

/// Well-known options
pub mod known;
pub use known::*;

/// Per-number option attributes (repeatability, length bounds, OSCORE class)
pub mod registry;

#[doc = rfc_7252_doc!("5.4")]
/// <details><summary><b>RFC7252 Section 3.1 Option binary format</b></summary>
#[doc = concat!("\n#", rfc_7252_doc!("3.1"))]
/// </details>
///
/// # `Opt` struct
/// Low-level representation of a CoAP Option, closely mirroring the byte
/// layout of message options.
///
/// Notably, this doesn't include the Number (key, e.g. "Content-Format" or
/// "Uri-Path"); the delta is the difference to the previous option's number
/// on the wire.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Opt {
  /// See [`OptDelta`]
  pub delta: OptDelta,
  /// See [`OptValue`]
  pub value: OptValue,
}

impl Opt {
  /// Given a collection to [`Extend`] and an Opt, add that Opt's bytes to the collection.
  pub fn extend_bytes(self, bytes: &mut impl Extend<u8>) {
    let (del, del_bytes) = crate::to_bytes::opt_len_or_delta(self.delta.0);
    let (len, len_bytes) = crate::to_bytes::opt_len_or_delta(self.value.0.len() as u16);
    let del = del << 4;

    let header = del | len;

    bytes.extend(Some(header));

    if let Some(bs) = del_bytes {
      bytes.extend(bs);
    }

    if let Some(bs) = len_bytes {
      bytes.extend(bs);
    }

    bytes.extend(self.value.0);
  }
}

/// A low-cost copyable [`Opt`] that stores a reference to the value
#[derive(Copy, Clone, Debug)]
#[allow(missing_docs)]
pub struct OptRef<'a> {
  pub delta: OptDelta,
  pub value: &'a OptValue,
}

impl<'a> Len for OptRef<'a> {
  const CAPACITY: Option<usize> = None;

  fn len(&self) -> usize {
    let header_size = 1;
    let delta_size = match self.delta.0 {
      | n if n >= 269 => 2,
      | n if n >= 13 => 1,
      | _ => 0,
    };

    let value_len_size = match self.value.0.len() {
      | n if n >= 269 => 2,
      | n if n >= 13 => 1,
      | _ => 0,
    };

    header_size + delta_size + value_len_size + self.value.0.len()
  }

  fn is_full(&self) -> bool {
    false
  }
}

/// The "Option Delta" is the difference between this Option's Number
/// and the previous Option's number.
///
/// This is just used to compute the Option Number, identifying which
/// Option is being set (e.g. Content-Format has a Number of 12)
///
/// # Related
/// - [RFC7252#section-3.1 Option Format](https://datatracker.ietf.org/doc/html/rfc7252#section-3.1)
#[derive(Copy, Clone, Hash, PartialEq, PartialOrd, Eq, Ord, Debug, Default)]
pub struct OptDelta(pub u16);

#[doc = rfc_7252_doc!("5.4.6")]
/// <details><summary><b>RFC7252 Section 12.2 Core CoAP Option Numbers</b></summary>
#[doc = concat!("\n#", rfc_7252_doc!("12.2"))]
/// </details>
#[derive(Copy, Clone, Hash, PartialEq, PartialOrd, Eq, Ord, Debug, Default)]
pub struct OptNumber(pub u32);

impl Add for OptNumber {
  type Output = OptNumber;

  fn add(self, rhs: Self) -> Self::Output {
    Self(self.0 + rhs.0)
  }
}

impl Sub for OptNumber {
  type Output = OptNumber;

  fn sub(self, rhs: Self) -> Self::Output {
    Self(self.0 - rhs.0)
  }
}

#[doc = rfc_7252_doc!("5.4.1")]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum OptionMustBeProcessed {
  /// This option must be processed,
  /// and a response that ignores it
  /// will be rejected.
  ///
  /// Corresponds to the option being "critical"
  /// in strict CoAP terms
  Yes,
  /// This option does not _need_ to
  /// be processed,
  /// and a response that ignores it
  /// will be processed anyway.
  ///
  /// Corresponds to the option being "elective"
  /// in strict CoAP terms
  No,
}

#[doc = rfc_7252_doc!("5.4.2")]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum WhenOptionUnsupportedByProxy {
  /// This option /must be/ processed & understood by proxies
  /// and may not be forwarded blindly to their destination.
  ///
  /// Corresponds to the option being "UnSafe" to forward
  /// in strict CoAP terms
  Error,
  /// This option may not be processed & understood by proxies
  /// and may be forwarded blindly to their destination.
  ///
  /// Corresponds to the option being "SafeToForward"
  /// in strict CoAP terms
  Forward,
}

impl OptNumber {
  /// Whether or not this option may be ignored by a server
  pub fn must_be_processed(&self) -> OptionMustBeProcessed {
    #[allow(clippy::wildcard_in_or_patterns)] // will only ever be 0 or 1
    match self.0 & 0b1 {
      | 1 => OptionMustBeProcessed::Yes,
      | 0 | _ => OptionMustBeProcessed::No,
    }
  }

  /// Whether or not this option may be forwarded blindly by
  /// a proxy that does not support processing it
  pub fn when_unsupported_by_proxy(&self) -> WhenOptionUnsupportedByProxy {
    #[allow(clippy::wildcard_in_or_patterns)] // will only ever be 0 or 1
    match (self.0 & 0b10) >> 1 {
      | 1 => WhenOptionUnsupportedByProxy::Error,
      | 0 | _ => WhenOptionUnsupportedByProxy::Forward,
    }
  }
}

#[doc = rfc_7252_doc!("3.2")]
#[derive(Default, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OptValue(pub Vec<u8>);

impl OptValue {
  /// Convert a reference to a OptValue to a byte slice
  pub fn as_bytes(&self) -> &[u8] {
    &self.0
  }
}

impl FromIterator<u8> for OptValue {
  fn from_iter<T: IntoIterator<Item = u8>>(iter: T) -> Self {
    Self(iter.into_iter().collect())
  }
}

/// Encode an unsigned integer option value with the minimum
/// number of bytes (RFC 7252 section 3.2).
///
/// ```
/// use eft_msg::uint_to_bytes;
///
/// assert_eq!(uint_to_bytes(0).as_ref(), &[] as &[u8]);
/// assert_eq!(uint_to_bytes(255).as_ref(), &[0xFF]);
/// assert_eq!(uint_to_bytes(256).as_ref(), &[0x01, 0x00]);
/// ```
pub fn uint_to_bytes(val: u32) -> ArrayVec<[u8; 4]> {
  let mut bytes = ArrayVec::new();
  bytes.extend(val.to_be_bytes()
                  .into_iter()
                  .skip_while(|b| *b == 0));
  bytes
}

/// Decode an unsigned integer option value of at most 4 bytes.
///
/// The empty value decodes to zero.
pub fn uint_from_bytes(bytes: &[u8]) -> Option<u32> {
  if bytes.len() > 4 {
    return None;
  }

  Some(bytes.iter().fold(0u32, |acc, b| (acc << 8) | *b as u32))
}

pub(crate) fn parse_opt_len_or_delta<A: AsRef<[u8]>>(head: u8,
                                                     bytes: &mut Cursor<A>,
                                                     reserved_err: OptParseError)
                                                     -> Result<u16, OptParseError> {
  match head {
    | 13 => {
      let n = bytes.next().ok_or_else(OptParseError::eof)?;
      Ok((n as u16) + 13)
    },
    | 14 => match bytes.take_exact(2) {
      | Some(&[a, b]) => Ok(u16::from_be_bytes([a, b]) + 269),
      | _ => Err(OptParseError::eof()),
    },
    | 15 => Err(reserved_err),
    | _ => Ok(head as u16),
  }
}

impl Opt {
  /// Parse a single option given its already-consumed first byte.
  pub(crate) fn try_consume_rest<A: AsRef<[u8]>>(byte1: u8,
                                                 bytes: &mut Cursor<A>)
                                                 -> Result<Self, OptParseError> {
    // NOTE: Delta **MUST** be consumed before Value; both nibbles may
    // borrow extension bytes and the delta's come first on the wire.
    let delta = parse_opt_len_or_delta(byte1 >> 4,
                                       bytes,
                                       OptParseError::OptionDeltaReservedValue(15))?;
    let delta = OptDelta(delta);

    let len = parse_opt_len_or_delta(byte1 & 0b00001111,
                                     bytes,
                                     OptParseError::ValueLengthReservedValue(15))?
              as usize;

    let value = bytes.take(len).to_vec();

    if value.len() < len {
      return Err(OptParseError::UnexpectedEndOfStream);
    }

    Ok(Opt { delta,
             value: OptValue(value) })
  }
}

/// Consume the option sequence of a message, yielding the option store and
/// whether a payload marker (0xFF) terminated it.
pub(crate) fn try_consume_opts<A: AsRef<[u8]>>(
  bytes: &mut Cursor<A>)
  -> Result<(BTreeMap<OptNumber, Vec<OptValue>>, bool), OptParseError> {
  let mut map: BTreeMap<OptNumber, Vec<OptValue>> = BTreeMap::new();
  let mut count = 0usize;
  let mut last_number = OptNumber(0);

  loop {
    let byte1 = match bytes.next() {
      | None => return Ok((map, false)),
      | Some(0b11111111) => return Ok((map, true)),
      | Some(b) => b,
    };

    let opt = Opt::try_consume_rest(byte1, bytes)?;

    count += 1;
    if count > crate::MAX_OPTION_COUNT {
      return Err(OptParseError::TooManyOptions(count));
    }

    let OptDelta(d) = opt.delta;
    let number = last_number + OptNumber(d as u32);

    map.entry(number).or_default().push(opt.value);
    last_number = number;
  }
}

impl<Bytes: AsRef<[u8]>> TryConsumeBytes<Bytes> for Opt {
  type Error = OptParseError;

  fn try_consume_bytes(bytes: &mut Cursor<Bytes>) -> Result<Self, Self::Error> {
    let byte1 = bytes.next()
                     .ok_or(OptParseError::OptionsExhausted)
                     .and_then(|b| {
                       if b == 0b11111111 {
                         Err(OptParseError::OptionsExhausted)
                       } else {
                         Ok(b)
                       }
                     })?;

    Opt::try_consume_rest(byte1, bytes)
  }
}
