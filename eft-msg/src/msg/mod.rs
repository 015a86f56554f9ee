use std::collections::BTreeMap;
use std::str::{from_utf8, Utf8Error};

use tinyvec::ArrayVec;
use toad_cursor::Cursor;
use toad_len::Len;
use toad_macros::rfc_7252_doc;

/// Message Code
pub mod code;

/// Message parsing errors
pub mod parse_error;

/// Message ID
pub mod id;

/// Message Options
pub mod opt;

/// Message Type
pub mod ty;

/// Message Token
pub mod token;

/// Message Version
pub mod ver;

pub use code::*;
pub use id::*;
pub use opt::*;
pub use parse_error::*;
pub use token::*;
pub use ty::*;
pub use ver::*;

use crate::from_bytes::TryConsumeBytes;
use crate::TryFromBytes;

/// The most options any single message may carry.
///
/// [`Message::add`] fails with [`SetOptionError::TooManyOptions`] past
/// this point, keeping hostile messages from ballooning the option map.
pub const MAX_OPTION_COUNT: usize = 32;

#[doc = rfc_7252_doc!("5.5")]
#[derive(Default, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Payload(pub Vec<u8>);

impl Payload {
  /// Convert a reference to a Payload to a byte slice
  pub fn as_bytes(&self) -> &[u8] {
    &self.0
  }
}

/// Struct representing the first byte of a message.
///
/// ```text
/// CoAP version
/// |
/// |  Message type (request, response, empty)
/// |  |
/// |  |  Length of token, in bytes. (4-bit integer)
/// |  |  |
/// vv vv vvvv
/// 01 00 0000
/// ```
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Eq, Ord)]
pub(crate) struct Byte1 {
  pub(crate) ver: Version,
  pub(crate) ty: Type,
  pub(crate) tkl: u8,
}

impl TryFrom<u8> for Byte1 {
  type Error = MessageParseError;

  fn try_from(b: u8) -> Result<Self, Self::Error> {
    let ver = b >> 6; // bits 0 & 1
    let ty = b >> 4 & 0b11; // bits 2 & 3
    let tkl = b & 0b1111u8; // last 4 bits

    Ok(Byte1 { ver: Version(ver),
               ty: Type::try_from(ty)?,
               tkl })
  }
}

impl Len for Message {
  const CAPACITY: Option<usize> = None;

  fn len(&self) -> usize {
    let header_size = 4;
    let payload_marker_size = 1;
    let payload_size = self.payload.0.len();
    let token_size = self.token.0.len();
    let opts_size: usize = self.opt_refs().map(|o| o.len()).sum();

    header_size + payload_marker_size + payload_size + token_size + opts_size
  }

  fn is_full(&self) -> bool {
    false
  }
}

/// # CoAP Messages
/// This struct provides a high-level API for manipulating requests &
/// responses, while being cheaply serializable to & from the byte layout of
/// CoAP messages on the wire.
///
/// The option store is keyed by [`OptNumber`], so serialization always
/// emits options in ascending numeric order and removal re-derives the
/// deltas of every successor for free.
///
/// ```
/// use eft_msg::{Code, Id, Message, Token, Type};
///
/// let a = Message { id: Id(1),
///                   token: Token(Default::default()),
///                   ver: Default::default(),
///                   ty: Type::Con,
///                   code: Code::GET,
///                   payload: Default::default(),
///                   opts: Default::default() };
///
/// let b = Message::new(Type::Con, Code::GET, Id(1), Token(Default::default()));
///
/// assert_eq!(a, b);
/// ```
///
/// <details>
/// <summary><b>Further Reading from RFC7252</b></summary>
#[doc = concat!("\n\n#", rfc_7252_doc!("2.1"))]
#[doc = concat!("\n\n#", rfc_7252_doc!("3"))]
/// </details>
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
  /// see [`Id`] for details
  pub id: Id,
  /// see [`Type`] for details
  pub ty: Type,
  /// see [`Version`] for details
  pub ver: Version,
  /// see [`Token`] for details
  pub token: Token,
  /// see [`Code`] for details
  pub code: Code,
  /// see [`opt::Opt`] for details
  pub opts: BTreeMap<OptNumber, Vec<OptValue>>,
  /// see [`Payload`]
  pub payload: Payload,
}

/// An error occurred during a call to [`Message::add`] or [`Message::set`]
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SetOptionError {
  TooManyOptions(usize),
}

impl Message {
  /// Create a new message
  pub fn new(ty: Type, code: Code, id: Id, token: Token) -> Self {
    Self { id,
           token,
           ty,
           code,
           ver: Version::default(),
           payload: Payload(Vec::new()),
           opts: BTreeMap::new() }
  }

  /// Create a new message that ACKs this one.
  ///
  /// This needs an [`Id`] to assign to the newly created message.
  pub fn ack(&self, id: Id) -> Self {
    Self { id,
           token: self.token,
           ver: Default::default(),
           ty: Type::Ack,
           code: Code::new(0, 0),
           payload: Payload(Default::default()),
           opts: Default::default() }
  }

  /// Create a new message that RSTs this one.
  pub fn reset(&self, id: Id) -> Self {
    Self { id,
           token: Token(Default::default()),
           ver: Default::default(),
           ty: Type::Reset,
           code: Code::new(0, 0),
           payload: Payload(Default::default()),
           opts: Default::default() }
  }

  /// Get the payload
  pub fn payload(&self) -> &Payload {
    &self.payload
  }

  /// Set the payload, returning the old payload if there was one
  pub fn set_payload(&mut self, p: Payload) -> Option<Payload> {
    let mut old: Payload = p;
    std::mem::swap(&mut old, &mut self.payload);
    Some(old).filter(|old| !old.0.is_empty())
  }

  /// Iterate over the option store, yielding wire-level
  /// [`OptRef`]s with deltas relative to the previous option.
  pub fn opt_refs(&self) -> impl Iterator<Item = OptRef<'_>> {
    let mut last = OptNumber(0);
    self.opts
        .iter()
        .flat_map(|(n, vs)| vs.iter().map(move |v| (*n, v)))
        .map(move |(n, v)| {
          let OptNumber(delta) = n - last;
          last = n;
          OptRef { delta: OptDelta(delta as u16),
                   value: v }
        })
  }

  /// Insert a new value for a given option
  ///
  /// Errors when the message already carries [`MAX_OPTION_COUNT`] options.
  #[doc = rfc_7252_doc!("5.4.5")]
  pub fn add(&mut self, n: OptNumber, v: OptValue) -> Result<(), SetOptionError> {
    let total: usize = self.opts.values().map(|vs| vs.len()).sum();
    if total >= MAX_OPTION_COUNT {
      return Err(SetOptionError::TooManyOptions(total));
    }

    self.opts.entry(n).or_default().push(v);
    Ok(())
  }

  /// Replace any / all existing values with a new one,
  /// yielding the previous value(s)
  pub fn set(&mut self, n: OptNumber, v: OptValue) -> Result<Option<Vec<OptValue>>, SetOptionError> {
    let old = self.remove(n);
    self.add(n, v).map(|_| old)
  }

  /// Get the number of values for a given option
  pub fn count(&self, n: OptNumber) -> usize {
    self.get(n).map(|a| a.len()).unwrap_or(0)
  }

  /// Get the value(s) of an option by number
  pub fn get(&self, n: OptNumber) -> Option<&Vec<OptValue>> {
    self.opts.get(&n)
  }

  /// Get the value of an option, taking the first if there are multiple.
  pub fn get_first(&self, n: OptNumber) -> Option<&OptValue> {
    self.get(n).and_then(|vs| vs.first())
  }

  /// Get the value of an option, and interpret it as a UTF-8 string
  pub fn get_str(&self, n: OptNumber) -> Result<Option<&str>, Utf8Error> {
    match self.get_first(n) {
      | Some(v) => from_utf8(&v.0).map(Some),
      | _ => Ok(None),
    }
  }

  /// Get the value of an option and interpret it as a minimally-encoded
  /// unsigned integer of at most 4 bytes.
  pub fn get_uint(&self, n: OptNumber) -> Option<u32> {
    self.get_first(n).and_then(|v| uint_from_bytes(&v.0))
  }

  /// Replace all values of an option with a minimally-encoded
  /// unsigned integer (RFC 7252 section 3.2: a zero value is
  /// encoded as the empty byte string, 255 as a single byte).
  pub fn set_uint(&mut self, n: OptNumber, v: u32) -> Result<(), SetOptionError> {
    self.set(n, OptValue(uint_to_bytes(v).to_vec())).map(|_| ())
  }

  /// Remove all values for the option from this message,
  /// returning them if there were any.
  pub fn remove(&mut self, n: OptNumber) -> Option<Vec<OptValue>> {
    self.opts.remove(&n)
  }

  /// Update the value for the [Uri-Host](opt::known::no_repeat::HOST) option,
  /// discarding any existing values.
  pub fn set_host<S>(&mut self, host: S) -> Result<(), SetOptionError>
    where S: AsRef<str>
  {
    self.set(known::no_repeat::HOST,
             OptValue(host.as_ref().as_bytes().to_vec()))
        .map(|_| ())
  }

  /// Get the value for the [Uri-Host](opt::known::no_repeat::HOST) option
  pub fn host(&self) -> Result<Option<&str>, Utf8Error> {
    self.get_str(known::no_repeat::HOST)
  }

  /// Update the value for the [Uri-Path](opt::known::repeat::PATH) option,
  /// discarding any existing values.
  ///
  /// ```
  /// use eft_msg::{Code, Id, Message, Token, Type};
  ///
  /// let mut msg = Message::new(Type::Con, Code::GET, Id(1), Token(Default::default()));
  ///
  /// msg.set_path(".well-known/edhoc").unwrap();
  /// assert_eq!(msg.path_string().unwrap(), ".well-known/edhoc".to_string());
  /// ```
  pub fn set_path<S>(&mut self, path: S) -> Result<(), SetOptionError>
    where S: AsRef<str>
  {
    self.remove(known::repeat::PATH);
    path.as_ref()
        .split('/')
        .filter(|segment| !segment.is_empty())
        .try_for_each(|segment| {
          self.add(known::repeat::PATH, OptValue(segment.as_bytes().to_vec()))
        })
  }

  /// Get the [Uri-Path](opt::known::repeat::PATH) segments
  pub fn path(&self) -> Result<Vec<&str>, Utf8Error> {
    match self.get(known::repeat::PATH) {
      | Some(vs) => vs.iter().map(|s| from_utf8(&s.0)).collect(),
      | _ => Ok(Vec::new()),
    }
  }

  /// Get the fully built path, joining segments with '/'.
  pub fn path_string(&self) -> Result<String, Utf8Error> {
    self.path().map(|segs| segs.join("/"))
  }

  /// Insert a new value for the [Uri-Query](opt::known::repeat::QUERY) option,
  /// alongside any existing values.
  pub fn add_query<S>(&mut self, query: S) -> Result<(), SetOptionError>
    where S: AsRef<str>
  {
    self.add(known::repeat::QUERY,
             OptValue(query.as_ref().as_bytes().to_vec()))
  }

  /// Get all query parameters for this request
  pub fn query(&self) -> Result<Vec<&str>, Utf8Error> {
    match self.get(known::repeat::QUERY) {
      | Some(vs) => vs.iter().map(|s| from_utf8(&s.0)).collect(),
      | _ => Ok(Vec::new()),
    }
  }

  /// Update the value for the
  /// [Content-Format](opt::known::no_repeat::CONTENT_FORMAT) option,
  /// discarding any existing values.
  #[doc = rfc_7252_doc!("5.10.3")]
  pub fn set_content_format(&mut self, format: ContentFormat) -> Result<(), SetOptionError> {
    self.set_uint(known::no_repeat::CONTENT_FORMAT, u16::from(&format) as u32)
  }

  /// Get the value for the
  /// [Content-Format](opt::known::no_repeat::CONTENT_FORMAT) option
  pub fn content_format(&self) -> Option<ContentFormat> {
    self.get_uint(known::no_repeat::CONTENT_FORMAT)
        .and_then(|n| u16::try_from(n).ok())
        .map(ContentFormat::from)
  }

  /// Update the value for the [Accept](opt::known::no_repeat::ACCEPT) option,
  /// discarding any existing values.
  #[doc = rfc_7252_doc!("5.10.4")]
  pub fn set_accept(&mut self, format: ContentFormat) -> Result<(), SetOptionError> {
    self.set_uint(known::no_repeat::ACCEPT, u16::from(&format) as u32)
  }

  /// Get the value for the [Accept](opt::known::no_repeat::ACCEPT) option
  pub fn accept(&self) -> Option<ContentFormat> {
    self.get_uint(known::no_repeat::ACCEPT)
        .and_then(|n| u16::try_from(n).ok())
        .map(ContentFormat::from)
  }

  /// Set the value for the [Observe](opt::known::no_repeat::OBSERVE) option,
  /// discarding any existing values.
  pub fn set_observe(&mut self, a: observe::Action) -> Result<(), SetOptionError> {
    self.set_uint(known::no_repeat::OBSERVE, u8::from(a) as u32)
  }

  /// Get the value for the [Observe](opt::known::no_repeat::OBSERVE) option
  pub fn observe(&self) -> Option<observe::Action> {
    self.get_uint(known::no_repeat::OBSERVE)
        .and_then(|n| u8::try_from(n).ok())
        .and_then(observe::Action::from_byte)
  }

  /// Update the value for the [Max-Age](opt::known::no_repeat::MAX_AGE)
  /// option, discarding any existing values.
  #[doc = rfc_7252_doc!("5.10.5")]
  pub fn set_max_age(&mut self, max_age_seconds: u32) -> Result<(), SetOptionError> {
    self.set_uint(known::no_repeat::MAX_AGE, max_age_seconds)
  }

  /// Get the value for the [Max-Age](opt::known::no_repeat::MAX_AGE) option,
  /// in seconds
  pub fn max_age_seconds(&self) -> Option<u32> {
    self.get_uint(known::no_repeat::MAX_AGE)
  }

  /// [`opt::known::no_repeat::BLOCK1`]
  pub fn block1(&self) -> Option<block::Block> {
    self.get_uint(known::no_repeat::BLOCK1)
        .and_then(block::Block::from_uint)
  }

  /// [`opt::known::no_repeat::BLOCK1`]
  pub fn set_block1(&mut self, block: block::Block) -> Result<(), SetOptionError> {
    self.set_uint(known::no_repeat::BLOCK1, block.into())
  }

  /// [`opt::known::no_repeat::BLOCK2`]
  pub fn block2(&self) -> Option<block::Block> {
    self.get_uint(known::no_repeat::BLOCK2)
        .and_then(block::Block::from_uint)
  }

  /// [`opt::known::no_repeat::BLOCK2`]
  pub fn set_block2(&mut self, block: block::Block) -> Result<(), SetOptionError> {
    self.set_uint(known::no_repeat::BLOCK2, block.into())
  }

  /// [`opt::known::no_repeat::Q_BLOCK1`]
  pub fn q_block1(&self) -> Option<block::Block> {
    self.get_uint(known::no_repeat::Q_BLOCK1)
        .and_then(block::Block::from_uint)
  }

  /// [`opt::known::no_repeat::Q_BLOCK1`]
  pub fn set_q_block1(&mut self, block: block::Block) -> Result<(), SetOptionError> {
    self.set_uint(known::no_repeat::Q_BLOCK1, block.into())
  }

  /// [`opt::known::no_repeat::Q_BLOCK2`]
  pub fn q_block2(&self) -> Option<block::Block> {
    self.get_uint(known::no_repeat::Q_BLOCK2)
        .and_then(block::Block::from_uint)
  }

  /// [`opt::known::no_repeat::Q_BLOCK2`]
  pub fn set_q_block2(&mut self, block: block::Block) -> Result<(), SetOptionError> {
    self.set_uint(known::no_repeat::Q_BLOCK2, block.into())
  }

  /// Update the value for the [Size1](opt::known::no_repeat::SIZE1) option,
  /// discarding any existing values.
  #[doc = rfc_7252_doc!("5.10.9")]
  pub fn set_size1(&mut self, size_bytes: u32) -> Result<(), SetOptionError> {
    self.set_uint(known::no_repeat::SIZE1, size_bytes)
  }

  /// Get the value for the [Size1](opt::known::no_repeat::SIZE1) option
  pub fn size1(&self) -> Option<u32> {
    self.get_uint(known::no_repeat::SIZE1)
  }

  /// Update the value for the [Size2](opt::known::no_repeat::SIZE2) option,
  /// discarding any existing values.
  pub fn set_size2(&mut self, size_bytes: u32) -> Result<(), SetOptionError> {
    self.set_uint(known::no_repeat::SIZE2, size_bytes)
  }

  /// Get the value for the [Size2](opt::known::no_repeat::SIZE2) option
  pub fn size2(&self) -> Option<u32> {
    self.get_uint(known::no_repeat::SIZE2)
  }

  /// Get the value for the [Hop-Limit](opt::known::no_repeat::HOP_LIMIT)
  /// option (RFC 8768: exactly one byte, 1..=255).
  pub fn hop_limit(&self) -> Option<u8> {
    self.get_first(known::no_repeat::HOP_LIMIT)
        .filter(|v| v.0.len() == 1)
        .map(|v| v.0[0])
  }

  /// Set the [Hop-Limit](opt::known::no_repeat::HOP_LIMIT) option,
  /// discarding any existing values.
  pub fn set_hop_limit(&mut self, hops: u8) -> Result<(), SetOptionError> {
    self.set(known::no_repeat::HOP_LIMIT, OptValue(vec![hops]))
        .map(|_| ())
  }

  /// Get the value for the [Echo](opt::known::no_repeat::ECHO) option
  /// (RFC 9175 section 2.2.1: an opaque 1..=40 byte nonce).
  pub fn echo(&self) -> Option<&[u8]> {
    self.get_first(known::no_repeat::ECHO).map(|v| v.0.as_slice())
  }

  /// Set the [Echo](opt::known::no_repeat::ECHO) option,
  /// discarding any existing values.
  pub fn set_echo(&mut self, nonce: &[u8]) -> Result<(), SetOptionError> {
    self.set(known::no_repeat::ECHO, OptValue(nonce.to_vec()))
        .map(|_| ())
  }

  /// Get the raw value of the [OSCORE](opt::known::no_repeat::OSCORE) option.
  ///
  /// `Some(&[])` (present, empty) is distinct from `None` (absent): an
  /// empty OSCORE option still marks the message as OSCORE-protected.
  pub fn oscore(&self) -> Option<&[u8]> {
    self.get_first(known::no_repeat::OSCORE)
        .map(|v| v.0.as_slice())
  }

  /// Set the [OSCORE](opt::known::no_repeat::OSCORE) option,
  /// discarding any existing values.
  pub fn set_oscore(&mut self, value: &[u8]) -> Result<(), SetOptionError> {
    self.set(known::no_repeat::OSCORE, OptValue(value.to_vec()))
        .map(|_| ())
  }

  /// Whether at least one [EDHOC](opt::known::no_repeat::EDHOC) option is
  /// present. The option's value is ignored (RFC 9668 section 3.1).
  pub fn has_edhoc(&self) -> bool {
    self.count(known::no_repeat::EDHOC) >= 1
  }

  /// Set the empty [EDHOC](opt::known::no_repeat::EDHOC) option.
  pub fn set_edhoc(&mut self) -> Result<(), SetOptionError> {
    self.set(known::no_repeat::EDHOC, OptValue(Vec::new()))
        .map(|_| ())
  }

  /// Insert a new value for the
  /// [Request-Tag](opt::known::repeat::REQUEST_TAG) option, alongside any
  /// existing values. (RFC 9175 section 3.2.1: each value is 0..=8 bytes.)
  pub fn add_request_tag(&mut self, tag: &[u8]) -> Result<(), SetOptionError> {
    self.add(known::repeat::REQUEST_TAG, OptValue(tag.to_vec()))
  }

  /// Get all values for the
  /// [Request-Tag](opt::known::repeat::REQUEST_TAG) option
  pub fn request_tags(&self) -> Option<&Vec<OptValue>> {
    self.get(known::repeat::REQUEST_TAG)
  }

  /// Get the value for the
  /// [No-Response](opt::known::no_repeat::NO_RESPONSE) option
  /// (RFC 7967: a one-byte suppression bitmask; empty means 0).
  pub fn no_response(&self) -> Option<u8> {
    self.get_first(known::no_repeat::NO_RESPONSE)
        .filter(|v| v.0.len() <= 1)
        .map(|v| v.0.first().copied().unwrap_or(0))
  }

  /// Set the [No-Response](opt::known::no_repeat::NO_RESPONSE) option,
  /// discarding any existing values.
  pub fn set_no_response(&mut self, mask: u8) -> Result<(), SetOptionError> {
    self.set_uint(known::no_repeat::NO_RESPONSE, mask as u32)
  }
}

impl<Bytes: AsRef<[u8]>> TryFromBytes<Bytes> for Message {
  type Error = MessageParseError;

  fn try_from_bytes(bytes: Bytes) -> Result<Self, Self::Error> {
    let mut bytes = Cursor::new(bytes);

    let Byte1 { tkl, ty, ver } = bytes.next()
                                      .ok_or_else(MessageParseError::eof)?
                                      .try_into()?;

    if ver != Version(1) {
      return Err(Self::Error::InvalidVersion(ver.0));
    }

    if tkl > 8 {
      return Err(Self::Error::InvalidTokenLength(tkl));
    }

    let code: Code = bytes.next().ok_or_else(MessageParseError::eof)?.into();
    let id: Id = Id::try_consume_bytes(&mut bytes)?;

    let token = bytes.take_exact(tkl as usize)
                     .ok_or_else(MessageParseError::eof)?;
    let token = ArrayVec::<[u8; 8]>::try_from(token).expect("tkl was checked to be <= 8");
    let token = Token(token);

    let (opts, saw_marker) =
      opt::try_consume_opts(&mut bytes).map_err(Self::Error::OptParseError)?;

    let payload = Payload(bytes.take_until_end().to_vec());

    if saw_marker && payload.0.is_empty() {
      return Err(Self::Error::PayloadMarkerWithoutPayload);
    }

    Ok(Message { id,
                 ty,
                 ver,
                 code,
                 token,
                 opts,
                 payload })
  }
}
