use tinyvec::ArrayVec;
use toad_array::Array;
use toad_len::Len;

use crate::*;

/// Trait allowing fallible conversion into bytes
pub trait TryIntoBytes {
  /// Error type yielded if conversion fails
  type Error;

  /// Try to convert into a collection of bytes
  ///
  /// ```
  /// use eft_msg::{Code, Id, Message, Token, TryIntoBytes, Type};
  ///
  /// let msg = Message::new(Type::Con, Code::GET, Id(1), Token(Default::default()));
  /// let bytes: Vec<u8> = msg.try_into_bytes().unwrap();
  /// assert_eq!(bytes, vec![0x40, 0x01, 0x00, 0x01]);
  /// ```
  fn try_into_bytes<C: Array<Item = u8> + Len>(self) -> Result<C, Self::Error>;
}

/// Errors encounterable serializing to bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MessageToBytesError {
  /// Reserved capacity was not enough for size of message
  TooLong {
    /// Capacity of the byte sink
    capacity: usize,
    /// Encoded size of the message
    size: usize,
  },
}

impl TryIntoBytes for Message {
  type Error = MessageToBytesError;

  fn try_into_bytes<C: Array<Item = u8> + Len>(self) -> Result<C, Self::Error> {
    let size: usize = self.len();
    let mut bytes = C::reserve(size);

    if let Some(cap) = C::CAPACITY {
      if cap < size {
        return Err(Self::Error::TooLong { capacity: cap, size });
      }
    }

    let byte1: u8 = Byte1 { tkl: self.token.0.len() as u8,
                            ver: self.ver,
                            ty: self.ty }.into();
    let code: u8 = self.code.into();
    let id: [u8; 2] = self.id.into();
    let token: ArrayVec<[u8; 8]> = self.token.0;

    bytes.extend(Some(byte1));
    bytes.extend(Some(code));

    bytes.extend(id);
    bytes.extend(token);

    let mut last_number = OptNumber(0);
    for (number, values) in self.opts {
      for value in values {
        let OptNumber(delta) = number - last_number;
        last_number = number;

        Opt { delta: OptDelta(delta as u16),
              value }.extend_bytes(&mut bytes);
      }
    }

    if !self.payload.0.is_empty() {
      bytes.extend(Some(0b11111111));
      bytes.extend(self.payload.0);
    }

    Ok(bytes)
  }
}

pub(crate) fn opt_len_or_delta(val: u16) -> (u8, Option<ArrayVec<[u8; 2]>>) {
  match val {
    | n if n >= 269 => {
      let mut bytes = ArrayVec::new();
      bytes.extend((n - 269).to_be_bytes());
      (14, Some(bytes))
    },
    | n if n >= 13 => {
      let mut bytes = ArrayVec::new();
      bytes.push((n as u8) - 13);
      (13, Some(bytes))
    },
    | n => (n as u8, None),
  }
}

impl From<Id> for [u8; 2] {
  fn from(id: Id) -> [u8; 2] {
    id.0.to_be_bytes()
  }
}

impl From<Type> for u8 {
  fn from(t: Type) -> u8 {
    use Type::*;
    match t {
      | Con => 0,
      | Non => 1,
      | Ack => 2,
      | Reset => 3,
    }
  }
}

impl From<Byte1> for u8 {
  fn from(b: Byte1) -> u8 {
    let ver = b.ver.0 << 6;
    let ty = u8::from(b.ty) << 4;
    let tkl = b.tkl;

    ver | ty | tkl
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  /// Assert that two byte-representable values are equal, printing both
  /// sides in binary on failure.
  #[macro_export]
  macro_rules! assert_eqb {
    ($actual:expr, $expected:expr) => {
      if $actual != $expected {
        panic!("expected {:08b} to equal {:08b}", $actual, $expected)
      }
    };
  }

  macro_rules! assert_eqb_iter {
    ($actual:expr, $expected:expr) => {
      if $actual.iter().ne($expected.iter()) {
        panic!("expected {:?} to equal {:?}",
               $actual.into_iter()
                      .map(|b| format!("{:08b}", b))
                      .collect::<Vec<_>>(),
               $expected.into_iter()
                        .map(|b| format!("{:08b}", b))
                        .collect::<Vec<_>>())
      }
    };
  }

  #[test]
  fn msg() {
    let (msg, expected) = crate::test_msg();
    let actual: Vec<u8> = msg.try_into_bytes().unwrap();
    assert_eqb_iter!(actual, expected);
  }

  #[test]
  fn byte_1() {
    let byte = Byte1 { ver: Version(1),
                       ty: Type::Ack,
                       tkl: 3 };
    let actual: u8 = byte.into();
    let expected = 0b_01_10_0011u8;
    assert_eqb!(actual, expected)
  }

  #[test]
  fn token_and_options_wire_layout() {
    // NON 5.05 with token "token", Content-Format 0 (empty value) and
    // payload "payload\0" lays out exactly per RFC 7252 section 3.
    let mut msg = Message::new(Type::Non,
                               Code::new(5, 5),
                               Id(0x1234),
                               Token::from_slice(b"token"));
    msg.set_content_format(ContentFormat::Text).ok();
    msg.payload = Payload(b"payload\0".to_vec());

    let actual: Vec<u8> = msg.try_into_bytes().unwrap();
    let expected: Vec<u8> = [&[0x55u8, 0xA5, 0x12, 0x34] as &[u8],
                             b"token",
                             &[0xC0, 0xFF],
                             b"payload\0"].concat();
    assert_eqb_iter!(actual, expected);
  }

  #[test]
  fn no_payload_marker() {
    let msg = Message { id: Id(0),
                        ty: Type::Con,
                        ver: Default::default(),
                        code: Code { class: 2, detail: 5 },
                        token: Token(Default::default()),
                        opts: Default::default(),
                        payload: Payload(Default::default()) };

    assert_ne!(msg.try_into_bytes::<Vec<_>>().unwrap().last(),
               Some(&0b11111111));
  }
}
