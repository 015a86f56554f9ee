/// Content-Format
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ContentFormat {
  /// `text/plain; charset=utf-8`
  Text,
  /// `application/link-format`
  LinkFormat,
  /// `application/xml`
  Xml,
  /// `application/octet-stream`
  OctetStream,
  /// `application/exi`
  Exi,
  /// `application/json`
  Json,
  /// `application/cbor`
  Cbor,
  /// `application/edhoc+cbor-seq` (RFC 9528): an EDHOC message sent
  /// server → client, or an EDHOC error body.
  EdhocCborSeq,
  /// `application/cid-edhoc+cbor-seq` (RFC 9528): a connection identifier
  /// followed by an EDHOC message, sent client → server.
  CidEdhocCborSeq,
  /// `application/missing-blocks+cbor-seq` (RFC 9177 section 12.3)
  MissingBlocksCborSeq,
  /// Another content format
  Other(u16),
}

impl ContentFormat {
  /// Convert this content format to the CoAP byte value
  pub fn bytes(&self) -> [u8; 2] {
    u16::from(self).to_be_bytes()
  }
}

impl<'a> From<&'a ContentFormat> for u16 {
  fn from(f: &'a ContentFormat) -> Self {
    use ContentFormat::*;
    match *f {
      | Text => 0,
      | LinkFormat => 40,
      | Xml => 41,
      | OctetStream => 42,
      | Exi => 47,
      | Json => 50,
      | Cbor => 60,
      | EdhocCborSeq => 64,
      | CidEdhocCborSeq => 65,
      | MissingBlocksCborSeq => 272,
      | Other(n) => n,
    }
  }
}

impl From<u16> for ContentFormat {
  fn from(n: u16) -> Self {
    use ContentFormat::*;
    match n {
      | 0 => Text,
      | 40 => LinkFormat,
      | 41 => Xml,
      | 42 => OctetStream,
      | 47 => Exi,
      | 50 => Json,
      | 60 => Cbor,
      | 64 => EdhocCborSeq,
      | 65 => CidEdhocCborSeq,
      | 272 => MissingBlocksCborSeq,
      | n => Other(n),
    }
  }
}

impl<'a> IntoIterator for &'a ContentFormat {
  type Item = u8;

  type IntoIter = <[u8; 2] as IntoIterator>::IntoIter;

  fn into_iter(self) -> Self::IntoIter {
    self.bytes().into_iter()
  }
}
