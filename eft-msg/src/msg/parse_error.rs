/// Errors encounterable while parsing a message from bytes
#[derive(Copy, Clone, Debug, PartialEq, PartialOrd, Eq, Ord)]
pub enum MessageParseError {
  /// Reached end of stream before parsing was finished
  UnexpectedEndOfStream,

  /// Token length was > 8
  InvalidTokenLength(u8),

  /// The version field was not 1
  InvalidVersion(u8),

  /// Error parsing option
  OptParseError(super::opt::parse_error::OptParseError),

  /// A payload marker (0xFF) was present with no payload bytes after it
  PayloadMarkerWithoutPayload,

  /// The message type is invalid (see [`Type`](super::Type) for information & valid values)
  InvalidType(u8),
}

impl MessageParseError {
  /// Shorthand for [`MessageParseError::UnexpectedEndOfStream`]
  pub fn eof() -> Self {
    Self::UnexpectedEndOfStream
  }
}
