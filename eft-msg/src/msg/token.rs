use tinyvec::ArrayVec;
use toad_macros::rfc_7252_doc;

#[doc = rfc_7252_doc!("5.3.1")]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct Token(pub ArrayVec<[u8; 8]>);

impl Token {
  /// Copy up to 8 bytes into a message token.
  ///
  /// Anything past the 8th byte is discarded (RFC 7252 section 3:
  /// lengths 9-15 are reserved).
  ///
  /// ```
  /// use eft_msg::Token;
  ///
  /// let token = Token::from_slice(b"token");
  /// assert_eq!(token.as_bytes(), b"token");
  /// ```
  pub fn from_slice(data: &[u8]) -> Token {
    let mut arr = ArrayVec::new();
    data.iter().take(8).for_each(|b| arr.push(*b));
    Token(arr)
  }

  /// Borrow the token bytes
  pub fn as_bytes(&self) -> &[u8] {
    &self.0
  }
}
