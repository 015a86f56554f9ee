//! Sequence-based token generation (RFC 9175 section 4.2).
//!
//! Tokens are 8 bytes: a 4-byte prefix drawn from the CSPRNG at
//! construction, then a 4-byte big-endian counter. Within one prefix
//! generation no two tokens can collide, which is what lets the OSCORE
//! exchange table use `(peer, token)` as a replay-safe identity.

use eft_msg::Token;
use rand::RngCore;

/// Generates request tokens (and Request-Tag values) that are never
/// recycled within a prefix generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGenerator {
  prefix: u32,
  sequence: u32,
}

impl TokenGenerator {
  /// Create a generator with a random prefix and a zeroed sequence.
  pub fn new<R: RngCore>(rng: &mut R) -> Self {
    Self { prefix: rng.next_u32(),
           sequence: 0 }
  }

  /// Mint the next token: `prefix_be || sequence_be`, then advance the
  /// sequence.
  pub fn next_token(&mut self) -> Token {
    let mut bytes = [0u8; 8];
    bytes[..4].copy_from_slice(&self.prefix.to_be_bytes());
    bytes[4..].copy_from_slice(&self.sequence.to_be_bytes());

    self.sequence = self.sequence.wrapping_add(1);

    Token::from_slice(&bytes)
  }

  /// Mint a Request-Tag value from the same sequence space, so
  /// concurrent blockwise operations can never share a tag within a
  /// prefix generation (RFC 9175 section 3.3).
  pub fn next_request_tag(&mut self) -> Vec<u8> {
    self.next_token().as_bytes().to_vec()
  }

  /// Draw a fresh random prefix and restart the sequence at zero.
  ///
  /// Called when the security association is re-keyed; the old token
  /// space is abandoned wholesale.
  pub fn rekey<R: RngCore>(&mut self, rng: &mut R) {
    self.prefix = rng.next_u32();
    self.sequence = 0;
  }

  /// Test hook: pin the prefix and restart the sequence.
  #[cfg(any(test, feature = "test"))]
  pub fn reset(&mut self, prefix: u32) {
    self.prefix = prefix;
    self.sequence = 0;
  }

  /// The current sequence value (the one the next token will carry).
  pub fn sequence(&self) -> u32 {
    self.sequence
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use rand::rngs::mock::StepRng;

  fn gen() -> TokenGenerator {
    TokenGenerator::new(&mut StepRng::new(0xA1B2_C3D4, 1))
  }

  #[test]
  fn tokens_are_prefix_then_sequence() {
    let mut g = gen();
    g.reset(0xA1B2_C3D4);

    let t0 = g.next_token();
    let t1 = g.next_token();

    assert_eq!(t0.as_bytes(), &[0xA1, 0xB2, 0xC3, 0xD4, 0, 0, 0, 0]);
    assert_eq!(t1.as_bytes(), &[0xA1, 0xB2, 0xC3, 0xD4, 0, 0, 0, 1]);
  }

  #[test]
  fn sequence_increments_by_one_and_never_collides() {
    let mut g = gen();
    let mut seen = std::collections::BTreeSet::new();

    for i in 0..1000u32 {
      assert_eq!(g.sequence(), i);
      assert!(seen.insert(g.next_token()));
    }
  }

  #[test]
  fn rekey_restarts_sequence_with_new_prefix() {
    let mut g = gen();
    g.reset(1);
    g.next_token();
    g.next_token();
    assert_eq!(g.sequence(), 2);

    g.rekey(&mut StepRng::new(2, 1));
    assert_eq!(g.sequence(), 0);

    let t = g.next_token();
    assert_eq!(&t.as_bytes()[..4], &2u32.to_be_bytes());
  }

  #[test]
  fn request_tags_are_not_recycled() {
    let mut g = gen();
    let a = g.next_request_tag();
    let b = g.next_request_tag();
    assert_ne!(a, b);
  }
}
