//! Secret hygiene helpers.
//!
//! Cache slots that held key material are wiped through [`zeroize`]
//! before reuse, and Echo nonces are compared without data-dependent
//! timing.

use zeroize::Zeroize;

/// Wipe a byte buffer in a way the optimizer may not elide.
pub fn wipe(buf: &mut [u8]) {
  buf.zeroize();
}

/// Wipe and empty an owned byte buffer.
pub fn wipe_vec(buf: &mut Vec<u8>) {
  buf.zeroize();
  buf.clear();
}

/// Constant-time byte-slice equality.
///
/// Length mismatch still returns early-false-free: the comparison folds
/// the length difference into the accumulator and walks the shorter
/// slice.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
  let mut diff = a.len() ^ b.len();

  let n = a.len().min(b.len());
  for i in 0..n {
    diff |= (a[i] ^ b[i]) as usize;
  }

  diff == 0
}
