//! Time abstractions.
//!
//! Everything in the runtime that needs "now" takes it as an
//! [`embedded_time::Instant`] parameterized over a millisecond
//! [`Clock`]; nothing reads wall time on its own, which keeps cache
//! expiry and retransmission deterministic under test.

use embedded_time::duration::Milliseconds;
use embedded_time::Instant;

/// A duration in milliseconds
pub type Millis = Milliseconds<u64>;

/// A millisecond-granularity monotonic clock.
///
/// Blanket-implemented for every [`embedded_time::Clock`] whose tick type
/// is `u64`; see [`crate::std::SystemClock`] for the standard one.
pub trait Clock: embedded_time::Clock<T = u64> {}

impl<C: embedded_time::Clock<T = u64>> Clock for C {}

/// Milliseconds elapsed between two instants.
///
/// Saturates instead of failing when the span does not fit, which for a
/// millisecond u64 clock means never in practice.
pub fn millis_since<C: Clock>(now: Instant<C>, then: Instant<C>) -> Millis {
  (now - then).try_into().unwrap_or(Milliseconds(u64::MAX))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test::ClockMock;

  #[test]
  fn millis_since_subtracts() {
    let clock = ClockMock::new();
    clock.set(100);
    let then = clock.now();
    clock.set(1600);
    let now = clock.now();
    assert_eq!(millis_since(now, then), Milliseconds(1500u64));
  }
}
