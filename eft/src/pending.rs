//! Confirmable retransmission.
//!
//! A [`Pending`] lives alongside each unacknowledged CON message. It does
//! not _contain_ the work of resending (the owner serializes and writes
//! to the socket); it only answers "should I resend now?" the same
//! non-blocking way a retry timer would.

use eft_msg::Message;
use embedded_time::duration::Milliseconds;
use embedded_time::Instant;
use rand::{Rng, SeedableRng};

use crate::config::Transmission;
use crate::net::Addrd;
use crate::time::{millis_since, Clock, Millis};

/// What the owner of a [`Pending`] should do after a cycle.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum Disposition {
  /// The current wait elapsed with retransmissions left: resend the
  /// message and keep waiting.
  Retransmit,
  /// All retransmissions are spent; notify the reply slot with a
  /// timeout and drop the entry.
  Expired,
}

/// A confirmable message awaiting its ACK.
#[derive(Debug, Clone)]
pub struct Pending<C: Clock> {
  msg: Addrd<Message>,
  start: Instant<C>,
  timeout: Millis,
  retries_left: u8,
  params: Transmission,
}

impl<C: Clock> Pending<C> {
  /// Track a freshly sent confirmable message.
  ///
  /// The initial wait is `ack_timeout` stretched by a random factor in
  /// `[100, ack_random_percent]` percent, seeded from the clock so two
  /// services started together do not retransmit in lockstep.
  pub fn new(msg: Addrd<Message>, now: Instant<C>, params: Transmission) -> Self {
    let timeout = if params.ack_random_percent > 100 {
      let seed = Milliseconds::<u64>::try_from(now.duration_since_epoch()).map(|Milliseconds(ms)| ms)
                                                                          .unwrap_or(0);
      let mut rand = rand_chacha::ChaCha8Rng::seed_from_u64(seed);
      let percent = rand.gen_range(100..=params.ack_random_percent as u64);
      Milliseconds(params.ack_timeout.0 * percent / 100)
    } else {
      params.ack_timeout
    };

    Self { msg,
           start: now,
           timeout,
           retries_left: params.max_retransmit,
           params }
  }

  /// The tracked message.
  pub fn message(&self) -> &Addrd<Message> {
    &self.msg
  }

  /// Retransmissions remaining.
  pub fn retries_left(&self) -> u8 {
    self.retries_left
  }

  /// The span of the wait currently running.
  pub fn timeout(&self) -> Millis {
    self.timeout
  }

  /// Ask whether the current wait has elapsed.
  ///
  /// `WouldBlock` until the deadline passes. After that, each call
  /// advances the deadline by `timeout * backoff_percent / 100` and
  /// burns one retransmission until none remain.
  pub fn cycle(&mut self, now: Instant<C>) -> nb::Result<Disposition, core::convert::Infallible> {
    if millis_since(now, self.start) < self.timeout {
      return Err(nb::Error::WouldBlock);
    }

    if self.retries_left == 0 {
      return Ok(Disposition::Expired);
    }

    self.timeout = Milliseconds(self.timeout.0 * self.params.backoff_percent as u64 / 100);
    self.start = now;
    self.retries_left -= 1;

    Ok(Disposition::Retransmit)
  }
}

#[cfg(test)]
mod tests {
  use eft_msg::{Code, Type};
  use embedded_time::duration::Milliseconds;

  use super::*;
  use crate::test::{dummy_addr, msg, ClockMock};

  fn params() -> Transmission {
    Transmission { ack_timeout: Milliseconds(1_000),
                   ack_random_percent: 100, // no jitter: deterministic
                   backoff_percent: 200,
                   max_retransmit: 2 }
  }

  fn pending(clock: &ClockMock) -> Pending<ClockMock> {
    Pending::new(Addrd(msg(Type::Con, Code::GET, 1, b"t"), dummy_addr()),
                 clock.now(),
                 params())
  }

  #[test]
  fn backoff_doubles_each_cycle() {
    let clock = ClockMock::new();
    let mut p = pending(&clock);

    clock.set(999);
    assert_eq!(p.cycle(clock.now()).unwrap_err(), nb::Error::WouldBlock);

    clock.set(1_000);
    assert_eq!(p.cycle(clock.now()).unwrap(), Disposition::Retransmit);
    assert_eq!(p.timeout(), Milliseconds(2_000u64));

    clock.set(2_999);
    assert_eq!(p.cycle(clock.now()).unwrap_err(), nb::Error::WouldBlock);

    clock.set(3_000);
    assert_eq!(p.cycle(clock.now()).unwrap(), Disposition::Retransmit);
    assert_eq!(p.timeout(), Milliseconds(4_000u64));
  }

  #[test]
  fn expires_after_max_retransmit() {
    let clock = ClockMock::new();
    let mut p = pending(&clock);

    clock.set(1_000);
    assert_eq!(p.cycle(clock.now()).unwrap(), Disposition::Retransmit);
    clock.set(3_000);
    assert_eq!(p.cycle(clock.now()).unwrap(), Disposition::Retransmit);
    clock.set(7_000);
    assert_eq!(p.cycle(clock.now()).unwrap(), Disposition::Expired);
  }

  #[test]
  fn jitter_stays_within_ack_random_percent() {
    let clock = ClockMock::new();
    clock.set(123_456);

    let mut params = params();
    params.ack_random_percent = 150;

    let p = Pending::new(Addrd(msg(Type::Con, Code::GET, 1, b"t"), dummy_addr()),
                         clock.now(),
                         params);

    assert!(p.timeout() >= Milliseconds(1_000u64));
    assert!(p.timeout() <= Milliseconds(1_500u64));
  }
}
