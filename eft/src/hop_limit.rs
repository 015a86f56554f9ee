//! The Hop-Limit proxy loop-breaker (RFC 8768).
//!
//! Forwarding proxies run [`proxy_update`] on every request: a request
//! that has bounced through too many hops is answered 5.08 Hop Limit
//! Reached instead of being forwarded again.

use eft_msg::{known, Message};

/// Outcome of [`proxy_update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HopLimit {
  /// Forwarding may proceed; the message now carries this value.
  Ok(u8),
  /// The limit reached zero: do not forward, answer 5.08.
  Exhausted,
}

/// The option is present but not a single byte in 1..=255.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidHopLimit;

/// Apply proxy forwarding rules to a request's Hop-Limit option.
///
/// Absent option: insert `default_if_absent` (16 unless configured
/// otherwise) and forward. Present: decrement; hitting zero means the
/// request has looped and must die here.
pub fn proxy_update(msg: &mut Message, default_if_absent: u8) -> Result<HopLimit, InvalidHopLimit> {
  let raw = msg.get_first(known::no_repeat::HOP_LIMIT);

  let value = match raw {
    | None => {
      if default_if_absent == 0 {
        return Err(InvalidHopLimit);
      }

      msg.set_hop_limit(default_if_absent).ok();
      return Ok(HopLimit::Ok(default_if_absent));
    },
    | Some(v) if v.0.len() != 1 || v.0[0] == 0 => return Err(InvalidHopLimit),
    | Some(v) => v.0[0],
  };

  let next = value - 1;
  if next == 0 {
    return Ok(HopLimit::Exhausted);
  }

  msg.set_hop_limit(next).ok();
  Ok(HopLimit::Ok(next))
}
