use super::{known, OptNumber, OptionMustBeProcessed};
use crate::Message;

/// How an option travels once a message is OSCORE-protected
/// (RFC 8613 section 4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OscoreClass {
  /// Class E: encrypted and integrity protected, moved into the
  /// plaintext inner message.
  E,
  /// Class I: integrity protected only, visible in the outer message.
  I,
  /// Class U: unprotected, processed on the outer message by
  /// intermediaries.
  U,
}

/// Static attributes of a known option number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptAttributes {
  /// May the option appear more than once in one message?
  pub repeatable: bool,
  /// Smallest legal value length in bytes
  pub min_len: usize,
  /// Largest legal value length in bytes
  pub max_len: usize,
  /// See [`OscoreClass`]
  pub class: OscoreClass,
}

impl OptAttributes {
  const fn new(repeatable: bool, min_len: usize, max_len: usize, class: OscoreClass) -> Self {
    Self { repeatable,
           min_len,
           max_len,
           class }
  }
}

/// Look up the attributes of a known option number.
///
/// Criticality is not stored; it is a property of the number itself
/// ([`OptNumber::must_be_processed`], RFC 7252 section 5.4.6).
///
/// The EDHOC option is registered with a zero length range because RFC
/// 9668 defines it as empty-valued, but receivers MUST ignore any value
/// actually sent; callers checking lengths are expected to skip it.
pub fn attributes(OptNumber(n): OptNumber) -> Option<OptAttributes> {
  use OscoreClass::*;

  let attrs = match n {
    | 1 => OptAttributes::new(true, 0, 8, E),      // If-Match
    | 3 => OptAttributes::new(false, 1, 255, U),   // Uri-Host
    | 4 => OptAttributes::new(true, 1, 8, E),      // ETag
    | 5 => OptAttributes::new(false, 0, 0, E),     // If-None-Match
    | 6 => OptAttributes::new(false, 0, 3, E),     // Observe
    | 7 => OptAttributes::new(false, 0, 2, U),     // Uri-Port
    | 8 => OptAttributes::new(true, 0, 255, E),    // Location-Path
    | 9 => OptAttributes::new(false, 0, 255, U),   // OSCORE
    | 11 => OptAttributes::new(true, 0, 255, E),   // Uri-Path
    | 12 => OptAttributes::new(false, 0, 2, E),    // Content-Format
    | 14 => OptAttributes::new(false, 0, 4, E),    // Max-Age
    | 15 => OptAttributes::new(true, 0, 255, E),   // Uri-Query
    | 16 => OptAttributes::new(false, 1, 1, U),    // Hop-Limit
    | 17 => OptAttributes::new(false, 0, 2, E),    // Accept
    | 19 => OptAttributes::new(false, 0, 3, E),    // Q-Block1
    | 20 => OptAttributes::new(true, 0, 255, E),   // Location-Query
    | 21 => OptAttributes::new(false, 0, 0, U),    // EDHOC
    | 23 => OptAttributes::new(false, 0, 3, E),    // Block2
    | 27 => OptAttributes::new(false, 0, 3, E),    // Block1
    | 28 => OptAttributes::new(false, 0, 4, E),    // Size2
    | 31 => OptAttributes::new(false, 0, 3, E),    // Q-Block2
    | 35 => OptAttributes::new(false, 1, 1034, U), // Proxy-Uri
    | 39 => OptAttributes::new(false, 1, 255, U),  // Proxy-Scheme
    | 60 => OptAttributes::new(false, 0, 4, E),    // Size1
    | 252 => OptAttributes::new(false, 1, 40, I),  // Echo
    | 258 => OptAttributes::new(false, 0, 1, E),   // No-Response
    | 292 => OptAttributes::new(true, 0, 8, E),    // Request-Tag
    | _ => return None,
  };

  Some(attrs)
}

/// Whether an option number is in the registry at all.
pub fn is_known(n: OptNumber) -> bool {
  attributes(n).is_some()
}

/// Scan a message for options we cannot process but are not allowed to
/// ignore, returning the first offender.
///
/// This covers two cases from RFC 7252 section 5.4.1:
/// - a critical option number we do not know, and
/// - a known non-repeatable critical option that appears more than once
///   (supernumerary occurrences MUST be treated like an unrecognized
///   critical option, section 5.4.5).
///
/// The caller answers 4.02 Bad Option for CON requests and stays silent
/// for NON.
pub fn check_unsupported_critical(msg: &Message) -> Option<OptNumber> {
  msg.opts.iter().find_map(|(n, values)| {
                   if n.must_be_processed() != OptionMustBeProcessed::Yes {
                     return None;
                   }

                   match attributes(*n) {
                     | None => Some(*n),
                     | Some(attrs) if !attrs.repeatable && values.len() > 1 => Some(*n),
                     | Some(_) => None,
                   }
                 })
}

/// Scan a message for known options whose value length is out of range,
/// returning the first offender.
///
/// The EDHOC option is exempt: its value is ignored entirely
/// (RFC 9668 section 3.1).
pub fn check_lengths(msg: &Message) -> Option<OptNumber> {
  msg.opts.iter().find_map(|(n, values)| {
                   if *n == known::no_repeat::EDHOC {
                     return None;
                   }

                   attributes(*n).and_then(|attrs| {
                                   values.iter()
                                         .any(|v| {
                                           v.0.len() < attrs.min_len || v.0.len() > attrs.max_len
                                         })
                                         .then_some(*n)
                                 })
                 })
}
