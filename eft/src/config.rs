//! Configuring runtime behavior.
//!
//! Everything here is plain data: a [`Config`] is copied into services and
//! clients at construction and never consulted globally.

use crate::time::Millis;
use embedded_time::duration::Milliseconds;

/// RFC 7252 section 4.8 transmission parameters, applied per
/// confirmable exchange.
///
/// A [`Pending`](crate::pending::Pending) entry copies these at creation
/// time, so individual requests may override them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Transmission {
  /// Initial ACK wait.
  ///
  /// ```
  /// use embedded_time::duration::Milliseconds;
  /// use eft::config::Transmission;
  ///
  /// assert_eq!(Transmission::default().ack_timeout, Milliseconds(2_000u64));
  /// ```
  pub ack_timeout: Millis,

  /// Upper bound of the initial-timeout jitter, in percent of
  /// [`Transmission::ack_timeout`]. 100 disables jitter.
  ///
  /// ```
  /// use eft::config::Transmission;
  ///
  /// assert_eq!(Transmission::default().ack_random_percent, 150);
  /// ```
  pub ack_random_percent: u16,

  /// Growth of the timeout between retransmissions, in percent.
  /// 200 is the classic binary exponential backoff.
  ///
  /// ```
  /// use eft::config::Transmission;
  ///
  /// assert_eq!(Transmission::default().backoff_percent, 200);
  /// ```
  pub backoff_percent: u16,

  /// Number of retransmissions (not counting the initial send) before a
  /// confirmable message is abandoned.
  ///
  /// ```
  /// use eft::config::Transmission;
  ///
  /// assert_eq!(Transmission::default().max_retransmit, 4);
  /// ```
  pub max_retransmit: u8,
}

impl Default for Transmission {
  fn default() -> Self {
    Transmission { ack_timeout: Milliseconds(2_000),
                   ack_random_percent: 150,
                   backoff_percent: 200,
                   max_retransmit: 4 }
  }
}

/// Sizing and lifetime of the security caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Security {
  /// Capacity of the OSCORE exchange table.
  ///
  /// ```
  /// use eft::config::Security;
  ///
  /// assert_eq!(Security::default().oscore_exchange_cache_size, 8);
  /// ```
  pub oscore_exchange_cache_size: usize,

  /// How long an OSCORE exchange entry may idle before a lookup
  /// discards it. Defaults to EXCHANGE_LIFETIME (RFC 7252 section 4.8.2).
  pub oscore_exchange_lifetime: Millis,

  /// The largest COMB_PAYLOAD (EDHOC_MSG_3 plus OSCORE ciphertext) a
  /// combined request may carry without blockwise (RFC 9668
  /// section 3.2.2).
  ///
  /// ```
  /// use eft::config::Security;
  ///
  /// assert_eq!(Security::default().max_unfragmented_size, 4096);
  /// ```
  pub max_unfragmented_size: usize,

  /// Capacity of the outer-Block1 reassembly cache.
  pub outer_block_cache_size: usize,

  /// How long a partially reassembled outer-Block1 operation may idle.
  pub outer_block_lifetime: Millis,

  /// Ceiling on a reassembled outer-Block1 body; crossing it answers
  /// 4.13 with Size1.
  pub outer_block_max_len: usize,

  /// Capacity of the EDHOC session table.
  pub edhoc_session_cache_size: usize,

  /// Largest Echo value we generate or accept (RFC 9175 section 2.2.1
  /// caps it at 40).
  ///
  /// ```
  /// use eft::config::Security;
  ///
  /// assert_eq!(Security::default().echo_max_len, 40);
  /// ```
  pub echo_max_len: usize,

  /// Capacity of the Echo peer cache.
  pub echo_cache_size: usize,

  /// How long a peer stays verified after echoing a nonce back.
  pub echo_verified_window: Millis,
}

impl Default for Security {
  fn default() -> Self {
    Security { oscore_exchange_cache_size: 8,
               oscore_exchange_lifetime: Milliseconds(247_000),
               max_unfragmented_size: 4096,
               outer_block_cache_size: 4,
               outer_block_lifetime: Milliseconds(60_000),
               outer_block_max_len: 4096,
               edhoc_session_cache_size: 4,
               echo_max_len: 40,
               echo_cache_size: 8,
               echo_verified_window: Milliseconds(60_000) }
  }
}

/// Server-side knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Server {
  /// Largest datagram the service will emit or reconstruct.
  ///
  /// ```
  /// use eft::config::Server;
  ///
  /// assert_eq!(Server::default().message_size, 1280);
  /// ```
  pub message_size: usize,

  /// Maximum number of in-flight confirmable exchanges.
  pub max_conn: usize,

  /// Hop-Limit value inserted when proxying a request that arrived
  /// without one (RFC 8768 recommends 16).
  ///
  /// ```
  /// use eft::config::Server;
  ///
  /// assert_eq!(Server::default().hop_limit_default, 16);
  /// ```
  pub hop_limit_default: u8,

  /// Whether this service forwards requests (and therefore runs the
  /// Hop-Limit loop-breaker on every one).
  ///
  /// ```
  /// use eft::config::Server;
  ///
  /// assert!(!Server::default().proxy_enabled);
  /// ```
  pub proxy_enabled: bool,
}

impl Default for Server {
  fn default() -> Self {
    Server { message_size: 1280,
             max_conn: 16,
             hop_limit_default: 16,
             proxy_enabled: false }
  }
}

/// Runtime config
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Config {
  /// See [`Transmission`]
  pub transmission: Transmission,
  /// See [`Security`]
  pub security: Security,
  /// See [`Server`]
  pub server: Server,
}
