//! The OSCORE exchange table.
//!
//! Every successfully unprotected request inserts an entry keyed
//! `(peer, token)`; the outbound response path looks its context back up
//! by the same key. Non-Observe entries die with the response,
//! Observe entries persist and protect every notification until the
//! observation is cancelled. Fixed capacity, LRU eviction, TTL expiry
//! on lookup.

use std::net::SocketAddr;

use eft_msg::Token;
use embedded_time::Instant;

use crate::config::Security;
use crate::crypto::ContextId;
use crate::time::{millis_since, Clock, Millis};

/// One tracked request/response exchange.
#[derive(Debug, Clone)]
pub struct Exchange<C: Clock> {
  /// The requesting endpoint
  pub peer: SocketAddr,
  /// The request token
  pub token: Token,
  /// Whether this exchange carries an observation (notifications keep
  /// using it after the first response)
  pub is_observe: bool,
  /// Handle to the context that unprotected the request
  pub ctx: ContextId,
  stamp: Instant<C>,
}

/// Fixed-capacity `(peer, token) → context` table.
#[derive(Debug)]
pub struct ExchangeTable<C: Clock> {
  entries: Vec<Exchange<C>>,
  capacity: usize,
  lifetime: Millis,
}

impl<C: Clock> ExchangeTable<C> {
  /// Size the table from config.
  pub fn new(cfg: &Security) -> Self {
    Self { entries: Vec::new(),
           capacity: cfg.oscore_exchange_cache_size.max(1),
           lifetime: cfg.oscore_exchange_lifetime }
  }

  fn expire(&mut self, now: Instant<C>) {
    let lifetime = self.lifetime;
    self.entries.retain(|e| millis_since(now, e.stamp) <= lifetime);
  }

  /// Insert (or refresh) an exchange, evicting the least recently
  /// touched entry when full.
  pub fn add(&mut self,
             peer: SocketAddr,
             token: Token,
             is_observe: bool,
             ctx: ContextId,
             now: Instant<C>) {
    self.expire(now);

    if let Some(e) = self.entries
                         .iter_mut()
                         .find(|e| e.peer == peer && e.token == token)
    {
      e.is_observe = is_observe;
      e.ctx = ctx;
      e.stamp = now;
      return;
    }

    if self.entries.len() >= self.capacity {
      if let Some(oldest) = self.entries
                                .iter()
                                .enumerate()
                                .max_by_key(|(_, e)| millis_since(now, e.stamp).0)
                                .map(|(ix, _)| ix)
      {
        self.entries.swap_remove(oldest);
      }
    }

    self.entries.push(Exchange { peer,
                                 token,
                                 is_observe,
                                 ctx,
                                 stamp: now });
  }

  /// Look up the exchange for `(peer, token)`, dropping anything
  /// expired on the way.
  pub fn find(&mut self, peer: SocketAddr, token: Token, now: Instant<C>) -> Option<&Exchange<C>> {
    self.expire(now);
    self.entries
        .iter()
        .find(|e| e.peer == peer && e.token == token)
  }

  /// Remove and return the exchange for `(peer, token)`.
  pub fn remove(&mut self, peer: SocketAddr, token: Token) -> Option<Exchange<C>> {
    self.entries
        .iter()
        .position(|e| e.peer == peer && e.token == token)
        .map(|ix| self.entries.swap_remove(ix))
  }

  /// Live entry count.
  pub fn len(&self) -> usize {
    self.entries.len()
  }

  /// Whether the table is empty.
  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test::{dummy_addr, dummy_addr_2, ClockMock};

  fn table(capacity: usize) -> ExchangeTable<ClockMock> {
    ExchangeTable::new(&Security { oscore_exchange_cache_size: capacity,
                                   ..Security::default() })
  }

  fn tok(s: &[u8]) -> Token {
    Token::from_slice(s)
  }

  #[test]
  fn add_then_find_then_remove() {
    let clock = ClockMock::new();
    let mut t = table(4);

    t.add(dummy_addr(), tok(b"a"), false, ContextId(1), clock.now());

    let found = t.find(dummy_addr(), tok(b"a"), clock.now()).unwrap();
    assert_eq!(found.ctx, ContextId(1));
    assert!(!found.is_observe);

    assert!(t.remove(dummy_addr(), tok(b"a")).is_some());
    assert!(t.find(dummy_addr(), tok(b"a"), clock.now()).is_none());
  }

  #[test]
  fn lookup_expires_stale_entries() {
    let clock = ClockMock::new();
    let mut t = table(4);

    t.add(dummy_addr(), tok(b"a"), false, ContextId(1), clock.now());

    clock.set(247_001);
    assert!(t.find(dummy_addr(), tok(b"a"), clock.now()).is_none());
    assert!(t.is_empty());
  }

  #[test]
  fn full_table_evicts_lru() {
    let clock = ClockMock::new();
    let mut t = table(2);

    clock.set(1);
    t.add(dummy_addr(), tok(b"a"), false, ContextId(1), clock.now());
    clock.set(2);
    t.add(dummy_addr(), tok(b"b"), false, ContextId(2), clock.now());

    // refresh "a" so "b" becomes the LRU
    clock.set(3);
    t.add(dummy_addr(), tok(b"a"), false, ContextId(1), clock.now());

    clock.set(4);
    t.add(dummy_addr_2(), tok(b"c"), false, ContextId(3), clock.now());

    assert_eq!(t.len(), 2);
    assert!(t.find(dummy_addr(), tok(b"a"), clock.now()).is_some());
    assert!(t.find(dummy_addr(), tok(b"b"), clock.now()).is_none());
    assert!(t.find(dummy_addr_2(), tok(b"c"), clock.now()).is_some());
  }

  #[test]
  fn same_key_refreshes_in_place() {
    let clock = ClockMock::new();
    let mut t = table(2);

    t.add(dummy_addr(), tok(b"a"), false, ContextId(1), clock.now());
    t.add(dummy_addr(), tok(b"a"), true, ContextId(9), clock.now());

    assert_eq!(t.len(), 1);
    let e = t.find(dummy_addr(), tok(b"a"), clock.now()).unwrap();
    assert_eq!(e.ctx, ContextId(9));
    assert!(e.is_observe);
  }
}
