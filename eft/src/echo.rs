//! Echo amplification mitigation (RFC 9175 section 2.3).
//!
//! A state-changing request from a peer we have never heard back from
//! could be a spoofed-source amplification attempt. The first such
//! request is answered 4.01 with a fresh Echo nonce; the legitimate
//! retry carries the nonce back, proves the peer owns its address, and
//! is let through. Verified peers skip the dance for a configured
//! window.

use std::net::SocketAddr;

use eft_msg::Message;
use embedded_time::Instant;
use rand::RngCore;

use crate::config::Security;
use crate::net::Addrd;
use crate::secure::{ct_eq, wipe_vec};
use crate::time::{millis_since, Clock, Millis};

/// Verdict of the Echo gate for one inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gate {
  /// Safe method, verified peer, or correct echoed nonce: process it.
  Pass,
  /// Challenge the peer: 4.01 Unauthorized with this Echo value.
  Challenge(Vec<u8>),
}

#[derive(Debug)]
struct Entry<C: Clock> {
  peer: SocketAddr,
  nonce: Vec<u8>,
  stamp: Instant<C>,
  verified: bool,
}

/// Per-peer Echo state: fixed capacity, LRU-evicted, TTL-expired on
/// lookup.
#[derive(Debug)]
pub struct EchoCache<C: Clock> {
  entries: Vec<Entry<C>>,
  capacity: usize,
  nonce_len: usize,
  window: Millis,
}

impl<C: Clock> EchoCache<C> {
  /// Size the cache from config.
  ///
  /// Nonces are `echo_max_len` bytes, held to the 1..=40 range of
  /// RFC 9175 section 2.2.1.
  pub fn new(cfg: &Security) -> Self {
    Self { entries: Vec::new(),
           capacity: cfg.echo_cache_size.max(1),
           nonce_len: cfg.echo_max_len.clamp(1, 40),
           window: cfg.echo_verified_window }
  }

  fn expire(&mut self, now: Instant<C>) {
    let window = self.window;
    self.entries.retain_mut(|e| {
                  if millis_since(now, e.stamp) > window {
                    wipe_vec(&mut e.nonce);
                    false
                  } else {
                    true
                  }
                });
  }

  fn position(&self, peer: SocketAddr) -> Option<usize> {
    self.entries.iter().position(|e| e.peer == peer)
  }

  /// Whether a peer is currently verified.
  pub fn is_verified(&mut self, peer: SocketAddr, now: Instant<C>) -> bool {
    self.expire(now);
    self.position(peer)
        .map(|ix| self.entries[ix].verified)
        .unwrap_or(false)
  }

  /// Run the gate for an inbound request.
  ///
  /// Safe methods (GET, FETCH) always pass. Unsafe methods pass only for
  /// verified peers or requests echoing the stored nonce; anything else
  /// is challenged with a fresh nonce drawn from `rng`.
  pub fn gate<R: RngCore>(&mut self,
                          req: &Addrd<Message>,
                          now: Instant<C>,
                          rng: &mut R)
                          -> Gate {
    if !req.data().code.is_unsafe_method() {
      return Gate::Pass;
    }

    self.expire(now);

    if let Some(ix) = self.position(req.addr()) {
      if self.entries[ix].verified {
        self.entries[ix].stamp = now;
        return Gate::Pass;
      }

      if let Some(echoed) = req.data().echo() {
        if ct_eq(echoed, &self.entries[ix].nonce) {
          self.entries[ix].verified = true;
          self.entries[ix].stamp = now;
          return Gate::Pass;
        }
      }
    }

    self.challenge(req.addr(), now, rng)
  }

  /// Mint (and store) a fresh challenge nonce for a peer, regardless of
  /// method. Used when a security failure demands a freshness proof in
  /// its error response.
  pub fn mint_challenge<R: RngCore>(&mut self,
                                    peer: SocketAddr,
                                    now: Instant<C>,
                                    rng: &mut R)
                                    -> Vec<u8> {
    match self.challenge(peer, now, rng) {
      | Gate::Challenge(nonce) => nonce,
      | Gate::Pass => Vec::new(),
    }
  }

  fn challenge<R: RngCore>(&mut self, peer: SocketAddr, now: Instant<C>, rng: &mut R) -> Gate {
    let mut nonce = vec![0u8; self.nonce_len];
    rng.fill_bytes(&mut nonce);

    match self.position(peer) {
      | Some(ix) => {
        wipe_vec(&mut self.entries[ix].nonce);
        self.entries[ix].nonce = nonce.clone();
        self.entries[ix].stamp = now;
        self.entries[ix].verified = false;
      },
      | None => {
        if self.entries.len() >= self.capacity {
          // evict the least recently touched entry, wiped first
          if let Some(oldest) = self.entries
                                    .iter()
                                    .enumerate()
                                    .max_by_key(|(_, e)| millis_since(now, e.stamp).0)
                                    .map(|(ix, _)| ix)
          {
            let mut evicted = self.entries.swap_remove(oldest);
            wipe_vec(&mut evicted.nonce);
          }
        }

        self.entries.push(Entry { peer,
                                  nonce: nonce.clone(),
                                  stamp: now,
                                  verified: false });
      },
    }

    Gate::Challenge(nonce)
  }
}
