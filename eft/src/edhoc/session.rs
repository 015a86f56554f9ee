//! EDHOC responder sessions.
//!
//! A session is born when message_1 arrives, waits (keyed by the C_R we
//! allocated) for message_3, and once completed feeds the OSCORE context
//! derivation of RFC 9528 appendix A.1 table 14. The table is bounded;
//! eviction and failure both wipe PRK_out through [`zeroize`].

use embedded_time::Instant;
use zeroize::Zeroize;

use crate::config::Security;
use crate::crypto::{DriverError, EdhocDriver, OscoreMaterial};
use crate::edhoc::{EXPORTER_LABEL_MASTER_SALT, EXPORTER_LABEL_MASTER_SECRET, MASTER_SALT_LEN,
                   MASTER_SECRET_LEN};
use crate::time::{millis_since, Clock};

/// Responder-side handshake states.
///
/// There is no `WAIT_MSG1`: a session only exists once message_1 has
/// been accepted and C_R allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
  /// message_2 was sent; message_3 is expected under our C_R.
  WaitMsg3,
  /// message_3 verified; PRK_out is available to the exporter.
  Completed,
}

/// One responder session.
#[derive(Debug, Clone)]
pub struct Session<C: Clock> {
  /// Connection identifier we allocated (the session key)
  pub c_r: Vec<u8>,
  /// The initiator's connection identifier
  pub c_i: Vec<u8>,
  /// PRK_out once completed, empty before that
  pub prk_out: Vec<u8>,
  /// Transcript hash the driver needs to verify message_3
  pub transcript_hash: Vec<u8>,
  /// Whether the initiator asked for message_4
  pub msg4_required: bool,
  /// See [`SessionState`]
  pub state: SessionState,
  stamp: Instant<C>,
}

impl<C: Clock> Session<C> {
  fn wipe(&mut self) {
    self.prk_out.zeroize();
    self.transcript_hash.zeroize();
  }
}

/// Bounded, LRU-evicted session table keyed by C_R.
#[derive(Debug)]
pub struct SessionTable<C: Clock> {
  entries: Vec<Session<C>>,
  capacity: usize,
}

impl<C: Clock> SessionTable<C> {
  /// Size the table from config.
  pub fn new(cfg: &Security) -> Self {
    Self { entries: Vec::new(),
           capacity: cfg.edhoc_session_cache_size.max(1) }
  }

  /// Allocate a C_R no live session is using.
  ///
  /// Single-byte identifiers 0..=23 (the ones that encode as one CBOR
  /// integer byte) are preferred; when all 24 are taken the least
  /// recently touched session is evicted, wiped first.
  pub fn allocate_c_r(&mut self, now: Instant<C>) -> Vec<u8> {
    for candidate in 0u8..24 {
      if !self.entries.iter().any(|s| s.c_r == [candidate]) {
        return vec![candidate];
      }
    }

    self.evict_lru(now);
    self.allocate_c_r(now)
  }

  fn evict_lru(&mut self, now: Instant<C>) {
    if let Some(oldest) = self.entries
                              .iter()
                              .enumerate()
                              .max_by_key(|(_, s)| millis_since(now, s.stamp).0)
                              .map(|(ix, _)| ix)
    {
      let mut evicted = self.entries.swap_remove(oldest);
      evicted.wipe();
    }
  }

  /// Store a freshly created session awaiting message_3.
  pub fn insert(&mut self,
                c_r: Vec<u8>,
                c_i: Vec<u8>,
                transcript_hash: Vec<u8>,
                msg4_required: bool,
                now: Instant<C>) {
    if self.entries.len() >= self.capacity {
      self.evict_lru(now);
    }

    self.entries.push(Session { c_r,
                                c_i,
                                prk_out: Vec::new(),
                                transcript_hash,
                                msg4_required,
                                state: SessionState::WaitMsg3,
                                stamp: now });
  }

  /// Find a live session by C_R.
  pub fn find_mut(&mut self, c_r: &[u8]) -> Option<&mut Session<C>> {
    self.entries.iter_mut().find(|s| s.c_r == c_r)
  }

  /// Remove a session, wiping its secrets.
  pub fn remove(&mut self, c_r: &[u8]) -> bool {
    match self.entries.iter().position(|s| s.c_r == c_r) {
      | Some(ix) => {
        let mut removed = self.entries.swap_remove(ix);
        removed.wipe();
        true
      },
      | None => false,
    }
  }

  /// Live session count.
  pub fn len(&self) -> usize {
    self.entries.len()
  }

  /// Whether no session is live.
  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

/// Derive the OSCORE material a completed responder session yields
/// (RFC 9528 appendix A.1 table 14).
///
/// Master Secret and Master Salt come from the exporter under labels 0
/// and 1; the Responder uses `Sender ID = C_I` and
/// `Recipient ID = C_R` (the Initiator inverts both).
pub fn derive_oscore_material<C: Clock, D: EdhocDriver>(driver: &D,
                                                        session: &Session<C>)
                                                        -> Result<OscoreMaterial, DriverError> {
  let master_secret = driver.exporter(&session.prk_out,
                                      EXPORTER_LABEL_MASTER_SECRET,
                                      MASTER_SECRET_LEN)?;
  let master_salt = driver.exporter(&session.prk_out,
                                    EXPORTER_LABEL_MASTER_SALT,
                                    MASTER_SALT_LEN)?;

  Ok(OscoreMaterial { master_secret,
                      master_salt,
                      sender_id: session.c_i.clone(),
                      recipient_id: session.c_r.clone() })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test::{ClockMock, MockDriver};

  fn table(capacity: usize) -> SessionTable<ClockMock> {
    SessionTable::new(&Security { edhoc_session_cache_size: capacity,
                                  ..Security::default() })
  }

  #[test]
  fn allocated_c_rs_are_unique_single_bytes() {
    let clock = ClockMock::new();
    let mut t = table(30);

    for expected in 0u8..24 {
      let c_r = t.allocate_c_r(clock.now());
      assert_eq!(c_r, vec![expected]);
      t.insert(c_r, vec![0x0A], b"TH2".to_vec(), false, clock.now());
    }
  }

  #[test]
  fn exhausting_identifiers_evicts_the_oldest_session() {
    let clock = ClockMock::new();
    let mut t = table(30);

    for i in 0u64..24 {
      clock.set(i);
      let c_r = t.allocate_c_r(clock.now());
      t.insert(c_r, vec![0x0A], b"TH2".to_vec(), false, clock.now());
    }

    clock.set(100);
    let c_r = t.allocate_c_r(clock.now());
    assert_eq!(c_r, vec![0]); // the oldest (c_r = 0) was evicted
    assert_eq!(t.len(), 23);
  }

  #[test]
  fn sessions_store_c_i_and_complete() {
    let clock = ClockMock::new();
    let mut t = table(4);

    t.insert(vec![1], vec![0x0A], b"TH2".to_vec(), false, clock.now());

    let s = t.find_mut(&[1]).unwrap();
    assert_eq!(s.state, SessionState::WaitMsg3);
    assert_eq!(s.c_i, vec![0x0A]);

    s.prk_out = vec![0x11; 32];
    s.state = SessionState::Completed;

    assert!(t.remove(&[1]));
    assert!(t.is_empty());
  }

  #[test]
  fn capacity_overflow_wipes_and_evicts() {
    let clock = ClockMock::new();
    let mut t = table(1);

    clock.set(1);
    t.insert(vec![1], vec![0x0A], b"TH2".to_vec(), false, clock.now());
    clock.set(2);
    t.insert(vec![2], vec![0x0B], b"TH2".to_vec(), false, clock.now());

    assert_eq!(t.len(), 1);
    assert!(t.find_mut(&[1]).is_none());
    assert!(t.find_mut(&[2]).is_some());
  }

  #[test]
  fn responder_material_follows_table_14() {
    let clock = ClockMock::new();
    let mut t = table(4);
    t.insert(vec![0x17], vec![0x0A], b"TH2".to_vec(), false, clock.now());

    let s = t.find_mut(&[0x17]).unwrap();
    s.prk_out = vec![0x11; 32];
    s.state = SessionState::Completed;

    let driver = MockDriver::new();
    let material = derive_oscore_material(&driver, s).unwrap();

    assert_eq!(material.master_secret, vec![0xA5; 16]);
    assert_eq!(material.master_salt, vec![0x5A; 8]);
    // Responder: Sender ID = C_I, Recipient ID = C_R
    assert_eq!(material.sender_id, vec![0x0A]);
    assert_eq!(material.recipient_id, vec![0x17]);

    assert_eq!(*driver.exporter_calls.borrow(), vec![(0, 16), (1, 8)]);
  }
}
