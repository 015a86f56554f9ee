//! Matching inbound messages to outstanding requests.
//!
//! The rule (RFC 7252 section 4.4 / 5.3.2) is split by shape:
//! - empty ACK and RST messages are transport-level and match on
//!   (peer, Message ID),
//! - everything else (piggybacked and separate responses) matches on
//!   (peer, token).
//!
//! Each outstanding request owns a [`ReplySlot`]; the service loop fills
//! it and a blocked caller wakes up. Slots are the runtime's only
//! condvar, and no cache mutex is ever held while waiting on one.

use std::net::SocketAddr;
use std::sync::{Arc, Condvar, Mutex};

use eft_msg::{Code, CodeKind, Id, Message, Token, Type};
use embedded_time::Instant;

use crate::config::Transmission;
use crate::net::Addrd;
use crate::pending::{Disposition, Pending};
use crate::time::Clock;

/// Terminal outcome of an outstanding request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
  /// A response arrived.
  Response(Addrd<Message>),
  /// The peer rejected the message with RST.
  Reset,
  /// Retransmissions were exhausted.
  Timeout,
}

#[derive(Debug)]
enum SlotState {
  Waiting,
  Done(ReplyOutcome),
  Taken,
}

/// A one-shot slot a requester parks on until its reply arrives.
#[derive(Debug)]
pub struct ReplySlot {
  state: Mutex<SlotState>,
  cond: Condvar,
}

impl ReplySlot {
  fn new() -> Arc<Self> {
    Arc::new(Self { state: Mutex::new(SlotState::Waiting),
                    cond: Condvar::new() })
  }

  fn fill(&self, outcome: ReplyOutcome) {
    let mut state = self.state.lock().expect("reply slot poisoned");
    if matches!(*state, SlotState::Waiting) {
      *state = SlotState::Done(outcome);
      self.cond.notify_all();
    }
  }

  /// Take the outcome without blocking, if it is there.
  pub fn try_take(&self) -> Option<ReplyOutcome> {
    let mut state = self.state.lock().expect("reply slot poisoned");
    match std::mem::replace(&mut *state, SlotState::Taken) {
      | SlotState::Done(outcome) => Some(outcome),
      | prev => {
        *state = prev;
        None
      },
    }
  }

  /// Block until the outcome arrives.
  ///
  /// Only sound when something else (another thread driving the
  /// service loop) can fill the slot.
  pub fn wait(&self) -> ReplyOutcome {
    let mut state = self.state.lock().expect("reply slot poisoned");
    loop {
      match std::mem::replace(&mut *state, SlotState::Taken) {
        | SlotState::Done(outcome) => return outcome,
        | prev => {
          *state = prev;
          state = self.cond.wait(state).expect("reply slot poisoned");
        },
      }
    }
  }
}

#[derive(Debug)]
struct Entry<C: Clock> {
  peer: SocketAddr,
  id: Id,
  token: Token,
  acked: bool,
  pending: Option<Pending<C>>,
  slot: Arc<ReplySlot>,
}

/// The table of requests we sent and have not heard back about.
#[derive(Debug)]
pub struct Matcher<C: Clock> {
  entries: Vec<Entry<C>>,
}

impl<C: Clock> Default for Matcher<C> {
  fn default() -> Self {
    Self { entries: Vec::new() }
  }
}

impl<C: Clock> Matcher<C> {
  /// Create an empty table.
  pub fn new() -> Self {
    Self::default()
  }

  /// Track a just-sent request, yielding the slot its reply will land in.
  ///
  /// CON requests get a retransmission timer; NON requests only get the
  /// slot (they expire via [`Matcher::poll`] once the timer the caller
  /// chose to give them runs out, or never).
  pub fn register(&mut self,
                  req: Addrd<Message>,
                  now: Instant<C>,
                  params: Transmission)
                  -> Arc<ReplySlot> {
    let slot = ReplySlot::new();
    let pending = match req.data().ty {
      | Type::Con => Some(Pending::new(req.clone(), now, params)),
      | _ => None,
    };

    self.entries.push(Entry { peer: req.addr(),
                              id: req.data().id,
                              token: req.data().token,
                              acked: false,
                              pending,
                              slot: Arc::clone(&slot) });
    slot
  }

  /// Route an inbound message to the request that caused it.
  ///
  /// Returns the message back when nothing here claims it (it is a
  /// request for the server half, or a stray).
  pub fn accept(&mut self, msg: Addrd<Message>) -> Option<Addrd<Message>> {
    let empty = msg.data().code.kind() == CodeKind::Empty;

    match (empty, msg.data().ty) {
      | (true, Type::Ack) => {
        // empty ACK quiets the retransmit timer; the real response
        // comes separately and matches by token
        if let Some(e) = self.entries
                             .iter_mut()
                             .find(|e| e.peer == msg.addr() && e.id == msg.data().id)
        {
          e.acked = true;
          e.pending = None;
          None
        } else {
          Some(msg)
        }
      },
      | (true, Type::Reset) => match self.entries
                                         .iter()
                                         .position(|e| {
                                           e.peer == msg.addr() && e.id == msg.data().id
                                         }) {
        | Some(ix) => {
          let e = self.entries.swap_remove(ix);
          e.slot.fill(ReplyOutcome::Reset);
          None
        },
        | None => Some(msg),
      },
      | _ if msg.data().code.kind() == CodeKind::Response => {
        match self.entries.iter().position(|e| {
                                   e.peer == msg.addr() && e.token == msg.data().token
                                 }) {
          | Some(ix) => {
            let e = self.entries.swap_remove(ix);
            e.slot.fill(ReplyOutcome::Response(msg));
            None
          },
          | None => Some(msg),
        }
      },
      | _ => Some(msg),
    }
  }

  /// Drive retransmission timers.
  ///
  /// Yields the messages to put back on the wire; entries that spent
  /// their retransmissions resolve their slot with
  /// [`ReplyOutcome::Timeout`] and are dropped.
  pub fn poll(&mut self, now: Instant<C>) -> Vec<Addrd<Message>> {
    let mut resend = Vec::new();

    self.entries.retain_mut(|e| {
                  let Some(pending) = e.pending.as_mut() else {
                    return true;
                  };

                  match pending.cycle(now) {
                    | Err(nb::Error::WouldBlock) => true,
                    | Ok(Disposition::Retransmit) => {
                      resend.push(pending.message().clone());
                      true
                    },
                    | Ok(Disposition::Expired) => {
                      e.slot.fill(ReplyOutcome::Timeout);
                      false
                    },
                    | Err(nb::Error::Other(never)) => match never {},
                  }
                });

    resend
  }

  /// Number of outstanding requests.
  pub fn len(&self) -> usize {
    self.entries.len()
  }

  /// Whether anything is outstanding.
  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Forget an outstanding request (observation cancelled, shutdown).
  pub fn forget(&mut self, peer: SocketAddr, token: Token) {
    self.entries.retain(|e| !(e.peer == peer && e.token == token));
  }
}

/// Whether `incoming` is addressed to the request `sent`, per the
/// (MID + type) / token split described in the module docs.
pub fn matches(sent: &Addrd<Message>, incoming: &Addrd<Message>) -> bool {
  if sent.addr() != incoming.addr() {
    return false;
  }

  let empty = incoming.data().code == Code::EMPTY;
  match incoming.data().ty {
    | Type::Ack | Type::Reset if empty => incoming.data().id == sent.data().id,
    | _ => incoming.data().token == sent.data().token,
  }
}

#[cfg(test)]
mod tests {
  use embedded_time::duration::Milliseconds;

  use super::*;
  use crate::test::{dummy_addr, dummy_addr_2, msg, ClockMock};

  fn params() -> Transmission {
    Transmission { ack_timeout: Milliseconds(1_000),
                   ack_random_percent: 100,
                   backoff_percent: 200,
                   max_retransmit: 1 }
  }

  #[test]
  fn empty_ack_matches_by_mid_and_quiets_retransmit() {
    let clock = ClockMock::new();
    let mut m = Matcher::new();

    let req = Addrd(msg(Type::Con, Code::GET, 7, b"tok"), dummy_addr());
    let slot = m.register(req, clock.now(), params());

    let ack = Addrd(msg(Type::Ack, Code::EMPTY, 7, b""), dummy_addr());
    assert!(m.accept(ack).is_none());
    assert!(slot.try_take().is_none());

    // retransmit timer is gone
    clock.set(10_000);
    assert!(m.poll(clock.now()).is_empty());
    assert_eq!(m.len(), 1);
  }

  #[test]
  fn separate_response_matches_by_token() {
    let clock = ClockMock::new();
    let mut m = Matcher::new();

    let req = Addrd(msg(Type::Con, Code::GET, 7, b"tok"), dummy_addr());
    let slot = m.register(req, clock.now(), params());

    // a response with the right token but a fresh MID
    let resp = Addrd(msg(Type::Con, Code::CONTENT, 99, b"tok"), dummy_addr());
    assert!(m.accept(resp.clone()).is_none());
    assert_eq!(slot.try_take(), Some(ReplyOutcome::Response(resp)));
    assert!(m.is_empty());
  }

  #[test]
  fn reset_matches_by_mid() {
    let clock = ClockMock::new();
    let mut m = Matcher::new();

    let req = Addrd(msg(Type::Con, Code::GET, 7, b"tok"), dummy_addr());
    let slot = m.register(req, clock.now(), params());

    let rst = Addrd(msg(Type::Reset, Code::EMPTY, 7, b""), dummy_addr());
    assert!(m.accept(rst).is_none());
    assert_eq!(slot.try_take(), Some(ReplyOutcome::Reset));
  }

  #[test]
  fn wrong_peer_does_not_match() {
    let clock = ClockMock::new();
    let mut m = Matcher::new();

    let req = Addrd(msg(Type::Con, Code::GET, 7, b"tok"), dummy_addr());
    let _slot = m.register(req, clock.now(), params());

    let resp = Addrd(msg(Type::Con, Code::CONTENT, 99, b"tok"), dummy_addr_2());
    assert!(m.accept(resp).is_some());
    assert_eq!(m.len(), 1);
  }

  #[test]
  fn exhausted_retransmissions_time_out() {
    let clock = ClockMock::new();
    let mut m = Matcher::new();

    let req = Addrd(msg(Type::Con, Code::GET, 7, b"tok"), dummy_addr());
    let slot = m.register(req.clone(), clock.now(), params());

    clock.set(1_000);
    let resend = m.poll(clock.now());
    assert_eq!(resend, vec![req]);

    clock.set(3_000);
    assert!(m.poll(clock.now()).is_empty());
    assert_eq!(slot.try_take(), Some(ReplyOutcome::Timeout));
    assert!(m.is_empty());
  }

  #[test]
  fn matches_splits_on_shape() {
    let sent = Addrd(msg(Type::Con, Code::GET, 7, b"tok"), dummy_addr());

    let empty_ack = Addrd(msg(Type::Ack, Code::EMPTY, 7, b""), dummy_addr());
    let piggyback = Addrd(msg(Type::Ack, Code::CONTENT, 7, b"tok"), dummy_addr());
    let wrong_mid_ack = Addrd(msg(Type::Ack, Code::EMPTY, 8, b""), dummy_addr());

    assert!(matches(&sent, &empty_ack));
    assert!(matches(&sent, &piggyback));
    assert!(!matches(&sent, &wrong_mid_ack));
  }
}
