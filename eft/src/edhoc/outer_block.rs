//! Outer Block1 reassembly for combined requests (RFC 9668
//! section 3.3.2).
//!
//! A combined request too big for one datagram arrives as an outer
//! Block1 series that must be stitched back together **before** the
//! EDHOC/OSCORE split can run. Operations are keyed
//! `(peer, token, request-tag list)` (RFC 9175 section 3.3); every
//! validation failure wipes the entry before the error response goes
//! out.
//!
//! The first block's header and options become a
//! [`PacketBuilder`] template; the final block appends the payload
//! marker and the reassembled body to it, yielding the full request as
//! one wire-encoded datagram.
//!
//! The same cache reassembles OSCORE-only outer Block1 series; the key
//! does not care whether the first block carried the EDHOC option.

use std::net::SocketAddr;

use eft_msg::build::PacketBuilder;
use eft_msg::{Block, Message, Token};
use embedded_time::Instant;

use crate::block::{BlockError, Progress, Reassembly};
use crate::config::Security;
use crate::net::Addrd;
use crate::reqtag::RequestTagList;
use crate::time::{millis_since, Clock, Millis};

/// What the dispatcher should do with the datagram it handed in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OuterBlockOutcome {
  /// Not an outer-blockwise combined operation; process normally.
  NotCombined,
  /// Block buffered; answer 2.31 Continue echoing this Block1.
  Continue(Block),
  /// Last block arrived: here is the reconstructed full request,
  /// wire-encoded (header template, payload marker, reassembled body).
  Complete(Vec<u8>),
}

/// Failures of the reassembly path. All fail closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OuterBlockError {
  /// Malformed or out-of-sequence blockwise usage → 4.00
  BadRequest,
  /// The EDHOC option appeared more than once → 4.02 for CON,
  /// silence for NON
  RepeatedEdhocOption,
  /// The reassembled body crossed the ceiling → 4.13 with Size1
  TooLarge {
    /// The configured ceiling (also the Size1 value to report)
    limit: usize,
  },
}

#[derive(Debug)]
struct Entry<C: Clock> {
  peer: SocketAddr,
  token: Token,
  tags: RequestTagList,
  template: PacketBuilder,
  reassembly: Reassembly,
  stamp: Instant<C>,
}

/// The bounded outer-Block1 reassembly cache.
#[derive(Debug)]
pub struct OuterBlockCache<C: Clock> {
  entries: Vec<Entry<C>>,
  capacity: usize,
  lifetime: Millis,
  max_len: usize,
}

impl<C: Clock> OuterBlockCache<C> {
  /// Size the cache from config.
  pub fn new(cfg: &Security) -> Self {
    Self { entries: Vec::new(),
           capacity: cfg.outer_block_cache_size.max(1),
           lifetime: cfg.outer_block_lifetime,
           max_len: cfg.outer_block_max_len }
  }

  /// The reassembly ceiling, for Size1 reporting.
  pub fn max_len(&self) -> usize {
    self.max_len
  }

  fn expire(&mut self, now: Instant<C>) {
    let lifetime = self.lifetime;
    self.entries.retain_mut(|e| {
                  if millis_since(now, e.stamp) > lifetime {
                    e.reassembly.wipe();
                    false
                  } else {
                    true
                  }
                });
  }

  fn position(&self, peer: SocketAddr, token: Token, tags: &RequestTagList) -> Option<usize> {
    self.entries
        .iter()
        .position(|e| e.peer == peer && e.token == token && &e.tags == tags)
  }

  fn clear_at(&mut self, ix: usize) {
    let mut entry = self.entries.swap_remove(ix);
    entry.reassembly.wipe();
  }

  /// Feed one inbound datagram through the reassembler.
  ///
  /// Only call when `req` carries a Block1 option.
  pub fn process(&mut self,
                 req: &Addrd<Message>,
                 now: Instant<C>)
                 -> Result<OuterBlockOutcome, OuterBlockError> {
    self.expire(now);

    let Some(block) = req.data().block1() else {
      return Ok(OuterBlockOutcome::NotCombined);
    };

    // Block1 operations need a token to be distinguishable
    if req.data().token.0.is_empty() {
      return Err(OuterBlockError::BadRequest);
    }

    let tags = RequestTagList::parse(req.data()).map_err(|_| OuterBlockError::BadRequest)?;

    let first = block.num() == 0;
    let found = self.position(req.addr(), req.data().token, &tags);
    let has_edhoc = req.data().has_edhoc();

    if first && !has_edhoc {
      return Ok(OuterBlockOutcome::NotCombined);
    }

    // RFC 9668 section 3.1 + RFC 7252 section 5.4.5: at most one EDHOC
    // option, value ignored
    if has_edhoc && req.data().count(eft_msg::known::no_repeat::EDHOC) > 1 {
      if let Some(ix) = found {
        self.clear_at(ix);
      }
      return Err(OuterBlockError::RepeatedEdhocOption);
    }

    if !first && found.is_none() {
      // a continuation we know nothing about. If the same (peer, token)
      // is mid-operation under a different Request-Tag list, that is a
      // tag change: fail closed and wipe it.
      if let Some(ix) = self.entries.iter().position(|e| {
                                             e.peer == req.addr()
                                             && e.token == req.data().token
                                           })
      {
        log::warn!("outer block1: request-tag list changed mid-operation");
        self.clear_at(ix);
        return Err(OuterBlockError::BadRequest);
      }

      return Ok(OuterBlockOutcome::NotCombined);
    }

    let payload = &req.data().payload.0;
    if payload.is_empty() {
      if let Some(ix) = found {
        self.clear_at(ix);
      }
      return Err(OuterBlockError::BadRequest);
    }

    let ix = match (first, found) {
      | (true, Some(ix)) => {
        // NUM 0 restarts the operation
        self.clear_at(ix);
        self.allocate(req, &tags, now)?
      },
      | (true, None) => self.allocate(req, &tags, now)?,
      | (false, Some(ix)) => ix,
      | (false, None) => unreachable!("handled above"),
    };

    self.entries[ix].stamp = now;

    match self.entries[ix].reassembly.accept(block, payload, self.max_len) {
      | Ok(Progress::Continue) => Ok(OuterBlockOutcome::Continue(block)),
      | Ok(Progress::Complete(body)) => {
        let Entry { mut template, .. } = self.entries.swap_remove(ix);

        template.append_payload_marker();
        template.append_payload(&body).map_err(|_| OuterBlockError::BadRequest)?;

        template.finish()
                .map(OuterBlockOutcome::Complete)
                .map_err(|_| OuterBlockError::BadRequest)
      },
      | Err(BlockError::TooLarge { limit }) => {
        self.clear_at(ix);
        Err(OuterBlockError::TooLarge { limit })
      },
      | Err(_) => {
        self.clear_at(ix);
        Err(OuterBlockError::BadRequest)
      },
    }
  }

  /// Start an operation: re-encode the first block's header and options
  /// (Block1 included, the dispatcher strips it from the
  /// reconstruction) as the template the final block completes.
  fn allocate(&mut self,
              req: &Addrd<Message>,
              tags: &RequestTagList,
              now: Instant<C>)
              -> Result<usize, OuterBlockError> {
    let msg = req.data();

    let mut template = PacketBuilder::init(msg.ver,
                                           msg.ty,
                                           msg.token.as_bytes(),
                                           msg.code,
                                           msg.id).map_err(|_| OuterBlockError::BadRequest)?;

    // the option store iterates in ascending numeric order, so this
    // can never trip the builder's order check
    for (number, values) in &msg.opts {
      for value in values {
        template.append_option(*number, &value.0)
                .map_err(|_| OuterBlockError::BadRequest)?;
      }
    }

    if self.entries.len() >= self.capacity {
      if let Some(oldest) = self.entries
                                .iter()
                                .enumerate()
                                .max_by_key(|(_, e)| millis_since(now, e.stamp).0)
                                .map(|(ix, _)| ix)
      {
        self.clear_at(oldest);
      }
    }

    self.entries.push(Entry { peer: req.addr(),
                              token: req.data().token,
                              tags: tags.clone(),
                              template,
                              reassembly: Reassembly::new(),
                              stamp: now });

    Ok(self.entries.len() - 1)
  }

  /// Live operation count.
  pub fn len(&self) -> usize {
    self.entries.len()
  }

  /// Whether no reassembly is in flight.
  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Test hook: wipe every in-flight operation.
  #[cfg(any(test, feature = "test"))]
  pub fn clear_all(&mut self) {
    while !self.entries.is_empty() {
      self.clear_at(0);
    }
  }
}
