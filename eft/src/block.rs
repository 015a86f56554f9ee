//! Blockwise transfer engine (RFC 7959, RFC 9177).
//!
//! [`Transfer`] drives the sending side of a Block1/Q-Block1 series;
//! [`Reassembly`] drives the receiving side. Both advance by the *actual*
//! payload length of the block that moved, not the nominal block size, so
//! a short final block lands exactly (RFC 7959 section 2.5).
//!
//! Block and Q-Block are mutually exclusive within a message
//! (RFC 9177 section 4.1); [`validate_block_q_block_mixing`] is the choke
//! point the dispatcher runs on every parsed message.

use eft_msg::known::no_repeat::{BLOCK1, BLOCK2, Q_BLOCK1, Q_BLOCK2};
use eft_msg::{Block, Message};

/// Ways a blockwise operation can go wrong.
///
/// All of these are *protocol* errors: the reassembly state is wiped and
/// the wire answer is 4.00 (or 4.13 for [`BlockError::TooLarge`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockError {
  /// Block1/Block2 mixed with Q-Block1/Q-Block2 in one message
  MixedBlockAndQBlock,
  /// The block size changed mid-transfer
  SizeChanged {
    /// SZX the operation started with
    was: u8,
    /// SZX of the offending block
    now: u8,
  },
  /// A block arrived out of order
  OutOfOrder {
    /// The NUM we expected
    expected: u32,
    /// The NUM that arrived
    got: u32,
  },
  /// The reassembled body crossed the configured ceiling
  TooLarge {
    /// The ceiling
    limit: usize,
  },
  /// Missing-blocks payload was not a valid ascending CBOR Sequence
  BadMissingBlocks,
}

/// States of a blockwise operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TransferState {
  /// Nothing sent yet
  Idle,
  /// At least one block sent and unacknowledged bytes remain
  InProgress,
  /// Every byte was acknowledged
  Completed,
}

/// The sending side of a Block1 (or Q-Block1) series over one body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
  state: TransferState,
  szx: u8,
  current: usize,
  total: usize,
}

impl Transfer {
  /// Prepare to send `total` bytes in `1 << (szx + 4)`-byte blocks.
  pub fn new(szx: u8, total: usize) -> Self {
    Self { state: TransferState::Idle,
           szx,
           current: 0,
           total }
  }

  /// Current state.
  pub fn state(&self) -> TransferState {
    self.state
  }

  /// Byte offset of the next unsent block. Always a multiple of the
  /// block size.
  pub fn offset(&self) -> usize {
    self.current
  }

  /// The descriptor for the next block to send, or `None` once complete.
  pub fn next_block(&self) -> Option<Block> {
    if self.state == TransferState::Completed {
      return None;
    }

    let size = 1usize << (self.szx + 4);
    let num = (self.current >> (self.szx + 4)) as u32;
    let more = self.current + size < self.total;

    Block::new(self.szx, num, more)
  }

  /// The payload slice of `body` the next block should carry.
  pub fn next_payload<'a>(&self, body: &'a [u8]) -> &'a [u8] {
    let size = 1usize << (self.szx + 4);
    let end = self.total.min(self.current + size);
    &body[self.current.min(body.len())..end.min(body.len())]
  }

  /// Record that the peer acknowledged a block (2.31 Continue with a
  /// matching Block1, or the final response).
  ///
  /// `echoed` is the Block1 option mirrored in the ACK; a block-size
  /// change mid-transfer is an error. `sent_len` is the actual payload
  /// length of the block that was acknowledged.
  pub fn advance(&mut self, echoed: Block, sent_len: usize) -> Result<TransferState, BlockError> {
    if echoed.szx() != self.szx && self.state == TransferState::InProgress {
      return Err(BlockError::SizeChanged { was: self.szx,
                                           now: echoed.szx() });
    }

    self.szx = echoed.szx();
    self.current += sent_len;

    self.state = if self.current >= self.total {
      TransferState::Completed
    } else {
      TransferState::InProgress
    };

    Ok(self.state)
  }

  /// Mark the first block as having been put on the wire.
  pub fn started(&mut self) {
    if self.state == TransferState::Idle {
      self.state = TransferState::InProgress;
    }
  }
}

/// Progress of a [`Reassembly`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
  /// More blocks expected; answer 2.31 Continue (requests) or request
  /// the next block (responses).
  Continue,
  /// The final block arrived; here is the whole body.
  Complete(Vec<u8>),
}

/// The receiving side of a blockwise series.
///
/// Fragments must arrive in strictly increasing NUM order per operation
/// key; reordering is a protocol error and wipes the state (the caches
/// that own a `Reassembly` drop it on any `Err`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Reassembly {
  szx: Option<u8>,
  expected_num: u32,
  buf: Vec<u8>,
}

impl Reassembly {
  /// Empty reassembly awaiting NUM 0.
  pub fn new() -> Self {
    Self::default()
  }

  /// Bytes accumulated so far.
  pub fn len(&self) -> usize {
    self.buf.len()
  }

  /// Whether nothing arrived yet.
  pub fn is_empty(&self) -> bool {
    self.buf.is_empty()
  }

  /// Forget everything accumulated, zeroing the buffer first.
  ///
  /// The caches that fail closed call this before dropping a
  /// reassembly whose fragments may have carried ciphertext.
  pub fn wipe(&mut self) {
    crate::secure::wipe_vec(&mut self.buf);
    self.szx = None;
    self.expected_num = 0;
  }

  /// Accept one block.
  ///
  /// Enforces, in order: stable block size, the expected successor NUM,
  /// and the `max_len` ceiling.
  pub fn accept(&mut self,
                block: Block,
                payload: &[u8],
                max_len: usize)
                -> Result<Progress, BlockError> {
    match self.szx {
      | Some(szx) if szx != block.szx() => {
        return Err(BlockError::SizeChanged { was: szx,
                                             now: block.szx() })
      },
      | _ => self.szx = Some(block.szx()),
    }

    if block.num() != self.expected_num {
      return Err(BlockError::OutOfOrder { expected: self.expected_num,
                                          got: block.num() });
    }

    if self.buf.len() + payload.len() > max_len {
      return Err(BlockError::TooLarge { limit: max_len });
    }

    self.buf.extend(payload);
    self.expected_num += 1;

    if block.more() {
      Ok(Progress::Continue)
    } else {
      Ok(Progress::Complete(std::mem::take(&mut self.buf)))
    }
  }
}

/// Reject messages mixing the Block and Q-Block families
/// (RFC 9177 section 4.1 MUST).
pub fn validate_block_q_block_mixing(msg: &Message) -> Result<(), BlockError> {
  let block = msg.get(BLOCK1).is_some() || msg.get(BLOCK2).is_some();
  let q_block = msg.get(Q_BLOCK1).is_some() || msg.get(Q_BLOCK2).is_some();

  if block && q_block {
    Err(BlockError::MixedBlockAndQBlock)
  } else {
    Ok(())
  }
}

/// Encode a Q-Block missing-blocks payload: a CBOR Sequence of block
/// numbers in strictly ascending order
/// (`application/missing-blocks+cbor-seq`, RFC 9177 section 12.3).
///
/// Duplicates or descending input are rejected; we never put a malformed
/// sequence on the wire.
pub fn encode_missing_blocks(nums: &[u32]) -> Result<Vec<u8>, BlockError> {
  if nums.windows(2).any(|w| w[0] >= w[1]) {
    return Err(BlockError::BadMissingBlocks);
  }

  let mut buf = Vec::new();
  let mut e = minicbor::Encoder::new(&mut buf);

  for n in nums {
    e.u32(*n).map_err(|_| BlockError::BadMissingBlocks)?;
  }

  Ok(buf)
}

/// Decode a Q-Block missing-blocks payload.
///
/// Duplicates are ignored (the peer may have coalesced retransmitted
/// reports); a descending pair is malformed.
pub fn decode_missing_blocks(bytes: &[u8]) -> Result<Vec<u32>, BlockError> {
  let mut d = minicbor::Decoder::new(bytes);
  let mut nums: Vec<u32> = Vec::new();

  while d.position() < bytes.len() {
    let n = d.u32().map_err(|_| BlockError::BadMissingBlocks)?;

    match nums.last() {
      | Some(last) if *last == n => continue,
      | Some(last) if *last > n => return Err(BlockError::BadMissingBlocks),
      | _ => nums.push(n),
    }
  }

  Ok(nums)
}
