/// Three items of information are packed into a Block
/// (Block1/Block2/Q-Block1/Q-Block2) option value:
/// * the size exponent of the block ([`Block::szx`], size = `1 << (szx + 4)`)
/// * whether more blocks are following ([`Block::more`])
/// * the relative number of the block ([`Block::num`]) within a sequence of
///   blocks with the given size.
///
/// SZX 7 is reserved (RFC 7959 section 2.2) and rejected at decode time,
/// which is why construction and decoding are fallible here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Block(u32);

impl Block {
  /// Build a block descriptor from its parts.
  ///
  /// Returns `None` when `szx > 6` (7 is reserved) or when `num` overflows
  /// the 20 bits available to it.
  pub fn new(szx: u8, num: u32, more: bool) -> Option<Self> {
    if szx > 6 || num >= 1 << 20 {
      return None;
    }

    Some(Self(num << 4 | u32::from(more) << 3 | szx as u32))
  }

  /// Decode a block descriptor from an option uint, rejecting reserved SZX.
  pub fn from_uint(raw: u32) -> Option<Self> {
    if raw & 0b111 == 7 {
      return None;
    }

    Some(Self(raw))
  }

  /// The size exponent; block payloads hold `1 << (szx + 4)` bytes.
  pub fn szx(&self) -> u8 {
    (self.0 & 0b111) as u8
  }

  /// The block size in bytes (16..=1024).
  ///
  /// ```
  /// use eft_msg::Block;
  ///
  /// assert_eq!(Block::new(0, 0, false).unwrap().size(), 16);
  /// assert_eq!(Block::new(6, 0, false).unwrap().size(), 1024);
  /// ```
  pub fn size(&self) -> u16 {
    1u16 << (self.szx() + 4)
  }

  /// Whether more blocks follow this one.
  pub fn more(&self) -> bool {
    (self.0 & 0b1000) >> 3 == 1
  }

  /// The relative block number.
  pub fn num(&self) -> u32 {
    self.0 >> 4
  }

  /// The byte offset of this block within the represented body.
  pub fn offset(&self) -> usize {
    self.num() as usize * self.size() as usize
  }
}

impl From<Block> for u32 {
  fn from(b: Block) -> Self {
    b.0
  }
}
