/// The compressed COSE header carried in the OSCORE option value
/// (RFC 8613 section 6.1):
///
/// ```text
///  0 1 2 3 4 5 6 7        <----- n bytes ----->
/// +-+-+-+-+-+-+-+-+------------------------------------
/// |0 0 0|h|k|  n  |  Partial IV (if any) ...
/// +-+-+-+-+-+-+-+-+------------------------------------
///  <-- 1 byte --> <------ s bytes ------>
/// +----------------+------------------+---------------+
/// | s (if any)     | kid context ...  |   kid ...     |
/// +----------------+------------------+---------------+
/// ```
///
/// The empty option value decodes to "no kid, no Partial IV, no kid
/// context". The all-zero flag byte with anything after it (including the
/// flag byte itself being the only content) is malformed, since the empty
/// value is its canonical encoding (section 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OscoreOption<'a> {
  /// Partial IV, 1..=5 bytes when present
  pub piv: Option<&'a [u8]>,
  /// kid context (the `h` flag's length-prefixed payload)
  pub kid_context: Option<&'a [u8]>,
  /// kid: everything after the fields above, **not** length-prefixed
  pub kid: Option<&'a [u8]>,
}

/// Ways decoding an OSCORE option value can fail.
///
/// All of these map to 4.02 Bad Option at the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OscoreOptionError {
  /// Flag bits 5-7 MUST be zero
  ReservedFlagBits(u8),
  /// Partial IV length 6 and 7 are reserved
  ReservedPivLength(u8),
  /// A declared field runs past the end of the option value
  Truncated,
  /// Flag byte of zero with a non-empty encoding
  NonEmptyZeroFlags,
}

impl<'a> OscoreOption<'a> {
  /// Decode an OSCORE option value.
  ///
  /// ```
  /// use eft_msg::OscoreOption;
  ///
  /// // h=0 k=1 n=2: two PIV bytes then the kid suffix
  /// let opt = OscoreOption::parse(&[0b0000_1010, 0x12, 0x34, 0x42]).unwrap();
  /// assert_eq!(opt.piv, Some(&[0x12u8, 0x34] as &[u8]));
  /// assert_eq!(opt.kid, Some(&[0x42u8] as &[u8]));
  /// assert_eq!(opt.kid_context, None);
  /// ```
  pub fn parse(value: &'a [u8]) -> Result<Self, OscoreOptionError> {
    if value.is_empty() {
      return Ok(Self::default());
    }

    let flags = value[0];

    if flags & 0b1110_0000 != 0 {
      return Err(OscoreOptionError::ReservedFlagBits(flags));
    }

    if flags == 0 {
      return Err(OscoreOptionError::NonEmptyZeroFlags);
    }

    let n = (flags & 0b0000_0111) as usize;
    let k = flags & 0b0000_1000 != 0;
    let h = flags & 0b0001_0000 != 0;

    if n > 5 {
      return Err(OscoreOptionError::ReservedPivLength(n as u8));
    }

    let mut rest = &value[1..];

    let piv = match n {
      | 0 => None,
      | n if rest.len() < n => return Err(OscoreOptionError::Truncated),
      | n => {
        let (piv, r) = rest.split_at(n);
        rest = r;
        Some(piv)
      },
    };

    let kid_context = if h {
      let s = *rest.first().ok_or(OscoreOptionError::Truncated)? as usize;
      rest = &rest[1..];

      if rest.len() < s {
        return Err(OscoreOptionError::Truncated);
      }

      let (ctx, r) = rest.split_at(s);
      rest = r;
      Some(ctx)
    } else {
      None
    };

    let kid = if k {
      Some(rest)
    } else if !rest.is_empty() {
      // nothing may follow the declared fields when k=0
      return Err(OscoreOptionError::Truncated);
    } else {
      None
    };

    Ok(Self { piv,
              kid_context,
              kid })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_value_has_no_fields() {
    assert_eq!(OscoreOption::parse(&[]),
               Ok(OscoreOption { piv: None,
                                 kid_context: None,
                                 kid: None }));
  }

  #[test]
  fn kid_is_unprefixed_suffix() {
    // k=1, n=0: whole remainder is the kid
    let opt = OscoreOption::parse(&[0b0000_1000, 0xAA, 0xBB, 0xCC]).unwrap();
    assert_eq!(opt.kid, Some(&[0xAAu8, 0xBB, 0xCC] as &[u8]));
    assert_eq!(opt.piv, None);

    // k=1 with nothing after the flag byte: present-but-empty kid
    let opt = OscoreOption::parse(&[0b0000_1000]).unwrap();
    assert_eq!(opt.kid, Some(&[] as &[u8]));
  }

  #[test]
  fn kid_context_is_length_prefixed() {
    // h=1 k=1 n=1: piv, s-byte, context, kid
    let opt = OscoreOption::parse(&[0b0001_1001, 0x05, 0x02, 0xDE, 0xAD, 0x42]).unwrap();
    assert_eq!(opt.piv, Some(&[0x05u8] as &[u8]));
    assert_eq!(opt.kid_context, Some(&[0xDEu8, 0xAD] as &[u8]));
    assert_eq!(opt.kid, Some(&[0x42u8] as &[u8]));
  }

  #[test]
  fn reserved_flag_bits_rejected() {
    for flags in [0b0010_0000u8, 0b0100_0000, 0b1000_0000] {
      assert_eq!(OscoreOption::parse(&[flags, 1]),
                 Err(OscoreOptionError::ReservedFlagBits(flags)));
    }
  }

  #[test]
  fn reserved_piv_lengths_rejected() {
    assert_eq!(OscoreOption::parse(&[0b0000_0110, 1, 2, 3, 4, 5, 6]),
               Err(OscoreOptionError::ReservedPivLength(6)));
    assert_eq!(OscoreOption::parse(&[0b0000_0111, 1, 2, 3, 4, 5, 6, 7]),
               Err(OscoreOptionError::ReservedPivLength(7)));
  }

  #[test]
  fn zero_flags_with_content_rejected() {
    assert_eq!(OscoreOption::parse(&[0x00]),
               Err(OscoreOptionError::NonEmptyZeroFlags));
    assert_eq!(OscoreOption::parse(&[0x00, 0x01]),
               Err(OscoreOptionError::NonEmptyZeroFlags));
  }

  #[test]
  fn truncated_fields_rejected() {
    // n=2 but one byte follows
    assert_eq!(OscoreOption::parse(&[0b0000_0010, 0x01]),
               Err(OscoreOptionError::Truncated));

    // h=1 but no s byte
    assert_eq!(OscoreOption::parse(&[0b0001_0000]),
               Err(OscoreOptionError::Truncated));

    // h=1, s=4, but only two context bytes
    assert_eq!(OscoreOption::parse(&[0b0001_0000, 0x04, 0xAA, 0xBB]),
               Err(OscoreOptionError::Truncated));

    // k=0 but trailing bytes after the piv
    assert_eq!(OscoreOption::parse(&[0b0000_0001, 0x01, 0xFF]),
               Err(OscoreOptionError::Truncated));
  }
}
