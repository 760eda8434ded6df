/// Errors encounterable while parsing an option from bytes
#[derive(Copy, Clone, Debug, PartialEq, PartialOrd, Eq, Ord)]
pub enum OptParseError {
  /// Reached end of stream before parsing was finished
  UnexpectedEndOfStream,

  /// Option Delta was set to 15, which is reserved.
  OptionDeltaReservedValue(u8),

  /// Value Length was set to 15, which is reserved.
  ValueLengthReservedValue(u8),

  /// Not a true failure case; only means we tried to read the payload marker
  /// byte (0xFF) as an option header.
  OptionsExhausted,
}

impl OptParseError {
  /// Shorthand for [`OptParseError::UnexpectedEndOfStream`]
  pub fn eof() -> Self {
    Self::UnexpectedEndOfStream
  }
}
