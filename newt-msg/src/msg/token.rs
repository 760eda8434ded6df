use tinyvec::ArrayVec;

use super::MessageParseError;

/// # Message Token
///
/// 0-8 opaque bytes chosen by the client, used to correlate
/// asynchronous responses to requests independent of the message id.
///
/// Unlike the message [`crate::Id`], the token survives a separate
/// response: the peer may ACK the request with an empty message now and
/// answer with a new message (carrying the same token) later.
///
/// See [RFC7252 Section 5.3.1](https://datatracker.ietf.org/doc/html/rfc7252#section-5.3.1)
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Token(pub ArrayVec<[u8; 8]>);

impl Token {
  /// Copy up to 8 bytes into a new token, refusing longer slices.
  ///
  /// ```
  /// use newt_msg::Token;
  ///
  /// assert!(Token::try_from_slice(&[1, 2]).is_ok());
  /// assert!(Token::try_from_slice(&[0; 9]).is_err());
  /// ```
  pub fn try_from_slice(bytes: &[u8]) -> Result<Self, MessageParseError> {
    if bytes.len() > 8 {
      return Err(MessageParseError::InvalidTokenLength(bytes.len() as u8));
    }

    let mut buf = ArrayVec::new();
    buf.extend_from_slice(bytes);
    Ok(Token(buf))
  }

  /// Number of bytes in the token
  pub fn len(&self) -> usize {
    self.0.len()
  }

  /// Whether this is the zero-length token
  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Borrow the token bytes
  pub fn as_bytes(&self) -> &[u8] {
    &self.0
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn token_len_is_bounded() {
    assert_eq!(Token::try_from_slice(&[1, 2, 3]).unwrap().len(), 3);
    assert_eq!(Token::try_from_slice(&[0u8; 12]),
               Err(MessageParseError::InvalidTokenLength(12)));
  }
}
