/// # Message Code
///
/// The code is a 3-bit class and 5-bit detail, written `c.dd`
/// (e.g. `4.04 Not Found`).
///
/// |class|meaning|
/// |---|---|
/// |`0`|Message is a request (or 0.00, EMPTY)|
/// |`2`|Message is a success response|
/// |`4`|Message is a client error response|
/// |`5`|Message is a server error response|
///
/// See [RFC7252 Section 12.1](https://datatracker.ietf.org/doc/html/rfc7252#section-12.1)
///
/// ```
/// use newt_msg::Code;
///
/// assert_eq!(Code { class: 2,
///                   detail: 5 }.to_string(),
///            "2.05".to_string());
/// ```
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Code {
  /// Request / response class bits
  pub class: u8,
  /// 2-digit integer (range `[0, 32)`) giving granular status within the class.
  pub detail: u8,
}

/// Whether a code is for a request, response, or empty message
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CodeKind {
  /// A request code (0.01-0.31)
  Request,
  /// A response code ([2-5].xx)
  Response,
  /// EMPTY (0.00)
  Empty,
}

impl Code {
  /// Create a new Code
  ///
  /// ```
  /// use newt_msg::Code;
  ///
  /// let content = Code::new(2, 05);
  /// ```
  pub const fn new(class: u8, detail: u8) -> Self {
    Self { class, detail }
  }

  /// Get the human string representation of a message code
  ///
  /// ```
  /// use newt_msg::Code;
  ///
  /// let code = Code { class: 2,
  ///                   detail: 5 };
  /// assert_eq!(String::from_iter(code.to_human()), "2.05".to_string());
  /// ```
  pub fn to_human(&self) -> [char; 4] {
    let to_char = |d: u8| char::from_digit(d.into(), 10).unwrap();
    [to_char(self.class),
     '.',
     to_char(self.detail / 10),
     to_char(self.detail % 10)]
  }

  /// Get whether this code is for a request, response, or empty message
  ///
  /// ```
  /// use newt_msg::{Code, CodeKind};
  ///
  /// assert_eq!(Code::EMPTY.kind(), CodeKind::Empty);
  /// assert_eq!(Code::GET.kind(), CodeKind::Request);
  /// assert_eq!(Code::CONTENT.kind(), CodeKind::Response);
  /// ```
  pub fn kind(&self) -> CodeKind {
    match (self.class, self.detail) {
      | (0, 0) => CodeKind::Empty,
      | (0, _) => CodeKind::Request,
      | _ => CodeKind::Response,
    }
  }

  /// 0.00, the empty message (ping when CON, ack/reset otherwise)
  pub const EMPTY: Self = Self::new(0, 0);

  /// 0.01 GET
  pub const GET: Self = Self::new(0, 1);

  /// 0.02 PUT
  pub const PUT: Self = Self::new(0, 2);

  /// 0.03 POST
  pub const POST: Self = Self::new(0, 3);

  /// 0.04 DELETE
  pub const DELETE: Self = Self::new(0, 4);

  /// 2.01 Created
  pub const CREATED: Self = Self::new(2, 1);

  /// 2.02 Deleted
  pub const DELETED: Self = Self::new(2, 2);

  /// 2.03 Valid
  pub const VALID: Self = Self::new(2, 3);

  /// 2.04 Changed
  pub const CHANGED: Self = Self::new(2, 4);

  /// 2.05 Content
  pub const CONTENT: Self = Self::new(2, 5);

  /// 4.00 Bad Request
  pub const BAD_REQUEST: Self = Self::new(4, 0);

  /// 4.04 Not Found
  pub const NOT_FOUND: Self = Self::new(4, 4);

  /// 4.05 Method Not Allowed
  pub const METHOD_NOT_ALLOWED: Self = Self::new(4, 5);

  /// 4.13 Request Entity Too Large
  pub const REQUEST_ENTITY_TOO_LARGE: Self = Self::new(4, 13);

  /// 4.15 Unsupported Content-Format
  pub const UNSUPPORTED_CONTENT_FORMAT: Self = Self::new(4, 15);

  /// 5.00 Internal Server Error
  pub const INTERNAL_SERVER_ERROR: Self = Self::new(5, 0);
}

impl core::fmt::Display for Code {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    let [a, b, c, d] = self.to_human();
    write!(f, "{}{}{}{}", a, b, c, d)
  }
}

impl From<u8> for Code {
  fn from(b: u8) -> Self {
    // xxxyyyyy
    let class = b >> 5;
    let detail = b & 0b00011111;

    Code { class, detail }
  }
}

impl From<Code> for u8 {
  fn from(code: Code) -> u8 {
    let class = (code.class << 5) & 0b11100000;
    let detail = code.detail & 0b00011111;

    class | detail
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_code() {
    let byte = 0b01000101_u8;
    let code = Code::from(byte);
    assert_eq!(code,
               Code { class: 2,
                      detail: 5 })
  }

  #[test]
  fn serialize_code() {
    let code = Code { class: 2,
                      detail: 5 };
    let actual: u8 = code.into();
    assert_eq!(actual, 0b01000101_u8)
  }

  #[test]
  fn code_kinds() {
    assert_eq!(Code::EMPTY.kind(), CodeKind::Empty);
    assert_eq!(Code::DELETE.kind(), CodeKind::Request);
    assert_eq!(Code::METHOD_NOT_ALLOWED.kind(), CodeKind::Response);
  }
}
