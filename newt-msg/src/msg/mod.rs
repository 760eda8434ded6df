use core::str::{from_utf8, Utf8Error};

use crate::cursor::Cursor;
use crate::from_bytes::{TryConsumeBytes, TryFromBytes};
#[allow(unused_imports)]
use crate::TryIntoBytes;

/// Message Code
pub mod code;

/// Message parsing errors
pub mod parse_error;

/// Message ID
pub mod id;

/// Message Options
pub mod opt;

/// Message Type
pub mod ty;

/// Message Token
pub mod token;

/// Message Version
pub mod ver;

pub use code::*;
pub use id::*;
pub use opt::*;
pub use parse_error::*;
pub use token::*;
pub use ty::*;
pub use ver::*;

/// The message body; an opaque byte string interpreted per the
/// Content-Format option.
///
/// See [RFC7252 Section 5.5](https://datatracker.ietf.org/doc/html/rfc7252#section-5.5)
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Payload(pub Vec<u8>);

impl Payload {
  /// Convert a reference to a Payload to a byte slice
  pub fn as_bytes(&self) -> &[u8] {
    &self.0
  }
}

/// Struct representing the first byte of a message.
///
/// ```text
/// CoAP version
/// |
/// |  Message type (request, response, empty)
/// |  |
/// |  |  Length of token, in bytes. (4-bit integer)
/// |  |  |
/// vv vv vvvv
/// 01 00 0000
/// ```
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Eq, Ord)]
pub(crate) struct Byte1 {
  pub(crate) ver: Version,
  pub(crate) ty: Type,
  pub(crate) tkl: u8,
}

impl TryFrom<u8> for Byte1 {
  type Error = MessageParseError;

  fn try_from(b: u8) -> Result<Self, Self::Error> {
    let ver = b >> 6; // bits 0 & 1
    let ty = b >> 4 & 0b11; // bits 2 & 3
    let tkl = b & 0b1111u8; // last 4 bits

    Ok(Byte1 { ver: Version(ver),
               ty: Type::try_from(ty)?,
               tkl })
  }
}

impl From<Byte1> for u8 {
  fn from(b: Byte1) -> u8 {
    let ver = b.ver.0 << 6;
    let ty = u8::from(b.ty) << 4;
    let tkl = b.tkl;

    ver | ty | tkl
  }
}

/// # CoAP Messages
/// This struct provides a high-level API for manipulating requests &
/// responses, while still being cheaply serializable to & from the byte
/// layout of CoAP messages on the wire.
///
/// ## Options
/// Options (the CoAP equivalent to HTTP headers) live in an ordered
/// [`OptionMap`]; typed accessors for the options known to this library
/// (`set_path`, `accept`, `set_observe`, ..) are provided on `Message`.
///
/// ## Constructing
/// [`Message::new`] is the most straightforward way to initialize
/// messages, though all fields are public and a struct literal works
/// just as well.
///
/// ```
/// use newt_msg::{Code, Id, Message, Payload, Token, Type, Version};
///
/// let a = Message { id: Id(1),
///                   token: Token(Default::default()),
///                   ver: Version::default(),
///                   ty: Type::Con,
///                   code: Code::GET,
///                   payload: Payload(vec![]),
///                   opts: Default::default() };
///
/// let b = Message::new(Type::Con, Code::GET, Id(1), Token(Default::default()));
///
/// assert_eq!(a, b);
/// ```
///
/// ## Sending / Receiving
/// This crate (`newt-msg`) explicitly does **not** know or care about how
/// the messages are sent and received, and is **just** concerned with the
/// data structures involved on the machines having a CoAP conversation.
/// For a runtime that uses this library, see the `newt` crate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
  /// see [`Id`] for details
  pub id: Id,
  /// see [`Type`] for details
  pub ty: Type,
  /// see [`Version`] for details
  pub ver: Version,
  /// see [`Token`] for details
  pub token: Token,
  /// see [`Code`] for details
  pub code: Code,
  /// see [`OptionMap`] for details
  pub opts: OptionMap,
  /// see [`Payload`]
  pub payload: Payload,
}

impl Message {
  /// Create a new message
  pub fn new(ty: Type, code: Code, id: Id, token: Token) -> Self {
    Self { id,
           token,
           ty,
           code,
           ver: Version::default(),
           payload: Payload(Default::default()),
           opts: OptionMap::default() }
  }

  /// Create a new empty message that ACKs this one.
  ///
  /// The ACK shares the message id of the message being acknowledged
  /// and carries no token, options or payload.
  pub fn ack(&self) -> Self {
    Self { id: self.id,
           token: Token(Default::default()),
           ver: Default::default(),
           ty: Type::Ack,
           code: Code::EMPTY,
           payload: Payload(Default::default()),
           opts: OptionMap::default() }
  }

  /// Create a new empty message that Resets this one.
  ///
  /// This is the reply to a "CoAP ping" (an empty CON message).
  pub fn reset(&self) -> Self {
    Self { ty: Type::Reset,
           ..self.ack() }
  }

  /// Number of bytes this message will occupy on the wire.
  ///
  /// This is the "first pass" of the two-pass serializer; see
  /// [`Message::encode_into`] for the second.
  pub fn len(&self) -> usize {
    let header_size = 4;
    let token_size = self.token.0.len();
    let opts_size: usize = self.opts.opt_refs().map(|o| o.wire_len()).sum();
    let payload_size = match self.payload.0.len() {
      | 0 => 0,
      | n => 1 + n, // marker + bytes
    };

    header_size + token_size + opts_size + payload_size
  }

  /// Always false; an empty CoAP message still has a 4 byte header.
  pub fn is_empty(&self) -> bool {
    false
  }

  /// Get the payload
  pub fn payload(&self) -> &Payload {
    &self.payload
  }

  /// Set the payload, returning the old payload if there was one
  pub fn set_payload(&mut self, p: Payload) -> Option<Payload> {
    let mut old: Payload = p;
    core::mem::swap(&mut old, &mut self.payload);
    Some(old).filter(|old| !old.0.is_empty())
  }

  /// Insert a new value for a given option, alongside any existing values
  pub fn add(&mut self, n: OptNumber, v: OptValue) {
    self.opts.add(n, v)
  }

  /// Replace any / all existing values with a new one,
  /// yielding the previous value(s)
  pub fn set(&mut self, n: OptNumber, v: OptValue) -> Option<Vec<OptValue>> {
    self.opts.set(n, v)
  }

  /// Get the value(s) of an option by number
  pub fn get(&self, n: OptNumber) -> Option<&Vec<OptValue>> {
    self.opts.get(n)
  }

  /// Get the value of an option, taking the first if there are multiple.
  pub fn get_first(&self, n: OptNumber) -> Option<&OptValue> {
    self.opts.get_first(n)
  }

  /// Remove all values for the option from this message,
  /// returning them if there were any.
  pub fn remove(&mut self, n: OptNumber) -> Option<Vec<OptValue>> {
    self.opts.remove(n)
  }

  /// Get the value of an option, and interpret it as a UTF-8 string
  pub fn get_str(&self, n: OptNumber) -> Result<Option<&str>, Utf8Error> {
    match self.get_first(n) {
      | Some(v) => from_utf8(&v.0).map(Some),
      | _ => Ok(None),
    }
  }

  /// Get all values for an option, and interpret them as UTF-8 strings
  pub fn get_strs(&self, n: OptNumber) -> Result<Vec<&str>, Utf8Error> {
    match self.get(n) {
      | Some(vs) => vs.iter().map(|s| from_utf8(&s.0)).collect(),
      | _ => Ok(vec![]),
    }
  }

  /// Get the value of an option interpreted as a network byte order
  /// unsigned integer in CoAP's shortest form (zero length means zero).
  pub fn get_uint(&self, n: OptNumber) -> Option<u64> {
    self.get_first(n)
        .filter(|v| v.0.len() <= 8)
        .map(|v| v.0.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64))
  }

  /// Set an option to an unsigned integer value, encoded in CoAP's
  /// shortest form (leading zero bytes dropped, zero is zero-length).
  pub fn set_uint(&mut self, n: OptNumber, val: u64) {
    let bytes = val.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    self.set(n, OptValue(bytes[skip..].to_vec()));
  }

  /// Update the value for the Uri-Path option, one repetition
  /// per `/`-separated segment, discarding any existing values.
  ///
  /// ```
  /// use newt_msg::{Code, Id, Message, Token, Type};
  ///
  /// let mut msg = Message::new(Type::Con, Code::GET, Id(1), Token(Default::default()));
  ///
  /// msg.set_path("lights/led3");
  /// assert_eq!(msg.path(), Ok(vec!["lights", "led3"]));
  /// ```
  pub fn set_path<S>(&mut self, path: S)
    where S: AsRef<str>
  {
    self.remove(opt::known::repeat::PATH);
    path.as_ref()
        .split('/')
        .filter(|segment| !segment.is_empty())
        .for_each(|segment| {
          self.add(opt::known::repeat::PATH,
                   segment.as_bytes().iter().copied().collect())
        });
  }

  /// Get the Uri-Path segments
  pub fn path(&self) -> Result<Vec<&str>, Utf8Error> {
    self.get_strs(opt::known::repeat::PATH)
  }

  /// Set the value for the Observe option, discarding any existing values.
  pub fn set_observe(&mut self, a: observe::Action) {
    self.set(opt::known::no_repeat::OBSERVE,
             core::iter::once(u8::from(a)).collect());
  }

  /// Get the value for the Observe option interpreted as a
  /// register/deregister request action
  pub fn observe(&self) -> Option<observe::Action> {
    self.get_uint(opt::known::no_repeat::OBSERVE)
        .and_then(|n| u8::try_from(n).ok())
        .and_then(observe::Action::from_byte)
  }

  /// Get the value for the Observe option interpreted as a notification
  /// sequence number (24 bits)
  pub fn observe_seq(&self) -> Option<u32> {
    self.get_uint(opt::known::no_repeat::OBSERVE)
        .map(|n| (n as u32) & 0x00FF_FFFF)
  }

  /// Set the Observe option to a notification sequence number
  pub fn set_observe_seq(&mut self, seq: u32) {
    self.set_uint(opt::known::no_repeat::OBSERVE, (seq & 0x00FF_FFFF) as u64);
  }

  /// Whether this message carries an Observe option at all
  pub fn has_observe(&self) -> bool {
    self.get_first(opt::known::no_repeat::OBSERVE).is_some()
  }

  /// Update the value for the Content-Format option,
  /// discarding any existing values.
  pub fn set_content_format(&mut self, format: ContentFormat) {
    self.set_uint(opt::known::no_repeat::CONTENT_FORMAT,
                  u16::from(format) as u64);
  }

  /// Get the value for the Content-Format option
  pub fn content_format(&self) -> Option<ContentFormat> {
    self.get_uint(opt::known::no_repeat::CONTENT_FORMAT)
        .map(|n| ContentFormat::from(n as u16))
  }

  /// Update the value for the Accept option,
  /// discarding any existing values.
  pub fn set_accept(&mut self, format: ContentFormat) {
    self.set_uint(opt::known::no_repeat::ACCEPT, u16::from(format) as u64);
  }

  /// Get the value for the Accept option
  pub fn accept(&self) -> Option<ContentFormat> {
    self.get_uint(opt::known::no_repeat::ACCEPT)
        .map(|n| ContentFormat::from(n as u16))
  }

  /// Update the value for the Max-Age option,
  /// discarding any existing values.
  pub fn set_max_age(&mut self, max_age_seconds: u32) {
    self.set_uint(opt::known::no_repeat::MAX_AGE, max_age_seconds as u64);
  }

  /// Get the value for the Max-Age option, in seconds
  pub fn max_age_seconds(&self) -> Option<u32> {
    self.get_uint(opt::known::no_repeat::MAX_AGE).map(|n| n as u32)
  }

  /// Update the value for the Size1 option,
  /// discarding any existing values.
  pub fn set_size1(&mut self, size_bytes: u64) {
    self.set_uint(opt::known::no_repeat::SIZE1, size_bytes);
  }

  /// Get the value for the Size1 option
  pub fn size1(&self) -> Option<u64> {
    self.get_uint(opt::known::no_repeat::SIZE1)
  }
}

impl<Bytes: AsRef<[u8]>> TryFromBytes<Bytes> for Message {
  type Error = MessageParseError;

  fn try_from_bytes(bytes: Bytes) -> Result<Self, Self::Error> {
    let mut bytes = Cursor::new(bytes);

    let Byte1 { tkl, ty, ver } = bytes.next()
                                      .ok_or_else(MessageParseError::eof)?
                                      .try_into()?;

    if tkl > 8 {
      return Err(Self::Error::InvalidTokenLength(tkl));
    }

    let code: Code = bytes.next().ok_or_else(MessageParseError::eof)?.into();
    let id: Id = Id::try_consume_bytes(&mut bytes)?;

    let token = bytes.take_exact(tkl as usize)
                     .ok_or_else(MessageParseError::eof)?;
    let token = Token::try_from_slice(token)?;

    let opts = OptionMap::try_consume_bytes(&mut bytes).map_err(Self::Error::OptParseError)?;

    let payload = Payload(bytes.take_until_end().to_vec());

    Ok(Message { id,
                 ty,
                 ver,
                 code,
                 token,
                 opts,
                 payload })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_msg() {
    let (expect, bytes) = crate::test_msg();
    assert_eq!(Message::try_from_bytes(&bytes).unwrap(), expect)
  }

  #[test]
  fn parse_byte1() {
    let byte = 0b_01_10_0011u8;
    let byte = Byte1::try_from(byte).unwrap();
    assert_eq!(byte,
               Byte1 { ver: Version(1),
                       ty: Type::Ack,
                       tkl: 3 })
  }

  #[test]
  fn parse_id() {
    let mut id_bytes = Cursor::new(34u16.to_be_bytes());
    let id = Id::try_consume_bytes(&mut id_bytes).unwrap();
    assert_eq!(id, Id(34));
  }

  #[test]
  fn parse_rejects_token_len_over_8() {
    // header declares tkl 9
    let bytes = [0b0100_1001, 0x01, 0x00, 0x01, 1, 2, 3, 4, 5, 6, 7, 8, 9];
    assert_eq!(Message::try_from_bytes(bytes),
               Err(MessageParseError::InvalidTokenLength(9)));
  }

  #[test]
  fn uint_shortest_form() {
    let mut msg = Message::new(Type::Con, Code::GET, Id(1), Token(Default::default()));

    msg.set_uint(known::no_repeat::OBSERVE, 0);
    assert_eq!(msg.get_first(known::no_repeat::OBSERVE).unwrap().0.len(), 0);
    assert_eq!(msg.observe_seq(), Some(0));

    msg.set_uint(known::no_repeat::OBSERVE, 0x01_02_03);
    assert_eq!(msg.get_first(known::no_repeat::OBSERVE).unwrap().0,
               vec![1, 2, 3]);
    assert_eq!(msg.observe_seq(), Some(0x01_02_03));
  }

  #[test]
  fn empty_ack_and_reset() {
    let mut ping = Message::new(Type::Con, Code::EMPTY, Id(0xabcd), Token(Default::default()));
    ping.set_path("ignored");

    let rst = ping.reset();
    assert_eq!(rst.id, Id(0xabcd));
    assert_eq!(rst.ty, Type::Reset);
    assert_eq!(rst.code, Code::EMPTY);
    assert!(rst.opts.is_empty());
    assert!(rst.token.is_empty());
  }
}
