use tinyvec::ArrayVec;

use crate::*;

/// Trait allowing fallible conversion into bytes
pub trait TryIntoBytes {
  /// Error type yielded if serialization fails
  type Error;

  /// Try to convert into a heap-allocated collection of bytes
  ///
  /// ```
  /// use newt_msg::{Code, Id, Message, Token, Type, TryIntoBytes};
  ///
  /// let msg = Message::new(Type::Con, Code::GET, Id(1), Token(Default::default()));
  /// let bytes: Vec<u8> = msg.try_into_bytes().unwrap();
  /// ```
  fn try_into_bytes(self) -> Result<Vec<u8>, Self::Error>;
}

/// Errors encounterable serializing to bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MessageToBytesError {
  /// The provided buffer was not big enough for the serialized message
  TooLong {
    /// Bytes available in the target buffer
    capacity: usize,
    /// Bytes the message needs
    size: usize,
  },
}

impl Message {
  /// Serialize this message into a caller-provided buffer, yielding
  /// the number of bytes written.
  ///
  /// This is the "second pass" of the two-pass serializer: call
  /// [`Message::len`] first to learn how much room is needed, then
  /// call this with a buffer at least that large. Nothing is written
  /// when the buffer is too small.
  ///
  /// ```
  /// use newt_msg::{Code, Id, Message, Token, Type};
  ///
  /// let msg = Message::new(Type::Con, Code::GET, Id(1), Token(Default::default()));
  ///
  /// let mut buf = vec![0u8; msg.len()];
  /// let n = msg.encode_into(&mut buf).unwrap();
  /// assert_eq!(n, buf.len());
  /// ```
  pub fn encode_into(&self, buf: &mut [u8]) -> Result<usize, MessageToBytesError> {
    let size = self.len();
    if buf.len() < size {
      return Err(MessageToBytesError::TooLong { capacity: buf.len(),
                                                size });
    }

    let mut bytes = Vec::with_capacity(size);
    self.extend_bytes(&mut bytes);
    buf[0..size].copy_from_slice(&bytes);

    Ok(size)
  }

  fn extend_bytes(&self, bytes: &mut Vec<u8>) {
    let byte1: u8 = Byte1 { tkl: self.token.0.len() as u8,
                            ver: self.ver,
                            ty: self.ty }.into();
    let code: u8 = self.code.into();
    let id: [u8; 2] = self.id.0.to_be_bytes();

    bytes.extend(Some(byte1));
    bytes.extend(Some(code));

    bytes.extend(id);
    bytes.extend(self.token.0);

    for opt in self.opts.opt_refs() {
      opt.extend_bytes(bytes);
    }

    if !self.payload.0.is_empty() {
      bytes.extend(Some(0b11111111));
      bytes.extend(self.payload.0.iter().copied());
    }
  }
}

impl TryIntoBytes for Message {
  type Error = MessageToBytesError;

  fn try_into_bytes(self) -> Result<Vec<u8>, Self::Error> {
    let mut bytes = Vec::with_capacity(self.len());
    self.extend_bytes(&mut bytes);
    Ok(bytes)
  }
}

pub(crate) fn opt_len_or_delta(val: u16) -> (u8, Option<ArrayVec<[u8; 2]>>) {
  match val {
    | n if n >= 269 => {
      let mut bytes = ArrayVec::new();
      bytes.extend((n - 269).to_be_bytes());
      (14, Some(bytes))
    },
    | n if n >= 13 => {
      let mut bytes = ArrayVec::new();
      bytes.push((n as u8) - 13);
      (13, Some(bytes))
    },
    | n => (n as u8, None),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{assert_eqb, assert_eqb_iter};

  #[test]
  fn msg() {
    let (msg, expected) = crate::test_msg();
    let actual: Vec<u8> = msg.try_into_bytes().unwrap();
    assert_eqb_iter!(actual, expected);
  }

  #[test]
  fn byte_1() {
    let byte = Byte1 { ver: Version(1),
                       ty: Type::Ack,
                       tkl: 3 };
    let actual: u8 = byte.into();
    assert_eqb!(actual, 0b_01_10_0011u8);
  }

  #[test]
  fn opt() {
    use core::iter::repeat;
    let cases: [(u16, Vec<u8>, Vec<u8>); 4] =
      [(24,
        repeat(1).take(100).collect(),
        [[0b1101_1101u8, 24 - 13, 100 - 13].as_ref(),
         repeat(1).take(100).collect::<Vec<u8>>().as_ref()].concat()),
       (1, vec![1], vec![0b0001_0001, 1]),
       (24, vec![1], vec![0b1101_0001, 11, 1]),
       (24,
        repeat(1).take(300).collect(),
        [[0b1101_1110, 24 - 13].as_ref(),
         (300u16 - 269).to_be_bytes().as_ref(),
         repeat(1).take(300).collect::<Vec<u8>>().as_ref()].concat())];

    cases.into_iter().for_each(|(delta, values, expected)| {
                       let opt = Opt { delta: OptDelta(delta),
                                       value: OptValue(values) };
                       let mut actual = Vec::<u8>::new();
                       opt.extend_bytes(&mut actual);
                       assert_eqb_iter!(actual, expected)
                     });
  }

  #[test]
  fn no_payload_marker() {
    let msg = Message { id: Id(0),
                        ty: Type::Con,
                        ver: Default::default(),
                        code: Code::CONTENT,
                        token: Token(Default::default()),
                        opts: Default::default(),
                        payload: Payload(Default::default()) };

    assert_ne!(msg.try_into_bytes().unwrap().last(), Some(&0b11111111));
  }

  #[test]
  fn encode_into_refuses_short_buffer() {
    let msg = Message::new(Type::Con, Code::GET, Id(1), Token(Default::default()));

    let mut small = [0u8; 2];
    assert_eq!(msg.encode_into(&mut small),
               Err(MessageToBytesError::TooLong { capacity: 2,
                                                  size: 4 }));

    let mut ok = [0u8; 8];
    assert_eq!(msg.encode_into(&mut ok), Ok(4));
    assert_eq!(&ok[0..4], &[0b0100_0000, 0x01, 0x00, 0x01]);
  }

  #[test]
  fn wire_options_are_nondecreasing() {
    use crate::from_bytes::TryConsumeBytes;

    let mut msg = Message::new(Type::Con, Code::GET, Id(1), Token(Default::default()));
    msg.set_size1(1024);
    msg.set_path("a/b");
    msg.set_accept(ContentFormat::Text);
    msg.set_observe(observe::Action::Register);

    let bytes: Vec<u8> = msg.try_into_bytes().unwrap();

    // re-parse just the option headers, asserting the running number
    // never decreases
    let mut cursor = crate::cursor::Cursor::new(&bytes[4..]);
    let mut last = 0u32;
    loop {
      match Opt::try_consume_bytes(&mut cursor) {
        | Ok(opt) => {
          let num = last + opt.delta.0 as u32;
          assert!(num >= last);
          last = num;
        },
        | Err(OptParseError::OptionsExhausted) => break,
        | Err(e) => panic!("{:?}", e),
      }
    }
    assert_eq!(last, 60); // Size1 comes out last
  }
}
