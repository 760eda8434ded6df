//! Low-level representation of CoAP messages.
//!
//! The most notable item in `newt_msg` is `Message`;
//! a CoAP message very close to the actual byte layout.
//!
//! ## Serialization
//! Serialization is two-pass: [`Message::len`] yields the exact wire
//! size, and [`Message::encode_into`] emits into a buffer of at least
//! that size (or [`TryIntoBytes`] allocates one for you). Deserialization
//! is [`TryFromBytes`], which accepts anything `AsRef<[u8]>`.
//!
//! ## Options
//! Options are kept in an ordered map ([`OptionMap`]), so the
//! ascending-option-number invariant of the delta encoding holds no
//! matter what order the application sets them in.

#![cfg_attr(not(test), forbid(missing_debug_implementations, unreachable_pub))]
#![cfg_attr(not(test), deny(unsafe_code, missing_copy_implementations))]
#![deny(missing_docs)]

#[doc(hidden)]
pub mod from_bytes;

/// Message structs
pub mod msg;

#[doc(hidden)]
pub mod to_bytes;

pub(crate) mod cursor;

#[doc(inline)]
pub use from_bytes::TryFromBytes;
#[doc(inline)]
pub use msg::*;
#[doc(inline)]
pub use to_bytes::{MessageToBytesError, TryIntoBytes};

#[cfg(test)]
macro_rules! assert_eqb {
  ($actual:expr, $expected:expr) => {
    if $actual != $expected {
      panic!("expected {:08b} to equal {:08b}", $actual, $expected)
    }
  };
}

#[cfg(test)]
macro_rules! assert_eqb_iter {
  ($actual:expr, $expected:expr) => {
    if $actual.iter().ne($expected.iter()) {
      panic!("expected {:?} to equal {:?}",
             $actual.into_iter()
                    .map(|b| format!("{:08b}", b))
                    .collect::<Vec<_>>(),
             $expected.into_iter()
                      .map(|b| format!("{:08b}", b))
                      .collect::<Vec<_>>())
    }
  };
}

#[cfg(test)]
pub(crate) use {assert_eqb, assert_eqb_iter};

#[cfg(test)]
pub(crate) fn test_msg() -> (Message, Vec<u8>) {
  let header: [u8; 4] = [0b0100_0001, 0b0100_0101, 0x00, 0x01];
  let token: [u8; 1] = [254u8];
  let content_format: [u8; 2] = [0b1100_0001, 50];
  let payload: &[u8] = b"hello, world!";

  let bytes = [&header[..],
               &token,
               &content_format,
               &[0b1111_1111],
               payload].concat();

  let mut msg = Message::new(Type::Con,
                             Code::CONTENT,
                             Id(1),
                             Token::try_from_slice(&token).unwrap());
  msg.set_content_format(ContentFormat::Json);
  msg.payload = Payload(payload.to_vec());

  (msg, bytes)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn round_trip() {
    let (msg, _) = test_msg();
    let bytes: Vec<u8> = msg.clone().try_into_bytes().unwrap();
    assert_eq!(Message::try_from_bytes(&bytes).unwrap(), msg);
  }

  #[test]
  fn round_trip_unsorted_options() {
    let mut msg = Message::new(Type::Non,
                               Code::GET,
                               Id(77),
                               Token::try_from_slice(&[1, 2]).unwrap());
    msg.set_size1(2048);
    msg.set_accept(ContentFormat::Text);
    msg.set_path("lights/led3");
    msg.set_observe(observe::Action::Register);

    let bytes: Vec<u8> = msg.clone().try_into_bytes().unwrap();
    let parsed = Message::try_from_bytes(&bytes).unwrap();

    assert_eq!(parsed, msg);
    assert_eq!(parsed.path(), Ok(vec!["lights", "led3"]));
    assert_eq!(parsed.observe(), Some(observe::Action::Register));
    assert_eq!(parsed.size1(), Some(2048));
  }
}
