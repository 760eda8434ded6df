#![allow(dead_code)]

use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;

use newt_msg::{Code, Id, Message, Token, Type};

use crate::net::{Addrd, Socket};

pub fn dummy_addr() -> SocketAddr {
  "[2001:db8::1]:5683".parse().unwrap()
}

pub fn dummy_addr_2() -> SocketAddr {
  "[2001:db8::2]:5683".parse().unwrap()
}

pub fn msg(ty: Type, code: Code, mid: u16, token: &[u8]) -> Message {
  Message::new(ty, code, Id(mid), Token::try_from_slice(token).unwrap())
}

/// A mocked socket; inbound datagrams are staged in `rx`, everything
/// sent lands in `tx`.
#[derive(Debug, Default)]
pub struct SockMock {
  /// Inbound bytes from remote sockets. Address represents the sender
  pub rx: Rc<RefCell<Vec<Addrd<Vec<u8>>>>>,
  /// Outbound bytes to remote sockets. Address represents the destination
  pub tx: Rc<RefCell<Vec<Addrd<Vec<u8>>>>>,
}

impl SockMock {
  pub fn new() -> Self {
    Default::default()
  }
}

impl Socket for SockMock {
  type Error = ();

  fn send(&self, msg: Addrd<&[u8]>) -> nb::Result<(), Self::Error> {
    self.tx.borrow_mut().push(msg.map(|bytes| bytes.to_vec()));
    Ok(())
  }

  fn recv(&self, buffer: &mut [u8]) -> nb::Result<Addrd<usize>, Self::Error> {
    let mut rx = self.rx.borrow_mut();

    if rx.is_empty() {
      return Err(nb::Error::WouldBlock);
    }

    let dgram = rx.remove(0);
    let n = dgram.data().len().min(buffer.len());
    buffer[..n].copy_from_slice(&dgram.data()[..n]);

    // the real length is reported even when it exceeds the buffer,
    // which is how truncation is detected
    Ok(dgram.map(|bytes| bytes.len()))
  }
}
