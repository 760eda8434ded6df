use std::net::{SocketAddr, UdpSocket};

/// Data that came from (or is headed to) a network socket
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy)]
pub struct Addrd<T>(pub T, pub SocketAddr);

impl<T> Addrd<T> {
  /// Borrow the contents of this Addressed
  pub fn as_ref(&self) -> Addrd<&T> {
    Addrd(self.data(), self.addr())
  }

  /// Discard the socket and get the data in this Addressed
  pub fn unwrap(self) -> T {
    self.0
  }

  /// Map the data contained in this Addressed
  pub fn map<R>(self, f: impl FnOnce(T) -> R) -> Addrd<R> {
    Addrd(f(self.0), self.1)
  }

  /// Borrow the contents of the addressed item
  pub fn data(&self) -> &T {
    &self.0
  }

  /// Mutably borrow the contents of the addressed item
  pub fn data_mut(&mut self) -> &mut T {
    &mut self.0
  }

  /// Copy the socket address for the data
  pub fn addr(&self) -> SocketAddr {
    self.1
  }
}

impl<T> AsMut<T> for Addrd<T> {
  fn as_mut(&mut self) -> &mut T {
    &mut self.0
  }
}

/// Result code attached to every inbound datagram by the transport.
///
/// The engine treats `Success` and `Truncated` as material and ignores
/// everything else at the ingress filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DgramStatus {
  /// The datagram arrived whole
  Success,
  /// The datagram was larger than the receive buffer and was cut short
  Truncated,
  /// The UDP checksum did not verify
  BadChecksum,
  /// The datagram could not be parsed as UDP at all
  Malformed,
}

/// A datagram socket
///
/// This mirrors `std::net::UdpSocket` but allows the engine to run over
/// mock transports in tests and over exotic stacks in deployments.
/// Implementations are expected to be non-blocking: `recv` returns
/// [`nb::Error::WouldBlock`] when nothing is queued.
pub trait Socket {
  /// The error yielded by socket operations
  type Error: core::fmt::Debug;

  /// Send a datagram to a remote address
  fn send(&self, msg: Addrd<&[u8]>) -> nb::Result<(), Self::Error>;

  /// Pull a buffered datagram from the socket, along with the address
  /// of the sender.
  ///
  /// It is expected that (like [`std::net::UdpSocket`]) if the message
  /// is larger than the buffer, the excess bytes are dropped; the
  /// returned length is then larger than the buffer, which the caller
  /// uses to flag truncation.
  fn recv(&self, buffer: &mut [u8]) -> nb::Result<Addrd<usize>, Self::Error>;
}

impl Socket for UdpSocket {
  type Error = std::io::Error;

  fn send(&self, msg: Addrd<&[u8]>) -> nb::Result<(), Self::Error> {
    self.set_nonblocking(true).map_err(io_to_nb)?;
    self.send_to(msg.data(), msg.addr())
        .map(|_| ())
        .map_err(io_to_nb)
  }

  fn recv(&self, buffer: &mut [u8]) -> nb::Result<Addrd<usize>, Self::Error> {
    self.set_nonblocking(true).map_err(io_to_nb)?;
    self.recv_from(buffer)
        .map(|(n, addr)| Addrd(n, addr))
        .map_err(io_to_nb)
  }
}

fn io_to_nb(err: std::io::Error) -> nb::Error<std::io::Error> {
  match err.kind() {
    | std::io::ErrorKind::WouldBlock => nb::Error::WouldBlock,
    | _ => nb::Error::Other(err),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn addrd_map_keeps_addr() {
    let addr: SocketAddr = "[::1]:5683".parse().unwrap();
    let a = Addrd(1u8, addr).map(|n| n + 1);
    assert_eq!(a, Addrd(2u8, addr));
    assert_eq!(a.addr(), addr);
  }
}
