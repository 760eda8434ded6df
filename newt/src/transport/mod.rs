use std::net::SocketAddr;

use crate::error::Error;
use crate::net::{Addrd, DgramStatus, Socket};

/// TLS / DTLS sessions over memory buffers
pub mod secure;

pub use secure::{Security, SecureSession};

/// Largest datagram the mux will pull off a socket in one go
pub(crate) const DGRAM_LEN: usize = 1152;

#[derive(Debug)]
struct Session {
  remote: SocketAddr,
  inner: SecureSession,
}

#[derive(Debug)]
struct Port<S> {
  local: u16,
  socket: S,
  security: Option<Security>,
  sessions: Vec<Session>,
}

/// Dispatches send/recv to a non-secure datagram path or a
/// DTLS-wrapped path per local port, with a per-peer session table.
///
/// Each local port is bound once. A non-secure port hands ingress
/// bytes directly to the engine; a secure port feeds them into the
/// peer's DTLS session and hands the engine only decoded application
/// data. Sessions are created implicitly on the first datagram from an
/// unknown peer when the port carries server credentials, or
/// explicitly with [`Mux::security_setup`] for client roles.
#[derive(Debug)]
pub struct Mux<S> {
  ports: Vec<Port<S>>,
}

impl<S> Default for Mux<S> {
  fn default() -> Self {
    Self { ports: vec![] }
  }
}

impl<S: Socket> Mux<S> {
  /// Create a mux with no ports bound
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a non-secure port backed by `socket`
  pub fn add_port(&mut self, local: u16, socket: S) -> Result<(), Error> {
    self.add(local, socket, None)
  }

  /// Register a DTLS port backed by `socket`
  pub fn add_secure_port(&mut self, local: u16, socket: S, security: Security) -> Result<(), Error> {
    self.add(local, socket, Some(security))
  }

  fn add(&mut self, local: u16, socket: S, security: Option<Security>) -> Result<(), Error> {
    if self.ports.iter().any(|p| p.local == local) {
      return Err(Error::InvalidParameter);
    }

    self.ports.push(Port { local,
                           socket,
                           security,
                           sessions: vec![] });
    Ok(())
  }

  fn port_mut(&mut self, local: u16) -> Result<&mut Port<S>, Error> {
    self.ports
        .iter_mut()
        .find(|p| p.local == local)
        .ok_or(Error::InvalidParameter)
  }

  /// Open a client-initiated DTLS session toward `remote` on a secure
  /// local port. The first handshake flight goes out immediately;
  /// completion is observable via [`Mux::security_ready`].
  pub fn security_setup(&mut self, local: u16, remote: SocketAddr) -> Result<(), Error> {
    let port = self.port_mut(local)?;
    let security = port.security.as_ref().ok_or(Error::InvalidState)?;

    if port.sessions.iter().any(|s| s.remote == remote) {
      return Err(Error::InvalidState);
    }

    let mut inner = SecureSession::new(secure::Method::Dtls, security)?;
    let flight = inner.take_output();
    port.sessions.push(Session { remote, inner });

    if !flight.is_empty() {
      port.socket
          .send(Addrd(flight.as_slice(), remote))
          .map_err(|_| Error::ConnectionFailed)?;
    }

    Ok(())
  }

  /// Whether the DTLS session toward `remote` on `local` has finished
  /// its handshake
  pub fn security_ready(&self, local: u16, remote: SocketAddr) -> bool {
    self.ports
        .iter()
        .find(|p| p.local == local)
        .and_then(|p| p.sessions.iter().find(|s| s.remote == remote))
        .map(|s| s.inner.is_ready())
        .unwrap_or(false)
  }

  /// Tear down the DTLS session toward `remote`, if any
  pub fn security_free(&mut self, local: u16, remote: SocketAddr) -> Result<(), Error> {
    let port = self.port_mut(local)?;
    let before = port.sessions.len();
    port.sessions.retain(|s| s.remote != remote);

    if port.sessions.len() == before {
      return Err(Error::NotFound);
    }
    Ok(())
  }

  /// Send one datagram from `local` to its destination, through the
  /// peer's DTLS session when the port is secure.
  pub fn send(&mut self, local: u16, msg: Addrd<&[u8]>) -> Result<(), Error> {
    let port = self.port_mut(local)?;

    match port.security {
      | None => port.socket
                    .send(msg)
                    .map_err(|e| match e {
                      | nb::Error::WouldBlock => Error::Busy,
                      | nb::Error::Other(e) => {
                        log::error!("port {}: send failed: {:?}", local, e);
                        Error::ConnectionClosed
                      },
                    }),
      | Some(_) => {
        let session = port.sessions
                          .iter_mut()
                          .find(|s| s.remote == msg.addr())
                          .ok_or(Error::InvalidState)?;

        session.inner.write(msg.data())?;
        let out = session.inner.take_output();
        port.socket
            .send(Addrd(out.as_slice(), msg.addr()))
            .map_err(|_| Error::ConnectionClosed)
      },
    }
  }

  /// Drain every socket, decrypting through the session table where
  /// the port is secure, and return the application-visible datagrams.
  pub fn recv_all(&mut self) -> Vec<(u16, DgramStatus, Addrd<Vec<u8>>)> {
    let mut out = vec![];

    for port in self.ports.iter_mut() {
      let mut buf = [0u8; DGRAM_LEN];

      loop {
        match port.socket.recv(&mut buf) {
          | Err(nb::Error::WouldBlock) => break,
          | Err(nb::Error::Other(e)) => {
            log::error!("port {}: recv failed: {:?}", port.local, e);
            break;
          },
          | Ok(Addrd(n, remote)) => {
            let status = if n > DGRAM_LEN {
              DgramStatus::Truncated
            } else {
              DgramStatus::Success
            };
            let bytes = buf[..n.min(DGRAM_LEN)].to_vec();

            match port.security {
              | None => out.push((port.local, status, Addrd(bytes, remote))),
              | Some(_) => {
                if status != DgramStatus::Success {
                  log::warn!("port {}: dropping truncated ciphertext from {}",
                             port.local,
                             remote);
                  continue;
                }

                if let Some(plain) = Self::secure_ingress(port, remote, &bytes) {
                  out.push((port.local, DgramStatus::Success, Addrd(plain, remote)));
                }
              },
            }
          },
        }
      }
    }

    out
  }

  /// Feed ciphertext into the peer's session (creating one first when
  /// the port carries server credentials), flush any produced
  /// handshake flights, and return decrypted application data if any.
  fn secure_ingress(port: &mut Port<S>, remote: SocketAddr, bytes: &[u8]) -> Option<Vec<u8>> {
    let security = port.security.as_ref()?;

    let session_ix = match port.sessions.iter().position(|s| s.remote == remote) {
      | Some(ix) => ix,
      | None => match security {
        | Security::Server { .. } => {
          let inner = SecureSession::new(secure::Method::Dtls, security).ok()?;
          port.sessions.push(Session { remote, inner });
          port.sessions.len() - 1
        },
        | Security::Client => {
          log::warn!("port {}: ciphertext from unknown peer {}, dropped",
                     port.local,
                     remote);
          return None;
        },
      },
    };

    port.sessions[session_ix].inner.input(bytes);

    let flight = port.sessions[session_ix].inner.take_output();
    if !flight.is_empty() {
      if let Err(e) = port.socket.send(Addrd(flight.as_slice(), remote)) {
        log::error!("port {}: handshake flight to {} failed: {:?}",
                    port.local,
                    remote,
                    e);
      }
    }

    if port.sessions[session_ix].inner.is_failed() {
      port.sessions.swap_remove(session_ix);
      return None;
    }

    let mut plain = vec![];
    port.sessions[session_ix].inner.read(&mut plain);
    (!plain.is_empty()).then_some(plain)
  }

  /// Pump every session's handshake and flush pending ciphertext;
  /// called once per tick.
  pub fn process(&mut self) {
    for port in self.ports.iter_mut() {
      let socket = &port.socket;
      let local = port.local;

      port.sessions.retain_mut(|session| {
            session.inner.process();

            let flight = session.inner.take_output();
            if !flight.is_empty() {
              if let Err(e) = socket.send(Addrd(flight.as_slice(), session.remote)) {
                log::error!("port {}: flush to {} failed: {:?}", local, session.remote, e);
              }
            }

            !session.inner.is_failed()
          });
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test::SockMock;

  #[test]
  fn duplicate_port_is_refused() {
    let mut mux = Mux::new();
    mux.add_port(5683, SockMock::new()).unwrap();
    assert_eq!(mux.add_port(5683, SockMock::new()),
               Err(Error::InvalidParameter));
  }

  #[test]
  fn plain_send_goes_out_verbatim() {
    let mut mux = Mux::new();
    let sock = SockMock::new();
    let tx = sock.tx.clone();
    mux.add_port(5683, sock).unwrap();

    let remote: SocketAddr = "[::1]:9999".parse().unwrap();
    mux.send(5683, Addrd(&[1, 2, 3][..], remote)).unwrap();

    assert_eq!(tx.borrow()[0], Addrd(vec![1, 2, 3], remote));
  }

  #[test]
  fn plain_recv_passes_status_through() {
    let mut mux = Mux::new();
    let sock = SockMock::new();
    let rx = sock.rx.clone();
    mux.add_port(5683, sock).unwrap();

    let remote: SocketAddr = "[::1]:9999".parse().unwrap();
    rx.borrow_mut().push(Addrd(vec![0x40, 0x00, 0xab, 0xcd], remote));

    let got = mux.recv_all();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].0, 5683);
    assert_eq!(got[0].1, DgramStatus::Success);
    assert_eq!(got[0].2, Addrd(vec![0x40, 0x00, 0xab, 0xcd], remote));
  }

  #[test]
  fn send_to_unknown_port_is_invalid_parameter() {
    let mut mux = Mux::<SockMock>::new();
    let remote: SocketAddr = "[::1]:9999".parse().unwrap();
    assert_eq!(mux.send(5683, Addrd(&[][..], remote)),
               Err(Error::InvalidParameter));
  }
}
