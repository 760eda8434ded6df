use std::io::{self, Read, Write};

use openssl::pkey::{PKey, Private};
use openssl::ssl::{ErrorCode, Ssl, SslContext, SslMethod, SslStream, SslVerifyMode};
use openssl::x509::X509;

use crate::error::Error;

/// Credentials and role for a secure endpoint.
///
/// A `Server` endpoint accepts handshakes initiated by unknown peers;
/// a `Client` endpoint only opens sessions the application asked for
/// (see `security_setup` on the mux / MQTT connect options).
pub enum Security {
  /// Accept sessions from any peer, presenting this identity
  Server {
    /// Private key matching `cert`
    pkey: PKey<Private>,
    /// Certificate presented to peers
    cert: X509,
  },
  /// Initiate sessions; the peer is not verified (constrained nodes
  /// commonly pin identity at a different layer)
  Client,
}

impl core::fmt::Debug for Security {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    match self {
      | Security::Server { .. } => f.write_str("Security::Server"),
      | Security::Client => f.write_str("Security::Client"),
    }
  }
}

/// Which protocol family a session speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
  /// DTLS over a datagram path (CoAP secure ports)
  Dtls,
  /// TLS over a stream path (MQTT secure transport)
  Tls,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
  Handshaking,
  Ready,
  Failed,
}

/// In-memory byte pipe the TLS library reads ciphertext from and
/// writes ciphertext to. `input` fills `incoming`; everything the
/// library writes lands in `outgoing` until the owner drains it
/// toward the real transport.
#[derive(Debug, Default)]
struct MemoryIo {
  incoming: Vec<u8>,
  outgoing: Vec<u8>,
}

impl Read for MemoryIo {
  fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
    if self.incoming.is_empty() {
      return Err(io::Error::new(io::ErrorKind::WouldBlock, "no ciphertext buffered"));
    }

    let n = buf.len().min(self.incoming.len());
    buf[..n].copy_from_slice(&self.incoming[..n]);
    self.incoming.drain(..n);
    Ok(n)
  }
}

impl Write for MemoryIo {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    self.outgoing.extend_from_slice(buf);
    Ok(buf.len())
  }

  fn flush(&mut self) -> io::Result<()> {
    Ok(())
  }
}

/// One TLS or DTLS session, driven entirely through memory buffers.
///
/// The shape mirrors an opaque embedded TLS library: feed ciphertext
/// with [`SecureSession::input`], drain decrypted application data
/// with [`SecureSession::read`], encrypt application data with
/// [`SecureSession::write`], pump handshakes with
/// [`SecureSession::process`], and ship whatever
/// [`SecureSession::take_output`] yields over the plain transport.
pub struct SecureSession {
  stream: SslStream<MemoryIo>,
  is_server: bool,
  state: State,
}

impl core::fmt::Debug for SecureSession {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("SecureSession")
     .field("is_server", &self.is_server)
     .field("state", &self.state)
     .finish()
  }
}

fn context(method: Method, security: &Security) -> Result<SslContext, Error> {
  let ssl_method = match method {
    | Method::Dtls => SslMethod::dtls(),
    | Method::Tls => SslMethod::tls(),
  };

  let mut builder = SslContext::builder(ssl_method).map_err(|_| Error::InvalidParameter)?;

  match security {
    | Security::Server { pkey, cert } => {
      builder.set_private_key(pkey)
             .and_then(|_| builder.set_certificate(cert))
             .and_then(|_| builder.check_private_key())
             .map_err(|_| Error::InvalidParameter)?;
    },
    | Security::Client => {
      builder.set_verify(SslVerifyMode::NONE);
    },
  }

  Ok(builder.build())
}

impl SecureSession {
  /// Allocate a session and start its handshake.
  ///
  /// Ciphertext produced by the first handshake flight is immediately
  /// available from [`SecureSession::take_output`].
  pub fn new(method: Method, security: &Security) -> Result<Self, Error> {
    let ctx = context(method, security)?;
    let ssl = Ssl::new(&ctx).map_err(|_| Error::InvalidParameter)?;
    let stream = SslStream::new(ssl, MemoryIo::default()).map_err(|_| Error::InvalidParameter)?;

    let mut session = SecureSession { stream,
                                      is_server: matches!(security, Security::Server { .. }),
                                      state: State::Handshaking };
    session.process();
    Ok(session)
  }

  /// Whether the handshake completed and application data can flow
  pub fn is_ready(&self) -> bool {
    self.state == State::Ready
  }

  /// Whether the handshake failed; the owner should free the session
  pub fn is_failed(&self) -> bool {
    self.state == State::Failed
  }

  /// Drive the handshake as far as the buffered ciphertext allows.
  pub fn process(&mut self) {
    if self.state != State::Handshaking {
      return;
    }

    let result = if self.is_server {
      self.stream.accept()
    } else {
      self.stream.connect()
    };

    self.state = match result {
      | Ok(()) => State::Ready,
      | Err(e) if e.code() == ErrorCode::WANT_READ || e.code() == ErrorCode::WANT_WRITE => {
        State::Handshaking
      },
      | Err(e) => {
        log::warn!("handshake failed: {:?}", e);
        State::Failed
      },
    };
  }

  /// Feed ciphertext received from the peer into the session.
  pub fn input(&mut self, bytes: &[u8]) {
    self.stream.get_mut().incoming.extend_from_slice(bytes);
    self.process();
  }

  /// Encrypt application data; the ciphertext shows up in
  /// [`SecureSession::take_output`].
  ///
  /// Fails with [`Error::InvalidState`] until the handshake is done.
  pub fn write(&mut self, bytes: &[u8]) -> Result<(), Error> {
    if self.state != State::Ready {
      return Err(Error::InvalidState);
    }

    self.stream
        .ssl_write(bytes)
        .map(|_| ())
        .map_err(|_| Error::ConnectionClosed)
  }

  /// Drain decrypted application data, appending it to `out`.
  /// Returns the number of bytes appended.
  pub fn read(&mut self, out: &mut Vec<u8>) -> usize {
    let mut buf = [0u8; 2048];
    let mut total = 0;

    loop {
      match self.stream.ssl_read(&mut buf) {
        | Ok(0) => break,
        | Ok(n) => {
          out.extend_from_slice(&buf[..n]);
          total += n;
        },
        | Err(_) => break,
      }
    }

    total
  }

  /// Take all ciphertext the session produced since the last call;
  /// the caller writes it through the plain transport with the
  /// session's book-kept remote address.
  pub fn take_output(&mut self) -> Vec<u8> {
    core::mem::take(&mut self.stream.get_mut().outgoing)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn server_identity() -> (PKey<Private>, X509) {
    use openssl::asn1::Asn1Time;
    use openssl::hash::MessageDigest;
    use openssl::rsa::Rsa;
    use openssl::x509::X509NameBuilder;

    let rsa = Rsa::generate(2048).unwrap();
    let pkey = PKey::from_rsa(rsa).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", "localhost").unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&pkey).unwrap();
    builder.set_not_before(&Asn1Time::days_from_now(0).unwrap())
           .unwrap();
    builder.set_not_after(&Asn1Time::days_from_now(1).unwrap())
           .unwrap();
    builder.sign(&pkey, MessageDigest::sha256()).unwrap();

    (pkey, builder.build())
  }

  fn pump(client: &mut SecureSession, server: &mut SecureSession) {
    for _ in 0..16 {
      let c2s = client.take_output();
      if !c2s.is_empty() {
        server.input(&c2s);
      }

      let s2c = server.take_output();
      if !s2c.is_empty() {
        client.input(&s2c);
      }

      if client.is_ready() && server.is_ready() {
        break;
      }
    }
  }

  #[test]
  fn tls_handshake_and_round_trip_through_memory() {
    let (pkey, cert) = server_identity();
    let server_sec = Security::Server { pkey, cert };

    let mut server = SecureSession::new(Method::Tls, &server_sec).unwrap();
    let mut client = SecureSession::new(Method::Tls, &Security::Client).unwrap();

    pump(&mut client, &mut server);
    assert!(client.is_ready());
    assert!(server.is_ready());

    client.write(b"hello over tls").unwrap();
    server.input(&client.take_output());

    let mut plain = vec![];
    server.read(&mut plain);
    assert_eq!(plain, b"hello over tls");
  }

  #[test]
  fn write_before_handshake_is_invalid_state() {
    let mut client = SecureSession::new(Method::Tls, &Security::Client).unwrap();
    assert_eq!(client.write(b"too early"), Err(Error::InvalidState));
  }
}
