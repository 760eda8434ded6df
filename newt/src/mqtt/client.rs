use core::fmt::Debug;

use super::decode::{remaining_length_decode, split_frame, unpack_bin, unpack_u16, unpack_utf8};
use super::encode::PacketBuf;
use super::*;
use crate::error::Error;
use crate::transport::secure::{Method, SecureSession, Security};

/// A byte-stream transport (typically TCP) the application owns.
///
/// The engine treats a would-block result by parking the packet and
/// transitioning the client to its pending-write state; a fatal error
/// tears the client down. Reading is push-based: the application
/// feeds received bytes to [`Clients::receive`].
pub trait Stream {
  /// The error yielded by fatal write failures
  type Error: Debug;

  /// Write the whole buffer or signal would-block / fatal
  fn write(&mut self, bytes: &[u8]) -> nb::Result<(), Self::Error>;
}

/// Index of a client in the [`Clients`] table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientHandle(usize);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct State(u8);

impl State {
  const TCP_CONNECTING: u8 = 0x01;
  const TCP_CONNECTED: u8 = 0x02;
  const CONNECTED: u8 = 0x04;
  const PENDING_WRITE: u8 = 0x08;

  fn set(&mut self, bit: u8) {
    self.0 |= bit;
  }

  fn clear(&mut self, bit: u8) {
    self.0 &= !bit;
  }

  fn has(&self, bit: u8) -> bool {
    self.0 & bit != 0
  }
}

/// Everything a client needs to introduce itself to the broker
#[derive(Debug)]
pub struct ConnectOptions {
  /// Client identifier; must be non-empty
  pub client_id: String,
  /// Optional username
  pub username: Option<String>,
  /// Optional password; only encoded when a username is present
  pub password: Option<Vec<u8>>,
  /// Optional last will
  pub will: Option<Will>,
  /// Ask the broker to discard session state from earlier
  /// connections. Defaults to true.
  pub clean_session: bool,
  /// Keep-alive interval advertised in CONNECT, in seconds.
  /// Defaults to 60.
  pub keep_alive: u16,
  /// Idle ticks after which the engine emits a PINGREQ. Defaults to
  /// 58 (keep-alive minus two, for callers ticking at roughly one
  /// second).
  pub ping_after: u32,
  /// Protocol revision this client speaks. Defaults to 3.1.1.
  pub version: ProtocolVersion,
  /// Outbound packet size bound (including the fixed header).
  /// Defaults to 128.
  pub max_packet: usize,
  /// When set, the stream is wrapped in a TLS session using these
  /// credentials
  pub security: Option<Security>,
}

impl Default for ConnectOptions {
  fn default() -> Self {
    Self { client_id: String::new(),
           username: None,
           password: None,
           will: None,
           clean_session: true,
           keep_alive: 60,
           ping_after: 58,
           version: ProtocolVersion::V3_1_1,
           max_packet: 128,
           security: None }
  }
}

/// Per-client event callback; may reenter the engine (e.g. call
/// [`Clients::publish_ack`] from a [`Event::Publish`]).
pub type EventHandler<T: Stream> = Box<dyn FnMut(&mut Clients<T>, ClientHandle, &Event)>;

#[derive(Debug)]
enum Pending {
  /// Application bytes not yet handed to the (TLS) write path
  Plain(Vec<u8>),
  /// Transport-level bytes the stream refused with would-block
  Wire(Vec<u8>),
}

struct Client<T: Stream> {
  opts: ConnectOptions,
  transport: T,
  tls: Option<SecureSession>,
  state: State,
  idle_ticks: u32,
  packet: PacketBuf,
  pending: Option<Pending>,
  evt: Option<EventHandler<T>>,
}

/// Fixed-capacity table of MQTT client state machines.
///
/// A slot is occupied from [`Clients::connect`] until the client is
/// torn down (graceful disconnect, abort, transport close, failed
/// CONNACK); teardown frees the slot and surfaces exactly one
/// [`Event::Disconnect`] or failed [`Event::Connect`].
pub struct Clients<T: Stream> {
  slots: Vec<Option<Client<T>>>,
}

impl<T: Stream> Debug for Clients<T> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("Clients")
     .field("capacity", &self.slots.len())
     .field("in_use", &self.slots.iter().filter(|s| s.is_some()).count())
     .finish()
  }
}

impl<T: Stream> Clients<T> {
  /// Create a table with room for `capacity` concurrent clients
  pub fn new(capacity: usize) -> Self {
    Self { slots: (0..capacity).map(|_| None).collect() }
  }

  fn client_mut(&mut self, handle: ClientHandle) -> Result<&mut Client<T>, Error> {
    self.slots
        .get_mut(handle.0)
        .and_then(Option::as_mut)
        .ok_or(Error::InvalidParameter)
  }

  /// Claim a slot and start the connection procedure over `transport`.
  ///
  /// The transport is expected to be connecting already; report the
  /// outcome with [`Clients::transport_connected`] or
  /// [`Clients::transport_closed`].
  pub fn connect(&mut self,
                 opts: ConnectOptions,
                 transport: T,
                 evt: EventHandler<T>)
                 -> Result<ClientHandle, Error> {
    if opts.client_id.is_empty() {
      return Err(Error::InvalidParameter);
    }

    let ix = self.slots
                 .iter()
                 .position(|s| s.is_none())
                 .ok_or(Error::NoMemory)?;

    let mut state = State::default();
    state.set(State::TCP_CONNECTING);

    let packet = PacketBuf::new(opts.max_packet);
    self.slots[ix] = Some(Client { opts,
                                   transport,
                                   tls: None,
                                   state,
                                   idle_ticks: 0,
                                   packet,
                                   pending: None,
                                   evt: Some(evt) });
    Ok(ClientHandle(ix))
  }

  fn connect_packet(client: &mut Client<T>) -> Result<Vec<u8>, Error> {
    let opts = &client.opts;
    let p = &mut client.packet;

    p.reset();
    p.pack_utf8(opts.version.descriptor())?;
    p.pack_u8(opts.version.level())?;

    // the connect flags are packed once their value is known
    let flags_at = p.mark();
    p.pack_u8(0)?;

    p.pack_u16(opts.keep_alive)?;
    p.pack_utf8(&opts.client_id)?;

    let mut flags = if opts.clean_session {
      CONNECT_FLAG_CLEAN_SESSION
    } else {
      0
    };

    if let Some(will) = &opts.will {
      flags |= CONNECT_FLAG_WILL;
      flags |= (will.qos as u8 & 0x03) << 3;
      if will.retain {
        flags |= CONNECT_FLAG_WILL_RETAIN;
      }

      p.pack_utf8(&will.topic)?;
      p.pack_len_prefixed(&will.message)?;
    }

    if let Some(username) = &opts.username {
      flags |= CONNECT_FLAG_USERNAME;
      p.pack_utf8(username)?;

      if let Some(password) = &opts.password {
        flags |= CONNECT_FLAG_PASSWORD;
        p.pack_len_prefixed(password)?;
      }
    }

    p.set_at(flags_at, flags);

    let message_type = PKT_CONNECT | (opts.version.connect_qos() << 1);
    Ok(p.finish(message_type).to_vec())
  }

  /// The transport finished connecting; transmit CONNECT (or park it
  /// until the TLS handshake completes).
  pub fn transport_connected(&mut self, handle: ClientHandle) -> Result<(), Error> {
    let client = self.client_mut(handle)?;
    if !client.state.has(State::TCP_CONNECTING) {
      return Err(Error::InvalidState);
    }
    client.state.set(State::TCP_CONNECTED);

    let connect = Self::connect_packet(client)?;

    let Some(security) = client.opts.security.as_ref() else {
      return self.write_out(handle, connect);
    };

    let mut tls = SecureSession::new(Method::Tls, security)?;
    let flight = tls.take_output();
    client.tls = Some(tls);

    // CONNECT waits in the pending slot for the handshake
    client.pending = Some(Pending::Plain(connect));
    client.state.set(State::PENDING_WRITE);

    let mut fatal = false;
    if !flight.is_empty() {
      match client.transport.write(&flight) {
        | Ok(()) => client.idle_ticks = 0,
        | Err(nb::Error::WouldBlock) => {
          log::warn!("tls flight deferred to tick");
        },
        | Err(nb::Error::Other(e)) => {
          log::error!("tls flight failed: {:?}", e);
          fatal = true;
        },
      }
    }

    if fatal {
      self.teardown(handle, DisconnectReason::TransportClosed);
      return Err(Error::ConnectionFailed);
    }
    Ok(())
  }

  /// The transport reported an error or end-of-stream; tear the
  /// client down.
  pub fn transport_closed(&mut self, handle: ClientHandle) {
    self.teardown(handle, DisconnectReason::TransportClosed);
  }

  /// Publish `payload` on `topic`. `message_id` is only encoded when
  /// `qos` > 0; the matching PUBACK is surfaced as
  /// [`Event::PubAck`].
  pub fn publish(&mut self,
                 handle: ClientHandle,
                 topic: &str,
                 payload: &[u8],
                 qos: QoS,
                 message_id: u16)
                 -> Result<(), Error> {
    let client = self.client_mut(handle)?;
    if client.state.has(State::PENDING_WRITE) {
      return Err(Error::Busy);
    }
    if !client.state.has(State::CONNECTED) {
      return Err(Error::InvalidState);
    }

    client.packet.reset();
    client.packet.pack_utf8(topic)?;
    if qos != QoS::AtMostOnce {
      client.packet.pack_u16(message_id)?;
    }
    client.packet.pack_bin(payload)?;

    let message_type = PKT_PUBLISH | ((qos as u8) << 1);
    let bytes = client.packet.finish(message_type).to_vec();

    self.write_out(handle, bytes)
  }

  /// Acknowledge an inbound QoS 1 publish. The engine never acks on
  /// its own; delivery semantics stay with the application.
  pub fn publish_ack(&mut self, handle: ClientHandle, message_id: u16) -> Result<(), Error> {
    let client = self.client_mut(handle)?;
    if client.state.has(State::PENDING_WRITE) {
      return Err(Error::Busy);
    }
    if !client.state.has(State::CONNECTED) {
      return Err(Error::InvalidState);
    }

    client.packet.reset();
    client.packet.pack_u16(message_id)?;
    let bytes = client.packet.finish(PKT_PUBACK).to_vec();

    self.write_out(handle, bytes)
  }

  /// Subscribe to a list of (topic, requested QoS) pairs. SUBSCRIBE
  /// is always sent at QoS 1, as the protocol requires.
  pub fn subscribe(&mut self,
                   handle: ClientHandle,
                   message_id: u16,
                   topics: &[(&str, QoS)])
                   -> Result<(), Error> {
    if topics.is_empty() {
      return Err(Error::InvalidParameter);
    }

    let client = self.client_mut(handle)?;
    if client.state.has(State::PENDING_WRITE) {
      return Err(Error::Busy);
    }
    if !client.state.has(State::CONNECTED) {
      return Err(Error::InvalidState);
    }

    client.packet.reset();
    client.packet.pack_u16(message_id)?;
    for (topic, qos) in topics {
      client.packet.pack_utf8(topic)?;
      client.packet.pack_u8(*qos as u8)?;
    }
    let bytes = client.packet.finish(PKT_SUBSCRIBE).to_vec();

    self.write_out(handle, bytes)
  }

  /// Unsubscribe from a list of topics; always sent at QoS 1.
  pub fn unsubscribe(&mut self,
                     handle: ClientHandle,
                     message_id: u16,
                     topics: &[&str])
                     -> Result<(), Error> {
    if topics.is_empty() {
      return Err(Error::InvalidParameter);
    }

    let client = self.client_mut(handle)?;
    if client.state.has(State::PENDING_WRITE) {
      return Err(Error::Busy);
    }
    if !client.state.has(State::CONNECTED) {
      return Err(Error::InvalidState);
    }

    client.packet.reset();
    client.packet.pack_u16(message_id)?;
    for topic in topics {
      client.packet.pack_utf8(topic)?;
    }
    let bytes = client.packet.finish(PKT_UNSUBSCRIBE).to_vec();

    self.write_out(handle, bytes)
  }

  /// Emit a two-byte PINGREQ; the tick driver does this on its own
  /// when the keep-alive budget runs low.
  pub fn ping(&mut self, handle: ClientHandle) -> Result<(), Error> {
    let client = self.client_mut(handle)?;
    if client.state.has(State::PENDING_WRITE) {
      return Err(Error::Busy);
    }
    if !client.state.has(State::CONNECTED) {
      return Err(Error::InvalidState);
    }

    self.write_out(handle, vec![PKT_PINGREQ, 0x00])
  }

  /// Orderly shutdown: send DISCONNECT (best effort) and tear the
  /// client down with [`DisconnectReason::Normal`].
  pub fn disconnect(&mut self, handle: ClientHandle) -> Result<(), Error> {
    let client = self.client_mut(handle)?;
    if !client.state.has(State::CONNECTED) && !client.state.has(State::TCP_CONNECTED) {
      return Err(Error::InvalidState);
    }

    if client.state.has(State::CONNECTED) {
      let pkt = [PKT_DISCONNECT, 0x00];
      match &mut client.tls {
        | None => {
          let _ = client.transport.write(&pkt);
        },
        | Some(tls) if tls.is_ready() => {
          if tls.write(&pkt).is_ok() {
            let out = tls.take_output();
            let _ = client.transport.write(&out);
          }
        },
        | Some(_) => {},
      }
    }

    self.teardown(handle, DisconnectReason::Normal);
    Ok(())
  }

  /// Tear the transport down immediately and surface a disconnect
  /// event.
  pub fn abort(&mut self, handle: ClientHandle) -> Result<(), Error> {
    if self.slots.get(handle.0).and_then(Option::as_ref).is_none() {
      return Err(Error::InvalidParameter);
    }

    self.teardown(handle, DisconnectReason::Aborted);
    Ok(())
  }

  /// Feed received transport bytes in. The buffer may hold one or
  /// more concatenated control packets; it must not end mid-packet.
  pub fn receive(&mut self, handle: ClientHandle, bytes: &[u8]) -> Result<(), Error> {
    let plain = {
      let client = self.client_mut(handle)?;

      match &mut client.tls {
        | None => bytes.to_vec(),
        | Some(tls) => {
          tls.input(bytes);

          let flight = tls.take_output();
          if !flight.is_empty() {
            if let Err(e) = client.transport.write(&flight) {
              log::warn!("tls flight deferred: {:?}", e);
            }
          }

          let mut plain = vec![];
          tls.read(&mut plain);
          plain
        },
      }
    };

    // a completed handshake releases the parked CONNECT
    self.flush_pending(handle);

    let mut rest: &[u8] = &plain;
    while !rest.is_empty() {
      match split_frame(rest) {
        | Ok((frame, after)) => {
          rest = after;
          self.handle_packet(handle, frame);
        },
        | Err(_) => {
          log::warn!("malformed control packet dropped ({} bytes)", rest.len());
          break;
        },
      }
    }

    Ok(())
  }

  fn handle_packet(&mut self, handle: ClientHandle, frame: &[u8]) {
    if self.slots.get(handle.0).and_then(Option::as_ref).is_none() {
      return;
    }

    match frame[0] & 0xF0 {
      | PKT_PINGRSP => log::trace!("pingrsp"),
      | PKT_CONNACK => {
        // CONNACK: [type, len, ack flags, return code]
        let rc = frame.get(3).copied().unwrap_or(0xFF);

        if rc == 0 {
          if let Ok(client) = self.client_mut(handle) {
            client.state.set(State::CONNECTED);
          }
          self.dispatch(handle, Event::Connect(Ok(())));
        } else {
          log::debug!("connack refused with return code {}", rc);
          self.teardown(handle, DisconnectReason::Normal);
        }
      },
      | PKT_PUBLISH => {
        let dup = frame[0] & 0x08 != 0;
        let retain = frame[0] & 0x01 != 0;
        let Some(qos) = QoS::from_bits((frame[0] & 0x06) >> 1) else {
          log::warn!("publish with reserved qos bits dropped");
          return;
        };

        let Ok((_, mut offset)) = remaining_length_decode(frame, 1) else {
          return;
        };
        let Ok(topic) = unpack_utf8(frame, &mut offset) else {
          log::warn!("publish with bad topic dropped");
          return;
        };
        let message_id = match qos {
          | QoS::AtMostOnce => None,
          | _ => match unpack_u16(frame, &mut offset) {
            | Ok(mid) => Some(mid),
            | Err(_) => {
              log::warn!("publish missing message id dropped");
              return;
            },
          },
        };
        let payload = unpack_bin(frame, &mut offset);

        if let Ok(client) = self.client_mut(handle) {
          client.idle_ticks = 0;
        }

        self.dispatch(handle,
                      Event::Publish(Publish { topic,
                                               payload,
                                               qos,
                                               message_id,
                                               dup,
                                               retain }));
      },
      | ty @ (PKT_PUBACK | PKT_PUBREC | PKT_PUBREL | PKT_PUBCOMP | PKT_SUBACK | PKT_UNSUBACK) => {
        let mut offset = 2;
        let Ok(mid) = unpack_u16(frame, &mut offset) else {
          return;
        };

        let evt = match ty {
          | PKT_PUBACK => Event::PubAck(mid),
          | PKT_PUBREC => Event::PubRec(mid),
          | PKT_PUBREL => Event::PubRel(mid),
          | PKT_PUBCOMP => Event::PubComp(mid),
          | PKT_SUBACK => Event::SubAck(mid),
          | _ => Event::UnsubAck(mid),
        };
        self.dispatch(handle, evt);
      },
      | PKT_DISCONNECT => {
        log::debug!("broker sent disconnect");
        self.teardown(handle, DisconnectReason::Normal);
      },
      | other => log::trace!("ignoring control packet type {:#04x}", other),
    }
  }

  fn write_out(&mut self, handle: ClientHandle, bytes: Vec<u8>) -> Result<(), Error> {
    let client = self.client_mut(handle)?;
    if client.state.has(State::PENDING_WRITE) {
      return Err(Error::Busy);
    }

    let mut fatal = false;

    match &mut client.tls {
      | None => match client.transport.write(&bytes) {
        | Ok(()) => client.idle_ticks = 0,
        | Err(nb::Error::WouldBlock) => {
          client.pending = Some(Pending::Wire(bytes));
          client.state.set(State::PENDING_WRITE);
        },
        | Err(nb::Error::Other(e)) => {
          log::error!("write failed: {:?}", e);
          fatal = true;
        },
      },
      | Some(tls) if !tls.is_ready() => {
        client.pending = Some(Pending::Plain(bytes));
        client.state.set(State::PENDING_WRITE);
      },
      | Some(tls) => match tls.write(&bytes) {
        | Err(_) => fatal = true,
        | Ok(()) => {
          let cipher = tls.take_output();
          match client.transport.write(&cipher) {
            | Ok(()) => client.idle_ticks = 0,
            | Err(nb::Error::WouldBlock) => {
              client.pending = Some(Pending::Wire(cipher));
              client.state.set(State::PENDING_WRITE);
            },
            | Err(nb::Error::Other(e)) => {
              log::error!("write failed: {:?}", e);
              fatal = true;
            },
          }
        },
      },
    }

    if fatal {
      self.teardown(handle, DisconnectReason::TransportClosed);
      return Err(Error::ConnectionClosed);
    }
    Ok(())
  }

  fn flush_pending(&mut self, handle: ClientHandle) {
    let Some(client) = self.slots.get_mut(handle.0).and_then(Option::as_mut) else {
      return;
    };
    let Some(pending) = client.pending.take() else {
      return;
    };
    client.state.clear(State::PENDING_WRITE);

    let plain = match pending {
      | Pending::Plain(bytes) => match &client.tls {
        | Some(tls) if !tls.is_ready() => {
          client.pending = Some(Pending::Plain(bytes));
          client.state.set(State::PENDING_WRITE);
          return;
        },
        | _ => Some(bytes),
      },
      | Pending::Wire(bytes) => {
        let mut fatal = false;
        match client.transport.write(&bytes) {
          | Ok(()) => client.idle_ticks = 0,
          | Err(nb::Error::WouldBlock) => {
            client.pending = Some(Pending::Wire(bytes));
            client.state.set(State::PENDING_WRITE);
          },
          | Err(nb::Error::Other(e)) => {
            log::error!("pending flush failed: {:?}", e);
            fatal = true;
          },
        }

        if fatal {
          self.teardown(handle, DisconnectReason::TransportClosed);
        }
        None
      },
    };

    if let Some(bytes) = plain {
      let _ = self.write_out(handle, bytes);
    }
  }

  /// Remove the client (freeing its slot) and surface exactly one
  /// event: `Disconnect` when the session was up, a failed `Connect`
  /// when it never got there.
  fn teardown(&mut self, handle: ClientHandle, reason: DisconnectReason) {
    let Some(mut client) = self.slots.get_mut(handle.0).and_then(Option::take) else {
      return;
    };

    let evt = if client.state.has(State::CONNECTED) {
      Event::Disconnect(reason)
    } else {
      Event::Connect(Err(Error::ConnectionFailed))
    };

    if let Some(mut cb) = client.evt.take() {
      cb(self, handle, &evt);
    }
  }

  fn dispatch(&mut self, handle: ClientHandle, evt: Event) {
    let cb = self.slots
                 .get_mut(handle.0)
                 .and_then(Option::as_mut)
                 .and_then(|c| c.evt.take());

    if let Some(mut cb) = cb {
      cb(self, handle, &evt);

      if let Some(client) = self.slots.get_mut(handle.0).and_then(Option::as_mut) {
        if client.evt.is_none() {
          client.evt = Some(cb);
        }
      }
    }
  }

  /// Advance every client by one tick: pump TLS, emit PINGREQ when
  /// the keep-alive budget runs low, retry pending sends.
  pub fn tick(&mut self) {
    for ix in 0..self.slots.len() {
      let handle = ClientHandle(ix);

      let (should_ping, has_pending) = match self.slots[ix].as_mut() {
        | None => continue,
        | Some(client) => {
          client.idle_ticks = client.idle_ticks.saturating_add(1);

          if let Some(tls) = &mut client.tls {
            tls.process();
            let flight = tls.take_output();
            if !flight.is_empty() {
              if let Err(e) = client.transport.write(&flight) {
                log::warn!("tls flight deferred: {:?}", e);
              }
            }
          }

          (client.state.has(State::CONNECTED)
           && !client.state.has(State::PENDING_WRITE)
           && client.idle_ticks >= client.opts.ping_after,
           client.pending.is_some())
        },
      };

      if should_ping {
        if let Err(e) = self.ping(handle) {
          log::debug!("keep-alive ping failed: {:?}", e);
        }
      }

      if has_pending {
        self.flush_pending(handle);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::cell::{Cell, RefCell};
  use std::rc::Rc;

  use super::*;

  #[derive(Debug, Default, Clone)]
  struct StreamMock {
    written: Rc<RefCell<Vec<Vec<u8>>>>,
    blocked: Rc<Cell<bool>>,
    dead: Rc<Cell<bool>>,
  }

  impl Stream for StreamMock {
    type Error = &'static str;

    fn write(&mut self, bytes: &[u8]) -> nb::Result<(), Self::Error> {
      if self.dead.get() {
        return Err(nb::Error::Other("broken pipe"));
      }
      if self.blocked.get() {
        return Err(nb::Error::WouldBlock);
      }
      self.written.borrow_mut().push(bytes.to_vec());
      Ok(())
    }
  }

  type Events = Rc<RefCell<Vec<Event>>>;

  fn opts(id: &str) -> ConnectOptions {
    ConnectOptions { client_id: id.into(),
                     ..ConnectOptions::default() }
  }

  fn recorder(events: &Events) -> EventHandler<StreamMock> {
    let seen = events.clone();
    Box::new(move |_, _, evt| seen.borrow_mut().push(evt.clone()))
  }

  fn connected_client(opts: ConnectOptions)
                      -> (Clients<StreamMock>, ClientHandle, StreamMock, Events) {
    let events: Events = Default::default();
    let stream = StreamMock::default();

    let mut clients = Clients::new(1);
    let h = clients.connect(opts, stream.clone(), recorder(&events))
                   .unwrap();
    clients.transport_connected(h).unwrap();
    clients.receive(h, &[0x20, 0x02, 0x00, 0x00]).unwrap();

    assert_eq!(*events.borrow(), vec![Event::Connect(Ok(()))]);
    stream.written.borrow_mut().clear();
    events.borrow_mut().clear();

    (clients, h, stream, events)
  }

  #[test]
  fn connect_packet_3_1_1() {
    let events: Events = Default::default();
    let stream = StreamMock::default();

    let mut clients = Clients::new(1);
    let h = clients.connect(opts("newt"), stream.clone(), recorder(&events))
                   .unwrap();
    clients.transport_connected(h).unwrap();

    let written = stream.written.borrow();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0],
               vec![0x10, // CONNECT, qos 0
                    16, // remaining length
                    0x00, 0x04, b'M', b'Q', b'T', b'T', // protocol descriptor
                    0x04, // protocol level
                    0x02, // connect flags: clean session
                    0x00, 0x3c, // keep alive 60
                    0x00, 0x04, b'n', b'e', b'w', b't']);
  }

  #[test]
  fn connect_packet_3_1_0_uses_mqisdp_and_qos1() {
    let events: Events = Default::default();
    let stream = StreamMock::default();

    let mut clients = Clients::new(1);
    let h = clients.connect(ConnectOptions { version: ProtocolVersion::V3_1,
                                             ..opts("newt") },
                            stream.clone(),
                            recorder(&events))
                   .unwrap();
    clients.transport_connected(h).unwrap();

    let written = stream.written.borrow();
    assert_eq!(written[0][0], 0x12); // CONNECT at qos 1
    assert_eq!(&written[0][2..11],
               &[0x00, 0x06, b'M', b'Q', b'I', b's', b'd', b'p', 0x03]);
  }

  #[test]
  fn connect_packet_carries_will_and_credentials() {
    let events: Events = Default::default();
    let stream = StreamMock::default();

    let mut clients = Clients::new(1);
    let options = ConnectOptions { will: Some(Will { topic: "will".into(),
                                                     message: vec![],
                                                     qos: QoS::AtLeastOnce,
                                                     retain: true }),
                                   username: Some("user".into()),
                                   password: Some(b"pw".to_vec()),
                                   ..opts("newt") };
    let h = clients.connect(options, stream.clone(), recorder(&events))
                   .unwrap();
    clients.transport_connected(h).unwrap();

    let written = stream.written.borrow();
    let packet = &written[0];

    // flags byte sits right after the protocol descriptor + level
    let flags = packet[9];
    assert_eq!(flags,
               CONNECT_FLAG_CLEAN_SESSION
               | CONNECT_FLAG_WILL
               | (1 << 3) // will qos 1
               | CONNECT_FLAG_WILL_RETAIN
               | CONNECT_FLAG_USERNAME
               | CONNECT_FLAG_PASSWORD);

    // the zero-length will message is a bare two-byte length prefix
    let tail = &packet[packet.len() - 18..];
    assert_eq!(tail,
               &[0x00, 0x04, b'w', b'i', b'l', b'l', // will topic
                 0x00, 0x00, // zero-length will message
                 0x00, 0x04, b'u', b's', b'e', b'r', // username
                 0x00, 0x02, b'p', b'w']); // password
  }

  #[test]
  fn empty_client_id_is_refused() {
    let events: Events = Default::default();
    let mut clients = Clients::new(1);
    assert_eq!(clients.connect(opts(""), StreamMock::default(), recorder(&events))
                      .err(),
               Some(Error::InvalidParameter));
  }

  #[test]
  fn table_capacity_is_enforced() {
    let events: Events = Default::default();
    let mut clients = Clients::new(1);
    clients.connect(opts("a"), StreamMock::default(), recorder(&events))
           .unwrap();
    assert_eq!(clients.connect(opts("b"), StreamMock::default(), recorder(&events))
                      .err(),
               Some(Error::NoMemory));
  }

  #[test]
  fn publish_before_connack_is_invalid_state() {
    let events: Events = Default::default();
    let stream = StreamMock::default();

    let mut clients = Clients::new(1);
    let h = clients.connect(opts("newt"), stream, recorder(&events)).unwrap();
    clients.transport_connected(h).unwrap();

    assert_eq!(clients.publish(h, "t", b"x", QoS::AtMostOnce, 0).err(),
               Some(Error::InvalidState));
  }

  #[test]
  fn publish_qos1_wire_format_and_puback() {
    let (mut clients, h, stream, events) = connected_client(opts("newt"));

    clients.publish(h, "led/state", &[0x31], QoS::AtLeastOnce, 42)
           .unwrap();

    assert_eq!(*stream.written.borrow(),
               vec![vec![0x32, // PUBLISH, dup 0, qos 1, retain 0
                         14, // remaining length
                         0x00, 0x09, b'l', b'e', b'd', b'/', b's', b't', b'a', b't', b'e',
                         0x00, 0x2a, // message id 42
                         0x31]]);

    clients.receive(h, &[0x40, 0x02, 0x00, 0x2a]).unwrap();
    assert_eq!(*events.borrow(), vec![Event::PubAck(42)]);
  }

  #[test]
  fn subscribe_is_sent_at_qos1() {
    let (mut clients, h, stream, events) = connected_client(opts("newt"));

    clients.subscribe(h, 7, &[("led/state", QoS::AtLeastOnce)])
           .unwrap();

    assert_eq!(*stream.written.borrow(),
               vec![vec![0x82, // SUBSCRIBE at qos 1
                         14,
                         0x00, 0x07, // message id
                         0x00, 0x09, b'l', b'e', b'd', b'/', b's', b't', b'a', b't', b'e',
                         0x01]]);

    clients.receive(h, &[0x90, 0x03, 0x00, 0x07, 0x01]).unwrap();
    assert_eq!(*events.borrow(), vec![Event::SubAck(7)]);
  }

  #[test]
  fn inbound_publish_is_surfaced_not_auto_acked() {
    let (mut clients, h, stream, events) = connected_client(opts("newt"));

    // PUBLISH qos 1, topic "t", mid 5, payload [1, 2]
    clients.receive(h,
                    &[0x32, 0x07, 0x00, 0x01, b't', 0x00, 0x05, 0x01, 0x02])
           .unwrap();

    assert_eq!(*events.borrow(),
               vec![Event::Publish(Publish { topic: "t".into(),
                                             payload: vec![1, 2],
                                             qos: QoS::AtLeastOnce,
                                             message_id: Some(5),
                                             dup: false,
                                             retain: false })]);

    // nothing went out until the application acks
    assert!(stream.written.borrow().is_empty());

    clients.publish_ack(h, 5).unwrap();
    assert_eq!(*stream.written.borrow(), vec![vec![0x40, 0x02, 0x00, 0x05]]);
  }

  #[test]
  fn concatenated_packets_in_one_delivery() {
    let events: Events = Default::default();
    let stream = StreamMock::default();

    let mut clients = Clients::new(1);
    let h = clients.connect(opts("newt"), stream, recorder(&events)).unwrap();
    clients.transport_connected(h).unwrap();

    // CONNACK and a qos 0 PUBLISH arrive in one read
    clients.receive(h,
                    &[0x20, 0x02, 0x00, 0x00, //
                      0x30, 0x04, 0x00, 0x01, b't', 0xff])
           .unwrap();

    assert_eq!(*events.borrow(),
               vec![Event::Connect(Ok(())),
                    Event::Publish(Publish { topic: "t".into(),
                                             payload: vec![0xff],
                                             qos: QoS::AtMostOnce,
                                             message_id: None,
                                             dup: false,
                                             retain: false })]);
  }

  #[test]
  fn connack_with_failure_code_frees_the_client() {
    let events: Events = Default::default();
    let stream = StreamMock::default();

    let mut clients = Clients::new(1);
    let h = clients.connect(opts("newt"), stream, recorder(&events)).unwrap();
    clients.transport_connected(h).unwrap();

    clients.receive(h, &[0x20, 0x02, 0x00, 0x05]).unwrap();

    assert_eq!(*events.borrow(),
               vec![Event::Connect(Err(Error::ConnectionFailed))]);
    // the slot is free again
    assert!(clients.connect(opts("again"), StreamMock::default(), recorder(&events))
                   .is_ok());
  }

  #[test]
  fn pending_write_defers_and_busy_guards() {
    let (mut clients, h, stream, _) = connected_client(opts("newt"));

    stream.blocked.set(true);
    clients.publish(h, "t", b"x", QoS::AtMostOnce, 0).unwrap();

    // no concurrent send is permitted while the first has not drained
    assert_eq!(clients.publish(h, "t", b"y", QoS::AtMostOnce, 0).err(),
               Some(Error::Busy));
    assert!(stream.written.borrow().is_empty());

    stream.blocked.set(false);
    clients.tick();

    assert_eq!(stream.written.borrow().len(), 1);

    // drained; the next send goes through again
    clients.publish(h, "t", b"y", QoS::AtMostOnce, 0).unwrap();
    assert_eq!(stream.written.borrow().len(), 2);
  }

  #[test]
  fn keep_alive_ping_after_idle_ticks() {
    let (mut clients, h, stream, _) = connected_client(ConnectOptions { ping_after: 3,
                                                                        ..opts("newt") });

    clients.tick();
    clients.tick();
    assert!(stream.written.borrow().is_empty());

    clients.tick();
    assert_eq!(*stream.written.borrow(), vec![vec![PKT_PINGREQ, 0x00]]);

    // the write refreshed the budget
    stream.written.borrow_mut().clear();
    clients.tick();
    assert!(stream.written.borrow().is_empty());
    let _ = h;
  }

  #[test]
  fn disconnect_sends_packet_and_frees_slot() {
    let (mut clients, h, stream, events) = connected_client(opts("newt"));

    clients.disconnect(h).unwrap();

    assert_eq!(*stream.written.borrow(), vec![vec![PKT_DISCONNECT, 0x00]]);
    assert_eq!(*events.borrow(),
               vec![Event::Disconnect(DisconnectReason::Normal)]);
    assert_eq!(clients.publish(h, "t", b"x", QoS::AtMostOnce, 0).err(),
               Some(Error::InvalidParameter));
  }

  #[test]
  fn abort_surfaces_disconnect_event() {
    let (mut clients, h, _, events) = connected_client(opts("newt"));

    clients.abort(h).unwrap();
    assert_eq!(*events.borrow(),
               vec![Event::Disconnect(DisconnectReason::Aborted)]);
  }

  #[test]
  fn fatal_write_tears_down() {
    let (mut clients, h, stream, events) = connected_client(opts("newt"));

    stream.dead.set(true);
    assert_eq!(clients.publish(h, "t", b"x", QoS::AtMostOnce, 0).err(),
               Some(Error::ConnectionClosed));
    assert_eq!(*events.borrow(),
               vec![Event::Disconnect(DisconnectReason::TransportClosed)]);
  }
}
