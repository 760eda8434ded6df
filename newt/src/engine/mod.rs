//! Top-level CoAP ingress, egress and timing.
//!
//! [`Engine`] owns every table the protocol needs (retransmit queue,
//! resource tree, observer and observation lists, transport mux) and
//! exposes the three entry points the surrounding system drives:
//!
//! - [`Engine::poll`] / [`Engine::ingress`] for received datagrams,
//! - [`Engine::send`] for outbound messages,
//! - [`Engine::tick`] at a fixed cadence for retransmission, observe
//!   max-age accounting and session pumping.
//!
//! All callbacks (exchange completions, resource handlers, the error
//! and observe handlers) receive `&mut Engine` and may reenter any
//! public operation; the engine never holds a table borrow across a
//! callback.

use std::net::SocketAddr;

use newt_msg::observe::Action;
use newt_msg::{Code, CodeKind, ContentFormat, Id, Message, Payload, Token, TryFromBytes, Type};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::config::{Attempts, Config};
use crate::error::Error;
use crate::net::{Addrd, DgramStatus, Socket};
use crate::observe::{Observation, Observations, Observer, Observers};
use crate::queue::{Entry, Handle, Queue};
use crate::resource::{Permission, ResourceId, Resources, MAX_DEPTH};
use crate::transport::{Mux, Security};

/// What a queued exchange ended with: the correlated response (ACK or
/// separate response, token re-populated) or the error kind.
pub type ExchangeOutcome = Result<Option<Addrd<Message>>, Error>;

/// Completion callback attached to a queued exchange. Consumed on
/// delivery, so it can run at most once.
pub type ExchangeCallback<S> = Box<dyn FnOnce(&mut Engine<S>, ExchangeOutcome)>;

/// Catch-all inbound request handler; when installed, the resource
/// tree is bypassed entirely. An `Err` return is mapped onto an error
/// response (4.04 / 4.05 / 4.00).
pub type RequestHandler<S> = Box<dyn FnMut(&mut Engine<S>, &Addrd<Message>) -> Result<(), Error>>;

/// Per-resource request callback
pub type ResourceHandler<S> = Box<dyn FnMut(&mut Engine<S>, ResourceId, &Addrd<Message>)>;

/// Process-wide handler for errors that belong to no tracked exchange
pub type ErrorHandler<S> = Box<dyn FnMut(&mut Engine<S>, Error)>;

/// Handler for client-side observe traffic
pub type ObserveHandler<S> = Box<dyn FnMut(&mut Engine<S>, ObserveEvent)>;

/// Client-side observe lifecycle events
#[derive(Debug)]
pub enum ObserveEvent {
  /// A notification arrived for an observation that no in-flight
  /// exchange correlates with
  Notification(Addrd<Message>),
  /// An observation's max-age ran out without a refresh; re-register
  /// by sending a new GET if the data is still wanted
  Expired(Observation),
}

/// What [`Engine::observer_register`] grants: the sequence number and
/// Max-Age the registration response must carry, and the negotiated
/// content format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserveGrant {
  /// Sequence number for the Observe option of the response
  pub seq: u32,
  /// Content format notifications to this peer will use
  pub ct: ContentFormat,
  /// Max-Age the response should advertise
  pub max_age: u32,
}

/// Handle returned for sends that are not tracked by the retransmit
/// queue (empty ACKs / RSTs, NON responses)
pub const UNTRACKED: Handle = Handle(usize::MAX);

/// Build the response skeleton for a request: same message id and
/// token, piggy-back ACK type for CON requests, the request's own
/// type otherwise. The code defaults to 4.04 Not Found and is meant
/// to be overridden.
pub fn response_for(req: &Addrd<Message>) -> Addrd<Message> {
  let ty = match req.data().ty {
    | Type::Con => Type::Ack,
    | ty => ty,
  };

  Addrd(Message::new(ty, Code::NOT_FOUND, req.data().id, req.data().token),
        req.addr())
}

/// The CoAP engine; see the [module docs](self).
pub struct Engine<S: Socket> {
  cfg: Config,
  transport: Mux<S>,
  queue: Queue<ExchangeCallback<S>>,
  resources: Resources<ResourceHandler<S>>,
  observers: Observers,
  observations: Observations,
  mid_counter: u16,
  request_handler: Option<RequestHandler<S>>,
  error_handler: Option<ErrorHandler<S>>,
  observe_handler: Option<ObserveHandler<S>>,
  rng: ChaCha8Rng,
}

impl<S: Socket> core::fmt::Debug for Engine<S> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("Engine")
     .field("queue_len", &self.queue.len())
     .field("observers", &self.observers.len())
     .field("observations", &self.observations.len())
     .field("mid_counter", &self.mid_counter)
     .finish()
  }
}

impl<S: Socket> Engine<S> {
  /// Create an engine with no ports bound and an empty resource tree
  pub fn new(cfg: Config) -> Self {
    Self { transport: Mux::new(),
           queue: Queue::new(cfg.queue_capacity),
           resources: Resources::new(),
           observers: Observers::new(),
           observations: Observations::new(),
           mid_counter: 1,
           request_handler: None,
           error_handler: None,
           observe_handler: None,
           rng: ChaCha8Rng::seed_from_u64(cfg.token_seed),
           cfg }
  }

  /// The engine's configuration
  pub fn config(&self) -> &Config {
    &self.cfg
  }

  /// Bind a non-secure local port
  pub fn add_port(&mut self, port: u16, socket: S) -> Result<(), Error> {
    self.transport.add_port(port, socket)
  }

  /// Bind a DTLS local port
  pub fn add_secure_port(&mut self, port: u16, socket: S, security: Security) -> Result<(), Error> {
    self.transport.add_secure_port(port, socket, security)
  }

  /// Open a client-initiated DTLS session; see
  /// [`Mux::security_setup`](crate::transport::Mux::security_setup)
  pub fn security_setup(&mut self, port: u16, remote: SocketAddr) -> Result<(), Error> {
    self.transport.security_setup(port, remote)
  }

  /// Whether the DTLS session toward `remote` finished its handshake
  pub fn security_ready(&self, port: u16, remote: SocketAddr) -> bool {
    self.transport.security_ready(port, remote)
  }

  /// The resource tree
  pub fn resources(&self) -> &Resources<ResourceHandler<S>> {
    &self.resources
  }

  /// The resource tree, mutably (create nodes, attach children, set
  /// permissions / callbacks / values)
  pub fn resources_mut(&mut self) -> &mut Resources<ResourceHandler<S>> {
    &mut self.resources
  }

  /// Server-side observer table
  pub fn observers(&self) -> &Observers {
    &self.observers
  }

  /// Client-side observation table
  pub fn observations(&self) -> &Observations {
    &self.observations
  }

  /// Install the catch-all request handler, bypassing the resource tree
  pub fn on_request(&mut self, handler: RequestHandler<S>) {
    self.request_handler = Some(handler);
  }

  /// Install the process-wide error handler
  pub fn on_error(&mut self, handler: ErrorHandler<S>) {
    self.error_handler = Some(handler);
  }

  /// Install the client-side observe event handler
  pub fn on_observe(&mut self, handler: ObserveHandler<S>) {
    self.observe_handler = Some(handler);
  }

  /// Generate the `.well-known/core` link-format body for the current
  /// resource tree
  pub fn well_known_core(&self, capacity: usize) -> Result<String, Error> {
    self.resources.well_known_core(capacity)
  }

  /// Next message id; a 16-bit counter whose initial value is 1,
  /// wrapping at 2^16.
  pub fn next_mid(&mut self) -> Id {
    let id = Id(self.mid_counter);
    self.mid_counter = self.mid_counter.wrapping_add(1);
    id
  }

  fn initial_timeout(&mut self) -> u32 {
    let lo = self.cfg.con.ack_timeout;
    let hi = self.cfg.initial_timeout_max();

    if hi > lo {
      self.rng.gen_range(lo..=hi)
    } else {
      lo
    }
  }

  /// Serialize and transmit a message from `port`, enqueueing it for
  /// retransmission when it is a request or a confirmable response.
  ///
  /// A message id of 0 means "assign the next counter value". The
  /// returned handle is [`UNTRACKED`] for messages the queue does not
  /// track. The callback (if any) fires exactly once: on ACK, RST or
  /// retransmission timeout.
  pub fn send(&mut self,
              port: u16,
              msg: Addrd<Message>,
              callback: Option<ExchangeCallback<S>>)
              -> Result<Handle, Error> {
    let Addrd(mut msg, remote) = msg;

    if msg.id == Id(0) {
      msg.id = self.next_mid();
    }

    if msg.code == Code::GET {
      match msg.observe() {
        | Some(Action::Register) => {
          let path = msg.path()
                        .map_err(|_| Error::InvalidParameter)?
                        .into_iter()
                        .map(String::from)
                        .collect();
          self.observations.expect(msg.token, path);
        },
        | Some(Action::Deregister) => {
          self.observations.remove(&msg.token);
        },
        | None => {},
      }
    }

    let size = msg.len();
    let mut buffer = vec![0u8; size];
    msg.encode_into(&mut buffer)?;

    log::trace!("-> {} {:?} {} ({} bytes)", remote, msg.ty, msg.code, size);
    self.transport.send(port, Addrd(buffer.as_slice(), remote))?;

    let tracked = msg.code.kind() == CodeKind::Request
                  || (msg.code.kind() == CodeKind::Response && msg.ty == Type::Con);
    if !tracked {
      return Ok(UNTRACKED);
    }

    let (timeout, retrans_count) = if msg.ty == Type::Con {
      (self.initial_timeout(), Attempts(0))
    } else {
      (self.cfg.max_transmission_span, self.cfg.con.max_retransmit)
    };

    self.queue.add(Entry { handle: Handle(0),
                           mid: msg.id,
                           token: msg.token,
                           remote,
                           port,
                           buffer,
                           timeout,
                           timeout_val: timeout,
                           retrans_count,
                           callback })
  }

  /// Drain the transport and classify everything it yields
  pub fn poll(&mut self) {
    for (port, status, dgram) in self.transport.recv_all() {
      let Addrd(bytes, remote) = dgram;
      self.ingress(port, remote, status, &bytes);
    }
  }

  /// Classify one inbound datagram.
  ///
  /// Exposed so deployments that drive their own sockets can feed the
  /// engine directly; [`Engine::poll`] calls this for every datagram
  /// the mux yields.
  pub fn ingress(&mut self, port: u16, remote: SocketAddr, status: DgramStatus, bytes: &[u8]) {
    if status != DgramStatus::Success && status != DgramStatus::Truncated {
      return;
    }

    let mut msg = match Message::try_from_bytes(bytes) {
      | Ok(msg) => msg,
      | Err(e) => {
        log::warn!("<- {}: malformed message dropped: {:?}", remote, e);
        return;
      },
    };

    log::trace!("<- {} {:?} {} ({} bytes)", remote, msg.ty, msg.code, bytes.len());

    if status == DgramStatus::Truncated {
      if self.cfg.auto_mode {
        let mut resp = response_for(&Addrd(msg, remote));
        resp.data_mut().code = Code::REQUEST_ENTITY_TOO_LARGE;
        resp.data_mut().ty = Type::Reset;
        resp.data_mut().token = Token(Default::default());
        resp.data_mut()
            .set_size1(self.cfg.max_request_entity_size as u64);

        if let Err(e) = self.send(port, resp, None) {
          log::warn!("4.13 reply to {} failed: {:?}", remote, e);
        }
      } else {
        self.dispatch_error(Error::DataSize);
      }
      return;
    }

    let is_ping = msg.code == Code::EMPTY && msg.ty == Type::Con;
    let is_ack = msg.code == Code::EMPTY && msg.ty == Type::Ack;
    let is_reset = msg.ty == Type::Reset;

    if is_ping {
      let rst = msg.reset();
      if let Err(e) = self.send(port, Addrd(rst, remote), None) {
        log::warn!("ping reply to {} failed: {:?}", remote, e);
      }
    } else if is_ack || is_reset {
      let Some(handle) = self.queue.find_by_mid(msg.id) else {
        return;
      };
      let Some(entry) = self.queue.remove(handle) else {
        return;
      };

      // the peer's empty message carries no token; hand the
      // application the one the exchange was sent with
      msg.token = entry.token;

      if is_reset {
        // a reset to a confirmable notification unsubscribes the peer
        self.observers.remove(entry.remote, &entry.token);
      }

      if let Some(cb) = entry.callback {
        let outcome = if is_ack {
          Ok(Some(Addrd(msg, remote)))
        } else {
          Err(Error::TransmissionResetByPeer)
        };
        cb(self, outcome);
      }
    } else if msg.code.kind() == CodeKind::Response {
      if msg.ty == Type::Con {
        let ack = msg.ack();
        if let Err(e) = self.send(port, Addrd(ack, remote), None) {
          log::warn!("ack to {} failed: {:?}", remote, e);
        }
      }

      let msg = Addrd(msg, remote);
      match self.queue.find_by_token(&msg.data().token) {
        | Some(handle) => {
          let Some(entry) = self.queue.remove(handle) else {
            return;
          };
          self.observe_response_handle(&msg, true);

          if let Some(cb) = entry.callback {
            cb(self, Ok(Some(msg)));
          }
        },
        | None => {
          // no exchange wants it; offer it to the observation table,
          // then drop it
          self.observe_response_handle(&msg, false);
        },
      }
    } else if msg.code.kind() == CodeKind::Request {
      self.dispatch_request(port, Addrd(msg, remote));
    }
  }

  /// Client-side observe bookkeeping for a response: refresh (or
  /// create) the observation behind the token, and surface
  /// uncorrelated notifications through the observe handler.
  fn observe_response_handle(&mut self, msg: &Addrd<Message>, correlated: bool) {
    if !msg.data().has_observe() {
      return;
    }

    let seq = msg.data().observe_seq().unwrap_or(0);
    let max_age = msg.data().max_age_seconds().unwrap_or(60);
    let known = self.observations
                    .record(&msg.data().token, seq, max_age)
                    .is_some();

    if known && !correlated {
      self.dispatch_observe(ObserveEvent::Notification(msg.clone()));
    }
  }

  fn dispatch_request(&mut self, port: u16, req: Addrd<Message>) {
    if let Some(mut handler) = self.request_handler.take() {
      let result = handler(self, &req);
      if self.request_handler.is_none() {
        self.request_handler = Some(handler);
      }

      if let Err(e) = result {
        let code = match e {
          | Error::NotFound => Code::NOT_FOUND,
          | Error::MethodNotAllowed => Code::METHOD_NOT_ALLOWED,
          | _ => Code::BAD_REQUEST,
        };
        self.send_error_response(port, &req, code);
      }
      return;
    }

    let resource = {
      let segments = match req.data().path() {
        | Ok(segments) if segments.len() <= MAX_DEPTH => segments,
        | _ => {
          self.send_error_response(port, &req, Code::BAD_REQUEST);
          return;
        },
      };
      self.resources.resolve(&segments)
    };

    let Some(resource) = resource else {
      self.send_error_response(port, &req, Code::NOT_FOUND);
      return;
    };

    let allowed = self.resources
                      .get(resource)
                      .map(|node| node.callback.is_some() && node.permission.allows_method(req.data().code))
                      .unwrap_or(false);
    if !allowed {
      self.send_error_response(port, &req, Code::METHOD_NOT_ALLOWED);
      return;
    }

    if req.data().code == Code::GET && req.data().observe() == Some(Action::Deregister) {
      self.observers.remove(req.addr(), &req.data().token);
    }

    let Some(mut cb) = self.resources.take_callback(resource) else {
      return;
    };
    cb(self, resource, &req);
    self.resources.restore_callback(resource, cb);
  }

  fn send_error_response(&mut self, port: u16, req: &Addrd<Message>, code: Code) {
    let mut resp = response_for(req);
    resp.data_mut().code = code;

    if let Err(e) = self.send(port, resp, None) {
      log::warn!("{} reply to {} failed: {:?}", code, req.addr(), e);
      self.dispatch_error(e);
    }
  }

  /// Register the sender of `req` (a GET carrying Observe=0) as an
  /// observer of `resource`.
  ///
  /// The notification content format is the intersection of what the
  /// request accepts and what the resource supports; when the
  /// intersection is empty a 4.15 Unsupported Content-Format reply is
  /// sent from `port` and an error returned. On success the caller
  /// builds the response itself, carrying `seq` in the Observe option
  /// and `max_age` in Max-Age.
  pub fn observer_register(&mut self,
                           port: u16,
                           req: &Addrd<Message>,
                           resource: ResourceId)
                           -> Result<ObserveGrant, Error> {
    if req.data().observe() != Some(Action::Register) || req.data().token.is_empty() {
      return Err(Error::InvalidParameter);
    }

    let (permission, ct_mask, max_age) = {
      let node = self.resources.get(resource).ok_or(Error::InvalidParameter)?;
      (node.permission, node.ct_mask, node.max_age)
    };

    if !permission.contains(Permission::OBSERVE) {
      return Err(Error::MethodNotAllowed);
    }

    let ct = match req.data().accept() {
      | Some(format) if ct_mask.supports(format) => format,
      | None => ct_mask.preferred().unwrap_or(ContentFormat::Text),
      | Some(_) => {
        self.send_error_response(port, req, Code::UNSUPPORTED_CONTENT_FORMAT);
        return Err(Error::InvalidParameter);
      },
    };

    self.observers.register(Observer { remote: req.addr(),
                                       token: req.data().token,
                                       resource,
                                       ct });

    Ok(ObserveGrant { seq: self.observers.next_seq(),
                      ct,
                      max_age })
  }

  /// Send a notification to every observer of `resource`, each built
  /// with the observer's preferred content format and token, the next
  /// sequence number, and the resource's current value and remaining
  /// freshness.
  ///
  /// `ty` selects NON for rapid updates or CON for guaranteed
  /// delivery; a confirmable notification that is reset or exhausts
  /// its retransmissions unregisters the observer.
  pub fn notify(&mut self, port: u16, resource: ResourceId, ty: Type) -> Result<(), Error> {
    let (value, expire_time) = {
      let node = self.resources.get(resource).ok_or(Error::InvalidParameter)?;
      (node.value.clone(), node.expire_time)
    };

    for observer in self.observers.of_resource(resource) {
      let mut msg = Message::new(ty, Code::CONTENT, Id(0), observer.token);
      msg.set_observe_seq(self.observers.next_seq());
      msg.set_max_age(expire_time);
      msg.set_content_format(observer.ct);
      msg.payload = Payload(value.clone());

      if let Err(e) = self.send(port, Addrd(msg, observer.remote), None) {
        log::warn!("notify {} failed: {:?}", observer.remote, e);
      }
    }

    Ok(())
  }

  fn dispatch_error(&mut self, err: Error) {
    if let Some(mut handler) = self.error_handler.take() {
      handler(self, err);
      if self.error_handler.is_none() {
        self.error_handler = Some(handler);
      }
    }
  }

  fn dispatch_observe(&mut self, evt: ObserveEvent) {
    if let Some(mut handler) = self.observe_handler.take() {
      handler(self, evt);
      if self.observe_handler.is_none() {
        self.observe_handler = Some(handler);
      }
    }
  }

  /// Advance all countdowns by one tick:
  ///
  /// 1. pump the transport (DTLS handshakes, pending flights),
  /// 2. in auto mode, decrement observable resources' `expire_time`
  ///    and notify when within the configured delta of zero,
  /// 3. age client-side observations,
  /// 4. decrement / retransmit / expire every queued exchange.
  pub fn tick(&mut self) {
    self.transport.process();

    if self.cfg.auto_mode {
      self.observe_tick();
    }

    for expired in self.observations.tick() {
      self.dispatch_observe(ObserveEvent::Expired(expired));
    }

    let mut cursor = None;
    while let Some(handle) = self.queue.next_occupied(cursor) {
      cursor = Some(handle);

      let Some(entry) = self.queue.get_mut(handle) else {
        continue;
      };

      if entry.timeout > 0 {
        entry.timeout -= 1;
        continue;
      }

      if entry.retrans_count < self.cfg.con.max_retransmit {
        entry.timeout = entry.timeout_val * 2;
        entry.timeout_val = entry.timeout;
        entry.retrans_count.0 += 1;

        let (port, remote, buffer) = (entry.port, entry.remote, entry.buffer.clone());
        log::debug!("retransmit #{} to {}", entry.retrans_count.0, remote);

        if let Err(e) = self.transport.send(port, Addrd(buffer.as_slice(), remote)) {
          self.dispatch_error(e);
        }
      }

      let expired = self.queue
                        .get(handle)
                        .map(|e| {
                          e.timeout > self.cfg.max_transmission_span
                          || e.retrans_count >= self.cfg.con.max_retransmit
                        })
                        .unwrap_or(false);
      if expired {
        let Some(entry) = self.queue.remove(handle) else {
          continue;
        };

        // a confirmable notification that was never acknowledged
        // unsubscribes the peer
        self.observers.remove(entry.remote, &entry.token);

        match entry.callback {
          | Some(cb) => cb(self, Err(Error::TransmissionTimeout)),
          | None => self.dispatch_error(Error::TransmissionTimeout),
        }
      }
    }
  }

  fn observe_tick(&mut self) {
    let delta = self.cfg.observe_notify_delta_max_age;
    let port = self.cfg.server_port;

    let ids: Vec<ResourceId> = self.resources.ids().collect();
    for id in ids {
      let observable = self.resources
                           .get(id)
                           .map(|n| n.permission.contains(Permission::OBSERVE))
                           .unwrap_or(false);
      if !observable {
        continue;
      }

      let due = match self.resources.get_mut(id) {
        | None => false,
        | Some(node) if node.expire_time <= delta => {
          node.expire_time = node.max_age;
          true
        },
        | Some(node) => {
          node.expire_time -= 1;
          false
        },
      };

      if due {
        if let Err(e) = self.notify(port, id, Type::Non) {
          log::warn!("auto notify for resource {:?} failed: {:?}", id, e);
        }
      }
    }
  }
}
