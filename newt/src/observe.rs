use std::net::SocketAddr;

use newt_msg::{ContentFormat, Token};

use crate::resource::ResourceId;

/// A server-side record of one peer's interest in one resource.
///
/// Created on a GET carrying Observe=0 where registration succeeds;
/// removed on GET with Observe=1, on RST from the peer, or on
/// exhausted retransmission of a confirmable notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observer {
  /// The subscribed peer
  pub remote: SocketAddr,
  /// Token the peer registered with; every notification carries it
  pub token: Token,
  /// The resource being observed
  pub resource: ResourceId,
  /// Content format notifications to this peer are rendered in
  pub ct: ContentFormat,
}

/// Server-side observer table plus the notification sequence counter.
///
/// Sequence numbers are strictly monotonically increasing per
/// server-lifetime (and therefore per resource), wrapping modulo 2^24.
#[derive(Debug, Default)]
pub struct Observers {
  list: Vec<Observer>,
  seq: u32,
}

impl Observers {
  /// Create an empty table
  pub fn new() -> Self {
    Self::default()
  }

  /// Record a peer's interest, replacing any existing registration
  /// with the same endpoint and token.
  pub fn register(&mut self, observer: Observer) {
    self.list
        .retain(|o| !(o.remote == observer.remote && o.token == observer.token));
    self.list.push(observer);
  }

  /// Drop the registration matching this endpoint and token, if any.
  /// Returns whether one was removed.
  pub fn remove(&mut self, remote: SocketAddr, token: &Token) -> bool {
    let before = self.list.len();
    self.list
        .retain(|o| !(o.remote == remote && o.token == *token));
    self.list.len() != before
  }

  /// Snapshot the observers attached to a resource.
  ///
  /// A snapshot (rather than an iterator) so notification emission can
  /// mutate the engine while walking it.
  pub fn of_resource(&self, resource: ResourceId) -> Vec<Observer> {
    self.list
        .iter()
        .filter(|o| o.resource == resource)
        .cloned()
        .collect()
  }

  /// All observers
  pub fn iter(&self) -> impl Iterator<Item = &Observer> {
    self.list.iter()
  }

  /// Number of registered observers
  pub fn len(&self) -> usize {
    self.list.len()
  }

  /// Whether the table is empty
  pub fn is_empty(&self) -> bool {
    self.list.is_empty()
  }

  /// Yield the next notification sequence number (24 bits, wrapping)
  pub fn next_seq(&mut self) -> u32 {
    let seq = self.seq;
    self.seq = (self.seq + 1) & 0x00FF_FFFF;
    seq
  }
}

/// A client-side record of an outstanding observation.
///
/// Created on reception of any response carrying an Observe option,
/// destroyed when max-age expires without refresh or on explicit
/// unregister.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
  /// Token used when subscribing
  pub token: Token,
  /// Uri-Path segments of the observed resource
  pub path: Vec<String>,
  /// Ticks left until the last notification goes stale
  pub max_age: u32,
  /// Sequence number of the newest notification seen
  pub last_seq: u32,
}

/// Client-side observation table.
///
/// `expect` is called at request time for GETs carrying Observe=0 so
/// that when a response with an Observe option arrives, the
/// observation knows which path it watches.
#[derive(Debug, Default)]
pub struct Observations {
  list: Vec<Observation>,
  pending: Vec<(Token, Vec<String>)>,
}

impl Observations {
  /// Create an empty table
  pub fn new() -> Self {
    Self::default()
  }

  /// Remember that a register request with this token is in flight
  pub fn expect(&mut self, token: Token, path: Vec<String>) {
    self.pending.retain(|(t, _)| *t != token);
    self.pending.push((token, path));
  }

  /// Record a notification: refresh the matching observation, or
  /// promote a pending registration to a live observation. Returns
  /// the observation when the token is (now) known.
  pub fn record(&mut self, token: &Token, seq: u32, max_age: u32) -> Option<&Observation> {
    if let Some(ix) = self.list.iter().position(|o| o.token == *token) {
      let obs = &mut self.list[ix];
      obs.last_seq = seq;
      obs.max_age = max_age;
      return Some(&self.list[ix]);
    }

    let pending_ix = self.pending.iter().position(|(t, _)| t == token)?;
    let (token, path) = self.pending.swap_remove(pending_ix);
    self.list.push(Observation { token,
                                 path,
                                 max_age,
                                 last_seq: seq });
    self.list.last()
  }

  /// Find a live observation by token
  pub fn find(&self, token: &Token) -> Option<&Observation> {
    self.list.iter().find(|o| o.token == *token)
  }

  /// Explicitly drop an observation (and any pending registration)
  /// by token. Returns whether a live observation was removed.
  pub fn remove(&mut self, token: &Token) -> bool {
    self.pending.retain(|(t, _)| t != token);
    let before = self.list.len();
    self.list.retain(|o| o.token != *token);
    self.list.len() != before
  }

  /// Number of live observations
  pub fn len(&self) -> usize {
    self.list.len()
  }

  /// Whether there are no live observations
  pub fn is_empty(&self) -> bool {
    self.list.is_empty()
  }

  /// Decrement every max-age countdown, removing and returning the
  /// observations that reached zero without a refresh.
  pub fn tick(&mut self) -> Vec<Observation> {
    let mut expired = vec![];

    self.list.retain_mut(|o| {
              if o.max_age == 0 {
                expired.push(o.clone());
                false
              } else {
                o.max_age -= 1;
                true
              }
            });

    expired
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn token(bytes: &[u8]) -> Token {
    Token::try_from_slice(bytes).unwrap()
  }

  fn addr() -> SocketAddr {
    "[::1]:5683".parse().unwrap()
  }

  #[test]
  fn seq_increases_and_wraps() {
    let mut os = Observers::new();
    assert_eq!(os.next_seq(), 0);
    assert_eq!(os.next_seq(), 1);

    os.seq = 0x00FF_FFFF;
    assert_eq!(os.next_seq(), 0x00FF_FFFF);
    assert_eq!(os.next_seq(), 0);
  }

  #[test]
  fn register_replaces_same_endpoint_and_token() {
    let mut os = Observers::new();
    let observer = |ct| Observer { remote: addr(),
                                   token: token(&[1]),
                                   resource: ResourceId(1),
                                   ct };
    os.register(observer(ContentFormat::Text));
    os.register(observer(ContentFormat::Json));

    assert_eq!(os.len(), 1);
    assert_eq!(os.of_resource(ResourceId(1))[0].ct, ContentFormat::Json);
  }

  #[test]
  fn observation_promotes_pending_on_first_notification() {
    let mut os = Observations::new();
    os.expect(token(&[1, 2]), vec!["lights".into(), "led3".into()]);

    assert!(os.find(&token(&[1, 2])).is_none());

    let obs = os.record(&token(&[1, 2]), 7, 15).unwrap();
    assert_eq!(obs.last_seq, 7);
    assert_eq!(obs.max_age, 15);
    assert_eq!(obs.path, vec!["lights".to_string(), "led3".to_string()]);

    // unknown tokens are not recorded
    assert!(os.record(&token(&[9]), 1, 15).is_none());
  }

  #[test]
  fn observation_expires_at_zero() {
    let mut os = Observations::new();
    os.expect(token(&[1]), vec!["t".into()]);
    os.record(&token(&[1]), 0, 2);

    assert!(os.tick().is_empty()); // 2 -> 1
    assert!(os.tick().is_empty()); // 1 -> 0
    let expired = os.tick(); // 0 -> gone
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].token, token(&[1]));
    assert!(os.is_empty());
  }
}
