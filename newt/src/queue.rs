use std::net::SocketAddr;

use newt_msg::{Id, Token};

use crate::config::Attempts;
use crate::error::Error;

/// Stable handle to a queued exchange; equal to the slot index the
/// entry was stored at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(pub usize);

/// One in-flight confirmable exchange.
///
/// The buffer is the owned copy of the serialized bytes, retransmitted
/// verbatim when the timeout lapses. `Cb` is the completion callback
/// type (owned by the entry so that completion can consume it, which
/// is what makes "at most one callback" a type-level guarantee).
#[derive(Debug)]
pub struct Entry<Cb> {
  /// See [`Handle`]
  pub handle: Handle,
  /// Message id the exchange was sent with
  pub mid: Id,
  /// Token the exchange was sent with (zero-length never correlates)
  pub token: Token,
  /// Peer the exchange is with
  pub remote: SocketAddr,
  /// Local port the exchange was sent from
  pub port: u16,
  /// Owned copy of the serialized bytes
  pub buffer: Vec<u8>,
  /// Ticks until the next retransmission (or expiry)
  pub timeout: u32,
  /// Timeout the current back-off period started from; doubled on
  /// every retransmission
  pub timeout_val: u32,
  /// Retransmissions performed so far
  pub retrans_count: Attempts,
  /// Completion callback, consumed on ACK / RST / timeout
  pub callback: Option<Cb>,
}

/// Fixed-capacity table of in-flight confirmable messages.
///
/// Capacity is set once at construction; `add` fails with
/// [`Error::NoMemory`] when every slot is occupied.
#[derive(Debug)]
pub struct Queue<Cb> {
  slots: Vec<Option<Entry<Cb>>>,
}

impl<Cb> Queue<Cb> {
  /// Create a queue with room for `capacity` in-flight exchanges
  pub fn new(capacity: usize) -> Self {
    Self { slots: (0..capacity).map(|_| None).collect() }
  }

  /// Number of occupied slots
  pub fn len(&self) -> usize {
    self.slots.iter().filter(|s| s.is_some()).count()
  }

  /// Whether every slot is free
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Find a free slot, move the entry into it, and return a stable
  /// handle equal to the slot index.
  pub fn add(&mut self, mut entry: Entry<Cb>) -> Result<Handle, Error> {
    match self.slots.iter_mut().enumerate().find(|(_, s)| s.is_none()) {
      | Some((ix, slot)) => {
        entry.handle = Handle(ix);
        *slot = Some(entry);
        Ok(Handle(ix))
      },
      | None => Err(Error::NoMemory),
    }
  }

  /// Zero the slot, returning the entry (and its callback) if it was
  /// occupied.
  pub fn remove(&mut self, handle: Handle) -> Option<Entry<Cb>> {
    self.slots.get_mut(handle.0).and_then(Option::take)
  }

  /// Borrow an entry
  pub fn get(&self, handle: Handle) -> Option<&Entry<Cb>> {
    self.slots.get(handle.0).and_then(Option::as_ref)
  }

  /// Mutably borrow an entry
  pub fn get_mut(&mut self, handle: Handle) -> Option<&mut Entry<Cb>> {
    self.slots.get_mut(handle.0).and_then(Option::as_mut)
  }

  /// Find the exchange a peer ACK / RST refers to
  pub fn find_by_mid(&self, mid: Id) -> Option<Handle> {
    self.slots
        .iter()
        .flatten()
        .find(|e| e.mid == mid)
        .map(|e| e.handle)
  }

  /// Find the exchange a response correlates with.
  ///
  /// Tokens of length zero never match, so unconfirmed responses
  /// without tokens cannot be correlated.
  pub fn find_by_token(&self, token: &Token) -> Option<Handle> {
    self.slots
        .iter()
        .flatten()
        .find(|e| !e.token.is_empty() && e.token == *token)
        .map(|e| e.handle)
  }

  /// The first occupied slot strictly after `after` (or the first
  /// occupied slot at all when `after` is None). This is the iteration
  /// primitive the tick driver uses, stable across removal of the
  /// current entry.
  pub fn next_occupied(&self, after: Option<Handle>) -> Option<Handle> {
    let start = after.map(|Handle(ix)| ix + 1).unwrap_or(0);
    self.slots
        .iter()
        .enumerate()
        .skip(start)
        .find(|(_, s)| s.is_some())
        .map(|(ix, _)| Handle(ix))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn entry(mid: u16, token: &[u8]) -> Entry<()> {
    Entry { handle: Handle(0),
            mid: Id(mid),
            token: Token::try_from_slice(token).unwrap(),
            remote: "[::1]:5683".parse().unwrap(),
            port: 5683,
            buffer: vec![0x40, 0x01, 0x00, mid as u8],
            timeout: 2,
            timeout_val: 2,
            retrans_count: Attempts(0),
            callback: None }
  }

  #[test]
  fn add_returns_slot_index_and_fills_gaps() {
    let mut q = Queue::new(3);
    assert_eq!(q.add(entry(1, &[1])).unwrap(), Handle(0));
    assert_eq!(q.add(entry(2, &[2])).unwrap(), Handle(1));
    assert_eq!(q.add(entry(3, &[3])).unwrap(), Handle(2));
    assert_eq!(q.add(entry(4, &[4])), Err(Error::NoMemory));

    q.remove(Handle(1));
    assert_eq!(q.add(entry(5, &[5])).unwrap(), Handle(1));
  }

  #[test]
  fn zero_length_tokens_never_match() {
    let mut q = Queue::new(2);
    q.add(entry(1, &[])).unwrap();

    assert_eq!(q.find_by_token(&Token::try_from_slice(&[]).unwrap()), None);
    assert_eq!(q.find_by_mid(Id(1)), Some(Handle(0)));
  }

  #[test]
  fn token_lookup_is_exact() {
    let mut q = Queue::new(2);
    q.add(entry(1, &[1, 2])).unwrap();

    assert_eq!(q.find_by_token(&Token::try_from_slice(&[1, 2]).unwrap()),
               Some(Handle(0)));
    assert_eq!(q.find_by_token(&Token::try_from_slice(&[1, 2, 3]).unwrap()),
               None);
    assert_eq!(q.find_by_token(&Token::try_from_slice(&[1]).unwrap()), None);
  }

  #[test]
  fn next_occupied_walks_forward() {
    let mut q = Queue::new(4);
    q.add(entry(1, &[1])).unwrap();
    q.add(entry(2, &[2])).unwrap();
    q.add(entry(3, &[3])).unwrap();
    q.remove(Handle(1));

    assert_eq!(q.next_occupied(None), Some(Handle(0)));
    assert_eq!(q.next_occupied(Some(Handle(0))), Some(Handle(2)));
    assert_eq!(q.next_occupied(Some(Handle(2))), None);
  }
}
