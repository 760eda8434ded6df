use core::iter::FromIterator;
use core::ops::{Add, Sub};
use std::collections::BTreeMap;

use crate::cursor::Cursor;
use crate::from_bytes::TryConsumeBytes;

/// Option parsing errors
pub mod parse_error;
pub use parse_error::*;

/// Well-known options
pub mod known;
pub use known::*;

/// The "Option Delta" is the difference between this Option's Number
/// and the previous Option's number.
///
/// This is just used to compute the Option Number, identifying which
/// Option is being set (e.g. Content-Format has a Number of 12)
///
/// # Related
/// - [RFC7252#section-3.1 Option Format](https://datatracker.ietf.org/doc/html/rfc7252#section-3.1)
#[derive(Copy, Clone, Hash, PartialEq, PartialOrd, Eq, Ord, Debug, Default)]
pub struct OptDelta(pub u16);

/// The Option Number identifies which option is being set
/// (e.g. Uri-Path is number 11, Content-Format is number 12).
///
/// Numbers come from a registry; see [`known`] for the ones this
/// library understands.
///
/// # Related
/// - [RFC7252#section-12.2 Core CoAP Option Numbers](https://datatracker.ietf.org/doc/html/rfc7252#section-12.2)
#[derive(Copy, Clone, Hash, PartialEq, PartialOrd, Eq, Ord, Debug, Default)]
pub struct OptNumber(pub u32);

impl Add for OptNumber {
  type Output = OptNumber;

  fn add(self, rhs: Self) -> Self::Output {
    Self(self.0 + rhs.0)
  }
}

impl Sub for OptNumber {
  type Output = OptNumber;

  fn sub(self, rhs: Self) -> Self::Output {
    Self(self.0 - rhs.0)
  }
}

/// The value of an option, an opaque byte string.
///
/// How the bytes are interpreted (uint, utf8, opaque) depends on the
/// option number.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OptValue(pub Vec<u8>);

impl OptValue {
  /// Convert a reference to a OptValue to a byte slice
  pub fn as_bytes(&self) -> &[u8] {
    &self.0
  }
}

impl FromIterator<u8> for OptValue {
  fn from_iter<T: IntoIterator<Item = u8>>(iter: T) -> Self {
    Self(iter.into_iter().collect())
  }
}

impl<'a> From<&'a [u8]> for OptValue {
  fn from(bytes: &'a [u8]) -> Self {
    Self(bytes.to_vec())
  }
}

/// Low-level representation of a CoAP Option as it appears on the
/// wire, closely mirroring the byte layout.
///
/// Notably, this doesn't include the Number (key, e.g. "Content-Format"
/// or "Uri-Path"), only the delta against the previous option.
/// The high-level keyed view is [`OptionMap`].
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Opt {
  /// See [`OptDelta`]
  pub delta: OptDelta,
  /// See [`OptValue`]
  pub value: OptValue,
}

/// A low-cost copyable [`Opt`] that stores a reference to the value
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct OptRef<'a> {
  pub delta: OptDelta,
  pub value: &'a OptValue,
}

fn ext_size(val: u16) -> usize {
  match val {
    | n if n >= 269 => 2,
    | n if n >= 13 => 1,
    | _ => 0,
  }
}

impl<'a> OptRef<'a> {
  /// Number of bytes this option will occupy on the wire
  pub fn wire_len(&self) -> usize {
    1 + ext_size(self.delta.0) + ext_size(self.value.0.len() as u16) + self.value.0.len()
  }

  /// Given a collection to [`Extend`], add this option's bytes to the collection.
  pub fn extend_bytes(&self, bytes: &mut impl Extend<u8>) {
    let (del, del_bytes) = crate::to_bytes::opt_len_or_delta(self.delta.0);
    let (len, len_bytes) = crate::to_bytes::opt_len_or_delta(self.value.0.len() as u16);
    let del = del << 4;

    let header = del | len;

    bytes.extend(Some(header));

    if let Some(bs) = del_bytes {
      bytes.extend(bs);
    }

    if let Some(bs) = len_bytes {
      bytes.extend(bs);
    }

    bytes.extend(self.value.0.iter().copied());
  }
}

impl Opt {
  /// Given a collection to [`Extend`] and an Opt, add that Opt's bytes to the collection.
  pub fn extend_bytes(&self, bytes: &mut impl Extend<u8>) {
    OptRef { delta: self.delta,
             value: &self.value }.extend_bytes(bytes)
  }
}

/// Map of option number -> values for the number.
///
/// Backed by an ordered map, so no matter what order options are
/// added in, iteration (and therefore serialization) yields them
/// ascending by number - which is what the delta encoding requires.
///
/// Note that not all options are repeatable; the engine enforces
/// repeatability where it matters (e.g. Uri-Path repeats, Observe
/// does not).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OptionMap(pub BTreeMap<OptNumber, Vec<OptValue>>);

impl OptionMap {
  /// Insert a new value for a given option, alongside any existing values
  pub fn add(&mut self, n: OptNumber, v: OptValue) {
    self.0.entry(n).or_default().push(v)
  }

  /// Replace any / all existing values with a new one,
  /// yielding the previous value(s)
  pub fn set(&mut self, n: OptNumber, v: OptValue) -> Option<Vec<OptValue>> {
    self.0.insert(n, vec![v])
  }

  /// Get the value(s) of an option by number
  pub fn get(&self, n: OptNumber) -> Option<&Vec<OptValue>> {
    self.0.get(&n)
  }

  /// Get the value of an option, taking the first if there are multiple.
  pub fn get_first(&self, n: OptNumber) -> Option<&OptValue> {
    self.get(n).and_then(|vs| vs.first())
  }

  /// Remove all values for the option, returning them if there were any.
  pub fn remove(&mut self, n: OptNumber) -> Option<Vec<OptValue>> {
    self.0.remove(&n)
  }

  /// Get the number of values for a given option
  pub fn count(&self, n: OptNumber) -> usize {
    self.get(n).map(|vs| vs.len()).unwrap_or(0)
  }

  /// Whether the map contains no options at all
  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Iterate over the map in wire order, yielding raw option
  /// structures with the delta against the previous option filled in.
  pub fn opt_refs(&self) -> OptRefIter<'_> {
    OptRefIter { iter: self.0.iter(),
                 current: None,
                 last_seen_num: OptNumber(0) }
  }
}

/// An iterator over [`OptRef`]s in ascending number order
#[derive(Clone, Debug)]
pub struct OptRefIter<'a> {
  iter: std::collections::btree_map::Iter<'a, OptNumber, Vec<OptValue>>,
  current: Option<(OptNumber, &'a [OptValue])>,
  last_seen_num: OptNumber,
}

impl<'a> Iterator for OptRefIter<'a> {
  type Item = OptRef<'a>;

  fn next(&mut self) -> Option<Self::Item> {
    loop {
      match self.current.take() {
        | Some((num, [value, rest @ ..])) => {
          let OptNumber(delta) = num - self.last_seen_num;
          self.last_seen_num = num;
          self.current = Some((num, rest));

          return Some(OptRef { delta: OptDelta(delta as u16),
                               value });
        },
        | _ => {
          let (num, values) = self.iter.next()?;
          self.current = Some((*num, values.as_slice()));
        },
      }
    }
  }
}

pub(crate) fn parse_opt_len_or_delta<A: AsRef<[u8]>>(head: u8,
                                                     bytes: &mut Cursor<A>,
                                                     reserved_err: OptParseError)
                                                     -> Result<u16, OptParseError> {
  match head {
    | 13 => {
      let n = bytes.next().ok_or_else(OptParseError::eof)?;
      Ok((n as u16) + 13)
    },
    | 14 => match bytes.take_exact(2) {
      | Some(&[a, b]) => Ok(u16::from_be_bytes([a, b]) + 269),
      | _ => Err(OptParseError::eof()),
    },
    | 15 => Err(reserved_err),
    | _ => Ok(head as u16),
  }
}

impl<B: AsRef<[u8]>> TryConsumeBytes<B> for Opt {
  type Error = OptParseError;

  fn try_consume_bytes(bytes: &mut Cursor<B>) -> Result<Self, Self::Error> {
    let byte1 = match bytes.next() {
      | None | Some(0b11111111) => return Err(OptParseError::OptionsExhausted),
      | Some(b) => b,
    };

    // NOTE: Delta must be consumed before Value; the extended delta
    // bytes precede the extended length bytes on the wire.
    let delta = parse_opt_len_or_delta(byte1 >> 4,
                                       bytes,
                                       OptParseError::OptionDeltaReservedValue(15))?;
    let delta = OptDelta(delta);

    let len = parse_opt_len_or_delta(byte1 & 0b00001111,
                                     bytes,
                                     OptParseError::ValueLengthReservedValue(15))?
              as usize;

    let value = bytes.take_exact(len)
                     .ok_or_else(OptParseError::eof)?
                     .into();

    Ok(Opt { delta, value })
  }
}

impl<B: AsRef<[u8]>> TryConsumeBytes<B> for OptionMap {
  type Error = OptParseError;

  fn try_consume_bytes(bytes: &mut Cursor<B>) -> Result<Self, Self::Error> {
    let mut map = Self::default();
    let mut running = OptNumber(0);

    loop {
      match Opt::try_consume_bytes(bytes) {
        | Ok(opt) => {
          let OptDelta(d) = opt.delta;
          running = running + OptNumber(d as u32);
          map.add(running, opt.value);
        },
        | Err(OptParseError::OptionsExhausted) => break Ok(map),
        | Err(e) => break Err(e),
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_opt() {
    let mut opt_bytes = Cursor::new([0b00010001, 0b00000001]);
    let opt = Opt::try_consume_bytes(&mut opt_bytes).unwrap();
    assert_eq!(opt,
               Opt { delta: OptDelta(1),
                     value: OptValue(vec![1]) });

    let mut opt_bytes = Cursor::new([0b11010001, 0b00000001, 0b00000001]);
    let opt = Opt::try_consume_bytes(&mut opt_bytes).unwrap();
    assert_eq!(opt,
               Opt { delta: OptDelta(14),
                     value: OptValue(vec![1]) });

    let mut opt_bytes = Cursor::new([0b11100001, 0b00000000, 0b00000001, 0b00000001]);
    let opt = Opt::try_consume_bytes(&mut opt_bytes).unwrap();
    assert_eq!(opt,
               Opt { delta: OptDelta(270),
                     value: OptValue(vec![1]) });

    let mut opt_bytes = Cursor::new([0b00000001, 0b00000001, 0b00010001, 0b00000011, 0b11111111]);
    let map = OptionMap::try_consume_bytes(&mut opt_bytes).unwrap();
    assert_eq!(map.get_first(OptNumber(0)), Some(&OptValue(vec![1])));
    assert_eq!(map.get_first(OptNumber(1)), Some(&OptValue(vec![3])));
  }

  #[test]
  fn parse_errors() {
    let mut opt_bytes = Cursor::new([0b11110001, 0b00000001]);
    assert_eq!(Opt::try_consume_bytes(&mut opt_bytes),
               Err(OptParseError::OptionDeltaReservedValue(15)));

    let mut opt_bytes = Cursor::new([0b00011111, 0b00000001]);
    assert_eq!(Opt::try_consume_bytes(&mut opt_bytes),
               Err(OptParseError::ValueLengthReservedValue(15)));

    let mut opt_bytes = Cursor::new([0b00000011, 0b00000001]);
    assert_eq!(Opt::try_consume_bytes(&mut opt_bytes),
               Err(OptParseError::UnexpectedEndOfStream));
  }

  #[test]
  fn deltas_ascend_regardless_of_insert_order() {
    let mut map = OptionMap::default();
    map.add(known::no_repeat::ACCEPT, OptValue(vec![0]));
    map.add(known::repeat::PATH, OptValue(b"lights".to_vec()));
    map.add(known::repeat::PATH, OptValue(b"led3".to_vec()));
    map.add(known::no_repeat::OBSERVE, OptValue(vec![]));

    let deltas = map.opt_refs().map(|o| o.delta.0).collect::<Vec<_>>();
    // observe(6), path(11), path(11 again), accept(17)
    assert_eq!(deltas, vec![6, 5, 0, 6]);
  }

  #[test]
  fn repeated_options_keep_insertion_order() {
    let mut map = OptionMap::default();
    map.add(known::repeat::PATH, OptValue(b"a".to_vec()));
    map.add(known::repeat::PATH, OptValue(b"b".to_vec()));

    let values = map.opt_refs()
                    .map(|o| o.value.0.clone())
                    .collect::<Vec<_>>();
    assert_eq!(values, vec![b"a".to_vec(), b"b".to_vec()]);
  }
}
