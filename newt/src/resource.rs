use newt_msg::{Code, ContentFormat};

use crate::error::Error;

/// Longest resource name `create` accepts
pub const MAX_NAME_LEN: usize = 19;

/// Deepest Uri-Path the request dispatcher will walk
pub const MAX_DEPTH: usize = 8;

/// `max_age` value meaning "this resource never goes stale"
pub const MAX_AGE_INFINITE: u32 = u32::MAX;

/// Index of a node in the [`Resources`] arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(pub u16);

/// Per-resource permission bitmask; one bit per method code plus an
/// observe capability bit.
///
/// The method bits line up with `1 << (method detail - 1)` so the
/// dispatcher can test a request code directly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Permission(pub u8);

impl Permission {
  /// No methods allowed
  pub const NONE: Self = Self(0);
  /// 0.01 GET allowed
  pub const GET: Self = Self(1 << 0);
  /// 0.02 PUT allowed
  pub const PUT: Self = Self(1 << 1);
  /// 0.03 POST allowed
  pub const POST: Self = Self(1 << 2);
  /// 0.04 DELETE allowed
  pub const DELETE: Self = Self(1 << 3);
  /// Resource may be observed
  pub const OBSERVE: Self = Self(1 << 4);

  /// Whether every bit of `other` is set in `self`
  pub fn contains(&self, other: Permission) -> bool {
    self.0 & other.0 == other.0
  }

  /// Whether the bit for the given (request) method code is set
  pub fn allows_method(&self, code: Code) -> bool {
    match code.detail {
      | 1..=8 if code.class == 0 => self.0 & (1 << (code.detail - 1)) != 0,
      | _ => false,
    }
  }
}

impl core::ops::BitOr for Permission {
  type Output = Permission;

  fn bitor(self, rhs: Self) -> Self::Output {
    Permission(self.0 | rhs.0)
  }
}

/// Bitmask of content formats a resource can represent itself in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CtMask(pub u32);

fn ct_bit(format: ContentFormat) -> u32 {
  use ContentFormat::*;
  match format {
    | Text => 1 << 0,
    | LinkFormat => 1 << 1,
    | Xml => 1 << 2,
    | OctetStream => 1 << 3,
    | Exi => 1 << 4,
    | Json => 1 << 5,
    | Other(_) => 1 << 31,
    | _ => unreachable!(),
  }
}

impl CtMask {
  /// Mask supporting nothing
  pub const NONE: Self = Self(0);

  /// Build a mask from a list of formats
  pub fn of(formats: &[ContentFormat]) -> Self {
    Self(formats.iter().fold(0, |acc, f| acc | ct_bit(*f)))
  }

  /// Whether the mask has the bit for `format` set
  pub fn supports(&self, format: ContentFormat) -> bool {
    self.0 & ct_bit(format) != 0
  }

  /// The lowest-numbered format in the mask, if any
  pub fn preferred(&self) -> Option<ContentFormat> {
    use ContentFormat::*;
    [Text, LinkFormat, Xml, OctetStream, Exi, Json].into_iter()
                                                   .find(|f| self.supports(*f))
  }
}

/// One node of the resource tree.
///
/// `Cb` is the request-callback type stored per node; the engine
/// instantiates it with its own closure type. Links are arena indices
/// rather than pointers; ownership never leaves the arena.
#[derive(Debug)]
pub struct Resource<Cb> {
  /// Short name, one Uri-Path segment
  pub name: String,
  /// See [`Permission`]
  pub permission: Permission,
  /// Content formats this resource can be represented in
  pub ct_mask: CtMask,
  /// Current representation, sent in observe notifications
  pub value: Vec<u8>,
  /// Seconds a cached/observed representation stays fresh; also the
  /// reload value of `expire_time`
  pub max_age: u32,
  /// Auto-notify countdown, in ticks
  pub expire_time: u32,
  /// Request callback
  pub callback: Option<Cb>,
  front: Option<ResourceId>,
  sibling: Option<ResourceId>,
  tail: Option<ResourceId>,
}

/// Arena of resource nodes forming a singly-linked tree.
///
/// The first resource created becomes the root; subsequent resources
/// are attached explicitly with [`Resources::child_add`]. The root's
/// lifetime equals the engine's.
#[derive(Debug)]
pub struct Resources<Cb> {
  nodes: Vec<Resource<Cb>>,
}

impl<Cb> Default for Resources<Cb> {
  fn default() -> Self {
    Self { nodes: vec![] }
  }
}

impl<Cb> Resources<Cb> {
  /// Create an empty arena
  pub fn new() -> Self {
    Self::default()
  }

  /// Create a new resource; the first one created becomes the root.
  ///
  /// Names longer than [`MAX_NAME_LEN`] yield [`Error::DataSize`].
  pub fn create(&mut self, name: &str) -> Result<ResourceId, Error> {
    if name.len() > MAX_NAME_LEN {
      return Err(Error::DataSize);
    }

    if self.nodes.len() > u16::MAX as usize {
      return Err(Error::NoMemory);
    }

    let id = ResourceId(self.nodes.len() as u16);
    self.nodes.push(Resource { name: name.into(),
                               permission: Permission::NONE,
                               ct_mask: CtMask::NONE,
                               value: vec![],
                               max_age: MAX_AGE_INFINITE,
                               expire_time: MAX_AGE_INFINITE,
                               callback: None,
                               front: None,
                               sibling: None,
                               tail: None });
    Ok(id)
  }

  /// Append `child` to `parent`'s child chain (the tail link makes
  /// this O(1))
  pub fn child_add(&mut self, parent: ResourceId, child: ResourceId) -> Result<(), Error> {
    if self.get(parent).is_none() || self.get(child).is_none() || parent == child {
      return Err(Error::InvalidParameter);
    }

    match self.nodes[parent.0 as usize].tail {
      | None => {
        let p = &mut self.nodes[parent.0 as usize];
        p.front = Some(child);
        p.tail = Some(child);
      },
      | Some(last) => {
        self.nodes[last.0 as usize].sibling = Some(child);
        self.nodes[parent.0 as usize].tail = Some(child);
      },
    }

    Ok(())
  }

  /// The first resource ever created, if any
  pub fn root(&self) -> Option<ResourceId> {
    (!self.nodes.is_empty()).then_some(ResourceId(0))
  }

  /// Borrow a node
  pub fn get(&self, id: ResourceId) -> Option<&Resource<Cb>> {
    self.nodes.get(id.0 as usize)
  }

  /// Mutably borrow a node
  pub fn get_mut(&mut self, id: ResourceId) -> Option<&mut Resource<Cb>> {
    self.nodes.get_mut(id.0 as usize)
  }

  /// All ids in the arena
  pub fn ids(&self) -> impl Iterator<Item = ResourceId> {
    (0..self.nodes.len() as u16).map(ResourceId)
  }

  /// Ids of `of`'s children, front to tail
  pub fn children(&self, of: ResourceId) -> Children<'_, Cb> {
    Children { resources: self,
               next: self.get(of).and_then(|n| n.front) }
  }

  fn child_resolve(&self, parent: ResourceId, segment: &str) -> Option<ResourceId> {
    self.children(parent)
        .find(|c| self.nodes[c.0 as usize].name == segment)
  }

  /// Walk Uri-Path segments left to right from the root, descending
  /// child chains by exact name equality. Every segment must match;
  /// zero segments resolve to the root.
  pub fn resolve(&self, segments: &[&str]) -> Option<ResourceId> {
    let mut current = self.root()?;

    for segment in segments {
      current = self.child_resolve(current, segment)?;
    }

    Some(current)
  }

  /// Move a node's callback out so it can be invoked without keeping
  /// the arena borrowed
  pub fn take_callback(&mut self, id: ResourceId) -> Option<Cb> {
    self.get_mut(id).and_then(|n| n.callback.take())
  }

  /// Put a callback taken with [`Resources::take_callback`] back,
  /// unless the callback replaced itself in the meantime
  pub fn restore_callback(&mut self, id: ResourceId, cb: Cb) {
    if let Some(node) = self.get_mut(id) {
      if node.callback.is_none() {
        node.callback = Some(cb);
      }
    }
  }

  fn generate_path(&self,
                   id: ResourceId,
                   parent_path: &str,
                   out: &mut String,
                   capacity: usize)
                   -> Result<(), Error> {
    let node = &self.nodes[id.0 as usize];
    let path = format!("{}/{}", parent_path, node.name);

    let mut child = node.front;
    while let Some(c) = child {
      self.generate_path(c, &path, out, capacity)?;
      child = self.nodes[c.0 as usize].sibling;
    }

    let mut entry = format!("<{}>", path);
    if node.permission.contains(Permission::OBSERVE) {
      entry.push_str(";obs");
    }
    entry.push(',');

    if out.len() + entry.len() > capacity {
      return Err(Error::DataSize);
    }

    out.push_str(&entry);
    Ok(())
  }

  /// Generate the `application/link-format` body served at
  /// `.well-known/core`: one `</a/b/c>[;obs]` entry per node (children
  /// before their parent), comma separated.
  ///
  /// `capacity` bounds the generated body; overflow yields
  /// [`Error::DataSize`] and nothing is emitted. Tree queries are
  /// serialized by the `&mut`-engine discipline, so the scratch the
  /// generator uses is owned by this call.
  pub fn well_known_core(&self, capacity: usize) -> Result<String, Error> {
    let root = self.root().ok_or(Error::InvalidState)?;

    let mut out = String::new();
    let mut child = self.nodes[root.0 as usize].front;
    while let Some(c) = child {
      self.generate_path(c, "", &mut out, capacity)?;
      child = self.nodes[c.0 as usize].sibling;
    }

    out.pop(); // remove the last comma
    Ok(out)
  }
}

/// Iterator over one node's children
#[derive(Debug)]
pub struct Children<'a, Cb> {
  resources: &'a Resources<Cb>,
  next: Option<ResourceId>,
}

impl<'a, Cb> Iterator for Children<'a, Cb> {
  type Item = ResourceId;

  fn next(&mut self) -> Option<Self::Item> {
    let current = self.next?;
    self.next = self.resources.nodes[current.0 as usize].sibling;
    Some(current)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn tree() -> (Resources<()>, ResourceId, ResourceId, ResourceId) {
    let mut rs = Resources::<()>::new();
    let root = rs.create("newt").unwrap();
    let lights = rs.create("lights").unwrap();
    let led3 = rs.create("led3").unwrap();
    rs.child_add(root, lights).unwrap();
    rs.child_add(lights, led3).unwrap();
    (rs, root, lights, led3)
  }

  #[test]
  fn first_created_is_root() {
    let (rs, root, ..) = tree();
    assert_eq!(rs.root(), Some(root));
  }

  #[test]
  fn resolve_walks_path() {
    let (rs, root, lights, led3) = tree();

    assert_eq!(rs.resolve(&[]), Some(root));
    assert_eq!(rs.resolve(&["lights"]), Some(lights));
    assert_eq!(rs.resolve(&["lights", "led3"]), Some(led3));
    assert_eq!(rs.resolve(&["lights", "led4"]), None);
    assert_eq!(rs.resolve(&["led3"]), None);
  }

  #[test]
  fn name_matching_is_exact() {
    let mut rs = Resources::<()>::new();
    let root = rs.create("").unwrap();
    let led = rs.create("led").unwrap();
    rs.child_add(root, led).unwrap();

    assert_eq!(rs.resolve(&["led3"]), None);
  }

  #[test]
  fn long_names_are_refused() {
    let mut rs = Resources::<()>::new();
    assert_eq!(rs.create("a-name-much-longer-than-the-bound"),
               Err(Error::DataSize));
  }

  #[test]
  fn well_known_core_children_before_parents() {
    let (mut rs, _, _, led3) = tree();
    rs.get_mut(led3).unwrap().permission = Permission::GET | Permission::OBSERVE;

    assert_eq!(rs.well_known_core(128).unwrap(),
               "</lights/led3>;obs,</lights>");
  }

  #[test]
  fn well_known_core_overflow_is_data_size() {
    let (rs, ..) = tree();
    assert_eq!(rs.well_known_core(8), Err(Error::DataSize));
  }

  #[test]
  fn permission_bits_line_up_with_method_codes() {
    let p = Permission::GET | Permission::DELETE;
    assert!(p.allows_method(Code::GET));
    assert!(p.allows_method(Code::DELETE));
    assert!(!p.allows_method(Code::PUT));
    assert!(!p.allows_method(Code::POST));
    assert!(!p.allows_method(Code::CONTENT));
  }
}
