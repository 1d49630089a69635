//! Boundary-tag chunk primitives.
//!
//! ```text
//!   used chunk:  [ size | USED ][ payload: size bytes, owned by caller  ][ size | USED ]
//!   free chunk:  [ size        ][ prev ][ next ][ ... unused ...         ][ size        ]
//!                ▲
//!                chunk offset
//! ```
//!
//! Both tags always carry the same value, so the chunk to the left of any
//! chunk is found by reading the 8 bytes right before its prefix tag.

use crate::region::Region;

/// Width of a boundary tag and of each free-list link.
pub(crate) const TAG_SIZE: u64 = 8;
/// Smallest payload a chunk may have; a free chunk must fit both links.
pub(crate) const MIN_ALLOC: u64 = 24;
/// In-use flag, stored in the top bit of each tag.
pub(crate) const USED_FLAG: u64 = 1 << 63;

/// Link value meaning "no chunk". Offset 0 holds the arena header, so no
/// chunk ever starts there.
const NIL: u64 = 0;

const _: () = assert!(2 * TAG_SIZE <= MIN_ALLOC);

/// A chunk, identified by the offset of its prefix tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct Chunk(pub(crate) u64);

impl Chunk {
  /// Chunk whose payload starts at `payload`.
  #[inline]
  pub(crate) fn from_payload(
    payload: u64,
  ) -> Self {
    Chunk(payload - TAG_SIZE)
  }

  #[inline]
  pub(crate) fn payload(
    self,
  ) -> u64 {
    self.0 + TAG_SIZE
  }

  #[inline]
  pub(crate) fn size(
    self,
    region: &Region,
  ) -> u64 {
    region.read_u64(self.0) & !USED_FLAG
  }

  #[inline]
  pub(crate) fn is_free(
    self,
    region: &Region,
  ) -> bool {
    region.read_u64(self.0) & USED_FLAG == 0
  }

  /// Offset of the suffix tag for a chunk of `size` bytes.
  #[inline]
  fn suffix(
    self,
    size: u64,
  ) -> u64 {
    self.0 + TAG_SIZE + size
  }

  /// Writes both tags. This is the only place tags are written.
  #[inline]
  pub(crate) fn set_size(
    self,
    region: &Region,
    size: u64,
    used: bool,
  ) {
    let tag = if used { size | USED_FLAG } else { size };

    region.write_u64(self.0, tag);
    region.write_u64(self.suffix(size), tag);
  }

  /// True when both tags agree.
  pub(crate) fn tags_match(
    self,
    region: &Region,
  ) -> bool {
    region.read_u64(self.0) == region.read_u64(self.suffix(self.size(region)))
  }

  /// Offset one past the suffix tag, where the right neighbour starts.
  #[inline]
  pub(crate) fn end(
    self,
    region: &Region,
  ) -> u64 {
    self.suffix(self.size(region)) + TAG_SIZE
  }

  /// The chunk immediately to the right.
  #[inline]
  pub(crate) fn right(
    self,
    region: &Region,
  ) -> Chunk {
    Chunk(self.end(region))
  }

  /// The chunk immediately to the left, found through its suffix tag.
  #[inline]
  pub(crate) fn left(
    self,
    region: &Region,
  ) -> Chunk {
    let left_size = Chunk(self.0 - TAG_SIZE).size(region);
    Chunk(self.0 - TAG_SIZE - left_size - TAG_SIZE)
  }

  /// Whether the chunk to the left is free, read from its suffix tag.
  #[inline]
  pub(crate) fn left_is_free(
    self,
    region: &Region,
  ) -> bool {
    Chunk(self.0 - TAG_SIZE).is_free(region)
  }

  // Links are only meaningful while the chunk is free; the payload of a
  // used chunk belongs to the caller.

  #[inline]
  pub(crate) fn prev(
    self,
    region: &Region,
  ) -> Option<Chunk> {
    to_link(region.read_u64(self.0 + TAG_SIZE))
  }

  #[inline]
  pub(crate) fn next(
    self,
    region: &Region,
  ) -> Option<Chunk> {
    to_link(region.read_u64(self.0 + 2 * TAG_SIZE))
  }

  #[inline]
  pub(crate) fn set_prev(
    self,
    region: &Region,
    prev: Option<Chunk>,
  ) {
    region.write_u64(self.0 + TAG_SIZE, from_link(prev));
  }

  #[inline]
  pub(crate) fn set_next(
    self,
    region: &Region,
    next: Option<Chunk>,
  ) {
    region.write_u64(self.0 + 2 * TAG_SIZE, from_link(next));
  }
}

#[inline]
pub(crate) fn to_link(
  raw: u64,
) -> Option<Chunk> {
  (raw != NIL).then_some(Chunk(raw))
}

#[inline]
pub(crate) fn from_link(
  chunk: Option<Chunk>,
) -> u64 {
  chunk.map_or(NIL, |chunk| chunk.0)
}

/// Rounds a request up to a multiple of 8, never below `MIN_ALLOC`.
#[inline]
pub(crate) fn proper_size(
  size: u64,
) -> u64 {
  align!(size).max(MIN_ALLOC)
}

/// Bytes a chunk of payload `size` occupies, tags included.
#[inline]
pub(crate) fn footprint(
  size: u64,
) -> u64 {
  size + 2 * TAG_SIZE
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_proper_size() {
    assert_eq!(proper_size(1), 24);
    assert_eq!(proper_size(24), 24);
    assert_eq!(proper_size(25), 32);
    assert_eq!(proper_size(50), 56);
    assert_eq!(proper_size(256), 256);
  }

  #[test]
  fn test_set_size_writes_both_tags() {
    let region = Region::anonymous(4096).unwrap();
    let chunk = Chunk(64);

    chunk.set_size(&region, 48, true);

    assert_eq!(region.read_u64(64), 48 | USED_FLAG);
    assert_eq!(region.read_u64(64 + 8 + 48), 48 | USED_FLAG);
    assert_eq!(chunk.size(&region), 48);
    assert!(!chunk.is_free(&region));
    assert!(chunk.tags_match(&region));
    assert_eq!(chunk.end(&region), 64 + 8 + 48 + 8);

    chunk.set_size(&region, 48, false);
    assert!(chunk.is_free(&region));
  }

  #[test]
  fn test_neighbours() {
    let region = Region::anonymous(4096).unwrap();
    let left = Chunk(64);

    left.set_size(&region, 32, false);
    let right = left.right(&region);
    right.set_size(&region, 24, true);

    assert_eq!(right, Chunk(64 + 8 + 32 + 8));
    assert_eq!(right.left(&region), left);
    assert!(right.left_is_free(&region));
  }

  #[test]
  fn test_links() {
    let region = Region::anonymous(4096).unwrap();
    let chunk = Chunk(64);

    chunk.set_size(&region, 24, false);
    chunk.set_prev(&region, None);
    chunk.set_next(&region, Some(Chunk(512)));

    assert_eq!(chunk.prev(&region), None);
    assert_eq!(chunk.next(&region), Some(Chunk(512)));
    assert_eq!(Chunk::from_payload(chunk.payload()), chunk);
  }
}
