//! Free-list buckets.
//!
//! Bucket `i < BUCKET_COUNT - 1` holds free chunks of exactly
//! `MIN_ALLOC + 8 * i` bytes. The last bucket holds every free chunk of
//! `MAX_BUCKET_SIZE` bytes or more, in no particular order.

use crate::{
  chunk::{Chunk, MIN_ALLOC},
  heap::Heap,
};

/// Free chunks at least this large share the overflow bucket.
pub(crate) const MAX_BUCKET_SIZE: u64 = 256;
pub const BUCKET_COUNT: usize = ((MAX_BUCKET_SIZE - MIN_ALLOC) / 8) as usize + 1;

/// Bucket a free chunk of `size` bytes belongs to.
#[inline]
pub(crate) fn bucket_by_size(
  size: u64,
) -> usize {
  if size < MAX_BUCKET_SIZE {
    ((size - MIN_ALLOC) / 8) as usize
  } else {
    BUCKET_COUNT - 1
  }
}

/// Smallest chunk size bucket `index` holds.
#[inline]
pub(crate) fn bucket_size(
  index: usize,
) -> u64 {
  MIN_ALLOC + 8 * index as u64
}

impl Heap<'_> {
  /// Pushes a free chunk onto the head of the bucket for its current size.
  pub(crate) fn link(
    &self,
    chunk: Chunk,
  ) {
    let index = bucket_by_size(chunk.size(self.region));
    let head = self.head(index);

    chunk.set_prev(self.region, None);
    chunk.set_next(self.region, head);

    if let Some(head) = head {
      head.set_prev(self.region, Some(chunk));
    }

    self.set_head(index, Some(chunk));
  }

  /// Splices a free chunk out of its bucket. Must run before the chunk's
  /// tags are rewritten, since the bucket is derived from its size.
  pub(crate) fn unlink(
    &self,
    chunk: Chunk,
  ) {
    let prev = chunk.prev(self.region);
    let next = chunk.next(self.region);

    match prev {
      Some(prev) => prev.set_next(self.region, next),
      None => self.set_head(bucket_by_size(chunk.size(self.region)), next),
    }

    if let Some(next) = next {
      next.set_prev(self.region, prev);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{header::Plan, region::Region};

  fn heap(
    region: &Region,
  ) -> Heap<'_> {
    let plan = Plan::new(region.len() as u64, "test", "Test").unwrap();
    let heap = Heap::new(region);

    heap.set_lo_bound(plan.lo_bound);
    heap.set_hi_bound(plan.hi_bound);
    heap
  }

  #[test]
  fn test_bucket_count() {
    assert_eq!(BUCKET_COUNT, 30);
  }

  #[test]
  fn test_bucket_by_size() {
    assert_eq!(bucket_by_size(24), 0);
    assert_eq!(bucket_by_size(32), 1);
    assert_eq!(bucket_by_size(248), 28);
    assert_eq!(bucket_by_size(256), 29);
    assert_eq!(bucket_by_size(1 << 20), 29);

    for index in 0..BUCKET_COUNT - 1 {
      assert_eq!(bucket_by_size(bucket_size(index)), index);
    }
  }

  #[test]
  fn test_link_pushes_to_head() {
    let region = Region::anonymous(4096).unwrap();
    let heap = heap(&region);
    let lo = heap.lo_bound();

    let first = Chunk(lo);
    first.set_size(&region, 24, false);
    let second = first.right(&region);
    second.set_size(&region, 24, false);

    heap.link(first);
    heap.link(second);

    assert_eq!(heap.bucket(0).collect::<Vec<_>>(), vec![second, first]);
    assert_eq!(first.prev(&region), Some(second));
  }

  #[test]
  fn test_unlink_head_middle_and_tail() {
    let region = Region::anonymous(4096).unwrap();
    let heap = heap(&region);

    let mut chunks = Vec::new();
    let mut at = Chunk(heap.lo_bound());
    for _ in 0..3 {
      at.set_size(&region, 512, false);
      chunks.push(at);
      at = at.right(&region);
    }
    for &chunk in &chunks {
      heap.link(chunk);
    }
    let overflow = BUCKET_COUNT - 1;
    assert_eq!(heap.bucket(overflow).count(), 3);

    // middle
    heap.unlink(chunks[1]);
    assert_eq!(heap.bucket(overflow).collect::<Vec<_>>(), vec![chunks[2], chunks[0]]);

    // head
    heap.unlink(chunks[2]);
    assert_eq!(heap.bucket(overflow).collect::<Vec<_>>(), vec![chunks[0]]);
    assert_eq!(chunks[0].prev(&region), None);

    // tail, which is also the head now
    heap.unlink(chunks[0]);
    assert_eq!(heap.head(overflow), None);
  }
}
