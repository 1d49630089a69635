use crate::{
  chunk::{Chunk, MIN_ALLOC, TAG_SIZE, proper_size},
  heap::Heap,
};

impl Heap<'_> {
  /// Resizes a used chunk, in place when possible.
  ///
  /// Tries, in order: keeping the chunk when the shrink is marginal,
  /// shrinking in place, growing into a free right neighbour, moving to a
  /// fresh chunk, and finally freeing the chunk first and moving through a
  /// scratch copy on the process heap. `None` leaves the heap untouched.
  pub(crate) fn realloc(
    &self,
    chunk: Chunk,
    size: u64,
  ) -> Option<Chunk> {
    let size = proper_size(size);
    let chunk_size = chunk.size(self.region);

    let right = chunk.right(self.region);
    let right_free = right.0 < self.hi_bound() && right.is_free(self.region);

    if size <= chunk_size {
      // the caller is likely to want the memory back soon
      if size > chunk_size / 4 {
        return Some(chunk);
      }

      self.shrink(chunk, size, right_free.then_some(right));
      return Some(chunk);
    }

    if right_free && chunk_size + 2 * TAG_SIZE + right.size(self.region) >= size {
      self.grow(chunk, size, right);
      return Some(chunk);
    }

    if let Some(moved) = self.malloc(size) {
      self
        .region
        .copy_within(chunk.payload(), moved.payload(), chunk_size);
      self.free(chunk);
      return Some(moved);
    }

    self.relocate(chunk, size, right_free.then_some(right))
  }

  /// Gives back the tail of `chunk` beyond `size`, merging it into a free
  /// right neighbour when there is one.
  fn shrink(
    &self,
    chunk: Chunk,
    size: u64,
    right: Option<Chunk>,
  ) {
    let chunk_size = chunk.size(self.region);
    let freed = chunk_size - size;

    let rest_size = match right {
      Some(right) => {
        let right_size = right.size(self.region);
        self.unlink(right);
        right_size + freed
      }
      None => freed - 2 * TAG_SIZE,
    };

    chunk.set_size(self.region, size, true);

    let rest = chunk.right(self.region);
    rest.set_size(self.region, rest_size, false);
    self.link(rest);

    self.account_free(freed);
  }

  /// Absorbs the free right neighbour and carves `size` bytes out of the
  /// union.
  fn grow(
    &self,
    chunk: Chunk,
    size: u64,
    right: Chunk,
  ) {
    let chunk_size = chunk.size(self.region);
    let combined = chunk_size + 2 * TAG_SIZE + right.size(self.region);

    self.unlink(right);

    if combined < size + 2 * TAG_SIZE + MIN_ALLOC {
      chunk.set_size(self.region, combined, true);
      self.account_used(combined - chunk_size);
    } else {
      chunk.set_size(self.region, size, true);

      let rest = chunk.right(self.region);
      rest.set_size(self.region, combined - size - 2 * TAG_SIZE, false);
      self.link(rest);

      self.account_used(size - chunk_size);
    }
  }

  /// Last resort when no free chunk fits: if freeing `chunk` would merge
  /// into a large enough chunk, park the payload on the process heap, free,
  /// allocate again and copy back.
  fn relocate(
    &self,
    chunk: Chunk,
    size: u64,
    right: Option<Chunk>,
  ) -> Option<Chunk> {
    let chunk_size = chunk.size(self.region);

    let mut reachable = chunk_size;
    if let Some(right) = right {
      reachable += right.size(self.region) + 2 * TAG_SIZE;
    }
    if self.lo_bound() < chunk.0 && chunk.left_is_free(self.region) {
      reachable += chunk.left(self.region).size(self.region) + 2 * TAG_SIZE;
    }

    if size > reachable {
      return None;
    }

    let mut scratch = Vec::new();
    if scratch.try_reserve_exact(chunk_size as usize).is_err() {
      tracing::warn!(
        bytes = chunk_size,
        description = %self.description(),
        "cannot allocate scratch buffer to relocate chunk"
      );
      return None;
    }
    scratch.resize(chunk_size as usize, 0u8);
    self.region.read_bytes(chunk.payload(), &mut scratch);

    self.free(chunk);

    let Some(moved) = self.malloc(size) else {
      fatal!(
        requested = size,
        reachable,
        description = %self.description(),
        "free chunk vanished while relocating"
      );
    };

    self.region.write_bytes(moved.payload(), &scratch);
    Some(moved)
  }
}

#[cfg(test)]
mod tests {
  use crate::{arena::tests::tolerant, chunk::Chunk, heap::Heap};

  fn fill(
    heap: &Heap<'_>,
    chunk: Chunk,
    len: usize,
    byte: u8,
  ) {
    heap.region.write_bytes(chunk.payload(), &vec![byte; len]);
  }

  fn payload(
    heap: &Heap<'_>,
    chunk: Chunk,
    len: usize,
  ) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    heap.region.read_bytes(chunk.payload(), &mut buf);
    buf
  }

  #[test]
  fn test_marginal_shrink_keeps_chunk() {
    let arena = tolerant(4096);
    let heap = Heap::new(arena.region());

    let a = heap.malloc(50).unwrap();
    let used = heap.used_size();

    assert_eq!(heap.realloc(a, 10), Some(a));
    assert_eq!(a.size(heap.region), 56);
    assert_eq!(heap.used_size(), used);
  }

  #[test]
  fn test_shrink_merges_into_free_right_neighbour() {
    let arena = tolerant(4096);
    let heap = Heap::new(arena.region());

    let a = heap.malloc(200).unwrap();
    let free_before = heap.free_size();

    assert_eq!(heap.realloc(a, 5), Some(a));
    assert_eq!(a.size(heap.region), 24);
    assert_eq!(heap.free_size(), free_before + 200 - 24);

    let rest = a.right(heap.region);
    assert!(rest.is_free(heap.region));
    assert_eq!(rest.right(heap.region).0, heap.hi_bound());
  }

  #[test]
  fn test_shrink_splits_before_used_neighbour() {
    let arena = tolerant(4096);
    let heap = Heap::new(arena.region());

    let a = heap.malloc(200).unwrap();
    let pin = heap.malloc(24).unwrap();

    assert_eq!(heap.realloc(a, 24), Some(a));

    let rest = a.right(heap.region);
    assert!(rest.is_free(heap.region));
    assert_eq!(rest.size(heap.region), 200 - 24 - 16);
    assert_eq!(rest.right(heap.region), pin);

    // the remainder is independently allocatable
    assert_eq!(heap.malloc(160), Some(rest));
  }

  #[test]
  fn test_grow_in_place() {
    let arena = tolerant(4096);
    let heap = Heap::new(arena.region());

    let a = heap.malloc(64).unwrap();
    fill(&heap, a, 64, 0xAB);

    assert_eq!(heap.realloc(a, 512), Some(a));
    assert_eq!(a.size(heap.region), 512);
    assert_eq!(payload(&heap, a, 64), vec![0xAB; 64]);
    assert_eq!(heap.used_size() + heap.free_size(), heap.total_size());
  }

  #[test]
  fn test_grow_moves_when_right_is_used() {
    let arena = tolerant(4096);
    let heap = Heap::new(arena.region());

    let a = heap.malloc(64).unwrap();
    let _pin = heap.malloc(24).unwrap();
    fill(&heap, a, 64, 0x5A);

    let moved = heap.realloc(a, 256).unwrap();

    assert_ne!(moved, a);
    assert!(a.is_free(heap.region));
    assert_eq!(payload(&heap, moved, 64), vec![0x5A; 64]);
  }

  #[test]
  fn test_relocate_through_scratch_buffer() {
    let arena = tolerant(4096);
    let heap = Heap::new(arena.region());
    let span = heap.total_size() - 16;

    // [ a: free ][ b: used ][ c: used, rest of the region ]
    let a = heap.malloc(200).unwrap();
    let b = heap.malloc(200).unwrap();
    let c = heap.malloc(span - 2 * (200 + 16) - 16).unwrap();
    assert_eq!(c.right(heap.region).0, heap.hi_bound());
    heap.free(a);
    fill(&heap, b, 200, 0xC3);

    // nothing free fits 400 bytes, but b merged with a does
    let moved = heap.realloc(b, 400).unwrap();

    assert_eq!(moved, a);
    assert_eq!(moved.size(heap.region), 200 + 200 + 16);
    assert_eq!(payload(&heap, moved, 200), vec![0xC3; 200]);
    assert_eq!(heap.used_size() + heap.free_size(), heap.total_size());
  }

  #[test]
  fn test_relocate_refuses_when_merge_is_too_small() {
    let arena = tolerant(4096);
    let heap = Heap::new(arena.region());
    let span = heap.total_size() - 16;

    let a = heap.malloc(200).unwrap();
    let b = heap.malloc(200).unwrap();
    let _c = heap.malloc(span - 2 * (200 + 16) - 16).unwrap();
    heap.free(a);
    let used = heap.used_size();

    assert_eq!(heap.realloc(b, 1024), None);
    assert!(!b.is_free(heap.region));
    assert_eq!(heap.used_size(), used);
  }
}
