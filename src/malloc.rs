use crate::{
  bucket::{BUCKET_COUNT, bucket_by_size},
  chunk::{Chunk, MIN_ALLOC, TAG_SIZE, footprint, proper_size},
  heap::Heap,
};

/// Overflow scans that skip at least this many chunks are reported.
const SKIP_REPORT_THRESHOLD: u64 = 100;

impl Heap<'_> {
  /// Finds a free chunk for `size` bytes, marks it used and returns it.
  ///
  /// Exact-size buckets are tried first, smallest class upwards; the
  /// overflow bucket is searched first-fit. `None` means no free chunk is
  /// large enough, and the heap is left untouched.
  pub(crate) fn malloc(
    &self,
    size: u64,
  ) -> Option<Chunk> {
    let size = proper_size(size);

    let mut index = bucket_by_size(size);
    while index < BUCKET_COUNT - 1 && self.head(index).is_none() {
      index += 1;
    }

    let chunk = if index == BUCKET_COUNT - 1 {
      self.first_fit(size)?
    } else {
      self.head(index)?
    };

    self.unlink(chunk);
    self.carve(chunk, size);

    Some(chunk)
  }

  fn first_fit(
    &self,
    size: u64,
  ) -> Option<Chunk> {
    let mut skipped = 0u64;
    let mut skip_min = u64::MAX;
    let mut skip_max = 0u64;

    let found = self.bucket(BUCKET_COUNT - 1).find(|chunk| {
      let chunk_size = chunk.size(self.region);
      if chunk_size >= size {
        return true;
      }

      skipped += 1;
      skip_min = skip_min.min(chunk_size);
      skip_max = skip_max.max(chunk_size);
      false
    });

    // low-memory failures are expected on tolerant arenas
    if self.allow_oom() == 0 {
      if found.is_none() {
        tracing::warn!(
          requested = size,
          description = %self.description(),
          "cannot find a free chunk"
        );
      } else if skipped >= SKIP_REPORT_THRESHOLD {
        tracing::debug!(
          skipped,
          requested = size,
          skip_min,
          skip_max,
          "overflow bucket scan skipped many chunks"
        );
      }
    }

    found
  }

  /// Marks an unlinked free chunk used for `size` bytes, splitting off the
  /// tail as a new free chunk when it is large enough to stand on its own.
  pub(crate) fn carve(
    &self,
    chunk: Chunk,
    size: u64,
  ) {
    let chunk_size = chunk.size(self.region);

    if chunk_size < size + 2 * TAG_SIZE + MIN_ALLOC {
      chunk.set_size(self.region, chunk_size, true);
      self.account_used(footprint(chunk_size));
    } else {
      chunk.set_size(self.region, size, true);

      let rest = chunk.right(self.region);
      rest.set_size(self.region, chunk_size - size - 2 * TAG_SIZE, false);
      self.link(rest);

      self.account_used(footprint(size));
    }
  }
}
