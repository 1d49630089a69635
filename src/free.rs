use crate::{
  chunk::{Chunk, TAG_SIZE, footprint},
  heap::Heap,
};

impl Heap<'_> {
  /// Returns a used chunk to the free lists, merging it with free
  /// neighbours on either side.
  pub(crate) fn free(
    &self,
    chunk: Chunk,
  ) {
    let chunk_size = chunk.size(self.region);
    self.account_free(footprint(chunk_size));

    let right = chunk.right(self.region);
    let left_free = self.lo_bound() < chunk.0 && chunk.left_is_free(self.region);
    let right_free = right.0 < self.hi_bound() && right.is_free(self.region);

    let (start, size) = match (left_free, right_free) {
      (true, true) => {
        let left = chunk.left(self.region);
        let left_size = left.size(self.region);
        let right_size = right.size(self.region);

        self.unlink(left);
        self.unlink(right);

        (left, left_size + chunk_size + right_size + 4 * TAG_SIZE)
      }
      (true, false) => {
        let left = chunk.left(self.region);
        let left_size = left.size(self.region);

        self.unlink(left);

        (left, left_size + chunk_size + 2 * TAG_SIZE)
      }
      (false, true) => {
        let right_size = right.size(self.region);

        self.unlink(right);

        (chunk, chunk_size + right_size + 2 * TAG_SIZE)
      }
      (false, false) => (chunk, chunk_size),
    };

    start.set_size(self.region, size, false);
    self.link(start);
  }
}
