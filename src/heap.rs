//! Offset-based view over an initialized region: metadata counters, bucket
//! heads and chunk traversal. The allocation algorithms are implemented on
//! top of it in `malloc`, `free` and `realloc`.

use std::mem::offset_of;

use crate::{
  bucket::{BUCKET_COUNT, bucket_by_size},
  chunk::{Chunk, footprint, from_link, to_link},
  header::{BUCKETS_OFFSET, Header},
  region::Region,
};

macro_rules! meta_field {
  ($get:ident, $set:ident) => {
    #[inline]
    pub(crate) fn $get(
      &self,
    ) -> u64 {
      self.region.read_u64(offset_of!(Header, $get) as u64)
    }

    #[inline]
    pub(crate) fn $set(
      &self,
      value: u64,
    ) {
      self.region.write_u64(offset_of!(Header, $get) as u64, value)
    }
  };
}

#[derive(Clone, Copy)]
pub(crate) struct Heap<'a> {
  pub(crate) region: &'a Region,
}

impl<'a> Heap<'a> {
  pub(crate) fn new(
    region: &'a Region,
  ) -> Self {
    Self { region }
  }

  meta_field!(use_lock, set_use_lock);
  meta_field!(allow_oom, set_allow_oom);
  meta_field!(orig_size, set_orig_size);
  meta_field!(descr, set_descr);
  meta_field!(descr_len, set_descr_len);
  meta_field!(param, set_param);
  meta_field!(param_len, set_param_len);
  meta_field!(lo_bound, set_lo_bound);
  meta_field!(hi_bound, set_hi_bound);
  meta_field!(total_size, set_total_size);
  meta_field!(used_size, set_used_size);
  meta_field!(free_size, set_free_size);

  /// Human-readable arena description, used in diagnostics.
  pub(crate) fn description(
    &self,
  ) -> String {
    self.string(self.descr(), self.descr_len())
  }

  /// Name of the configuration parameter that sizes this arena.
  pub(crate) fn param_name(
    &self,
  ) -> String {
    self.string(self.param(), self.param_len())
  }

  fn string(
    &self,
    offset: u64,
    len: u64,
  ) -> String {
    let mut buf = vec![0u8; len as usize];
    self.region.read_bytes(offset, &mut buf);
    String::from_utf8_lossy(&buf).into_owned()
  }

  pub(crate) fn head(
    &self,
    index: usize,
  ) -> Option<Chunk> {
    debug_assert!(index < BUCKET_COUNT);
    to_link(self.region.read_u64(BUCKETS_OFFSET + index as u64 * 8))
  }

  pub(crate) fn set_head(
    &self,
    index: usize,
    chunk: Option<Chunk>,
  ) {
    debug_assert!(index < BUCKET_COUNT);
    self
      .region
      .write_u64(BUCKETS_OFFSET + index as u64 * 8, from_link(chunk));
  }

  /// Moves `bytes` of chunk footprint from the free to the used counter.
  #[inline]
  pub(crate) fn account_used(
    &self,
    bytes: u64,
  ) {
    self.set_used_size(self.used_size() + bytes);
    self.set_free_size(self.free_size() - bytes);
  }

  /// Moves `bytes` of chunk footprint from the used to the free counter.
  #[inline]
  pub(crate) fn account_free(
    &self,
    bytes: u64,
  ) {
    self.set_used_size(self.used_size() - bytes);
    self.set_free_size(self.free_size() + bytes);
  }

  /// Turns the whole usable range into one free chunk and forgets every
  /// other chunk.
  pub(crate) fn reset(
    &self,
  ) {
    self
      .region
      .fill(BUCKETS_OFFSET, BUCKET_COUNT as u64 * 8, 0);

    let lo_bound = self.lo_bound();
    let total_size = self.hi_bound() - lo_bound;
    let chunk = Chunk(lo_bound);
    let size = total_size - footprint(0);

    chunk.set_size(self.region, size, false);
    chunk.set_prev(self.region, None);
    chunk.set_next(self.region, None);
    self.set_head(bucket_by_size(size), Some(chunk));

    self.set_total_size(total_size);
    self.set_used_size(0);
    self.set_free_size(total_size);
  }

  /// Walks every chunk, free or used, from `lo_bound` to `hi_bound`.
  pub(crate) fn chunks(
    &self,
  ) -> Chunks<'a> {
    Chunks {
      region: self.region,
      at: self.lo_bound(),
      hi_bound: self.hi_bound(),
    }
  }

  /// Free chunks linked into bucket `index`, head first.
  pub(crate) fn bucket(
    &self,
    index: usize,
  ) -> BucketIter<'a> {
    BucketIter {
      region: self.region,
      at: self.head(index),
    }
  }
}

pub(crate) struct Chunks<'a> {
  region: &'a Region,
  at: u64,
  hi_bound: u64,
}

impl Iterator for Chunks<'_> {
  type Item = Chunk;

  fn next(
    &mut self,
  ) -> Option<Chunk> {
    if self.at >= self.hi_bound {
      return None;
    }

    let chunk = Chunk(self.at);
    self.at = chunk.end(self.region);
    Some(chunk)
  }
}

pub(crate) struct BucketIter<'a> {
  region: &'a Region,
  at: Option<Chunk>,
}

impl Iterator for BucketIter<'_> {
  type Item = Chunk;

  fn next(
    &mut self,
  ) -> Option<Chunk> {
    let chunk = self.at?;
    self.at = chunk.next(self.region);
    Some(chunk)
  }
}
