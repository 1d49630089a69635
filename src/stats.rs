//! Arena statistics.

use serde::Serialize;

use crate::{
  bucket::{BUCKET_COUNT, bucket_size},
  chunk::TAG_SIZE,
  heap::Heap,
};

/// Snapshot of an arena's chunk population.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemStats {
  /// Free chunks per bucket; the last entry counts every chunk of 256 bytes
  /// or more.
  pub chunks_num: [u64; BUCKET_COUNT],
  pub free_chunks: u64,
  pub used_chunks: u64,
  /// Smallest and largest free chunk payload, 0 when nothing is free.
  pub min_chunk_size: u64,
  pub max_chunk_size: u64,
  /// Bytes spent on boundary tags.
  pub overhead: u64,
  pub free_size: u64,
  pub used_size: u64,
  pub total_size: u64,
  /// Size the region was created with, metadata included.
  pub region_size: u64,
}

impl MemStats {
  pub(crate) fn collect(
    heap: &Heap<'_>,
  ) -> Self {
    let mut chunks_num = [0u64; BUCKET_COUNT];
    let mut min_chunk_size = u64::MAX;
    let mut max_chunk_size = 0;

    for (index, count) in chunks_num.iter_mut().enumerate() {
      for chunk in heap.bucket(index) {
        let size = chunk.size(heap.region);

        *count += 1;
        min_chunk_size = min_chunk_size.min(size);
        max_chunk_size = max_chunk_size.max(size);
      }
    }

    let free_chunks: u64 = chunks_num.iter().sum();
    let total_chunks = heap.chunks().count() as u64;

    Self {
      chunks_num,
      free_chunks,
      used_chunks: total_chunks - free_chunks,
      min_chunk_size: if free_chunks == 0 { 0 } else { min_chunk_size },
      max_chunk_size,
      overhead: total_chunks * 2 * TAG_SIZE,
      free_size: heap.free_size(),
      used_size: heap.used_size(),
      total_size: heap.total_size(),
      region_size: heap.orig_size(),
    }
  }

  /// Logs the snapshot, one line per non-empty bucket.
  pub(crate) fn dump(
    &self,
    description: &str,
  ) {
    tracing::info!("=== memory statistics for {} ===", description);

    for (index, &count) in self.chunks_num.iter().enumerate() {
      if count == 0 {
        continue;
      }

      let prefix = if index == BUCKET_COUNT - 1 { ">=" } else { "" };
      tracing::info!(
        "free chunks of size {:>2} {:>3} bytes: {:>8}",
        prefix,
        bucket_size(index),
        count
      );
    }

    tracing::info!("min chunk size: {:>10} bytes", self.min_chunk_size);
    tracing::info!("max chunk size: {:>10} bytes", self.max_chunk_size);
    tracing::info!(
      "memory of total size {} bytes fragmented into {} chunks",
      self.total_size,
      self.free_chunks + self.used_chunks
    );
    tracing::info!(
      "of those, {:>10} bytes are in {:>8} free chunks",
      self.free_size,
      self.free_chunks
    );
    tracing::info!(
      "of those, {:>10} bytes are in {:>8} used chunks",
      self.used_size,
      self.used_chunks
    );
    tracing::info!("================================");
  }
}

/// Structural check of the whole heap, for tests.
///
/// Every chunk lies inside the bounds with matching tags, no two free chunks
/// touch, every free chunk sits in the bucket for its size exactly once and
/// the counters add up.
#[cfg(test)]
pub(crate) fn verify(
  heap: &Heap<'_>,
) -> Result<(), String> {
  use std::collections::HashSet;

  use crate::{bucket::bucket_by_size, chunk::footprint};

  let mut free = HashSet::new();
  let mut used_size = 0;
  let mut free_size = 0;
  let mut previous_free = false;
  let mut end = heap.lo_bound();

  for chunk in heap.chunks() {
    if !chunk.tags_match(heap.region) {
      return Err(format!("tags differ for chunk {:#x}", chunk.0));
    }
    if chunk.end(heap.region) > heap.hi_bound() {
      return Err(format!("chunk {:#x} runs past hi_bound", chunk.0));
    }

    let is_free = chunk.is_free(heap.region);
    if is_free && previous_free {
      return Err(format!("free chunk {:#x} was not coalesced", chunk.0));
    }

    if is_free {
      free.insert(chunk);
      free_size += footprint(chunk.size(heap.region));
    } else {
      used_size += footprint(chunk.size(heap.region));
    }

    previous_free = is_free;
    end = chunk.end(heap.region);
  }

  if end != heap.hi_bound() {
    return Err(format!("chunks end at {end:#x}, not at hi_bound"));
  }

  let mut linked = 0;
  for index in 0..BUCKET_COUNT {
    let mut prev = None;

    for chunk in heap.bucket(index) {
      if !free.contains(&chunk) {
        return Err(format!("bucket {index} links non-free chunk {:#x}", chunk.0));
      }
      if bucket_by_size(chunk.size(heap.region)) != index {
        return Err(format!("chunk {:#x} is in the wrong bucket {index}", chunk.0));
      }
      if chunk.prev(heap.region) != prev {
        return Err(format!("broken prev link at chunk {:#x}", chunk.0));
      }

      prev = Some(chunk);
      linked += 1;
    }
  }

  if linked != free.len() {
    return Err(format!("{linked} linked chunks but {} free", free.len()));
  }
  if used_size != heap.used_size() || free_size != heap.free_size() {
    return Err(format!(
      "counters used={} free={} but chunks hold used={used_size} free={free_size}",
      heap.used_size(),
      heap.free_size()
    ));
  }
  if heap.used_size() + heap.free_size() != heap.total_size() {
    return Err("used_size + free_size != total_size".to_string());
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use tracing_test::traced_test;

  use super::*;
  use crate::arena::tests::tolerant;

  #[test]
  fn test_fresh_arena_has_one_free_chunk() {
    let arena = tolerant(4096);
    let stats = arena.stats();

    assert_eq!(stats.free_chunks, 1);
    assert_eq!(stats.used_chunks, 0);
    assert_eq!(stats.chunks_num[BUCKET_COUNT - 1], 1);
    assert_eq!(stats.min_chunk_size, stats.max_chunk_size);
    assert_eq!(stats.overhead, 16);
    assert_eq!(stats.free_size, stats.total_size);
    assert_eq!(stats.region_size, 4096);
  }

  #[test]
  fn test_counts_after_allocations() {
    let arena = tolerant(4096);

    let a = arena.allocate(24).unwrap();
    let _b = arena.allocate(24).unwrap();
    let _c = arena.allocate(100).unwrap();
    arena.release(a);

    let stats = arena.stats();
    assert_eq!(stats.used_chunks, 2);
    assert_eq!(stats.free_chunks, 2);
    assert_eq!(stats.chunks_num[0], 1);
    assert_eq!(stats.min_chunk_size, 24);
    assert_eq!(stats.overhead, 4 * 16);
    assert_eq!(stats.used_size, 24 + 16 + 104 + 16);
  }

  #[traced_test]
  #[test]
  fn test_dump_stats_logs_buckets() {
    let arena = tolerant(4096);
    let a = arena.allocate(24).unwrap();
    let _pin = arena.allocate(24).unwrap();
    arena.release(a);

    arena.dump_stats();

    assert!(logs_contain("=== memory statistics for test arena ==="));
    assert!(logs_contain("free chunks of size     24 bytes:"));
    assert!(logs_contain("free chunks of size >= 256 bytes:"));
  }
}
