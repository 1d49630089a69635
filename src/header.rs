//! Arena metadata record and region layout.
//!
//! ```text
//!   offset 0
//!   ┌──────────────┬──────────────────┬───────┬───────┬─────┬──────────────────────┐
//!   │ Header       │ bucket heads     │ descr │ param │ pad │ chunks ...           │
//!   │ (repr(C))    │ BUCKET_COUNT x 8 │ bytes │ bytes │     │                      │
//!   └──────────────┴──────────────────┴───────┴───────┴─────┴──────────────────────┘
//!                  ▲                                        ▲                      ▲
//!           BUCKETS_OFFSET                              lo_bound               hi_bound
//! ```

use std::mem::{offset_of, size_of};

use crate::{
  bucket::BUCKET_COUNT,
  chunk::{MIN_ALLOC, TAG_SIZE},
  error::MemError,
};

/// Smallest region `create` accepts.
pub const MEM_MIN_SIZE: u64 = 128;
/// Largest region `create` accepts, and the ceiling for a single request.
pub const MEM_MAX_SIZE: u64 = 0x10_0000_0000;

/// The metadata record at the start of every region.
///
/// Offsets (`descr`, `lo_bound`, ...) are relative to the region base.
#[repr(C)]
pub(crate) struct Header {
  pub(crate) lock: libc::pthread_mutex_t,
  pub(crate) use_lock: u64,
  pub(crate) allow_oom: u64,
  pub(crate) orig_size: u64,
  pub(crate) descr: u64,
  pub(crate) descr_len: u64,
  pub(crate) param: u64,
  pub(crate) param_len: u64,
  pub(crate) lo_bound: u64,
  pub(crate) hi_bound: u64,
  pub(crate) total_size: u64,
  pub(crate) used_size: u64,
  pub(crate) free_size: u64,
}

pub(crate) const LOCK_OFFSET: u64 = offset_of!(Header, lock) as u64;
pub(crate) const BUCKETS_OFFSET: u64 = align!(size_of::<Header>() as u64);

/// Where each part of a region of a given size goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Plan {
  pub(crate) descr: u64,
  pub(crate) param: u64,
  pub(crate) lo_bound: u64,
  pub(crate) hi_bound: u64,
}

impl Plan {
  pub(crate) fn new(
    size: u64,
    descr: &str,
    param: &str,
  ) -> Result<Self, MemError> {
    if !(MEM_MIN_SIZE..=MEM_MAX_SIZE).contains(&size) {
      return Err(MemError::RegionSize {
        size,
        min: MEM_MIN_SIZE,
        max: MEM_MAX_SIZE,
      });
    }

    let descr_off = BUCKETS_OFFSET + BUCKET_COUNT as u64 * 8;
    let param_off = descr_off + descr.len() as u64;
    let lo_bound = align!(param_off + param.len() as u64);
    let hi_bound = align_down!(size);

    if hi_bound < lo_bound + 2 * TAG_SIZE + MIN_ALLOC {
      return Err(MemError::RegionTooSmall { size });
    }

    Ok(Self {
      descr: descr_off,
      param: param_off,
      lo_bound,
      hi_bound,
    })
  }

  /// Payload size of the single chunk spanning the usable range.
  pub(crate) fn first_chunk_size(
    &self,
  ) -> u64 {
    self.hi_bound - self.lo_bound - 2 * TAG_SIZE
  }
}

/// Region size that guarantees room for `chunks_num` allocations on top of
/// the bytes the caller asks for in them.
///
/// Callers add the result to the sum of their payload sizes. Each chunk may
/// cost two tags, up to 7 bytes of rounding and the padding that lifts a tiny
/// request to the minimum chunk size.
pub fn required_size(
  chunks_num: u64,
  descr: &str,
  param: &str,
) -> u64 {
  let mut size = 0;

  size += BUCKETS_OFFSET;
  size += BUCKET_COUNT as u64 * 8;
  size += descr.len() as u64;
  size += param.len() as u64;
  // alignment slack for lo_bound and hi_bound
  size += 7;
  size += 7;
  size += chunks_num * (2 * TAG_SIZE + MIN_ALLOC - 1);

  size
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_buckets_follow_header() {
    assert_eq!(BUCKETS_OFFSET % 8, 0);
    assert!(BUCKETS_OFFSET >= size_of::<Header>() as u64);
  }

  #[test]
  fn test_plan_bounds_are_aligned() {
    let plan = Plan::new(4099, "value cache", "ValueCacheSize").unwrap();

    assert_eq!(plan.lo_bound % 8, 0);
    assert_eq!(plan.hi_bound, 4096);
    assert_eq!(plan.param, plan.descr + "value cache".len() as u64);
    assert!(plan.lo_bound >= plan.param + "ValueCacheSize".len() as u64);
  }

  #[test]
  fn test_plan_rejects_bad_sizes() {
    assert!(matches!(
      Plan::new(64, "a", "b"),
      Err(MemError::RegionSize { size: 64, .. })
    ));
    assert!(matches!(
      Plan::new(MEM_MAX_SIZE + 1, "a", "b"),
      Err(MemError::RegionSize { .. })
    ));
    assert!(matches!(
      Plan::new(MEM_MIN_SIZE, "a", "b"),
      Err(MemError::RegionTooSmall { .. })
    ));
  }

  #[test]
  fn test_required_size_grows_per_chunk() {
    let one = required_size(1, "trend cache", "TrendCacheSize");
    let four = required_size(4, "trend cache", "TrendCacheSize");

    assert_eq!(four - one, 3 * (2 * TAG_SIZE + MIN_ALLOC - 1));
  }

  #[test]
  fn test_required_size_fits_plan() {
    let size = required_size(1, "vmware cache size", "VMwareCacheSize") + 8;
    let plan = Plan::new(size, "vmware cache size", "VMwareCacheSize").unwrap();

    assert!(plan.first_chunk_size() >= MIN_ALLOC);
  }
}
