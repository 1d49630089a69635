//! Public arena API.
//!
//! Every entry point validates its input, takes the arena lock (when the
//! arena has one) for the whole operation and applies the out-of-memory
//! policy chosen at creation time.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::{
  chunk::{Chunk, MIN_ALLOC, TAG_SIZE},
  config::ArenaConfig,
  error::MemError,
  header::{self, MEM_MAX_SIZE, Plan},
  heap::Heap,
  lock::{ShmMutex, ShmMutexGuard},
  region::Region,
  stats::MemStats,
};

/// Location of a payload, as a byte offset from the region base.
///
/// Offsets stay valid in every process that maps the region, whatever
/// address it is mapped at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Offset(u64);

impl Offset {
  pub const fn from_raw(
    raw: u64,
  ) -> Self {
    Offset(raw)
  }

  pub const fn get(
    self,
  ) -> u64 {
    self.0
  }
}

/// One allocator instance bound to one region.
pub struct Arena {
  region: Region,
  lock: Option<ShmMutex>,
  busy: AtomicBool,
}

// Shared state lives in the region and is only touched while holding the
// arena mutex or, for unlocked arenas, the `busy` flag.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

/// Held for the duration of one operation.
enum Entry<'a> {
  Locked { _guard: ShmMutexGuard<'a> },
  Exclusive(&'a AtomicBool),
}

impl Drop for Entry<'_> {
  fn drop(
    &mut self,
  ) {
    if let Entry::Exclusive(busy) = self {
      busy.store(false, Ordering::Release);
    }
  }
}

impl Arena {
  /// Creates an arena, terminating the process when that is impossible.
  pub fn create(
    config: &ArenaConfig,
  ) -> Self {
    match Self::try_create(config) {
      Ok(arena) => arena,
      Err(err) => fatal!(
        description = %config.description,
        error = %err,
        "cannot create arena"
      ),
    }
  }

  /// Maps the region, lays out the metadata and installs one free chunk
  /// spanning the rest.
  pub fn try_create(
    config: &ArenaConfig,
  ) -> Result<Self, MemError> {
    let plan = Plan::new(config.size, &config.description, &config.param)?;
    let len = usize::try_from(config.size).map_err(|_| MemError::RegionSize {
      size: config.size,
      min: header::MEM_MIN_SIZE,
      max: MEM_MAX_SIZE,
    })?;

    let region = match config.shm_key {
      Some(key) => Region::sysv(key, len),
      None => Region::anonymous(len),
    }
    .map_err(MemError::Shm)?;

    let heap = Heap::new(&region);

    heap.set_orig_size(config.size);
    heap.set_allow_oom(config.allow_oom as u64);
    heap.set_descr(plan.descr);
    heap.set_descr_len(config.description.len() as u64);
    heap.set_param(plan.param);
    heap.set_param_len(config.param.len() as u64);
    region.write_bytes(plan.descr, config.description.as_bytes());
    region.write_bytes(plan.param, config.param.as_bytes());
    heap.set_lo_bound(plan.lo_bound);
    heap.set_hi_bound(plan.hi_bound);
    heap.reset();

    let lock = if config.lock {
      let lock = unsafe { ShmMutex::from_raw(region.ptr(header::LOCK_OFFSET).cast()) };

      if let Err(err) = lock.init() {
        region.discard(&config.description);
        return Err(MemError::Lock(err));
      }

      heap.set_use_lock(1);
      Some(lock)
    } else {
      heap.set_use_lock(0);
      None
    };

    tracing::debug!(
      description = %config.description,
      "valid user offsets: [{:#x}, {:#x}] total size: {}",
      plan.lo_bound + TAG_SIZE,
      plan.hi_bound - TAG_SIZE,
      plan.first_chunk_size()
    );

    Ok(Self {
      region,
      lock,
      busy: AtomicBool::new(false),
    })
  }

  /// Region size that leaves room for `chunks_num` allocations on top of
  /// the payload bytes the caller plans to store.
  pub fn required_size(
    chunks_num: u64,
    description: &str,
    param: &str,
  ) -> u64 {
    header::required_size(chunks_num, description, param)
  }

  /// Destroys the lock and releases the backing memory.
  ///
  /// No other process may still be using the region.
  pub fn destroy(
    self,
  ) {
    if let Some(lock) = &self.lock {
      if let Err(err) = lock.destroy() {
        tracing::warn!(error = %err, description = %self.description(), "cannot destroy arena lock");
      }
    }

    self.region.discard(&self.description());
  }

  /// Forgets every allocation, leaving one free chunk over the whole range.
  /// Offsets handed out earlier must not be released afterwards.
  pub fn clear(
    &self,
  ) {
    let _entry = self.enter();
    self.heap().reset();
  }

  /// Allocates `size` bytes.
  ///
  /// Returns `None` only on exhaustion of an arena created with
  /// `allow_oom`; any other failure terminates the process.
  pub fn allocate(
    &self,
    size: u64,
  ) -> Option<Offset> {
    self.settle(self.try_allocate(size))
  }

  /// Allocates `size` bytes, reporting every failure as a `MemError`.
  pub fn try_allocate(
    &self,
    size: u64,
  ) -> Result<Offset, MemError> {
    check_size(size)?;

    let _entry = self.enter();
    let heap = self.heap();

    heap
      .malloc(size)
      .map(|chunk| Offset(chunk.payload()))
      .ok_or_else(|| self.out_of_memory(size))
  }

  /// Resizes the payload at `old` to `size` bytes, moving it if needed.
  /// `None` for `old` allocates.
  pub fn resize(
    &self,
    old: Option<Offset>,
    size: u64,
  ) -> Option<Offset> {
    self.settle(self.try_resize(old, size))
  }

  /// Like [`Arena::resize`], but never terminates the process.
  pub fn try_resize(
    &self,
    old: Option<Offset>,
    size: u64,
  ) -> Result<Offset, MemError> {
    let Some(old) = old else {
      return self.try_allocate(size);
    };

    check_size(size)?;
    check_null(old)?;

    let _entry = self.enter();
    let chunk = self.checked_chunk(old)?;

    self
      .heap()
      .realloc(chunk, size)
      .map(|chunk| Offset(chunk.payload()))
      .ok_or_else(|| self.out_of_memory(size))
  }

  /// Releases the payload at `offset`. Releasing anything that is not a
  /// live allocation terminates the process.
  pub fn release(
    &self,
    offset: Offset,
  ) {
    if let Err(err) = self.try_release(offset) {
      fatal!(description = %self.description(), "{}", err);
    }
  }

  /// Like [`Arena::release`], but never terminates the process.
  pub fn try_release(
    &self,
    offset: Offset,
  ) -> Result<(), MemError> {
    check_null(offset)?;

    let _entry = self.enter();
    let chunk = self.checked_chunk(offset)?;

    self.heap().free(chunk);
    Ok(())
  }

  /// Usable bytes behind `offset`, at least what was requested.
  pub fn payload_size(
    &self,
    offset: Offset,
  ) -> Result<u64, MemError> {
    check_null(offset)?;

    let _entry = self.enter();
    let chunk = self.checked_chunk(offset)?;

    Ok(chunk.size(&self.region))
  }

  /// Copies `data` to the start of the payload at `offset`.
  pub fn write(
    &self,
    offset: Offset,
    data: &[u8],
  ) -> Result<(), MemError> {
    check_null(offset)?;

    let _entry = self.enter();
    let chunk = self.checked_chunk(offset)?;
    check_bounds(&self.region, chunk, data.len())?;

    self.region.write_bytes(offset.0, data);
    Ok(())
  }

  /// Fills `buf` from the start of the payload at `offset`.
  pub fn read(
    &self,
    offset: Offset,
    buf: &mut [u8],
  ) -> Result<(), MemError> {
    check_null(offset)?;

    let _entry = self.enter();
    let chunk = self.checked_chunk(offset)?;
    check_bounds(&self.region, chunk, buf.len())?;

    self.region.read_bytes(offset.0, buf);
    Ok(())
  }

  /// Local address of the live allocation at `offset` in this process.
  ///
  /// Dereferencing it is only sound while the allocation is live and no one
  /// else accesses the same bytes.
  pub fn as_ptr(
    &self,
    offset: Offset,
  ) -> Result<*mut u8, MemError> {
    check_null(offset)?;

    let _entry = self.enter();
    self.checked_chunk(offset)?;

    Ok(self.region.ptr(offset.0))
  }

  /// Snapshot of chunk counts and sizes, taken under the lock.
  pub fn stats(
    &self,
  ) -> MemStats {
    let _entry = self.enter();
    MemStats::collect(&self.heap())
  }

  /// Logs per-bucket free chunk counts and overall usage.
  pub fn dump_stats(
    &self,
  ) {
    let _entry = self.enter();
    let heap = self.heap();

    MemStats::collect(&heap).dump(&heap.description());
  }

  pub fn description(
    &self,
  ) -> String {
    self.heap().description()
  }

  pub fn param(
    &self,
  ) -> String {
    self.heap().param_name()
  }

  /// Bytes between the bounds of the chunk area.
  pub fn total_size(
    &self,
  ) -> u64 {
    let _entry = self.enter();
    self.heap().total_size()
  }

  /// Footprint of used chunks, tags included.
  pub fn used_size(
    &self,
  ) -> u64 {
    let _entry = self.enter();
    self.heap().used_size()
  }

  /// Footprint of free chunks, tags included.
  pub fn free_size(
    &self,
  ) -> u64 {
    let _entry = self.enter();
    self.heap().free_size()
  }

  pub fn allow_oom(
    &self,
  ) -> bool {
    self.heap().allow_oom() != 0
  }

  pub fn is_locked(
    &self,
  ) -> bool {
    self.heap().use_lock() != 0
  }

  pub(crate) fn region(
    &self,
  ) -> &Region {
    &self.region
  }

  fn heap(
    &self,
  ) -> Heap<'_> {
    Heap::new(&self.region)
  }

  fn enter(
    &self,
  ) -> Entry<'_> {
    match &self.lock {
      Some(lock) => match lock.lock() {
        Ok(guard) => Entry::Locked { _guard: guard },
        Err(err) => fatal!(
          description = %self.description(),
          error = %err,
          "cannot lock arena"
        ),
      },
      None => {
        if self.busy.swap(true, Ordering::Acquire) {
          fatal!(
            description = %self.description(),
            "concurrent use of an arena created without a lock"
          );
        }
        Entry::Exclusive(&self.busy)
      }
    }
  }

  /// Applies the out-of-memory policy to the result of a `try_*` call.
  fn settle(
    &self,
    result: Result<Offset, MemError>,
  ) -> Option<Offset> {
    match result {
      Ok(offset) => Some(offset),
      Err(MemError::OutOfMemory { .. }) if self.allow_oom() => None,
      Err(MemError::OutOfMemory {
        requested,
        description,
        param,
      }) => {
        tracing::error!(description = %description, "out of memory (requested {} bytes)", requested);
        fatal!(description = %description, "please increase {} configuration parameter", param);
      }
      Err(err) => fatal!(description = %self.description(), "{}", err),
    }
  }

  fn out_of_memory(
    &self,
    requested: u64,
  ) -> MemError {
    let heap = self.heap();

    MemError::OutOfMemory {
      requested,
      description: heap.description(),
      param: heap.param_name(),
    }
  }

  /// Resolves a payload offset to its chunk, refusing anything that is not
  /// the start of a live allocation.
  fn checked_chunk(
    &self,
    offset: Offset,
  ) -> Result<Chunk, MemError> {
    let heap = self.heap();
    let payload = offset.0;
    let invalid = MemError::InvalidOffset(payload);

    let hi_bound = heap.hi_bound();

    if payload % 8 != 0
      || payload < heap.lo_bound() + TAG_SIZE
      || payload > hi_bound
      || hi_bound - payload < MIN_ALLOC + TAG_SIZE
    {
      return Err(invalid);
    }

    let chunk = Chunk::from_payload(payload);
    if chunk.is_free(&self.region) {
      return Err(invalid);
    }

    let size = chunk.size(&self.region);
    // hi_bound - chunk.0 is at least MIN_ALLOC + 2 * TAG_SIZE here
    if size < MIN_ALLOC || size % 8 != 0 || size > hi_bound - chunk.0 - 2 * TAG_SIZE {
      return Err(invalid);
    }
    if !chunk.tags_match(&self.region) {
      return Err(invalid);
    }

    Ok(chunk)
  }
}

fn check_size(
  size: u64,
) -> Result<(), MemError> {
  if size == 0 || size > MEM_MAX_SIZE {
    Err(MemError::BadSize(size))
  } else {
    Ok(())
  }
}

fn check_null(
  offset: Offset,
) -> Result<(), MemError> {
  if offset.0 == 0 {
    Err(MemError::NullOffset)
  } else {
    Ok(())
  }
}

fn check_bounds(
  region: &Region,
  chunk: Chunk,
  len: usize,
) -> Result<(), MemError> {
  let capacity = chunk.size(region);

  if len as u64 > capacity {
    Err(MemError::OutOfBounds {
      offset: chunk.payload(),
      len: len as u64,
      capacity,
    })
  } else {
    Ok(())
  }
}
