//! # shmarena - A Shared-Memory Region Allocator
//!
//! This crate manages allocations inside one pre-sized, contiguous memory
//! region that several cooperating processes may map at once. The region
//! never grows: every byte the allocator hands out, and every byte of its own
//! bookkeeping, lives inside it.
//!
//! ## Overview
//!
//! ```text
//!   Region Layout:
//!
//!   ┌────────┬─────────┬───────┬──────────────────────────────────────────────┐
//!   │ Header │ Buckets │ names │ chunk │ chunk │ chunk │ ...           │ chunk │
//!   └────────┴─────────┴───────┴──────────────────────────────────────────────┘
//!   ▲                          ▲                                              ▲
//!   offset 0                lo_bound                                   hi_bound
//!
//!   Each chunk carries its size twice, once on each side:
//!
//!   ┌──────────┬─────────────────────────────────┬──────────┐
//!   │ size|use │            payload              │ size|use │
//!   └──────────┴─────────────────────────────────┴──────────┘
//!              ▲
//!              └── Offset returned to the caller
//! ```
//!
//! Free chunks are kept in 30 buckets: one per exact size from 24 to 248
//! bytes, plus one unordered bucket for everything larger. Freed chunks are
//! merged with free neighbours right away, found through the boundary tags
//! without any index outside the region.
//!
//! ## Crate Structure
//!
//! ```text
//!   shmarena
//!   ├── align      - 8-byte alignment macros (align!, align_down!)
//!   ├── arena      - Arena, the public API
//!   ├── config     - ArenaConfig and size parsing
//!   ├── error      - MemError, ConfigError
//!   ├── logging    - tracing subscriber setup
//!   ├── stats      - MemStats
//!   └── (internal) region, lock, header, chunk, heap, bucket,
//!                  malloc, free, realloc
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use shmarena::{Arena, ArenaConfig};
//!
//! let config = ArenaConfig::new(1 << 20, "value cache", "ValueCacheSize")
//!   .with_lock(true)
//!   .with_allow_oom(true);
//! let arena = Arena::create(&config);
//!
//! let offset = arena.allocate(100).expect("fresh arena has room");
//! arena.write(offset, b"hello").unwrap();
//!
//! let offset = arena.resize(Some(offset), 400).expect("room to grow");
//! arena.release(offset);
//!
//! arena.destroy();
//! ```
//!
//! ## Failure Policy
//!
//! - Running out of space returns `None` for arenas created with
//!   `allow_oom`, and terminates the process otherwise, naming the
//!   configuration parameter to raise.
//! - Zero or oversized requests, releasing an offset that is not a live
//!   allocation, and failing to set up the region are programmer or
//!   deployment errors and always terminate the process.
//! - The `try_*` methods report every condition as a `MemError` instead.
//!
//! ## Concurrency
//!
//! An arena created with `lock` carries a process-shared mutex inside its
//! header; each operation holds it from start to end. Arenas without a lock
//! are meant for a single owner and treat concurrent entry as a fatal error.

#[macro_use]
pub mod align;
#[macro_use]
mod error;

mod arena;
mod bucket;
mod chunk;
mod config;
mod free;
mod header;
mod heap;
mod lock;
pub mod logging;
mod malloc;
mod realloc;
mod region;
mod stats;

pub use arena::{Arena, Offset};
pub use bucket::BUCKET_COUNT;
pub use config::{ArenaConfig, parse_size};
pub use error::{ConfigError, MemError};
pub use header::{MEM_MAX_SIZE, MEM_MIN_SIZE};
pub use stats::MemStats;
