//! Error types for arena setup, allocation and configuration loading.

use std::{io, path::PathBuf};

use thiserror::Error;
use validator::ValidationErrors;

/// Logs a critical diagnostic and terminates the process.
///
/// Reserved for conditions no retry can fix: a misconfigured region, a
/// collaborator releasing memory it never owned, an intolerant arena running
/// out of space.
macro_rules! fatal {
  ($($arg:tt)*) => {{
    tracing::error!($($arg)*);
    std::process::exit(libc::EXIT_FAILURE)
  }};
}

/// Everything that can go wrong inside an arena.
#[derive(Debug, Error)]
pub enum MemError {
  #[error("requested region size {size} is outside of [{min}, {max}]")]
  RegionSize { size: u64, min: u64, max: u64 },

  #[error("region of {size} bytes leaves no room for a chunk after the arena metadata")]
  RegionTooSmall { size: u64 },

  #[error("cannot obtain backing memory: {0}")]
  Shm(#[source] io::Error),

  #[error("cannot create arena lock: {0}")]
  Lock(#[source] io::Error),

  #[error("asking for a bad number of bytes ({0})")]
  BadSize(u64),

  #[error("freeing a NULL offset")]
  NullOffset,

  #[error("offset {0:#x} does not refer to an allocated chunk")]
  InvalidOffset(u64),

  #[error("out of memory in \"{description}\" (requested {requested} bytes)")]
  OutOfMemory {
    requested: u64,
    description: String,
    param: String,
  },

  #[error("access of {len} bytes at offset {offset:#x} runs past a {capacity} byte chunk")]
  OutOfBounds { offset: u64, len: u64, capacity: u64 },
}

/// Configuration loading error.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("configuration file not found: {0}")]
  FileNotFound(PathBuf),

  #[error("configuration parsing error: {0}")]
  Parsing(#[from] figment::Error),

  #[error("invalid configuration: {0}")]
  Validation(#[from] ValidationErrors),

  #[error("invalid size value \"{0}\"")]
  Size(String),
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_out_of_memory_message() {
    let err = MemError::OutOfMemory {
      requested: 4000,
      description: "history cache".to_string(),
      param: "HistoryCacheSize".to_string(),
    };

    assert_eq!(
      err.to_string(),
      "out of memory in \"history cache\" (requested 4000 bytes)"
    );
  }

  #[test]
  fn test_bad_size_message() {
    assert_eq!(
      MemError::BadSize(0).to_string(),
      "asking for a bad number of bytes (0)"
    );
  }
}
