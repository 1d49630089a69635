//! Arena configuration.
//!
//! Sizes accept the suffixes used by cache-size parameters (`K`, `M`, `G`,
//! `T`), so `size: 64M` in YAML or `SHMARENA_SIZE=64M` in the environment
//! both work.

use std::path::{Path, PathBuf};

use figment::{
  Figment,
  providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Deserializer, Serialize};
use validator::Validate;

use crate::{
  error::ConfigError,
  header::{MEM_MAX_SIZE, MEM_MIN_SIZE},
};

/// Everything needed to create an arena.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ArenaConfig {
  /// System V key of the backing segment. Without one the region is an
  /// anonymous shared mapping inherited by forked children.
  #[serde(default)]
  pub shm_key: Option<i32>,

  /// Guard every operation with a process-shared mutex.
  #[serde(default)]
  pub lock: bool,

  /// Region size in bytes, metadata included.
  #[serde(deserialize_with = "deserialize_size")]
  #[validate(range(min = 128, max = 68_719_476_736u64))]
  pub size: u64,

  /// Human-readable name, reported in diagnostics.
  #[validate(length(min = 1))]
  pub description: String,

  /// Configuration parameter an operator should raise when the arena runs
  /// out of memory.
  #[serde(default)]
  pub param: String,

  /// Return `None` on exhaustion instead of terminating the process.
  #[serde(default)]
  pub allow_oom: bool,
}

impl ArenaConfig {
  pub fn new(
    size: u64,
    description: impl Into<String>,
    param: impl Into<String>,
  ) -> Self {
    Self {
      shm_key: None,
      lock: false,
      size,
      description: description.into(),
      param: param.into(),
      allow_oom: false,
    }
  }

  pub fn with_shm_key(
    mut self,
    key: i32,
  ) -> Self {
    self.shm_key = Some(key);
    self
  }

  pub fn with_lock(
    mut self,
    lock: bool,
  ) -> Self {
    self.lock = lock;
    self
  }

  pub fn with_allow_oom(
    mut self,
    allow_oom: bool,
  ) -> Self {
    self.allow_oom = allow_oom;
    self
  }

  /// Loads a configuration from a YAML file, overridden by `SHMARENA_*`
  /// environment variables.
  pub fn load_from_path<P: AsRef<Path>>(
    path: P,
  ) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    if !path.exists() {
      return Err(ConfigError::FileNotFound(PathBuf::from(path)));
    }

    let config: Self = Figment::new()
      .merge(Yaml::file(path))
      .merge(Env::prefixed("SHMARENA_"))
      .extract()?;

    config.validate()?;
    Ok(config)
  }
}

/// Parses `"4096"`, `"16K"`, `"64M"`, `"2G"` or `"1T"` into bytes.
pub fn parse_size(
  value: &str,
) -> Result<u64, ConfigError> {
  let value = value.trim();
  let invalid = || ConfigError::Size(value.to_string());

  let (digits, factor) = match value.char_indices().last() {
    Some((at, 'K' | 'k')) => (&value[..at], 1u64 << 10),
    Some((at, 'M' | 'm')) => (&value[..at], 1 << 20),
    Some((at, 'G' | 'g')) => (&value[..at], 1 << 30),
    Some((at, 'T' | 't')) => (&value[..at], 1 << 40),
    Some(_) => (value, 1),
    None => return Err(invalid()),
  };

  digits
    .parse::<u64>()
    .ok()
    .and_then(|number| number.checked_mul(factor))
    .ok_or_else(invalid)
}

fn deserialize_size<'de, D>(
  deserializer: D,
) -> Result<u64, D::Error>
where
  D: Deserializer<'de>,
{
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum Size {
    Bytes(u64),
    Text(String),
  }

  match Size::deserialize(deserializer)? {
    Size::Bytes(bytes) => Ok(bytes),
    Size::Text(text) => parse_size(&text).map_err(serde::de::Error::custom),
  }
}

const _: () = assert!(MEM_MIN_SIZE == 128 && MEM_MAX_SIZE == 68_719_476_736);
