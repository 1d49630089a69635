//! Backing memory for an arena.
//!
//! A region is one fixed-size, page-aligned byte range. Everything inside it
//! is addressed by offset from its base, never by raw address, so processes
//! that map the same segment at different addresses agree on its contents.

use std::{io, ptr, ptr::NonNull};

use libc::{c_int, c_void, key_t};

/// How the bytes of a region were obtained.
enum Backing {
  /// `MAP_SHARED | MAP_ANONYMOUS`: private to this process tree, inherited
  /// by forked children.
  Anonymous,
  /// System V segment identified by a key.
  SysV { shmid: c_int },
}

pub(crate) struct Region {
  base: NonNull<u8>,
  len: usize,
  backing: Backing,
}

// All access to the region goes through raw pointers and is serialized by
// the arena lock.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
  /// Maps an anonymous shared region of `len` bytes.
  pub(crate) fn anonymous(
    len: usize,
  ) -> io::Result<Self> {
    let addr = unsafe {
      libc::mmap(
        ptr::null_mut(),
        len,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_SHARED | libc::MAP_ANONYMOUS,
        -1,
        0,
      )
    };

    if addr == libc::MAP_FAILED {
      return Err(io::Error::last_os_error());
    }

    let base = NonNull::new(addr as *mut u8)
      .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "null from mmap"))?;

    Ok(Self {
      base,
      len,
      backing: Backing::Anonymous,
    })
  }

  /// Creates and attaches a System V segment of `len` bytes under `key`.
  ///
  /// A segment left behind under the same key by a previous run is removed
  /// and created anew.
  pub(crate) fn sysv(
    key: key_t,
    len: usize,
  ) -> io::Result<Self> {
    let shmid = match shm_create(key, len) {
      Ok(shmid) => shmid,
      Err(err) if err.raw_os_error() == Some(libc::EEXIST) => {
        tracing::warn!(
          key = %format!("{key:#x}"),
          "shared memory already exists, trying to recreate"
        );

        let stale = unsafe { libc::shmget(key, 0, 0) };
        if stale == -1 {
          return Err(io::Error::last_os_error());
        }
        if unsafe { libc::shmctl(stale, libc::IPC_RMID, ptr::null_mut()) } == -1 {
          return Err(io::Error::last_os_error());
        }

        shm_create(key, len)?
      }
      Err(err) => return Err(err),
    };

    let addr = unsafe { libc::shmat(shmid, ptr::null(), 0) };

    if addr as isize == -1 {
      let err = io::Error::last_os_error();
      unsafe { libc::shmctl(shmid, libc::IPC_RMID, ptr::null_mut()) };
      return Err(err);
    }

    let base = NonNull::new(addr as *mut u8)
      .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "null from shmat"))?;

    Ok(Self {
      base,
      len,
      backing: Backing::SysV { shmid },
    })
  }

  pub(crate) fn len(
    &self,
  ) -> usize {
    self.len
  }

  /// Marks a System V segment for removal once every process has detached.
  /// Anonymous mappings vanish with their last mapping and need nothing.
  pub(crate) fn remove(
    &self,
  ) -> io::Result<()> {
    if let Backing::SysV { shmid } = self.backing {
      if unsafe { libc::shmctl(shmid, libc::IPC_RMID, ptr::null_mut()) } == -1 {
        return Err(io::Error::last_os_error());
      }
    }

    Ok(())
  }

  /// Removes the backing memory, logging a failure instead of returning it.
  pub(crate) fn discard(
    &self,
    description: &str,
  ) {
    if let Err(err) = self.remove() {
      tracing::warn!(error = %err, description, "cannot remove shared memory");
    }
  }

  /// Local address of `offset`.
  #[inline]
  pub(crate) fn ptr(
    &self,
    offset: u64,
  ) -> *mut u8 {
    debug_assert!(offset as usize <= self.len);
    unsafe { self.base.as_ptr().add(offset as usize) }
  }

  #[inline]
  pub(crate) fn read_u64(
    &self,
    offset: u64,
  ) -> u64 {
    debug_assert!(offset % 8 == 0 && offset as usize + 8 <= self.len);
    unsafe { self.ptr(offset).cast::<u64>().read() }
  }

  #[inline]
  pub(crate) fn write_u64(
    &self,
    offset: u64,
    value: u64,
  ) {
    debug_assert!(offset % 8 == 0 && offset as usize + 8 <= self.len);
    unsafe { self.ptr(offset).cast::<u64>().write(value) }
  }

  /// Copies `len` bytes between two ranges of the region; they may overlap.
  pub(crate) fn copy_within(
    &self,
    src: u64,
    dst: u64,
    len: u64,
  ) {
    debug_assert!((src + len) as usize <= self.len && (dst + len) as usize <= self.len);
    unsafe { ptr::copy(self.ptr(src), self.ptr(dst), len as usize) }
  }

  pub(crate) fn write_bytes(
    &self,
    offset: u64,
    data: &[u8],
  ) {
    debug_assert!(offset as usize + data.len() <= self.len);
    unsafe { ptr::copy_nonoverlapping(data.as_ptr(), self.ptr(offset), data.len()) }
  }

  pub(crate) fn read_bytes(
    &self,
    offset: u64,
    buf: &mut [u8],
  ) {
    debug_assert!(offset as usize + buf.len() <= self.len);
    unsafe { ptr::copy_nonoverlapping(self.ptr(offset), buf.as_mut_ptr(), buf.len()) }
  }

  pub(crate) fn fill(
    &self,
    offset: u64,
    len: u64,
    byte: u8,
  ) {
    debug_assert!((offset + len) as usize <= self.len);
    unsafe { ptr::write_bytes(self.ptr(offset), byte, len as usize) }
  }
}

impl Drop for Region {
  fn drop(
    &mut self,
  ) {
    let addr = self.base.as_ptr() as *mut c_void;

    let rc = match self.backing {
      Backing::Anonymous => unsafe { libc::munmap(addr, self.len) },
      Backing::SysV { .. } => unsafe { libc::shmdt(addr) },
    };

    if rc == -1 {
      tracing::warn!(
        error = %io::Error::last_os_error(),
        "cannot detach shared memory region"
      );
    }
  }
}

fn shm_create(
  key: key_t,
  len: usize,
) -> io::Result<c_int> {
  let shmid = unsafe { libc::shmget(key, len, libc::IPC_CREAT | libc::IPC_EXCL | 0o600) };

  if shmid == -1 {
    Err(io::Error::last_os_error())
  } else {
    Ok(shmid)
  }
}

#[cfg(test)]
mod tests {
  use tracing_test::traced_test;

  use super::*;

  #[test]
  fn test_anonymous_region_is_zeroed_and_aligned() {
    let region = Region::anonymous(4096).unwrap();

    assert_eq!(region.len(), 4096);
    assert_eq!(region.ptr(0) as usize % 8, 0);

    for offset in (0..4096).step_by(8) {
      assert_eq!(region.read_u64(offset), 0);
    }
  }

  #[test]
  fn test_read_write_u64() {
    let region = Region::anonymous(4096).unwrap();

    region.write_u64(8, 0xDEAD_BEEF);
    region.write_u64(4088, u64::MAX);

    assert_eq!(region.read_u64(8), 0xDEAD_BEEF);
    assert_eq!(region.read_u64(4088), u64::MAX);
    assert_eq!(region.read_u64(16), 0);
  }

  #[test]
  fn test_bytes_and_copy_within() {
    let region = Region::anonymous(4096).unwrap();

    region.write_bytes(100, b"boundary");
    region.copy_within(100, 200, 8);

    let mut buf = [0u8; 8];
    region.read_bytes(200, &mut buf);
    assert_eq!(&buf, b"boundary");

    region.fill(200, 8, 0);
    region.read_bytes(200, &mut buf);
    assert_eq!(buf, [0u8; 8]);
  }

  #[test]
  fn test_sysv_private_segment() {
    let region = Region::sysv(libc::IPC_PRIVATE, 8192).unwrap();

    region.write_u64(0, 42);
    assert_eq!(region.read_u64(0), 42);

    region.remove().unwrap();
  }

  #[traced_test]
  #[test]
  fn test_discard_logs_failed_removal() {
    let mut region = Region::sysv(libc::IPC_PRIVATE, 8192).unwrap();
    let Backing::SysV { shmid } = region.backing else {
      panic!("expected a System V region");
    };

    region.backing = Backing::SysV { shmid: -1 };
    region.discard("broken segment");
    assert!(logs_contain("cannot remove shared memory"));

    region.backing = Backing::SysV { shmid };
    region.remove().unwrap();
  }
}
