//! Process-shared mutex living inside the region header.

use std::{io, marker::PhantomData, mem::MaybeUninit};

use libc::pthread_mutex_t;

/// Handle to a `pthread_mutex_t` stored in shared memory.
///
/// The mutex itself is part of the region, so every process mapping the
/// region (including forked children) contends on the same lock.
pub(crate) struct ShmMutex {
  raw: *mut pthread_mutex_t,
}

impl ShmMutex {
  /// # Safety
  ///
  /// `raw` must point to suitably aligned memory that stays mapped for the
  /// lifetime of the handle.
  pub(crate) unsafe fn from_raw(
    raw: *mut pthread_mutex_t,
  ) -> Self {
    Self { raw }
  }

  /// Initializes the mutex with `PTHREAD_PROCESS_SHARED`.
  pub(crate) fn init(
    &self,
  ) -> io::Result<()> {
    unsafe {
      let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();

      check(libc::pthread_mutexattr_init(attr.as_mut_ptr()))?;

      let rc = libc::pthread_mutexattr_setpshared(attr.as_mut_ptr(), libc::PTHREAD_PROCESS_SHARED);
      let rc = if rc == 0 {
        libc::pthread_mutex_init(self.raw, attr.as_ptr())
      } else {
        rc
      };

      libc::pthread_mutexattr_destroy(attr.as_mut_ptr());
      check(rc)
    }
  }

  pub(crate) fn lock(
    &self,
  ) -> io::Result<ShmMutexGuard<'_>> {
    check(unsafe { libc::pthread_mutex_lock(self.raw) })?;

    Ok(ShmMutexGuard {
      raw: self.raw,
      _mutex: PhantomData,
    })
  }

  pub(crate) fn destroy(
    &self,
  ) -> io::Result<()> {
    check(unsafe { libc::pthread_mutex_destroy(self.raw) })
  }
}

/// Unlocks on drop.
pub(crate) struct ShmMutexGuard<'a> {
  raw: *mut pthread_mutex_t,
  _mutex: PhantomData<&'a ShmMutex>,
}

impl Drop for ShmMutexGuard<'_> {
  fn drop(
    &mut self,
  ) {
    unsafe { libc::pthread_mutex_unlock(self.raw) };
  }
}

fn check(
  rc: libc::c_int,
) -> io::Result<()> {
  if rc == 0 {
    Ok(())
  } else {
    Err(io::Error::from_raw_os_error(rc))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::region::Region;

  #[test]
  fn test_lock_unlock_in_region() {
    let region = Region::anonymous(4096).unwrap();
    let mutex = unsafe { ShmMutex::from_raw(region.ptr(0).cast()) };

    mutex.init().unwrap();

    {
      let _guard = mutex.lock().unwrap();
    }
    {
      let _guard = mutex.lock().unwrap();
    }

    mutex.destroy().unwrap();
  }
}
