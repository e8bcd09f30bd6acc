//! Typed POSIX shared-memory mapper.
//!
//! Wraps `shm_open` / `ftruncate` / `mmap` for the segment structs used by
//! this crate. The mapper is purely mechanical: the caller validates names
//! and decides roles. The creator truncates the object to the struct size
//! and runs the in-place initializer; openers do neither. The descriptor is
//! closed right after mapping — the mapping survives it.
//!
//! Dropping a region only unmaps. Unlinking is a separate, explicit act
//! because exactly one party per segment is the destroyer: the server
//! unlinks channels and the registry; workers never unlink anything, which
//! prevents a worker racing the reactor's still-live mapping.

use std::ffi::CString;
use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::error::{KschedError, KschedResult};

/// Segment structs that know how to reset themselves in place after the
/// creator maps a fresh (zero-filled) object.
pub trait ShmSegment {
    fn init(&self);
}

/// A mapped shared-memory segment holding exactly one `T`.
pub struct ShmRegion<T> {
    ptr: NonNull<T>,
    name: String,
    owner: bool,
    _marker: PhantomData<T>,
}

impl<T> std::fmt::Debug for ShmRegion<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmRegion")
            .field("ptr", &self.ptr)
            .field("name", &self.name)
            .field("owner", &self.owner)
            .finish()
    }
}

// SAFETY: the mapping is plain process memory; whether &T may be shared
// across threads is exactly T's own Sync question.
unsafe impl<T: Sync> Send for ShmRegion<T> {}
unsafe impl<T: Sync> Sync for ShmRegion<T> {}

impl<T: ShmSegment> ShmRegion<T> {
    /// Create (or open) the named segment, size it, map it, and run the
    /// in-place initializer. Server role for the registry, worker role for
    /// channels.
    pub fn create(name: &str) -> KschedResult<Self> {
        let region = Self::attach(name, true)?;
        region.get().init();
        Ok(region)
    }

    /// Open an existing segment without initializing it.
    ///
    /// Fails with `SegmentOpen` if the object does not exist yet — for
    /// channel adoption that is a transient condition retried on the next
    /// registry scan.
    pub fn open(name: &str) -> KschedResult<Self> {
        Self::attach(name, false)
    }

    fn attach(name: &str, create: bool) -> KschedResult<Self> {
        let c_name = CString::new(name)
            .map_err(|_| KschedError::memory(format!("segment name contains NUL: {name:?}")))?;

        let mut flags = libc::O_RDWR;
        if create {
            flags |= libc::O_CREAT;
        }

        // SAFETY: c_name is a valid NUL-terminated string; flags and mode
        // are valid POSIX constants
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), flags, 0o666) };
        if fd < 0 {
            return Err(KschedError::segment_open(name));
        }

        let size = std::mem::size_of::<T>();
        if create {
            // SAFETY: fd is a valid descriptor from shm_open above
            if unsafe { libc::ftruncate(fd, size as libc::off_t) } != 0 {
                let err = KschedError::segment_open(name);
                // SAFETY: fd is a valid descriptor
                unsafe { libc::close(fd) };
                return Err(err);
            }
        }

        // SAFETY: fd is valid, size > 0, and the protection/flags are valid
        // POSIX mmap constants
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        // SAFETY: fd is a valid descriptor; the mapping outlives it
        unsafe { libc::close(fd) };

        if ptr == libc::MAP_FAILED {
            return Err(KschedError::memory(format!(
                "mmap of {size} bytes failed for '{name}': {}",
                std::io::Error::last_os_error()
            )));
        }

        Ok(Self {
            // SAFETY: mmap returned a non-MAP_FAILED pointer, page aligned,
            // which satisfies T's alignment for the repr(C) segment structs
            ptr: unsafe { NonNull::new_unchecked(ptr as *mut T) },
            name: name.to_string(),
            owner: create,
            _marker: PhantomData,
        })
    }

    /// Reference into the mapped segment.
    #[inline]
    pub fn get(&self) -> &T {
        // SAFETY: the mapping is valid for the lifetime of self, properly
        // aligned, and all interior mutability goes through atomics or
        // UnsafeCell inside T
        unsafe { self.ptr.as_ref() }
    }

    /// Segment name this region was attached under.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this handle created the segment.
    #[inline]
    pub fn is_owner(&self) -> bool {
        self.owner
    }

    /// Remove the named segment from the OS namespace.
    ///
    /// Existing mappings stay valid until unmapped; only the designated
    /// destroyer (the server) may call this.
    pub fn unlink(name: &str) -> KschedResult<()> {
        let c_name = CString::new(name)
            .map_err(|_| KschedError::memory(format!("segment name contains NUL: {name:?}")))?;
        // SAFETY: c_name is a valid NUL-terminated string
        if unsafe { libc::shm_unlink(c_name.as_ptr()) } != 0 {
            return Err(KschedError::segment_open(name));
        }
        Ok(())
    }
}

impl<T> Drop for ShmRegion<T> {
    fn drop(&mut self) {
        // SAFETY: ptr/size describe the mapping established in attach
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, std::mem::size_of::<T>());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[repr(C)]
    struct Counter {
        value: AtomicU64,
    }

    impl ShmSegment for Counter {
        fn init(&self) {
            self.value.store(0, Ordering::Relaxed);
        }
    }

    fn unique_name(tag: &str) -> String {
        format!("/ksched_test_shm_{}_{}", tag, std::process::id())
    }

    #[test]
    fn create_then_open_shares_state() {
        let name = unique_name("share");
        let creator = ShmRegion::<Counter>::create(&name).unwrap();
        assert!(creator.is_owner());
        creator.get().value.store(42, Ordering::Release);

        let opener = ShmRegion::<Counter>::open(&name).unwrap();
        assert!(!opener.is_owner());
        assert_eq!(opener.get().value.load(Ordering::Acquire), 42);

        drop(opener);
        drop(creator);
        ShmRegion::<Counter>::unlink(&name).unwrap();
    }

    #[test]
    fn open_missing_segment_fails() {
        let err = ShmRegion::<Counter>::open("/ksched_test_shm_never_created").unwrap_err();
        assert!(matches!(err, KschedError::SegmentOpen { .. }));
    }

    #[test]
    fn unlink_removes_from_namespace() {
        let name = unique_name("unlink");
        let region = ShmRegion::<Counter>::create(&name).unwrap();
        ShmRegion::<Counter>::unlink(&name).unwrap();
        // The live mapping is unaffected
        region.get().value.store(7, Ordering::Release);
        // but the name is gone
        assert!(ShmRegion::<Counter>::open(&name).is_err());
    }

    #[test]
    fn mapping_survives_descriptor_close() {
        // attach closes the fd before returning; writing afterwards proves
        // the mapping does not depend on it
        let name = unique_name("fdclose");
        let region = ShmRegion::<Counter>::create(&name).unwrap();
        region.get().value.fetch_add(1, Ordering::AcqRel);
        assert_eq!(region.get().value.load(Ordering::Acquire), 1);
        drop(region);
        ShmRegion::<Counter>::unlink(&name).unwrap();
    }
}
