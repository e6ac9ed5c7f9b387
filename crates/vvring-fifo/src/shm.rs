//! Shared memory backing for frame rings.
//!
//! A region is laid out as a [`SharedCounters`] header followed by the frame
//! storage. One process creates the region and writes frames; another opens
//! it by name and reads them. Both attach a [`RingBuffer`] driven by an
//! [`IndirectIndex`] over the counters in the header.

use std::ffi::CString;
use std::io;
use std::mem::{MaybeUninit, size_of};
use std::os::unix::io::RawFd;
use std::ptr::NonNull;

use vvring_core::{Error, Frames, Result, frames_to_bytes};

use crate::buffer::{BorrowedStorage, RingBuffer};
use crate::index::{IndirectIndex, SharedCounters};

/// Mapped POSIX shared memory region
pub struct SharedRegion {
    /// Platform-specific file descriptor
    fd: RawFd,

    /// Pointer to mapped memory
    ptr: NonNull<u8>,

    /// Size of the memory region
    size: usize,

    /// Name of the shared memory region (for cleanup)
    name: CString,

    /// Only the creator unlinks the name on drop
    owner: bool,
}

impl SharedRegion {
    /// Create a new shared memory region, zero-filled
    #[allow(unsafe_code)]
    pub fn create(name: &str, size: usize) -> Result<Self> {
        let c_name = shm_name(name)?;
        // Checked before the name exists so a failure leaves nothing behind
        let length = libc::off_t::try_from(size)
            .map_err(|_| Error::SharedMemory(format!("Region size {size} is too large")))?;

        // SAFETY: c_name is a valid NUL-terminated string
        let fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o600, // Owner read/write only
            )
        };

        if fd < 0 {
            return Err(Error::SharedMemory(format!(
                "Failed to create shared memory {name}: {}",
                io::Error::last_os_error()
            )));
        }

        // SAFETY: fd was just opened read/write
        if unsafe { libc::ftruncate(fd, length) } != 0 {
            let err = io::Error::last_os_error();
            // SAFETY: fd is open and c_name names the object we just created
            unsafe {
                libc::close(fd);
                libc::shm_unlink(c_name.as_ptr());
            }
            return Err(Error::SharedMemory(format!(
                "Failed to set shared memory size: {err}"
            )));
        }

        let region = Self::map(fd, size, c_name, true)?;
        tracing::debug!(name, size, "Created shared memory region");
        Ok(region)
    }

    /// Open an existing shared memory region.
    ///
    /// Fails if the object is smaller than `size`, so a mismatched layout
    /// cannot map pages past its end.
    #[allow(unsafe_code)]
    pub fn open(name: &str, size: usize) -> Result<Self> {
        let c_name = shm_name(name)?;

        // SAFETY: c_name is a valid NUL-terminated string
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0o600) };

        if fd < 0 {
            return Err(Error::SharedMemory(format!(
                "Failed to open shared memory {name}: {}",
                io::Error::last_os_error()
            )));
        }

        let actual = match object_size(fd) {
            Ok(actual) if actual >= size => actual,
            result => {
                // SAFETY: fd was opened above and is not used afterwards
                unsafe { libc::close(fd) };
                return Err(Error::SharedMemory(match result {
                    Ok(actual) => format!(
                        "Shared memory {name} holds {actual} bytes but {size} are required"
                    ),
                    Err(err) => format!("Failed to stat shared memory {name}: {err}"),
                }));
            }
        };
        tracing::trace!(name, actual, size, "Shared memory object size checked");

        let region = Self::map(fd, size, c_name, false)?;
        tracing::debug!(name, size, "Opened shared memory region");
        Ok(region)
    }

    #[allow(unsafe_code)]
    fn map(fd: RawFd, size: usize, name: CString, owner: bool) -> Result<Self> {
        // SAFETY: fd is an open shared memory object of at least `size` bytes
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

        let mapped = if ptr == libc::MAP_FAILED {
            None
        } else {
            NonNull::new(ptr.cast::<u8>())
        };

        let Some(ptr) = mapped else {
            let err = io::Error::last_os_error();
            // SAFETY: fd is open; only the creator removes the name
            unsafe {
                libc::close(fd);
                if owner {
                    libc::shm_unlink(name.as_ptr());
                }
            }
            return Err(Error::SharedMemory(format!(
                "Failed to map shared memory: {err}"
            )));
        };

        Ok(Self {
            fd,
            ptr,
            size,
            name,
            owner,
        })
    }

    /// Base address of the mapping
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Get the size of the shared memory region
    pub fn size(&self) -> usize {
        self.size
    }

    /// Get the name of the shared memory region
    pub fn name(&self) -> &str {
        self.name.to_str().unwrap_or_default()
    }

    /// Whether this handle created the region
    pub fn is_owner(&self) -> bool {
        self.owner
    }
}

impl Drop for SharedRegion {
    #[allow(unsafe_code)]
    fn drop(&mut self) {
        // SAFETY: ptr/size describe our own mapping and fd is still open
        unsafe {
            libc::munmap(self.ptr.as_ptr().cast(), self.size);
            libc::close(self.fd);

            if self.owner {
                libc::shm_unlink(self.name.as_ptr());
            }
        }
    }
}

// Shared memory is explicitly designed to be shared between processes
#[allow(unsafe_code)]
unsafe impl Send for SharedRegion {}
#[allow(unsafe_code)]
unsafe impl Sync for SharedRegion {}

/// Current size of the object behind `fd`
#[allow(unsafe_code)]
fn object_size(fd: RawFd) -> io::Result<usize> {
    let mut stat = MaybeUninit::<libc::stat>::uninit();

    // SAFETY: fd is open and `stat` is large enough for the kernel to fill
    if unsafe { libc::fstat(fd, stat.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: fstat succeeded, so the struct is initialized
    let stat = unsafe { stat.assume_init() };
    usize::try_from(stat.st_size).map_err(|_| io::Error::from(io::ErrorKind::InvalidData))
}

fn shm_name(name: &str) -> Result<CString> {
    CString::new(name)
        .map_err(|e| Error::SharedMemory(format!("Invalid shared memory name: {e}")))
}

/// Frame ring living in a named shared memory region.
pub struct SharedRing {
    region: SharedRegion,
    bytes_per_frame: usize,
    capacity: Frames,
}

impl SharedRing {
    /// Bytes needed for the header plus `capacity` frames
    pub fn region_size(bytes_per_frame: usize, capacity: Frames) -> Result<usize> {
        if bytes_per_frame == 0 {
            return Err(Error::InvalidFrameSize);
        }
        if capacity == 0 {
            return Err(Error::InvalidCapacity);
        }
        frames_to_bytes(capacity, bytes_per_frame)?
            .checked_add(size_of::<SharedCounters>())
            .ok_or(Error::ByteCountOverflow {
                frames: capacity,
                bytes_per_frame,
            })
    }

    /// Create the region (producer side, by convention)
    pub fn create(name: &str, bytes_per_frame: usize, capacity: Frames) -> Result<Self> {
        let size = Self::region_size(bytes_per_frame, capacity)?;
        Ok(Self {
            region: SharedRegion::create(name, size)?,
            bytes_per_frame,
            capacity,
        })
    }

    /// Open a region created elsewhere with the same layout
    pub fn open(name: &str, bytes_per_frame: usize, capacity: Frames) -> Result<Self> {
        let size = Self::region_size(bytes_per_frame, capacity)?;
        Ok(Self {
            region: SharedRegion::open(name, size)?,
            bytes_per_frame,
            capacity,
        })
    }

    /// The underlying mapping
    pub fn region(&self) -> &SharedRegion {
        &self.region
    }

    /// Counters stored in the region header
    #[allow(unsafe_code)]
    pub fn counters(&self) -> &SharedCounters {
        // SAFETY: the mapping is page aligned, at least header-sized, and the
        // all-zero pattern written by ftruncate is a valid SharedCounters
        unsafe { &*self.region.as_ptr().as_ptr().cast::<SharedCounters>() }
    }

    /// Attach a ring buffer over the shared counters and storage.
    ///
    /// `open` has already checked that the object covers this layout.
    ///
    /// # Safety
    ///
    /// Across every process attached to the region there must be at most one
    /// caller of the write operations and at most one caller of the read
    /// operations at any time. No process may shrink the object while it is
    /// mapped.
    #[allow(unsafe_code)]
    pub unsafe fn attach(&self) -> Result<RingBuffer<IndirectIndex<'_>, BorrowedStorage<'_>>> {
        let index = IndirectIndex::from_counters(self.capacity, self.counters())?;
        let data_len = frames_to_bytes(self.capacity, self.bytes_per_frame)?;

        // SAFETY: the storage directly follows the header inside the mapping
        // and lives as long as `self`.
        unsafe {
            let data = self
                .region
                .as_ptr()
                .add(size_of::<SharedCounters>());
            let storage = BorrowedStorage::from_raw_parts(data, data_len);
            RingBuffer::from_parts(index, storage, self.bytes_per_frame)
        }
    }
}
