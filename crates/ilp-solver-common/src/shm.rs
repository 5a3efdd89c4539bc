//! Named shared-memory segments.
//!
//! On Unix a segment is a POSIX shared memory object (`shm_open`) mapped
//! read-write into the process. The side that created the segment removes the
//! name when it drops it; every side unmaps its own mapping.

use thiserror::Error;

/// Shared memory failures.
#[derive(Debug, Error)]
pub enum ShmError {
    /// A segment with this name exists already.
    #[error("Shared memory segment {0} already exists")]
    AlreadyExists(String),

    /// No segment with this name exists.
    #[error("Shared memory segment {0} not found")]
    NotFound(String),

    /// Segments must have a nonzero size.
    #[error("Shared memory segment {0} is empty")]
    Empty(String),

    /// Any other operating system error.
    #[error("Shared memory {op} of {name} failed: {source}")]
    Os {
        op: &'static str,
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// Not implemented on this platform.
    #[error("Shared memory is not supported on this platform")]
    Unsupported,
}

#[cfg(unix)]
pub use unix::SharedMemory;

#[cfg(not(unix))]
pub use unsupported::SharedMemory;

#[cfg(unix)]
mod unix {
    use super::ShmError;
    use nix::errno::Errno;
    use nix::fcntl::OFlag;
    use nix::sys::mman::{mmap, munmap, shm_open, shm_unlink, MapFlags, ProtFlags};
    use nix::sys::stat::Mode;
    use std::ffi::c_void;
    use std::fs::File;
    use std::num::NonZeroUsize;
    use std::ptr::NonNull;
    use tracing::{debug, warn};

    /// A mapped shared-memory segment.
    #[derive(Debug)]
    pub struct SharedMemory {
        name: String,
        ptr: NonNull<u8>,
        len: usize,
        owner: bool,
    }

    // The mapping is plain memory owned by this handle.
    unsafe impl Send for SharedMemory {}

    fn posix_name(name: &str) -> String {
        format!("/{}", name)
    }

    fn os_error(op: &'static str, name: &str, errno: Errno) -> ShmError {
        ShmError::Os {
            op,
            name: name.to_string(),
            source: std::io::Error::from(errno),
        }
    }

    fn map(name: &str, file: &File, len: usize) -> Result<NonNull<u8>, ShmError> {
        let size = NonZeroUsize::new(len).ok_or_else(|| ShmError::Empty(name.to_string()))?;
        // SAFETY: fresh mapping of a file we hold open, not aliased by any
        // Rust reference in this process.
        let ptr = unsafe {
            mmap(
                None,
                size,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                file,
                0,
            )
        }
        .map_err(|e| os_error("mmap", name, e))?;
        Ok(ptr.cast())
    }

    impl SharedMemory {
        /// Create a new segment of `size` bytes, failing if the name is taken.
        pub fn create_only(name: &str, size: usize) -> Result<Self, ShmError> {
            if size == 0 {
                return Err(ShmError::Empty(name.to_string()));
            }
            let path = posix_name(name);
            let fd = shm_open(
                path.as_str(),
                OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
                Mode::S_IRUSR | Mode::S_IWUSR,
            )
            .map_err(|e| match e {
                Errno::EEXIST => ShmError::AlreadyExists(name.to_string()),
                e => os_error("create", name, e),
            })?;

            let segment = File::from(fd);
            let mapped = segment
                .set_len(size as u64)
                .map_err(|source| ShmError::Os {
                    op: "resize",
                    name: name.to_string(),
                    source,
                })
                .and_then(|()| map(name, &segment, size));

            match mapped {
                Ok(ptr) => {
                    debug!("Created shared memory {} ({} bytes)", name, size);
                    Ok(Self {
                        name: name.to_string(),
                        ptr,
                        len: size,
                        owner: true,
                    })
                }
                Err(e) => {
                    let _ = shm_unlink(path.as_str());
                    Err(e)
                }
            }
        }

        /// Map an existing segment created by another process.
        pub fn open_only(name: &str) -> Result<Self, ShmError> {
            let fd = shm_open(posix_name(name).as_str(), OFlag::O_RDWR, Mode::empty()).map_err(
                |e| match e {
                    Errno::ENOENT => ShmError::NotFound(name.to_string()),
                    e => os_error("open", name, e),
                },
            )?;

            let segment = File::from(fd);
            let len = segment
                .metadata()
                .map_err(|source| ShmError::Os {
                    op: "stat",
                    name: name.to_string(),
                    source,
                })?
                .len() as usize;
            let ptr = map(name, &segment, len)?;

            debug!("Opened shared memory {} ({} bytes)", name, len);
            Ok(Self {
                name: name.to_string(),
                ptr,
                len,
                owner: false,
            })
        }

        pub fn name(&self) -> &str {
            &self.name
        }

        pub fn len(&self) -> usize {
            self.len
        }

        pub fn is_empty(&self) -> bool {
            self.len == 0
        }

        pub fn as_slice(&self) -> &[u8] {
            // SAFETY: ptr is a live mapping of len bytes for the lifetime of self.
            unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
        }

        pub fn as_mut_slice(&mut self) -> &mut [u8] {
            // SAFETY: as above, and &mut self guarantees exclusive access
            // within this process.
            unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
        }
    }

    impl Drop for SharedMemory {
        fn drop(&mut self) {
            // SAFETY: the mapping was created by mmap with this length and no
            // slice borrowed from it outlives self.
            if let Err(e) = unsafe { munmap(self.ptr.cast::<c_void>(), self.len) } {
                warn!("Failed to unmap shared memory {}: {}", self.name, e);
            }
            if self.owner {
                if let Err(e) = shm_unlink(posix_name(&self.name).as_str()) {
                    warn!("Failed to remove shared memory {}: {}", self.name, e);
                }
            }
        }
    }
}

#[cfg(not(unix))]
mod unsupported {
    use super::ShmError;

    /// Placeholder on platforms without an implementation.
    #[derive(Debug)]
    pub struct SharedMemory {
        name: String,
    }

    impl SharedMemory {
        pub fn create_only(_name: &str, _size: usize) -> Result<Self, ShmError> {
            Err(ShmError::Unsupported)
        }

        pub fn open_only(_name: &str) -> Result<Self, ShmError> {
            Err(ShmError::Unsupported)
        }

        pub fn name(&self) -> &str {
            &self.name
        }

        pub fn len(&self) -> usize {
            0
        }

        pub fn is_empty(&self) -> bool {
            true
        }

        pub fn as_slice(&self) -> &[u8] {
            &[]
        }

        pub fn as_mut_slice(&mut self) -> &mut [u8] {
            &mut []
        }
    }
}
