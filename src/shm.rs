// POSIX shared memory block exchanged between the control process and one device worker
//
// The block is an array of f64 slots stored as AtomicU64 bit patterns. There is
// no lock: every slot range has exactly one writer for the life of the block,
// and readers only take whole-block copies. A copy may interleave old and new
// values across two owners' ranges, never within one `write_range` call's
// slots as seen after that call returns.
//
// By convention the last slot is the error flag (1.0 = fault / not ready).

use std::ffi::CString;
use std::io;
use std::ops::Range;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use tracing::{debug, warn};

const SLOT_SIZE: usize = std::mem::size_of::<AtomicU64>();

/// Error flag values
pub const FLAG_OK: f64 = 0.0;
pub const FLAG_FAULT: f64 = 1.0;

static NEXT_ID: AtomicU32 = AtomicU32::new(0);

#[derive(Debug, thiserror::Error)]
pub enum ShmError {
    #[error("Invalid shared memory name {0:?}")]
    InvalidName(String),

    #[error("Shared memory block needs at least one slot for the error flag")]
    Empty,

    #[error("Failed to create shared memory {name}: {source}")]
    Create { name: String, source: io::Error },

    #[error("Failed to attach shared memory {name}: {source}")]
    Attach { name: String, source: io::Error },

    #[error("Failed to size shared memory {name}: {source}")]
    Resize { name: String, source: io::Error },

    #[error("Failed to map shared memory {name}: {source}")]
    Map { name: String, source: io::Error },

    #[error("Shared memory {name} holds {actual} bytes, need {expected}")]
    TooSmall {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("Slot range {range:?} is outside a {len}-slot block")]
    OutOfBounds { range: Range<usize>, len: usize },

    #[error("Slot range {range:?} needs {expected} values, got {actual}")]
    LengthMismatch {
        range: Range<usize>,
        expected: usize,
        actual: usize,
    },
}

pub type Result<T> = std::result::Result<T, ShmError>;

/// A mapped shared state block
///
/// The creating side owns the name and unlinks it on [`destroy`](Self::destroy)
/// or drop. The attaching side only unmaps.
pub struct SharedStateChannel {
    name: String,
    ptr: NonNull<AtomicU64>,
    len: usize,
    owner: bool,
    unlinked: bool,
}

impl std::fmt::Debug for SharedStateChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedStateChannel")
            .field("name", &self.name)
            .field("len", &self.len)
            .field("owner", &self.owner)
            .finish()
    }
}

// SAFETY: the mapping is only accessed through atomics and lives until drop
unsafe impl Send for SharedStateChannel {}
unsafe impl Sync for SharedStateChannel {}

impl SharedStateChannel {
    /// Create a fresh zeroed block of `len` slots with the error flag raised
    pub fn create(prefix: &str, len: usize) -> Result<Self> {
        if len == 0 {
            return Err(ShmError::Empty);
        }

        let name = format!(
            "/car-{}-{}-{}",
            prefix,
            std::process::id(),
            NEXT_ID.fetch_add(1, Ordering::Relaxed)
        );
        let cname = c_name(&name)?;

        let fd = unsafe {
            libc::shm_open(
                cname.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o600 as libc::c_uint,
            )
        };
        if fd < 0 {
            return Err(ShmError::Create {
                name,
                source: io::Error::last_os_error(),
            });
        }

        let bytes = len * SLOT_SIZE;
        // ftruncate zero-fills the new object
        if unsafe { libc::ftruncate(fd, bytes as libc::off_t) } != 0 {
            let source = io::Error::last_os_error();
            unsafe {
                libc::close(fd);
                libc::shm_unlink(cname.as_ptr());
            }
            return Err(ShmError::Resize { name, source });
        }

        let mapped = map(fd, bytes);
        unsafe { libc::close(fd) };
        let ptr = match mapped {
            Ok(ptr) => ptr,
            Err(source) => {
                unsafe { libc::shm_unlink(cname.as_ptr()) };
                return Err(ShmError::Map { name, source });
            }
        };

        let channel = Self {
            name,
            ptr,
            len,
            owner: true,
            unlinked: false,
        };
        channel.slots()[len - 1].store(FLAG_FAULT.to_bits(), Ordering::Release);
        debug!("Created shared state {} ({} slots)", channel.name, len);
        Ok(channel)
    }

    /// Map an existing block created by another process
    pub fn attach(name: &str, len: usize) -> Result<Self> {
        if len == 0 {
            return Err(ShmError::Empty);
        }
        let cname = c_name(name)?;

        let fd = unsafe { libc::shm_open(cname.as_ptr(), libc::O_RDWR, 0 as libc::c_uint) };
        if fd < 0 {
            return Err(ShmError::Attach {
                name: name.to_string(),
                source: io::Error::last_os_error(),
            });
        }

        let bytes = len * SLOT_SIZE;
        let mut stat: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { libc::fstat(fd, &mut stat) } != 0 {
            let source = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(ShmError::Attach {
                name: name.to_string(),
                source,
            });
        }
        let actual = stat.st_size as usize;
        if actual < bytes {
            unsafe { libc::close(fd) };
            return Err(ShmError::TooSmall {
                name: name.to_string(),
                expected: bytes,
                actual,
            });
        }

        let mapped = map(fd, bytes);
        unsafe { libc::close(fd) };
        let ptr = mapped.map_err(|source| ShmError::Map {
            name: name.to_string(),
            source,
        })?;

        Ok(Self {
            name: name.to_string(),
            ptr,
            len,
            owner: false,
            unlinked: false,
        })
    }

    /// The handle passed to the attaching process
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn slots(&self) -> &[AtomicU64] {
        // SAFETY: ptr maps len slots for as long as self is alive
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Copy of the whole block
    pub fn read_snapshot(&self) -> Vec<f64> {
        self.slots()
            .iter()
            .map(|slot| f64::from_bits(slot.load(Ordering::Acquire)))
            .collect()
    }

    /// Read one slot
    pub fn read(&self, index: usize) -> Option<f64> {
        self.slots()
            .get(index)
            .map(|slot| f64::from_bits(slot.load(Ordering::Acquire)))
    }

    /// Overwrite a caller-owned slot range in one call
    pub fn write_range(&self, range: Range<usize>, values: &[f64]) -> Result<()> {
        if range.start > range.end || range.end > self.len {
            return Err(ShmError::OutOfBounds {
                range,
                len: self.len,
            });
        }
        if values.len() != range.len() {
            return Err(ShmError::LengthMismatch {
                expected: range.len(),
                actual: values.len(),
                range,
            });
        }

        for (slot, value) in self.slots()[range].iter().zip(values) {
            slot.store(value.to_bits(), Ordering::Release);
        }
        Ok(())
    }

    /// Overwrite a single caller-owned slot
    pub fn write(&self, index: usize, value: f64) -> Result<()> {
        self.write_range(index..index + 1, &[value])
    }

    /// Set the trailing error flag
    pub fn set_error(&self, faulted: bool) {
        let flag = if faulted { FLAG_FAULT } else { FLAG_OK };
        self.slots()[self.len - 1].store(flag.to_bits(), Ordering::Release);
    }

    /// Remove the name so no new process can attach. Safe to call repeatedly,
    /// and a name already removed elsewhere is not an error.
    ///
    /// The mapping itself is released when the handle drops.
    pub fn destroy(&mut self) {
        if self.unlinked {
            return;
        }
        self.unlinked = true;
        if let Err(e) = unlink(&self.name) {
            warn!("Failed to unlink shared state {}: {}", self.name, e);
        }
    }
}

impl Drop for SharedStateChannel {
    fn drop(&mut self) {
        if self.owner {
            self.destroy();
        }
        // SAFETY: ptr/len came from a successful mmap of this size
        unsafe {
            libc::munmap(self.ptr.as_ptr().cast(), self.len * SLOT_SIZE);
        }
    }
}

/// Unlink a block by name. A missing name counts as success.
pub fn unlink(name: &str) -> io::Result<()> {
    let cname = CString::new(name).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    if unsafe { libc::shm_unlink(cname.as_ptr()) } != 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ENOENT) {
            return Err(err);
        }
        debug!("Shared state {} already unlinked", name);
    }
    Ok(())
}

fn c_name(name: &str) -> Result<CString> {
    if !name.starts_with('/') || name[1..].contains('/') {
        return Err(ShmError::InvalidName(name.to_string()));
    }
    CString::new(name).map_err(|_| ShmError::InvalidName(name.to_string()))
}

fn map(fd: libc::c_int, bytes: usize) -> io::Result<NonNull<AtomicU64>> {
    let addr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            bytes,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            0,
        )
    };
    if addr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    NonNull::new(addr.cast::<AtomicU64>()).ok_or_else(|| io::Error::other("mmap returned null"))
}
