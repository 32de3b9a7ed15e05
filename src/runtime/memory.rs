//! Read/write/execute memory block owned by one runtime object

use crate::error::{Error, Result};

/// Anonymous mapping with read, write and execute permission
#[derive(Debug)]
pub struct ExecutableMemory {
    ptr: *mut u8,
    len: usize,
}

// The mapping is owned exclusively; moving it between threads is fine, sharing is not.
unsafe impl Send for ExecutableMemory {}

impl ExecutableMemory {
    /// Maps at least `len` zeroed bytes
    #[cfg(all(unix, target_arch = "x86_64"))]
    pub fn new(len: usize) -> Result<Self> {
        let page = page_size();
        let len = len.max(1).div_ceil(page) * page;

        // SAFETY: anonymous private mapping with no address hint; the result is checked
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(Error::ExecutableMemory {
                message: format!(
                    "mmap of {} bytes failed: {}",
                    len,
                    std::io::Error::last_os_error()
                ),
            });
        }

        Ok(ExecutableMemory {
            ptr: ptr.cast(),
            len,
        })
    }

    /// Executable memory is only available on x86-64 unix hosts
    #[cfg(not(all(unix, target_arch = "x86_64")))]
    pub fn new(len: usize) -> Result<Self> {
        Err(Error::ExecutableMemory {
            message: format!(
                "cannot map {} executable bytes: generated code needs an x86-64 unix host",
                len
            ),
        })
    }

    /// Mapped size, a whole number of pages
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false; a mapping is at least one page
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Address of the first byte
    pub fn base(&self) -> *const u8 {
        self.ptr
    }

    /// Whole block
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid for len bytes for the lifetime of self
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    /// Whole block, mutably
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: ptr is valid for len bytes and &mut self guarantees exclusivity
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }

    /// Copies `bytes` to `offset`
    pub fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let end = offset
            .checked_add(bytes.len())
            .filter(|end| *end <= self.len)
            .ok_or_else(|| Error::ExecutableMemory {
                message: format!("write of {} bytes at {} is outside the block", bytes.len(), offset),
            })?;
        self.as_mut_slice()[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Borrows `len` bytes at `offset`
    pub fn read(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= self.len)
            .ok_or_else(|| Error::ExecutableMemory {
                message: format!("read of {} bytes at {} is outside the block", len, offset),
            })?;
        Ok(&self.as_slice()[offset..end])
    }

    /// Calls the code at `offset` as a function with no arguments.
    ///
    /// # Safety
    ///
    /// `offset` must be the start of a complete generated function that returns
    /// with `ret` and only clobbers registers the sysv64 ABI treats as caller saved.
    #[cfg(all(unix, target_arch = "x86_64"))]
    pub unsafe fn call(&self, offset: usize) -> Result<()> {
        if offset >= self.len {
            return Err(Error::ExecutableMemory {
                message: format!("entry offset {} is outside the block", offset),
            });
        }
        let entry: extern "sysv64" fn() = std::mem::transmute(self.ptr.add(offset));
        entry();
        Ok(())
    }

    /// Calls the code at `offset`; never succeeds off x86-64 unix
    ///
    /// # Safety
    ///
    /// Nothing is executed on this target.
    #[cfg(not(all(unix, target_arch = "x86_64")))]
    pub unsafe fn call(&self, offset: usize) -> Result<()> {
        Err(Error::ExecutableMemory {
            message: format!("cannot call entry at {} on this host", offset),
        })
    }
}

impl Drop for ExecutableMemory {
    fn drop(&mut self) {
        #[cfg(all(unix, target_arch = "x86_64"))]
        // SAFETY: ptr and len are exactly what mmap returned
        unsafe {
            libc::munmap(self.ptr.cast(), self.len);
        }
    }
}

#[cfg(all(unix, target_arch = "x86_64"))]
fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        4096
    }
}

#[cfg(all(test, unix, target_arch = "x86_64"))]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_is_zeroed_and_page_sized() {
        let memory = ExecutableMemory::new(10).unwrap();
        assert!(memory.len() >= 10);
        assert_eq!(memory.len() % page_size(), 0);
        assert!(memory.as_slice().iter().all(|b| *b == 0));
    }

    #[test]
    fn test_bounds_are_checked() {
        let mut memory = ExecutableMemory::new(16).unwrap();
        memory.write(4, &[1, 2, 3]).unwrap();
        assert_eq!(memory.read(4, 3).unwrap(), &[1, 2, 3]);

        let len = memory.len();
        assert!(memory.write(len - 1, &[0, 0]).is_err());
        assert!(memory.read(len, 1).is_err());
    }

    #[test]
    fn test_call_runs_code() {
        let mut memory = ExecutableMemory::new(16).unwrap();
        // ret
        memory.write(0, &[0xC3]).unwrap();
        unsafe { memory.call(0).unwrap() };
    }
}
