//! This module allows one to read and patch memory of the current process
//!
//! Every write goes through a [`ProtGuard`], which lifts page protection for exactly
//! the bytes being written and puts the previous flags back when it drops.

mod guard;

use std::{mem, ptr};

use tracing::trace;

use crate::{scan::Pattern, Address, Prot, Region};

pub use guard::ProtGuard;

/// Single byte no-op instruction on x86
pub const NOP: u8 = 0x90;

/// An error for the [memory](crate::memory) module
#[derive(Debug, Clone, thiserror::Error)]
pub enum MemError {
    /// address is invalid
    #[error("bad address {0:#x}")]
    BadAddress(Address),
    /// memory at the address is reserved or free
    #[error("memory at {0:#x} is not committed")]
    NotCommitted(Address),
    /// a windows error
    #[cfg(windows)]
    #[error(transparent)]
    Windows(#[from] windows::core::Error),
    /// a page protection error
    #[cfg(not(windows))]
    #[error("{0}")]
    Region(String),
}

#[cfg(not(windows))]
impl From<region::Error> for MemError {
    fn from(value: region::Error) -> Self {
        Self::Region(value.to_string())
    }
}

/// Page protection backend
///
/// Everything that writes takes one of these so that the protection protocol can be
/// exercised without touching real page tables.
pub trait Protect {
    /// Current protection of `region`, or `None` if the span is not uniformly protected
    ///
    /// # Safety
    /// - `region` must lie in this process' address space
    unsafe fn query(&self, region: Region) -> Result<Option<Prot>, MemError>;

    /// Set the protection of `region`, returning the flags it had before
    ///
    /// # Safety
    /// - `region` must lie in this process' address space
    /// - lowering protection on memory something else is using may crash the process
    unsafe fn protect(&self, region: Region, prot: Prot) -> Result<Prot, MemError>;
}

/// The operating system's page protection
#[derive(Debug, Default, Copy, Clone)]
pub struct SystemProtect;

#[cfg(windows)]
impl Protect for SystemProtect {
    unsafe fn query(&self, region: Region) -> Result<Option<Prot>, MemError> {
        use windows::Win32::System::Memory::{VirtualQuery, MEMORY_BASIC_INFORMATION, MEM_COMMIT};

        let mut info = MEMORY_BASIC_INFORMATION::default();

        let written = unsafe {
            VirtualQuery(
                Some(region.base() as *const _),
                &mut info,
                mem::size_of::<MEMORY_BASIC_INFORMATION>(),
            )
        };

        if written == 0 {
            return Err(windows::core::Error::from_win32().into());
        }

        if info.State != MEM_COMMIT {
            return Err(MemError::NotCommitted(region.base()));
        }

        let end = info.BaseAddress as usize + info.RegionSize;
        if end < region.end() {
            // the span runs into pages with different attributes
            return Ok(None);
        }

        Ok(Some(info.Protect.into()))
    }

    unsafe fn protect(&self, region: Region, prot: Prot) -> Result<Prot, MemError> {
        use windows::Win32::System::Memory::{VirtualProtect, PAGE_PROTECTION_FLAGS};

        if region.base() == 0 {
            return Err(MemError::BadAddress(0));
        }

        let mut old_prot = PAGE_PROTECTION_FLAGS::default();

        unsafe {
            VirtualProtect(
                region.base() as *const _,
                region.len(),
                prot.into(),
                &mut old_prot,
            )?;
        }

        Ok(old_prot.into())
    }
}

#[cfg(not(windows))]
impl Protect for SystemProtect {
    unsafe fn query(&self, region: Region) -> Result<Option<Prot>, MemError> {
        let found = region::query(region.base() as *const u8)?;

        if found.as_range().end < region.end() {
            // the span runs into pages with different attributes
            return Ok(None);
        }

        Ok(Some(found.protection().into()))
    }

    unsafe fn protect(&self, region: Region, prot: Prot) -> Result<Prot, MemError> {
        if region.base() == 0 {
            return Err(MemError::BadAddress(0));
        }

        let old = region::query(region.base() as *const u8)?.protection();

        unsafe {
            region::protect(region.base() as *const u8, region.len(), prot.into())?;
        }

        Ok(old.into())
    }
}

/// Writes bytes into live memory, lifting page protection around every write
#[derive(Debug, Default, Copy, Clone)]
pub struct Patcher<P = SystemProtect> {
    protect: P,
}

impl Patcher {
    /// A patcher backed by the operating system's page protection
    pub const fn system() -> Self {
        Self {
            protect: SystemProtect,
        }
    }
}

impl<P: Protect> Patcher<P> {
    /// A patcher backed by a custom protection backend
    pub const fn with_protect(protect: P) -> Self {
        Self { protect }
    }

    /// The protection backend in use
    pub fn protect(&self) -> &P {
        &self.protect
    }

    /// Overwrite `bytes.len()` bytes at `dst`
    ///
    /// # Safety
    /// - `dst` must be valid for writes up to `bytes.len()` bytes
    /// - nothing else may be reading or executing those bytes during the write
    pub unsafe fn overwrite(&self, dst: Address, bytes: &[u8]) -> Result<(), MemError> {
        let Some(region) = span(dst, bytes.len())? else {
            return Ok(());
        };

        trace!("overwrite {} bytes at {dst:#x}", bytes.len());

        let _guard = unsafe { ProtGuard::acquire(&self.protect, region)? };

        unsafe {
            write_raw(bytes.as_ptr(), dst as *mut u8, bytes.len());
        }

        Ok(())
    }

    /// Overwrite the bytes at `dst`, leaving the destination byte untouched wherever
    /// `bytes` holds `None`
    ///
    /// # Safety
    /// - `dst` must be valid for reads and writes up to `bytes.len()` bytes
    /// - nothing else may be reading or executing those bytes during the write
    pub unsafe fn overwrite_masked(
        &self,
        dst: Address,
        bytes: &[Option<u8>],
    ) -> Result<(), MemError> {
        let Some(region) = span(dst, bytes.len())? else {
            return Ok(());
        };

        trace!("masked overwrite {} bytes at {dst:#x}", bytes.len());

        let _guard = unsafe { ProtGuard::acquire(&self.protect, region)? };

        let dst = dst as *mut u8;
        for (i, byte) in bytes.iter().enumerate() {
            if let Some(byte) = *byte {
                unsafe {
                    ptr::write_volatile(dst.add(i), byte);
                }
            }
        }

        Ok(())
    }

    /// Write a pattern to `dst`; wildcard positions are skipped
    ///
    /// # Safety
    /// Same as [`Patcher::overwrite_masked`] for `pattern.len()` bytes
    pub unsafe fn overwrite_pattern(&self, dst: Address, pattern: &Pattern) -> Result<(), MemError> {
        let bytes = pattern.iter().collect::<Vec<_>>();
        unsafe { self.overwrite_masked(dst, &bytes) }
    }

    /// Write a T to `dst`. `dst` does not need to be aligned
    ///
    /// # Safety
    /// - `dst` must be valid for writes up to `size_of::<T>()` bytes
    /// - nothing else may be reading or executing those bytes during the write
    pub unsafe fn write_value<T: Copy>(&self, dst: Address, value: T) -> Result<(), MemError> {
        let Some(region) = span(dst, mem::size_of::<T>())? else {
            return Ok(());
        };

        trace!("write {} byte value at {dst:#x}", mem::size_of::<T>());

        let _guard = unsafe { ProtGuard::acquire(&self.protect, region)? };

        unsafe {
            ptr::write_unaligned(dst as *mut T, value);
        }

        Ok(())
    }

    /// Fill `count` bytes at `dst` with [`NOP`]
    ///
    /// # Safety
    /// - `dst` must be valid for writes up to `count` bytes
    /// - nothing else may be executing those bytes during the write
    pub unsafe fn fill_with_nops(&self, dst: Address, count: usize) -> Result<(), MemError> {
        let Some(region) = span(dst, count)? else {
            return Ok(());
        };

        trace!("nop {count} bytes at {dst:#x}");

        let _guard = unsafe { ProtGuard::acquire(&self.protect, region)? };

        unsafe {
            ptr::write_bytes(dst as *mut u8, NOP, count);
        }

        Ok(())
    }
}

// Some(region) for a non-empty span, None when there is nothing to write
fn span(dst: Address, count: usize) -> Result<Option<Region>, MemError> {
    if dst == 0 {
        return Err(MemError::BadAddress(dst));
    }

    if count == 0 {
        return Ok(None);
    }

    Region::new(dst, count)
        .map(Some)
        .ok_or(MemError::BadAddress(dst))
}

/// Read a T from memory address. `src` does not need to be aligned
///
/// # Safety
/// - `src` must be valid for reads up to `size_of::<T>()` bytes
/// - memory at location must contain a valid bitpattern for T
pub unsafe fn read_value<T: Copy>(src: Address) -> T {
    debug_assert!(src != 0, "src must not be null");

    unsafe { ptr::read_unaligned(src as *const T) }
}

/// Read bytes from address
///
/// # Safety
/// - `src` must be valid for reads up to `count` bytes
pub unsafe fn read_bytes(src: Address, count: usize) -> Vec<u8> {
    debug_assert!(src != 0, "src must not be null");

    let src = src as *const u8;

    (0..count)
        .map(|i| unsafe { ptr::read_volatile(src.add(i)) })
        .collect()
}

/// Copy `count` bytes from src to dst with no protection handling
///
/// # Safety
/// - src must be valid for reads up to count bytes
/// - dst must be valid for writes up to count bytes
/// - addresses must not overlap
pub unsafe fn write_raw(src: *const u8, dst: *mut u8, count: usize) {
    debug_assert!(!src.is_null() && !dst.is_null(), "ptr must not be null");

    unsafe {
        ptr::copy_nonoverlapping(src, dst, count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(buf: &mut [u8]) -> Address {
        buf.as_mut_ptr() as Address
    }

    #[test]
    fn test_overwrite_heap_bytes() {
        let mut buf = vec![0u8; 8];
        let dst = addr(&mut buf);

        unsafe { Patcher::system().overwrite(dst + 2, &[0xAA, 0xBB]) }.unwrap();

        assert_eq!(buf, [0, 0, 0xAA, 0xBB, 0, 0, 0, 0]);
    }

    #[test]
    fn test_overwrite_masked_leaves_skipped_bytes() {
        let mut buf = vec![0x11, 0x22, 0x33, 0x44];
        let dst = addr(&mut buf);

        unsafe { Patcher::system().overwrite_masked(dst, &[Some(0xFF), None, None, Some(0xEE)]) }
            .unwrap();

        assert_eq!(buf, [0xFF, 0x22, 0x33, 0xEE]);
    }

    #[test]
    fn test_overwrite_pattern_skips_wildcards() {
        let mut buf = vec![0x11, 0x22, 0x33];
        let dst = addr(&mut buf);
        let pattern = Pattern::new("C3 ?? 90").unwrap();

        unsafe { Patcher::system().overwrite_pattern(dst, &pattern) }.unwrap();

        assert_eq!(buf, [0xC3, 0x22, 0x90]);
    }

    #[test]
    fn test_fill_with_nops() {
        let mut buf = vec![0xE8, 0x01, 0x02, 0x03, 0x04, 0xC3];
        let dst = addr(&mut buf);

        unsafe { Patcher::system().fill_with_nops(dst, 5) }.unwrap();

        assert_eq!(buf, [NOP, NOP, NOP, NOP, NOP, 0xC3]);
    }

    #[test]
    fn test_write_and_read_unaligned_value() {
        let mut buf = vec![0u8; 8];
        let dst = addr(&mut buf) + 1;

        unsafe { Patcher::system().write_value(dst, 0x1234_5678u32) }.unwrap();

        assert_eq!(unsafe { read_value::<u32>(dst) }, 0x1234_5678);
        assert_eq!(&buf[1..5], 0x1234_5678u32.to_ne_bytes());
        assert_eq!(unsafe { read_bytes(dst, 4) }, 0x1234_5678u32.to_ne_bytes());
    }

    #[test]
    fn test_zero_length_write_is_noop() {
        let mut buf = vec![0x55u8; 2];
        let dst = addr(&mut buf);

        unsafe { Patcher::system().overwrite(dst, &[]) }.unwrap();
        unsafe { Patcher::system().fill_with_nops(dst, 0) }.unwrap();

        assert_eq!(buf, [0x55, 0x55]);
    }

    #[test]
    fn test_null_address_is_rejected() {
        let err = unsafe { Patcher::system().overwrite(0, &[0x90]) }.unwrap_err();
        assert!(matches!(err, MemError::BadAddress(0)));
    }

    #[test]
    fn test_system_protect_reports_heap_writable() {
        let buf = vec![0u8; 16];
        let region = Region::from_slice(&buf);

        let prot = unsafe { SystemProtect.query(region) }.unwrap();

        assert!(prot.is_some_and(|p| p.can_write()));
    }
}
