//! Locate undocumented functions and data inside a running executable by byte
//! pattern, and patch them safely.
//!
//! The crate is layered bottom-up:
//! - [`memory`]: protection-aware byte writer
//! - [`scan`]: byte patterns with wildcards and the scanner
//! - [`signature`] / [`registry`]: named, resolved addresses owning a copy of their original bytes
//! - [`offset`]: rel32 helpers for call/jump operands
//!
//! # Threading
//! Bootstrap must finish before anything is patched. Writes are not synchronized, and
//! protection is changed for whole pages; two writers must never touch the same page at
//! the same time.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod memory;
#[cfg(windows)]
pub mod module;
pub mod offset;
pub mod registry;
pub mod scan;
pub mod signature;

pub use memory::{MemError, Patcher, Protect, SystemProtect};
pub use registry::Registry;
pub use scan::{Pattern, PatternError, ScanError};
pub use signature::{Signature, SignatureError, SignatureSpec};

/// A raw address in the current process
pub type Address = usize;

/// A span of memory, always an explicit base + length pair
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Region {
    base: Address,
    len: usize,
}

impl Region {
    /// Create a region. Returns `None` if `base + len` overflows the address space
    pub const fn new(base: Address, len: usize) -> Option<Self> {
        match base.checked_add(len) {
            Some(_) => Some(Self { base, len }),
            None => None,
        }
    }

    /// The region covered by a byte slice
    pub fn from_slice(slice: &[u8]) -> Self {
        Self {
            base: slice.as_ptr() as Address,
            len: slice.len(),
        }
    }

    /// First address of the region
    pub const fn base(&self) -> Address {
        self.base
    }

    /// Size of the region in bytes
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the region is empty
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// One past the last address of the region
    pub const fn end(&self) -> Address {
        // cannot overflow, checked on construction
        self.base + self.len
    }

    /// Whether `addr` lies inside the region
    pub const fn contains(&self, addr: Address) -> bool {
        addr >= self.base && addr < self.end()
    }

    /// Whether `[addr, addr + len)` lies entirely inside the region
    pub const fn contains_span(&self, addr: Address, len: usize) -> bool {
        match addr.checked_add(len) {
            Some(end) => addr >= self.base && end <= self.end(),
            None => false,
        }
    }

    /// The sub-region `[base + offset, base + offset + len)`, if it fits inside this one
    pub const fn sub(&self, offset: usize, len: usize) -> Option<Self> {
        let Some(base) = self.base.checked_add(offset) else {
            return None;
        };

        if self.contains_span(base, len) {
            Some(Self { base, len })
        } else {
            None
        }
    }
}

/// The protection status of some memory
#[derive(Debug, Copy, Clone, PartialEq, Eq, strum::Display)]
pub enum Prot {
    /// none
    None,
    /// read
    R,
    /// write (copy on write)
    W,
    /// execute
    X,
    /// execute + read
    XR,
    /// execute + write (copy on write)
    XW,
    /// read + write
    RW,
    /// execute + read + write
    XRW,
    /// raw platform flags not listed above (guard pages, caching modifiers, ...)
    Other(u32),
}

impl Prot {
    /// Whether memory with this protection can be written to as-is
    pub const fn can_write(&self) -> bool {
        match self {
            Prot::W | Prot::XW | Prot::RW | Prot::XRW => true,
            Prot::Other(raw) => raw::can_write(*raw),
            _ => false,
        }
    }

    /// Whether memory with this protection is executable
    pub const fn can_execute(&self) -> bool {
        match self {
            Prot::X | Prot::XR | Prot::XW | Prot::XRW => true,
            Prot::Other(raw) => raw::can_execute(*raw),
            _ => false,
        }
    }
}

/// Access bits of raw `PAGE_*` flags, ignoring modifiers like `PAGE_NOCACHE`
#[cfg(windows)]
mod raw {
    const BASE: u32 = 0xFF;
    const GUARD: u32 = 0x100;

    pub(crate) const fn can_write(raw: u32) -> bool {
        // writing a guard page faults even when the base flags allow it
        raw & GUARD == 0 && matches!(raw & BASE, 0x04 | 0x08 | 0x40 | 0x80)
    }

    pub(crate) const fn can_execute(raw: u32) -> bool {
        matches!(raw & BASE, 0x10 | 0x20 | 0x40 | 0x80)
    }
}

/// Access bits of raw `region::Protection` bits
#[cfg(not(windows))]
mod raw {
    const WRITE: u32 = 0x2;
    const EXECUTE: u32 = 0x4;

    pub(crate) const fn can_write(raw: u32) -> bool {
        raw & WRITE != 0
    }

    pub(crate) const fn can_execute(raw: u32) -> bool {
        raw & EXECUTE != 0
    }
}

#[cfg(windows)]
mod prot_windows {
    use windows::Win32::System::Memory::{
        PAGE_EXECUTE, PAGE_EXECUTE_READ, PAGE_EXECUTE_READWRITE, PAGE_EXECUTE_WRITECOPY,
        PAGE_NOACCESS, PAGE_PROTECTION_FLAGS, PAGE_READONLY, PAGE_READWRITE, PAGE_WRITECOPY,
    };

    use crate::Prot;

    impl From<Prot> for PAGE_PROTECTION_FLAGS {
        fn from(value: Prot) -> Self {
            match value {
                Prot::None => PAGE_NOACCESS,
                Prot::R => PAGE_READONLY,
                Prot::W => PAGE_WRITECOPY,
                Prot::X => PAGE_EXECUTE,
                Prot::XR => PAGE_EXECUTE_READ,
                Prot::XW => PAGE_EXECUTE_WRITECOPY,
                Prot::RW => PAGE_READWRITE,
                Prot::XRW => PAGE_EXECUTE_READWRITE,
                Prot::Other(raw) => PAGE_PROTECTION_FLAGS(raw),
            }
        }
    }

    impl From<PAGE_PROTECTION_FLAGS> for Prot {
        fn from(value: PAGE_PROTECTION_FLAGS) -> Self {
            match value {
                PAGE_READONLY => Self::R,
                PAGE_WRITECOPY => Self::W,
                PAGE_EXECUTE => Self::X,
                PAGE_EXECUTE_READ => Self::XR,
                PAGE_EXECUTE_WRITECOPY => Self::XW,
                PAGE_READWRITE => Self::RW,
                PAGE_EXECUTE_READWRITE => Self::XRW,
                PAGE_NOACCESS => Self::None,
                other => Self::Other(other.0),
            }
        }
    }
}

#[cfg(not(windows))]
mod prot_region {
    use region::Protection;

    use crate::Prot;

    impl From<Prot> for Protection {
        fn from(value: Prot) -> Self {
            match value {
                Prot::None => Protection::NONE,
                Prot::R => Protection::READ,
                // no copy on write distinction here
                Prot::W | Prot::RW => Protection::READ_WRITE,
                Prot::X => Protection::EXECUTE,
                Prot::XR => Protection::READ_EXECUTE,
                Prot::XW | Prot::XRW => Protection::READ_WRITE_EXECUTE,
                Prot::Other(raw) => Protection::from_bits_truncate(raw as _),
            }
        }
    }

    impl From<Protection> for Prot {
        fn from(value: Protection) -> Self {
            match value {
                Protection::NONE => Self::None,
                Protection::READ => Self::R,
                Protection::READ_WRITE => Self::RW,
                Protection::EXECUTE => Self::X,
                Protection::READ_EXECUTE => Self::XR,
                Protection::READ_WRITE_EXECUTE => Self::XRW,
                other => Self::Other(other.bits() as u32),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_rejects_overflow() {
        assert!(Region::new(usize::MAX - 1, 4).is_none());
        assert!(Region::new(usize::MAX - 4, 4).is_some());
    }

    #[test]
    fn test_region_sub_is_bounds_checked() {
        let region = Region::new(0x1000, 0x10).unwrap();

        assert_eq!(region.sub(0x4, 0x4), Region::new(0x1004, 0x4));
        assert_eq!(region.sub(0xC, 0x4), Region::new(0x100C, 0x4));
        assert_eq!(region.sub(0xC, 0x5), None);
        assert_eq!(region.sub(usize::MAX, 1), None);
        assert_eq!(region.end(), 0x1010);
        assert!(region.contains(0x100F));
        assert!(!region.contains(0x1010));
    }

    #[test]
    fn test_prot_write_and_execute() {
        assert!(Prot::RW.can_write());
        assert!(Prot::XRW.can_write());
        assert!(Prot::W.can_write());
        assert!(!Prot::XR.can_write());
        assert!(!Prot::Other(0).can_write());
        assert!(Prot::XR.can_execute());
        assert!(!Prot::RW.can_execute());
    }

    #[cfg(windows)]
    #[test]
    fn test_raw_flags_use_base_access_bits() {
        // PAGE_EXECUTE_READ | PAGE_NOCACHE
        assert!(Prot::Other(0x220).can_execute());
        assert!(!Prot::Other(0x220).can_write());
        // PAGE_READWRITE | PAGE_WRITECOMBINE
        assert!(Prot::Other(0x404).can_write());
        assert!(!Prot::Other(0x404).can_execute());
        // PAGE_EXECUTE_READWRITE | PAGE_GUARD
        assert!(Prot::Other(0x140).can_execute());
        assert!(!Prot::Other(0x140).can_write());
    }

    #[cfg(not(windows))]
    #[test]
    fn test_raw_flags_use_base_access_bits() {
        // write + execute, no read
        assert!(Prot::Other(0x6).can_execute());
        assert!(Prot::Other(0x6).can_write());
        assert!(!Prot::Other(0x1).can_execute());
    }
}
