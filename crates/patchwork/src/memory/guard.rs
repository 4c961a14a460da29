//! Scoped page protection

use tracing::{error, trace};

use super::{MemError, Protect};
use crate::{Prot, Region};

/// A guard that makes a region writable for its lifetime. When dropped, the region's
/// previous protection is put back.
///
/// If the region was already writable nothing is changed, and nothing is restored.
///
/// Protection applies to whole pages, so while a guard is alive no other thread may
/// write to any page it covers.
#[derive(Debug)]
pub struct ProtGuard<'a, P: Protect> {
    protect: &'a P,
    region: Region,
    // protection to put back on drop, if we changed it
    old: Option<Prot>,
}

impl<'a, P: Protect> ProtGuard<'a, P> {
    /// Make `region` writable until the guard is dropped
    ///
    /// Executable memory (and spans with mixed protection) is raised to [`Prot::XRW`],
    /// anything else to [`Prot::RW`].
    ///
    /// # Safety
    /// - `region` must lie in this process' address space
    pub unsafe fn acquire(protect: &'a P, region: Region) -> Result<Self, MemError> {
        let current = unsafe { protect.query(region)? };

        let target = match current {
            Some(prot) if prot.can_write() => {
                return Ok(Self {
                    protect,
                    region,
                    old: None,
                });
            }

            Some(prot) if !prot.can_execute() => Prot::RW,
            _ => Prot::XRW,
        };

        let old = unsafe { protect.protect(region, target)? };

        trace!(
            "prot {:#x}+{:#x}: {old} -> {target}",
            region.base(),
            region.len()
        );

        Ok(Self {
            protect,
            region,
            old: Some(old),
        })
    }

    /// The region this guard covers
    pub fn region(&self) -> Region {
        self.region
    }

    /// Whether dropping this guard will put old protection back
    pub fn changed(&self) -> bool {
        self.old.is_some()
    }
}

impl<P: Protect> Drop for ProtGuard<'_, P> {
    fn drop(&mut self) {
        let Some(old) = self.old.take() else {
            return;
        };

        // SAFETY: region was accepted by `acquire`, and we are only putting back what was there
        if let Err(e) = unsafe { self.protect.protect(self.region, old) } {
            error!(
                "failed to restore {old} protection at {:#x}+{:#x}: {e}",
                self.region.base(),
                self.region.len()
            );
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::cell::RefCell;

    use super::*;

    /// Pretends every region has `prot`, and records every protection change
    #[derive(Debug)]
    pub(crate) struct Recording {
        pub(crate) prot: Option<Prot>,
        pub(crate) calls: RefCell<Vec<(Region, Prot)>>,
    }

    impl Recording {
        pub(crate) fn new(prot: Option<Prot>) -> Self {
            Self {
                prot,
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl Protect for Recording {
        unsafe fn query(&self, _region: Region) -> Result<Option<Prot>, MemError> {
            Ok(self.prot)
        }

        unsafe fn protect(&self, region: Region, prot: Prot) -> Result<Prot, MemError> {
            self.calls.borrow_mut().push((region, prot));
            Ok(self.prot.unwrap_or(Prot::XR))
        }
    }

    fn region() -> Region {
        Region::new(0x40_1000, 5).unwrap()
    }

    #[test]
    fn test_code_is_raised_to_xrw_and_restored() {
        let protect = Recording::new(Some(Prot::XR));

        {
            let guard = unsafe { ProtGuard::acquire(&protect, region()) }.unwrap();
            assert!(guard.changed());
            assert_eq!(*protect.calls.borrow(), [(region(), Prot::XRW)]);
        }

        assert_eq!(
            *protect.calls.borrow(),
            [(region(), Prot::XRW), (region(), Prot::XR)]
        );
    }

    #[test]
    fn test_readonly_data_is_raised_to_rw() {
        let protect = Recording::new(Some(Prot::R));

        drop(unsafe { ProtGuard::acquire(&protect, region()) }.unwrap());

        assert_eq!(
            *protect.calls.borrow(),
            [(region(), Prot::RW), (region(), Prot::R)]
        );
    }

    #[test]
    fn test_writable_memory_is_left_alone() {
        let protect = Recording::new(Some(Prot::XRW));

        let guard = unsafe { ProtGuard::acquire(&protect, region()) }.unwrap();
        assert!(!guard.changed());
        drop(guard);

        assert!(protect.calls.borrow().is_empty());
    }

    #[test]
    fn test_code_with_modifier_flags_stays_executable() {
        // execute + read with a caching modifier on top
        #[cfg(windows)]
        const CODE: Prot = Prot::Other(0x220);
        #[cfg(not(windows))]
        const CODE: Prot = Prot::Other(0xC);

        let protect = Recording::new(Some(CODE));

        drop(unsafe { ProtGuard::acquire(&protect, region()) }.unwrap());

        assert_eq!(
            *protect.calls.borrow(),
            [(region(), Prot::XRW), (region(), CODE)]
        );
    }

    #[test]
    fn test_mixed_span_is_raised_to_xrw() {
        let protect = Recording::new(None);

        drop(unsafe { ProtGuard::acquire(&protect, region()) }.unwrap());

        assert_eq!(
            *protect.calls.borrow(),
            [(region(), Prot::XRW), (region(), Prot::XR)]
        );
    }

    #[test]
    fn test_patcher_restores_protection_after_write() {
        let mut buf = vec![0u8; 4];
        let protect = Recording::new(Some(Prot::XR));
        let patcher = super::super::Patcher::with_protect(protect);
        let dst = buf.as_mut_ptr() as usize;

        unsafe { patcher.overwrite(dst, &[1, 2, 3, 4]) }.unwrap();

        let region = Region::new(dst, 4).unwrap();
        assert_eq!(
            *patcher.protect().calls.borrow(),
            [(region, Prot::XRW), (region, Prot::XR)]
        );
        assert_eq!(buf, [1, 2, 3, 4]);
    }
}
