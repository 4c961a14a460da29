//! This module allows one to scan memory for byte patterns

mod pattern;
mod scalar;

use std::{fmt, slice};

use tracing::trace;

use crate::{Address, Region};

pub use self::pattern::{Pattern, PatternError};

/// Scanning errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScanError {
    /// An error happened during pattern parsing
    #[error(transparent)]
    Pattern(#[from] PatternError),
    /// fewer than `occurrence + 1` matches in the region
    #[error("pattern not found (wanted match #{occurrence})")]
    NotFound {
        /// the 0-indexed match that was asked for
        occurrence: usize,
    },
    /// the pattern cannot fit in the region at all
    #[error("pattern of {pattern_len} bytes does not fit in a {region_len} byte region")]
    RegionOutOfBounds {
        /// pattern length
        pattern_len: usize,
        /// region length
        region_len: usize,
    },
}

/// The result of a scan
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Scan {
    /// the address of the first byte of the match
    pub addr: Address,
}

impl fmt::Display for Scan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Scan {{ addr: {:#x} }}", self.addr)
    }
}

/// Find the `occurrence`th (0-indexed) match of `pattern` in a byte slice, returning
/// its offset from the start of the slice
///
/// ```rust
/// # use patchwork::{scan, Pattern};
/// let binary = [0x11, 0x22, 0x33, 0x44, 0x11, 0x22, 0x33, 0x44];
/// let pattern = Pattern::new("11 ?? 33").unwrap();
///
/// assert_eq!(scan::find_in(&binary, &pattern, 1), Ok(4));
/// ```
pub fn find_in(haystack: &[u8], pattern: &Pattern, occurrence: usize) -> Result<usize, ScanError> {
    if pattern.len() > haystack.len() {
        return Err(ScanError::RegionOutOfBounds {
            pattern_len: pattern.len(),
            region_len: haystack.len(),
        });
    }

    scalar::find(haystack, pattern, occurrence).ok_or(ScanError::NotFound { occurrence })
}

/// Find the `occurrence`th (0-indexed) match of `pattern` inside `region`
///
/// The returned address is the first byte of the match.
///
/// # Safety
/// - the whole region must be readable for the duration of the scan
/// - nothing may write to the region during the scan
pub unsafe fn find(region: Region, pattern: &Pattern, occurrence: usize) -> Result<Scan, ScanError> {
    trace!(
        "scanning {:#x}+{:#x} for {pattern} #{occurrence}",
        region.base(),
        region.len()
    );

    if pattern.len() > region.len() {
        return Err(ScanError::RegionOutOfBounds {
            pattern_len: pattern.len(),
            region_len: region.len(),
        });
    }

    // SAFETY: caller guarantees the region is readable and not being written
    let haystack = unsafe { slice::from_raw_parts(region.base() as *const u8, region.len()) };

    let offset = find_in(haystack, pattern, occurrence)?;

    Ok(Scan {
        addr: region.base() + offset,
    })
}

/// IDA-style pattern scanner
///
/// Parses `pattern` (e.g. `"48 89 5c 24 ?? 48 89 6c"`) and finds its `occurrence`th match
/// in `region`.
///
/// # Safety
/// Same as [`find`]
pub unsafe fn sig_scan(pattern: &str, region: Region, occurrence: usize) -> Result<Scan, ScanError> {
    let pattern = Pattern::new(pattern)?;
    // SAFETY: safe to call as long as the safety conditions were met for this function
    unsafe { find(region, &pattern, occurrence) }
}
