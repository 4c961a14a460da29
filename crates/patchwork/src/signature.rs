//! Named, resolved addresses that own a copy of the bytes they were found with

use std::{
    fmt,
    sync::atomic::{AtomicBool, Ordering},
};

use tracing::{debug, trace};

use crate::{
    memory::{self, MemError, Patcher, Protect},
    offset,
    scan::{self, Pattern, PatternError, ScanError},
    Address, Region,
};

/// Errors resolving or patching a [`Signature`]
#[derive(Debug, Clone, thiserror::Error)]
pub enum SignatureError {
    /// the pattern has fewer than `occurrence + 1` matches
    #[error("could not find signature {name} (match #{occurrence})")]
    PatternNotFound {
        /// signature name
        name: String,
        /// the 0-indexed match that was asked for
        occurrence: usize,
    },
    /// the pattern text or elements are invalid
    #[error("invalid pattern for signature {name}")]
    MalformedPattern {
        /// signature name
        name: String,
        /// what was wrong with it
        #[source]
        source: PatternError,
    },
    /// a span the signature needs falls outside the scanned region
    #[error("signature {name}: {len} bytes at {address:#x} are outside the scanned region")]
    RegionOutOfBounds {
        /// signature name
        name: String,
        /// start of the span
        address: Address,
        /// length of the span
        len: usize,
    },
    /// a patch would write past the bytes captured for restoration
    #[error("signature {name}: patch of {len} bytes at +{offset:#x} exceeds the {captured} captured bytes")]
    PatchTooLong {
        /// signature name
        name: String,
        /// offset of the patch from the signature address
        offset: usize,
        /// patch length
        len: usize,
        /// number of captured bytes
        captured: usize,
    },
    /// two catalog entries share a name
    #[error("signature {0} is defined more than once")]
    DuplicateName(String),
    /// the process-wide registry was already set up
    #[error("signature registry is already initialized")]
    AlreadyInitialized,
    /// a memory error while patching
    #[error(transparent)]
    Memory(#[from] MemError),
}

/// How a pattern is written down
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PatternSource<'a> {
    /// hex text, `??` for wildcards
    Hex(&'a str),
    /// wide elements, `-1` for wildcards
    Wide(&'a [i16]),
}

impl PatternSource<'_> {
    /// Parse into a [`Pattern`]
    pub fn parse(&self) -> Result<Pattern, PatternError> {
        match self {
            PatternSource::Hex(text) => Pattern::new(text),
            PatternSource::Wide(elements) => Pattern::from_wide(elements),
        }
    }
}

/// Everything needed to resolve one signature: a catalog entry
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SignatureSpec<'a> {
    /// unique name
    pub name: &'a str,
    /// the pattern locating it
    pub pattern: PatternSource<'a>,
    /// added to the match address to get the signature address
    pub offset: usize,
    /// which match to use, 0-indexed
    pub occurrence: usize,
    /// how many bytes to capture at the signature address.
    /// `None` captures the rest of the pattern after `offset`
    pub capture: Option<usize>,
}

impl<'a> SignatureSpec<'a> {
    /// A signature located by a hex pattern
    pub const fn new(name: &'a str, pattern: &'a str) -> Self {
        Self {
            name,
            pattern: PatternSource::Hex(pattern),
            offset: 0,
            occurrence: 0,
            capture: None,
        }
    }

    /// A signature located by wide pattern elements
    pub const fn wide(name: &'a str, pattern: &'a [i16]) -> Self {
        Self {
            name,
            pattern: PatternSource::Wide(pattern),
            offset: 0,
            occurrence: 0,
            capture: None,
        }
    }

    /// Set the byte offset from the match
    pub const fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Set which match to use
    pub const fn occurrence(mut self, occurrence: usize) -> Self {
        self.occurrence = occurrence;
        self
    }

    /// Set the number of captured bytes
    pub const fn capture(mut self, capture: usize) -> Self {
        self.capture = Some(capture);
        self
    }
}

/// A resolved signature
///
/// Owns the original bytes found at [`Signature::address`]. Any patch made through the
/// signature is limited to those bytes, so [`Signature::restore`] always undoes it.
pub struct Signature {
    name: String,
    address: Address,
    original: Box<[u8]>,
    // set by the patch helpers, cleared by restore
    patched: AtomicBool,
}

impl Clone for Signature {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            address: self.address,
            original: self.original.clone(),
            patched: AtomicBool::new(self.is_patched()),
        }
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signature")
            .field("name", &self.name)
            .field("address", &format_args!("{:#x}", self.address))
            .field("original", &format_args!("{:02X?}", self.original))
            .field("patched", &self.is_patched())
            .finish()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} @ {:#010x} ({} bytes)",
            self.name,
            self.address,
            self.original.len()
        )
    }
}

impl Signature {
    /// Scan `region` for the spec's pattern and capture the original bytes
    ///
    /// # Safety
    /// - the whole region must be readable for the duration of the call
    /// - nothing may write to the region during the call
    pub unsafe fn resolve(spec: &SignatureSpec<'_>, region: Region) -> Result<Self, SignatureError> {
        let name = spec.name;

        let pattern = spec
            .pattern
            .parse()
            .map_err(|source| SignatureError::MalformedPattern {
                name: name.to_owned(),
                source,
            })?;

        let scan = unsafe { scan::find(region, &pattern, spec.occurrence) }.map_err(|e| match e {
            ScanError::Pattern(source) => SignatureError::MalformedPattern {
                name: name.to_owned(),
                source,
            },
            ScanError::NotFound { occurrence } => SignatureError::PatternNotFound {
                name: name.to_owned(),
                occurrence,
            },
            ScanError::RegionOutOfBounds { pattern_len, .. } => SignatureError::RegionOutOfBounds {
                name: name.to_owned(),
                address: region.base(),
                len: pattern_len,
            },
        })?;

        let capture = spec
            .capture
            .unwrap_or_else(|| pattern.len().saturating_sub(spec.offset));

        let out_of_bounds = || SignatureError::RegionOutOfBounds {
            name: name.to_owned(),
            address: scan.addr.wrapping_add(spec.offset),
            len: capture,
        };

        let address = scan.addr.checked_add(spec.offset).ok_or_else(out_of_bounds)?;
        if !region.contains_span(address, capture) {
            return Err(out_of_bounds());
        }

        let original = unsafe { memory::read_bytes(address, capture) }.into_boxed_slice();

        debug!(
            "resolved {name} @ {address:#x} (match {:#x} + {:#x}, {capture} bytes)",
            scan.addr, spec.offset
        );

        Ok(Self {
            name: name.to_owned(),
            address,
            original,
            patched: AtomicBool::new(false),
        })
    }

    /// The signature's name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The effective address: match address + offset
    pub fn address(&self) -> Address {
        self.address
    }

    /// The bytes at [`Signature::address`] when the signature was resolved
    pub fn original_bytes(&self) -> &[u8] {
        &self.original
    }

    /// Number of captured bytes; the most any patch through this signature may touch
    pub fn len(&self) -> usize {
        self.original.len()
    }

    /// Whether no bytes were captured
    pub fn is_empty(&self) -> bool {
        self.original.is_empty()
    }

    /// Whether a patch helper wrote to the signature since it was resolved or last restored
    ///
    /// Writes made through a bare [`Patcher`] at [`Signature::address`] are not tracked.
    pub fn is_patched(&self) -> bool {
        self.patched.load(Ordering::Acquire)
    }

    fn mark_patched(&self) {
        self.patched.store(true, Ordering::Release);
    }

    fn check_span(&self, offset: usize, len: usize) -> Result<Address, SignatureError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.original.len() => Ok(self.address + offset),
            _ => Err(SignatureError::PatchTooLong {
                name: self.name.clone(),
                offset,
                len,
                captured: self.original.len(),
            }),
        }
    }

    /// Overwrite the start of the captured bytes
    ///
    /// # Safety
    /// - nothing may be executing or reading the patched bytes during the write
    pub unsafe fn overwrite<P: Protect>(
        &self,
        patcher: &Patcher<P>,
        bytes: &[u8],
    ) -> Result<(), SignatureError> {
        unsafe { self.overwrite_at(patcher, 0, bytes) }
    }

    /// Overwrite captured bytes starting `offset` bytes past the signature address
    ///
    /// # Safety
    /// Same as [`Signature::overwrite`]
    pub unsafe fn overwrite_at<P: Protect>(
        &self,
        patcher: &Patcher<P>,
        offset: usize,
        bytes: &[u8],
    ) -> Result<(), SignatureError> {
        let dst = self.check_span(offset, bytes.len())?;
        unsafe { patcher.overwrite(dst, bytes)? };
        self.mark_patched();
        Ok(())
    }

    /// Overwrite the start of the captured bytes, skipping `None` positions
    ///
    /// # Safety
    /// Same as [`Signature::overwrite`]
    pub unsafe fn overwrite_masked<P: Protect>(
        &self,
        patcher: &Patcher<P>,
        bytes: &[Option<u8>],
    ) -> Result<(), SignatureError> {
        let dst = self.check_span(0, bytes.len())?;
        unsafe { patcher.overwrite_masked(dst, bytes)? };
        self.mark_patched();
        Ok(())
    }

    /// Replace the first `count` captured bytes with no-ops
    ///
    /// # Safety
    /// Same as [`Signature::overwrite`]
    pub unsafe fn fill_with_nops<P: Protect>(
        &self,
        patcher: &Patcher<P>,
        count: usize,
    ) -> Result<(), SignatureError> {
        let dst = self.check_span(0, count)?;
        unsafe { patcher.fill_with_nops(dst, count)? };
        self.mark_patched();
        Ok(())
    }

    /// Point the rel32 operand `offset` bytes past the signature address at `destination`,
    /// e.g. `offset = 1` to redirect a `call rel32`
    ///
    /// # Safety
    /// Same as [`Signature::overwrite`]
    pub unsafe fn write_relative_offset<P: Protect>(
        &self,
        patcher: &Patcher<P>,
        offset: usize,
        destination: Address,
    ) -> Result<(), SignatureError> {
        let operand = self.check_span(offset, offset::REL32_SIZE)?;
        unsafe { offset::write_relative_offset(patcher, operand, destination)? };
        self.mark_patched();
        Ok(())
    }

    /// Resolve the rel32 operand found at the signature address
    ///
    /// # Safety
    /// - the signature address must hold a rel32 operand
    pub unsafe fn follow(&self) -> Address {
        unsafe { offset::follow_relative_offset(self.address) }
    }

    /// Write the captured original bytes back. Calling it again re-applies the same bytes
    ///
    /// # Safety
    /// Same as [`Signature::overwrite`]
    pub unsafe fn restore(&self) -> Result<(), SignatureError> {
        unsafe { self.restore_with(&Patcher::system()) }
    }

    /// [`Signature::restore`] with a specific patcher
    ///
    /// # Safety
    /// Same as [`Signature::overwrite`]
    pub unsafe fn restore_with<P: Protect>(&self, patcher: &Patcher<P>) -> Result<(), SignatureError> {
        trace!("restoring {self}");
        unsafe { patcher.overwrite(self.address, &self.original)? };
        self.patched.store(false, Ordering::Release);
        Ok(())
    }
}
