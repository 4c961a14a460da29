//! The signature registry
//!
//! A catalog of [`SignatureSpec`]s is resolved once, up front. Either every entry
//! resolves or the registry is not created at all; later code can then assume every
//! catalog name exists. After bootstrap the registry is read-only, apart from
//! restoring signatures byte for byte.

use std::{
    collections::{hash_map::Entry, HashMap},
    sync::OnceLock,
};

use tracing::{debug, info, warn};

use crate::{
    signature::{Signature, SignatureError, SignatureSpec},
    Address, Region,
};

static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Resolved signatures, looked up by name
#[derive(Debug, Default)]
pub struct Registry {
    // catalog order
    signatures: Vec<Signature>,
    by_name: HashMap<String, usize>,
}

impl Registry {
    /// Resolve every entry of `catalog` inside `region`
    ///
    /// Stops at the first entry that fails; nothing resolved before it is kept.
    ///
    /// # Safety
    /// - the whole region must be readable for the duration of the call
    /// - nothing may write to the region during the call
    pub unsafe fn bootstrap(
        region: Region,
        catalog: &[SignatureSpec<'_>],
    ) -> Result<Self, SignatureError> {
        debug!(
            "resolving {} signatures in {:#x}+{:#x}",
            catalog.len(),
            region.base(),
            region.len()
        );

        let mut registry = Self {
            signatures: Vec::with_capacity(catalog.len()),
            by_name: HashMap::with_capacity(catalog.len()),
        };

        for spec in catalog {
            let Entry::Vacant(slot) = registry.by_name.entry(spec.name.to_owned()) else {
                return Err(SignatureError::DuplicateName(spec.name.to_owned()));
            };

            let signature = unsafe { Signature::resolve(spec, region)? };

            slot.insert(registry.signatures.len());
            registry.signatures.push(signature);
        }

        Ok(registry)
    }

    /// Look up a signature by name
    pub fn get(&self, name: &str) -> Option<&Signature> {
        self.by_name.get(name).map(|&i| &self.signatures[i])
    }

    /// Look up a signature's address by name
    pub fn address(&self, name: &str) -> Option<Address> {
        self.get(name).map(Signature::address)
    }

    /// All signatures, in catalog order
    pub fn iter(&self) -> impl Iterator<Item = &Signature> {
        self.signatures.iter()
    }

    /// Number of signatures
    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    /// Whether there are no signatures
    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// Restore every signature's original bytes, in reverse catalog order
    ///
    /// Keeps going past failures and returns the first one.
    ///
    /// # Safety
    /// - nothing may be executing or reading any signature's bytes during the call
    pub unsafe fn restore_all(&self) -> Result<(), SignatureError> {
        unsafe { restore_each(self.signatures.iter().rev()) }
    }

    /// Like [`Registry::restore_all`], but only for signatures a patch helper wrote to
    ///
    /// Sites nothing patched through this registry are left alone, along with
    /// anything another module may have written there.
    ///
    /// # Safety
    /// Same as [`Registry::restore_all`]
    pub unsafe fn restore_patched(&self) -> Result<(), SignatureError> {
        unsafe { restore_each(self.signatures.iter().rev().filter(|s| s.is_patched())) }
    }
}

unsafe fn restore_each<'a>(
    signatures: impl Iterator<Item = &'a Signature>,
) -> Result<(), SignatureError> {
    let mut result = Ok(());

    for signature in signatures {
        if let Err(e) = unsafe { signature.restore() } {
            warn!("failed to restore {signature}: {e}");
            if result.is_ok() {
                result = Err(e);
            }
        }
    }

    result
}

impl<'a> IntoIterator for &'a Registry {
    type Item = &'a Signature;
    type IntoIter = std::slice::Iter<'a, Signature>;

    fn into_iter(self) -> Self::IntoIter {
        self.signatures.iter()
    }
}

/// Bootstrap the process-wide registry
///
/// Must run once, before anything patches signature bytes. A failed bootstrap leaves
/// the registry uninitialized, and it can be tried again.
///
/// # Safety
/// Same as [`Registry::bootstrap`]
pub unsafe fn init(
    region: Region,
    catalog: &[SignatureSpec<'_>],
) -> Result<&'static Registry, SignatureError> {
    if REGISTRY.get().is_some() {
        return Err(SignatureError::AlreadyInitialized);
    }

    let registry = unsafe { Registry::bootstrap(region, catalog)? };

    REGISTRY
        .set(registry)
        .map_err(|_| SignatureError::AlreadyInitialized)?;

    let registry = global().ok_or(SignatureError::AlreadyInitialized)?;
    info!("resolved {} signatures", registry.len());

    Ok(registry)
}

/// The process-wide registry, if [`init`] succeeded
pub fn global() -> Option<&'static Registry> {
    REGISTRY.get()
}

/// Look up a signature in the process-wide registry
///
/// Absence is not an error here; it is logged and `None` is returned.
pub fn get_signature(name: &str) -> Option<&'static Signature> {
    let signature = global().and_then(|registry| registry.get(name));

    if signature.is_none() {
        warn!("could not find signature {name:?}");
    }

    signature
}

/// Address of a signature in the process-wide registry
pub fn address_for_signature(name: &str) -> Option<Address> {
    get_signature(name).map(Signature::address)
}
