//! C entry points for code that isn't Rust

use std::{
    ffi::{c_char, CStr},
    ptr,
};

use patchwork::registry;
use tracing::warn;

/// Address of a resolved signature, or null if `name` is null, not utf-8, or unknown
///
/// # Safety
/// `name` must be null or point to a nul terminated string
#[no_mangle]
pub unsafe extern "C" fn get_address_for_signature(name: *const c_char) -> *mut u8 {
    if name.is_null() {
        warn!("get_address_for_signature called with a null name");
        return ptr::null_mut();
    }

    let name = unsafe { CStr::from_ptr(name) };

    let Ok(name) = name.to_str() else {
        warn!("signature name {name:?} is not utf-8");
        return ptr::null_mut();
    };

    match registry::address_for_signature(name) {
        Some(address) => address as *mut u8,
        None => ptr::null_mut(),
    }
}
