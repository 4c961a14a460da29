//! Loader plugin for patchwork
//!
//! When loaded into a host process it resolves the signature catalog against the host
//! image, and exposes the results over a C api.

// only the dll entry point drives these outside of tests
#[cfg_attr(not(windows), allow(dead_code))]
mod catalog;
#[cfg_attr(not(windows), allow(dead_code))]
mod config;
pub mod ffi;
#[cfg_attr(not(windows), allow(dead_code))]
mod logging;

#[cfg(windows)]
mod console;
#[cfg(windows)]
mod dll;
#[cfg(windows)]
mod paths;

pub use catalog::{CATALOG, CATALOG_VERSION};
