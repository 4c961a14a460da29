//! Where loaded modules live in memory

use std::{iter, mem};

use windows::{
    core::PCWSTR,
    Win32::{
        Foundation::HMODULE,
        System::{
            LibraryLoader::GetModuleHandleW,
            ProcessStatus::{GetModuleInformation, MODULEINFO},
            Threading::GetCurrentProcess,
        },
    },
};

use crate::Region;

/// An error for the [module](crate::module) module
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    /// module is not loaded in this process
    #[error("module {0} is not loaded")]
    NotLoaded(String),
    /// module image size makes no sense
    #[error("module image at {0:#x} overflows the address space")]
    BadImage(usize),
    /// a windows error
    #[error(transparent)]
    Windows(#[from] windows::core::Error),
}

/// The memory image of the process' executable
pub fn main_module() -> Result<Region, ModuleError> {
    let module = unsafe { GetModuleHandleW(PCWSTR::null())? };
    image_region(module)
}

/// The memory image of a loaded module, e.g. `"d3d9.dll"`
///
/// The module is not pinned. It must stay loaded for as long as the region is used.
pub fn find(name: &str) -> Result<Region, ModuleError> {
    let wide = name.encode_utf16().chain(iter::once(0)).collect::<Vec<_>>();

    let module = unsafe { GetModuleHandleW(PCWSTR(wide.as_ptr())) }
        .map_err(|_| ModuleError::NotLoaded(name.to_owned()))?;

    image_region(module)
}

fn image_region(module: HMODULE) -> Result<Region, ModuleError> {
    let mut module_info = MODULEINFO::default();

    unsafe {
        GetModuleInformation(
            GetCurrentProcess(),
            module,
            &mut module_info,
            mem::size_of::<MODULEINFO>() as u32,
        )?;
    }

    let base = module_info.lpBaseOfDll as usize;

    Region::new(base, module_info.SizeOfImage as usize).ok_or(ModuleError::BadImage(base))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_main_module_contains_our_code() {
        let region = main_module().unwrap();
        let here = test_main_module_contains_our_code as fn() as usize;

        assert!(region.contains(here));
    }

    #[test]
    fn test_unknown_module() {
        assert!(matches!(
            find("surely-not-loaded-module.dll"),
            Err(ModuleError::NotLoaded(_))
        ));
    }
}
