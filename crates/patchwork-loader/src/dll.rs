use std::{ffi::c_void, panic, path::Path, thread};

use eyre::{Context, Result};
use patchwork::{module, registry};
use tracing::{debug, error, info};
use windows::Win32::{
    Foundation::HINSTANCE,
    System::SystemServices::{DLL_PROCESS_ATTACH, DLL_PROCESS_DETACH},
};

use crate::{
    catalog::{self, CatalogFile, CATALOG_VERSION},
    config::Config,
    console,
    logging::setup_logging,
    paths::{get_dll_dir, get_dll_dir_filepath},
};

const CONFIG_FILE: &str = "patchwork.toml";

// Dll entry point
#[no_mangle]
extern "C-unwind" fn DllMain(
    module: HINSTANCE,
    fdw_reason: u32,
    lpv_reserved: *const c_void,
) -> bool {
    match fdw_reason {
        DLL_PROCESS_ATTACH => {
            // the loader lock is held in here, so the real work happens on another thread
            thread::spawn(move || {
                // panics are already logged by the hook
                _ = panic::catch_unwind(move || {
                    let config = match pre_init(module) {
                        Ok(config) => config,
                        Err(e) => {
                            // whether this prints or not depends on which point it failed
                            error!("\nError:{e:?}");
                            return;
                        }
                    };

                    if let Err(e) = init(module, &config) {
                        error!("\nError:{e:?}");
                    }
                });
            });
        }

        // reserved is null when FreeLibrary unloaded us, the process is still alive
        DLL_PROCESS_DETACH if lpv_reserved.is_null() => {
            // only sites we patched, another module may have hooked the rest
            if let Some(registry) = registry::global() {
                // SAFETY: the registry only holds addresses inside the host image
                if let Err(e) = unsafe { registry.restore_patched() } {
                    error!("failed to restore patched bytes: {e}");
                }
            }
        }

        _ => (),
    }

    true
}

fn pre_init(module: HINSTANCE) -> Result<Config> {
    // always spawn debug console when in debug mode
    #[cfg(debug_assertions)]
    console::alloc_console().context("failed to alloc console")?;

    let dll_dir = get_dll_dir(module).context("failed to get dll dir")?;
    let config_path =
        get_dll_dir_filepath(module, CONFIG_FILE).context("failed to get config path")?;
    let config = Config::load(config_path).context("failed to load config")?;

    #[cfg(not(debug_assertions))]
    if config.dev.console {
        console::alloc_console().context("failed to alloc console")?;
    }

    setup_logging(&dll_dir, &config).context("failed to setup logging")?;

    Ok(config)
}

fn init(module: HINSTANCE, config: &Config) -> Result<()> {
    let dll_dir = get_dll_dir(module).context("failed to get dll dir")?;

    let extra = load_extra_catalog(&dll_dir, config)?;
    let specs = catalog::specs(&extra);

    let image = module::main_module().context("failed to find host image")?;
    info!(
        "resolving catalog {CATALOG_VERSION} in {:#x}+{:#x}",
        image.base(),
        image.len()
    );

    // SAFETY: the host image stays mapped for the life of the process, and nothing
    // patches it before the registry exists
    let registry = unsafe { registry::init(image, &specs) }
        .with_context(|| format!("host does not match catalog {CATALOG_VERSION}"))?;

    for signature in registry {
        debug!("{signature}");
    }

    Ok(())
}

fn load_extra_catalog(dll_dir: &Path, config: &Config) -> Result<CatalogFile> {
    let Some(path) = config.catalog_path(dll_dir) else {
        return Ok(CatalogFile::default());
    };

    let extra = CatalogFile::load(&path)?;
    info!(
        "loaded {} extra signatures from {}",
        extra.signatures.len(),
        path.display()
    );

    Ok(extra)
}
