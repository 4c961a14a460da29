use std::iter;

use windows::{
    core::{Result, PCWSTR},
    Win32::System::Console::{
        AllocConsole, GetConsoleMode, GetStdHandle, SetConsoleMode, SetConsoleTitleW,
        ENABLE_VIRTUAL_TERMINAL_PROCESSING, STD_OUTPUT_HANDLE,
    },
};

use crate::catalog::CATALOG_VERSION;

const TITLE: &str = "Patchwork Debug Console";

/// Open a console window for log output and print the build banner
pub fn alloc_console() -> Result<()> {
    unsafe {
        AllocConsole()?;
    }

    enable_ansi()?;
    set_title(TITLE)?;

    println!("{}", banner());

    Ok(())
}

/// The stdout log layer writes ansi colors
fn enable_ansi() -> Result<()> {
    let handle = unsafe { GetStdHandle(STD_OUTPUT_HANDLE)? };

    let mut mode = Default::default();
    unsafe {
        GetConsoleMode(handle, &mut mode)?;
        SetConsoleMode(handle, mode | ENABLE_VIRTUAL_TERMINAL_PROCESSING)?;
    }

    Ok(())
}

fn set_title(title: &str) -> Result<()> {
    let title = title.encode_utf16().chain(iter::once(0)).collect::<Vec<_>>();

    unsafe { SetConsoleTitleW(PCWSTR(title.as_ptr())) }
}

fn banner() -> String {
    let rule = "*".repeat(80);

    format!(
        "\n{rule}\n*{:^78}*\n{rule}\n\nversion {} (debug: {}) built on {}\ncatalog {CATALOG_VERSION}\n",
        TITLE,
        env!("CARGO_PKG_VERSION"),
        cfg!(debug_assertions),
        env!("VERGEN_BUILD_DATE"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_banner() {
        let banner = banner();
        let lines = banner.lines().collect::<Vec<_>>();

        assert_eq!(lines[1].len(), 80);
        assert_eq!(lines[2].len(), 80);
        assert!(lines[2].contains(TITLE));
        assert!(banner.contains(CATALOG_VERSION));
    }
}
