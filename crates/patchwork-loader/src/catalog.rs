//! The signature catalog
//!
//! Every pattern here is tied to one specific build of the host executable. A new
//! host build needs a new catalog (and a new [`CATALOG_VERSION`]).

use std::{fs, path::Path};

use eyre::{Context, Result};
use patchwork::SignatureSpec;
use serde::{Deserialize, Serialize};

/// Host build the built-in catalog was written against
pub const CATALOG_VERSION: &str = "haloce-1.0.10";

/// Built-in signatures. All of them must resolve, or nothing does
#[rustfmt::skip]
pub const CATALOG: &[SignatureSpec<'static>] = &[
    // core
    SignatureSpec::new("engine_type", "8D 75 D0 B8 ?? ?? ?? ?? E8 ?? ?? ?? ?? 83").offset(0x4),
    SignatureSpec::new("window_globals", "8B 45 08 A3 ?? ?? ?? ?? 8B 4D 14").offset(0x4),
    SignatureSpec::new("console_out", "83 EC 10 57 8B F8 A0 ?? ?? ?? ?? 84 C0 C7 44 24 04 00 00 80 3F"),

    // engine globals
    SignatureSpec::new("halo_path", "BF ?? ?? ?? ?? F3 AB AA E8").offset(0x1),
    SignatureSpec::new("resolution", "75 0A 66 A1 ?? ?? ?? ?? 66 89 42 04 83 C4 10 C3").offset(0x4),
    SignatureSpec::new("tick_counter", "A1 ?? ?? ?? ?? 8B 50 14 8B 48 0C 83 C4 04 42 41 4E 4F").offset(0x1),
    SignatureSpec::new("server_type", "0F BF 2D ?? ?? ?? ?? E8 ?? ?? ?? ?? 39 1D ?? ?? ?? ?? 75 05"),
    SignatureSpec::new("current_gametype", "83 3D ?? ?? ?? ?? 04 8B 4F 6C 89 4C 24 34 75"),
    SignatureSpec::new("map_index", "3B 05 ?? ?? ?? ?? 7D ?? 8B 0D ?? ?? ?? ??").offset(0xA),
    SignatureSpec::new("map_header", "81 3D ?? ?? ?? ?? ?? ?? ?? ?? 8B 3D").offset(0x2),
    SignatureSpec::new("camera_coord", "D9 05 ?? ?? ?? ?? 83 EC 18 DD 5C 24 10").offset(0x2),
    SignatureSpec::new("camera_type", "81 C1 ?? ?? ?? ?? 8B 41 08 3D ?? ?? ?? ?? 75 1D D9 05").offset(0x2),
    SignatureSpec::new("object_table_address", "8B 0D ?? ?? ?? ?? 8B 51 34 25 FF FF 00 00 8D").offset(0x2),
    SignatureSpec::new("game_paused_flag_address", "8B 15 ?? ?? ?? ?? 8A 42 02 84 C0 75 22 8B 0D").offset(0x2),
    SignatureSpec::new("player_table_address", "A1 ?? ?? ?? ?? 89 44 24 48 35").offset(0x1),

    // call sites for events
    SignatureSpec::new("on_tick", "?? ?? ?? ?? ?? A1 ?? ?? ?? ?? 8B 50 14 8B 48 0C"),
    SignatureSpec::new("on_map_load", "E8 ?? ?? ?? ?? E8 ?? ?? ?? ?? A1 ?? ?? ?? ?? 33 D2 8B C8 89 11"),
    SignatureSpec::new("on_frame", "?? ?? ?? ?? ?? 83 C4 08 89 3D"),
    SignatureSpec::new("d3d9_call_end_scene", "FF 92 A8 00 00 00 85 C0 7C 0C"),
    SignatureSpec::new("d3d9_call_reset", "FF 52 40 85 C0 0F 8C"),

    // map loading
    SignatureSpec::new("map_load_path", "?? ?? ?? ?? ?? A1 ?? ?? ?? ?? 83 C4 ?? 85 C0 BF 80 00 00 48"),
    SignatureSpec::new("read_map_file_data", "?? ?? ?? ?? ?? FF 54 24 ?? 85 C0 75 29"),

    // functions
    SignatureSpec::new("play_sound_function", "83 EC 08 8B 0D ?? ?? ?? ?? 53 55 8B 6C 24 14 8B C5 25 FF FF 00 00 C1 E0 05"),
    SignatureSpec::new("execute_console_command_function", "8A 07 81 EC 00 05 00 00 3C 3B 74 0E"),
    SignatureSpec::new("console_unknown_command_message_print_call", "E8 ?? ?? ?? ?? 83 C4 0C 5E 8A C3 5B 81 C4 00 05 00 00"),
    SignatureSpec::new("chat_out", "83 EC 10 8A 4C 24 14 55 6A 00 6A 01 6A 00 88 4C 24 18"),
];

/// Extra signatures read from a file
///
/// ```toml
/// [[signature]]
/// name = "widget_globals"
/// pattern = "33 C0 B9 0D 00 00 00 BF ?? ?? ?? ?? F3 AB 39 1D"
/// offset = 8
/// ```
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CatalogFile {
    #[serde(default, rename = "signature")]
    pub signatures: Vec<Entry>,
}

/// One `[[signature]]` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub name: String,
    pub pattern: String,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub occurrence: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture: Option<usize>,
}

impl Entry {
    pub fn spec(&self) -> SignatureSpec<'_> {
        let spec = SignatureSpec::new(&self.name, &self.pattern)
            .offset(self.offset)
            .occurrence(self.occurrence);

        match self.capture {
            Some(capture) => spec.capture(capture),
            None => spec,
        }
    }
}

impl CatalogFile {
    /// Load a catalog file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read catalog {}", path.display()))?;
        let file = toml::from_str::<Self>(&data)
            .with_context(|| format!("failed to parse catalog {}", path.display()))?;

        Ok(file)
    }
}

/// The built-in catalog followed by `extra`
pub fn specs(extra: &CatalogFile) -> Vec<SignatureSpec<'_>> {
    let builtin: &[SignatureSpec<'_>] = CATALOG;

    builtin
        .iter()
        .copied()
        .chain(extra.signatures.iter().map(Entry::spec))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use patchwork::Pattern;

    use super::*;

    #[test]
    fn test_builtin_catalog_is_well_formed() {
        let mut names = HashSet::new();

        for spec in CATALOG {
            assert!(names.insert(spec.name), "{} is duplicated", spec.name);

            let pattern = spec.pattern.parse().unwrap();
            assert!(spec.offset <= pattern.len(), "{}", spec.name);
        }
    }

    #[test]
    fn test_parse_catalog_file() {
        let file = toml::from_str::<CatalogFile>(
            r#"
            [[signature]]
            name = "widget_globals"
            pattern = "33 C0 B9 0D 00 00 00 BF ?? ?? ?? ?? F3 AB 39 1D"
            offset = 8

            [[signature]]
            name = "second_hit"
            pattern = "E8????????C3"
            occurrence = 1
            capture = 5
            "#,
        )
        .unwrap();

        let extra = file.signatures.iter().map(Entry::spec).collect::<Vec<_>>();

        assert_eq!(extra[0].offset, 8);
        assert_eq!(extra[0].occurrence, 0);
        assert_eq!(extra[0].capture, None);
        assert_eq!(extra[1].occurrence, 1);
        assert_eq!(extra[1].capture, Some(5));
        assert_eq!(
            extra[1].pattern.parse().unwrap(),
            Pattern::new("E8 ?? ?? ?? ?? C3").unwrap()
        );

        let all = specs(&file);
        assert_eq!(all.len(), CATALOG.len() + 2);
        assert_eq!(all.last().map(|s| s.name), Some("second_hit"));
    }

    #[test]
    fn test_empty_catalog_file() {
        let file = toml::from_str::<CatalogFile>("").unwrap();
        assert!(file.signatures.is_empty());
        assert_eq!(specs(&file).len(), CATALOG.len());
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(CatalogFile::load(dir.path().join("missing.toml")).is_err());
    }
}
