use std::path::Path;
use std::{fs, path::PathBuf};

use eyre::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Config {
    // runtime only, remembers where to save to
    #[serde(skip)]
    path: PathBuf,

    pub dev: Dev,
    pub log: Log,
    #[serde(default)]
    pub catalog: Catalog,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Dev {
    /// show the developer console
    pub console: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Log {
    /// configure logger level
    pub level: String,
    /// whether to display log targets
    pub targets: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Catalog {
    /// extra signatures to resolve after the built-in ones,
    /// relative paths are relative to the dll dir
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Default for Log {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            targets: false,
        }
    }
}

impl Config {
    /// Load a config file
    /// If path doesn't exist, creates and saves default config
    /// otherwise loads what's already there
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            let config = Self {
                path: path.to_owned(),
                ..Default::default()
            };

            config.save()?;
            return Ok(config);
        }

        let data = fs::read_to_string(path)?;
        let mut config = toml::from_str::<Self>(&data)?;

        path.clone_into(&mut config.path);

        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let serialized = toml::to_string_pretty(self)?;
        fs::write(&self.path, serialized)?;

        Ok(())
    }

    /// Extra catalog file, resolved against `dir`
    pub fn catalog_path(&self, dir: &Path) -> Option<PathBuf> {
        self.catalog.path.as_ref().map(|path| dir.join(path))
    }
}
