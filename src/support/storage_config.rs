//-
// Copyright (c) 2026, Jason Lingle
//
// This file is part of Crysms.
//
// Crysms is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Crysms is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Crysms. If not, see <http://www.gnu.org/licenses/>.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::error::Error;
use crate::crypt::master_key::MasterKeyConfig;

/// The configuration of one Crysms storage file.
///
/// This is stored as TOML, typically next to the storage file itself. It
/// never contains anything that would allow decrypting the storage without
/// the password.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct StorageConfig {
    /// The path to the storage file.
    ///
    /// Relative paths are resolved against the directory containing the
    /// configuration file.
    pub path: PathBuf,

    /// Low-level I/O behaviour. The defaults are fine for almost everyone.
    #[serde(default)]
    pub io: IoConfig,

    /// The derivation of the master key from the password.
    pub key: MasterKeyConfig,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct IoConfig {
    /// How many times a chunk read or write which fails with a transient
    /// error (interrupted, would block, timed out) is retried before the
    /// error is surfaced.
    pub retries: u32,

    /// If true, the file is synced to stable storage after every chunk
    /// write.
    pub sync: bool,
}

impl Default for IoConfig {
    fn default() -> Self {
        IoConfig {
            retries: 1,
            sync: true,
        }
    }
}

impl StorageConfig {
    /// Load the configuration from the TOML file at `path`.
    ///
    /// The returned `path` field is already resolved relative to the
    /// configuration file.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let mut config = Self::read(path)?;
        if config.path.is_relative() {
            if let Some(parent) = path.parent() {
                config.path = parent.join(&config.path);
            }
        }

        Ok(config)
    }

    /// Load the configuration from `path` exactly as written, so that it can
    /// be modified and saved back.
    pub fn read(path: &Path) -> Result<Self, Error> {
        let data = fs::read(path)?;
        Ok(toml::from_slice(&data)?)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("crysms.toml");
        fs::write(
            &config_path,
            r#"
path = "store.bin"

[key]
password_hash = "AAAA"
salt = "AAAA"
algorithm = "Argon2i_V13_M4096_T10_L1_Kmac256"
master_key_xor = "AAAA"
"#,
        )
        .unwrap();

        let config = StorageConfig::load(&config_path).unwrap();
        assert_eq!(dir.path().join("store.bin"), config.path);
        assert_eq!(1, config.io.retries);
        assert!(config.io.sync);
        assert_eq!(
            Path::new("store.bin"),
            StorageConfig::read(&config_path).unwrap().path
        );
    }

    #[test]
    fn syntax_errors_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("crysms.toml");
        fs::write(&config_path, "path = ").unwrap();

        assert_matches!(
            Err(Error::ConfigSyntax(..)),
            StorageConfig::load(&config_path)
        );
    }
}
