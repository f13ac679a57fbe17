//! Tool configuration, read from an optional TOML file.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Error, Result};

/// Settings of a mapping run. Every field may be omitted from the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UsermapConfig {
    /// Comment written on the first line of the mapping file.
    #[serde(default = "default_banner")]
    pub banner: String,
    /// Directory, relative to the volume root, holding the mapping file.
    #[serde(default = "default_map_dir")]
    pub map_dir: PathBuf,
    /// Name of the mapping file.
    #[serde(default = "default_map_file")]
    pub map_file: String,
    /// Suffix appended to the previous mapping file when it is replaced.
    #[serde(default = "default_backup_suffix")]
    pub backup_suffix: String,
    /// Top-level directories holding one directory per account.
    #[serde(default = "default_profile_dirs")]
    pub profile_dirs: Vec<String>,
    /// Names starting with this prefix are system metadata, never scanned.
    #[serde(default = "default_reserved_prefix")]
    pub reserved_prefix: String,
    /// Directory levels examined below each volume root.
    #[serde(default = "default_scan_levels")]
    pub scan_levels: u32,
}

impl Default for UsermapConfig {
    #[inline]
    fn default() -> Self {
        Self {
            banner: default_banner(),
            map_dir: default_map_dir(),
            map_file: default_map_file(),
            backup_suffix: default_backup_suffix(),
            profile_dirs: default_profile_dirs(),
            reserved_prefix: default_reserved_prefix(),
            scan_levels: default_scan_levels(),
        }
    }
}

impl UsermapConfig {
    /// Reads a configuration file.
    ///
    /// # Errors
    /// [`Error::Config`] if the file cannot be read or is not valid TOML.
    pub fn load(path: &Path) -> Result<Self> {
        let config_error = |source: ConfigError| Error::Config {
            path: path.to_path_buf(),
            source,
        };
        let contents = fs::read_to_string(path).map_err(|err| config_error(err.into()))?;
        toml::from_str(&contents).map_err(|err| config_error(err.into()))
    }

    /// Reads `path` when given, otherwise returns the defaults.
    ///
    /// # Errors
    /// See [`UsermapConfig::load`].
    #[inline]
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        path.map_or_else(|| Ok(Self::default()), Self::load)
    }
}

// Default value functions for serde
fn default_banner() -> String {
    format!("Generated by usermap, v {}", env!("CARGO_PKG_VERSION"))
}

fn default_map_dir() -> PathBuf {
    PathBuf::from(".NTFS-3G")
}

fn default_map_file() -> String {
    "UserMapping".to_owned()
}

fn default_backup_suffix() -> String {
    ".bak".to_owned()
}

fn default_profile_dirs() -> Vec<String> {
    vec!["Documents and Settings".to_owned(), "Users".to_owned()]
}

fn default_reserved_prefix() -> String {
    "$".to_owned()
}

const fn default_scan_levels() -> u32 {
    2
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Unwrap is not an issue in test")]
mod tests {
    use super::*;

    #[test]
    fn missing_path_gives_defaults() {
        let config = UsermapConfig::load_or_default(None).unwrap();
        assert_eq!(config, UsermapConfig::default());
        assert_eq!(config.map_dir, Path::new(".NTFS-3G"));
        assert_eq!(config.scan_levels, 2);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usermap.toml");
        fs::write(&path, "banner = \"test\"\nscan_levels = 3\n").unwrap();
        let config = UsermapConfig::load(&path).unwrap();
        assert_eq!(config.banner, "test");
        assert_eq!(config.scan_levels, 3);
        assert_eq!(config.map_file, "UserMapping");
        assert_eq!(config.profile_dirs, ["Documents and Settings", "Users"]);
    }

    #[test]
    fn invalid_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usermap.toml");
        fs::write(&path, "scan_levels = \"two\"\n").unwrap();
        let err = UsermapConfig::load(&path).unwrap_err();
        assert!(
            matches!(err, Error::Config { source: ConfigError::Parse(_), .. }),
            "{err}"
        );
        let err = UsermapConfig::load(&dir.path().join("missing.toml")).unwrap_err();
        assert!(
            matches!(err, Error::Config { source: ConfigError::Io(_), .. }),
            "{err}"
        );
    }
}
