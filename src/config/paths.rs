//! Platform-specific configuration paths.

use crate::constants::APP_NAME;
use crate::error::{Error, Result};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/// Get the configuration directory for the current platform.
///
/// - Linux: `~/.config/edgelens/`
/// - macOS: `~/Library/Application Support/edgelens/`
/// - Windows: `%APPDATA%\edgelens\`
pub fn config_dir() -> Result<PathBuf> {
    ProjectDirs::from("", "", APP_NAME)
        .map(|dirs| dirs.config_dir().to_path_buf())
        .ok_or(Error::ConfigDirNotFound)
}

/// Get the full path to the config file.
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// Use the explicit path when given, otherwise the platform default.
pub fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    explicit.map_or_else(config_file_path, |path| Ok(path.to_path_buf()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_config_dir_returns_path() {
        let path = config_dir().unwrap();
        assert!(path.to_string_lossy().contains("edgelens"));
    }

    #[test]
    fn test_config_file_path_ends_with_toml() {
        let path = config_file_path().unwrap();
        assert!(path.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn test_explicit_path_wins() {
        let path = resolve_config_path(Some(Path::new("/etc/edgelens/node.toml"))).unwrap();
        assert_eq!(path, PathBuf::from("/etc/edgelens/node.toml"));
    }
}
