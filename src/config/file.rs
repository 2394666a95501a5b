//! Configuration file loading.

use crate::config::Config;
use crate::error::{Error, Result};
use std::path::Path;

/// Load configuration from a TOML file.
///
/// Returns default config if the file does not exist.
pub fn load_config_file(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let contents = std::fs::read_to_string(path).map_err(|e| Error::ConfigRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    toml::from_str(&contents).map_err(|e| Error::ConfigParse {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Load configuration from the default platform-specific path.
///
/// Returns default config if no config file exists.
pub fn load_default_config() -> Result<Config> {
    super::config_file_path().map_or_else(|_| Ok(Config::default()), |path| load_config_file(&path))
}

/// Save configuration to a TOML file.
pub fn save_config(config: &Config, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::ConfigWrite {
            path: path.to_path_buf(),
            source: e,
        })?;
    }

    let contents = toml::to_string_pretty(config).map_err(|e| Error::ConfigSerialize { source: e })?;

    std::fs::write(path, contents).map_err(|e| Error::ConfigWrite {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Save configuration to the default platform-specific path.
pub fn save_default_config(config: &Config) -> Result<std::path::PathBuf> {
    let path = super::config_file_path()?;
    save_config(config, &path)?;
    Ok(path)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::config::{DetectorMode, InferenceProfile};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_nonexistent_file_returns_default() {
        let config = load_config_file(Path::new("/nonexistent/path/config.toml")).unwrap();
        assert!(config.detectors.is_empty());
    }

    #[test]
    fn test_load_valid_config() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[cache]
capacity = 3

[cloud]
endpoint = "https://cloud.example.com"

[detectors.det_door]
mode = "MULTICLASS"
class_names = ["open", "closed", "ajar"]
confidence_threshold = 0.85
edge_inference_profile = "aggressive"
"#
        )
        .unwrap();

        let config = load_config_file(file.path()).unwrap();
        assert_eq!(config.cache.capacity, 3);
        assert_eq!(config.cloud.endpoint.as_deref(), Some("https://cloud.example.com"));

        let door = &config.detectors["det_door"];
        assert_eq!(door.mode, DetectorMode::Multiclass);
        assert_eq!(door.class_names.len(), 3);
        assert_eq!(door.confidence_threshold, 0.85);
        assert_eq!(door.edge_inference_profile, InferenceProfile::Aggressive);
        assert!(door.oodd_enabled);
    }

    #[test]
    fn test_load_invalid_toml_returns_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "this is not valid toml {{{{").unwrap();

        let result = load_config_file(file.path());
        assert!(matches!(result, Err(Error::ConfigParse { .. })));
    }

    #[test]
    fn test_save_then_load_keeps_detectors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config
            .detectors
            .insert("det_a".to_string(), crate::config::DetectorConfig::default());
        save_config(&config, &path).unwrap();

        let loaded = load_config_file(&path).unwrap();
        assert!(loaded.detectors.contains_key("det_a"));
    }
}
