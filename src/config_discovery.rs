use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::HoardConfig;

/// Project config file name, searched from the working directory upwards
pub const CONFIG_FILE_NAME: &str = "hoard.toml";

/// Discovers hoard configuration by traversing up the directory tree
pub fn discover_config(start_dir: &Path) -> Result<Option<PathBuf>> {
    let mut current = start_dir.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            return Ok(Some(config_path));
        }

        // Try to go up one level
        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }

    // Fallback to global config
    if let Some(home) = dirs::home_dir() {
        let global_config = home.join(".config/hoard/config.toml");
        if global_config.exists() {
            return Ok(Some(global_config));
        }
    }

    Ok(None)
}

/// Configuration together with where it came from
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: HoardConfig,
    /// File the configuration was read from, if any
    pub path: Option<PathBuf>,
    /// Folder relative cache paths resolve against
    pub base_dir: PathBuf,
}

impl LoadedConfig {
    pub fn cache_root(&self) -> PathBuf {
        self.config.cache_root(&self.base_dir)
    }
}

/// Loads configuration with auto-discovery support
///
/// If `explicit_path` is provided, loads config from that path.
/// Otherwise, auto-discovers config by traversing up directory tree from cwd,
/// falling back to defaults when nothing is found.
pub fn load_config_with_discovery(explicit_path: Option<&Path>) -> Result<LoadedConfig> {
    let current_dir =
        std::env::current_dir().context("Failed to get current directory for config discovery")?;

    let path = match explicit_path {
        Some(path) => Some(path.to_path_buf()),
        None => discover_config(&current_dir)?,
    };

    let loaded = match path {
        Some(path) => {
            let config = HoardConfig::from_file(&path)?;
            let base_dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| current_dir.clone());
            LoadedConfig {
                config,
                path: Some(path),
                base_dir,
            }
        }
        None => LoadedConfig {
            config: HoardConfig::default(),
            path: None,
            base_dir: current_dir,
        },
    };

    loaded
        .config
        .validate()
        .with_context(|| match &loaded.path {
            Some(path) => format!("Invalid configuration in {}", path.display()),
            None => "Invalid default configuration".to_string(),
        })?;

    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_discover_config_finds_nearest() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        // Create nested structure
        let project = root.join("project");
        let subdir = project.join("subdir");
        fs::create_dir_all(&subdir).unwrap();

        // Create config in project root
        let config_path = project.join("hoard.toml");
        fs::write(&config_path, "# test config").unwrap();

        // Search from subdir should find project config
        let found = discover_config(&subdir).unwrap();
        assert_eq!(found, Some(config_path));
    }

    #[test]
    fn test_explicit_config_resolves_against_its_folder() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("custom.toml");
        fs::write(&config_path, "[cache]\ndir = \"data\"\n").unwrap();

        let loaded = load_config_with_discovery(Some(&config_path)).unwrap();
        assert_eq!(loaded.path.as_deref(), Some(config_path.as_path()));
        assert_eq!(loaded.cache_root(), temp.path().join("data"));
    }

    #[test]
    fn test_invalid_explicit_config_fails() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("hoard.toml");
        fs::write(&config_path, "[cache]\nsha_length = 0\n").unwrap();

        let err = load_config_with_discovery(Some(&config_path)).unwrap_err();
        assert!(format!("{:#}", err).contains("sha_length"));
    }
}
