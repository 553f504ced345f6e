//! Repository and per-client configuration, loaded from TOML with CLI > env > file > default
//! precedence.

use crate::errors::{RepoError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Repository-wide settings, persisted as `<repo>/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Whether `scan` removes store objects unreferenced by any client register.
    pub remove_obsolete: bool,
    /// Directory fan-out threshold for the content store.
    pub fanout_threshold: usize,
    /// Collision tie-break prefix chunk size, in bytes.
    pub collision_prefix_bytes: u64,
    /// Whether a shadow tree mirroring backed-up paths is maintained.
    pub tree_mirror: bool,
    /// `true` uses hard links for the tree mirror's files, `false` uses symlinks.
    pub tree_mirror_hard_links: bool,
    pub log_level: String,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            remove_obsolete: false,
            fanout_threshold: 256,
            collision_prefix_bytes: 10 * 1024 * 1024,
            tree_mirror: false,
            tree_mirror_hard_links: false,
            log_level: "info".to_string(),
        }
    }
}

impl RepositoryConfig {
    /// Load `<repo>/config.toml`, falling back to defaults if the file does not exist, then
    /// apply environment overrides (`BKPCORE_REMOVE_OBSOLETE`, `BKPCORE_LOG_LEVEL`).
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(repo_root: &Path) -> Result<Self> {
        let path = repo_root.join("config.toml");
        let mut config = match std::fs::read_to_string(&path) {
            Ok(text) => toml::from_str(&text).map_err(|e| RepoError::Toml(e.to_string()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => return Err(e.into()),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("BKPCORE_REMOVE_OBSOLETE") {
            self.remove_obsolete = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("BKPCORE_LOG_LEVEL") {
            self.log_level = v;
        }
    }

    /// Persist to `<repo>/config.toml`.
    ///
    /// # Errors
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, repo_root: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self).map_err(|e| RepoError::Toml(e.to_string()))?;
        std::fs::write(repo_root.join("config.toml"), text)?;
        Ok(())
    }
}

/// Per-client settings: which paths to back up and how.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    pub name: String,
    /// Root paths on the (mounted) client filesystem to walk.
    pub paths: Vec<PathBuf>,
    /// `0` means "no expiration"; see `register::commit::search`'s `expire` parameter.
    #[serde(default)]
    pub expire_after_secs: Option<i64>,
}

impl ClientConfig {
    #[must_use]
    pub fn new(name: impl Into<String>, paths: Vec<PathBuf>) -> Self {
        Self { name: name.into(), paths, expire_after_secs: None }
    }

    /// Load `<repo>/<client>/client.toml`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(repo_root: &Path, client: &str) -> Result<Self> {
        let path = repo_root.join(client).join("client.toml");
        let text = std::fs::read_to_string(&path)?;
        toml::from_str(&text).map_err(|e| RepoError::Toml(e.to_string()))
    }

    /// Persist to `<repo>/<client>/client.toml`.
    ///
    /// # Errors
    /// Returns an error if the client directory cannot be created, or serialization fails.
    pub fn save(&self, repo_root: &Path) -> Result<()> {
        let dir = repo_root.join(&self.name);
        std::fs::create_dir_all(&dir)?;
        let text = toml::to_string_pretty(self).map_err(|e| RepoError::Toml(e.to_string()))?;
        std::fs::write(dir.join("client.toml"), text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn repository_config_defaults_when_absent() {
        let dir = tempdir().unwrap();
        let config = RepositoryConfig::load(dir.path()).unwrap();
        assert_eq!(config, RepositoryConfig::default());
    }

    #[test]
    fn repository_config_roundtrip() {
        let dir = tempdir().unwrap();
        let mut config = RepositoryConfig::default();
        config.remove_obsolete = true;
        config.fanout_threshold = 128;
        config.save(dir.path()).unwrap();

        let reloaded = RepositoryConfig::load(dir.path()).unwrap();
        assert_eq!(reloaded.remove_obsolete, true);
        assert_eq!(reloaded.fanout_threshold, 128);
    }

    #[test]
    fn client_config_roundtrip() {
        let dir = tempdir().unwrap();
        let config = ClientConfig::new("laptop", vec![PathBuf::from("/home/user")]);
        config.save(dir.path()).unwrap();

        let reloaded = ClientConfig::load(dir.path(), "laptop").unwrap();
        assert_eq!(reloaded, config);
    }
}
