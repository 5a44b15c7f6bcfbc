//! User configuration and directory layout.
//!
//! The configuration root holds `config.json` (store location, user
//! environment, remote definitions) and the `gpg/` homedir. The
//! cache root holds downloaded artifacts under `files/` and the
//! per-remote index slots under `remotes/`. Both roots can be moved
//! with `LEAF_CONFIG` / `LEAF_CACHE`; the store either follows
//! `rootfolder` from the configuration or defaults to `~/.leaf`.

use leaf_core::constants::{envvars, files};
use leaf_core::json::{string_pairs, JsonMap};
use leaf_core::{load_json, write_json, EnvLayer, Error, Result};
use leaf_remote::Remote;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Resolved directory layout for one engine instance.
#[derive(Debug, Clone)]
pub struct LeafDirs {
    /// Configuration root (`config.json`, `gpg/`).
    pub config_root: PathBuf,
    /// Cache root (`files/`, `remotes/`).
    pub cache_root: PathBuf,
    /// Store location used when the configuration names none.
    pub default_store: PathBuf,
}

impl LeafDirs {
    /// Discover the layout from the environment and home directory.
    pub fn discover() -> Result<Self> {
        let base = directories::BaseDirs::new().ok_or_else(|| {
            Error::invalid_input("cannot determine the home directory")
        })?;
        let config_root = std::env::var(envvars::CONFIG)
            .map(PathBuf::from)
            .unwrap_or_else(|_| base.config_dir().join("leaf"));
        let cache_root = std::env::var(envvars::CACHE)
            .map(PathBuf::from)
            .unwrap_or_else(|_| base.cache_dir().join("leaf"));
        Ok(Self {
            config_root,
            cache_root,
            default_store: base.home_dir().join(files::DEFAULT_STORE),
        })
    }

    /// The `config.json` path.
    #[must_use]
    pub fn config_file(&self) -> PathBuf {
        self.config_root.join(files::CONFIG)
    }

    /// The GPG homedir.
    #[must_use]
    pub fn gpg_home(&self) -> PathBuf {
        self.config_root.join(files::GPG_FOLDER)
    }

    /// The artifact download cache.
    #[must_use]
    pub fn download_cache(&self) -> PathBuf {
        self.cache_root.join(files::CACHE_DOWNLOAD)
    }

    /// The per-remote index cache.
    #[must_use]
    pub fn remote_cache(&self) -> PathBuf {
        self.cache_root.join(files::CACHE_REMOTES)
    }
}

/// Remote definition as stored in `config.json` (the alias is the
/// map key).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RemoteEntry {
    url: String,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(rename = "gpgKey", skip_serializing_if = "Option::is_none")]
    gpg_key: Option<String>,
}

fn default_true() -> bool {
    true
}

/// The `config.json` document. Reads tolerate missing keys; writes
/// preserve insertion order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserConfig {
    /// Store location override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rootfolder: Option<String>,
    /// User environment layer.
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub env: JsonMap,
    /// Remote definitions, keyed by alias.
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub remotes: JsonMap,
}

impl UserConfig {
    /// Load the configuration, or start empty when the file does not
    /// exist yet.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no configuration yet");
            return Ok(Self::default());
        }
        Ok(serde_json::from_value(load_json(path)?)?)
    }

    /// Persist the configuration atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        write_json(path, &serde_json::to_value(self)?, true)
    }

    /// The configured remotes, in configuration order.
    pub fn remotes(&self) -> Result<Vec<Remote>> {
        let mut out = Vec::new();
        for (alias, value) in &self.remotes {
            let entry: RemoteEntry = serde_json::from_value(value.clone())?;
            out.push(Remote {
                alias: alias.clone(),
                url: entry.url,
                enabled: entry.enabled,
                gpg_key: entry.gpg_key,
            });
        }
        Ok(out)
    }

    /// Add a remote; duplicate aliases conflict.
    pub fn add_remote(&mut self, remote: &Remote) -> Result<()> {
        if self.remotes.contains_key(&remote.alias) {
            return Err(Error::conflict(format!(
                "remote '{}' already exists",
                remote.alias
            )));
        }
        let entry = RemoteEntry {
            url: remote.url.clone(),
            enabled: remote.enabled,
            gpg_key: remote.gpg_key.clone(),
        };
        self.remotes
            .insert(remote.alias.clone(), serde_json::to_value(entry)?);
        Ok(())
    }

    /// Remove a remote.
    pub fn remove_remote(&mut self, alias: &str) -> Result<()> {
        self.remotes
            .remove(alias)
            .map(|_| ())
            .ok_or_else(|| Error::not_found("remote", alias))
    }

    /// Flip a remote's enabled flag.
    pub fn enable_remote(&mut self, alias: &str, enabled: bool) -> Result<()> {
        let value = self
            .remotes
            .get_mut(alias)
            .ok_or_else(|| Error::not_found("remote", alias))?;
        let mut entry: RemoteEntry = serde_json::from_value(value.clone())?;
        entry.enabled = enabled;
        *value = serde_json::to_value(entry)?;
        Ok(())
    }

    /// The user environment layer.
    #[must_use]
    pub fn env_layer(&self) -> EnvLayer {
        EnvLayer::from_pairs(
            Some("Exported by user configuration".to_string()),
            string_pairs(&self.env),
        )
    }

    /// Apply environment updates: set pairs, then unset keys.
    pub fn update_env(&mut self, set: &[(String, String)], unset: &[String]) {
        for (k, v) in set {
            self.env
                .insert(k.clone(), serde_json::Value::String(v.clone()));
        }
        for k in unset {
            self.env.remove(k);
        }
    }
}
