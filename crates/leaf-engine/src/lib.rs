//! The Leaf package engine.
//!
//! An [`Engine`] is an explicit value owning the directory layout,
//! the user configuration, and the cancellation token; there is no
//! global state, so tests construct isolated engines against
//! temporary directories. Operations: remote refresh, store listing,
//! install / uninstall / sync, per-package environment composition,
//! and feature toggling.

pub mod config;
pub mod features;
pub mod install;
pub mod lock;
pub mod steps;

pub use config::{LeafDirs, UserConfig};
pub use features::FeatureManager;
pub use install::{is_ignored_folder, InstallOptions};
pub use lock::StoreLock;
pub use steps::StepExecutor;

use leaf_core::{builtin_layer, Environment, Result};
use leaf_remote::{FetchOutcome, IndexCache, Remote};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// The package engine: explicit state, passed through operations.
#[derive(Debug)]
pub struct Engine {
    dirs: LeafDirs,
    config: UserConfig,
    token: CancellationToken,
    verbose: bool,
}

impl Engine {
    /// Open an engine over a directory layout, loading the user
    /// configuration (or starting empty).
    pub fn open(dirs: LeafDirs) -> Result<Self> {
        let config = UserConfig::load(&dirs.config_file())?;
        debug!(config_root = %dirs.config_root.display(), "engine opened");
        Ok(Self {
            dirs,
            config,
            token: CancellationToken::new(),
            verbose: false,
        })
    }

    /// Enable verbose step output.
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Use an externally owned cancellation token (the command layer
    /// wires SIGINT to it).
    #[must_use]
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// The directory layout.
    #[must_use]
    pub fn dirs(&self) -> &LeafDirs {
        &self.dirs
    }

    /// The loaded user configuration.
    #[must_use]
    pub fn config(&self) -> &UserConfig {
        &self.config
    }

    /// The cancellation token.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Whether verbose step output is on.
    #[must_use]
    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// The store root: `rootfolder` from the configuration, or the
    /// layout default.
    #[must_use]
    pub fn store_root(&self) -> PathBuf {
        self.config
            .rootfolder
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.dirs.default_store.clone())
    }

    /// Point the store somewhere else and persist the change.
    pub fn set_store_root(&mut self, path: &std::path::Path) -> Result<()> {
        self.config.rootfolder = Some(path.to_string_lossy().into_owned());
        self.save_config()
    }

    /// The per-remote index cache.
    #[must_use]
    pub fn index_cache(&self) -> IndexCache {
        IndexCache::new(self.dirs.remote_cache())
    }

    /// The configured remotes, in configuration order.
    pub fn remotes(&self) -> Result<Vec<Remote>> {
        self.config.remotes()
    }

    /// Add a remote and persist.
    pub fn add_remote(&mut self, remote: &Remote) -> Result<()> {
        self.config.add_remote(remote)?;
        self.save_config()
    }

    /// Remove a remote, its cache slot, and persist.
    pub fn remove_remote(&mut self, alias: &str) -> Result<()> {
        self.config.remove_remote(alias)?;
        self.index_cache().invalidate(alias);
        self.save_config()
    }

    /// Flip a remote's enabled flag and persist.
    pub fn enable_remote(&mut self, alias: &str, enabled: bool) -> Result<()> {
        self.config.enable_remote(alias, enabled)?;
        self.save_config()
    }

    /// Update the user environment layer and persist.
    pub fn update_user_env(
        &mut self,
        set: &[(String, String)],
        unset: &[String],
    ) -> Result<()> {
        self.config.update_env(set, unset);
        self.save_config()
    }

    /// Apply a feature toggle to the user scope and persist.
    pub fn toggle_user_feature(
        &mut self,
        manager: &FeatureManager,
        name: &str,
        enum_name: &str,
    ) -> Result<()> {
        let (key, value) = manager.toggle_value(name, enum_name)?;
        match value {
            Some(value) => self.update_user_env(&[(key, value)], &[]),
            None => self.update_user_env(&[], &[key]),
        }
    }

    /// Refresh all remotes (see [`leaf_remote::fetch_remotes`]);
    /// failures are partial, never fatal for the other remotes.
    pub async fn fetch_remotes(&self, force: bool) -> Result<FetchOutcome> {
        let remotes = self.remotes()?;
        leaf_remote::fetch_remotes(
            &remotes,
            &self.index_cache(),
            &self.dirs.gpg_home(),
            force,
            &self.token,
        )
        .await
    }

    /// The feature manager over the current catalogue and store.
    pub async fn feature_manager(&self) -> Result<FeatureManager> {
        let outcome = self.fetch_remotes(false).await?;
        let installed = self.list_installed()?;
        FeatureManager::build(
            outcome
                .catalogue
                .values()
                .map(|ap| &ap.manifest)
                .chain(installed.values().map(|ip| &ip.manifest)),
        )
    }

    /// The builtin ⊕ user environment, the base every composition
    /// starts from.
    #[must_use]
    pub fn base_env(&self) -> Environment {
        Environment::build([builtin_layer(None, None), self.config.env_layer()])
    }

    fn save_config(&self) -> Result<()> {
        self.config.save(&self.dirs.config_file())
    }
}
