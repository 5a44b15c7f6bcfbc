//! Workspaces and profiles.
//!
//! A workspace is a project directory holding `leaf-workspace.json`
//! and a `leaf-data/` folder with one directory per profile plus a
//! `current` symlink. A profile names a subset of the catalogue;
//! syncing it installs the resolved packages and materializes the
//! profile as symlinks into the store. The workspace owns all
//! profile configuration; [`Profile`] values are views carrying
//! their name back to it.

use leaf_core::constants::{self, files};
use leaf_core::json::{string_pairs, JsonMap};
use leaf_core::{
    builtin_layer, compare_versions, load_json, write_json, EnvLayer, Environment, Error,
    PackageIdentifier, Result,
};
use leaf_engine::{Engine, InstallOptions};
use leaf_resolver::ManifestMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One profile's slice of the workspace configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileConfig {
    /// Stated package list; unpinned names resolve to latest at sync
    /// time.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<String>,
    /// Profile environment layer.
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub env: JsonMap,
}

/// The `leaf-workspace.json` document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Minimum engine version able to use this workspace.
    #[serde(rename = "leafMinVersion", skip_serializing_if = "Option::is_none")]
    pub leaf_min_version: Option<String>,
    /// Workspace environment layer.
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub env: JsonMap,
    /// Profiles, keyed by name, in creation order.
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub profiles: JsonMap,
}

/// A view over one profile: its name plus a copy of its slice.
#[derive(Debug, Clone)]
pub struct Profile {
    /// Profile name (unique in the workspace).
    pub name: String,
    /// Configuration slice.
    pub config: ProfileConfig,
}

impl Profile {
    /// The profile environment layer.
    #[must_use]
    pub fn env_layer(&self) -> EnvLayer {
        EnvLayer::from_pairs(
            Some(format!("Exported by profile {}", self.name)),
            string_pairs(&self.config.env),
        )
    }
}

/// An opened workspace.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    config: WorkspaceConfig,
}

impl Workspace {
    /// Initialize a new workspace: fails if the configuration file
    /// already exists.
    pub fn init(root: &Path) -> Result<Self> {
        let config_file = root.join(files::WS_CONFIG);
        if config_file.exists() {
            return Err(Error::conflict(format!(
                "workspace already initialized: {}",
                config_file.display()
            )));
        }
        std::fs::create_dir_all(root).map_err(|e| Error::io(root, e))?;
        let ws = Self {
            root: root.to_path_buf(),
            config: WorkspaceConfig::default(),
        };
        ws.save()?;
        info!(root = %root.display(), "workspace initialized");
        Ok(ws)
    }

    /// Open an existing workspace.
    pub fn open(root: &Path) -> Result<Self> {
        let config_file = root.join(files::WS_CONFIG);
        if !config_file.exists() {
            return Err(Error::not_found("workspace", root.to_string_lossy())
                .with_hints(vec!["Initialize one with 'leaf init'".to_string()]));
        }
        let config: WorkspaceConfig = serde_json::from_value(load_json(&config_file)?)?;
        if let Some(ref min) = config.leaf_min_version {
            if compare_versions(min, constants::LEAF_VERSION) == Ordering::Greater {
                return Err(Error::invalid_input(format!(
                    "this workspace needs leaf >= {min} (this is {})",
                    constants::LEAF_VERSION
                )));
            }
        }
        Ok(Self {
            root: root.to_path_buf(),
            config,
        })
    }

    /// Walk up from `start` to find a directory holding a workspace
    /// configuration file.
    #[must_use]
    pub fn find_root(start: &Path) -> Option<PathBuf> {
        let mut dir = Some(start);
        while let Some(candidate) = dir {
            if candidate.join(files::WS_CONFIG).exists() {
                return Some(candidate.to_path_buf());
            }
            dir = candidate.parent();
        }
        None
    }

    /// The workspace root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The `leaf-data` folder.
    #[must_use]
    pub fn data_folder(&self) -> PathBuf {
        self.root.join(files::WS_DATA)
    }

    /// A profile's data folder.
    #[must_use]
    pub fn profile_folder(&self, name: &str) -> PathBuf {
        self.data_folder().join(name)
    }

    /// Profile names in creation order.
    #[must_use]
    pub fn profile_names(&self) -> Vec<String> {
        self.config.profiles.keys().cloned().collect()
    }

    /// Fetch a profile view.
    pub fn profile(&self, name: &str) -> Result<Profile> {
        let value = self
            .config
            .profiles
            .get(name)
            .ok_or_else(|| Error::not_found("profile", name))?;
        Ok(Profile {
            name: name.to_string(),
            config: serde_json::from_value(value.clone())?,
        })
    }

    /// Create a profile (configuration only; no folder yet).
    pub fn create_profile(
        &mut self,
        name: &str,
        packages: &[String],
        env: &[(String, String)],
    ) -> Result<Profile> {
        check_profile_name(name)?;
        if self.config.profiles.contains_key(name) {
            return Err(Error::conflict(format!("profile '{name}' already exists")));
        }
        let mut config = ProfileConfig::default();
        merge_packages(&mut config.packages, packages)?;
        for (k, v) in env {
            config.env.insert(k.clone(), serde_json::Value::String(v.clone()));
        }
        self.config
            .profiles
            .insert(name.to_string(), serde_json::to_value(&config)?);
        self.save()?;
        info!(name, "profile created");
        Ok(Profile {
            name: name.to_string(),
            config,
        })
    }

    /// Merge package and environment deltas into a profile. Does not
    /// touch the filesystem.
    pub fn update_profile(
        &mut self,
        name: &str,
        add_packages: &[String],
        env_set: &[(String, String)],
        env_unset: &[String],
    ) -> Result<Profile> {
        let mut profile = self.profile(name)?;
        merge_packages(&mut profile.config.packages, add_packages)?;
        for (k, v) in env_set {
            profile
                .config
                .env
                .insert(k.clone(), serde_json::Value::String(v.clone()));
        }
        for k in env_unset {
            profile.config.env.remove(k);
        }
        self.config
            .profiles
            .insert(name.to_string(), serde_json::to_value(&profile.config)?);
        self.save()?;
        debug!(name, "profile updated");
        Ok(profile)
    }

    /// Delete a profile: configuration slice, data folder, and the
    /// `current` link when it pointed here.
    pub fn delete_profile(&mut self, name: &str) -> Result<()> {
        if self.config.profiles.remove(name).is_none() {
            return Err(Error::not_found("profile", name));
        }
        let folder = self.profile_folder(name);
        if folder.exists() {
            std::fs::remove_dir_all(&folder).map_err(|e| Error::io(&folder, e))?;
        }
        if self.current_profile_name().as_deref() == Some(name) {
            let link = self.current_link();
            let _ = std::fs::remove_file(&link);
        }
        self.save()?;
        info!(name, "profile deleted");
        Ok(())
    }

    /// Atomically re-point the `current` symlink.
    pub fn switch_profile(&self, name: &str) -> Result<()> {
        self.profile(name)?;
        let data = self.data_folder();
        std::fs::create_dir_all(&data).map_err(|e| Error::io(&data, e))?;
        let link = self.current_link();
        let staging = data.join(".current-next");
        let _ = std::fs::remove_file(&staging);
        std::os::unix::fs::symlink(name, &staging).map_err(|e| Error::io(&staging, e))?;
        std::fs::rename(&staging, &link).map_err(|e| Error::io(&link, e))?;
        info!(name, "switched profile");
        Ok(())
    }

    /// The profile the `current` link points at, if any.
    #[must_use]
    pub fn current_profile_name(&self) -> Option<String> {
        std::fs::read_link(self.current_link())
            .ok()
            .map(|target| target.to_string_lossy().into_owned())
    }

    /// Update the workspace environment layer.
    pub fn update_env(&mut self, set: &[(String, String)], unset: &[String]) -> Result<()> {
        for (k, v) in set {
            self.config
                .env
                .insert(k.clone(), serde_json::Value::String(v.clone()));
        }
        for k in unset {
            self.config.env.remove(k);
        }
        self.save()
    }

    /// Apply a feature toggle to the workspace scope.
    pub fn toggle_feature(
        &mut self,
        manager: &leaf_engine::FeatureManager,
        name: &str,
        enum_name: &str,
    ) -> Result<()> {
        let (key, value) = manager.toggle_value(name, enum_name)?;
        match value {
            Some(value) => self.update_env(&[(key, value)], &[]),
            None => self.update_env(&[], &[key]),
        }
    }

    /// Apply a feature toggle to a profile's scope.
    pub fn toggle_profile_feature(
        &mut self,
        manager: &leaf_engine::FeatureManager,
        profile_name: &str,
        name: &str,
        enum_name: &str,
    ) -> Result<()> {
        let (key, value) = manager.toggle_value(name, enum_name)?;
        match value {
            Some(value) => {
                self.update_profile(profile_name, &[], &[(key, value)], &[])?;
            }
            None => {
                self.update_profile(profile_name, &[], &[], &[key])?;
            }
        }
        Ok(())
    }

    /// The workspace environment layer.
    #[must_use]
    pub fn env_layer(&self) -> EnvLayer {
        EnvLayer::from_pairs(
            Some("Exported by workspace".to_string()),
            string_pairs(&self.config.env),
        )
    }

    /// The composed environment a profile resolves and executes in:
    /// builtin → user → workspace → profile. Package layers are
    /// appended by [`Workspace::profile_env`] once the profile is in
    /// sync.
    #[must_use]
    pub fn resolution_env(&self, engine: &Engine, profile: &Profile) -> Environment {
        Environment::build([
            builtin_layer(Some(self.root.as_path()), Some(profile.name.as_str())),
            engine.config().env_layer(),
            self.env_layer(),
            profile.env_layer(),
        ])
    }

    /// Resolve a profile's stated packages to effective identifiers
    /// over the installed store.
    pub fn resolved_identifiers(
        &self,
        engine: &Engine,
        profile: &Profile,
    ) -> Result<Vec<PackageIdentifier>> {
        let installed = engine.list_installed()?;
        let installed_map: ManifestMap<'_> = installed
            .iter()
            .map(|(id, ip)| (id.clone(), &ip.manifest))
            .collect();
        let env = self.resolution_env(engine, profile);
        let seeds = leaf_resolver::resolve_latest(&profile.config.packages, &installed_map)?;
        leaf_resolver::dependency_closure(&seeds, &installed_map, Some(&env), false, false)
    }

    /// Sync a profile: install its resolved packages, then rebuild
    /// the profile symlinks into the store.
    pub async fn sync_profile(&self, engine: &Engine, name: &str) -> Result<()> {
        let profile = self.profile(name)?;
        let env = self.resolution_env(engine, &profile);
        engine
            .install(&profile.config.packages, &env, &InstallOptions::default())
            .await?;

        let resolved = self.resolved_identifiers(engine, &profile)?;
        self.provision_profile(engine, &profile, &resolved)?;

        // Re-run the sync steps of the profile content.
        let queries: Vec<String> = resolved.iter().map(ToString::to_string).collect();
        engine.sync(&queries, &env)?;
        info!(name, "profile in sync");
        Ok(())
    }

    /// Rebuild the symlink layout of a profile: the latest version
    /// of each name links by short name, older duplicates by full
    /// identifier.
    fn provision_profile(
        &self,
        engine: &Engine,
        profile: &Profile,
        resolved: &[PackageIdentifier],
    ) -> Result<()> {
        let folder = self.profile_folder(&profile.name);
        if folder.exists() {
            std::fs::remove_dir_all(&folder).map_err(|e| Error::io(&folder, e))?;
        }
        std::fs::create_dir_all(&folder).map_err(|e| Error::io(&folder, e))?;

        let store = engine.store_root();
        for (link_name, id) in link_names(resolved) {
            let link = folder.join(&link_name);
            let target = store.join(id.to_string());
            debug!(link = %link.display(), target = %target.display(), "linking");
            std::os::unix::fs::symlink(&target, &link).map_err(|e| Error::io(&link, e))?;
        }
        Ok(())
    }

    /// Whether a profile is in sync: every resolved identifier is
    /// installed and correctly linked.
    pub fn is_profile_sync(&self, engine: &Engine, name: &str) -> Result<bool> {
        let profile = self.profile(name)?;
        let Ok(resolved) = self.resolved_identifiers(engine, &profile) else {
            return Ok(false);
        };
        let installed = engine.list_installed()?;
        let store = engine.store_root();
        let folder = self.profile_folder(name);
        for (link_name, id) in link_names(&resolved) {
            if !installed.contains_key(&id) {
                return Ok(false);
            }
            let link = folder.join(link_name);
            match std::fs::read_link(&link) {
                Ok(target) if target == store.join(id.to_string()) && link.exists() => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    /// The full composed environment of a synced profile, package
    /// layers included.
    pub fn profile_env(&self, engine: &Engine, name: &str) -> Result<Environment> {
        let profile = self.profile(name)?;
        if !self.is_profile_sync(engine, name)? {
            return Err(Error::invalid_input(format!(
                "profile '{name}' is out of sync"
            ))
            .with_hints(vec![format!("Run 'leaf profile sync {name}'")]));
        }
        let mut env = self.resolution_env(engine, &profile);
        let resolved = self.resolved_identifiers(engine, &profile)?;
        env.extend(engine.packages_env(&resolved)?);
        Ok(env)
    }

    /// Write the activation and deactivation scripts for an
    /// environment.
    pub fn write_activation_scripts(
        env: &Environment,
        activate: Option<&Path>,
        deactivate: Option<&Path>,
    ) -> Result<()> {
        // The deactivation script captures the current process
        // values, so generate it before anything sources the
        // activation script.
        if let Some(path) = deactivate {
            let mut out = Vec::new();
            env.emit_deactivate(&mut out)?;
            std::fs::write(path, out).map_err(|e| Error::io(path, e))?;
        }
        if let Some(path) = activate {
            let mut out = Vec::new();
            env.emit_activate(&mut out)?;
            std::fs::write(path, out).map_err(|e| Error::io(path, e))?;
        }
        Ok(())
    }

    fn current_link(&self) -> PathBuf {
        self.data_folder().join(files::CURRENT_LINK)
    }

    fn save(&self) -> Result<()> {
        write_json(
            &self.root.join(files::WS_CONFIG),
            &serde_json::to_value(&self.config)?,
            true,
        )
    }
}

/// Reserved / malformed profile names.
fn check_profile_name(name: &str) -> Result<()> {
    if name.is_empty() || name == files::CURRENT_LINK || name.contains('/') {
        return Err(Error::conflict(format!(
            "'{name}' is not a valid profile name"
        )));
    }
    Ok(())
}

/// Merge stated packages: a new entry replaces any previous entry
/// with the same package name.
fn merge_packages(existing: &mut Vec<String>, additions: &[String]) -> Result<()> {
    for addition in additions {
        let name = stated_name(addition)?;
        existing.retain(|entry| stated_name(entry).map(|n| n != name).unwrap_or(true));
        existing.push(addition.clone());
    }
    Ok(())
}

/// The package name of a stated entry (`name` or `name_version`).
fn stated_name(entry: &str) -> Result<String> {
    match entry.split_once('_') {
        Some((name, _)) => Ok(name.to_string()),
        None => Ok(entry.to_string()),
    }
}

/// Link names for a resolved identifier set: short name for the
/// latest version of each package name, full identifier for older
/// duplicates.
fn link_names(resolved: &[PackageIdentifier]) -> Vec<(String, PackageIdentifier)> {
    let mut latest: BTreeMap<&str, &PackageIdentifier> = BTreeMap::new();
    for id in resolved {
        latest
            .entry(id.name.as_str())
            .and_modify(|best| {
                if compare_versions(&id.version, &best.version) == Ordering::Greater {
                    *best = id;
                }
            })
            .or_insert(id);
    }
    resolved
        .iter()
        .map(|id| {
            if latest[id.name.as_str()] == id {
                (id.name.clone(), id.clone())
            } else {
                (id.to_string(), id.clone())
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ids(strings: &[&str]) -> Vec<PackageIdentifier> {
        strings
            .iter()
            .map(|s| PackageIdentifier::parse(s).unwrap())
            .collect()
    }

    #[test]
    fn init_then_open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        Workspace::init(dir.path()).unwrap();
        assert!(Workspace::init(dir.path()).is_err());
        let ws = Workspace::open(dir.path()).unwrap();
        assert!(ws.profile_names().is_empty());
    }

    #[test]
    fn open_requires_config() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Workspace::open(dir.path()).unwrap_err(),
            Error::NotFound { .. }
        ));
    }

    #[test]
    fn find_root_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        Workspace::init(dir.path()).unwrap();
        let nested = dir.path().join("foo/bar");
        std::fs::create_dir_all(&nested).unwrap();
        assert_eq!(Workspace::find_root(&nested).unwrap(), dir.path());
        assert!(Workspace::find_root(Path::new("/nonexistent-leaf-root")).is_none());
    }

    #[test]
    fn profile_names_are_validated() {
        let dir = tempfile::tempdir().unwrap();
        let mut ws = Workspace::init(dir.path()).unwrap();
        for bad in ["", "current", "with/slash"] {
            assert!(ws.create_profile(bad, &[], &[]).is_err(), "{bad:?}");
        }
        ws.create_profile("foo", &[], &[]).unwrap();
        assert!(ws.create_profile("foo", &[], &[]).is_err());
    }

    #[test]
    fn update_replaces_same_name_packages() {
        let dir = tempfile::tempdir().unwrap();
        let mut ws = Workspace::init(dir.path()).unwrap();
        ws.create_profile(
            "foo",
            &["container-A_1.0".to_string(), "deb_1.0".to_string()],
            &[("FOO".to_string(), "BAR".to_string())],
        )
        .unwrap();
        let updated = ws
            .update_profile(
                "foo",
                &["container-A_2.0".to_string()],
                &[("FOO3".to_string(), "BAR3".to_string())],
                &[],
            )
            .unwrap();
        assert_eq!(updated.config.packages, vec!["deb_1.0", "container-A_2.0"]);
        let env = Environment::build([updated.env_layer()]);
        assert_eq!(env.find("FOO").as_deref(), Some("BAR"));
        assert_eq!(env.find("FOO3").as_deref(), Some("BAR3"));

        // Reload from disk: writes preserved everything.
        let ws = Workspace::open(dir.path()).unwrap();
        let profile = ws.profile("foo").unwrap();
        assert_eq!(profile.config.packages, vec!["deb_1.0", "container-A_2.0"]);
    }

    #[test]
    fn delete_clears_data_and_current() {
        let dir = tempfile::tempdir().unwrap();
        let mut ws = Workspace::init(dir.path()).unwrap();
        ws.create_profile("foo", &[], &[]).unwrap();
        std::fs::create_dir_all(ws.profile_folder("foo")).unwrap();
        ws.switch_profile("foo").unwrap();
        assert_eq!(ws.current_profile_name().as_deref(), Some("foo"));

        ws.delete_profile("foo").unwrap();
        assert!(!ws.profile_folder("foo").exists());
        assert!(ws.current_profile_name().is_none());
        assert!(ws.delete_profile("foo").is_err());
    }

    #[test]
    fn switch_is_atomic_repoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut ws = Workspace::init(dir.path()).unwrap();
        ws.create_profile("a", &[], &[]).unwrap();
        ws.create_profile("b", &[], &[]).unwrap();
        ws.switch_profile("a").unwrap();
        assert_eq!(ws.current_profile_name().as_deref(), Some("a"));
        ws.switch_profile("b").unwrap();
        assert_eq!(ws.current_profile_name().as_deref(), Some("b"));
        assert!(ws.switch_profile("missing").is_err());
    }

    #[test]
    fn link_names_prefer_latest() {
        let resolved = ids(&["container-A_1.0", "container-A_2.0", "deb_1.0"]);
        let links = link_names(&resolved);
        let by_name: BTreeMap<String, String> = links
            .into_iter()
            .map(|(link, id)| (link, id.to_string()))
            .collect();
        assert_eq!(by_name["container-A"], "container-A_2.0");
        assert_eq!(by_name["container-A_1.0"], "container-A_1.0");
        assert_eq!(by_name["deb"], "deb_1.0");
    }
}
