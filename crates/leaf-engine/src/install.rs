//! Install, uninstall, and sync flows over the store.
//!
//! The store holds one directory per installed identifier. Packages
//! are staged into a partial directory, their install steps run
//! there, and only a fully successful package is renamed to its
//! final name. A failed package is removed, or kept under
//! `<id>_ignored<ts>` for inspection, and never listed again.

use crate::lock::StoreLock;
use crate::steps::StepExecutor;
use crate::Engine;
use leaf_core::constants::files;
use leaf_core::manifest::InstalledPackage;
use leaf_core::{
    EnvLayer, Environment, Error, Manifest, PackageIdentifier, Result, VariableResolver,
};
use leaf_downloader::Hash;
use leaf_resolver::ManifestMap;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Options for [`Engine::install`].
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Keep a failed package folder as `<id>_ignored<ts>` instead of
    /// deleting it.
    pub keep_on_error: bool,
}

fn ignored_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new("^.*_ignored[0-9]*$").unwrap())
}

/// Whether a store folder is a kept-on-error leftover.
#[must_use]
pub fn is_ignored_folder(name: &str) -> bool {
    ignored_regex().is_match(name)
}

fn mark_ignored(folder: &Path, id: &PackageIdentifier) -> Result<PathBuf> {
    let ts = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let target = folder
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(format!("{id}{}{ts}", leaf_core::constants::IGNORED_SUFFIX));
    std::fs::rename(folder, &target).map_err(|e| Error::io(folder, e))?;
    warn!(folder = %target.display(), "package folder kept for inspection");
    Ok(target)
}

impl Engine {
    /// Scan the store for installed packages, skipping ignored and
    /// partial folders.
    pub fn list_installed(&self) -> Result<BTreeMap<PackageIdentifier, InstalledPackage>> {
        let store = self.store_root();
        let mut out = BTreeMap::new();
        if !store.exists() {
            return Ok(out);
        }
        for entry in std::fs::read_dir(&store).map_err(|e| Error::io(&store, e))? {
            let entry = entry.map_err(|e| Error::io(&store, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !entry.path().is_dir() || name.starts_with('.') || is_ignored_folder(&name) {
                continue;
            }
            if !entry.path().join(files::MANIFEST).exists() {
                continue;
            }
            match InstalledPackage::load(&entry.path()) {
                Ok(package) => {
                    out.insert(package.manifest.identifier()?, package);
                }
                Err(err) => warn!(folder = %name, %err, "skipping unreadable package"),
            }
        }
        Ok(out)
    }

    /// Install the queried packages and their active dependencies.
    ///
    /// Returns the identifiers actually installed, in plan order.
    /// Installing an already-installed identifier is a no-op.
    pub async fn install(
        &self,
        queries: &[String],
        env: &Environment,
        opts: &InstallOptions,
    ) -> Result<Vec<PackageIdentifier>> {
        let _lock = StoreLock::acquire(&self.store_root())?;

        let outcome = self.fetch_remotes(false).await?;
        for (alias, err) in &outcome.failed {
            warn!(alias, %err, "remote unavailable, using cached data");
        }
        let installed = self.list_installed()?;
        let available: ManifestMap<'_> = outcome
            .catalogue
            .iter()
            .map(|(id, ap)| (id.clone(), &ap.manifest))
            .collect();

        let seeds = leaf_resolver::resolve_latest(queries, &available)?;
        let installed_ids = installed.keys().cloned().collect();
        let plan = leaf_resolver::install_plan(&seeds, &available, &installed_ids, env)?;
        if plan.is_empty() {
            info!("all requested packages are already installed");
            return Ok(plan);
        }

        // Prerequisites must be installed already, or be part of the
        // plan themselves.
        for prereq in leaf_resolver::prereq_plan(&plan, &available)? {
            if !installed.contains_key(&prereq) && !plan.contains(&prereq) {
                return Err(Error::not_found("prerequisite", prereq.to_string())
                    .with_hints(vec![format!("Install it first: leaf install {prereq}")]));
            }
        }

        info!(
            plan = %plan.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "),
            "installing"
        );
        for id in &plan {
            if self.token().is_cancelled() {
                return Err(Error::UserCancel);
            }
            let package = &outcome.catalogue[id];
            self.install_one(id, package, env, opts).await?;
        }
        Ok(plan)
    }

    async fn install_one(
        &self,
        id: &PackageIdentifier,
        package: &leaf_core::manifest::AvailablePackage,
        env: &Environment,
        opts: &InstallOptions,
    ) -> Result<()> {
        let store = self.store_root();
        let hash = Hash::parse(&package.hash)?;
        let filename = package
            .url
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("artifact.leaf");
        let cached = self
            .dirs()
            .download_cache()
            .join(leaf_downloader::cached_artifact_name(filename, Some(&hash)));
        let token = self.token();
        leaf_downloader::download_file(&package.url, &cached, Some(&hash), &token).await?;

        // Stage into a partial folder; only a fully installed
        // package reaches its final name.
        let staging = store.join(format!(".partial-{id}"));
        if staging.exists() {
            std::fs::remove_dir_all(&staging).map_err(|e| Error::io(&staging, e))?;
        }
        std::fs::create_dir_all(&staging).map_err(|e| Error::io(&staging, e))?;
        leaf_downloader::extract(&cached, &staging, &[])?;

        let manifest = Manifest::load(&staging.join(files::MANIFEST))?;

        let result = self.run_install_steps(id, &manifest, &staging, env);
        if let Err(err) = result {
            if opts.keep_on_error {
                mark_ignored(&staging, id)?;
            } else {
                let _ = std::fs::remove_dir_all(&staging);
            }
            return Err(err);
        }

        let final_folder = store.join(id.to_string());
        std::fs::rename(&staging, &final_folder).map_err(|e| Error::io(&final_folder, e))?;
        info!(%id, folder = %final_folder.display(), "installed");
        Ok(())
    }

    fn run_install_steps(
        &self,
        id: &PackageIdentifier,
        manifest: &Manifest,
        folder: &Path,
        env: &Environment,
    ) -> Result<()> {
        if manifest.install.is_empty() {
            return Ok(());
        }
        let installed = self.list_installed()?;
        let resolver = self.resolver_for(id, folder, &installed);
        let mut step_env = env.clone();
        let dep_ids: Vec<PackageIdentifier> = manifest
            .depends()?
            .into_iter()
            .map(|edge| edge.identifier)
            .filter(|dep| installed.contains_key(dep))
            .collect();
        step_env.extend(self.packages_env(&dep_ids)?);
        let executor = StepExecutor::new(folder, &resolver, &step_env, self.verbose());
        executor.run_steps(&manifest.install, "install", false)
    }

    /// Uninstall the queried packages, keeping anything still needed
    /// by other installed packages. Returns the removed identifiers.
    pub fn uninstall(
        &self,
        queries: &[String],
        env: &Environment,
    ) -> Result<Vec<PackageIdentifier>> {
        let _lock = StoreLock::acquire(&self.store_root())?;

        let installed = self.list_installed()?;
        let installed_map: ManifestMap<'_> = installed
            .iter()
            .map(|(id, ip)| (id.clone(), &ip.manifest))
            .collect();
        let seeds = leaf_resolver::resolve_latest(queries, &installed_map)?;
        let plan = leaf_resolver::uninstall_plan(&seeds, &installed_map)?;
        if plan.is_empty() {
            info!("nothing can be uninstalled");
            return Ok(plan);
        }

        for id in &plan {
            if self.token().is_cancelled() {
                return Err(Error::UserCancel);
            }
            let package = &installed[id];
            // Uninstall steps never abort the removal.
            let resolver = self.resolver_for(id, &package.folder, &installed);
            let executor = StepExecutor::new(&package.folder, &resolver, env, self.verbose());
            executor.run_steps(&package.manifest.uninstall, "uninstall", true)?;

            if let Err(err) = std::fs::remove_dir_all(&package.folder) {
                warn!(%id, %err, "cannot remove package folder, marking as ignored");
                mark_ignored(&package.folder, id)?;
            } else {
                info!(%id, "uninstalled");
            }
        }
        Ok(plan)
    }

    /// Re-run the sync steps of the queried installed packages and
    /// their dependencies, in topological order.
    pub fn sync(&self, queries: &[String], env: &Environment) -> Result<()> {
        let _lock = StoreLock::acquire(&self.store_root())?;

        let installed = self.list_installed()?;
        let installed_map: ManifestMap<'_> = installed
            .iter()
            .map(|(id, ip)| (id.clone(), &ip.manifest))
            .collect();
        let seeds = leaf_resolver::resolve_latest(queries, &installed_map)?;
        let order =
            leaf_resolver::dependency_closure(&seeds, &installed_map, Some(env), false, false)?;

        for id in &order {
            let package = &installed[id];
            if package.manifest.sync.is_empty() {
                continue;
            }
            debug!(%id, "running sync steps");
            let resolver = self.resolver_for(id, &package.folder, &installed);
            let executor = StepExecutor::new(&package.folder, &resolver, env, self.verbose());
            executor.run_steps(&package.manifest.sync, "sync", false)?;
        }
        Ok(())
    }

    /// The environment exported by the given installed packages and
    /// their dependencies, dependency-first, with `@{…}` references
    /// resolved.
    pub fn packages_env(&self, ids: &[PackageIdentifier]) -> Result<Environment> {
        let installed = self.list_installed()?;
        let installed_map: ManifestMap<'_> = installed
            .iter()
            .map(|(id, ip)| (id.clone(), &ip.manifest))
            .collect();
        let order =
            leaf_resolver::dependency_closure(ids, &installed_map, None, false, false)?;

        let mut env = Environment::new();
        for id in &order {
            let package = &installed[id];
            let resolver = self.resolver_for(id, &package.folder, &installed);
            let raw = package.manifest.env_layer();
            let mut layer = EnvLayer::from_pairs(raw.comment.clone(), []);
            for (key, value) in &raw.pairs {
                layer.set(key.clone(), resolver.resolve(value)?);
            }
            env.push_layer(layer);
        }
        Ok(env)
    }

    fn resolver_for(
        &self,
        id: &PackageIdentifier,
        folder: &Path,
        installed: &BTreeMap<PackageIdentifier, InstalledPackage>,
    ) -> VariableResolver {
        let mut resolver = VariableResolver::new();
        resolver.add_package(id, folder, true);
        for (other_id, other) in installed {
            if other_id != id {
                resolver.add_package(other_id, &other.folder, false);
            }
        }
        resolver
    }
}
