//! Subcommand implementations.

use crate::{Cli, Command};
use clap::{Args, Subcommand};
use leaf_core::json::JsonMap;
use leaf_core::{Environment, Error, Result};
use leaf_downloader::archive::Compression;
use leaf_engine::{Engine, InstallOptions, LeafDirs};
use leaf_releng::{IndexOptions, PackageOptions};
use leaf_remote::Remote;
use leaf_workspace::Workspace;
use std::io::Write;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[derive(Subcommand)]
pub enum RemoteCommand {
    /// List configured remotes.
    List,
    /// Add a remote.
    Add {
        alias: String,
        url: String,
        /// GPG key id used to verify the index signature.
        #[arg(long)]
        gpg_key: Option<String>,
    },
    /// Remove a remote and its cached index.
    Remove { alias: String },
    /// Enable a remote.
    Enable { alias: String },
    /// Disable a remote without losing its configuration.
    Disable { alias: String },
}

#[derive(Args)]
pub struct EnvArgs {
    /// Profile name (defaults to the current profile).
    pub profile: Option<String>,
    /// Write the activation script here.
    #[arg(long)]
    pub activate_script: Option<PathBuf>,
    /// Write the deactivation script here.
    #[arg(long)]
    pub deactivate_script: Option<PathBuf>,
    /// Set a user environment variable (KEY=VALUE).
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub set: Vec<String>,
    /// Unset a user environment variable.
    #[arg(long = "unset", value_name = "KEY")]
    pub unset: Vec<String>,
}

#[derive(Clone, Copy, clap::ValueEnum)]
pub enum FeatureScope {
    User,
    Workspace,
    Profile,
}

#[derive(Subcommand)]
pub enum FeatureCommand {
    /// List known features.
    List,
    /// Set a feature to one of its enums in some scope.
    Toggle {
        name: String,
        value: String,
        /// Environment scope receiving the key.
        #[arg(long, value_enum, default_value = "user")]
        scope: FeatureScope,
    },
    /// Show the enums matching the current value.
    Query { name: String },
}

#[derive(Subcommand)]
pub enum ProfileCommand {
    /// List profiles.
    List,
    /// Create a profile.
    Create {
        name: String,
        /// Packages for the profile.
        #[arg(short, long = "package")]
        packages: Vec<String>,
        /// Profile environment variables (KEY=VALUE).
        #[arg(short, long = "env")]
        env: Vec<String>,
    },
    /// Merge packages and environment into a profile.
    Update {
        name: String,
        #[arg(short, long = "package")]
        packages: Vec<String>,
        #[arg(short, long = "env")]
        env: Vec<String>,
        #[arg(long = "unset-env")]
        unset_env: Vec<String>,
    },
    /// Delete profiles.
    Delete { names: Vec<String> },
    /// Install and link a profile's packages.
    Sync { name: Option<String> },
    /// Make a profile the current one.
    Switch { name: String },
}

#[derive(Subcommand)]
pub enum RelengCommand {
    /// Package a folder into an archive.
    Pack {
        /// Folder containing a manifest.json.
        #[arg(long)]
        source: PathBuf,
        /// Output archive path.
        #[arg(long, short)]
        output: PathBuf,
        /// Stamp all entry mtimes for reproducible output.
        #[arg(long)]
        timestamp: Option<u64>,
        /// Force root ownership on all entries.
        #[arg(long)]
        root_owner: bool,
        /// Skip the external .info sidecar.
        #[arg(long)]
        no_info: bool,
        /// Override the extension-derived compression.
        #[arg(long)]
        compression: Option<String>,
        /// Extra arguments passed to tar.
        #[arg(last = true)]
        tar_args: Vec<String>,
    },
    /// Generate an index over artifacts.
    Index {
        /// Output index path.
        #[arg(long, short)]
        output: PathBuf,
        /// Artifact archives to reference.
        artifacts: Vec<PathBuf>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Pretty-print the document.
        #[arg(long)]
        pretty: bool,
        /// Ignore .info sidecars and re-read every archive.
        #[arg(long)]
        no_external_info: bool,
        /// Ignore .tags sidecar files.
        #[arg(long)]
        no_extra_tags: bool,
    },
    /// Assemble a manifest.json from fragments.
    Manifest {
        /// Output manifest path.
        #[arg(long, short)]
        output: PathBuf,
        /// JSON fragments merged in order.
        #[arg(long = "fragment")]
        fragments: Vec<PathBuf>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        version: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long = "depend")]
        depends: Vec<String>,
        #[arg(long = "require")]
        requires: Vec<String>,
        /// Replace #{VAR} references from the process environment.
        #[arg(long)]
        resolve_env: bool,
    },
}

/// Dispatch a parsed command line.
pub async fn run(cli: Cli, token: CancellationToken) -> Result<()> {
    let engine = Engine::open(LeafDirs::discover()?)?
        .with_verbose(cli.verbose)
        .with_token(token);

    match cli.command {
        Command::Config { root } => {
            let mut engine = engine;
            if let Some(root) = root {
                engine.set_store_root(&root)?;
            }
            println!("store: {}", engine.store_root().display());
            println!("config: {}", engine.dirs().config_root.display());
            println!("cache: {}", engine.dirs().cache_root.display());
            Ok(())
        }
        Command::Remote { command } => remote(engine, command),
        Command::Refresh => {
            let outcome = engine.fetch_remotes(true).await?;
            println!("{} packages available", outcome.catalogue.len());
            for (alias, err) in outcome.failed {
                eprintln!("warning: remote '{alias}' failed: {err}");
            }
            Ok(())
        }
        Command::Search { query } => search(engine, query.as_deref()).await,
        Command::Install {
            packages,
            keep_on_error,
        } => {
            if !cli.non_interactive && !confirm("Install these packages?")? {
                return Err(Error::UserCancel);
            }
            let installed = engine
                .install(
                    &packages,
                    &engine.base_env(),
                    &InstallOptions { keep_on_error },
                )
                .await?;
            for id in installed {
                println!("{id}");
            }
            Ok(())
        }
        Command::Uninstall { packages } => {
            if !cli.non_interactive && !confirm("Uninstall these packages?")? {
                return Err(Error::UserCancel);
            }
            let removed = engine.uninstall(&packages, &engine.base_env())?;
            for id in removed {
                println!("{id}");
            }
            Ok(())
        }
        Command::Sync { packages } => engine.sync(&packages, &engine.base_env()),
        Command::Env { args } => env(engine, cli.workspace, args),
        Command::Feature { command } => feature(engine, cli.workspace, command).await,
        Command::Init => {
            let root = std::env::current_dir().map_err(|e| Error::io(".", e))?;
            Workspace::init(&root)?;
            Ok(())
        }
        Command::Profile { command } => profile(engine, cli.workspace, command).await,
        Command::Releng { command } => releng(command),
    }
}

fn open_workspace(explicit: Option<PathBuf>) -> Result<Workspace> {
    let root = match explicit {
        Some(path) => path,
        None => {
            let cwd = std::env::current_dir().map_err(|e| Error::io(".", e))?;
            Workspace::find_root(&cwd).ok_or_else(|| {
                Error::not_found("workspace", cwd.to_string_lossy())
                    .with_hints(vec!["Initialize one with 'leaf init'".to_string()])
            })?
        }
    };
    Workspace::open(&root)
}

fn remote(mut engine: Engine, command: RemoteCommand) -> Result<()> {
    match command {
        RemoteCommand::List => {
            for remote in engine.remotes()? {
                let state = if remote.enabled { "enabled" } else { "disabled" };
                println!("{}\t{}\t[{state}]", remote.alias, remote.url);
            }
            Ok(())
        }
        RemoteCommand::Add {
            alias,
            url,
            gpg_key,
        } => {
            let mut remote = Remote::new(alias, url);
            remote.gpg_key = gpg_key;
            engine.add_remote(&remote)
        }
        RemoteCommand::Remove { alias } => engine.remove_remote(&alias),
        RemoteCommand::Enable { alias } => engine.enable_remote(&alias, true),
        RemoteCommand::Disable { alias } => engine.enable_remote(&alias, false),
    }
}

async fn search(engine: Engine, query: Option<&str>) -> Result<()> {
    let outcome = engine.fetch_remotes(false).await?;
    let installed = engine.list_installed()?;
    let query = query.map(str::to_lowercase);
    for (id, package) in &outcome.catalogue {
        let info = &package.manifest.info;
        let haystack = format!(
            "{id} {} {}",
            info.description.as_deref().unwrap_or_default(),
            info.tags.join(" ")
        )
        .to_lowercase();
        if query.as_deref().is_some_and(|q| !haystack.contains(q)) {
            continue;
        }
        let marker = if installed.contains_key(id) { "i" } else { " " };
        println!(
            "[{marker}] {id}\t{}",
            info.description.as_deref().unwrap_or_default()
        );
    }
    Ok(())
}

fn env(mut engine: Engine, workspace: Option<PathBuf>, args: EnvArgs) -> Result<()> {
    if !args.set.is_empty() || !args.unset.is_empty() {
        let set = parse_env_pairs(&args.set)?;
        engine.update_user_env(&set, &args.unset)?;
    }

    let env = profile_or_base_env(&engine, workspace, args.profile.as_deref())?;
    let mut stdout = std::io::stdout().lock();
    env.emit_activate(&mut stdout)?;
    Workspace::write_activation_scripts(
        &env,
        args.activate_script.as_deref(),
        args.deactivate_script.as_deref(),
    )
}

fn profile_or_base_env(
    engine: &Engine,
    workspace: Option<PathBuf>,
    profile: Option<&str>,
) -> Result<Environment> {
    match open_workspace(workspace) {
        Ok(ws) => {
            let name = match profile {
                Some(name) => name.to_string(),
                None => ws.current_profile_name().ok_or_else(|| {
                    Error::not_found("profile", "current")
                        .with_hints(vec!["Select one with 'leaf profile switch'".to_string()])
                })?,
            };
            ws.profile_env(engine, &name)
        }
        Err(_) if profile.is_none() => Ok(engine.base_env()),
        Err(err) => Err(err),
    }
}

async fn feature(
    mut engine: Engine,
    workspace: Option<PathBuf>,
    command: FeatureCommand,
) -> Result<()> {
    let manager = engine.feature_manager().await?;
    match command {
        FeatureCommand::List => {
            for feature in manager.features() {
                println!(
                    "{}\t{}\t{}\t{}",
                    feature.name,
                    feature.key(),
                    feature.enums().join("|"),
                    feature.description.as_deref().unwrap_or_default()
                );
            }
            Ok(())
        }
        FeatureCommand::Toggle { name, value, scope } => match scope {
            FeatureScope::User => engine.toggle_user_feature(&manager, &name, &value),
            FeatureScope::Workspace => {
                let mut ws = open_workspace(workspace)?;
                ws.toggle_feature(&manager, &name, &value)
            }
            FeatureScope::Profile => {
                let mut ws = open_workspace(workspace)?;
                let profile = ws.current_profile_name().ok_or_else(|| {
                    Error::not_found("profile", "current")
                })?;
                ws.toggle_profile_feature(&manager, &profile, &name, &value)
            }
        },
        FeatureCommand::Query { name } => {
            let env = profile_or_base_env(&engine, workspace, None)
                .unwrap_or_else(|_| engine.base_env());
            match manager.query(&name, &env)? {
                Some(enums) => println!("{enums}"),
                None => println!("(unset)"),
            }
            Ok(())
        }
    }
}

async fn profile(
    engine: Engine,
    workspace: Option<PathBuf>,
    command: ProfileCommand,
) -> Result<()> {
    let mut ws = open_workspace(workspace)?;
    match command {
        ProfileCommand::List => {
            let current = ws.current_profile_name();
            for name in ws.profile_names() {
                let marker = if current.as_deref() == Some(name.as_str()) {
                    " [current]"
                } else {
                    ""
                };
                let profile = ws.profile(&name)?;
                println!("{name}{marker}\t{}", profile.config.packages.join(" "));
            }
            Ok(())
        }
        ProfileCommand::Create {
            name,
            packages,
            env,
        } => {
            ws.create_profile(&name, &packages, &parse_env_pairs(&env)?)?;
            Ok(())
        }
        ProfileCommand::Update {
            name,
            packages,
            env,
            unset_env,
        } => {
            ws.update_profile(&name, &packages, &parse_env_pairs(&env)?, &unset_env)?;
            Ok(())
        }
        ProfileCommand::Delete { names } => {
            for name in names {
                ws.delete_profile(&name)?;
            }
            Ok(())
        }
        ProfileCommand::Sync { name } => {
            let name = match name {
                Some(name) => name,
                None => ws.current_profile_name().ok_or_else(|| {
                    Error::not_found("profile", "current")
                })?,
            };
            ws.sync_profile(&engine, &name).await
        }
        ProfileCommand::Switch { name } => ws.switch_profile(&name),
    }
}

fn releng(command: RelengCommand) -> Result<()> {
    match command {
        RelengCommand::Pack {
            source,
            output,
            timestamp,
            root_owner,
            no_info,
            compression,
            tar_args,
        } => {
            let compression = compression
                .as_deref()
                .map(|c| match c {
                    "none" => Ok(Compression::None),
                    "gz" => Ok(Compression::Gzip),
                    "bz2" => Ok(Compression::Bzip2),
                    "xz" => Ok(Compression::Xz),
                    other => Err(Error::invalid_input(format!(
                        "unknown compression '{other}'"
                    ))),
                })
                .transpose()?;
            leaf_releng::create_package(
                &source,
                &output,
                &PackageOptions {
                    compression,
                    tar_extra_args: tar_args,
                    force_timestamp: timestamp,
                    force_root_owner: root_owner,
                    store_info: !no_info,
                },
            )?;
            Ok(())
        }
        RelengCommand::Index {
            output,
            artifacts,
            name,
            description,
            pretty,
            no_external_info,
            no_extra_tags,
        } => leaf_releng::generate_index(
            &output,
            &artifacts,
            &IndexOptions {
                name,
                description,
                use_external_info: !no_external_info,
                use_extra_tags: !no_extra_tags,
                pretty,
            },
        ),
        RelengCommand::Manifest {
            output,
            fragments,
            name,
            version,
            description,
            tags,
            depends,
            requires,
            resolve_env,
        } => {
            let mut info = JsonMap::new();
            let scalars = [
                ("name", name),
                ("version", version),
                ("description", description),
            ];
            for (key, value) in scalars {
                if let Some(value) = value {
                    info.insert(key.to_string(), serde_json::Value::String(value));
                }
            }
            let lists = [("tags", tags), ("depends", depends), ("requires", requires)];
            for (key, values) in lists {
                if !values.is_empty() {
                    info.insert(key.to_string(), serde_json::json!(values));
                }
            }
            leaf_releng::generate_manifest(&output, &fragments, &info, resolve_env)?;
            Ok(())
        }
    }
}

fn parse_env_pairs(pairs: &[String]) -> Result<Vec<(String, String)>> {
    pairs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| {
                    Error::invalid_input(format!("'{pair}' is not of the form KEY=VALUE"))
                })
        })
        .collect()
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} [y/N] ");
    std::io::stdout().flush().map_err(|e| Error::io("<stdout>", e))?;
    let mut answer = String::new();
    std::io::stdin()
        .read_line(&mut answer)
        .map_err(|e| Error::io("<stdin>", e))?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}
