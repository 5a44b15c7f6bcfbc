//! File names, environment variables, and defaults shared across the
//! workspace.

/// The engine version, stamped into `LEAF_VERSION` for every step.
pub const LEAF_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Reserved version keyword resolving to the highest available
/// version; forbidden in any persisted manifest or index.
pub const LATEST: &str = "latest";

/// Default profile name used by `init`.
pub const DEFAULT_PROFILE: &str = "default";

/// Well-known file and folder names.
pub mod files {
    /// Package manifest file name.
    pub const MANIFEST: &str = "manifest.json";
    /// Workspace configuration file name.
    pub const WS_CONFIG: &str = "leaf-workspace.json";
    /// Workspace data folder name.
    pub const WS_DATA: &str = "leaf-data";
    /// Current-profile symlink name.
    pub const CURRENT_LINK: &str = "current";
    /// User configuration file name.
    pub const CONFIG: &str = "config.json";
    /// GPG home folder name inside the configuration root.
    pub const GPG_FOLDER: &str = "gpg";
    /// Download cache folder name inside the cache root.
    pub const CACHE_DOWNLOAD: &str = "files";
    /// Remote index cache folder name inside the cache root.
    pub const CACHE_REMOTES: &str = "remotes";
    /// Store lock file name.
    pub const LOCK: &str = "lock";
    /// Store folder name under the home directory.
    pub const DEFAULT_STORE: &str = ".leaf";
    /// External info sidecar extension (appended to artifact names).
    pub const INFO_EXTENSION: &str = ".info";
    /// Extra tags sidecar extension (appended to artifact names).
    pub const TAGS_EXTENSION: &str = ".tags";
}

/// Environment variables consumed by the engine.
pub mod envvars {
    /// Download timeout in seconds (default 10).
    pub const TIMEOUT: &str = "LEAF_TIMEOUT";
    /// Raise logging to debug level.
    pub const DEBUG: &str = "LEAF_DEBUG";
    /// GPG keyserver override.
    pub const GPG_KEYSERVER: &str = "LEAF_GPG_KEYSERVER";
    /// Suppress interactive prompts.
    pub const NON_INTERACTIVE: &str = "LEAF_NON_INTERACTIVE";
    /// Alternate `tar` binary.
    pub const TAR_BIN: &str = "LEAF_TAR_BIN";
    /// Bypass the store lock (tests only).
    pub const DISABLE_LOCKS: &str = "LEAF_DISABLE_LOCKS";
    /// Theme selection for the renderer (consumed by the command
    /// layer, not the engine).
    pub const THEME: &str = "LEAF_THEME";
    /// Workspace directory override.
    pub const WORKSPACE: &str = "LEAF_WORKSPACE";
    /// Configuration root override.
    pub const CONFIG: &str = "LEAF_CONFIG";
    /// Cache root override.
    pub const CACHE: &str = "LEAF_CACHE";
}

/// Remote index cache time-to-live in seconds (24 hours). A cache
/// file whose age reaches this value is refetched.
pub const REMOTE_CACHE_TTL_SECS: u64 = 24 * 60 * 60;

/// Default download timeout in seconds when `LEAF_TIMEOUT` is unset.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default GPG keyserver.
pub const DEFAULT_GPG_KEYSERVER: &str = "subset.pool.sks-keyservers.net";

/// Suffix inserted when a failed install folder is kept for
/// inspection; a unix timestamp follows.
pub const IGNORED_SUFFIX: &str = "_ignored";

/// The effective download timeout, honoring `LEAF_TIMEOUT`.
#[must_use]
pub fn download_timeout_secs() -> u64 {
    std::env::var(envvars::TIMEOUT)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_TIMEOUT_SECS)
}
