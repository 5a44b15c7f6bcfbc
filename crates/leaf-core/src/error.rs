//! Error types for Leaf operations.
//!
//! Every error carries a human-facing message and optional one-line
//! remediation hints that the command layer prints below the message.
//! Variants map one-to-one onto the failure kinds the engine can
//! surface, from malformed input to a held store lock.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Leaf.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed identifier, condition, or manifest.
    #[error("invalid input: {message}")]
    InvalidInput {
        /// Error message.
        message: String,
        /// Remediation hints.
        hints: Vec<String>,
    },

    /// Package, profile, remote, or feature absent.
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// What was looked up (package, profile, remote, feature).
        kind: &'static str,
        /// The name that was not found.
        name: String,
        /// Remediation hints.
        hints: Vec<String>,
    },

    /// Duplicate identifier with differing hash, feature key clash,
    /// reserved or duplicate profile name.
    #[error("conflict: {message}")]
    Conflict {
        /// Error message.
        message: String,
        /// Remediation hints.
        hints: Vec<String>,
    },

    /// Dependency graph cannot be topologically sorted.
    #[error("dependency cycle detected among: {packages}")]
    Cycle {
        /// Comma-joined identifiers that could not be ordered.
        packages: String,
    },

    /// Transport-level failure fetching a remote or artifact.
    #[error("network error: {message}")]
    Network {
        /// Error message.
        message: String,
        /// URL that failed, if known.
        url: Option<String>,
        /// Remediation hints.
        hints: Vec<String>,
    },

    /// Content hash verification failed.
    #[error("hash mismatch for '{name}': expected {expected}, got {actual}")]
    BadHash {
        /// Artifact name.
        name: String,
        /// Expected hash, prefixed form.
        expected: String,
        /// Computed hash, prefixed form.
        actual: String,
    },

    /// Signature verification failed.
    #[error("signature verification failed: {message}")]
    BadSignature {
        /// Error message.
        message: String,
        /// Remediation hints.
        hints: Vec<String>,
    },

    /// An install/sync/uninstall step exited non-zero.
    #[error("step failed: {message}")]
    StepFailed {
        /// Error message.
        message: String,
        /// Exit code, when the subprocess ran at all.
        exit_code: Option<i32>,
        /// Remediation hints.
        hints: Vec<String>,
    },

    /// Store lock acquisition timed out.
    #[error("store lock is held by another process: {path}")]
    LockHeld {
        /// Lock file path.
        path: PathBuf,
    },

    /// SIGINT received; the operation was cancelled cooperatively.
    #[error("operation cancelled")]
    UserCancel,

    /// Filesystem operation failed.
    #[error("io error at {path}: {message}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// JSON (de)serialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create an invalid input error.
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
            hints: Vec::new(),
        }
    }

    /// Create a not found error.
    #[must_use]
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
            hints: Vec::new(),
        }
    }

    /// Create a conflict error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
            hints: Vec::new(),
        }
    }

    /// Create a network error.
    #[must_use]
    pub fn network(message: impl Into<String>, url: Option<String>) -> Self {
        let message = message.into();
        let mut hints = vec!["Check your network connection".to_string()];
        if let Some(ref u) = url {
            hints.push(format!("Verify the URL is reachable: {u}"));
        }
        if message.contains("timeout") || message.contains("timed out") {
            hints.push("Increase the timeout with LEAF_TIMEOUT=<seconds>".to_string());
        }
        Self::Network {
            message,
            url,
            hints,
        }
    }

    /// Create a step failure error.
    #[must_use]
    pub fn step_failed(message: impl Into<String>, exit_code: Option<i32>) -> Self {
        Self::StepFailed {
            message: message.into(),
            exit_code,
            hints: Vec::new(),
        }
    }

    /// Create an IO error with path context.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// Attach remediation hints, replacing any default ones.
    #[must_use]
    pub fn with_hints(mut self, new_hints: Vec<String>) -> Self {
        match &mut self {
            Self::InvalidInput { hints, .. }
            | Self::NotFound { hints, .. }
            | Self::Conflict { hints, .. }
            | Self::Network { hints, .. }
            | Self::BadSignature { hints, .. }
            | Self::StepFailed { hints, .. } => *hints = new_hints,
            _ => {}
        }
        self
    }

    /// Get remediation hints for this error.
    #[must_use]
    pub fn hints(&self) -> &[String] {
        match self {
            Self::InvalidInput { hints, .. }
            | Self::NotFound { hints, .. }
            | Self::Conflict { hints, .. }
            | Self::Network { hints, .. }
            | Self::BadSignature { hints, .. }
            | Self::StepFailed { hints, .. } => hints,
            _ => &[],
        }
    }

    /// Whether this error counts as an expected failure for the
    /// command layer (exit code 2) rather than an internal error.
    #[must_use]
    pub fn is_expected(&self) -> bool {
        !matches!(self, Self::Io { .. } | Self::Json(_))
    }

    /// Format the error with its hints for terminal display.
    #[must_use]
    pub fn display_with_hints(&self) -> String {
        let mut out = self.to_string();
        for hint in self.hints() {
            out.push_str("\n  hint: ");
            out.push_str(hint);
        }
        out
    }
}

/// Result type for Leaf operations.
pub type Result<T> = std::result::Result<T, Error>;
