//! Artifact transport and integrity for Leaf.
//!
//! - Streaming downloads over `http(s)://` and `file://` with
//!   timeout, cache reuse, and cooperative cancellation
//! - Prefixed `<algo>:<hex>` content hashing
//! - Constrained `tar` subprocess extraction and creation
//! - Detached GPG signature verification

pub mod archive;
pub mod download;
pub mod gpg;
pub mod hash;

pub use archive::{check_extra_args, extract, Compression, CreateOptions, FORBIDDEN_TAR_ARGS};
pub use download::download_file;
pub use hash::{cached_artifact_name, verify_file, Hash, HashAlgo, DEFAULT_ALGO};
