//! Detached-signature verification through the host `gpg`.
//!
//! Remotes may carry a key id; when they do, the engine fetches
//! `<index-url>.asc` and verifies it here. Keys live in a dedicated
//! homedir under the configuration root so leaf never touches the
//! user's own keyring.

use leaf_core::{constants, Error, Result};
use std::path::Path;
use std::process::Command;
use tracing::{debug, info};

/// The keyserver, honoring `LEAF_GPG_KEYSERVER`.
#[must_use]
pub fn keyserver() -> String {
    std::env::var(constants::envvars::GPG_KEYSERVER)
        .unwrap_or_else(|_| constants::DEFAULT_GPG_KEYSERVER.to_string())
}

/// Fetch a key into the leaf GPG homedir.
pub fn receive_key(gpg_home: &Path, key_id: &str) -> Result<()> {
    std::fs::create_dir_all(gpg_home).map_err(|e| Error::io(gpg_home, e))?;
    let server = keyserver();
    info!(key_id, server, "fetching gpg key");
    let output = Command::new("gpg")
        .arg("--homedir")
        .arg(gpg_home)
        .arg("--keyserver")
        .arg(&server)
        .arg("--recv-keys")
        .arg(key_id)
        .output()
        .map_err(|e| Error::io(gpg_home, e))?;
    if output.status.success() {
        Ok(())
    } else {
        Err(Error::BadSignature {
            message: format!(
                "cannot fetch key {key_id} from {server}: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
            hints: vec![format!(
                "Set another keyserver with {}=<host>",
                constants::envvars::GPG_KEYSERVER
            )],
        })
    }
}

/// Verify `file` against its detached signature `signature`.
pub fn verify(gpg_home: &Path, file: &Path, signature: &Path) -> Result<()> {
    debug!(file = %file.display(), "verifying signature");
    let output = Command::new("gpg")
        .arg("--homedir")
        .arg(gpg_home)
        .arg("--verify")
        .arg(signature)
        .arg(file)
        .output()
        .map_err(|e| Error::io(file, e))?;
    if output.status.success() {
        info!(file = %file.display(), "signature valid");
        Ok(())
    } else {
        Err(Error::BadSignature {
            message: format!(
                "invalid signature for {}: {}",
                file.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            ),
            hints: vec![
                "The document may be corrupted or tampered with".to_string(),
                "Check the remote's gpg key configuration".to_string(),
            ],
        })
    }
}
