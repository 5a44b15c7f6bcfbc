//! Constrained `tar` subprocess invocation.
//!
//! Leaf never links an archive library: extraction and creation both
//! shell out to `tar` (or `LEAF_TAR_BIN`). Compression is inferred
//! from the file extension; caller-supplied extra arguments are
//! rejected when they would change the operation mode or the target
//! paths.

use leaf_core::{constants::envvars, Error, Result};
use std::path::Path;
use std::process::Command;
use tracing::{debug, warn};

/// Arguments that would change the tar operation itself and are
/// therefore never accepted from callers.
pub const FORBIDDEN_TAR_ARGS: &[&str] = &[
    "-A",
    "--catenate",
    "--concatenate",
    "-c",
    "--create",
    "-d",
    "--diff",
    "--compare",
    "--delete",
    "-r",
    "--append",
    "-t",
    "--list",
    "--test-label",
    "-u",
    "--update",
    "-x",
    "--extract",
    "--get",
    "-C",
    "--directory",
    "-f",
    "--file",
];

/// Compression applied to an archive, inferred from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Bzip2,
    Xz,
}

impl Compression {
    /// Infer from a file name. `.leaf` and anything unknown default
    /// to xz.
    #[must_use]
    pub fn from_file_name(name: &str) -> Self {
        if name.ends_with(".tar") {
            Self::None
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Self::Gzip
        } else if name.ends_with(".tar.bz2") {
            Self::Bzip2
        } else {
            Self::Xz
        }
    }

    /// The tar flag selecting this compression, if any.
    #[must_use]
    pub const fn tar_flag(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Gzip => Some("-z"),
            Self::Bzip2 => Some("-j"),
            Self::Xz => Some("-J"),
        }
    }
}

/// Reject extra arguments overlapping the forbidden set.
pub fn check_extra_args(args: &[String]) -> Result<()> {
    let forbidden: Vec<&str> = args
        .iter()
        .map(String::as_str)
        .filter(|a| FORBIDDEN_TAR_ARGS.contains(a))
        .collect();
    if forbidden.is_empty() {
        Ok(())
    } else {
        Err(
            Error::invalid_input(format!(
                "forbidden tar arguments: {}",
                forbidden.join(" ")
            ))
            .with_hints(vec![
                "Operation mode, -C and -f are controlled by leaf".to_string(),
            ]),
        )
    }
}

/// The tar binary, honoring `LEAF_TAR_BIN`.
#[must_use]
pub fn tar_bin() -> String {
    std::env::var(envvars::TAR_BIN).unwrap_or_else(|_| "tar".to_string())
}

/// Extract an archive into `dest` (which must exist).
pub fn extract(archive: &Path, dest: &Path, extra_args: &[String]) -> Result<()> {
    check_extra_args(extra_args)?;
    let mut command = Command::new(tar_bin());
    command.arg("-x");
    if let Some(flag) = Compression::from_file_name(&archive.to_string_lossy()).tar_flag() {
        command.arg(flag);
    }
    command.arg("-f").arg(archive).arg("-C").arg(dest);
    command.args(extra_args);
    run_tar(command, archive)
}

/// Options for reproducible archive creation.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Override the extension-derived compression.
    pub compression: Option<Compression>,
    /// Extra tar arguments, validated against the forbidden set.
    pub extra_args: Vec<String>,
    /// Stamp every entry with this unix mtime.
    pub force_timestamp: Option<u64>,
    /// Force uid/gid 0 and `root` names on every entry.
    pub force_root_owner: bool,
}

/// Create an archive from the full contents of `folder`.
///
/// Entries are always added in sorted name order so directory read
/// order never leaks into the output.
pub fn create(folder: &Path, out: &Path, opts: &CreateOptions) -> Result<()> {
    check_extra_args(&opts.extra_args)?;
    let compression = opts
        .compression
        .unwrap_or_else(|| Compression::from_file_name(&out.to_string_lossy()));

    let mut command = Command::new(tar_bin());
    command.arg("-c");
    if let Some(flag) = compression.tar_flag() {
        command.arg(flag);
    }
    command.arg("-f").arg(out).arg("-C").arg(folder);
    command.arg("--sort=name");
    if let Some(ts) = opts.force_timestamp {
        command.arg(format!("--mtime=@{ts}"));
    }
    if opts.force_root_owner {
        command
            .arg("--owner=root:0")
            .arg("--group=root:0")
            .arg("--numeric-owner");
    }
    if opts.extra_args.is_empty() {
        command.arg(".");
    } else {
        command.args(&opts.extra_args);
    }
    run_tar(command, out)
}

fn run_tar(mut command: Command, subject: &Path) -> Result<()> {
    debug!(?command, "invoking tar");
    let output = command
        .output()
        .map_err(|e| Error::io(subject, e))?;
    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!(%stderr, "tar failed");
        Err(Error::Io {
            path: subject.to_path_buf(),
            message: format!(
                "tar exited with {}: {}",
                output.status,
                stderr.trim()
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case("pkg.tar", Compression::None)]
    #[case("pkg.tar.gz", Compression::Gzip)]
    #[case("pkg.tgz", Compression::Gzip)]
    #[case("pkg.tar.bz2", Compression::Bzip2)]
    #[case("pkg.tar.xz", Compression::Xz)]
    #[case("pkg_1.0.leaf", Compression::Xz)]
    #[case("pkg.weird", Compression::Xz)]
    fn compression_autodetect(#[case] name: &str, #[case] expected: Compression) {
        assert_eq!(Compression::from_file_name(name), expected);
    }

    #[test]
    fn forbidden_args_rejected() {
        for bad in ["-x", "--extract", "-C", "-f", "--delete", "-c"] {
            assert!(check_extra_args(&[bad.to_string()]).is_err(), "{bad}");
        }
        assert!(check_extra_args(&["--exclude=.git".to_string()]).is_ok());
        assert!(check_extra_args(&[]).is_ok());
    }

    #[test]
    fn create_then_extract_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(src.join("sub")).unwrap();
        std::fs::write(src.join("manifest.json"), b"{}").unwrap();
        std::fs::write(src.join("sub/data"), b"hello").unwrap();

        let archive = dir.path().join("pkg.tar");
        create(&src, &archive, &CreateOptions::default()).unwrap();

        let dest = dir.path().join("out");
        std::fs::create_dir_all(&dest).unwrap();
        extract(&archive, &dest, &[]).unwrap();
        assert_eq!(std::fs::read(dest.join("sub/data")).unwrap(), b"hello");
        assert!(dest.join("manifest.json").exists());
    }
}
