//! Content hashing in the prefixed `<algo>:<hex>` form.
//!
//! The algorithm used for verification always comes from the hash
//! string itself; sha384 is the default on creation. Legacy index
//! documents carrying a bare `sha1sum` field are loaded by prefixing
//! them with `sha1:`.

use digest::Digest;
use leaf_core::{Error, Result};
use std::fmt;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

const BLOCK_SIZE: usize = 128 * 1024;

/// Supported hash algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgo {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgo {
    /// Algorithm name as used in the prefixed form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }
}

impl FromStr for HashAlgo {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            "sha384" => Ok(Self::Sha384),
            "sha512" => Ok(Self::Sha512),
            other => Err(Error::invalid_input(format!(
                "unsupported hash algorithm '{other}'"
            ))),
        }
    }
}

/// Default algorithm when creating hashes.
pub const DEFAULT_ALGO: HashAlgo = HashAlgo::Sha384;

/// A parsed `<algo>:<hex>` hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hash {
    /// Algorithm.
    pub algo: HashAlgo,
    /// Lowercase hex digest.
    pub hex: String,
}

impl Hash {
    /// Parse the prefixed form.
    pub fn parse(s: &str) -> Result<Self> {
        let (algo, hex) = s.split_once(':').ok_or_else(|| {
            Error::invalid_input(format!("invalid hash '{s}', expected <algo>:<hex>"))
        })?;
        if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::invalid_input(format!("invalid hash digest '{hex}'")));
        }
        Ok(Self {
            algo: algo.parse()?,
            hex: hex.to_ascii_lowercase(),
        })
    }

    /// Compute the hash of a file with the default algorithm.
    pub fn of_file(path: &Path) -> Result<Self> {
        Self::of_file_with(path, DEFAULT_ALGO)
    }

    /// Compute the hash of a file with a specific algorithm.
    pub fn of_file_with(path: &Path, algo: HashAlgo) -> Result<Self> {
        let hex = match algo {
            HashAlgo::Sha1 => hash_reader::<sha1::Sha1>(path)?,
            HashAlgo::Sha256 => hash_reader::<sha2::Sha256>(path)?,
            HashAlgo::Sha384 => hash_reader::<sha2::Sha384>(path)?,
            HashAlgo::Sha512 => hash_reader::<sha2::Sha512>(path)?,
        };
        Ok(Self { algo, hex })
    }

    /// Compute the default-algorithm hash of an in-memory buffer.
    #[must_use]
    pub fn of_bytes(data: &[u8]) -> Self {
        let mut hasher = sha2::Sha384::new();
        hasher.update(data);
        Self {
            algo: HashAlgo::Sha384,
            hex: hex::encode(hasher.finalize()),
        }
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algo.as_str(), self.hex)
    }
}

impl FromStr for Hash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn hash_reader<D: Digest>(path: &Path) -> Result<String> {
    let file = std::fs::File::open(path).map_err(|e| Error::io(path, e))?;
    let mut reader = std::io::BufReader::with_capacity(BLOCK_SIZE, file);
    let mut hasher = D::new();
    let mut buf = vec![0u8; BLOCK_SIZE];
    loop {
        let n = reader.read(&mut buf).map_err(|e| Error::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Verify a file against an expected prefixed hash. On mismatch the
/// file is deleted and `BadHash` is returned; the engine never
/// retries after that.
pub fn verify_file(path: &Path, expected: &Hash, name: &str) -> Result<()> {
    let actual = Hash::of_file_with(path, expected.algo)?;
    if actual.hex != expected.hex {
        let _ = std::fs::remove_file(path);
        return Err(Error::BadHash {
            name: name.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

/// Unique name for a file in the download cache: the first seven hex
/// characters of its hash, a dash, then the original file name.
#[must_use]
pub fn cached_artifact_name(filename: &str, hash: Option<&Hash>) -> String {
    const PREFIX_LEN: usize = 7;
    let prefix = match hash {
        Some(h) if h.hex.len() >= PREFIX_LEN => h.hex[..PREFIX_LEN].to_string(),
        _ => {
            // No usable hash: derive a stable prefix from the name.
            let fallback = Hash::of_bytes(filename.as_bytes());
            fallback.hex[..PREFIX_LEN].to_string()
        }
    };
    format!("{prefix}-{filename}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case("sha1", HashAlgo::Sha1)]
    #[case("sha256", HashAlgo::Sha256)]
    #[case("sha384", HashAlgo::Sha384)]
    #[case("sha512", HashAlgo::Sha512)]
    fn parse_prefixed(#[case] name: &str, #[case] algo: HashAlgo) {
        let h = Hash::parse(&format!("{name}:abcdef012345")).unwrap();
        assert_eq!(h.algo, algo);
        assert_eq!(h.to_string(), format!("{name}:abcdef012345"));
    }

    #[test]
    fn parse_rejects_bad_forms() {
        assert!(Hash::parse("md5:abcdef").is_err());
        assert!(Hash::parse("sha256").is_err());
        assert!(Hash::parse("sha256:").is_err());
        assert!(Hash::parse("sha256:nothex!").is_err());
    }

    #[test]
    fn known_sha256_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        std::fs::write(&path, b"test").unwrap();
        let h = Hash::of_file_with(&path, HashAlgo::Sha256).unwrap();
        assert_eq!(
            h.hex,
            "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"
        );
    }

    #[test]
    fn verify_mismatch_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact");
        std::fs::write(&path, b"content").unwrap();
        let wrong = Hash::parse(&format!("sha256:{}", "0".repeat(64))).unwrap();
        let err = verify_file(&path, &wrong, "artifact").unwrap_err();
        assert!(matches!(err, Error::BadHash { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn verify_uses_algo_from_expected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact");
        std::fs::write(&path, b"test").unwrap();
        let expected = Hash::parse(
            "sha256:9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08",
        )
        .unwrap();
        verify_file(&path, &expected, "artifact").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn cache_name_uses_hash_prefix() {
        let h = Hash::parse("sha384:0123456789abcdef").unwrap();
        assert_eq!(
            cached_artifact_name("pkg_1.0.leaf", Some(&h)),
            "0123456-pkg_1.0.leaf"
        );
        // Without a hash the prefix is still deterministic per name.
        assert_eq!(
            cached_artifact_name("pkg_1.0.leaf", None),
            cached_artifact_name("pkg_1.0.leaf", None)
        );
    }
}
