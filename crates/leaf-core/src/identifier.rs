//! Package identifiers, version ordering, and conditional
//! dependencies.
//!
//! An identifier is a `name_version` pair. Versions have no fixed
//! grammar: ordering splits them into maximal runs of digits and
//! non-digits, compares digit runs as integers and the rest as byte
//! strings, and lets the shorter sequence lose ties. The reserved
//! version `latest` never names a concrete package; it is only valid
//! as a query resolved against a catalogue.

use crate::env::Environment;
use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

fn name_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new("^[a-zA-Z0-9][-a-zA-Z0-9]*$").unwrap())
}

/// A `(name, version)` package identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageIdentifier {
    /// Package name, `[a-zA-Z0-9][-a-zA-Z0-9]*`.
    pub name: String,
    /// Package version; never `latest` once parsed.
    pub version: String,
}

impl PackageIdentifier {
    /// Build an identifier from validated parts.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Parse a `name_version` string.
    ///
    /// Fails with `InvalidInput` when the name does not match the
    /// grammar or the version is the reserved keyword `latest`.
    pub fn parse(s: &str) -> Result<Self> {
        let (name, version) = s.split_once('_').ok_or_else(|| {
            Error::invalid_input(format!("invalid package identifier '{s}'")).with_hints(vec![
                "Identifiers look like name_version, e.g. mytool_1.2".to_string(),
            ])
        })?;
        if !name_regex().is_match(name) {
            return Err(Error::invalid_input(format!(
                "invalid package name '{name}'"
            ))
            .with_hints(vec![
                "Names match [a-zA-Z0-9][-a-zA-Z0-9]*".to_string(),
            ]));
        }
        if version == crate::constants::LATEST {
            return Err(Error::invalid_input(format!(
                "'{}' is a reserved version keyword",
                crate::constants::LATEST
            )));
        }
        Ok(Self::new(name, version))
    }
}

impl fmt::Display for PackageIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.name, self.version)
    }
}

impl FromStr for PackageIdentifier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Ord for PackageIdentifier {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name
            .cmp(&other.name)
            .then_with(|| compare_versions(&self.version, &other.version))
    }
}

impl PartialOrd for PackageIdentifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Compare two version strings.
///
/// Splits each into maximal runs of digits and non-digits. Digit
/// runs compare as integers, other runs as byte strings, and when
/// one version is a strict prefix of the other the shorter loses.
#[must_use]
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let ta = tokenize(a);
    let tb = tokenize(b);
    for (ra, rb) in ta.iter().zip(tb.iter()) {
        let ord = compare_runs(ra, rb);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    ta.len().cmp(&tb.len())
}

fn tokenize(v: &str) -> Vec<&str> {
    let mut runs = Vec::new();
    let bytes = v.as_bytes();
    let mut start = 0;
    for i in 1..=bytes.len() {
        if i == bytes.len()
            || bytes[i].is_ascii_digit() != bytes[start].is_ascii_digit()
        {
            runs.push(&v[start..i]);
            start = i;
        }
    }
    runs
}

fn compare_runs(a: &str, b: &str) -> Ordering {
    let numeric = a.bytes().all(|c| c.is_ascii_digit()) && b.bytes().all(|c| c.is_ascii_digit());
    if numeric {
        let a = a.trim_start_matches('0');
        let b = b.trim_start_matches('0');
        a.len().cmp(&b.len()).then_with(|| a.cmp(b))
    } else {
        a.cmp(b)
    }
}

/// A single condition guarding a dependency edge, evaluated against
/// the composed environment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Condition {
    /// `KEY` — set and non-empty.
    Set(String),
    /// `!KEY` — unset or empty.
    Unset(String),
    /// `KEY=VALUE` — exact string equality.
    Eq(String, String),
    /// `KEY!=VALUE` — differs or unset.
    Ne(String, String),
    /// `KEY~REGEX` — unanchored regex search on the value.
    Match(String, String),
    /// `KEY!~REGEX` — value unset or not matching.
    NotMatch(String, String),
}

impl Condition {
    /// Parse a single condition.
    pub fn parse(s: &str) -> Result<Self> {
        static OP_RE: OnceLock<regex::Regex> = OnceLock::new();
        let op_re = OP_RE.get_or_init(|| {
            regex::Regex::new("^([A-Za-z0-9_]+)(!=|!~|=|~)(.*)$").unwrap()
        });
        static KEY_RE: OnceLock<regex::Regex> = OnceLock::new();
        let key_re =
            KEY_RE.get_or_init(|| regex::Regex::new("^(!?)([A-Za-z0-9_]+)$").unwrap());

        if let Some(caps) = op_re.captures(s) {
            let key = caps[1].to_string();
            let value = caps[3].to_string();
            return match &caps[2] {
                "=" => Ok(Self::Eq(key, value)),
                "!=" => Ok(Self::Ne(key, value)),
                "~" | "!~" => {
                    regex::Regex::new(&value).map_err(|e| {
                        Error::invalid_input(format!("invalid condition regex '{value}': {e}"))
                    })?;
                    if &caps[2] == "~" {
                        Ok(Self::Match(key, value))
                    } else {
                        Ok(Self::NotMatch(key, value))
                    }
                }
                _ => unreachable!(),
            };
        }
        if let Some(caps) = key_re.captures(s) {
            let key = caps[2].to_string();
            return if &caps[1] == "!" {
                Ok(Self::Unset(key))
            } else {
                Ok(Self::Set(key))
            };
        }
        Err(Error::invalid_input(format!("invalid condition '{s}'")))
    }

    /// Evaluate the condition against the composed environment.
    #[must_use]
    pub fn matches(&self, env: &Environment) -> bool {
        match self {
            Self::Set(key) => env.find(key).is_some_and(|v| !v.is_empty()),
            Self::Unset(key) => !env.find(key).is_some_and(|v| !v.is_empty()),
            Self::Eq(key, value) => env.find(key).as_deref() == Some(value.as_str()),
            Self::Ne(key, value) => env.find(key).as_deref() != Some(value.as_str()),
            Self::Match(key, pattern) => env
                .find(key)
                .is_some_and(|v| regex::Regex::new(pattern).is_ok_and(|re| re.is_match(&v))),
            Self::NotMatch(key, pattern) => !env
                .find(key)
                .is_some_and(|v| regex::Regex::new(pattern).is_ok_and(|re| re.is_match(&v))),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Set(k) => write!(f, "{k}"),
            Self::Unset(k) => write!(f, "!{k}"),
            Self::Eq(k, v) => write!(f, "{k}={v}"),
            Self::Ne(k, v) => write!(f, "{k}!={v}"),
            Self::Match(k, r) => write!(f, "{k}~{r}"),
            Self::NotMatch(k, r) => write!(f, "{k}!~{r}"),
        }
    }
}

/// A dependency edge: an identifier plus the conditions that must
/// all hold for the edge to be active.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConditionalPackageIdentifier {
    /// Target identifier.
    pub identifier: PackageIdentifier,
    /// Guarding conditions, all required (short-circuit AND).
    pub conditions: Vec<Condition>,
}

impl ConditionalPackageIdentifier {
    /// Parse `name_version` or `name_version(cond,cond…)`.
    pub fn parse(s: &str) -> Result<Self> {
        if let Some((id_part, rest)) = s.split_once('(') {
            let conds_part = rest.strip_suffix(')').ok_or_else(|| {
                Error::invalid_input(format!("invalid conditional identifier '{s}'"))
            })?;
            let identifier = PackageIdentifier::parse(id_part)?;
            let conditions = conds_part
                .split(',')
                .filter(|c| !c.is_empty())
                .map(Condition::parse)
                .collect::<Result<Vec<_>>>()?;
            Ok(Self {
                identifier,
                conditions,
            })
        } else {
            Ok(Self {
                identifier: PackageIdentifier::parse(s)?,
                conditions: Vec::new(),
            })
        }
    }

    /// Whether the edge is active in the given environment.
    #[must_use]
    pub fn enabled(&self, env: &Environment) -> bool {
        self.conditions.iter().all(|c| c.matches(env))
    }
}

impl fmt::Display for ConditionalPackageIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier)?;
        if !self.conditions.is_empty() {
            let conds: Vec<String> = self.conditions.iter().map(ToString::to_string).collect();
            write!(f, "({})", conds.join(","))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{EnvLayer, Environment};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn parse_identifier() {
        let pi = PackageIdentifier::parse("container-A_1.0").unwrap();
        assert_eq!(pi.name, "container-A");
        assert_eq!(pi.version, "1.0");
        assert_eq!(pi.to_string(), "container-A_1.0");
    }

    #[test]
    fn parse_rejects_bad_names() {
        assert!(PackageIdentifier::parse("noversion").is_err());
        assert!(PackageIdentifier::parse("-bad_1.0").is_err());
        assert!(PackageIdentifier::parse("has space_1.0").is_err());
        assert!(PackageIdentifier::parse("pkg_latest").is_err());
    }

    #[test]
    fn versions_have_no_fixed_grammar() {
        for version in ["1.0+build5", "1.0 RC1", "1.0:abi3", "1.0~rc1"] {
            let pi = PackageIdentifier::parse(&format!("pkg_{version}")).unwrap();
            assert_eq!(pi.version, version);
            assert_eq!(pi.to_string(), format!("pkg_{version}"));
        }
    }

    #[rstest]
    #[case("1.0", "1.0.0", Ordering::Less)]
    #[case("1.10", "1.9", Ordering::Greater)]
    #[case("1.0a", "1.0", Ordering::Greater)]
    #[case("2.0", "2.0", Ordering::Equal)]
    #[case("1.0", "2.0", Ordering::Less)]
    #[case("1.2-rc1", "1.2-rc2", Ordering::Less)]
    #[case("0010", "9", Ordering::Greater)]
    fn version_ordering(#[case] a: &str, #[case] b: &str, #[case] expected: Ordering) {
        assert_eq!(compare_versions(a, b), expected);
        assert_eq!(compare_versions(b, a), expected.reverse());
    }

    #[test]
    fn identifier_ordering_is_name_then_version() {
        let a10 = PackageIdentifier::parse("a_1.0").unwrap();
        let a20 = PackageIdentifier::parse("a_2.0").unwrap();
        let b10 = PackageIdentifier::parse("b_1.0").unwrap();
        let mut list = vec![b10.clone(), a20.clone(), a10.clone()];
        list.sort();
        assert_eq!(list, vec![a10, a20, b10]);
    }

    fn env_of(pairs: &[(&str, &str)]) -> Environment {
        let mut env = Environment::new();
        env.push_layer(EnvLayer::from_pairs(
            None,
            pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())),
        ));
        env
    }

    #[rstest]
    #[case("FOO", &[("FOO", "BAR")], true)]
    #[case("FOO", &[], false)]
    #[case("FOO", &[("FOO", "")], false)]
    #[case("!FOO", &[], true)]
    #[case("!FOO", &[("FOO", "BAR")], false)]
    #[case("FOO=BAR", &[("FOO", "BAR")], true)]
    #[case("FOO=BAR", &[("FOO", "BAZ")], false)]
    #[case("FOO=BAR", &[], false)]
    #[case("FOO!=BAR", &[], true)]
    #[case("FOO!=BAR", &[("FOO", "BAR")], false)]
    #[case("HELLO~rl", &[("HELLO", "wOrlD")], true)]
    #[case("HELLO~rl", &[("HELLO", "PLOP")], false)]
    #[case("HELLO~rl", &[], false)]
    #[case("HELLO!~rl", &[], true)]
    #[case("HELLO!~rl", &[("HELLO", "wOrlD")], false)]
    fn condition_matching(
        #[case] cond: &str,
        #[case] pairs: &[(&str, &str)],
        #[case] expected: bool,
    ) {
        let cond = Condition::parse(cond).unwrap();
        assert_eq!(cond.matches(&env_of(pairs)), expected);
    }

    #[test]
    fn conditional_identifier_round_trip() {
        let cpi =
            ConditionalPackageIdentifier::parse("condition-E_1.0(FOO2=BAR2,HELLO~rl)").unwrap();
        assert_eq!(cpi.identifier.to_string(), "condition-E_1.0");
        assert_eq!(cpi.conditions.len(), 2);
        assert_eq!(cpi.to_string(), "condition-E_1.0(FOO2=BAR2,HELLO~rl)");

        let plain = ConditionalPackageIdentifier::parse("condition-B_1.0").unwrap();
        assert!(plain.conditions.is_empty());
        assert!(plain.enabled(&env_of(&[])));
    }

    #[test]
    fn conditional_and_short_circuits() {
        let cpi =
            ConditionalPackageIdentifier::parse("pkg_1.0(FOO2=BAR2,HELLO~rl)").unwrap();
        assert!(!cpi.enabled(&env_of(&[("FOO2", "BAR2")])));
        assert!(cpi.enabled(&env_of(&[("FOO2", "BAR2"), ("HELLO", "wOrlD")])));
    }

    #[test]
    fn invalid_condition_regex_rejected() {
        assert!(Condition::parse("KEY~[unclosed").is_err());
        assert!(Condition::parse("???").is_err());
    }
}
