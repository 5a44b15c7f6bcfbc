//! Dependency resolution over conditional edges.
//!
//! The resolver walks `depends` edges whose conditions hold in the
//! composed environment, orders the closure leaves-first (every
//! dependency before its dependents), and derives the install,
//! uninstall, and prerequisite plans from that ordering. Given the
//! same catalogue snapshot and environment it is fully
//! deterministic.

use leaf_core::{compare_versions, Environment, Error, Manifest, PackageIdentifier, Result};
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use tracing::debug;

/// A source of manifests keyed by identifier: the available
/// catalogue, the installed store, or a union of both.
pub type ManifestMap<'a> = BTreeMap<PackageIdentifier, &'a Manifest>;

/// Resolve possibly-unversioned queries against a source map.
///
/// `name` and `name_latest` pick the highest version present;
/// `name_version` passes through. An unversioned query with no
/// candidate is `NotFound`.
pub fn resolve_latest(queries: &[String], source: &ManifestMap<'_>) -> Result<Vec<PackageIdentifier>> {
    let mut out = Vec::new();
    for query in queries {
        let name = if let Some(stripped) = query.strip_suffix("_latest") {
            Some(stripped)
        } else if query.contains('_') {
            None
        } else {
            Some(query.as_str())
        };
        match name {
            None => out.push(PackageIdentifier::parse(query)?),
            Some(name) => {
                let best = source
                    .keys()
                    .filter(|id| id.name == name)
                    .max_by(|a, b| compare_versions(&a.version, &b.version))
                    .cloned()
                    .ok_or_else(|| {
                        Error::not_found("package", name).with_hints(vec![
                            "Run a remote refresh to update the catalogue".to_string(),
                        ])
                    })?;
                debug!(query, resolved = %best, "resolved latest");
                out.push(best);
            }
        }
    }
    Ok(out)
}

/// Compute the ordered dependency closure of `seeds`.
///
/// Edges are followed when their conditions hold in `env`; `None`
/// follows every edge regardless of conditions (the conservative
/// mode used for uninstall bookkeeping). Unknown identifiers are
/// fatal unless `ignore_unknown`. The result is leaves-first; with
/// `reverse` it is dependents-first.
pub fn dependency_closure(
    seeds: &[PackageIdentifier],
    source: &ManifestMap<'_>,
    env: Option<&Environment>,
    ignore_unknown: bool,
    reverse: bool,
) -> Result<Vec<PackageIdentifier>> {
    let mut closure: Vec<PackageIdentifier> = Vec::new();
    for seed in seeds {
        collect(seed, source, env, ignore_unknown, &mut closure)?;
    }

    let members: BTreeSet<&PackageIdentifier> = closure.iter().collect();
    let mut remaining = closure.clone();
    let mut ordered: Vec<PackageIdentifier> = Vec::new();

    while !remaining.is_empty() {
        let mut next = Vec::new();
        let mut progressed = false;
        for id in remaining {
            let deps_ready = active_edges(source[&id], env)?
                .into_iter()
                .filter(|dep| members.contains(dep))
                .all(|dep| ordered.contains(&dep));
            if deps_ready {
                ordered.push(id);
                progressed = true;
            } else {
                next.push(id);
            }
        }
        if !progressed {
            let names: Vec<String> = next.iter().map(ToString::to_string).collect();
            return Err(Error::Cycle {
                packages: names.join(", "),
            });
        }
        remaining = next;
    }

    if reverse {
        ordered.reverse();
    }
    Ok(ordered)
}

fn collect(
    id: &PackageIdentifier,
    source: &ManifestMap<'_>,
    env: Option<&Environment>,
    ignore_unknown: bool,
    out: &mut Vec<PackageIdentifier>,
) -> Result<()> {
    if out.contains(id) {
        return Ok(());
    }
    let Some(manifest) = source.get(id) else {
        if ignore_unknown {
            return Ok(());
        }
        return Err(Error::not_found("package", id.to_string()));
    };
    out.push(id.clone());
    for dep in active_edges(manifest, env)? {
        collect(&dep, source, env, ignore_unknown, out)?;
    }
    Ok(())
}

fn active_edges(manifest: &Manifest, env: Option<&Environment>) -> Result<Vec<PackageIdentifier>> {
    Ok(manifest
        .depends()?
        .into_iter()
        .filter(|edge| env.is_none_or(|e| edge.enabled(e)))
        .map(|edge| edge.identifier)
        .collect())
}

/// The ordered list of packages to install for `seeds`: the active
/// closure over the available map, minus what is already installed.
pub fn install_plan(
    seeds: &[PackageIdentifier],
    available: &ManifestMap<'_>,
    installed: &BTreeSet<PackageIdentifier>,
    env: &Environment,
) -> Result<Vec<PackageIdentifier>> {
    let closure = dependency_closure(seeds, available, Some(env), false, false)?;
    Ok(closure
        .into_iter()
        .filter(|id| !installed.contains(id))
        .collect())
}

/// The ordered list of packages to remove for `seeds`:
/// dependents-first closure over the installed map, keeping anything
/// still needed by an installed package outside the closure.
pub fn uninstall_plan(
    seeds: &[PackageIdentifier],
    installed: &ManifestMap<'_>,
) -> Result<Vec<PackageIdentifier>> {
    let mut plan = dependency_closure(seeds, installed, None, true, true)?;
    let closure: BTreeSet<PackageIdentifier> = plan.iter().cloned().collect();
    for survivor in installed.keys() {
        if closure.contains(survivor) {
            continue;
        }
        let needed = dependency_closure(
            std::slice::from_ref(survivor),
            installed,
            None,
            true,
            false,
        )?;
        plan.retain(|id| !needed.contains(id));
    }
    Ok(plan)
}

/// Distinct `requires` prerequisites of an install plan, sorted by
/// identifier.
pub fn prereq_plan(
    plan: &[PackageIdentifier],
    source: &ManifestMap<'_>,
) -> Result<Vec<PackageIdentifier>> {
    let mut out: BTreeSet<PackageIdentifier> = BTreeSet::new();
    for id in plan {
        if let Some(manifest) = source.get(id) {
            out.extend(manifest.requires()?);
        }
    }
    Ok(out.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use leaf_core::EnvLayer;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn manifest(name: &str, version: &str, depends: &[&str]) -> Manifest {
        serde_json::from_value(json!({
            "info": {"name": name, "version": version, "depends": depends}
        }))
        .unwrap()
    }

    fn source(manifests: &[Manifest]) -> ManifestMap<'_> {
        manifests
            .iter()
            .map(|m| (m.identifier().unwrap(), m))
            .collect()
    }

    fn ids(strings: &[&str]) -> Vec<PackageIdentifier> {
        strings
            .iter()
            .map(|s| PackageIdentifier::parse(s).unwrap())
            .collect()
    }

    fn env_of(pairs: &[(&str, &str)]) -> Environment {
        Environment::build([EnvLayer::from_pairs(
            None,
            pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())),
        )])
    }

    fn container_fixture() -> Vec<Manifest> {
        vec![
            manifest("container-A", "1.0", &["container-B_1.0", "container-C_1.0"]),
            manifest("container-A", "2.0", &["container-C_1.0", "container-D_1.0"]),
            manifest("container-B", "1.0", &["container-E_1.0"]),
            manifest("container-C", "1.0", &[]),
            manifest("container-D", "1.0", &[]),
            manifest("container-E", "1.0", &[]),
        ]
    }

    #[test]
    fn install_plan_orders_dependencies_first() {
        let manifests = container_fixture();
        let map = source(&manifests);
        let plan = install_plan(
            &ids(&["container-A_1.0"]),
            &map,
            &BTreeSet::new(),
            &env_of(&[]),
        )
        .unwrap();
        assert_eq!(
            plan,
            ids(&["container-E_1.0", "container-C_1.0", "container-B_1.0", "container-A_1.0"])
        );
        // Property: every dependency precedes its dependent.
        for (i, id) in plan.iter().enumerate() {
            for dep in map[id].depends().unwrap() {
                let pos = plan.iter().position(|p| *p == dep.identifier).unwrap();
                assert!(pos < i, "{} must precede {}", dep.identifier, id);
            }
        }
    }

    #[test]
    fn install_plan_skips_installed() {
        let manifests = container_fixture();
        let map = source(&manifests);
        let installed: BTreeSet<PackageIdentifier> =
            ids(&["container-E_1.0", "container-C_1.0"]).into_iter().collect();
        let plan = install_plan(&ids(&["container-A_1.0"]), &map, &installed, &env_of(&[]))
            .unwrap();
        assert_eq!(plan, ids(&["container-B_1.0", "container-A_1.0"]));
    }

    #[test]
    fn unknown_dependency_is_fatal() {
        let manifests = vec![manifest("top", "1.0", &["ghost_1.0"])];
        let map = source(&manifests);
        let err = install_plan(&ids(&["top_1.0"]), &map, &BTreeSet::new(), &env_of(&[]))
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn cycle_is_detected() {
        let manifests = vec![
            manifest("a", "1.0", &["b_1.0"]),
            manifest("b", "1.0", &["a_1.0"]),
        ];
        let map = source(&manifests);
        let err =
            dependency_closure(&ids(&["a_1.0"]), &map, None, false, false).unwrap_err();
        assert!(matches!(err, Error::Cycle { .. }));
    }

    #[test]
    fn conditional_edges_follow_environment() {
        let manifests = vec![
            manifest(
                "condition",
                "1.0",
                &[
                    "condition-A_1.0(FOO)",
                    "condition-B_1.0(!FOO)",
                    "condition-C_1.0(FOO=BAR)",
                    "condition-D_1.0(FOO!=BAR)",
                    "condition-E_1.0(FOO2=BAR2,HELLO~rl)",
                    "condition-F_1.0(FOO2!=BAR2)",
                ],
            ),
            manifest("condition-A", "1.0", &[]),
            manifest("condition-B", "1.0", &[]),
            manifest("condition-C", "1.0", &[]),
            manifest("condition-D", "1.0", &["condition-H_1.0"]),
            manifest("condition-E", "1.0", &["condition-G_1.0"]),
            manifest("condition-F", "1.0", &[]),
            manifest("condition-G", "1.0", &[]),
            manifest("condition-H", "1.0", &[]),
        ];
        let map = source(&manifests);
        let seeds = ids(&["condition_1.0"]);

        let content = |env: &Environment| -> BTreeSet<String> {
            dependency_closure(&seeds, &map, Some(env), false, false)
                .unwrap()
                .into_iter()
                .map(|id| id.name)
                .collect()
        };

        let empty = content(&env_of(&[]));
        assert_eq!(
            empty,
            ["condition", "condition-B", "condition-D", "condition-F", "condition-H"]
                .iter()
                .map(ToString::to_string)
                .collect()
        );

        let foo = content(&env_of(&[("FOO", "BAR")]));
        assert_eq!(
            foo,
            ["condition", "condition-A", "condition-C", "condition-F"]
                .iter()
                .map(ToString::to_string)
                .collect()
        );

        let full = content(&env_of(&[
            ("FOO", "BAR"),
            ("FOO2", "BAR2"),
            ("HELLO", "wOrlD"),
        ]));
        assert_eq!(
            full,
            ["condition", "condition-A", "condition-C", "condition-E", "condition-G"]
                .iter()
                .map(ToString::to_string)
                .collect()
        );
    }

    #[test]
    fn uninstall_preserves_needed_packages() {
        let manifests = container_fixture();
        let all = source(&manifests);
        // Installed: the union of both container-A closures.
        let installed_ids = ids(&[
            "container-A_1.0",
            "container-B_1.0",
            "container-C_1.0",
            "container-E_1.0",
            "container-A_2.0",
            "container-D_1.0",
        ]);
        let installed: ManifestMap<'_> = installed_ids
            .iter()
            .map(|id| (id.clone(), all[id]))
            .collect();

        let plan = uninstall_plan(&ids(&["container-A_1.0"]), &installed).unwrap();
        assert_eq!(plan, ids(&["container-A_1.0", "container-B_1.0", "container-E_1.0"]));
        // Property: dependents come before their dependencies.
        let pos = |name: &str| plan.iter().position(|id| id.name == name).unwrap();
        assert!(pos("container-A") < pos("container-B"));
        assert!(pos("container-B") < pos("container-E"));
    }

    #[test]
    fn uninstalling_a_needed_leaf_removes_nothing() {
        let manifests = container_fixture();
        let all = source(&manifests);
        let installed_ids = ids(&["container-A_2.0", "container-C_1.0", "container-D_1.0"]);
        let installed: ManifestMap<'_> = installed_ids
            .iter()
            .map(|id| (id.clone(), all[id]))
            .collect();
        let plan = uninstall_plan(&ids(&["container-C_1.0"]), &installed).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn latest_resolution() {
        let manifests = vec![
            manifest("version", "1.0", &[]),
            manifest("version", "2.0", &[]),
            manifest("other", "1.0", &[]),
        ];
        let map = source(&manifests);
        assert_eq!(
            resolve_latest(&["version".to_string()], &map).unwrap(),
            ids(&["version_2.0"])
        );
        assert_eq!(
            resolve_latest(&["version_latest".to_string()], &map).unwrap(),
            ids(&["version_2.0"])
        );
        assert_eq!(
            resolve_latest(&["version_1.0".to_string()], &map).unwrap(),
            ids(&["version_1.0"])
        );
        assert!(resolve_latest(&["absent".to_string()], &map).is_err());
    }

    #[test]
    fn resolution_is_deterministic() {
        let manifests = container_fixture();
        let map = source(&manifests);
        let seeds = ids(&["container-A_1.0", "container-A_2.0"]);
        let first = dependency_closure(&seeds, &map, None, false, false).unwrap();
        let second = dependency_closure(&seeds, &map, None, false, false).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn prereqs_are_distinct_and_sorted() {
        let manifests: Vec<Manifest> = vec![
            serde_json::from_value(json!({
                "info": {"name": "deb", "version": "1.0", "requires": ["python3_3.5"]}
            }))
            .unwrap(),
            serde_json::from_value(json!({
                "info": {"name": "deb2", "version": "1.0",
                         "requires": ["python3_3.5", "acme_0.1"]}
            }))
            .unwrap(),
        ];
        let map = source(&manifests);
        let plan = ids(&["deb_1.0", "deb2_1.0"]);
        assert_eq!(
            prereq_plan(&plan, &map).unwrap(),
            ids(&["acme_0.1", "python3_3.5"])
        );
    }
}
