//! End-to-end install/uninstall flows against a generated on-disk
//! repository served over `file://`.

use leaf_core::{Environment, Error, PackageIdentifier};
use leaf_engine::{Engine, InstallOptions, LeafDirs};
use leaf_releng::{IndexOptions, PackageOptions};
use leaf_remote::Remote;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

struct TestRig {
    root: tempfile::TempDir,
    engine: Engine,
}

impl TestRig {
    fn store(&self) -> PathBuf {
        self.root.path().join("store")
    }

    fn installed_ids(&self) -> BTreeSet<String> {
        self.engine
            .list_installed()
            .unwrap()
            .keys()
            .map(ToString::to_string)
            .collect()
    }

    fn env(&self) -> Environment {
        self.engine.base_env()
    }
}

fn write_package(repo_src: &Path, manifest: serde_json::Value) -> PathBuf {
    let id = format!(
        "{}_{}",
        manifest["info"]["name"].as_str().unwrap(),
        manifest["info"]["version"].as_str().unwrap()
    );
    let folder = repo_src.join(&id);
    std::fs::create_dir_all(&folder).unwrap();
    leaf_core::write_json(&folder.join("manifest.json"), &manifest, true).unwrap();
    std::fs::write(folder.join("data"), id.as_bytes()).unwrap();
    folder
}

fn simple_package(name: &str, version: &str, depends: &[&str]) -> serde_json::Value {
    json!({"info": {"name": name, "version": version, "depends": depends}})
}

/// Build a repository from manifests and return the index path.
fn build_repo(root: &Path, manifests: &[serde_json::Value]) -> PathBuf {
    let src = root.join("repo-src");
    let out = root.join("repository");
    std::fs::create_dir_all(&out).unwrap();
    let mut artifacts = Vec::new();
    for manifest in manifests {
        let folder = write_package(&src, manifest.clone());
        let artifact = out.join(format!(
            "{}.leaf",
            folder.file_name().unwrap().to_string_lossy()
        ));
        leaf_releng::create_package(&folder, &artifact, &PackageOptions::default()).unwrap();
        artifacts.push(artifact);
    }
    let index = out.join("index.json");
    leaf_releng::generate_index(
        &index,
        &artifacts,
        &IndexOptions {
            name: Some("test repository".to_string()),
            pretty: true,
            ..IndexOptions::default()
        },
    )
    .unwrap();
    index
}

fn rig_with(manifests: &[serde_json::Value]) -> TestRig {
    let root = tempfile::tempdir().unwrap();
    let index = build_repo(root.path(), manifests);
    let dirs = LeafDirs {
        config_root: root.path().join("config"),
        cache_root: root.path().join("cache"),
        default_store: root.path().join("store"),
    };
    let mut engine = Engine::open(dirs).unwrap();
    let url = url::Url::from_file_path(&index).unwrap().to_string();
    engine.add_remote(&Remote::new("default", url)).unwrap();
    TestRig { root, engine }
}

fn container_repo() -> Vec<serde_json::Value> {
    vec![
        simple_package("container-A", "1.0", &["container-B_1.0", "container-C_1.0"]),
        simple_package("container-A", "2.0", &["container-C_1.0", "container-D_1.0"]),
        simple_package("container-B", "1.0", &["container-E_1.0"]),
        simple_package("container-C", "1.0", &[]),
        simple_package("container-D", "1.0", &[]),
        simple_package("container-E", "1.0", &[]),
    ]
}

#[tokio::test]
async fn install_chain_in_topological_order() {
    let rig = rig_with(&container_repo());
    let plan = rig
        .engine
        .install(
            &["container-A_1.0".to_string()],
            &rig.env(),
            &InstallOptions::default(),
        )
        .await
        .unwrap();

    let plan_strings: Vec<String> = plan.iter().map(ToString::to_string).collect();
    assert_eq!(
        plan_strings,
        vec!["container-E_1.0", "container-C_1.0", "container-B_1.0", "container-A_1.0"]
    );
    assert_eq!(
        rig.installed_ids(),
        ["container-A_1.0", "container-B_1.0", "container-C_1.0", "container-E_1.0"]
            .iter()
            .map(ToString::to_string)
            .collect()
    );
    // Each installed folder holds the extracted payload.
    assert!(rig.store().join("container-A_1.0").join("data").exists());
}

#[tokio::test]
async fn uninstall_preserves_needed_packages() {
    let rig = rig_with(&container_repo());
    for seed in ["container-A_1.0", "container-A_2.0"] {
        rig.engine
            .install(&[seed.to_string()], &rig.env(), &InstallOptions::default())
            .await
            .unwrap();
    }
    assert_eq!(rig.installed_ids().len(), 6);

    rig.engine
        .uninstall(&["container-A_1.0".to_string()], &rig.env())
        .unwrap();
    assert_eq!(
        rig.installed_ids(),
        ["container-A_2.0", "container-C_1.0", "container-D_1.0"]
            .iter()
            .map(ToString::to_string)
            .collect()
    );

    rig.engine
        .uninstall(&["container-A_2.0".to_string()], &rig.env())
        .unwrap();
    assert!(rig.installed_ids().is_empty());
}

#[tokio::test]
async fn bad_hash_aborts_and_leaves_store_unchanged() {
    let rig = rig_with(&container_repo());

    // Corrupt the published hash of container-E, the first package
    // in the install plan.
    let index = rig.root.path().join("repository/index.json");
    let mut document = leaf_core::load_json(&index).unwrap();
    for package in document["packages"].as_array_mut().unwrap() {
        if package["info"]["name"] == "container-E" {
            package["hash"] = json!(format!("sha384:{}", "0".repeat(96)));
        }
    }
    leaf_core::write_json(&index, &document, true).unwrap();

    let err = rig
        .engine
        .install(
            &["container-A_1.0".to_string()],
            &rig.env(),
            &InstallOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::BadHash { .. }), "{err}");
    assert!(rig.installed_ids().is_empty());

    // With a later package corrupted instead, earlier plan entries
    // are retained.
    let mut document = leaf_core::load_json(&index).unwrap();
    for package in document["packages"].as_array_mut().unwrap() {
        let artifact = rig
            .root
            .path()
            .join("repository")
            .join(package["file"].as_str().unwrap());
        let real = leaf_downloader::Hash::of_file(&artifact).unwrap().to_string();
        let name = package["info"]["name"].as_str().unwrap().to_string();
        package["hash"] = if name == "container-C" {
            json!(format!("sha384:{}", "1".repeat(96)))
        } else {
            json!(real)
        };
    }
    leaf_core::write_json(&index, &document, true).unwrap();
    rig.engine.fetch_remotes(true).await.unwrap();

    let err = rig
        .engine
        .install(
            &["container-A_1.0".to_string()],
            &rig.env(),
            &InstallOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::BadHash { .. }), "{err}");
    assert_eq!(
        rig.installed_ids(),
        ["container-E_1.0"].iter().map(ToString::to_string).collect()
    );
}

#[tokio::test]
async fn latest_resolution_and_idempotence() {
    let rig = rig_with(&[
        simple_package("version", "1.0", &[]),
        simple_package("version", "2.0", &[]),
    ]);
    let plan = rig
        .engine
        .install(&["version".to_string()], &rig.env(), &InstallOptions::default())
        .await
        .unwrap();
    assert_eq!(plan, vec![PackageIdentifier::parse("version_2.0").unwrap()]);
    assert_eq!(
        rig.installed_ids(),
        ["version_2.0"].iter().map(ToString::to_string).collect()
    );

    // Installing again is a no-op.
    let again = rig
        .engine
        .install(&["version".to_string()], &rig.env(), &InstallOptions::default())
        .await
        .unwrap();
    assert!(again.is_empty());
}

#[tokio::test]
async fn install_steps_run_in_package_folder() {
    let rig = rig_with(&[json!({
        "info": {"name": "install", "version": "1.0"},
        "env": {"INSTALL_DIR": "@{DIR}"},
        "install": [
            {"label": "write marker", "command": ["sh", "-c", "echo done > postinstall.log"]},
            {"command": ["sh", "-c", "echo @{NAME}-@{VERSION} > coords"]}
        ],
        "uninstall": [
            {"command": ["sh", "-c", "touch ../uninstall.log"]}
        ]
    })]);

    rig.engine
        .install(&["install_1.0".to_string()], &rig.env(), &InstallOptions::default())
        .await
        .unwrap();
    let folder = rig.store().join("install_1.0");
    assert_eq!(
        std::fs::read_to_string(folder.join("postinstall.log")).unwrap(),
        "done\n"
    );
    assert_eq!(
        std::fs::read_to_string(folder.join("coords")).unwrap(),
        "install-1.0\n"
    );

    // The exported environment resolves @{DIR} to the final folder.
    let env = rig
        .engine
        .packages_env(&[PackageIdentifier::parse("install_1.0").unwrap()])
        .unwrap();
    assert_eq!(
        env.find("INSTALL_DIR").as_deref(),
        Some(folder.to_string_lossy().as_ref())
    );

    rig.engine
        .uninstall(&["install_1.0".to_string()], &rig.env())
        .unwrap();
    assert!(rig.store().join("uninstall.log").exists());
    assert!(!folder.exists());
}

#[tokio::test]
async fn failed_install_rolls_back_or_keeps_folder() {
    let rig = rig_with(&[
        json!({
            "info": {"name": "failure-exec", "version": "1.0"},
            "install": [{"command": ["false"]}]
        }),
        json!({
            "info": {"name": "failure-silent", "version": "1.0"},
            "install": [{"command": ["false"], "ignoreFail": true}]
        }),
    ]);

    // Default: the partial folder is removed.
    let err = rig
        .engine
        .install(
            &["failure-exec_1.0".to_string()],
            &rig.env(),
            &InstallOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::StepFailed { .. }));
    assert!(rig.installed_ids().is_empty());

    // keep_on_error: the folder is renamed and excluded from listing.
    rig.engine
        .install(
            &["failure-exec_1.0".to_string()],
            &rig.env(),
            &InstallOptions {
                keep_on_error: true,
            },
        )
        .await
        .unwrap_err();
    let kept = std::fs::read_dir(rig.store())
        .unwrap()
        .filter_map(|e| e.ok())
        .any(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            name.starts_with("failure-exec_1.0") && leaf_engine::is_ignored_folder(&name)
        });
    assert!(kept);
    assert!(rig.installed_ids().is_empty());

    // ignoreFail steps do not block the install.
    rig.engine
        .install(
            &["failure-silent_1.0".to_string()],
            &rig.env(),
            &InstallOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(
        rig.installed_ids(),
        ["failure-silent_1.0"].iter().map(ToString::to_string).collect()
    );
}

#[tokio::test]
async fn missing_prerequisite_aborts() {
    let rig = rig_with(&[json!({
        "info": {"name": "deb", "version": "1.0", "requires": ["python3_3.5"]}
    })]);
    let err = rig
        .engine
        .install(&["deb_1.0".to_string()], &rig.env(), &InstallOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
    assert!(rig.installed_ids().is_empty());
}

#[tokio::test]
async fn packages_env_composes_dependencies_first() {
    let rig = rig_with(&[
        json!({
            "info": {"name": "env-A", "version": "1.0", "depends": ["env-B_1.0"]},
            "env": {
                "LEAF_ENV_A": "FOO",
                "LEAF_PATH_A": "$PATH:@{DIR}:@{DIR:env-B_1.0}"
            }
        }),
        json!({
            "info": {"name": "env-B", "version": "1.0"},
            "env": {"LEAF_ENV_B": "BAR", "LEAF_PATH_B": "$PATH:@{DIR}"}
        }),
    ]);
    rig.engine
        .install(&["env-A_1.0".to_string()], &rig.env(), &InstallOptions::default())
        .await
        .unwrap();

    let env = rig
        .engine
        .packages_env(&[PackageIdentifier::parse("env-A_1.0").unwrap()])
        .unwrap();
    let store = rig.store();
    let pairs: Vec<(String, String)> = env.pairs().cloned().collect();
    assert_eq!(
        pairs,
        vec![
            ("LEAF_ENV_B".to_string(), "BAR".to_string()),
            (
                "LEAF_PATH_B".to_string(),
                format!("$PATH:{}", store.join("env-B_1.0").display())
            ),
            ("LEAF_ENV_A".to_string(), "FOO".to_string()),
            (
                "LEAF_PATH_A".to_string(),
                format!(
                    "$PATH:{}:{}",
                    store.join("env-A_1.0").display(),
                    store.join("env-B_1.0").display()
                )
            ),
        ]
    );
}
