// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

use rstest::rstest;
use tempfile::TempDir;

use super::*;
use crate::platform::Platform;
use crate::recipe::SourceResolver;

fn env(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
    Some(
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    )
}

#[rstest]
fn test_defaults() {
    let config = Config::from_sources(None, None, env(&[])).unwrap();
    assert_eq!(config, Config::default());
    assert_eq!(config.max_retries, 4);
    assert_eq!(config.parallelism, 4);
    assert!(config.cache_root.ends_with("toolenv/tools"));
}

#[rstest]
fn test_layers_override_in_order() {
    let tmp = TempDir::new().unwrap();
    let user = tmp.path().join("user.yaml");
    std::fs::write(&user, "max_retries: 1\nparallelism: 2\ndownload_timeout_secs: 10\n").unwrap();
    let explicit = tmp.path().join("explicit.yaml");
    std::fs::write(&explicit, "parallelism: 8\n").unwrap();

    let config = Config::from_sources(
        Some(&user),
        Some(&explicit),
        env(&[
            ("TOOLENV_DOWNLOAD_TIMEOUT_SECS", "30"),
            ("TOOLENV_CACHE_ROOT", "/srv/toolenv/tools"),
        ]),
    )
    .unwrap();

    assert_eq!(config.max_retries, 1);
    assert_eq!(config.parallelism, 8);
    assert_eq!(config.download_timeout(), Duration::from_secs(30));
    assert_eq!(config.cache_root, PathBuf::from("/srv/toolenv/tools"));
    assert_eq!(config.extract_timeout_secs, 120);
}

#[rstest]
fn test_missing_user_file_is_fine() {
    let tmp = TempDir::new().unwrap();
    let config =
        Config::from_sources(Some(&tmp.path().join("absent.yaml")), None, env(&[])).unwrap();
    assert_eq!(config, Config::default());
}

#[rstest]
fn test_missing_explicit_file_fails() {
    let tmp = TempDir::new().unwrap();
    let result = Config::from_sources(None, Some(&tmp.path().join("absent.yaml")), env(&[]));
    assert!(matches!(result, Err(Error::InvalidConfig(_))));
}

#[rstest]
fn test_zero_parallelism_is_rejected() {
    let result = Config::from_sources(None, None, env(&[("TOOLENV_PARALLELISM", "0")]));
    assert!(matches!(result, Err(Error::InvalidConfig(msg)) if msg.contains("parallelism")));
}

#[rstest]
fn test_configured_recipes_extend_catalog() {
    let tmp = TempDir::new().unwrap();
    let file = tmp.path().join("config.yaml");
    std::fs::write(
        &file,
        r#"
recipes:
  - name: protoc
    url: https://github.com/protocolbuffers/protobuf/releases/download/v{version}/protoc-{version}-{target}.zip
    entry: bin/protoc
    targets:
      - platform: linux-x86_64
        target: linux-x86_64
"#,
    )
    .unwrap();

    let config = Config::from_sources(None, Some(&file), env(&[])).unwrap();
    let catalog = config.catalog();
    assert!(catalog.get("gradle").is_some(), "built-ins stay available");

    let platform = Platform::parse("linux-x86_64").unwrap();
    let source = catalog.source_for("protoc", "25.1", platform).unwrap();
    assert!(source.url.ends_with("protoc-25.1-linux-x86_64.zip"));
}
