// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

use rstest::rstest;

use super::*;

#[rstest]
fn test_builtin_node_source() {
    let catalog = RecipeCatalog::builtin();
    let source = catalog
        .source_for("node", "20.11.0", LINUX_X64)
        .expect("node supports linux-x86_64");
    assert_eq!(
        source.url,
        "https://nodejs.org/dist/v20.11.0/node-v20.11.0-linux-x64.tar.gz"
    );
    assert_eq!(source.archive, ArchiveKind::TarGz);
    assert_eq!(source.entry, PathBuf::from("bin/node"));
    assert_eq!(source.download_name(), "node-20.11.0-linux-x86_64.tar.gz");
}

#[rstest]
fn test_per_target_entry_override() {
    let catalog = RecipeCatalog::builtin();
    let source = catalog.source_for("cmake", "3.28.1", DARWIN_ARM64).unwrap();
    assert!(source.url.ends_with("cmake-3.28.1-macos-universal.tar.gz"));
    assert_eq!(source.entry, PathBuf::from("CMake.app/Contents/bin/cmake"));
}

#[rstest]
fn test_platform_independent_recipe() {
    let catalog = RecipeCatalog::builtin();
    let source = catalog.source_for("gradle", "8.5", DARWIN_X64).unwrap();
    assert_eq!(
        source.url,
        "https://services.gradle.org/distributions/gradle-8.5-bin.zip"
    );
    assert_eq!(source.archive, ArchiveKind::Zip);
}

#[rstest]
fn test_unsupported_platform_is_incompatible() {
    let mut catalog = RecipeCatalog::empty();
    catalog.insert(ToolRecipe {
        name: "linux-only".to_string(),
        url: "https://example.invalid/{version}/{target}.tgz".to_string(),
        entry: "bin/tool".to_string(),
        archive: None,
        targets: vec![RecipeTarget::new(LINUX_X64, "amd64")],
    });

    let result = catalog.source_for("linux-only", "1.0", DARWIN_ARM64);
    assert!(matches!(result, Err(Error::Incompatible { .. })));

    let ok = catalog.source_for("linux-only", "1.0", LINUX_X64).unwrap();
    assert_eq!(ok.url, "https://example.invalid/1.0/amd64.tgz");
    assert_eq!(ok.archive, ArchiveKind::TarGz);
}

#[rstest]
fn test_unknown_tool() {
    let result = RecipeCatalog::builtin().source_for("nonesuch", "1.0", LINUX_X64);
    assert!(matches!(result, Err(Error::UnknownTool(name)) if name == "nonesuch"));
}

#[rstest]
fn test_recipe_from_yaml() {
    let yaml = r#"
name: just
url: https://github.com/casey/just/releases/download/{version}/just-{version}-{target}.tar.gz
entry: just
targets:
  - platform: linux-x86_64
    target: x86_64-unknown-linux-musl
"#;
    let recipe: ToolRecipe = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(recipe.targets[0].platform, LINUX_X64);

    let mut catalog = RecipeCatalog::empty();
    catalog.extend([recipe]);
    let source = catalog.source_for("just", "1.25.2", LINUX_X64).unwrap();
    assert!(source.url.ends_with("just-1.25.2-x86_64-unknown-linux-musl.tar.gz"));
}

#[rstest]
#[case("https://x/a.tar.gz", Some(ArchiveKind::TarGz))]
#[case("https://x/a.tgz?token=1", Some(ArchiveKind::TarGz))]
#[case("https://x/a.zip", Some(ArchiveKind::Zip))]
#[case("https://x/a.exe", None)]
fn test_archive_kind_from_url(#[case] url: &str, #[case] expected: Option<ArchiveKind>) {
    assert_eq!(ArchiveKind::from_url(url), expected);
}
