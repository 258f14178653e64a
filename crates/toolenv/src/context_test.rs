// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

use rstest::rstest;
use tempfile::TempDir;

use super::*;

fn mark(dir: &Path, kind: &str) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(
        dir.join(MARKER_FILENAME),
        format!("# toolenv: {kind}\nwatch_file .toolenv.yaml\n"),
    )
    .expect("Failed to write marker");
}

#[rstest]
fn test_standalone_without_marker() {
    let tmp = TempDir::new().unwrap();
    let context = resolve(tmp.path()).expect("Should resolve");
    assert_eq!(
        context,
        Context::Standalone {
            root: tmp.path().to_path_buf()
        }
    );
}

#[rstest]
fn test_workspace_root() {
    let tmp = TempDir::new().unwrap();
    mark(tmp.path(), "workspace");
    let context = resolve(tmp.path()).unwrap();
    assert_eq!(
        context,
        Context::Workspace {
            root: tmp.path().to_path_buf()
        }
    );
}

#[rstest]
#[case("src")]
#[case("src/main/java")]
#[case("lib/../src/./deep")]
fn test_workspace_descendant_resolves_to_root(#[case] sub: &str) {
    let tmp = TempDir::new().unwrap();
    mark(tmp.path(), "workspace");
    std::fs::create_dir_all(tmp.path().join("lib")).unwrap();
    std::fs::create_dir_all(tmp.path().join("src/deep")).unwrap();
    let start = tmp.path().join(sub);
    std::fs::create_dir_all(&start).unwrap();

    let first = resolve(&start).unwrap();
    let second = resolve(&start).unwrap();
    assert_eq!(
        first,
        Context::Workspace {
            root: tmp.path().to_path_buf()
        }
    );
    assert_eq!(first, second, "resolution should be idempotent");
}

#[rstest]
fn test_project_alone() {
    let tmp = TempDir::new().unwrap();
    let project = tmp.path().join("app");
    mark(&project, "project");

    let context = resolve(project.join("src")).unwrap();
    assert_eq!(context, Context::Project { root: project });
}

#[rstest]
fn test_nested_project_finds_workspace() {
    let tmp = TempDir::new().unwrap();
    mark(tmp.path(), "workspace");
    let project = tmp.path().join("services").join("api");
    mark(&project, "project");

    let context = resolve(&project).unwrap();
    assert_eq!(
        context,
        Context::NestedProject {
            root: project.clone(),
            workspace: tmp.path().to_path_buf(),
        }
    );
    assert_eq!(context.workspace(), Some(tmp.path()));
    assert_eq!(context.root(), project.as_path());
}

#[rstest]
fn test_project_markers_between_project_and_workspace_are_skipped() {
    let tmp = TempDir::new().unwrap();
    mark(tmp.path(), "workspace");
    let outer = tmp.path().join("outer");
    mark(&outer, "project");
    let inner = outer.join("inner");
    mark(&inner, "project");

    let context = resolve(&inner).unwrap();
    assert_eq!(
        context,
        Context::NestedProject {
            root: inner,
            workspace: tmp.path().to_path_buf(),
        }
    );
}

#[rstest]
fn test_envrc_without_tag_is_not_a_marker() {
    let tmp = TempDir::new().unwrap();
    mark(tmp.path(), "workspace");
    let child = tmp.path().join("child");
    std::fs::create_dir_all(&child).unwrap();
    std::fs::write(child.join(MARKER_FILENAME), "export FOO=1\n").unwrap();

    let context = resolve(&child).unwrap();
    assert_eq!(
        context,
        Context::Workspace {
            root: tmp.path().to_path_buf()
        }
    );
}

#[rstest]
fn test_two_tags_at_same_level_is_ambiguous() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(
        tmp.path().join(MARKER_FILENAME),
        "# toolenv: workspace\n# toolenv: project\n",
    )
    .unwrap();

    match resolve(tmp.path()) {
        Err(Error::AmbiguousContext { path, .. }) => assert_eq!(path, tmp.path()),
        other => panic!("Expected AmbiguousContext, got: {:?}", other),
    }
}

#[rstest]
fn test_repeated_identical_tag_is_fine() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(
        tmp.path().join(MARKER_FILENAME),
        "# toolenv: project\n#toolenv:project\n",
    )
    .unwrap();

    let context = resolve(tmp.path()).unwrap();
    assert!(matches!(context, Context::Project { .. }));
}

#[rstest]
fn test_unknown_tag_reports_line() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(
        tmp.path().join(MARKER_FILENAME),
        "use nix\n# toolenv: monorepo\n",
    )
    .unwrap();

    match resolve(tmp.path()) {
        Err(Error::ConfigParseError { line, .. }) => assert_eq!(line, Some(2)),
        other => panic!("Expected ConfigParseError, got: {:?}", other),
    }
}
