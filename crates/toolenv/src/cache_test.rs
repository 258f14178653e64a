// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;
use crate::testing::RecordingAudit;
use crate::{DECLARATION_FILENAME, MARKER_FILENAME};

struct Store {
    tmp: TempDir,
    cache: ToolCache,
    audit: RecordingAudit,
}

impl Store {
    fn install(&self, tool: &str, version: &str) -> PathBuf {
        let path = self.cache.entry_path(tool, version);
        std::fs::create_dir_all(path.join("bin")).unwrap();
        path
    }

    fn workspace(&self, name: &str, yaml: &str) -> PathBuf {
        let root = self.tmp.path().join("src").join(name);
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join(MARKER_FILENAME), "# toolenv: workspace\n").unwrap();
        std::fs::write(root.join(DECLARATION_FILENAME), yaml).unwrap();
        root
    }
}

#[fixture]
fn store() -> Store {
    let tmp = TempDir::new().unwrap();
    let cache = ToolCache::new(tmp.path().join("toolenv").join("tools"));
    Store {
        tmp,
        cache,
        audit: RecordingAudit::default(),
    }
}

#[rstest]
fn test_layout_is_derived_from_root(store: Store) {
    let base = store.tmp.path().join("toolenv");
    assert_eq!(store.cache.downloads_dir(), base.join("cache"));
    assert_eq!(store.cache.contexts_dir(), base.join("contexts"));
    assert_eq!(
        store.cache.entry_path("gradle", "8.5"),
        base.join("tools").join("gradle").join("8.5")
    );
}

#[rstest]
fn test_lookup_is_an_existence_check(store: Store) {
    assert_eq!(store.cache.lookup("gradle", "8.5"), None);
    let path = store.install("gradle", "8.5");
    assert_eq!(store.cache.lookup("gradle", "8.5"), Some(path));
    assert_eq!(store.cache.lookup("gradle", "8.6"), None);
}

#[rstest]
fn test_register_is_idempotent(store: Store) {
    let ws = store.workspace("ws", "tools:\n  gradle: '8.5'\n");
    let path = store.install("gradle", "8.5");

    store.cache.register("gradle", "8.5", &path, &ws).unwrap();
    store.cache.register("gradle", "8.5", &path, &ws).unwrap();

    assert_eq!(store.cache.known_contexts().unwrap(), vec![ws.clone()]);
    assert_eq!(
        store.cache.references_of("gradle", "8.5").unwrap(),
        BTreeSet::from([ws])
    );
}

#[rstest]
fn test_register_requires_existing_path(store: Store) {
    let ws = store.workspace("ws", "tools:\n  gradle: '8.5'\n");
    let missing = store.cache.entry_path("gradle", "8.5");
    let result = store.cache.register("gradle", "8.5", &missing, &ws);
    assert!(matches!(result, Err(Error::Unresolved { .. })));
}

#[rstest]
fn test_prune_keeps_referenced_entries(store: Store) {
    let ws = store.workspace("ws", "tools:\n  gradle: '8.5'\n");
    let kept = store.install("gradle", "8.5");
    store.install("gradle", "8.4");
    store.install("cmake", "3.27");
    store.cache.register("gradle", "8.5", &kept, &ws).unwrap();

    let removed = store.cache.prune(&store.audit).unwrap();
    assert_eq!(
        removed,
        BTreeSet::from([
            ToolVersion::new("cmake", "3.27"),
            ToolVersion::new("gradle", "8.4"),
        ])
    );
    assert_eq!(store.cache.lookup("gradle", "8.5"), Some(kept));
    assert_eq!(store.cache.lookup("gradle", "8.4"), None);
    assert!(!store.cache.root().join("cmake").exists(), "empty tool dir should go");
}

#[rstest]
fn test_prune_after_last_reference_is_removed(store: Store) {
    let ws = store.workspace("ws", "tools:\n  gradle: '8.5'\n");
    let path = store.install("gradle", "8.5");
    store.cache.register("gradle", "8.5", &path, &ws).unwrap();
    assert!(store.cache.prune(&store.audit).unwrap().is_empty());

    std::fs::write(ws.join(DECLARATION_FILENAME), "tools: {}\n").unwrap();
    let removed = store.cache.prune(&store.audit).unwrap();
    assert_eq!(removed, BTreeSet::from([ToolVersion::new("gradle", "8.5")]));
    assert_eq!(store.cache.lookup("gradle", "8.5"), None);
}

#[rstest]
fn test_plan_does_not_remove(store: Store) {
    store.install("go", "1.21.6");

    let plan = store.cache.plan_prune().unwrap();
    assert_eq!(plan.remove, BTreeSet::from([ToolVersion::new("go", "1.21.6")]));
    assert!(store.cache.lookup("go", "1.21.6").is_some());

    let removed = store.cache.apply_prune(&plan, &store.audit).unwrap();
    assert_eq!(removed, plan.remove);
    assert!(store.cache.lookup("go", "1.21.6").is_none());
}

#[rstest]
fn test_stale_contexts_are_forgotten(store: Store) {
    let ws = store.workspace("gone", "tools:\n  node: '20.11.0'\n");
    let path = store.install("node", "20.11.0");
    store.cache.register("node", "20.11.0", &path, &ws).unwrap();
    std::fs::remove_dir_all(&ws).unwrap();

    let plan = store.cache.plan_prune().unwrap();
    assert_eq!(plan.stale_contexts, vec![ws]);
    assert!(plan.remove.contains(&ToolVersion::new("node", "20.11.0")));

    store.cache.apply_prune(&plan, &store.audit).unwrap();
    assert!(store.cache.known_contexts().unwrap().is_empty());
}

#[rstest]
fn test_malformed_declaration_aborts_prune(store: Store) {
    let ws = store.workspace("ws", "tools:\n  gradle: '8.5'\n");
    let path = store.install("gradle", "8.5");
    store.cache.register("gradle", "8.5", &path, &ws).unwrap();
    std::fs::write(ws.join(DECLARATION_FILENAME), "tools: [oops\n").unwrap();

    let result = store.cache.prune(&store.audit);
    assert!(matches!(result, Err(Error::ConfigParseError { .. })));
    assert!(store.cache.lookup("gradle", "8.5").is_some());
}

#[rstest]
fn test_override_paths_are_not_references(store: Store) {
    let ws = store.workspace("ws", "tools:\n  cmake:\n    version: '3.28'\n    path: /opt/cmake\n");
    store.cache.remember_context(&ws).unwrap();
    store.install("cmake", "3.28");

    let plan = store.cache.plan_prune().unwrap();
    assert!(plan.remove.contains(&ToolVersion::new("cmake", "3.28")));
}

#[rstest]
fn test_hidden_directories_are_not_entries(store: Store) {
    store.install("gradle", "8.5");
    std::fs::create_dir_all(store.cache.root().join(".staging-abc").join("bin")).unwrap();
    std::fs::create_dir_all(store.cache.root().join("gradle").join(".trash-1")).unwrap();

    let ids: Vec<_> = store
        .cache
        .entries()
        .unwrap()
        .into_iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(ids, vec![ToolVersion::new("gradle", "8.5")]);
}

#[rstest]
fn test_entries_report_metadata(store: Store) {
    let ws = store.workspace("ws", "tools:\n  gradle: '8.5'\n");
    let path = store.install("gradle", "8.5");
    let installed_at = chrono::DateTime::parse_from_rfc3339("2024-01-02T03:04:05Z")
        .unwrap()
        .with_timezone(&Utc);
    EntryMetadata {
        tool: "gradle".to_string(),
        version: "8.5".to_string(),
        platform: Platform::parse("linux-x86_64"),
        source: Some("https://example.invalid/gradle.zip".to_string()),
        installed_at,
    }
    .write(&path)
    .unwrap();
    store.cache.register("gradle", "8.5", &path, &ws).unwrap();

    let entries = store.cache.entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].installed_at, installed_at);
    assert_eq!(entries[0].platform, Platform::parse("linux-x86_64"));
    assert_eq!(entries[0].references, BTreeSet::from([ws]));
}

#[rstest]
fn test_apply_keeps_entries_declared_after_planning(store: Store) {
    let ws = store.workspace("a", "tools: {}\n");
    store.cache.remember_context(&ws).unwrap();
    store.install("gradle", "8.5");

    let plan = store.cache.plan_prune().unwrap();
    assert!(plan.remove.contains(&ToolVersion::new("gradle", "8.5")));

    std::fs::write(ws.join(DECLARATION_FILENAME), "tools:\n  gradle: '8.5'\n").unwrap();
    let removed = store.cache.apply_prune(&plan, &store.audit).unwrap();
    assert!(removed.is_empty());
    assert!(store.cache.lookup("gradle", "8.5").is_some());
    assert!(store.audit.events().is_empty(), "nothing was removed");
}

#[rstest]
fn test_prune_records_one_event_per_removal(store: Store) {
    let ws = store.workspace("ws", "tools:\n  gradle: '8.5'\n");
    let kept = store.install("gradle", "8.5");
    store.install("gradle", "8.4");
    store.install("cmake", "3.27");
    store.cache.register("gradle", "8.5", &kept, &ws).unwrap();

    store.cache.prune(&store.audit).unwrap();

    let events = store.audit.events();
    let pruned: Vec<_> = events
        .iter()
        .map(|e| (e.tool.as_str(), e.version.as_str()))
        .collect();
    assert_eq!(pruned, vec![("cmake", "3.27"), ("gradle", "8.4")]);
    for event in &events {
        assert_eq!(event.action, AuditAction::Prune);
        assert_eq!(event.outcome, AuditOutcome::Succeeded);
        assert_eq!(event.context_path, None);
    }
}

#[rstest]
fn test_abandoned_work_directories_are_reclaimed(store: Store) {
    let staging = store.cache.root().join(".staging-abc");
    let trash = store.cache.root().join(".trash-def");
    std::fs::create_dir_all(staging.join("bin")).unwrap();
    std::fs::create_dir_all(&trash).unwrap();

    let fresh = store.cache.plan_prune().unwrap();
    assert!(fresh.leftovers.is_empty(), "recent work dirs may still be in use");

    let cache = store.cache.clone().with_leftover_age(Duration::ZERO);
    let plan = cache.plan_prune().unwrap();
    assert_eq!(plan.leftovers, vec![staging.clone(), trash.clone()]);
    assert!(!plan.is_empty());

    cache.apply_prune(&plan, &store.audit).unwrap();
    assert!(!staging.exists());
    assert!(!trash.exists());
}
