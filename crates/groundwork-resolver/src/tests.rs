use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use groundwork_core::{
    parse_canonical_version, persist_snapshot, write_baseline, write_pin,
    BaselineProvenance, ManagedBaselineState, ManifestFileEntry, OsFs, RepoLayout,
    SnapshotEntry, SnapshotEntryKind, SnapshotStatus, TemplateManifest, UpgradeSnapshot,
    Version, BASELINE_SCHEMA_VERSION, PIN_PATH, SNAPSHOT_SCHEMA_VERSION,
    TEMPLATE_MANIFEST_SCHEMA_VERSION,
};
use groundwork_registry::{MigrationManifestStore, TemplateManifestStore};

use super::*;

fn version(raw: &str) -> Version {
    parse_canonical_version(raw).expect("must parse version")
}

fn manifest_json(target: &str, min_prior: &str, operations: &[&str]) -> String {
    format!(
        r#"{{"schema_version": 1, "target_version": "{target}", "min_prior_version": "{min_prior}", "operations": [{}]}}"#,
        operations.join(",")
    )
}

fn rename_op(id: &str, from: &str, to: &str, agnostic: bool) -> String {
    format!(
        r#"{{"id": "{id}", "kind": "rename_file", "rationale": "moved", "source_agnostic": {agnostic}, "from": "{from}", "to": "{to}"}}"#
    )
}

fn delete_op(id: &str, path: &str, agnostic: bool) -> String {
    format!(
        r#"{{"id": "{id}", "kind": "delete_path", "rationale": "gone", "source_agnostic": {agnostic}, "path": "{path}"}}"#
    )
}

fn store(sources: &[(String, String)]) -> MigrationManifestStore {
    let borrowed: Vec<(&str, &str)> = sources
        .iter()
        .map(|(name, json)| (name.as_str(), json.as_str()))
        .collect();
    MigrationManifestStore::from_sources(&borrowed).expect("must build migration store")
}

fn write_file(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("must create parent");
    }
    fs::write(path, content).expect("must write file");
}

fn step_ids(plan: &MigrationPlan) -> Vec<(String, PlannedStatus)> {
    plan.steps
        .iter()
        .map(|step| (step.operation.id.clone(), step.status))
        .collect()
}

#[test]
fn plan_spans_intermediate_manifests_without_duplicate_ids() {
    let root = test_repo_root();
    let layout = RepoLayout::new(&root);
    write_file(&root, ".groundwork/a.md", "a\n");
    write_file(&root, ".groundwork/old", "x\n");

    let store = store(&[
        (
            "0.2.0.json".to_string(),
            manifest_json(
                "0.2.0",
                "0.1.0",
                &[&rename_op("a-to-b", ".groundwork/a.md", ".groundwork/b.md", false)],
            ),
        ),
        (
            "0.3.0.json".to_string(),
            manifest_json(
                "0.3.0",
                "0.1.0",
                &[
                    &rename_op("a-to-b", ".groundwork/a.md", ".groundwork/b.md", true),
                    &delete_op("drop-old", ".groundwork/old", false),
                ],
            ),
        ),
    ]);

    let plan = plan_migrations(
        &store,
        &OsFs,
        &layout,
        Some(&version("0.1.0")),
        &version("0.3.0"),
    )
    .expect("must plan");

    assert_eq!(plan.chain, vec![version("0.2.0"), version("0.3.0")]);
    assert_eq!(
        step_ids(&plan),
        vec![
            ("a-to-b".to_string(), PlannedStatus::Planned),
            ("drop-old".to_string(), PlannedStatus::Planned),
        ]
    );
    assert_eq!(plan.steps[0].manifest_version, version("0.2.0"));
    assert!(!plan.steps[0].operation.source_agnostic);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn plan_with_unknown_source_uses_only_target_manifest() {
    let root = test_repo_root();
    let layout = RepoLayout::new(&root);
    write_file(&root, ".groundwork/a.md", "a\n");
    write_file(&root, ".groundwork/cache/x", "x\n");

    let store = store(&[
        (
            "0.2.0.json".to_string(),
            manifest_json("0.2.0", "0.1.0", &[&delete_op("early", ".groundwork/a.md", true)]),
        ),
        (
            "0.3.0.json".to_string(),
            manifest_json(
                "0.3.0",
                "0.1.0",
                &[
                    &rename_op("a-to-b", ".groundwork/a.md", ".groundwork/b.md", false),
                    &delete_op("drop-cache", ".groundwork/cache", true),
                ],
            ),
        ),
    ]);

    let plan = plan_migrations(&store, &OsFs, &layout, None, &version("0.3.0"))
        .expect("must plan");
    assert_eq!(plan.chain, vec![version("0.3.0")]);
    assert_eq!(
        step_ids(&plan),
        vec![
            ("a-to-b".to_string(), PlannedStatus::SkippedUnknownSource),
            ("drop-cache".to_string(), PlannedStatus::Planned),
        ]
    );
    assert!(plan.steps[0].covered_paths.is_empty());
    assert_eq!(plan.steps[1].covered_paths, vec![".groundwork/cache"]);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn plan_skips_operations_when_source_is_older_than_minimum() {
    let root = test_repo_root();
    let layout = RepoLayout::new(&root);
    write_file(&root, ".groundwork/a.md", "a\n");

    let store = store(&[(
        "0.3.0.json".to_string(),
        manifest_json(
            "0.3.0",
            "0.2.0",
            &[&rename_op("a-to-b", ".groundwork/a.md", ".groundwork/b.md", false)],
        ),
    )]);

    let plan = plan_migrations(
        &store,
        &OsFs,
        &layout,
        Some(&version("0.1.0")),
        &version("0.3.0"),
    )
    .expect("must plan");
    let step = &plan.steps[0];
    assert_eq!(step.status, PlannedStatus::SkippedSourceTooOld);
    let reason = step.reason.as_deref().expect("skip must carry a reason");
    assert!(reason.contains("0.1.0"));
    assert!(reason.contains("0.2.0"));
    assert!(!plan.has_work());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn plan_tracks_presence_across_earlier_renames_and_deletes() {
    let root = test_repo_root();
    let layout = RepoLayout::new(&root);
    write_file(&root, ".groundwork/a.md", "a\n");

    let store = store(&[(
        "0.2.0.json".to_string(),
        manifest_json(
            "0.2.0",
            "0.1.0",
            &[
                &rename_op("a-to-b", ".groundwork/a.md", ".groundwork/b.md", true),
                &rename_op("b-to-c", ".groundwork/b.md", ".groundwork/sub/c.md", true),
                &rename_op("a-again", ".groundwork/a.md", ".groundwork/z.md", true),
                &delete_op("drop-c", ".groundwork/sub", true),
                &delete_op("drop-c-again", ".groundwork/sub/c.md", true),
            ],
        ),
    )]);

    let plan = plan_migrations(
        &store,
        &OsFs,
        &layout,
        Some(&version("0.1.0")),
        &version("0.2.0"),
    )
    .expect("must plan");

    assert_eq!(
        step_ids(&plan),
        vec![
            ("a-to-b".to_string(), PlannedStatus::Planned),
            ("b-to-c".to_string(), PlannedStatus::Planned),
            ("a-again".to_string(), PlannedStatus::NoOp),
            ("drop-c".to_string(), PlannedStatus::Planned),
            ("drop-c-again".to_string(), PlannedStatus::NoOp),
        ]
    );
    assert_eq!(
        plan.steps[1].covered_paths,
        vec![".groundwork/b.md", ".groundwork/sub"]
    );
    assert_eq!(
        plan.covered_paths().into_iter().collect::<Vec<_>>(),
        vec![".groundwork/a.md", ".groundwork/b.md", ".groundwork/sub"]
    );

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn plan_is_empty_when_already_at_target() {
    let root = test_repo_root();
    let layout = RepoLayout::new(&root);
    let store = store(&[(
        "0.2.0.json".to_string(),
        manifest_json("0.2.0", "0.1.0", &[&delete_op("x", ".groundwork/x", true)]),
    )]);

    let plan = plan_migrations(
        &store,
        &OsFs,
        &layout,
        Some(&version("0.2.0")),
        &version("0.2.0"),
    )
    .expect("must plan");
    assert!(plan.chain.is_empty());
    assert!(plan.steps.is_empty());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn skills_already_in_directory_form_need_no_migration() {
    let root = test_repo_root();
    let layout = RepoLayout::new(&root);
    write_file(&root, ".groundwork/skills/review/SKILL.md", "review\n");
    let store = MigrationManifestStore::embedded().expect("must load embedded migrations");

    let plan = plan_migrations(
        &store,
        &OsFs,
        &layout,
        Some(&version("0.6.1")),
        &version("0.7.0"),
    )
    .expect("must plan");
    let skills = plan
        .steps
        .iter()
        .find(|step| step.operation.id == "skills-directory-layout")
        .expect("must plan the skills operation");
    assert_eq!(skills.status, PlannedStatus::NoOp);
    assert!(skills.covered_paths.is_empty());
    assert!(!plan.has_work());

    write_file(&root, ".groundwork/skills/lint.md", "lint\n");
    let plan = plan_migrations(
        &store,
        &OsFs,
        &layout,
        Some(&version("0.6.1")),
        &version("0.7.0"),
    )
    .expect("must plan");
    assert_eq!(
        plan.covered_paths().into_iter().collect::<Vec<_>>(),
        vec![".groundwork/skills"]
    );

    let _ = fs::remove_dir_all(&root);
}

fn config_store() -> MigrationManifestStore {
    store(&[(
        "0.2.0.json".to_string(),
        manifest_json(
            "0.2.0",
            "0.1.0",
            &[
                r#"{"id": "rename-mode", "kind": "config_rename_key", "rationale": "renamed", "source_agnostic": true, "from": "old_mode", "to": "mode"}"#,
                r#"{"id": "default-gitignore", "kind": "config_set_default", "rationale": "new key", "source_agnostic": true, "key": "manage_gitignore", "value": "true"}"#,
                r#"{"id": "rename-gitignore", "kind": "config_rename_key", "rationale": "renamed", "source_agnostic": true, "from": "manage_gitignore", "to": "gitignore.manage"}"#,
            ],
        ),
    )])
}

#[test]
fn config_operations_are_noops_when_nothing_would_change() {
    let root = test_repo_root();
    let layout = RepoLayout::new(&root);
    let store = config_store();
    write_file(&root, ".groundwork/notes.md", "notes\n");

    let plan = plan_migrations(
        &store,
        &OsFs,
        &layout,
        Some(&version("0.1.0")),
        &version("0.2.0"),
    )
    .expect("must plan");
    assert_eq!(
        step_ids(&plan),
        vec![
            ("rename-mode".to_string(), PlannedStatus::NoOp),
            ("default-gitignore".to_string(), PlannedStatus::Planned),
            ("rename-gitignore".to_string(), PlannedStatus::Planned),
        ]
    );
    assert_eq!(plan.steps[1].covered_paths, vec![".groundwork/config.toml"]);

    write_file(
        &root,
        ".groundwork/config.toml",
        "mode = \"strict\"\n\n[gitignore]\nmanage = false\n",
    );
    let plan = plan_migrations(
        &store,
        &OsFs,
        &layout,
        Some(&version("0.1.0")),
        &version("0.2.0"),
    )
    .expect("must plan");
    assert_eq!(
        step_ids(&plan),
        vec![
            ("rename-mode".to_string(), PlannedStatus::NoOp),
            ("default-gitignore".to_string(), PlannedStatus::Planned),
            ("rename-gitignore".to_string(), PlannedStatus::Planned),
        ]
    );

    write_file(
        &root,
        ".groundwork/config.toml",
        "mode = \"strict\"\nmanage_gitignore = false\n",
    );
    let plan = plan_migrations(
        &store,
        &OsFs,
        &layout,
        Some(&version("0.1.0")),
        &version("0.2.0"),
    )
    .expect("must plan");
    assert_eq!(
        step_ids(&plan),
        vec![
            ("rename-mode".to_string(), PlannedStatus::NoOp),
            ("default-gitignore".to_string(), PlannedStatus::NoOp),
            ("rename-gitignore".to_string(), PlannedStatus::Planned),
        ]
    );

    let _ = fs::remove_dir_all(&root);
}

fn docs_manifest(raw_version: &str, docs: &[(&str, &str)]) -> TemplateManifest {
    TemplateManifest {
        schema_version: TEMPLATE_MANIFEST_SCHEMA_VERSION,
        version: version(raw_version),
        files: docs
            .iter()
            .map(|(path, content)| ManifestFileEntry::from_bytes(path, content.as_bytes()))
            .collect(),
    }
}

fn template_store() -> TemplateManifestStore {
    TemplateManifestStore::from_manifests(vec![
        docs_manifest("0.1.0", &[(".groundwork/docs/guide.md", "guide v1\n")]),
        docs_manifest(
            "0.2.0",
            &[
                (".groundwork/docs/guide.md", "guide v2\n"),
                ("AGENTS.md", "agents\n"),
            ],
        ),
        docs_manifest(
            "0.2.1",
            &[
                (".groundwork/docs/guide.md", "guide v2\n"),
                ("AGENTS.md", "agents v2\n"),
            ],
        ),
    ])
    .expect("must build template store")
}

#[test]
fn source_prefers_pin_over_baseline() {
    let root = test_repo_root();
    let layout = RepoLayout::new(&root);
    let templates = template_store();
    write_pin(&OsFs, &layout, &version("0.2.0")).expect("must write pin");
    write_baseline(&OsFs, &layout, &baseline("0.1.0")).expect("must write baseline");

    let resolved = SourceVersionResolver::new(&OsFs, &layout, &templates).resolve();
    assert_eq!(resolved.version, Some(version("0.2.0")));
    assert_eq!(resolved.origin, SourceOrigin::PinFile);
    assert!(resolved.notes.is_empty());

    fs::remove_file(layout.pin_path()).expect("must remove pin");
    let resolved = SourceVersionResolver::new(&OsFs, &layout, &templates).resolve();
    assert_eq!(resolved.version, Some(version("0.1.0")));
    assert_eq!(resolved.origin, SourceOrigin::BaselineState);
    assert_eq!(resolved.notes.len(), 1);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn source_falls_back_to_captured_pin_in_snapshots() {
    let root = test_repo_root();
    let layout = RepoLayout::new(&root);
    let templates = template_store();
    write_file(&root, PIN_PATH, "garbage\n");

    let encoded = base64::engine::general_purpose::STANDARD.encode("0.1.0\n");
    let snapshot = UpgradeSnapshot {
        schema_version: SNAPSHOT_SCHEMA_VERSION,
        id: "up-10-1".to_string(),
        created_at_unix: 10,
        from_version: None,
        to_version: version("0.2.0"),
        status: SnapshotStatus::AutoRolledBack,
        failed_step: Some("template_files".to_string()),
        error: Some("boom".to_string()),
        rollback_error: None,
        prior_baseline: None,
        targets: vec![PIN_PATH.to_string()],
        entries: vec![SnapshotEntry {
            path: PIN_PATH.to_string(),
            kind: SnapshotEntryKind::File,
            content_base64: Some(encoded),
            mode: Some(0o644),
            link_target: None,
        }],
    };
    persist_snapshot(&OsFs, &layout, &snapshot).expect("must persist snapshot");

    let resolved = SourceVersionResolver::new(&OsFs, &layout, &templates).resolve();
    assert_eq!(resolved.version, Some(version("0.1.0")));
    assert_eq!(resolved.origin, SourceOrigin::UpgradeSnapshot);
    assert!(resolved.notes[0].contains("pin file unusable"));

    let _ = fs::remove_dir_all(&root);
}

fn pin_snapshot(id: &str, created_at_unix: u64, pin: &str) -> UpgradeSnapshot {
    UpgradeSnapshot {
        schema_version: SNAPSHOT_SCHEMA_VERSION,
        id: id.to_string(),
        created_at_unix,
        from_version: None,
        to_version: version("0.2.0"),
        status: SnapshotStatus::Applied,
        failed_step: None,
        error: None,
        rollback_error: None,
        prior_baseline: None,
        targets: vec![PIN_PATH.to_string()],
        entries: vec![SnapshotEntry {
            path: PIN_PATH.to_string(),
            kind: SnapshotEntryKind::File,
            content_base64: Some(base64::engine::general_purpose::STANDARD.encode(pin)),
            mode: Some(0o644),
            link_target: None,
        }],
    }
}

#[test]
fn source_passes_over_unreadable_snapshots_and_broken_pins() {
    let root = test_repo_root();
    let layout = RepoLayout::new(&root);
    let templates = template_store();
    persist_snapshot(&OsFs, &layout, &pin_snapshot("up-10-1", 10, "0.1.0\n"))
        .expect("must persist snapshot");
    persist_snapshot(&OsFs, &layout, &pin_snapshot("up-20-1", 20, "not a version\n"))
        .expect("must persist snapshot");
    fs::write(layout.snapshot_path("up-30-1"), "{ truncated").expect("must write corrupt file");

    let resolved = SourceVersionResolver::new(&OsFs, &layout, &templates).resolve();
    assert_eq!(resolved.version, Some(version("0.1.0")));
    assert_eq!(resolved.origin, SourceOrigin::UpgradeSnapshot);
    let skipped: Vec<&String> = resolved
        .notes
        .iter()
        .filter(|note| note.contains("skipped"))
        .collect();
    assert_eq!(skipped.len(), 2, "notes: {:?}", resolved.notes);
    assert!(skipped[0].contains("up-30-1"));
    assert!(skipped[1].contains("up-20-1"));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn source_matches_docs_tree_against_single_release() {
    let root = test_repo_root();
    let layout = RepoLayout::new(&root);
    let templates = template_store();
    write_file(&root, ".groundwork/docs/guide.md", "guide v1\r\n");

    let resolved = SourceVersionResolver::new(&OsFs, &layout, &templates).resolve();
    assert_eq!(resolved.version, Some(version("0.1.0")));
    assert_eq!(resolved.origin, SourceOrigin::ManifestMatch);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn source_is_unknown_when_docs_tree_matches_several_releases() {
    let root = test_repo_root();
    let layout = RepoLayout::new(&root);
    let templates = template_store();
    write_file(&root, ".groundwork/docs/guide.md", "guide v2\n");

    let resolved = SourceVersionResolver::new(&OsFs, &layout, &templates).resolve();
    assert_eq!(resolved.version, None);
    assert_eq!(resolved.origin, SourceOrigin::Unknown);
    let last = resolved.notes.last().expect("must explain the failure");
    assert!(last.contains("0.2.0, 0.2.1"), "unexpected note: {last}");

    let _ = fs::remove_dir_all(&root);
}

fn baseline(raw_version: &str) -> ManagedBaselineState {
    ManagedBaselineState {
        schema_version: BASELINE_SCHEMA_VERSION,
        baseline_version: version(raw_version),
        provenance: BaselineProvenance::WrittenByInit,
        created_at_unix: 1,
        updated_at_unix: 1,
        files: Vec::new(),
    }
}

fn test_repo_root() -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_nanos())
        .unwrap_or(0);
    let sequence = COUNTER.fetch_add(1, Ordering::Relaxed);
    let root = std::env::temp_dir().join(format!(
        "groundwork-resolver-test-{}-{nanos}-{sequence}",
        std::process::id()
    ));
    fs::create_dir_all(&root).expect("must create test root");
    root
}
