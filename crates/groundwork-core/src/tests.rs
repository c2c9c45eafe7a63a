use std::cmp::Ordering;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{SystemTime, UNIX_EPOCH};

use super::*;

fn hash_a() -> String {
    "a".repeat(64)
}

fn migration_manifest_json(operations: &str) -> String {
    format!(
        r#"{{
  "schema_version": 1,
  "target_version": "0.6.0",
  "min_prior_version": "0.5.0",
  "operations": [{operations}]
}}"#
    )
}

#[test]
fn compare_semver_orders_numerically() {
    assert_eq!(
        compare_semver("0.6.0", "0.6.1").expect("must compare"),
        Ordering::Less
    );
    assert_eq!(
        compare_semver("1.0.0", "1.0.0").expect("must compare"),
        Ordering::Equal
    );
    assert_eq!(
        compare_semver("0.10.0", "0.9.9").expect("must compare"),
        Ordering::Greater
    );
    assert_eq!(
        compare_semver("v0.7.0", "0.7.0").expect("must compare"),
        Ordering::Equal
    );
}

#[test]
fn compare_semver_rejects_malformed_versions() {
    for raw in [
        "0.6.x",
        "1.2",
        "",
        "a.b.c",
        "99999999999999999999999.0.0",
        "1.0.0-rc.1",
        "1.0.0+build.5",
    ] {
        assert!(
            compare_semver(raw, "1.0.0").is_err(),
            "must reject malformed version '{raw}'"
        );
    }
}

#[test]
fn parse_canonical_version_rejects_prefixed_spelling() {
    assert!(parse_canonical_version("0.6.0").is_ok());
    let err = parse_canonical_version("v0.6.0").expect_err("must reject prefix");
    assert!(err.to_string().contains("canonical"));
}

#[test]
fn normalize_content_folds_line_endings_and_bom() {
    let raw = b"\xEF\xBB\xBFone\r\ntwo\rthree\n";
    assert_eq!(normalize_content(raw).as_ref(), b"one\ntwo\nthree\n");
    assert!(content_equal(b"a\r\nb\r\n", b"a\nb\n"));
    assert!(!content_equal(b"a\nb\n", b"a\nb"));
    assert_eq!(normalized_hash(b"x\r\n"), sha256_hex(b"x\n"));
}

#[test]
fn allowlist_comparable_ignores_order_and_comments() {
    let upstream = b"# managed\ngit status\ncargo test\n";
    let reordered = b"cargo test\n\n  git status  \n";
    let left = comparable_from_bytes(PolicyId::Allowlist, upstream);
    let right = comparable_from_bytes(PolicyId::Allowlist, reordered);
    assert_eq!(left, right);
    assert_ne!(normalized_hash(upstream), normalized_hash(reordered));
    assert_eq!(
        allowlist_entries(reordered),
        vec!["cargo test".to_string(), "git status".to_string()]
    );
}

#[test]
fn memory_section_hash_ignores_user_section() {
    let managed = format!("# Agents\nmanaged body\n{MANAGED_SECTION_MARKER}\n");
    let with_notes = format!("{managed}my own notes\n");
    assert_eq!(
        comparable_from_bytes(PolicyId::MemorySection, managed.as_bytes()),
        comparable_from_bytes(PolicyId::MemorySection, with_notes.as_bytes())
    );
    assert_eq!(
        memory_managed_section(with_notes.as_bytes()),
        b"# Agents\nmanaged body\n".to_vec()
    );

    let without_marker = b"# Agents\nmanaged body\n";
    assert_eq!(
        memory_managed_section(without_marker),
        without_marker.to_vec()
    );
}

#[test]
fn memory_user_section_starts_at_marker_line() {
    let document = format!("# Agents\r\n  {MANAGED_SECTION_MARKER}  \r\nnotes\r\n");
    assert_eq!(
        memory_user_section(document.as_bytes()),
        Some(format!("  {MANAGED_SECTION_MARKER}  \nnotes\n").into_bytes())
    );
    assert_eq!(memory_user_section(b"# Agents\nno marker\n"), None);
}

#[test]
fn recorded_comparable_matches_derived_comparable() {
    let bytes = b"git status\ncargo test\n";
    let entry = ManifestFileEntry::from_bytes(ALLOWLIST_PATH, bytes);
    assert_eq!(entry.policy_id, PolicyId::Allowlist);
    assert_eq!(
        entry.comparable().expect("entry comparable"),
        comparable_from_bytes(PolicyId::Allowlist, bytes)
    );

    let doc = ManifestFileEntry::from_bytes(".groundwork/docs/guide.md", b"guide\n");
    assert_eq!(doc.policy_id, PolicyId::Exact);
    assert!(doc.policy_payload.is_none());
    assert_eq!(
        doc.comparable().expect("entry comparable").key,
        normalized_hash(b"guide\n")
    );
}

#[test]
fn template_manifest_rejects_payload_for_exact_policy() {
    let raw = format!(
        r#"{{
  "schema_version": 1,
  "version": "0.6.0",
  "files": [
    {{
      "path": ".groundwork/docs/guide.md",
      "normalized_full_hash": "{}",
      "policy_id": "exact",
      "policy_payload": {{ "marker": "m", "section_hash": "{}" }}
    }}
  ]
}}"#,
        hash_a(),
        hash_a()
    );
    let err = TemplateManifest::from_json_str(&raw).expect_err("must reject payload");
    assert!(format!("{err:#}").contains("must not carry a policy_payload"));
}

#[test]
fn template_manifest_rejects_duplicate_paths() {
    let raw = format!(
        r#"{{
  "schema_version": 1,
  "version": "0.6.0",
  "files": [
    {{ "path": "AGENTS.md", "normalized_full_hash": "{h}", "policy_id": "exact" }},
    {{ "path": "AGENTS.md", "normalized_full_hash": "{h}", "policy_id": "exact" }}
  ]
}}"#,
        h = hash_a()
    );
    let err = TemplateManifest::from_json_str(&raw).expect_err("must reject duplicates");
    assert!(format!("{err:#}").contains("duplicate file entry"));
}

#[test]
fn template_manifest_requires_payload_for_allowlist() {
    let raw = format!(
        r#"{{
  "schema_version": 1,
  "version": "0.6.0",
  "files": [
    {{ "path": ".groundwork/commands.allow", "normalized_full_hash": "{}", "policy_id": "allowlist" }}
  ]
}}"#,
        hash_a()
    );
    let err = TemplateManifest::from_json_str(&raw).expect_err("must require payload");
    assert!(format!("{err:#}").contains("requires a policy_payload"));
}

#[test]
fn migration_manifest_parses_every_kind() {
    let raw = migration_manifest_json(
        r#"
    { "id": "rename-guide", "kind": "rename_file", "rationale": "docs moved", "from": ".groundwork/docs/a.md", "to": ".groundwork/docs/b.md" },
    { "id": "rename-notes", "kind": "rename_dir", "rationale": "notes moved", "from": ".groundwork/notes", "to": ".groundwork/docs/notes" },
    { "id": "rename-launcher", "kind": "rename_generated", "rationale": "launcher renamed", "from": ".groundwork/bin/gw", "to": ".groundwork/bin/gw-status" },
    { "id": "drop-old", "kind": "delete_path", "rationale": "unused", "path": ".groundwork/old", "source_agnostic": true },
    { "id": "config-launchers", "kind": "config_rename_key", "rationale": "key renamed", "from": "launcher_names", "to": "launchers" },
    { "id": "config-gitignore", "kind": "config_set_default", "rationale": "new key", "key": "manage_gitignore", "value": "true" },
    { "id": "skills-dirs", "kind": "migrate_skills_format", "rationale": "skills layout", "path": ".groundwork/skills" }
  "#,
    );
    let manifest = UpgradeMigrationManifest::from_named_json("0.6.0.json", &raw)
        .expect("manifest must parse");
    assert_eq!(manifest.target_version.to_string(), "0.6.0");
    assert_eq!(manifest.operations.len(), 7);
    assert!(manifest.operations[3].source_agnostic);
    assert_eq!(manifest.operations[4].config_path(), CONFIG_PATH);
}

#[test]
fn migration_manifest_rejects_duplicate_operation_ids() {
    let raw = migration_manifest_json(
        r#"
    { "id": "drop", "kind": "delete_path", "rationale": "a", "path": "x" },
    { "id": "drop", "kind": "delete_path", "rationale": "b", "path": "y" }
  "#,
    );
    let err = UpgradeMigrationManifest::from_json_str(&raw).expect_err("must reject");
    assert!(err.to_string().contains("duplicate operation id 'drop'"));
}

#[test]
fn migration_manifest_rejects_missing_kind_fields() {
    let raw = migration_manifest_json(
        r#"{ "id": "rename", "kind": "rename_file", "rationale": "a", "from": "x" }"#,
    );
    let err = UpgradeMigrationManifest::from_json_str(&raw).expect_err("must reject");
    assert!(format!("{err:#}").contains("requires field 'to'"));
}

#[test]
fn migration_manifest_rejects_empty_rationale_and_traversal() {
    let raw = migration_manifest_json(
        r#"{ "id": "drop", "kind": "delete_path", "rationale": "  ", "path": "x" }"#,
    );
    let err = UpgradeMigrationManifest::from_json_str(&raw).expect_err("must reject");
    assert!(format!("{err:#}").contains("rationale"));

    let raw = migration_manifest_json(
        r#"{ "id": "drop", "kind": "delete_path", "rationale": "a", "path": "../outside" }"#,
    );
    let err = UpgradeMigrationManifest::from_json_str(&raw).expect_err("must reject");
    assert!(format!("{err:#}").contains("invalid segment"));
}

#[test]
fn migration_manifest_rejects_moves_into_own_subtree() {
    for (from, to) in [
        (".groundwork/notes", ".groundwork/notes/archive"),
        (".groundwork/notes/archive", ".groundwork/notes"),
    ] {
        let raw = migration_manifest_json(&format!(
            r#"{{ "id": "nest", "kind": "rename_dir", "rationale": "a", "from": "{from}", "to": "{to}" }}"#
        ));
        let err = UpgradeMigrationManifest::from_json_str(&raw).expect_err("must reject");
        assert!(
            format!("{err:#}").contains("one path contains the other"),
            "unexpected error: {err:#}"
        );
    }

    let raw = migration_manifest_json(
        r#"{ "id": "sibling", "kind": "rename_dir", "rationale": "a", "from": ".groundwork/notes", "to": ".groundwork/notes-old" }"#,
    );
    UpgradeMigrationManifest::from_json_str(&raw).expect("sibling prefix must be accepted");
}

#[test]
fn migration_manifest_rejects_invalid_default_literal() {
    let raw = migration_manifest_json(
        r#"{ "id": "default", "kind": "config_set_default", "rationale": "a", "key": "x", "value": "not a literal" }"#,
    );
    let err = UpgradeMigrationManifest::from_json_str(&raw).expect_err("must reject");
    assert!(format!("{err:#}").contains("invalid value"));
}

#[test]
fn migration_manifest_rejects_non_canonical_and_mismatched_versions() {
    let raw = r#"{ "schema_version": 1, "target_version": "0.6", "min_prior_version": "0.5.0", "operations": [] }"#;
    assert!(UpgradeMigrationManifest::from_json_str(raw).is_err());

    let raw = r#"{ "schema_version": 1, "target_version": "0.6.0-beta.1", "min_prior_version": "0.5.0", "operations": [] }"#;
    assert!(UpgradeMigrationManifest::from_json_str(raw).is_err());

    let raw = r#"{ "schema_version": 2, "target_version": "0.6.0", "min_prior_version": "0.5.0", "operations": [] }"#;
    let err = UpgradeMigrationManifest::from_json_str(raw).expect_err("must reject schema");
    assert!(err.to_string().contains("schema_version"));

    let raw = migration_manifest_json("");
    let err = UpgradeMigrationManifest::from_named_json("0.7.0.json", &raw)
        .expect_err("must reject file name mismatch");
    assert!(err.to_string().contains("expected file name 0.6.0.json"));
}

#[test]
fn decode_toml_literal_supports_structured_values() {
    assert_eq!(
        decode_toml_literal("true").expect("bool literal"),
        toml::Value::Boolean(true)
    );
    let array = decode_toml_literal(r#"["gw-status", "gw-plan"]"#).expect("array literal");
    assert_eq!(array.as_array().map(Vec::len), Some(2));
}

#[test]
fn baseline_state_rejects_schema_mismatch() {
    let raw = r#"{
  "schema_version": 9,
  "baseline_version": "0.6.0",
  "provenance": "written_by_init",
  "created_at_unix": 1,
  "updated_at_unix": 1,
  "files": []
}"#;
    let err = ManagedBaselineState::from_json_str(raw).expect_err("must reject schema");
    assert!(err.to_string().contains("unsupported baseline schema_version 9"));
}

#[test]
fn baseline_state_round_trips_through_json() {
    let state = ManagedBaselineState {
        schema_version: BASELINE_SCHEMA_VERSION,
        baseline_version: Version::new(0, 6, 0),
        provenance: BaselineProvenance::WrittenByUpgrade,
        created_at_unix: 10,
        updated_at_unix: 20,
        files: vec![ManifestFileEntry::from_bytes(MEMORY_DOC_PATH, b"# Agents\n")],
    };
    let raw = state.to_json_string().expect("must serialize");
    assert!(raw.contains("\"written_by_upgrade\""));
    let parsed = ManagedBaselineState::from_json_str(&raw).expect("must parse");
    assert_eq!(parsed, state);
}

#[test]
fn layout_paths_match_managed_surface() {
    let layout = RepoLayout::new("/repo");
    assert_eq!(
        layout.baseline_path(),
        PathBuf::from("/repo/.groundwork/state/baseline.json")
    );
    assert_eq!(
        layout.snapshot_path("up-1"),
        PathBuf::from("/repo/.groundwork/state/upgrades/up-1.json")
    );
    assert_eq!(
        layout.relative(&PathBuf::from("/repo/.groundwork/docs/a.md")),
        Some(".groundwork/docs/a.md".to_string())
    );
    assert_eq!(
        legacy_docs_path_for(".groundwork/docs/nested/a.md").as_deref(),
        Some(".groundwork/state/legacy/docs/nested/a.md")
    );
    assert!(legacy_docs_path_for("AGENTS.md").is_none());
    assert!(is_state_path(".groundwork/state/upgrades/up-1.json"));
    assert!(!is_within(".groundwork/docs2/a.md", DOCS_DIR));
}

#[test]
fn validate_rel_path_rejects_escapes() {
    assert!(validate_rel_path(".groundwork/docs/a.md").is_ok());
    for raw in ["", "/etc/passwd", "a/../b", "a//b", "./a", "C:\\x", "a\\b"] {
        assert!(validate_rel_path(raw).is_err(), "must reject '{raw}'");
    }
}

#[test]
fn snapshot_ids_must_be_bare_prefixed_components() {
    assert!(is_valid_snapshot_id("up-1700000000-12"));
    for raw in ["", "up-", "tx-1", "up-../x", "up-A1", "up-1/2", "up-1.json"] {
        assert!(!is_valid_snapshot_id(raw), "must reject '{raw}'");
    }
    let err = validate_snapshot_id("../up-1").expect_err("must reject traversal");
    assert!(matches!(
        err.downcast_ref::<UpgradeError>(),
        Some(UpgradeError::InvalidSnapshotId(_))
    ));
}

#[test]
fn pin_round_trips_and_rejects_garbage() {
    let root = test_repo_root();
    let layout = RepoLayout::new(&root);

    assert!(read_pin(&OsFs, &layout).expect("must read missing pin").is_none());
    write_pin(&OsFs, &layout, &Version::new(0, 6, 1)).expect("must write pin");
    assert_eq!(
        fs::read_to_string(layout.pin_path()).expect("must read pin file"),
        "0.6.1\n"
    );
    assert_eq!(
        read_pin(&OsFs, &layout).expect("must read pin"),
        Some(Version::new(0, 6, 1))
    );

    fs::write(layout.pin_path(), "not-a-version\n").expect("must overwrite pin");
    assert!(read_pin(&OsFs, &layout).is_err());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn list_snapshots_orders_newest_first_and_skips_foreign_files() {
    let root = test_repo_root();
    let layout = RepoLayout::new(&root);

    for (id, created) in [("up-100-a", 100), ("up-300-a", 300), ("up-200-a", 200)] {
        persist_snapshot(&OsFs, &layout, &snapshot_record(id, created))
            .expect("must persist snapshot");
    }
    fs::write(layout.snapshots_dir().join("notes.json"), "{}").expect("must write foreign file");

    let ids: Vec<String> = list_snapshots(&OsFs, &layout)
        .expect("must list snapshots")
        .into_iter()
        .map(|snapshot| snapshot.id)
        .collect();
    assert_eq!(ids, vec!["up-300-a", "up-200-a", "up-100-a"]);

    let loaded = load_snapshot(&OsFs, &layout, "up-200-a")
        .expect("must load snapshot")
        .expect("snapshot must exist");
    assert_eq!(loaded.status, SnapshotStatus::Applied);
    assert!(load_snapshot(&OsFs, &layout, "up-999")
        .expect("must load missing snapshot")
        .is_none());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn snapshot_scan_sets_aside_unreadable_files() {
    let root = test_repo_root();
    let layout = RepoLayout::new(&root);

    persist_snapshot(&OsFs, &layout, &snapshot_record("up-100-a", 100))
        .expect("must persist snapshot");
    persist_snapshot(&OsFs, &layout, &snapshot_record("up-300-a", 300))
        .expect("must persist snapshot");
    fs::write(layout.snapshot_path("up-200-a"), "{ \"id\": ").expect("must write corrupt file");

    let scan = scan_snapshots(&OsFs, &layout).expect("must scan snapshots");
    let ids: Vec<&str> = scan
        .snapshots
        .iter()
        .map(|snapshot| snapshot.id.as_str())
        .collect();
    assert_eq!(ids, vec!["up-300-a", "up-100-a"]);
    assert_eq!(scan.unreadable.len(), 1);
    assert_eq!(scan.unreadable[0].id, "up-200-a");
    assert!(scan.unreadable[0].error.contains("failed parsing upgrade snapshot"));

    assert_eq!(
        list_snapshots(&OsFs, &layout)
            .expect("must list snapshots")
            .len(),
        2
    );

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn baseline_store_reports_corrupt_state() {
    let root = test_repo_root();
    let layout = RepoLayout::new(&root);

    assert!(load_baseline(&OsFs, &layout).expect("must read").is_none());
    fs::create_dir_all(layout.state_dir()).expect("must create state dir");
    fs::write(layout.baseline_path(), "{not json").expect("must write baseline");
    let err = load_baseline(&OsFs, &layout).expect_err("must reject corrupt baseline");
    assert!(err.to_string().contains("failed parsing baseline state"));

    let _ = fs::remove_dir_all(&root);
}

fn snapshot_record(id: &str, created_at_unix: u64) -> UpgradeSnapshot {
    UpgradeSnapshot {
        schema_version: SNAPSHOT_SCHEMA_VERSION,
        id: id.to_string(),
        created_at_unix,
        from_version: Some(Version::new(0, 6, 0)),
        to_version: Version::new(0, 7, 0),
        status: SnapshotStatus::Applied,
        failed_step: None,
        error: None,
        rollback_error: None,
        prior_baseline: None,
        targets: vec![PIN_PATH.to_string()],
        entries: vec![SnapshotEntry {
            path: PIN_PATH.to_string(),
            kind: SnapshotEntryKind::Absent,
            content_base64: None,
            mode: None,
            link_target: None,
        }],
    }
}

fn test_repo_root() -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_nanos())
        .unwrap_or(0);
    let sequence = COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
    let root = std::env::temp_dir().join(format!(
        "groundwork-core-test-{}-{nanos}-{sequence}",
        std::process::id()
    ));
    fs::create_dir_all(&root).expect("must create test root");
    root
}
