mod baseline;
mod config_table;
mod content;
mod error;
mod fs;
mod layout;
mod manifest;
mod migration;
mod policy;
mod snapshot;
mod state;
mod version;

pub use baseline::{BaselineProvenance, ManagedBaselineState, BASELINE_SCHEMA_VERSION};
pub use config_table::{
    insert_config_key, load_config_table, lookup_config_key, remove_config_key,
};
pub use content::{content_equal, normalize_content, normalized_hash, normalized_text, sha256_hex};
pub use error::{RollbackOutcome, UpgradeError};
pub use fs::{walk_rel_files, EntryKind, EntryMetadata, OsFs, RepoFs};
pub use layout::{
    is_docs_path, is_state_path, is_within, join_rel, legacy_docs_path_for, rel_depth,
    rel_parent, validate_rel_path, RepoLayout, ALLOWLIST_PATH, BASELINE_PATH, CONFIG_PATH,
    DOCS_DIR, GITIGNORE_PATH, LAUNCHERS_DIR, LEGACY_DOCS_DIR, MANAGED_DIR, MEMORY_DOC_PATH,
    PIN_PATH, SKILLS_DIR, SNAPSHOTS_DIR, STATE_DIR,
};
pub use manifest::{
    validate_file_entries, validate_release_version, ManifestFileEntry, TemplateManifest,
    TEMPLATE_MANIFEST_SCHEMA_VERSION,
};
pub use migration::{
    decode_toml_literal, validate_config_key, MigrationOperation, OperationKind,
    UpgradeMigrationManifest, MIGRATION_MANIFEST_SCHEMA_VERSION,
};
pub use policy::{
    allowlist_entries, comparable_from_bytes, comparable_from_recorded, entry_set_hash,
    memory_managed_section, memory_user_section, payload_for, policy_for_path,
    OwnershipComparable, PolicyId, PolicyPayload, MANAGED_SECTION_MARKER,
};
pub use snapshot::{
    is_valid_snapshot_id, validate_snapshot_id, SnapshotEntry, SnapshotEntryKind, SnapshotStatus,
    UpgradeSnapshot, SNAPSHOT_ID_PREFIX, SNAPSHOT_SCHEMA_VERSION,
};
pub use state::{
    list_snapshots, load_baseline, load_snapshot, persist_snapshot, read_pin, scan_snapshots,
    write_baseline, write_pin, SnapshotScan, UnreadableSnapshot,
};
pub use version::{compare_semver, parse_canonical_version, parse_version};

pub use semver::Version;

#[cfg(test)]
mod tests;
