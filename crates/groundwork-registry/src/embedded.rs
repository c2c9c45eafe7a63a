use std::sync::{Arc, Mutex, OnceLock};

use anyhow::{anyhow, Result};

use crate::migrations::MigrationManifestStore;
use crate::template_manifests::TemplateManifestStore;

pub const CURRENT_VERSION: &str = env!("CARGO_PKG_VERSION");

pub(crate) const EMBEDDED_TEMPLATE_FILES: &[(&str, &str)] = &[
    ("AGENTS.md", include_str!("../templates/AGENTS.md")),
    (
        ".groundwork/commands.allow",
        include_str!("../templates/commands.allow"),
    ),
    (
        ".groundwork/docs/README.md",
        include_str!("../templates/docs/README.md"),
    ),
    (
        ".groundwork/docs/upgrading.md",
        include_str!("../templates/docs/upgrading.md"),
    ),
    (
        ".groundwork/docs/workflow.md",
        include_str!("../templates/docs/workflow.md"),
    ),
    (
        ".groundwork/skills/release/SKILL.md",
        include_str!("../templates/skills/release/SKILL.md"),
    ),
    (
        ".groundwork/skills/review/SKILL.md",
        include_str!("../templates/skills/review/SKILL.md"),
    ),
];

pub(crate) const EMBEDDED_MIGRATION_MANIFESTS: &[(&str, &str)] = &[
    (
        "0.6.0.json",
        include_str!("../corpus/migrations/0.6.0.json"),
    ),
    (
        "0.6.1.json",
        include_str!("../corpus/migrations/0.6.1.json"),
    ),
    (
        "0.7.0.json",
        include_str!("../corpus/migrations/0.7.0.json"),
    ),
];

pub(crate) const EMBEDDED_TEMPLATE_MANIFESTS: &[(&str, &str)] = &[
    (
        "0.5.0.json",
        include_str!("../corpus/template-manifests/0.5.0.json"),
    ),
    (
        "0.6.0.json",
        include_str!("../corpus/template-manifests/0.6.0.json"),
    ),
    (
        "0.6.1.json",
        include_str!("../corpus/template-manifests/0.6.1.json"),
    ),
    (
        "0.7.0.json",
        include_str!("../corpus/template-manifests/0.7.0.json"),
    ),
];

#[derive(Debug, Clone)]
pub(crate) struct EmbeddedCorpus {
    pub(crate) migrations: MigrationManifestStore,
    pub(crate) templates: TemplateManifestStore,
}

fn corpus_slot() -> &'static Mutex<Option<Arc<EmbeddedCorpus>>> {
    static SLOT: OnceLock<Mutex<Option<Arc<EmbeddedCorpus>>>> = OnceLock::new();
    SLOT.get_or_init(|| Mutex::new(None))
}

/// Parses the embedded corpus on first use and memoizes it for the process.
/// A failed parse is not cached, so every caller sees the validation error.
pub(crate) fn embedded_corpus() -> Result<Arc<EmbeddedCorpus>> {
    let mut slot = corpus_slot()
        .lock()
        .map_err(|_| anyhow!("embedded corpus cache lock poisoned"))?;
    if let Some(corpus) = slot.as_ref() {
        return Ok(Arc::clone(corpus));
    }

    let corpus = Arc::new(EmbeddedCorpus {
        migrations: MigrationManifestStore::from_sources(EMBEDDED_MIGRATION_MANIFESTS)?,
        templates: TemplateManifestStore::from_sources(EMBEDDED_TEMPLATE_MANIFESTS)?,
    });
    tracing::debug!(
        migrations = EMBEDDED_MIGRATION_MANIFESTS.len(),
        template_manifests = EMBEDDED_TEMPLATE_MANIFESTS.len(),
        "loaded embedded corpus"
    );
    *slot = Some(Arc::clone(&corpus));
    Ok(corpus)
}

/// Drops the memoized corpus; the next access re-parses it.
pub fn reset_corpus_cache() {
    if let Ok(mut slot) = corpus_slot().lock() {
        *slot = None;
    }
}

pub fn corpus_cache_loaded() -> bool {
    corpus_slot()
        .lock()
        .map(|slot| slot.is_some())
        .unwrap_or(false)
}
