mod embedded;
mod migrations;
mod template_manifests;
mod templates;

pub use embedded::{corpus_cache_loaded, reset_corpus_cache, CURRENT_VERSION};
pub use migrations::MigrationManifestStore;
pub use template_manifests::TemplateManifestStore;
pub use templates::{
    build_template_manifest, list_files, template_dirs, EmbeddedTemplates, MemoryTemplates,
    TemplateSource,
};
