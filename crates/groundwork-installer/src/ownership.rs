use std::collections::BTreeSet;
use std::fmt;

use anyhow::{Context, Result};
use groundwork_core::{
    allowlist_entries, comparable_from_bytes, content_equal, join_rel, legacy_docs_path_for,
    load_baseline, policy_for_path, read_pin, walk_rel_files, ManagedBaselineState,
    ManifestFileEntry, OwnershipComparable, PolicyId, PolicyPayload, RepoFs, RepoLayout,
    DOCS_DIR, LEGACY_DOCS_DIR,
};
use groundwork_registry::{list_files, TemplateManifestStore, TemplateSource};
use semver::Version;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnershipLabel {
    UpstreamTemplateDelta,
    LocalCustomization,
    MixedUpstreamAndLocal,
    UnknownNoBaseline,
}

impl OwnershipLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UpstreamTemplateDelta => "upstream_template_delta",
            Self::LocalCustomization => "local_customization",
            Self::MixedUpstreamAndLocal => "mixed_upstream_and_local",
            Self::UnknownNoBaseline => "unknown_no_baseline",
        }
    }
}

impl fmt::Display for OwnershipLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaselineSource {
    ManagedBaseline,
    PinnedManifest,
    LegacySnapshot,
}

impl BaselineSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ManagedBaseline => "managed_baseline",
            Self::PinnedManifest => "pinned_manifest",
            Self::LegacySnapshot => "legacy_snapshot",
        }
    }
}

// Declared alphabetically so the derived order sorts by code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReasonCode {
    AllowlistReorderedOnly,
    BaselineMissing,
    BaselinePolicyMismatch,
    EquivalentUnderPolicy,
    LegacySnapshotMissing,
    LocalChanged,
    LocalMissing,
    MatchesOtherRelease,
    MatchesPinnedManifest,
    MemoryUserSectionChanged,
    PinnedManifestMismatch,
    PinnedManifestMissing,
    PolicyMismatch,
    TemplateMissing,
    UpstreamChanged,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AllowlistReorderedOnly => "allowlist_reordered_only",
            Self::BaselineMissing => "baseline_missing",
            Self::BaselinePolicyMismatch => "baseline_policy_mismatch",
            Self::EquivalentUnderPolicy => "equivalent_under_policy",
            Self::LegacySnapshotMissing => "legacy_snapshot_missing",
            Self::LocalChanged => "local_changed",
            Self::LocalMissing => "local_missing",
            Self::MatchesOtherRelease => "matches_other_release",
            Self::MatchesPinnedManifest => "matches_pinned_manifest",
            Self::MemoryUserSectionChanged => "memory_user_section_changed",
            Self::PinnedManifestMismatch => "pinned_manifest_mismatch",
            Self::PinnedManifestMissing => "pinned_manifest_missing",
            Self::PolicyMismatch => "policy_mismatch",
            Self::TemplateMissing => "template_missing",
            Self::UpstreamChanged => "upstream_changed",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnershipClassification {
    pub path: String,
    pub label: OwnershipLabel,
    pub confidence: Option<Confidence>,
    pub baseline_source: Option<BaselineSource>,
    pub reasons: Vec<ReasonCode>,
}

impl OwnershipClassification {
    fn new(
        path: &str,
        label: OwnershipLabel,
        evidence: Option<&Evidence>,
        reasons: BTreeSet<ReasonCode>,
    ) -> Self {
        Self {
            path: path.to_string(),
            label,
            confidence: evidence.map(|evidence| evidence.confidence),
            baseline_source: evidence.map(|evidence| evidence.source),
            reasons: reasons.into_iter().collect(),
        }
    }

    pub fn has_reason(&self, reason: ReasonCode) -> bool {
        self.reasons.contains(&reason)
    }

    /// The only difference sits below the memory document's managed marker,
    /// which belongs to the user and never blocks a baseline rewrite.
    pub fn is_user_section_only(&self) -> bool {
        self.has_reason(ReasonCode::MemoryUserSectionChanged)
    }
}

struct Evidence {
    comparable: Option<OwnershipComparable>,
    /// Allowlist entries in the baseline's own order, when it records one.
    order: Option<Vec<String>>,
    source: BaselineSource,
    confidence: Confidence,
}

/// Explains why managed paths differ from the current templates. Never
/// mutates anything.
pub struct OwnershipService<'a> {
    fs: &'a dyn RepoFs,
    layout: &'a RepoLayout,
    templates: &'a dyn TemplateSource,
    manifests: &'a TemplateManifestStore,
    baseline: Option<ManagedBaselineState>,
    pinned: Option<Version>,
}

impl<'a> OwnershipService<'a> {
    pub fn load(
        fs: &'a dyn RepoFs,
        layout: &'a RepoLayout,
        templates: &'a dyn TemplateSource,
        manifests: &'a TemplateManifestStore,
    ) -> Result<Self> {
        let baseline = load_baseline(fs, layout)?;
        let pinned = read_pin(fs, layout)?;
        Ok(Self::with_state(
            fs, layout, templates, manifests, baseline, pinned,
        ))
    }

    pub fn with_state(
        fs: &'a dyn RepoFs,
        layout: &'a RepoLayout,
        templates: &'a dyn TemplateSource,
        manifests: &'a TemplateManifestStore,
        baseline: Option<ManagedBaselineState>,
        pinned: Option<Version>,
    ) -> Self {
        Self {
            fs,
            layout,
            templates,
            manifests,
            baseline,
            pinned,
        }
    }

    pub fn baseline(&self) -> Option<&ManagedBaselineState> {
        self.baseline.as_ref()
    }

    pub fn pinned(&self) -> Option<&Version> {
        self.pinned.as_ref()
    }

    pub fn classify(
        &self,
        path: &str,
        template_logical_name: &str,
    ) -> Result<OwnershipClassification> {
        let policy = policy_for_path(path);
        let local = self.read_local(path)?;
        let template = self.read_template(template_logical_name)?;
        let classification = match (local.as_deref(), template.as_deref()) {
            (Some(local), Some(template)) => self.classify_paired(path, policy, local, template)?,
            (local, template) => self.classify_orphan(path, policy, local, template.is_some())?,
        };
        tracing::debug!(
            path,
            label = classification.label.as_str(),
            reasons = classification.reasons.len(),
            "classified managed path"
        );
        Ok(classification)
    }

    /// Classifications for every managed path whose local content differs
    /// from its template, in path order.
    pub fn classify_all(&self) -> Result<Vec<OwnershipClassification>> {
        let mut classifications = Vec::new();
        for path in self.managed_paths()? {
            if self.differs(&path)? {
                classifications.push(self.classify(&path, &path)?);
            }
        }
        Ok(classifications)
    }

    /// Differences that keep the baseline from being rewritten.
    pub fn blocking_diffs(&self) -> Result<Vec<OwnershipClassification>> {
        Ok(self
            .classify_all()?
            .into_iter()
            .filter(|classification| !classification.is_user_section_only())
            .collect())
    }

    /// Template files, baseline entries and legacy documentation copies.
    pub fn managed_paths(&self) -> Result<BTreeSet<String>> {
        let mut paths: BTreeSet<String> = list_files(self.templates)?.into_iter().collect();
        if let Some(baseline) = &self.baseline {
            paths.extend(baseline.files.iter().map(|entry| entry.path.clone()));
        }
        for legacy in walk_rel_files(self.fs, self.layout, LEGACY_DOCS_DIR)
            .context("failed to scan legacy documentation snapshot")?
        {
            if let Some(rest) = legacy.strip_prefix(LEGACY_DOCS_DIR) {
                paths.insert(join_rel(DOCS_DIR, rest.trim_start_matches('/')));
            }
        }
        Ok(paths)
    }

    pub fn differs(&self, path: &str) -> Result<bool> {
        let local = self.read_local(path)?;
        let template = self.read_template(path)?;
        Ok(match (local, template) {
            (Some(local), Some(template)) => !content_equal(&local, &template),
            (None, None) => false,
            _ => true,
        })
    }

    fn classify_paired(
        &self,
        path: &str,
        policy: PolicyId,
        local: &[u8],
        template: &[u8],
    ) -> Result<OwnershipClassification> {
        let mut reasons = BTreeSet::new();
        let local_key = comparable_from_bytes(policy, local);
        let template_key = comparable_from_bytes(policy, template);

        let Some(evidence) = self.resolve_baseline(path, policy, &local_key, &mut reasons)? else {
            reasons.insert(ReasonCode::BaselineMissing);
            return Ok(OwnershipClassification::new(
                path,
                OwnershipLabel::UnknownNoBaseline,
                None,
                reasons,
            ));
        };
        let Some(baseline_key) = evidence.comparable.as_ref() else {
            reasons.insert(ReasonCode::BaselineMissing);
            return Ok(OwnershipClassification::new(
                path,
                OwnershipLabel::UnknownNoBaseline,
                Some(&evidence),
                reasons,
            ));
        };

        if baseline_key.policy != local_key.policy || baseline_key.policy != template_key.policy {
            reasons.insert(ReasonCode::BaselinePolicyMismatch);
            return Ok(OwnershipClassification::new(
                path,
                OwnershipLabel::UnknownNoBaseline,
                Some(&evidence),
                reasons,
            ));
        }

        let upstream_changed = *baseline_key != template_key;
        let local_changed = *baseline_key != local_key;
        if upstream_changed {
            reasons.insert(ReasonCode::UpstreamChanged);
        }
        if local_changed {
            reasons.insert(ReasonCode::LocalChanged);
        }
        let label = match (upstream_changed, local_changed) {
            (true, true) => OwnershipLabel::MixedUpstreamAndLocal,
            (true, false) => OwnershipLabel::UpstreamTemplateDelta,
            (false, true) => OwnershipLabel::LocalCustomization,
            (false, false) => {
                reasons.insert(equivalence_reason(policy, local, evidence.order.as_deref()));
                OwnershipLabel::LocalCustomization
            }
        };
        Ok(OwnershipClassification::new(
            path,
            label,
            Some(&evidence),
            reasons,
        ))
    }

    fn classify_orphan(
        &self,
        path: &str,
        policy: PolicyId,
        local: Option<&[u8]>,
        template_present: bool,
    ) -> Result<OwnershipClassification> {
        let mut reasons = BTreeSet::new();
        if local.is_none() {
            reasons.insert(ReasonCode::LocalMissing);
        }
        if !template_present {
            reasons.insert(ReasonCode::TemplateMissing);
        }
        if local.is_none() && !template_present {
            reasons.insert(ReasonCode::BaselineMissing);
            return Ok(OwnershipClassification::new(
                path,
                OwnershipLabel::UnknownNoBaseline,
                None,
                reasons,
            ));
        }

        let Some(evidence) = self.orphan_baseline(path, policy, &mut reasons)? else {
            reasons.insert(ReasonCode::BaselineMissing);
            return Ok(OwnershipClassification::new(
                path,
                OwnershipLabel::LocalCustomization,
                None,
                reasons,
            ));
        };

        if let Some(baseline_key) = &evidence.comparable {
            if baseline_key.policy != policy {
                reasons.insert(ReasonCode::BaselinePolicyMismatch);
                return Ok(OwnershipClassification::new(
                    path,
                    OwnershipLabel::UnknownNoBaseline,
                    Some(&evidence),
                    reasons,
                ));
            }
        }

        let local_key = local.map(|bytes| comparable_from_bytes(policy, bytes));
        let label = if evidence.comparable == local_key {
            reasons.insert(ReasonCode::UpstreamChanged);
            OwnershipLabel::UpstreamTemplateDelta
        } else {
            reasons.insert(ReasonCode::LocalChanged);
            OwnershipLabel::LocalCustomization
        };
        Ok(OwnershipClassification::new(
            path,
            label,
            Some(&evidence),
            reasons,
        ))
    }

    fn resolve_baseline(
        &self,
        path: &str,
        policy: PolicyId,
        local_key: &OwnershipComparable,
        reasons: &mut BTreeSet<ReasonCode>,
    ) -> Result<Option<Evidence>> {
        if let Some(entry) = self.baseline.as_ref().and_then(|state| state.entry(path)) {
            return Ok(Some(Evidence {
                comparable: Some(entry.comparable()?),
                order: recorded_order(entry),
                source: BaselineSource::ManagedBaseline,
                confidence: Confidence::High,
            }));
        }

        let pinned_entry = self
            .pinned
            .as_ref()
            .and_then(|version| self.manifests.entry_for(version, path));
        match pinned_entry {
            Some(entry) => {
                let pinned_key = entry.comparable()?;
                if pinned_key == *local_key {
                    reasons.insert(ReasonCode::MatchesPinnedManifest);
                    return Ok(Some(Evidence {
                        comparable: Some(pinned_key),
                        order: recorded_order(entry),
                        source: BaselineSource::PinnedManifest,
                        confidence: Confidence::Medium,
                    }));
                }
                reasons.insert(ReasonCode::PinnedManifestMismatch);
                if pinned_key.policy != local_key.policy {
                    reasons.insert(ReasonCode::PolicyMismatch);
                }
            }
            None => {
                reasons.insert(ReasonCode::PinnedManifestMissing);
            }
        }
        if self.matches_other_release(path, local_key)? {
            reasons.insert(ReasonCode::MatchesOtherRelease);
        }

        self.legacy_evidence(path, policy, reasons)
    }

    /// Baseline copy for a path present on only one side. A path missing from
    /// an existing canonical baseline was recorded as absent.
    fn orphan_baseline(
        &self,
        path: &str,
        policy: PolicyId,
        reasons: &mut BTreeSet<ReasonCode>,
    ) -> Result<Option<Evidence>> {
        if let Some(state) = &self.baseline {
            let comparable = match state.entry(path) {
                Some(entry) => Some(entry.comparable()?),
                None => None,
            };
            return Ok(Some(Evidence {
                comparable,
                order: None,
                source: BaselineSource::ManagedBaseline,
                confidence: Confidence::High,
            }));
        }
        self.legacy_evidence(path, policy, reasons)
    }

    fn legacy_evidence(
        &self,
        path: &str,
        policy: PolicyId,
        reasons: &mut BTreeSet<ReasonCode>,
    ) -> Result<Option<Evidence>> {
        let Some(legacy_path) = legacy_docs_path_for(path) else {
            return Ok(None);
        };
        match self.read_local(&legacy_path)? {
            Some(raw) => Ok(Some(Evidence {
                comparable: Some(comparable_from_bytes(policy, &raw)),
                order: (policy == PolicyId::Allowlist).then(|| allowlist_entries(&raw)),
                source: BaselineSource::LegacySnapshot,
                confidence: Confidence::Low,
            })),
            None => {
                reasons.insert(ReasonCode::LegacySnapshotMissing);
                Ok(None)
            }
        }
    }

    fn matches_other_release(&self, path: &str, local_key: &OwnershipComparable) -> Result<bool> {
        for manifest in self.manifests.manifests() {
            if Some(&manifest.version) == self.pinned.as_ref() {
                continue;
            }
            if let Some(entry) = manifest.entry(path) {
                if entry.comparable()? == *local_key {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn read_local(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let absolute = self.layout.resolve(path);
        self.fs
            .read_optional(&absolute)
            .with_context(|| format!("failed to read {}", absolute.display()))
    }

    fn read_template(&self, logical_name: &str) -> Result<Option<Vec<u8>>> {
        if !self.templates.contains(logical_name) {
            return Ok(None);
        }
        self.templates.read(logical_name).map(Some)
    }
}

fn recorded_order(entry: &ManifestFileEntry) -> Option<Vec<String>> {
    match &entry.policy_payload {
        Some(PolicyPayload::Allowlist {
            upstream_entries, ..
        }) => Some(upstream_entries.clone()),
        _ => None,
    }
}

/// Reason for a local copy equal to its baseline under `policy`. An allowlist
/// counts as reordered only when it holds the baseline's entries, each as
/// often, in another order.
fn equivalence_reason(
    policy: PolicyId,
    local: &[u8],
    baseline_order: Option<&[String]>,
) -> ReasonCode {
    match policy {
        PolicyId::Allowlist => {
            let Some(baseline) = baseline_order else {
                return ReasonCode::EquivalentUnderPolicy;
            };
            let local = allowlist_entries(local);
            if local.as_slice() == baseline {
                return ReasonCode::EquivalentUnderPolicy;
            }
            let mut sorted_local = local;
            let mut sorted_baseline = baseline.to_vec();
            sorted_local.sort();
            sorted_baseline.sort();
            if sorted_local == sorted_baseline {
                ReasonCode::AllowlistReorderedOnly
            } else {
                ReasonCode::EquivalentUnderPolicy
            }
        }
        PolicyId::MemorySection => ReasonCode::MemoryUserSectionChanged,
        _ => ReasonCode::EquivalentUnderPolicy,
    }
}
