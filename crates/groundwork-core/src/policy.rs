use std::collections::BTreeSet;
use std::fmt;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::content::{normalize_content, normalized_hash, normalized_text, sha256_hex};
use crate::layout::{ALLOWLIST_PATH, MEMORY_DOC_PATH};

pub const MANAGED_SECTION_MARKER: &str = "<!-- groundwork:end-managed -->";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyId {
    Exact,
    Allowlist,
    MemorySection,
}

impl PolicyId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Allowlist => "allowlist",
            Self::MemorySection => "memory_section",
        }
    }

    pub fn requires_payload(&self) -> bool {
        !matches!(self, Self::Exact)
    }
}

impl fmt::Display for PolicyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PolicyPayload {
    Allowlist {
        upstream_entries: Vec<String>,
        upstream_set_hash: String,
    },
    MemorySection {
        marker: String,
        section_hash: String,
    },
}

impl PolicyPayload {
    fn matches_policy(&self, policy: PolicyId) -> bool {
        matches!(
            (self, policy),
            (Self::Allowlist { .. }, PolicyId::Allowlist)
                | (Self::MemorySection { .. }, PolicyId::MemorySection)
        )
    }
}

/// Policy-specific fingerprint of one file's content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OwnershipComparable {
    pub policy: PolicyId,
    pub key: String,
}

pub fn policy_for_path(rel_path: &str) -> PolicyId {
    match rel_path {
        ALLOWLIST_PATH => PolicyId::Allowlist,
        MEMORY_DOC_PATH => PolicyId::MemorySection,
        _ => PolicyId::Exact,
    }
}

/// Allowlist entries in file order: trimmed, non-empty, `#` comments dropped.
pub fn allowlist_entries(bytes: &[u8]) -> Vec<String> {
    normalized_text(bytes)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(ToOwned::to_owned)
        .collect()
}

pub fn entry_set_hash(entries: &[String]) -> String {
    let set: BTreeSet<&str> = entries.iter().map(String::as_str).collect();
    let mut joined = String::new();
    for entry in set {
        joined.push_str(entry);
        joined.push('\n');
    }
    sha256_hex(joined.as_bytes())
}

/// Normalized bytes strictly before the managed-section marker line; the whole
/// document when no marker is present.
pub fn memory_managed_section(bytes: &[u8]) -> Vec<u8> {
    let normalized = normalize_content(bytes);
    let mut section = Vec::with_capacity(normalized.len());
    for line in normalized.split_inclusive(|byte| *byte == b'\n') {
        if String::from_utf8_lossy(line).trim() == MANAGED_SECTION_MARKER {
            return section;
        }
        section.extend_from_slice(line);
    }
    section
}

/// Normalized bytes from the marker line to the end; `None` without a marker.
pub fn memory_user_section(bytes: &[u8]) -> Option<Vec<u8>> {
    let normalized = normalize_content(bytes);
    let mut offset = 0;
    for line in normalized.split_inclusive(|byte| *byte == b'\n') {
        if String::from_utf8_lossy(line).trim() == MANAGED_SECTION_MARKER {
            return Some(normalized[offset..].to_vec());
        }
        offset += line.len();
    }
    None
}

pub fn comparable_from_bytes(policy: PolicyId, bytes: &[u8]) -> OwnershipComparable {
    let key = match policy {
        PolicyId::Exact => normalized_hash(bytes),
        PolicyId::Allowlist => entry_set_hash(&allowlist_entries(bytes)),
        PolicyId::MemorySection => sha256_hex(&memory_managed_section(bytes)),
    };
    OwnershipComparable { policy, key }
}

pub fn payload_for(policy: PolicyId, bytes: &[u8]) -> Option<PolicyPayload> {
    match policy {
        PolicyId::Exact => None,
        PolicyId::Allowlist => {
            let upstream_entries = allowlist_entries(bytes);
            let upstream_set_hash = entry_set_hash(&upstream_entries);
            Some(PolicyPayload::Allowlist {
                upstream_entries,
                upstream_set_hash,
            })
        }
        PolicyId::MemorySection => Some(PolicyPayload::MemorySection {
            marker: MANAGED_SECTION_MARKER.to_string(),
            section_hash: sha256_hex(&memory_managed_section(bytes)),
        }),
    }
}

/// Comparable recorded by a manifest or baseline entry.
pub fn comparable_from_recorded(
    policy: PolicyId,
    full_hash: &str,
    payload: Option<&PolicyPayload>,
) -> Result<OwnershipComparable> {
    validate_payload(policy, payload)?;
    let key = match payload {
        _ if policy == PolicyId::Exact => full_hash.to_string(),
        Some(PolicyPayload::Allowlist {
            upstream_set_hash, ..
        }) => upstream_set_hash.clone(),
        Some(PolicyPayload::MemorySection { section_hash, .. }) => section_hash.clone(),
        None => return Err(anyhow!("policy '{policy}' requires a policy_payload")),
    };
    Ok(OwnershipComparable { policy, key })
}

pub fn validate_payload(policy: PolicyId, payload: Option<&PolicyPayload>) -> Result<()> {
    match payload {
        None if policy.requires_payload() => {
            Err(anyhow!("policy '{policy}' requires a policy_payload"))
        }
        Some(_) if !policy.requires_payload() => {
            Err(anyhow!("policy '{policy}' must not carry a policy_payload"))
        }
        Some(payload) if !payload.matches_policy(policy) => Err(anyhow!(
            "policy_payload shape does not match policy '{policy}'"
        )),
        _ => Ok(()),
    }
}
