use std::cmp::Ordering;

use anyhow::{anyhow, Context, Result};
use semver::Version;

/// Parses a scaffold version: plain numeric `X.Y.Z`, optionally prefixed with `v`.
/// Pre-release and build metadata are rejected rather than ignored.
pub fn parse_version(raw: &str) -> Result<Version> {
    let trimmed = raw.trim();
    let candidate = trimmed.strip_prefix('v').unwrap_or(trimmed);
    if candidate.is_empty() {
        return Err(anyhow!("invalid version: value must not be empty"));
    }

    let version =
        Version::parse(candidate).with_context(|| format!("invalid version: '{trimmed}'"))?;
    if !version.pre.is_empty() || !version.build.is_empty() {
        return Err(anyhow!(
            "invalid version: '{trimmed}' (pre-release and build metadata are not supported)"
        ));
    }
    Ok(version)
}

/// Like [`parse_version`] but additionally requires the canonical `X.Y.Z` spelling.
pub fn parse_canonical_version(raw: &str) -> Result<Version> {
    let version = parse_version(raw)?;
    if version.to_string() != raw {
        return Err(anyhow!(
            "version '{raw}' is not in canonical form (expected '{version}')"
        ));
    }
    Ok(version)
}

pub fn compare_semver(left: &str, right: &str) -> Result<Ordering> {
    let left = parse_version(left)?;
    let right = parse_version(right)?;
    Ok(left.cmp(&right))
}
