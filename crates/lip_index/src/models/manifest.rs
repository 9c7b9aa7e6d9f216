// SPDX-License-Identifier: Apache-2.0

use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Schema version every document written by this tool carries.
pub(crate) const FORMAT_VERSION: u64 = 3;
/// Fixed identifier of the tooth.json schema family. Doubles as the code-search
/// marker during discovery, since every conforming manifest embeds it.
pub(crate) const FORMAT_UUID: &str = "289f771f-2c9a-4d73-9f3f-8492495a924d";

/// Variant labels are lowercase slugs, optionally two segments separated by a
/// slash (platform/architecture). The empty string is the default variant.
static VARIANT_LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9_-]+(/[a-z0-9_-]+)?$").unwrap());

/// Info tags are lowercase slugs, optionally namespaced with a single colon.
static INFO_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9-]+(:[a-z0-9-]+)?$").unwrap());

/// Descriptive metadata carried from the head manifest into the index entry.
/// Never checked against versioned manifests.
#[derive(Deserialize, Serialize, Debug, Default, Clone, PartialEq)]
pub(crate) struct PackageManifestInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub avatar_url: String,
}

/// One build variant of a package: a label plus the dependency constraints
/// declared for that variant.
#[derive(Deserialize, Serialize, Debug, Default, Clone, PartialEq)]
pub(crate) struct PackageManifestVariant {
    #[serde(default)]
    pub label: String,
    /// Dependency package identifier -> version-constraint string.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,
}

/// The schema-versioned document fetched per (repository, ref) pair.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub(crate) struct PackageManifest {
    pub format_version: u64,
    pub format_uuid: String,
    /// Package identifier (the tooth path).
    pub tooth: String,
    /// Version declared by the manifest itself.
    pub version: String,
    #[serde(default)]
    pub info: PackageManifestInfo,
    #[serde(default)]
    pub variants: Vec<PackageManifestVariant>,
}

impl PackageManifest {
    /// Parses raw bytes as a current-schema manifest. Any deviation from the
    /// current format identity or the slug constraints is a parse failure; the
    /// caller decides whether to attempt migration.
    pub(crate) fn parse_current(raw: &[u8]) -> Result<Self> {
        let manifest: PackageManifest =
            serde_json::from_slice(raw).context("Failed to parse manifest JSON")?;

        if manifest.format_version != FORMAT_VERSION {
            bail!(
                "Unsupported format_version {} (expected {})",
                manifest.format_version,
                FORMAT_VERSION
            );
        }
        if manifest.format_uuid != FORMAT_UUID {
            bail!(
                "Unsupported format_uuid '{}' (expected '{}')",
                manifest.format_uuid,
                FORMAT_UUID
            );
        }

        let mut seen_labels = HashSet::new();
        for variant in &manifest.variants {
            if !variant.label.is_empty() && !VARIANT_LABEL_RE.is_match(&variant.label) {
                bail!("Invalid variant label '{}'", variant.label);
            }
            if !seen_labels.insert(variant.label.as_str()) {
                bail!("Duplicate variant label '{}'", variant.label);
            }
        }

        for tag in &manifest.info.tags {
            if !INFO_TAG_RE.is_match(tag) {
                bail!("Invalid info tag '{}'", tag);
            }
        }

        Ok(manifest)
    }
}
