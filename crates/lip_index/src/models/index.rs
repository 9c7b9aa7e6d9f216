// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::manifest::{PackageManifestInfo, FORMAT_UUID, FORMAT_VERSION};

/// One package's aggregate in the index: descriptive info from the head
/// manifest, popularity/recency signals, and the per-variant version lists.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub(crate) struct PackageIndexEntry {
    pub info: PackageManifestInfo,
    pub stars: u64,
    pub updated_at: DateTime<Utc>,
    /// Variant label -> ascending list of version strings.
    pub versions: BTreeMap<String, Vec<String>>,
}

/// The top-level index document. BTreeMap keys give deterministic
/// serialization, so unchanged upstream data yields byte-identical output.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub(crate) struct PackageIndex {
    pub format_version: u64,
    pub format_uuid: String,
    /// "github.com/<owner>/<name>" -> entry.
    pub packages: BTreeMap<String, PackageIndexEntry>,
}

impl PackageIndex {
    pub(crate) fn new(packages: BTreeMap<String, PackageIndexEntry>) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            format_uuid: FORMAT_UUID.to_string(),
            packages,
        }
    }
}

/// A version together with the dependency constraints of one of its variants.
/// Only used by the dependency-annotated index flavor.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub(crate) struct VersionWithDependencies {
    pub version: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,
}

/// Entry of the dependency-annotated flavor: same info/signals, but each
/// version carries the dependency map its manifest declared for that variant.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub(crate) struct PackageDepsIndexEntry {
    pub info: PackageManifestInfo,
    pub stars: u64,
    pub updated_at: DateTime<Utc>,
    pub versions: BTreeMap<String, Vec<VersionWithDependencies>>,
}

/// Dependency-annotated index document, derived from the same per-repository
/// data as the primary index (same inclusion/exclusion decisions).
#[derive(Deserialize, Serialize, Debug, Clone)]
pub(crate) struct PackageDepsIndex {
    pub format_version: u64,
    pub format_uuid: String,
    pub packages: BTreeMap<String, PackageDepsIndexEntry>,
}

impl PackageDepsIndex {
    pub(crate) fn new(packages: BTreeMap<String, PackageDepsIndexEntry>) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            format_uuid: FORMAT_UUID.to_string(),
            packages,
        }
    }
}
