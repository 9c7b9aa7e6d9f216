// SPDX-License-Identifier: Apache-2.0

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use semver::Version;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::info;

use crate::models::manifest::PackageManifest;
use crate::pipeline::PackageRecord;

/// Serializes `value` with stable field and key ordering, so unchanged input
/// yields byte-identical files across runs.
fn render<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(value).context("Failed to serialize document")?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Writes `value` at `path` through a temporary file in the same directory,
/// renamed into place so a reader never observes a partial document.
pub(crate) fn write_document<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("Target path '{}' has no parent directory", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create '{}'", parent.display()))?;

    let bytes = render(value)?;
    let tmp = NamedTempFile::new_in(parent)
        .with_context(|| format!("Failed to create temporary file in '{}'", parent.display()))?;
    fs::write(tmp.path(), &bytes)
        .with_context(|| format!("Failed to write '{}'", tmp.path().display()))?;
    tmp.persist(path)
        .with_context(|| format!("Failed to replace '{}'", path.display()))?;

    info!(path = %path.display(), "Wrote document");
    Ok(())
}

/// Persists the validated (possibly migrated) manifest of one version under
/// `<root>/<owner>/<name>/<version>/tooth.json` for downstream inspection.
pub(crate) fn write_manifest_cache(
    root: &Path,
    repo: &str,
    version: &Version,
    manifest: &PackageManifest,
) -> Result<()> {
    let path = root.join(repo).join(version.to_string()).join("tooth.json");
    write_document(manifest, &path)
        .with_context(|| format!("Failed to cache manifest for '{repo}@{version}'"))
}

/// Writes the manifest cache for every surviving version of every record.
pub(crate) fn write_manifest_caches(root: &Path, records: &[PackageRecord]) -> Result<()> {
    for record in records {
        for (version, manifest) in &record.manifests {
            write_manifest_cache(root, &record.repo, version, manifest)?;
        }
    }
    Ok(())
}
