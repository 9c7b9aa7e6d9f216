// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use semver::Version;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{error, info, warn};

use crate::github::GitHubClient;
use crate::manifest::{self, MigrationRunner};
use crate::models::index::{
    PackageDepsIndex, PackageDepsIndexEntry, PackageIndex, PackageIndexEntry,
    VersionWithDependencies,
};
use crate::models::manifest::{PackageManifest, PackageManifestInfo};
use crate::retry::{with_backoff, BackoffPolicy};
use crate::versions::{resolve_versions, TagLister};

/// Everything the pipeline learned about one repository that survived
/// processing. Feeds both index flavors and the manifest cache writer.
#[derive(Debug, Clone)]
pub(crate) struct PackageRecord {
    pub repo: String,
    pub info: PackageManifestInfo,
    pub stars: u64,
    pub updated_at: DateTime<Utc>,
    /// Variant label -> ascending versions with that variant's dependencies.
    pub variants: BTreeMap<String, Vec<VersionWithDependencies>>,
    /// The validated (possibly migrated) manifest of every surviving version.
    pub manifests: Vec<(Version, PackageManifest)>,
}

/// Discovery, fan-out over repositories, and fan-in into the index map, all
/// under one global concurrency bound shared by every network and external
/// process operation.
pub(crate) struct Pipeline {
    github: GitHubClient,
    tags: Arc<dyn TagLister>,
    migrator: Arc<dyn MigrationRunner>,
    semaphore: Arc<Semaphore>,
    backoff: BackoffPolicy,
}

impl Pipeline {
    pub(crate) fn new(
        github: GitHubClient,
        tags: Arc<dyn TagLister>,
        migrator: Arc<dyn MigrationRunner>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            github,
            tags,
            migrator,
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            backoff: BackoffPolicy::default(),
        }
    }

    async fn permit(&self) -> Result<OwnedSemaphorePermit> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .context("Concurrency limiter closed")
    }

    /// Runs the whole pipeline: discovery is fatal on failure, everything
    /// after it is per-repository and absorbed.
    pub(crate) async fn run(&self, marker: &str) -> Result<Vec<PackageRecord>> {
        // Discovery runs on a single call path, so it never exceeds the
        // global bound on its own; rate-limit waits happen inside.
        let repositories = self
            .github
            .discover_repositories(marker)
            .await
            .context("Repository discovery failed")?;
        info!(count = repositories.len(), "Discovered repositories");

        let records: Vec<PackageRecord> = join_all(
            repositories
                .iter()
                .map(|repo| self.process_repository(repo)),
        )
        .await
        .into_iter()
        .flatten()
        .collect();

        info!(
            indexed = records.len(),
            skipped = repositories.len() - records.len(),
            "Pipeline finished"
        );
        Ok(records)
    }

    /// Processes one repository to completion. Returns `None` when the
    /// repository contributes no index entry; the reason is already logged.
    pub(crate) async fn process_repository(&self, repo: &str) -> Option<PackageRecord> {
        match self.try_process(repo).await {
            Ok(record) => record,
            Err(e) => {
                error!(repo, error = %format!("{e:#}"), "Dropping repository");
                None
            }
        }
    }

    async fn try_process(&self, repo: &str) -> Result<Option<PackageRecord>> {
        // FETCH_HEAD: a failing head manifest makes the whole repository
        // absent before any version work starts.
        let head = {
            let _permit = self.permit().await?;
            let raw = self
                .github
                .fetch_raw_manifest(repo, "HEAD")
                .await
                .context("Failed to fetch head manifest")?;
            manifest::validate(&raw, self.migrator.as_ref())
                .await
                .context("Head manifest is unusable")?
        };

        let metadata = with_backoff(self.backoff, "repository metadata", move || async move {
            let _permit = self.permit().await?;
            Ok(self.github.get_metadata(repo).await?)
        })
        .await
        .context("Failed to fetch repository metadata")?;

        // RESOLVE_VERSIONS.
        let versions = with_backoff(self.backoff, "tag listing", move || async move {
            let _permit = self.permit().await?;
            resolve_versions(repo, self.tags.as_ref()).await
        })
        .await?;

        // FETCH_VERSION: every version independently; a failing or empty
        // manifest skips that version only.
        let manifests: Vec<(Version, PackageManifest)> = join_all(
            versions
                .into_iter()
                .map(|version| self.fetch_version_manifest(repo, version)),
        )
        .await
        .into_iter()
        .flatten()
        .collect();

        // REDUCE: group surviving versions by variant label. join_all keeps
        // input order, so the per-label lists stay version-sorted.
        let mut variants: BTreeMap<String, Vec<VersionWithDependencies>> = BTreeMap::new();
        for (version, manifest) in &manifests {
            for variant in &manifest.variants {
                variants
                    .entry(variant.label.clone())
                    .or_default()
                    .push(VersionWithDependencies {
                        version: version.to_string(),
                        dependencies: variant.dependencies.clone(),
                    });
            }
        }

        if variants.is_empty() {
            warn!(repo, "No valid versions after reduction, dropping repository");
            return Ok(None);
        }

        info!(
            repo,
            versions = manifests.len(),
            variants = variants.len(),
            "Indexed repository"
        );
        Ok(Some(PackageRecord {
            repo: repo.to_string(),
            info: head.info,
            stars: metadata.stars,
            updated_at: metadata.updated_at,
            variants,
            manifests,
        }))
    }

    async fn fetch_version_manifest(
        &self,
        repo: &str,
        version: Version,
    ) -> Option<(Version, PackageManifest)> {
        let tag = format!("v{version}");
        let result: Result<PackageManifest> = async {
            let _permit = self.permit().await?;
            let raw = self
                .github
                .fetch_raw_manifest(repo, &tag)
                .await
                .context("Failed to fetch manifest")?;
            manifest::validate(&raw, self.migrator.as_ref()).await
        }
        .await;

        match result {
            Ok(manifest) if manifest.variants.is_empty() => {
                warn!(repo, %version, "Manifest declares no variants, skipping version");
                None
            }
            Ok(manifest) => Some((version, manifest)),
            Err(e) => {
                warn!(repo, %version, error = %format!("{e:#}"), "Skipping version");
                None
            }
        }
    }
}

/// Builds the primary index document from the collected records.
pub(crate) fn build_index(records: &[PackageRecord]) -> PackageIndex {
    let packages = records
        .iter()
        .map(|record| {
            let versions = record
                .variants
                .iter()
                .map(|(label, versions)| {
                    (
                        label.clone(),
                        versions.iter().map(|v| v.version.clone()).collect(),
                    )
                })
                .collect();
            (
                index_key(&record.repo),
                PackageIndexEntry {
                    info: record.info.clone(),
                    stars: record.stars,
                    updated_at: record.updated_at,
                    versions,
                },
            )
        })
        .collect();
    PackageIndex::new(packages)
}

/// Builds the dependency-annotated flavor from the same records, so both
/// documents share one set of inclusion decisions.
pub(crate) fn build_deps_index(records: &[PackageRecord]) -> PackageDepsIndex {
    let packages = records
        .iter()
        .map(|record| {
            (
                index_key(&record.repo),
                PackageDepsIndexEntry {
                    info: record.info.clone(),
                    stars: record.stars,
                    updated_at: record.updated_at,
                    versions: record.variants.clone(),
                },
            )
        })
        .collect();
    PackageDepsIndex::new(packages)
}

fn index_key(repo: &str) -> String {
    format!("github.com/{repo}")
}
