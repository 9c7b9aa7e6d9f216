// SPDX-License-Identifier: Apache-2.0

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use semver::Version;
use tokio::process::Command;
use tracing::info;

/// Lists the raw tag refs a repository publishes. Injectable so the resolver
/// is testable without network access or a git binary.
#[async_trait]
pub(crate) trait TagLister: Send + Sync {
    /// Returns one `<sha>\trefs/tags/<name>` line per tag ref.
    async fn list_tags(&self, repo: &str) -> Result<Vec<String>>;
}

/// Production lister shelling out to `git ls-remote -t --refs`.
pub(crate) struct GitTagLister;

#[async_trait]
impl TagLister for GitTagLister {
    async fn list_tags(&self, repo: &str) -> Result<Vec<String>> {
        let url = format!("https://github.com/{repo}.git");
        let output = Command::new("git")
            .args(["ls-remote", "-t", "--refs", &url])
            .output()
            .await
            .with_context(|| format!("Failed to spawn git ls-remote for '{repo}'"))?;

        if !output.status.success() {
            bail!(
                "git ls-remote for '{}' exited with {}: {}",
                repo,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().map(|l| l.to_string()).collect())
    }
}

/// Resolves the ordered set of published versions for `repo`: tag refs of the
/// form `refs/tags/v<semver>`, parsed and sorted ascending by semver
/// precedence. Tags that do not match or do not parse are discarded, never
/// errors. Two tags parsing to the same version are both kept.
pub(crate) async fn resolve_versions(repo: &str, lister: &dyn TagLister) -> Result<Vec<Version>> {
    let lines = lister
        .list_tags(repo)
        .await
        .with_context(|| format!("Failed to list tags for '{repo}'"))?;

    let mut versions: Vec<Version> = lines
        .iter()
        .filter_map(|line| line.split_whitespace().last())
        .filter_map(|r| r.strip_prefix("refs/tags/v"))
        .filter_map(|rest| Version::parse(rest).ok())
        .collect();
    versions.sort();

    info!(repo, count = versions.len(), "Resolved versions");
    Ok(versions)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedTags(Vec<&'static str>);

    #[async_trait]
    impl TagLister for FixedTags {
        async fn list_tags(&self, _repo: &str) -> Result<Vec<String>> {
            Ok(self.0.iter().map(|l| l.to_string()).collect())
        }
    }

    struct FailingLister;

    #[async_trait]
    impl TagLister for FailingLister {
        async fn list_tags(&self, repo: &str) -> Result<Vec<String>> {
            bail!("cannot reach '{repo}'")
        }
    }

    #[tokio::test]
    async fn filters_and_sorts_tags() {
        let lister = FixedTags(vec![
            "aaa\trefs/tags/v1.2.0",
            "bbb\trefs/tags/v1.0.0",
            "ccc\trefs/tags/bad-tag",
            "ddd\trefs/tags/v1.1.0-rc1",
        ]);
        let versions = resolve_versions("acme/tool", &lister).await.unwrap();
        let rendered: Vec<String> = versions.iter().map(|v| v.to_string()).collect();
        assert_eq!(rendered, vec!["1.0.0", "1.1.0-rc1", "1.2.0"]);
    }

    #[tokio::test]
    async fn drops_refs_without_v_prefix_and_unparseable_bodies() {
        let lister = FixedTags(vec![
            "aaa\trefs/tags/1.0.0",
            "bbb\trefs/tags/version-one",
            "ccc\trefs/tags/vnot.a.version",
            "ddd\trefs/heads/v1.0.0",
        ]);
        let versions = resolve_versions("acme/tool", &lister).await.unwrap();
        assert!(versions.is_empty());
    }

    #[tokio::test]
    async fn prerelease_sorts_before_release_of_same_triple() {
        let lister = FixedTags(vec![
            "aaa\trefs/tags/v2.0.0",
            "bbb\trefs/tags/v2.0.0-alpha.1",
        ]);
        let versions = resolve_versions("acme/tool", &lister).await.unwrap();
        let rendered: Vec<String> = versions.iter().map(|v| v.to_string()).collect();
        assert_eq!(rendered, vec!["2.0.0-alpha.1", "2.0.0"]);
    }

    #[tokio::test]
    async fn duplicate_versions_are_both_kept() {
        let lister = FixedTags(vec![
            "aaa\trefs/tags/v1.0.0",
            "bbb\trefs/tags/v1.0.0+build",
        ]);
        let versions = resolve_versions("acme/tool", &lister).await.unwrap();
        assert_eq!(versions.len(), 2);
    }

    #[tokio::test]
    async fn listing_failure_is_an_error_for_this_repo() {
        let result = resolve_versions("acme/tool", &FailingLister).await;
        assert!(result.is_err());
    }
}
