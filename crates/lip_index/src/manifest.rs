// SPDX-License-Identifier: Apache-2.0

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tracing::debug;

use crate::models::manifest::PackageManifest;

/// Best-effort single-shot upgrade of an older-schema manifest. Injectable so
/// the validate path is testable without spawning real processes.
#[async_trait]
pub(crate) trait MigrationRunner: Send + Sync {
    async fn migrate(&self, raw: &[u8]) -> Result<Vec<u8>>;
}

/// Production runner shelling out to the external migration tool. Input and
/// output go through a scoped temporary directory that is removed on all exit
/// paths when the guard drops.
pub(crate) struct LipMigrateRunner {
    program: String,
}

impl LipMigrateRunner {
    pub(crate) fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl MigrationRunner for LipMigrateRunner {
    async fn migrate(&self, raw: &[u8]) -> Result<Vec<u8>> {
        let dir = tempfile::tempdir().context("Failed to create migration scratch directory")?;
        let input_path = dir.path().join("input.json");
        let output_path = dir.path().join("output.json");

        tokio::fs::write(&input_path, raw)
            .await
            .context("Failed to write migration input")?;

        let status = tokio::process::Command::new(&self.program)
            .arg("migrate")
            .arg(&input_path)
            .arg(&output_path)
            .status()
            .await
            .with_context(|| format!("Failed to spawn migration tool '{}'", self.program))?;

        if !status.success() {
            bail!("Migration tool '{}' exited with {}", self.program, status);
        }

        tokio::fs::read(&output_path)
            .await
            .context("Migration tool produced no output file")
    }
}

/// Validates raw bytes as a current-schema manifest, falling back to one
/// migration pass when direct validation fails. A failure here means the
/// manifest is unusable for its (repo, ref); callers treat it as absent.
pub(crate) async fn validate(raw: &[u8], runner: &dyn MigrationRunner) -> Result<PackageManifest> {
    let direct_err = match PackageManifest::parse_current(raw) {
        Ok(manifest) => return Ok(manifest),
        Err(e) => e,
    };

    debug!(error = %direct_err, "Direct validation failed, attempting migration");
    let migrated = runner
        .migrate(raw)
        .await
        .context("Manifest migration failed")?;

    PackageManifest::parse_current(&migrated)
        .context("Migrated manifest still fails current-schema validation")
}
