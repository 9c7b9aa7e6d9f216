// SPDX-License-Identifier: Apache-2.0

mod github;
mod manifest;
mod models;
mod pipeline;
mod retry;
mod versions;
mod writer;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use github::GitHubClient;
use manifest::LipMigrateRunner;
use models::manifest::FORMAT_UUID;
use pipeline::{build_deps_index, build_index, Pipeline};
use versions::GitTagLister;

/// Builds the lip package index by crawling GitHub for repositories that
/// publish a tooth.json manifest.
#[derive(Parser)]
struct Cli {
    /// GitHub API token. Required; discovery is not possible anonymously.
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Directory receiving the index document(s) and manifest cache.
    #[arg(long, default_value = "workspace/lipr/github.com")]
    output_root: PathBuf,

    /// Maximum simultaneously in-flight network/process operations.
    #[arg(long, default_value_t = 16)]
    concurrency: usize,

    /// GitHub REST API base URL.
    #[arg(long, default_value = GitHubClient::DEFAULT_API_URL)]
    api_url: String,

    /// Raw content base URL.
    #[arg(long, default_value = GitHubClient::DEFAULT_RAW_URL)]
    raw_url: String,

    /// Program invoked to migrate older-schema manifests.
    #[arg(long, default_value = "lip")]
    migrate_tool: String,

    /// Also write the dependency-annotated index flavor.
    #[arg(long, default_value_t = false)]
    deps_index: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let token = cli
        .token
        .context("GITHUB_TOKEN environment variable is not set")?;

    let github = GitHubClient::new(cli.api_url, cli.raw_url, token);
    let pipeline = Pipeline::new(
        github,
        Arc::new(GitTagLister),
        Arc::new(LipMigrateRunner::new(cli.migrate_tool)),
        cli.concurrency,
    );

    let records = pipeline.run(FORMAT_UUID).await?;

    let index = build_index(&records);
    writer::write_document(&index, &cli.output_root.join("index.json"))?;

    if cli.deps_index {
        let deps_index = build_deps_index(&records);
        writer::write_document(&deps_index, &cli.output_root.join("index-deps.json"))?;
    }

    writer::write_manifest_caches(&cli.output_root, &records)?;

    info!(packages = index.packages.len(), "Index generation complete");
    Ok(())
}
