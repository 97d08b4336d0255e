use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use nycs_core::WriteOutcome;
use nycs_sync::{default_data_dir, LinkOrigin, ScrapeConfig, ScrapeRunSummary, DEFAULT_PAGES};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "nycs-cli", version)]
#[command(about = "Scrape NYC school profile pages into a single JSON file")]
struct Cli {
    /// Listing pages to walk (and cached links to keep, 12 per page).
    #[arg(long, default_value_t = DEFAULT_PAGES)]
    pages: u32,

    /// Link cache file. Defaults to `<home>/schoolPages/links.json`.
    #[arg(long)]
    cache: Option<PathBuf>,

    #[arg(long, default_value = ".")]
    out_dir: PathBuf,

    /// Save each raw profile page under `<home>/schoolPages/<name>.txt`.
    #[arg(long)]
    archive_pages: bool,
}

impl Cli {
    fn into_config(self) -> ScrapeConfig {
        let mut config = ScrapeConfig {
            pages: self.pages,
            output_dir: self.out_dir,
            archive_dir: self.archive_pages.then(default_data_dir),
            ..ScrapeConfig::default()
        };
        if let Some(cache) = self.cache {
            config.cache_path = cache;
        }
        config
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let error = format!("{err:#}");
            tracing::error!(%error, "exiting with failure");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let summary = nycs_sync::run_scrape_once(cli.into_config())
        .await
        .context("scrape run aborted")?;
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &ScrapeRunSummary) {
    let origin = match &summary.link_origin {
        LinkOrigin::Cache(path) => format!("cache:{}", path.display()),
        LinkOrigin::Discovered(_) => "discovered".to_string(),
    };
    println!(
        "scrape complete: links={} origin={} recorded={} failed={} elapsed={}s",
        summary.link_count,
        origin,
        summary.recorded(),
        summary.failed().count(),
        (summary.finished_at - summary.started_at).num_seconds()
    );
    match &summary.output {
        WriteOutcome::Written(path) => println!("output: {}", path.display()),
        WriteOutcome::Failed { path, error } => {
            eprintln!("output not written to {}: {error}", path.display())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_invocation_uses_literal_defaults() {
        let config = Cli::parse_from(["nycs-cli"]).into_config();
        assert_eq!(config.pages, 20);
        assert_eq!(config.output_dir, PathBuf::from("."));
        assert!(config.cache_path.ends_with("schoolPages/links.json"));
        assert!(config.archive_dir.is_none());
    }

    #[test]
    fn flags_override_config() {
        let config = Cli::parse_from([
            "nycs-cli",
            "--pages",
            "3",
            "--cache",
            "/tmp/links.json",
            "--out-dir",
            "/tmp/out",
            "--archive-pages",
        ])
        .into_config();
        assert_eq!(config.pages, 3);
        assert_eq!(config.cache_path, PathBuf::from("/tmp/links.json"));
        assert_eq!(config.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.archive_dir, Some(default_data_dir()));
    }

    #[tokio::test]
    async fn malformed_cache_fails_the_run() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = dir.path().join("links.json");
        std::fs::write(&cache, "[not json").expect("write cache");
        let cache_arg = cache.display().to_string();
        let out_arg = dir.path().display().to_string();
        let cli = Cli::parse_from(["nycs-cli", "--cache", &cache_arg, "--out-dir", &out_arg]);

        let err = run(cli).await.unwrap_err();
        let message = format!("{err:#}");
        assert!(message.starts_with("scrape run aborted"), "{message}");
        assert!(message.contains("parsing"), "{message}");
    }
}
