//! Scrape pipeline orchestration: link discovery, per-school extraction,
//! aggregation and the final output write.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use nycs_adapters::{default_extractors, fetch_document, parse_listing_links, parse_profile, FieldExtractor};
use nycs_core::{merge_record, Aggregate, DiscoveryOutcome, SchoolOutcome, StopReason, WriteOutcome};
use nycs_storage::{
    next_output_path, write_output, HttpClientConfig, HttpFetcher, LinkCache, PageArchive, PageSource,
    LISTING_PAGE_SIZE,
};
use scraper::Html;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "nycs-sync";

pub const DEFAULT_PAGES: u32 = 20;
pub const LISTING_BASE_URL: &str = "https://nycmentors.org/schools";
/// Opaque tracking parameters the listing endpoint is requested with, kept verbatim.
pub const LISTING_TRACKING_QUERY: &str =
    "gad_source=1&gclid=CjwKCAjw34qzBhBmEiwAOUQcFzq8hETFXr4fNoJnSRyORnWkLdUvoLPG3PmjV3dqSXu8DfrilAmJXRoCTSMQAvD_BwE";
pub const DATA_DIR_NAME: &str = "schoolPages";
pub const LINK_CACHE_FILE_NAME: &str = "links.json";

#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    pub pages: u32,
    pub page_size: usize,
    pub listing_base_url: String,
    pub cache_path: PathBuf,
    pub output_dir: PathBuf,
    /// Where raw profile pages are saved; `None` disables archiving.
    pub archive_dir: Option<PathBuf>,
    pub http: HttpClientConfig,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            pages: DEFAULT_PAGES,
            page_size: LISTING_PAGE_SIZE,
            listing_base_url: LISTING_BASE_URL.to_string(),
            cache_path: default_data_dir().join(LINK_CACHE_FILE_NAME),
            output_dir: PathBuf::from("."),
            archive_dir: None,
            http: HttpClientConfig::default(),
        }
    }
}

impl ScrapeConfig {
    pub fn listing_url(&self, page: u32) -> String {
        format!("{}?{LISTING_TRACKING_QUERY}&page={page}", self.listing_base_url)
    }
}

/// `<home>/schoolPages`, falling back to the working directory when no home
/// directory can be determined.
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DATA_DIR_NAME)
}

/// Walks listing pages `1..=config.pages`. Stops at the first page with no
/// links, and abandons the remaining pages on the first fetch failure,
/// keeping whatever was collected before it.
pub async fn discover_links(source: &dyn PageSource, config: &ScrapeConfig) -> DiscoveryOutcome {
    let started = Instant::now();
    let mut links = Vec::new();
    let mut stopped = StopReason::PageLimit;

    for page in 1..=config.pages {
        let url = config.listing_url(page);
        let page_links = match fetch_document(source, &url).await {
            Ok(document) => listing_links(&document),
            Err(err) => Err(err.to_string()),
        };

        match page_links {
            Ok(page_links) if page_links.is_empty() => {
                info!(page, "listing page has no links; end of results");
                stopped = StopReason::EmptyPage(page);
                break;
            }
            Ok(page_links) => {
                info!(page, count = page_links.len(), "listing page parsed");
                links.extend(page_links);
            }
            Err(error) => {
                warn!(page, url = %url, %error, "listing page failed; stopping discovery");
                stopped = StopReason::Failed { page, error };
                break;
            }
        }
    }

    info!(
        count = links.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "link discovery finished"
    );
    DiscoveryOutcome { links, stopped }
}

fn listing_links(document: &Html) -> std::result::Result<Vec<String>, String> {
    parse_listing_links(document).map_err(|e| e.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOrigin {
    Cache(PathBuf),
    Discovered(StopReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkResolution {
    pub links: Vec<String>,
    pub origin: LinkOrigin,
}

/// Cached links when the cache file exists, otherwise a fresh discovery
/// whose full result is written back to the cache.
pub async fn resolve_links(source: &dyn PageSource, config: &ScrapeConfig) -> Result<LinkResolution> {
    let cache = LinkCache::new(&config.cache_path).with_page_size(config.page_size);
    if let Some(links) = cache.load(config.pages).await? {
        return Ok(LinkResolution {
            links,
            origin: LinkOrigin::Cache(cache.path().to_path_buf()),
        });
    }

    let discovered = discover_links(source, config).await;
    cache
        .save(&discovered.links)
        .await
        .context("saving discovered links")?;
    Ok(LinkResolution {
        links: discovered.links,
        origin: LinkOrigin::Discovered(discovered.stopped),
    })
}

/// Fetches and extracts one profile, adding it to `aggregate`. Every failure
/// stays inside the returned outcome.
pub async fn scrape_school(
    source: &dyn PageSource,
    url: &str,
    extractors: &[Box<dyn FieldExtractor>],
    archive: Option<&PageArchive>,
    aggregate: &mut Aggregate,
) -> SchoolOutcome {
    let started = Instant::now();
    let body = match source.fetch_text(url).await {
        Ok(body) => body,
        Err(err) => {
            return SchoolOutcome::Failed {
                url: url.to_string(),
                error: err.to_string(),
            }
        }
    };
    info!(url, elapsed_ms = started.elapsed().as_millis() as u64, "profile fetched");

    let parsed = {
        let document = Html::parse_document(&body);
        parse_profile(&document, extractors)
    };
    let parsed = match parsed {
        Ok(parsed) => parsed,
        Err(err) => {
            return SchoolOutcome::Failed {
                url: url.to_string(),
                error: err.to_string(),
            }
        }
    };

    let absorbed = parsed.absorbed();
    let record = merge_record(url, parsed.outcomes.into_iter().map(|o| o.fields));
    if aggregate.insert(parsed.school_name.clone(), record).is_some() {
        warn!(school = %parsed.school_name, url, "duplicate school name; replacing earlier record");
    }

    if let Some(archive) = archive {
        if let Err(err) = archive.save(&parsed.school_name, &body).await {
            let error = format!("{err:#}");
            warn!(school = %parsed.school_name, %error, "archiving page failed");
        }
    }

    SchoolOutcome::Recorded {
        school_name: parsed.school_name,
        url: url.to_string(),
        absorbed,
    }
}

#[derive(Debug, Clone)]
pub struct ScrapeRunSummary {
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub link_origin: LinkOrigin,
    pub link_count: usize,
    pub schools: Vec<SchoolOutcome>,
    pub output: WriteOutcome,
}

impl ScrapeRunSummary {
    pub fn recorded(&self) -> usize {
        self.schools.iter().filter(|s| !s.is_failed()).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &SchoolOutcome> {
        self.schools.iter().filter(|s| s.is_failed())
    }
}

pub struct ScrapePipeline {
    config: ScrapeConfig,
    source: Box<dyn PageSource>,
    extractors: Vec<Box<dyn FieldExtractor>>,
    archive: Option<PageArchive>,
}

impl ScrapePipeline {
    pub fn new(config: ScrapeConfig) -> Result<Self> {
        let http = HttpFetcher::new(config.http.clone())?;
        Ok(Self::with_source(config, Box::new(http)))
    }

    pub fn with_source(config: ScrapeConfig, source: Box<dyn PageSource>) -> Self {
        let archive = config.archive_dir.clone().map(PageArchive::new);
        Self {
            config,
            source,
            extractors: default_extractors(),
            archive,
        }
    }

    pub fn config(&self) -> &ScrapeConfig {
        &self.config
    }

    /// Errors from here reach the process tier: link cache read/write and
    /// output name selection. Per-school and output-write failures do not.
    pub async fn run_once(&self) -> Result<ScrapeRunSummary> {
        let started = Instant::now();
        let started_at = Local::now();

        let resolution = resolve_links(self.source.as_ref(), &self.config).await?;
        info!(count = resolution.links.len(), origin = ?resolution.origin, "school links resolved");

        let mut aggregate = Aggregate::new();
        let mut schools = Vec::with_capacity(resolution.links.len());
        for url in &resolution.links {
            let outcome = scrape_school(
                self.source.as_ref(),
                url,
                &self.extractors,
                self.archive.as_ref(),
                &mut aggregate,
            )
            .await;
            if let SchoolOutcome::Failed { url, error } = &outcome {
                warn!(url = %url, %error, "school skipped");
            }
            schools.push(outcome);
        }

        let path = next_output_path(&self.config.output_dir, &Local::now())
            .await
            .context("choosing output file name")?;
        let output = write_output(&aggregate, &path).await;

        let summary = ScrapeRunSummary {
            started_at,
            finished_at: Local::now(),
            link_origin: resolution.origin,
            link_count: resolution.links.len(),
            schools,
            output,
        };
        info!(
            links = summary.link_count,
            recorded = summary.recorded(),
            failed = summary.failed().count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "scrape run finished"
        );
        Ok(summary)
    }
}

pub async fn run_scrape_once(config: ScrapeConfig) -> Result<ScrapeRunSummary> {
    ScrapePipeline::new(config)?.run_once().await
}
