//! HTTP fetch layer, link cache, page archive and output file writer.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone};
use nycs_core::{Aggregate, WriteOutcome};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, error, info, info_span, warn, Instrument};

pub const CRATE_NAME: &str = "nycs-storage";

/// Number of profile links a single listing page is assumed to hold.
pub const LISTING_PAGE_SIZE: usize = 12;

/// Trailing part of every output file name.
pub const OUTPUT_SUFFIX: &str = "_schoolScraper.json";

pub const ARCHIVE_EXTENSION: &str = "txt";

#[derive(Debug, Clone, Default)]
pub struct HttpClientConfig {
    /// `None` keeps the client default (no overall timeout).
    pub timeout: Option<Duration>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Raised by sources that do not go through reqwest, such as in-memory
    /// page sets.
    #[error("page unavailable: {0}")]
    Unavailable(String),
}

/// Anything that can turn a URL into a markup body. The pipeline only talks
/// to this trait so tests can serve pages from memory.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_text(&self, url: &str) -> Result<String, FetchError>;
}

/// One GET per call. No retry, no rate limiting, client-default redirects.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder().gzip(true).brotli(true);

        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    /// Non-success statuses are returned like any other response; only
    /// transport failures are errors.
    pub async fn fetch_bytes(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", url);
        self.get(url).instrument(span).await
    }

    async fn get(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let started = Instant::now();
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        let final_url = resp.url().to_string();
        let body = resp.bytes().await?.to_vec();

        if !status.is_success() {
            warn!(status = status.as_u16(), final_url = %final_url, "non-success status; parsing body anyway");
        }
        debug!(
            status = status.as_u16(),
            bytes = body.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "fetched"
        );

        Ok(FetchedResponse {
            status,
            final_url,
            body,
        })
    }
}

#[async_trait]
impl PageSource for HttpFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        let resp = self.fetch_bytes(url).await?;
        Ok(String::from_utf8_lossy(&resp.body).into_owned())
    }
}

/// On-disk shape of the link cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkCacheEntry {
    pub links: Vec<String>,
}

/// Flat JSON memo of discovered profile links. Never expires; delete the file
/// to force rediscovery. Writes are not atomic.
#[derive(Debug, Clone)]
pub struct LinkCache {
    path: PathBuf,
    page_size: usize,
}

impl LinkCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            page_size: LISTING_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `None` when no cache file exists. Otherwise at most
    /// `pages * page_size` links, in stored order.
    pub async fn load(&self, pages: u32) -> anyhow::Result<Option<Vec<String>>> {
        if !fs::try_exists(&self.path)
            .await
            .with_context(|| format!("checking link cache {}", self.path.display()))?
        {
            return Ok(None);
        }

        let text = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))?;
        let entry: LinkCacheEntry =
            serde_json::from_str(&text).with_context(|| format!("parsing {}", self.path.display()))?;

        info!(
            path = %self.path.display(),
            count = entry.links.len(),
            "found cached file of links"
        );

        let limit = (pages as usize).saturating_mul(self.page_size);
        let mut links = entry.links;
        links.truncate(limit);
        Ok(Some(links))
    }

    pub async fn save(&self, links: &[String]) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }

        let entry = LinkCacheEntry {
            links: links.to_vec(),
        };
        let bytes = serde_json::to_vec(&entry).context("serializing link cache")?;
        fs::write(&self.path, bytes)
            .await
            .with_context(|| format!("writing {}", self.path.display()))?;

        info!(path = %self.path.display(), count = links.len(), "saved link cache");
        Ok(())
    }
}

/// Raw profile pages saved per school, one `<name>.txt` file each.
#[derive(Debug, Clone)]
pub struct PageArchive {
    dir: PathBuf,
}

impl PageArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, school_name: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{ARCHIVE_EXTENSION}", sanitize_file_stem(school_name)))
    }

    pub async fn save(&self, school_name: &str, html: &str) -> anyhow::Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating {}", self.dir.display()))?;
        let path = self.path_for(school_name);
        fs::write(&path, html)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }

    /// File stem -> contents for every archived page. A missing directory is
    /// an empty archive.
    pub async fn load_all(&self) -> anyhow::Result<BTreeMap<String, String>> {
        let mut out = BTreeMap::new();
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(err) => {
                return Err(err).with_context(|| format!("reading {}", self.dir.display()));
            }
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("reading {}", self.dir.display()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ARCHIVE_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let html = fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            out.insert(stem.to_string(), html);
        }
        Ok(out)
    }
}

/// Replaces characters that cannot appear in a file name on common platforms.
pub fn sanitize_file_stem(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

/// Second-precision prefix shared by every output written in the same second.
pub fn output_stamp<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    now.format("%Y%m%d%H%M%S").to_string()
}

/// One past the highest sequence number among `names` of the form
/// `<stamp>_<seq>...`. Names with a different stamp or an unparsable
/// sequence are ignored.
pub fn next_sequence<'a>(stamp: &str, names: impl IntoIterator<Item = &'a str>) -> u32 {
    names
        .into_iter()
        .filter_map(|name| {
            let rest = name.strip_prefix(stamp)?.strip_prefix('_')?;
            let end = rest.find(['_', '.']).unwrap_or(rest.len());
            rest[..end].parse::<u32>().ok()
        })
        .max()
        .map_or(1, |max| max.saturating_add(1))
}

pub fn output_file_name(stamp: &str, sequence: u32) -> String {
    format!("{stamp}_{sequence}{OUTPUT_SUFFIX}")
}

/// Picks `<dir>/<stamp>_<seq>_schoolScraper.json` for `now`, scanning `dir`
/// for outputs already written in the same second. Not safe against
/// concurrent writers.
pub async fn next_output_path<Tz: TimeZone>(dir: &Path, now: &DateTime<Tz>) -> anyhow::Result<PathBuf>
where
    Tz::Offset: std::fmt::Display,
{
    let stamp = output_stamp(now);
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(dir.join(output_file_name(&stamp, 1)));
        }
        Err(err) => return Err(err).with_context(|| format!("reading {}", dir.display())),
    };

    let mut existing = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("reading {}", dir.display()))?
    {
        if !entry.file_type().await.map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }
        if let Ok(name) = entry.file_name().into_string() {
            existing.push(name);
        }
    }

    let sequence = next_sequence(&stamp, existing.iter().map(String::as_str));
    Ok(dir.join(output_file_name(&stamp, sequence)))
}

/// Four-space indented JSON, non-ASCII kept literal.
pub fn to_pretty_json(aggregate: &Aggregate) -> serde_json::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    aggregate.serialize(&mut ser)?;
    Ok(buf)
}

/// Overwrites `path` with the aggregate. Failures are logged and reported in
/// the returned outcome, never propagated.
pub async fn write_output(aggregate: &Aggregate, path: &Path) -> WriteOutcome {
    match write_pretty(aggregate, path).await {
        Ok(()) => {
            info!(path = %path.display(), schools = aggregate.len(), "done writing output");
            WriteOutcome::Written(path.to_path_buf())
        }
        Err(err) => {
            let error = format!("{err:#}");
            error!(path = %path.display(), %error, "writing output failed");
            WriteOutcome::Failed {
                path: path.to_path_buf(),
                error,
            }
        }
    }
}

async fn write_pretty(aggregate: &Aggregate, path: &Path) -> anyhow::Result<()> {
    let bytes = to_pretty_json(aggregate).context("serializing aggregate")?;
    fs::write(path, bytes)
        .await
        .with_context(|| format!("writing {}", path.display()))
}
