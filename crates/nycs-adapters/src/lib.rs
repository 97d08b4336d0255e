//! Listing and profile page parsing: link discovery queries, the school name
//! query, and the three field extractors.

pub mod selectors;

use nycs_core::{ExtractOutcome, ExtractorKind, FieldValue, Fields};
use nycs_storage::{FetchError, PageSource};
use scraper::{Html, Selector};
use thiserror::Error;
use tracing::warn;

pub const CRATE_NAME: &str = "nycs-adapters";

/// Key used when a paired bar has no name, matching how a missing key
/// serializes in the output.
pub const MISSING_BAR_NAME: &str = "null";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("invalid selector `{selector}`: {message}")]
    Selector {
        selector: &'static str,
        message: String,
    },
    #[error("no element matches `{0}`")]
    Missing(&'static str),
    #[error("no `{attr}` attribute under `{selector}`")]
    MissingAttr {
        selector: &'static str,
        attr: &'static str,
    },
    #[error("expected `name: value`, found {0:?}")]
    MissingSeparator(String),
    #[error("not a percentage: {0:?}")]
    BadPercent(String),
    #[error("expected at least {expected} chart titles, found {found}")]
    TitleCount { expected: usize, found: usize },
    #[error("chart label {label:?} at position {index} has no value")]
    MissingValue { index: usize, label: String },
}

/// Single GET, body parsed into a document tree.
pub async fn fetch_document(source: &dyn PageSource, url: &str) -> Result<Html, FetchError> {
    let body = source.fetch_text(url).await?;
    Ok(Html::parse_document(&body))
}

fn selector(css: &'static str) -> Result<Selector, ExtractError> {
    Selector::parse(css).map_err(|e| ExtractError::Selector {
        selector: css,
        message: e.to_string(),
    })
}

/// Text nodes that are direct children of each matched element, untrimmed,
/// in document order. Text inside nested elements is not included.
pub fn direct_text_nodes(document: &Html, css: &'static str) -> Result<Vec<String>, ExtractError> {
    let sel = selector(css)?;
    Ok(document
        .select(&sel)
        .flat_map(|el| {
            el.children()
                .filter_map(|node| node.value().as_text().map(|t| String::from(&**t)))
        })
        .collect())
}

/// Value of `attr` on the first matched element that carries it.
pub fn first_attr(
    document: &Html,
    css: &'static str,
    attr: &'static str,
) -> Result<Option<String>, ExtractError> {
    let sel = selector(css)?;
    Ok(document
        .select(&sel)
        .find_map(|el| el.value().attr(attr))
        .map(ToString::to_string))
}

pub fn all_attrs(document: &Html, css: &'static str, attr: &'static str) -> Result<Vec<String>, ExtractError> {
    let sel = selector(css)?;
    Ok(document
        .select(&sel)
        .filter_map(|el| el.value().attr(attr))
        .map(ToString::to_string)
        .collect())
}

/// Profile URLs on one listing page, verbatim and in page order.
pub fn parse_listing_links(document: &Html) -> Result<Vec<String>, ExtractError> {
    all_attrs(document, selectors::LISTING_LINK, selectors::LISTING_LINK_ATTR)
}

/// The displayed school name, exactly as the first title text node holds it.
pub fn school_name(document: &Html) -> Result<String, ExtractError> {
    direct_text_nodes(document, selectors::SCHOOL_TITLE)?
        .into_iter()
        .next()
        .ok_or(ExtractError::Missing(selectors::SCHOOL_TITLE))
}

/// `"52%"` -> `0.52`. The number must be an optionally signed integer; a
/// decimal fraction (`"33.9%"`) is truncated toward zero first. Exponents,
/// bare fractions and other float spellings are rejected.
pub fn percent_to_fraction(text: &str) -> Result<f64, ExtractError> {
    let bad = || ExtractError::BadPercent(text.to_string());
    let cleaned = text.trim().replace('%', "");
    let cleaned = cleaned.trim();
    let (whole, fraction) = match cleaned.split_once('.') {
        Some((_, "")) => return Err(bad()),
        Some((whole, fraction)) => (whole, fraction),
        None => (cleaned, ""),
    };

    let digits = whole.strip_prefix(['+', '-']).unwrap_or(whole);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(bad());
    }
    if !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return Err(bad());
    }

    let whole: i64 = whole.parse().map_err(|_| bad())?;
    Ok(whole as f64 / 100.0)
}

pub trait FieldExtractor: Send + Sync {
    fn kind(&self) -> ExtractorKind;
    fn extract(&self, document: &Html) -> Result<Fields, ExtractError>;
}

/// Flat `Name: value` pairs from the params block. Values stay strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct LabelValueExtractor;

impl FieldExtractor for LabelValueExtractor {
    fn kind(&self) -> ExtractorKind {
        ExtractorKind::LabelValue
    }

    fn extract(&self, document: &Html) -> Result<Fields, ExtractError> {
        let mut out = Fields::new();
        for node in direct_text_nodes(document, selectors::PARAMS_ITEM)? {
            for line in node.lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let (name, value) = line
                    .split_once(':')
                    .ok_or_else(|| ExtractError::MissingSeparator(line.to_string()))?;
                out.insert(name.trim().to_string(), FieldValue::from(value.trim()));
            }
        }
        Ok(out)
    }
}

/// Two-bar groups (gender split, lunch eligibility) as fractions.
///
/// Names and values are consumed two at a time through one cursor shared by
/// every group, so a group with other than two bars shifts every later
/// group's pairing. Missing names key as `"null"`, missing values are null.
#[derive(Debug, Clone, Copy, Default)]
pub struct PairedBarExtractor;

impl FieldExtractor for PairedBarExtractor {
    fn kind(&self) -> ExtractorKind {
        ExtractorKind::PairedBar
    }

    fn extract(&self, document: &Html) -> Result<Fields, ExtractError> {
        let titles = direct_text_nodes(document, selectors::BAR_GROUP_TITLE)?;
        let names = direct_text_nodes(document, selectors::BAR_NAME)?;
        let values = direct_text_nodes(document, selectors::BAR_VALUE)?;

        let mut out = Fields::new();
        let mut cursor = 0usize;
        for title in titles {
            let mut group = Fields::new();
            for idx in cursor..cursor + 2 {
                let name = names
                    .get(idx)
                    .map(|n| n.trim().to_string())
                    .unwrap_or_else(|| MISSING_BAR_NAME.to_string());
                let value = values.get(idx).map(|v| percent_to_fraction(v)).transpose()?;
                group.insert(name, FieldValue::from(value));
            }
            out.insert(title, FieldValue::Map(group));
            cursor += 2;
        }
        Ok(out)
    }
}

/// The three chart regions, each a `data-labels`/`data-values` pair zipped
/// by position under its title. Any missing piece discards all three.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChartDataExtractor;

impl ChartDataExtractor {
    fn region(document: &Html, css: &'static str) -> Result<Fields, ExtractError> {
        let labels = first_attr(document, css, selectors::CHART_LABELS_ATTR)?.ok_or(
            ExtractError::MissingAttr {
                selector: css,
                attr: selectors::CHART_LABELS_ATTR,
            },
        )?;
        let values = first_attr(document, css, selectors::CHART_VALUES_ATTR)?.ok_or(
            ExtractError::MissingAttr {
                selector: css,
                attr: selectors::CHART_VALUES_ATTR,
            },
        )?;
        zip_chart_attrs(&labels, &values)
    }
}

/// Splits both attribute strings on `,` and pairs them by position. Values
/// beyond the label count are ignored; fewer values than labels is an error.
pub fn zip_chart_attrs(labels: &str, values: &str) -> Result<Fields, ExtractError> {
    let values: Vec<&str> = values.split(',').collect();
    let mut out = Fields::new();
    for (index, label) in labels.split(',').enumerate() {
        let value = values.get(index).ok_or_else(|| ExtractError::MissingValue {
            index,
            label: label.to_string(),
        })?;
        out.insert(label.to_string(), FieldValue::from(*value));
    }
    Ok(out)
}

impl FieldExtractor for ChartDataExtractor {
    fn kind(&self) -> ExtractorKind {
        ExtractorKind::ChartData
    }

    fn extract(&self, document: &Html) -> Result<Fields, ExtractError> {
        let titles = direct_text_nodes(document, selectors::CHART_TITLE)?;
        let regions = selectors::CHART_REGIONS
            .iter()
            .map(|&css| Self::region(document, css))
            .collect::<Result<Vec<_>, _>>()?;

        let mut out = Fields::new();
        for (idx, region) in regions.into_iter().enumerate() {
            let title = titles.get(idx).ok_or(ExtractError::TitleCount {
                expected: selectors::CHART_REGIONS.len(),
                found: titles.len(),
            })?;
            out.insert(title.clone(), FieldValue::Map(region));
        }
        Ok(out)
    }
}

/// Extractors in merge order: label/value, paired-bar, chart-data.
pub fn default_extractors() -> Vec<Box<dyn FieldExtractor>> {
    vec![
        Box::new(LabelValueExtractor),
        Box::new(PairedBarExtractor),
        Box::new(ChartDataExtractor),
    ]
}

/// Runs one extractor, absorbing its failure into an empty mapping.
pub fn run_extractor(extractor: &dyn FieldExtractor, document: &Html) -> ExtractOutcome {
    match extractor.extract(document) {
        Ok(fields) => ExtractOutcome::extracted(extractor.kind(), fields),
        Err(err) => {
            warn!(extractor = %extractor.kind(), error = %err, "extractor failed; using empty mapping");
            ExtractOutcome::absorbed(extractor.kind(), err.to_string())
        }
    }
}

/// What one profile page yields before aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedProfile {
    pub school_name: String,
    pub outcomes: Vec<ExtractOutcome>,
}

impl ParsedProfile {
    pub fn absorbed(&self) -> Vec<ExtractorKind> {
        self.outcomes
            .iter()
            .filter(|o| o.is_absorbed())
            .map(|o| o.kind)
            .collect()
    }
}

/// Resolves the school name (failure here is the caller's to handle) and
/// runs every extractor, each absorbing its own failure.
pub fn parse_profile(
    document: &Html,
    extractors: &[Box<dyn FieldExtractor>],
) -> Result<ParsedProfile, ExtractError> {
    let school_name = school_name(document)?;
    let outcomes = extractors
        .iter()
        .map(|extractor| run_extractor(extractor.as_ref(), document))
        .collect();
    Ok(ParsedProfile {
        school_name,
        outcomes,
    })
}
