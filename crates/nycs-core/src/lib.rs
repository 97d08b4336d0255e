//! Core domain model for the school profile scraper.

use std::fmt;
use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "nycs-core";

/// Key under which every record carries the profile URL it was scraped from.
pub const URL_FIELD: &str = "URL";

/// Ordered field mapping; insertion order is the order fields appear in the output.
pub type Fields = IndexMap<String, FieldValue>;

/// A single extracted value: a string, a fraction, a nested mapping, or nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Number(f64),
    Text(String),
    Map(Fields),
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Fields> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<Option<f64>> for FieldValue {
    fn from(value: Option<f64>) -> Self {
        value.map_or(Self::Null, Self::Number)
    }
}

impl From<Fields> for FieldValue {
    fn from(value: Fields) -> Self {
        Self::Map(value)
    }
}

/// Everything scraped for one school. Serializes as its flat field mapping,
/// with the source URL stored under [`URL_FIELD`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SchoolRecord {
    #[serde(skip)]
    url: String,
    fields: Fields,
}

impl SchoolRecord {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let mut fields = Fields::new();
        fields.insert(URL_FIELD.to_string(), FieldValue::Text(url.clone()));
        Self { url, fields }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    /// Copies every entry of `mapping` into the record. Top-level collisions
    /// are last-write-wins; nested maps are replaced, never merged.
    pub fn absorb(&mut self, mapping: Fields) {
        for (key, value) in mapping {
            self.fields.insert(key, value);
        }
    }
}

/// Builds a record from the source URL and the extractor mappings, applied in
/// the order given.
pub fn merge_record<I>(url: &str, mappings: I) -> SchoolRecord
where
    I: IntoIterator<Item = Fields>,
{
    let mut record = SchoolRecord::new(url);
    for mapping in mappings {
        record.absorb(mapping);
    }
    record
}

/// School name -> record. A repeated name replaces the earlier record but
/// keeps its original position.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Aggregate {
    schools: IndexMap<String, SchoolRecord>,
}

impl Aggregate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, school_name: impl Into<String>, record: SchoolRecord) -> Option<SchoolRecord> {
        self.schools.insert(school_name.into(), record)
    }

    pub fn get(&self, school_name: &str) -> Option<&SchoolRecord> {
        self.schools.get(school_name)
    }

    pub fn len(&self) -> usize {
        self.schools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schools.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.schools.keys().map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExtractorKind {
    LabelValue,
    PairedBar,
    ChartData,
}

impl ExtractorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LabelValue => "label-value",
            Self::PairedBar => "paired-bar",
            Self::ChartData => "chart-data",
        }
    }
}

impl fmt::Display for ExtractorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of running one extractor. A failure is absorbed here: `fields` is
/// empty and `error` carries the reason.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractOutcome {
    pub kind: ExtractorKind,
    pub fields: Fields,
    pub error: Option<String>,
}

impl ExtractOutcome {
    pub fn extracted(kind: ExtractorKind, fields: Fields) -> Self {
        Self {
            kind,
            fields,
            error: None,
        }
    }

    pub fn absorbed(kind: ExtractorKind, error: impl Into<String>) -> Self {
        Self {
            kind,
            fields: Fields::new(),
            error: Some(error.into()),
        }
    }

    pub fn is_absorbed(&self) -> bool {
        self.error.is_some()
    }
}

/// Result of processing one profile URL at the per-school tier.
#[derive(Debug, Clone, PartialEq)]
pub enum SchoolOutcome {
    Recorded {
        school_name: String,
        url: String,
        absorbed: Vec<ExtractorKind>,
    },
    Failed {
        url: String,
        error: String,
    },
}

impl SchoolOutcome {
    pub fn url(&self) -> &str {
        match self {
            Self::Recorded { url, .. } | Self::Failed { url, .. } => url,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The given listing page produced no profile links.
    EmptyPage(u32),
    /// Fetching or parsing the given listing page failed; later pages were skipped.
    Failed { page: u32, error: String },
    /// Every requested page was walked.
    PageLimit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryOutcome {
    pub links: Vec<String>,
    pub stopped: StopReason,
}

/// Output writes never fail the run; the failure is reported here instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Written(PathBuf),
    Failed { path: PathBuf, error: String },
}

impl WriteOutcome {
    pub fn path(&self) -> &PathBuf {
        match self {
            Self::Written(path) | Self::Failed { path, .. } => path,
        }
    }

    pub fn is_written(&self) -> bool {
        matches!(self, Self::Written(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, FieldValue)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn record_starts_with_url_field() {
        let record = SchoolRecord::new("https://example.org/schools/ps-1");
        assert_eq!(record.url(), "https://example.org/schools/ps-1");
        assert_eq!(
            record.get(URL_FIELD).and_then(FieldValue::as_str),
            Some("https://example.org/schools/ps-1")
        );
        assert_eq!(record.fields().len(), 1);
    }

    #[test]
    fn merge_is_last_write_wins_in_extractor_order() {
        let label_value = fields(&[("Gender", "label".into()), ("Grades", "K-5".into())]);
        let mut inner = Fields::new();
        inner.insert("Female".into(), 0.52.into());
        let paired_bar = fields(&[("Gender", FieldValue::Map(inner.clone()))]);
        let chart = fields(&[("Gender", "chart".into())]);

        let record = merge_record("u", [label_value, paired_bar.clone(), chart]);
        assert_eq!(record.get("Gender"), Some(&FieldValue::Text("chart".into())));
        assert_eq!(record.get("Grades"), Some(&FieldValue::Text("K-5".into())));

        let record = merge_record("u", [fields(&[("Gender", "label".into())]), paired_bar]);
        assert_eq!(record.get("Gender"), Some(&FieldValue::Map(inner)));
    }

    #[test]
    fn extractor_cannot_replace_nested_map_partially() {
        let mut first = Fields::new();
        first.insert("a".into(), 1.0.into());
        first.insert("b".into(), 2.0.into());
        let mut second = Fields::new();
        second.insert("a".into(), 3.0.into());

        let record = merge_record(
            "u",
            [
                fields(&[("T", FieldValue::Map(first))]),
                fields(&[("T", FieldValue::Map(second.clone()))]),
            ],
        );
        assert_eq!(record.get("T"), Some(&FieldValue::Map(second)));
    }

    #[test]
    fn url_key_can_be_overwritten_by_an_extractor() {
        let record = merge_record("u", [fields(&[(URL_FIELD, "other".into())])]);
        assert_eq!(record.get(URL_FIELD).and_then(FieldValue::as_str), Some("other"));
        assert_eq!(record.url(), "u");
    }

    #[test]
    fn aggregate_repeated_name_keeps_position_with_new_value() {
        let mut aggregate = Aggregate::new();
        aggregate.insert("A", SchoolRecord::new("a1"));
        aggregate.insert("B", SchoolRecord::new("b"));
        let previous = aggregate.insert("A", SchoolRecord::new("a2"));

        assert_eq!(previous.map(|r| r.url().to_string()).as_deref(), Some("a1"));
        assert_eq!(aggregate.names().collect::<Vec<_>>(), vec!["A", "B"]);
        assert_eq!(aggregate.get("A").map(SchoolRecord::url), Some("a2"));
    }

    #[test]
    fn aggregate_serializes_as_nested_mapping() {
        let mut inner = Fields::new();
        inner.insert("Female".into(), 0.52.into());
        inner.insert("null".into(), FieldValue::Null);
        let mut record = SchoolRecord::new("https://x/1");
        record.absorb(fields(&[
            ("Lunch", "Free".into()),
            ("Gender", FieldValue::Map(inner)),
        ]));
        let mut aggregate = Aggregate::new();
        aggregate.insert("P.S. 1", record);

        let json = serde_json::to_string(&aggregate).unwrap();
        assert_eq!(
            json,
            r#"{"P.S. 1":{"URL":"https://x/1","Lunch":"Free","Gender":{"Female":0.52,"null":null}}}"#
        );
    }

    #[test]
    fn outcome_helpers() {
        let absorbed = ExtractOutcome::absorbed(ExtractorKind::ChartData, "missing region");
        assert!(absorbed.is_absorbed());
        assert!(absorbed.fields.is_empty());
        assert_eq!(ExtractorKind::PairedBar.to_string(), "paired-bar");

        let failed = SchoolOutcome::Failed {
            url: "u".into(),
            error: "boom".into(),
        };
        assert!(failed.is_failed());
        assert_eq!(failed.url(), "u");
    }
}
