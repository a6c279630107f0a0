use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    Pdf,
    Text,
}

#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub id: String,
    pub source_path: String,
    pub format: SourceFormat,
    pub raw_text: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    Empty,
    TooShort,
    LowTextDensity,
}

impl InvalidReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::TooShort => "too_short",
            Self::LowTextDensity => "low_text_density",
        }
    }
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "verdict", content = "reason")]
pub enum Verdict {
    Valid,
    Invalid(InvalidReason),
}

impl Verdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    pub fn reason(&self) -> Option<InvalidReason> {
        match self {
            Self::Valid => None,
            Self::Invalid(reason) => Some(*reason),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Document {
    id: String,
    source_path: String,
    normalized_text: String,
    verdict: Verdict,
}

impl Document {
    pub fn new(source: SourceDocument, normalized_text: String, verdict: Verdict) -> Self {
        Self {
            id: source.id,
            source_path: source.source_path,
            normalized_text,
            verdict,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source_path(&self) -> &str {
        &self.source_path
    }

    pub fn normalized_text(&self) -> &str {
        &self.normalized_text
    }

    pub fn verdict(&self) -> Verdict {
        self.verdict
    }

    pub fn is_valid(&self) -> bool {
        self.verdict.is_valid()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ClauseKind {
    Termination,
    Confidentiality,
    Liability,
}

impl ClauseKind {
    pub const ALL: [ClauseKind; 3] = [
        ClauseKind::Termination,
        ClauseKind::Confidentiality,
        ClauseKind::Liability,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Termination => "termination",
            Self::Confidentiality => "confidentiality",
            Self::Liability => "liability",
        }
    }

    pub fn response_key(&self) -> &'static str {
        match self {
            Self::Termination => "termination_clause",
            Self::Confidentiality => "confidentiality_clause",
            Self::Liability => "liability_clause",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(value.trim()))
    }
}

impl fmt::Display for ClauseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extracted text for one clause. Serialized as a string, or `null` when the
/// clause was not found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum ClauseValue {
    Found(String),
    NotFound,
}

impl ClauseValue {
    pub fn found(text: impl Into<String>) -> Self {
        let text = text.into();
        if text.trim().is_empty() {
            Self::NotFound
        } else {
            Self::Found(text)
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Found(text) => Some(text),
            Self::NotFound => None,
        }
    }
}

impl From<Option<String>> for ClauseValue {
    fn from(value: Option<String>) -> Self {
        value.map(ClauseValue::found).unwrap_or(ClauseValue::NotFound)
    }
}

impl From<ClauseValue> for Option<String> {
    fn from(value: ClauseValue) -> Self {
        match value {
            ClauseValue::Found(text) => Some(text),
            ClauseValue::NotFound => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClauseSet {
    pub termination: ClauseValue,
    pub confidentiality: ClauseValue,
    pub liability: ClauseValue,
    pub summary: Option<String>,
}

impl ClauseSet {
    pub fn not_found() -> Self {
        Self {
            termination: ClauseValue::NotFound,
            confidentiality: ClauseValue::NotFound,
            liability: ClauseValue::NotFound,
            summary: None,
        }
    }

    pub fn get(&self, kind: ClauseKind) -> &ClauseValue {
        match kind {
            ClauseKind::Termination => &self.termination,
            ClauseKind::Confidentiality => &self.confidentiality,
            ClauseKind::Liability => &self.liability,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ClauseKind, &ClauseValue)> {
        ClauseKind::ALL.into_iter().map(move |kind| (kind, self.get(kind)))
    }

    pub fn found_count(&self) -> usize {
        self.iter().filter(|(_, value)| value.is_found()).count()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    Success,
    ExtractionFailed,
    Cancelled,
}

impl ExtractionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::ExtractionFailed => "extraction_failed",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    MalformedResponse,
    ServiceUnavailable,
    ServiceRejected,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MalformedResponse => "malformed_response",
            Self::ServiceUnavailable => "service_unavailable",
            Self::ServiceRejected => "service_rejected",
        }
    }
}

impl fmt::Display for ExtractionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRecord {
    pub document_id: String,
    pub source_path: String,
    pub content_sha256: String,
    pub clauses: ClauseSet,
    pub status: ExtractionStatus,
    pub failure_kind: Option<FailureKind>,
    pub attempts: u32,
    pub latency_ms: u64,
    pub model: String,
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl ExtractionRecord {
    pub fn is_success(&self) -> bool {
        self.status == ExtractionStatus::Success
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedDocument {
    pub document_id: String,
    pub source_path: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingFailure {
    pub id: String,
    pub document_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IndexGranularity {
    Document,
    #[default]
    Clause,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub document_id: String,
    pub clause: Option<ClauseKind>,
    pub score: f32,
    pub preview: String,
}
