use crate::error::SinkError;
use crate::index::VectorIndex;
use crate::models::{
    ClauseKind, EmbeddingFailure, ExtractionRecord, ExtractionStatus, SkippedDocument,
};
use crate::prompt::NOT_FOUND_MARKER;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const RESULTS_FILE_STEM: &str = "contract_extractions";

/// One record per document id, in first-insertion order. Inserting a record
/// for an id already present replaces it in place.
#[derive(Debug, Default)]
pub struct ResultStore {
    records: Vec<ExtractionRecord>,
    positions: HashMap<String, usize>,
    skipped: Vec<SkippedDocument>,
    embedding_failures: Vec<EmbeddingFailure>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: ExtractionRecord) -> Option<ExtractionRecord> {
        match self.positions.get(&record.document_id) {
            Some(&position) => Some(std::mem::replace(&mut self.records[position], record)),
            None => {
                self.positions
                    .insert(record.document_id.clone(), self.records.len());
                self.records.push(record);
                None
            }
        }
    }

    pub fn get(&self, document_id: &str) -> Option<&ExtractionRecord> {
        self.positions
            .get(document_id)
            .map(|&position| &self.records[position])
    }

    pub fn records(&self) -> &[ExtractionRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn skip(&mut self, skipped: SkippedDocument) {
        self.skipped.push(skipped);
    }

    pub fn record_embedding_failures(&mut self, failures: Vec<EmbeddingFailure>) {
        self.embedding_failures.extend(failures);
    }

    pub fn into_report(self, index: Option<VectorIndex>) -> RunReport {
        RunReport {
            records: self.records,
            skipped: self.skipped,
            embedding_failures: self.embedding_failures,
            index,
        }
    }
}

#[derive(Debug)]
pub struct RunReport {
    pub records: Vec<ExtractionRecord>,
    pub skipped: Vec<SkippedDocument>,
    pub embedding_failures: Vec<EmbeddingFailure>,
    pub index: Option<VectorIndex>,
}

impl RunReport {
    pub fn stats(&self) -> RunStats {
        RunStats::from_records(&self.records, self.skipped.len())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub skipped: usize,
    pub found: Vec<(ClauseKind, usize)>,
}

impl RunStats {
    pub fn from_records(records: &[ExtractionRecord], skipped: usize) -> Self {
        let count = |status: ExtractionStatus| {
            records
                .iter()
                .filter(|record| record.status == status)
                .count()
        };

        let found = ClauseKind::ALL
            .iter()
            .map(|&kind| {
                let hits = records
                    .iter()
                    .filter(|record| record.is_success())
                    .filter(|record| record.clauses.get(kind).is_found())
                    .count();
                (kind, hits)
            })
            .collect();

        Self {
            processed: records.len(),
            succeeded: count(ExtractionStatus::Success),
            failed: count(ExtractionStatus::ExtractionFailed),
            cancelled: count(ExtractionStatus::Cancelled),
            skipped,
            found,
        }
    }
}

pub fn timestamped_path(dir: &Path, extension: &str, at: DateTime<Utc>) -> PathBuf {
    dir.join(format!(
        "{RESULTS_FILE_STEM}_{}.{extension}",
        at.format("%Y%m%d_%H%M%S")
    ))
}

fn ensure_parent(path: &Path) -> Result<(), SinkError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

pub fn write_json(path: &Path, records: &[ExtractionRecord]) -> Result<(), SinkError> {
    ensure_parent(path)?;
    let payload = serde_json::to_string_pretty(records)?;
    fs::write(path, payload)?;
    Ok(())
}

pub fn read_json(path: &Path) -> Result<Vec<ExtractionRecord>, SinkError> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

const CSV_HEADER: [&str; 12] = [
    "document_id",
    "source_path",
    "status",
    "failure_kind",
    "attempts",
    "latency_ms",
    "model",
    "termination",
    "confidentiality",
    "liability",
    "summary",
    "error",
];

pub fn write_csv(path: &Path, records: &[ExtractionRecord]) -> Result<(), SinkError> {
    ensure_parent(path)?;

    let mut out = String::new();
    push_row(&mut out, CSV_HEADER.iter().map(|field| field.to_string()));

    for record in records {
        let mut row = vec![
            record.document_id.clone(),
            record.source_path.clone(),
            record.status.as_str().to_string(),
            record
                .failure_kind
                .map(|kind| kind.as_str().to_string())
                .unwrap_or_default(),
            record.attempts.to_string(),
            record.latency_ms.to_string(),
            record.model.clone(),
        ];
        for (_, value) in record.clauses.iter() {
            row.push(value.text().unwrap_or(NOT_FOUND_MARKER).to_string());
        }
        row.push(record.clauses.summary.clone().unwrap_or_default());
        row.push(record.error.clone().unwrap_or_default());
        push_row(&mut out, row.into_iter());
    }

    fs::write(path, out)?;
    Ok(())
}

fn push_row(out: &mut String, fields: impl Iterator<Item = String>) {
    let line = fields
        .map(|field| escape_csv(&field))
        .collect::<Vec<_>>()
        .join(",");
    out.push_str(&line);
    out.push('\n');
}

fn escape_csv(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClauseSet, ClauseValue, FailureKind};
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn record(id: &str, status: ExtractionStatus, termination: Option<&str>) -> ExtractionRecord {
        let mut clauses = ClauseSet::not_found();
        if let Some(text) = termination {
            clauses.termination = ClauseValue::found(text);
        }
        ExtractionRecord {
            document_id: id.to_string(),
            source_path: format!("contracts/{id}.pdf"),
            content_sha256: "abc".to_string(),
            clauses,
            status,
            failure_kind: (status == ExtractionStatus::ExtractionFailed)
                .then_some(FailureKind::ServiceUnavailable),
            attempts: 1,
            latency_ms: 12,
            model: "test-model".to_string(),
            error: None,
            completed_at: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
        }
    }

    #[test]
    fn insert_replaces_records_by_document_id() {
        let mut store = ResultStore::new();
        assert!(store
            .insert(record("a", ExtractionStatus::ExtractionFailed, None))
            .is_none());
        store.insert(record("b", ExtractionStatus::Success, None));
        let previous = store.insert(record("a", ExtractionStatus::Success, Some("30 days")));

        assert_eq!(store.len(), 2);
        assert_eq!(previous.map(|old| old.status), Some(ExtractionStatus::ExtractionFailed));
        assert_eq!(store.records()[0].document_id, "a");
        assert!(store.get("a").is_some_and(|record| record.is_success()));
    }

    #[test]
    fn stats_count_statuses_and_found_clauses() {
        let mut store = ResultStore::new();
        store.insert(record("a", ExtractionStatus::Success, Some("30 days notice")));
        store.insert(record("b", ExtractionStatus::Success, None));
        store.insert(record("c", ExtractionStatus::ExtractionFailed, None));
        store.insert(record("d", ExtractionStatus::Cancelled, None));
        store.skip(SkippedDocument {
            document_id: "e".to_string(),
            source_path: "contracts/e.pdf".to_string(),
            reason: "too_short".to_string(),
        });

        let stats = store.into_report(None).stats();
        assert_eq!(stats.processed, 4);
        assert_eq!(stats.succeeded, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.cancelled, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.found[0], (ClauseKind::Termination, 1));
        assert_eq!(stats.found[2], (ClauseKind::Liability, 0));
    }

    #[test]
    fn json_results_can_be_read_back() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("out").join("results.json");
        let records = vec![
            record("a", ExtractionStatus::Success, Some("Either party may terminate.")),
            record("b", ExtractionStatus::ExtractionFailed, None),
        ];

        write_json(&path, &records)?;
        assert_eq!(read_json(&path)?, records);
        Ok(())
    }

    #[test]
    fn csv_marks_missing_clauses_and_escapes_fields() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("results.csv");
        let records = vec![record(
            "a",
            ExtractionStatus::Success,
            Some("Terminate on 30 days' notice, in \"writing\"."),
        )];

        write_csv(&path, &records)?;
        let csv = fs::read_to_string(&path)?;
        let lines: Vec<_> = csv.lines().collect();

        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("document_id,source_path,status"));
        assert!(lines[1].contains("\"Terminate on 30 days' notice, in \"\"writing\"\".\""));
        assert!(lines[1].contains(NOT_FOUND_MARKER));
        Ok(())
    }

    #[test]
    fn output_names_carry_a_timestamp() {
        let at = Utc.with_ymd_and_hms(2026, 3, 9, 14, 5, 0).unwrap();
        let path = timestamped_path(Path::new("out"), "csv", at);
        assert_eq!(path, Path::new("out").join("contract_extractions_20260309_140500.csv"));
    }
}
