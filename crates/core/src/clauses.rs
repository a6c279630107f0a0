use crate::cancel::CancelToken;
use crate::error::{LlmError, PipelineError, ResponseError};
use crate::models::{
    ClauseKind, ClauseSet, ClauseValue, Document, ExtractionRecord, ExtractionStatus, FailureKind,
};
use crate::prompt::{extraction_prompt, repair_prompt, NOT_FOUND_MARKER};
use crate::retry::{sleep_unless_cancelled, RetryPolicy};
use crate::traits::{CallOptions, LanguageModel};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

const SUMMARY_KEY: &str = "summary";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractionConfig {
    pub retry: RetryPolicy,
    pub call: CallOptions,
    pub few_shot: bool,
    pub max_input_chars: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            call: CallOptions::default(),
            few_shot: false,
            max_input_chars: 100_000,
        }
    }
}

impl ExtractionConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.retry.validate().map_err(PipelineError::Config)?;
        if self.max_input_chars == 0 {
            return Err(PipelineError::Config(
                "max_input_chars must be greater than 0".to_string(),
            ));
        }
        if self.call.max_tokens == 0 {
            return Err(PipelineError::Config(
                "max_tokens must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Validates a model response against the clause schema and builds the
/// clause set. Nothing is assumed about the response until it has been checked.
pub fn parse_response(response: &str) -> Result<ClauseSet, ResponseError> {
    let payload = json_payload(response);
    let value: Value = serde_json::from_str(payload)?;
    let object = value.as_object().ok_or(ResponseError::NotAnObject)?;

    for key in object.keys() {
        let known = key == SUMMARY_KEY || ClauseKind::ALL.iter().any(|kind| kind.response_key() == key);
        if !known {
            return Err(ResponseError::UnexpectedField(key.clone()));
        }
    }

    let summary = match object.get(SUMMARY_KEY) {
        None => return Err(ResponseError::MissingField(SUMMARY_KEY)),
        Some(Value::String(text)) if text.trim().is_empty() => {
            return Err(ResponseError::EmptySummary)
        }
        Some(Value::String(text)) => text.trim().to_string(),
        Some(_) => return Err(ResponseError::WrongType(SUMMARY_KEY)),
    };

    Ok(ClauseSet {
        termination: clause_field(object, ClauseKind::Termination)?,
        confidentiality: clause_field(object, ClauseKind::Confidentiality)?,
        liability: clause_field(object, ClauseKind::Liability)?,
        summary: Some(summary),
    })
}

fn clause_field(object: &Map<String, Value>, kind: ClauseKind) -> Result<ClauseValue, ResponseError> {
    let key = kind.response_key();
    match object.get(key) {
        None => Err(ResponseError::MissingField(key)),
        Some(Value::Null) => Ok(ClauseValue::NotFound),
        Some(Value::String(text)) => Ok(clause_value(text)),
        Some(_) => Err(ResponseError::WrongType(key)),
    }
}

fn clause_value(text: &str) -> ClauseValue {
    let trimmed = text.trim();
    let marker = NOT_FOUND_MARKER.to_lowercase();
    let lowered = trimmed.to_lowercase();
    if lowered.starts_with("not found") || lowered == marker {
        ClauseValue::NotFound
    } else {
        ClauseValue::found(trimmed)
    }
}

fn json_payload(response: &str) -> &str {
    let mut payload = response.trim();

    if let Some(start) = payload.find("```") {
        let after_fence = &payload[start + 3..];
        let body_start = after_fence.find('\n').map(|pos| pos + 1).unwrap_or(0);
        let body = &after_fence[body_start..];
        payload = match body.find("```") {
            Some(end) => body[..end].trim(),
            None => body.trim(),
        };
    }

    if !payload.starts_with('{') {
        if let (Some(open), Some(close)) = (payload.find('{'), payload.rfind('}')) {
            if open < close {
                payload = &payload[open..=close];
            }
        }
    }

    payload
}

pub fn content_digest(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

struct Outcome {
    clauses: ClauseSet,
    status: ExtractionStatus,
    failure_kind: Option<FailureKind>,
    attempts: u32,
    error: Option<String>,
}

impl Outcome {
    fn failed(kind: FailureKind, attempts: u32, error: String) -> Self {
        Self {
            clauses: ClauseSet::not_found(),
            status: ExtractionStatus::ExtractionFailed,
            failure_kind: Some(kind),
            attempts,
            error: Some(error),
        }
    }

    fn cancelled(attempts: u32) -> Self {
        Self {
            clauses: ClauseSet::not_found(),
            status: ExtractionStatus::Cancelled,
            failure_kind: None,
            attempts,
            error: Some("cancelled".to_string()),
        }
    }
}

#[derive(Clone)]
pub struct ClauseExtractor {
    model: Arc<dyn LanguageModel>,
    config: ExtractionConfig,
}

impl ClauseExtractor {
    pub fn new(model: Arc<dyn LanguageModel>, config: ExtractionConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self { model, config })
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    pub async fn extract_document(&self, document: &Document, cancel: &CancelToken) -> ExtractionRecord {
        let mut record = self
            .extract(document.id(), document.normalized_text(), cancel)
            .await;
        record.source_path = document.source_path().to_string();
        record
    }

    pub async fn extract(
        &self,
        document_id: &str,
        normalized_text: &str,
        cancel: &CancelToken,
    ) -> ExtractionRecord {
        let started = Instant::now();
        let input = truncate_chars(normalized_text, self.config.max_input_chars);
        if input.len() < normalized_text.len() {
            warn!(
                document_id,
                max_chars = self.config.max_input_chars,
                "contract text truncated before extraction"
            );
        }

        let outcome = self.run_attempts(document_id, input, cancel).await;
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match outcome.status {
            ExtractionStatus::Success => info!(
                document_id,
                attempts = outcome.attempts,
                found = outcome.clauses.found_count(),
                latency_ms,
                "clauses extracted"
            ),
            status => warn!(
                document_id,
                attempts = outcome.attempts,
                status = %status,
                failure = outcome.failure_kind.map(|kind| kind.as_str()).unwrap_or("none"),
                "clause extraction did not succeed"
            ),
        }

        ExtractionRecord {
            document_id: document_id.to_string(),
            source_path: String::new(),
            content_sha256: content_digest(normalized_text),
            clauses: outcome.clauses,
            status: outcome.status,
            failure_kind: outcome.failure_kind,
            attempts: outcome.attempts,
            latency_ms,
            model: self.model.model_id().to_string(),
            error: outcome.error,
            completed_at: Utc::now(),
        }
    }

    async fn run_attempts(&self, document_id: &str, input: &str, cancel: &CancelToken) -> Outcome {
        let policy = self.config.retry;
        let mut prompt = extraction_prompt(input, self.config.few_shot);
        let mut attempts = 0u32;
        let mut last_failure = (FailureKind::ServiceUnavailable, "no attempt was made".to_string());

        while attempts < policy.max_attempts {
            if cancel.is_cancelled() {
                return Outcome::cancelled(attempts);
            }
            attempts += 1;

            let call = tokio::time::timeout(
                policy.call_timeout(),
                self.model.complete(&prompt, &self.config.call),
            );
            let result = tokio::select! {
                result = call => result.unwrap_or(Err(LlmError::Timeout(policy.call_timeout_ms))),
                _ = cancel.cancelled() => return Outcome::cancelled(attempts),
            };

            let error = match result {
                Ok(response) => match parse_response(&response) {
                    Ok(clauses) => {
                        return Outcome {
                            clauses,
                            status: ExtractionStatus::Success,
                            failure_kind: None,
                            attempts,
                            error: None,
                        }
                    }
                    Err(problem) => {
                        debug!(document_id, attempt = attempts, %problem, "malformed model response");
                        prompt = repair_prompt(input, &response, &problem.to_string());
                        last_failure = (FailureKind::MalformedResponse, format!("malformed response: {problem}"));
                        continue;
                    }
                },
                Err(error) => error,
            };

            match error {
                LlmError::Rejected(details) => {
                    return Outcome::failed(FailureKind::ServiceRejected, attempts, details);
                }
                LlmError::InvalidResponse(details) => {
                    last_failure = (FailureKind::MalformedResponse, details);
                }
                transient => {
                    warn!(document_id, attempt = attempts, error = %transient, "transient model failure");
                    last_failure = (FailureKind::ServiceUnavailable, transient.to_string());
                    if attempts < policy.max_attempts
                        && !sleep_unless_cancelled(policy.backoff(attempts), cancel).await
                    {
                        return Outcome::cancelled(attempts);
                    }
                }
            }
        }

        let (kind, error) = last_failure;
        Outcome::failed(kind, attempts, error)
    }
}
