//! Pipeline orchestrator: Source -> Normalize -> Enrich -> Transform ->
//! Validate -> Sink
//!
//! Stages run strictly in sequence with per-stage wall-clock timing.
//! Normalize and Enrich are identity passes today: parsers normalize
//! upstream and metadata arrives pre-fetched from the resolver. The coverage
//! gate runs before any stage; when it fails only the diagnostic artifact is
//! written - no output, no report.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::coverage::CoverageGate;
use crate::resolver::SubjectMetadata;
use crate::rows::{self, Row};
use crate::rules::{self, RuleContext};
use crate::settings::Settings;
use crate::validation::{NoopValidator, RowValidator};

pub const OUTPUT_FILE_NAME: &str = "verified.json";
pub const REPORT_FILE_NAME: &str = "report.json";
pub const COVERAGE_FILE_NAME: &str = "coverage.txt";

/// Rows embedded in the report samples
const SAMPLE_ROWS: usize = 100;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Output sink received no rows")]
    EmptyInput,
    #[error("Artifact persistence failed: {0}")]
    Persist(String),
}

/// Everything one pipeline invocation needs, passed explicitly
pub struct PipelineConfig {
    /// Already-parsed input rows
    pub rows: Vec<Row>,
    /// Metadata resolved upstream, keyed by subject id
    pub metadata: HashMap<String, SubjectMetadata>,
    pub settings: Settings,
    /// Directory receiving output, report, and diagnostic artifacts
    pub artifact_dir: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Counts {
    #[serde(rename = "in")]
    pub rows_in: usize,
    #[serde(rename = "out")]
    pub rows_out: usize,
    pub errors: usize,
}

/// Wall-clock milliseconds per stage
#[derive(Debug, Clone, Default, Serialize)]
pub struct StageTimings {
    pub source: u64,
    pub normalize: u64,
    pub enrich: u64,
    pub transform: u64,
    pub validate: u64,
    pub sink: u64,
}

/// Outcome of one pipeline invocation
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub ok: bool,
    pub counts: Counts,
    pub timings: StageTimings,
    /// SHA-256 hex of the output artifact bytes; empty when no output was
    /// written (coverage abort)
    pub artifact_hash: String,
    pub notes: Vec<String>,
}

/// Report artifact written next to the output
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RunReport<'a> {
    ok: bool,
    run_id: uuid::Uuid,
    generated_at: DateTime<Utc>,
    artifact_dir: String,
    report_path: String,
    counts: &'a Counts,
    timings: &'a StageTimings,
    notes: &'a [String],
    artifact_hash: &'a str,
    source_data_sample: &'a [Row],
    output_data_sample: &'a [Row],
    source_data_count: usize,
    output_data_count: usize,
}

/// Writes the transformed row set to the output artifact
pub trait OutputSink {
    fn write(&self, rows: &[Row], path: &Path) -> Result<(), PipelineError>;
}

/// Default sink: pretty-printed JSON array, written atomically
#[derive(Default)]
pub struct JsonOutputSink;

impl OutputSink for JsonOutputSink {
    fn write(&self, rows: &[Row], path: &Path) -> Result<(), PipelineError> {
        if rows.is_empty() {
            return Err(PipelineError::EmptyInput);
        }
        let bytes = serde_json::to_vec_pretty(rows)?;
        write_atomic(path, &bytes)
    }
}

pub struct PipelineOrchestrator {
    sink: Box<dyn OutputSink>,
    validator: Box<dyn RowValidator>,
}

impl Default for PipelineOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineOrchestrator {
    pub fn new() -> Self {
        Self {
            sink: Box::new(JsonOutputSink),
            validator: Box::new(NoopValidator),
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn OutputSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_validator(mut self, validator: Box<dyn RowValidator>) -> Self {
        self.validator = validator;
        self
    }

    /// Run the full pipeline. Coverage failure returns `ok=false` with the
    /// diagnostic written and nothing else; I/O failure is fatal.
    pub fn run(&self, config: &PipelineConfig) -> Result<RunResult, PipelineError> {
        std::fs::create_dir_all(&config.artifact_dir)?;

        let subject_ids = rows::subject_ids(&config.rows, &config.settings.subject_column);
        if let Err(diagnostic) = CoverageGate::check(&subject_ids, &config.metadata) {
            let diagnostic_path = config.artifact_dir.join(COVERAGE_FILE_NAME);
            write_atomic(&diagnostic_path, diagnostic.render().as_bytes())?;
            return Ok(RunResult {
                ok: false,
                counts: Counts {
                    rows_in: config.rows.len(),
                    rows_out: 0,
                    errors: diagnostic.missing,
                },
                timings: StageTimings::default(),
                artifact_hash: String::new(),
                notes: vec![
                    format!(
                        "coverage gate failed: {} of {} subjects have no email signal",
                        diagnostic.missing, diagnostic.total_ids
                    ),
                    format!("diagnostic written to {}", diagnostic_path.display()),
                ],
            });
        }

        let mut timings = StageTimings::default();

        // Source: rows arrive already typed from the external parser
        let (source_rows, elapsed) = timed(|| config.rows.clone());
        timings.source = elapsed;

        // Normalize: identity pass, parsers normalize upstream
        let (normalized, elapsed) = timed(|| source_rows);
        timings.normalize = elapsed;

        // Enrich: identity pass, metadata was fetched before the pipeline
        let (enriched, elapsed) = timed(|| normalized);
        timings.enrich = elapsed;

        let settings = &config.settings;
        let (records, elapsed) = timed(|| {
            enriched
                .iter()
                .map(|row| {
                    let subject = rows::field_str(row, &settings.subject_column)
                        .map(str::trim)
                        .unwrap_or("");
                    let ctx = RuleContext {
                        metadata: config.metadata.get(subject),
                        domain_keywords: &settings.email_domain_keywords,
                        company_name: &settings.company_name,
                        email_column: &settings.email_column,
                        category_column: &settings.category_column,
                    };
                    let (decision, reason) = rules::evaluate(row, &ctx);
                    rows::annotate(row, decision, &reason)
                })
                .collect::<Vec<Row>>()
        });
        timings.transform = elapsed;

        let (errors, elapsed) = timed(|| self.validator.validate(&records));
        timings.validate = elapsed;
        for error in &errors {
            tracing::warn!("validation: {}", error);
        }

        let output_path = config.artifact_dir.join(OUTPUT_FILE_NAME);
        let sink_started = Instant::now();
        self.sink.write(&records, &output_path)?;
        let artifact_hash = calculate_sha256(&output_path)?;
        timings.sink = sink_started.elapsed().as_millis() as u64;

        let ok = errors.is_empty();
        let counts = Counts {
            rows_in: config.rows.len(),
            rows_out: records.len(),
            errors: errors.len(),
        };
        let mut notes = vec![
            format!(
                "coverage: {}/{} subjects resolved",
                subject_ids.len(),
                subject_ids.len()
            ),
            format!(
                "validator '{}' reported {} errors",
                self.validator.name(),
                errors.len()
            ),
            format!("output written to {}", output_path.display()),
        ];
        notes.extend(errors);

        let report_path = config.artifact_dir.join(REPORT_FILE_NAME);
        let report = RunReport {
            ok,
            run_id: uuid::Uuid::new_v4(),
            generated_at: Utc::now(),
            artifact_dir: config.artifact_dir.display().to_string(),
            report_path: report_path.display().to_string(),
            counts: &counts,
            timings: &timings,
            notes: &notes,
            artifact_hash: &artifact_hash,
            source_data_sample: sample(&config.rows),
            output_data_sample: sample(&records),
            source_data_count: config.rows.len(),
            output_data_count: records.len(),
        };
        write_atomic(&report_path, &serde_json::to_vec_pretty(&report)?)?;

        tracing::info!(
            ok,
            rows_in = counts.rows_in,
            rows_out = counts.rows_out,
            errors = counts.errors,
            "pipeline run complete"
        );
        Ok(RunResult {
            ok,
            counts,
            timings,
            artifact_hash,
            notes,
        })
    }
}

fn sample(rows: &[Row]) -> &[Row] {
    &rows[..rows.len().min(SAMPLE_ROWS)]
}

fn timed<T>(f: impl FnOnce() -> T) -> (T, u64) {
    let started = Instant::now();
    let value = f();
    (value, started.elapsed().as_millis() as u64)
}

/// Write bytes to a temp file in the target directory, then rename into
/// place, so readers never observe a partial artifact.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PipelineError> {
    let dir = path
        .parent()
        .ok_or_else(|| PipelineError::Persist(format!("no parent directory for {}", path.display())))?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.persist(path)
        .map_err(|e| PipelineError::Persist(e.to_string()))?;
    Ok(())
}

/// SHA-256 hex of a file's contents
pub fn calculate_sha256(path: &Path) -> Result<String, PipelineError> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
