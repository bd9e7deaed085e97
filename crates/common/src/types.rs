//! Report document types
//!
//! Everything in here is serialized into `report-data.json`. Field names are
//! camelCase because the browser dashboard reads the document directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::error::{Error, Result};

/// Outcome of one test attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
    TimedOut,
    Interrupted,
}

impl TestStatus {
    /// Failed or timed out
    pub fn is_failure(&self) -> bool {
        matches!(self, TestStatus::Failed | TestStatus::TimedOut)
    }
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestStatus::Passed => write!(f, "passed"),
            TestStatus::Failed => write!(f, "failed"),
            TestStatus::Skipped => write!(f, "skipped"),
            TestStatus::TimedOut => write!(f, "timedOut"),
            TestStatus::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Rolled-up status of a suite
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SuiteStatus {
    #[default]
    Passed,
    Failed,
    Skipped,
}

/// A position in a source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

/// A structured error reported by the runner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
}

/// Test annotation (`test.info().annotations`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One line of a code excerpt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeLine {
    pub number: u32,
    pub content: String,
    pub is_current: bool,
}

/// Small source excerpt around a step location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeContext {
    pub file: String,
    pub target_line: u32,
    pub lines: Vec<CodeLine>,
}

/// A node of a test's step tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub id: String,
    pub title: String,
    pub category: String,
    pub start_time: DateTime<Utc>,
    /// Milliseconds
    pub duration: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TestError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_context: Option<CodeContext>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepRecord>,
}

impl StepRecord {
    /// Number of nodes in this subtree, including self
    pub fn node_count(&self) -> usize {
        1 + self.steps.iter().map(StepRecord::node_count).sum::<usize>()
    }
}

/// Attachment classification used by the dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Video,
    Screenshot,
    Trace,
    Other,
}

/// Attachment payload kept inside the document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "encoding", content = "data", rename_all = "lowercase")]
pub enum InlineBody {
    Utf8(String),
    Base64(String),
}

/// A test attachment, either materialized under `attachments/` or inline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRecord {
    pub name: String,
    pub content_type: String,
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    /// Attempt ordinal the attachment was produced by
    #[serde(default)]
    pub attempt: u32,
    /// Path relative to the output directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<InlineBody>,
}

/// Snapshot of one execution attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryAttempt {
    pub attempt: u32,
    pub status: TestStatus,
    pub duration: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<TestError>,
}

/// One logical test, after all of its attempts were reconciled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRecord {
    pub id: String,
    pub title: String,
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub status: TestStatus,
    pub duration: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub errors: Vec<TestError>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    #[serde(default)]
    pub steps: Vec<StepRecord>,
    #[serde(default)]
    pub attachments: Vec<AttachmentRecord>,
    pub retries: u32,
    pub worker_index: i32,
    pub project: String,
    pub is_flaky: bool,
    #[serde(default)]
    pub describe_blocks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_history: Option<Vec<RetryAttempt>>,
}

/// All tests of one source file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteRecord {
    pub id: String,
    pub title: String,
    pub file: String,
    pub tests: Vec<TestRecord>,
    pub duration: u64,
    pub status: SuiteStatus,
}

/// Run-level facts and counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetadata {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Milliseconds
    pub duration: u64,
    pub total_tests: u32,
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub timed_out: u32,
    pub flaky: u32,
    pub runner_version: String,
    pub projects: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl RunMetadata {
    pub fn new(start_time: DateTime<Utc>) -> Self {
        Self {
            start_time,
            end_time: start_time,
            duration: 0,
            total_tests: 0,
            passed: 0,
            failed: 0,
            skipped: 0,
            timed_out: 0,
            flaky: 0,
            runner_version: String::new(),
            projects: Vec::new(),
            run_status: None,
            name: None,
            environment: None,
            version: None,
            user: None,
        }
    }

    /// Count one finalized logical test
    pub fn count(&mut self, status: TestStatus, is_flaky: bool) {
        self.total_tests += 1;
        if is_flaky {
            self.flaky += 1;
        }
        match status {
            TestStatus::Passed => self.passed += 1,
            TestStatus::Failed => self.failed += 1,
            TestStatus::Skipped => self.skipped += 1,
            TestStatus::TimedOut => self.timed_out += 1,
            TestStatus::Interrupted => {}
        }
    }
}

/// Presentation settings handed to the renderer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportConfig {
    pub output_dir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments_base_url: Option<String>,
}

/// The complete report document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportDocument {
    pub metadata: RunMetadata,
    pub suites: Vec<SuiteRecord>,
    pub config: ReportConfig,
}

impl ReportDocument {
    /// Load a persisted document
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::ReportNotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write the document as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        info!("Report data saved to: {}", path.display());
        Ok(())
    }

    /// Iterate over every test of every suite
    pub fn tests(&self) -> impl Iterator<Item = &TestRecord> {
        self.suites.iter().flat_map(|s| s.tests.iter())
    }

    /// Find a test by id
    pub fn find_test(&self, id: &str) -> Option<&TestRecord> {
        self.tests().find(|t| t.id == id)
    }
}
