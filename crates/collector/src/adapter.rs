//! Host adapter for the runner's JSON-lines event stream
//!
//! Each line is one runner-native event object tagged by `"type"`:
//!
//! ```text
//! {"type":"begin","config":{...},"suite":{...}}
//! {"type":"testEnd","test":{...},"result":{...}}
//! {"type":"end","result":{"status":"passed"}}
//! ```
//!
//! The wire structs below mirror the runner's field names and stay private
//! to this module; everything handed to a [`Reporter`] is a value from
//! [`crate::input`].

use std::path::PathBuf;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use playreport_common::{Annotation, SourceLocation, TestError, TestStatus};
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

use crate::error::{CollectorError, CollectorResult};
use crate::input::{
    AncestorSuite, AttemptResult, BodyBytes, RawAttachment, RawStep, RunInfo, SuiteKind,
    SuiteNode, TestCase, TestIdentity,
};
use crate::reporter::Reporter;

/// Project name used when the runner gives none
pub const DEFAULT_PROJECT: &str = "default";

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum WireEvent {
    Begin {
        #[serde(default)]
        config: WireConfig,
        #[serde(default)]
        suite: WireSuite,
    },
    TestEnd {
        test: WireTest,
        result: WireResult,
    },
    End {
        #[serde(default)]
        result: Option<WireRunResult>,
    },
}

#[derive(Debug, Default, Deserialize)]
struct WireConfig {
    #[serde(default)]
    version: String,
    #[serde(default)]
    projects: Vec<WireProject>,
}

#[derive(Debug, Deserialize)]
struct WireProject {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct WireSuite {
    #[serde(default)]
    title: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    location: Option<WireLocation>,
    #[serde(default)]
    tests: Vec<WireTest>,
    #[serde(default)]
    suites: Vec<WireSuite>,
}

#[derive(Debug, Clone, Deserialize)]
struct WireLocation {
    #[serde(default)]
    file: String,
    #[serde(default)]
    line: u32,
    #[serde(default)]
    column: Option<u32>,
}

impl From<WireLocation> for SourceLocation {
    fn from(l: WireLocation) -> Self {
        SourceLocation {
            file: l.file,
            line: l.line,
            column: l.column,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTest {
    #[serde(default)]
    title: String,
    #[serde(default)]
    location: Option<WireLocation>,
    #[serde(default)]
    project_name: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    annotations: Vec<Annotation>,
    /// Innermost first
    #[serde(default)]
    parents: Option<Vec<WireParent>>,
    #[serde(default)]
    title_path: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct WireParent {
    #[serde(default)]
    title: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResult {
    #[serde(default)]
    retry: u32,
    #[serde(default)]
    worker_index: i32,
    status: TestStatus,
    #[serde(default)]
    duration: f64,
    #[serde(default)]
    start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    errors: Vec<WireError>,
    #[serde(default)]
    attachments: Vec<WireAttachment>,
    #[serde(default)]
    steps: Vec<WireStep>,
    #[serde(default)]
    annotations: Vec<Annotation>,
}

#[derive(Debug, Deserialize)]
struct WireError {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    stack: Option<String>,
    #[serde(default)]
    location: Option<WireLocation>,
}

impl From<WireError> for TestError {
    fn from(e: WireError) -> Self {
        TestError {
            message: e
                .message
                .or(e.value)
                .unwrap_or_else(|| "Unknown error".to_string()),
            stack: e.stack,
            location: e.location.map(Into::into),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireAttachment {
    #[serde(default)]
    name: String,
    #[serde(default)]
    content_type: String,
    #[serde(default)]
    path: Option<PathBuf>,
    #[serde(default)]
    body: Option<WireBody>,
}

/// Either a Node `Buffer` serialized as `{"type":"Buffer","data":[..]}` or a
/// string holding base64 or plain text
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireBody {
    Buffer { data: Vec<u8> },
    Encoded(String),
}

fn is_textual(content_type: &str) -> bool {
    let content_type = content_type.to_ascii_lowercase();
    content_type.starts_with("text/") || content_type.contains("json") || content_type.contains("xml")
}

/// Textual content types keep string bodies as text; otherwise a string is
/// base64 when it decodes as such, and text when it does not.
fn body_bytes(content_type: &str, body: WireBody) -> BodyBytes {
    match body {
        WireBody::Buffer { data } => BodyBytes::Raw(data),
        WireBody::Encoded(s) if is_textual(content_type) => BodyBytes::Text(s),
        WireBody::Encoded(s) => match STANDARD.decode(s.trim()) {
            Ok(_) => BodyBytes::Base64(s),
            Err(_) => BodyBytes::Text(s),
        },
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireStep {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    title_path: Vec<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    duration: f64,
    #[serde(default)]
    error: Option<WireError>,
    #[serde(default)]
    location: Option<WireLocation>,
    #[serde(default)]
    steps: Vec<WireStep>,
}

impl From<WireStep> for RawStep {
    fn from(s: WireStep) -> Self {
        RawStep {
            title: s.title,
            title_path: s.title_path,
            category: s.category,
            start_time: s.start_time,
            duration_ms: millis(s.duration),
            error: s.error.map(Into::into),
            location: s.location.map(Into::into),
            steps: s.steps.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireRunResult {
    #[serde(default)]
    status: Option<String>,
}

/// A decoded lifecycle event
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    Begin { info: RunInfo, root: SuiteNode },
    AttemptEnd { case: TestCase, attempt: AttemptResult },
    End { status: Option<String> },
}

/// What a stream replay did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StreamSummary {
    pub events: usize,
    pub attempts: usize,
    pub malformed: usize,
    /// Whether the stream carried its own `end` event
    pub ended: bool,
    pub report: Option<PathBuf>,
}

fn millis(duration: f64) -> u64 {
    if duration.is_finite() && duration > 0.0 {
        duration.round() as u64
    } else {
        0
    }
}

fn suite_kind(kind: Option<&str>) -> SuiteKind {
    match kind {
        Some("root") => SuiteKind::Root,
        Some("project") => SuiteKind::Project,
        Some("file") => SuiteKind::File,
        _ => SuiteKind::Describe,
    }
}

/// Ancestors from `["", project, file, ...describes, title]`, innermost first
fn ancestors_from_title_path(title_path: &[String]) -> Vec<AncestorSuite> {
    let Some((_, parents)) = title_path.split_last() else {
        return Vec::new();
    };
    let mut ancestors: Vec<AncestorSuite> = parents
        .iter()
        .enumerate()
        .map(|(depth, title)| {
            let kind = match depth {
                0 => SuiteKind::Root,
                1 => SuiteKind::Project,
                2 => SuiteKind::File,
                _ => SuiteKind::Describe,
            };
            AncestorSuite::new(title.clone(), kind)
        })
        .collect();
    ancestors.reverse();
    ancestors
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.trim().is_empty())
}

/// Map a wire test to a `TestCase`. `inherited` carries the project and the
/// ancestor chain (innermost first) known from a suite-tree walk.
fn test_case(test: WireTest, inherited: Option<(&str, &[AncestorSuite])>) -> TestCase {
    let project = non_empty(test.project_name.as_deref())
        .or_else(|| inherited.and_then(|(p, _)| non_empty(Some(p))))
        .or_else(|| non_empty(test.title_path.get(1).map(String::as_str)))
        .unwrap_or(DEFAULT_PROJECT)
        .to_string();

    let ancestors = match (test.parents, inherited) {
        (Some(parents), _) => parents
            .into_iter()
            .map(|p| AncestorSuite::new(p.title, suite_kind(p.kind.as_deref())))
            .collect(),
        (None, Some((_, chain))) => chain.to_vec(),
        (None, None) => ancestors_from_title_path(&test.title_path),
    };

    let (file, line, column) = match test.location {
        Some(l) => (l.file, l.line, l.column),
        None => (String::new(), 0, None),
    };

    TestCase {
        identity: TestIdentity::new(project, file, line, test.title),
        column,
        ancestors,
        tags: test.tags,
        annotations: test.annotations,
    }
}

/// Convert a suite subtree. `chain` is the ancestor chain of `suite`'s
/// children, outermost first.
fn suite_node(suite: WireSuite, project: Option<&str>, chain: &mut Vec<AncestorSuite>) -> SuiteNode {
    let kind = suite_kind(suite.kind.as_deref());
    let project = if kind == SuiteKind::Project {
        Some(suite.title.clone())
    } else {
        project.map(str::to_string)
    };

    chain.push(AncestorSuite::new(suite.title.clone(), kind));
    let innermost_first: Vec<AncestorSuite> = chain.iter().rev().cloned().collect();

    let tests = suite
        .tests
        .into_iter()
        .map(|t| test_case(t, Some((project.as_deref().unwrap_or_default(), innermost_first.as_slice()))))
        .collect();
    let suites = suite
        .suites
        .into_iter()
        .map(|child| suite_node(child, project.as_deref(), chain))
        .collect();
    chain.pop();

    SuiteNode {
        title: suite.title,
        kind,
        file: suite.location.map(|l| l.file).filter(|f| !f.is_empty()),
        tests,
        suites,
    }
}

fn attempt_result(result: WireResult) -> AttemptResult {
    AttemptResult {
        retry: result.retry,
        worker_index: result.worker_index,
        status: result.status,
        duration_ms: millis(result.duration),
        start_time: result.start_time.unwrap_or_else(Utc::now),
        errors: result.errors.into_iter().map(Into::into).collect(),
        attachments: result
            .attachments
            .into_iter()
            .map(|a| {
                let body = a.body.map(|b| body_bytes(&a.content_type, b));
                RawAttachment {
                    name: a.name,
                    content_type: a.content_type,
                    path: a.path,
                    body,
                }
            })
            .collect(),
        steps: result.steps.into_iter().map(Into::into).collect(),
        annotations: result.annotations,
    }
}

/// Decode one line of the stream. `line_no` is only used in the error.
pub fn parse_event(line: &str, line_no: usize) -> CollectorResult<RunEvent> {
    let event: WireEvent =
        serde_json::from_str(line).map_err(|e| CollectorError::MalformedEvent {
            line: line_no,
            reason: e.to_string(),
        })?;

    Ok(match event {
        WireEvent::Begin { config, suite } => {
            let info = RunInfo {
                runner_version: config.version,
                projects: config
                    .projects
                    .into_iter()
                    .map(|p| p.name)
                    .filter(|n| !n.is_empty())
                    .collect(),
            };
            let root = suite_node(suite, None, &mut Vec::new());
            RunEvent::Begin { info, root }
        }
        WireEvent::TestEnd { test, result } => RunEvent::AttemptEnd {
            case: test_case(test, None),
            attempt: attempt_result(result),
        },
        WireEvent::End { result } => RunEvent::End {
            status: result.and_then(|r| r.status),
        },
    })
}

/// Replay an event stream into a reporter. Malformed lines are skipped with
/// a warning; a stream without an `end` event is finalized when it closes.
pub async fn drive<R, P>(reader: R, reporter: &mut P) -> CollectorResult<StreamSummary>
where
    R: AsyncBufRead + Unpin,
    P: Reporter + ?Sized,
{
    let mut lines = reader.lines();
    let mut summary = StreamSummary::default();
    let mut line_no = 0;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }

        let event = match parse_event(&line, line_no) {
            Ok(event) => event,
            Err(e) => {
                warn!("Skipping event: {}", e);
                summary.malformed += 1;
                continue;
            }
        };
        summary.events += 1;

        match event {
            RunEvent::Begin { info, root } => reporter.on_run_start(&info, &root),
            RunEvent::AttemptEnd { case, attempt } => {
                debug!("Attempt {} of {} ended: {}", attempt.retry, case.identity, attempt.status);
                summary.attempts += 1;
                reporter.on_test_attempt_end(&case, attempt);
            }
            RunEvent::End { status } => {
                if summary.ended {
                    warn!("Duplicate end event on line {}", line_no);
                    continue;
                }
                summary.ended = true;
                summary.report = reporter.on_run_end(status);
            }
        }
    }

    if !summary.ended {
        info!("Event stream closed without an end event; finalizing");
        summary.report = reporter.on_run_end(None);
    }
    Ok(summary)
}
