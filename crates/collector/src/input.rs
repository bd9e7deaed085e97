//! Runner-independent input values
//!
//! The host adapter maps runner-native objects into these types. Nothing past
//! this module references host-specific shapes.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use playreport_common::{Annotation, InlineBody, SourceLocation, TestError, TestStatus};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

use crate::error::CollectorResult;

/// Logical test identity: (project, file, line, title)
///
/// Stable across retries of one test, distinct for same-titled tests of
/// different projects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TestIdentity {
    pub project: String,
    pub file: String,
    pub line: u32,
    pub title: String,
}

impl TestIdentity {
    pub fn new(
        project: impl Into<String>,
        file: impl Into<String>,
        line: u32,
        title: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            file: file.into(),
            line,
            title: title.into(),
        }
    }

    /// Document id of the test, derived from the identity tuple
    pub fn test_id(&self) -> String {
        let line = self.line.to_string();
        let mut hasher = Sha256::new();
        for part in [
            self.project.as_str(),
            self.file.as_str(),
            line.as_str(),
            self.title.as_str(),
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        format!("test_{}", &hex::encode(hasher.finalize())[..12])
    }
}

impl std::fmt::Display for TestIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}:{} › {}", self.project, self.file, self.line, self.title)
    }
}

/// Kind of a node in the runner's suite hierarchy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SuiteKind {
    Root,
    Project,
    File,
    #[default]
    Describe,
}

/// One frame of a test's ancestor chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AncestorSuite {
    pub title: String,
    pub kind: SuiteKind,
}

impl AncestorSuite {
    pub fn new(title: impl Into<String>, kind: SuiteKind) -> Self {
        Self {
            title: title.into(),
            kind,
        }
    }
}

/// A test case as described by the runner
#[derive(Debug, Clone, PartialEq)]
pub struct TestCase {
    pub identity: TestIdentity,
    pub column: Option<u32>,
    /// Parent chain, innermost first
    pub ancestors: Vec<AncestorSuite>,
    /// Tags declared through the runner, inherited ones included
    pub tags: Vec<String>,
    pub annotations: Vec<Annotation>,
}

impl TestCase {
    pub fn new(identity: TestIdentity) -> Self {
        Self {
            identity,
            column: None,
            ancestors: Vec::new(),
            tags: Vec::new(),
            annotations: Vec::new(),
        }
    }

    pub fn with_ancestors(mut self, ancestors: Vec<AncestorSuite>) -> Self {
        self.ancestors = ancestors;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

/// A node of the discovered suite tree
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SuiteNode {
    pub title: String,
    pub kind: SuiteKind,
    pub file: Option<String>,
    pub tests: Vec<TestCase>,
    pub suites: Vec<SuiteNode>,
}

impl SuiteNode {
    /// Number of tests in this subtree
    pub fn test_count(&self) -> usize {
        self.tests.len() + self.suites.iter().map(SuiteNode::test_count).sum::<usize>()
    }

    /// All tests of this subtree, depth-first
    pub fn all_tests(&self) -> Vec<&TestCase> {
        let mut out: Vec<&TestCase> = self.tests.iter().collect();
        for suite in &self.suites {
            out.extend(suite.all_tests());
        }
        out
    }
}

/// Run-level facts delivered at run start
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunInfo {
    pub runner_version: String,
    pub projects: Vec<String>,
}

/// Inline attachment payload as handed over by the runner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyBytes {
    Raw(Vec<u8>),
    Base64(String),
    Text(String),
}

impl BodyBytes {
    /// Decode into raw bytes
    pub fn decode(&self) -> CollectorResult<Vec<u8>> {
        match self {
            BodyBytes::Raw(bytes) => Ok(bytes.clone()),
            BodyBytes::Base64(encoded) => Ok(STANDARD.decode(encoded.trim())?),
            BodyBytes::Text(text) => Ok(text.as_bytes().to_vec()),
        }
    }

    /// Representation kept in the document when nothing is written to disk
    pub fn into_inline(self) -> InlineBody {
        match self {
            BodyBytes::Raw(bytes) => match String::from_utf8(bytes) {
                Ok(text) => InlineBody::Utf8(text),
                Err(e) => InlineBody::Base64(STANDARD.encode(e.into_bytes())),
            },
            BodyBytes::Base64(encoded) => InlineBody::Base64(encoded),
            BodyBytes::Text(text) => InlineBody::Utf8(text),
        }
    }
}

/// Attachment descriptor before materialization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAttachment {
    pub name: String,
    pub content_type: String,
    pub path: Option<PathBuf>,
    pub body: Option<BodyBytes>,
}

impl RawAttachment {
    pub fn from_path(
        name: impl Into<String>,
        content_type: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            path: Some(path.into()),
            body: None,
        }
    }

    pub fn from_body(
        name: impl Into<String>,
        content_type: impl Into<String>,
        body: BodyBytes,
    ) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            path: None,
            body: Some(body),
        }
    }
}

/// A runner-native step node, before normalization
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawStep {
    pub title: Option<String>,
    pub title_path: Vec<String>,
    pub category: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub error: Option<TestError>,
    pub location: Option<SourceLocation>,
    pub steps: Vec<RawStep>,
}

/// Result of one execution attempt
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptResult {
    /// Runner retry ordinal, 0 for the initial attempt
    pub retry: u32,
    pub worker_index: i32,
    pub status: TestStatus,
    pub duration_ms: u64,
    pub start_time: DateTime<Utc>,
    pub errors: Vec<TestError>,
    pub attachments: Vec<RawAttachment>,
    pub steps: Vec<RawStep>,
    pub annotations: Vec<Annotation>,
}

impl AttemptResult {
    pub fn new(retry: u32, status: TestStatus, start_time: DateTime<Utc>, duration_ms: u64) -> Self {
        Self {
            retry,
            worker_index: 0,
            status,
            duration_ms,
            start_time,
            errors: Vec::new(),
            attachments: Vec::new(),
            steps: Vec::new(),
            annotations: Vec::new(),
        }
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        let millis = i64::try_from(self.duration_ms).unwrap_or(i64::MAX);
        self.start_time + Duration::milliseconds(millis)
    }
}
