//! Retry reconciliation
//!
//! Every attempt the runner reports is appended to the attempt list of its
//! logical test identity. At run end each identity with at least one attempt
//! becomes exactly one `TestRecord`: the last attempt is authoritative, the
//! flaky flag is derived from the whole list, and the full list is kept as
//! retry history when there was more than one attempt.
//!
//! ```text
//! pending ──attempt──▶ accumulating ──finalize──▶ finalized
//!                        │    ▲
//!                        └────┘ attempt
//! ```

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use playreport_common::{
    Annotation, AttachmentRecord, RetryAttempt, StepRecord, TestError, TestRecord, TestStatus,
};
use tracing::{debug, warn};

use crate::input::{TestCase, TestIdentity};

/// Lifecycle of one logical test inside the reconciler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestState {
    /// Discovered, no attempt seen yet
    Pending,
    /// At least one attempt recorded, run still active
    Accumulating,
    /// Run ended; record emitted
    Finalized,
}

/// One attempt after per-attempt enrichment (attachments, steps)
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedAttempt {
    pub retry: u32,
    pub worker_index: i32,
    pub status: TestStatus,
    pub duration_ms: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub errors: Vec<TestError>,
    pub annotations: Vec<Annotation>,
    pub attachments: Vec<AttachmentRecord>,
    pub steps: Vec<StepRecord>,
}

impl RecordedAttempt {
    fn snapshot(&self, ordinal: u32) -> RetryAttempt {
        RetryAttempt {
            attempt: ordinal,
            status: self.status,
            duration: self.duration_ms,
            start_time: self.start_time,
            end_time: self.end_time,
            errors: self.errors.clone(),
        }
    }
}

struct TestEntry {
    case: TestCase,
    state: TestState,
    attempts: Vec<RecordedAttempt>,
}

/// A reconciled test, not yet placed in a suite
#[derive(Debug, Clone)]
pub struct ReconciledTest {
    pub case: TestCase,
    pub record: TestRecord,
}

/// Groups attempts by logical identity and finalizes them once
#[derive(Default)]
pub struct RetryReconciler {
    index: HashMap<TestIdentity, usize>,
    entries: Vec<TestEntry>,
    finalized: bool,
}

impl RetryReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a discovered test in the pending state
    pub fn register(&mut self, case: &TestCase) {
        if self.finalized || self.index.contains_key(&case.identity) {
            return;
        }
        self.insert(case.clone());
    }

    /// Append an attempt. Returns `false` when the run is already finalized.
    pub fn record(&mut self, case: &TestCase, attempt: RecordedAttempt) -> bool {
        if self.finalized {
            warn!(
                "Ignoring attempt {} of {} received after finalization",
                attempt.retry, case.identity
            );
            return false;
        }

        let idx = match self.index.get(&case.identity) {
            Some(&idx) => idx,
            None => self.insert(case.clone()),
        };

        let entry = &mut self.entries[idx];
        merge_case(&mut entry.case, case);
        entry.state = TestState::Accumulating;
        entry.attempts.push(attempt);
        debug!(
            "Recorded attempt #{} for {} ({})",
            entry.attempts.len(),
            case.identity,
            entry.attempts.last().map(|a| a.status.to_string()).unwrap_or_default()
        );
        true
    }

    fn insert(&mut self, case: TestCase) -> usize {
        let idx = self.entries.len();
        self.index.insert(case.identity.clone(), idx);
        self.entries.push(TestEntry {
            case,
            state: TestState::Pending,
            attempts: Vec::new(),
        });
        idx
    }

    pub fn state(&self, identity: &TestIdentity) -> Option<TestState> {
        self.index.get(identity).map(|&idx| self.entries[idx].state)
    }

    pub fn attempt_count(&self, identity: &TestIdentity) -> usize {
        self.index
            .get(identity)
            .map(|&idx| self.entries[idx].attempts.len())
            .unwrap_or(0)
    }

    /// Number of identities known (pending ones included)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Emit one record per identity that saw at least one attempt, in
    /// first-sighting order. A second call yields nothing.
    pub fn finalize(&mut self) -> Vec<ReconciledTest> {
        if self.finalized {
            warn!("Reconciler already finalized; ignoring repeated finalization");
            return Vec::new();
        }
        self.finalized = true;

        let mut out = Vec::with_capacity(self.entries.len());
        for entry in &mut self.entries {
            let attempts = std::mem::take(&mut entry.attempts);
            let Some(record) = build_record(&entry.case, attempts) else {
                debug!("Dropping {}: no attempt was recorded", entry.case.identity);
                continue;
            };
            entry.state = TestState::Finalized;
            out.push(ReconciledTest {
                record,
                case: entry.case.clone(),
            });
        }
        out
    }
}

/// Take what the attempt's view of a test adds, keeping the discovered
/// ancestry, tags and annotations when the attempt carries none.
fn merge_case(known: &mut TestCase, incoming: &TestCase) {
    if !incoming.ancestors.is_empty() {
        known.ancestors = incoming.ancestors.clone();
    }
    if !incoming.tags.is_empty() {
        known.tags = incoming.tags.clone();
    }
    if !incoming.annotations.is_empty() {
        known.annotations = incoming.annotations.clone();
    }
    if incoming.column.is_some() {
        known.column = incoming.column;
    }
}

/// Flaky iff there is more than one attempt, the last one passed, and an
/// earlier one failed or timed out.
pub fn is_flaky(statuses: &[TestStatus]) -> bool {
    match statuses.split_last() {
        Some((last, earlier)) => {
            *last == TestStatus::Passed && earlier.iter().any(TestStatus::is_failure)
        }
        None => false,
    }
}

fn build_record(case: &TestCase, mut attempts: Vec<RecordedAttempt>) -> Option<TestRecord> {
    let statuses: Vec<TestStatus> = attempts.iter().map(|a| a.status).collect();
    let is_flaky = is_flaky(&statuses);

    let retry_history = (attempts.len() > 1).then(|| {
        attempts
            .iter()
            .enumerate()
            .map(|(ordinal, attempt)| attempt.snapshot(ordinal as u32))
            .collect::<Vec<_>>()
    });

    let mut annotations: Vec<Annotation> = Vec::new();
    for annotation in case
        .annotations
        .iter()
        .chain(attempts.iter().flat_map(|a| a.annotations.iter()))
    {
        if !annotations.contains(annotation) {
            annotations.push(annotation.clone());
        }
    }

    let last = attempts.pop()?;
    let mut attachments: Vec<AttachmentRecord> = attempts
        .into_iter()
        .flat_map(|a| a.attachments)
        .collect();
    attachments.extend(last.attachments);

    Some(TestRecord {
        id: case.identity.test_id(),
        title: case.identity.title.clone(),
        file: case.identity.file.clone(),
        line: (case.identity.line > 0).then_some(case.identity.line),
        status: last.status,
        duration: last.duration_ms,
        start_time: last.start_time,
        end_time: last.end_time,
        errors: last.errors,
        tags: Vec::new(),
        annotations,
        steps: last.steps,
        attachments,
        retries: last.retry,
        worker_index: last.worker_index,
        project: case.identity.project.clone(),
        is_flaky,
        describe_blocks: Vec::new(),
        retry_history,
    })
}
