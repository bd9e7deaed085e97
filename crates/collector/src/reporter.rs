//! Lifecycle contract and the collectors implementing it
//!
//! A host adapter drives a [`Reporter`] with three callbacks. [`Collector`]
//! is the single-consumer aggregator of one run; [`SharedCollector`] wraps it
//! for hosts that deliver attempts from several threads.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use playreport_common::{ReportDocument, ReporterOptions};
use tracing::{error, info, warn};

use crate::attachments::AttachmentMaterializer;
use crate::document::ReportAssembler;
use crate::input::{AttemptResult, RunInfo, SuiteNode, TestCase};
use crate::reconciler::{RecordedAttempt, RetryReconciler};
use crate::steps::StepTreeBuilder;
use crate::suites::SuiteAggregator;

/// Callbacks a host test runner delivers, in order
pub trait Reporter {
    /// Run configuration and the discovered suite tree, before any test runs
    fn on_run_start(&mut self, info: &RunInfo, root: &SuiteNode);

    /// One execution attempt of one test finished
    fn on_test_attempt_end(&mut self, case: &TestCase, attempt: AttemptResult);

    /// No more attempts will arrive. Returns the persisted report path, or
    /// `None` if nothing was written.
    fn on_run_end(&mut self, run_status: Option<String>) -> Option<PathBuf>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Running,
    Ended,
}

/// Materialize attachments and build the step forest of one attempt
pub fn enrich(
    materializer: &AttachmentMaterializer,
    case: &TestCase,
    attempt: AttemptResult,
) -> RecordedAttempt {
    let end_time = attempt.end_time();
    let AttemptResult {
        retry,
        worker_index,
        status,
        duration_ms,
        start_time,
        errors,
        attachments,
        steps,
        annotations,
    } = attempt;

    let prefix = format!("{}-r{}", case.identity.test_id(), retry);
    let steps = StepTreeBuilder::new(prefix, start_time).build(&steps);
    let attachments = attachments
        .into_iter()
        .map(|raw| materializer.materialize(raw, retry))
        .collect();

    RecordedAttempt {
        retry,
        worker_index,
        status,
        duration_ms,
        start_time,
        end_time,
        errors,
        annotations,
        attachments,
        steps,
    }
}

fn ignore_late(case: &TestCase, attempt: &AttemptResult) {
    warn!(
        "Ignoring attempt {} of {} received after run end",
        attempt.retry, case.identity
    );
}

/// Aggregates the events of one run into a `ReportDocument`
pub struct Collector {
    options: ReporterOptions,
    materializer: AttachmentMaterializer,
    reconciler: RetryReconciler,
    suites: SuiteAggregator,
    assembler: ReportAssembler,
    phase: RunPhase,
    document: Option<ReportDocument>,
}

impl Collector {
    pub fn new(options: ReporterOptions) -> Self {
        Self {
            materializer: AttachmentMaterializer::new(&options.output_dir),
            assembler: ReportAssembler::new(options.clone()),
            reconciler: RetryReconciler::new(),
            suites: SuiteAggregator::new(),
            phase: RunPhase::Idle,
            document: None,
            options,
        }
    }

    pub fn options(&self) -> &ReporterOptions {
        &self.options
    }

    pub fn materializer(&self) -> &AttachmentMaterializer {
        &self.materializer
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Where the document is written at run end
    pub fn report_path(&self) -> PathBuf {
        self.options.report_path()
    }

    /// The finished document, once the run has ended
    pub fn document(&self) -> Option<&ReportDocument> {
        self.document.as_ref()
    }

    pub fn into_document(self) -> Option<ReportDocument> {
        self.document
    }

    /// Add an already enriched attempt
    pub fn ingest(&mut self, case: &TestCase, attempt: RecordedAttempt) {
        if self.phase == RunPhase::Idle {
            warn!("Attempt for {} arrived before run start", case.identity);
            self.phase = RunPhase::Running;
        }
        self.reconciler.record(case, attempt);
    }
}

impl Reporter for Collector {
    fn on_run_start(&mut self, info: &RunInfo, root: &SuiteNode) {
        if self.phase != RunPhase::Idle {
            warn!("Run start received in phase {:?}; ignoring", self.phase);
            return;
        }
        self.phase = RunPhase::Running;
        self.assembler.begin(info, Utc::now());

        for case in root.all_tests() {
            self.reconciler.register(case);
        }
        let suites = self.suites.discover(root);
        info!(
            "Run started: {} test(s) in {} file(s), projects [{}]",
            root.test_count(),
            suites,
            info.projects.join(", ")
        );
    }

    fn on_test_attempt_end(&mut self, case: &TestCase, attempt: AttemptResult) {
        if self.phase == RunPhase::Ended {
            ignore_late(case, &attempt);
            return;
        }
        let recorded = enrich(&self.materializer, case, attempt);
        self.ingest(case, recorded);
    }

    fn on_run_end(&mut self, run_status: Option<String>) -> Option<PathBuf> {
        if self.phase == RunPhase::Ended {
            warn!("Run end received twice; ignoring");
            return None;
        }
        self.phase = RunPhase::Ended;

        for finalized in self.reconciler.finalize() {
            self.assembler.count(&finalized.record);
            self.suites.attach(&finalized.case, finalized.record);
        }
        self.suites.rollup();

        let suites = std::mem::take(&mut self.suites).into_suites();
        let document = self.assembler.finish(Utc::now(), suites, run_status);

        let persisted = match self.assembler.persist(&document) {
            Ok(path) => Some(path),
            Err(e) => {
                error!(
                    "Failed to write report to {}: {}",
                    self.options.report_path().display(),
                    e
                );
                None
            }
        };
        self.document = Some(document);
        persisted
    }
}

/// Cloneable handle for hosts delivering events from several threads.
///
/// Attachment and step enrichment happen before the lock is taken; only the
/// reconciler append is serialized.
#[derive(Clone)]
pub struct SharedCollector {
    inner: Arc<Mutex<Collector>>,
    materializer: AttachmentMaterializer,
}

impl SharedCollector {
    pub fn new(options: ReporterOptions) -> Self {
        let collector = Collector::new(options);
        Self {
            materializer: collector.materializer().clone(),
            inner: Arc::new(Mutex::new(collector)),
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.inner.lock().phase()
    }

    pub fn document(&self) -> Option<ReportDocument> {
        self.inner.lock().document().cloned()
    }
}

impl Reporter for SharedCollector {
    fn on_run_start(&mut self, info: &RunInfo, root: &SuiteNode) {
        self.inner.lock().on_run_start(info, root);
    }

    fn on_test_attempt_end(&mut self, case: &TestCase, attempt: AttemptResult) {
        if self.phase() == RunPhase::Ended {
            ignore_late(case, &attempt);
            return;
        }
        let recorded = enrich(&self.materializer, case, attempt);
        self.inner.lock().ingest(case, recorded);
    }

    fn on_run_end(&mut self, run_status: Option<String>) -> Option<PathBuf> {
        self.inner.lock().on_run_end(run_status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{RawAttachment, RawStep, SuiteKind, TestIdentity};
    use playreport_common::{SuiteStatus, TestStatus};
    use tempfile::TempDir;

    const FILE: &str = "/repo/tests/cart.spec.ts";

    fn options(tmp: &TempDir) -> ReporterOptions {
        ReporterOptions {
            output_dir: tmp.path().join("report"),
            ..Default::default()
        }
    }

    fn case(title: &str, line: u32) -> TestCase {
        TestCase::new(TestIdentity::new("chromium", FILE, line, title))
    }

    fn tree(cases: &[TestCase]) -> SuiteNode {
        SuiteNode {
            kind: SuiteKind::Root,
            suites: vec![SuiteNode {
                title: "cart.spec.ts".into(),
                kind: SuiteKind::File,
                file: Some(FILE.into()),
                tests: cases.to_vec(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn info() -> RunInfo {
        RunInfo {
            runner_version: "1.48.0".into(),
            projects: vec!["chromium".into()],
        }
    }

    #[test]
    fn test_enrich_prefixes_step_ids_and_tags_attachments() {
        let tmp = TempDir::new().unwrap();
        let materializer = AttachmentMaterializer::new(tmp.path());
        let c = case("adds", 3);

        let mut attempt = AttemptResult::new(2, TestStatus::Passed, Utc::now(), 10);
        attempt.steps = vec![RawStep { title: Some("goto".into()), ..Default::default() }];
        attempt.attachments = vec![RawAttachment::from_body(
            "stdout",
            "text/plain",
            crate::input::BodyBytes::Text("hi".into()),
        )];

        let recorded = enrich(&materializer, &c, attempt);
        assert_eq!(recorded.steps[0].id, format!("{}-r2-s1", c.identity.test_id()));
        assert_eq!(recorded.attachments[0].attempt, 2);
    }

    #[test]
    fn test_full_run_persists_document() {
        let tmp = TempDir::new().unwrap();
        let (a, b) = (case("a", 3), case("b", 9));
        let mut collector = Collector::new(options(&tmp));

        collector.on_run_start(&info(), &tree(&[a.clone(), b.clone()]));
        collector.on_test_attempt_end(&a, AttemptResult::new(0, TestStatus::Passed, Utc::now(), 20));
        collector.on_test_attempt_end(&b, AttemptResult::new(0, TestStatus::Skipped, Utc::now(), 0));
        let path = collector.on_run_end(Some("passed".into())).expect("report written");

        let loaded = ReportDocument::load(&path).unwrap();
        assert_eq!(loaded.suites.len(), 1);
        assert_eq!(loaded.suites[0].tests.len(), 2);
        assert_eq!(loaded.suites[0].status, SuiteStatus::Passed);
        assert_eq!(loaded.metadata.total_tests, 2);
        assert_eq!(loaded.metadata.skipped, 1);
        assert_eq!(Some(&loaded), collector.document());
    }

    #[test]
    fn test_duplicate_end_is_ignored() {
        let tmp = TempDir::new().unwrap();
        let a = case("a", 3);
        let mut collector = Collector::new(options(&tmp));
        collector.on_run_start(&info(), &tree(&[a.clone()]));
        collector.on_test_attempt_end(&a, AttemptResult::new(0, TestStatus::Passed, Utc::now(), 1));

        assert!(collector.on_run_end(None).is_some());
        assert!(collector.on_run_end(None).is_none());
        assert_eq!(collector.document().map(|d| d.metadata.total_tests), Some(1));
    }

    #[test]
    fn test_attempt_without_run_start_is_still_reported() {
        let tmp = TempDir::new().unwrap();
        let mut collector = Collector::new(options(&tmp));
        let stray = TestCase::new(TestIdentity::new("webkit", "/repo/tests/stray.spec.ts", 1, "stray"));

        collector.on_test_attempt_end(&stray, AttemptResult::new(0, TestStatus::Failed, Utc::now(), 1));
        assert_eq!(collector.phase(), RunPhase::Running);
        collector.on_run_end(None);

        let doc = collector.document().unwrap();
        assert_eq!(doc.suites[0].title, "stray.spec.ts");
        assert_eq!(doc.metadata.failed, 1);
    }

    fn late_trace_attempt() -> AttemptResult {
        let mut late = AttemptResult::new(1, TestStatus::Failed, Utc::now(), 3);
        late.attachments = vec![RawAttachment::from_body(
            "trace",
            "application/zip",
            crate::input::BodyBytes::Base64("UEsDBA==".into()),
        )];
        late
    }

    fn attachment_files(collector_dir: &std::path::Path) -> usize {
        std::fs::read_dir(collector_dir.join("attachments"))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    #[test]
    fn test_attempt_after_run_end_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let a = case("a", 3);
        let mut collector = Collector::new(options(&tmp));
        collector.on_run_start(&info(), &tree(&[a.clone()]));
        collector.on_test_attempt_end(&a, AttemptResult::new(0, TestStatus::Passed, Utc::now(), 1));
        collector.on_run_end(None);

        collector.on_test_attempt_end(&a, late_trace_attempt());
        assert_eq!(attachment_files(&tmp.path().join("report")), 0);
        let doc = collector.document().unwrap();
        assert_eq!(doc.tests().next().map(|t| t.status), Some(TestStatus::Passed));
    }

    #[test]
    fn test_shared_attempt_after_run_end_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let a = case("a", 3);
        let mut shared = SharedCollector::new(options(&tmp));
        shared.on_run_start(&info(), &tree(&[a.clone()]));
        shared.on_test_attempt_end(&a, AttemptResult::new(0, TestStatus::Passed, Utc::now(), 1));
        shared.on_run_end(None);

        shared.on_test_attempt_end(&a, late_trace_attempt());
        assert_eq!(attachment_files(&tmp.path().join("report")), 0);
    }

    #[test]
    fn test_shared_collector_across_threads() {
        let tmp = TempDir::new().unwrap();
        let cases: Vec<TestCase> = (0..8).map(|i| case(&format!("t{}", i), i + 1)).collect();
        let mut shared = SharedCollector::new(options(&tmp));
        shared.on_run_start(&info(), &tree(&cases));

        let handles: Vec<_> = cases
            .iter()
            .cloned()
            .map(|c| {
                let mut worker = shared.clone();
                std::thread::spawn(move || {
                    worker.on_test_attempt_end(&c, AttemptResult::new(0, TestStatus::Failed, Utc::now(), 5));
                    worker.on_test_attempt_end(&c, AttemptResult::new(1, TestStatus::Passed, Utc::now(), 5));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(shared.on_run_end(None).is_some());
        let doc = shared.document().unwrap();
        assert_eq!(doc.metadata.total_tests, 8);
        assert_eq!(doc.metadata.flaky, 8);
        assert!(doc.tests().all(|t| t.retry_history.as_ref().map(Vec::len) == Some(2)));
    }
}
