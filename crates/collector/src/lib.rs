//! Playreport collector
//!
//! Turns the lifecycle events of a Playwright run into one `ReportDocument`:
//! - materializes attachments under `<output>/attachments/`
//! - normalizes step trees
//! - folds retry attempts into one record per logical test
//! - groups tests into per-file suites and rolls up their status
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  JSON-lines event stream (stdin / file)                     │
//! │    └── adapter::drive() ── parse_event() ──┐                │
//! ├────────────────────────────────────────────┼────────────────┤
//! │  Reporter (Collector | SharedCollector)    ▼                │
//! │    ├── on_run_start   -> SuiteAggregator::discover          │
//! │    │                     ReportAssembler::begin             │
//! │    ├── on_test_attempt_end                                  │
//! │    │     ├── AttachmentMaterializer::materialize            │
//! │    │     ├── StepTreeBuilder::build                         │
//! │    │     └── RetryReconciler::record                        │
//! │    └── on_run_end                                           │
//! │          ├── RetryReconciler::finalize                      │
//! │          ├── SuiteAggregator::attach / rollup               │
//! │          └── ReportAssembler::finish / persist              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  <output>/report-data.json + <output>/attachments/*         │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod adapter;
pub mod attachments;
pub mod document;
pub mod error;
pub mod input;
pub mod prompt;
pub mod reconciler;
pub mod reporter;
pub mod steps;
pub mod suites;

pub use adapter::{drive, parse_event, RunEvent, StreamSummary};
pub use attachments::{classify, AttachmentMaterializer};
pub use document::ReportAssembler;
pub use error::{CollectorError, CollectorResult};
pub use input::{
    AncestorSuite, AttemptResult, BodyBytes, RawAttachment, RawStep, RunInfo, SuiteKind,
    SuiteNode, TestCase, TestIdentity,
};
pub use prompt::{build_fix_prompt, strip_ansi_escapes};
pub use reconciler::{is_flaky, RecordedAttempt, RetryReconciler, TestState};
pub use reporter::{Collector, Reporter, RunPhase, SharedCollector};
pub use steps::StepTreeBuilder;
pub use suites::SuiteAggregator;
