//! Report document assembly
//!
//! Owns the run metadata from run start to run end and writes the finished
//! document to `<output_dir>/report-data.json`.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use playreport_common::{ReportDocument, ReporterOptions, RunMetadata, SuiteRecord, TestRecord};
use tracing::{info, warn};

use crate::error::CollectorResult;
use crate::input::RunInfo;

/// Builds the `ReportDocument` of one run
#[derive(Debug)]
pub struct ReportAssembler {
    options: ReporterOptions,
    metadata: RunMetadata,
}

impl ReportAssembler {
    pub fn new(options: ReporterOptions) -> Self {
        let metadata = labelled(RunMetadata::new(Utc::now()), &options);
        Self { options, metadata }
    }

    /// Record run-level facts and make sure the output directory exists
    pub fn begin(&mut self, info: &RunInfo, start: DateTime<Utc>) {
        self.metadata = labelled(RunMetadata::new(start), &self.options);
        self.metadata.runner_version = info.runner_version.clone();
        self.metadata.projects = info.projects.clone();

        if let Err(e) = std::fs::create_dir_all(&self.options.output_dir) {
            warn!(
                "Failed to create output directory {}: {}",
                self.options.output_dir.display(),
                e
            );
        }
    }

    /// Count one finalized logical test
    pub fn count(&mut self, record: &TestRecord) {
        self.metadata.count(record.status, record.is_flaky);
    }

    pub fn metadata(&self) -> &RunMetadata {
        &self.metadata
    }

    /// Freeze the metadata and produce the document
    pub fn finish(
        &mut self,
        end: DateTime<Utc>,
        suites: Vec<SuiteRecord>,
        run_status: Option<String>,
    ) -> ReportDocument {
        self.metadata.end_time = end;
        self.metadata.duration = u64::try_from((end - self.metadata.start_time).num_milliseconds())
            .unwrap_or(0);
        self.metadata.run_status = run_status;

        let m = &self.metadata;
        info!(
            "Run finished: {} test(s), {} passed, {} failed, {} skipped, {} timed out, {} flaky ({} ms)",
            m.total_tests, m.passed, m.failed, m.skipped, m.timed_out, m.flaky, m.duration
        );

        ReportDocument {
            metadata: self.metadata.clone(),
            suites,
            config: self.options.report_config(),
        }
    }

    /// Write the document, returning where it landed
    pub fn persist(&self, document: &ReportDocument) -> CollectorResult<PathBuf> {
        let path = self.options.report_path();
        document.save(&path)?;
        Ok(path)
    }
}

fn labelled(mut metadata: RunMetadata, options: &ReporterOptions) -> RunMetadata {
    metadata.name = options.name.clone();
    metadata.environment = options.environment.clone();
    metadata.version = options.version.clone();
    metadata.user = options.user.clone();
    metadata
}
