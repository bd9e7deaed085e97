//! playreport common library
//!
//! The report document contract (`report-data.json`) and the reporter options
//! shared by the collector and every collaborator that renders or serves a
//! report directory.

pub mod config;
pub mod error;
pub mod types;

pub use config::ReporterOptions;
pub use error::{Error, Result};
pub use types::*;

/// playreport version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// File name of the persisted report document inside the output directory
pub const REPORT_DATA_FILE: &str = "report-data.json";

/// Subdirectory of the output directory holding materialized attachments
pub const ATTACHMENTS_DIR: &str = "attachments";
