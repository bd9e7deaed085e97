//! Reporter configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::types::ReportConfig;

/// Reporter options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReporterOptions {
    /// Directory receiving `report-data.json` and `attachments/`
    pub output_dir: PathBuf,

    /// Report title shown by the dashboard
    pub title: String,

    /// Base URL prepended to attachment paths by the dashboard
    pub attachments_base_url: Option<String>,

    /// Free-text labels copied into the run metadata
    pub name: Option<String>,
    pub environment: Option<String>,
    pub version: Option<String>,
    pub user: Option<String>,
}

impl Default for ReporterOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./custom-report"),
            title: "Playwright Test Report".to_string(),
            attachments_base_url: None,
            name: None,
            environment: None,
            version: None,
            user: None,
        }
    }
}

impl ReporterOptions {
    /// Load options from a TOML file, or defaults if it does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let options: Self = toml::from_str(&content)?;
            Ok(options)
        } else {
            Ok(Self::default())
        }
    }

    /// Save options to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Overlay `PLAYREPORT_*` environment variables
    pub fn apply_env(mut self) -> Self {
        self.apply_vars(|key| std::env::var(key).ok());
        self
    }

    fn apply_vars(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = get("PLAYREPORT_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(title) = get("PLAYREPORT_TITLE") {
            self.title = title;
        }
        if let Some(url) = get("PLAYREPORT_ATTACHMENTS_BASE_URL") {
            self.attachments_base_url = Some(url);
        }
        if let Some(name) = get("PLAYREPORT_NAME") {
            self.name = Some(name);
        }
        if let Some(environment) = get("PLAYREPORT_ENVIRONMENT") {
            self.environment = Some(environment);
        }
        if let Some(version) = get("PLAYREPORT_VERSION") {
            self.version = Some(version);
        }
        if let Some(user) = get("PLAYREPORT_USER") {
            self.user = Some(user);
        }
    }

    /// Reject options that cannot produce a report
    pub fn validate(&self) -> Result<()> {
        if self.output_dir.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("output_dir must not be empty".to_string()));
        }
        if self.title.trim().is_empty() {
            return Err(Error::InvalidConfig("title must not be empty".to_string()));
        }
        Ok(())
    }

    /// Path of the persisted report document
    pub fn report_path(&self) -> PathBuf {
        self.output_dir.join(crate::REPORT_DATA_FILE)
    }

    /// Directory holding materialized attachments
    pub fn attachments_dir(&self) -> PathBuf {
        self.output_dir.join(crate::ATTACHMENTS_DIR)
    }

    /// Presentation section of the report document
    pub fn report_config(&self) -> ReportConfig {
        ReportConfig {
            output_dir: self.output_dir.display().to_string(),
            title: Some(self.title.clone()),
            attachments_base_url: self.attachments_base_url.clone(),
        }
    }
}
