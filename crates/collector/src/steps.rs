//! Step tree normalization
//!
//! Converts the runner's nested step nodes of one attempt into `StepRecord`s:
//! pre-order ids from a per-test counter, title fallbacks, and a three-line
//! source excerpt around each located step.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use playreport_common::{CodeContext, CodeLine, SourceLocation, StepRecord};
use tracing::debug;

use crate::input::RawStep;

/// Separator used when a step title is rebuilt from its title path
pub const TITLE_PATH_SEPARATOR: &str = " › ";

const DEFAULT_CATEGORY: &str = "step";

/// Builds the step forest of one test attempt
pub struct StepTreeBuilder {
    prefix: String,
    counter: usize,
    default_start: DateTime<Utc>,
    sources: HashMap<PathBuf, Option<Vec<String>>>,
}

impl StepTreeBuilder {
    /// `prefix` makes ids unique across the document; `default_start` is used
    /// for nodes that carry no start time.
    pub fn new(prefix: impl Into<String>, default_start: DateTime<Utc>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: 0,
            default_start,
            sources: HashMap::new(),
        }
    }

    /// Convert a list of runner nodes. The id counter restarts at zero.
    pub fn build(&mut self, nodes: &[RawStep]) -> Vec<StepRecord> {
        self.counter = 0;
        self.convert_all(nodes)
    }

    fn convert_all(&mut self, nodes: &[RawStep]) -> Vec<StepRecord> {
        nodes
            .iter()
            .enumerate()
            .map(|(position, node)| self.convert(node, position))
            .collect()
    }

    fn convert(&mut self, node: &RawStep, position: usize) -> StepRecord {
        self.counter += 1;
        let id = format!("{}-s{}", self.prefix, self.counter);

        let code_context = node
            .location
            .as_ref()
            .and_then(|location| self.code_context(location));

        let category = node
            .category
            .as_deref()
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_CATEGORY)
            .to_string();

        StepRecord {
            id,
            title: step_title(node, position),
            category,
            start_time: node.start_time.unwrap_or(self.default_start),
            duration: node.duration_ms,
            error: node.error.clone(),
            location: node.location.clone(),
            code_context,
            steps: self.convert_all(&node.steps),
        }
    }

    fn code_context(&mut self, location: &SourceLocation) -> Option<CodeContext> {
        if location.file.is_empty() || location.line == 0 {
            return None;
        }

        let lines = self
            .sources
            .entry(PathBuf::from(&location.file))
            .or_insert_with_key(|path| match std::fs::read_to_string(path) {
                Ok(content) => Some(content.lines().map(str::to_string).collect()),
                Err(e) => {
                    debug!("No code context for {}: {}", path.display(), e);
                    None
                }
            })
            .as_ref()?;

        excerpt(lines, &location.file, location.line, 1)
    }
}

/// Title fallback: explicit title, then joined title path, then "Step N"
pub fn step_title(node: &RawStep, position: usize) -> String {
    if let Some(title) = node.title.as_deref().filter(|t| !t.trim().is_empty()) {
        return title.to_string();
    }

    let path: Vec<&str> = node
        .title_path
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();
    if !path.is_empty() {
        return path.join(TITLE_PATH_SEPARATOR);
    }

    format!("Step {}", position + 1)
}

/// Lines `target - radius ..= target + radius` (1-based), clipped to the file
pub fn excerpt(lines: &[String], file: &str, target: u32, radius: u32) -> Option<CodeContext> {
    let total = u32::try_from(lines.len()).unwrap_or(u32::MAX);
    if target == 0 || target > total {
        return None;
    }

    let first = target.saturating_sub(radius).max(1);
    let last = target.saturating_add(radius).min(total);

    let lines = (first..=last)
        .map(|number| CodeLine {
            number,
            content: lines[(number - 1) as usize].clone(),
            is_current: number == target,
        })
        .collect();

    Some(CodeContext {
        file: file.to_string(),
        target_line: target,
        lines,
    })
}

/// Read a file and cut an excerpt from it; `None` if unreadable
pub fn read_excerpt(file: &str, target: u32, radius: u32) -> Option<CodeContext> {
    let content = std::fs::read_to_string(file).ok()?;
    let lines: Vec<String> = content.lines().map(str::to_string).collect();
    excerpt(&lines, file, target, radius)
}
