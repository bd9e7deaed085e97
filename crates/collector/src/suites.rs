//! Suite hierarchy and status rollup
//!
//! One `SuiteRecord` per source file. Suites are seeded from the discovered
//! tree at run start, finalized tests are attached by file path, and status
//! and duration are rolled up once every test is in place.

use std::collections::HashMap;
use std::path::Path;

use once_cell::sync::Lazy;
use playreport_common::{SuiteRecord, SuiteStatus, TestRecord, TestStatus};
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::input::{AncestorSuite, SuiteKind, SuiteNode, TestCase};

/// Title used when a suite is created for a test without a file
pub const UNKNOWN_SUITE_TITLE: &str = "Unknown Suite";

const TEST_FILE_SUFFIXES: &[&str] = &[
    ".spec.ts", ".test.ts", ".spec.tsx", ".test.tsx", ".spec.js", ".test.js", ".spec.jsx",
    ".test.jsx", ".spec.mjs", ".test.mjs", ".spec.cjs", ".test.cjs",
];

static TAG_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"@(\w+)").expect("tag regex"));

/// Document id of the suite for a file
pub fn suite_id(file: &str) -> String {
    let digest = Sha256::digest(file.as_bytes());
    format!("suite_{}", &hex::encode(digest)[..12])
}

/// Whether a suite title is really the name of a test file
pub fn looks_like_test_file(title: &str) -> bool {
    TEST_FILE_SUFFIXES.iter().any(|suffix| title.ends_with(suffix))
}

/// Describe-block titles of a test, outermost first.
///
/// Walks the ancestor chain from the test outward, keeping non-empty titles
/// of describe frames that are not test file names.
pub fn describe_path(ancestors: &[AncestorSuite]) -> Vec<String> {
    let mut path: Vec<String> = ancestors
        .iter()
        .filter(|a| !matches!(a.kind, SuiteKind::Root | SuiteKind::Project | SuiteKind::File))
        .map(|a| a.title.trim())
        .filter(|title| !title.is_empty() && !looks_like_test_file(title))
        .map(str::to_string)
        .collect();
    path.reverse();
    path
}

/// Tags of a test, without the leading `@`, first-seen order.
///
/// Runner-declared tags win; otherwise `@word` tokens are scraped from the
/// test title and every ancestor title.
pub fn extract_tags(case: &TestCase) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    let mut push = |tag: &str| {
        let tag = tag.trim().trim_start_matches('@');
        if !tag.is_empty() && !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
    };

    if !case.tags.is_empty() {
        case.tags.iter().for_each(|t| push(t.as_str()));
        return tags;
    }

    let titles = std::iter::once(case.identity.title.as_str())
        .chain(case.ancestors.iter().map(|a| a.title.as_str()));
    for title in titles {
        for capture in TAG_PATTERN.captures_iter(title) {
            if let Some(m) = capture.get(1) {
                push(m.as_str());
            }
        }
    }
    tags
}

/// `failed` if any test failed or timed out, `skipped` if all were skipped,
/// `passed` otherwise
pub fn rollup_status(tests: &[TestRecord]) -> SuiteStatus {
    if tests.iter().any(|t| t.status.is_failure()) {
        return SuiteStatus::Failed;
    }
    if tests.iter().all(|t| t.status == TestStatus::Skipped) {
        return SuiteStatus::Skipped;
    }
    SuiteStatus::Passed
}

fn file_title(file: &str) -> String {
    Path::new(file)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| UNKNOWN_SUITE_TITLE.to_string())
}

/// File-keyed suite list
#[derive(Debug, Default)]
pub struct SuiteAggregator {
    suites: Vec<SuiteRecord>,
    by_file: HashMap<String, usize>,
}

impl SuiteAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed suites from the discovered tree. Returns how many were created.
    pub fn discover(&mut self, root: &SuiteNode) -> usize {
        let before = self.suites.len();
        self.visit(root);
        let created = self.suites.len() - before;
        debug!("Discovered {} suite(s)", created);
        created
    }

    fn visit(&mut self, node: &SuiteNode) {
        if let Some(file) = node.file.as_deref() {
            if node.test_count() > 0 && !self.by_file.contains_key(file) {
                let title = if node.title.trim().is_empty() {
                    file_title(file)
                } else {
                    node.title.clone()
                };
                self.create(file, title);
            }
        }

        for test in &node.tests {
            let file = test.identity.file.as_str();
            if !self.by_file.contains_key(file) {
                self.create(file, file_title(file));
            }
        }

        for child in &node.suites {
            self.visit(child);
        }
    }

    fn create(&mut self, file: &str, title: String) -> usize {
        let idx = self.suites.len();
        self.suites.push(SuiteRecord {
            id: suite_id(file),
            title,
            file: file.to_string(),
            tests: Vec::new(),
            duration: 0,
            status: SuiteStatus::default(),
        });
        self.by_file.insert(file.to_string(), idx);
        idx
    }

    /// Place a finalized test into its file's suite, filling in its describe
    /// path and tags. Creates the suite if discovery never saw the file.
    pub fn attach(&mut self, case: &TestCase, mut record: TestRecord) {
        record.describe_blocks = describe_path(&case.ancestors);
        record.tags = extract_tags(case);

        let idx = match self.by_file.get(&record.file) {
            Some(&idx) => idx,
            None => {
                warn!(
                    "No discovered suite for {}; creating one on demand",
                    if record.file.is_empty() { "<unknown file>" } else { record.file.as_str() }
                );
                let file = record.file.clone();
                self.create(&file, file_title(&file))
            }
        };
        self.suites[idx].tests.push(record);
    }

    /// Compute status and duration of every suite
    pub fn rollup(&mut self) {
        for suite in &mut self.suites {
            suite.duration = suite.tests.iter().map(|t| t.duration).sum();
            suite.status = rollup_status(&suite.tests);
        }
    }

    pub fn get(&self, file: &str) -> Option<&SuiteRecord> {
        self.by_file.get(file).map(|&idx| &self.suites[idx])
    }

    pub fn len(&self) -> usize {
        self.suites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.suites.is_empty()
    }

    /// Suites holding at least one test, in creation order
    pub fn into_suites(self) -> Vec<SuiteRecord> {
        self.suites
            .into_iter()
            .filter(|s| {
                if s.tests.is_empty() {
                    debug!("Omitting suite {} without finalized tests", s.file);
                }
                !s.tests.is_empty()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::TestIdentity;
    use chrono::Utc;
    use test_case::test_case;

    use playreport_common::TestStatus::{Failed, Passed, Skipped, TimedOut};

    const FILE: &str = "/repo/tests/login.spec.ts";

    fn record(title: &str, status: TestStatus, duration: u64) -> TestRecord {
        let now = Utc::now();
        TestRecord {
            id: format!("id-{}", title),
            title: title.to_string(),
            file: FILE.to_string(),
            line: Some(3),
            status,
            duration,
            start_time: now,
            end_time: now,
            errors: vec![],
            tags: vec![],
            annotations: vec![],
            steps: vec![],
            attachments: vec![],
            retries: 0,
            worker_index: 0,
            project: "chromium".to_string(),
            is_flaky: false,
            describe_blocks: vec![],
            retry_history: None,
        }
    }

    fn case(title: &str) -> TestCase {
        TestCase::new(TestIdentity::new("chromium", FILE, 3, title))
    }

    #[test_case(&[Passed, Passed], SuiteStatus::Passed ; "all passed")]
    #[test_case(&[Passed, Failed], SuiteStatus::Failed ; "one failed")]
    #[test_case(&[Passed, TimedOut], SuiteStatus::Failed ; "one timed out")]
    #[test_case(&[Skipped, Skipped], SuiteStatus::Skipped ; "all skipped")]
    #[test_case(&[Passed, Skipped], SuiteStatus::Passed ; "passed and skipped")]
    fn test_rollup_status(statuses: &[TestStatus], expected: SuiteStatus) {
        let tests: Vec<TestRecord> = statuses
            .iter()
            .enumerate()
            .map(|(i, s)| record(&format!("t{}", i), *s, 10))
            .collect();
        assert_eq!(rollup_status(&tests), expected);
    }

    #[test]
    fn test_describe_path_filters_file_and_project_frames() {
        let ancestors = vec![
            AncestorSuite::new("when logged out", SuiteKind::Describe),
            AncestorSuite::new("login", SuiteKind::Describe),
            AncestorSuite::new("login.spec.ts", SuiteKind::File),
            AncestorSuite::new("chromium", SuiteKind::Project),
            AncestorSuite::new("", SuiteKind::Root),
        ];
        assert_eq!(describe_path(&ancestors), vec!["login", "when logged out"]);
    }

    #[test]
    fn test_describe_path_filters_file_name_titles_of_unknown_frames() {
        let ancestors = vec![
            AncestorSuite::new("inner", SuiteKind::Describe),
            AncestorSuite::new("  ", SuiteKind::Describe),
            AncestorSuite::new("checkout.test.js", SuiteKind::Describe),
            AncestorSuite::new("outer", SuiteKind::Describe),
        ];
        assert_eq!(describe_path(&ancestors), vec!["outer", "inner"]);
    }

    #[test]
    fn test_declared_tags_win_over_titles() {
        let c = case("logs in @fast").with_tags(vec!["@smoke".into(), "@smoke".into(), "@auth".into()]);
        assert_eq!(extract_tags(&c), vec!["smoke", "auth"]);
    }

    #[test]
    fn test_tags_scraped_from_titles_in_order() {
        let c = case("logs in @fast @smoke").with_ancestors(vec![
            AncestorSuite::new("auth @smoke @critical", SuiteKind::Describe),
            AncestorSuite::new("login.spec.ts", SuiteKind::File),
        ]);
        assert_eq!(extract_tags(&c), vec!["fast", "smoke", "critical"]);
    }

    #[test]
    fn test_discover_one_suite_per_file_ignoring_empty_groups() {
        let tree = SuiteNode {
            kind: SuiteKind::Root,
            suites: vec![SuiteNode {
                title: "chromium".into(),
                kind: SuiteKind::Project,
                suites: vec![
                    SuiteNode {
                        title: "login.spec.ts".into(),
                        kind: SuiteKind::File,
                        file: Some(FILE.into()),
                        tests: vec![case("a")],
                        suites: vec![SuiteNode {
                            title: "nested".into(),
                            file: Some(FILE.into()),
                            tests: vec![case("b")],
                            ..Default::default()
                        }],
                    },
                    SuiteNode {
                        title: "empty.spec.ts".into(),
                        kind: SuiteKind::File,
                        file: Some("/repo/tests/empty.spec.ts".into()),
                        suites: vec![SuiteNode {
                            title: "empty describe".into(),
                            file: Some("/repo/tests/empty.spec.ts".into()),
                            ..Default::default()
                        }],
                        ..Default::default()
                    },
                ],
                ..Default::default()
            }],
            ..Default::default()
        };

        let mut suites = SuiteAggregator::new();
        assert_eq!(suites.discover(&tree), 1);
        assert_eq!(suites.get(FILE).map(|s| s.title.as_str()), Some("login.spec.ts"));
        assert!(suites.get("/repo/tests/empty.spec.ts").is_none());
    }

    #[test]
    fn test_attach_creates_suite_on_demand_and_rolls_up() {
        let mut suites = SuiteAggregator::new();
        suites.attach(&case("a"), record("a", Passed, 40));
        suites.attach(&case("b"), record("b", Failed, 60));
        suites.rollup();

        let all = suites.into_suites();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].title, "login.spec.ts");
        assert_eq!(all[0].id, suite_id(FILE));
        assert_eq!(all[0].duration, 100);
        assert_eq!(all[0].status, SuiteStatus::Failed);
    }

    #[test]
    fn test_attach_without_file_uses_fallback_title() {
        let mut suites = SuiteAggregator::new();
        let mut r = record("orphan", Passed, 1);
        r.file = String::new();
        suites.attach(&TestCase::new(TestIdentity::new("p", "", 0, "orphan")), r);
        assert_eq!(suites.get("").map(|s| s.title.as_str()), Some(UNKNOWN_SUITE_TITLE));
    }

    #[test]
    fn test_suites_without_tests_are_omitted() {
        let tree = SuiteNode {
            title: "login.spec.ts".into(),
            kind: SuiteKind::File,
            file: Some(FILE.into()),
            tests: vec![case("never ran")],
            ..Default::default()
        };
        let mut suites = SuiteAggregator::new();
        suites.discover(&tree);
        suites.rollup();
        assert!(suites.into_suites().is_empty());
    }
}
