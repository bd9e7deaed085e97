//! "Fix this test" prompt for failed tests
//!
//! Produces a markdown prompt an assistant can answer: the failing test, its
//! meaningful error messages without terminal colors, and the source lines
//! around the first error location.

use once_cell::sync::Lazy;
use playreport_common::{SourceLocation, TestRecord};
use regex::Regex;

use crate::steps::read_excerpt;

const INSTRUCTIONS: &str = "# Instructions

- Following Playwright test failed.
- Explain why, be concise, respect Playwright best practices.
- Provide a snippet of code with the fix, if possible.
";

const FRAME_RADIUS: u32 = 2;

static ANSI_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"[\x1B\x{9B}][\[\]()#;?]*(?:(?:(?:[a-zA-Z\d]*(?:;[-a-zA-Z\d/#&.:=?%@~_]*)*)?\x07)|(?:(?:\d{1,4}(?:;\d{0,4})*)?[\dA-PR-TZcf-ntqry=><~]))",
    )
    .expect("ansi escape regex")
});

/// Remove ANSI escape sequences
pub fn strip_ansi_escapes(text: &str) -> String {
    ANSI_PATTERN.replace_all(text, "").into_owned()
}

/// Error messages worth showing: every multi-line message, plus single-line
/// messages not already contained in another message. Each message appears
/// once.
pub fn meaningful_errors(messages: &[&str]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for &message in messages {
        if message.trim().is_empty() || out.iter().any(|m| m == message) {
            continue;
        }
        let keep = message.contains('\n')
            || !messages
                .iter()
                .any(|other| *other != message && other.contains(message));
        if keep {
            out.push(message.to_string());
        }
    }
    out
}

/// Build the prompt, or `None` when the test did not fail or carries no
/// meaningful error
pub fn build_fix_prompt(test: &TestRecord) -> Option<String> {
    if !test.status.is_failure() {
        return None;
    }

    let messages: Vec<&str> = test.errors.iter().map(|e| e.message.as_str()).collect();
    let errors = meaningful_errors(&messages);
    if errors.is_empty() {
        return None;
    }

    let location = test.errors.first().and_then(|e| e.location.as_ref());
    let (file, line) = match location {
        Some(l) => (l.file.clone(), Some(l.line)),
        None => (test.file.clone(), test.line),
    };
    let test_info = match line {
        Some(line) => format!("{}:{} › {}", file, line, test.title),
        None => format!("{} › {}", file, test.title),
    };

    let mut lines: Vec<String> = vec![
        INSTRUCTIONS.to_string(),
        "# Test info".to_string(),
        String::new(),
        test_info,
        String::new(),
        "# Error details".to_string(),
    ];
    for error in &errors {
        lines.push(String::new());
        lines.push("```".to_string());
        lines.push(strip_ansi_escapes(error));
        lines.push("```".to_string());
    }

    if let Some(frame) = location.and_then(code_frame) {
        lines.extend([
            String::new(),
            "# Test source".to_string(),
            String::new(),
            "```ts".to_string(),
            frame,
            "```".to_string(),
        ]);
    }

    Some(lines.join("\n"))
}

/// Source lines around `location`, the failing one marked with `>` and a
/// caret under its column
fn code_frame(location: &SourceLocation) -> Option<String> {
    let context = read_excerpt(&location.file, location.line, FRAME_RADIUS)?;
    let width = context
        .lines
        .last()
        .map(|l| l.number.to_string().len())
        .unwrap_or(1);

    let mut out = Vec::with_capacity(context.lines.len() + 1);
    for line in &context.lines {
        let marker = if line.is_current { '>' } else { ' ' };
        out.push(format!("{} {:>width$} | {}", marker, line.number, line.content, width = width));
        if line.is_current {
            if let Some(column) = location.column.filter(|c| *c > 0) {
                let pad = " ".repeat(column as usize - 1);
                out.push(format!("  {:>width$} | {}^", "", pad, width = width));
            }
        }
    }
    Some(out.join("\n"))
}
