//! Proposal parser.
//!
//! Turns semi-structured model output into an ordered list of [`Change`]s.
//! The input is scanned once, line by line, by a small state machine:
//!
//! ```text
//! SeekHeader --"## OP: path"--> AwaitBody --fence open--> InBody --fence close--> SeekHeader
//!     |                                                                 ^
//!     +--fence open (no header)--> SkipBlock --fence close--------------+
//! ```
//!
//! A fence closes only on a bare backtick line at least as long as the line
//! that opened it, so fences inside a file body (for example a README with a
//! code sample) never terminate the block early. Headers that appear inside
//! any fenced block are body text. Malformed entries are skipped with a
//! warning; parsing never fails.

use serde::Serialize;

use crate::core::change::{normalize_path, Change, Operation};

/// Minimum number of backticks that open a fence.
const MIN_FENCE: usize = 3;

/// A non-fatal problem found while parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseWarning {
    /// 1-based line number the problem relates to.
    pub line: usize,
    /// Human-readable description.
    pub message: String,
}

/// Parsed changes plus the warnings produced along the way.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParseReport {
    /// Changes in order of appearance.
    pub changes: Vec<Change>,
    /// Skipped entries and other anomalies.
    pub warnings: Vec<ParseWarning>,
}

/// A recognised `## OPERATION: path` header.
#[derive(Debug, Clone)]
struct Header {
    operation: Operation,
    /// Normalized path, or `None` if the raw path was rejected.
    path: Option<String>,
    raw_path: String,
    line: usize,
}

#[derive(Debug)]
enum ScanState<'a> {
    /// Looking for the next header.
    SeekHeader,
    /// Saw a CREATE/MODIFY header, waiting for its fenced body.
    AwaitBody(Header),
    /// Collecting body lines for a header.
    InBody {
        header: Header,
        fence: usize,
        lines: Vec<&'a str>,
    },
    /// Inside a fenced block that belongs to no header.
    SkipBlock { fence: usize },
}

/// Parse proposal text into changes, discarding warnings after logging them.
pub fn parse(text: &str) -> Vec<Change> {
    parse_with_report(text).changes
}

/// Parse proposal text and return changes together with warnings.
pub fn parse_with_report(text: &str) -> ParseReport {
    let mut report = ParseReport::default();
    let mut state = ScanState::SeekHeader;

    for (index, line) in text.lines().enumerate() {
        let line_no = index + 1;
        state = match state {
            ScanState::SeekHeader => seek_header(line, line_no, &mut report),
            ScanState::AwaitBody(header) => {
                if let Some(fence) = fence_open(line) {
                    ScanState::InBody {
                        header,
                        fence,
                        lines: Vec::new(),
                    }
                } else if parse_header(line, line_no).is_some() {
                    warn(
                        &mut report,
                        header.line,
                        format!(
                            "{} {} has no content block; skipped",
                            header.operation, header.raw_path
                        ),
                    );
                    seek_header(line, line_no, &mut report)
                } else {
                    ScanState::AwaitBody(header)
                }
            }
            ScanState::InBody {
                header,
                fence,
                mut lines,
            } => {
                if is_fence_close(line, fence) {
                    finish_body(header, &lines, &mut report);
                    ScanState::SeekHeader
                } else {
                    lines.push(line);
                    ScanState::InBody {
                        header,
                        fence,
                        lines,
                    }
                }
            }
            ScanState::SkipBlock { fence } => {
                if is_fence_close(line, fence) {
                    ScanState::SeekHeader
                } else {
                    ScanState::SkipBlock { fence }
                }
            }
        };
    }

    match state {
        ScanState::AwaitBody(header) => warn(
            &mut report,
            header.line,
            format!(
                "{} {} has no content block; skipped",
                header.operation, header.raw_path
            ),
        ),
        ScanState::InBody { header, .. } => warn(
            &mut report,
            header.line,
            format!(
                "{} {} has an unterminated content block; skipped",
                header.operation, header.raw_path
            ),
        ),
        ScanState::SeekHeader | ScanState::SkipBlock { .. } => {}
    }

    if report.changes.is_empty() {
        tracing::warn!("proposal parse produced no changes");
    }

    report
}

/// Handle a line while looking for a header.
fn seek_header<'a>(line: &str, line_no: usize, report: &mut ParseReport) -> ScanState<'a> {
    if let Some(header) = parse_header(line, line_no) {
        if header.operation.requires_content() {
            return ScanState::AwaitBody(header);
        }
        match header.path {
            Some(path) => report.changes.push(Change::delete(path)),
            None => warn(
                report,
                line_no,
                format!("invalid path '{}' for DELETE; skipped", header.raw_path),
            ),
        }
        return ScanState::SeekHeader;
    }

    match fence_open(line) {
        Some(fence) => ScanState::SkipBlock { fence },
        None => ScanState::SeekHeader,
    }
}

/// Emit the change for a completed body, if its header was valid.
fn finish_body(header: Header, lines: &[&str], report: &mut ParseReport) {
    let Some(path) = header.path else {
        warn(
            report,
            header.line,
            format!(
                "invalid path '{}' for {}; skipped",
                header.raw_path, header.operation
            ),
        );
        return;
    };

    let content = lines.join("\n").trim().to_string();
    report.changes.push(Change {
        operation: header.operation,
        file_path: path,
        new_content: Some(content),
    });
}

/// Recognise `## OPERATION: path`.
fn parse_header(line: &str, line_no: usize) -> Option<Header> {
    let rest = line.trim_end().strip_prefix("## ")?;
    let (keyword, raw_path) = rest.split_once(':')?;
    let operation = Operation::parse(keyword.trim())?;

    Some(Header {
        operation,
        path: normalize_path(raw_path),
        raw_path: raw_path.trim().to_string(),
        line: line_no,
    })
}

/// Length of the opening fence on this line, if it opens one.
fn fence_open(line: &str) -> Option<usize> {
    let ticks = line
        .trim_start()
        .chars()
        .take_while(|&c| c == '`')
        .count();
    (ticks >= MIN_FENCE).then_some(ticks)
}

/// Whether this line closes a fence opened with `open` backticks.
fn is_fence_close(line: &str, open: usize) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty() && trimmed.chars().all(|c| c == '`') && trimmed.len() >= open
}

fn warn(report: &mut ParseReport, line: usize, message: String) {
    tracing::warn!(line, "{}", message);
    report.warnings.push(ParseWarning { line, message });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::change::render_changes;

    #[test]
    fn test_create_then_delete() {
        let text = "## CREATE: /a.txt\n```\nhello\n```\n## DELETE: /b.txt";
        let changes = parse(text);

        assert_eq!(
            changes,
            vec![Change::create("/a.txt", "hello"), Change::delete("/b.txt")]
        );
    }

    #[test]
    fn test_order_matches_input() {
        let text = "\
## MODIFY: src/lib.rs
```rust
pub fn a() {}
```

## DELETE: old.rs

## CREATE: src/new.rs
```
pub fn b() {}
```
";
        let paths: Vec<String> = parse(text).into_iter().map(|c| c.file_path).collect();
        assert_eq!(paths, vec!["/src/lib.rs", "/old.rs", "/src/new.rs"]);
    }

    #[test]
    fn test_content_is_trimmed() {
        let text = "## CREATE: /a.txt\n```\n\n   hello\n\n```\n";
        let changes = parse(text);
        assert_eq!(changes[0].new_content.as_deref(), Some("hello"));
    }

    #[test]
    fn test_prose_between_header_and_fence_is_ignored() {
        let text = "## MODIFY: /a.rs\nHere is the new file:\n```rust\nfn a() {}\n```";
        let changes = parse(text);
        assert_eq!(changes, vec![Change::modify("/a.rs", "fn a() {}")]);
    }

    #[test]
    fn test_nested_fence_does_not_close_block() {
        let text = "\
## CREATE: /README.md
````markdown
# Title
```rust
fn main() {}
```
## DELETE: /not-a-header.txt
````
## DELETE: /gone.txt
";
        let changes = parse(text);

        assert_eq!(changes.len(), 2);
        let body = changes[0].new_content.as_deref().unwrap();
        assert!(body.contains("```rust"));
        assert!(body.contains("## DELETE: /not-a-header.txt"));
        assert_eq!(changes[1], Change::delete("/gone.txt"));
    }

    #[test]
    fn test_fence_with_info_string_does_not_close() {
        let text = "## CREATE: /a.md\n```\nline\n```text\nmore\n```\n";
        let changes = parse(text);
        assert_eq!(changes[0].new_content.as_deref(), Some("line\n```text\nmore"));
    }

    #[test]
    fn test_headers_inside_unrelated_blocks_are_ignored() {
        let text = "Example format:\n```\n## DELETE: /example.txt\n```\n## DELETE: /real.txt\n";
        assert_eq!(parse(text), vec![Change::delete("/real.txt")]);
    }

    #[test]
    fn test_content_block_after_delete_is_swallowed() {
        let text = "## DELETE: /a.txt\n```\n## CREATE: /b.txt\n```\n";
        assert_eq!(parse(text), vec![Change::delete("/a.txt")]);
    }

    #[test]
    fn test_lowercase_operation_is_not_a_header() {
        let text = "## create: /a.txt\n```\nx\n```\n";
        assert!(parse(text).is_empty());
    }

    #[test]
    fn test_missing_content_is_skipped_with_warning() {
        let text = "## CREATE: /a.txt\n## DELETE: /b.txt\n";
        let report = parse_with_report(text);

        assert_eq!(report.changes, vec![Change::delete("/b.txt")]);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].line, 1);
        assert!(report.warnings[0].message.contains("no content block"));
    }

    #[test]
    fn test_unterminated_block_is_skipped() {
        let text = "## DELETE: /x\n## CREATE: /a.txt\n```\nnever closed";
        let report = parse_with_report(text);

        assert_eq!(report.changes, vec![Change::delete("/x")]);
        assert!(report.warnings[0].message.contains("unterminated"));
    }

    #[test]
    fn test_invalid_path_skipped_and_block_consumed() {
        let text = "## CREATE:    \n```\n## DELETE: /inside.txt\n```\n## DELETE: ../escape\n## DELETE: /ok\n";
        let report = parse_with_report(text);

        assert_eq!(report.changes, vec![Change::delete("/ok")]);
        assert_eq!(report.warnings.len(), 2);
    }

    #[test]
    fn test_path_normalized() {
        let text = "## DELETE: ///a//b.txt\n";
        assert_eq!(parse(text), vec![Change::delete("/a/b.txt")]);
    }

    #[test]
    fn test_empty_input_returns_empty() {
        let report = parse_with_report("");
        assert!(report.changes.is_empty());
        assert!(report.warnings.is_empty());
        assert!(parse("no headers here at all").is_empty());
    }

    #[test]
    fn test_render_then_parse_preserves_nested_fences() {
        let changes = vec![
            Change::create("/docs/guide.md", "# Guide\n```sh\ncargo run\n```"),
            Change::delete("/tmp.txt"),
        ];
        assert_eq!(parse(&render_changes(&changes)), changes);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            // Property: arbitrary input never panics, and every change is well formed
            #[test]
            fn prop_parse_total_and_well_formed(text in "(## (CREATE|MODIFY|DELETE): [a-z/]{0,8}\n|```\n|[a-z ]{0,12}\n){0,20}") {
                for change in parse(&text) {
                    prop_assert!(change.is_well_formed());
                    prop_assert!(change.file_path.starts_with('/'));
                    prop_assert!(!change.file_path.starts_with("//"));
                }
            }

            // Property: rendered changes parse back in order
            #[test]
            fn prop_rendered_changes_parse_back(
                names in proptest::collection::vec("[a-z]{1,8}", 1..6),
                bodies in proptest::collection::vec("[a-z`]{1,5}( [a-z]{1,5}){0,4}", 6),
                deletes in proptest::collection::vec(any::<bool>(), 6),
            ) {
                let changes: Vec<Change> = names
                    .iter()
                    .enumerate()
                    .map(|(i, name)| {
                        let path = format!("/{}.txt", name);
                        if deletes[i] {
                            Change::delete(path)
                        } else {
                            Change::create(path, bodies[i].trim())
                        }
                    })
                    .collect();

                prop_assert_eq!(parse(&render_changes(&changes)), changes);
            }
        }
    }
}
