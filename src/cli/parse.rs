//! Parse command for cogcycle.
//!
//! Runs the proposal parser over a file or stdin and reports the changes it
//! recognised, which is handy when tuning a model prompt.

use serde::{Deserialize, Serialize};

use crate::core::change::{Change, Operation};
use crate::core::parser::{parse_with_report, ParseWarning};

/// Options for the parse command.
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    /// Output as JSON.
    pub json: bool,
    /// Suppress output.
    pub quiet: bool,
}

/// Summary of one parsed change for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeSummary {
    pub operation: Operation,
    pub file_path: String,
    /// Body length in lines, `None` for DELETE.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lines: Option<usize>,
}

impl From<&Change> for ChangeSummary {
    fn from(change: &Change) -> Self {
        Self {
            operation: change.operation,
            file_path: change.file_path.clone(),
            lines: change.new_content.as_ref().map(|c| c.lines().count()),
        }
    }
}

/// Output format for the parse command.
#[derive(Debug, Clone, Serialize)]
pub struct ParseOutput {
    pub success: bool,
    pub changes: Vec<ChangeSummary>,
    pub count: usize,
    pub warnings: Vec<ParseWarning>,
}

impl ParseOutput {
    /// Format as human-readable text.
    pub fn format_text(&self) -> String {
        if self.changes.is_empty() && self.warnings.is_empty() {
            return "No changes found.".to_string();
        }

        let mut lines = vec![format!("Changes ({} found):", self.count)];
        for change in &self.changes {
            let detail = change
                .lines
                .map(|n| format!(" ({} lines)", n))
                .unwrap_or_default();
            lines.push(format!(
                "  {:<6}  {}{}",
                change.operation.as_str(),
                change.file_path,
                detail
            ));
        }

        if !self.warnings.is_empty() {
            lines.push(String::new());
            lines.push(format!("Warnings ({}):", self.warnings.len()));
            for warning in &self.warnings {
                lines.push(format!("  line {}: {}", warning.line, warning.message));
            }
        }

        lines.join("\n")
    }
}

/// The parse command implementation.
#[derive(Debug, Default)]
pub struct ParseCommand;

impl ParseCommand {
    pub fn new() -> Self {
        Self
    }

    /// Parse `text` as a proposal.
    pub fn run(&self, text: &str) -> ParseOutput {
        let report = parse_with_report(text);
        let changes: Vec<ChangeSummary> = report.changes.iter().map(ChangeSummary::from).collect();
        ParseOutput {
            success: true,
            count: changes.len(),
            changes,
            warnings: report.warnings,
        }
    }

    /// Format output based on options.
    pub fn format_output(&self, output: &ParseOutput, options: &ParseOptions) -> String {
        if options.quiet {
            return String::new();
        }
        if options.json {
            serde_json::to_string_pretty(output).unwrap_or_else(|_| "{}".to_string())
        } else {
            output.format_text()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROPOSAL: &str = "## CREATE: src/a.rs\n```rust\nfn a() {}\nfn b() {}\n```\n\n## DELETE: old.txt\n";

    #[test]
    fn test_parse_reports_changes() {
        let output = ParseCommand::new().run(PROPOSAL);

        assert!(output.success);
        assert_eq!(output.count, 2);
        assert_eq!(output.changes[0].file_path, "/src/a.rs");
        assert_eq!(output.changes[0].lines, Some(2));
        assert_eq!(output.changes[1].operation, Operation::Delete);
        assert_eq!(output.changes[1].lines, None);
    }

    #[test]
    fn test_format_text_lists_changes() {
        let cmd = ParseCommand::new();
        let output = cmd.run(PROPOSAL);
        let text = cmd.format_output(&output, &ParseOptions::default());

        assert!(text.contains("Changes (2 found):"));
        assert!(text.contains("CREATE  /src/a.rs (2 lines)"));
        assert!(text.contains("DELETE  /old.txt"));
    }

    #[test]
    fn test_empty_input() {
        let output = ParseCommand::new().run("just prose");
        assert_eq!(output.count, 0);
        assert_eq!(output.format_text(), "No changes found.");
    }

    #[test]
    fn test_json_and_quiet() {
        let cmd = ParseCommand::new();
        let output = cmd.run(PROPOSAL);

        let json = cmd.format_output(
            &output,
            &ParseOptions {
                json: true,
                quiet: false,
            },
        );
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["count"], 2);

        let quiet = cmd.format_output(
            &output,
            &ParseOptions {
                json: false,
                quiet: true,
            },
        );
        assert!(quiet.is_empty());
    }
}
