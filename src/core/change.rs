//! File operations proposed by the model.
//!
//! A [`Change`] is one CREATE, MODIFY or DELETE against a canonical rooted
//! path. Changes are rendered back into the same `## OPERATION: path` format
//! the proposal parser reads, so a proposal bundle round-trips through
//! [`render_changes`] and [`crate::core::parser::parse`].

use serde::{Deserialize, Serialize};

/// Kind of file operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    /// Create a new file with the given content.
    Create,
    /// Replace an existing file's content.
    Modify,
    /// Remove a file.
    Delete,
}

impl Operation {
    /// Header keyword for this operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "CREATE",
            Operation::Modify => "MODIFY",
            Operation::Delete => "DELETE",
        }
    }

    /// Parse a header keyword. Matching is case-sensitive.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CREATE" => Some(Operation::Create),
            "MODIFY" => Some(Operation::Modify),
            "DELETE" => Some(Operation::Delete),
            _ => None,
        }
    }

    /// Whether the operation carries a file body.
    pub fn requires_content(&self) -> bool {
        !matches!(self, Operation::Delete)
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single proposed file operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    /// What to do with the file.
    pub operation: Operation,
    /// Canonical rooted path (always starts with a single `/`).
    pub file_path: String,
    /// Full file body for CREATE/MODIFY, `None` for DELETE.
    pub new_content: Option<String>,
}

impl Change {
    /// Create a CREATE change.
    pub fn create(file_path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            operation: Operation::Create,
            file_path: file_path.into(),
            new_content: Some(content.into()),
        }
    }

    /// Create a MODIFY change.
    pub fn modify(file_path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            operation: Operation::Modify,
            file_path: file_path.into(),
            new_content: Some(content.into()),
        }
    }

    /// Create a DELETE change.
    pub fn delete(file_path: impl Into<String>) -> Self {
        Self {
            operation: Operation::Delete,
            file_path: file_path.into(),
            new_content: None,
        }
    }

    /// Check that content presence matches the operation.
    pub fn is_well_formed(&self) -> bool {
        self.operation.requires_content() == self.new_content.is_some()
    }
}

/// Normalize a raw path into canonical rooted form.
///
/// Strips surrounding whitespace, quotes and backticks, collapses empty and
/// `.` segments, and enforces a single leading `/`. Returns `None` for empty
/// paths and for paths that try to escape the root with `..`.
pub fn normalize_path(raw: &str) -> Option<String> {
    let trimmed = raw
        .trim()
        .trim_matches(|c| c == '`' || c == '"' || c == '\'')
        .trim();

    let mut segments = Vec::new();
    for segment in trimmed.split(['/', '\\']) {
        match segment {
            "" | "." => continue,
            ".." => return None,
            s => segments.push(s),
        }
    }

    if segments.is_empty() {
        return None;
    }

    Some(format!("/{}", segments.join("/")))
}

/// Render changes in the proposal format understood by the parser.
pub fn render_changes(changes: &[Change]) -> String {
    let mut out = String::new();

    for change in changes {
        out.push_str(&format!(
            "## {}: {}\n",
            change.operation.as_str(),
            change.file_path
        ));
        if let Some(ref content) = change.new_content {
            let fence = "`".repeat(fence_len_for(content));
            out.push_str(&fence);
            out.push('\n');
            out.push_str(content);
            if !content.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&fence);
            out.push('\n');
        }
        out.push('\n');
    }

    out
}

/// Pick a fence longer than any backtick run in the content.
pub(crate) fn fence_len_for(content: &str) -> usize {
    let mut longest = 0;
    let mut run = 0;
    for c in content.chars() {
        if c == '`' {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    (longest + 1).max(3)
}
