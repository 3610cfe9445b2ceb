//! Bundle tool backed by an [`ArtifactStore`].
//!
//! Context bundles are markdown documents embedding the selected files.
//! Files that cannot be read as text are listed as skipped instead.
//! Proposal bundles use the `## OPERATION: path` format, so applying a
//! bundle is parse-then-write.

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::change::{fence_len_for, render_changes, Change, Operation};
use crate::core::parser;
use crate::error::Result;
use crate::ports::traits::{ApplyOptions, ApplyResult, ArtifactStore, BundleResult, BundleTool};

/// Builds and applies bundles through an artifact store.
#[derive(Clone)]
pub struct ArtifactBundleTool {
    store: Arc<dyn ArtifactStore>,
}

impl ArtifactBundleTool {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }
}

/// Quote every line so headers in free text are never parsed as changes.
fn quote(text: &str) -> String {
    text.lines()
        .map(|line| format!("> {}", line))
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl BundleTool for ArtifactBundleTool {
    async fn create_context_bundle(
        &self,
        paths: &[String],
        reason: &str,
        target: &str,
    ) -> Result<BundleResult> {
        let mut doc = String::from("# Context Bundle\n\n");
        doc.push_str(&quote(reason));
        doc.push_str("\n\n");

        let mut missing = Vec::new();
        let mut skipped = Vec::new();
        for path in paths {
            let content = match self.store.read(path).await {
                Ok(content) => content,
                Err(err) => {
                    tracing::warn!(path = %path, error = %err, "context bundle skipped unreadable file");
                    skipped.push(path.as_str());
                    continue;
                }
            };
            match content {
                Some(content) => {
                    let fence = "`".repeat(fence_len_for(&content));
                    doc.push_str(&format!("### {}\n{}\n{}", path, fence, content));
                    if !content.ends_with('\n') {
                        doc.push('\n');
                    }
                    doc.push_str(&fence);
                    doc.push_str("\n\n");
                }
                None => missing.push(path.as_str()),
            }
        }

        if !skipped.is_empty() {
            doc.push_str(&format!("Skipped (not readable as text): {}\n", skipped.join(", ")));
        }
        self.store.write(target, &doc).await?;

        let mut message = format!(
            "{} file(s) bundled",
            paths.len() - missing.len() - skipped.len()
        );
        if !missing.is_empty() {
            message.push_str(&format!(", missing: {}", missing.join(", ")));
        }
        if !skipped.is_empty() {
            message.push_str(&format!(", skipped: {}", skipped.join(", ")));
        }

        Ok(BundleResult {
            success: true,
            path: target.to_string(),
            message,
        })
    }

    async fn create_proposal_bundle(
        &self,
        changes: &[Change],
        summary: &str,
        target: &str,
    ) -> Result<BundleResult> {
        let mut doc = String::from("# Proposal\n\n");
        if !summary.trim().is_empty() {
            doc.push_str(&quote(summary));
            doc.push_str("\n\n");
        }
        doc.push_str(&render_changes(changes));

        self.store.write(target, &doc).await?;

        Ok(BundleResult {
            success: true,
            path: target.to_string(),
            message: format!("{} change(s)", changes.len()),
        })
    }

    async fn apply_bundle(&self, path: &str, options: ApplyOptions) -> Result<ApplyResult> {
        let Some(text) = self.store.read(path).await? else {
            return Ok(ApplyResult {
                success: false,
                changes_applied: Vec::new(),
                message: format!("bundle not found: {}", path),
            });
        };

        let changes = parser::parse(&text);
        let mut applied = Vec::with_capacity(changes.len());

        for change in &changes {
            if !options.dry_run {
                let outcome = match (change.operation, change.new_content.as_deref()) {
                    (Operation::Delete, _) => self.store.delete(&change.file_path).await,
                    (_, Some(content)) => self.store.write(&change.file_path, content).await,
                    (_, None) => continue,
                };
                if let Err(err) = outcome {
                    return Ok(ApplyResult {
                        success: false,
                        changes_applied: applied,
                        message: format!("failed at {}: {}", change.file_path, err),
                    });
                }
            }
            applied.push(change.file_path.clone());
        }

        let verb = if options.dry_run { "would apply" } else { "applied" };
        Ok(ApplyResult {
            success: true,
            message: format!("{} {} change(s)", verb, applied.len()),
            changes_applied: applied,
        })
    }
}
