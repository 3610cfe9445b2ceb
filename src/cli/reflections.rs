//! Reflections command for cogcycle.
//!
//! Lists persisted reflections, newest first.

use serde::Serialize;

use crate::core::reflection::Reflection;
use crate::ports::ReflectionStore;

/// Options for the reflections command.
#[derive(Debug, Clone, Default)]
pub struct ReflectionsOptions {
    pub json: bool,
    pub quiet: bool,
    pub limit: usize,
}

/// Output format for the reflections command.
#[derive(Debug, Clone, Serialize)]
pub struct ReflectionsOutput {
    pub success: bool,
    pub reflections: Vec<Reflection>,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReflectionsOutput {
    pub fn success(reflections: Vec<Reflection>) -> Self {
        Self {
            success: true,
            count: reflections.len(),
            reflections,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            reflections: vec![],
            count: 0,
            error: Some(error.into()),
        }
    }

    /// Format as human-readable text.
    pub fn format_text(&self) -> String {
        if !self.success {
            return format!(
                "Reflections failed: {}",
                self.error.as_deref().unwrap_or("unknown error")
            );
        }

        if self.reflections.is_empty() {
            return "No reflections found.".to_string();
        }

        let mut lines = vec![format!("Reflections ({} found):", self.count)];
        for r in &self.reflections {
            lines.push(String::new());
            lines.push(format!(
                "[{}] turn {} {} ({:.0}% success, {} applied)",
                r.created_at.format("%Y-%m-%d %H:%M"),
                r.turn,
                r.outcome.as_str(),
                r.metrics.success_rate,
                r.metrics.changes_applied
            ));
            lines.push(format!("  Goal: {}", first_line(&r.goal)));
            lines.push(format!("  Insight: {}", r.insight));
            for rec in &r.recommendations {
                lines.push(format!("  - {}", rec));
            }
        }

        lines.join("\n")
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

/// The reflections command implementation.
pub struct ReflectionsCommand<R: ReflectionStore> {
    store: R,
}

impl<R: ReflectionStore> ReflectionsCommand<R> {
    pub fn new(store: R) -> Self {
        Self { store }
    }

    pub async fn run(&self, options: &ReflectionsOptions) -> ReflectionsOutput {
        match self.store.list(options.limit).await {
            Ok(reflections) => ReflectionsOutput::success(reflections),
            Err(e) => ReflectionsOutput::failure(format!("Failed to read reflections: {}", e)),
        }
    }

    pub fn format_output(
        &self,
        output: &ReflectionsOutput,
        options: &ReflectionsOptions,
    ) -> String {
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
