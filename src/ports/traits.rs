//! Collaborator traits consumed by the cycle engine.
//!
//! The engine never talks to a file system, model, test runner or VCS
//! directly. Each concern is a trait object held behind an `Arc`, so the
//! binary wires real adapters and tests wire scripted ones.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::change::Change;
use crate::core::reflection::Reflection;
use crate::error::Result;

// ============================================================================
// Artifact storage
// ============================================================================

/// Metadata for one stored artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    /// Canonical rooted path.
    pub path: String,
    /// Content length in bytes.
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Read/write access to the managed file tree.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Read an artifact. Returns `Ok(None)` if it does not exist.
    async fn read(&self, path: &str) -> Result<Option<String>>;

    /// Create or replace an artifact.
    async fn write(&self, path: &str, content: &str) -> Result<()>;

    /// Remove an artifact. Removing a missing artifact succeeds.
    async fn delete(&self, path: &str) -> Result<()>;

    /// List artifacts, sorted by path.
    async fn list(&self) -> Result<Vec<ArtifactMeta>>;
}

// ============================================================================
// Model provider
// ============================================================================

/// Message role in a completion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message in a completion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Sampling options for a completion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

/// Text returned by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
}

/// Language model used for curation, planning and proposals.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn complete(&self, messages: &[Message], options: CompletionOptions)
        -> Result<Completion>;
}

// ============================================================================
// Bundle tool
// ============================================================================

/// Result of building a context or proposal bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleResult {
    pub success: bool,
    /// Where the bundle was written.
    pub path: String,
    #[serde(default)]
    pub message: String,
}

/// Options for applying a proposal bundle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyOptions {
    /// Report what would change without writing.
    pub dry_run: bool,
}

/// Result of applying a proposal bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyResult {
    pub success: bool,
    /// Paths that were written or deleted.
    pub changes_applied: Vec<String>,
    pub message: String,
}

/// Builds context/proposal bundles and applies approved proposals.
#[async_trait]
pub trait BundleTool: Send + Sync {
    /// Write a bundle of the given files to `target`.
    async fn create_context_bundle(
        &self,
        paths: &[String],
        reason: &str,
        target: &str,
    ) -> Result<BundleResult>;

    /// Write the changeset to `target` in proposal format.
    async fn create_proposal_bundle(
        &self,
        changes: &[Change],
        summary: &str,
        target: &str,
    ) -> Result<BundleResult>;

    /// Apply the proposal bundle at `path`.
    async fn apply_bundle(&self, path: &str, options: ApplyOptions) -> Result<ApplyResult>;
}

// ============================================================================
// Self-tester
// ============================================================================

/// Aggregate test numbers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TestSummary {
    pub passed: u32,
    pub total: u32,
    /// Percentage reported by the runner, used when `total` is zero.
    pub success_rate: f64,
}

/// One test suite's outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteResult {
    pub name: String,
    pub passed: bool,
    #[serde(default)]
    pub output: String,
}

/// Full report from a self-test run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestReport {
    pub summary: TestSummary,
    pub suites: Vec<SuiteResult>,
}

/// Runs the project's self-tests before a changeset is applied.
#[async_trait]
pub trait SelfTester: Send + Sync {
    async fn run_all_tests(&self) -> Result<TestReport>;
}

// ============================================================================
// Checkpoints
// ============================================================================

/// A recoverable snapshot of the managed tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub label: String,
    pub created_at: DateTime<Utc>,
}

/// Audit metadata attached to a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMetadata {
    pub session_id: String,
    pub turn: u32,
    pub checkpoint_id: Option<String>,
    pub changes: Vec<String>,
}

/// Checkpoint and commit backend.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn create_checkpoint(&self, label: &str) -> Result<Checkpoint>;

    /// Record an auditable commit. Returns the commit id.
    async fn commit_changes(&self, message: &str, metadata: CommitMetadata) -> Result<String>;
}

// ============================================================================
// Reflection store
// ============================================================================

/// Structured persistence for reflection records.
#[async_trait]
pub trait ReflectionStore: Send + Sync {
    /// Store a reflection. Returns its id.
    async fn add_reflection(&self, reflection: &Reflection) -> Result<String>;

    /// Most recent reflections, newest first.
    async fn list(&self, limit: usize) -> Result<Vec<Reflection>>;
}

// ============================================================================
// Collaborator bundle
// ============================================================================

/// Everything the engine needs from the outside world.
#[derive(Clone)]
pub struct Collaborators {
    pub artifacts: Arc<dyn ArtifactStore>,
    pub model: Arc<dyn ModelProvider>,
    pub bundles: Arc<dyn BundleTool>,
    /// `None` when no self-test runner is configured.
    pub tester: Option<Arc<dyn SelfTester>>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub reflections: Arc<dyn ReflectionStore>,
}
