//! Collaborator ports and their adapters.

pub mod artifact;
pub mod bundle;
pub mod checkpoint;
pub mod journal;
pub mod model;
pub mod reflections;
pub mod tester;
pub mod traits;

pub use artifact::{FileArtifactStore, MemoryArtifactStore};
pub use bundle::ArtifactBundleTool;
pub use checkpoint::{CommitRecord, SnapshotCheckpointStore};
pub use journal::JsonlJournal;
pub use model::{CommandModel, ScriptedModel};
pub use reflections::{JsonlReflectionStore, MemoryReflectionStore};
pub use tester::CommandSelfTester;
pub use traits::{
    ApplyOptions, ApplyResult, ArtifactMeta, ArtifactStore, BundleResult, BundleTool, Checkpoint,
    CheckpointStore, Collaborators, CommitMetadata, Completion, CompletionOptions, Message,
    ModelProvider, ReflectionStore, Role, SelfTester, SuiteResult, TestReport, TestSummary,
};
