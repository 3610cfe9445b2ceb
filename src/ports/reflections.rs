//! Reflection store adapters.

use std::sync::RwLock;

use async_trait::async_trait;

use crate::core::reflection::Reflection;
use crate::error::{CycleError, Result};
use crate::ports::journal::JsonlJournal;
use crate::ports::traits::ReflectionStore;

/// Appends reflections to a JSONL file.
#[derive(Debug, Clone)]
pub struct JsonlReflectionStore {
    journal: JsonlJournal,
}

impl JsonlReflectionStore {
    pub fn new(journal: JsonlJournal) -> Self {
        Self { journal }
    }
}

#[async_trait]
impl ReflectionStore for JsonlReflectionStore {
    async fn add_reflection(&self, reflection: &Reflection) -> Result<String> {
        self.journal.append(reflection)?;
        Ok(reflection.id.clone())
    }

    async fn list(&self, limit: usize) -> Result<Vec<Reflection>> {
        let all: Vec<Reflection> = self.journal.read_all()?;
        Ok(all.into_iter().rev().take(limit).collect())
    }
}

/// In-memory reflection store.
#[derive(Debug, Default)]
pub struct MemoryReflectionStore {
    reflections: RwLock<Vec<Reflection>>,
}

impl MemoryReflectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.reflections.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ReflectionStore for MemoryReflectionStore {
    async fn add_reflection(&self, reflection: &Reflection) -> Result<String> {
        self.reflections
            .write()
            .map_err(|_| CycleError::invalid_state("reflection store lock poisoned"))?
            .push(reflection.clone());
        Ok(reflection.id.clone())
    }

    async fn list(&self, limit: usize) -> Result<Vec<Reflection>> {
        let reflections = self
            .reflections
            .read()
            .map_err(|_| CycleError::invalid_state("reflection store lock poisoned"))?;
        Ok(reflections.iter().rev().take(limit).cloned().collect())
    }
}
