//! Model provider adapters.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{CycleError, Result};
use crate::ports::traits::{Completion, CompletionOptions, Message, ModelProvider};

/// Render messages into a single prompt document.
pub fn render_prompt(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| {
            let role = serde_json::to_value(m.role)
                .ok()
                .and_then(|v| v.as_str().map(str::to_uppercase))
                .unwrap_or_default();
            format!("[{}]\n{}\n", role, m.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Runs an external command per completion.
///
/// The rendered prompt is written to the command's stdin and its stdout is
/// the completion. Sampling options are passed as `COGCYCLE_TEMPERATURE` and
/// `COGCYCLE_MAX_OUTPUT_TOKENS`.
#[derive(Debug, Clone)]
pub struct CommandModel {
    program: String,
    args: Vec<String>,
}

impl CommandModel {
    /// Build from a `[program, args...]` vector.
    pub fn from_argv(argv: &[String]) -> Result<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| CycleError::config("model.command is empty"))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

#[async_trait]
impl ModelProvider for CommandModel {
    async fn complete(
        &self,
        messages: &[Message],
        options: CompletionOptions,
    ) -> Result<Completion> {
        let prompt = render_prompt(messages);

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("COGCYCLE_TEMPERATURE", options.temperature.to_string())
            .env(
                "COGCYCLE_MAX_OUTPUT_TOKENS",
                options.max_output_tokens.to_string(),
            )
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CycleError::collaborator("model", format!("{}: {}", self.program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(|e| CycleError::collaborator("model", e.to_string()))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| CycleError::collaborator("model", e.to_string()))?;

        if !output.status.success() {
            return Err(CycleError::collaborator(
                "model",
                format!(
                    "{} exited with {}: {}",
                    self.program,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }

        Ok(Completion {
            text: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }
}

/// Replays canned responses in order.
///
/// Every request is recorded so callers can inspect the prompts afterwards.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    responses: Mutex<VecDeque<String>>,
    repeat: bool,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedModel {
    /// Respond with each item once, then fail.
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            repeat: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Respond with the items round-robin forever.
    pub fn repeating<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            repeat: true,
            ..Self::new(responses)
        }
    }

    /// Prompts received so far.
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ModelProvider for ScriptedModel {
    async fn complete(
        &self,
        messages: &[Message],
        _options: CompletionOptions,
    ) -> Result<Completion> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(messages.to_vec());
        }

        let mut responses = self
            .responses
            .lock()
            .map_err(|_| CycleError::collaborator("model", "script lock poisoned"))?;
        let text = responses
            .pop_front()
            .ok_or_else(|| CycleError::collaborator("model", "script exhausted"))?;
        if self.repeat {
            responses.push_back(text.clone());
        }
        Ok(Completion { text })
    }
}
