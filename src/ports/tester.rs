//! Self-test runner that shells out to configured commands.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{CycleError, Result};
use crate::ports::traits::{SelfTester, SuiteResult, TestReport, TestSummary};

/// Longest captured output kept per suite.
const MAX_OUTPUT_CHARS: usize = 4000;

/// Runs each command through `sh -c` as one suite. A suite passes on exit 0.
#[derive(Debug, Clone)]
pub struct CommandSelfTester {
    commands: Vec<String>,
    cwd: Option<PathBuf>,
}

impl CommandSelfTester {
    pub fn new(commands: Vec<String>) -> Self {
        Self {
            commands,
            cwd: None,
        }
    }

    /// Run the commands from `cwd`.
    pub fn in_dir(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    async fn run_one(&self, command: &str) -> Result<SuiteResult> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command).kill_on_drop(true);
        if let Some(ref cwd) = self.cwd {
            cmd.current_dir(cwd);
        }

        let output = cmd
            .output()
            .await
            .map_err(|e| CycleError::collaborator("self-test", format!("{}: {}", command, e)))?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        if text.chars().count() > MAX_OUTPUT_CHARS {
            text = text.chars().take(MAX_OUTPUT_CHARS).collect();
        }

        Ok(SuiteResult {
            name: command.to_string(),
            passed: output.status.success(),
            output: text,
        })
    }
}

#[async_trait]
impl SelfTester for CommandSelfTester {
    async fn run_all_tests(&self) -> Result<TestReport> {
        if self.commands.is_empty() {
            return Err(CycleError::collaborator(
                "self-test",
                "no test commands configured",
            ));
        }

        let mut suites = Vec::with_capacity(self.commands.len());
        for command in &self.commands {
            suites.push(self.run_one(command).await?);
        }

        let total = suites.len() as u32;
        let passed = suites.iter().filter(|s| s.passed).count() as u32;
        Ok(TestReport {
            summary: TestSummary {
                passed,
                total,
                success_rate: f64::from(passed) / f64::from(total) * 100.0,
            },
            suites,
        })
    }
}
