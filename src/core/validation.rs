//! Validation gate.
//!
//! Runs the self-tester before a changeset is applied and refuses to apply
//! when the success rate falls below the configured threshold. An unavailable
//! tester passes the gate with a warning unless the gate is fail-closed.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::ValidationConfig;
use crate::ports::{SelfTester, TestReport};

/// What the gate saw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub passed: u32,
    pub total: u32,
    /// Percentage of passing tests.
    pub success_rate: f64,
    /// Names of failing suites.
    pub failed_suites: Vec<String>,
    /// False when the tester was skipped or unavailable.
    pub validated: bool,
    pub message: String,
}

impl std::fmt::Display for ValidationSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// The gate's decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub ok: bool,
    pub summary: ValidationSummary,
}

/// Percentage of passing tests, falling back to the runner's own figure when
/// it reported no counts.
pub fn success_rate(report: &TestReport) -> f64 {
    let summary = &report.summary;
    if summary.total > 0 {
        f64::from(summary.passed) / f64::from(summary.total) * 100.0
    } else {
        summary.success_rate
    }
}

/// Runs self-tests and decides whether apply may proceed.
#[derive(Clone)]
pub struct ValidationGate {
    tester: Option<Arc<dyn SelfTester>>,
    config: ValidationConfig,
}

impl ValidationGate {
    pub fn new(tester: Option<Arc<dyn SelfTester>>, config: ValidationConfig) -> Self {
        Self { tester, config }
    }

    pub fn threshold(&self) -> f64 {
        self.config.threshold
    }

    /// Run the self-tester and decide.
    pub async fn validate(&self) -> ValidationVerdict {
        if !self.config.enabled {
            return self.unvalidated(true, "validation disabled");
        }

        let Some(ref tester) = self.tester else {
            return self.unavailable("no self-tester configured");
        };

        let report = match tester.run_all_tests().await {
            Ok(report) => report,
            Err(err) => return self.unavailable(&err.to_string()),
        };

        let rate = success_rate(&report);
        let ok = rate >= self.config.threshold;
        let failed_suites: Vec<String> = report
            .suites
            .iter()
            .filter(|s| !s.passed)
            .map(|s| s.name.clone())
            .collect();

        let mut message = format!(
            "{}/{} tests passed ({:.1}%, threshold {:.1}%)",
            report.summary.passed, report.summary.total, rate, self.config.threshold
        );
        if !failed_suites.is_empty() {
            message.push_str(&format!("; failing: {}", failed_suites.join(", ")));
        }

        if ok {
            tracing::info!(success_rate = rate, "validation passed");
        } else {
            tracing::warn!(success_rate = rate, threshold = self.config.threshold, "validation failed");
        }

        ValidationVerdict {
            ok,
            summary: ValidationSummary {
                passed: report.summary.passed,
                total: report.summary.total,
                success_rate: rate,
                failed_suites,
                validated: true,
                message,
            },
        }
    }

    fn unavailable(&self, reason: &str) -> ValidationVerdict {
        if self.config.fail_closed {
            tracing::warn!(reason, "self-tester unavailable, failing closed");
            self.unvalidated(false, &format!("self-tester unavailable: {}", reason))
        } else {
            tracing::warn!(reason, "self-tester unavailable, proceeding unvalidated");
            self.unvalidated(true, &format!("unvalidated (self-tester unavailable: {})", reason))
        }
    }

    fn unvalidated(&self, ok: bool, message: &str) -> ValidationVerdict {
        ValidationVerdict {
            ok,
            summary: ValidationSummary {
                passed: 0,
                total: 0,
                success_rate: 0.0,
                failed_suites: Vec::new(),
                validated: false,
                message: message.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CycleError, Result};
    use crate::ports::{SuiteResult, TestSummary};
    use async_trait::async_trait;

    struct FixedTester(u32, u32);

    #[async_trait]
    impl SelfTester for FixedTester {
        async fn run_all_tests(&self) -> Result<TestReport> {
            Ok(TestReport {
                summary: TestSummary {
                    passed: self.0,
                    total: self.1,
                    success_rate: 0.0,
                },
                suites: vec![SuiteResult {
                    name: "unit".to_string(),
                    passed: self.0 == self.1,
                    output: String::new(),
                }],
            })
        }
    }

    struct BrokenTester;

    #[async_trait]
    impl SelfTester for BrokenTester {
        async fn run_all_tests(&self) -> Result<TestReport> {
            Err(CycleError::collaborator("self-test", "runner crashed"))
        }
    }

    fn gate(tester: impl SelfTester + 'static, config: ValidationConfig) -> ValidationGate {
        ValidationGate::new(Some(Arc::new(tester)), config)
    }

    #[tokio::test]
    async fn test_below_threshold_blocks() {
        let verdict = gate(FixedTester(6, 10), ValidationConfig::default()).validate().await;
        assert!(!verdict.ok);
        assert_eq!(verdict.summary.success_rate, 60.0);
        assert!(verdict.summary.message.contains("6/10"));
        assert_eq!(verdict.summary.failed_suites, vec!["unit"]);
    }

    #[tokio::test]
    async fn test_at_threshold_passes() {
        let verdict = gate(FixedTester(8, 10), ValidationConfig::default()).validate().await;
        assert!(verdict.ok);
        assert!(verdict.summary.validated);
    }

    #[tokio::test]
    async fn test_zero_total_uses_reported_rate() {
        let report = TestReport {
            summary: TestSummary {
                passed: 0,
                total: 0,
                success_rate: 92.0,
            },
            suites: Vec::new(),
        };
        assert_eq!(success_rate(&report), 92.0);
    }

    #[tokio::test]
    async fn test_unavailable_fails_open_by_default() {
        let verdict = gate(BrokenTester, ValidationConfig::default()).validate().await;
        assert!(verdict.ok);
        assert!(!verdict.summary.validated);
        assert!(verdict.summary.message.contains("runner crashed"));
    }

    #[tokio::test]
    async fn test_unavailable_fails_closed_when_configured() {
        let config = ValidationConfig {
            fail_closed: true,
            ..ValidationConfig::default()
        };
        let verdict = gate(BrokenTester, config).validate().await;
        assert!(!verdict.ok);
    }

    #[tokio::test]
    async fn test_missing_tester_follows_policy() {
        let open = ValidationGate::new(None, ValidationConfig::default()).validate().await;
        assert!(open.ok);

        let closed = ValidationGate::new(
            None,
            ValidationConfig {
                fail_closed: true,
                ..ValidationConfig::default()
            },
        )
        .validate()
        .await;
        assert!(!closed.ok);
    }

    #[tokio::test]
    async fn test_disabled_skips_tester() {
        let config = ValidationConfig {
            enabled: false,
            ..ValidationConfig::default()
        };
        let verdict = gate(FixedTester(0, 10), config).validate().await;
        assert!(verdict.ok);
        assert!(!verdict.summary.validated);
    }
}
