//! Immutable outcome of a single operation.
//!
//! `OperationResult` is a value: the builder-style methods consume `self` and
//! return the modified copy, so a result handed to a session can never be
//! changed behind its back.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::component::Subject;

/// Status of an operation result.
///
/// Checks report `Pass | Warning | Fail`; installers report
/// `Pending | InProgress | Completed | Failed | Skipped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pass,
    Warning,
    Fail,
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pass => "pass",
            Status::Warning => "warning",
            Status::Fail => "fail",
            Status::Pending => "pending",
            Status::InProgress => "in_progress",
            Status::Completed => "completed",
            Status::Failed => "failed",
            Status::Skipped => "skipped",
        }
    }

    /// Short marker for terminal output.
    pub fn icon(&self) -> &'static str {
        match self {
            Status::Pass | Status::Completed => "✓",
            Status::Warning => "!",
            Status::Fail | Status::Failed => "✗",
            Status::Pending | Status::InProgress => "…",
            Status::Skipped => "-",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much a failing check matters. Only `Critical` failures block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Outcome of one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    /// Stable name of the operation that produced this result
    pub operation: String,
    pub subject: Subject,
    pub status: Status,
    /// Set for checks only
    pub severity: Option<Severity>,
    pub message: String,
    pub details: Vec<String>,
    pub suggestions: Vec<String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl OperationResult {
    /// Start a result for an installer-style operation.
    pub fn new(
        operation: impl Into<String>,
        subject: impl Into<Subject>,
        status: Status,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation: operation.into(),
            subject: subject.into(),
            status,
            severity: None,
            message: message.into(),
            details: Vec::new(),
            suggestions: Vec::new(),
            error: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Start a result for a check, which always carries a severity.
    pub fn check(
        operation: impl Into<String>,
        subject: impl Into<Subject>,
        status: Status,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self::new(operation, subject, status, message).with_severity(severity)
    }

    /// A `Failed` result synthesized from an execution error.
    pub fn failed(
        operation: impl Into<String>,
        subject: impl Into<Subject>,
        error: &anyhow::Error,
    ) -> Self {
        let operation = operation.into();
        let message = format!("{} failed: {}", operation, error);
        Self::new(operation, subject, Status::Failed, message).with_error(format!("{:#}", error))
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.details.push(detail.into());
        self
    }

    pub fn with_details<I, S>(mut self, details: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.details.extend(details.into_iter().map(Into::into));
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_error(mut self, error: impl std::fmt::Display) -> Self {
        self.error = Some(error.to_string());
        self
    }

    pub fn started_at(mut self, at: DateTime<Utc>) -> Self {
        self.started_at = at;
        self
    }

    pub fn finished_at(mut self, at: DateTime<Utc>) -> Self {
        self.ended_at = Some(at);
        self
    }

    /// Stamp the end time if the operation did not already.
    pub fn finished(self) -> Self {
        if self.ended_at.is_some() {
            return self;
        }
        self.finished_at(Utc::now())
    }

    /// `end - start` once finished, otherwise time elapsed so far.
    pub fn duration(&self) -> Duration {
        let end = self.ended_at.unwrap_or_else(Utc::now);
        end - self.started_at
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration().num_milliseconds().max(0) as u64
    }

    /// A hard failure: an installer `Failed`, or a check `Fail` of critical severity.
    pub fn is_blocking(&self) -> bool {
        match self.status {
            Status::Failed => true,
            Status::Fail => self.severity.unwrap_or(Severity::Critical) == Severity::Critical,
            _ => false,
        }
    }

    /// Warning, or a non-blocking check failure.
    pub fn is_warning(&self) -> bool {
        match self.status {
            Status::Warning => true,
            Status::Fail => !self.is_blocking(),
            _ => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.status, Status::Pending | Status::InProgress)
    }

    /// Whether the operation changed the system and so may be undone.
    pub fn applied(&self) -> bool {
        matches!(self.status, Status::Completed | Status::Warning)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::component::{CheckId, Component};

    #[test]
    fn test_builder_returns_new_copy() {
        let base = OperationResult::new("install:core", Component::Core, Status::Pending, "queued");
        let done = base
            .clone()
            .with_status(Status::Completed)
            .with_detail("sway 1.8.1-2");
        assert_eq!(base.status, Status::Pending);
        assert!(base.details.is_empty());
        assert_eq!(done.status, Status::Completed);
        assert_eq!(done.details, vec!["sway 1.8.1-2".to_string()]);
    }

    #[test]
    fn test_duration_uses_end_when_finished() {
        let start = Utc::now() - Duration::seconds(10);
        let end = start + Duration::seconds(4);
        let r = OperationResult::new("x", Component::Core, Status::Completed, "")
            .started_at(start)
            .finished_at(end);
        assert_eq!(r.duration(), Duration::seconds(4));
        assert_eq!(r.duration_ms(), 4000);
    }

    #[test]
    fn test_duration_running_uses_now() {
        let start = Utc::now() - Duration::seconds(5);
        let r = OperationResult::new("x", Component::Core, Status::InProgress, "")
            .started_at(start);
        assert!(r.duration() >= Duration::seconds(5));
    }

    #[test]
    fn test_finished_keeps_existing_end() {
        let end = Utc::now() - Duration::seconds(30);
        let r = OperationResult::new("x", Component::Core, Status::Completed, "")
            .started_at(end - Duration::seconds(1))
            .finished_at(end)
            .finished();
        assert_eq!(r.ended_at, Some(end));
    }

    #[test]
    fn test_blocking_only_for_critical_checks() {
        let critical = OperationResult::check(
            "preflight:disk-space",
            CheckId::DiskSpace,
            Status::Fail,
            Severity::Critical,
            "5GB available, 10GB required",
        );
        let high = OperationResult::check(
            "preflight:network",
            CheckId::NetworkReachability,
            Status::Fail,
            Severity::High,
            "mirror unreachable",
        );
        assert!(critical.is_blocking());
        assert!(!critical.is_warning());
        assert!(!high.is_blocking());
        assert!(high.is_warning());
    }

    #[test]
    fn test_failed_installer_is_blocking() {
        let err = anyhow::anyhow!("apt exited with 100");
        let r = OperationResult::failed("install:core", Component::Core, &err);
        assert!(r.is_blocking());
        assert_eq!(r.status, Status::Failed);
        assert!(r.error.as_deref().unwrap().contains("100"));
        assert!(r.message.contains("install:core"));
    }

    #[test]
    fn test_applied_statuses() {
        let mk = |s| OperationResult::new("x", Component::Core, s, "");
        assert!(mk(Status::Completed).applied());
        assert!(mk(Status::Warning).applied());
        assert!(!mk(Status::Skipped).applied());
        assert!(!mk(Status::Failed).applied());
        assert!(!mk(Status::Pass).applied());
    }
}
