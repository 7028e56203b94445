//! Component build job record and its state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use super::errors::TransitionError;
use super::ids::{JobId, TaskId};

/// Build job status.
///
/// State transitions:
/// - Pending -> Building -> Complete
/// - Pending -> Building -> Failed
/// - Failed -> Building (explicit fix action only, increments retry_count)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildJobStatus {
    Pending,
    Building,
    Complete,
    Failed,
}

impl BuildJobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BuildJobStatus::Pending => "pending",
            BuildJobStatus::Building => "building",
            BuildJobStatus::Complete => "complete",
            BuildJobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for BuildJobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One code-generation-to-artifact build attempt, persisted by the
/// build job store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentBuildJob {
    pub id: JobId,
    pub project_id: String,

    /// Task that requested this build, when there is one.
    pub task_id: Option<TaskId>,

    pub name: String,
    pub source: String,
    pub status: BuildJobStatus,

    /// Number of fix actions applied so far.
    pub retry_count: u32,

    /// Failures since the last successful build; drives auto-retry.
    pub consecutive_failures: u32,

    pub output_url: Option<String>,
    pub error_message: Option<String>,

    #[serde(default)]
    pub diagnostics: Vec<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ComponentBuildJob {
    pub fn new(project_id: impl Into<String>, name: impl Into<String>, source: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::from_ulid(Ulid::new()),
            project_id: project_id.into(),
            task_id: None,
            name: name.into(),
            source: source.into(),
            status: BuildJobStatus::Pending,
            retry_count: 0,
            consecutive_failures: 0,
            output_url: None,
            error_message: None,
            diagnostics: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn for_task(mut self, task_id: TaskId) -> Self {
        self.task_id = Some(task_id);
        self
    }

    /// Pending -> Building.
    pub fn start_building(&mut self) -> Result<(), TransitionError> {
        self.expect(BuildJobStatus::Pending, BuildJobStatus::Building)?;
        self.status = BuildJobStatus::Building;
        self.touch();
        Ok(())
    }

    /// Building -> Complete.
    pub fn complete(&mut self, output_url: impl Into<String>) -> Result<(), TransitionError> {
        self.expect(BuildJobStatus::Building, BuildJobStatus::Complete)?;
        self.status = BuildJobStatus::Complete;
        self.output_url = Some(output_url.into());
        self.error_message = None;
        self.consecutive_failures = 0;
        self.touch();
        Ok(())
    }

    /// Building -> Failed.
    pub fn fail(&mut self, error_message: impl Into<String>) -> Result<(), TransitionError> {
        self.expect(BuildJobStatus::Building, BuildJobStatus::Failed)?;
        self.status = BuildJobStatus::Failed;
        self.error_message = Some(error_message.into());
        self.consecutive_failures += 1;
        self.touch();
        Ok(())
    }

    /// Failed -> Building through an explicit fix, optionally replacing the
    /// source.
    pub fn fix(&mut self, new_source: Option<String>) -> Result<(), TransitionError> {
        self.expect(BuildJobStatus::Failed, BuildJobStatus::Building)?;
        if let Some(source) = new_source {
            self.source = source;
        }
        self.status = BuildJobStatus::Building;
        self.retry_count += 1;
        self.error_message = None;
        self.touch();
        Ok(())
    }

    /// Pending/Building -> Failed without counting as a build failure, for
    /// jobs whose task went away (e.g. was canceled).
    pub fn abandon(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        if !matches!(self.status, BuildJobStatus::Pending | BuildJobStatus::Building) {
            return Err(TransitionError {
                job_id: self.id,
                from: self.status,
                to: BuildJobStatus::Failed,
            });
        }
        self.status = BuildJobStatus::Failed;
        self.error_message = Some(reason.into());
        self.touch();
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, BuildJobStatus::Complete | BuildJobStatus::Failed)
    }

    /// Object storage key for the compiled script.
    pub fn output_key(&self) -> String {
        format!("custom-components/{}.js", self.id)
    }

    fn expect(&self, from: BuildJobStatus, to: BuildJobStatus) -> Result<(), TransitionError> {
        if self.status == from {
            Ok(())
        } else {
            Err(TransitionError {
                job_id: self.id,
                from: self.status,
                to,
            })
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn job() -> ComponentBuildJob {
        ComponentBuildJob::new("proj-1", "Bounce", "export default function Bounce(){}")
    }

    #[test]
    fn new_job_starts_as_pending() {
        let j = job();
        assert_eq!(j.status, BuildJobStatus::Pending);
        assert_eq!(j.retry_count, 0);
        assert!(j.output_url.is_none());
    }

    #[test]
    fn happy_path_sets_output_url_only_on_complete() {
        let mut j = job();
        j.start_building().unwrap();
        assert!(j.output_url.is_none());
        j.complete("memory://custom-components/x.js").unwrap();
        assert_eq!(j.status, BuildJobStatus::Complete);
        assert!(j.output_url.is_some());
        assert!(j.error_message.is_none());
    }

    #[test]
    fn fix_increments_retry_count_and_replaces_source() {
        let mut j = job();
        j.start_building().unwrap();
        j.fail("boom").unwrap();
        assert_eq!(j.error_message.as_deref(), Some("boom"));
        assert_eq!(j.consecutive_failures, 1);

        j.fix(Some("export default function B(){}".into())).unwrap();
        assert_eq!(j.status, BuildJobStatus::Building);
        assert_eq!(j.retry_count, 1);
        assert!(j.error_message.is_none());
        assert!(j.source.contains("function B"));
    }

    #[test]
    fn completion_resets_consecutive_failures() {
        let mut j = job();
        j.start_building().unwrap();
        j.fail("boom").unwrap();
        j.fix(None).unwrap();
        j.complete("url").unwrap();
        assert_eq!(j.consecutive_failures, 0);
        assert_eq!(j.retry_count, 1);
    }

    #[rstest]
    #[case::pending(BuildJobStatus::Pending)]
    #[case::building(BuildJobStatus::Building)]
    #[case::complete(BuildJobStatus::Complete)]
    fn fix_is_only_allowed_from_failed(#[case] status: BuildJobStatus) {
        let mut j = job();
        j.status = status;
        let err = j.fix(None).unwrap_err();
        assert_eq!(err.from, status);
        assert_eq!(err.to, BuildJobStatus::Building);
    }

    #[test]
    fn complete_requires_building() {
        let mut j = job();
        assert!(j.complete("url").is_err());
        assert!(j.fail("x").is_err());
    }

    #[test]
    fn abandon_keeps_failure_count() {
        let mut j = job();
        j.abandon("task canceled").unwrap();
        assert_eq!(j.status, BuildJobStatus::Failed);
        assert_eq!(j.consecutive_failures, 0);
        assert!(j.is_finished());
        assert!(j.abandon("again").is_err());
    }

    #[test]
    fn output_key_is_derived_from_job_id() {
        let j = job();
        assert_eq!(j.output_key(), format!("custom-components/{}.js", j.id));
    }
}
