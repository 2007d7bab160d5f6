//! Asynchronous job records and the job status state machine.
//!
//! A [`BrokerJob`] is the durable record of one operation (provision,
//! deprovision or update) against one instance. Its [`JobResult`] starts
//! `in progress` and moves exactly once to `succeeded` or `failed`.
//!
//! ## Outcome messages
//!
//! The result's `error_msg` is persisted and reported to the platform verbatim,
//! so a handful of fixed messages double as outcome classifiers (an identical
//! request was already applied, a conflicting one was, the resource is gone).
//! Code should not sniff those strings; use [`JobResult::outcome`], which maps
//! them onto the closed [`JobOutcome`] type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::InstanceId;
use crate::model::{Parameters, ProvisionRequest, UpdateProvisionRequest};
use crate::schema::{SCHEMA_VERSION, Versioned};

/// Returned when asking for the job of an instance that has none.
pub const MSG_NO_JOB_EXISTS: &str = "no job exists for this instance id";
/// The request matches what was already applied; the platform gets 200, not 201.
pub const MSG_NO_DIFF: &str = "the resource has already been created with same settings";
/// A request for this instance already came in with different settings.
pub const MSG_CONFLICT: &str = "the resource has already been created with different settings";
/// The resource was already deleted.
pub const MSG_GONE: &str = "the resource has already been deleted";
/// Deliberately vague: panics and stack traces never reach the platform.
pub const MSG_PANIC: &str = "the job failed unexpectedly";
/// Stands in for a failure reported without a message.
pub const MSG_FAILED: &str = "the operation failed";
/// An asynchronous provisioner call exceeded its deadline.
pub const MSG_TIMED_OUT: &str = "the operation timed out";

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    #[serde(rename = "in progress")]
    InProgress,
    #[serde(rename = "succeeded")]
    Succeeded,
    #[serde(rename = "failed")]
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::InProgress => "in progress",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::InProgress)
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Provision,
    Deprovision,
    Update,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Provision => "provision",
            JobKind::Deprovision => "deprovision",
            JobKind::Update => "update",
        }
    }
}

impl core::fmt::Display for JobKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified result of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Still running.
    InProgress,
    /// Freshly applied.
    Created,
    /// Identical to what was already applied.
    NoDiff,
    /// Conflicts with what was already applied.
    Conflict,
    /// Already deleted.
    Gone,
    /// No job is recorded for the instance.
    NoJob,
    /// Failed with a message safe to show the platform.
    Failed(String),
}

/// Result of an operation, as reported by runners and persisted in jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub instance_id: InstanceId,
    pub status: JobStatus,
    #[serde(default)]
    pub error_msg: String,
}

impl JobResult {
    fn with(instance_id: InstanceId, status: JobStatus, error_msg: impl Into<String>) -> Self {
        Self {
            instance_id,
            status,
            error_msg: error_msg.into(),
        }
    }

    pub fn in_progress(instance_id: InstanceId) -> Self {
        Self::with(instance_id, JobStatus::InProgress, "")
    }

    pub fn succeeded(instance_id: InstanceId) -> Self {
        Self::with(instance_id, JobStatus::Succeeded, "")
    }

    pub fn no_diff(instance_id: InstanceId) -> Self {
        Self::with(instance_id, JobStatus::Succeeded, MSG_NO_DIFF)
    }

    pub fn conflict(instance_id: InstanceId) -> Self {
        Self::with(instance_id, JobStatus::Failed, MSG_CONFLICT)
    }

    pub fn gone(instance_id: InstanceId) -> Self {
        Self::with(instance_id, JobStatus::Failed, MSG_GONE)
    }

    pub fn no_job(instance_id: InstanceId) -> Self {
        Self::with(instance_id, JobStatus::Failed, MSG_NO_JOB_EXISTS)
    }

    pub fn panicked(instance_id: InstanceId) -> Self {
        Self::with(instance_id, JobStatus::Failed, MSG_PANIC)
    }

    /// A failed result. A failure always carries a message, so an empty one
    /// is replaced by [`MSG_FAILED`].
    pub fn failed(instance_id: InstanceId, error_msg: impl Into<String>) -> Self {
        let error_msg = error_msg.into();
        if error_msg.is_empty() {
            return Self::with(instance_id, JobStatus::Failed, MSG_FAILED);
        }
        Self::with(instance_id, JobStatus::Failed, error_msg)
    }

    pub fn is_failed(&self) -> bool {
        self.status == JobStatus::Failed
    }

    /// The message to report alongside the status, if any.
    pub fn description(&self) -> Option<&str> {
        (!self.error_msg.is_empty()).then_some(self.error_msg.as_str())
    }

    /// Classify this result.
    pub fn outcome(&self) -> JobOutcome {
        match self.error_msg.as_str() {
            MSG_NO_DIFF => JobOutcome::NoDiff,
            MSG_CONFLICT => JobOutcome::Conflict,
            MSG_GONE => JobOutcome::Gone,
            MSG_NO_JOB_EXISTS => JobOutcome::NoJob,
            "" => match self.status {
                JobStatus::InProgress => JobOutcome::InProgress,
                JobStatus::Succeeded => JobOutcome::Created,
                JobStatus::Failed => JobOutcome::Failed(String::new()),
            },
            msg => JobOutcome::Failed(msg.to_string()),
        }
    }
}

/// Durable record of an operation against one instance.
///
/// Stored under its own key namespace (see the infra crate), separate from the
/// instance record, so finished jobs can be enumerated and reaped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerJob {
    pub last_updated: DateTime<Utc>,

    pub job_kind: JobKind,
    pub instance_id: InstanceId,
    #[serde(default)]
    pub service_id: String,
    #[serde(default)]
    pub plan_id: String,
    #[serde(default)]
    pub organization_guid: String,
    #[serde(default)]
    pub space_guid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Parameters,

    pub job_result: JobResult,

    /// Schema version of the stored record.
    #[serde(default)]
    pub version: i64,
}

impl BrokerJob {
    /// A new `in progress` job.
    pub fn new(job_kind: JobKind, instance_id: InstanceId) -> Self {
        Self {
            last_updated: Utc::now(),
            job_kind,
            job_result: JobResult::in_progress(instance_id.clone()),
            instance_id,
            service_id: String::new(),
            plan_id: String::new(),
            organization_guid: String::new(),
            space_guid: String::new(),
            parameters: None,
            version: SCHEMA_VERSION,
        }
    }

    pub fn for_provision(instance_id: InstanceId, req: &ProvisionRequest) -> Self {
        let mut job = Self::new(JobKind::Provision, instance_id);
        job.service_id = req.service_id.clone();
        job.plan_id = req.plan_id.clone();
        job.organization_guid = req.organization_guid.clone();
        job.space_guid = req.space_guid.clone();
        job.parameters = req.parameters.clone();
        job
    }

    pub fn for_deprovision(
        instance_id: InstanceId,
        service_id: impl Into<String>,
        plan_id: impl Into<String>,
    ) -> Self {
        let mut job = Self::new(JobKind::Deprovision, instance_id);
        job.service_id = service_id.into();
        job.plan_id = plan_id.into();
        job
    }

    pub fn for_update(instance_id: InstanceId, req: &UpdateProvisionRequest) -> Self {
        let mut job = Self::new(JobKind::Update, instance_id);
        job.service_id = req.service_id.clone();
        job.plan_id = req.plan_id.clone();
        job.parameters = req.parameters.clone();
        job
    }

    pub fn is_in_progress(&self) -> bool {
        self.job_result.status == JobStatus::InProgress
    }

    /// Time since the job last changed.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.last_updated
    }

    /// The provision request this job was queued with.
    pub fn provision_request(&self) -> ProvisionRequest {
        ProvisionRequest {
            service_id: self.service_id.clone(),
            plan_id: self.plan_id.clone(),
            organization_guid: self.organization_guid.clone(),
            space_guid: self.space_guid.clone(),
            parameters: self.parameters.clone(),
        }
    }

    /// The update request this job was queued with.
    pub fn update_request(&self) -> UpdateProvisionRequest {
        UpdateProvisionRequest {
            service_id: self.service_id.clone(),
            plan_id: self.plan_id.clone(),
            previous_values: None,
            parameters: self.parameters.clone(),
        }
    }

    fn set_succeeded(&mut self) {
        self.last_updated = Utc::now();
        self.job_result.status = JobStatus::Succeeded;
    }

    fn set_failed(&mut self, error_msg: &str) {
        self.last_updated = Utc::now();
        self.job_result.error_msg = error_msg.to_string();
        self.job_result.status = JobStatus::Failed;
    }

    /// Apply a runner's result to this job.
    ///
    /// # Panics
    ///
    /// Panics on a result with no message whose status is not `succeeded`.
    /// Runners never produce one; receiving it means a caller is broken.
    pub fn update(&mut self, result: &JobResult) {
        if result.error_msg == MSG_NO_DIFF {
            self.set_succeeded();
            self.job_result.error_msg = MSG_NO_DIFF.to_string();
        } else if !result.error_msg.is_empty() {
            self.set_failed(&result.error_msg);
        } else if result.status == JobStatus::Succeeded {
            self.set_succeeded();
            self.job_result.error_msg.clear();
        } else {
            panic!(
                "invalid job state transition for instance {}: {:?} -> {:?}",
                self.instance_id, self.job_result, result
            );
        }
    }
}

impl Versioned for BrokerJob {
    fn schema_version(&self) -> i64 {
        self.version
    }

    fn stamp_schema_version(&mut self) {
        self.version = SCHEMA_VERSION;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> InstanceId {
        InstanceId::parse("instance-id").unwrap()
    }

    #[test]
    fn new_jobs_start_in_progress() {
        let job = BrokerJob::new(JobKind::Provision, id());
        assert!(job.is_in_progress());
        assert_eq!(job.version, SCHEMA_VERSION);
        assert_eq!(job.job_result.outcome(), JobOutcome::InProgress);
    }

    #[test]
    fn no_diff_results_succeed_and_keep_the_message() {
        let mut job = BrokerJob::new(JobKind::Provision, id());
        job.update(&JobResult::no_diff(id()));
        assert_eq!(job.job_result.status, JobStatus::Succeeded);
        assert_eq!(job.job_result.error_msg, MSG_NO_DIFF);
        assert_eq!(job.job_result.outcome(), JobOutcome::NoDiff);
    }

    #[test]
    fn results_with_messages_fail() {
        let mut job = BrokerJob::new(JobKind::Deprovision, id());
        job.update(&JobResult::gone(id()));
        assert_eq!(job.job_result.status, JobStatus::Failed);
        assert_eq!(job.job_result.outcome(), JobOutcome::Gone);

        let mut job = BrokerJob::new(JobKind::Provision, id());
        // A message wins over the status it arrives with.
        let mut odd = JobResult::succeeded(id());
        odd.error_msg = "boom".into();
        job.update(&odd);
        assert_eq!(job.job_result.status, JobStatus::Failed);
        assert_eq!(job.job_result.outcome(), JobOutcome::Failed("boom".into()));
    }

    #[test]
    fn succeeded_results_clear_the_message() {
        let mut job = BrokerJob::new(JobKind::Update, id());
        job.update(&JobResult::succeeded(id()));
        assert_eq!(job.job_result.status, JobStatus::Succeeded);
        assert!(job.job_result.description().is_none());
        assert_eq!(job.job_result.outcome(), JobOutcome::Created);
    }

    #[test]
    #[should_panic(expected = "invalid job state transition")]
    fn empty_non_success_results_are_a_contract_violation() {
        let mut job = BrokerJob::new(JobKind::Provision, id());
        job.update(&JobResult::in_progress(id()));
    }

    #[test]
    fn failures_without_a_message_still_finish_the_job() {
        let result = JobResult::failed(id(), "");
        assert_eq!(result.error_msg, MSG_FAILED);
        assert_eq!(result.outcome(), JobOutcome::Failed(MSG_FAILED.to_string()));

        let mut job = BrokerJob::new(JobKind::Update, id());
        job.update(&result);
        assert_eq!(job.job_result.status, JobStatus::Failed);
        assert_eq!(job.job_result.error_msg, MSG_FAILED);
    }

    #[test]
    fn status_serializes_with_wire_names() {
        let json = serde_json::to_string(&JobResult::in_progress(id())).unwrap();
        assert_eq!(
            json,
            r#"{"instance_id":"instance-id","status":"in progress","error_msg":""}"#
        );
    }

    #[test]
    fn provision_jobs_carry_the_full_request() {
        let req = ProvisionRequest {
            service_id: "s".into(),
            plan_id: "p".into(),
            organization_guid: "o".into(),
            space_guid: "x".into(),
            parameters: Some(serde_json::value::RawValue::from_string("{\"a\":1}".into()).unwrap()),
        };
        let job = BrokerJob::for_provision(id(), &req);
        assert_eq!(job.provision_request(), req);
    }
}
