//! Typed persistence of instances, bindings and jobs.
//!
//! Every read-modify-write goes through the [`Backoff`] retrier: a write that
//! loses a compare-and-swap race (`StaleData`) re-reads and tries again.
//! Business-rule failures (a job already in progress, a finished job) are
//! returned immediately.
//!
//! ## Key layout
//!
//! - `<instance_id>`: the [`Instance`] with its bindings
//! - `<instance_id>_job`: the instance's [`BrokerJob`]
//!
//! Jobs live under their own suffix so the reaper can list them without
//! touching instance records.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use svcbroker_core::{
    Binding, BindingId, BindingRequest, BindingResponse, BrokerJob, Instance, InstanceId,
    JobResult, SchemaVersionMismatch, Versioned,
};

use crate::backoff::{Backoff, Retryable};
use crate::crypto::{CryptoError, Encryptor};
use crate::storage::{JsonStorer, LockToken, StoreError, Storer};

/// Suffix of job keys.
pub const JOB_KEY_SUFFIX: &str = "_job";

/// Key under which the job for `instance_id` is stored.
pub fn job_key(instance_id: &InstanceId) -> String {
    format!("{}{}", instance_id.as_str(), JOB_KEY_SUFFIX)
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    SchemaVersion(#[from] SchemaVersionMismatch),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("binding response codec error: {0}")]
    Codec(String),

    #[error("job for this instance id is already in progress")]
    JobExists,

    #[error("job with this id is already finished")]
    JobFinished,

    #[error("job not found for this id")]
    NoJobExists,
}

impl PersistError {
    pub fn is_key_not_found(&self) -> bool {
        matches!(self, PersistError::Store(e) if e.is_key_not_found())
    }

    pub fn is_job_exists(&self) -> bool {
        matches!(self, PersistError::JobExists)
    }
}

impl Retryable for PersistError {
    fn is_retryable(&self) -> bool {
        matches!(self, PersistError::Store(StoreError::StaleData))
    }
}

/// Domain persistence over a compare-and-swap [`Storer`].
#[derive(Debug, Clone)]
pub struct BrokerStore {
    db: JsonStorer,
    encryptor: Encryptor,
    backoff: Backoff,
}

impl BrokerStore {
    pub fn new(storer: Arc<dyn Storer>, encryptor: Encryptor) -> Self {
        Self {
            db: JsonStorer::new(storer),
            encryptor,
            backoff: Backoff::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Write `instance` unconditionally, stamped with the current schema version.
    pub async fn put_instance(
        &self,
        instance_id: &InstanceId,
        mut instance: Instance,
    ) -> Result<(), PersistError> {
        instance.stamp_schema_version();
        self.db
            .put(instance_id.as_str(), &instance, LockToken::NoLock)
            .await?;
        Ok(())
    }

    pub async fn get_instance(&self, instance_id: &InstanceId) -> Result<Instance, PersistError> {
        let (instance, _): (Instance, _) = self.db.get(instance_id.as_str()).await?;
        instance.check_schema_version()?;
        Ok(instance)
    }

    pub async fn del_instance(&self, instance_id: &InstanceId) -> Result<(), PersistError> {
        self.db.del(instance_id.as_str()).await?;
        Ok(())
    }

    /// Append a binding to its instance; the response is encrypted first.
    pub async fn put_binding(
        &self,
        instance_id: &InstanceId,
        binding_id: &BindingId,
        req: &BindingRequest,
        resp: &BindingResponse,
    ) -> Result<(), PersistError> {
        let plaintext = serde_json::to_vec(resp).map_err(|e| PersistError::Codec(e.to_string()))?;
        let binding = &Binding {
            binding_id: binding_id.to_string(),
            binding_request: req.clone(),
            binding_response: self.encryptor.encrypt(&plaintext)?,
        };

        let db = &self.db;
        let key = instance_id.as_str();
        self.backoff
            .retry(move || async move {
                let (mut instance, lock): (Instance, _) = db.get(key).await?;
                instance.check_schema_version()?;
                instance.bindings.push(binding.clone());
                db.put(key, &instance, lock).await?;
                Ok::<(), PersistError>(())
            })
            .await
    }

    /// Remove a binding from its instance. Removing an unknown binding is a
    /// no-op; a missing instance is `KeyNotFound`.
    pub async fn del_binding(
        &self,
        instance_id: &InstanceId,
        binding_id: &BindingId,
    ) -> Result<(), PersistError> {
        let db = &self.db;
        let key = instance_id.as_str();
        let binding_id = binding_id.as_str();
        self.backoff
            .retry(move || async move {
                let (mut instance, lock): (Instance, _) = db.get(key).await?;
                instance.check_schema_version()?;

                let Some(pos) = instance
                    .bindings
                    .iter()
                    .position(|b| b.binding_id == binding_id)
                else {
                    return Ok(());
                };
                instance.bindings.swap_remove(pos);

                db.put(key, &instance, lock).await?;
                Ok::<(), PersistError>(())
            })
            .await
    }

    /// Read a binding and decrypt its response.
    ///
    /// An unknown binding is `KeyNotFound` carrying the binding id.
    pub async fn get_binding(
        &self,
        instance_id: &InstanceId,
        binding_id: &BindingId,
    ) -> Result<(BindingRequest, BindingResponse), PersistError> {
        let instance = self.get_instance(instance_id).await?;
        let binding = instance
            .binding(binding_id.as_str())
            .ok_or_else(|| StoreError::KeyNotFound(binding_id.to_string()))?;

        let plaintext = self.encryptor.decrypt(&binding.binding_response)?;
        let resp = serde_json::from_slice(&plaintext).map_err(|e| PersistError::Codec(e.to_string()))?;
        Ok((binding.binding_request.clone(), resp))
    }

    /// Record a new job, unless the instance already has one in progress.
    pub async fn put_job(&self, job: &BrokerJob) -> Result<(), PersistError> {
        let db = &self.db;
        let key = &job_key(&job.instance_id);
        self.backoff
            .retry(move || async move {
                let lock = match db.get::<BrokerJob>(key).await {
                    Ok((current, _)) if current.is_in_progress() => {
                        return Err(PersistError::JobExists);
                    }
                    Ok((_, lock)) => lock,
                    Err(e) if e.is_key_not_found() => LockToken::Absent,
                    Err(e) => return Err(e.into()),
                };
                db.put(key, job, lock).await?;
                Ok::<(), PersistError>(())
            })
            .await
    }

    /// Apply a runner's result to the in-progress job it belongs to.
    pub async fn update_job(&self, result: &JobResult) -> Result<(), PersistError> {
        let db = &self.db;
        let key = &job_key(&result.instance_id);
        self.backoff
            .retry(move || async move {
                let (mut current, lock) = match db.get::<BrokerJob>(key).await {
                    Ok(found) => found,
                    Err(e) if e.is_key_not_found() => return Err(PersistError::NoJobExists),
                    Err(e) => return Err(e.into()),
                };
                current.check_schema_version()?;
                if !current.is_in_progress() {
                    return Err(PersistError::JobFinished);
                }

                current.update(result);
                db.put(key, &current, lock).await?;
                Ok::<(), PersistError>(())
            })
            .await
    }

    pub async fn get_job(&self, instance_id: &InstanceId) -> Result<BrokerJob, PersistError> {
        let (job, _): (BrokerJob, _) = self.db.get(&job_key(instance_id)).await?;
        job.check_schema_version()?;
        Ok(job)
    }

    /// Delete finished jobs last updated more than `older_than` ago.
    ///
    /// Unreadable records and records from a newer schema are logged and
    /// skipped, as are failed deletes; they are looked at again on the next
    /// call. Returns the number of jobs deleted.
    pub async fn reap_jobs(&self, older_than: Duration) -> Result<usize, PersistError> {
        let keys = self.db.keys(JOB_KEY_SUFFIX).await?;
        let now = Utc::now();
        let mut reaped = 0;

        for key in keys {
            let job = match self.db.get::<BrokerJob>(&key).await {
                Ok((job, _)) => job,
                Err(error) => {
                    warn!(key = %key, error = %error, "skipping reaping job");
                    continue;
                }
            };
            if let Err(error) = job.check_schema_version() {
                warn!(key = %key, error = %error, "skipping reaping job");
                continue;
            }

            let age = job.age(now).to_std().unwrap_or(Duration::ZERO);
            if job.is_in_progress() || age < older_than {
                continue;
            }

            info!(key = %key, "reaping job");
            match self.db.del(&key).await {
                Ok(()) => reaped += 1,
                Err(error) => warn!(key = %key, error = %error, "failed reaping (delete) job"),
            }
        }

        Ok(reaped)
    }

    pub async fn close(&self) -> Result<(), PersistError> {
        self.db.close().await?;
        Ok(())
    }
}
