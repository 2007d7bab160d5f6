//! Infrastructure layer: storage, persistence, encryption and the job engine.

pub mod backoff;
pub mod config;
pub mod crypto;
pub mod jobs;
pub mod persistence;
pub mod provisioner;
pub mod storage;


pub use backoff::{Backoff, JitterSource, MaxJitter, NoJitter, Retryable, UniformJitter};
pub use config::{ConfigError, JobsConfig};
pub use crypto::{CryptoError, Encryptor};
pub use jobs::{DispatcherHandle, JobDispatcher, JobQueue, OperationRunner, QueueError};
pub use persistence::{BrokerStore, PersistError, job_key};
pub use provisioner::{Provisioner, ProvisionerError};
pub use storage::{InMemoryStorer, JsonStorer, LockToken, StoreError, Storer};
