//! `svcbroker-core`: domain building blocks for the service broker.
//!
//! This crate contains **pure domain** types (no storage, no runtime): the
//! records a broker persists per service instance, the job records that track
//! asynchronous operations, and the job status state machine.

pub mod error;
pub mod id;
pub mod job;
pub mod model;
pub mod schema;

pub use error::{DomainError, DomainResult};
pub use id::{BindingId, InstanceId};
pub use job::{BrokerJob, JobKind, JobOutcome, JobResult, JobStatus};
pub use model::{
    Binding, BindingRequest, BindingResponse, Instance, Parameters, PreviousValues,
    ProvisionRequest, ProvisionResponse, UpdateProvisionRequest, raw_json_eq,
};
pub use schema::{SCHEMA_VERSION, SchemaVersionMismatch, Versioned, check_schema_version};
