//! Asynchronous job engine.
//!
//! ## Components
//!
//! - `JobDispatcher`: the single serialized loop that records jobs, launches
//!   their runners, applies their results and reaps finished jobs
//! - `JobQueue`: cloneable client for submitting jobs and polling results
//! - `OperationRunner`: provision/deprovision/update against the provisioner,
//!   in sync and async flavours
//! - `supervised`: deadline and panic containment around provisioner calls

pub mod dispatcher;
pub mod runner;
pub mod supervisor;

pub use dispatcher::{DispatcherHandle, JobDispatcher, JobQueue, QueueError};
pub use runner::OperationRunner;
pub use supervisor::{CallError, PanicReport, supervised};
