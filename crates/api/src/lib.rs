//! Broker request handlers: protocol outcomes over the job engine.
//!
//! Transport-free. Each handler takes already-decoded request values and
//! returns a [`BrokerResponse`] carrying the status code and JSON body the
//! platform expects; wiring these into a router is left to the embedding
//! process.

pub mod broker;
pub mod error;
pub mod options;
pub mod response;

pub use broker::Broker;
pub use error::BrokerError;
pub use options::{BrokerOptions, OptionsError};
pub use response::BrokerResponse;
