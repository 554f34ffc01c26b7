//! The `utils` module provides the definitions shared by every layer of
//! `subjectmq`: the error taxonomy and logging setup.

pub mod error;
pub mod logging;

pub use error::{BrokerError, StoreError, TransportError};
