//! The `utils` module provides the pieces shared across `fanwork`: the error
//! taxonomy, logging setup and shutdown signal handling.

pub mod error;
pub mod logging;
pub mod signals;

pub use error::{BrokerError, Result};
