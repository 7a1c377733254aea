//! # conveyor
//!
//! Library half of the Conveyor binary: request loading and the CLI
//! commands, exposed so integration tests can drive them directly.

pub mod cli;
pub mod request;

pub use request::{MAX_REQUEST_FILE_SIZE, PlanRequest, load_config, load_request};
