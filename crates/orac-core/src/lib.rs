//! Shared types for ORAC Core: error taxonomy, command shapes, sampling
//! profiles and process configuration.

pub mod command;
pub mod config;
pub mod error;
pub mod fsutil;
pub mod sampling;

pub use command::{Action, Command, SimpleAction, UNKNOWN};
pub use config::CoreConfig;
pub use error::{Error, Result};
pub use sampling::{SamplingOverrides, SamplingProfile};
