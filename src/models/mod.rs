//! Core data models for raspberry.

mod config;
mod error;
mod paper;
mod status;

pub use config::*;
pub use error::*;
pub use paper::*;
pub use status::*;
