//! # hs-common
//!
//! Shared configuration and error types for hookscope.

pub mod config;
pub mod error;

pub use config::{AppConfig, RunMode};
pub use error::{AppError, AppResult};
