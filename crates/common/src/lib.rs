//! Shared utilities, configuration, and error handling for Runfleet
//!
//! This crate provides common functionality used across the Runfleet services:
//! - Configuration management following 12-factor principles
//! - Error types and handling
//! - Validating axum extractors
//! - State machine error types shared by the domain crates

pub mod config;
pub mod error;
pub mod extractors;
pub mod state;

pub use config::Config;
pub use error::{Error, Result};
pub use extractors::{Pagination, ValidatedJson};
pub use state::StateError;
