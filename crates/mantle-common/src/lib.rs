//! Common utilities for mantle
//!
//! This crate provides the error type shared by the mantle crates.

pub mod error;

pub use error::{ErrorKind, MantleError, Result};
