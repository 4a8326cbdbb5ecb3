//! # tunefetch common library
//!
//! Shared code for the tunefetch services:
//! - Error and result types
//! - TOML configuration loading and root folder resolution
//! - Timestamp helpers

pub mod config;
pub mod error;
pub mod time;

pub use error::{Error, Result};
