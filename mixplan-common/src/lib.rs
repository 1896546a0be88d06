//! # mixplan Common Library
//!
//! Shared code for the mixplan crates including:
//! - Data model (lineups, venues, gear, knowledge entries, historical setups, quotas)
//! - Typed mixer settings records with schema versioning
//! - Configuration loading
//! - SQLite schema creation

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use error::{Error, Result};
