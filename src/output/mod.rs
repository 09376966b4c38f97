//! Output module for reporting on crawl results
//!
//! This module handles:
//! - Loading catalog totals and run history from the store
//! - Printing them for operators

pub mod stats;

pub use stats::{load_statistics, print_statistics, RegistryStatistics};
