//! # member-core
//!
//! Core types shared by the membermesh crates.
//!
//! This crate provides:
//!
//! - [`Address`], the fixed-width node identity and its wire codec
//! - The unified [`Error`] and [`Result`] types
//! - Layered configuration loading (defaults, YAML file, environment)

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types at the crate root
pub use error::{Error, Result};
pub use types::{Address, NodeId};
