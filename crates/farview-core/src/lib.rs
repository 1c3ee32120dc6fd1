//! # farview-core
//!
//! Shared infrastructure for the FarView protocol crates.

pub mod diagnostics;
