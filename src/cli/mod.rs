//! Command-line interface
//!
//! Argument parsing for the `hoji` binary.

pub mod commands;

pub use commands::{Command, Opt};
