//! Library target for the `vodfetch` package.
//!
//! The deliverable is the `vodfetch` binary (`src/main.rs`); argument
//! parsing, configuration and reporting live here so they can be tested.

pub mod cli;
pub mod config;
pub mod error;
pub mod progress;

#[doc(hidden)]
pub use vodfetch_engine;
