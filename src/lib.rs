//! hbrunner - HandBrakeCLI batch runner
//!
//! This library crate exposes configuration loading and console reporting
//! for the binary and its integration tests. Process supervision lives in
//! `hbrunner-av`.

pub mod config;
pub mod report;
