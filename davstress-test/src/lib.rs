//! Test utilities for davstress.
//!
//! This crate provides an in-process WebDAV stand-in and logging setup for integration tests. See
//! the modules for all available utilities.

pub mod server;
pub mod tracing;
