//! ocado-agent library crate.
//!
//! Exposes the session lifecycle and polling core for integration testing.

pub mod config;
pub mod error;
pub mod logging;
pub mod poll;
pub mod resources;
pub mod session;

pub use error::{Error, Result};
