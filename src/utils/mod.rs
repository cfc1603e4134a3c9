//! The `utils` module provides shared building blocks used across `appbus`:
//! the error taxonomy surfaced to applications and the tracing setup.

pub mod error;
pub mod logging;

pub use error::{Result, RouteError};

#[cfg(test)]
mod tests;
