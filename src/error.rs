//! Configuration-time errors.
//!
//! Per-tick simulation failures are never reported through `Result` —
//! they surface as agent state (`AgentState`, `AgentTargetState`) that the
//! caller reads back after `Crowd::update`. `ConfigError` only covers the
//! small set of fallible setters that validate a value before it is
//! accepted into a config struct.

use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum ConfigError {
  #[error("max_iterations_per_update must be positive, got {0}")]
  NonPositiveMaxIterationsPerUpdate(u32),

  #[error("max_iterations_per_agent must be positive, got {0}")]
  NonPositiveMaxIterationsPerAgent(u32),
}

#[cfg(test)]
#[path = "error_test.rs"]
mod test;
