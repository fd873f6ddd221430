//! Per-tick movement of a dynamic crowd of agents across a navigation
//! mesh: bounded-window path corridors, a small cache of nearby wall
//! segments, RVO-style obstacle avoidance, and a fixed 13-phase update
//! pipeline that ties them together.
//!
//! Navmesh construction and the underlying spatial queries (nearest
//! polygon, straight-path string-pulling, raycasts, sliced A*) are out of
//! scope: this crate consumes them through the [`query::NavMeshQuery`] and
//! [`sliced_path::SlicedPathQuery`] traits rather than implementing them.
//! A host integrates a real navmesh by implementing those two traits;
//! [`testutil`] provides a toy implementation exercised by this crate's
//! own tests.

pub mod agent;
pub mod avoidance;
pub mod boundary;
pub mod corridor;
pub mod crowd;
pub mod error;
mod geometry;
pub mod query;
pub mod sliced_path;

#[cfg(test)]
mod testutil;

pub use agent::{AgentId, AgentState, AgentTargetState, CrowdAgentParams, CrowdUpdateFlags, Neighbour};
pub use avoidance::ObstacleAvoidanceParams;
pub use crowd::{Crowd, CrowdConfig};
pub use error::ConfigError;
pub use query::{NavMeshQuery, PolyRef, QueryFilter};
pub use sliced_path::SlicedPathQuery;
