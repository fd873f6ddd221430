//! Per-agent state (spec §3): kinematics, the navigation target state
//! machine, per-agent tuning, and the corridor/boundary/avoidance
//! machinery each agent owns privately.

use glam::Vec3;
use slotmap::new_key_type;

use crate::avoidance::{ObstacleAvoidanceParams, ObstacleAvoidanceQuery};
use crate::boundary::LocalBoundary;
use crate::corridor::PathCorridor;
use crate::query::{PolyRef, QueryFilter, StraightPathPoint};
use crate::sliced_path::SlicedPathQuery;

new_key_type! {
  /// A generational handle to an agent in a [`crate::crowd::Crowd`].
  pub struct AgentId;
}

/// The agent's locomotion state.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AgentState {
  /// Could not be placed on the navmesh; excluded from the update
  /// pipeline until removed.
  Invalid,
  /// Walking the navmesh under the normal pipeline.
  Walking,
  /// Crossing an off-mesh connection.
  OffMesh,
}

/// The agent's navigation target state machine (spec §4.4 Phase 3).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AgentTargetState {
  /// No navigational target; the agent only responds to
  /// `request_move_velocity`.
  None,
  /// A target was requested but pathfinding has not started this tick.
  Requesting,
  /// A quick search failed to reach the target; queued for a full sliced
  /// search next tick.
  WaitingForQueue,
  /// A full sliced search is in progress, budget permitting.
  WaitingForPath,
  /// A path to the target is installed and being followed.
  Valid,
  /// Pathfinding failed outright.
  Failed,
  /// Following a directly requested velocity, bypassing pathfinding.
  Velocity,
}

bitflags::bitflags! {
  /// Per-agent toggles for optional pipeline phases.
  #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
  pub struct CrowdUpdateFlags: u32 {
    const ANTICIPATE_TURNS = 1 << 0;
    const OBSTACLE_AVOIDANCE = 1 << 1;
    const SEPARATION = 1 << 2;
    const OPTIMIZE_VIS = 1 << 3;
    const OPTIMIZE_TOPO = 1 << 4;
  }
}

#[derive(Clone, Copy, Debug)]
pub struct CrowdAgentParams {
  pub radius: f32,
  pub height: f32,
  pub max_speed: f32,
  pub max_acceleration: f32,
  pub collision_query_range: f32,
  pub path_optimization_range: f32,
  pub separation_weight: f32,
  pub update_flags: CrowdUpdateFlags,
  pub obstacle_avoidance: ObstacleAvoidanceParams,
  pub auto_traverse_off_mesh_connections: bool,
}

impl Default for CrowdAgentParams {
  fn default() -> Self {
    Self {
      radius: 0.5,
      height: 2.0,
      max_speed: 3.5,
      max_acceleration: 8.0,
      collision_query_range: 6.0,
      path_optimization_range: 15.0,
      separation_weight: 2.0,
      update_flags: CrowdUpdateFlags::empty(),
      obstacle_avoidance: ObstacleAvoidanceParams::default(),
      auto_traverse_off_mesh_connections: true,
    }
  }
}

#[derive(Clone, Copy, Debug)]
pub struct Neighbour {
  pub agent: AgentId,
  pub distance_sq: f32,
}

/// Tracks interpolation across an off-mesh connection being auto-traversed.
#[derive(Clone, Copy, Debug)]
pub struct OffMeshAnimation {
  pub t: f32,
  /// Negative means externally driven; the agent stays in `OffMesh`
  /// state until `Crowd::complete_off_mesh_connection` is called.
  pub duration: f32,
  pub start_position: Vec3,
  pub end_position: Vec3,
  pub node_ref: PolyRef,
}

pub struct Agent {
  pub position: Vec3,
  pub velocity: Vec3,
  pub desired_velocity: Vec3,
  pub new_velocity: Vec3,
  pub displacement: Vec3,
  pub desired_speed: f32,

  pub params: CrowdAgentParams,

  pub state: AgentState,
  pub target_state: AgentTargetState,
  pub target_ref: Option<PolyRef>,
  pub target_position: Vec3,
  pub requested_velocity: Vec3,
  pub target_replan: bool,
  pub target_pathfinding_time: f32,
  pub target_path_is_partial: bool,

  pub(crate) filter: Box<dyn QueryFilter>,
  pub(crate) corridor: PathCorridor,
  pub(crate) boundary: LocalBoundary,
  pub(crate) sliced_query: Option<Box<dyn SlicedPathQuery>>,
  pub(crate) obstacle_avoidance: ObstacleAvoidanceQuery,
  pub(crate) neighbours: Vec<Neighbour>,
  pub(crate) corners: Vec<StraightPathPoint>,
  pub(crate) topology_opt_time: f32,
  pub(crate) off_mesh_animation: Option<OffMeshAnimation>,
}

impl Agent {
  pub(crate) fn new(position: Vec3, params: CrowdAgentParams, filter: Box<dyn QueryFilter>) -> Self {
    let obstacle_avoidance = ObstacleAvoidanceQuery::new(params.obstacle_avoidance);
    Self {
      position,
      velocity: Vec3::ZERO,
      desired_velocity: Vec3::ZERO,
      new_velocity: Vec3::ZERO,
      displacement: Vec3::ZERO,
      desired_speed: 0.0,
      params,
      state: AgentState::Invalid,
      target_state: AgentTargetState::None,
      target_ref: None,
      target_position: Vec3::ZERO,
      requested_velocity: Vec3::ZERO,
      target_replan: false,
      target_pathfinding_time: 0.0,
      target_path_is_partial: false,
      filter,
      corridor: PathCorridor::new(),
      boundary: LocalBoundary::new(),
      sliced_query: None,
      obstacle_avoidance,
      neighbours: Vec::new(),
      corners: Vec::new(),
      topology_opt_time: 0.0,
      off_mesh_animation: None,
    }
  }

  pub fn corridor(&self) -> &PathCorridor {
    &self.corridor
  }

  pub fn boundary(&self) -> &LocalBoundary {
    &self.boundary
  }

  pub fn corners(&self) -> &[StraightPathPoint] {
    &self.corners
  }

  pub fn neighbours(&self) -> &[Neighbour] {
    &self.neighbours
  }
}

#[cfg(test)]
#[path = "agent_test.rs"]
mod test;
