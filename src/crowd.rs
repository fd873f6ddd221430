//! The Crowd Update Pipeline (spec §4.4) and the crate's public API
//! (spec §6): a fixed-order, 13-phase per-tick update over every agent in
//! a [`Crowd`].

use std::collections::HashMap;

use glam::Vec3;
use slotmap::HopSlotMap;

use crate::agent::{
  Agent, AgentId, AgentState, AgentTargetState, CrowdAgentParams, CrowdUpdateFlags, Neighbour,
  OffMeshAnimation,
};
use crate::corridor::remove_back_and_forth;
use crate::error::ConfigError;
use crate::geometry;
use crate::query::{NavMeshQuery, PolyRef, QueryFilter, StraightPathFlags, StraightPathPointType};
use crate::sliced_path::QueryStatus;

/// How many of the leading polygons in a corridor are checked for
/// staleness each tick (spec §4.4 Phase 1).
const CHECK_LOOKAHEAD: usize = 10;
/// Minimum time an agent's target must have been VALID before a
/// lookahead mismatch forces a replan.
const TARGET_REPLAN_DELAY_SECONDS: f32 = 1.0;
/// How many agents get a topology-optimization pass per tick.
const OPT_MAX_AGENTS: usize = 1;
/// Minimum accumulated time before an agent is eligible for topology
/// optimization.
const OPT_TIME_THR: f32 = 0.5;
const TOPOLOGY_OPT_ITERATIONS: u32 = 32;
/// Number of corners kept per agent.
const MAX_CORNERS: usize = 3;
const OFFMESH_TRIGGER_RADIUS_MULT: f32 = 2.25;
const OFFMESH_AUTO_TRAVERSE_DURATION: f32 = 0.5;
const COLLISION_RESOLVE_FACTOR: f32 = 0.7;
const COLLISION_RESOLVE_ITERATIONS: usize = 4;

#[derive(Clone, Copy, Debug)]
pub struct CrowdConfig {
  pub max_agent_radius: f32,
  pub agent_placement_half_extents: Vec3,
  pub max_iterations_per_update: u32,
  pub max_iterations_per_agent: u32,
  pub quick_search_iterations: u32,
}

impl CrowdConfig {
  pub fn new(max_agent_radius: f32) -> Self {
    Self {
      max_agent_radius,
      agent_placement_half_extents: Vec3::new(max_agent_radius * 2.0, max_agent_radius * 1.5, max_agent_radius * 2.0),
      max_iterations_per_update: 600,
      max_iterations_per_agent: 200,
      quick_search_iterations: 20,
    }
  }

  pub fn set_max_iterations_per_update(&mut self, value: u32) -> Result<(), ConfigError> {
    if value == 0 {
      return Err(ConfigError::NonPositiveMaxIterationsPerUpdate(value));
    }
    self.max_iterations_per_update = value;
    Ok(())
  }

  pub fn set_max_iterations_per_agent(&mut self, value: u32) -> Result<(), ConfigError> {
    if value == 0 {
      return Err(ConfigError::NonPositiveMaxIterationsPerAgent(value));
    }
    self.max_iterations_per_agent = value;
    Ok(())
  }
}

/// A dynamic population of agents moving across a navmesh, updated one
/// tick at a time via [`Crowd::update`].
pub struct Crowd {
  agents: HopSlotMap<AgentId, Agent>,
  config: CrowdConfig,
}

impl Crowd {
  pub fn new(max_agent_radius: f32) -> Self {
    Self { agents: HopSlotMap::with_key(), config: CrowdConfig::new(max_agent_radius) }
  }

  pub fn config(&self) -> &CrowdConfig {
    &self.config
  }

  pub fn config_mut(&mut self) -> &mut CrowdConfig {
    &mut self.config
  }

  pub fn get_agent(&self, id: AgentId) -> Option<&Agent> {
    self.agents.get(id)
  }

  pub fn get_agent_mut(&mut self, id: AgentId) -> Option<&mut Agent> {
    self.agents.get_mut(id)
  }

  pub fn agent_ids(&self) -> impl Iterator<Item = AgentId> + '_ {
    self.agents.keys()
  }

  pub fn len(&self) -> usize {
    self.agents.len()
  }

  pub fn is_empty(&self) -> bool {
    self.agents.is_empty()
  }

  pub fn add_agent(
    &mut self,
    nav: &dyn NavMeshQuery,
    position: Vec3,
    params: CrowdAgentParams,
    filter: Box<dyn QueryFilter>,
  ) -> AgentId {
    let found = nav.find_nearest_poly(position, self.config.agent_placement_half_extents, filter.as_ref());
    let mut agent = Agent::new(position, params, filter);
    match found {
      Some(result) => {
        agent.state = AgentState::Walking;
        agent.position = result.position;
        agent.corridor.reset(result.poly_ref, result.position);
      }
      None => {
        agent.state = AgentState::Invalid;
        agent.corridor.reset(PolyRef::INVALID, position);
      }
    }
    self.agents.insert(agent)
  }

  pub fn remove_agent(&mut self, agent_id: AgentId) -> bool {
    self.agents.remove(agent_id).is_some()
  }

  pub fn request_move_target(&mut self, agent_id: AgentId, target_ref: PolyRef, target_position: Vec3) -> bool {
    let Some(agent) = self.agents.get_mut(agent_id) else { return false };
    if agent.state == AgentState::Invalid {
      return false;
    }
    agent.target_ref = Some(target_ref);
    agent.target_position = target_position;
    agent.target_replan = false;
    agent.target_pathfinding_time = 0.0;
    agent.target_path_is_partial = false;
    agent.target_state = AgentTargetState::Requesting;
    true
  }

  pub fn request_move_velocity(&mut self, agent_id: AgentId, velocity: Vec3) -> bool {
    let Some(agent) = self.agents.get_mut(agent_id) else { return false };
    if agent.state == AgentState::Invalid {
      return false;
    }
    agent.target_ref = None;
    agent.requested_velocity = velocity;
    agent.target_state = AgentTargetState::Velocity;
    true
  }

  pub fn reset_move_target(&mut self, agent_id: AgentId) -> bool {
    let Some(agent) = self.agents.get_mut(agent_id) else { return false };
    agent.target_ref = None;
    agent.requested_velocity = Vec3::ZERO;
    agent.desired_velocity = Vec3::ZERO;
    agent.target_path_is_partial = false;
    agent.target_state = AgentTargetState::None;
    true
  }

  /// Ends an externally-driven off-mesh traversal (one whose agent
  /// params disabled auto-traversal), placing the agent at the
  /// connection's far end.
  pub fn complete_off_mesh_connection(&mut self, agent_id: AgentId) -> bool {
    let Some(agent) = self.agents.get_mut(agent_id) else { return false };
    let Some(anim) = agent.off_mesh_animation.take() else { return false };
    agent.position = anim.end_position;
    agent.state = AgentState::Walking;
    true
  }

  pub fn is_agent_at_target(&self, agent_id: AgentId, threshold: f32) -> bool {
    let Some(agent) = self.agents.get(agent_id) else { return false };
    if agent.target_state != AgentTargetState::Valid {
      return false;
    }
    let Some(last) = agent.corners.last() else { return false };
    if !last.flags.contains(StraightPathFlags::END) {
      return false;
    }
    geometry::dist2d_sq(agent.position, last.position) <= threshold * threshold
  }

  /// Advances every agent by `delta_time` seconds, running all 13 phases
  /// of the crowd update pipeline in order.
  pub fn update(&mut self, nav: &dyn NavMeshQuery, delta_time: f32) {
    let ids: Vec<AgentId> = self.agents.keys().collect();

    self.phase1_check_path_validity(nav, &ids, delta_time);
    self.phase2_update_topology_optimization(nav, &ids, delta_time);
    self.phase3_update_move_requests(nav, &ids);
    self.phase4_update_neighbours(&ids);
    self.phase5_update_local_boundaries(nav, &ids);
    self.phase6_update_corners(nav, &ids);
    self.phase7_trigger_off_mesh_connections(nav, &ids);
    self.phase8_update_steering(&ids);
    self.phase9_plan_velocity(&ids);
    self.phase10_integrate(&ids, delta_time);
    self.phase11_handle_collisions(&ids);
    self.phase12_update_corridors(nav, &ids);
    self.phase13_update_off_mesh_animation(&ids, delta_time);
  }

  fn phase1_check_path_validity(&mut self, nav: &dyn NavMeshQuery, ids: &[AgentId], delta_time: f32) {
    for &id in ids {
      let Some(agent) = self.agents.get_mut(id) else { continue };
      if agent.state != AgentState::Walking {
        continue;
      }
      agent.target_pathfinding_time += delta_time;

      let mut replan = false;

      match agent.corridor.path().first().copied() {
        Some(first) if !nav.is_valid_poly_ref(first) => {
          match nav.find_nearest_poly(agent.position, self.config.agent_placement_half_extents, agent.filter.as_ref()) {
            Some(found) => {
              agent.corridor.fix_path_start(found.poly_ref, found.position);
              agent.boundary.reset();
              replan = true;
            }
            None => {
              agent.state = AgentState::Invalid;
              agent.corridor.reset(PolyRef::INVALID, agent.position);
              continue;
            }
          }
        }
        Some(_) => {}
        None => {
          agent.state = AgentState::Invalid;
          continue;
        }
      }

      if matches!(
        agent.target_state,
        AgentTargetState::Requesting
          | AgentTargetState::Valid
          | AgentTargetState::WaitingForQueue
          | AgentTargetState::WaitingForPath
      ) {
        if let Some(target_ref) = agent.target_ref {
          if !nav.is_valid_poly_ref(target_ref) || !agent.filter.pass_filter(target_ref) {
            match nav.find_nearest_poly(agent.target_position, self.config.agent_placement_half_extents, agent.filter.as_ref()) {
              Some(found) => {
                agent.target_ref = Some(found.poly_ref);
                agent.target_position = found.position;
              }
              None => {
                agent.target_ref = None;
                agent.target_state = AgentTargetState::None;
              }
            }
          }
        }
      }

      if !agent.corridor.corridor_is_valid(CHECK_LOOKAHEAD, nav, agent.filter.as_ref()) {
        replan = true;
      }

      if agent.target_state == AgentTargetState::Valid
        && agent.target_pathfinding_time > TARGET_REPLAN_DELAY_SECONDS
        && agent.corridor.path().len() < CHECK_LOOKAHEAD
        && agent.corridor.path().last().copied() != agent.target_ref
      {
        replan = true;
      }

      if replan && agent.target_ref.is_some() {
        agent.target_replan = true;
        agent.target_state = AgentTargetState::Requesting;
      }
    }
  }

  fn phase2_update_topology_optimization(&mut self, nav: &dyn NavMeshQuery, ids: &[AgentId], delta_time: f32) {
    let mut candidates: Vec<(AgentId, f32)> = Vec::new();
    for &id in ids {
      let Some(agent) = self.agents.get_mut(id) else { continue };
      if agent.state != AgentState::Walking
        || matches!(agent.target_state, AgentTargetState::None | AgentTargetState::Velocity)
      {
        continue;
      }
      if !agent.params.update_flags.contains(CrowdUpdateFlags::OPTIMIZE_TOPO) {
        continue;
      }
      agent.topology_opt_time += delta_time;
      if agent.topology_opt_time >= OPT_TIME_THR {
        candidates.push((id, agent.topology_opt_time));
      }
    }
    candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    for &(id, _) in candidates.iter().take(OPT_MAX_AGENTS) {
      let Some(agent) = self.agents.get_mut(id) else { continue };
      let Agent { corridor, filter, .. } = agent;
      corridor.optimize_path_topology(nav, filter.as_ref(), TOPOLOGY_OPT_ITERATIONS);
      agent.topology_opt_time = 0.0;
    }
  }

  fn phase3_update_move_requests(&mut self, nav: &dyn NavMeshQuery, ids: &[AgentId]) {
    // 3a: Requesting -> quick search.
    for &id in ids {
      let Some(agent) = self.agents.get_mut(id) else { continue };
      if agent.target_state != AgentTargetState::Requesting {
        continue;
      }
      let Some(&start) = agent.corridor.path().first() else {
        agent.target_state = AgentTargetState::Failed;
        continue;
      };
      let Some(end) = agent.target_ref else {
        agent.target_state = AgentTargetState::Failed;
        continue;
      };
      let start_pos = agent.corridor.position();
      let end_pos = agent.target_position;

      let mut query = nav.create_sliced_path_query();
      query.init(start, start_pos, end, end_pos, agent.filter.as_ref());
      query.update(self.config.quick_search_iterations);
      let result = if agent.target_replan { query.finalize_partial(agent.corridor.path()) } else { query.finalize() };

      match result {
        Some(r) if r.path.last().copied() == Some(end) => {
          agent.target_path_is_partial = r.is_partial;
          agent.corridor.set_path(end_pos, r.path);
          agent.target_state = AgentTargetState::Valid;
          agent.target_pathfinding_time = 0.0;
        }
        Some(r) if !r.path.is_empty() => {
          let last_poly = *r.path.last().unwrap();
          match nav.closest_point_on_poly(last_poly, agent.target_position) {
            Some(pos) => agent.corridor.set_path(pos, r.path),
            None => agent.corridor.reset(start, start_pos),
          }
          agent.target_state = AgentTargetState::WaitingForQueue;
        }
        _ => {
          agent.corridor.reset(start, start_pos);
          agent.target_state = AgentTargetState::WaitingForQueue;
        }
      }
    }

    // 3b: WaitingForQueue -> full search init -> WaitingForPath.
    for &id in ids {
      let Some(agent) = self.agents.get_mut(id) else { continue };
      if agent.target_state != AgentTargetState::WaitingForQueue {
        continue;
      }
      let Some(&last) = agent.corridor.path().last() else {
        agent.target_state = AgentTargetState::Failed;
        continue;
      };
      let Some(target_ref) = agent.target_ref else {
        agent.target_state = AgentTargetState::Failed;
        continue;
      };
      let start_pos = agent.corridor.target();
      let target_position = agent.target_position;
      let mut query = nav.create_sliced_path_query();
      query.init(last, start_pos, target_ref, target_position, agent.filter.as_ref());
      agent.sliced_query = Some(query);
      agent.target_state = AgentTargetState::WaitingForPath;
    }

    // 3c: Budgeted execution of all WaitingForPath sessions, longest
    // waiting first.
    let mut waiting: Vec<AgentId> = ids
      .iter()
      .copied()
      .filter(|&id| self.agents.get(id).map(|a| a.target_state == AgentTargetState::WaitingForPath).unwrap_or(false))
      .collect();
    waiting.sort_by(|&a, &b| {
      let ta = self.agents.get(a).map(|a| a.target_pathfinding_time).unwrap_or(0.0);
      let tb = self.agents.get(b).map(|a| a.target_pathfinding_time).unwrap_or(0.0);
      tb.partial_cmp(&ta).unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut remaining = self.config.max_iterations_per_update;
    for id in waiting {
      if remaining == 0 {
        break;
      }
      let Some(agent) = self.agents.get_mut(id) else { continue };
      let Some(query) = agent.sliced_query.as_mut() else { continue };

      let allotted = self.config.max_iterations_per_agent.min(remaining);
      let (status, iters_done) = query.update(allotted);
      remaining = remaining.saturating_sub(iters_done);

      if status.contains(QueryStatus::FAILURE) {
        agent.target_state = AgentTargetState::Failed;
        agent.target_path_is_partial = false;
        agent.target_pathfinding_time = 0.0;
        agent.sliced_query = None;
        continue;
      }
      if !status.contains(QueryStatus::SUCCESS) {
        continue;
      }

      let result = if agent.target_replan { query.finalize_partial(agent.corridor.path()) } else { query.finalize() };
      agent.sliced_query = None;
      let Some(result) = result else {
        agent.target_state = AgentTargetState::Failed;
        continue;
      };

      let current_path = agent.corridor.path().to_vec();
      let Some(&current_last) = current_path.last() else {
        agent.target_state = AgentTargetState::Failed;
        continue;
      };
      if result.path.first().copied() != Some(current_last) {
        agent.target_state =
          if agent.target_ref.is_some() { AgentTargetState::Requesting } else { AgentTargetState::Failed };
        continue;
      }

      let is_partial = result.is_partial;
      let mut merged = current_path[..current_path.len() - 1].to_vec();
      merged.extend(result.path);
      remove_back_and_forth(&mut merged);

      let target_pos = if merged.last().copied() == agent.target_ref {
        agent.target_position
      } else {
        let last_poly = *merged.last().unwrap();
        match nav.closest_point_on_poly(last_poly, agent.target_position) {
          Some(pos) => pos,
          None => {
            agent.target_state =
              if agent.target_ref.is_some() { AgentTargetState::Requesting } else { AgentTargetState::Failed };
            continue;
          }
        }
      };

      agent.target_path_is_partial = is_partial;
      agent.corridor.set_path(target_pos, merged);
      agent.boundary.reset();
      agent.target_state = AgentTargetState::Valid;
      agent.target_pathfinding_time = 0.0;
    }
  }

  fn phase4_update_neighbours(&mut self, ids: &[AgentId]) {
    let walking: Vec<AgentId> =
      ids.iter().copied().filter(|&id| self.agents.get(id).map(|a| a.state == AgentState::Walking).unwrap_or(false)).collect();
    if walking.is_empty() {
      return;
    }

    let max_range = walking
      .iter()
      .map(|&id| self.agents.get(id).unwrap().params.collision_query_range)
      .fold(0.0f32, f32::max);
    if max_range <= 0.0 {
      for &id in &walking {
        self.agents.get_mut(id).unwrap().neighbours.clear();
      }
      return;
    }

    let positions: HashMap<AgentId, Vec3> = walking.iter().map(|&id| (id, self.agents.get(id).unwrap().position)).collect();
    let min_x = positions.values().map(|p| p.x).fold(f32::INFINITY, f32::min);
    let min_z = positions.values().map(|p| p.z).fold(f32::INFINITY, f32::min);
    let max_x = positions.values().map(|p| p.x).fold(f32::NEG_INFINITY, f32::max);
    let max_z = positions.values().map(|p| p.z).fold(f32::NEG_INFINITY, f32::max);

    let width = (((max_x - min_x) / max_range).floor() as i32 + 1).max(1);
    let height = (((max_z - min_z) / max_range).floor() as i32 + 1).max(1);
    let cell_of = |p: Vec3| -> (i32, i32) {
      (((p.x - min_x) / max_range).floor() as i32, ((p.z - min_z) / max_range).floor() as i32)
    };

    let mut grid: Vec<Vec<AgentId>> = vec![Vec::new(); (width * height) as usize];
    for &id in &walking {
      let (cx, cz) = cell_of(positions[&id]);
      grid[(cz * width + cx) as usize].push(id);
    }

    for &id in &walking {
      let agent_pos = positions[&id];
      let range = self.agents.get(id).unwrap().params.collision_query_range;
      let range_sq = range * range;
      let (cx, cz) = cell_of(agent_pos);
      let mut neighbours = Vec::new();
      for dz in -1..=1 {
        for dx in -1..=1 {
          let nx = cx + dx;
          let nz = cz + dz;
          if nx < 0 || nz < 0 || nx >= width || nz >= height {
            continue;
          }
          for &other in &grid[(nz * width + nx) as usize] {
            if other == id {
              continue;
            }
            let d = geometry::dist2d_sq(agent_pos, positions[&other]);
            if d <= range_sq {
              neighbours.push(Neighbour { agent: other, distance_sq: d });
            }
          }
        }
      }
      self.agents.get_mut(id).unwrap().neighbours = neighbours;
    }
  }

  fn phase5_update_local_boundaries(&mut self, nav: &dyn NavMeshQuery, ids: &[AgentId]) {
    for &id in ids {
      let Some(agent) = self.agents.get_mut(id) else { continue };
      if agent.state != AgentState::Walking || agent.corridor.path().is_empty() {
        continue;
      }
      let dist = geometry::dist2d_sq(agent.position, agent.boundary.center());
      let stale = dist > (0.25 * agent.params.collision_query_range).powi(2);
      let Agent { corridor, boundary, filter, .. } = agent;
      if stale || !boundary.is_valid(nav, filter.as_ref()) {
        let start = corridor.path()[0];
        boundary.update(start, agent.position, agent.params.collision_query_range, nav, filter.as_ref());
      }
    }
  }

  fn phase6_update_corners(&mut self, nav: &dyn NavMeshQuery, ids: &[AgentId]) {
    for &id in ids {
      let Some(agent) = self.agents.get_mut(id) else { continue };
      if agent.state != AgentState::Walking || agent.target_state != AgentTargetState::Valid {
        continue;
      }
      agent.corners = agent.corridor.find_corners(nav, MAX_CORNERS);
      if agent.params.update_flags.contains(CrowdUpdateFlags::OPTIMIZE_VIS) && !agent.corners.is_empty() {
        let idx = 1.min(agent.corners.len() - 1);
        let next = agent.corners[idx].position;
        let range = agent.params.path_optimization_range;
        let Agent { corridor, filter, .. } = agent;
        corridor.optimize_path_visibility(next, range, nav, filter.as_ref());
      }
    }
  }

  fn phase7_trigger_off_mesh_connections(&mut self, nav: &dyn NavMeshQuery, ids: &[AgentId]) {
    for &id in ids {
      let Some(agent) = self.agents.get_mut(id) else { continue };
      if agent.state != AgentState::Walking {
        continue;
      }
      let Some(last) = agent.corners.last().copied() else { continue };
      if last.point_type != StraightPathPointType::OffMeshConnection {
        continue;
      }
      let trigger_radius = OFFMESH_TRIGGER_RADIUS_MULT * agent.params.radius;
      if geometry::dist2d_sq(agent.position, last.position) >= trigger_radius * trigger_radius {
        continue;
      }

      let start_position = agent.position;
      let Some(result) = agent.corridor.move_over_off_mesh_connection(last.poly_ref, nav) else { continue };
      agent.state = AgentState::OffMesh;
      let duration = if agent.params.auto_traverse_off_mesh_connections { OFFMESH_AUTO_TRAVERSE_DURATION } else { -1.0 };
      agent.off_mesh_animation = Some(OffMeshAnimation {
        t: 0.0,
        duration,
        start_position,
        end_position: result.end_position,
        node_ref: result.off_mesh_node_ref,
      });
    }
  }

  fn phase8_update_steering(&mut self, ids: &[AgentId]) {
    let positions: HashMap<AgentId, Vec3> = ids.iter().filter_map(|&id| self.agents.get(id).map(|a| (id, a.position))).collect();

    for &id in ids {
      let Some(agent) = self.agents.get_mut(id) else { continue };
      if agent.state != AgentState::Walking {
        continue;
      }

      if agent.target_state == AgentTargetState::Velocity {
        agent.desired_velocity = agent.requested_velocity;
        continue;
      }

      if agent.corners.is_empty() {
        agent.desired_velocity = Vec3::ZERO;
        continue;
      }

      let p0 = agent.corners[0].position;
      let mut dvel = if agent.params.update_flags.contains(CrowdUpdateFlags::ANTICIPATE_TURNS) && agent.corners.len() > 1 {
        let p1 = agent.corners[1].position;
        let to_p0 = p0 - agent.position;
        let to_p1 = p1 - agent.position;
        let len1 = to_p1.length();
        let dir = if len1 > 1e-4 { to_p0 - (to_p1 / len1) * (to_p0.length() * 0.5) } else { to_p0 };
        dir.normalize_or_zero() * agent.params.max_speed
      } else {
        (p0 - agent.position).normalize_or_zero() * agent.params.max_speed
      };
      dvel.y = 0.0;

      let last = *agent.corners.last().unwrap();
      if last.flags.contains(StraightPathFlags::END) {
        let slowdown_range = 2.0 * agent.params.radius;
        let dist = geometry::dist2d(agent.position, last.position).min(slowdown_range);
        if slowdown_range > 1e-4 {
          dvel *= dist / slowdown_range;
        }
      }

      if agent.params.update_flags.contains(CrowdUpdateFlags::SEPARATION) {
        let range = agent.params.collision_query_range;
        let mut sep = Vec3::ZERO;
        let mut contributors = 0u32;
        for nei in &agent.neighbours {
          let Some(&nei_pos) = positions.get(&nei.agent) else { continue };
          let diff = Vec3::new(agent.position.x - nei_pos.x, 0.0, agent.position.z - nei_pos.z);
          let dist = diff.length();
          if dist < 1e-4 || dist > range {
            continue;
          }
          let w = agent.params.separation_weight * (1.0 - dist / range).powi(2);
          if w < 0.0001 {
            continue;
          }
          sep += diff / dist * w;
          contributors += 1;
        }
        if contributors > 0 {
          dvel += sep / contributors as f32;
        }
        let len = dvel.length();
        let desired_speed = agent.params.max_speed;
        if len > desired_speed && len > 1e-6 {
          dvel = dvel / len * desired_speed;
        }
      }

      agent.desired_velocity = dvel;
      agent.desired_speed = agent.params.max_speed;
    }
  }

  fn phase9_plan_velocity(&mut self, ids: &[AgentId]) {
    let snapshot: HashMap<AgentId, (Vec3, Vec3, Vec3, f32)> = ids
      .iter()
      .filter_map(|&id| self.agents.get(id).map(|a| (id, (a.position, a.velocity, a.desired_velocity, a.params.radius))))
      .collect();

    for &id in ids {
      let Some(agent) = self.agents.get_mut(id) else { continue };
      if agent.state != AgentState::Walking {
        continue;
      }
      if !agent.params.update_flags.contains(CrowdUpdateFlags::OBSTACLE_AVOIDANCE) {
        agent.new_velocity = agent.desired_velocity;
        continue;
      }

      let new_vel = {
        let Agent { obstacle_avoidance, boundary, neighbours, position, velocity, desired_velocity, params, .. } = agent;
        obstacle_avoidance.reset(params.obstacle_avoidance);
        for nei in neighbours.iter() {
          if let Some(&(npos, nvel, ndvel, nrad)) = snapshot.get(&nei.agent) {
            obstacle_avoidance.add_circle(npos, nrad, nvel, ndvel);
          }
        }
        for seg in boundary.segments() {
          if geometry::tri_area2_xz(*position, seg.p, seg.q) >= 0.0 {
            obstacle_avoidance.add_segment(seg.p, seg.q);
          }
        }
        obstacle_avoidance.sample_velocity_adaptive(*position, params.radius, params.max_speed, *velocity, *desired_velocity)
      };
      agent.new_velocity = new_vel;
    }
  }

  fn phase10_integrate(&mut self, ids: &[AgentId], delta_time: f32) {
    for &id in ids {
      let Some(agent) = self.agents.get_mut(id) else { continue };
      if agent.state != AgentState::Walking {
        continue;
      }
      let max_delta = agent.params.max_acceleration * delta_time;
      let mut dv = agent.new_velocity - agent.velocity;
      let dv_len = dv.length();
      if dv_len > max_delta && dv_len > 1e-6 {
        dv = dv / dv_len * max_delta;
      }
      agent.velocity += dv;
      if agent.velocity.length() > 1e-4 {
        agent.position += agent.velocity * delta_time;
      } else {
        agent.velocity = Vec3::ZERO;
      }
    }
  }

  fn phase11_handle_collisions(&mut self, ids: &[AgentId]) {
    let walking: Vec<AgentId> =
      ids.iter().copied().filter(|&id| self.agents.get(id).map(|a| a.state == AgentState::Walking).unwrap_or(false)).collect();
    if walking.is_empty() {
      return;
    }
    let order: HashMap<AgentId, usize> = ids.iter().enumerate().map(|(i, &id)| (id, i)).collect();

    for _ in 0..COLLISION_RESOLVE_ITERATIONS {
      let snapshot: HashMap<AgentId, (Vec3, f32, Vec3)> = walking
        .iter()
        .map(|&id| {
          let a = self.agents.get(id).unwrap();
          (id, (a.position, a.params.radius, a.desired_velocity))
        })
        .collect();

      let mut displacements: HashMap<AgentId, Vec3> = HashMap::new();
      for &id in &walking {
        let (pos, radius, dvel) = snapshot[&id];
        let neighbours = self.agents.get(id).unwrap().neighbours.clone();
        let mut disp = Vec3::ZERO;
        let mut count = 0u32;
        for nei in &neighbours {
          let Some(&(npos, nradius, _)) = snapshot.get(&nei.agent) else { continue };
          let mut diff = Vec3::new(pos.x - npos.x, 0.0, pos.z - npos.z);
          let dist = diff.length();
          let mut penetration = (radius + nradius) - dist;
          if penetration <= 0.0 {
            continue;
          }
          if dist < 1e-4 {
            let tangent = Vec3::new(-dvel.z, 0.0, dvel.x).normalize_or_zero();
            let sign = if order[&id] < order[&nei.agent] { 1.0 } else { -1.0 };
            diff = tangent * sign;
            penetration = 0.01;
          }
          let diff_len_sq = diff.length_squared();
          if diff_len_sq > 1e-9 {
            diff *= (penetration * 0.5 * COLLISION_RESOLVE_FACTOR) / diff_len_sq;
            disp += diff;
          }
          count += 1;
        }
        if count > 0 {
          disp /= count as f32;
        }
        displacements.insert(id, disp);
      }

      for &id in &walking {
        if let Some(agent) = self.agents.get_mut(id) {
          agent.displacement = displacements[&id];
          agent.position += agent.displacement;
        }
      }
    }
  }

  fn phase12_update_corridors(&mut self, nav: &dyn NavMeshQuery, ids: &[AgentId]) {
    for &id in ids {
      let Some(agent) = self.agents.get_mut(id) else { continue };
      if agent.state != AgentState::Walking {
        continue;
      }
      let pos = agent.position;
      let moved = agent.corridor.move_position(pos, nav, agent.filter.as_ref());
      if moved {
        agent.position = agent.corridor.position();
      }
      if matches!(agent.target_state, AgentTargetState::None | AgentTargetState::Velocity) {
        let first = agent.corridor.path().first().copied().unwrap_or(PolyRef::INVALID);
        let corridor_pos = agent.corridor.position();
        agent.corridor.reset(first, corridor_pos);
      }
    }
  }

  fn phase13_update_off_mesh_animation(&mut self, ids: &[AgentId], delta_time: f32) {
    for &id in ids {
      let Some(agent) = self.agents.get_mut(id) else { continue };
      if agent.state != AgentState::OffMesh || !agent.params.auto_traverse_off_mesh_connections {
        continue;
      }
      let Some(anim) = agent.off_mesh_animation.as_mut() else { continue };
      anim.t += delta_time;
      if anim.duration <= 0.0 || anim.t >= anim.duration {
        agent.position = anim.end_position;
        agent.off_mesh_animation = None;
        agent.state = AgentState::Walking;
      } else {
        let t = (anim.t / anim.duration).clamp(0.0, 1.0);
        agent.position = anim.start_position.lerp(anim.end_position, t);
        agent.velocity = Vec3::ZERO;
        agent.desired_velocity = Vec3::ZERO;
      }
    }
  }
}

#[cfg(test)]
#[path = "crowd_test.rs"]
mod test;
