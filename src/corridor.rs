//! The Path Corridor (spec §4.1): the polygon-ref window an agent has
//! already committed to, plus the constrained position/target kept inside
//! it between full repaths.

use glam::Vec3;

use crate::geometry;
use crate::query::{NavMeshQuery, PolyRef, QueryFilter, StraightPathPoint, StraightPathPointType};

/// Corners within this planar distance of the agent's current position
/// are considered "already passed" and dropped from `find_corners`.
pub const MIN_TARGET_DIST: f32 = 0.01;

/// Scans `path` from the tail and `visited` from the tail, returning the
/// first `(path_index, visited_index)` pair of equal polygon refs found.
/// Mirrors the "furthest common polygon" search used by both corridor
/// merge rules.
pub(crate) fn find_furthest_common(path: &[PolyRef], visited: &[PolyRef]) -> Option<(usize, usize)> {
  let mut found: Option<(usize, usize)> = None;
  for i in (0..path.len()).rev() {
    let mut hit = false;
    for j in (0..visited.len()).rev() {
      if path[i] == visited[j] {
        found = Some((i, j));
        hit = true;
      }
    }
    if hit {
      break;
    }
  }
  found
}

/// Removes back-and-forth triples (`path[i-1] == path[i+1]`) introduced by
/// splicing a freshly searched path onto an existing corridor.
pub(crate) fn remove_back_and_forth(path: &mut Vec<PolyRef>) {
  let mut i = 1usize;
  while i + 1 < path.len() {
    if path[i - 1] == path[i + 1] {
      path.remove(i + 1);
      path.remove(i - 1);
      i = i.saturating_sub(2).max(1);
    } else {
      i += 1;
    }
  }
}

pub struct MoveOverOffMeshResult {
  pub start_position: Vec3,
  pub end_position: Vec3,
  pub prev_node_ref: PolyRef,
  pub off_mesh_node_ref: PolyRef,
  pub end_node_ref: PolyRef,
}

#[derive(Clone)]
pub struct PathCorridor {
  position: Vec3,
  target: Vec3,
  path: Vec<PolyRef>,
}

impl PathCorridor {
  pub fn new() -> Self {
    Self { position: Vec3::ZERO, target: Vec3::ZERO, path: Vec::new() }
  }

  pub fn position(&self) -> Vec3 {
    self.position
  }

  pub fn target(&self) -> Vec3 {
    self.target
  }

  pub fn path(&self) -> &[PolyRef] {
    &self.path
  }

  /// Collapses the corridor to a single polygon, as when an agent is
  /// first placed or its target request is cleared.
  pub fn reset(&mut self, poly_ref: PolyRef, position: Vec3) {
    self.position = position;
    self.target = position;
    self.path.clear();
    self.path.push(poly_ref);
  }

  /// Installs a freshly found path, constraining the corridor's target to
  /// `target`.
  pub fn set_path(&mut self, target: Vec3, path: Vec<PolyRef>) {
    self.target = target;
    self.path = path;
  }

  pub fn corridor_is_valid(
    &self,
    max_look_ahead: usize,
    nav: &dyn NavMeshQuery,
    filter: &dyn QueryFilter,
  ) -> bool {
    if self.path.is_empty() {
      return false;
    }
    let n = self.path.len().min(max_look_ahead);
    self.path[..n].iter().all(|&p| nav.is_valid_poly_ref(p) && filter.pass_filter(p))
  }

  /// Repairs a corridor whose first polygon has gone stale, re-anchoring
  /// it at `safe_ref`/`safe_pos`.
  pub fn fix_path_start(&mut self, safe_ref: PolyRef, safe_pos: Vec3) {
    self.position = safe_pos;
    if self.path.len() < 3 {
      let last = *self.path.last().unwrap_or(&safe_ref);
      self.path = vec![safe_ref, PolyRef::INVALID, last];
    } else {
      self.path[0] = safe_ref;
      self.path[1] = PolyRef::INVALID;
    }
  }

  /// Slides the corridor's tracked position toward `new_pos`, merging the
  /// polygons crossed along the way into the front of the path (the
  /// "start-moved" merge rule).
  pub fn move_position(
    &mut self,
    new_pos: Vec3,
    nav: &dyn NavMeshQuery,
    filter: &dyn QueryFilter,
  ) -> bool {
    let Some(&start) = self.path.first() else {
      return false;
    };
    let Some(result) = nav.move_along_surface(start, self.position, new_pos, filter) else {
      return false;
    };
    self.position = result.position;
    if let Some((i, j)) = find_furthest_common(&self.path, &result.visited) {
      let mut merged: Vec<PolyRef> = result.visited[j..].iter().rev().copied().collect();
      merged.extend_from_slice(&self.path[i + 1..]);
      if merged.is_empty() {
        merged.push(*result.visited.last().unwrap());
      }
      self.path = merged;
    }
    true
  }

  /// Casts a ray toward `next`, clamped to `path_optimization_range`, and
  /// shortcuts the corridor if the ray reaches almost all the way there
  /// (the "shortcut" merge rule).
  pub fn optimize_path_visibility(
    &mut self,
    next: Vec3,
    path_optimization_range: f32,
    nav: &dyn NavMeshQuery,
    filter: &dyn QueryFilter,
  ) {
    let Some(&start) = self.path.first() else {
      return;
    };
    let dir = next - self.position;
    let len = dir.length();
    let goal = if len > path_optimization_range && len > 1e-5 {
      self.position + dir / len * path_optimization_range
    } else {
      next
    };
    let result = nav.raycast(start, self.position, goal, filter);
    if result.path.len() <= 1 || result.t <= 0.99 {
      return;
    }
    if let Some((i, j)) = find_furthest_common(&self.path, &result.path) {
      if j == 0 {
        return;
      }
      let mut merged = result.path[..j].to_vec();
      merged.extend_from_slice(&self.path[i..]);
      self.path = merged;
    }
  }

  /// Runs a short bounded sliced search from the corridor's current
  /// window toward its stored target, and shortcuts the corridor if it
  /// finds a cheaper topology (the "shortcut" merge rule again).
  pub fn optimize_path_topology(
    &mut self,
    nav: &dyn NavMeshQuery,
    filter: &dyn QueryFilter,
    max_iterations: u32,
  ) -> bool {
    if self.path.len() < 2 {
      return false;
    }
    let start = self.path[0];
    let end = *self.path.last().unwrap();
    let mut query = nav.create_sliced_path_query();
    let status = query.init(start, self.position, end, self.target, filter);
    if status.contains(crate::sliced_path::QueryStatus::FAILURE) {
      return false;
    }
    query.update(max_iterations);
    let Some(result) = query.finalize() else {
      return false;
    };
    if result.path.is_empty() {
      return false;
    }
    let Some((i, j)) = find_furthest_common(&self.path, &result.path) else {
      return false;
    };
    if j == 0 {
      return false;
    }
    let mut merged = result.path[..j].to_vec();
    merged.extend_from_slice(&self.path[i..]);
    self.path = merged;
    true
  }

  /// Moves the corridor past an off-mesh connection the agent has
  /// reached, splicing the path forward to the polygon beyond it.
  pub fn move_over_off_mesh_connection(
    &mut self,
    off_mesh_node_ref: PolyRef,
    nav: &dyn NavMeshQuery,
  ) -> Option<MoveOverOffMeshResult> {
    let idx = self.path.iter().position(|&r| r == off_mesh_node_ref)?;
    if idx == 0 {
      return None;
    }
    let prev_node_ref = self.path[idx - 1];
    let (start_position, end_position) =
      nav.off_mesh_connection_endpoints(off_mesh_node_ref, prev_node_ref)?;
    let end_node_ref = if idx + 1 < self.path.len() { self.path[idx + 1] } else { off_mesh_node_ref };

    let mut remainder = self.path[idx + 1..].to_vec();
    if remainder.is_empty() {
      remainder.push(end_node_ref);
    }
    self.path = remainder;
    self.position = end_position;

    Some(MoveOverOffMeshResult {
      start_position,
      end_position,
      prev_node_ref,
      off_mesh_node_ref,
      end_node_ref,
    })
  }

  /// String-pulls the corridor into a corner list, dropping corners the
  /// agent has already reached and truncating after the first off-mesh
  /// corner.
  pub fn find_corners(&self, nav: &dyn NavMeshQuery, max_corners: usize) -> Vec<StraightPathPoint> {
    if self.path.is_empty() {
      return Vec::new();
    }
    let Some(mut points) = nav.find_straight_path(self.position, self.target, &self.path, max_corners)
    else {
      return Vec::new();
    };

    let mut drop = 0;
    while drop < points.len() {
      let p = &points[drop];
      if p.point_type == StraightPathPointType::OffMeshConnection {
        break;
      }
      if geometry::dist2d_sq(p.position, self.position) <= MIN_TARGET_DIST * MIN_TARGET_DIST {
        drop += 1;
      } else {
        break;
      }
    }
    points.drain(0..drop);

    if let Some(idx) = points.iter().position(|p| p.point_type == StraightPathPointType::OffMeshConnection) {
      points.truncate(idx + 1);
    }
    points
  }
}

impl Default for PathCorridor {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
#[path = "corridor_test.rs"]
mod test;
