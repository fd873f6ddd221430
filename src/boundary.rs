//! The Local Boundary (spec §4.2): a small cache of the nearest wall
//! segments around an agent, refreshed periodically rather than every
//! tick, used by obstacle avoidance to steer away from static geometry.

use glam::Vec3;

use crate::geometry;
use crate::query::{NavMeshQuery, PolyRef, QueryFilter};

pub const MAX_LOCAL_SEGS: usize = 8;
pub const MAX_LOCAL_POLYS: usize = 16;

#[derive(Clone, Copy, Debug)]
pub struct BoundarySegment {
  pub p: Vec3,
  pub q: Vec3,
  pub distance_sq: f32,
}

pub struct LocalBoundary {
  center: Vec3,
  segments: Vec<BoundarySegment>,
  polys: Vec<PolyRef>,
}

impl LocalBoundary {
  pub fn new() -> Self {
    Self { center: Vec3::ZERO, segments: Vec::new(), polys: Vec::new() }
  }

  pub fn center(&self) -> Vec3 {
    self.center
  }

  pub fn segments(&self) -> &[BoundarySegment] {
    &self.segments
  }

  pub fn reset(&mut self) {
    self.center = Vec3::ZERO;
    self.segments.clear();
    self.polys.clear();
  }

  /// Rebuilds the segment cache from scratch: BFS the polygons within
  /// `range` of `position` starting at `start`, then keep the
  /// `MAX_LOCAL_SEGS` closest wall segments among them.
  pub fn update(
    &mut self,
    start: PolyRef,
    position: Vec3,
    range: f32,
    nav: &dyn NavMeshQuery,
    filter: &dyn QueryFilter,
  ) {
    self.center = position;
    self.segments.clear();
    self.polys.clear();

    let Some(neighbourhood) = nav.find_local_neighbourhood(start, position, range, filter) else {
      return;
    };
    self.polys.extend(neighbourhood.into_iter().take(MAX_LOCAL_POLYS));

    let range_sq = range * range;
    let position_xz = geometry::xz(position);
    for &poly in &self.polys {
      let Some(walls) = nav.poly_wall_segments(poly, filter) else {
        continue;
      };
      for wall in walls {
        let d = geometry::dist_point_segment_sq_xz(position_xz, geometry::xz(wall.p), geometry::xz(wall.q));
        if d > range_sq {
          continue;
        }
        self.insert_segment(wall.p, wall.q, d);
      }
    }
  }

  fn insert_segment(&mut self, p: Vec3, q: Vec3, distance_sq: f32) {
    if self.segments.len() >= MAX_LOCAL_SEGS
      && distance_sq >= self.segments.last().map(|s| s.distance_sq).unwrap_or(f32::MAX)
    {
      return;
    }
    let idx = self.segments.partition_point(|s| s.distance_sq <= distance_sq);
    self.segments.insert(idx, BoundarySegment { p, q, distance_sq });
    if self.segments.len() > MAX_LOCAL_SEGS {
      self.segments.pop();
    }
  }

  /// The cached polygons must still exist and pass the filter for the
  /// boundary to remain trustworthy without a refresh.
  pub fn is_valid(&self, nav: &dyn NavMeshQuery, filter: &dyn QueryFilter) -> bool {
    if self.polys.is_empty() {
      return false;
    }
    self.polys.iter().all(|&p| nav.is_valid_poly_ref(p) && filter.pass_filter(p))
  }
}

impl Default for LocalBoundary {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
#[path = "boundary_test.rs"]
mod test;
