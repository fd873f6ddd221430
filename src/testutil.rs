//! A toy in-memory navmesh backing [`crate::query::NavMeshQuery`] and
//! [`crate::sliced_path::SlicedPathQuery`], used across the crate's test
//! files. Real navmesh construction is out of scope for this crate (see
//! the crate docs); this is deliberately the simplest mesh that can
//! exercise every collaborator method: a row of unit-square ground
//! polygons along X (z spans `[0, 1]`), optionally bridged by a single
//! off-mesh connection.
#![cfg(test)]

use std::collections::{HashMap, HashSet, VecDeque};

use glam::Vec3;

use crate::query::{
  FindNearestPolyResult, MoveAlongSurfaceResult, NavMeshQuery, PolyRef, QueryFilter, RaycastResult,
  StraightPathFlags, StraightPathPoint, StraightPathPointType, WallSegment,
};
use crate::sliced_path::{QueryStatus, SlicedPathQuery, SlicedPathResult};

#[derive(Clone, Copy)]
struct OffMeshLink {
  poly_ref: PolyRef,
  a_poly: PolyRef,
  a_pos: Vec3,
  b_poly: PolyRef,
  b_pos: Vec3,
}

#[derive(Clone)]
pub struct TestNavMesh {
  num_ground_polys: usize,
  invalid: HashSet<PolyRef>,
  off_mesh: Option<OffMeshLink>,
}

impl TestNavMesh {
  pub fn new(num_ground_polys: usize) -> Self {
    Self { num_ground_polys, invalid: HashSet::new(), off_mesh: None }
  }

  pub fn with_off_mesh_link(
    mut self,
    poly_ref: PolyRef,
    a_poly: PolyRef,
    a_pos: Vec3,
    b_poly: PolyRef,
    b_pos: Vec3,
  ) -> Self {
    self.off_mesh = Some(OffMeshLink { poly_ref, a_poly, a_pos, b_poly, b_pos });
    self
  }

  pub fn invalidate(&mut self, poly_ref: PolyRef) {
    self.invalid.insert(poly_ref);
  }

  /// Ground polygon ref for 0-based index `i` (spans `x in [i, i+1]`).
  pub fn poly(index: usize) -> PolyRef {
    PolyRef((index + 1) as u64)
  }

  fn is_ground(&self, p: PolyRef) -> bool {
    p.0 >= 1 && p.0 <= self.num_ground_polys as u64
  }

  fn bounds(&self, p: PolyRef) -> Option<(f32, f32)> {
    if self.is_ground(p) {
      let i = (p.0 - 1) as f32;
      Some((i, i + 1.0))
    } else {
      None
    }
  }

  fn neighbours(&self, p: PolyRef) -> Vec<PolyRef> {
    let mut out = Vec::new();
    if self.is_ground(p) {
      if p.0 > 1 {
        out.push(PolyRef(p.0 - 1));
      }
      if p.0 < self.num_ground_polys as u64 {
        out.push(PolyRef(p.0 + 1));
      }
    }
    if let Some(link) = &self.off_mesh {
      if p == link.a_poly || p == link.b_poly {
        out.push(link.poly_ref);
      }
      if p == link.poly_ref {
        out.push(link.a_poly);
        out.push(link.b_poly);
      }
    }
    out
  }

  fn clamp_into(&self, p: PolyRef, point: Vec3) -> Vec3 {
    match self.bounds(p) {
      Some((lo, hi)) => Vec3::new(point.x.clamp(lo, hi), 0.0, point.z.clamp(0.0, 1.0)),
      None => point,
    }
  }
}

impl NavMeshQuery for TestNavMesh {
  fn is_valid_poly_ref(&self, poly_ref: PolyRef) -> bool {
    if self.invalid.contains(&poly_ref) {
      return false;
    }
    self.is_ground(poly_ref) || self.off_mesh.map_or(false, |l| l.poly_ref == poly_ref)
  }

  fn find_nearest_poly(
    &self,
    center: Vec3,
    _half_extents: Vec3,
    filter: &dyn QueryFilter,
  ) -> Option<FindNearestPolyResult> {
    let max_index = self.num_ground_polys.checked_sub(1)?;
    let clamped_x = center.x.clamp(0.0, max_index as f32 + 1.0 - 1e-4);
    let mut index = clamped_x.floor().max(0.0) as usize;
    index = index.min(max_index);
    for probe in 0..self.num_ground_polys {
      let candidate = if probe % 2 == 0 { index + probe / 2 } else { index.checked_sub(probe / 2 + 1).unwrap_or(usize::MAX) };
      if candidate > max_index {
        continue;
      }
      let poly_ref = Self::poly(candidate);
      if !self.is_valid_poly_ref(poly_ref) || !filter.pass_filter(poly_ref) {
        continue;
      }
      return Some(FindNearestPolyResult { poly_ref, position: self.clamp_into(poly_ref, center) });
    }
    None
  }

  fn closest_point_on_poly(&self, poly_ref: PolyRef, point: Vec3) -> Option<Vec3> {
    if !self.is_valid_poly_ref(poly_ref) {
      return None;
    }
    Some(self.clamp_into(poly_ref, point))
  }

  fn find_local_neighbourhood(
    &self,
    start: PolyRef,
    position: Vec3,
    radius: f32,
    filter: &dyn QueryFilter,
  ) -> Option<Vec<PolyRef>> {
    if !self.is_valid_poly_ref(start) {
      return None;
    }
    let mut visited = vec![start];
    let mut frontier = VecDeque::from([start]);
    while let Some(cur) = frontier.pop_front() {
      for next in self.neighbours(cur) {
        if visited.contains(&next) || !self.is_valid_poly_ref(next) || !filter.pass_filter(next) {
          continue;
        }
        if let Some((lo, hi)) = self.bounds(next) {
          let mid = (lo + hi) * 0.5;
          if (mid - position.x).abs() > radius + 0.5 {
            continue;
          }
        }
        visited.push(next);
        frontier.push_back(next);
      }
    }
    Some(visited)
  }

  fn poly_wall_segments(&self, poly_ref: PolyRef, _filter: &dyn QueryFilter) -> Option<Vec<WallSegment>> {
    let (lo, hi) = self.bounds(poly_ref)?;
    Some(vec![
      WallSegment { p: Vec3::new(lo, 0.0, 0.0), q: Vec3::new(hi, 0.0, 0.0) },
      WallSegment { p: Vec3::new(lo, 0.0, 1.0), q: Vec3::new(hi, 0.0, 1.0) },
    ])
  }

  fn find_straight_path(
    &self,
    start: Vec3,
    end: Vec3,
    path: &[PolyRef],
    max_points: usize,
  ) -> Option<Vec<StraightPathPoint>> {
    if path.is_empty() {
      return None;
    }
    let mut points = vec![StraightPathPoint {
      position: start,
      point_type: StraightPathPointType::Normal,
      flags: StraightPathFlags::empty(),
      poly_ref: path[0],
    }];
    for &p in path {
      if let Some(link) = &self.off_mesh {
        if p == link.poly_ref {
          let entry = if points.last().map(|pt| pt.poly_ref) == Some(link.a_poly) {
            link.a_pos
          } else {
            link.b_pos
          };
          points.push(StraightPathPoint {
            position: entry,
            point_type: StraightPathPointType::OffMeshConnection,
            flags: StraightPathFlags::empty(),
            poly_ref: p,
          });
        }
      }
    }
    points.push(StraightPathPoint {
      position: end,
      point_type: StraightPathPointType::Normal,
      flags: StraightPathFlags::END,
      poly_ref: *path.last().unwrap(),
    });
    points.truncate(max_points);
    Some(points)
  }

  fn move_along_surface(
    &self,
    start: PolyRef,
    from: Vec3,
    to: Vec3,
    filter: &dyn QueryFilter,
  ) -> Option<MoveAlongSurfaceResult> {
    if !self.is_valid_poly_ref(start) || !self.bounds(start).is_some() {
      return None;
    }
    let dir: i64 = if to.x >= from.x { 1 } else { -1 };
    let mut cur = start;
    let mut visited = vec![cur];
    loop {
      let (lo, hi) = self.bounds(cur)?;
      if to.x >= lo && to.x <= hi {
        return Some(MoveAlongSurfaceResult { position: self.clamp_into(cur, to), visited });
      }
      let next_index = (cur.0 as i64 - 1 + dir) as i64;
      if next_index < 0 || next_index >= self.num_ground_polys as i64 {
        return Some(MoveAlongSurfaceResult { position: self.clamp_into(cur, to), visited });
      }
      let next = Self::poly(next_index as usize);
      if !self.is_valid_poly_ref(next) || !filter.pass_filter(next) {
        return Some(MoveAlongSurfaceResult { position: self.clamp_into(cur, to), visited });
      }
      cur = next;
      visited.push(cur);
    }
  }

  fn raycast(&self, start: PolyRef, from: Vec3, to: Vec3, filter: &dyn QueryFilter) -> RaycastResult {
    let Some(_) = self.bounds(start) else {
      return RaycastResult { t: 0.0, path: vec![start] };
    };
    let dir: i64 = if to.x >= from.x { 1 } else { -1 };
    let mut cur = start;
    let mut path = vec![cur];
    let total = (to.x - from.x).abs().max(1e-6);
    loop {
      let (lo, hi) = self.bounds(cur).unwrap();
      if to.x >= lo && to.x <= hi {
        return RaycastResult { t: 1.0, path };
      }
      let next_index = (cur.0 as i64 - 1 + dir) as i64;
      if next_index < 0 || next_index >= self.num_ground_polys as i64 {
        let (lo, hi) = self.bounds(cur).unwrap();
        let edge = if dir > 0 { hi } else { lo };
        let t = ((edge - from.x).abs() / total).clamp(0.0, 1.0);
        return RaycastResult { t, path };
      }
      let next = Self::poly(next_index as usize);
      if !self.is_valid_poly_ref(next) || !filter.pass_filter(next) {
        let (lo, hi) = self.bounds(cur).unwrap();
        let edge = if dir > 0 { hi } else { lo };
        let t = ((edge - from.x).abs() / total).clamp(0.0, 1.0);
        return RaycastResult { t, path };
      }
      cur = next;
      path.push(cur);
    }
  }

  fn off_mesh_connection_endpoints(&self, off_mesh_poly: PolyRef, from_poly: PolyRef) -> Option<(Vec3, Vec3)> {
    let link = self.off_mesh.as_ref().filter(|l| l.poly_ref == off_mesh_poly)?;
    if from_poly == link.a_poly {
      Some((link.a_pos, link.b_pos))
    } else {
      Some((link.b_pos, link.a_pos))
    }
  }

  fn create_sliced_path_query(&self) -> Box<dyn SlicedPathQuery> {
    Box::new(TestSlicedQuery::new(self.clone()))
  }
}

/// A filter that accepts every polygon.
pub struct AllowAllFilter;

impl QueryFilter for AllowAllFilter {
  fn pass_filter(&self, _poly_ref: PolyRef) -> bool {
    true
  }
}

/// A filter that rejects a fixed set of polygons.
pub struct BlockListFilter(pub HashSet<PolyRef>);

impl QueryFilter for BlockListFilter {
  fn pass_filter(&self, poly_ref: PolyRef) -> bool {
    !self.0.contains(&poly_ref)
  }
}

/// BFS-based sliced query over [`TestNavMesh`]'s adjacency. Filter
/// results are snapshotted at `init` time since `SlicedPathQuery` has no
/// borrowed state across calls.
struct TestSlicedQuery {
  nav: TestNavMesh,
  passable: HashMap<PolyRef, bool>,
  start: PolyRef,
  end: PolyRef,
  frontier: VecDeque<PolyRef>,
  parent: HashMap<PolyRef, PolyRef>,
  status: QueryStatus,
}

impl TestSlicedQuery {
  fn new(nav: TestNavMesh) -> Self {
    Self {
      nav,
      passable: HashMap::new(),
      start: PolyRef::INVALID,
      end: PolyRef::INVALID,
      frontier: VecDeque::new(),
      parent: HashMap::new(),
      status: QueryStatus::empty(),
    }
  }

  fn build_path_to(&self, mut cur: PolyRef) -> Vec<PolyRef> {
    let mut path = vec![cur];
    while cur != self.start {
      match self.parent.get(&cur) {
        Some(&p) => {
          cur = p;
          path.push(cur);
        }
        None => break,
      }
    }
    path.reverse();
    path
  }
}

impl SlicedPathQuery for TestSlicedQuery {
  fn init(
    &mut self,
    start: PolyRef,
    _start_pos: Vec3,
    end: PolyRef,
    _end_pos: Vec3,
    filter: &dyn QueryFilter,
  ) -> QueryStatus {
    self.start = start;
    self.end = end;
    if !self.nav.is_valid_poly_ref(start) || !self.nav.is_valid_poly_ref(end) {
      self.status = QueryStatus::FAILURE;
      return self.status;
    }
    // Snapshot filter results for the whole (small, finite) mesh now,
    // since `SlicedPathQuery` cannot hold a borrowed filter across calls.
    self.passable.clear();
    for i in 0..self.nav.num_ground_polys {
      let p = TestNavMesh::poly(i);
      self.passable.insert(p, filter.pass_filter(p));
    }
    if let Some(link) = &self.nav.off_mesh {
      self.passable.insert(link.poly_ref, filter.pass_filter(link.poly_ref));
    }
    self.frontier.clear();
    self.frontier.push_back(start);
    self.parent.clear();
    self.status = QueryStatus::IN_PROGRESS;
    self.status
  }

  fn update(&mut self, max_iterations: u32) -> (QueryStatus, u32) {
    let mut iters = 0;
    while iters < max_iterations && self.status == QueryStatus::IN_PROGRESS {
      let Some(cur) = self.frontier.pop_front() else {
        self.status = if self.parent.is_empty() && self.start != self.end {
          QueryStatus::FAILURE
        } else {
          QueryStatus::SUCCESS | QueryStatus::PARTIAL_RESULT
        };
        break;
      };
      iters += 1;
      if cur == self.end {
        self.status = QueryStatus::SUCCESS;
        break;
      }
      for next in self.nav.neighbours(cur) {
        if self.parent.contains_key(&next) || next == self.start {
          continue;
        }
        if !self.nav.is_valid_poly_ref(next) || !*self.passable.get(&next).unwrap_or(&false) {
          continue;
        }
        self.parent.insert(next, cur);
        self.frontier.push_back(next);
      }
      if self.frontier.is_empty() && self.status == QueryStatus::IN_PROGRESS {
        self.status = if cur == self.end {
          QueryStatus::SUCCESS
        } else {
          QueryStatus::SUCCESS | QueryStatus::PARTIAL_RESULT
        };
      }
    }
    (self.status, iters)
  }

  fn status(&self) -> QueryStatus {
    self.status
  }

  fn finalize(&mut self) -> Option<SlicedPathResult> {
    if !self.status.contains(QueryStatus::SUCCESS) {
      return None;
    }
    let target = if self.status.contains(QueryStatus::PARTIAL_RESULT) {
      *self.parent.keys().chain(std::iter::once(&self.start)).last()?
    } else {
      self.end
    };
    Some(SlicedPathResult {
      path: self.build_path_to(target),
      is_partial: self.status.contains(QueryStatus::PARTIAL_RESULT),
    })
  }

  fn finalize_partial(&mut self, _existing_path: &[PolyRef]) -> Option<SlicedPathResult> {
    let mut result = self.finalize()?;
    result.is_partial = true;
    Some(result)
  }
}
