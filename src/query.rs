//! The navmesh-query collaborator.
//!
//! Navmesh construction and the raw spatial-query primitives it takes to
//! answer "what's near me", "can I see that", "what's the shortest
//! straight path through this polygon corridor" are out of scope for this
//! crate (see the crate-level docs). Everything in this module is a
//! *trait* describing that fixed external API, so the rest of the crate
//! can be written and tested against it without ever constructing a real
//! navmesh. `crate::testutil` provides a toy implementation for tests.

use glam::Vec3;

/// A reference to a single polygon (or off-mesh connection) in the host
/// navmesh. Opaque to this crate; only equality/hashing matter.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct PolyRef(pub u64);

impl PolyRef {
  pub const INVALID: PolyRef = PolyRef(0);

  pub fn is_valid(self) -> bool {
    self.0 != 0
  }
}

/// A caller-supplied policy object deciding which polygons a query may
/// traverse (area-type/flag masking, per-area cost, etc.). Implementations
/// are opaque to this crate beyond `pass_filter`.
pub trait QueryFilter {
  fn pass_filter(&self, poly_ref: PolyRef) -> bool;
}

/// The kind of corner returned by [`NavMeshQuery::find_straight_path`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StraightPathPointType {
  Normal,
  OffMeshConnection,
}

bitflags::bitflags! {
  /// Flags attached to a single straight-path corner.
  #[derive(Clone, Copy, PartialEq, Eq, Debug)]
  pub struct StraightPathFlags: u8 {
    /// This corner is the final point of the path.
    const END = 1 << 0;
  }
}

#[derive(Clone, Copy, Debug)]
pub struct StraightPathPoint {
  pub position: Vec3,
  pub point_type: StraightPathPointType,
  pub flags: StraightPathFlags,
  /// The polygon (or off-mesh connection) this corner sits on.
  pub poly_ref: PolyRef,
}

#[derive(Clone, Copy, Debug)]
pub struct FindNearestPolyResult {
  pub poly_ref: PolyRef,
  pub position: Vec3,
}

#[derive(Clone, Debug)]
pub struct MoveAlongSurfaceResult {
  pub position: Vec3,
  /// Polygons crossed while sliding from the start to the result position,
  /// in travel order (first entry is the starting polygon).
  pub visited: Vec<PolyRef>,
}

#[derive(Clone, Debug)]
pub struct RaycastResult {
  /// Normalised hit parameter along the `from -> to` segment, in `[0, 1]`.
  /// A value `> 0.99` means the ray reached `to` unobstructed.
  pub t: f32,
  /// Polygons the ray crossed before stopping, in travel order.
  pub path: Vec<PolyRef>,
}

#[derive(Clone, Copy, Debug)]
pub struct WallSegment {
  pub p: Vec3,
  pub q: Vec3,
}

/// The fixed spatial-query surface this crate consumes but does not
/// implement. A real integration backs this with an actual navmesh;
/// `crate::testutil::TestNavMesh` backs it for unit tests.
pub trait NavMeshQuery {
  fn is_valid_poly_ref(&self, poly_ref: PolyRef) -> bool;

  fn find_nearest_poly(
    &self,
    center: Vec3,
    half_extents: Vec3,
    filter: &dyn QueryFilter,
  ) -> Option<FindNearestPolyResult>;

  fn closest_point_on_poly(&self, poly_ref: PolyRef, point: Vec3) -> Option<Vec3>;

  /// BFS over polygons reachable from `start` within `radius` of
  /// `position`, used to seed the local boundary.
  fn find_local_neighbourhood(
    &self,
    start: PolyRef,
    position: Vec3,
    radius: f32,
    filter: &dyn QueryFilter,
  ) -> Option<Vec<PolyRef>>;

  fn poly_wall_segments(
    &self,
    poly_ref: PolyRef,
    filter: &dyn QueryFilter,
  ) -> Option<Vec<WallSegment>>;

  /// String-pulled straight path from `start` to `end` through `path`.
  fn find_straight_path(
    &self,
    start: Vec3,
    end: Vec3,
    path: &[PolyRef],
    max_points: usize,
  ) -> Option<Vec<StraightPathPoint>>;

  fn move_along_surface(
    &self,
    start: PolyRef,
    from: Vec3,
    to: Vec3,
    filter: &dyn QueryFilter,
  ) -> Option<MoveAlongSurfaceResult>;

  fn raycast(&self, start: PolyRef, from: Vec3, to: Vec3, filter: &dyn QueryFilter) -> RaycastResult;

  /// Given an off-mesh connection polygon and the polygon the agent
  /// arrived from, returns the `(entry, exit)` world positions in travel
  /// order.
  fn off_mesh_connection_endpoints(
    &self,
    off_mesh_poly: PolyRef,
    from_poly: PolyRef,
  ) -> Option<(Vec3, Vec3)>;

  /// Constructs a fresh, un-initialised sliced pathfinding session.
  fn create_sliced_path_query(&self) -> Box<dyn crate::sliced_path::SlicedPathQuery>;
}

#[cfg(test)]
#[path = "query_test.rs"]
mod test;
