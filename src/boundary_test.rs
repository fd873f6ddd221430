use super::*;
use crate::testutil::{AllowAllFilter, TestNavMesh};
use glam::Vec3;

fn p(i: usize) -> PolyRef {
  TestNavMesh::poly(i)
}

#[test]
fn update_populates_segments_within_range() {
  let nav = TestNavMesh::new(5);
  let filter = AllowAllFilter;
  let mut boundary = LocalBoundary::new();
  boundary.update(p(2), Vec3::new(2.5, 0.0, 0.5), 1.5, &nav, &filter);

  assert_eq!(boundary.center(), Vec3::new(2.5, 0.0, 0.5));
  assert!(!boundary.segments().is_empty());
  assert!(boundary.segments().len() <= MAX_LOCAL_SEGS);
  // Ascending distance order.
  for pair in boundary.segments().windows(2) {
    assert!(pair[0].distance_sq <= pair[1].distance_sq);
  }
}

#[test]
fn reset_clears_everything() {
  let nav = TestNavMesh::new(5);
  let filter = AllowAllFilter;
  let mut boundary = LocalBoundary::new();
  boundary.update(p(2), Vec3::new(2.5, 0.0, 0.5), 1.5, &nav, &filter);
  boundary.reset();
  assert!(boundary.segments().is_empty());
  assert!(!boundary.is_valid(&nav, &filter));
}

#[test]
fn is_valid_fails_once_a_cached_polygon_goes_stale() {
  let nav = TestNavMesh::new(5);
  let filter = AllowAllFilter;
  let mut boundary = LocalBoundary::new();
  boundary.update(p(2), Vec3::new(2.5, 0.0, 0.5), 1.5, &nav, &filter);
  assert!(boundary.is_valid(&nav, &filter));

  let mut nav2 = nav.clone();
  nav2.invalidate(p(2));
  assert!(!boundary.is_valid(&nav2, &filter));
}

#[test]
fn insert_segment_caps_at_max_local_segs() {
  let mut boundary = LocalBoundary::new();
  for i in 0..(MAX_LOCAL_SEGS + 5) {
    boundary.insert_segment(Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0), i as f32);
  }
  assert_eq!(boundary.segments().len(), MAX_LOCAL_SEGS);
  assert_eq!(boundary.segments()[0].distance_sq, 0.0);
}
