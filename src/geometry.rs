//! Vector math helpers shared by the corridor, boundary and avoidance
//! modules. The ground plane is XZ; Y is height. All "2-D"/"planar"
//! operations in the spec act on the XZ plane.

use glam::{Vec2, Vec3};

/// Projects `v` onto the XZ ground plane.
pub(crate) fn xz(v: Vec3) -> Vec2 {
  Vec2::new(v.x, v.z)
}

/// Lifts a ground-plane point back into 3-D with zero height.
pub(crate) fn unxz(v: Vec2) -> Vec3 {
  Vec3::new(v.x, 0.0, v.y)
}

/// Squared planar (XZ) distance between two points.
pub(crate) fn dist2d_sq(a: Vec3, b: Vec3) -> f32 {
  xz(a).distance_squared(xz(b))
}

/// Planar (XZ) distance between two points.
pub(crate) fn dist2d(a: Vec3, b: Vec3) -> f32 {
  xz(a).distance(xz(b))
}

/// Twice the signed area of the triangle `(a, b, c)`, projected to XZ.
/// Positive when `a -> b -> c` turns left (counter-clockwise).
pub(crate) fn tri_area2_xz(a: Vec3, b: Vec3, c: Vec3) -> f32 {
  (xz(b) - xz(a)).perp_dot(xz(c) - xz(a))
}

/// Squared distance from planar point `p` to the segment `a-b`.
pub(crate) fn dist_point_segment_sq_xz(p: Vec2, a: Vec2, b: Vec2) -> f32 {
  let ab = b - a;
  let denom = ab.length_squared();
  let t = if denom > 1e-9 { ((p - a).dot(ab) / denom).clamp(0.0, 1.0) } else { 0.0 };
  let closest = a + ab * t;
  (p - closest).length_squared()
}

/// Intersects the ray `p + t*v` (`t >= 0`) against the segment `a-b` in the
/// XZ plane. Returns the ray parameter `t` of the hit, if any.
pub(crate) fn ray_segment_intersect_xz(
  p: Vec2,
  v: Vec2,
  a: Vec2,
  b: Vec2,
) -> Option<f32> {
  let s = b - a;
  let denom = v.perp_dot(s);
  if denom.abs() < 1e-9 {
    return None;
  }
  let diff = a - p;
  let t = diff.perp_dot(s) / denom;
  let u = diff.perp_dot(v) / denom;
  if t >= 0.0 && (0.0..=1.0).contains(&u) {
    Some(t)
  } else {
    None
  }
}

/// Projects `point` onto the segment `a-b` (3-D), returning the closest
/// point and the fraction along the segment.
pub(crate) fn project_point_to_segment(point: Vec3, a: Vec3, b: Vec3) -> (Vec3, f32) {
  let ab = b - a;
  let denom = ab.length_squared();
  let t = if denom > 1e-9 { ((point - a).dot(ab) / denom).clamp(0.0, 1.0) } else { 0.0 };
  (a + ab * t, t)
}

#[cfg(test)]
#[path = "geometry_test.rs"]
mod test;
