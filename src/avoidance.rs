//! Obstacle Avoidance (spec §4.3): a from-scratch RVO-style penalty
//! sampler. Candidate velocities are scored against nearby agents
//! (treated as moving circles) and boundary wall segments (treated as
//! static segments), and the least-penalised candidate wins.
//!
//! This has no counterpart in the teacher crate, which delegates
//! avoidance entirely to an external ORCA solver; the formulas here come
//! straight from the specification.

use glam::{Vec2, Vec3};

use crate::geometry::{self, unxz, xz};

const RVO_EPS: f32 = 1e-4;
pub const MAX_CIRCLE_OBSTACLES: usize = 32;
pub const MAX_SEGMENT_OBSTACLES: usize = 32;
const MAX_PATTERN_DIVS: u32 = 32;
const MAX_PATTERN_RINGS: u32 = 4;

#[derive(Clone, Copy, Debug)]
pub struct ObstacleAvoidanceParams {
  pub vel_bias: f32,
  pub weight_des_vel: f32,
  pub weight_cur_vel: f32,
  pub weight_side: f32,
  pub weight_toi: f32,
  pub horiz_time: f32,
  pub grid_size: u32,
  pub adaptive_divs: u32,
  pub adaptive_rings: u32,
  pub adaptive_depth: u32,
}

impl Default for ObstacleAvoidanceParams {
  fn default() -> Self {
    Self {
      vel_bias: 0.4,
      weight_des_vel: 2.0,
      weight_cur_vel: 0.75,
      weight_side: 0.75,
      weight_toi: 2.5,
      horiz_time: 2.5,
      grid_size: 33,
      adaptive_divs: 7,
      adaptive_rings: 2,
      adaptive_depth: 5,
    }
  }
}

#[derive(Clone, Copy, Debug, Default)]
struct PreparedCircle {
  p: Vec2,
  vel: Vec2,
  dvel: Vec2,
  radius: f32,
  dp: Vec2,
  np: Vec2,
}

#[derive(Clone, Copy, Debug, Default)]
struct PreparedSegment {
  p: Vec2,
  q: Vec2,
  touch: bool,
}

/// A scratch buffer of nearby agents/segments and the sampling parameters
/// to score candidate velocities against them. Reset and refilled once
/// per agent per tick.
pub struct ObstacleAvoidanceQuery {
  params: ObstacleAvoidanceParams,
  raw_circles: Vec<(Vec3, f32, Vec3, Vec3)>,
  raw_segments: Vec<(Vec3, Vec3)>,
  circles: Vec<PreparedCircle>,
  segments: Vec<PreparedSegment>,
  pattern: Vec<Vec2>,
  vmax: f32,
}

impl ObstacleAvoidanceQuery {
  pub fn new(params: ObstacleAvoidanceParams) -> Self {
    Self {
      params,
      raw_circles: Vec::with_capacity(MAX_CIRCLE_OBSTACLES),
      raw_segments: Vec::with_capacity(MAX_SEGMENT_OBSTACLES),
      circles: Vec::with_capacity(MAX_CIRCLE_OBSTACLES),
      segments: Vec::with_capacity(MAX_SEGMENT_OBSTACLES),
      pattern: Vec::new(),
      vmax: 0.0,
    }
  }

  /// Clears the obstacle pools and installs `params` for the upcoming
  /// sampling call.
  pub fn reset(&mut self, params: ObstacleAvoidanceParams) {
    self.params = params;
    self.raw_circles.clear();
    self.raw_segments.clear();
  }

  pub fn add_circle(&mut self, position: Vec3, radius: f32, vel: Vec3, dvel: Vec3) {
    if self.raw_circles.len() >= MAX_CIRCLE_OBSTACLES {
      return;
    }
    self.raw_circles.push((position, radius, vel, dvel));
  }

  pub fn add_segment(&mut self, p: Vec3, q: Vec3) {
    if self.raw_segments.len() >= MAX_SEGMENT_OBSTACLES {
      return;
    }
    self.raw_segments.push((p, q));
  }

  fn prepare(&mut self, position: Vec3, dvel: Vec3) {
    let p2 = xz(position);
    let dvel2 = xz(dvel);
    self.circles.clear();
    for &(cp, radius, vel, cdvel) in &self.raw_circles {
      let diff = xz(cp) - p2;
      let len = diff.length();
      let dp = if len > RVO_EPS { diff / len } else { Vec2::new(1.0, 0.0) };
      let rel = xz(cdvel) - dvel2;
      let area = dp.perp_dot(rel);
      let np = if area < 0.01 { Vec2::new(-dp.y, dp.x) } else { Vec2::new(dp.y, -dp.x) };
      self.circles.push(PreparedCircle { p: xz(cp), vel: xz(vel), dvel: xz(cdvel), radius, dp, np });
    }

    self.segments.clear();
    for &(sp, sq) in &self.raw_segments {
      let d = geometry::dist_point_segment_sq_xz(p2, xz(sp), xz(sq));
      self.segments.push(PreparedSegment { p: xz(sp), q: xz(sq), touch: d < RVO_EPS });
    }
  }

  #[allow(clippy::too_many_arguments)]
  fn penalty(&self, v: Vec2, vel: Vec2, dvel: Vec2, p: Vec2, radius: f32, min_penalty: f32) -> f32 {
    let params = &self.params;
    let inv_vmax = if self.vmax > 0.0 { 1.0 / self.vmax } else { 0.0 };

    let vpen = params.weight_des_vel * (v - dvel).length() * inv_vmax;
    let vcpen = params.weight_cur_vel * (v - vel).length() * inv_vmax;

    let min_pen = min_penalty - vpen - vcpen;
    if min_pen > RVO_EPS {
      let t_threshold = (params.weight_toi / min_pen - 0.1) * params.horiz_time;
      if t_threshold > params.horiz_time - RVO_EPS {
        return min_penalty;
      }
    }

    let mut tmin = params.horiz_time;
    let mut side = 0.0f32;
    let mut nside = 0u32;

    for c in &self.circles {
      let vab = 2.0 * v - vel - c.vel;
      side += (0.5 * c.dp.dot(vab) + 0.5).clamp(0.0, 1.0).min((2.0 * c.np.dot(vab)).clamp(0.0, 1.0));
      nside += 1;

      let rel = c.p - p;
      let a = vab.dot(vab);
      let b = vab.dot(rel);
      let cc = rel.dot(rel) - (radius + c.radius).powi(2);
      if a.abs() < RVO_EPS {
        continue;
      }
      let disc = b * b - a * cc;
      if disc < 0.0 {
        continue;
      }
      let sq = disc.sqrt();
      let mut t0 = (b - sq) / a;
      let t1 = (b + sq) / a;
      if t0 < 0.0 && t1 > 0.0 {
        t0 = -t0 * 0.5;
      }
      if t0 >= 0.0 && t0 < tmin {
        tmin = t0;
      }
    }

    for s in &self.segments {
      let htmin = if s.touch {
        let seg_dir = s.q - s.p;
        let seg_perp = Vec2::new(-seg_dir.y, seg_dir.x);
        if seg_perp.dot(v) >= 0.0 {
          0.0
        } else {
          continue;
        }
      } else {
        match geometry::ray_segment_intersect_xz(p, v, s.p, s.q) {
          Some(t) => t,
          None => continue,
        }
      };
      let scaled = htmin * 2.0;
      if scaled < tmin {
        tmin = scaled;
      }
    }

    if nside > 0 {
      side /= nside as f32;
    }
    let spen = params.weight_side * side;
    let tpen = params.weight_toi / (0.1 + tmin / params.horiz_time);

    vpen + vcpen + spen + tpen
  }

  /// Samples a uniform square grid of candidate velocities centred on a
  /// velocity-biased point between the current and desired velocity.
  pub fn sample_velocity_grid(&mut self, position: Vec3, radius: f32, vmax: f32, vel: Vec3, dvel: Vec3) -> Vec3 {
    self.vmax = vmax;
    self.prepare(position, dvel);

    let p2 = xz(position);
    let vel2 = xz(vel);
    let dvel2 = xz(dvel);
    let bias = self.params.vel_bias;
    let center = dvel2 * bias;

    let grid_size = self.params.grid_size.max(1);
    let half = (grid_size as f32 - 1.0) * 0.5;
    let cs = if grid_size > 1 { vmax * 2.0 * (1.0 - bias) / (grid_size as f32 - 1.0) } else { 0.0 };

    let mut best_pen = f32::MAX;
    let mut best_v = center;
    for y in 0..grid_size {
      for x in 0..grid_size {
        let cand = Vec2::new(center.x + (x as f32 - half) * cs, center.y + (y as f32 - half) * cs);
        if cand.length_squared() > (vmax + cs * 0.5).powi(2) {
          continue;
        }
        let pen = self.penalty(cand, vel2, dvel2, p2, radius, best_pen);
        if pen < best_pen {
          best_pen = pen;
          best_v = cand;
        }
      }
    }
    unxz(best_v)
  }

  fn build_adaptive_pattern(&mut self, heading: Vec2) {
    self.pattern.clear();
    self.pattern.push(Vec2::ZERO);

    let ndivs = self.params.adaptive_divs.clamp(1, MAX_PATTERN_DIVS);
    let nrings = self.params.adaptive_rings.clamp(1, MAX_PATTERN_RINGS);
    let da = std::f32::consts::TAU / ndivs as f32;
    let base_angle = if heading.length_squared() > RVO_EPS { heading.y.atan2(heading.x) } else { 0.0 };

    for j in 0..nrings {
      let r = (nrings - j) as f32 / nrings as f32;
      let angle0 = if j % 2 == 0 { base_angle } else { base_angle + da * 0.5 };
      for i in 0..ndivs {
        let a = angle0 + da * i as f32;
        self.pattern.push(Vec2::new(a.cos(), a.sin()) * r);
      }
    }
  }

  /// Iteratively refines a candidate velocity by sampling a ring pattern
  /// around the current best guess, halving the sampling radius each
  /// round. Far cheaper than the grid sampler for similar quality.
  pub fn sample_velocity_adaptive(&mut self, position: Vec3, radius: f32, vmax: f32, vel: Vec3, dvel: Vec3) -> Vec3 {
    self.vmax = vmax;
    self.prepare(position, dvel);

    let p2 = xz(position);
    let vel2 = xz(vel);
    let dvel2 = xz(dvel);
    let bias = self.params.vel_bias;

    self.build_adaptive_pattern(dvel2);

    let mut res = dvel2 * bias;
    let mut best_pen = f32::MAX;
    let mut cr = vmax * (1.0 - bias);
    let depth = self.params.adaptive_depth.max(1);

    for _ in 0..depth {
      let mut improved = false;
      for &offset in &self.pattern {
        let cand = res + offset * cr;
        if cand.length_squared() > (vmax + RVO_EPS).powi(2) {
          continue;
        }
        let pen = self.penalty(cand, vel2, dvel2, p2, radius, best_pen);
        if pen < best_pen {
          best_pen = pen;
          res = cand;
          improved = true;
        }
      }
      let _ = improved;
      cr *= 0.5;
    }
    unxz(res)
  }
}

#[cfg(test)]
#[path = "avoidance_test.rs"]
mod test;
