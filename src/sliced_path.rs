//! The sliced (time-budgeted, resumable) pathfinding collaborator.
//!
//! Like [`crate::query`], this is a fixed external API this crate
//! consumes rather than implements: the host's A* runs over many ticks in
//! bounded iteration slices so no single tick pays for an unbounded
//! search. `crate::crowd` owns the iteration budget and drives each
//! agent's session forward; this module only describes the session's
//! shape.

use glam::Vec3;

use crate::query::{PolyRef, QueryFilter};

bitflags::bitflags! {
  /// Status bits returned by a sliced query step. `SUCCESS` and
  /// `PARTIAL_RESULT` may be set together: the search terminated but
  /// could not connect all the way to the goal.
  #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
  pub struct QueryStatus: u8 {
    const IN_PROGRESS = 1 << 0;
    const SUCCESS = 1 << 1;
    const FAILURE = 1 << 2;
    const PARTIAL_RESULT = 1 << 3;
  }
}

#[derive(Clone, Debug)]
pub struct SlicedPathResult {
  pub path: Vec<PolyRef>,
  pub is_partial: bool,
}

/// One resumable pathfinding session, from `init` through repeated
/// `update` slices to a terminal `finalize`/`finalize_partial`.
pub trait SlicedPathQuery {
  fn init(
    &mut self,
    start: PolyRef,
    start_pos: Vec3,
    end: PolyRef,
    end_pos: Vec3,
    filter: &dyn QueryFilter,
  ) -> QueryStatus;

  /// Runs up to `max_iterations` search steps. Returns the status after
  /// this slice and the number of iterations actually consumed (which may
  /// be less than `max_iterations` if the search finished early).
  fn update(&mut self, max_iterations: u32) -> (QueryStatus, u32);

  fn status(&self) -> QueryStatus;

  /// Consumes a `SUCCESS` session, producing the polygon path found.
  fn finalize(&mut self) -> Option<SlicedPathResult>;

  /// Consumes a `SUCCESS` session that was searching on behalf of an
  /// agent that has since drifted off its old path, splicing the result
  /// onto `existing_path` instead of the original start.
  fn finalize_partial(&mut self, existing_path: &[PolyRef]) -> Option<SlicedPathResult>;
}

#[cfg(test)]
#[path = "sliced_path_test.rs"]
mod test;
