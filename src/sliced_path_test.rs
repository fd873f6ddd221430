use super::*;

#[test]
fn success_and_partial_result_compose() {
  let status = QueryStatus::SUCCESS | QueryStatus::PARTIAL_RESULT;
  assert!(status.contains(QueryStatus::SUCCESS));
  assert!(status.contains(QueryStatus::PARTIAL_RESULT));
  assert!(!status.contains(QueryStatus::FAILURE));
}
