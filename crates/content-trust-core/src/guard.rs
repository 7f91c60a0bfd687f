//! Decides whether a publish would change anything.

use crate::continuity::ContinuityDecision;
use crate::metadata::TargetMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishPlan {
    /// Published state already matches; no mutation, no version bump.
    Skip,
    Publish,
}

/// Skips only when every key is reused and the targets are unchanged.
/// Without a published targets document there is nothing to compare against.
pub fn plan(
    decision: &ContinuityDecision,
    assembled: &TargetMap,
    prior: Option<&TargetMap>,
) -> PublishPlan {
    match (decision, prior) {
        (ContinuityDecision::Reuse, Some(prior)) if prior == assembled => PublishPlan::Skip,
        _ => PublishPlan::Publish,
    }
}
