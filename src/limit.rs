//! Iteration budget sizing.
//!
//! A loop gets 20% more iterations than it has remaining stories, rounded up,
//! so retries and partial iterations fit without the loop running short.

/// Overhead numerator/denominator: budget = ceil(work * 6 / 5)
const OVERHEAD_NUM: u64 = 6;
const OVERHEAD_DEN: u64 = 5;

/// Compute the iteration budget for the given amount of remaining work.
///
/// `incomplete` is the number of stories not yet passing and `newly_added` the
/// number added since the count was taken. Counts are unsigned, so the
/// non-negative precondition holds by construction.
pub fn calculate_loop_limit(incomplete: u32, newly_added: u32) -> u32 {
    let work = u64::from(incomplete) + u64::from(newly_added);
    let budget = (work * OVERHEAD_NUM).div_ceil(OVERHEAD_DEN);
    u32::try_from(budget).unwrap_or(u32::MAX)
}
