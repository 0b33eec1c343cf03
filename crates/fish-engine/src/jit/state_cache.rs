//! State-seen cache: a hash set keyed by the full IP state,
//! consulted only when `condskip` is false — inside a fused skip the second
//! instruction executes conditionally and must never seed the cycle set.

use rustc_hash::FxHashSet;

use crate::codebox::IpState;

/// The set of IP states already emitted in the trace currently being built.
#[derive(Debug, Default)]
pub struct StateCache {
    seen: FxHashSet<IpState>,
}

impl StateCache {
    /// An empty cache, sized for one trace (working set bounded by codebox
    /// area × 4).
    pub fn new() -> Self {
        StateCache::default()
    }

    /// True if `state` was already recorded by an earlier visit this trace.
    pub fn contains(&self, state: IpState) -> bool {
        self.seen.contains(&state)
    }

    /// Record `state` as visited. Callers only do this after `contains`
    /// returns false — the driver never re-inserts a closing state.
    pub fn insert(&mut self, state: IpState) {
        self.seen.insert(state);
    }

    /// Number of distinct states recorded so far.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// True if nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codebox::Direction;

    #[test]
    fn first_visit_is_a_miss_second_is_a_hit() {
        let mut cache = StateCache::new();
        let s = IpState::new(0, 0, Direction::Right);
        assert!(!cache.contains(s));
        cache.insert(s);
        assert!(cache.contains(s));
    }

    #[test]
    fn direction_is_part_of_the_key() {
        let mut cache = StateCache::new();
        cache.insert(IpState::new(1, 1, Direction::Up));
        assert!(!cache.contains(IpState::new(1, 1, Direction::Down)));
    }
}
