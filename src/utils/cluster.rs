use crate::Index;

/// Members needed for a strict majority of `total`.
pub fn majority_count(total: usize) -> usize {
    (total / 2) + 1
}

pub fn is_majority(
    num: usize,
    total: usize,
) -> bool {
    num >= majority_count(total)
}

/// Highest index held by at least a majority.
///
/// `matched` holds one acknowledged index per member, this node included.
pub fn quorum_index(mut matched: Vec<Index>) -> Option<Index> {
    if matched.is_empty() {
        return None;
    }
    matched.sort_unstable_by(|a, b| b.cmp(a));
    matched.get(majority_count(matched.len()) - 1).copied()
}
