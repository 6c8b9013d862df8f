//! Heap-ordered binary tree: node `i` has parent `(i - 1) / 2` and
//! children `2i + 1` and `2i + 2` where those exist.

/// Parent of `node`, or `None` for the root.
pub fn parent_of(node: u64) -> Option<u64> {
    if node == 0 { None } else { Some((node - 1) / 2) }
}

/// Children of `node` in a tree of `total` nodes, left child first.
pub fn children_of(node: u64, total: u64) -> impl Iterator<Item = u64> {
    [2 * node + 1, 2 * node + 2]
        .into_iter()
        .filter(move |&c| c < total)
}

/// How many children `node` has in a tree of `total` nodes.
pub fn child_count(node: u64, total: u64) -> u16 {
    children_of(node, total).count() as u16
}

/// Depth of the tree in edges, from the root to the deepest leaf.
pub fn depth(total: u64) -> u32 {
    if total <= 1 {
        0
    } else {
        u64::BITS - 1 - total.leading_zeros()
    }
}
