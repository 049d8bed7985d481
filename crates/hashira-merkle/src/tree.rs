//! capped k-ary accumulator over chained hashes
//!
//! Level 0 holds one entry per appended leaf: the running combination of
//! everything appended so far. Whenever an entry completes its k-group, the
//! group's last entry is promoted one level up, so each entry at level j
//! covers k^j consecutive leaves. Every ring is capped, which bounds both
//! memory and how far the history can be truncated.

use crate::stack::CircularStack;
use crate::{MerkleError, Result};

/// Append-only Merkle accumulator with bounded rollback.
///
/// `combine` derives the chained entry for a new leaf from the current root.
/// It is expected to behave like a two-input hash: associative over the
/// grouping used here, with the default value of `T` acting as the empty
/// root.
pub struct NarrowMerkleTree<T, F>
where
    T: Clone + Default,
    F: Fn(&T, &T) -> T,
{
    levels: Vec<CircularStack<T>>,
    capacity: usize,
    /// Leaves appended since the last reset.
    leaves: u64,
    combine: F,
    /// Forward-only cursor: `drop` arguments below this are rejected.
    drop_floor: u64,
}

impl<T, F> NarrowMerkleTree<T, F>
where
    T: Clone + Default,
    F: Fn(&T, &T) -> T,
{
    /// Creates an empty tree with the given per-level ring capacity, which
    /// is also the promotion fan-out.
    pub fn new(combine: F, capacity: usize) -> Result<Self> {
        let base = CircularStack::new(capacity)?;
        Ok(NarrowMerkleTree {
            levels: vec![base],
            capacity,
            leaves: 0,
            combine,
            drop_floor: 0,
        })
    }

    /// Appends a leaf: chains it onto the current root and settles ring
    /// promotions. O(log_k n).
    pub fn add(&mut self, leaf: T) {
        let chained = (self.combine)(&self.root(), &leaf);
        self.push_base(chained);
    }

    /// Re-inserts an already-chained base-level entry recovered from a
    /// checkpoint. Entries must arrive in ascending contiguous order; the
    /// first entry may start past zero when the checkpoint begins
    /// mid-history.
    pub fn restore_leaf(&mut self, index: u64, value: T) -> Result<()> {
        if index != self.leaves {
            let untouched =
                self.leaves == 0 && self.levels.len() == 1 && self.levels[0].is_empty();
            if untouched && index > 0 {
                self.leaves = index;
            } else {
                return Err(MerkleError::NonContiguousRestore {
                    expected: self.leaves,
                    got: index,
                });
            }
        }
        self.push_base(value);
        Ok(())
    }

    /// Truncates the history to at most `n` leaves and returns the size
    /// actually reached, which may be lower once the rings have discarded
    /// the entries needed for an exact cut. `drop(0)` resets the tree.
    /// Arguments at or below an earlier drop's result are rejected.
    pub fn drop(&mut self, n: u64) -> Result<u64> {
        if n == 0 {
            self.levels.clear();
            self.levels.push(self.ring());
            self.leaves = 0;
            self.drop_floor = 0;
            return Ok(0);
        }
        if n >= self.leaves {
            return Ok(self.leaves);
        }
        if self.drop_floor >= n {
            return Err(MerkleError::DropRegression {
                floor: self.drop_floor,
                requested: n,
            });
        }

        let k = self.capacity as u64;
        let mut id_tx = self.leaves;
        let mut cap = 1u64;
        let mut settled = false;
        self.leaves = n;
        for level in &mut self.levels {
            let group = cap.saturating_mul(k);
            let present = (id_tx % group) / cap;
            let remove = std::cmp::min(
                level.len() as u64,
                (id_tx.saturating_sub(n) + cap - 1) / cap,
            );
            level.pop(remove as usize);
            if !settled && !level.is_empty() {
                // the lowest surviving level decides the reachable size
                self.leaves = id_tx.saturating_sub(remove * cap);
                settled = true;
            }
            id_tx -= present * cap;
            cap = group;
        }
        if !settled {
            // every ring outran the cut: nothing below n survives
            self.leaves = 0;
        }
        self.drop_floor = self.leaves;
        Ok(self.leaves)
    }

    /// The accumulated root: the newest entry of the lowest non-empty
    /// level, or the default value for an empty tree.
    pub fn root(&self) -> T {
        for level in &self.levels {
            if let Some(back) = level.back() {
                return back.clone();
            }
        }
        T::default()
    }

    /// Leaves appended since the last reset.
    pub fn size(&self) -> u64 {
        self.leaves
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The level rings, lowest first.
    pub fn levels(&self) -> &[CircularStack<T>] {
        &self.levels
    }

    /// Start index and entries of the surviving base level, for
    /// checkpointing.
    pub fn base_level(&self) -> (u64, impl Iterator<Item = &T>) {
        let len = self.levels[0].len() as u64;
        (self.leaves - len, self.levels[0].iter())
    }

    /// Upper bound on how many recent leaves `drop` can currently reach
    /// back over.
    pub fn max_rollback(&self) -> u64 {
        let k = self.capacity as u64;
        let mut cap = 1u64;
        let mut total = 0u64;
        for level in &self.levels {
            total = total.saturating_add((level.len() as u64).saturating_mul(cap));
            cap = cap.saturating_mul(k);
        }
        total.min(self.leaves)
    }

    fn push_base(&mut self, value: T) {
        self.leaves += 1;
        self.levels[0].push(value);
        if self.leaves != 1
            && self.height(self.leaves) > self.height(self.leaves - 1)
            && self.height(self.leaves) > self.levels.len() as u64
        {
            let ring = self.ring();
            self.levels.push(ring);
        }
        let k = self.capacity as u64;
        let mut layer_idx = self.leaves - 1;
        for level in 0..self.levels.len().saturating_sub(1) {
            // promote only when the entry completes its k-group
            if layer_idx % k == k - 1 {
                if let Some(promoted) = self.levels[level].back().cloned() {
                    self.levels[level + 1].push(promoted);
                }
                layer_idx /= k;
            } else {
                break;
            }
        }
    }

    /// Levels needed to represent `n` leaves.
    fn height(&self, n: u64) -> u64 {
        if self.capacity == 1 {
            return n;
        }
        let k = self.capacity as u64;
        let mut levels = 0u64;
        let mut cap = 1u64;
        while n >= cap {
            levels += 1;
            match cap.checked_mul(k) {
                Some(next) => cap = next,
                None => break,
            }
        }
        levels
    }

    fn ring(&self) -> CircularStack<T> {
        CircularStack::new(self.capacity).expect("capacity validated at construction")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(a: &u64, b: &u64) -> u64 {
        a.wrapping_mul(0x100000001b3) ^ b
    }

    fn tree(capacity: usize) -> NarrowMerkleTree<u64, fn(&u64, &u64) -> u64> {
        NarrowMerkleTree::new(chain as fn(&u64, &u64) -> u64, capacity).unwrap()
    }

    #[test]
    fn empty_tree_has_default_root() {
        let t = tree(4);
        assert_eq!(t.root(), 0);
        assert_eq!(t.size(), 0);
        assert_eq!(t.max_rollback(), 0);
    }

    #[test]
    fn root_is_chained_fold() {
        let mut t = tree(2);
        let mut expected = 0u64;
        for leaf in 1..=100u64 {
            t.add(leaf);
            expected = chain(&expected, &leaf);
            assert_eq!(t.root(), expected);
            assert_eq!(t.size(), leaf);
        }
    }

    #[test]
    fn levels_grow_and_promote() {
        let mut t = tree(2);
        for leaf in 1..=8u64 {
            t.add(leaf);
        }
        let sizes: Vec<usize> = t.levels().iter().map(|l| l.len()).collect();
        // ring capacity 2 at every level; promotions at 2, 4, 6, 8
        assert_eq!(sizes, vec![2, 2, 2, 1]);
    }

    #[test]
    fn drop_above_size_is_identity() {
        let mut t = tree(4);
        for leaf in 1..=10u64 {
            t.add(leaf);
        }
        let root = t.root();
        assert_eq!(t.drop(10).unwrap(), 10);
        assert_eq!(t.drop(1000).unwrap(), 10);
        assert_eq!(t.root(), root);
    }

    #[test]
    fn drop_truncates_to_recorded_root() {
        let mut t = tree(8);
        let mut roots = vec![0u64];
        for leaf in 1..=6u64 {
            t.add(leaf);
            roots.push(t.root());
        }
        let reached = t.drop(4).unwrap();
        assert_eq!(reached, 4);
        assert_eq!(t.root(), roots[4]);
        assert_eq!(t.size(), 4);

        // appending after the cut continues the chain from the cut root
        t.add(99);
        assert_eq!(t.root(), chain(&roots[4], &99));
        assert_eq!(t.size(), 5);
    }

    #[test]
    fn drop_rejects_regression() {
        let mut t = tree(4);
        for leaf in 1..=10u64 {
            t.add(leaf);
        }
        let reached = t.drop(8).unwrap();
        assert_eq!(reached, 8);
        assert_eq!(
            t.drop(5),
            Err(MerkleError::DropRegression {
                floor: 8,
                requested: 5
            })
        );
        // zero is the explicit full reset and always allowed
        assert_eq!(t.drop(0).unwrap(), 0);
        assert_eq!(t.root(), 0);
    }

    #[test]
    fn drop_reports_reachable_size_when_ring_outran() {
        let mut t = tree(2);
        for leaf in 1..=32u64 {
            t.add(leaf);
        }
        // level 0 only holds the last 2 entries; a cut far back lands on
        // whatever group boundary survives
        let reached = t.drop(17).unwrap();
        assert!(reached <= 17);
        assert_eq!(t.size(), reached);
    }

    #[test]
    fn restore_replays_checkpointed_base() {
        let mut t = tree(8);
        let mut roots = vec![0u64];
        for leaf in 1..=5u64 {
            t.add(leaf);
            roots.push(t.root());
        }
        let (start, entries) = t.base_level();
        assert_eq!(start, 0);
        let entries: Vec<u64> = entries.copied().collect();

        let mut rebuilt = tree(8);
        for (offset, entry) in entries.iter().enumerate() {
            rebuilt
                .restore_leaf(start + offset as u64, *entry)
                .unwrap();
        }
        assert_eq!(rebuilt.root(), t.root());
        assert_eq!(rebuilt.size(), t.size());

        rebuilt.add(6);
        t.add(6);
        assert_eq!(rebuilt.root(), t.root());
    }

    #[test]
    fn restore_resumes_mid_history() {
        let mut t = tree(2);
        for leaf in 1..=40u64 {
            t.add(leaf);
        }
        let (start, entries) = t.base_level();
        assert!(start > 0);
        let entries: Vec<u64> = entries.copied().collect();

        let mut rebuilt = tree(2);
        for (offset, entry) in entries.iter().enumerate() {
            rebuilt
                .restore_leaf(start + offset as u64, *entry)
                .unwrap();
        }
        assert_eq!(rebuilt.size(), 40);
        assert_eq!(rebuilt.root(), t.root());

        // out-of-order restores are refused
        let mut bad = tree(2);
        bad.restore_leaf(3, 7).unwrap();
        assert_eq!(
            bad.restore_leaf(9, 8),
            Err(MerkleError::NonContiguousRestore {
                expected: 4,
                got: 9
            })
        );
    }

    #[test]
    fn sha3_instantiation_matches_manual_chain() {
        use sha3::{Digest, Sha3_256};

        type Hash32 = [u8; 32];
        fn combine(a: &Hash32, b: &Hash32) -> Hash32 {
            let mut hasher = Sha3_256::new();
            hasher.update(a);
            hasher.update(b);
            hasher.finalize().into()
        }

        let mut t: NarrowMerkleTree<Hash32, _> = NarrowMerkleTree::new(combine, 1024).unwrap();
        let leaf_a = [1u8; 32];
        let leaf_b = [2u8; 32];
        t.add(leaf_a);
        t.add(leaf_b);

        let first = combine(&[0u8; 32], &leaf_a);
        let second = combine(&first, &leaf_b);
        assert_eq!(t.root(), second);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// The root after every add equals the plain left fold of the
            /// combinator over the leaf sequence.
            #[test]
            fn add_matches_fold(
                leaves in prop::collection::vec(any::<u64>(), 0..200),
                capacity in 1usize..9,
            ) {
                let mut t = NarrowMerkleTree::new(chain, capacity).unwrap();
                let mut folded = 0u64;
                for leaf in &leaves {
                    t.add(*leaf);
                    folded = chain(&folded, leaf);
                    prop_assert_eq!(t.root(), folded);
                }
            }

            /// Dropping reaches some size `n' <= n`, lands on a root the
            /// history actually had, and chaining continues from it.
            #[test]
            fn drop_lands_on_historic_root(
                leaves in prop::collection::vec(any::<u64>(), 1..200),
                capacity in 1usize..9,
                cut_ratio in 0.0f64..1.0,
            ) {
                let mut t = NarrowMerkleTree::new(chain, capacity).unwrap();
                let mut roots = vec![0u64];
                for leaf in &leaves {
                    t.add(*leaf);
                    roots.push(t.root());
                }
                let n = ((leaves.len() as f64) * cut_ratio) as u64;
                if n == 0 {
                    return Ok(());
                }
                let reached = t.drop(n).unwrap();
                prop_assert!(reached <= n);
                prop_assert_eq!(t.size(), reached);
                prop_assert_eq!(t.root(), roots[reached as usize]);

                t.add(42);
                prop_assert_eq!(t.root(), chain(&roots[reached as usize], &42));
            }

            /// A checkpoint of the base level rebuilds the same tree.
            #[test]
            fn restore_roundtrip(
                leaves in prop::collection::vec(any::<u64>(), 1..200),
                capacity in 2usize..9,
            ) {
                let mut t = NarrowMerkleTree::new(chain, capacity).unwrap();
                for leaf in &leaves {
                    t.add(*leaf);
                }
                let (start, entries) = t.base_level();
                let entries: Vec<u64> = entries.copied().collect();
                let mut rebuilt = NarrowMerkleTree::new(chain, capacity).unwrap();
                for (offset, entry) in entries.iter().enumerate() {
                    rebuilt.restore_leaf(start + offset as u64, *entry).unwrap();
                }
                prop_assert_eq!(rebuilt.size(), t.size());
                prop_assert_eq!(rebuilt.root(), t.root());
            }
        }
    }
}
