//! Reduced hash tree recomputation.

use crate::digest::DigestAlgorithm;
use crate::evidence::types::{ArchiveTimeStamp, DigestValueGroup};

/// Root recomputed from a reduced hash tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashTreeRoot {
    /// Value of the last group
    pub root: Vec<u8>,
    /// Every intermediate node value was found in the following group
    pub path_intact: bool,
}

/// Recompute the root of a reduced hash tree.
///
/// Returns `None` for an empty tree. A node value missing from the next
/// group breaks the path; the walk still continues so the final root can be
/// compared with the message imprint.
pub fn compute_root(groups: &[DigestValueGroup], algorithm: DigestAlgorithm) -> Option<HashTreeRoot> {
    let (first, rest) = groups.split_first()?;
    let mut current = first.node_value(algorithm);
    let mut path_intact = true;
    for (level, group) in rest.iter().enumerate() {
        if !group.contains(&current) {
            log::debug!("Hash tree level {} does not contain the value computed below it", level + 1);
            path_intact = false;
        }
        current = group.node_value(algorithm);
    }
    Some(HashTreeRoot {
        root: current,
        path_intact,
    })
}

/// Digest covered by a timestamp renewal: H(previous token).
pub fn timestamp_renewal_digest(previous: &ArchiveTimeStamp, algorithm: DigestAlgorithm) -> Vec<u8> {
    algorithm.compute(&previous.timestamp_token)
}

/// Digest of the prior chains, H(ArchiveTimeStampSequence encoding).
pub fn sequence_digest(sequence_encoding: &[u8], algorithm: DigestAlgorithm) -> Vec<u8> {
    algorithm.compute(sequence_encoding)
}

/// Data object digest after a hash tree renewal, H(h(d) || ha).
pub fn hash_tree_renewal_digest(data_digest: &[u8], sequence_digest: &[u8], algorithm: DigestAlgorithm) -> Vec<u8> {
    algorithm.compute_concat([data_digest, sequence_digest])
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ALG: DigestAlgorithm = DigestAlgorithm::Sha256;

    #[test]
    fn test_empty_tree_has_no_root() {
        assert!(compute_root(&[], ALG).is_none());
    }

    #[test]
    fn test_two_level_tree() {
        let d1 = ALG.compute(b"doc1");
        let d2 = ALG.compute(b"doc2");
        let leaf = DigestValueGroup::new(vec![d1.clone(), d2.clone()]);
        let node = leaf.node_value(ALG);
        let sibling = ALG.compute(b"other branch");
        let upper = DigestValueGroup::new(vec![node, sibling]);

        let root = compute_root(&[leaf, upper.clone()], ALG).unwrap();
        assert!(root.path_intact);
        assert_eq!(root.root, upper.node_value(ALG));
    }

    #[test]
    fn test_broken_path_still_yields_root() {
        let leaf = DigestValueGroup::new(vec![ALG.compute(b"a"), ALG.compute(b"b")]);
        let upper = DigestValueGroup::new(vec![ALG.compute(b"unrelated"), ALG.compute(b"x")]);
        let root = compute_root(&[leaf, upper.clone()], ALG).unwrap();
        assert!(!root.path_intact);
        assert_eq!(root.root, upper.node_value(ALG));
    }

    #[test]
    fn test_hash_tree_renewal_digest() {
        let h = ALG.compute(b"data");
        let ha = ALG.compute(b"sequence");
        let mut concat = h.clone();
        concat.extend_from_slice(&ha);
        assert_eq!(hash_tree_renewal_digest(&h, &ha, ALG), ALG.compute(&concat));
    }

    proptest! {
        #[test]
        fn root_is_deterministic(values in prop::collection::vec(prop::collection::vec(any::<u8>(), 32), 1..6)) {
            let groups = vec![DigestValueGroup::new(values.clone())];
            let first = compute_root(&groups, ALG);
            let second = compute_root(&groups, ALG);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn root_ignores_value_order(mut values in prop::collection::vec(prop::collection::vec(any::<u8>(), 32), 2..6)) {
            let forward = compute_root(&[DigestValueGroup::new(values.clone())], ALG).map(|r| r.root);
            values.reverse();
            let reversed = compute_root(&[DigestValueGroup::new(values)], ALG).map(|r| r.root);
            prop_assert_eq!(forward, reversed);
        }
    }
}
