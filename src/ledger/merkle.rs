//! Merkle aggregation of transaction hashes.
//!
//! Levels are built by hashing adjacent pairs (`H(left || right)` over the
//! raw 32-byte digests). An odd level duplicates its last hash before
//! pairing. That rule is kept for compatibility with existing chains, but it
//! means `[a, b, c]` and `[a, b, c, c]` share a root: a root alone does not
//! pin down the leaf count, so callers that need that must compare the
//! block's transaction count as well.

use crate::core::crypto::{sha3_256, sha3_256_multi};
use crate::core::Hash256;
use crate::ledger::transaction::TransactionRecord;
use serde::{Deserialize, Serialize};

/// Which side of the running hash a sibling sits on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Sibling is hashed before the running value
    Left,
    /// Sibling is hashed after the running value
    Right,
}

/// One step of an inclusion proof.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    /// Sibling hash at this level
    pub sibling: Hash256,
    /// Position of the sibling
    pub side: Side,
}

/// Inclusion proof, ordered leaf to root.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Leaf position in the input list
    pub leaf_index: usize,
    /// Sibling path
    pub steps: Vec<ProofStep>,
}

/// Root of the empty tree.
pub fn empty_root() -> Hash256 {
    sha3_256(b"")
}

fn hash_pair(left: &Hash256, right: &Hash256) -> Hash256 {
    sha3_256_multi(&[&left.as_bytes()[..], &right.as_bytes()[..]])
}

/// Fully materialized tree, kept around when proofs are needed.
#[derive(Clone, Debug)]
pub struct MerkleTree {
    leaf_count: usize,
    /// Levels bottom-up; odd levels already carry their duplicated tail
    levels: Vec<Vec<Hash256>>,
}

impl MerkleTree {
    /// Build the tree over an ordered list of leaf hashes.
    pub fn build(leaves: &[Hash256]) -> Self {
        let mut levels = Vec::new();
        let mut current = leaves.to_vec();

        while current.len() > 1 {
            if current.len() % 2 != 0 {
                let last = current[current.len() - 1];
                current.push(last);
            }
            let next: Vec<Hash256> = current
                .chunks(2)
                .map(|pair| hash_pair(&pair[0], &pair[1]))
                .collect();
            levels.push(current);
            current = next;
        }
        levels.push(current);

        Self {
            leaf_count: leaves.len(),
            levels,
        }
    }

    /// Build over the content hashes of `transactions`.
    pub fn from_transactions(transactions: &[TransactionRecord]) -> Self {
        let leaves: Vec<Hash256> = transactions.iter().map(|tx| tx.content_hash()).collect();
        Self::build(&leaves)
    }

    /// Number of leaves the tree was built from.
    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    /// Root hash.
    pub fn root(&self) -> Hash256 {
        self.levels
            .last()
            .and_then(|level| level.first())
            .copied()
            .unwrap_or_else(empty_root)
    }

    /// Sibling path for the leaf at `index`.
    pub fn proof(&self, index: usize) -> Option<MerkleProof> {
        if index >= self.leaf_count {
            return None;
        }

        let mut steps = Vec::with_capacity(self.levels.len().saturating_sub(1));
        let mut position = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let (sibling_pos, side) = if position % 2 == 0 {
                (position + 1, Side::Right)
            } else {
                (position - 1, Side::Left)
            };
            steps.push(ProofStep {
                sibling: level[sibling_pos],
                side,
            });
            position /= 2;
        }

        Some(MerkleProof {
            leaf_index: index,
            steps,
        })
    }
}

/// Aggregate an ordered list of hashes into one root.
pub fn compute_root(hashes: &[Hash256]) -> Hash256 {
    if hashes.is_empty() {
        return empty_root();
    }
    let mut level = hashes.to_vec();
    while level.len() > 1 {
        if level.len() % 2 != 0 {
            let last = level[level.len() - 1];
            level.push(last);
        }
        level = level
            .chunks(2)
            .map(|pair| hash_pair(&pair[0], &pair[1]))
            .collect();
    }
    level[0]
}

/// Merkle root over the content hashes of `transactions`.
pub fn transactions_root(transactions: &[TransactionRecord]) -> Hash256 {
    let hashes: Vec<Hash256> = transactions.iter().map(|tx| tx.content_hash()).collect();
    compute_root(&hashes)
}

/// Sibling path for `index` within `hashes`.
pub fn build_proof(hashes: &[Hash256], index: usize) -> Option<MerkleProof> {
    MerkleTree::build(hashes).proof(index)
}

/// Replay `proof` from `leaf` and compare against `root`.
pub fn verify_inclusion(leaf: &Hash256, root: &Hash256, proof: &MerkleProof) -> bool {
    let mut current = *leaf;
    for step in &proof.steps {
        current = match step.side {
            Side::Left => hash_pair(&step.sibling, &current),
            Side::Right => hash_pair(&current, &step.sibling),
        };
    }
    &current == root
}

/// Inclusion check starting from a transaction's content hash.
pub fn verify_transaction(tx: &TransactionRecord, root: &Hash256, proof: &MerkleProof) -> bool {
    verify_inclusion(&tx.content_hash(), root, proof)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::transaction::Payload;
    use serde_json::json;

    fn leaves(n: usize) -> Vec<Hash256> {
        (0..n)
            .map(|i| sha3_256(format!("leaf-{}", i).as_bytes()))
            .collect()
    }

    #[test]
    fn test_empty_root() {
        assert_eq!(compute_root(&[]), sha3_256(b""));
        assert_eq!(MerkleTree::build(&[]).root(), sha3_256(b""));
    }

    #[test]
    fn test_single_leaf_is_root() {
        let l = leaves(1);
        assert_eq!(compute_root(&l), l[0]);
    }

    #[test]
    fn test_two_leaves() {
        let l = leaves(2);
        let expected = sha3_256_multi(&[&l[0].as_bytes()[..], &l[1].as_bytes()[..]]);
        assert_eq!(compute_root(&l), expected);
    }

    #[test]
    fn test_tree_matches_compute_root() {
        for n in 0..12 {
            let l = leaves(n);
            assert_eq!(MerkleTree::build(&l).root(), compute_root(&l), "n = {}", n);
        }
    }

    #[test]
    fn test_root_deterministic_and_sensitive() {
        let l = leaves(5);
        assert_eq!(compute_root(&l), compute_root(&l.clone()));

        let mut changed = l.clone();
        changed[3] = sha3_256(b"tampered");
        assert_ne!(compute_root(&l), compute_root(&changed));

        let mut swapped = l.clone();
        swapped.swap(0, 1);
        assert_ne!(compute_root(&l), compute_root(&swapped));
    }

    #[test]
    fn test_odd_duplication_shares_root() {
        let l = leaves(3);
        let mut padded = l.clone();
        padded.push(l[2]);
        assert_eq!(compute_root(&l), compute_root(&padded));
    }

    #[test]
    fn test_inclusion_proofs_for_various_sizes() {
        for n in [0usize, 1, 2, 3, 5, 8] {
            let l = leaves(n);
            let tree = MerkleTree::build(&l);
            let root = tree.root();

            if n == 0 {
                assert!(tree.proof(0).is_none());
                assert!(!verify_inclusion(&sha3_256(b"absent"), &root, &MerkleProof::default()));
                continue;
            }

            for (i, leaf) in l.iter().enumerate() {
                let proof = tree.proof(i).unwrap();
                assert!(verify_inclusion(leaf, &root, &proof), "n = {}, i = {}", n, i);

                // Wrong leaf
                assert!(!verify_inclusion(&sha3_256(b"other"), &root, &proof));

                // Tampered sibling
                if let Some(first) = proof.steps.first() {
                    let mut tampered = proof.clone();
                    tampered.steps[0] = ProofStep {
                        sibling: sha3_256(b"forged"),
                        side: first.side,
                    };
                    assert!(!verify_inclusion(leaf, &root, &tampered));

                    let mut flipped = proof.clone();
                    flipped.steps[0].side = match first.side {
                        Side::Left => Side::Right,
                        Side::Right => Side::Left,
                    };
                    if first.sibling != *leaf {
                        assert!(!verify_inclusion(leaf, &root, &flipped));
                    }
                }
            }
            assert!(tree.proof(n).is_none());
        }
    }

    #[test]
    fn test_proof_depth() {
        let tree = MerkleTree::build(&leaves(8));
        assert_eq!(tree.proof(5).unwrap().steps.len(), 3);
        assert_eq!(MerkleTree::build(&leaves(1)).proof(0).unwrap().steps.len(), 0);
    }

    #[test]
    fn test_transactions_root_independent_of_payload_order() {
        let tx = TransactionRecord::create(
            "data_update",
            Some("P1"),
            Payload::from([
                ("city".to_string(), json!("Mumbai")),
                ("state".to_string(), json!("MH")),
            ]),
            "agentA",
        )
        .unwrap();

        let mut rebuilt = tx.clone();
        rebuilt.payload = Payload::new();
        rebuilt.payload.insert("state".into(), json!("MH"));
        rebuilt.payload.insert("city".into(), json!("Mumbai"));

        assert_eq!(transactions_root(&[tx.clone()]), transactions_root(&[rebuilt]));

        let tree = MerkleTree::from_transactions(&[tx.clone()]);
        let proof = tree.proof(0).unwrap();
        assert!(verify_transaction(&tx, &tree.root(), &proof));
    }
}
