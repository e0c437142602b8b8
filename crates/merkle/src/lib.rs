//! # Merkle Tree
//!
//! The integrity tree stored in the merkle section of every SSTable. Leaves
//! are hashes of the serialized record byte strings; every parent hashes the
//! concatenation of its two children. Rebuilding the tree from the data block
//! and comparing roots detects any change to any record.
//!
//! Hashes are blake3 with a one-byte domain tag so a leaf can never collide
//! with an interior node. An unpaired node at the end of a level is paired
//! with itself.
//!
//! ## Wire format (big-endian)
//!
//! ```text
//! [level_count: u32] then per level, leaves first:
//! [node_count: u64][hash: 32 bytes * node_count]
//! ```
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

pub type Hash = [u8; 32];

const LEAF_TAG: u8 = 0x00;
const NODE_TAG: u8 = 0x01;

/// Upper bound on nodes accepted while deserializing.
const MAX_NODES: u64 = 1 << 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    /// `levels[0]` holds the leaves, the last level holds the root.
    levels: Vec<Vec<Hash>>,
}

impl MerkleTree {
    /// Builds a tree over the given leaf payloads, in order.
    pub fn build<I, T>(leaves: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        let mut builder = MerkleBuilder::new();
        for leaf in leaves {
            builder.push(leaf.as_ref());
        }
        builder.finish()
    }

    /// Root hash. The tree over zero leaves has the hash of an empty leaf as root.
    #[must_use]
    pub fn root(&self) -> Hash {
        self.levels
            .last()
            .and_then(|level| level.first())
            .copied()
            .unwrap_or_else(|| leaf_hash(&[]))
    }

    #[must_use]
    pub fn leaf_count(&self) -> usize {
        self.levels.first().map_or(0, Vec::len)
    }

    /// Returns `true` if `leaves` produce exactly this tree.
    pub fn validate<I, T>(&self, leaves: I) -> bool
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        Self::build(leaves).root() == self.root()
    }

    /// Indices of leaves that differ between two trees. Descends only into
    /// subtrees whose hashes disagree. Trees of different shapes report every
    /// leaf index of the larger tree.
    #[must_use]
    pub fn mismatched_leaves(&self, other: &MerkleTree) -> Vec<usize> {
        if self.leaf_count() != other.leaf_count() {
            return (0..self.leaf_count().max(other.leaf_count())).collect();
        }
        if self.levels.is_empty() || self.root() == other.root() {
            return Vec::new();
        }

        let mut suspects = vec![0usize];
        for depth in (0..self.levels.len() - 1).rev() {
            let level = &self.levels[depth];
            let theirs = &other.levels[depth];
            let mut next = Vec::new();
            for parent in suspects {
                for child in [parent * 2, parent * 2 + 1] {
                    if child < level.len() && level[child] != theirs[child] {
                        next.push(child);
                    }
                }
            }
            suspects = next;
        }
        suspects
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<BigEndian>(self.levels.len() as u32)?;
        for level in &self.levels {
            w.write_u64::<BigEndian>(level.len() as u64)?;
            for hash in level {
                w.write_all(hash)?;
            }
        }
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let level_count = r.read_u32::<BigEndian>()?;
        if level_count > 64 {
            return Err(invalid(format!("merkle tree too deep: {}", level_count)));
        }
        let mut levels = Vec::new();
        for _ in 0..level_count {
            let count = r.read_u64::<BigEndian>()?;
            if count > MAX_NODES {
                return Err(invalid(format!("merkle level too wide: {}", count)));
            }
            let mut level = Vec::new();
            for _ in 0..count {
                let mut hash = [0u8; 32];
                r.read_exact(&mut hash)?;
                level.push(hash);
            }
            levels.push(level);
        }

        let tree = Self { levels };
        if !tree.is_well_formed() {
            return Err(invalid("merkle level sizes do not form a tree".to_string()));
        }
        Ok(tree)
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let _ = self.write_to(&mut buf);
        buf
    }

    pub fn from_bytes(mut bytes: &[u8]) -> io::Result<Self> {
        Self::read_from(&mut bytes)
    }

    fn is_well_formed(&self) -> bool {
        if self.levels.is_empty() {
            return true;
        }
        let mut expected = self.levels[0].len();
        for level in &self.levels[1..] {
            expected = expected.div_ceil(2);
            if level.len() != expected {
                return false;
            }
        }
        self.levels.last().map_or(false, |root| root.len() == 1)
    }
}

/// Incremental builder: push leaves as they are written, then `finish`.
#[derive(Debug, Default)]
pub struct MerkleBuilder {
    leaves: Vec<Hash>,
}

impl MerkleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, payload: &[u8]) {
        self.leaves.push(leaf_hash(payload));
    }

    pub fn finish(self) -> MerkleTree {
        if self.leaves.is_empty() {
            return MerkleTree { levels: Vec::new() };
        }
        let mut levels = vec![self.leaves];
        while levels.last().map_or(false, |l| l.len() > 1) {
            let below = &levels[levels.len() - 1];
            let above: Vec<Hash> = below
                .chunks(2)
                .map(|pair| node_hash(&pair[0], pair.get(1).unwrap_or(&pair[0])))
                .collect();
            levels.push(above);
        }
        MerkleTree { levels }
    }
}

fn leaf_hash(payload: &[u8]) -> Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[LEAF_TAG]);
    hasher.update(payload);
    *hasher.finalize().as_bytes()
}

fn node_hash(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[NODE_TAG]);
    hasher.update(left);
    hasher.update(right);
    *hasher.finalize().as_bytes()
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payloads(n: usize) -> Vec<Vec<u8>> {
        (0..n).map(|i| format!("record-{}", i).into_bytes()).collect()
    }

    #[test]
    fn same_leaves_same_root() {
        let a = MerkleTree::build(payloads(7));
        let b = MerkleTree::build(payloads(7));
        assert_eq!(a.root(), b.root());
        assert_eq!(a.leaf_count(), 7);
    }

    #[test]
    fn validate_detects_any_changed_leaf() {
        let leaves = payloads(9);
        let tree = MerkleTree::build(&leaves);
        assert!(tree.validate(&leaves));

        for i in 0..leaves.len() {
            let mut changed = leaves.clone();
            changed[i].push(b'!');
            assert!(!tree.validate(&changed), "change at leaf {} not detected", i);
        }
    }

    #[test]
    fn validate_detects_reordering_and_truncation() {
        let leaves = payloads(4);
        let tree = MerkleTree::build(&leaves);

        let mut swapped = leaves.clone();
        swapped.swap(0, 1);
        assert!(!tree.validate(&swapped));
        assert!(!tree.validate(&leaves[..3]));
    }

    #[test]
    fn mismatched_leaves_pinpoints_changes() {
        let leaves = payloads(10);
        let mut changed = leaves.clone();
        changed[3] = b"tampered".to_vec();
        changed[8] = b"also tampered".to_vec();

        let a = MerkleTree::build(&leaves);
        let b = MerkleTree::build(&changed);
        assert_eq!(a.mismatched_leaves(&b), vec![3, 8]);
        assert!(a.mismatched_leaves(&a).is_empty());
    }

    #[test]
    fn single_leaf_tree() {
        let tree = MerkleTree::build([b"only".as_slice()]);
        assert_eq!(tree.leaf_count(), 1);
        assert_eq!(tree.root(), leaf_hash(b"only"));
    }

    #[test]
    fn empty_tree_has_stable_root() {
        let tree = MerkleTree::build(Vec::<Vec<u8>>::new());
        assert_eq!(tree.leaf_count(), 0);
        assert_eq!(tree.root(), MerkleTree::build(Vec::<Vec<u8>>::new()).root());
    }

    #[test]
    fn bytes_roundtrip() {
        let tree = MerkleTree::build(payloads(13));
        let restored = MerkleTree::from_bytes(&tree.to_bytes()).unwrap();
        assert_eq!(restored, tree);
    }

    #[test]
    fn malformed_shape_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&2u32.to_be_bytes());
        buf.extend_from_slice(&3u64.to_be_bytes());
        buf.extend_from_slice(&[0u8; 96]);
        buf.extend_from_slice(&1u64.to_be_bytes()); // should be 2
        buf.extend_from_slice(&[0u8; 32]);
        assert!(MerkleTree::from_bytes(&buf).is_err());
    }

    #[test]
    fn oversized_node_count_fails_without_allocating() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&1u32.to_be_bytes());
        buf.extend_from_slice(&MAX_NODES.to_be_bytes());
        buf.extend_from_slice(&[0u8; 64]);
        assert!(MerkleTree::from_bytes(&buf).is_err());

        let tree = MerkleTree::build(payloads(5));
        let mut bytes = tree.to_bytes();
        bytes[4..12].copy_from_slice(&(u64::from(u32::MAX)).to_be_bytes());
        assert!(MerkleTree::from_bytes(&bytes).is_err());
    }
}
