// std
// crates
use serde::{Deserialize, Serialize};
// internal
use crate::blob::BlobCertificate;
use crate::keccak256;

/// Keccak-256 binary merkle tree. Leaves are padded with zero hashes up to a power of two.
#[derive(Clone, Debug)]
pub struct MerkleTree {
    layers: Vec<Vec<[u8; 32]>>,
}

impl MerkleTree {
    pub fn new(leaves: Vec<[u8; 32]>) -> Self {
        let width = leaves.len().next_power_of_two();
        let mut current = leaves;
        current.resize(width, [0; 32]);
        let mut layers = Vec::new();
        while current.len() > 1 {
            let next = current
                .chunks(2)
                .map(|pair| keccak256(&[&pair[0], &pair[1]]))
                .collect();
            layers.push(std::mem::replace(&mut current, next));
        }
        layers.push(current);
        Self { layers }
    }

    pub fn root(&self) -> [u8; 32] {
        self.layers
            .last()
            .and_then(|layer| layer.first())
            .copied()
            .unwrap_or_default()
    }

    /// Sibling hashes from the leaf up to the root.
    pub fn proof(&self, index: usize) -> Option<Vec<[u8; 32]>> {
        if index >= self.layers.first()?.len() {
            return None;
        }
        let mut position = index;
        let mut siblings = Vec::with_capacity(self.layers.len() - 1);
        for layer in &self.layers[..self.layers.len() - 1] {
            siblings.push(layer[position ^ 1]);
            position /= 2;
        }
        Some(siblings)
    }

    pub fn verify(root: &[u8; 32], leaf: [u8; 32], index: usize, proof: &[[u8; 32]]) -> bool {
        let mut position = index;
        let mut hash = leaf;
        for sibling in proof {
            hash = if position % 2 == 0 {
                keccak256(&[&hash, sibling])
            } else {
                keccak256(&[sibling, &hash])
            };
            position /= 2;
        }
        position == 0 && &hash == root
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchHeader {
    pub batch_root: [u8; 32],
    pub reference_block_number: u64,
}

impl BatchHeader {
    /// Build the header of `certificates` along with the inclusion proof of each of them.
    pub fn from_certificates(
        certificates: &[BlobCertificate],
        reference_block_number: u64,
    ) -> (Self, Vec<BlobInclusionInfo>) {
        let tree = MerkleTree::new(certificates.iter().map(BlobCertificate::hash).collect());
        let header = Self {
            batch_root: tree.root(),
            reference_block_number,
        };
        let inclusions = certificates
            .iter()
            .enumerate()
            .map(|(index, certificate)| BlobInclusionInfo {
                certificate: certificate.clone(),
                blob_index: index as u32,
                inclusion_proof: tree.proof(index).unwrap_or_default(),
            })
            .collect();
        (header, inclusions)
    }

    /// Message signed by operators.
    pub fn hash(&self) -> [u8; 32] {
        keccak256(&[&self.batch_root, &self.reference_block_number.to_be_bytes()])
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobInclusionInfo {
    pub certificate: BlobCertificate,
    pub blob_index: u32,
    pub inclusion_proof: Vec<[u8; 32]>,
}

impl BlobInclusionInfo {
    pub fn verify(&self, header: &BatchHeader) -> bool {
        MerkleTree::verify(
            &header.batch_root,
            self.certificate.hash(),
            self.blob_index as usize,
            &self.inclusion_proof,
        )
    }
}
