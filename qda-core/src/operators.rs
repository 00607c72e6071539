// std
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Debug, Display, Formatter};
// crates
use blst::min_sig::PublicKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;
// internal
use crate::blob::QuorumId;
use crate::keccak256;

/// Operator identity: keccak-256 of its compressed BLS public key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct OperatorId(
    #[serde(
        serialize_with = "qda_utils::serde::serialize_bytes_array",
        deserialize_with = "qda_utils::serde::deserialize_bytes_array"
    )]
    pub [u8; 32],
);

impl OperatorId {
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        Self(keccak256(&[&public_key.compress()]))
    }
}

impl Display for OperatorId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", const_hex::encode(self.0))
    }
}

impl Debug for OperatorId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "OperatorId({})", const_hex::encode(&self.0[..8]))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorInfo {
    pub stake: u128,
    /// Address the operator accepts chunk requests on.
    pub socket: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OperatorStateError {
    #[error("Total stake of quorum {0} overflows")]
    StakeOverflow(QuorumId),
}

/// Stake of every operator per quorum, as of `block_number`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorState {
    pub operators: BTreeMap<QuorumId, BTreeMap<OperatorId, OperatorInfo>>,
    pub block_number: u64,
}

impl OperatorState {
    pub fn quorum(&self, quorum: QuorumId) -> Option<&BTreeMap<OperatorId, OperatorInfo>> {
        self.operators.get(&quorum)
    }

    pub fn total_stake(&self, quorum: QuorumId) -> Result<u128, OperatorStateError> {
        self.quorum(quorum)
            .into_iter()
            .flat_map(BTreeMap::values)
            .try_fold(0u128, |total, info| total.checked_add(info.stake))
            .ok_or(OperatorStateError::StakeOverflow(quorum))
    }

    pub fn stake(&self, quorum: QuorumId, operator: &OperatorId) -> Option<u128> {
        self.quorum(quorum)?.get(operator).map(|info| info.stake)
    }

    /// Operators belonging to at least one of `quorums`, in id order.
    pub fn operators_in(&self, quorums: &[QuorumId]) -> BTreeSet<OperatorId> {
        quorums
            .iter()
            .filter_map(|quorum| self.quorum(*quorum))
            .flat_map(BTreeMap::keys)
            .copied()
            .collect()
    }

    pub fn socket(&self, operator: &OperatorId) -> Option<&str> {
        self.operators
            .values()
            .find_map(|quorum| quorum.get(operator))
            .map(|info| info.socket.as_str())
    }
}

/// [`OperatorState`] together with the public key of each operator.
#[derive(Clone, Debug, Default)]
pub struct IndexedOperatorState {
    pub state: OperatorState,
    pub public_keys: BTreeMap<OperatorId, PublicKey>,
}

impl IndexedOperatorState {
    pub fn new(state: OperatorState, public_keys: BTreeMap<OperatorId, PublicKey>) -> Self {
        Self { state, public_keys }
    }

    pub fn public_key(&self, operator: &OperatorId) -> Option<&PublicKey> {
        self.public_keys.get(operator)
    }

    pub fn block_number(&self) -> u64 {
        self.state.block_number
    }
}

#[cfg(test)]
mod test {
    use super::{OperatorId, OperatorInfo, OperatorState, OperatorStateError};
    use std::collections::BTreeMap;

    fn info(stake: u128) -> OperatorInfo {
        OperatorInfo {
            stake,
            socket: "localhost:0".to_string(),
        }
    }

    #[test]
    fn total_stake_and_membership() {
        let a = OperatorId([1; 32]);
        let b = OperatorId([2; 32]);
        let c = OperatorId([3; 32]);
        let state = OperatorState {
            operators: BTreeMap::from([
                (0, BTreeMap::from([(a, info(10)), (b, info(20))])),
                (1, BTreeMap::from([(b, info(5)), (c, info(5))])),
            ]),
            block_number: 10,
        };
        assert_eq!(state.total_stake(0), Ok(30));
        assert_eq!(state.total_stake(1), Ok(10));
        assert_eq!(state.total_stake(2), Ok(0));
        assert_eq!(state.stake(1, &b), Some(5));
        assert_eq!(state.stake(1, &a), None);
        assert_eq!(
            state.operators_in(&[0, 1]).into_iter().collect::<Vec<_>>(),
            vec![a, b, c]
        );
    }

    #[test]
    fn stake_overflow_is_an_error() {
        let state = OperatorState {
            operators: BTreeMap::from([(
                0,
                BTreeMap::from([
                    (OperatorId([1; 32]), info(u128::MAX)),
                    (OperatorId([2; 32]), info(1)),
                ]),
            )]),
            block_number: 0,
        };
        assert_eq!(
            state.total_stake(0),
            Err(OperatorStateError::StakeOverflow(0))
        );
    }
}
