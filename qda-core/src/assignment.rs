// std
use std::cmp::Reverse;
use std::collections::BTreeMap;
// crates
use bitvec::prelude::*;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;
// internal
use crate::blob::QuorumId;
use crate::encoding::{BlobVersionParameters, EncodingParams};
use crate::operators::{OperatorId, OperatorState, OperatorStateError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssignmentError {
    #[error("Quorum {0} has no operators")]
    InsufficientOperators(QuorumId),
    #[error("Quorum {0} has no stake")]
    NoQuorum(QuorumId),
    #[error("Quorum {quorum} has {count} operators, at most {max} are allowed")]
    TooManyOperators {
        quorum: QuorumId,
        count: usize,
        max: u32,
    },
    #[error("Operator {operator} is not part of quorum {quorum}")]
    NotInQuorum {
        quorum: QuorumId,
        operator: OperatorId,
    },
    #[error("Confirmation threshold {0} is outside 1..=100")]
    InvalidThreshold(u8),
    #[error("Encoding parameters have no chunks")]
    NoChunks,
    #[error("Stake arithmetic overflowed in quorum {0}")]
    StakeOverflow(QuorumId),
    #[error("Chunk {index} of quorum {quorum} is not assigned to any operator")]
    CoverageViolation { quorum: QuorumId, index: u32 },
}

impl From<OperatorStateError> for AssignmentError {
    fn from(error: OperatorStateError) -> Self {
        match error {
            OperatorStateError::StakeOverflow(quorum) => Self::StakeOverflow(quorum),
        }
    }
}

/// `num_chunks` consecutive indices starting at `start_index`, wrapping around the end of the
/// chunk range.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Assignment {
    pub start_index: u32,
    pub num_chunks: u32,
}

impl Assignment {
    pub fn indices(&self, total_chunks: u32) -> impl Iterator<Item = u32> {
        let start = self.start_index as u64;
        let total = total_chunks.max(1) as u64;
        (0..self.num_chunks as u64).map(move |i| ((start + i) % total) as u32)
    }

    pub fn contains(&self, index: u32, total_chunks: u32) -> bool {
        if index >= total_chunks {
            return false;
        }
        let offset = (index as u64 + total_chunks as u64 - self.start_index as u64)
            % total_chunks as u64;
        offset < self.num_chunks as u64
    }
}

/// Reject quorums with more operators than a blob version supports.
pub fn check_operator_count(
    state: &OperatorState,
    quorum: QuorumId,
    parameters: &BlobVersionParameters,
) -> Result<(), AssignmentError> {
    let count = state.quorum(quorum).map_or(0, |operators| operators.len());
    if count > parameters.max_num_operators as usize {
        return Err(AssignmentError::TooManyOperators {
            quorum,
            count,
            max: parameters.max_num_operators,
        });
    }
    Ok(())
}

/// Deterministic stake weighted placement of chunks.
///
/// Chunk `j` sits at position `j * S / n` on a circle of circumference `S` (the total stake).
/// Operators, sorted by descending stake then id, occupy consecutive arcs of their stake. Each
/// operator stores the chunks whose positions fall in its arc extended backwards by
/// `(100 - threshold)%` of `S`. A chunk is therefore held by operators whose combined stake
/// exceeds `(100 - threshold)%`, so any set of operators holding at least `threshold%` of the
/// stake includes one of its holders.
#[derive(Clone, Debug)]
pub struct ChunkAssigner {
    default_threshold: u8,
    quorum_thresholds: BTreeMap<QuorumId, u8>,
}

impl Default for ChunkAssigner {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CONFIRMATION_THRESHOLD)
    }
}

impl ChunkAssigner {
    pub const DEFAULT_CONFIRMATION_THRESHOLD: u8 = 55;

    pub fn new(default_threshold: u8) -> Self {
        Self {
            default_threshold,
            quorum_thresholds: BTreeMap::new(),
        }
    }

    pub fn with_quorum_thresholds(mut self, thresholds: BTreeMap<QuorumId, u8>) -> Self {
        self.quorum_thresholds.extend(thresholds);
        self
    }

    pub fn confirmation_threshold(&self, quorum: QuorumId) -> u8 {
        self.quorum_thresholds
            .get(&quorum)
            .copied()
            .unwrap_or(self.default_threshold)
    }

    pub fn assignments(
        &self,
        state: &OperatorState,
        params: &EncodingParams,
        quorum: QuorumId,
    ) -> Result<BTreeMap<OperatorId, Assignment>, AssignmentError> {
        let threshold = self.confirmation_threshold(quorum);
        if !(1..=100).contains(&threshold) {
            return Err(AssignmentError::InvalidThreshold(threshold));
        }
        if params.num_chunks == 0 {
            return Err(AssignmentError::NoChunks);
        }
        let operators = state
            .quorum(quorum)
            .filter(|operators| !operators.is_empty())
            .ok_or(AssignmentError::InsufficientOperators(quorum))?;
        let total_stake = state.total_stake(quorum)?;
        if total_stake == 0 {
            return Err(AssignmentError::NoQuorum(quorum));
        }

        let overflow = || AssignmentError::StakeOverflow(quorum);
        let n = params.num_chunks as u128;
        // positions are scaled by 100 * n so every boundary is an integer
        let step = total_stake.checked_mul(100).ok_or_else(overflow)?;
        let circumference = step.checked_mul(n).ok_or_else(overflow)?;
        let extension = circumference
            .checked_mul(100 - threshold as u128)
            .ok_or_else(overflow)?
            / 100;

        let ordered = operators
            .iter()
            .map(|(id, info)| (*id, info.stake))
            .sorted_by_key(|(id, stake)| (Reverse(*stake), *id));

        let mut assignments = BTreeMap::new();
        let mut offset: u128 = 0;
        for (id, stake) in ordered {
            if stake == 0 {
                assignments.insert(id, Assignment::default());
                continue;
            }
            let arc = stake
                .checked_mul(100)
                .and_then(|s| s.checked_mul(n))
                .ok_or_else(overflow)?;
            let start = offset
                .checked_mul(100)
                .and_then(|s| s.checked_mul(n))
                .ok_or_else(overflow)?;
            let length = arc.checked_add(extension).ok_or_else(overflow)?;

            let (start_index, count) = if length >= circumference {
                (0, n)
            } else {
                let start = (start + circumference - extension) % circumference;
                let first = start.div_ceil(step);
                let end = (start + length).div_ceil(step);
                (first % n, end - first)
            };
            let minimum = (n * stake).div_ceil(total_stake);
            assignments.insert(
                id,
                Assignment {
                    start_index: start_index as u32,
                    num_chunks: count.max(minimum).min(n) as u32,
                },
            );
            offset += stake;
        }

        if let Err(e) = verify_coverage(&assignments, params.num_chunks, quorum) {
            error!("Assignment of quorum {quorum} does not cover every chunk: {e}");
            return Err(e);
        }
        Ok(assignments)
    }

    pub fn assignment(
        &self,
        state: &OperatorState,
        params: &EncodingParams,
        quorum: QuorumId,
        operator: &OperatorId,
    ) -> Result<Assignment, AssignmentError> {
        self.assignments(state, params, quorum)?
            .remove(operator)
            .ok_or(AssignmentError::NotInQuorum {
                quorum,
                operator: *operator,
            })
    }
}

/// Check that every chunk index is held by at least one operator.
pub fn verify_coverage(
    assignments: &BTreeMap<OperatorId, Assignment>,
    num_chunks: u32,
    quorum: QuorumId,
) -> Result<(), AssignmentError> {
    let mut covered = bitvec![u8, Lsb0; 0; num_chunks as usize];
    for assignment in assignments.values() {
        if assignment.num_chunks >= num_chunks {
            return Ok(());
        }
        for index in assignment.indices(num_chunks) {
            covered.set(index as usize, true);
        }
    }
    match covered.first_zero() {
        Some(index) => Err(AssignmentError::CoverageViolation {
            quorum,
            index: index as u32,
        }),
        None => Ok(()),
    }
}
