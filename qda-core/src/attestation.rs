// std
use std::collections::BTreeMap;
use std::sync::Arc;
// crates
use bitvec::prelude::*;
use blst::min_sig::{AggregatePublicKey, AggregateSignature, PublicKey, Signature};
use blst::BLST_ERROR;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
// internal
use crate::batch::BatchHeader;
use crate::blob::QuorumId;
use crate::operators::{IndexedOperatorState, OperatorId};

pub const BLS_DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttestationError {
    #[error("No public key is registered for operator {0}")]
    NoOperatorAddress(OperatorId),
    #[error("Operator {0} is not part of the batch quorums")]
    NotInQuorums(OperatorId),
    #[error("Signature of operator {0} does not verify")]
    InvalidSignature(OperatorId),
    #[error("Could not aggregate: {0:?}")]
    AggregationError(BLST_ERROR),
    #[error("No signatures to aggregate")]
    NoSignatures,
    #[error("Signed stake of quorum {0} overflows")]
    StakeOverflow(QuorumId),
    #[error("Aggregated signature does not verify")]
    InvalidAttestation,
}

/// Aggregate signature of a batch header plus who signed it.
///
/// `signers` is indexed by the ids of the operators of `quorum_numbers` in ascending order, so the
/// attestation can be checked against an operator state snapshot without the individual
/// signatures.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Attestation {
    pub batch_header: BatchHeader,
    pub aggregated_signature: Signature,
    pub signers: BitVec<u8>,
    pub signers_apk: PublicKey,
    pub non_signer_public_keys: Vec<PublicKey>,
    pub quorum_apks: BTreeMap<QuorumId, PublicKey>,
    pub quorum_numbers: Vec<QuorumId>,
    /// Signed stake percentage per quorum.
    pub quorum_results: BTreeMap<QuorumId, u8>,
    /// Nanoseconds since the unix epoch.
    pub attested_at: u64,
}

impl Attestation {
    pub fn reference_block_number(&self) -> u64 {
        self.batch_header.reference_block_number
    }

    pub fn verify(&self, state: &IndexedOperatorState) -> Result<(), AttestationError> {
        let operators = state.state.operators_in(&self.quorum_numbers);
        if operators.len() != self.signers.len() {
            return Err(AttestationError::InvalidAttestation);
        }
        let keys = operators
            .iter()
            .zip(self.signers.iter().by_vals())
            .filter(|(_, signed)| *signed)
            .map(|(id, _)| {
                state
                    .public_key(id)
                    .ok_or(AttestationError::NoOperatorAddress(*id))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if keys.is_empty() {
            return Err(AttestationError::NoSignatures);
        }
        let message = self.batch_header.hash();
        match self
            .aggregated_signature
            .fast_aggregate_verify(true, &message, BLS_DST, &keys)
        {
            BLST_ERROR::BLST_SUCCESS => Ok(()),
            _ => Err(AttestationError::InvalidAttestation),
        }
    }
}

fn aggregate_public_keys(keys: &[&PublicKey]) -> Result<PublicKey, AttestationError> {
    AggregatePublicKey::aggregate(keys, false)
        .map(|apk| apk.to_public_key())
        .map_err(AttestationError::AggregationError)
}

/// Collects verified operator signatures over one batch header.
pub struct SignatureAccumulator {
    state: Arc<IndexedOperatorState>,
    batch_header: BatchHeader,
    message: [u8; 32],
    quorums: Vec<QuorumId>,
    signatures: BTreeMap<OperatorId, Signature>,
}

impl SignatureAccumulator {
    pub fn new(
        state: Arc<IndexedOperatorState>,
        batch_header: BatchHeader,
        quorums: Vec<QuorumId>,
    ) -> Self {
        Self {
            state,
            message: batch_header.hash(),
            batch_header,
            quorums,
            signatures: BTreeMap::new(),
        }
    }

    pub fn quorums(&self) -> &[QuorumId] {
        &self.quorums
    }

    pub fn num_signers(&self) -> usize {
        self.signatures.len()
    }

    /// Verify `signature` against the operator's registered key and keep it.
    pub fn add(
        &mut self,
        operator: OperatorId,
        signature: Signature,
    ) -> Result<(), AttestationError> {
        let public_key = self
            .state
            .public_key(&operator)
            .ok_or(AttestationError::NoOperatorAddress(operator))?;
        let member = self.quorums.iter().any(|quorum| {
            self.state
                .state
                .quorum(*quorum)
                .is_some_and(|operators| operators.contains_key(&operator))
        });
        if !member {
            return Err(AttestationError::NotInQuorums(operator));
        }
        let result = signature.verify(true, &self.message, BLS_DST, &[], public_key, true);
        if result != BLST_ERROR::BLST_SUCCESS {
            warn!("Rejecting signature of operator {operator}: {result:?}");
            return Err(AttestationError::InvalidSignature(operator));
        }
        if self.signatures.insert(operator, signature).is_some() {
            debug!("Operator {operator} signed twice");
        }
        Ok(())
    }

    pub fn signed_stake(&self, quorum: QuorumId) -> Result<u128, AttestationError> {
        let Some(operators) = self.state.state.quorum(quorum) else {
            return Ok(0);
        };
        self.signatures
            .keys()
            .filter_map(|id| operators.get(id))
            .try_fold(0u128, |total, info| total.checked_add(info.stake))
            .ok_or(AttestationError::StakeOverflow(quorum))
    }

    /// Signed stake of `quorum` as a whole percentage, rounded down.
    pub fn signed_percentage(&self, quorum: QuorumId) -> Result<u8, AttestationError> {
        let total = self
            .state
            .state
            .total_stake(quorum)
            .map_err(|_| AttestationError::StakeOverflow(quorum))?;
        if total == 0 {
            return Ok(0);
        }
        let signed = self.signed_stake(quorum)?;
        let scaled = signed
            .checked_mul(100)
            .ok_or(AttestationError::StakeOverflow(quorum))?;
        Ok((scaled / total) as u8)
    }

    pub fn quorum_results(&self) -> Result<BTreeMap<QuorumId, u8>, AttestationError> {
        self.quorums
            .iter()
            .map(|quorum| Ok((*quorum, self.signed_percentage(*quorum)?)))
            .collect()
    }

    /// Aggregate every accepted signature into an [`Attestation`].
    pub fn finalize(&self, attested_at: u64) -> Result<Attestation, AttestationError> {
        if self.signatures.is_empty() {
            return Err(AttestationError::NoSignatures);
        }
        let signatures: Vec<&Signature> = self.signatures.values().collect();
        let aggregated_signature = AggregateSignature::aggregate(&signatures, false)
            .map_err(AttestationError::AggregationError)?
            .to_signature();

        let operators = self.state.state.operators_in(&self.quorums);
        let mut signers = BitVec::<u8>::with_capacity(operators.len());
        let mut signer_keys = Vec::new();
        let mut non_signer_public_keys = Vec::new();
        for id in &operators {
            let signed = self.signatures.contains_key(id);
            signers.push(signed);
            let key = self
                .state
                .public_key(id)
                .ok_or(AttestationError::NoOperatorAddress(*id))?;
            if signed {
                signer_keys.push(key);
            } else {
                non_signer_public_keys.push(*key);
            }
        }

        let quorum_apks = self
            .quorums
            .iter()
            .filter_map(|quorum| Some((*quorum, self.state.state.quorum(*quorum)?)))
            .filter(|(_, members)| !members.is_empty())
            .map(|(quorum, members)| {
                let keys = members
                    .keys()
                    .map(|id| {
                        self.state
                            .public_key(id)
                            .ok_or(AttestationError::NoOperatorAddress(*id))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((quorum, aggregate_public_keys(&keys)?))
            })
            .collect::<Result<BTreeMap<_, _>, AttestationError>>()?;

        Ok(Attestation {
            batch_header: self.batch_header,
            aggregated_signature,
            signers,
            signers_apk: aggregate_public_keys(&signer_keys)?,
            non_signer_public_keys,
            quorum_apks,
            quorum_numbers: self.quorums.clone(),
            quorum_results: self.quorum_results()?,
            attested_at,
        })
    }
}
