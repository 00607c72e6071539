// std
// crates
use async_trait::async_trait;
use blst::min_sig::{PublicKey, SecretKey, Signature};
use blst::BLST_ERROR;
use qda_core::{keccak256, AccountId, BLS_DST};
use thiserror::Error;
// internal
use crate::transport::StoreChunksRequest;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignerError {
    #[error("Request signing is disabled")]
    Disabled,
    #[error("Invalid signing key: {0:?}")]
    InvalidKey(BLST_ERROR),
    #[error("Signer backend error: {0}")]
    Backend(String),
}

/// Signs outgoing requests so operators can authenticate the disperser.
#[async_trait]
pub trait RequestSigner: Send + Sync {
    async fn sign(&self, payload: &[u8; 32]) -> Result<Vec<u8>, SignerError>;

    async fn account_id(&self) -> Result<AccountId, SignerError>;
}

pub fn account_id_from_public_key(public_key: &PublicKey) -> AccountId {
    let hash = keccak256(&[&public_key.compress()]);
    let mut account = AccountId::default();
    account.copy_from_slice(&hash[12..]);
    account
}

/// BLS key held in process memory.
pub struct LocalRequestSigner {
    secret_key: SecretKey,
    public_key: PublicKey,
}

impl LocalRequestSigner {
    pub fn new(secret_key: SecretKey) -> Self {
        let public_key = secret_key.sk_to_pk();
        Self {
            secret_key,
            public_key,
        }
    }

    /// Derive the key from at least 32 bytes of seed material.
    pub fn from_seed(seed: &[u8]) -> Result<Self, SignerError> {
        SecretKey::key_gen(seed, &[])
            .map(Self::new)
            .map_err(SignerError::InvalidKey)
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }
}

#[async_trait]
impl RequestSigner for LocalRequestSigner {
    async fn sign(&self, payload: &[u8; 32]) -> Result<Vec<u8>, SignerError> {
        Ok(self
            .secret_key
            .sign(payload, BLS_DST, &[])
            .to_bytes()
            .to_vec())
    }

    async fn account_id(&self) -> Result<AccountId, SignerError> {
        Ok(account_id_from_public_key(&self.public_key))
    }
}

/// Signer for deployments where operators do not authenticate requests.
pub struct NoopSigner;

#[async_trait]
impl RequestSigner for NoopSigner {
    async fn sign(&self, _payload: &[u8; 32]) -> Result<Vec<u8>, SignerError> {
        Err(SignerError::Disabled)
    }

    async fn account_id(&self) -> Result<AccountId, SignerError> {
        Err(SignerError::Disabled)
    }
}

/// Operator side check of [`StoreChunksRequest::signature`].
pub fn verify_request_signature(request: &StoreChunksRequest, public_key: &PublicKey) -> bool {
    let Ok(signature) = Signature::from_bytes(&request.signature) else {
        return false;
    };
    signature.verify(true, &request.hash(), BLS_DST, &[], public_key, true)
        == BLST_ERROR::BLST_SUCCESS
}

#[cfg(test)]
mod test {
    use super::{
        account_id_from_public_key, verify_request_signature, LocalRequestSigner, NoopSigner,
        RequestSigner, SignerError,
    };
    use crate::transport::StoreChunksRequest;
    use qda_core::BatchHeader;

    #[tokio::test]
    async fn signed_requests_verify() {
        let signer = LocalRequestSigner::from_seed(&[7; 32]).unwrap();
        let batch_header = BatchHeader {
            batch_root: [1; 32],
            reference_block_number: 42,
        };
        let mut request = StoreChunksRequest {
            batch_header,
            shards: vec![],
            disperser_id: 3,
            signature: vec![],
        };
        request.signature = signer.sign(&request.hash()).await.unwrap();
        assert!(verify_request_signature(&request, signer.public_key()));

        request.disperser_id = 4;
        assert!(!verify_request_signature(&request, signer.public_key()));

        assert_eq!(
            signer.account_id().await.unwrap(),
            account_id_from_public_key(signer.public_key())
        );
    }

    #[tokio::test]
    async fn short_seed_and_noop_signer_fail() {
        assert!(matches!(
            LocalRequestSigner::from_seed(&[1; 8]),
            Err(SignerError::InvalidKey(_))
        ));
        assert_eq!(NoopSigner.sign(&[0; 32]).await, Err(SignerError::Disabled));
    }
}
