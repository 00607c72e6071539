// std
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
// crates
use async_trait::async_trait;
use qda_core::{IndexedOperatorState, QuorumId};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
// internal

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainStateError {
    #[error("Block {requested} is ahead of the chain head {head}")]
    FutureBlock { requested: u64, head: u64 },
    #[error("Chain state unavailable: {0}")]
    Unavailable(String),
}

impl ChainStateError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Source of registered operators and their stakes at a given block.
#[async_trait]
pub trait ChainStateProvider: Send + Sync {
    async fn current_block_number(&self) -> Result<u64, ChainStateError>;

    /// Operators of `quorums` with their stake and public keys as of `block_number`.
    async fn operator_state(
        &self,
        quorums: &[QuorumId],
        block_number: u64,
    ) -> Result<IndexedOperatorState, ChainStateError>;
}

/// Fixed operator set reported at every block, for devnets and tests.
pub struct StaticChainState {
    state: IndexedOperatorState,
    head: AtomicU64,
}

impl StaticChainState {
    pub fn new(state: IndexedOperatorState, head: u64) -> Self {
        Self {
            state,
            head: AtomicU64::new(head),
        }
    }

    pub fn advance(&self, blocks: u64) -> u64 {
        self.head.fetch_add(blocks, Ordering::SeqCst) + blocks
    }
}

#[async_trait]
impl ChainStateProvider for StaticChainState {
    async fn current_block_number(&self) -> Result<u64, ChainStateError> {
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn operator_state(
        &self,
        quorums: &[QuorumId],
        block_number: u64,
    ) -> Result<IndexedOperatorState, ChainStateError> {
        let head = self.head.load(Ordering::SeqCst);
        if block_number > head {
            return Err(ChainStateError::FutureBlock {
                requested: block_number,
                head,
            });
        }
        let mut state = self.state.clone();
        state
            .state
            .operators
            .retain(|quorum, _| quorums.contains(quorum));
        state.state.block_number = block_number;
        Ok(state)
    }
}

struct Snapshot {
    quorums: BTreeSet<QuorumId>,
    state: Arc<IndexedOperatorState>,
}

/// Operator state at `head - finalization_block_delay`, fetched on a fixed interval and shared
/// read only between every assignment computed until the next refresh.
pub struct OperatorStateCache {
    provider: Arc<dyn ChainStateProvider>,
    finalization_block_delay: u64,
    tracked_quorums: BTreeSet<QuorumId>,
    snapshot: RwLock<Option<Snapshot>>,
}

impl OperatorStateCache {
    pub fn new(
        provider: Arc<dyn ChainStateProvider>,
        finalization_block_delay: u64,
        quorums: impl IntoIterator<Item = QuorumId>,
    ) -> Self {
        Self {
            provider,
            finalization_block_delay,
            tracked_quorums: quorums.into_iter().collect(),
            snapshot: RwLock::new(None),
        }
    }

    /// Fetch a new snapshot covering the tracked quorums and `extra`.
    pub async fn refresh(
        &self,
        extra: &[QuorumId],
    ) -> Result<Arc<IndexedOperatorState>, ChainStateError> {
        let mut quorums = self.tracked_quorums.clone();
        if let Some(snapshot) = self.snapshot.read().await.as_ref() {
            quorums.extend(snapshot.quorums.iter().copied());
        }
        quorums.extend(extra.iter().copied());

        let head = self.provider.current_block_number().await?;
        let reference_block = head.saturating_sub(self.finalization_block_delay);
        let quorum_list: Vec<QuorumId> = quorums.iter().copied().collect();
        let state = Arc::new(
            self.provider
                .operator_state(&quorum_list, reference_block)
                .await?,
        );
        debug!(
            block_number = reference_block,
            quorums = ?quorum_list,
            "Refreshed operator state"
        );
        *self.snapshot.write().await = Some(Snapshot {
            quorums,
            state: state.clone(),
        });
        Ok(state)
    }

    /// Current snapshot, fetched first if it is missing or does not cover `quorums`.
    pub async fn state_for(
        &self,
        quorums: &[QuorumId],
    ) -> Result<Arc<IndexedOperatorState>, ChainStateError> {
        if let Some(snapshot) = self.snapshot.read().await.as_ref() {
            if quorums.iter().all(|quorum| snapshot.quorums.contains(quorum)) {
                return Ok(snapshot.state.clone());
            }
        }
        self.refresh(quorums).await
    }

    pub async fn snapshot(&self) -> Option<Arc<IndexedOperatorState>> {
        self.snapshot
            .read()
            .await
            .as_ref()
            .map(|snapshot| snapshot.state.clone())
    }

    pub async fn run(self: Arc<Self>, refresh_interval: Duration, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(refresh_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.refresh(&[]).await {
                        error!("Failed to refresh operator state: {e}");
                    }
                }
            }
        }
        debug!("Operator state refresh stopped");
    }
}
