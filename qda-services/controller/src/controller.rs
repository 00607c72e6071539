// std
use std::sync::Arc;
use std::time::Duration;
// crates
use qda_core::EncodingParameterResolver;
use qda_da_storage::{ChunkStore, MetadataStore};
use qda_encoding::ErasureCoder;
use qda_kzg::Srs;
use qda_tracing::{init_logging, WorkerGuard};
use qda_utils::WorkerPool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};
// internal
use crate::chain_state::{ChainStateProvider, OperatorStateCache};
use crate::config::ControllerConfig;
use crate::dispatcher::Dispatcher;
use crate::encoding_manager::EncodingManager;
use crate::error::ControllerError;
use crate::metrics::{ControllerRegistry, DispatcherMetrics, EncodingManagerMetrics};
use crate::signer::RequestSigner;
use crate::transport::NodeTransport;

/// Collaborators the controller runs against.
pub struct ControllerBackends {
    pub metadata: Arc<dyn MetadataStore>,
    pub chunks: Arc<dyn ChunkStore>,
    pub chain_state: Arc<dyn ChainStateProvider>,
    pub transport: Arc<dyn NodeTransport>,
    pub signer: Arc<dyn RequestSigner>,
}

/// Encoding manager, dispatcher and operator state refresh wired over shared storage.
pub struct Controller {
    encoding_manager: Arc<EncodingManager>,
    dispatcher: Arc<Dispatcher>,
    chain_state: Arc<OperatorStateCache>,
    pools: Vec<Arc<WorkerPool>>,
    refresh_interval: Duration,
}

impl Controller {
    /// Build every component from `config`. Worker pools are spawned right away, so this must
    /// run inside a tokio runtime.
    pub fn new(
        config: &ControllerConfig,
        srs: Arc<Srs>,
        backends: ControllerBackends,
        registry: Option<&ControllerRegistry>,
    ) -> Result<Self, ControllerError> {
        config.validate()?;
        let resolver = EncodingParameterResolver::new(
            config.blob_versions.clone(),
            config.max_symbols_per_chunk,
        );
        let coder = ErasureCoder::new(
            srs.clone(),
            config.encoding_manager.proof_backend.build(srs),
        );

        let encoding_pool = Arc::new(WorkerPool::new(
            config.encoding_manager.num_concurrent_requests,
            config.encoding_manager.max_num_blobs_per_iteration,
        ));
        let dispatch_pool = Arc::new(WorkerPool::new(
            config.dispatcher.num_concurrent_requests,
            config.dispatcher.num_concurrent_requests,
        ));
        let chain_state = Arc::new(OperatorStateCache::new(
            backends.chain_state,
            config.dispatcher.finalization_block_delay,
            config.chain_state.quorums.iter().copied(),
        ));

        let encoding_manager = Arc::new(EncodingManager::new(
            config.encoding_manager.clone(),
            backends.metadata.clone(),
            backends.chunks.clone(),
            coder,
            resolver.clone(),
            encoding_pool.clone(),
            registry.map(EncodingManagerMetrics::new),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            config.dispatcher.clone(),
            backends.metadata,
            backends.chunks,
            chain_state.clone(),
            backends.transport,
            backends.signer,
            resolver,
            dispatch_pool.clone(),
            registry.map(DispatcherMetrics::new),
        ));

        Ok(Self {
            encoding_manager,
            dispatcher,
            chain_state,
            pools: vec![encoding_pool, dispatch_pool],
            refresh_interval: config.chain_state.refresh_interval,
        })
    }

    pub fn encoding_manager(&self) -> &Arc<EncodingManager> {
        &self.encoding_manager
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn chain_state(&self) -> &Arc<OperatorStateCache> {
        &self.chain_state
    }

    /// Spawn the pull loops.
    pub fn start(self) -> ControllerHandle {
        let cancel = CancellationToken::new();
        let tasks = vec![
            tokio::spawn(
                self.chain_state
                    .clone()
                    .run(self.refresh_interval, cancel.clone())
                    .instrument(info_span!("chain_state")),
            ),
            tokio::spawn(
                self.encoding_manager
                    .clone()
                    .run(cancel.clone())
                    .instrument(info_span!("encoding_manager")),
            ),
            tokio::spawn(
                self.dispatcher
                    .clone()
                    .run(cancel.clone())
                    .instrument(info_span!("dispatcher")),
            ),
        ];
        info!("Controller started");
        ControllerHandle {
            cancel,
            tasks,
            pools: self.pools,
            _logging_guard: None,
        }
    }

    /// Install logging from `config` and spawn the pull loops.
    pub fn start_with_logging(
        self,
        config: &ControllerConfig,
    ) -> Result<ControllerHandle, ControllerError> {
        let guard = init_logging(config.logging.clone())?;
        let mut handle = self.start();
        handle._logging_guard = guard;
        Ok(handle)
    }
}

pub struct ControllerHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    pools: Vec<Arc<WorkerPool>>,
    _logging_guard: Option<WorkerGuard>,
}

impl ControllerHandle {
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop pulling, cancel in flight pool jobs and wait for every loop to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for pool in &self.pools {
            pool.shutdown().await;
        }
        for task in futures::future::join_all(self.tasks).await {
            if let Err(e) = task {
                debug!("Controller task ended abnormally: {e}");
            }
        }
        info!("Controller stopped");
    }
}
