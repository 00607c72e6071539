pub mod chain_state;
pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod encoding_manager;
pub mod error;
pub mod metrics;
pub mod signer;
pub mod transport;

pub use chain_state::{ChainStateError, ChainStateProvider, OperatorStateCache, StaticChainState};
pub use config::{
    ChainStateConfig, ConfigError, ControllerConfig, DispatcherConfig, EncodingManagerConfig,
};
pub use controller::{Controller, ControllerBackends, ControllerHandle};
pub use dispatcher::{BatchReport, Dispatcher, PrepareBlobError};
pub use encoding_manager::{EncodeBlobError, EncodingManager, EncodingOutcome};
pub use error::ControllerError;
pub use metrics::{
    encode_metrics, new_registry, ControllerRegistry, DispatcherMetrics, EncodingManagerMetrics,
};
pub use signer::{
    account_id_from_public_key, verify_request_signature, LocalRequestSigner, NoopSigner,
    RequestSigner, SignerError,
};
pub use transport::{NodeTransport, StoreChunksRequest, TransportError};
