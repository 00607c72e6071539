pub mod filter;
pub mod logging;
pub mod panic;
pub mod settings;

pub use settings::{
    init_logging, FilterLayer, LoggerLayer, LoggingError, LoggingSettings, SharedWriter,
};
pub use tracing_appender::non_blocking::WorkerGuard;
