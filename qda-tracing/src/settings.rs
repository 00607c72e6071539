// std
use std::fmt::{Debug, Formatter};
use std::io::Write;
use std::sync::{Arc, Mutex, Once};
// crates
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt};
// internal
use crate::filter::envfilter::{create_envfilter_layer, EnvFilterConfig};
use crate::logging::local::{create_file_layer, create_writer_layer, FileConfig};
use crate::panic::install_panic_hook;

/// Writer shared between the configuration and the logging layer, mostly used to capture
/// logs in tests.
#[derive(Clone)]
pub struct SharedWriter {
    inner: Arc<Mutex<dyn Write + Send + Sync>>,
}

impl Write for SharedWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner
            .lock()
            .map_err(|_| std::io::Error::other("poisoned log writer"))?
            .write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner
            .lock()
            .map_err(|_| std::io::Error::other("poisoned log writer"))?
            .flush()
    }
}

impl SharedWriter {
    pub fn new<W: Write + Send + Sync + 'static>(writer: W) -> Self {
        Self {
            inner: Arc::new(Mutex::new(writer)),
        }
    }
}

impl Debug for SharedWriter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedWriter").finish()
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub enum LoggerLayer {
    File(FileConfig),
    #[default]
    Stdout,
    Stderr,
    #[serde(skip)]
    Writer(SharedWriter),
    // do not collect logs
    None,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub enum FilterLayer {
    EnvFilter(EnvFilterConfig),
    #[default]
    None,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default)]
    pub logger: LoggerLayer,
    #[serde(default)]
    pub filter: FilterLayer,
    #[serde(with = "serde_level", default = "default_level")]
    pub level: Level,
}

fn default_level() -> Level {
    Level::INFO
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            logger: LoggerLayer::Stdout,
            filter: FilterLayer::None,
            level: default_level(),
        }
    }
}

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid filter directives: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),
    #[error("A global subscriber is already installed: {0}")]
    AlreadyInstalled(#[from] tracing_subscriber::util::TryInitError),
}

/// Install the global subscriber described by `settings` and the panic hook.
///
/// The returned guard must be kept alive for as long as logs should be flushed. Only the first
/// call installs anything, later calls return `Ok(None)`.
pub fn init_logging(settings: LoggingSettings) -> Result<Option<WorkerGuard>, LoggingError> {
    static INIT: Once = Once::new();
    if INIT.is_completed() {
        return Ok(None);
    }

    let mut layers: Vec<Box<dyn tracing_subscriber::Layer<_> + Send + Sync>> = vec![];
    let guard = match settings.logger {
        LoggerLayer::File(config) => {
            let (layer, guard) = create_file_layer(config);
            layers.push(Box::new(layer));
            Some(guard)
        }
        LoggerLayer::Stdout => {
            let (layer, guard) = create_writer_layer(std::io::stdout());
            layers.push(Box::new(layer));
            Some(guard)
        }
        LoggerLayer::Stderr => {
            let (layer, guard) = create_writer_layer(std::io::stderr());
            layers.push(Box::new(layer));
            Some(guard)
        }
        LoggerLayer::Writer(writer) => {
            let (layer, guard) = create_writer_layer(writer);
            layers.push(Box::new(layer));
            Some(guard)
        }
        LoggerLayer::None => None,
    };

    if let FilterLayer::EnvFilter(config) = &settings.filter {
        layers.push(Box::new(create_envfilter_layer(config)?));
    }

    let mut result = Ok(());
    INIT.call_once(|| {
        result = tracing_subscriber::registry()
            .with(LevelFilter::from(settings.level))
            .with(layers)
            .try_init();
    });
    result?;
    install_panic_hook();
    Ok(guard)
}

mod serde_level {
    use serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer};

    use super::Level;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        <String>::deserialize(deserializer).and_then(|v| {
            v.parse()
                .map_err(|e| D::Error::custom(format!("invalid log level {e}")))
        })
    }

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S>(value: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        value.as_str().serialize(serializer)
    }
}
