// std
use std::collections::BTreeMap;
// crates
use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::EnvFilter;
// internal

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EnvFilterConfig {
    /// Map where the key is the crate/module name, and the value is the desired log level.
    /// More: https://docs.rs/tracing-subscriber/latest/tracing_subscriber/filter/struct.EnvFilter.html#directives
    pub filters: BTreeMap<String, String>,
}

pub fn create_envfilter_layer(config: &EnvFilterConfig) -> Result<EnvFilter, ParseError> {
    let filter_string = config
        .filters
        .iter()
        .map(|(target, level)| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",");

    EnvFilter::try_new(filter_string)
}
