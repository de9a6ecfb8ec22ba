pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use crate::config::cli::CliConfig;
pub use crate::config::{toml_config::TomlConfig, OutputFormat, RunConfig};

pub use crate::adapters::sink::{CollectSink, CsvSink, JsonLinesSink};
pub use crate::adapters::source::{spawn_iter_source, JsonLinesSource};
pub use crate::core::{
    etl::{FlattenEngine, RunSummary},
    flatten::{Flattener, FlattenerConfig},
    stage::{spawn_stage, Stage, StageStats, StreamOptions, StreamOverrides},
};
pub use crate::domain::model::{
    BreakdownTree, Decomposition, DecompositionResult, DecompositionShape, FieldValue, FlatRecord,
    Metrics,
};
pub use crate::domain::ports::{ConfigProvider, RecordSink, Transform};
pub use crate::utils::error::{FlattenError, Result};
