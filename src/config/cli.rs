use crate::config::toml_config::TomlConfig;
use crate::config::{OutputFormat, RunConfig};
use crate::core::stage::StreamOptions;
use crate::domain::model::DecompositionShape;
use crate::utils::error::{FlattenError, Result};
use crate::utils::validation::Validate;
use clap::Parser;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[command(name = "breakdown-flattener")]
#[command(about = "Flatten decomposed aggregation results into tabular records")]
pub struct CliConfig {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<String>,

    /// Decomposition fields, outermost first (overrides the config file)
    #[arg(long, value_delimiter = ',')]
    pub fields: Vec<String>,

    /// Input shape: points or nested
    #[arg(long)]
    pub shape: Option<DecompositionShape>,

    /// Metric name used for single-value results
    #[arg(long)]
    pub default_metric: Option<String>,

    /// Input file with one JSON document per line ("-" for stdin)
    #[arg(short, long, default_value = "-")]
    pub input: String,

    /// Output file ("-" for stdout)
    #[arg(short, long)]
    pub output: Option<String>,

    /// Output format: jsonl or csv
    #[arg(long)]
    pub format: Option<String>,

    /// Records buffered between stages
    #[arg(long)]
    pub high_water_mark: Option<usize>,

    /// Text written in CSV cells for unset fields
    #[arg(long)]
    pub unset_placeholder: Option<String>,

    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Emit logs as JSON")]
    pub log_json: bool,
}

impl CliConfig {
    /// 先讀配置檔，再套用命令列覆寫
    pub fn resolve(&self) -> Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let toml = TomlConfig::from_file(path)?;
                toml.validate()?;
                RunConfig::from_toml(&toml)?
            }
            None => RunConfig::default(),
        };

        if !self.fields.is_empty() {
            config.fields = self.fields.clone();
        }
        if let Some(shape) = self.shape {
            config.shape = shape;
        }
        if let Some(metric) = &self.default_metric {
            config.default_metric = metric.clone();
        }
        if let Some(output) = &self.output {
            config.output = output.clone();
        }
        if let Some(format) = &self.format {
            config.format = format.parse::<OutputFormat>()?;
        }
        if let Some(high_water_mark) = self.high_water_mark {
            config.stream = StreamOptions::with_high_water_mark(high_water_mark)?;
        }
        if let Some(placeholder) = &self.unset_placeholder {
            config.unset_placeholder = placeholder.clone();
        }
        config.input = self.input.clone();

        Ok(config)
    }
}

impl Validate for CliConfig {
    fn validate(&self) -> Result<()> {
        // 沒有配置檔時必須在命令列指定欄位；全域聚合需透過配置檔設定空的欄位清單
        if self.config.is_none() && self.fields.is_empty() {
            return Err(FlattenError::MissingConfigError {
                field: "fields".to_string(),
            });
        }
        if let Some(format) = &self.format {
            format.parse::<OutputFormat>()?;
        }
        if self.high_water_mark == Some(0) {
            return Err(FlattenError::InvalidConfigValueError {
                field: "high_water_mark".to_string(),
                value: "0".to_string(),
                reason: "Value must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
