#[cfg(feature = "cli")]
pub mod cli;
pub mod toml_config;

use crate::core::stage::StreamOptions;
use crate::domain::model::{DecompositionShape, DEFAULT_METRIC};
use crate::domain::ports::ConfigProvider;
use crate::utils::error::{FlattenError, Result};
use crate::utils::validation::{validate_field_names, Validate};
use std::str::FromStr;
use toml_config::TomlConfig;

/// 標準輸入/輸出的路徑記號
pub const STDIO: &str = "-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    JsonLines,
    Csv,
}

impl FromStr for OutputFormat {
    type Err = FlattenError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "jsonl" | "json" => Ok(OutputFormat::JsonLines),
            "csv" => Ok(OutputFormat::Csv),
            other => Err(FlattenError::InvalidConfigValueError {
                field: "output.format".to_string(),
                value: other.to_string(),
                reason: "Unsupported format. Valid formats: jsonl, csv".to_string(),
            }),
        }
    }
}

/// 合併 TOML 與命令列之後、實際執行用的配置
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub fields: Vec<String>,
    pub default_metric: String,
    pub shape: DecompositionShape,
    pub stream: StreamOptions,
    pub input: String,
    pub output: String,
    pub format: OutputFormat,
    pub unset_placeholder: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            fields: Vec::new(),
            default_metric: DEFAULT_METRIC.to_string(),
            shape: DecompositionShape::default(),
            stream: StreamOptions::default(),
            input: STDIO.to_string(),
            output: STDIO.to_string(),
            format: OutputFormat::default(),
            unset_placeholder: String::new(),
        }
    }
}

impl RunConfig {
    pub fn from_toml(config: &TomlConfig) -> Result<Self> {
        let output = config.output();
        let format = match output.format.as_deref() {
            Some(format) => format.parse()?,
            None => OutputFormat::default(),
        };

        Ok(Self {
            fields: config.fields().to_vec(),
            default_metric: config.default_metric().to_string(),
            shape: config.shape(),
            stream: config.stream_options()?,
            output: output.path.unwrap_or_else(|| STDIO.to_string()),
            format,
            unset_placeholder: output.unset_placeholder.unwrap_or_default(),
            ..Self::default()
        })
    }
}

impl ConfigProvider for RunConfig {
    fn fields(&self) -> &[String] {
        &self.fields
    }

    fn default_metric(&self) -> &str {
        &self.default_metric
    }

    fn shape(&self) -> DecompositionShape {
        self.shape
    }
}

impl Validate for RunConfig {
    fn validate(&self) -> Result<()> {
        validate_field_names("fields", &self.fields)?;
        StreamOptions::with_high_water_mark(self.stream.high_water_mark)?;
        Ok(())
    }
}
