use crate::core::stage::{StreamOptions, StreamOverrides};
use crate::domain::model::{DecompositionShape, DEFAULT_METRIC};
use crate::domain::ports::ConfigProvider;
use crate::utils::error::{FlattenError, Result};
use crate::utils::validation::{validate_field_names, validate_one_of, Validate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const OUTPUT_FORMATS: [&str; 2] = ["jsonl", "csv"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    pub flatten: FlattenSection,
    pub stream: Option<StreamOverrides>,
    pub output: Option<OutputSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlattenSection {
    pub fields: Vec<String>,
    pub default_metric: Option<String>,
    pub shape: Option<DecompositionShape>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputSection {
    pub format: Option<String>,
    pub path: Option<String>,
    pub unset_placeholder: Option<String>,
}

impl TomlConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;
        Ok(toml::from_str(&processed_content)?)
    }

    /// 替換環境變數 (例如 ${FLATTEN_FIELDS})，未定義的保留原樣
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}]+)\}")
            .map_err(|e| FlattenError::config(format!("invalid env var pattern: {}", e)))?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn stream_options(&self) -> Result<StreamOptions> {
        StreamOptions::from_overrides(&self.stream.clone().unwrap_or_default())
    }

    pub fn output(&self) -> OutputSection {
        self.output.clone().unwrap_or_default()
    }
}

impl ConfigProvider for TomlConfig {
    fn fields(&self) -> &[String] {
        &self.flatten.fields
    }

    fn default_metric(&self) -> &str {
        self.flatten.default_metric.as_deref().unwrap_or(DEFAULT_METRIC)
    }

    fn shape(&self) -> DecompositionShape {
        self.flatten.shape.unwrap_or_default()
    }
}

impl Validate for TomlConfig {
    fn validate(&self) -> Result<()> {
        validate_field_names("flatten.fields", &self.flatten.fields)?;
        self.stream_options()?;
        if let Some(format) = self.output().format {
            validate_one_of("output.format", &format, &OUTPUT_FORMATS)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::stage::DEFAULT_HIGH_WATER_MARK;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_basic_toml_config() {
        let toml_content = r#"
[flatten]
fields = ["region", "status"]
default_metric = "count"
shape = "nested"

[stream]
high_water_mark = 4

[output]
format = "csv"
unset_placeholder = "-"
"#;

        let config = TomlConfig::from_toml_str(toml_content).unwrap();

        assert_eq!(config.fields(), ["region", "status"]);
        assert_eq!(config.default_metric(), "count");
        assert_eq!(config.shape(), DecompositionShape::Nested);
        assert_eq!(config.stream_options().unwrap().high_water_mark, 4);
        assert_eq!(config.output().unset_placeholder.as_deref(), Some("-"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults_when_sections_missing() {
        let config = TomlConfig::from_toml_str("[flatten]\nfields = []\n").unwrap();

        assert_eq!(config.default_metric(), DEFAULT_METRIC);
        assert_eq!(config.shape(), DecompositionShape::Points);
        assert_eq!(config.stream_options().unwrap().high_water_mark, DEFAULT_HIGH_WATER_MARK);
        assert!(config.output().format.is_none());
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("TEST_FLATTEN_METRIC", "latency_ms");

        let toml_content = r#"
[flatten]
fields = ["host"]
default_metric = "${TEST_FLATTEN_METRIC}"
"#;

        let config = TomlConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.default_metric(), "latency_ms");

        std::env::remove_var("TEST_FLATTEN_METRIC");
    }

    #[test]
    fn test_config_validation() {
        let duplicated = TomlConfig::from_toml_str(
            "[flatten]\nfields = [\"region\", \"region\"]\n",
        )
        .unwrap();
        assert!(duplicated.validate().is_err());

        let byte_mode = TomlConfig::from_toml_str(
            "[flatten]\nfields = [\"region\"]\n[stream]\nobject_mode = false\n",
        )
        .unwrap();
        assert!(byte_mode.validate().is_err());

        let bad_format = TomlConfig::from_toml_str(
            "[flatten]\nfields = [\"region\"]\n[output]\nformat = \"xml\"\n",
        )
        .unwrap();
        assert!(bad_format.validate().is_err());
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[flatten]\nfields = [\"region\"]\n")
            .unwrap();

        let config = TomlConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.fields(), ["region"]);
    }
}
