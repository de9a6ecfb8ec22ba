use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlattenError {
    #[error("Malformed decomposition input: {message}")]
    MalformedInput { message: String },

    #[error("Downstream of stage '{stage}' rejected further records")]
    DownstreamRejected { stage: String },

    #[error("Upstream of stage '{stage}' aborted: {reason}")]
    UpstreamAborted { stage: String, reason: String },

    #[error("Stage '{stage}' no longer accepts input")]
    StageClosed { stage: String },

    #[error("Stage '{stage}' task failed: {details}")]
    StageJoinError { stage: String, details: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },
}

/// 錯誤分類，用於日誌與退出碼
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Input,
    Pipeline,
    Configuration,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl FlattenError {
    pub fn malformed(message: impl Into<String>) -> Self {
        FlattenError::MalformedInput {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        FlattenError::ConfigError {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            FlattenError::MalformedInput { .. } | FlattenError::SerializationError(_) => {
                ErrorCategory::Input
            }
            FlattenError::DownstreamRejected { .. }
            | FlattenError::UpstreamAborted { .. }
            | FlattenError::StageClosed { .. }
            | FlattenError::StageJoinError { .. } => ErrorCategory::Pipeline,
            FlattenError::ConfigError { .. }
            | FlattenError::InvalidConfigValueError { .. }
            | FlattenError::MissingConfigError { .. }
            | FlattenError::TomlError(_) => ErrorCategory::Configuration,
            FlattenError::IoError(_) | FlattenError::CsvError(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Input => ErrorSeverity::High,
            ErrorCategory::Configuration => ErrorSeverity::High,
            ErrorCategory::Pipeline => ErrorSeverity::Medium,
            ErrorCategory::System => ErrorSeverity::Critical,
        }
    }

    /// 給終端使用者看的簡短訊息
    pub fn user_friendly_message(&self) -> String {
        match self {
            FlattenError::MalformedInput { message } => {
                format!("輸入資料格式錯誤: {}", message)
            }
            FlattenError::DownstreamRejected { .. } => {
                "輸出端已關閉，無法繼續寫入記錄".to_string()
            }
            FlattenError::UpstreamAborted { reason, .. } => {
                format!("上游資料流中止: {}", reason)
            }
            FlattenError::InvalidConfigValueError { field, reason, .. } => {
                format!("配置欄位 '{}' 無效: {}", field, reason)
            }
            FlattenError::MissingConfigError { field } => {
                format!("缺少必要配置: {}", field)
            }
            other => other.to_string(),
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Input => {
                "Check that the aggregator's decomposition fields match the configured fields"
            }
            ErrorCategory::Pipeline => "Check the downstream consumer and re-run the pipeline",
            ErrorCategory::Configuration => "Fix the configuration file or command-line flags",
            ErrorCategory::System => "Check file paths and permissions",
        }
    }
}

pub type Result<T> = std::result::Result<T, FlattenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_input_is_high_severity() {
        let err = FlattenError::malformed("unknown field 'zone'");
        assert_eq!(err.category(), ErrorCategory::Input);
        assert_eq!(err.severity(), ErrorSeverity::High);
        assert!(err.to_string().contains("unknown field 'zone'"));
    }

    #[test]
    fn test_pipeline_errors_are_medium_severity() {
        let err = FlattenError::DownstreamRejected {
            stage: "flatten".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::Pipeline);
        assert_eq!(err.severity(), ErrorSeverity::Medium);
        assert!(err.to_string().contains("flatten"));
    }
}
