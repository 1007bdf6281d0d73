//! 配置解析模块
//!
//! 支持 TOML (主要) 和 JSON 格式。

use contracts::{ContractError, PushConfig};

/// 配置文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// TOML 格式 (推荐)
    Toml,
    /// JSON 格式
    Json,
}

impl ConfigFormat {
    /// 从文件扩展名推断格式
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// 解析 TOML 格式配置
pub fn parse_toml(content: &str) -> Result<PushConfig, ContractError> {
    toml::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("TOML parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

/// 解析 JSON 格式配置
pub fn parse_json(content: &str) -> Result<PushConfig, ContractError> {
    serde_json::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("JSON parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

/// 根据格式解析配置
pub fn parse(content: &str, format: ConfigFormat) -> Result<PushConfig, ContractError> {
    match format {
        ConfigFormat::Toml => parse_toml(content),
        ConfigFormat::Json => parse_json(content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_toml_partial() {
        let content = r#"
vgroup_id = 3
worker_count = 8
poll_timeout_ms = 1500
"#;
        let config = parse_toml(content).unwrap();
        assert_eq!(config.vgroup_id, 3);
        assert_eq!(config.worker_count, 8);
        assert_eq!(config.poll_timeout_ms, 1500);
        assert_eq!(config.queue_capacity, PushConfig::default().queue_capacity);
    }

    #[test]
    fn test_parse_empty_is_default() {
        let config = parse_toml("").unwrap();
        assert_eq!(config.worker_count, PushConfig::default().worker_count);
    }

    #[test]
    fn test_parse_json() {
        let content = r#"{ "queue_capacity": 64, "max_handles": 16 }"#;
        let config = parse_json(content).unwrap();
        assert_eq!(config.queue_capacity, 64);
        assert_eq!(config.max_handles, 16);
    }

    #[test]
    fn test_parse_toml_syntax_error() {
        let err = parse_toml("worker_count = [[[").unwrap_err();
        assert!(matches!(err, ContractError::ConfigParse { .. }));
    }

    #[test]
    fn test_parse_wrong_type() {
        let err = parse_toml("worker_count = \"four\"").unwrap_err();
        assert!(err.to_string().contains("TOML parse error"));
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ConfigFormat::from_extension("toml"), Some(ConfigFormat::Toml));
        assert_eq!(ConfigFormat::from_extension("TOML"), Some(ConfigFormat::Toml));
        assert_eq!(ConfigFormat::from_extension("json"), Some(ConfigFormat::Json));
        assert_eq!(ConfigFormat::from_extension("yaml"), None);
    }
}
