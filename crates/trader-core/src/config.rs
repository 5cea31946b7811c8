//! 설정 로딩.
//!
//! 설정은 계층적으로 로드됩니다:
//! 1. 각 섹션 구조체의 `Default` (`#[serde(default)]`)
//! 2. 설정 파일 (TOML 등, 선택)
//! 3. `TRADER__SECTION__KEY` 형식의 환경 변수

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::logging::{LogConfig, LogFormat};

/// 기본 설정 파일 경로.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// 환경 변수 접두사.
pub const ENV_PREFIX: &str = "TRADER";

/// 로깅 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 로그 레벨
    pub level: String,
    /// 로그 형식 (pretty, json, compact)
    pub format: String,
    /// span 진입/종료 이벤트 포함 여부
    pub span_events: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            span_events: false,
        }
    }
}

impl LoggingConfig {
    /// 로깅 초기화용 설정으로 변환합니다. 알 수 없는 형식은 pretty로 처리합니다.
    pub fn to_log_config(&self) -> LogConfig {
        let format = self.format.parse().unwrap_or(LogFormat::Pretty);
        LogConfig::new(self.level.clone())
            .with_format(format)
            .with_span_events(self.span_events)
    }
}

/// 파일(선택)과 환경 변수에서 설정을 로드합니다.
///
/// `path`가 주어졌지만 파일이 없으면 에러입니다.
pub fn load_layered<T: DeserializeOwned>(path: Option<&Path>) -> Result<T, config::ConfigError> {
    let mut builder = config::Config::builder();

    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path));
    }

    let config = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()?;
    config.try_deserialize()
}

/// 기본 경로의 설정 파일이 있으면 함께 로드합니다.
pub fn load_default<T: DeserializeOwned>() -> Result<T, config::ConfigError> {
    let path = Path::new(DEFAULT_CONFIG_PATH);
    if path.exists() {
        load_layered(Some(path))
    } else {
        load_layered(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Deserialize)]
    #[serde(default)]
    struct Sample {
        logging: LoggingConfig,
    }

    #[test]
    fn test_defaults_without_sources() {
        let sample: Sample = load_layered(None).unwrap();
        assert_eq!(sample.logging.level, "info");
        assert_eq!(sample.logging.to_log_config().format, LogFormat::Pretty);
    }

    #[test]
    fn test_unknown_format_falls_back_to_pretty() {
        let logging = LoggingConfig {
            format: "fancy".to_string(),
            ..Default::default()
        };
        assert_eq!(logging.to_log_config().format, LogFormat::Pretty);

        let logging = LoggingConfig {
            format: "json".to_string(),
            ..Default::default()
        };
        assert_eq!(logging.to_log_config().format, LogFormat::Json);
    }
}
