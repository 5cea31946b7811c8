//! 리스크 엔진 에러 타입.

use thiserror::Error;
use trader_core::RepositoryError;

use crate::config::ConfigValidationError;

/// 리스크 엔진 에러.
#[derive(Debug, Error)]
pub enum RiskError {
    /// 잘못된 설정
    #[error(transparent)]
    Config(#[from] ConfigValidationError),

    /// 리스크 이벤트 저장 실패
    #[error("Risk event persistence failed: {0}")]
    Repository(#[from] RepositoryError),

    /// 존재하지 않는 규칙
    #[error("Risk rule not found: {0}")]
    RuleNotFound(uuid::Uuid),
}

/// 리스크 작업 Result 타입.
pub type RiskResult<T> = Result<T, RiskError>;
