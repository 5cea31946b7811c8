//! 주문 실행 코어의 에러 타입.
//!
//! 상위 에러 `TraderError`는 실행 계층에서 호출자에게 전달되는 분류 체계이며,
//! 각 도메인 모듈(포지션, 상태 머신, 저장소)은 자체 에러를 정의하고
//! `#[from]`으로 변환됩니다.

use thiserror::Error;
use uuid::Uuid;

use crate::domain::{OrderStatusType, PositionError};
use crate::repository::RepositoryError;

/// 핵심 트레이딩 에러.
#[derive(Debug, Error)]
pub enum TraderError {
    /// 잘못된 주문 파라미터. 주문은 생성되지 않습니다.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// 실행 어댑터에 연결할 수 없음. 주문은 PENDING 상태로 보류됩니다.
    #[error("Execution adapter not connected (order {order_id} held as pending)")]
    NotConnected { order_id: Uuid },

    /// 자금 부족으로 사전 검사 실패
    #[error("Insufficient funds for order {order_id}: {reason}")]
    InsufficientFunds { order_id: Uuid, reason: String },

    /// 리스크 사전 검사 거부
    #[error("Risk check rejected order {order_id}: {reason}")]
    RiskRejection { order_id: Uuid, reason: String },

    /// 어댑터가 주문을 거부함
    #[error("Adapter rejected order {order_id}: {reason}")]
    AdapterRejection { order_id: Uuid, reason: String },

    /// 모니터링 중 일시적 실행 실패
    #[error("Execution error: {0}")]
    Execution(String),

    /// 포지션 동시 변경 충돌 (재시도 후에도 해소되지 않음)
    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    /// 상태 머신이 허용하지 않는 전이
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition {
        from: OrderStatusType,
        to: OrderStatusType,
    },

    /// 주문을 찾을 수 없음
    #[error("Order not found: {0}")]
    OrderNotFound(Uuid),

    /// 포지션 에러
    #[error(transparent)]
    Position(#[from] PositionError),

    /// 저장소 에러
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// 설정 에러
    #[error("Configuration error: {0}")]
    Config(String),

    /// 직렬화 에러
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// 내부 에러
    #[error("Internal error: {0}")]
    Internal(String),
}

/// 트레이딩 작업을 위한 Result 타입.
pub type TraderResult<T> = Result<T, TraderError>;

impl TraderError {
    /// 재시도 가능한 에러인지 확인합니다.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TraderError::NotConnected { .. }
                | TraderError::Execution(_)
                | TraderError::ConcurrencyConflict(_)
        )
    }

    /// 치명적인 에러인지 확인합니다.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            TraderError::Internal(_) | TraderError::Config(_)
        )
    }

    /// 사전 검사 단계의 거부인지 확인합니다 (자동 재시도 대상 아님).
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            TraderError::InsufficientFunds { .. }
                | TraderError::RiskRejection { .. }
                | TraderError::AdapterRejection { .. }
        )
    }

    /// 에러와 연관된 주문 ID를 반환합니다.
    pub fn order_id(&self) -> Option<Uuid> {
        match self {
            TraderError::NotConnected { order_id }
            | TraderError::InsufficientFunds { order_id, .. }
            | TraderError::RiskRejection { order_id, .. }
            | TraderError::AdapterRejection { order_id, .. } => Some(*order_id),
            TraderError::OrderNotFound(id) => Some(*id),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for TraderError {
    fn from(err: serde_json::Error) -> Self {
        TraderError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        let err = TraderError::NotConnected { order_id: Uuid::new_v4() };
        assert!(err.is_retryable());

        let err = TraderError::Validation("quantity must be positive".to_string());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_rejection_carries_order_id() {
        let id = Uuid::new_v4();
        let err = TraderError::RiskRejection {
            order_id: id,
            reason: "concentration".to_string(),
        };
        assert!(err.is_rejection());
        assert!(!err.is_critical());
        assert_eq!(err.order_id(), Some(id));
    }
}
