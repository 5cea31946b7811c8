//! 알림 타입 및 trait 정의.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use trader_core::{OrderStatusType, RiskEventType, RiskLevel, Side, UserId};
use uuid::Uuid;

/// 알림 우선순위 레벨.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPriority {
    /// 낮은 우선순위 (정보성)
    Low,
    /// 일반 우선순위 (일반 업데이트)
    #[default]
    Normal,
    /// 높은 우선순위 (중요 이벤트)
    High,
    /// 긴급 우선순위 (즉시 대응 필요)
    Critical,
}

impl From<RiskLevel> for NotificationPriority {
    fn from(level: RiskLevel) -> Self {
        match level {
            RiskLevel::Low => Self::Normal,
            RiskLevel::Medium => Self::High,
            RiskLevel::High | RiskLevel::Critical => Self::Critical,
        }
    }
}

/// 알림 이벤트 타입.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationEvent {
    /// 주문 상태 변경
    OrderStatusChanged {
        order_id: Uuid,
        symbol: String,
        old_status: OrderStatusType,
        new_status: OrderStatusType,
    },
    /// 주문 체결 (부분 체결 포함)
    OrderFilled {
        order_id: Uuid,
        symbol: String,
        side: Side,
        quantity: Decimal,
        price: Decimal,
        filled_quantity: Decimal,
        remaining_quantity: Decimal,
    },
    /// 주문 거부
    OrderRejected {
        order_id: Uuid,
        symbol: String,
        reason: String,
    },
    /// 주문 취소
    OrderCancelled {
        order_id: Uuid,
        symbol: String,
        reason: String,
    },
    /// 리스크 경고
    RiskAlert {
        order_id: Option<Uuid>,
        event_type: RiskEventType,
        level: RiskLevel,
        message: String,
    },
    /// 실행 진행률 (0 ~ 1)
    ExecutionProgress {
        order_id: Uuid,
        symbol: String,
        fraction: Decimal,
    },
    /// 실행 오류
    ExecutionError {
        order_id: Uuid,
        symbol: String,
        message: String,
    },
    /// 사용자 정의 알림
    Custom { title: String, message: String },
}

impl NotificationEvent {
    /// 이벤트 종류 이름.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::OrderStatusChanged { .. } => "order_status_changed",
            Self::OrderFilled { .. } => "order_filled",
            Self::OrderRejected { .. } => "order_rejected",
            Self::OrderCancelled { .. } => "order_cancelled",
            Self::RiskAlert { .. } => "risk_alert",
            Self::ExecutionProgress { .. } => "execution_progress",
            Self::ExecutionError { .. } => "execution_error",
            Self::Custom { .. } => "custom",
        }
    }

    /// 관련 주문 ID.
    pub fn order_id(&self) -> Option<Uuid> {
        match self {
            Self::OrderStatusChanged { order_id, .. }
            | Self::OrderFilled { order_id, .. }
            | Self::OrderRejected { order_id, .. }
            | Self::OrderCancelled { order_id, .. }
            | Self::ExecutionProgress { order_id, .. }
            | Self::ExecutionError { order_id, .. } => Some(*order_id),
            Self::RiskAlert { order_id, .. } => *order_id,
            Self::Custom { .. } => None,
        }
    }
}

/// 알림 메시지.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// 고유 알림 ID
    pub id: Uuid,
    /// 수신 사용자
    pub user_id: UserId,
    /// 알림 이벤트
    pub event: NotificationEvent,
    /// 우선순위 레벨
    pub priority: NotificationPriority,
    /// 타임스탬프
    pub timestamp: DateTime<Utc>,
    /// 추가 메타데이터
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Notification {
    /// 새 알림을 생성합니다.
    pub fn new(user_id: UserId, event: NotificationEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            event,
            priority: NotificationPriority::Normal,
            timestamp: Utc::now(),
            metadata: serde_json::Value::Null,
        }
    }

    /// 우선순위 레벨을 설정합니다.
    pub fn with_priority(mut self, priority: NotificationPriority) -> Self {
        self.priority = priority;
        self
    }

    /// 메타데이터를 설정합니다.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// 알림 작업용 Result 타입.
pub type NotificationResult<T> = Result<T, NotificationError>;

/// 알림 에러.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("Failed to send notification: {0}")]
    SendFailed(String),

    #[error("Invalid notifier configuration: {0}")]
    InvalidConfig(String),

    #[error("Rate limited, retry after {0}s")]
    RateLimited(u64),

    #[error("Notification dispatcher is closed")]
    ChannelClosed,

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// 알림 전송기 trait.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// 알림을 전송합니다.
    async fn send(&self, notification: &Notification) -> NotificationResult<()>;

    /// 전송기가 활성화되어 있는지 확인합니다.
    fn is_enabled(&self) -> bool;

    /// 전송기 이름을 반환합니다.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_from_risk_level() {
        assert_eq!(NotificationPriority::from(RiskLevel::Low), NotificationPriority::Normal);
        assert_eq!(NotificationPriority::from(RiskLevel::Medium), NotificationPriority::High);
        assert_eq!(NotificationPriority::from(RiskLevel::Critical), NotificationPriority::Critical);
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let event = NotificationEvent::Custom {
            title: "t".to_string(),
            message: "m".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "custom");
        assert_eq!(event.kind(), "custom");
        assert!(event.order_id().is_none());
    }
}
