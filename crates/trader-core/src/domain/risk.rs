//! 리스크 규칙, 리스크 이벤트, 리스크 제어 액션.

use crate::types::{Quantity, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 리스크 심각도. 순서대로 심각해집니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "LOW"),
            RiskLevel::Medium => write!(f, "MEDIUM"),
            RiskLevel::High => write!(f, "HIGH"),
            RiskLevel::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// 리스크 제어 액션 유형.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskActionType {
    /// 주문 거부
    Reject,
    /// 안전 수량으로 축소
    ReduceSize,
    /// 증거금 부족 경고
    MarginCall,
    /// 신규 거래 정지
    SuspendTrading,
    /// 거래 재개
    ResumeTrading,
    /// 특정 포지션 강제 청산
    ForceClosePosition,
    /// 전체 포지션 청산
    Liquidation,
}

impl RiskActionType {
    /// 실시간 모니터 액션의 단계 (높을수록 심각).
    pub fn escalation(&self) -> u8 {
        match self {
            RiskActionType::Reject | RiskActionType::ReduceSize | RiskActionType::ResumeTrading => 0,
            RiskActionType::MarginCall => 1,
            RiskActionType::SuspendTrading => 2,
            RiskActionType::ForceClosePosition => 3,
            RiskActionType::Liquidation => 4,
        }
    }
}

impl std::fmt::Display for RiskActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RiskActionType::Reject => "REJECT",
            RiskActionType::ReduceSize => "REDUCE_SIZE",
            RiskActionType::MarginCall => "MARGIN_CALL",
            RiskActionType::SuspendTrading => "SUSPEND_TRADING",
            RiskActionType::ResumeTrading => "RESUME_TRADING",
            RiskActionType::ForceClosePosition => "FORCE_CLOSE_POSITION",
            RiskActionType::Liquidation => "LIQUIDATION",
        };
        write!(f, "{}", s)
    }
}

/// 리스크 엔진이 제안하거나 실행을 요청하는 액션.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskControlAction {
    pub action_type: RiskActionType,
    pub user_id: UserId,
    /// 대상 심볼 (포지션 단위 액션)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    /// 제안 수량 (축소 후 안전 수량 또는 청산 수량)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<Quantity>,
    pub level: RiskLevel,
    pub reason: String,
}

impl RiskControlAction {
    /// 새 액션을 생성합니다.
    pub fn new(action_type: RiskActionType, user_id: UserId, level: RiskLevel, reason: impl Into<String>) -> Self {
        Self {
            action_type,
            user_id,
            symbol: None,
            quantity: None,
            level,
            reason: reason.into(),
        }
    }

    /// 주문 거부.
    pub fn reject(user_id: UserId, level: RiskLevel, reason: impl Into<String>) -> Self {
        Self::new(RiskActionType::Reject, user_id, level, reason)
    }

    /// 안전 수량으로 축소.
    pub fn reduce_size(user_id: UserId, safe_quantity: Quantity, level: RiskLevel, reason: impl Into<String>) -> Self {
        Self::new(RiskActionType::ReduceSize, user_id, level, reason).with_quantity(safe_quantity)
    }

    /// 대상 심볼을 설정합니다.
    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    /// 수량을 설정합니다.
    pub fn with_quantity(mut self, quantity: Quantity) -> Self {
        self.quantity = Some(quantity);
        self
    }
}

/// 사용자 정의 리스크 규칙 유형.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskRuleType {
    /// 주문당 최대 수량
    MaxOrderQuantity,
    /// 주문당 최대 금액
    MaxOrderValue,
    /// 체결 후 최대 보유 수량
    MaxPositionQuantity,
    /// 당일 최대 손실 (절대값)
    MaxDailyLoss,
    /// 거래 금지 심볼
    BlockSymbol,
}

/// 사용자 정의 리스크 규칙.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskRule {
    pub id: Uuid,
    pub user_id: UserId,
    pub name: String,
    pub rule_type: RiskRuleType,
    /// 적용 심볼 (없으면 전체)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    /// 임계값
    pub value: Decimal,
    /// 위반 시 제안 액션 (Reject 또는 ReduceSize)
    pub action: RiskActionType,
    pub level: RiskLevel,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl RiskRule {
    /// 새 규칙을 생성합니다. 기본 액션은 거부, 심각도는 High입니다.
    pub fn new(user_id: UserId, name: impl Into<String>, rule_type: RiskRuleType, value: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            name: name.into(),
            rule_type,
            symbol: None,
            value,
            action: RiskActionType::Reject,
            level: RiskLevel::High,
            active: true,
            created_at: Utc::now(),
        }
    }

    /// 심볼 범위를 설정합니다.
    pub fn for_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    /// 위반 시 액션을 설정합니다.
    pub fn with_action(mut self, action: RiskActionType) -> Self {
        self.action = action;
        self
    }

    /// 심각도를 설정합니다.
    pub fn with_level(mut self, level: RiskLevel) -> Self {
        self.level = level;
        self
    }

    /// 주어진 심볼에 적용되는지 확인합니다.
    pub fn applies_to(&self, symbol: &str) -> bool {
        self.active && self.symbol.as_deref().map_or(true, |s| s == symbol)
    }
}

/// 리스크 이벤트 유형.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskEventType {
    /// 사전 검사 실패
    PreTradeRejected,
    /// 증거금 경고
    MarginCall,
    /// 일일 손실 한도 초과
    DailyLossLimit,
    /// 포지션 집중도 초과
    Concentration,
    /// 강제 청산 실행
    ForceClose,
    /// 전체 청산 실행
    Liquidation,
    /// 거래 정지
    TradingSuspended,
    /// 거래 재개
    TradingResumed,
    /// 손절/익절 트리거
    StopTriggered,
}

/// 발생한 리스크 검사/액션의 불변 기록. 해소 표시만 변경됩니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskEvent {
    pub id: Uuid,
    pub user_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    pub event_type: RiskEventType,
    pub level: RiskLevel,
    pub message: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl RiskEvent {
    /// 새 이벤트를 생성합니다.
    pub fn new(user_id: UserId, event_type: RiskEventType, level: RiskLevel, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            order_id: None,
            symbol: None,
            event_type,
            level,
            message: message.into(),
            payload: serde_json::Value::Null,
            resolved: false,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    /// 관련 주문을 설정합니다.
    pub fn with_order(mut self, order_id: Uuid) -> Self {
        self.order_id = Some(order_id);
        self
    }

    /// 관련 심볼을 설정합니다.
    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    /// 부가 데이터를 설정합니다.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// 해소 처리합니다. 이미 해소된 경우 아무것도 하지 않습니다.
    pub fn resolve(&mut self) {
        if !self.resolved {
            self.resolved = true;
            self.resolved_at = Some(Utc::now());
        }
    }
}
