//! 실행 어댑터 추상화.
//!
//! `ExecutionAdapter`는 거래 장소(실거래소 또는 시뮬레이션)를 추상화합니다.
//! 실행 코어는 이 계약만 사용하며, 구현체는 여러 태스크에서 `Arc`로
//! 공유되므로 모든 메서드는 `&self`를 받습니다.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use trader_core::{AccountInfo, MarketData, Order, OrderChanges, OrderStatusType, Price, Quantity};

use crate::ExchangeError;

/// 어댑터 작업 Result 타입.
pub type ExchangeResult<T> = Result<T, ExchangeError>;

/// 주문 제출 결과.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitResult {
    /// 접수 성공 여부
    pub success: bool,
    /// 거래소 주문 ID
    pub external_id: Option<String>,
    /// 거래소 메시지
    pub message: String,
    /// 거부 사유 코드
    pub error_code: Option<String>,
}

impl SubmitResult {
    /// 접수 성공.
    pub fn accepted(external_id: impl Into<String>) -> Self {
        Self {
            success: true,
            external_id: Some(external_id.into()),
            message: "accepted".to_string(),
            error_code: None,
        }
    }

    /// 거부.
    pub fn rejected(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            external_id: None,
            message: message.into(),
            error_code: Some(error_code.into()),
        }
    }
}

/// 거래소가 보고하는 주문 상태.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalOrderStatus {
    /// 거래소 주문 ID
    pub external_id: String,
    /// 거래소 측 상태
    pub status: OrderStatusType,
    /// 누적 체결 수량
    pub filled_quantity: Quantity,
    /// 누적 평균 체결 가격
    pub average_price: Option<Price>,
    /// 누적 수수료
    pub commission: Decimal,
    /// 마지막 갱신 시각
    pub updated_at: DateTime<Utc>,
}

/// 거래소가 보고하는 포지션.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalPosition {
    pub symbol: String,
    /// 부호 있는 수량 (롱 +, 숏 -)
    pub quantity: Decimal,
    pub average_cost: Price,
    pub market_value: Decimal,
    pub unrealized_pnl: Decimal,
}

/// 거래 장소 어댑터.
#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    /// 어댑터 이름.
    fn name(&self) -> &str;

    /// 연결 상태.
    async fn is_connected(&self) -> bool;

    /// 연결을 시도하고 성공 여부를 반환합니다.
    async fn connect(&self) -> bool;

    /// 연결을 해제합니다.
    async fn disconnect(&self);

    /// 주문을 제출합니다. 거래소 거부는 `Ok(SubmitResult { success: false, .. })`,
    /// 통신 실패는 `Err`입니다.
    async fn submit_order(&self, order: &Order) -> ExchangeResult<SubmitResult>;

    /// 주문 취소. 거래소가 취소를 확인하면 `true`.
    async fn cancel_order(&self, order: &Order) -> ExchangeResult<bool>;

    /// 주문 정정. 거래소가 정정을 확인하면 `true`.
    async fn modify_order(&self, order: &Order, changes: &OrderChanges) -> ExchangeResult<bool>;

    /// 주문 상태 조회. 거래소가 모르는 주문이면 `None`.
    async fn get_order_status(&self, external_id: &str) -> ExchangeResult<Option<ExternalOrderStatus>>;

    /// 계좌 정보 조회.
    async fn get_account_info(&self) -> ExchangeResult<AccountInfo>;

    /// 포지션 조회.
    async fn get_positions(&self) -> ExchangeResult<Vec<ExternalPosition>> {
        Ok(vec![])
    }

    /// 심볼 시세 조회.
    async fn get_market_data(&self, symbol: &str) -> ExchangeResult<MarketData>;
}
