//! 주문 타입 및 엔티티.
//!
//! 이 모듈은 주문 실행 코어의 주문 관련 타입을 정의합니다:
//! - `Side` - 주문 방향 (매수/매도)
//! - `OrderType` - 주문 유형 (시장가, 지정가, 스톱, 알고리즘 주문 등)
//! - `OrderStatusType` - 주문 상태
//! - `TimeInForce` - 주문 유효 기간
//! - `OrderRequest` - 주문 요청
//! - `Order` - 주문 엔티티
//! - `OrderFill` - 불변 체결 기록
//!
//! 상태 전이와 체결 적용은 `state_machine` 모듈에 있습니다.

use crate::error::{TraderError, TraderResult};
use crate::types::{Price, Quantity, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 주문 방향 (매수 또는 매도).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// 매수
    Buy,
    /// 매도
    Sell,
}

impl Side {
    /// 반대 방향을 반환합니다.
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// 포지션 수량 부호 (매수 +1, 매도 -1).
    pub fn sign(&self) -> Decimal {
        match self {
            Side::Buy => Decimal::ONE,
            Side::Sell => Decimal::NEGATIVE_ONE,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// 주문 유형.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    /// 시장가 주문 - 현재 시장 가격으로 체결
    Market,
    /// 지정가 주문
    Limit,
    /// 스톱 주문 - 트리거 후 시장가
    Stop,
    /// 스톱 지정가 주문 - 트리거 후 지정가 규칙 적용
    StopLimit,
    /// 트레일링 스톱 주문
    TrailingStop,
    /// 빙산 주문 - 표시 수량 단위로 분할 체결
    Iceberg,
    /// 시간 가중 평균 가격 분할 주문
    Twap,
    /// 거래량 가중 평균 가격 분할 주문
    Vwap,
}

impl OrderType {
    /// 모든 주문 유형.
    pub const ALL: [OrderType; 8] = [
        OrderType::Market,
        OrderType::Limit,
        OrderType::Stop,
        OrderType::StopLimit,
        OrderType::TrailingStop,
        OrderType::Iceberg,
        OrderType::Twap,
        OrderType::Vwap,
    ];
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
            OrderType::Stop => write!(f, "STOP"),
            OrderType::StopLimit => write!(f, "STOP_LIMIT"),
            OrderType::TrailingStop => write!(f, "TRAILING_STOP"),
            OrderType::Iceberg => write!(f, "ICEBERG"),
            OrderType::Twap => write!(f, "TWAP"),
            OrderType::Vwap => write!(f, "VWAP"),
        }
    }
}

/// 주문 상태 유형.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatusType {
    /// 주문 생성됨 (아직 제출되지 않음)
    Pending,
    /// 어댑터에 제출됨
    Submitted,
    /// 거래소가 접수함
    Accepted,
    /// 부분 체결됨
    PartiallyFilled,
    /// 전량 체결됨
    Filled,
    /// 취소됨
    Cancelled,
    /// 거부됨
    Rejected,
    /// 유효 기간 만료
    Expired,
    /// 거래 정지로 일시 중단됨
    Suspended,
}

impl OrderStatusType {
    /// 주문이 최종 상태인지 확인합니다.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            OrderStatusType::Filled
                | OrderStatusType::Cancelled
                | OrderStatusType::Rejected
                | OrderStatusType::Expired
        )
    }

    /// 최종 상태가 아닌 모든 상태.
    pub fn is_active(&self) -> bool {
        !self.is_final()
    }

    /// 거래소에서 작동 중인 상태 (일시 중단 진입 가능).
    pub fn is_working(&self) -> bool {
        matches!(
            self,
            OrderStatusType::Submitted | OrderStatusType::Accepted | OrderStatusType::PartiallyFilled
        )
    }
}

impl std::fmt::Display for OrderStatusType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderStatusType::Pending => "PENDING",
            OrderStatusType::Submitted => "SUBMITTED",
            OrderStatusType::Accepted => "ACCEPTED",
            OrderStatusType::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatusType::Filled => "FILLED",
            OrderStatusType::Cancelled => "CANCELLED",
            OrderStatusType::Rejected => "REJECTED",
            OrderStatusType::Expired => "EXPIRED",
            OrderStatusType::Suspended => "SUSPENDED",
        };
        write!(f, "{}", s)
    }
}

/// 주문 유효 기간.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    /// 취소될 때까지 유효 (Good Till Cancelled)
    #[default]
    GTC,
    /// 즉시 체결 또는 취소 (Immediate Or Cancel)
    IOC,
    /// 전량 체결 또는 취소 (Fill Or Kill)
    FOK,
    /// 당일 유효
    Day,
}

/// 체결 유동성 구분.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Liquidity {
    /// 호가를 제공한 체결
    Maker,
    /// 호가를 소진한 체결
    #[default]
    Taker,
}

/// 알고리즘/특수 주문 유형의 실행 파라미터.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionParams {
    /// 트레일링 스톱 간격 (가격 단위)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trail_offset: Option<Price>,
    /// 빙산 주문 표시 수량
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_quantity: Option<Quantity>,
    /// TWAP/VWAP 분할 횟수
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slice_count: Option<u32>,
    /// VWAP 거래량 참여율 (0.1 = 10%)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participation_rate: Option<Decimal>,
}

/// 트리거형 주문의 런타임 상태.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerState {
    /// 스톱 조건이 충족되었는지 (한 번 충족되면 유지)
    pub stop_triggered: bool,
    /// 트레일링 기준 가격 (매도: 최고가, 매수: 최저가)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trail_anchor: Option<Price>,
}

/// 새 주문 생성 요청.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    /// 주문 소유 사용자
    pub user_id: UserId,
    /// 거래 심볼
    pub symbol: String,
    /// 주문 방향
    pub side: Side,
    /// 주문 유형
    pub order_type: OrderType,
    /// 주문 수량
    pub quantity: Quantity,
    /// 지정가
    pub price: Option<Price>,
    /// 스톱 트리거 가격
    pub stop_price: Option<Price>,
    /// 주문 유효 기간
    #[serde(default)]
    pub time_in_force: TimeInForce,
    /// 연관 전략 ID
    pub strategy_id: Option<String>,
    /// 부모 주문 ID
    pub parent_order_id: Option<Uuid>,
    /// 기존 포지션 축소 전용 여부
    #[serde(default)]
    pub reduce_only: bool,
    /// 알고리즘 실행 파라미터
    #[serde(default)]
    pub params: ExecutionParams,
}

impl OrderRequest {
    fn base(user_id: UserId, symbol: impl Into<String>, side: Side, order_type: OrderType, quantity: Quantity) -> Self {
        Self {
            user_id,
            symbol: symbol.into(),
            side,
            order_type,
            quantity,
            price: None,
            stop_price: None,
            time_in_force: TimeInForce::GTC,
            strategy_id: None,
            parent_order_id: None,
            reduce_only: false,
            params: ExecutionParams::default(),
        }
    }

    /// 시장가 주문을 생성합니다.
    pub fn market(user_id: UserId, symbol: impl Into<String>, side: Side, quantity: Quantity) -> Self {
        Self::base(user_id, symbol, side, OrderType::Market, quantity)
    }

    /// 지정가 주문을 생성합니다.
    pub fn limit(
        user_id: UserId,
        symbol: impl Into<String>,
        side: Side,
        quantity: Quantity,
        price: Price,
    ) -> Self {
        let mut req = Self::base(user_id, symbol, side, OrderType::Limit, quantity);
        req.price = Some(price);
        req
    }

    /// 스톱 주문을 생성합니다.
    pub fn stop(
        user_id: UserId,
        symbol: impl Into<String>,
        side: Side,
        quantity: Quantity,
        stop_price: Price,
    ) -> Self {
        let mut req = Self::base(user_id, symbol, side, OrderType::Stop, quantity);
        req.stop_price = Some(stop_price);
        req
    }

    /// 스톱 지정가 주문을 생성합니다.
    pub fn stop_limit(
        user_id: UserId,
        symbol: impl Into<String>,
        side: Side,
        quantity: Quantity,
        stop_price: Price,
        limit_price: Price,
    ) -> Self {
        let mut req = Self::base(user_id, symbol, side, OrderType::StopLimit, quantity);
        req.stop_price = Some(stop_price);
        req.price = Some(limit_price);
        req
    }

    /// 트레일링 스톱 주문을 생성합니다.
    pub fn trailing_stop(
        user_id: UserId,
        symbol: impl Into<String>,
        side: Side,
        quantity: Quantity,
        trail_offset: Price,
    ) -> Self {
        let mut req = Self::base(user_id, symbol, side, OrderType::TrailingStop, quantity);
        req.params.trail_offset = Some(trail_offset);
        req
    }

    /// 빙산 주문을 생성합니다. `price`가 없으면 시장가로 분할 체결됩니다.
    pub fn iceberg(
        user_id: UserId,
        symbol: impl Into<String>,
        side: Side,
        quantity: Quantity,
        display_quantity: Quantity,
        price: Option<Price>,
    ) -> Self {
        let mut req = Self::base(user_id, symbol, side, OrderType::Iceberg, quantity);
        req.price = price;
        req.params.display_quantity = Some(display_quantity);
        req
    }

    /// TWAP 주문을 생성합니다.
    pub fn twap(user_id: UserId, symbol: impl Into<String>, side: Side, quantity: Quantity, slices: u32) -> Self {
        let mut req = Self::base(user_id, symbol, side, OrderType::Twap, quantity);
        req.params.slice_count = Some(slices);
        req
    }

    /// VWAP 주문을 생성합니다.
    pub fn vwap(
        user_id: UserId,
        symbol: impl Into<String>,
        side: Side,
        quantity: Quantity,
        slices: u32,
        participation_rate: Decimal,
    ) -> Self {
        let mut req = Self::base(user_id, symbol, side, OrderType::Vwap, quantity);
        req.params.slice_count = Some(slices);
        req.params.participation_rate = Some(participation_rate);
        req
    }

    /// 전략 ID를 설정합니다.
    pub fn with_strategy(mut self, strategy_id: impl Into<String>) -> Self {
        self.strategy_id = Some(strategy_id.into());
        self
    }

    /// 부모 주문을 설정합니다.
    pub fn with_parent(mut self, parent_order_id: Uuid) -> Self {
        self.parent_order_id = Some(parent_order_id);
        self
    }

    /// 유효 기간을 설정합니다.
    pub fn with_time_in_force(mut self, tif: TimeInForce) -> Self {
        self.time_in_force = tif;
        self
    }

    /// 포지션 축소 전용으로 표시합니다.
    pub fn reduce_only(mut self) -> Self {
        self.reduce_only = true;
        self
    }

    /// 유형과 무관한 공통 파라미터 검증.
    ///
    /// 유형별 필수 필드 검증은 `ExecutionRule::validate`가 담당합니다.
    pub fn validate_common(&self) -> TraderResult<()> {
        if self.symbol.trim().is_empty() {
            return Err(TraderError::Validation("symbol must not be empty".to_string()));
        }
        if self.quantity <= Decimal::ZERO {
            return Err(TraderError::Validation(format!(
                "quantity must be positive, got {}",
                self.quantity
            )));
        }
        if let Some(price) = self.price {
            if price <= Decimal::ZERO {
                return Err(TraderError::Validation(format!("price must be positive, got {}", price)));
            }
        }
        if let Some(stop) = self.stop_price {
            if stop <= Decimal::ZERO {
                return Err(TraderError::Validation(format!(
                    "stop price must be positive, got {}",
                    stop
                )));
            }
        }
        Ok(())
    }
}

/// 주문 정정 요청.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderChanges {
    /// 새 주문 수량
    pub quantity: Option<Quantity>,
    /// 새 지정가
    pub price: Option<Price>,
    /// 새 스톱 가격
    pub stop_price: Option<Price>,
}

impl OrderChanges {
    /// 변경 사항이 없는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.quantity.is_none() && self.price.is_none() && self.stop_price.is_none()
    }
}

/// 단일 체결 기록. 생성 후 변경되지 않습니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderFill {
    /// 체결 ID
    pub id: Uuid,
    /// 소유 주문 ID
    pub order_id: Uuid,
    /// 체결 수량
    pub quantity: Quantity,
    /// 체결 가격
    pub price: Price,
    /// 체결 금액 (수량 × 가격)
    pub value: Decimal,
    /// 수수료
    pub commission: Decimal,
    /// 유동성 구분
    pub liquidity: Liquidity,
    /// 체결 시각
    pub filled_at: DateTime<Utc>,
}

impl OrderFill {
    /// 새 체결을 생성합니다.
    pub fn new(
        order_id: Uuid,
        quantity: Quantity,
        price: Price,
        commission: Decimal,
        liquidity: Liquidity,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            quantity,
            price,
            value: quantity * price,
            commission,
            liquidity,
            filled_at: Utc::now(),
        }
    }
}

/// 상태 전이 감사 기록.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub from: OrderStatusType,
    pub to: OrderStatusType,
    pub at: DateTime<Utc>,
}

/// 주문 엔티티.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// 내부 주문 ID
    pub id: Uuid,
    /// 소유 사용자
    pub user_id: UserId,
    /// 외부(거래소) 주문 ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    /// 거래 심볼
    pub symbol: String,
    /// 주문 방향
    pub side: Side,
    /// 주문 유형
    pub order_type: OrderType,
    /// 주문 수량
    pub quantity: Quantity,
    /// 지정가
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Price>,
    /// 스톱 가격
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<Price>,
    /// 유효 기간
    pub time_in_force: TimeInForce,
    /// 현재 상태
    pub status: OrderStatusType,
    /// 체결 수량
    pub filled_quantity: Quantity,
    /// 미체결 수량
    pub remaining_quantity: Quantity,
    /// 평균 체결 가격
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_fill_price: Option<Price>,
    /// 누적 수수료
    pub commission: Decimal,
    /// 연관 전략 ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy_id: Option<String>,
    /// 부모 주문 ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_order_id: Option<Uuid>,
    /// 포지션 축소 전용 여부
    pub reduce_only: bool,
    /// 알고리즘 실행 파라미터
    pub params: ExecutionParams,
    /// 트리거 상태
    pub trigger: TriggerState,
    /// 체결 기록 (추가 전용)
    pub fills: Vec<OrderFill>,
    /// 상태 전이 기록
    pub transitions: Vec<StatusTransition>,
    /// 생성 시각
    pub created_at: DateTime<Utc>,
    /// 마지막 수정 시각
    pub updated_at: DateTime<Utc>,
    /// 제출 시각
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
    /// 최종 상태 도달 시각
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Order {
    /// 요청으로부터 PENDING 상태의 주문을 생성합니다.
    pub fn from_request(request: OrderRequest) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            external_id: None,
            symbol: request.symbol,
            side: request.side,
            order_type: request.order_type,
            quantity: request.quantity,
            price: request.price,
            stop_price: request.stop_price,
            time_in_force: request.time_in_force,
            status: OrderStatusType::Pending,
            filled_quantity: Decimal::ZERO,
            remaining_quantity: request.quantity,
            average_fill_price: None,
            commission: Decimal::ZERO,
            strategy_id: request.strategy_id,
            parent_order_id: request.parent_order_id,
            reduce_only: request.reduce_only,
            params: request.params,
            trigger: TriggerState::default(),
            fills: Vec::new(),
            transitions: Vec::new(),
            created_at: now,
            updated_at: now,
            submitted_at: None,
            completed_at: None,
        }
    }

    /// 주문이 최종 상태인지 확인합니다.
    pub fn is_final(&self) -> bool {
        self.status.is_final()
    }

    /// 전량 체결되었는지 확인합니다.
    pub fn is_filled(&self) -> bool {
        self.status == OrderStatusType::Filled
    }

    /// 포지션 원장에 전달할 부호 있는 수량.
    pub fn signed_quantity(&self, quantity: Quantity) -> Decimal {
        self.side.sign() * quantity
    }

    /// 체결 진행률 (0 ~ 1).
    pub fn fill_ratio(&self) -> Decimal {
        if self.quantity.is_zero() {
            Decimal::ZERO
        } else {
            self.filled_quantity / self.quantity
        }
    }

    /// 주문 금액 (지정가 또는 주어진 기준 가격 사용).
    pub fn notional_value(&self, reference_price: Price) -> Decimal {
        self.quantity * self.price.unwrap_or(reference_price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_order_from_request() {
        let request = OrderRequest::limit(7, "AAPL", Side::Buy, dec!(100), dec!(150))
            .with_strategy("grid");
        let order = Order::from_request(request);

        assert_eq!(order.status, OrderStatusType::Pending);
        assert_eq!(order.remaining_quantity, dec!(100));
        assert_eq!(order.filled_quantity, Decimal::ZERO);
        assert_eq!(order.strategy_id.as_deref(), Some("grid"));
        assert_eq!(order.notional_value(dec!(999)), dec!(15000));
        assert_eq!(order.signed_quantity(dec!(10)), dec!(10));
    }

    #[test]
    fn test_validate_common() {
        assert!(OrderRequest::market(1, "AAPL", Side::Sell, dec!(1)).validate_common().is_ok());
        assert!(OrderRequest::market(1, "", Side::Sell, dec!(1)).validate_common().is_err());
        assert!(OrderRequest::market(1, "AAPL", Side::Sell, dec!(0)).validate_common().is_err());
        assert!(OrderRequest::limit(1, "AAPL", Side::Buy, dec!(1), dec!(-5))
            .validate_common()
            .is_err());
    }

    #[test]
    fn test_status_classification() {
        assert!(OrderStatusType::Suspended.is_active());
        assert!(!OrderStatusType::Suspended.is_working());
        assert!(OrderStatusType::Accepted.is_working());
        assert!(OrderStatusType::Expired.is_final());
        assert_eq!(OrderStatusType::PartiallyFilled.to_string(), "PARTIALLY_FILLED");
    }

    #[test]
    fn test_fill_value() {
        let fill = OrderFill::new(Uuid::new_v4(), dec!(3), dec!(12.5), dec!(0.1), Liquidity::Maker);
        assert_eq!(fill.value, dec!(37.5));
    }
}
