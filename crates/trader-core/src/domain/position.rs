//! 포지션 원장 계산.
//!
//! 이 모듈은 (사용자, 심볼) 단위 포지션의 수량, 원가, 손익 계산을 정의합니다:
//! - `Position` - 포지션 엔티티 (가중평균 원가)
//! - `PositionHistory` - 모든 변경이 반환하는 불변 스냅샷
//! - `apply_trade` - 방향 전환(flip)을 포함한 체결 반영
//! - `PositionSummary` - 포트폴리오 요약
//!
//! 포지션은 스스로 저장하지 않습니다. 모든 변경 메서드는 `PositionHistory`
//! 값을 반환하고, 저장은 호출자가 수행합니다.

use crate::types::{Price, Quantity, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// 포지션 에러.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PositionError {
    #[error("Trade quantity must be non-zero")]
    ZeroQuantity,

    #[error("Invalid price: {0}")]
    InvalidPrice(Decimal),

    #[error("Position {0} is closed")]
    Closed(Uuid),

    #[error("Trade quantity {requested} exceeds position quantity {available}")]
    ExceedsQuantity { requested: Decimal, available: Decimal },

    #[error("Cannot freeze {requested}: only {available} available")]
    InsufficientAvailable { requested: Decimal, available: Decimal },

    #[error("Cannot unfreeze {requested}: only {frozen} frozen")]
    InsufficientFrozen { requested: Decimal, frozen: Decimal },

    #[error("Position invariant violated: {0}")]
    InvariantViolation(String),
}

/// 포지션 방향.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionType {
    /// 롱 (매수 보유)
    Long,
    /// 숏 (매도 보유)
    Short,
}

impl PositionType {
    /// 부호 있는 수량의 방향.
    pub fn from_signed(quantity: Decimal) -> Option<Self> {
        if quantity > Decimal::ZERO {
            Some(PositionType::Long)
        } else if quantity < Decimal::ZERO {
            Some(PositionType::Short)
        } else {
            None
        }
    }

    /// 수량 부호.
    pub fn sign(&self) -> Decimal {
        match self {
            PositionType::Long => Decimal::ONE,
            PositionType::Short => Decimal::NEGATIVE_ONE,
        }
    }
}

impl std::fmt::Display for PositionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionType::Long => write!(f, "LONG"),
            PositionType::Short => write!(f, "SHORT"),
        }
    }
}

/// 포지션 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    Closed,
}

/// 포지션 변경 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionChange {
    Open,
    Increase,
    Reduce,
    Close,
    PriceUpdate,
    Freeze,
    Unfreeze,
    StopSet,
    StopCancelled,
    DailyReset,
}

/// 손절/익절 트리거.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopTrigger {
    /// 손절가 도달
    StopLoss(Price),
    /// 익절가 도달
    TakeProfit(Price),
}

/// (사용자, 심볼) 포지션.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// 포지션 ID
    pub id: Uuid,
    /// 소유 사용자
    pub user_id: UserId,
    /// 심볼
    pub symbol: String,
    /// 방향
    pub position_type: PositionType,
    /// 보유 수량 (절대값)
    pub quantity: Quantity,
    /// 주문 가능 수량
    pub available_quantity: Quantity,
    /// 미체결 주문에 묶인 수량
    pub frozen_quantity: Quantity,
    /// 가중평균 원가
    pub average_cost: Price,
    /// 총 취득 원가 (수수료 포함)
    pub total_cost: Decimal,
    /// 누적 실현 손익
    pub realized_pnl: Decimal,
    /// 미실현 손익
    pub unrealized_pnl: Decimal,
    /// 당일 손익
    pub daily_pnl: Decimal,
    /// 당일 실현 손익
    pub daily_realized_pnl: Decimal,
    /// 당일 시작 시점 미실현 손익
    pub day_start_unrealized_pnl: Decimal,
    /// 현재 시장 가격
    pub current_price: Price,
    /// 평가 금액 (수량 × 현재가)
    pub market_value: Decimal,
    /// 손절가
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_loss_price: Option<Price>,
    /// 익절가
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_profit_price: Option<Price>,
    /// 관측된 최대 미실현 이익
    pub max_profit: Decimal,
    /// 관측된 최저 미실현 손익 (0 이하)
    pub max_drawdown: Decimal,
    /// 상태
    pub status: PositionStatus,
    /// 변경 횟수 (낙관적 동시성 버전)
    pub version: u64,
    /// 오픈 시각
    pub opened_at: DateTime<Utc>,
    /// 마지막 변경 시각
    pub updated_at: DateTime<Utc>,
    /// 종료 시각
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
}

/// 포지션 변경 후 상태의 불변 스냅샷.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionHistory {
    pub id: Uuid,
    pub position_id: Uuid,
    pub user_id: UserId,
    pub symbol: String,
    pub change: PositionChange,
    pub position_type: PositionType,
    pub status: PositionStatus,
    pub quantity: Quantity,
    pub available_quantity: Quantity,
    pub frozen_quantity: Quantity,
    pub average_cost: Price,
    pub total_cost: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub current_price: Price,
    pub market_value: Decimal,
    /// 체결로 인한 변경이면 부호 있는 체결 수량
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trade_quantity: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trade_price: Option<Price>,
    pub version: u64,
    pub recorded_at: DateTime<Utc>,
}

/// 단일 체결 반영 결과.
#[derive(Debug, Clone)]
pub struct TradeResult {
    /// 변경 종류
    pub change: PositionChange,
    /// 이번 체결로 실현된 손익
    pub realized: Decimal,
    /// 변경 후 스냅샷
    pub history: PositionHistory,
}

fn check_price(price: Price) -> Result<(), PositionError> {
    if price <= Decimal::ZERO {
        Err(PositionError::InvalidPrice(price))
    } else {
        Ok(())
    }
}

impl Position {
    /// 첫 체결로 새 포지션을 엽니다.
    ///
    /// 평균 원가 = 체결가, 총 원가 = |수량| × 체결가 + 수수료.
    pub fn open(
        user_id: UserId,
        symbol: impl Into<String>,
        signed_quantity: Decimal,
        price: Price,
        commission: Decimal,
    ) -> Result<(Self, TradeResult), PositionError> {
        let position_type = PositionType::from_signed(signed_quantity).ok_or(PositionError::ZeroQuantity)?;
        check_price(price)?;

        let quantity = signed_quantity.abs();
        let now = Utc::now();
        let mut position = Self {
            id: Uuid::new_v4(),
            user_id,
            symbol: symbol.into(),
            position_type,
            quantity,
            available_quantity: quantity,
            frozen_quantity: Decimal::ZERO,
            average_cost: price,
            total_cost: quantity * price + commission,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            daily_pnl: Decimal::ZERO,
            daily_realized_pnl: Decimal::ZERO,
            day_start_unrealized_pnl: Decimal::ZERO,
            current_price: price,
            market_value: Decimal::ZERO,
            stop_loss_price: None,
            take_profit_price: None,
            max_profit: Decimal::ZERO,
            max_drawdown: Decimal::ZERO,
            status: PositionStatus::Open,
            version: 0,
            opened_at: now,
            updated_at: now,
            closed_at: None,
        };
        position.revalue();

        let history = position.snapshot(PositionChange::Open, Some(signed_quantity), Some(price));
        let result = TradeResult {
            change: PositionChange::Open,
            realized: Decimal::ZERO,
            history,
        };
        Ok((position, result))
    }

    /// 포지션이 열려 있는지 확인합니다.
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// 부호 있는 보유 수량 (롱 +, 숏 -).
    pub fn signed_quantity(&self) -> Decimal {
        self.position_type.sign() * self.quantity
    }

    /// 실현 + 미실현 손익.
    pub fn total_pnl(&self) -> Decimal {
        self.realized_pnl + self.unrealized_pnl
    }

    /// 리스크 기여도: 미실현 손실 비율 (손실일수록 큼).
    pub fn risk_contribution(&self) -> Decimal {
        if self.total_cost <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        -self.unrealized_pnl / self.total_cost
    }

    /// 체결을 반영합니다.
    ///
    /// 같은 방향이면 가중평균으로 추가하고, 반대 방향이면 축소하며 손익을
    /// 실현합니다. 수량이 정확히 0이 되면 포지션을 종료합니다. 보유 수량을
    /// 넘는 반대 방향 체결은 거부되며, 방향 전환은 [`apply_trade`]가 처리합니다.
    pub fn add_trade(
        &mut self,
        signed_quantity: Decimal,
        price: Price,
        commission: Decimal,
    ) -> Result<TradeResult, PositionError> {
        if !self.is_open() {
            return Err(PositionError::Closed(self.id));
        }
        let direction = PositionType::from_signed(signed_quantity).ok_or(PositionError::ZeroQuantity)?;
        check_price(price)?;

        let trade_quantity = signed_quantity.abs();

        if direction == self.position_type {
            let new_quantity = self.quantity + trade_quantity;
            self.total_cost += trade_quantity * price + commission;
            self.average_cost = self.total_cost / new_quantity;
            self.quantity = new_quantity;
            self.available_quantity += trade_quantity;
            self.current_price = price;
            self.revalue();
            self.touch();

            let history = self.snapshot(PositionChange::Increase, Some(signed_quantity), Some(price));
            return Ok(TradeResult {
                change: PositionChange::Increase,
                realized: Decimal::ZERO,
                history,
            });
        }

        if trade_quantity > self.quantity {
            return Err(PositionError::ExceedsQuantity {
                requested: trade_quantity,
                available: self.quantity,
            });
        }

        let gross = match self.position_type {
            PositionType::Long => trade_quantity * (price - self.average_cost),
            PositionType::Short => trade_quantity * (self.average_cost - price),
        };
        let realized = gross - commission;
        self.realized_pnl += realized;
        self.daily_realized_pnl += realized;

        let remaining = self.quantity - trade_quantity;
        let from_available = trade_quantity.min(self.available_quantity);
        self.available_quantity -= from_available;
        self.frozen_quantity -= trade_quantity - from_available;
        self.total_cost = if self.quantity.is_zero() {
            Decimal::ZERO
        } else {
            self.total_cost * remaining / self.quantity
        };
        self.quantity = remaining;
        self.current_price = price;

        let change = if remaining.is_zero() {
            self.close();
            PositionChange::Close
        } else {
            self.revalue();
            PositionChange::Reduce
        };
        self.touch();

        let history = self.snapshot(change, Some(signed_quantity), Some(price));
        Ok(TradeResult { change, realized, history })
    }

    /// 시장 가격을 갱신하고 평가 손익을 다시 계산합니다.
    pub fn update_market_price(&mut self, price: Price) -> Result<PositionHistory, PositionError> {
        if !self.is_open() {
            return Err(PositionError::Closed(self.id));
        }
        check_price(price)?;

        self.current_price = price;
        self.revalue();
        self.touch();
        Ok(self.snapshot(PositionChange::PriceUpdate, None, None))
    }

    /// 주문 가능 수량 일부를 동결합니다.
    pub fn freeze(&mut self, quantity: Quantity) -> Result<PositionHistory, PositionError> {
        if !self.is_open() {
            return Err(PositionError::Closed(self.id));
        }
        if quantity <= Decimal::ZERO {
            return Err(PositionError::ZeroQuantity);
        }
        if quantity > self.available_quantity {
            return Err(PositionError::InsufficientAvailable {
                requested: quantity,
                available: self.available_quantity,
            });
        }

        self.available_quantity -= quantity;
        self.frozen_quantity += quantity;
        self.touch();
        Ok(self.snapshot(PositionChange::Freeze, None, None))
    }

    /// 동결 수량 일부를 해제합니다.
    pub fn unfreeze(&mut self, quantity: Quantity) -> Result<PositionHistory, PositionError> {
        if !self.is_open() {
            return Err(PositionError::Closed(self.id));
        }
        if quantity <= Decimal::ZERO {
            return Err(PositionError::ZeroQuantity);
        }
        if quantity > self.frozen_quantity {
            return Err(PositionError::InsufficientFrozen {
                requested: quantity,
                frozen: self.frozen_quantity,
            });
        }

        self.frozen_quantity -= quantity;
        self.available_quantity += quantity;
        self.touch();
        Ok(self.snapshot(PositionChange::Unfreeze, None, None))
    }

    /// 손절가를 설정합니다.
    pub fn set_stop_loss(&mut self, price: Price) -> Result<PositionHistory, PositionError> {
        if !self.is_open() {
            return Err(PositionError::Closed(self.id));
        }
        check_price(price)?;
        self.stop_loss_price = Some(price);
        self.touch();
        Ok(self.snapshot(PositionChange::StopSet, None, None))
    }

    /// 익절가를 설정합니다.
    pub fn set_take_profit(&mut self, price: Price) -> Result<PositionHistory, PositionError> {
        if !self.is_open() {
            return Err(PositionError::Closed(self.id));
        }
        check_price(price)?;
        self.take_profit_price = Some(price);
        self.touch();
        Ok(self.snapshot(PositionChange::StopSet, None, None))
    }

    /// 손절/익절 설정을 모두 해제합니다.
    pub fn cancel_stops(&mut self) -> Result<PositionHistory, PositionError> {
        if !self.is_open() {
            return Err(PositionError::Closed(self.id));
        }
        self.stop_loss_price = None;
        self.take_profit_price = None;
        self.touch();
        Ok(self.snapshot(PositionChange::StopCancelled, None, None))
    }

    /// 주어진 가격에서 손절/익절 조건이 충족되는지 확인합니다.
    pub fn stop_trigger(&self, price: Price) -> Option<StopTrigger> {
        if !self.is_open() {
            return None;
        }
        let (stop_hit, take_hit) = match self.position_type {
            PositionType::Long => (
                self.stop_loss_price.filter(|s| price <= *s),
                self.take_profit_price.filter(|t| price >= *t),
            ),
            PositionType::Short => (
                self.stop_loss_price.filter(|s| price >= *s),
                self.take_profit_price.filter(|t| price <= *t),
            ),
        };
        stop_hit
            .map(StopTrigger::StopLoss)
            .or(take_hit.map(StopTrigger::TakeProfit))
    }

    /// 당일 손익 기준을 초기화합니다 (UTC 자정).
    pub fn reset_daily(&mut self) -> PositionHistory {
        self.daily_realized_pnl = Decimal::ZERO;
        self.day_start_unrealized_pnl = self.unrealized_pnl;
        self.daily_pnl = Decimal::ZERO;
        self.touch();
        self.snapshot(PositionChange::DailyReset, None, None)
    }

    /// 수량 불변식을 검사합니다.
    pub fn check_invariants(&self) -> Result<(), PositionError> {
        if self.frozen_quantity + self.available_quantity != self.quantity {
            return Err(PositionError::InvariantViolation(format!(
                "frozen {} + available {} != quantity {}",
                self.frozen_quantity, self.available_quantity, self.quantity
            )));
        }
        if self.quantity < Decimal::ZERO
            || self.frozen_quantity < Decimal::ZERO
            || self.available_quantity < Decimal::ZERO
        {
            return Err(PositionError::InvariantViolation(format!(
                "negative quantity bucket on position {}",
                self.id
            )));
        }
        if self.is_open() && self.quantity.is_zero() {
            return Err(PositionError::InvariantViolation(format!(
                "open position {} has zero quantity",
                self.id
            )));
        }
        Ok(())
    }

    fn revalue(&mut self) {
        self.market_value = self.quantity * self.current_price;
        self.unrealized_pnl = match self.position_type {
            PositionType::Long => self.quantity * (self.current_price - self.average_cost),
            PositionType::Short => self.quantity * (self.average_cost - self.current_price),
        };
        self.max_profit = self.max_profit.max(self.unrealized_pnl);
        self.max_drawdown = self.max_drawdown.min(self.unrealized_pnl);
        self.daily_pnl = self.daily_realized_pnl + (self.unrealized_pnl - self.day_start_unrealized_pnl);
    }

    fn close(&mut self) {
        let now = Utc::now();
        self.status = PositionStatus::Closed;
        self.quantity = Decimal::ZERO;
        self.available_quantity = Decimal::ZERO;
        self.frozen_quantity = Decimal::ZERO;
        self.average_cost = Decimal::ZERO;
        self.total_cost = Decimal::ZERO;
        self.unrealized_pnl = Decimal::ZERO;
        self.market_value = Decimal::ZERO;
        self.daily_pnl = self.daily_realized_pnl - self.day_start_unrealized_pnl;
        self.closed_at = Some(now);
    }

    fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }

    fn snapshot(
        &self,
        change: PositionChange,
        trade_quantity: Option<Decimal>,
        trade_price: Option<Price>,
    ) -> PositionHistory {
        PositionHistory {
            id: Uuid::new_v4(),
            position_id: self.id,
            user_id: self.user_id,
            symbol: self.symbol.clone(),
            change,
            position_type: self.position_type,
            status: self.status,
            quantity: self.quantity,
            available_quantity: self.available_quantity,
            frozen_quantity: self.frozen_quantity,
            average_cost: self.average_cost,
            total_cost: self.total_cost,
            realized_pnl: self.realized_pnl,
            unrealized_pnl: self.unrealized_pnl,
            current_price: self.current_price,
            market_value: self.market_value,
            trade_quantity,
            trade_price,
            version: self.version,
            recorded_at: self.updated_at,
        }
    }
}

/// `apply_trade` 결과.
#[derive(Debug, Clone, Default)]
pub struct TradeApplication {
    /// 이번 체결로 종료된 포지션
    pub closed: Option<Position>,
    /// 체결 후 열려 있는 포지션
    pub open: Option<Position>,
    /// 발생한 스냅샷 (발생 순서)
    pub histories: Vec<PositionHistory>,
    /// 실현 손익 합계
    pub realized: Decimal,
}

/// 현재 포지션(없을 수 있음)에 체결을 반영합니다.
///
/// 보유 수량을 넘는 반대 방향 체결은 기존 포지션을 전량 종료한 뒤 남은
/// 수량으로 반대 방향 새 포지션을 엽니다. 수수료는 수량 비율로 나눕니다.
pub fn apply_trade(
    current: Option<Position>,
    user_id: UserId,
    symbol: &str,
    signed_quantity: Decimal,
    price: Price,
    commission: Decimal,
) -> Result<TradeApplication, PositionError> {
    let mut application = TradeApplication::default();

    let Some(mut position) = current.filter(Position::is_open) else {
        let (position, result) = Position::open(user_id, symbol, signed_quantity, price, commission)?;
        application.histories.push(result.history);
        application.open = Some(position);
        return Ok(application);
    };

    let direction = PositionType::from_signed(signed_quantity).ok_or(PositionError::ZeroQuantity)?;
    let trade_quantity = signed_quantity.abs();

    if direction == position.position_type || trade_quantity <= position.quantity {
        let result = position.add_trade(signed_quantity, price, commission)?;
        application.realized = result.realized;
        application.histories.push(result.history);
        if position.is_open() {
            application.open = Some(position);
        } else {
            application.closed = Some(position);
        }
        return Ok(application);
    }

    let closing = position.quantity;
    let remainder = trade_quantity - closing;
    let closing_commission = commission * closing / trade_quantity;
    let opening_commission = commission - closing_commission;

    let close_result = position.add_trade(direction.sign() * closing, price, closing_commission)?;
    application.realized = close_result.realized;
    application.histories.push(close_result.history);
    application.closed = Some(position);

    let (flipped, open_result) =
        Position::open(user_id, symbol, direction.sign() * remainder, price, opening_commission)?;
    application.histories.push(open_result.history);
    application.open = Some(flipped);

    Ok(application)
}

/// 열린 포지션들의 요약.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PositionSummary {
    pub open_positions: usize,
    pub total_market_value: Decimal,
    pub total_unrealized_pnl: Decimal,
    pub total_realized_pnl: Decimal,
    pub total_daily_pnl: Decimal,
}

impl PositionSummary {
    /// 포지션 목록에서 요약을 생성합니다.
    pub fn from_positions(positions: &[Position]) -> Self {
        positions.iter().fold(Self::default(), |mut summary, p| {
            if p.is_open() {
                summary.open_positions += 1;
                summary.total_market_value += p.market_value;
                summary.total_unrealized_pnl += p.unrealized_pnl;
            }
            summary.total_realized_pnl += p.realized_pnl;
            summary.total_daily_pnl += p.daily_pnl;
            summary
        })
    }
}
