//! 주문 유형별 가격/트리거 결정 규칙.
//!
//! 각 주문 유형은 `ExecutionRule`을 구현하며, `ExecutionRuleBook`이
//! 시작 시점에 `OrderType` → 규칙 조회 테이블을 구성합니다.
//!
//! - MARKET: 현재 시장가로 체결
//! - LIMIT: 매수는 시장가 ≤ 지정가일 때 min(지정가, 시장가), 매도는 시장가 ≥ 지정가일 때 max(지정가, 시장가)
//! - STOP: 매수는 시장가 ≥ 스톱, 매도는 시장가 ≤ 스톱에서 트리거 후 시장가
//! - STOP_LIMIT: 스톱 트리거 후 지정가 규칙
//! - TRAILING_STOP: 최고/최저가 대비 간격만큼 되돌리면 트리거 후 시장가
//! - ICEBERG / TWAP / VWAP: 가격 규칙은 지정가/시장가, 회차당 체결 수량만 제한

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;

use super::market::MarketData;
use super::order::{Order, OrderRequest, OrderType, Side};
use crate::error::{TraderError, TraderResult};
use crate::types::{Price, Quantity};

/// 한 번의 평가 결과.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceDecision {
    /// 주어진 가격으로 체결 가능
    Execute(Price),
    /// 조건 미충족, 다음 틱에서 재평가
    Wait,
}

impl PriceDecision {
    /// 체결 가격 (체결 가능한 경우).
    pub fn price(&self) -> Option<Price> {
        match self {
            PriceDecision::Execute(price) => Some(*price),
            PriceDecision::Wait => None,
        }
    }
}

/// 주문 유형별 실행 규칙.
pub trait ExecutionRule: Send + Sync {
    /// 담당 주문 유형.
    fn order_type(&self) -> OrderType;

    /// 유형별 필수 파라미터 검증.
    fn validate(&self, request: &OrderRequest) -> TraderResult<()>;

    /// 현재 시세로 체결 여부와 가격을 결정합니다.
    ///
    /// 스톱 트리거와 트레일링 기준가 같은 주문의 트리거 상태를 갱신할 수 있습니다.
    fn evaluate(&self, order: &mut Order, market: &MarketData) -> PriceDecision;

    /// 이번 회차에 체결 가능한 최대 수량.
    fn slice_quantity(&self, order: &Order, _market: &MarketData) -> Quantity {
        order.remaining_quantity
    }
}

/// 지정가 적격성 및 체결 가격.
pub fn limit_decision(side: Side, limit: Price, market: Price) -> PriceDecision {
    match side {
        Side::Buy if market <= limit => PriceDecision::Execute(limit.min(market)),
        Side::Sell if market >= limit => PriceDecision::Execute(limit.max(market)),
        _ => PriceDecision::Wait,
    }
}

/// 스톱 트리거 조건.
pub fn stop_condition_met(side: Side, stop: Price, market: Price) -> bool {
    match side {
        Side::Buy => market >= stop,
        Side::Sell => market <= stop,
    }
}

fn require_price(request: &OrderRequest) -> TraderResult<Price> {
    request.price.ok_or_else(|| {
        TraderError::Validation(format!("{} order requires a limit price", request.order_type))
    })
}

fn require_stop(request: &OrderRequest) -> TraderResult<Price> {
    request.stop_price.ok_or_else(|| {
        TraderError::Validation(format!("{} order requires a stop price", request.order_type))
    })
}

fn require_slices(request: &OrderRequest) -> TraderResult<u32> {
    match request.params.slice_count {
        Some(n) if n > 0 => Ok(n),
        _ => Err(TraderError::Validation(format!(
            "{} order requires a positive slice count",
            request.order_type
        ))),
    }
}

/// 래치된 스톱 트리거를 평가합니다.
fn latch_stop(order: &mut Order, market: Price) -> bool {
    if order.trigger.stop_triggered {
        return true;
    }
    if let Some(stop) = order.stop_price {
        if stop_condition_met(order.side, stop, market) {
            order.trigger.stop_triggered = true;
        }
    }
    order.trigger.stop_triggered
}

fn even_slice(order: &Order, slices: u32) -> Quantity {
    let slice = (order.quantity / Decimal::from(slices.max(1))).round_dp(8);
    if slice <= Decimal::ZERO {
        order.remaining_quantity
    } else {
        slice.min(order.remaining_quantity)
    }
}

/// 시장가 규칙.
pub struct MarketRule;

impl ExecutionRule for MarketRule {
    fn order_type(&self) -> OrderType {
        OrderType::Market
    }

    fn validate(&self, _request: &OrderRequest) -> TraderResult<()> {
        Ok(())
    }

    fn evaluate(&self, _order: &mut Order, market: &MarketData) -> PriceDecision {
        PriceDecision::Execute(market.price)
    }
}

/// 지정가 규칙.
pub struct LimitRule;

impl ExecutionRule for LimitRule {
    fn order_type(&self) -> OrderType {
        OrderType::Limit
    }

    fn validate(&self, request: &OrderRequest) -> TraderResult<()> {
        require_price(request).map(|_| ())
    }

    fn evaluate(&self, order: &mut Order, market: &MarketData) -> PriceDecision {
        match order.price {
            Some(limit) => limit_decision(order.side, limit, market.price),
            None => PriceDecision::Wait,
        }
    }
}

/// 스톱 규칙.
pub struct StopRule;

impl ExecutionRule for StopRule {
    fn order_type(&self) -> OrderType {
        OrderType::Stop
    }

    fn validate(&self, request: &OrderRequest) -> TraderResult<()> {
        require_stop(request).map(|_| ())
    }

    fn evaluate(&self, order: &mut Order, market: &MarketData) -> PriceDecision {
        if latch_stop(order, market.price) {
            PriceDecision::Execute(market.price)
        } else {
            PriceDecision::Wait
        }
    }
}

/// 스톱 지정가 규칙.
pub struct StopLimitRule;

impl ExecutionRule for StopLimitRule {
    fn order_type(&self) -> OrderType {
        OrderType::StopLimit
    }

    fn validate(&self, request: &OrderRequest) -> TraderResult<()> {
        require_stop(request)?;
        require_price(request).map(|_| ())
    }

    fn evaluate(&self, order: &mut Order, market: &MarketData) -> PriceDecision {
        if !latch_stop(order, market.price) {
            return PriceDecision::Wait;
        }
        match order.price {
            Some(limit) => limit_decision(order.side, limit, market.price),
            None => PriceDecision::Wait,
        }
    }
}

/// 트레일링 스톱 규칙.
///
/// 매도는 관측된 최고가에서 `trail_offset`만큼 하락하면, 매수는 최저가에서
/// 그만큼 상승하면 트리거됩니다.
pub struct TrailingStopRule;

impl ExecutionRule for TrailingStopRule {
    fn order_type(&self) -> OrderType {
        OrderType::TrailingStop
    }

    fn validate(&self, request: &OrderRequest) -> TraderResult<()> {
        match request.params.trail_offset {
            Some(offset) if offset > Decimal::ZERO => Ok(()),
            _ => Err(TraderError::Validation(
                "TRAILING_STOP order requires a positive trail offset".to_string(),
            )),
        }
    }

    fn evaluate(&self, order: &mut Order, market: &MarketData) -> PriceDecision {
        if order.trigger.stop_triggered {
            return PriceDecision::Execute(market.price);
        }
        let Some(offset) = order.params.trail_offset else {
            return PriceDecision::Wait;
        };

        let price = market.price;
        let anchor = match (order.side, order.trigger.trail_anchor) {
            (Side::Sell, Some(a)) => a.max(price),
            (Side::Buy, Some(a)) => a.min(price),
            (_, None) => price,
        };
        order.trigger.trail_anchor = Some(anchor);

        let triggered = match order.side {
            Side::Sell => price <= anchor - offset,
            Side::Buy => price >= anchor + offset,
        };
        if triggered {
            order.trigger.stop_triggered = true;
            PriceDecision::Execute(price)
        } else {
            PriceDecision::Wait
        }
    }
}

/// 빙산 주문 규칙.
pub struct IcebergRule;

impl ExecutionRule for IcebergRule {
    fn order_type(&self) -> OrderType {
        OrderType::Iceberg
    }

    fn validate(&self, request: &OrderRequest) -> TraderResult<()> {
        match request.params.display_quantity {
            Some(display) if display > Decimal::ZERO && display <= request.quantity => Ok(()),
            _ => Err(TraderError::Validation(
                "ICEBERG order requires 0 < display quantity <= quantity".to_string(),
            )),
        }
    }

    fn evaluate(&self, order: &mut Order, market: &MarketData) -> PriceDecision {
        match order.price {
            Some(limit) => limit_decision(order.side, limit, market.price),
            None => PriceDecision::Execute(market.price),
        }
    }

    fn slice_quantity(&self, order: &Order, _market: &MarketData) -> Quantity {
        order
            .params
            .display_quantity
            .map(|d| d.min(order.remaining_quantity))
            .unwrap_or(order.remaining_quantity)
    }
}

/// TWAP 규칙: 회차마다 균등 분할 수량.
pub struct TwapRule;

impl ExecutionRule for TwapRule {
    fn order_type(&self) -> OrderType {
        OrderType::Twap
    }

    fn validate(&self, request: &OrderRequest) -> TraderResult<()> {
        require_slices(request).map(|_| ())
    }

    fn evaluate(&self, _order: &mut Order, market: &MarketData) -> PriceDecision {
        PriceDecision::Execute(market.price)
    }

    fn slice_quantity(&self, order: &Order, _market: &MarketData) -> Quantity {
        even_slice(order, order.params.slice_count.unwrap_or(1))
    }
}

/// VWAP 규칙: 시장 거래량 참여율만큼 체결.
pub struct VwapRule {
    default_participation: Decimal,
}

impl VwapRule {
    /// 기본 참여율로 생성합니다.
    pub fn new(default_participation: Decimal) -> Self {
        Self { default_participation }
    }
}

impl Default for VwapRule {
    fn default() -> Self {
        Self::new(Decimal::new(1, 1))
    }
}

impl ExecutionRule for VwapRule {
    fn order_type(&self) -> OrderType {
        OrderType::Vwap
    }

    fn validate(&self, request: &OrderRequest) -> TraderResult<()> {
        require_slices(request)?;
        match request.params.participation_rate {
            Some(rate) if rate <= Decimal::ZERO || rate > Decimal::ONE => Err(TraderError::Validation(
                format!("VWAP participation rate must be in (0, 1], got {}", rate),
            )),
            _ => Ok(()),
        }
    }

    fn evaluate(&self, _order: &mut Order, market: &MarketData) -> PriceDecision {
        PriceDecision::Execute(market.price)
    }

    fn slice_quantity(&self, order: &Order, market: &MarketData) -> Quantity {
        let rate = order.params.participation_rate.unwrap_or(self.default_participation);
        let by_volume = (market.volume * rate).round_dp(8);
        if by_volume > Decimal::ZERO {
            by_volume.min(order.remaining_quantity)
        } else {
            even_slice(order, order.params.slice_count.unwrap_or(1))
        }
    }
}

/// 주문 유형 → 실행 규칙 조회 테이블.
#[derive(Clone)]
pub struct ExecutionRuleBook {
    rules: HashMap<OrderType, Arc<dyn ExecutionRule>>,
}

impl std::fmt::Debug for ExecutionRuleBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.rules.keys().map(|t| t.to_string()).collect();
        types.sort();
        f.debug_struct("ExecutionRuleBook").field("types", &types).finish()
    }
}

impl ExecutionRuleBook {
    /// 빈 규칙 테이블.
    pub fn empty() -> Self {
        Self { rules: HashMap::new() }
    }

    /// 모든 기본 주문 유형이 등록된 규칙 테이블.
    pub fn standard() -> Self {
        let mut book = Self::empty();
        book.register(Arc::new(MarketRule));
        book.register(Arc::new(LimitRule));
        book.register(Arc::new(StopRule));
        book.register(Arc::new(StopLimitRule));
        book.register(Arc::new(TrailingStopRule));
        book.register(Arc::new(IcebergRule));
        book.register(Arc::new(TwapRule));
        book.register(Arc::new(VwapRule::default()));
        book
    }

    /// 규칙을 등록합니다. 같은 유형의 기존 규칙은 교체됩니다.
    pub fn register(&mut self, rule: Arc<dyn ExecutionRule>) {
        self.rules.insert(rule.order_type(), rule);
    }

    /// 주문 유형의 규칙을 조회합니다.
    pub fn rule(&self, order_type: OrderType) -> TraderResult<&Arc<dyn ExecutionRule>> {
        self.rules
            .get(&order_type)
            .ok_or_else(|| TraderError::Validation(format!("unsupported order type: {}", order_type)))
    }

    /// 공통 검증과 유형별 검증을 수행합니다.
    pub fn validate(&self, request: &OrderRequest) -> TraderResult<()> {
        request.validate_common()?;
        self.rule(request.order_type)?.validate(request)
    }

    /// 주문의 체결 가능 여부를 평가합니다.
    pub fn evaluate(&self, order: &mut Order, market: &MarketData) -> TraderResult<PriceDecision> {
        Ok(self.rule(order.order_type)?.evaluate(order, market))
    }

    /// 이번 회차 최대 체결 수량.
    pub fn slice_quantity(&self, order: &Order, market: &MarketData) -> TraderResult<Quantity> {
        Ok(self.rule(order.order_type)?.slice_quantity(order, market))
    }
}

impl Default for ExecutionRuleBook {
    fn default() -> Self {
        Self::standard()
    }
}
