//! 시뮬레이션 거래소를 위한 주문 매칭 엔진.
//!
//! 거래소 측 주문 사본을 보관하고, 시세가 들어올 때마다 주문 유형별
//! 실행 규칙으로 체결 여부와 가격을 결정합니다.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, warn};
use trader_core::{
    ExecutionRuleBook, Liquidity, MarketData, Order, OrderChanges, OrderFill, OrderStatusType, PriceDecision,
    Side, TimeInForce,
};
use uuid::Uuid;

use super::simulator::FillSizer;
use crate::{ExchangeError, ExchangeResult, ExternalOrderStatus};

/// 주문 체결 유형.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillType {
    /// 전량 체결
    Full,
    /// 부분 체결
    Partial,
}

/// 주문 매칭 결과.
#[derive(Debug, Clone)]
pub struct OrderMatch {
    /// 거래소 주문 ID
    pub external_id: String,
    /// 내부 주문 ID
    pub order_id: Uuid,
    pub symbol: String,
    pub side: Side,
    /// 체결 유형
    pub fill_type: FillType,
    /// 체결 수량
    pub filled_quantity: Decimal,
    /// 체결 가격
    pub fill_price: Decimal,
    /// 지불된 수수료
    pub commission: Decimal,
    /// 체결 타임스탬프
    pub timestamp: DateTime<Utc>,
}

/// 시뮬레이션 거래소를 위한 주문 매칭 엔진.
pub struct MatchingEngine {
    /// 거래소 주문 ID → 거래소 측 주문 사본 (ID 순 = 접수 순)
    orders: BTreeMap<String, Order>,
    /// 주문 유형별 실행 규칙
    rules: ExecutionRuleBook,
    /// 수수료율 (예: 0.1%의 경우 0.001)
    fee_rate: Decimal,
    /// 슬리피지율 (예: 0.05%의 경우 0.0005)
    slippage_rate: Decimal,
    /// 주문 ID 카운터
    next_order_id: u64,
}

impl MatchingEngine {
    /// 새로운 매칭 엔진을 생성합니다.
    pub fn new(fee_rate: Decimal, slippage_rate: Decimal) -> Self {
        Self {
            orders: BTreeMap::new(),
            rules: ExecutionRuleBook::standard(),
            fee_rate,
            slippage_rate,
            next_order_id: 1,
        }
    }

    /// 실행 규칙 테이블을 교체합니다.
    pub fn with_rules(mut self, rules: ExecutionRuleBook) -> Self {
        self.rules = rules;
        self
    }

    /// 다음 주문 ID를 생성합니다.
    pub fn generate_order_id(&mut self) -> String {
        let id = self.next_order_id;
        self.next_order_id += 1;
        format!("SIM-{:010}", id)
    }

    /// 주문을 접수하고 거래소 주문 ID를 반환합니다.
    ///
    /// 접수된 주문은 다음 시세부터 매칭됩니다.
    pub fn submit_order(&mut self, order: &Order) -> ExchangeResult<String> {
        let external_id = self.generate_order_id();
        let mut venue_order = order.clone();
        venue_order
            .mark_submitted(external_id.clone())
            .and_then(|_| venue_order.transition_to(OrderStatusType::Accepted))
            .map_err(|e| ExchangeError::ApiError {
                code: 400,
                message: e.to_string(),
            })?;

        debug!(external_id = %external_id, symbol = %order.symbol, order_type = %order.order_type, "Order accepted by matching engine");
        self.orders.insert(external_id.clone(), venue_order);
        Ok(external_id)
    }

    /// 주문을 취소합니다. 이미 종료된 주문이거나 모르는 주문이면 `false`.
    pub fn cancel_order(&mut self, external_id: &str) -> bool {
        match self.orders.get_mut(external_id) {
            Some(order) if !order.is_final() => order.transition_to(OrderStatusType::Cancelled).is_ok(),
            _ => false,
        }
    }

    /// 주문을 정정합니다. 정정이 거부되면 `false`.
    pub fn modify_order(&mut self, external_id: &str, changes: &OrderChanges) -> bool {
        match self.orders.get_mut(external_id) {
            Some(order) if !order.is_final() => match order.apply_changes(changes) {
                Ok(()) => true,
                Err(e) => {
                    debug!(external_id, error = %e, "Modify rejected by matching engine");
                    false
                }
            },
            _ => false,
        }
    }

    /// 거래소 측 주문 사본.
    pub fn get_order(&self, external_id: &str) -> Option<&Order> {
        self.orders.get(external_id)
    }

    /// 주문 상태 보고서.
    pub fn order_status(&self, external_id: &str) -> Option<ExternalOrderStatus> {
        self.orders.get(external_id).map(|order| ExternalOrderStatus {
            external_id: external_id.to_string(),
            status: order.status,
            filled_quantity: order.filled_quantity,
            average_price: order.average_fill_price,
            commission: order.commission,
            updated_at: order.updated_at,
        })
    }

    /// 미체결 주문 목록.
    pub fn get_open_orders(&self, symbol: Option<&str>) -> Vec<&Order> {
        self.orders
            .values()
            .filter(|o| !o.is_final())
            .filter(|o| symbol.map_or(true, |s| o.symbol == s))
            .collect()
    }

    /// 미체결 매수 주문에 묶인 금액.
    pub fn reserved_for_buys(&self, reference: impl Fn(&str) -> Option<Decimal>) -> Decimal {
        self.orders
            .values()
            .filter(|o| !o.is_final() && o.side == Side::Buy && !o.reduce_only)
            .map(|o| {
                let price = o.price.or_else(|| reference(&o.symbol)).unwrap_or(Decimal::ZERO);
                o.remaining_quantity * price
            })
            .sum()
    }

    /// 새 시세로 해당 심볼의 미체결 주문을 매칭합니다.
    pub fn process_quote(&mut self, quote: &MarketData, sizer: &mut dyn FillSizer) -> Vec<OrderMatch> {
        let mut matches = Vec::new();

        for (external_id, order) in self.orders.iter_mut() {
            if order.is_final() || order.symbol != quote.symbol {
                continue;
            }

            let decision = match self.rules.evaluate(order, quote) {
                Ok(decision) => decision,
                Err(e) => {
                    warn!(external_id = %external_id, error = %e, "No execution rule for order");
                    continue;
                }
            };

            let base_price = match decision {
                PriceDecision::Execute(price) => price,
                PriceDecision::Wait => {
                    if order.time_in_force == TimeInForce::IOC || order.time_in_force == TimeInForce::FOK {
                        if let Err(e) = order.transition_to(OrderStatusType::Cancelled) {
                            warn!(external_id = %external_id, error = %e, "Failed to expire unmatched order");
                        }
                    }
                    continue;
                }
            };

            let max_slice = self
                .rules
                .slice_quantity(order, quote)
                .unwrap_or(order.remaining_quantity);
            let quantity = sizer.fill_quantity(order.remaining_quantity, max_slice);
            if quantity <= Decimal::ZERO {
                continue;
            }
            if order.time_in_force == TimeInForce::FOK && quantity < order.remaining_quantity {
                if let Err(e) = order.transition_to(OrderStatusType::Cancelled) {
                    warn!(external_id = %external_id, error = %e, "Failed to kill FOK order");
                }
                continue;
            }

            let (fill_price, liquidity) = match order.price {
                Some(_) => (base_price, Liquidity::Maker),
                None => (apply_slippage(order.side, base_price, self.slippage_rate), Liquidity::Taker),
            };
            let commission = (quantity * fill_price * self.fee_rate).round_dp(8);
            let fill = OrderFill::new(order.id, quantity, fill_price, commission, liquidity);
            let timestamp = fill.filled_at;

            if let Err(e) = order.apply_fill(fill) {
                warn!(external_id = %external_id, error = %e, "Venue fill rejected");
                continue;
            }

            let fill_type = if order.is_filled() {
                FillType::Full
            } else {
                FillType::Partial
            };
            matches.push(OrderMatch {
                external_id: external_id.clone(),
                order_id: order.id,
                symbol: order.symbol.clone(),
                side: order.side,
                fill_type,
                filled_quantity: quantity,
                fill_price,
                commission,
                timestamp,
            });

            if order.time_in_force == TimeInForce::IOC && !order.is_final() {
                if let Err(e) = order.transition_to(OrderStatusType::Cancelled) {
                    warn!(external_id = %external_id, error = %e, "Failed to cancel IOC remainder");
                }
            }
        }

        matches
    }

    /// 모든 주문을 제거합니다.
    pub fn clear(&mut self) {
        self.orders.clear();
    }
}

fn apply_slippage(side: Side, price: Decimal, slippage_rate: Decimal) -> Decimal {
    let adjusted = match side {
        Side::Buy => price * (Decimal::ONE + slippage_rate),
        Side::Sell => price * (Decimal::ONE - slippage_rate),
    };
    adjusted.round_dp(8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::simulator::{FractionalFill, FullFill};
    use rust_decimal_macros::dec;
    use trader_core::OrderRequest;

    fn engine() -> MatchingEngine {
        MatchingEngine::new(dec!(0.001), Decimal::ZERO)
    }

    fn quote(price: Decimal) -> MarketData {
        MarketData::from_price("AAPL", price).with_volume(dec!(1000))
    }

    #[test]
    fn test_order_ids_are_sequential() {
        let mut engine = engine();
        assert_eq!(engine.generate_order_id(), "SIM-0000000001");
        assert_eq!(engine.generate_order_id(), "SIM-0000000002");
    }

    #[test]
    fn test_limit_buy_waits_then_fills() {
        let mut engine = engine();
        let order = Order::from_request(OrderRequest::limit(1, "AAPL", Side::Buy, dec!(100), dec!(150)));
        let id = engine.submit_order(&order).unwrap();

        assert!(engine.process_quote(&quote(dec!(151)), &mut FullFill).is_empty());

        let matches = engine.process_quote(&quote(dec!(149.5)), &mut FullFill);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].fill_type, FillType::Full);
        assert_eq!(matches[0].fill_price, dec!(149.5));
        assert_eq!(matches[0].commission, dec!(14.95));

        let status = engine.order_status(&id).unwrap();
        assert_eq!(status.status, OrderStatusType::Filled);
        assert_eq!(status.filled_quantity, dec!(100));
    }

    #[test]
    fn test_partial_fills_accumulate() {
        let mut engine = engine();
        let order = Order::from_request(OrderRequest::market(1, "AAPL", Side::Sell, dec!(10)));
        let id = engine.submit_order(&order).unwrap();
        let mut sizer = FractionalFill::new(dec!(0.4));

        let first = engine.process_quote(&quote(dec!(100)), &mut sizer);
        assert_eq!(first[0].filled_quantity, dec!(4));
        assert_eq!(first[0].fill_type, FillType::Partial);

        let status = engine.order_status(&id).unwrap();
        assert_eq!(status.status, OrderStatusType::PartiallyFilled);
        assert_eq!(status.filled_quantity, dec!(4));
    }

    #[test]
    fn test_market_order_slippage() {
        let mut engine = MatchingEngine::new(dec!(0.001), dec!(0.001));
        let order = Order::from_request(OrderRequest::market(1, "AAPL", Side::Buy, dec!(1)));
        engine.submit_order(&order).unwrap();

        let matches = engine.process_quote(&quote(dec!(100)), &mut FullFill);
        assert_eq!(matches[0].fill_price, dec!(100.1));
    }

    #[test]
    fn test_cancel_order() {
        let mut engine = engine();
        let order = Order::from_request(OrderRequest::limit(1, "AAPL", Side::Buy, dec!(5), dec!(90)));
        let id = engine.submit_order(&order).unwrap();

        assert!(engine.cancel_order(&id));
        assert!(!engine.cancel_order(&id));
        assert!(!engine.cancel_order("SIM-9999999999"));
        assert!(engine.process_quote(&quote(dec!(80)), &mut FullFill).is_empty());
        assert!(engine.get_open_orders(None).is_empty());
    }

    #[test]
    fn test_ioc_cancels_unfilled_remainder() {
        let mut engine = engine();
        let order = Order::from_request(
            OrderRequest::limit(1, "AAPL", Side::Buy, dec!(10), dec!(100)).with_time_in_force(TimeInForce::IOC),
        );
        let id = engine.submit_order(&order).unwrap();

        assert!(engine.process_quote(&quote(dec!(101)), &mut FullFill).is_empty());
        assert_eq!(engine.order_status(&id).unwrap().status, OrderStatusType::Cancelled);
    }

    #[test]
    fn test_fok_killed_when_only_partially_fillable() {
        let mut engine = engine();
        let order = Order::from_request(
            OrderRequest::market(1, "AAPL", Side::Buy, dec!(10)).with_time_in_force(TimeInForce::FOK),
        );
        let id = engine.submit_order(&order).unwrap();

        let matches = engine.process_quote(&quote(dec!(100)), &mut FractionalFill::new(dec!(0.5)));
        assert!(matches.is_empty());
        let status = engine.order_status(&id).unwrap();
        assert_eq!(status.status, OrderStatusType::Cancelled);
        assert_eq!(status.filled_quantity, Decimal::ZERO);
    }

    #[test]
    fn test_ioc_partial_fill_cancels_remainder() {
        let mut engine = engine();
        let order = Order::from_request(
            OrderRequest::market(1, "AAPL", Side::Buy, dec!(10)).with_time_in_force(TimeInForce::IOC),
        );
        let id = engine.submit_order(&order).unwrap();

        let matches = engine.process_quote(&quote(dec!(100)), &mut FractionalFill::new(dec!(0.4)));
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].filled_quantity, dec!(4));
        let status = engine.order_status(&id).unwrap();
        assert_eq!(status.status, OrderStatusType::Cancelled);
        assert_eq!(status.filled_quantity, dec!(4));
        assert!(engine.process_quote(&quote(dec!(100)), &mut FullFill).is_empty());
    }

    #[test]
    fn test_modify_limit_price() {
        let mut engine = engine();
        let order = Order::from_request(OrderRequest::limit(1, "AAPL", Side::Buy, dec!(10), dec!(90)));
        let id = engine.submit_order(&order).unwrap();

        let changes = OrderChanges {
            price: Some(dec!(99)),
            ..Default::default()
        };
        assert!(engine.modify_order(&id, &changes));
        let matches = engine.process_quote(&quote(dec!(98)), &mut FullFill);
        assert_eq!(matches[0].fill_price, dec!(98));
    }
}
