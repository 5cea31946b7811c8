//! 청산 계획.
//!
//! 청산은 항상 같은 순서로 진행됩니다: 미체결 주문 전부 취소, 열린 포지션을
//! 리스크 기여도 내림차순으로 강제 청산, 마지막으로 거래 정지.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use trader_core::{OrderRequest, Position, Quantity, Side, UserId};
use uuid::Uuid;

use crate::monitor::closing_side;

/// 리스크 제어로 생성된 청산 주문의 전략 ID.
pub const RISK_CONTROL_STRATEGY: &str = "risk-control";

/// 포지션 1건의 강제 청산 지시.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForceClose {
    pub symbol: String,
    pub side: Side,
    pub quantity: Quantity,
    /// 정렬 기준 (−평가손익 / 총 원가)
    pub risk_contribution: Decimal,
}

impl ForceClose {
    /// 포지션 일부 또는 전부를 닫는 지시.
    pub fn for_position(position: &Position, quantity: Quantity) -> Self {
        Self {
            symbol: position.symbol.clone(),
            side: closing_side(position),
            quantity: quantity.min(position.quantity),
            risk_contribution: position.risk_contribution(),
        }
    }

    /// 감소 전용 시장가 주문 요청.
    pub fn to_request(&self, user_id: UserId) -> OrderRequest {
        OrderRequest::market(user_id, self.symbol.clone(), self.side, self.quantity)
            .with_strategy(RISK_CONTROL_STRATEGY)
            .reduce_only()
    }
}

/// 청산 계획.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidationPlan {
    pub user_id: UserId,
    /// 먼저 취소할 주문
    pub cancel_orders: Vec<Uuid>,
    /// 취소 후 순서대로 제출할 청산
    pub close_positions: Vec<ForceClose>,
    /// 마지막에 거래 정지
    pub suspend: bool,
}

impl LiquidationPlan {
    /// 할 일이 없는 계획인지.
    pub fn is_empty(&self) -> bool {
        self.cancel_orders.is_empty() && self.close_positions.is_empty()
    }
}

/// 청산 계획을 만듭니다.
///
/// 리스크 기여도가 같으면 평가 금액이 큰 포지션이 먼저입니다.
pub fn plan_liquidation(user_id: UserId, active_orders: &[Uuid], positions: &[Position]) -> LiquidationPlan {
    let mut open: Vec<&Position> = positions
        .iter()
        .filter(|p| p.is_open() && p.user_id == user_id)
        .collect();
    open.sort_by(|a, b| {
        b.risk_contribution()
            .cmp(&a.risk_contribution())
            .then_with(|| b.market_value.abs().cmp(&a.market_value.abs()))
    });

    LiquidationPlan {
        user_id,
        cancel_orders: active_orders.to_vec(),
        close_positions: open
            .into_iter()
            .map(|p| ForceClose::for_position(p, p.quantity))
            .collect(),
        suspend: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn marked(symbol: &str, quantity: Decimal, cost: Decimal, price: Decimal) -> Position {
        let (mut p, _) = Position::open(1, symbol, quantity, cost, Decimal::ZERO).unwrap();
        p.update_market_price(price).unwrap();
        p
    }

    #[test]
    fn test_largest_loss_ratio_first() {
        let positions = vec![
            marked("AAPL", dec!(10), dec!(100), dec!(95)),  // -5%
            marked("TSLA", dec!(-5), dec!(200), dec!(260)), // -30%
            marked("MSFT", dec!(20), dec!(50), dec!(55)),   // +10%
        ];
        let orders = vec![Uuid::new_v4(), Uuid::new_v4()];

        let plan = plan_liquidation(1, &orders, &positions);

        assert_eq!(plan.cancel_orders, orders);
        let symbols: Vec<&str> = plan.close_positions.iter().map(|c| c.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["TSLA", "AAPL", "MSFT"]);
        assert_eq!(plan.close_positions[0].side, Side::Buy);
        assert_eq!(plan.close_positions[0].quantity, dec!(5));
        assert!(plan.suspend);
    }

    #[test]
    fn test_force_close_request_is_reduce_only() {
        let position = marked("AAPL", dec!(10), dec!(100), dec!(95));
        let request = ForceClose::for_position(&position, dec!(50)).to_request(1);

        assert!(request.reduce_only);
        assert_eq!(request.side, Side::Sell);
        assert_eq!(request.quantity, dec!(10));
    }

    #[test]
    fn test_empty_plan() {
        let plan = plan_liquidation(1, &[], &[]);
        assert!(plan.is_empty());
    }
}
