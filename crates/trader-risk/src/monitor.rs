//! 실시간 포트폴리오 리스크 감시.
//!
//! 계좌와 포지션 스냅샷으로 지표를 계산하고, 임계값을 넘으면 가장 심각한
//! 제어 액션 하나를 결정합니다. 심각도 순서:
//! `MARGIN_CALL < SUSPEND_TRADING < FORCE_CLOSE_POSITION < LIQUIDATION`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use trader_core::{
    AccountInfo, DecimalExt, Position, RiskActionType, RiskControlAction, RiskEventType, RiskLevel, Side, UserId,
};

use crate::checks::QUANTITY_DP;
use crate::config::RiskControlConfig;

/// 사용자 포트폴리오 스냅샷.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub user_id: UserId,
    /// 어댑터가 보고한 계좌 정보
    pub account: AccountInfo,
    /// 열린 포지션 (현재가 반영)
    pub positions: Vec<Position>,
    /// 오늘 손익 (오늘 종료된 포지션 포함)
    pub daily_pnl: Decimal,
}

impl PortfolioSnapshot {
    /// 심볼의 열린 포지션.
    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.iter().find(|p| p.symbol == symbol && p.is_open())
    }
}

/// 포트폴리오 리스크 지표.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioMetrics {
    /// 평가액 = 잔고 + 평가손익
    pub equity: Decimal,
    /// 사용 중 증거금
    pub used_margin: Decimal,
    /// 여유 증거금 비율 = (평가액 - 사용 증거금) / 평가액, [0, 1].
    ///
    /// 사용 증거금 / 평가액이 아니라 그 보수(1 - 사용률)입니다. 위험이 커질수록
    /// 작아지며, `margin_call_ratio` 미만이면 마진콜, `liquidation_ratio`
    /// 미만이면 전체 청산입니다. 평가액이 0 이하이면 0.
    pub margin_ratio: Decimal,
    pub daily_pnl: Decimal,
    /// 오늘 손익 / 평가액
    pub daily_pnl_ratio: Decimal,
    /// 가장 큰 단일 포지션 비중
    pub max_position_weight: Decimal,
    /// 그 포지션의 심볼
    pub max_position_symbol: Option<String>,
    /// 전체 포지션 평가 금액 합
    pub total_exposure: Decimal,
}

impl PortfolioMetrics {
    /// 스냅샷에서 지표를 계산합니다.
    pub fn compute(snapshot: &PortfolioSnapshot) -> Self {
        let equity = snapshot.account.equity();
        let used_margin = snapshot.account.margin;

        let margin_ratio = if equity <= Decimal::ZERO {
            Decimal::ZERO
        } else {
            ((equity - used_margin) / equity).max(Decimal::ZERO).min(Decimal::ONE)
        };

        let daily_pnl_ratio = snapshot
            .daily_pnl
            .checked_ratio(equity)
            .filter(|_| equity > Decimal::ZERO)
            .unwrap_or(Decimal::ZERO);

        let mut total_exposure = Decimal::ZERO;
        let mut max_position_weight = Decimal::ZERO;
        let mut max_position_symbol = None;
        for position in snapshot.positions.iter().filter(|p| p.is_open()) {
            let value = position.market_value.abs();
            total_exposure += value;
            if equity > Decimal::ZERO {
                let weight = value / equity;
                if weight > max_position_weight {
                    max_position_weight = weight;
                    max_position_symbol = Some(position.symbol.clone());
                }
            }
        }

        Self {
            equity,
            used_margin,
            margin_ratio,
            daily_pnl: snapshot.daily_pnl,
            daily_pnl_ratio,
            max_position_weight,
            max_position_symbol,
            total_exposure,
        }
    }
}

/// 감시 결과로 결정된 액션과 대응하는 이벤트 유형.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorDecision {
    pub action: RiskControlAction,
    pub event_type: RiskEventType,
}

/// 지표를 임계값과 비교해 가장 심각한 액션 하나를 고릅니다.
pub fn evaluate_portfolio(
    snapshot: &PortfolioSnapshot,
    metrics: &PortfolioMetrics,
    config: &RiskControlConfig,
) -> Option<MonitorDecision> {
    let user_id = snapshot.user_id;
    let has_exposure = snapshot.positions.iter().any(Position::is_open);
    let mut candidates: Vec<MonitorDecision> = Vec::new();

    if has_exposure && metrics.margin_ratio < config.liquidation_ratio {
        candidates.push(MonitorDecision {
            action: RiskControlAction::new(
                RiskActionType::Liquidation,
                user_id,
                RiskLevel::Critical,
                format!(
                    "Margin ratio {} below liquidation ratio {}",
                    metrics.margin_ratio.to_percentage_string(),
                    config.liquidation_ratio.to_percentage_string()
                ),
            ),
            event_type: RiskEventType::Liquidation,
        });
    } else if has_exposure && metrics.margin_ratio < config.margin_call_ratio {
        candidates.push(MonitorDecision {
            action: RiskControlAction::new(
                RiskActionType::MarginCall,
                user_id,
                RiskLevel::Medium,
                format!(
                    "Margin ratio {} below margin call ratio {}",
                    metrics.margin_ratio.to_percentage_string(),
                    config.margin_call_ratio.to_percentage_string()
                ),
            ),
            event_type: RiskEventType::MarginCall,
        });
    }

    if let Some(decision) = concentration_decision(snapshot, metrics, config) {
        candidates.push(decision);
    }

    if metrics.daily_pnl_ratio <= -config.max_daily_loss_ratio {
        candidates.push(MonitorDecision {
            action: RiskControlAction::new(
                RiskActionType::SuspendTrading,
                user_id,
                RiskLevel::High,
                format!(
                    "Daily loss {} reached limit {}",
                    (-metrics.daily_pnl_ratio).to_percentage_string(),
                    config.max_daily_loss_ratio.to_percentage_string()
                ),
            ),
            event_type: RiskEventType::DailyLossLimit,
        });
    }

    candidates
        .into_iter()
        .max_by_key(|d| d.action.action_type.escalation())
}

/// 한도를 넘은 포지션 중 초과 비중이 가장 큰 포지션의 부분 청산.
fn concentration_decision(
    snapshot: &PortfolioSnapshot,
    metrics: &PortfolioMetrics,
    config: &RiskControlConfig,
) -> Option<MonitorDecision> {
    if metrics.equity <= Decimal::ZERO {
        return None;
    }

    snapshot
        .positions
        .iter()
        .filter(|p| p.is_open() && p.current_price > Decimal::ZERO)
        .filter_map(|p| {
            let limit = config.max_position_ratio_for(&p.symbol);
            let value = p.market_value.abs();
            let excess = value - limit * metrics.equity;
            (excess > Decimal::ZERO).then_some((p, limit, excess))
        })
        .max_by(|a, b| a.2.cmp(&b.2))
        .map(|(position, limit, excess)| {
            let quantity = (excess / position.current_price)
                .round_dp_with_strategy(QUANTITY_DP, rust_decimal::RoundingStrategy::AwayFromZero)
                .min(position.quantity);
            let weight = position.market_value.abs() / metrics.equity;
            MonitorDecision {
                action: RiskControlAction::new(
                    RiskActionType::ForceClosePosition,
                    snapshot.user_id,
                    RiskLevel::High,
                    format!(
                        "{} weight {} exceeds limit {}",
                        position.symbol,
                        weight.to_percentage_string(),
                        limit.to_percentage_string()
                    ),
                )
                .with_symbol(position.symbol.clone())
                .with_quantity(quantity),
                event_type: RiskEventType::Concentration,
            }
        })
}

/// 포지션을 줄이는 쪽의 주문 방향.
pub fn closing_side(position: &Position) -> Side {
    if position.signed_quantity() > Decimal::ZERO {
        Side::Sell
    } else {
        Side::Buy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn position(symbol: &str, quantity: Decimal, cost: Decimal, price: Decimal) -> Position {
        let (mut p, _) = Position::open(1, symbol, quantity, cost, Decimal::ZERO).unwrap();
        p.update_market_price(price).unwrap();
        p
    }

    fn snapshot(balance: Decimal, margin: Decimal, positions: Vec<Position>) -> PortfolioSnapshot {
        let profit = positions.iter().map(|p| p.unrealized_pnl).sum();
        PortfolioSnapshot {
            user_id: 1,
            account: AccountInfo {
                balance,
                available: balance + profit - margin,
                margin,
                profit,
            },
            positions,
            daily_pnl: Decimal::ZERO,
        }
    }

    #[test]
    fn test_metrics() {
        let snap = snapshot(dec!(100000), dec!(20000), vec![position("AAPL", dec!(200), dec!(100), dec!(100))]);
        let metrics = PortfolioMetrics::compute(&snap);

        assert_eq!(metrics.equity, dec!(100000));
        assert_eq!(metrics.margin_ratio, dec!(0.8));
        assert_eq!(metrics.max_position_weight, dec!(0.2));
        assert_eq!(metrics.max_position_symbol.as_deref(), Some("AAPL"));
        assert!(evaluate_portfolio(&snap, &metrics, &RiskControlConfig::default()).is_none());
    }

    #[test]
    fn test_margin_call_and_liquidation() {
        let config = RiskControlConfig::default();

        let snap = snapshot(dec!(100000), dec!(85000), vec![position("AAPL", dec!(250), dec!(100), dec!(100))]);
        let metrics = PortfolioMetrics::compute(&snap);
        let decision = evaluate_portfolio(&snap, &metrics, &config).unwrap();
        assert_eq!(decision.action.action_type, RiskActionType::MarginCall);

        let snap = snapshot(dec!(100000), dec!(95000), vec![position("AAPL", dec!(250), dec!(100), dec!(100))]);
        let metrics = PortfolioMetrics::compute(&snap);
        let decision = evaluate_portfolio(&snap, &metrics, &config).unwrap();
        assert_eq!(decision.action.action_type, RiskActionType::Liquidation);
        assert_eq!(decision.action.level, RiskLevel::Critical);
    }

    #[test]
    fn test_force_close_quantity_restores_limit() {
        let snap = snapshot(dec!(100000), dec!(40000), vec![position("AAPL", dec!(400), dec!(100), dec!(100))]);
        let metrics = PortfolioMetrics::compute(&snap);
        let decision = evaluate_portfolio(&snap, &metrics, &RiskControlConfig::default()).unwrap();

        assert_eq!(decision.action.action_type, RiskActionType::ForceClosePosition);
        assert_eq!(decision.action.symbol.as_deref(), Some("AAPL"));
        assert_eq!(decision.action.quantity, Some(dec!(100)));
    }

    #[test]
    fn test_daily_loss_suspends_and_most_severe_wins() {
        let mut snap = snapshot(dec!(100000), dec!(10000), vec![position("AAPL", dec!(100), dec!(100), dec!(100))]);
        snap.daily_pnl = dec!(-6000);
        let metrics = PortfolioMetrics::compute(&snap);
        let decision = evaluate_portfolio(&snap, &metrics, &RiskControlConfig::default()).unwrap();
        assert_eq!(decision.action.action_type, RiskActionType::SuspendTrading);
        assert_eq!(decision.event_type, RiskEventType::DailyLossLimit);

        // 증거금 부족(경고)과 일일 손실(정지)이 겹치면 정지가 우선
        let mut snap = snapshot(dec!(100000), dec!(85000), vec![position("AAPL", dec!(100), dec!(100), dec!(100))]);
        snap.daily_pnl = dec!(-6000);
        let metrics = PortfolioMetrics::compute(&snap);
        let decision = evaluate_portfolio(&snap, &metrics, &RiskControlConfig::default()).unwrap();
        assert_eq!(decision.action.action_type, RiskActionType::SuspendTrading);
    }

    #[test]
    fn test_non_positive_equity_liquidates() {
        let snap = snapshot(dec!(1000), dec!(500), vec![position("AAPL", dec!(100), dec!(100), dec!(80))]);
        let metrics = PortfolioMetrics::compute(&snap);
        assert_eq!(metrics.margin_ratio, Decimal::ZERO);

        let decision = evaluate_portfolio(&snap, &metrics, &RiskControlConfig::default()).unwrap();
        assert_eq!(decision.action.action_type, RiskActionType::Liquidation);
    }
}
