//! 사전 주문 리스크 검사.
//!
//! 각 검사는 서로 독립적으로 실행되고, 결과는 가장 심각한 수준으로
//! 집계됩니다. 실패한 검사는 거부 또는 안전 수량으로의 축소를 제안합니다.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use trader_core::{
    AccountInfo, DecimalExt, Order, Position, Price, Quantity, RiskActionType, RiskControlAction, RiskLevel,
    RiskRule, RiskRuleType, UserId,
};

use crate::config::RiskControlConfig;

/// 제안 수량의 소수점 자릿수.
pub const QUANTITY_DP: u32 = 4;

/// 개별 검사 결과.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    /// 검사 이름
    pub name: String,
    pub passed: bool,
    pub level: RiskLevel,
    pub message: String,
    /// 실패 시 제안 액션
    pub suggestion: Option<RiskControlAction>,
}

impl CheckOutcome {
    fn pass(name: &str) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            level: RiskLevel::Low,
            message: String::new(),
            suggestion: None,
        }
    }

    fn fail(name: &str, level: RiskLevel, message: String, suggestion: RiskControlAction) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            level,
            message,
            suggestion: Some(suggestion),
        }
    }
}

/// 사전 주문 검사 집계 결과.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskCheckResult {
    /// 모든 검사 통과 여부
    pub approved: bool,
    /// 실패한 검사 중 가장 높은 심각도
    pub level: RiskLevel,
    pub checks: Vec<CheckOutcome>,
    /// 대표 제안 액션
    pub suggested_action: Option<RiskControlAction>,
    /// 실패 사유 요약
    pub message: String,
}

impl RiskCheckResult {
    /// 개별 결과를 집계합니다.
    pub fn from_checks(user_id: UserId, checks: Vec<CheckOutcome>) -> Self {
        let failures: Vec<&CheckOutcome> = checks.iter().filter(|c| !c.passed).collect();
        let approved = failures.is_empty();
        let level = failures.iter().map(|c| c.level).max().unwrap_or(RiskLevel::Low);
        let message = failures
            .iter()
            .map(|c| c.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");

        let suggested_action = if approved {
            None
        } else {
            match resize_quantity(&failures) {
                Some(quantity) => Some(RiskControlAction::reduce_size(user_id, quantity, level, message.clone())),
                None => Some(RiskControlAction::reject(user_id, level, message.clone())),
            }
        };

        Self {
            approved,
            level,
            checks,
            suggested_action,
            message,
        }
    }

    /// 실패한 검사.
    pub fn failures(&self) -> impl Iterator<Item = &CheckOutcome> {
        self.checks.iter().filter(|c| !c.passed)
    }

    /// 실패한 검사가 모두 축소를 제안하면 가장 작은 안전 수량.
    pub fn resize_suggestion(&self) -> Option<Quantity> {
        let failures: Vec<&CheckOutcome> = self.failures().collect();
        if failures.is_empty() {
            return None;
        }
        resize_quantity(&failures)
    }

    /// 특정 검사가 실패했는지 확인합니다.
    pub fn failed(&self, name: &str) -> bool {
        self.failures().any(|c| c.name == name)
    }
}

fn resize_quantity(failures: &[&CheckOutcome]) -> Option<Quantity> {
    let mut smallest: Option<Quantity> = None;
    for failure in failures {
        let suggestion = failure.suggestion.as_ref()?;
        if suggestion.action_type != RiskActionType::ReduceSize {
            return None;
        }
        let quantity = suggestion.quantity?;
        smallest = Some(smallest.map_or(quantity, |s| s.min(quantity)));
    }
    smallest.filter(|q| *q > Decimal::ZERO)
}

/// 검사 이름.
pub mod names {
    pub const SUSPENSION: &str = "suspension";
    pub const SYMBOL_ENABLED: &str = "symbol_enabled";
    pub const FUNDS: &str = "funds";
    pub const CONCENTRATION: &str = "concentration";
    pub const ORDER_VALUE: &str = "order_value";
    pub const DAILY_VOLUME: &str = "daily_volume";
    pub const USER_RULE: &str = "user_rule";
}

/// 사전 검사 입력.
#[derive(Debug, Clone)]
pub struct OrderRiskInput<'a> {
    pub order: &'a Order,
    pub account: &'a AccountInfo,
    /// 같은 심볼의 현재 열린 포지션
    pub position: Option<&'a Position>,
    pub market_price: Price,
    /// 오늘 누적 거래 금액
    pub traded_today: Decimal,
    /// 오늘 손익
    pub daily_pnl: Decimal,
    pub suspended: bool,
    /// 사용자 활성 규칙
    pub rules: &'a [RiskRule],
}

impl OrderRiskInput<'_> {
    /// 금액 계산 기준 가격 (지정가, 스톱 가격, 시장가 순).
    pub fn reference_price(&self) -> Price {
        self.order
            .price
            .or(self.order.stop_price)
            .unwrap_or(self.market_price)
    }

    fn current_signed(&self) -> Decimal {
        self.position
            .filter(|p| p.is_open())
            .map(|p| p.signed_quantity())
            .unwrap_or(Decimal::ZERO)
    }

    fn order_signed(&self) -> Decimal {
        self.order.signed_quantity(self.order.quantity)
    }

    /// 노출을 키우지 않는 반대 방향 주문인지 (뒤집지 않음).
    pub fn is_pure_reduction(&self) -> bool {
        let current = self.current_signed();
        let order = self.order_signed();
        !current.is_zero() && current.is_sign_positive() != order.is_sign_positive() && order.abs() <= current.abs()
    }

    /// 검사 면제 대상인 감소 전용 주문인지.
    pub fn is_exempt_reduce_only(&self) -> bool {
        self.order.reduce_only && self.is_pure_reduction()
    }

    /// 노출을 새로 늘리는 수량.
    fn increasing_quantity(&self) -> Quantity {
        let current = self.current_signed();
        let order = self.order_signed();
        if current.is_zero() || current.is_sign_positive() == order.is_sign_positive() {
            order.abs()
        } else {
            (order.abs() - current.abs()).max(Decimal::ZERO)
        }
    }

    /// 주어진 사후 절대 수량 상한에서 허용되는 최대 주문 수량.
    fn max_order_for_post_quantity(&self, max_post: Quantity) -> Quantity {
        let current = self.current_signed();
        let order = self.order_signed();
        let max = if current.is_zero() || current.is_sign_positive() == order.is_sign_positive() {
            max_post - current.abs()
        } else {
            current.abs() + max_post
        };
        max.max(Decimal::ZERO).floor_dp(QUANTITY_DP)
    }
}

fn reduce_or_reject(user_id: UserId, safe: Quantity, level: RiskLevel, message: &str) -> RiskControlAction {
    if safe > Decimal::ZERO {
        RiskControlAction::reduce_size(user_id, safe, level, message)
    } else {
        RiskControlAction::reject(user_id, level, message)
    }
}

/// 거래 정지 검사.
pub fn check_suspension(input: &OrderRiskInput<'_>) -> CheckOutcome {
    if !input.suspended {
        return CheckOutcome::pass(names::SUSPENSION);
    }
    let message = format!("Trading suspended for user {}", input.order.user_id);
    CheckOutcome::fail(
        names::SUSPENSION,
        RiskLevel::High,
        message.clone(),
        RiskControlAction::reject(input.order.user_id, RiskLevel::High, message),
    )
}

/// 심볼 거래 허용 검사.
pub fn check_symbol_enabled(input: &OrderRiskInput<'_>, config: &RiskControlConfig) -> CheckOutcome {
    if config.is_symbol_enabled(&input.order.symbol) {
        return CheckOutcome::pass(names::SYMBOL_ENABLED);
    }
    let message = format!("Trading disabled for symbol: {}", input.order.symbol);
    CheckOutcome::fail(
        names::SYMBOL_ENABLED,
        RiskLevel::High,
        message.clone(),
        RiskControlAction::reject(input.order.user_id, RiskLevel::High, message),
    )
}

/// 자금 적정성 검사. 노출을 늘리는 수량만 자금이 필요합니다.
pub fn check_funds(input: &OrderRiskInput<'_>, config: &RiskControlConfig) -> CheckOutcome {
    let increasing = input.increasing_quantity();
    if increasing.is_zero() {
        return CheckOutcome::pass(names::FUNDS);
    }

    let unit_cost = input.reference_price() * (Decimal::ONE + config.commission_rate);
    let required = increasing * unit_cost;
    if required <= input.account.available {
        return CheckOutcome::pass(names::FUNDS);
    }

    let affordable = input
        .account
        .available
        .max(Decimal::ZERO)
        .checked_ratio(unit_cost)
        .unwrap_or(Decimal::ZERO)
        .floor_dp(QUANTITY_DP);
    let safe = (input.order.quantity - increasing + affordable).floor_dp(QUANTITY_DP);
    let message = format!(
        "Insufficient funds: required {} exceeds available {}",
        required.round_dp(2),
        input.account.available.round_dp(2)
    );
    CheckOutcome::fail(
        names::FUNDS,
        RiskLevel::High,
        message.clone(),
        reduce_or_reject(input.order.user_id, safe, RiskLevel::High, &message),
    )
}

/// 포지션 집중도 검사 (체결 후 비중 vs 계좌 평가액).
pub fn check_concentration(input: &OrderRiskInput<'_>, config: &RiskControlConfig) -> CheckOutcome {
    let user_id = input.order.user_id;
    let equity = input.account.equity();
    if equity <= Decimal::ZERO {
        let message = format!("Account equity {} is not positive", equity);
        return CheckOutcome::fail(
            names::CONCENTRATION,
            RiskLevel::Critical,
            message.clone(),
            RiskControlAction::reject(user_id, RiskLevel::Critical, message),
        );
    }

    let price = input.reference_price();
    let current = input.current_signed();
    let post = current + input.order_signed();
    if post.abs() <= current.abs() {
        return CheckOutcome::pass(names::CONCENTRATION);
    }

    let limit = config.max_position_ratio_for(&input.order.symbol);
    let weight = post.abs() * price / equity;
    if weight <= limit {
        return CheckOutcome::pass(names::CONCENTRATION);
    }

    let max_post = (limit * equity)
        .checked_ratio(price)
        .unwrap_or(Decimal::ZERO);
    let max_allowed = input.max_order_for_post_quantity(max_post);
    let message = format!(
        "Position concentration {} exceeds limit {} for {}; maximum allowed order size is {}",
        weight.to_percentage_string(),
        limit.to_percentage_string(),
        input.order.symbol,
        max_allowed
    );
    CheckOutcome::fail(
        names::CONCENTRATION,
        RiskLevel::High,
        message.clone(),
        reduce_or_reject(user_id, max_allowed, RiskLevel::High, &message).with_symbol(input.order.symbol.clone()),
    )
}

/// 주문 1건 금액 한도 검사.
pub fn check_order_value(input: &OrderRiskInput<'_>, config: &RiskControlConfig) -> CheckOutcome {
    let price = input.reference_price();
    let value = input.order.quantity * price;
    let max_value = config.max_order_value_ratio * input.account.equity().max(Decimal::ZERO);
    if value <= max_value {
        return CheckOutcome::pass(names::ORDER_VALUE);
    }

    let safe = max_value.checked_ratio(price).unwrap_or(Decimal::ZERO).floor_dp(QUANTITY_DP);
    let message = format!("Order value {} exceeds limit {}", value.round_dp(2), max_value.round_dp(2));
    CheckOutcome::fail(
        names::ORDER_VALUE,
        RiskLevel::Medium,
        message.clone(),
        reduce_or_reject(input.order.user_id, safe, RiskLevel::Medium, &message),
    )
}

/// 일일 누적 거래 금액 검사.
pub fn check_daily_volume(input: &OrderRiskInput<'_>, config: &RiskControlConfig) -> CheckOutcome {
    let price = input.reference_price();
    let value = input.order.quantity * price;
    let max_volume = config.max_daily_volume_ratio * input.account.equity().max(Decimal::ZERO);
    if input.traded_today + value <= max_volume {
        return CheckOutcome::pass(names::DAILY_VOLUME);
    }

    let headroom = (max_volume - input.traded_today).max(Decimal::ZERO);
    let safe = headroom.checked_ratio(price).unwrap_or(Decimal::ZERO).floor_dp(QUANTITY_DP);
    let message = format!(
        "Daily traded volume {} would exceed limit {}",
        (input.traded_today + value).round_dp(2),
        max_volume.round_dp(2)
    );
    CheckOutcome::fail(
        names::DAILY_VOLUME,
        RiskLevel::Medium,
        message.clone(),
        reduce_or_reject(input.order.user_id, safe, RiskLevel::Medium, &message),
    )
}

/// 사용자 규칙 검사. 적용되는 규칙마다 하나의 결과를 냅니다.
pub fn check_user_rules(input: &OrderRiskInput<'_>) -> Vec<CheckOutcome> {
    let order = input.order;
    let price = input.reference_price();

    input
        .rules
        .iter()
        .filter(|rule| rule.active && rule.applies_to(&order.symbol))
        .map(|rule| {
            let (violated, safe, detail) = match rule.rule_type {
                RiskRuleType::MaxOrderQuantity => (
                    order.quantity > rule.value,
                    rule.value,
                    format!("order quantity {} exceeds {}", order.quantity, rule.value),
                ),
                RiskRuleType::MaxOrderValue => {
                    let value = order.quantity * price;
                    (
                        value > rule.value,
                        rule.value.checked_ratio(price).unwrap_or(Decimal::ZERO),
                        format!("order value {} exceeds {}", value.round_dp(2), rule.value),
                    )
                }
                RiskRuleType::MaxPositionQuantity => {
                    let post = (input.current_signed() + input.order_signed()).abs();
                    (
                        post > rule.value && post > input.current_signed().abs(),
                        input.max_order_for_post_quantity(rule.value),
                        format!("position quantity {} would exceed {}", post, rule.value),
                    )
                }
                RiskRuleType::MaxDailyLoss => (
                    input.daily_pnl < -rule.value && !input.is_pure_reduction(),
                    Decimal::ZERO,
                    format!("daily loss {} exceeds {}", (-input.daily_pnl).round_dp(2), rule.value),
                ),
                RiskRuleType::BlockSymbol => (
                    !input.is_pure_reduction(),
                    Decimal::ZERO,
                    format!("symbol {} is blocked", order.symbol),
                ),
            };

            if !violated {
                return CheckOutcome::pass(names::USER_RULE);
            }

            let message = format!("Rule '{}' violated: {}", rule.name, detail);
            let suggestion = match rule.action {
                RiskActionType::ReduceSize => {
                    reduce_or_reject(order.user_id, safe.floor_dp(QUANTITY_DP), rule.level, &message)
                }
                _ => RiskControlAction::reject(order.user_id, rule.level, message.clone()),
            };
            CheckOutcome::fail(names::USER_RULE, rule.level, message, suggestion)
        })
        .collect()
}

/// 모든 사전 검사를 실행합니다.
///
/// 뒤집지 않는 감소 전용 주문은 거래 정지, 집중도, 주문 금액, 거래량 검사를 건너뜁니다.
pub fn check_order(input: &OrderRiskInput<'_>, config: &RiskControlConfig) -> RiskCheckResult {
    let exempt = input.is_exempt_reduce_only();
    let mut checks = Vec::new();

    if !exempt {
        checks.push(check_suspension(input));
        checks.push(check_symbol_enabled(input, config));
    }
    checks.push(check_funds(input, config));
    if !exempt {
        checks.push(check_concentration(input, config));
        checks.push(check_order_value(input, config));
        checks.push(check_daily_volume(input, config));
    }
    checks.extend(check_user_rules(input));

    RiskCheckResult::from_checks(input.order.user_id, checks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use trader_core::{OrderRequest, Side};

    fn account(balance: Decimal) -> AccountInfo {
        AccountInfo {
            balance,
            available: balance,
            margin: Decimal::ZERO,
            profit: Decimal::ZERO,
        }
    }

    fn input<'a>(order: &'a Order, account: &'a AccountInfo, position: Option<&'a Position>) -> OrderRiskInput<'a> {
        OrderRiskInput {
            order,
            account,
            position,
            market_price: dec!(100),
            traded_today: Decimal::ZERO,
            daily_pnl: Decimal::ZERO,
            suspended: false,
            rules: &[],
        }
    }

    #[test]
    fn test_small_order_is_approved() {
        let order = Order::from_request(OrderRequest::market(1, "AAPL", Side::Buy, dec!(10)));
        let account = account(dec!(100000));
        let result = check_order(&input(&order, &account, None), &RiskControlConfig::default());

        assert!(result.approved);
        assert_eq!(result.level, RiskLevel::Low);
        assert!(result.suggested_action.is_none());
    }

    #[test]
    fn test_concentration_message_includes_max_size() {
        let order = Order::from_request(OrderRequest::market(1, "AAPL", Side::Buy, dec!(400)));
        let account = account(dec!(100000));
        let config = RiskControlConfig {
            max_order_value_ratio: dec!(0.9),
            ..RiskControlConfig::default()
        };
        let result = check_order(&input(&order, &account, None), &config);

        assert!(!result.approved);
        assert!(result.failed(names::CONCENTRATION));
        assert!(result.message.contains("maximum allowed order size is 300"));

        // 제안 수량의 체결 후 비중은 한도 이내
        let suggested = result.resize_suggestion().unwrap();
        assert_eq!(suggested, dec!(300));
        assert!(suggested * dec!(100) / account.equity() <= config.max_position_size_ratio);
    }

    #[test]
    fn test_concentration_accounts_for_existing_position() {
        let (position, _) = Position::open(1, "AAPL", dec!(200), dec!(100), Decimal::ZERO).unwrap();
        let order = Order::from_request(OrderRequest::market(1, "AAPL", Side::Buy, dec!(150)));
        let account = account(dec!(100000));
        let outcome = check_concentration(&input(&order, &account, Some(&position)), &RiskControlConfig::default());

        assert!(!outcome.passed);
        assert_eq!(outcome.suggestion.unwrap().quantity, Some(dec!(100)));
    }

    #[test]
    fn test_insufficient_funds_suggests_affordable_size() {
        let order = Order::from_request(OrderRequest::limit(1, "AAPL", Side::Buy, dec!(50), dec!(100)));
        let account = account(dec!(2002));
        let outcome = check_funds(&input(&order, &account, None), &RiskControlConfig::default());

        assert!(!outcome.passed);
        assert_eq!(outcome.level, RiskLevel::High);
        assert_eq!(outcome.suggestion.unwrap().quantity, Some(dec!(20)));
    }

    #[test]
    fn test_suspended_user_is_rejected() {
        let order = Order::from_request(OrderRequest::market(1, "AAPL", Side::Buy, dec!(1)));
        let account = account(dec!(100000));
        let mut data = input(&order, &account, None);
        data.suspended = true;

        let result = check_order(&data, &RiskControlConfig::default());
        assert!(!result.approved);
        assert!(result.failed(names::SUSPENSION));
        assert_eq!(
            result.suggested_action.unwrap().action_type,
            RiskActionType::Reject
        );
    }

    #[test]
    fn test_reduce_only_skips_exposure_checks() {
        let (position, _) = Position::open(1, "AAPL", dec!(900), dec!(100), Decimal::ZERO).unwrap();
        let order = Order::from_request(OrderRequest::market(1, "AAPL", Side::Sell, dec!(900)).reduce_only());
        let account = account(dec!(100000));
        let mut data = input(&order, &account, Some(&position));
        data.suspended = true;
        data.traded_today = dec!(10000000);

        let result = check_order(&data, &RiskControlConfig::default());
        assert!(result.approved, "{}", result.message);
    }

    #[test]
    fn test_user_rules() {
        let order = Order::from_request(OrderRequest::market(1, "AAPL", Side::Buy, dec!(50)));
        let account = account(dec!(100000));
        let rules = vec![
            RiskRule::new(1, "max qty", RiskRuleType::MaxOrderQuantity, dec!(20))
                .with_action(RiskActionType::ReduceSize)
                .with_level(RiskLevel::Medium),
            RiskRule::new(1, "no tsla", RiskRuleType::BlockSymbol, Decimal::ZERO).for_symbol("TSLA"),
        ];
        let mut data = input(&order, &account, None);
        data.rules = &rules;

        let result = check_order(&data, &RiskControlConfig::default());
        assert!(!result.approved);
        assert_eq!(result.level, RiskLevel::Medium);
        assert_eq!(result.resize_suggestion(), Some(dec!(20)));
    }

    #[test]
    fn test_worst_level_wins() {
        let order = Order::from_request(OrderRequest::market(1, "AAPL", Side::Buy, dec!(1000)));
        let account = account(dec!(1000));
        let result = check_order(&input(&order, &account, None), &RiskControlConfig::default());

        assert!(!result.approved);
        assert_eq!(result.level, RiskLevel::High);
        assert!(result.failed(names::FUNDS));
        assert!(result.failed(names::ORDER_VALUE));
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_suggested_size_respects_concentration(
            held in -500i64..500,
            qty in 1u32..2000,
            buy in any::<bool>(),
        ) {
            let account = account(dec!(100000));
            let position = (held != 0).then(|| {
                Position::open(1, "AAPL", Decimal::from(held), dec!(100), Decimal::ZERO).unwrap().0
            });
            let side = if buy { Side::Buy } else { Side::Sell };
            let order = Order::from_request(OrderRequest::market(1, "AAPL", side, Decimal::from(qty)));
            let config = RiskControlConfig::default();
            let outcome = check_concentration(&input(&order, &account, position.as_ref()), &config);

            if let Some(quantity) = outcome.suggestion.and_then(|s| s.quantity) {
                let signed = if buy { quantity } else { -quantity };
                let post = (Decimal::from(held) + signed).abs() * dec!(100) / account.equity();
                prop_assert!(post <= config.max_position_size_ratio);
            }
        }
    }
}
