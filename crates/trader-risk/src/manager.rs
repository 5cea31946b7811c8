//! 리스크 제어 엔진.
//!
//! 모든 리스크 작업을 위한 통합 인터페이스 제공:
//! - 사전 주문 검사
//! - 실시간 포트폴리오 감시
//! - 청산 계획
//! - 사용자 규칙, 거래 정지, 일일 거래 추적
//! - 리스크 이벤트 기록

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use trader_core::{
    Order, Position, Price, RepositoryError, RiskControlAction, RiskEvent, RiskEventRepository, RiskEventType,
    RiskLevel, RiskRule, UserId,
};
use uuid::Uuid;

use crate::checks::{check_order, names, OrderRiskInput, RiskCheckResult};
use crate::config::RiskControlConfig;
use crate::error::{RiskError, RiskResult};
use crate::limits::{DailyTradeStatus, DailyTradeTracker, TradeRecord};
use crate::liquidation::{plan_liquidation, LiquidationPlan};
use crate::monitor::{evaluate_portfolio, PortfolioMetrics, PortfolioSnapshot};

/// 사용자 거래 정지 정보.
#[derive(Debug, Clone, PartialEq)]
pub struct Suspension {
    pub reason: String,
    pub since: DateTime<Utc>,
}

/// 리스크 제어 엔진.
///
/// 내부 상태는 잠금으로 보호되므로 `Arc`로 공유해 여러 태스크에서 사용합니다.
pub struct RiskControlEngine {
    config: RiskControlConfig,
    /// 사용자별 규칙
    rules: RwLock<HashMap<UserId, Vec<RiskRule>>>,
    /// 거래 정지된 사용자
    suspensions: RwLock<HashMap<UserId, Suspension>>,
    /// 사용자별 일일 거래 추적기
    trackers: Mutex<HashMap<UserId, DailyTradeTracker>>,
    /// 이벤트 로그
    events: RwLock<Vec<RiskEvent>>,
    repository: Option<Arc<dyn RiskEventRepository>>,
}

impl RiskControlEngine {
    /// 설정을 검증하고 엔진을 생성합니다.
    pub fn new(config: RiskControlConfig) -> RiskResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            rules: RwLock::new(HashMap::new()),
            suspensions: RwLock::new(HashMap::new()),
            trackers: Mutex::new(HashMap::new()),
            events: RwLock::new(Vec::new()),
            repository: None,
        })
    }

    /// 리스크 이벤트 저장소를 연결합니다.
    pub fn with_repository(mut self, repository: Arc<dyn RiskEventRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// 설정 참조 조회.
    pub fn config(&self) -> &RiskControlConfig {
        &self.config
    }

    // ==================== Pre-trade ====================

    /// 주문의 사전 리스크를 검사합니다. 거부되면 리스크 이벤트를 남깁니다.
    pub async fn check_order_risk(
        &self,
        order: &Order,
        snapshot: &PortfolioSnapshot,
        market_price: Price,
    ) -> RiskCheckResult {
        let rules = self.rules_for(order.user_id).await;
        let suspended = self.is_suspended(order.user_id).await;
        let traded_today = self.traded_today(order.user_id).await;

        let input = OrderRiskInput {
            order,
            account: &snapshot.account,
            position: snapshot.position(&order.symbol),
            market_price,
            traded_today,
            daily_pnl: snapshot.daily_pnl,
            suspended,
            rules: &rules,
        };
        let result = check_order(&input, &self.config);

        if !result.approved {
            let event_type = if result.failed(names::CONCENTRATION) {
                RiskEventType::Concentration
            } else {
                RiskEventType::PreTradeRejected
            };
            let failed: Vec<&str> = result.failures().map(|c| c.name.as_str()).collect();
            let event = RiskEvent::new(order.user_id, event_type, result.level, result.message.clone())
                .with_order(order.id)
                .with_symbol(order.symbol.clone())
                .with_payload(json!({
                    "failed_checks": failed,
                    "quantity": order.quantity.to_string(),
                    "suggested_quantity": result.resize_suggestion().map(|q| q.to_string()),
                }));
            self.record_event(event).await;
        }

        result
    }

    // ==================== Real-time monitor ====================

    /// 포트폴리오 지표를 계산하고 필요하면 가장 심각한 액션 하나를 돌려줍니다.
    pub async fn monitor_portfolio(
        &self,
        snapshot: &PortfolioSnapshot,
    ) -> (PortfolioMetrics, Option<RiskControlAction>) {
        let metrics = PortfolioMetrics::compute(snapshot);
        let Some(decision) = evaluate_portfolio(snapshot, &metrics, &self.config) else {
            return (metrics, None);
        };

        warn!(
            user_id = snapshot.user_id,
            action = %decision.action.action_type,
            margin_ratio = %metrics.margin_ratio,
            daily_pnl_ratio = %metrics.daily_pnl_ratio,
            "Risk threshold breached"
        );

        let mut event = RiskEvent::new(
            snapshot.user_id,
            decision.event_type,
            decision.action.level,
            decision.action.reason.clone(),
        )
        .with_payload(json!({
            "action": decision.action.action_type.to_string(),
            "equity": metrics.equity.to_string(),
            "margin_ratio": metrics.margin_ratio.to_string(),
            "daily_pnl_ratio": metrics.daily_pnl_ratio.to_string(),
            "max_position_weight": metrics.max_position_weight.to_string(),
        }));
        if let Some(symbol) = &decision.action.symbol {
            event = event.with_symbol(symbol.clone());
        }
        self.record_event(event).await;

        (metrics, Some(decision.action))
    }

    /// 청산 계획을 만듭니다.
    pub fn plan_liquidation(&self, user_id: UserId, active_orders: &[Uuid], positions: &[Position]) -> LiquidationPlan {
        plan_liquidation(user_id, active_orders, positions)
    }

    // ==================== User rules ====================

    /// 규칙을 추가합니다.
    pub async fn add_rule(&self, rule: RiskRule) {
        info!(user_id = rule.user_id, rule = %rule.name, "Risk rule added");
        self.rules.write().await.entry(rule.user_id).or_default().push(rule);
    }

    /// 규칙을 제거합니다.
    pub async fn remove_rule(&self, user_id: UserId, rule_id: Uuid) -> RiskResult<RiskRule> {
        let mut rules = self.rules.write().await;
        let user_rules = rules.get_mut(&user_id).ok_or(RiskError::RuleNotFound(rule_id))?;
        let index = user_rules
            .iter()
            .position(|r| r.id == rule_id)
            .ok_or(RiskError::RuleNotFound(rule_id))?;
        Ok(user_rules.remove(index))
    }

    /// 사용자 규칙 목록.
    pub async fn rules_for(&self, user_id: UserId) -> Vec<RiskRule> {
        self.rules.read().await.get(&user_id).cloned().unwrap_or_default()
    }

    // ==================== Suspension ====================

    /// 사용자 거래를 정지합니다. 새로 정지되면 `true`.
    pub async fn suspend(&self, user_id: UserId, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        {
            let mut suspensions = self.suspensions.write().await;
            if suspensions.contains_key(&user_id) {
                return false;
            }
            suspensions.insert(
                user_id,
                Suspension {
                    reason: reason.clone(),
                    since: Utc::now(),
                },
            );
        }

        warn!(user_id, reason = %reason, "Trading suspended");
        self.record_event(RiskEvent::new(user_id, RiskEventType::TradingSuspended, RiskLevel::High, reason))
            .await;
        true
    }

    /// 거래 정지를 해제합니다. 정지 상태였으면 `true`.
    pub async fn resume(&self, user_id: UserId, reason: impl Into<String>) -> bool {
        if self.suspensions.write().await.remove(&user_id).is_none() {
            return false;
        }

        let reason = reason.into();
        info!(user_id, reason = %reason, "Trading resumed");
        self.record_event(RiskEvent::new(user_id, RiskEventType::TradingResumed, RiskLevel::Low, reason))
            .await;
        true
    }

    /// 거래 정지 여부.
    pub async fn is_suspended(&self, user_id: UserId) -> bool {
        self.suspensions.read().await.contains_key(&user_id)
    }

    /// 정지 정보.
    pub async fn suspension(&self, user_id: UserId) -> Option<Suspension> {
        self.suspensions.read().await.get(&user_id).cloned()
    }

    // ==================== Daily tracking ====================

    /// 체결을 일일 추적기에 기록합니다.
    pub async fn record_fill(
        &self,
        user_id: UserId,
        symbol: &str,
        value: Decimal,
        realized_pnl: Decimal,
    ) -> DailyTradeStatus {
        self.trackers
            .lock()
            .await
            .entry(user_id)
            .or_default()
            .record(TradeRecord::new(symbol, value, realized_pnl))
    }

    /// 오늘 누적 거래 금액.
    pub async fn traded_today(&self, user_id: UserId) -> Decimal {
        self.trackers
            .lock()
            .await
            .get_mut(&user_id)
            .map(|t| t.traded_value())
            .unwrap_or(Decimal::ZERO)
    }

    /// 오늘 거래 현황.
    pub async fn daily_status(&self, user_id: UserId) -> DailyTradeStatus {
        self.trackers.lock().await.entry(user_id).or_default().status()
    }

    // ==================== Events ====================

    /// 이벤트를 기록합니다. 저장 실패는 로그만 남깁니다.
    pub async fn record_event(&self, event: RiskEvent) -> RiskEvent {
        if let Some(repository) = &self.repository {
            if let Err(e) = repository.save_risk_event(&event).await {
                warn!(event_id = %event.id, error = %e, "Failed to persist risk event");
            }
        }
        self.events.write().await.push(event.clone());
        event
    }

    /// 사용자 이벤트 목록.
    pub async fn events(&self, user_id: UserId, unresolved_only: bool) -> Vec<RiskEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.user_id == user_id && (!unresolved_only || !e.resolved))
            .cloned()
            .collect()
    }

    /// 이벤트를 해소 처리합니다.
    pub async fn resolve_event(&self, event_id: Uuid) -> RiskResult<RiskEvent> {
        let resolved = {
            let mut events = self.events.write().await;
            let event = events
                .iter_mut()
                .find(|e| e.id == event_id)
                .ok_or(RepositoryError::NotFound {
                    entity: "risk event",
                    id: event_id,
                })?;
            event.resolve();
            event.clone()
        };

        if let Some(repository) = &self.repository {
            repository.resolve_risk_event(event_id).await?;
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use trader_core::{AccountInfo, InMemoryRepository, OrderRequest, RiskActionType, RiskRuleType, Side};

    fn snapshot() -> PortfolioSnapshot {
        PortfolioSnapshot {
            user_id: 1,
            account: AccountInfo {
                balance: dec!(100000),
                available: dec!(100000),
                margin: Decimal::ZERO,
                profit: Decimal::ZERO,
            },
            positions: vec![],
            daily_pnl: Decimal::ZERO,
        }
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = RiskControlConfig {
            liquidation_ratio: dec!(0.5),
            ..RiskControlConfig::default()
        };
        assert!(matches!(RiskControlEngine::new(config), Err(RiskError::Config(_))));
    }

    #[tokio::test]
    async fn test_rejection_records_event() {
        let repository = Arc::new(InMemoryRepository::new());
        let engine = RiskControlEngine::new(RiskControlConfig::default())
            .unwrap()
            .with_repository(repository.clone());
        let order = Order::from_request(OrderRequest::market(1, "AAPL", Side::Buy, dec!(500)));

        let result = engine.check_order_risk(&order, &snapshot(), dec!(100)).await;

        assert!(!result.approved);
        let events = engine.events(1, true).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, RiskEventType::Concentration);
        assert_eq!(events[0].order_id, Some(order.id));

        let stored = repository.risk_events(1, true).await.unwrap();
        assert_eq!(stored.len(), 1);

        let resolved = engine.resolve_event(events[0].id).await.unwrap();
        assert!(resolved.resolved);
        assert!(engine.events(1, true).await.is_empty());
    }

    #[tokio::test]
    async fn test_suspend_and_resume() {
        let engine = RiskControlEngine::new(RiskControlConfig::default()).unwrap();
        let order = Order::from_request(OrderRequest::market(1, "AAPL", Side::Buy, dec!(1)));

        assert!(engine.suspend(1, "manual").await);
        assert!(!engine.suspend(1, "again").await);
        assert!(engine.is_suspended(1).await);
        assert!(!engine.is_suspended(2).await);

        let result = engine.check_order_risk(&order, &snapshot(), dec!(100)).await;
        assert!(result.failed(names::SUSPENSION));

        assert!(engine.resume(1, "manual").await);
        assert!(!engine.resume(1, "manual").await);
        let result = engine.check_order_risk(&order, &snapshot(), dec!(100)).await;
        assert!(result.approved);

        let types: Vec<RiskEventType> = engine.events(1, false).await.iter().map(|e| e.event_type).collect();
        assert!(types.contains(&RiskEventType::TradingSuspended));
        assert!(types.contains(&RiskEventType::TradingResumed));
    }

    #[tokio::test]
    async fn test_rule_registry() {
        let engine = RiskControlEngine::new(RiskControlConfig::default()).unwrap();
        let rule = RiskRule::new(1, "max 10", RiskRuleType::MaxOrderQuantity, dec!(10))
            .with_action(RiskActionType::ReduceSize);
        let rule_id = rule.id;
        engine.add_rule(rule).await;

        let order = Order::from_request(OrderRequest::market(1, "AAPL", Side::Buy, dec!(15)));
        let result = engine.check_order_risk(&order, &snapshot(), dec!(100)).await;
        assert_eq!(result.resize_suggestion(), Some(dec!(10)));

        engine.remove_rule(1, rule_id).await.unwrap();
        assert!(engine.rules_for(1).await.is_empty());
        assert!(matches!(
            engine.remove_rule(1, rule_id).await,
            Err(RiskError::RuleNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_daily_volume_feeds_pre_trade_check() {
        let engine = RiskControlEngine::new(RiskControlConfig::default()).unwrap();
        engine.record_fill(1, "AAPL", dec!(499000), Decimal::ZERO).await;
        assert_eq!(engine.traded_today(1).await, dec!(499000));

        let order = Order::from_request(OrderRequest::market(1, "AAPL", Side::Buy, dec!(20)));
        let result = engine.check_order_risk(&order, &snapshot(), dec!(100)).await;
        assert!(result.failed(names::DAILY_VOLUME));
        assert_eq!(result.resize_suggestion(), Some(dec!(10)));
    }

    #[tokio::test]
    async fn test_monitor_records_event() {
        let engine = RiskControlEngine::new(RiskControlConfig::default()).unwrap();
        let mut snap = snapshot();
        let (mut position, _) = Position::open(1, "AAPL", dec!(100), dec!(100), Decimal::ZERO).unwrap();
        position.update_market_price(dec!(100)).unwrap();
        snap.positions.push(position);
        snap.account.margin = dec!(95000);

        let (metrics, action) = engine.monitor_portfolio(&snap).await;
        assert_eq!(metrics.margin_ratio, dec!(0.05));
        assert_eq!(action.unwrap().action_type, RiskActionType::Liquidation);
        assert_eq!(engine.events(1, false).await[0].event_type, RiskEventType::Liquidation);
    }
}
