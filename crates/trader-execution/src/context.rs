//! 실행 컨텍스트.
//!
//! 코디네이터와 주문 모니터 태스크가 공유하는 상태를 한곳에 모읍니다.
//! 거래소 상태 보고를 내부 주문/포지션에 반영하는 정합(reconcile) 로직도
//! 여기에 있습니다.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, warn};
use trader_core::{
    ExecutionRuleBook, Liquidity, Order, OrderFill, OrderStateMachine, OrderStatusType, Price, TraderError,
    TraderResult, TradingRepository, UserId,
};
use trader_exchange::{ExchangeError, ExecutionAdapter, ExternalOrderStatus};
use trader_notification::NotificationPort;
use trader_risk::{PortfolioSnapshot, RiskControlConfig, RiskControlEngine};
use uuid::Uuid;

use crate::order_manager::OrderManager;
use crate::position_ledger::PositionLedger;

/// 실행 코어 설정.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// 주문 상태 폴링 주기 (밀리초)
    pub poll_interval_ms: u64,
    /// 포지션 시세 갱신 주기 (밀리초)
    pub price_interval_ms: u64,
    /// 포트폴리오 리스크 점검 주기 (밀리초)
    pub risk_interval_ms: u64,
    /// 모니터를 실패로 종료하기 전 허용되는 연속 폴링 실패 횟수
    pub max_consecutive_poll_failures: u32,
    /// 한도 초과 주문을 제안 수량으로 자동 축소할지
    pub auto_resize: bool,
    /// 포지션 버전 충돌 시 재시도 횟수
    pub ledger_max_retries: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            price_interval_ms: 1_000,
            risk_interval_ms: 60_000,
            max_consecutive_poll_failures: 1,
            auto_resize: false,
            ledger_max_retries: 3,
        }
    }
}

/// 어댑터 에러를 주문 관점의 에러로 변환합니다.
pub fn exchange_error(order_id: Uuid, error: ExchangeError) -> TraderError {
    if error.is_connectivity() {
        TraderError::NotConnected { order_id }
    } else {
        TraderError::Execution(error.to_string())
    }
}

/// 공유 실행 상태.
pub struct TradingContext {
    pub config: ExecutionConfig,
    /// 계좌가 등록되지 않은 사용자가 쓰는 어댑터
    default_adapter: Arc<dyn ExecutionAdapter>,
    /// 사용자별 어댑터
    accounts: RwLock<HashMap<UserId, Arc<dyn ExecutionAdapter>>>,
    pub ledger: PositionLedger,
    pub risk: RiskControlEngine,
    pub notifier: Arc<dyn NotificationPort>,
    pub repository: Arc<dyn TradingRepository>,
    pub rules: ExecutionRuleBook,
    pub orders: RwLock<OrderManager>,
}

impl TradingContext {
    /// 컨텍스트를 생성합니다. 리스크 설정이 잘못되면 `Config` 에러.
    pub fn new<R>(
        config: ExecutionConfig,
        adapter: Arc<dyn ExecutionAdapter>,
        risk_config: RiskControlConfig,
        notifier: Arc<dyn NotificationPort>,
        repository: Arc<R>,
    ) -> TraderResult<Self>
    where
        R: TradingRepository + 'static,
    {
        let risk = RiskControlEngine::new(risk_config)
            .map_err(|e| TraderError::Config(e.to_string()))?
            .with_repository(repository.clone());
        let ledger = PositionLedger::new(repository.clone()).with_max_retries(config.ledger_max_retries);

        Ok(Self {
            config,
            default_adapter: adapter,
            accounts: RwLock::new(HashMap::new()),
            ledger,
            risk,
            notifier,
            repository,
            rules: ExecutionRuleBook::standard(),
            orders: RwLock::new(OrderManager::new()),
        })
    }

    // ==================== 계좌 ====================

    /// 사용자 전용 어댑터를 등록합니다.
    pub async fn register_account(&self, user_id: UserId, adapter: Arc<dyn ExecutionAdapter>) {
        debug!(user_id, adapter = adapter.name(), "Account registered");
        self.accounts.write().await.insert(user_id, adapter);
    }

    /// 사용자의 어댑터.
    pub async fn adapter_for(&self, user_id: UserId) -> Arc<dyn ExecutionAdapter> {
        self.accounts
            .read()
            .await
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| self.default_adapter.clone())
    }

    /// 연결된 어댑터. 끊겨 있으면 한 번 재연결을 시도합니다.
    pub async fn connected_adapter(&self, user_id: UserId) -> Result<Arc<dyn ExecutionAdapter>, ExchangeError> {
        let adapter = self.adapter_for(user_id).await;
        if adapter.is_connected().await || adapter.connect().await {
            Ok(adapter)
        } else {
            Err(ExchangeError::Disconnected(format!("{} is not connected", adapter.name())))
        }
    }

    /// 어댑터 계좌와 원장 포지션으로 포트폴리오 스냅샷을 만듭니다.
    pub async fn portfolio_snapshot(&self, user_id: UserId) -> Result<PortfolioSnapshot, ExchangeError> {
        let adapter = self.adapter_for(user_id).await;
        let account = adapter.get_account_info().await?;
        Ok(PortfolioSnapshot {
            user_id,
            account,
            positions: self.ledger.positions(user_id).await,
            daily_pnl: self.ledger.daily_pnl(user_id).await,
        })
    }

    // ==================== 주문 기록 ====================

    /// 새 주문을 등록하고 저장합니다.
    pub async fn register_order(&self, order: &Order) -> TraderResult<()> {
        self.orders.write().await.add_order(order.clone())?;
        self.repository.save_order(order).await?;
        Ok(())
    }

    /// 주문 변경을 레지스트리와 저장소에 반영합니다.
    pub async fn record_order(&self, order: &Order) -> TraderResult<()> {
        self.orders.write().await.update(order)?;
        self.repository.save_order(order).await?;
        Ok(())
    }

    /// 레지스트리의 주문 스냅샷.
    pub async fn order(&self, order_id: Uuid) -> Option<Order> {
        self.orders.read().await.get_order(order_id).cloned()
    }

    /// 상태를 전이하고 기록한 뒤 상태 변경 알림을 보냅니다.
    pub async fn transition(&self, order: &mut Order, to: OrderStatusType) -> TraderResult<()> {
        let previous = order.transition_to(to)?;
        self.record_order(order).await?;
        self.notifier.notify_status_change(order, previous);
        Ok(())
    }

    // ==================== 동결 ====================

    /// 주문에 남은 동결분을 포지션에서 해제합니다.
    pub async fn release_freeze(&self, order: &Order) {
        let quantity = self.orders.write().await.release_frozen(order.id);
        if quantity <= Decimal::ZERO {
            return;
        }
        let Some(position) = self.ledger.position(order.user_id, &order.symbol).await else {
            return;
        };
        let quantity = quantity.min(position.frozen_quantity);
        if quantity <= Decimal::ZERO {
            return;
        }
        if let Err(e) = self.ledger.unfreeze(order.user_id, &order.symbol, quantity).await {
            warn!(order_id = %order.id, error = %e, "Failed to release frozen quantity");
        }
    }

    // ==================== 정합 ====================

    /// 거래소 상태 보고를 주문에 반영하고 새로 적용된 체결을 반환합니다.
    ///
    /// 같은 보고를 여러 번 반영해도 결과는 같습니다. 최종 상태 주문은 건드리지
    /// 않습니다. 정지된 주문도 거래소에서 일어난 체결과 종료는 반영하며,
    /// 아직 활성이면 다시 SUSPENDED로 돌립니다.
    pub async fn reconcile(&self, order: &mut Order, status: &ExternalOrderStatus) -> TraderResult<Vec<OrderFill>> {
        if order.is_final() {
            return Ok(Vec::new());
        }

        let before = (order.status, order.filled_quantity);
        let suspended = order.status == OrderStatusType::Suspended;
        let mut fills = Vec::new();

        let venue_filled = status.filled_quantity.min(order.quantity);
        let delta = venue_filled - order.filled_quantity;
        if delta > Decimal::ZERO {
            if suspended {
                warn!(order_id = %order.id, %delta, "Venue filled a suspended order");
            }
            let price = self.incremental_price(order, status, venue_filled, delta)?;
            let commission = (status.commission - order.commission).max(Decimal::ZERO);
            let liquidity = if order.price.is_some() {
                Liquidity::Maker
            } else {
                Liquidity::Taker
            };
            let fill = OrderFill::new(order.id, delta, price, commission, liquidity);
            self.apply_fill(order, fill.clone()).await?;
            fills.push(fill);
        }

        match status.status {
            OrderStatusType::Accepted if order.status == OrderStatusType::Submitted => {
                order.transition_to(OrderStatusType::Accepted)?;
            }
            OrderStatusType::Cancelled | OrderStatusType::Rejected | OrderStatusType::Expired
                if OrderStateMachine::is_valid_transition(order.status, status.status) =>
            {
                let previous = order.transition_to(status.status)?;
                self.notifier.notify_status_change(order, previous);
                if status.status == OrderStatusType::Cancelled {
                    self.notifier.notify_cancelled(order, "cancelled by venue");
                }
            }
            _ => {}
        }

        if suspended && !order.is_final() && order.status != OrderStatusType::Suspended {
            let previous = order.transition_to(OrderStatusType::Suspended)?;
            self.notifier.notify_status_change(order, previous);
        }
        if order.is_final() {
            self.release_freeze(order).await;
        }
        if (order.status, order.filled_quantity) != before {
            self.record_order(order).await?;
        }
        Ok(fills)
    }

    /// 누적 평균가 보고에서 이번 증분 체결 가격을 구합니다.
    fn incremental_price(
        &self,
        order: &Order,
        status: &ExternalOrderStatus,
        venue_filled: Decimal,
        delta: Decimal,
    ) -> TraderResult<Price> {
        let Some(venue_average) = status.average_price else {
            return order.price.ok_or_else(|| {
                TraderError::Execution(format!("venue reported fill for {} without a price", order.id))
            });
        };
        let prior_value = order.average_fill_price.unwrap_or(Decimal::ZERO) * order.filled_quantity;
        let price = (venue_average * venue_filled - prior_value) / delta;
        if price > Decimal::ZERO {
            Ok(price)
        } else {
            Ok(venue_average)
        }
    }

    /// 체결 1건을 반영합니다.
    ///
    /// 포지션 원장이 먼저 성공해야 주문, 동결 기록, 체결 저장소, 일일 추적기에
    /// 반영됩니다. 원장이 실패하면 주문은 그대로이므로 다음 정합에서 같은
    /// 체결을 다시 시도합니다.
    async fn apply_fill(&self, order: &mut Order, fill: OrderFill) -> TraderResult<()> {
        let previous = order.status;
        let mut updated = order.clone();
        if updated.status == OrderStatusType::Suspended {
            updated.transition_to(OrderStatusType::Accepted)?;
        }
        updated.apply_fill(fill.clone())?;

        let release = self.orders.read().await.frozen_for(order.id).min(fill.quantity);
        let application = match self
            .ledger
            .apply_fill(
                order.user_id,
                &order.symbol,
                order.signed_quantity(fill.quantity),
                fill.price,
                fill.commission,
                release,
            )
            .await
        {
            Ok(application) => application,
            Err(e) => {
                error!(order_id = %order.id, fill_id = %fill.id, error = %e, "Failed to apply fill to position ledger");
                self.notifier.notify_execution_error(order, &e.to_string());
                return Err(e);
            }
        };

        self.orders.write().await.take_frozen(order.id, fill.quantity);
        *order = updated;
        if let Err(e) = self.repository.save_fill(&fill).await {
            error!(order_id = %order.id, fill_id = %fill.id, error = %e, "Failed to persist fill");
        }
        self.risk
            .record_fill(order.user_id, &order.symbol, fill.value, application.realized)
            .await;

        debug!(
            order_id = %order.id,
            quantity = %fill.quantity,
            price = %fill.price,
            realized = %application.realized,
            "Fill applied"
        );
        self.notifier.notify_filled(order, &fill);
        self.notifier.notify_execution_progress(order, order.fill_ratio());
        if previous != order.status {
            self.notifier.notify_status_change(order, previous);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use trader_core::{
        FillRepository, InMemoryRepository, OrderRepository, OrderRequest, Position, PositionHistory,
        PositionHistoryRepository, PositionRepository, RepositoryError, RepositoryResult, RiskEvent,
        RiskEventRepository, Side,
    };
    use trader_exchange::{SimulatedConfig, SimulatedExchange};
    use trader_notification::RecordingNotifier;

    /// 포지션 저장을 실패시킬 수 있는 저장소.
    #[derive(Default)]
    struct FlakyPositions {
        inner: InMemoryRepository,
        fail_positions: AtomicBool,
    }

    #[async_trait]
    impl OrderRepository for FlakyPositions {
        async fn save_order(&self, order: &Order) -> RepositoryResult<()> {
            self.inner.save_order(order).await
        }
        async fn find_order(&self, id: Uuid) -> RepositoryResult<Option<Order>> {
            self.inner.find_order(id).await
        }
        async fn orders_for_user(&self, user_id: UserId) -> RepositoryResult<Vec<Order>> {
            self.inner.orders_for_user(user_id).await
        }
    }

    #[async_trait]
    impl FillRepository for FlakyPositions {
        async fn save_fill(&self, fill: &OrderFill) -> RepositoryResult<()> {
            self.inner.save_fill(fill).await
        }
        async fn fills_for_order(&self, order_id: Uuid) -> RepositoryResult<Vec<OrderFill>> {
            self.inner.fills_for_order(order_id).await
        }
    }

    #[async_trait]
    impl PositionRepository for FlakyPositions {
        async fn save_position(&self, position: &Position, expected_version: Option<u64>) -> RepositoryResult<()> {
            if self.fail_positions.load(Ordering::SeqCst) {
                return Err(RepositoryError::Storage("position store offline".to_string()));
            }
            self.inner.save_position(position, expected_version).await
        }
        async fn find_position(&self, id: Uuid) -> RepositoryResult<Option<Position>> {
            self.inner.find_position(id).await
        }
        async fn open_position(&self, user_id: UserId, symbol: &str) -> RepositoryResult<Option<Position>> {
            self.inner.open_position(user_id, symbol).await
        }
        async fn positions_for_user(&self, user_id: UserId) -> RepositoryResult<Vec<Position>> {
            self.inner.positions_for_user(user_id).await
        }
    }

    #[async_trait]
    impl PositionHistoryRepository for FlakyPositions {
        async fn append_history(&self, history: &PositionHistory) -> RepositoryResult<()> {
            self.inner.append_history(history).await
        }
        async fn history_for_position(&self, position_id: Uuid) -> RepositoryResult<Vec<PositionHistory>> {
            self.inner.history_for_position(position_id).await
        }
    }

    #[async_trait]
    impl RiskEventRepository for FlakyPositions {
        async fn save_risk_event(&self, event: &RiskEvent) -> RepositoryResult<()> {
            self.inner.save_risk_event(event).await
        }
        async fn resolve_risk_event(&self, id: Uuid) -> RepositoryResult<RiskEvent> {
            self.inner.resolve_risk_event(id).await
        }
        async fn risk_events(&self, user_id: UserId, unresolved_only: bool) -> RepositoryResult<Vec<RiskEvent>> {
            self.inner.risk_events(user_id, unresolved_only).await
        }
    }

    fn context_with<R: TradingRepository + 'static>(repository: Arc<R>) -> (TradingContext, Arc<RecordingNotifier>) {
        let exchange = Arc::new(SimulatedExchange::new(
            SimulatedConfig::default().with_symbol("AAPL", dec!(150)),
        ));
        let notifier = Arc::new(RecordingNotifier::new());
        let ctx = TradingContext::new(
            ExecutionConfig::default(),
            exchange,
            RiskControlConfig::default(),
            notifier.clone(),
            repository,
        )
        .unwrap();
        (ctx, notifier)
    }

    fn context() -> (TradingContext, Arc<RecordingNotifier>) {
        context_with(Arc::new(InMemoryRepository::new()))
    }

    fn status(order: &Order, state: OrderStatusType, filled: Decimal, average: Decimal, commission: Decimal) -> ExternalOrderStatus {
        ExternalOrderStatus {
            external_id: order.external_id.clone().unwrap_or_default(),
            status: state,
            filled_quantity: filled,
            average_price: Some(average),
            commission,
            updated_at: Utc::now(),
        }
    }

    async fn submitted_order(ctx: &TradingContext) -> Order {
        let mut order = Order::from_request(OrderRequest::limit(1, "AAPL", Side::Buy, dec!(100), dec!(150)));
        ctx.register_order(&order).await.unwrap();
        order.mark_submitted("SIM-1").unwrap();
        ctx.record_order(&order).await.unwrap();
        order
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let (ctx, notifier) = context();
        let mut order = submitted_order(&ctx).await;

        let report = status(&order, OrderStatusType::PartiallyFilled, dec!(40), dec!(149.5), dec!(6));
        let fills = ctx.reconcile(&mut order, &report).await.unwrap();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].quantity, dec!(40));

        let again = ctx.reconcile(&mut order, &report).await.unwrap();
        assert!(again.is_empty());
        assert_eq!(order.filled_quantity, dec!(40));
        assert_eq!(order.status, OrderStatusType::PartiallyFilled);
        assert_eq!(notifier.of_kind("order_filled").len(), 1);

        let position = ctx.ledger.position(1, "AAPL").await.unwrap();
        assert_eq!(position.quantity, dec!(40));
    }

    #[tokio::test]
    async fn test_incremental_price_from_cumulative_average() {
        let (ctx, _) = context();
        let mut order = submitted_order(&ctx).await;

        let venue_status = status(&order, OrderStatusType::PartiallyFilled, dec!(40), dec!(149), dec!(4));
        ctx.reconcile(&mut order, &venue_status)
            .await
            .unwrap();
        // 누적 평균 149.6 = (40 × 149 + 60 × 150) / 100
        let venue_status = status(&order, OrderStatusType::Filled, dec!(100), dec!(149.6), dec!(10));
        let fills = ctx
            .reconcile(&mut order, &venue_status)
            .await
            .unwrap();

        assert_eq!(fills[0].quantity, dec!(60));
        assert_eq!(fills[0].price, dec!(150));
        assert_eq!(fills[0].commission, dec!(6));
        assert_eq!(order.status, OrderStatusType::Filled);
        assert_eq!(order.commission, dec!(10));
    }

    #[tokio::test]
    async fn test_reconcile_applies_venue_fill_to_suspended_order() {
        let (ctx, _) = context();
        let mut order = submitted_order(&ctx).await;
        order.transition_to(OrderStatusType::Suspended).unwrap();

        let venue_status = status(&order, OrderStatusType::PartiallyFilled, dec!(40), dec!(150), Decimal::ZERO);
        let fills = ctx
            .reconcile(&mut order, &venue_status)
            .await
            .unwrap();
        assert_eq!(fills.len(), 1);
        assert_eq!(order.filled_quantity, dec!(40));
        assert_eq!(order.status, OrderStatusType::Suspended);
        assert_eq!(ctx.ledger.position(1, "AAPL").await.unwrap().quantity, dec!(40));

        let venue_status = status(&order, OrderStatusType::Filled, dec!(100), dec!(150), Decimal::ZERO);
        ctx.reconcile(&mut order, &venue_status)
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatusType::Filled);
        assert_eq!(ctx.ledger.position(1, "AAPL").await.unwrap().quantity, dec!(100));
        assert_eq!(ctx.order(order.id).await.unwrap().status, OrderStatusType::Filled);
    }

    #[tokio::test]
    async fn test_suspended_order_follows_venue_cancel() {
        let (ctx, _) = context();
        let mut order = submitted_order(&ctx).await;
        order.transition_to(OrderStatusType::Suspended).unwrap();

        let venue_status = status(&order, OrderStatusType::Cancelled, dec!(10), dec!(150), Decimal::ZERO);
        ctx.reconcile(&mut order, &venue_status)
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatusType::Cancelled);
        assert_eq!(order.filled_quantity, dec!(10));
    }

    #[tokio::test]
    async fn test_ledger_failure_leaves_fill_for_next_reconcile() {
        let repository = Arc::new(FlakyPositions::default());
        let (ctx, notifier) = context_with(repository.clone());
        let mut order = submitted_order(&ctx).await;
        ctx.orders.write().await.set_frozen(order.id, dec!(40));
        let report = status(&order, OrderStatusType::PartiallyFilled, dec!(40), dec!(149.5), dec!(6));

        repository.fail_positions.store(true, Ordering::SeqCst);
        assert!(ctx.reconcile(&mut order, &report).await.is_err());

        assert_eq!(order.filled_quantity, Decimal::ZERO);
        assert_eq!(order.status, OrderStatusType::Submitted);
        assert!(order.fills.is_empty());
        assert!(ctx.repository.fills_for_order(order.id).await.unwrap().is_empty());
        assert!(ctx.ledger.position(1, "AAPL").await.is_none());
        assert_eq!(ctx.orders.read().await.frozen_for(order.id), dec!(40));
        assert_eq!(notifier.of_kind("execution_error").len(), 1);
        assert!(notifier.of_kind("order_filled").is_empty());

        repository.fail_positions.store(false, Ordering::SeqCst);
        let fills = ctx.reconcile(&mut order, &report).await.unwrap();

        assert_eq!(fills.len(), 1);
        assert_eq!(order.filled_quantity, dec!(40));
        assert_eq!(ctx.repository.fills_for_order(order.id).await.unwrap().len(), 1);
        assert_eq!(ctx.ledger.position(1, "AAPL").await.unwrap().quantity, dec!(40));
        assert_eq!(ctx.orders.read().await.frozen_for(order.id), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_reconcile_mirrors_venue_cancel() {
        let (ctx, notifier) = context();
        let mut order = submitted_order(&ctx).await;

        let venue_status = status(&order, OrderStatusType::Cancelled, Decimal::ZERO, dec!(150), Decimal::ZERO);
        ctx.reconcile(&mut order, &venue_status)
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatusType::Cancelled);
        assert_eq!(notifier.of_kind("order_cancelled").len(), 1);
        assert_eq!(ctx.orders.read().await.active_order_count(), 0);
    }

    #[test]
    fn test_exchange_error_mapping() {
        let id = Uuid::new_v4();
        assert!(matches!(
            exchange_error(id, ExchangeError::NetworkError("down".into())),
            TraderError::NotConnected { order_id } if order_id == id
        ));
        assert!(matches!(
            exchange_error(id, ExchangeError::RateLimited),
            TraderError::Execution(_)
        ));
    }
}
