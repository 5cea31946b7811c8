//! 실행 코디네이터.
//!
//! 주문 수명 주기의 진입점입니다.
//! - 제출: 검증 → 등록 → 연결 확인 → 사전 리스크 검사 → 동결 → 어댑터 제출 → 모니터 시작
//! - 연결 불가 주문은 PENDING으로 보류했다가 다음 제출 때 먼저 재시도
//! - 취소/정정/정지/재개는 주문 모니터를 통해 수행
//! - 주기 작업: 포지션 시세 갱신과 손절/익절, 포트폴리오 리스크 점검, 종료된 모니터 정리
//! - 리스크 제어 액션 실행 (경고, 거래 정지, 강제 청산, 전체 청산)

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};
use trader_core::{
    execution_span, Order, OrderChanges, OrderRequest, OrderStatusType, Position, PositionSummary, RiskActionType,
    RiskControlAction, RiskEvent, RiskEventType, RiskLevel, StopTrigger, TraderError, TraderResult, UserId,
};
use trader_exchange::ExchangeError;
use trader_risk::{check_names, closing_side, ForceClose, LiquidationPlan, RiskCheckResult, RISK_CONTROL_STRATEGY};
use uuid::Uuid;

use crate::context::{exchange_error, TradingContext};
use crate::monitor::{spawn_monitor, MonitorCommand, MonitorExit, MonitorHandle};

/// 손절/익절로 생성된 주문의 전략 ID.
pub const STOP_TRIGGER_STRATEGY: &str = "stop-trigger";

/// 실행 코디네이터.
pub struct ExecutionCoordinator {
    ctx: Arc<TradingContext>,
    /// 주문별 모니터
    monitors: Mutex<HashMap<Uuid, MonitorHandle>>,
    /// 주기 작업 종료 신호
    shutdown: CancellationToken,
    background: Mutex<Option<JoinHandle<()>>>,
    /// 마지막 일일 초기화 날짜 (UTC)
    last_reset: Mutex<NaiveDate>,
}

impl ExecutionCoordinator {
    pub fn new(ctx: TradingContext) -> Self {
        Self {
            ctx: Arc::new(ctx),
            monitors: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
            background: Mutex::new(None),
            last_reset: Mutex::new(Utc::now().date_naive()),
        }
    }

    /// 공유 컨텍스트.
    pub fn context(&self) -> &Arc<TradingContext> {
        &self.ctx
    }

    // ==================== 제출 ====================

    /// 주문을 제출합니다.
    ///
    /// 성공하면 SUBMITTED 주문을 반환합니다. 연결 불가면 주문은 PENDING으로
    /// 보류되고 `NotConnected`가 반환됩니다.
    pub async fn submit(&self, request: OrderRequest) -> TraderResult<Order> {
        self.ctx.rules.validate(&request)?;

        let order = Order::from_request(request);
        let span = execution_span!("submit_order", order.user_id, order.symbol, order.id);
        async move {
            self.ctx.register_order(&order).await?;
            info!(
                side = %order.side,
                order_type = %order.order_type,
                quantity = %order.quantity,
                "Order created"
            );

            self.retry_pending(order.user_id, Some(order.id)).await;
            self.process(order).await
        }
        .instrument(span)
        .await
    }

    /// 보류된 주문을 접수 순서대로 다시 처리합니다.
    ///
    /// 다시 연결 불가면 그 자리에서 멈춥니다. 처리된 주문 수를 반환합니다.
    pub async fn retry_pending(&self, user_id: UserId, exclude: Option<Uuid>) -> usize {
        let held = self.ctx.orders.read().await.held_for(user_id);
        let mut processed = 0;

        for order_id in held {
            if exclude == Some(order_id) {
                continue;
            }
            let order = match self.ctx.order(order_id).await {
                Some(order) if order.status == OrderStatusType::Pending => order,
                _ => {
                    self.ctx.orders.write().await.release_hold(order_id);
                    continue;
                }
            };

            debug!(%order_id, "Retrying held order");
            match self.process(order).await {
                Err(TraderError::NotConnected { .. }) => break,
                Ok(_) | Err(_) => {
                    self.ctx.orders.write().await.release_hold(order_id);
                    processed += 1;
                }
            }
        }
        processed
    }

    async fn process(&self, mut order: Order) -> TraderResult<Order> {
        let adapter = match self.ctx.connected_adapter(order.user_id).await {
            Ok(adapter) => adapter,
            Err(_) => return self.hold(&order).await,
        };

        let market = match adapter.get_market_data(&order.symbol).await {
            Ok(market) => market,
            Err(e) => return self.handle_adapter_failure(order, e).await,
        };
        let snapshot = match self.ctx.portfolio_snapshot(order.user_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => return self.handle_adapter_failure(order, e).await,
        };
        let position = snapshot.position(&order.symbol).cloned();

        if order.reduce_only {
            if let Err(reason) = check_reduce_only(&order, position.as_ref()) {
                let error = TraderError::RiskRejection {
                    order_id: order.id,
                    reason: reason.clone(),
                };
                self.ctx.notifier.notify_risk_alert(
                    order.user_id,
                    Some(order.id),
                    RiskEventType::PreTradeRejected,
                    &reason,
                    RiskLevel::Medium,
                );
                return self.reject(order, &reason, error).await;
            }
        }

        let result = self.ctx.risk.check_order_risk(&order, &snapshot, market.price).await;
        if !result.approved {
            let resized = if self.ctx.config.auto_resize {
                result
                    .resize_suggestion()
                    .filter(|q| *q > Decimal::ZERO && *q < order.quantity)
            } else {
                None
            };
            let Some(quantity) = resized else {
                return self.reject_for_risk(order, &result).await;
            };

            let original = order.quantity;
            order.apply_changes(&OrderChanges {
                quantity: Some(quantity),
                ..Default::default()
            })?;
            let recheck = self.ctx.risk.check_order_risk(&order, &snapshot, market.price).await;
            if !recheck.approved {
                return self.reject_for_risk(order, &recheck).await;
            }

            info!(%original, resized = %quantity, "Order resized to risk limit");
            self.ctx.record_order(&order).await?;
            self.ctx.notifier.notify_risk_alert(
                order.user_id,
                Some(order.id),
                risk_event_type(&result),
                &format!("order resized from {} to {}: {}", original, quantity, result.message),
                result.level,
            );
        }

        if let Some(position) = position.as_ref().filter(|p| closing_side(p) == order.side) {
            if let Err(e) = self.freeze_for(&order, position).await {
                if order.reduce_only {
                    let reason = format!("could not reserve {} {}: {}", order.quantity, order.symbol, e);
                    let error = TraderError::RiskRejection {
                        order_id: order.id,
                        reason: reason.clone(),
                    };
                    return self.reject(order, &reason, error).await;
                }
                warn!(error = %e, "Failed to freeze position quantity");
            }
        }

        match adapter.submit_order(&order).await {
            Ok(submitted) if submitted.success => {
                let external_id = submitted.external_id.unwrap_or_else(|| order.id.to_string());
                let previous = order.mark_submitted(external_id.clone())?;
                self.ctx.record_order(&order).await?;
                self.ctx.notifier.notify_status_change(&order, previous);
                info!(%external_id, "Order submitted");

                self.spawn(order.clone(), false).await;
                Ok(order)
            }
            Ok(submitted) => {
                self.ctx.release_freeze(&order).await;
                let reason = match submitted.error_code {
                    Some(code) => format!("{}: {}", code, submitted.message),
                    None => submitted.message,
                };
                let error = TraderError::AdapterRejection {
                    order_id: order.id,
                    reason: reason.clone(),
                };
                self.reject(order, &reason, error).await
            }
            Err(e) => {
                self.ctx.release_freeze(&order).await;
                self.handle_adapter_failure(order, e).await
            }
        }
    }

    /// 감소 주문에 필요한 수량을 포지션에서 동결합니다.
    ///
    /// 감소 전용 주문은 전체 수량을 동결해야 하고, 일반 주문은 가용 수량
    /// 범위에서만 동결합니다.
    async fn freeze_for(&self, order: &Order, position: &Position) -> TraderResult<()> {
        let quantity = if order.reduce_only {
            order.quantity
        } else {
            order.quantity.min(position.available_quantity)
        };
        if quantity <= Decimal::ZERO {
            return Ok(());
        }
        self.ctx.ledger.freeze(order.user_id, &order.symbol, quantity).await?;
        self.ctx.orders.write().await.set_frozen(order.id, quantity);
        Ok(())
    }

    async fn handle_adapter_failure(&self, order: Order, error: ExchangeError) -> TraderResult<Order> {
        if error.is_retryable() {
            warn!(error = %error, "Adapter unavailable, holding order");
            return self.hold(&order).await;
        }
        let reason = error.to_string();
        let failure = TraderError::AdapterRejection {
            order_id: order.id,
            reason: reason.clone(),
        };
        self.reject(order, &reason, failure).await
    }

    async fn hold(&self, order: &Order) -> TraderResult<Order> {
        self.ctx.orders.write().await.hold(order.id);
        warn!(order_id = %order.id, "Execution adapter not connected, order held as pending");
        Err(TraderError::NotConnected { order_id: order.id })
    }

    async fn reject(&self, mut order: Order, reason: &str, error: TraderError) -> TraderResult<Order> {
        self.ctx.transition(&mut order, OrderStatusType::Rejected).await?;
        self.ctx.notifier.notify_rejected(&order, reason);
        warn!(order_id = %order.id, reason, "Order rejected");
        Err(error)
    }

    async fn reject_for_risk(&self, order: Order, result: &RiskCheckResult) -> TraderResult<Order> {
        let reason = result.message.clone();
        self.ctx.notifier.notify_risk_alert(
            order.user_id,
            Some(order.id),
            risk_event_type(result),
            &reason,
            result.level,
        );
        let error = if result.failed(check_names::FUNDS) {
            TraderError::InsufficientFunds {
                order_id: order.id,
                reason: reason.clone(),
            }
        } else {
            TraderError::RiskRejection {
                order_id: order.id,
                reason: reason.clone(),
            }
        };
        self.reject(order, &reason, error).await
    }

    // ==================== 취소 ====================

    /// 주문을 취소합니다.
    ///
    /// 모니터를 멈추고 마지막 상태를 정합한 뒤 거래소에 취소를 요청합니다.
    /// 거래소에 도달할 수 없으면 취소를 계속 재시도하는 모니터를 띄우고
    /// 아직 활성인 주문을 반환합니다.
    pub async fn cancel(&self, order_id: Uuid) -> TraderResult<Order> {
        let handle = self.monitors.lock().await.remove(&order_id);
        let mut order = match handle {
            Some(handle) => match handle.stop().await {
                Ok(exit) => exit.into_order(),
                Err(e) => {
                    error!(%order_id, error = %e, "Order monitor panicked");
                    self.ctx.order(order_id).await.ok_or(TraderError::OrderNotFound(order_id))?
                }
            },
            None => self.ctx.order(order_id).await.ok_or(TraderError::OrderNotFound(order_id))?,
        };

        if order.is_final() {
            return Err(TraderError::Validation(format!(
                "order {} is already {}",
                order.id, order.status
            )));
        }

        if order.status == OrderStatusType::Pending {
            self.ctx.orders.write().await.release_hold(order.id);
            self.ctx.transition(&mut order, OrderStatusType::Cancelled).await?;
            self.ctx.notifier.notify_cancelled(&order, "cancelled before submission");
            info!(%order_id, "Pending order cancelled");
            return Ok(order);
        }

        let adapter = match self.ctx.connected_adapter(order.user_id).await {
            Ok(adapter) => adapter,
            Err(_) => return Ok(self.defer_cancel(order).await),
        };
        if let Some(external_id) = order.external_id.clone() {
            match adapter.get_order_status(&external_id).await {
                Ok(Some(status)) => {
                    self.ctx.reconcile(&mut order, &status).await?;
                }
                Ok(None) => {}
                Err(e) if e.is_connectivity() => return Ok(self.defer_cancel(order).await),
                Err(e) => warn!(%order_id, error = %e, "Final status poll before cancel failed"),
            }
        }
        if order.is_final() {
            info!(%order_id, status = %order.status, "Order completed before cancel");
            return Ok(order);
        }

        match adapter.cancel_order(&order).await {
            Ok(true) => {
                self.ctx.transition(&mut order, OrderStatusType::Cancelled).await?;
                self.ctx.release_freeze(&order).await;
                self.ctx.notifier.notify_cancelled(&order, "cancelled by request");
                info!(%order_id, filled = %order.filled_quantity, "Order cancelled");
                Ok(order)
            }
            Ok(false) => {
                self.spawn(order, false).await;
                Err(TraderError::Execution(format!("venue refused to cancel order {}", order_id)))
            }
            Err(e) if e.is_connectivity() => Ok(self.defer_cancel(order).await),
            Err(e) => {
                self.spawn(order, false).await;
                Err(exchange_error(order_id, e))
            }
        }
    }

    async fn defer_cancel(&self, order: Order) -> Order {
        warn!(order_id = %order.id, "Venue unreachable, cancel will be retried");
        self.spawn(order.clone(), true).await;
        order
    }

    // ==================== 모니터 명령 ====================

    /// 주문을 정정합니다.
    pub async fn modify(&self, order_id: Uuid, changes: OrderChanges) -> TraderResult<Order> {
        let sender = self.monitors.lock().await.get(&order_id).map(MonitorHandle::sender);
        let Some(sender) = sender else {
            return self.modify_pending(order_id, &changes).await;
        };

        let (tx, rx) = oneshot::channel();
        sender
            .send(MonitorCommand::Modify { changes, reply: tx })
            .await
            .map_err(|_| monitor_gone(order_id))?;
        rx.await.map_err(|_| monitor_gone(order_id))?
    }

    async fn modify_pending(&self, order_id: Uuid, changes: &OrderChanges) -> TraderResult<Order> {
        let mut order = self.ctx.order(order_id).await.ok_or(TraderError::OrderNotFound(order_id))?;
        if order.status != OrderStatusType::Pending {
            return Err(TraderError::Validation(format!(
                "order {} is {} and not being monitored",
                order_id, order.status
            )));
        }
        order.apply_changes(changes)?;
        self.ctx.record_order(&order).await?;
        Ok(order)
    }

    /// 개별 주문을 정지합니다.
    pub async fn suspend_order(&self, order_id: Uuid) -> TraderResult<Order> {
        self.command(order_id, |reply| MonitorCommand::Suspend { reply }).await?
    }

    /// 정지된 주문을 재개합니다.
    pub async fn resume_order(&self, order_id: Uuid) -> TraderResult<Order> {
        self.command(order_id, |reply| MonitorCommand::Resume { reply }).await?
    }

    /// 모니터가 보유한 주문 스냅샷.
    pub async fn monitored_order(&self, order_id: Uuid) -> TraderResult<Order> {
        self.command(order_id, |reply| MonitorCommand::Snapshot { reply }).await
    }

    async fn command<R>(
        &self,
        order_id: Uuid,
        make: impl FnOnce(oneshot::Sender<R>) -> MonitorCommand,
    ) -> TraderResult<R> {
        let sender = self
            .monitors
            .lock()
            .await
            .get(&order_id)
            .map(MonitorHandle::sender)
            .ok_or(TraderError::OrderNotFound(order_id))?;

        let (tx, rx) = oneshot::channel();
        sender.send(make(tx)).await.map_err(|_| monitor_gone(order_id))?;
        rx.await.map_err(|_| monitor_gone(order_id))
    }

    // ==================== 리스크 액션 ====================

    /// 리스크 제어 액션을 실행합니다.
    pub async fn execute_action(&self, action: RiskControlAction) -> TraderResult<()> {
        let user_id = action.user_id;
        info!(user_id, action = %action.action_type, reason = %action.reason, "Executing risk action");

        match action.action_type {
            RiskActionType::Reject | RiskActionType::ReduceSize => {
                debug!(user_id, "Pre-trade action has nothing to execute");
            }
            RiskActionType::MarginCall => {
                self.ctx.notifier.notify_risk_alert(
                    user_id,
                    None,
                    RiskEventType::MarginCall,
                    &action.reason,
                    action.level,
                );
            }
            RiskActionType::SuspendTrading => {
                self.suspend_user(user_id, &action.reason).await;
            }
            RiskActionType::ResumeTrading => {
                self.resume_user(user_id, &action.reason).await;
            }
            RiskActionType::ForceClosePosition => {
                self.force_close(&action).await?;
            }
            RiskActionType::Liquidation => {
                self.liquidate(user_id, &action.reason).await?;
            }
        }
        Ok(())
    }

    /// 사용자 거래를 정지하고 작업 중인 일반 주문을 SUSPENDED로 바꿉니다.
    pub async fn suspend_user(&self, user_id: UserId, reason: &str) -> bool {
        if !self.ctx.risk.suspend(user_id, reason).await {
            return false;
        }

        let targets: Vec<Uuid> = self
            .ctx
            .orders
            .read()
            .await
            .get_active_orders(Some(user_id))
            .into_iter()
            .filter(|o| !o.reduce_only && o.status.is_working())
            .map(|o| o.id)
            .collect();
        for order_id in targets {
            if let Err(e) = self.suspend_order(order_id).await {
                warn!(%order_id, error = %e, "Failed to suspend order");
            }
        }

        self.ctx.notifier.notify_risk_alert(
            user_id,
            None,
            RiskEventType::TradingSuspended,
            reason,
            RiskLevel::High,
        );
        true
    }

    /// 거래 정지를 해제하고 SUSPENDED 주문을 재개합니다.
    pub async fn resume_user(&self, user_id: UserId, reason: &str) -> bool {
        if !self.ctx.risk.resume(user_id, reason).await {
            return false;
        }

        let targets: Vec<Uuid> = self
            .ctx
            .orders
            .read()
            .await
            .get_active_orders(Some(user_id))
            .into_iter()
            .filter(|o| o.status == OrderStatusType::Suspended)
            .map(|o| o.id)
            .collect();
        for order_id in targets {
            if let Err(e) = self.resume_order(order_id).await {
                warn!(%order_id, error = %e, "Failed to resume order");
            }
        }

        self.ctx.notifier.notify_risk_alert(
            user_id,
            None,
            RiskEventType::TradingResumed,
            reason,
            RiskLevel::Low,
        );
        true
    }

    async fn force_close(&self, action: &RiskControlAction) -> TraderResult<Order> {
        let user_id = action.user_id;
        let symbol = action
            .symbol
            .as_deref()
            .ok_or_else(|| TraderError::Validation("force close requires a symbol".to_string()))?;
        let position = self
            .ctx
            .ledger
            .position(user_id, symbol)
            .await
            .ok_or_else(|| TraderError::Validation(format!("no open position for {}/{}", user_id, symbol)))?;

        let quantity = action
            .quantity
            .unwrap_or(position.available_quantity)
            .min(position.available_quantity);
        if quantity <= Decimal::ZERO {
            return Err(TraderError::Validation(format!(
                "position {}/{} is fully reserved by working orders",
                user_id, symbol
            )));
        }
        let close = ForceClose::for_position(&position, quantity);
        let order = self.submit(close.to_request(user_id)).await?;

        self.ctx
            .risk
            .record_event(
                RiskEvent::new(user_id, RiskEventType::ForceClose, action.level, action.reason.clone())
                    .with_order(order.id)
                    .with_symbol(symbol)
                    .with_payload(json!({ "quantity": close.quantity.to_string() })),
            )
            .await;
        self.ctx.notifier.notify_risk_alert(
            user_id,
            Some(order.id),
            RiskEventType::ForceClose,
            &action.reason,
            action.level,
        );
        Ok(order)
    }

    /// 전체 청산: 활성 주문 취소 → 위험 기여도 순으로 포지션 청산 → 거래 정지.
    pub async fn liquidate(&self, user_id: UserId, reason: &str) -> TraderResult<LiquidationPlan> {
        let active: Vec<Uuid> = self
            .ctx
            .orders
            .read()
            .await
            .get_active_orders(Some(user_id))
            .into_iter()
            .map(|o| o.id)
            .collect();
        let positions = self.ctx.ledger.positions(user_id).await;
        let plan = self.ctx.risk.plan_liquidation(user_id, &active, &positions);
        warn!(
            user_id,
            cancels = plan.cancel_orders.len(),
            closes = plan.close_positions.len(),
            reason,
            "Liquidating portfolio"
        );

        for order_id in &plan.cancel_orders {
            if let Err(e) = self.cancel(*order_id).await {
                warn!(%order_id, error = %e, "Cancel during liquidation failed");
            }
        }

        for close in &plan.close_positions {
            let Some(position) = self.ctx.ledger.position(user_id, &close.symbol).await else {
                continue;
            };
            let quantity = close.quantity.min(position.available_quantity);
            if quantity <= Decimal::ZERO {
                warn!(symbol = %close.symbol, frozen = %position.frozen_quantity, "Position still reserved, close skipped");
                continue;
            }
            let request = ForceClose::for_position(&position, quantity).to_request(user_id);
            if let Err(e) = self.submit(request).await {
                error!(symbol = %close.symbol, error = %e, "Liquidation order failed");
            }
        }

        self.ctx.notifier.notify_risk_alert(
            user_id,
            None,
            RiskEventType::Liquidation,
            reason,
            RiskLevel::Critical,
        );
        if plan.suspend {
            self.suspend_user(user_id, reason).await;
        }
        Ok(plan)
    }

    // ==================== 주기 작업 ====================

    /// 열린 포지션의 시세를 갱신하고 손절/익절을 발동합니다.
    pub async fn price_tick(&self) -> usize {
        let mut updated = 0;
        for position in self.ctx.ledger.all_open_positions().await {
            let adapter = self.ctx.adapter_for(position.user_id).await;
            let market = match adapter.get_market_data(&position.symbol).await {
                Ok(market) => market,
                Err(e) => {
                    debug!(symbol = %position.symbol, error = %e, "Market data unavailable");
                    continue;
                }
            };

            match self
                .ctx
                .ledger
                .update_market_price(position.user_id, &position.symbol, market.price)
                .await
            {
                Ok(Some(position)) => {
                    updated += 1;
                    if let Some(trigger) = position.stop_trigger(market.price) {
                        self.fire_stop(&position, trigger).await;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(symbol = %position.symbol, error = %e, "Failed to mark position"),
            }
        }
        updated
    }

    async fn fire_stop(&self, position: &Position, trigger: StopTrigger) {
        let (label, price) = match trigger {
            StopTrigger::StopLoss(price) => ("stop loss", price),
            StopTrigger::TakeProfit(price) => ("take profit", price),
        };
        let message = format!("{} at {} hit for {}", label, price, position.symbol);
        info!(user_id = position.user_id, symbol = %position.symbol, %price, "{}", message);

        if let Err(e) = self.ctx.ledger.cancel_stops(position.user_id, &position.symbol).await {
            warn!(error = %e, "Failed to clear stops");
            return;
        }

        // 작업 중인 감소 주문이 잡아 둔 수량은 그 주문이 닫습니다.
        let quantity = position.available_quantity;
        let order_id = if quantity > Decimal::ZERO {
            let request = OrderRequest::market(position.user_id, position.symbol.clone(), closing_side(position), quantity)
                .with_strategy(STOP_TRIGGER_STRATEGY)
                .reduce_only();
            match self.submit(request).await {
                Ok(order) => Some(order.id),
                Err(e) => {
                    error!(symbol = %position.symbol, error = %e, "Stop order failed");
                    e.order_id()
                }
            }
        } else {
            warn!(symbol = %position.symbol, frozen = %position.frozen_quantity, "Stop hit but position is fully reserved");
            None
        };

        let mut event = RiskEvent::new(position.user_id, RiskEventType::StopTriggered, RiskLevel::Medium, message.clone())
            .with_symbol(position.symbol.clone())
            .with_payload(json!({ "trigger_price": price.to_string(), "quantity": quantity.to_string() }));
        if let Some(order_id) = order_id {
            event = event.with_order(order_id);
        }
        self.ctx.risk.record_event(event).await;
        self.ctx.notifier.notify_risk_alert(
            position.user_id,
            order_id,
            RiskEventType::StopTriggered,
            &message,
            RiskLevel::Medium,
        );
    }

    /// 모든 사용자의 포트폴리오를 점검하고 필요한 액션을 실행합니다.
    pub async fn risk_sweep(&self) -> Vec<RiskControlAction> {
        self.roll_day().await;

        let mut users = self.ctx.ledger.users().await;
        users.extend(self.ctx.orders.read().await.users());
        users.sort_unstable();
        users.dedup();

        let mut actions = Vec::new();
        for user_id in users {
            let snapshot = match self.ctx.portfolio_snapshot(user_id).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(user_id, error = %e, "Portfolio snapshot unavailable");
                    continue;
                }
            };
            let (metrics, action) = self.ctx.risk.monitor_portfolio(&snapshot).await;
            debug!(user_id, margin_ratio = %metrics.margin_ratio, daily_pnl = %metrics.daily_pnl, "Portfolio checked");

            if let Some(action) = action {
                if action.action_type == RiskActionType::Liquidation && self.closing_in_flight(user_id).await {
                    debug!(user_id, "Liquidation already in progress");
                    continue;
                }
                if let Err(e) = self.execute_action(action.clone()).await {
                    error!(user_id, action = %action.action_type, error = %e, "Risk action failed");
                }
                actions.push(action);
            }
        }
        actions
    }

    /// 리스크 제어 청산 주문이 아직 작업 중인지.
    async fn closing_in_flight(&self, user_id: UserId) -> bool {
        self.ctx
            .orders
            .read()
            .await
            .get_active_orders(Some(user_id))
            .into_iter()
            .any(|o| o.strategy_id.as_deref() == Some(RISK_CONTROL_STRATEGY))
    }

    /// UTC 날짜가 바뀌었으면 포지션 당일 손익 기준을 초기화합니다.
    async fn roll_day(&self) {
        let today = Utc::now().date_naive();
        let mut last = self.last_reset.lock().await;
        if *last >= today {
            return;
        }
        match self.ctx.ledger.reset_daily().await {
            Ok(count) => {
                info!(%today, positions = count, "Daily P&L reset");
                *last = today;
            }
            Err(e) => error!(error = %e, "Daily reset failed"),
        }
    }

    /// 종료된 모니터를 정리하고 종료 결과를 반환합니다.
    pub async fn reap(&self) -> Vec<MonitorExit> {
        let finished: Vec<MonitorHandle> = {
            let mut monitors = self.monitors.lock().await;
            let ids: Vec<Uuid> = monitors
                .iter()
                .filter(|(_, handle)| handle.is_finished())
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter().filter_map(|id| monitors.remove(&id)).collect()
        };

        let mut exits = Vec::new();
        for handle in finished {
            let order_id = handle.order_id;
            match handle.join().await {
                Ok(exit) => {
                    if let MonitorExit::Failed { reason, .. } = &exit {
                        warn!(%order_id, reason = %reason, "Order monitor failed");
                    }
                    exits.push(exit);
                }
                Err(e) if e.is_panic() => error!(%order_id, "Order monitor panicked"),
                Err(e) => debug!(%order_id, error = %e, "Order monitor aborted"),
            }
        }
        exits
    }

    async fn spawn(&self, order: Order, cancel_pending: bool) {
        let order_id = order.id;
        let handle = spawn_monitor(self.ctx.clone(), order, cancel_pending);
        let previous = self.monitors.lock().await.insert(order_id, handle);
        if let Some(previous) = previous {
            warn!(%order_id, "Replacing existing order monitor");
            if let Err(e) = previous.stop().await {
                error!(%order_id, error = %e, "Replaced order monitor ended abnormally");
            }
        }
    }

    // ==================== 수명 주기 ====================

    /// 주기 작업(시세 갱신, 리스크 점검, 모니터 정리)을 시작합니다.
    pub async fn start(self: &Arc<Self>) {
        let mut background = self.background.lock().await;
        if background.is_some() {
            return;
        }

        let this = Arc::clone(self);
        let shutdown = self.shutdown.clone();
        let config = self.ctx.config.clone();
        *background = Some(tokio::spawn(async move {
            let mut price_ticker = tokio::time::interval(Duration::from_millis(config.price_interval_ms.max(1)));
            let mut risk_ticker = tokio::time::interval(Duration::from_millis(config.risk_interval_ms.max(1)));
            let mut reap_ticker = tokio::time::interval(Duration::from_millis(config.poll_interval_ms.max(1)));

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Execution coordinator background tasks stopped");
                        break;
                    }
                    _ = price_ticker.tick() => {
                        this.price_tick().await;
                    }
                    _ = risk_ticker.tick() => {
                        this.risk_sweep().await;
                    }
                    _ = reap_ticker.tick() => {
                        this.reap().await;
                    }
                }
            }
        }));
        info!("Execution coordinator started");
    }

    /// 주기 작업과 모든 모니터를 멈춥니다. 거래소 주문은 그대로 남습니다.
    pub async fn shutdown(&self) -> Vec<Order> {
        self.shutdown.cancel();
        if let Some(handle) = self.background.lock().await.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "Background task ended abnormally");
            }
        }

        let handles: Vec<MonitorHandle> = self.monitors.lock().await.drain().map(|(_, h)| h).collect();
        let mut orders = Vec::new();
        for handle in handles {
            let order_id = handle.order_id;
            match handle.stop().await {
                Ok(exit) => orders.push(exit.into_order()),
                Err(e) => error!(%order_id, error = %e, "Order monitor ended abnormally"),
            }
        }
        info!(active = orders.len(), "Execution coordinator shut down");
        orders
    }

    // ==================== 조회 ====================

    /// 레지스트리의 주문 스냅샷.
    pub async fn order(&self, order_id: Uuid) -> Option<Order> {
        self.ctx.order(order_id).await
    }

    /// 활성 주문 (생성 순).
    pub async fn active_orders(&self, user_id: Option<UserId>) -> Vec<Order> {
        self.ctx
            .orders
            .read()
            .await
            .get_active_orders(user_id)
            .into_iter()
            .cloned()
            .collect()
    }

    /// 보류 중인 주문 ID (접수 순).
    pub async fn held_orders(&self, user_id: UserId) -> Vec<Uuid> {
        self.ctx.orders.read().await.held_for(user_id)
    }

    pub async fn positions(&self, user_id: UserId) -> Vec<Position> {
        self.ctx.ledger.positions(user_id).await
    }

    pub async fn summary(&self, user_id: UserId) -> PositionSummary {
        self.ctx.ledger.summary(user_id).await
    }

    /// 모니터링 중인 주문 수.
    pub async fn monitor_count(&self) -> usize {
        self.monitors.lock().await.len()
    }

    pub async fn is_monitored(&self, order_id: Uuid) -> bool {
        self.monitors.lock().await.contains_key(&order_id)
    }
}

/// 감소 전용 주문이 현재 포지션의 가용 수량을 넘지 않는지 검사합니다.
///
/// 다른 작업 중인 감소 주문이 동결한 수량은 쓸 수 없습니다.
fn check_reduce_only(order: &Order, position: Option<&Position>) -> Result<(), String> {
    let Some(position) = position.filter(|p| p.is_open()) else {
        return Err(format!("reduce-only order has no open position in {}", order.symbol));
    };
    if closing_side(position) != order.side {
        return Err(format!(
            "reduce-only {} order would increase the {} position",
            order.side, order.symbol
        ));
    }
    if order.quantity > position.available_quantity {
        return Err(format!(
            "reduce-only quantity {} exceeds available quantity {} ({} reserved by working orders)",
            order.quantity, position.available_quantity, position.frozen_quantity
        ));
    }
    Ok(())
}

fn risk_event_type(result: &RiskCheckResult) -> RiskEventType {
    if result.failed(check_names::CONCENTRATION) {
        RiskEventType::Concentration
    } else {
        RiskEventType::PreTradeRejected
    }
}

fn monitor_gone(order_id: Uuid) -> TraderError {
    TraderError::Execution(format!("monitor for order {} is not running", order_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use trader_core::Side;

    fn position(user_id: UserId, quantity: Decimal) -> Position {
        Position::open(user_id, "AAPL", quantity, dec!(100), Decimal::ZERO).unwrap().0
    }

    #[test]
    fn test_reduce_only_requires_opposing_position() {
        let sell = Order::from_request(OrderRequest::market(1, "AAPL", Side::Sell, dec!(5)).reduce_only());
        assert!(check_reduce_only(&sell, None).is_err());

        let long = position(1, dec!(10));
        assert!(check_reduce_only(&sell, Some(&long)).is_ok());

        let buy = Order::from_request(OrderRequest::market(1, "AAPL", Side::Buy, dec!(5)).reduce_only());
        assert!(check_reduce_only(&buy, Some(&long)).is_err());

        let too_big = Order::from_request(OrderRequest::market(1, "AAPL", Side::Sell, dec!(11)).reduce_only());
        let reason = check_reduce_only(&too_big, Some(&long)).unwrap_err();
        assert!(reason.contains("exceeds"));
    }

    #[test]
    fn test_reduce_only_limited_to_available_quantity() {
        let mut long = position(1, dec!(10));
        long.freeze(dec!(10)).unwrap();

        let sell = Order::from_request(OrderRequest::market(1, "AAPL", Side::Sell, dec!(1)).reduce_only());
        let reason = check_reduce_only(&sell, Some(&long)).unwrap_err();
        assert!(reason.contains("available quantity 0"));

        long.unfreeze(dec!(4)).unwrap();
        assert!(check_reduce_only(&sell, Some(&long)).is_ok());
    }

    #[test]
    fn test_reduce_only_short_position() {
        let short = position(1, dec!(-10));
        let buy = Order::from_request(OrderRequest::market(1, "AAPL", Side::Buy, dec!(10)).reduce_only());
        assert!(check_reduce_only(&buy, Some(&short)).is_ok());
    }
}
