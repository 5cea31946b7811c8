//! 주문별 모니터 태스크.
//!
//! 제출된 주문마다 독립 태스크 하나가 주기적으로 거래소 상태를 조회해
//! 정합합니다. 태스크는 취소 토큰으로 멈추고, 정정/정지/재개 요청은
//! 명령 채널로 받습니다. 제출 이후 주문의 상태는 이 태스크만 변경합니다.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};
use trader_core::{execution_span, Order, OrderChanges, OrderStatusType, TraderError, TraderResult};
use uuid::Uuid;

use crate::context::{exchange_error, TradingContext};

/// 명령 채널 용량.
const COMMAND_BUFFER: usize = 16;

/// 모니터에 보내는 명령.
#[derive(Debug)]
pub enum MonitorCommand {
    /// 주문 정정
    Modify {
        changes: OrderChanges,
        reply: oneshot::Sender<TraderResult<Order>>,
    },
    /// 주문 정지 (SUSPENDED)
    Suspend { reply: oneshot::Sender<TraderResult<Order>> },
    /// 정지 해제 (ACCEPTED)
    Resume { reply: oneshot::Sender<TraderResult<Order>> },
    /// 현재 주문 스냅샷
    Snapshot { reply: oneshot::Sender<Order> },
}

/// 모니터 종료 사유.
#[derive(Debug, Clone)]
pub enum MonitorExit {
    /// 주문이 최종 상태에 도달
    Terminal(Order),
    /// 취소 토큰으로 중단
    Cancelled(Order),
    /// 연속 폴링 실패로 중단
    Failed { order: Order, reason: String },
}

impl MonitorExit {
    /// 종료 시점의 주문.
    pub fn order(&self) -> &Order {
        match self {
            MonitorExit::Terminal(order) | MonitorExit::Cancelled(order) => order,
            MonitorExit::Failed { order, .. } => order,
        }
    }

    pub fn into_order(self) -> Order {
        match self {
            MonitorExit::Terminal(order) | MonitorExit::Cancelled(order) => order,
            MonitorExit::Failed { order, .. } => order,
        }
    }
}

/// 실행 중인 모니터 핸들.
#[derive(Debug)]
pub struct MonitorHandle {
    pub order_id: Uuid,
    cancel: CancellationToken,
    commands: mpsc::Sender<MonitorCommand>,
    join: JoinHandle<MonitorExit>,
}

impl MonitorHandle {
    /// 태스크가 끝났는지.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// 명령 채널 송신자.
    pub fn sender(&self) -> mpsc::Sender<MonitorCommand> {
        self.commands.clone()
    }

    /// 정지를 요청하고 태스크 종료를 기다립니다.
    pub async fn stop(self) -> Result<MonitorExit, JoinError> {
        self.cancel.cancel();
        self.join.await
    }

    /// 태스크 종료를 기다립니다.
    pub async fn join(self) -> Result<MonitorExit, JoinError> {
        self.join.await
    }
}

/// 주문 모니터를 시작합니다.
///
/// `cancel_pending`이면 매 틱마다 취소를 다시 시도하고, 연결 실패로
/// 종료하지 않습니다.
pub fn spawn_monitor(ctx: Arc<TradingContext>, order: Order, cancel_pending: bool) -> MonitorHandle {
    let cancel = CancellationToken::new();
    let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
    let order_id = order.id;
    let span = execution_span!("order_monitor", order.user_id, order.symbol, order.id);

    let monitor = OrderMonitor {
        ctx,
        order,
        cancel_pending,
        failures: 0,
    };
    let join = tokio::spawn(monitor.run(cancel.clone(), rx).instrument(span));

    MonitorHandle {
        order_id,
        cancel,
        commands: tx,
        join,
    }
}

struct OrderMonitor {
    ctx: Arc<TradingContext>,
    order: Order,
    cancel_pending: bool,
    /// 연속 폴링 실패 횟수
    failures: u32,
}

impl OrderMonitor {
    async fn run(mut self, cancel: CancellationToken, mut commands: mpsc::Receiver<MonitorCommand>) -> MonitorExit {
        let mut ticker = tokio::time::interval(Duration::from_millis(self.ctx.config.poll_interval_ms.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(cancel_pending = self.cancel_pending, "Order monitor started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Order monitor stopped");
                    return MonitorExit::Cancelled(self.order);
                }
                Some(command) = commands.recv() => self.handle_command(command).await,
                _ = ticker.tick() => {
                    if let Some(exit) = self.tick().await {
                        return exit;
                    }
                }
            }
        }
    }

    // ==================== 폴링 ====================

    async fn tick(&mut self) -> Option<MonitorExit> {
        if self.cancel_pending {
            return self.retry_cancel().await;
        }
        // 정지 중에도 거래소 주문은 살아 있으므로 계속 조회합니다.
        self.poll().await
    }

    /// 거래소 상태를 조회해 정합합니다.
    async fn poll(&mut self) -> Option<MonitorExit> {
        let Some(external_id) = self.order.external_id.clone() else {
            return Some(self.fail("order has no external id".to_string()));
        };
        let outcome = match self.ctx.connected_adapter(self.order.user_id).await {
            Ok(adapter) => match adapter.get_order_status(&external_id).await {
                Ok(Some(status)) => self.ctx.reconcile(&mut self.order, &status).await.map(|_| ()),
                Ok(None) => Err(TraderError::Execution(format!("venue does not know order {}", external_id))),
                Err(e) => Err(exchange_error(self.order.id, e)),
            },
            Err(e) => Err(exchange_error(self.order.id, e)),
        };

        match outcome {
            Ok(()) => {
                self.failures = 0;
                if self.order.is_final() {
                    info!(status = %self.order.status, filled = %self.order.filled_quantity, "Order reached final state");
                    return Some(MonitorExit::Terminal(self.order.clone()));
                }
                None
            }
            Err(e) => {
                self.failures += 1;
                warn!(failures = self.failures, error = %e, "Order status poll failed");
                if self.failures >= self.ctx.config.max_consecutive_poll_failures.max(1) {
                    return Some(self.fail(e.to_string()));
                }
                None
            }
        }
    }

    /// 도달 불가로 미뤄진 취소를 다시 시도합니다.
    async fn retry_cancel(&mut self) -> Option<MonitorExit> {
        let adapter = match self.ctx.connected_adapter(self.order.user_id).await {
            Ok(adapter) => adapter,
            Err(e) => {
                debug!(error = %e, "Venue still unreachable, cancel deferred");
                return None;
            }
        };

        if let Some(external_id) = self.order.external_id.clone() {
            match adapter.get_order_status(&external_id).await {
                Ok(Some(status)) => {
                    if let Err(e) = self.ctx.reconcile(&mut self.order, &status).await {
                        warn!(error = %e, "Reconcile before cancel failed");
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(error = %e, "Venue still unreachable, cancel deferred");
                    return None;
                }
            }
        }
        if self.order.is_final() {
            return Some(MonitorExit::Terminal(self.order.clone()));
        }

        match adapter.cancel_order(&self.order).await {
            Ok(true) => match self.ctx.transition(&mut self.order, OrderStatusType::Cancelled).await {
                Ok(()) => {
                    self.ctx.release_freeze(&self.order).await;
                    self.ctx.notifier.notify_cancelled(&self.order, "cancelled after reconnect");
                    info!("Deferred cancel confirmed");
                    Some(MonitorExit::Terminal(self.order.clone()))
                }
                Err(e) => {
                    warn!(error = %e, "Cancel confirmed but transition failed");
                    None
                }
            },
            Ok(false) => {
                debug!("Venue refused cancel, waiting for final state");
                None
            }
            Err(e) => {
                debug!(error = %e, "Cancel retry failed");
                None
            }
        }
    }

    fn fail(&self, reason: String) -> MonitorExit {
        error!(reason = %reason, "Order monitor giving up");
        self.ctx.notifier.notify_execution_error(&self.order, &reason);
        MonitorExit::Failed {
            order: self.order.clone(),
            reason,
        }
    }

    // ==================== 명령 ====================

    async fn handle_command(&mut self, command: MonitorCommand) {
        match command {
            MonitorCommand::Modify { changes, reply } => {
                let _ = reply.send(self.modify(changes).await);
            }
            MonitorCommand::Suspend { reply } => {
                let _ = reply.send(self.suspend().await);
            }
            MonitorCommand::Resume { reply } => {
                let _ = reply.send(self.resume().await);
            }
            MonitorCommand::Snapshot { reply } => {
                let _ = reply.send(self.order.clone());
            }
        }
    }

    async fn modify(&mut self, changes: OrderChanges) -> TraderResult<Order> {
        let mut updated = self.order.clone();
        updated.apply_changes(&changes)?;

        let adapter = self
            .ctx
            .connected_adapter(self.order.user_id)
            .await
            .map_err(|e| exchange_error(self.order.id, e))?;
        let confirmed = adapter
            .modify_order(&self.order, &changes)
            .await
            .map_err(|e| exchange_error(self.order.id, e))?;
        if !confirmed {
            return Err(TraderError::Execution(format!(
                "venue refused modification of order {}",
                self.order.id
            )));
        }

        self.order = updated;
        self.ctx.record_order(&self.order).await?;
        info!(?changes, "Order modified");
        Ok(self.order.clone())
    }

    async fn suspend(&mut self) -> TraderResult<Order> {
        if self.order.status != OrderStatusType::Suspended {
            self.ctx.transition(&mut self.order, OrderStatusType::Suspended).await?;
            info!("Order suspended");
        }
        Ok(self.order.clone())
    }

    async fn resume(&mut self) -> TraderResult<Order> {
        if self.order.status == OrderStatusType::Suspended {
            self.ctx.transition(&mut self.order, OrderStatusType::Accepted).await?;
            info!("Order resumed");
        }
        Ok(self.order.clone())
    }
}
