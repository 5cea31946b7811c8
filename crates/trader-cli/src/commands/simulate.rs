//! 시뮬레이션 세션 명령어.
//!
//! 설정의 시뮬레이션 거래소 위에서 실행 코어 전체를 띄우고, 심볼마다 진입
//! 주문을 넣은 뒤 시세를 진행시키며 손절 설정과 부분 청산을 수행합니다.
//!
//! # 사용 예시
//!
//! ```bash
//! # 기본 설정으로 200틱 실행
//! trader simulate --ticks 200
//!
//! # 심볼당 50주, 손절 3%
//! trader simulate --quantity 50 --stop-loss-pct 0.03
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use trader_core::{InMemoryRepository, OrderRequest, Position, PositionSummary, Side, UserId};
use trader_exchange::{ExecutionAdapter, SimulatedExchange};
use trader_execution::{ExecutionCoordinator, OrderStats, TradingContext};
use trader_notification::{LogSender, NotificationPort, NotificationSender, Notifier};

use crate::settings::Settings;

/// 세션에서 쓰는 전략 ID.
const SESSION_STRATEGY: &str = "cli-session";

/// 시뮬레이션 옵션.
#[derive(Debug, Clone)]
pub struct SimulateOptions {
    /// 진행할 시세 틱 수
    pub ticks: u32,
    /// 틱 사이 대기 시간 (밀리초)
    pub tick_ms: u64,
    pub user_id: UserId,
    /// 심볼당 진입 수량
    pub quantity: Decimal,
    /// 평균 단가 대비 손절 비율 (예: 0.05 = 5%)
    pub stop_loss_pct: Option<Decimal>,
}

impl Default for SimulateOptions {
    fn default() -> Self {
        Self {
            ticks: 100,
            tick_ms: 50,
            user_id: 1,
            quantity: Decimal::from(10),
            stop_loss_pct: Some(Decimal::new(5, 2)),
        }
    }
}

/// 세션 결과.
#[derive(Debug, Clone)]
pub struct SimulationReport {
    pub stats: OrderStats,
    pub positions: Vec<Position>,
    pub summary: PositionSummary,
    pub risk_events: usize,
    /// 종료 시점에 아직 활성인 주문 수
    pub unfinished_orders: usize,
    /// 전달된 알림 수
    pub notifications: usize,
}

/// 시뮬레이션 세션을 실행합니다.
pub async fn run_simulation(settings: &Settings, options: &SimulateOptions) -> Result<SimulationReport> {
    let symbols: Vec<String> = settings.simulation.symbols.keys().cloned().collect();
    if symbols.is_empty() {
        bail!("simulation.symbols is empty; nothing to trade");
    }

    let exchange = Arc::new(SimulatedExchange::new(settings.simulation.clone()));
    let senders: Vec<Arc<dyn NotificationSender>> = vec![Arc::new(LogSender::new())];
    let (notifier, dispatcher) = Notifier::spawn(senders);

    let ctx = TradingContext::new(
        settings.execution.clone(),
        exchange.clone() as Arc<dyn ExecutionAdapter>,
        settings.risk.clone(),
        Arc::new(notifier) as Arc<dyn NotificationPort>,
        Arc::new(InMemoryRepository::new()),
    )
    .context("failed to build trading context")?;
    let coordinator = Arc::new(ExecutionCoordinator::new(ctx));
    coordinator.start().await;

    info!(symbols = ?symbols, ticks = options.ticks, "Simulation session started");

    for symbol in &symbols {
        let request = OrderRequest::market(options.user_id, symbol.clone(), Side::Buy, options.quantity)
            .with_strategy(SESSION_STRATEGY);
        match coordinator.submit(request).await {
            Ok(order) => debug!(order_id = %order.id, %symbol, "Entry order submitted"),
            Err(e) => warn!(%symbol, error = %e, "Entry order not submitted"),
        }
    }

    let tick = Duration::from_millis(options.tick_ms);
    let halfway = options.ticks / 2;
    for step in 0..options.ticks {
        exchange.tick().await;
        tokio::time::sleep(tick).await;

        if let Some(pct) = options.stop_loss_pct {
            protect_positions(&coordinator, options.user_id, pct).await;
        }
        if step == halfway {
            take_partial_profit(&coordinator, options.user_id).await;
        }
    }

    // 마지막 상태를 한 번 더 정합합니다.
    tokio::time::sleep(Duration::from_millis(settings.execution.poll_interval_ms)).await;
    coordinator.price_tick().await;
    coordinator.risk_sweep().await;

    let ctx = coordinator.context().clone();
    let stats = ctx.orders.read().await.get_user_stats(options.user_id);
    let positions = coordinator.positions(options.user_id).await;
    let summary = coordinator.summary(options.user_id).await;
    let risk_events = ctx.risk.events(options.user_id, false).await.len();

    let unfinished = coordinator.shutdown().await;
    drop(ctx);
    drop(coordinator);

    let notifications = match tokio::time::timeout(Duration::from_secs(1), dispatcher).await {
        Ok(Ok(delivered)) => delivered,
        Ok(Err(e)) => {
            warn!(error = %e, "Notification dispatcher ended abnormally");
            0
        }
        Err(_) => {
            warn!("Notification dispatcher still running at exit");
            0
        }
    };

    info!(
        filled = stats.filled_orders,
        rejected = stats.rejected_orders,
        open_positions = positions.len(),
        "Simulation session finished"
    );

    Ok(SimulationReport {
        stats,
        positions,
        summary,
        risk_events,
        unfinished_orders: unfinished.len(),
        notifications,
    })
}

/// 손절가가 없는 포지션에 손절가를 설정합니다.
async fn protect_positions(coordinator: &ExecutionCoordinator, user_id: UserId, pct: Decimal) {
    for position in coordinator.positions(user_id).await {
        if position.stop_loss_price.is_some() {
            continue;
        }
        let stop = if position.signed_quantity().is_sign_positive() {
            position.average_cost * (Decimal::ONE - pct)
        } else {
            position.average_cost * (Decimal::ONE + pct)
        };
        let stop = stop.round_dp(4);
        match coordinator
            .context()
            .ledger
            .set_stop_loss(user_id, &position.symbol, stop)
            .await
        {
            Ok(_) => debug!(symbol = %position.symbol, %stop, "Stop loss set"),
            Err(e) => warn!(symbol = %position.symbol, error = %e, "Failed to set stop loss"),
        }
    }
}

/// 열린 포지션의 절반을 감소 전용 시장가로 정리합니다.
async fn take_partial_profit(coordinator: &ExecutionCoordinator, user_id: UserId) {
    for position in coordinator.positions(user_id).await {
        let quantity = (position.available_quantity / Decimal::TWO).floor();
        if quantity <= Decimal::ZERO || position.unrealized_pnl <= Decimal::ZERO {
            continue;
        }
        let side = if position.signed_quantity().is_sign_positive() {
            Side::Sell
        } else {
            Side::Buy
        };
        let request = OrderRequest::market(user_id, position.symbol.clone(), side, quantity)
            .with_strategy(SESSION_STRATEGY)
            .reduce_only();
        match coordinator.submit(request).await {
            Ok(order) => info!(order_id = %order.id, symbol = %position.symbol, %quantity, "Partial exit submitted"),
            Err(e) => warn!(symbol = %position.symbol, error = %e, "Partial exit not submitted"),
        }
    }
}

/// 결과를 표 형식으로 출력합니다.
pub fn print_report(report: &SimulationReport) {
    println!("\n=== 시뮬레이션 결과 ===");
    println!(
        "주문: 전체 {} / 체결 {} / 취소 {} / 거부 {} / 활성 {}",
        report.stats.total_orders,
        report.stats.filled_orders,
        report.stats.cancelled_orders,
        report.stats.rejected_orders,
        report.unfinished_orders,
    );
    println!("거래 금액: {}", report.stats.total_notional.round_dp(2));

    if report.positions.is_empty() {
        println!("열린 포지션 없음");
    } else {
        println!("\n{:<10} {:>12} {:>14} {:>14}", "심볼", "수량", "평균단가", "평가손익");
        for position in &report.positions {
            println!(
                "{:<10} {:>12} {:>14} {:>14}",
                position.symbol,
                position.signed_quantity(),
                position.average_cost.round_dp(4),
                position.unrealized_pnl.round_dp(2),
            );
        }
    }

    println!(
        "\n실현 손익: {} / 평가 손익: {} / 당일 손익: {}",
        report.summary.total_realized_pnl.round_dp(2),
        report.summary.total_unrealized_pnl.round_dp(2),
        report.summary.total_daily_pnl.round_dp(2),
    );
    println!("리스크 이벤트: {} / 알림: {}", report.risk_events, report.notifications);
}
