//! 알림 포트.
//!
//! 실행 코드가 호출하는 동기 fire-and-forget 인터페이스입니다. 구현체는
//! 호출자를 막지 않아야 합니다. 기본 메서드는 모두 [`NotificationPort::notify`]로
//! 모입니다.

use rust_decimal::Decimal;
use trader_core::{Order, OrderFill, OrderStatusType, RiskEventType, RiskLevel, UserId};
use uuid::Uuid;

use crate::types::{Notification, NotificationEvent, NotificationPriority};

/// 알림 포트.
pub trait NotificationPort: Send + Sync {
    /// 알림 1건을 발행합니다.
    fn notify(&self, notification: Notification);

    /// 주문 상태 변경.
    fn notify_status_change(&self, order: &Order, old_status: OrderStatusType) {
        self.notify(Notification::new(
            order.user_id,
            NotificationEvent::OrderStatusChanged {
                order_id: order.id,
                symbol: order.symbol.clone(),
                old_status,
                new_status: order.status,
            },
        ));
    }

    /// 체결.
    fn notify_filled(&self, order: &Order, fill: &OrderFill) {
        self.notify(Notification::new(
            order.user_id,
            NotificationEvent::OrderFilled {
                order_id: order.id,
                symbol: order.symbol.clone(),
                side: order.side,
                quantity: fill.quantity,
                price: fill.price,
                filled_quantity: order.filled_quantity,
                remaining_quantity: order.remaining_quantity,
            },
        ));
    }

    /// 주문 거부.
    fn notify_rejected(&self, order: &Order, reason: &str) {
        self.notify(
            Notification::new(
                order.user_id,
                NotificationEvent::OrderRejected {
                    order_id: order.id,
                    symbol: order.symbol.clone(),
                    reason: reason.to_string(),
                },
            )
            .with_priority(NotificationPriority::High),
        );
    }

    /// 주문 취소.
    fn notify_cancelled(&self, order: &Order, reason: &str) {
        self.notify(Notification::new(
            order.user_id,
            NotificationEvent::OrderCancelled {
                order_id: order.id,
                symbol: order.symbol.clone(),
                reason: reason.to_string(),
            },
        ));
    }

    /// 리스크 경고. 우선순위는 심각도에서 정해집니다.
    fn notify_risk_alert(
        &self,
        user_id: UserId,
        order_id: Option<Uuid>,
        event_type: RiskEventType,
        message: &str,
        level: RiskLevel,
    ) {
        self.notify(
            Notification::new(
                user_id,
                NotificationEvent::RiskAlert {
                    order_id,
                    event_type,
                    level,
                    message: message.to_string(),
                },
            )
            .with_priority(level.into()),
        );
    }

    /// 실행 진행률.
    fn notify_execution_progress(&self, order: &Order, fraction: Decimal) {
        self.notify(
            Notification::new(
                order.user_id,
                NotificationEvent::ExecutionProgress {
                    order_id: order.id,
                    symbol: order.symbol.clone(),
                    fraction,
                },
            )
            .with_priority(NotificationPriority::Low),
        );
    }

    /// 실행 오류.
    fn notify_execution_error(&self, order: &Order, message: &str) {
        self.notify(
            Notification::new(
                order.user_id,
                NotificationEvent::ExecutionError {
                    order_id: order.id,
                    symbol: order.symbol.clone(),
                    message: message.to_string(),
                },
            )
            .with_priority(NotificationPriority::Critical),
        );
    }
}

/// 아무것도 하지 않는 포트.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl NotificationPort for NoopNotifier {
    fn notify(&self, _notification: Notification) {}
}
