//! 기본 알림 전송기.
//!
//! - [`LogSender`]: tracing 로그로 알림을 남깁니다.
//! - [`RecordingNotifier`]: 메모리에 알림을 쌓아 두는 테스트용 포트/전송기.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::port::NotificationPort;
use crate::types::{Notification, NotificationEvent, NotificationPriority, NotificationResult, NotificationSender};

/// 알림을 한 줄 텍스트로 포맷합니다.
pub fn format_message(notification: &Notification) -> String {
    let content = match &notification.event {
        NotificationEvent::OrderStatusChanged {
            order_id,
            symbol,
            old_status,
            new_status,
        } => format!("Order {order_id} ({symbol}) {old_status} -> {new_status}"),

        NotificationEvent::OrderFilled {
            order_id,
            symbol,
            side,
            quantity,
            price,
            filled_quantity,
            remaining_quantity,
        } => format!(
            "Order {order_id} filled: {side} {quantity} {symbol} @ {price} \
             (filled {filled_quantity}, remaining {remaining_quantity})"
        ),

        NotificationEvent::OrderRejected {
            order_id,
            symbol,
            reason,
        } => format!("Order {order_id} ({symbol}) rejected: {reason}"),

        NotificationEvent::OrderCancelled {
            order_id,
            symbol,
            reason,
        } => format!("Order {order_id} ({symbol}) cancelled: {reason}"),

        NotificationEvent::RiskAlert {
            order_id,
            event_type,
            level,
            message,
        } => match order_id {
            Some(id) => format!("[{level}] Risk alert {event_type:?} for order {id}: {message}"),
            None => format!("[{level}] Risk alert {event_type:?}: {message}"),
        },

        NotificationEvent::ExecutionProgress {
            order_id,
            symbol,
            fraction,
        } => {
            let percent = (*fraction * Decimal::ONE_HUNDRED).round_dp(1);
            format!("Order {order_id} ({symbol}) {percent}% executed")
        }

        NotificationEvent::ExecutionError {
            order_id,
            symbol,
            message,
        } => format!("Order {order_id} ({symbol}) execution error: {message}"),

        NotificationEvent::Custom { title, message } => format!("{title}: {message}"),
    };

    format!("user={} {}", notification.user_id, content)
}

/// tracing 로그 전송기.
#[derive(Debug, Clone)]
pub struct LogSender {
    enabled: bool,
}

impl LogSender {
    pub fn new() -> Self {
        Self { enabled: true }
    }

    /// 활성화 여부를 지정합니다.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

impl Default for LogSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationSender for LogSender {
    async fn send(&self, notification: &Notification) -> NotificationResult<()> {
        let message = format_message(notification);
        if notification.priority >= NotificationPriority::High {
            warn!(kind = notification.event.kind(), priority = ?notification.priority, "{}", message);
        } else {
            info!(kind = notification.event.kind(), "{}", message);
        }
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// 알림을 메모리에 기록합니다.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, notification: Notification) {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification);
    }

    /// 기록된 알림 전체.
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 종류별 알림.
    pub fn of_kind(&self, kind: &str) -> Vec<Notification> {
        self.notifications()
            .into_iter()
            .filter(|n| n.event.kind() == kind)
            .collect()
    }

    /// 기록 건수.
    pub fn len(&self) -> usize {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 기록을 비웁니다.
    pub fn clear(&self) {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl NotificationPort for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.push(notification);
    }
}

#[async_trait]
impl NotificationSender for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> NotificationResult<()> {
        self.push(notification.clone());
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "recording"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use trader_core::{Liquidity, Order, OrderFill, OrderRequest, RiskEventType, RiskLevel, Side};

    #[test]
    fn test_port_methods_record_events() {
        let recorder = RecordingNotifier::new();
        let order = Order::from_request(OrderRequest::limit(7, "AAPL", Side::Buy, dec!(100), dec!(150)));
        let fill = OrderFill::new(order.id, dec!(40), dec!(149.5), dec!(5.98), Liquidity::Maker);

        recorder.notify_filled(&order, &fill);
        recorder.notify_rejected(&order, "insufficient funds");
        recorder.notify_risk_alert(7, Some(order.id), RiskEventType::MarginCall, "low margin", RiskLevel::Critical);
        recorder.notify_execution_error(&order, "venue down");

        assert_eq!(recorder.len(), 4);
        assert_eq!(recorder.of_kind("order_rejected")[0].priority, NotificationPriority::High);
        let alert = &recorder.of_kind("risk_alert")[0];
        assert_eq!(alert.priority, NotificationPriority::Critical);
        assert_eq!(alert.user_id, 7);
        assert_eq!(alert.event.order_id(), Some(order.id));

        recorder.clear();
        assert!(recorder.is_empty());
    }

    #[test]
    fn test_format_fill() {
        let order = Order::from_request(OrderRequest::market(1, "AAPL", Side::Sell, dec!(10)));
        let fill = OrderFill::new(order.id, dec!(10), dec!(101.25), Decimal::ZERO, Liquidity::Taker);
        let recorder = RecordingNotifier::new();
        recorder.notify_filled(&order, &fill);

        let message = format_message(&recorder.notifications()[0]);
        assert!(message.contains("AAPL"));
        assert!(message.contains("101.25"));
        assert!(message.starts_with("user=1"));
    }

    #[test]
    fn test_format_progress_percent() {
        let order = Order::from_request(OrderRequest::market(1, "AAPL", Side::Buy, dec!(10)));
        let recorder = RecordingNotifier::new();
        recorder.notify_execution_progress(&order, dec!(0.4));

        assert!(format_message(&recorder.notifications()[0]).contains("40.0% executed"));
    }

    #[tokio::test]
    async fn test_disabled_log_sender() {
        let sender = LogSender::new().with_enabled(false);
        assert!(!sender.is_enabled());
        assert_eq!(sender.name(), "log");
    }
}
