//! 비동기 알림 디스패처.
//!
//! [`Notifier`]는 알림을 무제한 채널에 넣기만 하고 바로 반환합니다.
//! 디스패처 태스크가 채널을 비우며 활성화된 전송기마다 전달하고,
//! 전송 실패는 로그로만 남깁니다.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::port::NotificationPort;
use crate::types::{Notification, NotificationSender};

/// 채널 기반 알림 포트.
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl Notifier {
    /// 디스패처 태스크를 시작합니다.
    ///
    /// 반환된 핸들은 모든 `Notifier` 복제본이 drop되면 끝나며 전달 성공 건수를 돌려줍니다.
    pub fn spawn(senders: Vec<Arc<dyn NotificationSender>>) -> (Self, JoinHandle<usize>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher { senders };
        let handle = tokio::spawn(dispatcher.run(rx));
        (Self { tx }, handle)
    }

    /// 디스패처가 살아 있는지 확인합니다.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

impl NotificationPort for Notifier {
    fn notify(&self, notification: Notification) {
        if let Err(e) = self.tx.send(notification) {
            warn!(
                notification_id = %e.0.id,
                kind = e.0.event.kind(),
                "Notification dropped, dispatcher closed"
            );
        }
    }
}

/// 여러 전송기로 알림을 전달하는 디스패처.
struct Dispatcher {
    senders: Vec<Arc<dyn NotificationSender>>,
}

impl Dispatcher {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Notification>) -> usize {
        let mut delivered = 0;
        while let Some(notification) = rx.recv().await {
            delivered += self.dispatch(&notification).await;
        }
        debug!(delivered, "Notification dispatcher stopped");
        delivered
    }

    /// 활성화된 모든 전송기로 전달합니다. 성공한 전송 수를 반환합니다.
    async fn dispatch(&self, notification: &Notification) -> usize {
        let mut delivered = 0;
        for sender in self.senders.iter().filter(|s| s.is_enabled()) {
            match sender.send(notification).await {
                Ok(()) => delivered += 1,
                Err(e) => error!(
                    sender = sender.name(),
                    notification_id = %notification.id,
                    kind = notification.event.kind(),
                    error = %e,
                    "Failed to deliver notification"
                ),
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::senders::RecordingNotifier;
    use crate::types::{NotificationError, NotificationEvent, NotificationResult};
    use async_trait::async_trait;

    struct FailingSender;

    #[async_trait]
    impl NotificationSender for FailingSender {
        async fn send(&self, _notification: &Notification) -> NotificationResult<()> {
            Err(NotificationError::SendFailed("boom".to_string()))
        }

        fn is_enabled(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    fn custom(title: &str) -> Notification {
        Notification::new(
            1,
            NotificationEvent::Custom {
                title: title.to_string(),
                message: String::new(),
            },
        )
    }

    #[tokio::test]
    async fn test_dispatches_in_order_and_survives_failures() {
        let recorder = Arc::new(RecordingNotifier::new());
        let (notifier, handle) = Notifier::spawn(vec![Arc::new(FailingSender), recorder.clone()]);

        notifier.notify(custom("a"));
        notifier.notify(custom("b"));
        drop(notifier);

        let delivered = handle.await.unwrap();
        assert_eq!(delivered, 2);

        let titles: Vec<String> = recorder
            .notifications()
            .into_iter()
            .filter_map(|n| match n.event {
                NotificationEvent::Custom { title, .. } => Some(title),
                _ => None,
            })
            .collect();
        assert_eq!(titles, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_closed_dispatcher_drops_silently() {
        let (notifier, handle) = Notifier::spawn(vec![]);
        handle.abort();
        let _ = handle.await;

        assert!(!notifier.is_open());
        notifier.notify(custom("late"));
    }
}
