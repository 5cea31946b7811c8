//! # Trader Notification
//!
//! 주문 실행 및 리스크 알림.
//!
//! 실행 코드는 동기 [`NotificationPort`]만 호출하고, 실제 전달은
//! [`Notifier`] 디스패처 태스크가 [`NotificationSender`]들로 넘깁니다.
//!
//! 기본 전송기:
//! - `LogSender` - tracing 로그
//! - `RecordingNotifier` - 메모리 기록 (테스트용)

pub mod notifier;
pub mod port;
pub mod senders;
pub mod types;

pub use notifier::*;
pub use port::*;
pub use senders::*;
pub use types::*;
