//! 주문 실행 코어.
//!
//! 이 crate는 다음을 제공합니다:
//! - 실행 코디네이터: 주문 제출, 보류/재시도, 취소, 정정, 리스크 액션 실행
//! - 주문별 모니터 태스크: 거래소 상태 폴링 및 정합
//! - 주문 레지스트리: 상태/체결 이벤트, 보류 큐, 동결 수량 기록
//! - 포지션 원장: 키별 직렬화와 낙관적 버전 검사를 거치는 포지션 변경
//!
//! # 예제
//!
//! ```rust,ignore
//! use trader_execution::{ExecutionConfig, ExecutionCoordinator, TradingContext};
//!
//! let ctx = TradingContext::new(config, adapter, risk_config, notifier, repository)?;
//! let coordinator = Arc::new(ExecutionCoordinator::new(ctx));
//! coordinator.start().await;
//! let order = coordinator.submit(OrderRequest::limit(1, "AAPL", Side::Buy, dec!(100), dec!(150))).await?;
//! ```

pub mod context;
pub mod coordinator;
pub mod monitor;
pub mod order_manager;
pub mod position_ledger;

pub use context::{exchange_error, ExecutionConfig, TradingContext};
pub use coordinator::{ExecutionCoordinator, STOP_TRIGGER_STRATEGY};
pub use monitor::{spawn_monitor, MonitorCommand, MonitorExit, MonitorHandle};
pub use order_manager::{OrderEvent, OrderManager, OrderManagerError, OrderStats};
pub use position_ledger::{PositionLedger, DEFAULT_MAX_RETRIES};
