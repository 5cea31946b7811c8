//! 리스크 제어 시스템.
//!
//! 이 crate는 다음 기능을 제공합니다:
//! - 사전 주문 검사 (자금, 집중도, 주문 금액, 일일 거래량, 사용자 규칙)
//! - 실시간 포트폴리오 감시 (증거금 비율, 일일 손실, 집중도)
//! - 청산 계획
//! - 리스크 이벤트 기록
//!
//! # 예제
//!
//! ```rust,ignore
//! use trader_risk::{RiskControlConfig, RiskControlEngine};
//!
//! let engine = RiskControlEngine::new(RiskControlConfig::default())?;
//!
//! let result = engine.check_order_risk(&order, &snapshot, market_price).await;
//! if result.approved {
//!     // 주문 진행
//! }
//! ```

pub mod checks;
pub mod config;
pub mod error;
pub mod limits;
pub mod liquidation;
pub mod manager;
pub mod monitor;

// 주요 타입 재내보내기
pub use checks::{check_order, names as check_names, CheckOutcome, OrderRiskInput, RiskCheckResult, QUANTITY_DP};
pub use config::{ConfigValidationError, RiskControlConfig, SymbolRiskConfig};
pub use error::{RiskError, RiskResult};
pub use limits::{DailyTradeStatus, DailyTradeTracker, TradeRecord};
pub use liquidation::{plan_liquidation, ForceClose, LiquidationPlan, RISK_CONTROL_STRATEGY};
pub use manager::{RiskControlEngine, Suspension};
pub use monitor::{closing_side, evaluate_portfolio, MonitorDecision, PortfolioMetrics, PortfolioSnapshot};
