//! 모의 실행 및 테스트를 위한 시뮬레이션 거래소.
//!
//! 이 모듈은 다음 기능을 제공하는 시뮬레이션 거래소입니다:
//! - 시드 고정 랜덤 워크 또는 스크립트 시세 생성
//! - 주문 유형별 실행 규칙에 따른 매칭 및 부분 체결
//! - 계정 잔고, 증거금, 포지션 추적
//! - 연결 장애 주입
//!
//! # 예제
//!
//! ```ignore
//! use trader_exchange::simulated::{SimulatedExchange, SimulatedConfig};
//!
//! let config = SimulatedConfig::default()
//!     .with_initial_balance(dec!(100000))
//!     .with_symbol("AAPL", dec!(150))
//!     .with_seed(42);
//!
//! let exchange = SimulatedExchange::new(config);
//! exchange.connect().await;
//! exchange.tick().await;
//! ```

mod exchange;
mod matching_engine;
mod simulator;

pub use exchange::{SimulatedConfig, SimulatedExchange};
pub use matching_engine::{FillType, MatchingEngine, OrderMatch};
pub use simulator::{
    FillSizer, FractionalFill, FullFill, MarketSimulator, RandomFraction, RandomWalkSimulator, ScriptedPrices,
    StaticPrices,
};
