//! 주문 실행 어댑터.
//!
//! 이 크레이트는 다음을 제공합니다:
//! - ExecutionAdapter trait: 거래 장소 통합 인터페이스
//! - 시뮬레이션 거래소 (모의 실행 및 테스트용)
//! - 어댑터 에러 분류 (재시도/연결 불가/치명적)

pub mod error;
pub mod simulated;
pub mod traits;

pub use error::*;
pub use simulated::{
    FillSizer, FillType, FractionalFill, FullFill, MarketSimulator, MatchingEngine, OrderMatch, RandomFraction,
    RandomWalkSimulator, ScriptedPrices, SimulatedConfig, SimulatedExchange, StaticPrices,
};
pub use traits::*;
