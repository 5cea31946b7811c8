//! # Trader Core
//!
//! 주문 실행 코어의 도메인 모델 및 공통 인프라를 제공합니다:
//! - 주문, 체결, 주문 상태 머신
//! - 주문 유형별 가격/트리거 결정 규칙
//! - 포지션 원장 계산 (가중평균 원가, 실현/미실현 손익, 동결 수량)
//! - 리스크 규칙, 리스크 이벤트, 리스크 제어 액션
//! - 저장소 계약 및 인메모리 구현
//! - 설정 로딩 및 로깅 인프라

pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod repository;
pub mod types;

pub use config::*;
pub use domain::*;
pub use error::*;
pub use logging::*;
pub use repository::*;
pub use types::*;
