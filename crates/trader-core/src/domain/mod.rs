//! 주문 실행 코어의 도메인 모델.

mod execution_rule;
mod market;
mod order;
mod position;
mod risk;
mod state_machine;

pub use execution_rule::*;
pub use market::*;
pub use order::*;
pub use position::*;
pub use risk::*;
pub use state_machine::*;
